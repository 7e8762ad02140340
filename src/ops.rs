/// Whole-file operations on image paths, as used by the one-shot console

use crate::error::Result;
use crate::filesystem::Dirent;
use crate::image::Image;
use std::path::Path;

/// Describe the media, geometry and filesystem of an image file
pub fn identify<P: AsRef<Path>>(path: P) -> Result<String> {
    let image = Image::open(&path)?;
    log::info!("{}: {}", path.as_ref().display(), image.describe());
    Ok(image.describe())
}

/// Directory entries of the files on an image
pub fn list<P: AsRef<Path>>(path: P) -> Result<Vec<Dirent>> {
    let image = Image::open(path)?;
    Ok(image.files().to_vec())
}

/// Contents of one file on an image
pub fn extract<P: AsRef<Path>>(path: P, name: &str) -> Result<Vec<u8>> {
    Image::open(path)?.get_file(name)
}

/// Add a file to an image and write the image back in place
///
/// A file with the same name is replaced. The image on disk is untouched if
/// the write fails.
pub fn add<P: AsRef<Path>>(path: P, name: &str, filetype: &str, data: &[u8]) -> Result<()> {
    let mut image = Image::open(&path)?;
    image.write_file(name, filetype, data)?;
    image.save(&path)
}

/// Delete a file from an image and write the image back in place
pub fn delete<P: AsRef<Path>>(path: P, name: &str) -> Result<()> {
    let mut image = Image::open(&path)?;
    image.delete_file(name)?;
    image.save(&path)
}
