/// Filesystem implementations

/// Atari DOS 2.0S, 2.5 and MyDOS entries
pub mod atari_dos;
/// Boot-only and KBoot disks
pub mod boot;
/// Directory slots and entries
pub mod directory;
/// Apple DOS 3.3
pub mod dos33;
/// SpartaDOS, read only
pub mod spartados;
/// Apple ][ Standard Delivery boot disks
pub mod standard_delivery;
/// Free sector map
pub mod vtoc;

pub use atari_dos::AtariDos2;
pub use boot::{AtariBootDisk, BootRecord, KBoot};
pub use directory::{Dirent, Directory};
pub use dos33::Dos33;
pub use spartados::SpartaDos;
pub use standard_delivery::StandardDelivery;
pub use vtoc::{Vtoc, SECTOR_MAP_SIZE};

use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::image::sector::split_into_sectors;
use crate::image::WriteableSector;
use crate::media::Header;
use crate::segment::Segment;
use std::fmt;
use std::sync::Arc;

/// Summary of a mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemInfo {
    /// Filesystem name
    pub fs_type: &'static str,
    /// Sectors on the media
    pub total_sectors: usize,
    /// Free sectors according to the VTOC
    pub free_sectors: usize,
    /// Sector size in bytes
    pub sector_size: usize,
    /// Directory slots
    pub directory_capacity: usize,
    /// Listed files
    pub num_files: usize,
}

/// A filesystem layout on sectored media
///
/// Implementations are stateless: everything is read from and encoded back
/// into the image bytes, so the same value can serve any number of images.
/// The generic file operations in [`Image`](crate::image::Image) combine
/// these hooks with [`Vtoc`] and [`Directory`].
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Check the media for this filesystem
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self>
    where
        Self: Sized;

    /// Display name, e.g. "Atari DOS 2"
    fn name(&self) -> &'static str;

    /// Whether files can be added and removed
    fn is_writable(&self) -> bool {
        true
    }

    /// Payload bytes that fit in one data sector
    fn payload_size(&self, header: &Header) -> usize {
        header.sector_size
    }

    /// Decode the free sector map
    fn read_vtoc(&self, buffer: &ByteBuffer, header: &Header) -> Result<Vtoc>;

    /// Encode the free sector map into full sectors
    fn encode_vtoc(&self, vtoc: &Vtoc, buffer: &ByteBuffer, header: &Header) -> Result<Vec<WriteableSector>>;

    /// Decode the directory
    fn read_directory(&self, buffer: &ByteBuffer, header: &Header) -> Result<Directory>;

    /// Encode the directory into full sectors
    fn encode_directory(
        &self,
        directory: &Directory,
        buffer: &ByteBuffer,
        header: &Header,
    ) -> Result<Vec<WriteableSector>>;

    /// Validate a filename and build an entry for it
    fn new_dirent(&self, filename: &str, filetype: &str) -> Result<Dirent>;

    /// Split file data into unassigned data sectors
    fn build_sectors(&self, header: &Header, data: &[u8]) -> Vec<WriteableSector> {
        split_into_sectors(data, header.sector_size, self.payload_size(header))
    }

    /// Write the on-disk links of an assigned chain
    ///
    /// Returns every sector that must be written, which may include extra
    /// bookkeeping sectors reserved here.
    fn link_chain(
        &self,
        buffer: &ByteBuffer,
        header: &Header,
        vtoc: &mut Vtoc,
        dirent: &mut Dirent,
        sectors: Vec<WriteableSector>,
    ) -> Result<Vec<WriteableSector>>;

    /// Every sector owned by a file, including bookkeeping sectors
    fn file_sectors(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>>;

    /// Absolute buffer offsets of a file's payload, in file order
    fn file_offsets(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>>;

    /// Boot, VTOC and directory segments, styled and commented
    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>>;

    /// Segment name and verbose name for a file
    fn file_segment_names(&self, dirent: &Dirent) -> (String, String) {
        (dirent.filename.clone(), dirent.filename.clone())
    }

    /// Segment over a file's payload
    fn file_segment(&self, buffer: &mut ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Segment> {
        let offsets = self.file_offsets(buffer, header, dirent)?;
        let (name, verbose_name) = self.file_segment_names(dirent);
        Ok(Segment::from_offsets(buffer, &offsets, name)?.with_verbose_name(verbose_name))
    }

    /// Extra segments found inside a file, such as executable chunks
    fn sub_segments(&self, buffer: &mut ByteBuffer, dirent: &Dirent, file: &Segment) -> Vec<Segment> {
        let _ = (buffer, dirent, file);
        Vec::new()
    }

    /// Summary for listings
    fn info(&self, buffer: &ByteBuffer, header: &Header) -> Result<FileSystemInfo> {
        let vtoc = self.read_vtoc(buffer, header)?;
        let directory = self.read_directory(buffer, header)?;
        Ok(FileSystemInfo {
            fs_type: self.name(),
            total_sectors: header.num_sectors(),
            free_sectors: vtoc.num_free(),
            sector_size: header.sector_size,
            directory_capacity: directory.capacity(),
            num_files: directory.iter_in_use().count(),
        })
    }
}

fn try_probe<F: Filesystem + 'static>(
    buffer: &ByteBuffer,
    header: &Header,
) -> Result<Option<Arc<dyn Filesystem>>> {
    match F::probe(buffer, header) {
        Ok(fs) => {
            log::info!("found {} filesystem", fs.name());
            Ok(Some(Arc::new(fs)))
        }
        Err(err) if err.is_probe_miss() => {
            log::debug!("{}", err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Find the filesystem on identified media
///
/// Probes run in order: Apple Standard Delivery, Apple DOS 3.3, SpartaDOS,
/// Atari DOS 2, KBoot, Atari boot disk.
/// A probe that does not match moves on to the next; unsupported variants
/// (such as ProDOS) stop the search with an error. Media with no recognised
/// filesystem yields `None`.
pub fn guess(buffer: &ByteBuffer, header: &Header) -> Result<Option<Arc<dyn Filesystem>>> {
    if !header.has_sectors() {
        return Ok(None);
    }
    let probes: [fn(&ByteBuffer, &Header) -> Result<Option<Arc<dyn Filesystem>>>; 6] = [
        try_probe::<StandardDelivery>,
        try_probe::<Dos33>,
        try_probe::<SpartaDos>,
        try_probe::<AtariDos2>,
        try_probe::<KBoot>,
        try_probe::<AtariBootDisk>,
    ];
    for probe in probes {
        if let Some(fs) = probe(buffer, header)? {
            return Ok(Some(fs));
        }
    }
    Ok(None)
}

/// Error for write operations on filesystems that do not support them
pub(crate) fn read_only(name: &str) -> AtrError {
    AtrError::unsupported_disk(format!("{} images are read only", name))
}

/// Attach one-byte comments at segment-local indexes, skipping any past the end
pub(crate) fn comment_all(buffer: &mut ByteBuffer, segment: &Segment, comments: &[(usize, String)]) -> Result<()> {
    for (index, text) in comments {
        if *index < segment.len() {
            segment.set_comment(buffer, *index..*index + 1, text.as_str())?;
        }
    }
    Ok(())
}

/// Format a flag list as `[A, B]`
pub(crate) fn flag_list(flags: &[&str]) -> String {
    format!("[{}]", flags.join(", "))
}
