/// Opened disk images: identification, sector access and file operations

/// Builder for blank formatted images
pub mod builder;
/// Sector buffers and sector level access
pub mod sector;

pub use builder::{DiskFormat, ImageBuilder};
pub use sector::WriteableSector;

use crate::buffer::ByteBuffer;
use crate::container::{Compression, ContainerRegistry, RomEntry};
use crate::error::{AtrError, Result};
use crate::filesystem::{self, Dirent, FileSystemInfo, Filesystem};
use crate::media::{self, Header, IdentifyOptions, Media};
use crate::segment::Segment;
use crate::style::StyleBits;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

/// What a disassembler needs from a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyView {
    /// Segment bytes in order
    pub bytes: Vec<u8>,
    /// Load address of the first byte
    pub origin: u16,
    /// Chunk class per byte: 0 code, 1 data, 2..7 format specific
    pub classes: Vec<u8>,
}

/// A disk or cartridge image held in memory
///
/// All segments index into the one [`ByteBuffer`] owned here. Mutating file
/// operations run as transactions: the data and style arrays are snapshotted
/// first and restored if anything fails.
#[derive(Debug)]
pub struct Image {
    buffer: ByteBuffer,
    compression: Compression,
    mime: String,
    rom_entries: Vec<RomEntry>,
    media: Media,
    filesystem: Option<Arc<dyn Filesystem>>,
    segments: Vec<Segment>,
    files: Vec<Dirent>,
    pub(crate) changed: bool,
    filename: Option<String>,
}

impl Image {
    /// Identify an image held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_options(bytes, &IdentifyOptions::default())
    }

    /// Identify an image with explicit identification options
    ///
    /// The bytes are unwrapped by the first matching container, matched
    /// against the media registry and probed for a filesystem.
    pub fn from_bytes_with_options(bytes: Vec<u8>, options: &IdentifyOptions) -> Result<Self> {
        let unpacked = ContainerRegistry::default().unwrap(bytes)?;
        let media = media::guess(&unpacked, options)?;
        let mut buffer = ByteBuffer::empty();
        buffer.populate(unpacked.data)?;
        let mut image = Self {
            buffer,
            compression: unpacked.compression,
            mime: unpacked.mime,
            rom_entries: unpacked.rom_entries,
            media,
            filesystem: None,
            segments: Vec::new(),
            files: Vec::new(),
            changed: false,
            filename: None,
        };
        image.refresh()?;
        Ok(image)
    }

    /// Read and identify an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = crate::io::read_image(&path)?;
        let mut image = Self::from_bytes(bytes)?;
        image.filename = Some(path.as_ref().display().to_string());
        Ok(image)
    }

    /// Write the image back out, repacked in its original container
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        crate::io::write_image(&path, &bytes)?;
        self.filename = Some(path.as_ref().display().to_string());
        self.changed = false;
        Ok(())
    }

    /// Image bytes repacked in the original container
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.compression.pack(self.buffer.data())
    }

    /// Backing buffer
    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Mutable backing buffer, for style and comment edits
    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buffer
    }

    /// Identified media
    pub fn media(&self) -> &Media {
        &self.media
    }

    /// Geometry
    pub fn header(&self) -> &Header {
        &self.media.header
    }

    /// Container the image was found in
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Mime type reported by the container
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// ROM files of a MAME ROM set
    pub fn rom_entries(&self) -> &[RomEntry] {
        &self.rom_entries
    }

    /// Filesystem found on the media
    pub fn filesystem(&self) -> Option<&dyn Filesystem> {
        self.filesystem.as_deref()
    }

    /// Segments in display order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First segment with a matching name
    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// Listed files
    pub fn files(&self) -> &[Dirent] {
        &self.files
    }

    /// Check if the image has been modified since it was loaded or saved
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Path the image was loaded from or last saved to
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// One line description: media, geometry and filesystem
    pub fn describe(&self) -> String {
        let fs = self.filesystem.as_ref().map_or("no filesystem", |fs| fs.name());
        let container = match self.compression {
            Compression::Uncompressed => String::new(),
            other => format!(" ({} compressed)", other),
        };
        format!("{}: {}, {}{}", self.media.pretty_name(), self.media.header, fs, container)
    }

    /// Filesystem summary
    pub fn info(&self) -> Result<FileSystemInfo> {
        self.require_filesystem()?.info(&self.buffer, &self.media.header)
    }

    /// Bytes of one sector
    pub fn read_sector(&self, sector: usize) -> Result<&[u8]> {
        sector::read_sector(&self.buffer, &self.media.header, sector)
    }

    /// Overwrite one sector; shorter data is zero padded
    pub fn write_sector(&mut self, sector: usize, data: &[u8]) -> Result<()> {
        let size = sector::sector_range(&self.media.header, sector)?.len();
        if data.len() > size {
            return Err(AtrError::InvalidSegmentLength(format!(
                "{} bytes don't fit in sector {} of {} bytes",
                data.len(),
                sector,
                size
            )));
        }
        sector::write_sector(
            &mut self.buffer,
            &self.media.header,
            &WriteableSector::with_data(size, data, sector),
        )?;
        self.changed = true;
        Ok(())
    }

    /// Every sector as `(label, absolute range)`
    pub fn iter_sectors(&self) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        sector::iter_sectors(&self.media.header)
    }

    /// Re-probe the filesystem and rebuild the segment and file lists
    ///
    /// Files whose sector chains can't be followed get an empty segment
    /// carrying the error instead of failing the whole refresh.
    pub fn refresh(&mut self) -> Result<()> {
        let header = self.media.header.clone();
        let fs = filesystem::guess(&self.buffer, &header)?;
        let mut segments = self.media.segments(&self.buffer, &self.rom_entries)?;
        let mut files = Vec::new();
        if let Some(fs) = &fs {
            segments.extend(fs.metadata_segments(&mut self.buffer, &header)?);
            let directory = fs.read_directory(&self.buffer, &header)?;
            for dirent in directory.iter_in_use() {
                match fs.file_segment(&mut self.buffer, &header, dirent) {
                    Ok(segment) => {
                        let subs = fs.sub_segments(&mut self.buffer, dirent, &segment);
                        segments.push(segment);
                        segments.extend(subs);
                    }
                    Err(err) => {
                        log::warn!("{}: {}", dirent.filename, err);
                        segments.push(Segment::empty(dirent.filename.clone()).with_error(err.to_string()));
                    }
                }
                files.push(dirent.clone());
            }
        }
        log::debug!("{} segments, {} files", segments.len(), files.len());
        self.filesystem = fs;
        self.segments = segments;
        self.files = files;
        Ok(())
    }

    fn require_filesystem(&self) -> Result<Arc<dyn Filesystem>> {
        self.filesystem.clone().ok_or_else(|| {
            AtrError::unsupported_disk(format!("No filesystem found on {}", self.media.pretty_name()))
        })
    }

    fn require_writable(&self) -> Result<Arc<dyn Filesystem>> {
        let fs = self.require_filesystem()?;
        if !fs.is_writable() {
            return Err(filesystem::read_only(fs.name()));
        }
        Ok(fs)
    }

    /// Run `op` against the image, restoring the data and style arrays if it
    /// or the following refresh fails
    fn transaction<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.buffer.snapshot();
        let result = op(self).and_then(|value| {
            self.refresh()?;
            Ok(value)
        });
        match result {
            Ok(value) => {
                self.changed = true;
                Ok(value)
            }
            Err(err) => {
                log::debug!("rolling back: {}", err);
                self.buffer.restore(snapshot);
                match self.refresh() {
                    Ok(()) => Err(err),
                    Err(refresh) => {
                        log::warn!("refresh after rollback failed: {}", refresh);
                        Err(AtrError::Rollback {
                            source: Box::new(err),
                            refresh: Box::new(refresh),
                        })
                    }
                }
            }
        }
    }

    /// Listed file with a matching name
    pub fn find_file(&self, name: &str) -> Result<&Dirent> {
        self.files
            .iter()
            .find(|d| d.matches(name))
            .ok_or_else(|| AtrError::FileNotFound(name.to_string()))
    }

    /// Contents of a file
    pub fn read_file(&self, dirent: &Dirent) -> Result<Vec<u8>> {
        let fs = self.require_filesystem()?;
        let offsets = fs.file_offsets(&self.buffer, &self.media.header, dirent)?;
        let data = self.buffer.data();
        offsets
            .iter()
            .map(|&i| data.get(i).copied().ok_or(AtrError::InvalidIndex { index: i, len: data.len() }))
            .collect()
    }

    /// Contents of a file looked up by name
    pub fn get_file(&self, name: &str) -> Result<Vec<u8>> {
        let dirent = self.find_file(name)?.clone();
        self.read_file(&dirent)
    }

    /// Add a file, replacing any file with the same name
    ///
    /// Data sectors are written first, then the VTOC, then the directory.
    pub fn write_file(&mut self, name: &str, filetype: &str, data: &[u8]) -> Result<()> {
        let fs = self.require_writable()?;
        self.transaction(|image| image.write_file_sectors(fs.as_ref(), name, filetype, data))
    }

    fn write_file_sectors(&mut self, fs: &dyn Filesystem, name: &str, filetype: &str, data: &[u8]) -> Result<()> {
        let header = self.media.header.clone();
        let mut vtoc = fs.read_vtoc(&self.buffer, &header)?;
        let mut directory = fs.read_directory(&self.buffer, &header)?;
        let dirent = fs.new_dirent(name, filetype)?;

        if let Some(existing) = directory.find(&dirent.filename).ok().cloned() {
            log::info!("replacing {}", existing.filename);
            let sectors = fs.file_sectors(&self.buffer, &header, &existing)?;
            directory.remove_entry(existing.file_num, &mut vtoc, &sectors)?;
        }

        let slot = directory.add_entry(dirent)?;
        let mut sectors = fs.build_sectors(&header, data);
        directory.assign_sector_chain(slot, &mut vtoc, &mut sectors)?;
        let entry = directory
            .get_mut(slot)
            .ok_or_else(|| AtrError::FileNotFound(name.to_string()))?;
        let sectors = fs.link_chain(&self.buffer, &header, &mut vtoc, entry, sectors)?;

        sector::write_sectors(&mut self.buffer, &header, &sectors)?;
        let vtoc_sectors = fs.encode_vtoc(&vtoc, &self.buffer, &header)?;
        sector::write_sectors(&mut self.buffer, &header, &vtoc_sectors)?;
        let directory_sectors = fs.encode_directory(&directory, &self.buffer, &header)?;
        sector::write_sectors(&mut self.buffer, &header, &directory_sectors)?;

        log::info!("wrote {} ({} bytes, {} sectors)", name, data.len(), sectors.len());
        Ok(())
    }

    /// Remove a file and free its sectors
    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        let fs = self.require_writable()?;
        self.transaction(|image| {
            let header = image.media.header.clone();
            let mut vtoc = fs.read_vtoc(&image.buffer, &header)?;
            let mut directory = fs.read_directory(&image.buffer, &header)?;
            let dirent = directory.find(name)?.clone();
            let sectors = fs.file_sectors(&image.buffer, &header, &dirent)?;
            directory.remove_entry(dirent.file_num, &mut vtoc, &sectors)?;

            let vtoc_sectors = fs.encode_vtoc(&vtoc, &image.buffer, &header)?;
            sector::write_sectors(&mut image.buffer, &header, &vtoc_sectors)?;
            let directory_sectors = fs.encode_directory(&directory, &image.buffer, &header)?;
            sector::write_sectors(&mut image.buffer, &header, &directory_sectors)?;
            log::info!("deleted {} ({} sectors freed)", dirent.filename, sectors.len());
            Ok(())
        })
    }

    /// Fill every free sector with `fill`, returning how many were cleared
    pub fn shred(&mut self, fill: u8) -> Result<usize> {
        let fs = self.require_writable()?;
        self.transaction(|image| {
            let header = image.media.header.clone();
            let vtoc = fs.read_vtoc(&image.buffer, &header)?;
            let mut count = 0;
            for num in vtoc.iter_free().filter(|&s| header.sector_is_valid(s)) {
                let range = sector::sector_range(&header, num)?;
                image.buffer.data_mut()[range].fill(fill);
                count += 1;
            }
            log::info!("shredded {} free sectors with ${:02X}", count, fill);
            Ok(count)
        })
    }

    /// Bytes, origin and chunk classes of a segment for disassembly
    pub fn disassembly_view(&self, segment: &Segment) -> DisassemblyView {
        let classes = segment
            .style_bytes(&self.buffer)
            .into_iter()
            .map(|s| StyleBits(s).user_class())
            .collect();
        DisassemblyView {
            bytes: segment.to_bytes(&self.buffer),
            origin: segment.origin,
            classes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::build_xex;

    fn sd_image() -> Image {
        ImageBuilder::new().format(DiskFormat::AtariDos2Sd).build().unwrap()
    }

    #[test]
    fn test_blank_image() {
        let image = sd_image();
        assert_eq!(image.media().pretty_name(), "Atari SD (90K) Floppy Disk Image");
        assert_eq!(image.filesystem().unwrap().name(), "Atari DOS 2");
        assert!(image.files().is_empty());
        assert!(image.is_changed());
        let names: Vec<_> = image.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names[0], "ATR Header");
        assert_eq!(names[1], "Raw disk sectors");
        assert!(names.contains(&"VTOC"));
        assert!(names.contains(&"Directory"));
    }

    #[test]
    fn test_write_read_file() {
        let mut image = sd_image();
        let free = image.info().unwrap().free_sectors;
        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        image.write_file("test.dat", "", &data).unwrap();

        assert_eq!(image.get_file("TEST.DAT").unwrap(), data);
        assert_eq!(image.info().unwrap().free_sectors, free - 3);
        assert_eq!(image.files().len(), 1);
        assert!(image.segment_by_name("TEST.DAT 3s@4").is_some());
    }

    #[test]
    fn test_replace_file() {
        let mut image = sd_image();
        image.write_file("A", "", &[1; 500]).unwrap();
        image.write_file("A", "", &[2; 10]).unwrap();
        assert_eq!(image.files().len(), 1);
        assert_eq!(image.get_file("A").unwrap(), vec![2; 10]);
        assert_eq!(image.info().unwrap().free_sectors, 706);
    }

    #[test]
    fn test_delete_restores_vtoc() {
        let mut image = sd_image();
        let before = image.read_sector(360).unwrap().to_vec();
        image.write_file("FOO", "", &[0; 200]).unwrap();
        image.delete_file("FOO").unwrap();
        assert_eq!(image.read_sector(360).unwrap(), &before[..]);
        assert!(matches!(image.get_file("FOO"), Err(AtrError::FileNotFound(_))));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let mut image = sd_image();
        let data = image.buffer().data().to_vec();
        let style = image.buffer().style().to_vec();
        let result = image.write_file("HUGE", "", &vec![0xAA; 125 * 800]);
        assert!(matches!(result, Err(AtrError::NotEnoughSpaceOnDisk { .. })));
        assert_eq!(image.buffer().data(), &data[..]);
        assert_eq!(image.buffer().style(), &style[..]);
        assert!(image.files().is_empty());
    }

    #[test]
    fn test_bad_name_rolls_back() {
        let mut image = sd_image();
        let data = image.buffer().data().to_vec();
        assert!(matches!(
            image.write_file("NOT VALID!", "", &[1, 2, 3]),
            Err(AtrError::InvalidFilename(_))
        ));
        assert_eq!(image.buffer().data(), &data[..]);
    }

    #[test]
    fn test_executable_sub_segments() {
        let mut image = sd_image();
        let xex = build_xex(&[(0x2000, &[0xA9, 0x00, 0x60])], Some(0x2000)).unwrap();
        image.write_file("GAME.XEX", "", &xex).unwrap();
        let chunk = image.segment_by_name("$2000-$2002").unwrap();
        assert_eq!(chunk.origin, 0x2000);
        let view = image.disassembly_view(chunk);
        assert_eq!(view.bytes, vec![0xA9, 0x00, 0x60]);
        assert!(image.segment_by_name("Run Address").is_some());
    }

    #[test]
    fn test_shred() {
        let mut image = sd_image();
        let cleared = image.shred(0xE5).unwrap();
        assert_eq!(cleared, 707);
        assert_eq!(image.read_sector(4).unwrap(), &[0xE5; 128][..]);
        assert_eq!(image.read_sector(360).unwrap()[0], 2);
    }

    #[test]
    fn test_write_sector() {
        let mut image = sd_image();
        image.write_sector(700, &[0x11; 10]).unwrap();
        assert_eq!(&image.read_sector(700).unwrap()[..11], &[0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0]);
        assert!(image.write_sector(700, &[0; 129]).is_err());
        assert!(matches!(image.read_sector(721), Err(AtrError::InvalidSector(721))));
        assert_eq!(image.iter_sectors().count(), 720);
    }

    #[test]
    fn test_raw_image_has_no_files() {
        let mut image = Image::from_bytes(vec![0x42; 1000]).unwrap();
        assert_eq!(image.media().pretty_name(), "Raw Data");
        assert_eq!(image.segments().len(), 1);
        assert_eq!(image.segments()[0].name, "Raw data");
        assert!(matches!(
            image.write_file("A", "", &[1]),
            Err(AtrError::UnsupportedDiskImage(_))
        ));
    }
}
