/// Builder for creating blank formatted images

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::filesystem::{AtariDos2, Dos33};
use crate::image::Image;
use crate::media::apple::APPLE_IMAGE_SIZE;
use crate::media::atari::{DD_IMAGE_SIZE, ED_IMAGE_SIZE, SD_IMAGE_SIZE};
use crate::media::{AtrHeader, Header, ATR_HEADER_SIZE};

/// Disk layouts the builder can format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskFormat {
    /// Atari DOS 2.0S, 720 sectors of 128 bytes
    #[default]
    AtariDos2Sd,
    /// Atari DOS 2.5, 1040 sectors of 128 bytes
    AtariDos2Ed,
    /// Atari DOS 2.0D, 720 sectors of 256 bytes
    AtariDos2Dd,
    /// Apple DOS 3.3, 35 tracks of 16 sectors
    AppleDos33,
}

impl DiskFormat {
    /// Payload size in bytes
    pub fn image_size(&self) -> usize {
        match self {
            DiskFormat::AtariDos2Sd => SD_IMAGE_SIZE,
            DiskFormat::AtariDos2Ed => ED_IMAGE_SIZE,
            DiskFormat::AtariDos2Dd => DD_IMAGE_SIZE,
            DiskFormat::AppleDos33 => APPLE_IMAGE_SIZE,
        }
    }

    /// Sector size in bytes
    pub fn sector_size(&self) -> usize {
        match self {
            DiskFormat::AtariDos2Sd | DiskFormat::AtariDos2Ed => 128,
            DiskFormat::AtariDos2Dd | DiskFormat::AppleDos33 => 256,
        }
    }

    /// Check if the layout is for an Atari
    pub fn is_atari(&self) -> bool {
        !matches!(self, DiskFormat::AppleDos33)
    }
}

/// Builder for constructing formatted images
///
/// ```
/// use atrcopy::{DiskFormat, ImageBuilder};
///
/// let image = ImageBuilder::new().format(DiskFormat::AtariDos2Ed).build()?;
/// assert_eq!(image.filesystem().map(|fs| fs.name()), Some("Atari DOS 2.5"));
/// # Ok::<(), atrcopy::AtrError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    format: DiskFormat,
    atr_header: bool,
}

impl ImageBuilder {
    /// Create a new builder for an SD ATR
    pub fn new() -> Self {
        Self {
            format: DiskFormat::default(),
            atr_header: true,
        }
    }

    /// Set the disk layout
    pub fn format(mut self, format: DiskFormat) -> Self {
        self.format = format;
        self
    }

    /// Prefix Atari images with a 16 byte ATR header, or leave them as XFD
    ///
    /// Apple images are always headerless.
    pub fn atr_header(mut self, atr_header: bool) -> Self {
        self.atr_header = atr_header;
        self
    }

    /// Format the image and identify it
    pub fn build(self) -> Result<Image> {
        let image_size = self.format.image_size();
        let sector_size = self.format.sector_size();
        let with_header = self.atr_header && self.format.is_atari();

        let mut bytes = Vec::with_capacity(image_size + ATR_HEADER_SIZE);
        if with_header {
            bytes.extend_from_slice(&AtrHeader::new(image_size, sector_size as u16).to_bytes());
        }
        let offset = bytes.len();
        bytes.resize(offset + image_size, 0);

        let mut buffer = ByteBuffer::new(bytes);
        if self.format.is_atari() {
            let format = if with_header { "ATR" } else { "XFD" };
            let header = Header::new(format, offset, image_size, sector_size, 1);
            AtariDos2::format(&mut buffer, &header)?;
        } else {
            let header = Header::new("DSK", 0, image_size, sector_size, 0);
            Dos33::format(&mut buffer, &header)?;
        }
        log::debug!("built blank {:?} image of {} bytes", self.format, buffer.len());

        let mut image = Image::from_bytes(buffer.data().to_vec())?;
        image.changed = true;
        Ok(image)
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let image = ImageBuilder::new().build().unwrap();
        assert_eq!(image.header().file_format, "ATR");
        assert_eq!(image.header().num_sectors(), 720);
        assert_eq!(image.buffer().len(), 16 + 92160);
        assert_eq!(image.info().unwrap().free_sectors, 707);
    }

    #[test]
    fn test_builder_enhanced() {
        let image = ImageBuilder::new().format(DiskFormat::AtariDos2Ed).build().unwrap();
        assert_eq!(image.media().pretty_name(), "Atari ED (130K) Floppy Disk Image");
        assert_eq!(image.info().unwrap().free_sectors, 1010);
        assert!(image.segment_by_name("VTOC2").is_some());
    }

    #[test]
    fn test_builder_double_density() {
        let image = ImageBuilder::new().format(DiskFormat::AtariDos2Dd).build().unwrap();
        assert_eq!(image.header().sector_size, 256);
        assert_eq!(image.filesystem().unwrap().name(), "Atari DOS 2");
    }

    #[test]
    fn test_builder_xfd() {
        let image = ImageBuilder::new().atr_header(false).build().unwrap();
        assert_eq!(image.media().pretty_name(), "Atari XFD Floppy Disk Image");
        assert_eq!(image.buffer().len(), 92160);
        assert_eq!(image.filesystem().unwrap().name(), "Atari DOS 2");
    }

    #[test]
    fn test_builder_apple() {
        let image = ImageBuilder::new().format(DiskFormat::AppleDos33).build().unwrap();
        assert_eq!(image.media().pretty_name(), "Apple ][ Floppy Disk Image (16 sector tracks)");
        assert_eq!(image.filesystem().unwrap().name(), "Apple DOS 3.3");
        assert_eq!(image.info().unwrap().directory_capacity, 105);
    }
}
