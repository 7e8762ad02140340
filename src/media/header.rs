/// Media geometry and the ATR file header

use crate::error::{AtrError, Result};
use std::fmt;

/// ATR magic number (NICKATARI checksum)
pub const ATR_MAGIC: u16 = 0x0296;

/// Size of the ATR header in bytes
pub const ATR_HEADER_SIZE: usize = 16;

/// Geometry of identified media
///
/// Sector numbers are labels: the first sector is `starting_sector_label`
/// (1 for Atari, 0 for Apple). Images with `num_initial_sectors` use a
/// smaller sector size for the first few sectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format tag: "ATR", "XFD", "DSK", "CART", "MAME" or "RAW"
    pub file_format: &'static str,
    /// Payload bytes, excluding the header
    pub image_size: usize,
    /// Sector size in bytes; 0 for media without sectors
    pub sector_size: usize,
    /// Bytes of header before the payload
    pub header_offset: usize,
    /// Label of the first sector
    pub starting_sector_label: usize,
    /// Number of leading short sectors
    pub num_initial_sectors: usize,
    /// Size of each leading short sector
    pub initial_sector_size: usize,
    /// Number of sectors on the media
    pub max_sectors: usize,
    /// ATR flags byte
    pub flags: u8,
    /// ATR CRC field
    pub crc: u32,
    /// ATR unused field
    pub unused: u32,
}

impl Header {
    /// Geometry with uniform sectors
    pub fn new(
        file_format: &'static str,
        header_offset: usize,
        image_size: usize,
        sector_size: usize,
        starting_sector_label: usize,
    ) -> Self {
        let mut header = Self {
            file_format,
            image_size,
            sector_size,
            header_offset,
            starting_sector_label,
            num_initial_sectors: 0,
            initial_sector_size: 0,
            max_sectors: 0,
            flags: 0,
            crc: 0,
            unused: 0,
        };
        header.max_sectors = header.calc_max_sectors();
        header
    }

    /// Geometry for media with no sector structure
    pub fn unsectored(file_format: &'static str, header_offset: usize, image_size: usize) -> Self {
        Self::new(file_format, header_offset, image_size, 0, 0)
    }

    /// Use `count` leading sectors of `size` bytes each
    pub fn with_initial_sectors(mut self, count: usize, size: usize) -> Self {
        self.num_initial_sectors = count;
        self.initial_sector_size = size;
        self.max_sectors = self.calc_max_sectors();
        self
    }

    fn calc_max_sectors(&self) -> usize {
        if self.sector_size == 0 {
            return 0;
        }
        let initial_bytes = self.num_initial_sectors * self.initial_sector_size;
        self.num_initial_sectors + self.image_size.saturating_sub(initial_bytes) / self.sector_size
    }

    /// Number of sectors
    pub fn num_sectors(&self) -> usize {
        self.max_sectors
    }

    /// Label of the last sector
    pub fn last_sector(&self) -> usize {
        (self.starting_sector_label + self.max_sectors).saturating_sub(1)
    }

    /// Check if the media is addressed in sectors
    pub fn has_sectors(&self) -> bool {
        self.sector_size > 0
    }

    /// Check if a sector label exists on this media
    pub fn sector_is_valid(&self, sector: usize) -> bool {
        self.max_sectors > 0
            && sector >= self.starting_sector_label
            && sector < self.starting_sector_label + self.max_sectors
    }

    /// Absolute buffer offset and size of a sector
    pub fn get_index_of_sector(&self, sector: usize) -> Result<(usize, usize)> {
        if !self.sector_is_valid(sector) {
            return Err(AtrError::InvalidSector(sector));
        }
        let n = sector - self.starting_sector_label;
        let (pos, size) = if n < self.num_initial_sectors {
            (n * self.initial_sector_size, self.initial_sector_size)
        } else {
            let initial_bytes = self.num_initial_sectors * self.initial_sector_size;
            (
                initial_bytes + (n - self.num_initial_sectors) * self.sector_size,
                self.sector_size,
            )
        };
        Ok((pos + self.header_offset, size))
    }

    /// Absolute range of the payload
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.header_offset..self.header_offset + self.image_size
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_sectors() {
            write!(
                f,
                "{} {} bytes, {} sectors of {} bytes",
                self.file_format, self.image_size, self.max_sectors, self.sector_size
            )?;
            if self.num_initial_sectors > 0 {
                write!(
                    f,
                    " ({} initial sectors of {} bytes)",
                    self.num_initial_sectors, self.initial_sector_size
                )?;
            }
            Ok(())
        } else {
            write!(f, "{} {} bytes", self.file_format, self.image_size)
        }
    }
}

/// 16 byte ATR header, little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrHeader {
    /// Magic, always [`ATR_MAGIC`] once decoded
    pub magic: u16,
    /// Image size in 16 byte paragraphs (24 bits)
    pub paragraphs: u32,
    /// Sector size
    pub sector_size: u16,
    /// CRC, usually zero
    pub crc: u32,
    /// Unused field
    pub unused: u32,
    /// Flags byte
    pub flags: u8,
}

impl AtrHeader {
    /// Header describing `image_size` bytes of `sector_size` byte sectors
    pub fn new(image_size: usize, sector_size: u16) -> Self {
        Self {
            magic: ATR_MAGIC,
            paragraphs: (image_size / 16) as u32,
            sector_size,
            crc: 0,
            unused: 0,
            flags: 0,
        }
    }

    /// Decode the first 16 bytes of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ATR_HEADER_SIZE {
            return Err(AtrError::invalid_header("ATR header too short"));
        }
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        if magic != ATR_MAGIC {
            return Err(AtrError::invalid_header("no ATR header magic value"));
        }
        let low = u16::from_le_bytes([bytes[2], bytes[3]]) as u32;
        let high = bytes[6] as u32;
        Ok(Self {
            magic,
            paragraphs: (high << 16) | low,
            sector_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            crc: u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]),
            unused: u32::from_le_bytes([bytes[11], bytes[12], bytes[13], bytes[14]]),
            flags: bytes[15],
        })
    }

    /// Encode to 16 bytes
    pub fn to_bytes(&self) -> [u8; ATR_HEADER_SIZE] {
        let mut out = [0u8; ATR_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2..4].copy_from_slice(&((self.paragraphs & 0xffff) as u16).to_le_bytes());
        out[4..6].copy_from_slice(&self.sector_size.to_le_bytes());
        out[6] = ((self.paragraphs >> 16) & 0xff) as u8;
        out[7..11].copy_from_slice(&self.crc.to_le_bytes());
        out[11..15].copy_from_slice(&self.unused.to_le_bytes());
        out[15] = self.flags;
        out
    }

    /// Payload size in bytes
    pub fn image_size(&self) -> usize {
        self.paragraphs as usize * 16
    }
}
