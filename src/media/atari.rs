/// Atari 8-bit floppy and hard drive images

use super::header::{AtrHeader, Header, ATR_HEADER_SIZE, ATR_MAGIC};
use super::{IdentifyOptions, MediaType, SizeRule};
use crate::container::Unpacked;
use crate::error::{AtrError, Result};

/// Single density payload size (720 x 128)
pub const SD_IMAGE_SIZE: usize = 92160;
/// Enhanced density payload size (1040 x 128)
pub const ED_IMAGE_SIZE: usize = 133120;
/// Double density payload size (720 x 256)
pub const DD_IMAGE_SIZE: usize = 184320;
/// Double density payload with three 128 byte boot sectors
pub const DD_SHORT_BOOT_IMAGE_SIZE: usize = 183936;

/// Sizes accepted for headerless images in strict mode
pub const XFD_SIZES: &[usize] = &[
    SD_IMAGE_SIZE,
    ED_IMAGE_SIZE,
    DD_SHORT_BOOT_IMAGE_SIZE,
    DD_IMAGE_SIZE,
];

/// An ATR image class: header sector size plus a payload size rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrMedia {
    pretty_name: &'static str,
    sector_size: usize,
    rule: SizeRule,
    initial_sectors: usize,
}

impl AtrMedia {
    /// 720 sectors of 128 bytes
    pub const SINGLE_DENSITY: AtrMedia = AtrMedia {
        pretty_name: "Atari SD (90K) Floppy Disk Image",
        sector_size: 128,
        rule: SizeRule::Exact(SD_IMAGE_SIZE),
        initial_sectors: 0,
    };

    /// Fewer than 720 sectors of 128 bytes
    pub const SINGLE_DENSITY_SHORT: AtrMedia = AtrMedia {
        pretty_name: "Atari SD Non-Standard Image",
        sector_size: 128,
        rule: SizeRule::LessThan(SD_IMAGE_SIZE),
        initial_sectors: 0,
    };

    /// 1040 sectors of 128 bytes
    pub const ENHANCED_DENSITY: AtrMedia = AtrMedia {
        pretty_name: "Atari ED (130K) Floppy Disk Image",
        sector_size: 128,
        rule: SizeRule::Exact(ED_IMAGE_SIZE),
        initial_sectors: 0,
    };

    /// 720 sectors of 256 bytes
    pub const DOUBLE_DENSITY: AtrMedia = AtrMedia {
        pretty_name: "Atari DD (180K) Floppy Disk Image",
        sector_size: 256,
        rule: SizeRule::Exact(DD_IMAGE_SIZE),
        initial_sectors: 0,
    };

    /// 720 sectors, the first three stored as 128 bytes
    pub const DOUBLE_DENSITY_SHORT_BOOT: AtrMedia = AtrMedia {
        pretty_name: "Atari DD (180K) Floppy Disk Image (Short Boot Sectors)",
        sector_size: 256,
        rule: SizeRule::Exact(DD_SHORT_BOOT_IMAGE_SIZE),
        initial_sectors: 3,
    };

    /// More than 720 sectors of 256 bytes
    pub const DOUBLE_DENSITY_HARD_DRIVE: AtrMedia = AtrMedia {
        pretty_name: "Atari DD Hard Drive Image",
        sector_size: 256,
        rule: SizeRule::GreaterThan(DD_IMAGE_SIZE),
        initial_sectors: 0,
    };
}

impl MediaType for AtrMedia {
    fn pretty_name(&self) -> &'static str {
        self.pretty_name
    }

    fn file_format(&self) -> &'static str {
        "ATR"
    }

    fn expected_size(&self) -> SizeRule {
        self.rule
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
        let atr = AtrHeader::from_bytes(&unpacked.data)?;
        if atr.sector_size as usize != self.sector_size {
            return Err(AtrError::invalid_header(format!(
                "ATR sector size {} is not {}",
                atr.sector_size, self.sector_size
            )));
        }
        let payload = unpacked.data.len() - ATR_HEADER_SIZE;
        if atr.image_size() != payload {
            return Err(AtrError::invalid_header(format!(
                "ATR header claims {} bytes, found {}",
                atr.image_size(),
                payload
            )));
        }

        let mut header = Header::new("ATR", ATR_HEADER_SIZE, payload, self.sector_size, 1);
        if self.initial_sectors > 0 {
            header = header.with_initial_sectors(self.initial_sectors, 128);
        }
        header.flags = atr.flags;
        header.crc = atr.crc;
        header.unused = atr.unused;
        Ok(header)
    }

    fn verify_data(&self, unpacked: &Unpacked, header: Header, _options: &IdentifyOptions) -> Result<Header> {
        let rule = self.rule;
        if !rule.accepts(header.image_size) {
            return Err(AtrError::invalid_size(format!(
                "{} bytes, expected {}",
                header.image_size, rule
            )));
        }
        let initial = header.num_initial_sectors * header.initial_sector_size;
        if (header.image_size - initial) % self.sector_size != 0 {
            return Err(AtrError::invalid_size(format!(
                "{} bytes is not a whole number of {} byte sectors",
                header.image_size, self.sector_size
            )));
        }
        if matches!(rule, SizeRule::LessThan(_)) && unpacked.data[header.header_offset..].starts_with(&[0xFF, 0xFF]) {
            return Err(AtrError::invalid_header("Appears to be an executable"));
        }
        Ok(header)
    }
}

/// Headerless Atari disk image
///
/// Strict identification accepts only the standard disk sizes; lenient
/// identification accepts any whole number of 128 byte sectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct XfdMedia;

impl MediaType for XfdMedia {
    fn pretty_name(&self) -> &'static str {
        "Atari XFD Floppy Disk Image"
    }

    fn file_format(&self) -> &'static str {
        "XFD"
    }

    fn expected_size(&self) -> SizeRule {
        SizeRule::OneOf(XFD_SIZES)
    }

    fn sector_size(&self) -> usize {
        128
    }

    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
        let data = &unpacked.data;
        if data.len() >= 2 && u16::from_le_bytes([data[0], data[1]]) == ATR_MAGIC {
            return Err(AtrError::invalid_header("ATR header on a headerless image"));
        }
        let size = data.len();
        let header = match size {
            DD_IMAGE_SIZE => Header::new("XFD", 0, size, 256, 1),
            DD_SHORT_BOOT_IMAGE_SIZE => {
                Header::new("XFD", 0, size, 256, 1).with_initial_sectors(3, 128)
            }
            _ => Header::new("XFD", 0, size, 128, 1),
        };
        Ok(header)
    }

    fn verify_data(&self, _unpacked: &Unpacked, header: Header, options: &IdentifyOptions) -> Result<Header> {
        let size = header.image_size;
        if options.strict {
            if !XFD_SIZES.contains(&size) {
                return Err(AtrError::invalid_size(format!(
                    "{} bytes is not a standard disk size",
                    size
                )));
            }
        } else if size == 0 || size % 128 != 0 {
            return Err(AtrError::invalid_size(format!(
                "{} bytes is not a whole number of 128 byte sectors",
                size
            )));
        }
        Ok(header)
    }
}
