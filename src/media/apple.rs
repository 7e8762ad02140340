/// Apple II disk images

use super::header::Header;
use super::{MediaType, SizeRule};
use crate::container::Unpacked;
use crate::error::Result;

/// Tracks on a 5.25" Apple II disk
pub const APPLE_TRACKS: usize = 35;
/// Sectors per track with 16 sector formatting
pub const APPLE_SECTORS_PER_TRACK: usize = 16;
/// Bytes per sector
pub const APPLE_SECTOR_SIZE: usize = 256;
/// 35 x 16 x 256
pub const APPLE_IMAGE_SIZE: usize = APPLE_TRACKS * APPLE_SECTORS_PER_TRACK * APPLE_SECTOR_SIZE;

/// Headerless DOS-order Apple II image with 16 sector tracks
///
/// Sectors are labelled from 0, so sector `track * 16 + sector` is found at
/// offset `256 * (track * 16 + sector)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppleDsk;

impl MediaType for AppleDsk {
    fn pretty_name(&self) -> &'static str {
        "Apple ][ Floppy Disk Image (16 sector tracks)"
    }

    fn file_format(&self) -> &'static str {
        "DSK"
    }

    fn expected_size(&self) -> SizeRule {
        SizeRule::Exact(APPLE_IMAGE_SIZE)
    }

    fn sector_size(&self) -> usize {
        APPLE_SECTOR_SIZE
    }

    fn starting_sector_label(&self) -> usize {
        0
    }

    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
        Ok(Header::new("DSK", 0, unpacked.data.len(), APPLE_SECTOR_SIZE, 0))
    }
}

/// Linear sector label of a track and sector
#[inline]
pub fn sector_from_track(track: usize, sector: usize) -> usize {
    track * APPLE_SECTORS_PER_TRACK + sector
}
