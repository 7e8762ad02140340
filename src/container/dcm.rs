/// DCM (Disk Communicator) archive detection

use super::{ContainerProbe, Recognised, Unpacked};
use crate::error::{AtrError, Result};

/// Archive type byte of a multi-file archive
pub const DCM_MULTI_FILE: u8 = 0xF9;
/// Archive type byte of a single-file archive
pub const DCM_SINGLE_FILE: u8 = 0xFA;

const MIME_DCM: &str = "application/vnd.atari8bit.dcm";

/// Sector count and sector size for a DCM density flag
pub fn density_geometry(flag: u8) -> Option<(usize, usize)> {
    match flag {
        0 => Some((720, 128)),
        1 => Some((720, 256)),
        2 => Some((1040, 128)),
        _ => None,
    }
}

/// Decoded first two bytes of a DCM archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcmHeader {
    /// 0xF9 or 0xFA
    pub archive_type: u8,
    /// Pass number, low 5 bits of the flags byte
    pub pass_num: u8,
    /// Density flag, bits 5..6 of the flags byte
    pub density: u8,
    /// Last pass flag, bit 7
    pub last_pass: bool,
}

impl DcmHeader {
    /// Decode the two header bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [archive_type @ (DCM_MULTI_FILE | DCM_SINGLE_FILE), flags, ..] => Some(Self {
                archive_type: *archive_type,
                pass_num: flags & 0x1f,
                density: (flags >> 5) & 3,
                last_pass: flags & 0x80 != 0,
            }),
            _ => None,
        }
    }
}

/// Probe for DCM archives
///
/// The header is validated so malformed archives are reported precisely, but
/// the sector data itself is not decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcmProbe;

impl ContainerProbe for DcmProbe {
    fn name(&self) -> &'static str {
        "DCM"
    }

    fn can_load_mime(&self, mime: &str) -> bool {
        mime == MIME_DCM
    }

    fn identify(&self, bytes: &[u8]) -> Option<Recognised> {
        DcmHeader::from_bytes(bytes).map(|_| Recognised { mime: MIME_DCM })
    }

    fn unpack(&self, bytes: &[u8]) -> Result<Unpacked> {
        let header = DcmHeader::from_bytes(bytes)
            .ok_or_else(|| AtrError::invalid_container("Not a DCM file"))?;
        log::debug!(
            "DCM archive type {:02x}, pass {}, density {}, last {}",
            header.archive_type,
            header.pass_num,
            header.density,
            header.last_pass
        );
        if header.pass_num != 1 {
            return Err(AtrError::invalid_container(
                if header.archive_type == DCM_MULTI_FILE {
                    "DCM multi-file archive combined in the wrong order"
                } else {
                    "Expected pass one of DCM archive first"
                },
            ));
        }
        if density_geometry(header.density).is_none() {
            return Err(AtrError::invalid_container(format!(
                "Unsupported density flag {} in DCM",
                header.density
            )));
        }
        Err(AtrError::unsupported_container(
            "DCM archives are not yet supported",
        ))
    }
}
