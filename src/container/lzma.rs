/// LZMA and XZ compressed images

use super::{Compression, ContainerProbe, Recognised, Unpacked};
use crate::error::{AtrError, Result};

/// XZ stream magic
pub const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

/// Length of a legacy `.lzma` header
pub const LZMA_HEADER_SIZE: usize = 13;

/// Largest plausible image stored in a legacy `.lzma` stream
const MAX_UNPACKED_SIZE: u64 = 16 * 1024 * 1024;

const MIME_LZMA: &str = "application/x-lzma";
const MIME_XZ: &str = "application/x-xz";

/// Probe for `.lzma` and `.xz` streams
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaProbe;

/// Check for a plausible legacy `.lzma` header
///
/// The header has no magic, so accept only the common properties byte, a
/// power-of-two dictionary of at least 4K and an unknown or small size.
fn is_legacy_lzma(bytes: &[u8]) -> bool {
    if bytes.len() < LZMA_HEADER_SIZE || bytes[0] != 0x5D {
        return false;
    }
    let dict_size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    if dict_size < 4096 || !dict_size.is_power_of_two() {
        return false;
    }
    let mut size = [0u8; 8];
    size.copy_from_slice(&bytes[5..13]);
    let unpacked_size = u64::from_le_bytes(size);
    unpacked_size == u64::MAX || unpacked_size <= MAX_UNPACKED_SIZE
}

impl ContainerProbe for LzmaProbe {
    fn name(&self) -> &'static str {
        "LZMA"
    }

    fn can_load_mime(&self, mime: &str) -> bool {
        mime == MIME_LZMA || mime == MIME_XZ
    }

    fn identify(&self, bytes: &[u8]) -> Option<Recognised> {
        if bytes.starts_with(&XZ_MAGIC) {
            Some(Recognised { mime: MIME_XZ })
        } else if is_legacy_lzma(bytes) {
            Some(Recognised { mime: MIME_LZMA })
        } else {
            None
        }
    }

    fn unpack(&self, bytes: &[u8]) -> Result<Unpacked> {
        let mut data = Vec::new();
        let (compression, mime) = if bytes.starts_with(&XZ_MAGIC) {
            lzma_rs::xz_decompress(&mut &bytes[..], &mut data)
                .map_err(|e| AtrError::invalid_container(format!("XZ: {}", e)))?;
            (Compression::Xz, MIME_XZ)
        } else {
            lzma_rs::lzma_decompress(&mut &bytes[..], &mut data)
                .map_err(|e| AtrError::invalid_container(format!("LZMA: {}", e)))?;
            (Compression::Lzma, MIME_LZMA)
        };
        log::debug!("decompressed {} bytes to {}", bytes.len(), data.len());
        Ok(Unpacked {
            data,
            compression,
            mime: mime.to_string(),
            rom_entries: Vec::new(),
        })
    }
}

/// Compress `data` as a legacy `.lzma` or `.xz` stream
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let mut packed = Vec::new();
    match compression {
        Compression::Xz => lzma_rs::xz_compress(&mut &data[..], &mut packed)?,
        _ => lzma_rs::lzma_compress(&mut &data[..], &mut packed)?,
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lzma_roundtrip() {
        let original: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = compress(Compression::Lzma, &original).unwrap();
        assert!(LzmaProbe.identify(&packed).is_some());
        let unpacked = LzmaProbe.unpack(&packed).unwrap();
        assert_eq!(unpacked.compression, Compression::Lzma);
        assert_eq!(unpacked.data, original);
    }

    #[test]
    fn test_xz_magic() {
        let packed = compress(Compression::Xz, b"hello atari").unwrap();
        assert_eq!(
            LzmaProbe.identify(&packed),
            Some(Recognised { mime: MIME_XZ })
        );
        assert_eq!(LzmaProbe.unpack(&packed).unwrap().data, b"hello atari");
    }

    #[test]
    fn test_not_lzma() {
        // ATR header
        let mut atr = vec![0x96, 0x02, 0x80, 0x16, 0x80, 0x00];
        atr.resize(64, 0);
        assert!(LzmaProbe.identify(&atr).is_none());

        // Dictionary size not a power of two
        let mut bogus = vec![0x5D, 0x01, 0x30, 0x00, 0x00];
        bogus.extend_from_slice(&[0xFF; 8]);
        assert!(LzmaProbe.identify(&bogus).is_none());
    }

    #[test]
    fn test_corrupt_stream() {
        let original: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 253) as u8).collect();
        let mut truncated = compress(Compression::Lzma, &original).unwrap();
        truncated.truncate(truncated.len() / 2);
        assert!(LzmaProbe.identify(&truncated).is_some());
        assert!(matches!(
            LzmaProbe.unpack(&truncated),
            Err(AtrError::InvalidContainer(_))
        ));
    }
}
