/// MAME ROM sets stored as ZIP files

use super::{Compression, ContainerProbe, Recognised, RomEntry, Unpacked};
use crate::error::{AtrError, Result};
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// ZIP local file header magic
pub const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

const MIME_MAME: &str = "application/vnd.mame_rom";

/// Probe for ZIP files holding ROM images
///
/// Every entry must be a whole number of 16 byte lines. Entries are joined in
/// archive order and each one is remembered as a [`RomEntry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MameZipProbe;

impl ContainerProbe for MameZipProbe {
    fn name(&self) -> &'static str {
        "MAME ROM Zipfile"
    }

    fn can_load_mime(&self, mime: &str) -> bool {
        mime == MIME_MAME
    }

    fn identify(&self, bytes: &[u8]) -> Option<Recognised> {
        bytes
            .starts_with(&ZIP_MAGIC)
            .then_some(Recognised { mime: MIME_MAME })
    }

    fn unpack(&self, bytes: &[u8]) -> Result<Unpacked> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| AtrError::invalid_container(format!("ZIP: {}", e)))?;

        let mut data = Vec::new();
        let mut rom_entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| AtrError::invalid_container(format!("ZIP: {}", e)))?;
            if file.is_dir() {
                continue;
            }
            let size = file.size() as usize;
            if size % 16 != 0 {
                return Err(AtrError::invalid_container(format!(
                    "{} is {} bytes, not a multiple of 16",
                    file.name(),
                    size
                )));
            }
            let offset = data.len();
            file.read_to_end(&mut data)?;
            log::trace!("ROM {} at {:#x}, {} bytes", file.name(), offset, size);
            rom_entries.push(RomEntry {
                offset,
                size,
                name: file.name().to_string(),
                crc: file.crc32(),
            });
        }

        Ok(Unpacked {
            data,
            compression: Compression::MameZip,
            mime: MIME_MAME.to_string(),
            rom_entries,
        })
    }
}
