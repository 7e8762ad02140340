/// Container detection and unwrapping
///
/// A container is an outer wrapper around the disk or cartridge bytes: a
/// compressed stream, a DCM archive or a ZIP of ROMs. Probes are tried in
/// registry order and the first one that recognises the bytes unwraps them.

/// DCM (Disk Communicator) archives
pub mod dcm;
/// LZMA and XZ streams
pub mod lzma;
/// ZIP files of MAME ROMs
pub mod mame;

pub use dcm::DcmProbe;
pub use lzma::LzmaProbe;
pub use mame::MameZipProbe;

use crate::error::{AtrError, Result};
use std::fmt;

/// Mime type reported for bytes that no probe recognised
pub const MIME_RAW: &str = "application/octet-stream";

/// Compression applied by the container that held the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Bytes were used as-is
    #[default]
    Uncompressed,
    /// Legacy `.lzma` stream
    Lzma,
    /// `.xz` stream
    Xz,
    /// Disk Communicator archive
    Dcm,
    /// ZIP of MAME ROM files
    MameZip,
}

impl Compression {
    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Compression::Uncompressed => "uncompressed",
            Compression::Lzma => "lzma",
            Compression::Xz => "xz",
            Compression::Dcm => "dcm",
            Compression::MameZip => "mame-zip",
        }
    }

    /// Wrap `data` back up the way it was found
    pub fn pack(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Uncompressed => Ok(data.to_vec()),
            Compression::Lzma | Compression::Xz => lzma::compress(*self, data),
            Compression::Dcm => Err(AtrError::unsupported_container(
                "DCM archives can't be written",
            )),
            Compression::MameZip => Err(AtrError::unsupported_container(
                "MAME ROM zipfiles can't be written",
            )),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One ROM inside a MAME ZIP, positioned within the concatenated payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomEntry {
    /// Offset of the first byte in the unwrapped data
    pub offset: usize,
    /// Length in bytes
    pub size: usize,
    /// Filename inside the archive
    pub name: String,
    /// CRC-32 stored in the archive
    pub crc: u32,
}

/// Bytes after container unwrapping
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Unpacked {
    /// Unwrapped payload
    pub data: Vec<u8>,
    /// How the payload was wrapped
    pub compression: Compression,
    /// Mime type of the container
    pub mime: String,
    /// Per-ROM side table; empty unless the container was a MAME ZIP
    pub rom_entries: Vec<RomEntry>,
}

impl Unpacked {
    /// Payload that was not wrapped in any container
    pub fn uncompressed(data: Vec<u8>) -> Self {
        Self {
            data,
            compression: Compression::Uncompressed,
            mime: MIME_RAW.to_string(),
            rom_entries: Vec::new(),
        }
    }
}

/// Result of a successful [`ContainerProbe::identify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recognised {
    /// Mime type of the recognised container
    pub mime: &'static str,
}

/// A container format detector and decoder
pub trait ContainerProbe: Send + Sync {
    /// Human readable name
    fn name(&self) -> &'static str;

    /// Check if this probe handles the given mime type
    fn can_load_mime(&self, mime: &str) -> bool;

    /// Cheap check of the leading bytes
    fn identify(&self, bytes: &[u8]) -> Option<Recognised>;

    /// Decode the container
    ///
    /// Fails with `InvalidContainer` when the body is malformed and with
    /// `UnsupportedContainer` when the format is known but not decodable.
    fn unpack(&self, bytes: &[u8]) -> Result<Unpacked>;
}

/// Ordered list of container probes
pub struct ContainerRegistry {
    probes: Vec<Box<dyn ContainerProbe>>,
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self {
            probes: vec![
                Box::new(MameZipProbe),
                Box::new(LzmaProbe),
                Box::new(DcmProbe),
            ],
        }
    }
}

impl ContainerRegistry {
    /// Create a registry with no probes
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// Append a probe
    pub fn register(&mut self, probe: Box<dyn ContainerProbe>) {
        self.probes.push(probe);
    }

    /// Names of the registered probes in order
    pub fn names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// Unwrap `bytes` with the first probe that recognises them
    ///
    /// Unrecognised bytes pass through as uncompressed. Errors from the
    /// recognising probe are returned without trying any other probe.
    pub fn unwrap(&self, bytes: Vec<u8>) -> Result<Unpacked> {
        for probe in &self.probes {
            if let Some(recognised) = probe.identify(&bytes) {
                log::debug!("{} container recognised ({})", probe.name(), recognised.mime);
                return probe.unpack(&bytes);
            }
        }
        log::debug!("no container recognised, using {} bytes as-is", bytes.len());
        Ok(Unpacked::uncompressed(bytes))
    }
}
