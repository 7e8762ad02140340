/// Atari DOS executables and Apple DOS 3.3 BSAVE files
///
/// An Atari executable (XEX) is a `$FFFF` marker followed by chunks of
/// `start, end` addresses (inclusive, little-endian) and the bytes to load.
/// Markers may repeat before any chunk. Loading bytes at `$02E0` sets the run
/// address and at `$02E2` an init address.
///
/// A BSAVE file is a single chunk: load address and byte count, then data.

use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::segment::Segment;
use crate::style::StyleBits;
use std::ops::Range;

/// Chunk separator and file signature
pub const XEX_MARKER: u16 = 0xFFFF;
/// Run address vector
pub const RUN_ADDRESS: u16 = 0x02E0;
/// Init address vector
pub const INIT_ADDRESS: u16 = 0x02E2;

/// What a chunk loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Ordinary data
    Data,
    /// Data at the run address vector
    RunAddress,
    /// Data at the init address vector
    InitAddress,
    /// Header promised more bytes than the file holds
    Incomplete,
    /// File ends inside a chunk header
    ShortHeader,
}

/// One load chunk, with offsets relative to the start of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk type
    pub kind: ChunkKind,
    /// Load address
    pub start: u16,
    /// Last address from the header (inclusive)
    pub end: u16,
    /// Marker and address bytes
    pub header: Range<usize>,
    /// Bytes to load
    pub data: Range<usize>,
}

impl Chunk {
    /// Segment name for this chunk
    pub fn name(&self) -> String {
        match self.kind {
            ChunkKind::Data => format!("${:04X}-${:04X}", self.start, self.end),
            ChunkKind::RunAddress => "Run Address".to_string(),
            ChunkKind::InitAddress => "Init Address".to_string(),
            ChunkKind::Incomplete => "Incomplete Data".to_string(),
            ChunkKind::ShortHeader => "Short Segment Header".to_string(),
        }
    }

    /// Check if the chunk was cut short
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, ChunkKind::Incomplete | ChunkKind::ShortHeader)
    }
}

fn le16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([bytes[pos], bytes[pos + 1]])
}

/// Split an Atari executable into chunks
///
/// Truncation at the end of the file is reported as a final
/// [`ChunkKind::Incomplete`] or [`ChunkKind::ShortHeader`] chunk rather than
/// an error.
pub fn parse_xex(bytes: &[u8]) -> Result<Vec<Chunk>> {
    let size = bytes.len();
    let mut chunks = Vec::new();
    let mut pos = 0;
    let mut header_start = 0;
    let mut first = true;

    while pos < size {
        if pos + 1 >= size {
            chunks.push(Chunk {
                kind: ChunkKind::Incomplete,
                start: 0,
                end: 0,
                header: header_start..pos,
                data: pos..size,
            });
            break;
        }
        if le16(bytes, pos) == XEX_MARKER {
            pos += 2;
            first = false;
            continue;
        }
        if first {
            return Err(AtrError::InvalidBinaryFile(
                "Object file doesn't start with 0xffff".to_string(),
            ));
        }
        if size - pos < 4 {
            chunks.push(Chunk {
                kind: ChunkKind::ShortHeader,
                start: 0,
                end: 0,
                header: header_start..size,
                data: size..size,
            });
            break;
        }
        let start = le16(bytes, pos);
        let end = le16(bytes, pos + 2);
        if end < start {
            return Err(AtrError::InvalidBinaryFile(
                "Nonsensical start and end addresses".to_string(),
            ));
        }
        let count = (end - start) as usize + 1;
        let data_start = pos + 4;
        if size - data_start < count {
            chunks.push(Chunk {
                kind: ChunkKind::Incomplete,
                start,
                end,
                header: header_start..data_start,
                data: data_start..size,
            });
            break;
        }
        let kind = match start {
            RUN_ADDRESS => ChunkKind::RunAddress,
            INIT_ADDRESS => ChunkKind::InitAddress,
            _ => ChunkKind::Data,
        };
        chunks.push(Chunk {
            kind,
            start,
            end,
            header: header_start..data_start,
            data: data_start..data_start + count,
        });
        pos = data_start + count;
        header_start = pos;
    }
    Ok(chunks)
}

/// Run address set by an executable, if any
pub fn run_address(bytes: &[u8], chunks: &[Chunk]) -> Option<u16> {
    chunks
        .iter()
        .rev()
        .find(|c| c.kind == ChunkKind::RunAddress && c.data.len() >= 2)
        .map(|c| le16(bytes, c.data.start))
}

/// Assemble an Atari executable from `(address, bytes)` chunks
pub fn build_xex(chunks: &[(u16, &[u8])], run: Option<u16>) -> Result<Vec<u8>> {
    let mut out = XEX_MARKER.to_le_bytes().to_vec();
    for &(start, data) in chunks {
        if data.is_empty() {
            return Err(AtrError::InvalidBinaryFile(format!(
                "Empty segment at ${:04X}",
                start
            )));
        }
        let end = start as usize + data.len() - 1;
        if end > 0xFFFF {
            return Err(AtrError::InvalidBinaryFile(format!(
                "Segment at ${:04X} runs past $FFFF",
                start
            )));
        }
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&(end as u16).to_le_bytes());
        out.extend_from_slice(data);
    }
    if let Some(addr) = run {
        out.extend_from_slice(&RUN_ADDRESS.to_le_bytes());
        out.extend_from_slice(&(RUN_ADDRESS + 1).to_le_bytes());
        out.extend_from_slice(&addr.to_le_bytes());
    }
    Ok(out)
}

/// Parse a BSAVE header
///
/// Whole sector files carry padding after the data; bytes past the count in
/// the header are ignored.
pub fn parse_bsave(bytes: &[u8]) -> Result<Chunk> {
    if bytes.len() < 4 {
        return Err(AtrError::InvalidBinaryFile("Invalid BSAVE header".to_string()));
    }
    let start = le16(bytes, 0);
    let count = le16(bytes, 2) as usize;
    let loaded = bytes.len() - 4;
    if count > loaded {
        return Err(AtrError::InvalidBinaryFile(format!(
            "Incomplete BSAVE data: expected {}, loaded {}",
            count, loaded
        )));
    }
    Ok(Chunk {
        kind: ChunkKind::Data,
        start,
        end: start.wrapping_add(count.saturating_sub(1) as u16),
        header: 0..4,
        data: 4..4 + count,
    })
}

/// Prefix data with a BSAVE header
pub fn build_bsave(address: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Segments for each chunk of a file segment
///
/// Chunk header bytes are styled as data in the buffer. Truncated chunks carry
/// an error string.
pub fn chunk_segments(buffer: &mut ByteBuffer, file: &Segment, chunks: &[Chunk]) -> Result<Vec<Segment>> {
    let mut segments = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        file.set_style_ranges(buffer, &[chunk.header.clone()], StyleBits::data())?;
        let order: Vec<usize> = chunk.data.clone().collect();
        let mut segment = file
            .subset(&order)?
            .with_name(chunk.name())
            .with_origin(chunk.start)
            .with_verbose_name(format!(
                "{} address range ${:04X}-${:04X}, file offset ${:04X}",
                chunk.name(),
                chunk.start,
                chunk.start as usize + chunk.data.len(),
                chunk.data.start
            ));
        if chunk.is_truncated() {
            segment = segment.with_error("Incomplete data");
        }
        segments.push(segment);
    }
    Ok(segments)
}

/// Chunk segments of a file segment that holds an Atari executable
///
/// Files that do not parse as executables produce no segments.
pub fn executable_segments(buffer: &mut ByteBuffer, file: &Segment) -> Vec<Segment> {
    let bytes = file.to_bytes(buffer);
    parse_xex(&bytes)
        .and_then(|chunks| chunk_segments(buffer, file, &chunks))
        .unwrap_or_else(|err| {
            log::debug!("{} not an executable: {}", file.name, err);
            Vec::new()
        })
}
