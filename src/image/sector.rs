/// Sector buffers and sector level access to the byte buffer

use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::media::Header;
use std::fmt;
use std::ops::Range;

/// A sector staged for writing
///
/// `data` always holds a full, zero filled sector. Payload bytes are appended
/// with [`add_data`](WriteableSector::add_data) up to `capacity`; any bytes
/// past `capacity` belong to the filesystem (link pointers, counts) and are
/// filled in when the chain is linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteableSector {
    /// Sector size in bytes
    pub sector_size: usize,
    /// Full sector contents
    pub data: Vec<u8>,
    /// Number of payload bytes in use
    pub used: usize,
    ptr: usize,
    capacity: usize,
    /// Sector label, unset until the VTOC assigns one
    pub sector_num: Option<usize>,
    /// Label of the next sector in the chain, 0 for the last
    pub next_sector_num: usize,
    /// Directory slot of the owning file
    pub file_num: usize,
}

impl WriteableSector {
    /// Empty sector with `capacity` bytes available for payload
    pub fn new(sector_size: usize, capacity: usize) -> Self {
        Self {
            sector_size,
            data: vec![0; sector_size],
            used: 0,
            ptr: 0,
            capacity: capacity.min(sector_size),
            sector_num: None,
            next_sector_num: 0,
            file_num: 0,
        }
    }

    /// Full sector built from existing bytes, already assigned to `sector_num`
    pub fn with_data(sector_size: usize, bytes: &[u8], sector_num: usize) -> Self {
        let mut sector = Self::new(sector_size, sector_size);
        let n = bytes.len().min(sector_size);
        sector.data[..n].copy_from_slice(&bytes[..n]);
        sector.used = sector_size;
        sector.ptr = sector_size;
        sector.sector_num = Some(sector_num);
        sector
    }

    /// Payload capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes still available for payload
    pub fn space_remaining(&self) -> usize {
        self.capacity - self.ptr
    }

    /// Append as much of `bytes` as fits, returning what did not
    pub fn add_data<'a>(&mut self, bytes: &'a [u8]) -> &'a [u8] {
        let count = bytes.len().min(self.space_remaining());
        self.data[self.ptr..self.ptr + count].copy_from_slice(&bytes[..count]);
        self.ptr += count;
        self.used = self.ptr;
        &bytes[count..]
    }

    /// Check if no payload has been added
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Payload bytes written so far
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.used]
    }
}

impl fmt::Display for WriteableSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sector_num {
            Some(n) => write!(f, "sector {}", n)?,
            None => write!(f, "unassigned sector")?,
        }
        write!(f, " ({} of {} bytes, next={})", self.used, self.capacity, self.next_sector_num)
    }
}

/// Split `data` into sectors of `capacity` payload bytes each
///
/// Empty input produces no sectors.
pub fn split_into_sectors(data: &[u8], sector_size: usize, capacity: usize) -> Vec<WriteableSector> {
    let mut sectors = Vec::new();
    let mut remaining = data;
    while !remaining.is_empty() {
        let mut sector = WriteableSector::new(sector_size, capacity);
        remaining = sector.add_data(remaining);
        sectors.push(sector);
    }
    sectors
}

/// Absolute byte range of a sector
pub fn sector_range(header: &Header, sector: usize) -> Result<Range<usize>> {
    let (pos, size) = header.get_index_of_sector(sector)?;
    Ok(pos..pos + size)
}

/// Borrow the bytes of one sector
pub fn read_sector<'a>(buffer: &'a ByteBuffer, header: &Header, sector: usize) -> Result<&'a [u8]> {
    let range = sector_range(header, sector)?;
    buffer.data().get(range).ok_or(AtrError::InvalidSector(sector))
}

/// Copy a staged sector into the buffer at its assigned position
pub fn write_sector(buffer: &mut ByteBuffer, header: &Header, sector: &WriteableSector) -> Result<()> {
    let num = sector
        .sector_num
        .ok_or_else(|| AtrError::invalid_file(format!("{} was never assigned a position", sector)))?;
    let range = sector_range(header, num)?;
    let dest = buffer
        .data_mut()
        .get_mut(range)
        .ok_or(AtrError::InvalidSector(num))?;
    let n = dest.len().min(sector.data.len());
    dest[..n].copy_from_slice(&sector.data[..n]);
    log::trace!("wrote {}", sector);
    Ok(())
}

/// Write a list of staged sectors in order
pub fn write_sectors(buffer: &mut ByteBuffer, header: &Header, sectors: &[WriteableSector]) -> Result<()> {
    for sector in sectors {
        write_sector(buffer, header, sector)?;
    }
    Ok(())
}

/// Iterate over every sector of the media as `(label, absolute range)`
pub fn iter_sectors(header: &Header) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
    let first = header.starting_sector_label;
    (first..first + header.num_sectors())
        .filter_map(move |n| sector_range(header, n).ok().map(|r| (n, r)))
}
