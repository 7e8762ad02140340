/// Apple ][ Standard Delivery boot disks
///
/// These disks have no DOS. Track 0 sector 0 holds a fast boot loader, the
/// run address and a table of memory pages, one per sector to load. The
/// loader reads sectors in a fixed order starting at track 0 sector 14 and
/// stores each one at the next page in the table. `$C0` ends the table.

use super::directory::{Dirent, Directory};
use super::vtoc::Vtoc;
use super::{comment_all, read_only, Filesystem};
use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::image::sector::{read_sector, sector_range};
use crate::image::WriteableSector;
use crate::media::apple::{sector_from_track, APPLE_SECTORS_PER_TRACK, APPLE_SECTOR_SIZE, APPLE_TRACKS};
use crate::media::Header;
use crate::segment::Segment;
use crate::style::StyleBits;
use std::collections::BTreeMap;

/// Address the boot sector is loaded at
pub const BOOT_ADDRESS: u16 = 0x0800;
/// Page table terminator
pub const END_OF_TABLE: u8 = 0xC0;
/// Physical read order of sectors within a track
pub const SECTOR_ORDER: [usize; 16] = [0, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 15];

/// Fast boot loader variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    /// Plain 48k loader
    Plain,
    /// Loader that switches to the hi-res screen first
    Hgr,
    /// Loader with display switch entries in its page table
    Trigger,
}

impl Loader {
    /// Every known loader variant
    pub const ALL: [Loader; 3] = [Loader::Plain, Loader::Hgr, Loader::Trigger];

    /// First bytes of the loader code
    pub fn signature(&self) -> [u8; 5] {
        match self {
            Loader::Plain => [0x01, 0xA8, 0xEE, 0x06, 0x08],
            Loader::Hgr => [0x01, 0xA8, 0x2C, 0x50, 0xC0],
            Loader::Trigger => [0x01, 0xA8, 0x8D, 0x50, 0xC0],
        }
    }

    /// Length of the loader code; the run address follows it
    pub fn code_size(&self) -> usize {
        match self {
            Loader::Plain => 76,
            Loader::Hgr => 85,
            Loader::Trigger => 107,
        }
    }

    /// Table bytes that switch display modes instead of loading a sector
    pub fn is_switch(&self, entry: u8) -> bool {
        *self == Loader::Trigger && (0xD0..=0xD2).contains(&entry)
    }

    /// Identify the loader at the start of the boot sector
    pub fn detect(boot: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|l| boot.starts_with(&l.signature()))
    }
}

/// Description of a page table entry for comments
fn describe_entry(entry: u8, loader: Loader) -> String {
    match entry {
        END_OF_TABLE => "End of page table".to_string(),
        0xD0 if loader.is_switch(entry) => "Display switch".to_string(),
        0xD1 if loader.is_switch(entry) => "Show page 1".to_string(),
        0xD2 if loader.is_switch(entry) => "Show page 2".to_string(),
        page => format!("Load page ${:02X}00", page),
    }
}

/// One sector the loader reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedPage {
    /// High byte of the destination address
    pub page: u8,
    /// Sector label on the disk
    pub sector: usize,
}

/// A Standard Delivery boot disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardDelivery {
    /// Loader variant in the boot sector
    pub loader: Loader,
    /// Address jumped to once loading finishes
    pub run_address: u16,
    /// Sectors in load order
    pub pages: Vec<LoadedPage>,
    /// Page table length including the terminator
    pub table_size: usize,
}

impl StandardDelivery {
    /// Sector the loader reads for the `n`th loaded page
    pub fn sector_for(n: usize) -> usize {
        let index = n + 1;
        sector_from_track(
            index / APPLE_SECTORS_PER_TRACK,
            SECTOR_ORDER[index % APPLE_SECTORS_PER_TRACK],
        )
    }

    /// Decode the boot sector
    pub fn from_boot_sector(boot: &[u8], num_sectors: usize) -> Result<Self> {
        let loader = Loader::detect(boot)
            .ok_or_else(|| AtrError::invalid_disk("No Apple ][ Standard Delivery boot header"))?;
        log::debug!("Found {:?} loader", loader);
        let code = loader.code_size();
        let run_address = u16::from_le_bytes([boot[code], boot[code + 1]]);
        let table = &boot[code + 2..];
        let table_size = table
            .iter()
            .position(|&b| b == END_OF_TABLE)
            .map(|i| i + 1)
            .ok_or_else(|| AtrError::invalid_disk("Standard Delivery page table is not terminated"))?;

        let mut pages = Vec::new();
        for &entry in &table[..table_size - 1] {
            if loader.is_switch(entry) {
                continue;
            }
            let sector = Self::sector_for(pages.len());
            if sector >= num_sectors {
                return Err(AtrError::invalid_disk("Standard Delivery page table runs off the disk"));
            }
            pages.push(LoadedPage { page: entry, sector });
        }
        Ok(Self {
            loader,
            run_address,
            pages,
            table_size,
        })
    }

    /// Memory contents after loading as runs of consecutive pages
    ///
    /// A page loaded twice keeps the sector read last.
    pub fn memory_runs(&self) -> Vec<Vec<LoadedPage>> {
        let by_page: BTreeMap<u8, usize> = self.pages.iter().map(|p| (p.page, p.sector)).collect();
        let mut runs: Vec<Vec<LoadedPage>> = Vec::new();
        for (page, sector) in by_page {
            let loaded = LoadedPage { page, sector };
            match runs.last_mut() {
                Some(run) if run.last().is_some_and(|p| p.page as usize + 1 == page as usize) => run.push(loaded),
                _ => runs.push(vec![loaded]),
            }
        }
        runs
    }
}

impl Filesystem for StandardDelivery {
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        if header.sector_size != APPLE_SECTOR_SIZE
            || header.starting_sector_label != 0
            || header.num_sectors() != APPLE_TRACKS * APPLE_SECTORS_PER_TRACK
        {
            return Err(AtrError::invalid_disk("Incorrect size for Standard Delivery image"));
        }
        Self::from_boot_sector(read_sector(buffer, header, 0)?, header.num_sectors())
    }

    fn name(&self) -> &'static str {
        "Apple ][ Standard Delivery"
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn read_vtoc(&self, _buffer: &ByteBuffer, _header: &Header) -> Result<Vtoc> {
        Ok(Vtoc::new())
    }

    fn encode_vtoc(&self, _vtoc: &Vtoc, _buffer: &ByteBuffer, _header: &Header) -> Result<Vec<WriteableSector>> {
        Ok(Vec::new())
    }

    fn read_directory(&self, _buffer: &ByteBuffer, _header: &Header) -> Result<Directory> {
        Ok(Directory::new(0))
    }

    fn encode_directory(
        &self,
        _directory: &Directory,
        _buffer: &ByteBuffer,
        _header: &Header,
    ) -> Result<Vec<WriteableSector>> {
        Ok(Vec::new())
    }

    fn new_dirent(&self, _filename: &str, _filetype: &str) -> Result<Dirent> {
        Err(read_only(self.name()))
    }

    fn link_chain(
        &self,
        _buffer: &ByteBuffer,
        _header: &Header,
        _vtoc: &mut Vtoc,
        _dirent: &mut Dirent,
        _sectors: Vec<WriteableSector>,
    ) -> Result<Vec<WriteableSector>> {
        Err(read_only(self.name()))
    }

    fn file_sectors(&self, _buffer: &ByteBuffer, _header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        Err(AtrError::FileNotFound(dirent.filename.clone()))
    }

    fn file_offsets(&self, _buffer: &ByteBuffer, _header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        Err(AtrError::FileNotFound(dirent.filename.clone()))
    }

    /// Boot sector, loader code, page table, then one segment per run of
    /// consecutive pages at its load address
    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        let boot = sector_range(header, 0)?;
        let code = self.loader.code_size();
        let mut segments = vec![
            Segment::new(buffer, boot.start, boot.len(), "Boot Sector")?.with_origin(BOOT_ADDRESS),
            Segment::new(buffer, boot.start, code, "Fast Boot Loader")?.with_origin(BOOT_ADDRESS),
        ];

        let table = Segment::new(buffer, boot.start + code, 2 + self.table_size, "Page Table")?
            .with_origin(BOOT_ADDRESS + code as u16);
        table.set_style_ranges(buffer, &[0..table.len()], StyleBits::data())?;
        let mut comments = vec![(0, "Run address".to_string())];
        for (i, &entry) in buffer.data()[boot.start + code + 2..boot.start + code + 2 + self.table_size]
            .iter()
            .enumerate()
        {
            comments.push((i + 2, describe_entry(entry, self.loader)));
        }
        comment_all(buffer, &table, &comments)?;
        segments.push(table);

        for run in self.memory_runs() {
            let (Some(first), Some(last)) = (run.first(), run.last()) else {
                continue;
            };
            let mut offsets = Vec::with_capacity(run.len() * APPLE_SECTOR_SIZE);
            for page in &run {
                offsets.extend(sector_range(header, page.sector)?);
            }
            let name = format!("Load ${:02X}00-${:02X}FF", first.page, last.page);
            segments.push(Segment::from_offsets(buffer, &offsets, name)?.with_origin((first.page as u16) << 8));
        }
        Ok(segments)
    }
}
