/// Directory entries and the slot table that holds them

use super::vtoc::Vtoc;
use crate::error::{AtrError, Result};
use crate::image::WriteableSector;
use std::collections::BTreeMap;
use std::fmt;

/// One directory entry
///
/// The meaning of `flag` and `starting_sector` depends on the filesystem: for
/// Atari DOS they are the flag byte and first data sector, for Apple DOS 3.3
/// the file type byte and first track/sector list sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    /// Slot index in the directory
    pub file_num: usize,
    /// Display name, e.g. `AUTORUN.SYS`
    pub filename: String,
    /// Type letter where the filesystem has one, otherwise empty
    pub filetype: String,
    /// Raw flag or type byte
    pub flag: u8,
    /// First sector of the file
    pub starting_sector: usize,
    /// Sector count stored in the directory
    pub num_sectors: usize,
    /// Slot holds a file
    pub in_use: bool,
    /// Slot held a file that was deleted
    pub deleted: bool,
    /// File is write protected
    pub locked: bool,
    /// Entry passed the filesystem's sanity checks when parsed
    pub is_sane: bool,
    /// Payload bytes recorded when the chain was assigned
    pub file_length: usize,
}

impl Dirent {
    /// New in-use entry with no sectors
    pub fn new(filename: impl Into<String>, filetype: impl Into<String>, flag: u8) -> Self {
        Self {
            file_num: 0,
            filename: filename.into(),
            filetype: filetype.into(),
            flag,
            starting_sector: 0,
            num_sectors: 0,
            in_use: true,
            deleted: false,
            locked: false,
            is_sane: true,
            file_length: 0,
        }
    }

    /// Entry is shown in listings
    pub fn is_listed(&self) -> bool {
        self.in_use && !self.deleted
    }

    /// Case-insensitive name comparison
    pub fn matches(&self, name: &str) -> bool {
        self.filename.eq_ignore_ascii_case(name.trim())
    }
}

impl fmt::Display for Dirent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "File #{:<2} ({}{}{}) {:03} {:<12} start={}",
            self.file_num,
            if self.in_use { "i" } else { "." },
            if self.deleted { "d" } else { "." },
            if self.locked { "*" } else { "." },
            self.num_sectors,
            self.filename,
            self.starting_sector
        )
    }
}

/// Fixed number of directory slots, some of which hold entries
///
/// Slots are keyed by index so that empty slots between used ones survive a
/// rewrite and existing file numbers stay put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: BTreeMap<usize, Dirent>,
    capacity: usize,
}

impl Directory {
    /// Empty directory with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Place a parsed entry in the slot named by its `file_num`
    pub fn set(&mut self, dirent: Dirent) {
        self.entries.insert(dirent.file_num, dirent);
    }

    /// Entry in a slot
    pub fn get(&self, file_num: usize) -> Option<&Dirent> {
        self.entries.get(&file_num)
    }

    /// Mutable entry in a slot
    pub fn get_mut(&mut self, file_num: usize) -> Option<&mut Dirent> {
        self.entries.get_mut(&file_num)
    }

    /// All parsed entries, including deleted ones, by slot
    pub fn entries(&self) -> impl Iterator<Item = &Dirent> {
        self.entries.values()
    }

    /// Entries that are listed
    pub fn iter_in_use(&self) -> impl Iterator<Item = &Dirent> {
        self.entries.values().filter(|d| d.is_listed())
    }

    /// Listed entry with a matching name
    pub fn find(&self, name: &str) -> Result<&Dirent> {
        self.iter_in_use()
            .find(|d| d.matches(name))
            .ok_or_else(|| AtrError::FileNotFound(name.to_string()))
    }

    /// Put `dirent` in the first slot that does not hold a file
    pub fn add_entry(&mut self, mut dirent: Dirent) -> Result<usize> {
        let slot = (0..self.capacity)
            .find(|i| self.entries.get(i).map_or(true, |d| !d.in_use))
            .ok_or(AtrError::NoSpaceInDirectory)?;
        dirent.file_num = slot;
        log::debug!("adding {} in slot {}", dirent.filename, slot);
        self.entries.insert(slot, dirent);
        Ok(slot)
    }

    /// Free a file's sectors and mark its slot deleted
    pub fn remove_entry(&mut self, file_num: usize, vtoc: &mut Vtoc, sectors: &[usize]) -> Result<()> {
        let dirent = self
            .entries
            .get_mut(&file_num)
            .filter(|d| d.in_use)
            .ok_or_else(|| AtrError::FileNotFound(format!("file #{}", file_num)))?;
        vtoc.free(sectors);
        dirent.in_use = false;
        dirent.deleted = true;
        log::debug!("removed {} ({} sectors freed)", dirent.filename, sectors.len());
        Ok(())
    }

    /// Reserve sectors for a staged chain and link it to a slot
    ///
    /// Each sector gets a number from the VTOC in ascending order and points
    /// at the next one; the last points at 0. The entry's starting sector,
    /// sector count and file length are updated to match.
    pub fn assign_sector_chain(
        &mut self,
        file_num: usize,
        vtoc: &mut Vtoc,
        sectors: &mut [WriteableSector],
    ) -> Result<()> {
        let dirent = self
            .entries
            .get_mut(&file_num)
            .ok_or_else(|| AtrError::FileNotFound(format!("file #{}", file_num)))?;
        let numbers = vtoc.reserve(sectors.len())?;
        for (i, sector) in sectors.iter_mut().enumerate() {
            sector.sector_num = Some(numbers[i]);
            sector.next_sector_num = numbers.get(i + 1).copied().unwrap_or(0);
            sector.file_num = file_num;
        }
        dirent.starting_sector = numbers.first().copied().unwrap_or(0);
        dirent.num_sectors = numbers.len();
        dirent.file_length = sectors.iter().map(|s| s.used).sum();
        Ok(())
    }

    /// Pack every slot into consecutive records of `record_size` bytes
    ///
    /// Slots without an entry are written as `empty`.
    pub fn encode<F>(&self, record_size: usize, empty: &[u8], mut encode: F) -> Vec<u8>
    where
        F: FnMut(&Dirent) -> Vec<u8>,
    {
        let mut out = Vec::with_capacity(self.capacity * record_size);
        for slot in 0..self.capacity {
            let mut record = match self.entries.get(&slot) {
                Some(dirent) => encode(dirent),
                None => empty.to_vec(),
            };
            record.resize(record_size, 0);
            out.extend_from_slice(&record);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_vtoc() -> Vtoc {
        let mut vtoc = Vtoc::new();
        for s in 4..20 {
            vtoc.set_free(s, true);
        }
        vtoc
    }

    #[test]
    fn test_add_entry_reuses_first_free_slot() {
        let mut dir = Directory::new(4);
        assert_eq!(dir.add_entry(Dirent::new("A", "", 0x42)).unwrap(), 0);
        assert_eq!(dir.add_entry(Dirent::new("B", "", 0x42)).unwrap(), 1);
        assert_eq!(dir.add_entry(Dirent::new("C", "", 0x42)).unwrap(), 2);

        let mut vtoc = free_vtoc();
        dir.remove_entry(1, &mut vtoc, &[]).unwrap();
        assert_eq!(dir.add_entry(Dirent::new("D", "", 0x42)).unwrap(), 1);
        assert_eq!(dir.get(2).unwrap().filename, "C");
    }

    #[test]
    fn test_add_entry_full() {
        let mut dir = Directory::new(1);
        dir.add_entry(Dirent::new("A", "", 0x42)).unwrap();
        assert!(matches!(
            dir.add_entry(Dirent::new("B", "", 0x42)),
            Err(AtrError::NoSpaceInDirectory)
        ));
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let mut dir = Directory::new(8);
        dir.add_entry(Dirent::new("GAME.XEX", "", 0x42)).unwrap();
        assert_eq!(dir.find("game.xex").unwrap().file_num, 0);
        assert!(matches!(dir.find("OTHER"), Err(AtrError::FileNotFound(_))));
    }

    #[test]
    fn test_assign_sector_chain() {
        let mut dir = Directory::new(8);
        let slot = dir.add_entry(Dirent::new("A", "", 0x42)).unwrap();
        let mut vtoc = free_vtoc();
        let mut sectors = crate::image::sector::split_into_sectors(&[7; 300], 128, 125);
        dir.assign_sector_chain(slot, &mut vtoc, &mut sectors).unwrap();

        let numbers: Vec<_> = sectors.iter().map(|s| s.sector_num.unwrap()).collect();
        assert_eq!(numbers, vec![4, 5, 6]);
        assert_eq!(sectors[0].next_sector_num, 5);
        assert_eq!(sectors[2].next_sector_num, 0);

        let dirent = dir.get(slot).unwrap();
        assert_eq!(dirent.starting_sector, 4);
        assert_eq!(dirent.num_sectors, 3);
        assert_eq!(dirent.file_length, 300);
        assert_eq!(vtoc.num_free(), 13);
    }

    #[test]
    fn test_remove_frees_sectors() {
        let mut dir = Directory::new(8);
        let slot = dir.add_entry(Dirent::new("A", "", 0x42)).unwrap();
        let mut vtoc = free_vtoc();
        let before = vtoc.clone();
        let mut sectors = crate::image::sector::split_into_sectors(&[7; 300], 128, 125);
        dir.assign_sector_chain(slot, &mut vtoc, &mut sectors).unwrap();
        dir.remove_entry(slot, &mut vtoc, &[4, 5, 6]).unwrap();
        assert_eq!(vtoc, before);
        assert!(dir.get(slot).unwrap().deleted);
        assert!(dir.find("A").is_err());
    }

    #[test]
    fn test_encode_fills_gaps() {
        let mut dir = Directory::new(3);
        let mut dirent = Dirent::new("B", "", 0x42);
        dirent.file_num = 1;
        dir.set(dirent);
        let bytes = dir.encode(2, &[0xEE, 0xEE], |d| vec![d.flag, 1]);
        assert_eq!(bytes, vec![0xEE, 0xEE, 0x42, 1, 0xEE, 0xEE]);
    }
}
