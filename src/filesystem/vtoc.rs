/// Free sector bookkeeping shared by every filesystem

use crate::error::{AtrError, Result};
use std::fmt;

/// Number of entries in every sector map
pub const SECTOR_MAP_SIZE: usize = 1280;

/// Volume table of contents
///
/// `sector_map[n]` is 1 when sector label `n` is free and 0 when it is
/// allocated or does not exist. The map always has [`SECTOR_MAP_SIZE`]
/// entries; labels past the end of the media stay 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vtoc {
    sector_map: Vec<u8>,
}

impl Default for Vtoc {
    fn default() -> Self {
        Self::new()
    }
}

impl Vtoc {
    /// Map with every sector allocated
    pub fn new() -> Self {
        Self {
            sector_map: vec![0; SECTOR_MAP_SIZE],
        }
    }

    /// Raw map
    pub fn sector_map(&self) -> &[u8] {
        &self.sector_map
    }

    /// Check if a sector is free
    pub fn is_free(&self, sector: usize) -> bool {
        self.sector_map.get(sector).copied() == Some(1)
    }

    /// Mark one sector free or allocated; labels outside the map are ignored
    pub fn set_free(&mut self, sector: usize, free: bool) {
        if let Some(entry) = self.sector_map.get_mut(sector) {
            *entry = free as u8;
        }
    }

    /// Allocate `count` free sectors, lowest labels first
    ///
    /// Nothing is allocated when the request cannot be met in full.
    pub fn reserve(&mut self, count: usize) -> Result<Vec<usize>> {
        let free: Vec<usize> = self.iter_free().take(count).collect();
        if free.len() < count {
            return Err(AtrError::NotEnoughSpaceOnDisk {
                needed: count,
                available: free.len(),
            });
        }
        for &sector in &free {
            self.sector_map[sector] = 0;
        }
        log::trace!("reserved sectors {:?}", free);
        Ok(free)
    }

    /// Return sectors to the free pool
    pub fn free(&mut self, sectors: &[usize]) {
        for &sector in sectors {
            self.set_free(sector, true);
        }
    }

    /// Number of free sectors
    pub fn num_free(&self) -> usize {
        self.sector_map.iter().filter(|&&b| b == 1).count()
    }

    /// Number of free sectors with labels in `range`
    pub fn num_free_in(&self, range: std::ops::Range<usize>) -> usize {
        range.filter(|&s| self.is_free(s)).count()
    }

    /// Free sector labels in ascending order
    pub fn iter_free(&self) -> impl Iterator<Item = usize> + '_ {
        self.sector_map
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == 1)
            .map(|(i, _)| i)
    }
}

impl fmt::Display for Vtoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VTOC: {} free sectors", self.num_free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vtoc_with_free(range: std::ops::Range<usize>) -> Vtoc {
        let mut vtoc = Vtoc::new();
        for s in range {
            vtoc.set_free(s, true);
        }
        vtoc
    }

    #[test]
    fn test_reserve_ascending() {
        let mut vtoc = vtoc_with_free(4..10);
        vtoc.set_free(6, false);
        assert_eq!(vtoc.reserve(3).unwrap(), vec![4, 5, 7]);
        assert_eq!(vtoc.num_free(), 2);
        assert_eq!(vtoc.sector_map().len(), SECTOR_MAP_SIZE);
    }

    #[test]
    fn test_reserve_exhausted_is_atomic() {
        let mut vtoc = vtoc_with_free(4..8);
        match vtoc.reserve(5) {
            Err(AtrError::NotEnoughSpaceOnDisk { needed, available }) => {
                assert_eq!(needed, 5);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(vtoc.num_free(), 4);
    }

    #[test]
    fn test_free() {
        let mut vtoc = vtoc_with_free(4..8);
        let sectors = vtoc.reserve(2).unwrap();
        vtoc.free(&sectors);
        assert_eq!(vtoc.num_free(), 4);
        vtoc.free(&[5000]);
        assert_eq!(vtoc.num_free(), 4);
    }

    #[test]
    fn test_num_free_in() {
        let vtoc = vtoc_with_free(700..800);
        assert_eq!(vtoc.num_free_in(0..720), 20);
        assert_eq!(vtoc.num_free_in(720..1024), 80);
    }
}
