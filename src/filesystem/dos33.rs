/// Apple DOS 3.3

use super::directory::{Dirent, Directory};
use super::vtoc::Vtoc;
use super::{comment_all, Filesystem};
use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::executable::{chunk_segments, parse_bsave};
use crate::image::sector::{read_sector, sector_range, write_sectors};
use crate::image::WriteableSector;
use crate::media::apple::{sector_from_track, APPLE_SECTORS_PER_TRACK, APPLE_SECTOR_SIZE, APPLE_TRACKS};
use crate::media::Header;
use crate::segment::Segment;
use crate::style::StyleBits;
use std::collections::HashSet;

/// VTOC at track 17, sector 0
pub const VTOC_SECTOR: usize = 17 * APPLE_SECTORS_PER_TRACK;
/// Offset of the first catalog entry in a catalog sector
pub const CATALOG_ENTRY_START: usize = 0x0b;
/// Bytes per catalog entry
pub const CATALOG_ENTRY_SIZE: usize = 0x23;
/// Catalog entries per sector
pub const CATALOG_ENTRIES_PER_SECTOR: usize = 7;
/// Offset of the first track/sector pair in a T/S list sector
pub const TS_PAIRS_START: usize = 0x0c;
/// Track/sector pairs per T/S list sector
pub const DEFAULT_TS_PAIRS: usize = (APPLE_SECTOR_SIZE - TS_PAIRS_START) / 2;
/// Characters in a filename
pub const FILENAME_LENGTH: usize = 30;

const PRODOS_MAGIC: [u8; 4] = [0x01, 0x38, 0xB0, 0x03];
const BITMAP_OFFSET: usize = 0x38;
const DELETED_TRACK: u8 = 0xFF;
const LOCKED: u8 = 0x80;

const FILE_TYPES: [(u8, &str); 8] = [
    (0x00, "T"),
    (0x01, "I"),
    (0x02, "A"),
    (0x04, "B"),
    (0x08, "S"),
    (0x10, "R"),
    (0x20, "a"),
    (0x40, "b"),
];

/// Type letter for a catalog type byte
pub fn type_letter(flag: u8) -> &'static str {
    FILE_TYPES
        .iter()
        .find(|(t, _)| *t == flag & !LOCKED)
        .map_or("?", |&(_, letter)| letter)
}

/// Catalog type byte for a type letter; unknown letters are binary
pub fn type_from_letter(letter: &str) -> u8 {
    FILE_TYPES
        .iter()
        .find(|(_, l)| *l == letter)
        .map_or(0x04, |&(t, _)| t)
}

fn track_sector(sector: usize) -> (u8, u8) {
    (
        (sector / APPLE_SECTORS_PER_TRACK) as u8,
        (sector % APPLE_SECTORS_PER_TRACK) as u8,
    )
}

fn linked_sector(bytes: &[u8], offset: usize) -> usize {
    sector_from_track(bytes[offset] as usize, bytes[offset + 1] as usize)
}

fn reread(sector: usize) -> AtrError {
    AtrError::invalid_file(format!("Bad sector pointer data: attempting to reread sector {}", sector))
}

/// Apple DOS 3.3 on a 35 track, 16 sector disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dos33;

impl Dos33 {
    /// Write an empty DOS 3.3 layout: VTOC and a 15 sector catalog on track 17
    ///
    /// Tracks 0 and 17 are marked in use; no DOS image is written to the
    /// boot tracks.
    pub fn format(buffer: &mut ByteBuffer, header: &Header) -> Result<()> {
        check_geometry(header)?;
        let mut vtoc = vec![0u8; APPLE_SECTOR_SIZE];
        vtoc[0x01] = 17;
        vtoc[0x02] = 15;
        vtoc[0x03] = 3;
        vtoc[0x06] = 254;
        vtoc[0x27] = DEFAULT_TS_PAIRS as u8;
        vtoc[0x30] = 17;
        vtoc[0x31] = 1;
        vtoc[0x34] = APPLE_TRACKS as u8;
        vtoc[0x35] = APPLE_SECTORS_PER_TRACK as u8;
        vtoc[0x36..0x38].copy_from_slice(&(APPLE_SECTOR_SIZE as u16).to_le_bytes());

        let mut sectors = vec![WriteableSector::with_data(APPLE_SECTOR_SIZE, &vtoc, VTOC_SECTOR)];
        for s in (1..APPLE_SECTORS_PER_TRACK).rev() {
            let mut catalog = vec![0u8; APPLE_SECTOR_SIZE];
            if s > 1 {
                catalog[1] = 17;
                catalog[2] = (s - 1) as u8;
            }
            sectors.push(WriteableSector::with_data(
                APPLE_SECTOR_SIZE,
                &catalog,
                sector_from_track(17, s),
            ));
        }
        write_sectors(buffer, header, &sectors)?;

        let mut map = Vtoc::new();
        for sector in APPLE_SECTORS_PER_TRACK..header.num_sectors() {
            if sector / APPLE_SECTORS_PER_TRACK != 17 {
                map.set_free(sector, true);
            }
        }
        let encoded = Dos33.encode_vtoc(&map, buffer, header)?;
        write_sectors(buffer, header, &encoded)?;
        log::info!("formatted DOS 3.3 with {} free sectors", map.num_free());
        Ok(())
    }

    fn max_ts_pairs(buffer: &ByteBuffer, header: &Header) -> Result<usize> {
        let pairs = read_sector(buffer, header, VTOC_SECTOR)?[0x27] as usize;
        Ok(if pairs == 0 || pairs > DEFAULT_TS_PAIRS {
            DEFAULT_TS_PAIRS
        } else {
            pairs
        })
    }

    /// Catalog sectors in chain order
    fn catalog_sectors(buffer: &ByteBuffer, header: &Header) -> Result<Vec<usize>> {
        let vtoc = read_sector(buffer, header, VTOC_SECTOR)?;
        let mut sector = linked_sector(vtoc, 1);
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        while sector > 0 {
            if !seen.insert(sector) {
                return Err(reread(sector));
            }
            let data = read_sector(buffer, header, sector)?;
            chain.push(sector);
            sector = linked_sector(data, 1);
        }
        Ok(chain)
    }

    /// T/S list sectors and data sectors of a file
    fn walk_ts_lists(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<(Vec<usize>, Vec<usize>)> {
        if !dirent.is_sane {
            return Err(AtrError::InvalidDirent(format!("Invalid directory entry '{}'", dirent)));
        }
        let pairs = Self::max_ts_pairs(buffer, header)?;
        let mut lists = Vec::new();
        let mut data = Vec::new();
        let mut seen = HashSet::new();
        let mut sector = dirent.starting_sector;
        while sector > 0 {
            if !seen.insert(sector) {
                return Err(reread(sector));
            }
            let raw = read_sector(buffer, header, sector)?;
            lists.push(sector);
            for pair in raw[TS_PAIRS_START..TS_PAIRS_START + pairs * 2].chunks_exact(2) {
                // track 0 holds DOS, so a zero track ends the list
                if pair[0] == 0 {
                    break;
                }
                data.push(sector_from_track(pair[0] as usize, pair[1] as usize));
            }
            sector = linked_sector(raw, 1);
        }
        data.truncate(dirent.num_sectors.saturating_sub(lists.len()));
        log::trace!("{}: t/s lists {:?}, data {:?}", dirent.filename, lists, data);
        Ok((lists, data))
    }

    fn decode_dirent(raw: &[u8], file_num: usize, header: &Header) -> Dirent {
        let deleted = raw[0] == DELETED_TRACK;
        let track = (if deleted { raw[0x20] } else { raw[0] }) as usize;
        let flag = raw[2];
        let filename: String = raw[3..3 + FILENAME_LENGTH]
            .iter()
            .map(|&b| (b & 0x7f) as char)
            .collect::<String>()
            .trim_end()
            .to_string();
        let num_sectors = u16::from_le_bytes([raw[0x21], raw[0x22]]) as usize;
        let starting_sector = sector_from_track(track, raw[1] as usize);
        let is_sane = deleted
            || (track != 0 && header.sector_is_valid(starting_sector) && num_sectors <= header.max_sectors);
        Dirent {
            file_num,
            filename,
            filetype: type_letter(flag).to_string(),
            flag,
            starting_sector,
            num_sectors,
            in_use: !deleted,
            deleted,
            locked: flag & LOCKED != 0,
            is_sane,
            file_length: 0,
        }
    }

    fn encode_dirent(dirent: &Dirent) -> Vec<u8> {
        let mut raw = vec![0u8; CATALOG_ENTRY_SIZE];
        let (track, sector) = track_sector(dirent.starting_sector);
        raw[0] = track;
        raw[1] = sector;
        raw[2] = (dirent.flag & !LOCKED) | if dirent.locked { LOCKED } else { 0 };
        for (i, dest) in raw[3..3 + FILENAME_LENGTH].iter_mut().enumerate() {
            *dest = dirent.filename.as_bytes().get(i).copied().unwrap_or(b' ') | 0x80;
        }
        if dirent.deleted {
            raw[0] = DELETED_TRACK;
            raw[0x20] = track;
        }
        raw[0x21..0x23].copy_from_slice(&(dirent.num_sectors as u16).to_le_bytes());
        raw
    }

    /// Flag column shown in segment names: lock marker and type letter
    pub fn summary(dirent: &Dirent) -> String {
        if dirent.deleted {
            "D ".to_string()
        } else {
            format!("{}{}", if dirent.locked { "*" } else { " " }, type_letter(dirent.flag))
        }
    }
}

fn check_geometry(header: &Header) -> Result<()> {
    if header.sector_size != APPLE_SECTOR_SIZE
        || header.starting_sector_label != 0
        || header.num_sectors() != APPLE_TRACKS * APPLE_SECTORS_PER_TRACK
    {
        return Err(AtrError::invalid_disk("Incorrect size for DOS 3.3 image"));
    }
    Ok(())
}

impl Filesystem for Dos33 {
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        check_geometry(header)?;
        if read_sector(buffer, header, 0)?[0..4] == PRODOS_MAGIC {
            return Err(AtrError::unsupported_disk("ProDOS format found but not supported"));
        }
        let vtoc = read_sector(buffer, header, VTOC_SECTOR)?;
        if vtoc[3] != 3 || vtoc[1] as usize >= APPLE_TRACKS || vtoc[2] as usize >= APPLE_SECTORS_PER_TRACK {
            return Err(AtrError::invalid_disk("Invalid VTOC location for DOS 3.3"));
        }
        if read_sector(buffer, header, VTOC_SECTOR + 14)?[2] != 13 {
            log::warn!("DOS 3.3 catalog not in standard order, sectors may be swapped");
        }
        Ok(Dos33)
    }

    fn name(&self) -> &'static str {
        "Apple DOS 3.3"
    }

    fn read_vtoc(&self, buffer: &ByteBuffer, header: &Header) -> Result<Vtoc> {
        let data = read_sector(buffer, header, VTOC_SECTOR)?;
        let mut vtoc = Vtoc::new();
        for track in 0..header.num_sectors() / APPLE_SECTORS_PER_TRACK {
            let index = BITMAP_OFFSET + track * 4;
            let bits = u16::from_be_bytes([data[index], data[index + 1]]);
            for sector in 0..APPLE_SECTORS_PER_TRACK {
                if bits & (1 << sector) != 0 {
                    vtoc.set_free(sector_from_track(track, sector), true);
                }
            }
        }
        log::debug!("{}", vtoc);
        Ok(vtoc)
    }

    fn encode_vtoc(&self, vtoc: &Vtoc, buffer: &ByteBuffer, header: &Header) -> Result<Vec<WriteableSector>> {
        let mut data = read_sector(buffer, header, VTOC_SECTOR)?.to_vec();
        for track in 0..header.num_sectors() / APPLE_SECTORS_PER_TRACK {
            let bits = (0..APPLE_SECTORS_PER_TRACK)
                .filter(|&s| vtoc.is_free(sector_from_track(track, s)))
                .fold(0u16, |acc, s| acc | 1 << s);
            let index = BITMAP_OFFSET + track * 4;
            data[index..index + 2].copy_from_slice(&bits.to_be_bytes());
        }
        Ok(vec![WriteableSector::with_data(data.len(), &data, VTOC_SECTOR)])
    }

    fn read_directory(&self, buffer: &ByteBuffer, header: &Header) -> Result<Directory> {
        let catalog = Self::catalog_sectors(buffer, header)?;
        let mut directory = Directory::new(catalog.len() * CATALOG_ENTRIES_PER_SECTOR);
        let mut num = 0;
        for &sector in &catalog {
            let data = read_sector(buffer, header, sector)?;
            for raw in data[CATALOG_ENTRY_START..].chunks_exact(CATALOG_ENTRY_SIZE) {
                if raw[0] == 0 {
                    return Ok(directory);
                }
                let dirent = Self::decode_dirent(raw, num, header);
                if !dirent.is_sane {
                    log::warn!("Illegally formatted directory entry {}", dirent);
                }
                directory.set(dirent);
                num += 1;
            }
        }
        Ok(directory)
    }

    fn encode_directory(
        &self,
        directory: &Directory,
        buffer: &ByteBuffer,
        header: &Header,
    ) -> Result<Vec<WriteableSector>> {
        let catalog = Self::catalog_sectors(buffer, header)?;
        let bytes = directory.encode(CATALOG_ENTRY_SIZE, &[0; CATALOG_ENTRY_SIZE], Self::encode_dirent);
        let per_sector = CATALOG_ENTRY_SIZE * CATALOG_ENTRIES_PER_SECTOR;
        let mut sectors = Vec::with_capacity(catalog.len());
        for (&num, chunk) in catalog.iter().zip(bytes.chunks(per_sector)) {
            let mut data = read_sector(buffer, header, num)?.to_vec();
            data[CATALOG_ENTRY_START..CATALOG_ENTRY_START + chunk.len()].copy_from_slice(chunk);
            sectors.push(WriteableSector::with_data(data.len(), &data, num));
        }
        Ok(sectors)
    }

    fn new_dirent(&self, filename: &str, filetype: &str) -> Result<Dirent> {
        let name = filename.trim();
        if name.is_empty()
            || name.len() > FILENAME_LENGTH
            || !name.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
            || name.contains(',')
        {
            return Err(AtrError::InvalidFilename(filename.to_string()));
        }
        let flag = type_from_letter(filetype);
        Ok(Dirent::new(name.to_ascii_uppercase(), type_letter(flag), flag))
    }

    /// Reserve and fill the T/S list sectors for an assigned chain
    ///
    /// The entry ends up pointing at the first T/S list, with a sector count
    /// that includes the lists.
    fn link_chain(
        &self,
        buffer: &ByteBuffer,
        header: &Header,
        vtoc: &mut Vtoc,
        dirent: &mut Dirent,
        sectors: Vec<WriteableSector>,
    ) -> Result<Vec<WriteableSector>> {
        let pairs = Self::max_ts_pairs(buffer, header)?;
        let num_lists = sectors.len().div_ceil(pairs).max(1);
        let list_nums = vtoc.reserve(num_lists)?;
        let data_nums: Vec<usize> = sectors.iter().filter_map(|s| s.sector_num).collect();

        let mut lists = Vec::with_capacity(num_lists);
        for (i, &num) in list_nums.iter().enumerate() {
            let mut list = WriteableSector::with_data(header.sector_size, &[], num);
            let next = list_nums.get(i + 1).copied().unwrap_or(0);
            if next > 0 {
                let (t, s) = track_sector(next);
                list.data[1] = t;
                list.data[2] = s;
            }
            let first = i * pairs;
            list.data[5..7].copy_from_slice(&(first as u16).to_le_bytes());
            let end = (first + pairs).min(data_nums.len());
            for (j, &data_sector) in data_nums[first.min(end)..end].iter().enumerate() {
                let (t, s) = track_sector(data_sector);
                list.data[TS_PAIRS_START + j * 2] = t;
                list.data[TS_PAIRS_START + j * 2 + 1] = s;
            }
            lists.push(list);
        }

        dirent.starting_sector = list_nums[0];
        dirent.num_sectors += num_lists;
        log::debug!("{}: {} data sectors, t/s lists {:?}", dirent.filename, data_nums.len(), list_nums);
        lists.extend(sectors);
        Ok(lists)
    }

    fn file_sectors(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        let (mut lists, data) = self.walk_ts_lists(buffer, header, dirent)?;
        lists.extend(data);
        Ok(lists)
    }

    fn file_offsets(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        let (_, data) = self.walk_ts_lists(buffer, header, dirent)?;
        let mut offsets = Vec::with_capacity(data.len() * header.sector_size);
        for sector in data {
            offsets.extend(sector_range(header, sector)?);
        }
        Ok(offsets)
    }

    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let boot = [
            ("Boot 1", 0x00, 0x00, 0x0800),
            ("Boot 2", 0x01, 0x09, 0x3700),
            ("Relocator", 0x0a, 0x0b, 0x1b00),
            ("Boot 3", 0x0c, 0x0c + 25, 0x1d00),
        ];
        for (name, first, last, origin) in boot {
            let start = sector_range(header, first)?.start;
            let end = sector_range(header, last)?.end;
            segments.push(Segment::new(buffer, start, end - start, name)?.with_origin(origin));
        }

        let range = sector_range(header, VTOC_SECTOR)?;
        let vtoc = Segment::new(buffer, range.start, range.len(), "VTOC")?;
        vtoc.set_style_ranges(buffer, &[0..vtoc.len()], StyleBits::data())?;
        let mut comments: Vec<(usize, String)> = [
            (0x00, "unused"),
            (0x01, "Track number of next catalog sector"),
            (0x02, "Sector number of next catalog sector"),
            (0x03, "Release number of DOS used to format"),
            (0x04, "unused"),
            (0x06, "Volume number"),
            (0x07, "unused"),
            (0x27, "Number of track/sector pairs per t/s list sector"),
            (0x28, "unused"),
            (0x30, "Last track that sectors allocated"),
            (0x31, "Track allocation direction"),
            (0x32, "unused"),
            (0x34, "Tracks per disk"),
            (0x35, "Sectors per track"),
            (0x36, "Bytes per sector"),
        ]
        .iter()
        .map(|&(i, t)| (i, t.to_string()))
        .collect();
        comments.extend((0..APPLE_TRACKS).map(|t| (BITMAP_OFFSET + t * 4, format!("Free sectors in track {}", t))));
        comment_all(buffer, &vtoc, &comments)?;
        segments.push(vtoc);

        let catalog = Self::catalog_sectors(buffer, header)?;
        let mut offsets = Vec::with_capacity(catalog.len() * header.sector_size);
        for &sector in &catalog {
            offsets.extend(sector_range(header, sector)?);
        }
        let segment = Segment::from_offsets(buffer, &offsets, "Catalog")?;
        segment.set_style_ranges(buffer, &[0..segment.len()], StyleBits::data())?;
        let mut comments = Vec::new();
        for i in 0..catalog.len() {
            let base = i * header.sector_size;
            comments.push((base, "unused".to_string()));
            comments.push((base + 0x01, "Track number of next catalog sector".to_string()));
            comments.push((base + 0x02, "Sector number of next catalog sector".to_string()));
            comments.push((base + 0x03, "unused".to_string()));
            for j in 0..CATALOG_ENTRIES_PER_SECTOR {
                let n = i * CATALOG_ENTRIES_PER_SECTOR + j;
                let entry = base + CATALOG_ENTRY_START + j * CATALOG_ENTRY_SIZE;
                comments.push((entry, format!("FILE #{}: Track of first track/sector list", n)));
                comments.push((entry + 0x01, format!("FILE #{}: Sector of first track/sector list", n)));
                comments.push((entry + 0x02, format!("FILE #{}: File type", n)));
                comments.push((entry + 0x03, format!("FILE #{}: Filename", n)));
                comments.push((entry + 0x21, format!("FILE #{}: Number of sectors in file", n)));
            }
        }
        comment_all(buffer, &segment, &comments)?;
        segments.push(segment);

        Ok(segments)
    }

    fn file_segment_names(&self, dirent: &Dirent) -> (String, String) {
        let summary = Self::summary(dirent);
        let name = format!("{} {:03} {}", summary, dirent.num_sectors, dirent.filename);
        let verbose = format!(
            "{} ({} sectors, first@{}) {}",
            dirent.filename, dirent.num_sectors, dirent.starting_sector, summary
        );
        (name, verbose)
    }

    /// Binary files start at the BSAVE load address minus the four header bytes
    fn file_segment(&self, buffer: &mut ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Segment> {
        let offsets = self.file_offsets(buffer, header, dirent)?;
        let (name, verbose_name) = self.file_segment_names(dirent);
        let mut segment = Segment::from_offsets(buffer, &offsets, name)?.with_verbose_name(verbose_name);
        if type_letter(dirent.flag) == "B" && segment.len() >= 4 {
            let address = u16::from_le_bytes([segment.get(buffer, 0)?, segment.get(buffer, 1)?]);
            let origin = address.wrapping_sub(4);
            if origin > 0 {
                segment.set_style_ranges(buffer, &[0..4], StyleBits::data())?;
            }
            segment = segment.with_origin(origin);
        }
        Ok(segment)
    }

    fn sub_segments(&self, buffer: &mut ByteBuffer, dirent: &Dirent, file: &Segment) -> Vec<Segment> {
        if type_letter(dirent.flag) != "B" {
            return Vec::new();
        }
        let bytes = file.to_bytes(buffer);
        parse_bsave(&bytes)
            .and_then(|chunk| chunk_segments(buffer, file, &[chunk]))
            .unwrap_or_else(|err| {
                log::debug!("{} not a BSAVE file: {}", file.name, err);
                Vec::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::build_bsave;
    use crate::image::sector::split_into_sectors;
    use crate::media::apple::APPLE_IMAGE_SIZE;

    fn blank() -> (ByteBuffer, Header) {
        let header = Header::new("DSK", 0, APPLE_IMAGE_SIZE, APPLE_SECTOR_SIZE, 0);
        let mut buffer = ByteBuffer::new(vec![0; APPLE_IMAGE_SIZE]);
        Dos33::format(&mut buffer, &header).unwrap();
        (buffer, header)
    }

    fn add_file(buffer: &mut ByteBuffer, header: &Header, name: &str, filetype: &str, data: &[u8]) -> usize {
        let fs = Dos33;
        let mut vtoc = fs.read_vtoc(buffer, header).unwrap();
        let mut directory = fs.read_directory(buffer, header).unwrap();
        let slot = directory.add_entry(fs.new_dirent(name, filetype).unwrap()).unwrap();
        let mut sectors = fs.build_sectors(header, data);
        directory.assign_sector_chain(slot, &mut vtoc, &mut sectors).unwrap();
        let dirent = directory.get_mut(slot).unwrap();
        let sectors = fs.link_chain(buffer, header, &mut vtoc, dirent, sectors).unwrap();
        write_sectors(buffer, header, &sectors).unwrap();
        let encoded = fs.encode_vtoc(&vtoc, buffer, header).unwrap();
        write_sectors(buffer, header, &encoded).unwrap();
        let encoded = fs.encode_directory(&directory, buffer, header).unwrap();
        write_sectors(buffer, header, &encoded).unwrap();
        slot
    }

    #[test]
    fn test_format() {
        let (buffer, header) = blank();
        let fs = Dos33::probe(&buffer, &header).unwrap();
        let vtoc = fs.read_vtoc(&buffer, &header).unwrap();
        assert_eq!(vtoc.num_free(), 528);
        assert!(!vtoc.is_free(0));
        assert!(!vtoc.is_free(VTOC_SECTOR));
        assert!(vtoc.is_free(16));

        let directory = fs.read_directory(&buffer, &header).unwrap();
        assert_eq!(directory.capacity(), 105);
        assert_eq!(directory.iter_in_use().count(), 0);
    }

    #[test]
    fn test_vtoc_bit_order() {
        let (buffer, header) = blank();
        let raw = read_sector(&buffer, &header, VTOC_SECTOR).unwrap();
        // track 0 used, track 1 free: sectors 15..8 then 7..0
        assert_eq!(&raw[0x38..0x3c], &[0, 0, 0, 0]);
        assert_eq!(&raw[0x3c..0x40], &[0xFF, 0xFF, 0, 0]);

        let mut vtoc = Dos33.read_vtoc(&buffer, &header).unwrap();
        vtoc.set_free(sector_from_track(1, 15), false);
        vtoc.set_free(sector_from_track(1, 0), false);
        let encoded = Dos33.encode_vtoc(&vtoc, &buffer, &header).unwrap();
        assert_eq!(&encoded[0].data[0x3c..0x3e], &[0x7F, 0xFE]);
    }

    #[test]
    fn test_prodos_unsupported() {
        let header = Header::new("DSK", 0, APPLE_IMAGE_SIZE, APPLE_SECTOR_SIZE, 0);
        let mut data = vec![0; APPLE_IMAGE_SIZE];
        data[0..4].copy_from_slice(&PRODOS_MAGIC);
        match Dos33::probe(&ByteBuffer::new(data), &header) {
            Err(AtrError::UnsupportedDiskImage(msg)) => assert_eq!(msg, "ProDOS format found but not supported"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_probe_wrong_geometry() {
        let header = Header::new("ATR", 16, 92160, 128, 1);
        let buffer = ByteBuffer::new(vec![0; 16 + 92160]);
        assert!(matches!(
            Dos33::probe(&buffer, &header),
            Err(AtrError::InvalidDiskImage(_))
        ));
    }

    #[test]
    fn test_dirent_roundtrip() {
        let header = Header::new("DSK", 0, APPLE_IMAGE_SIZE, APPLE_SECTOR_SIZE, 0);
        let mut dirent = Dirent::new("HELLO", "A", 0x02 | LOCKED);
        dirent.locked = true;
        dirent.starting_sector = sector_from_track(18, 15);
        dirent.num_sectors = 3;
        let raw = Dos33::encode_dirent(&dirent);
        assert_eq!(raw[0], 18);
        assert_eq!(raw[1], 15);
        assert_eq!(raw[2], 0x82);
        assert_eq!(raw[3], b'H' | 0x80);
        assert_eq!(raw[8], 0xA0);

        let decoded = Dos33::decode_dirent(&raw, 0, &header);
        assert_eq!(decoded.filename, "HELLO");
        assert_eq!(decoded.filetype, "A");
        assert!(decoded.locked);
        assert!(decoded.is_sane);
        assert_eq!(Dos33::summary(&decoded), "*A");

        dirent.deleted = true;
        let raw = Dos33::encode_dirent(&dirent);
        assert_eq!(raw[0], 0xFF);
        assert_eq!(raw[0x20], 18);
        let decoded = Dos33::decode_dirent(&raw, 0, &header);
        assert!(decoded.deleted);
        assert_eq!(decoded.starting_sector, sector_from_track(18, 15));
    }

    #[test]
    fn test_type_letters() {
        assert_eq!(type_letter(0x84), "B");
        assert_eq!(type_letter(0x03), "?");
        assert_eq!(type_from_letter("T"), 0x00);
        assert_eq!(type_from_letter("X"), 0x04);
    }

    #[test]
    fn test_write_and_read_binary() {
        let (mut buffer, header) = blank();
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        let data = build_bsave(0x2000, &payload);
        let slot = add_file(&mut buffer, &header, "GAME", "B", &data);

        let directory = Dos33.read_directory(&buffer, &header).unwrap();
        let dirent = directory.get(slot).unwrap();
        assert_eq!(dirent.filename, "GAME");
        // three data sectors and one t/s list
        assert_eq!(dirent.num_sectors, 4);
        assert_eq!(Dos33.file_sectors(&buffer, &header, dirent).unwrap().len(), 4);

        let segment = Dos33.file_segment(&mut buffer, &header, dirent).unwrap();
        assert_eq!(segment.len(), 768);
        assert_eq!(segment.origin, 0x2000 - 4);
        assert_eq!(segment.name, " B 004 GAME");
        assert_eq!(&segment.to_bytes(&buffer)[..604], &data[..]);

        let subs = Dos33.sub_segments(&mut buffer, dirent, &segment);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].origin, 0x2000);
        assert_eq!(subs[0].len(), 600);

        let vtoc = Dos33.read_vtoc(&buffer, &header).unwrap();
        assert_eq!(vtoc.num_free(), 524);
    }

    #[test]
    fn test_long_file_uses_two_ts_lists() {
        let (mut buffer, header) = blank();
        let data = vec![0x55; 256 * 130];
        let slot = add_file(&mut buffer, &header, "BIG", "T", &data);
        let directory = Dos33.read_directory(&buffer, &header).unwrap();
        let dirent = directory.get(slot).unwrap();
        assert_eq!(dirent.num_sectors, 132);
        let offsets = Dos33.file_offsets(&buffer, &header, dirent).unwrap();
        assert_eq!(offsets.len(), data.len());
    }

    #[test]
    fn test_short_ts_lists_from_vtoc() {
        let (mut buffer, header) = blank();
        buffer.data_mut()[VTOC_SECTOR * APPLE_SECTOR_SIZE + 0x27] = 10;
        let data: Vec<u8> = (0..256 * 20).map(|i| (i / 256) as u8).collect();
        let slot = add_file(&mut buffer, &header, "BIG", "B", &data);

        let directory = Dos33.read_directory(&buffer, &header).unwrap();
        let dirent = directory.get(slot).unwrap();
        assert_eq!(dirent.num_sectors, 22);
        let (lists, sectors) = Dos33.walk_ts_lists(&buffer, &header, dirent).unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(sectors.len(), 20);
        let offsets = Dos33.file_offsets(&buffer, &header, dirent).unwrap();
        let contents: Vec<u8> = offsets.iter().map(|&i| buffer.data()[i]).collect();
        assert_eq!(contents, data);
    }

    #[test]
    fn test_empty_file_has_ts_list() {
        let (mut buffer, header) = blank();
        let slot = add_file(&mut buffer, &header, "EMPTY", "T", &[]);
        let directory = Dos33.read_directory(&buffer, &header).unwrap();
        let dirent = directory.get(slot).unwrap();
        assert_eq!(dirent.num_sectors, 1);
        assert!(Dos33.file_offsets(&buffer, &header, dirent).unwrap().is_empty());
        assert!(split_into_sectors(&[], 256, 256).is_empty());
    }

    #[test]
    fn test_metadata_segments() {
        let (mut buffer, header) = blank();
        let segments = Dos33.metadata_segments(&mut buffer, &header).unwrap();
        let names: Vec<_> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Boot 1", "Boot 2", "Relocator", "Boot 3", "VTOC", "Catalog"]);
        assert_eq!(segments[1].len(), 9 * 256);
        assert_eq!(segments[3].origin, 0x1d00);
        assert_eq!(segments[4].get_comment(&buffer, 0x27), Some("Number of track/sector pairs per t/s list sector"));
        assert_eq!(segments[5].len(), 15 * 256);
        assert_eq!(
            segments[5].get_comment(&buffer, 0x0b + 0x23 + 0x02),
            Some("FILE #1: File type")
        );
    }
}
