/// Atari DOS 2.0S and 2.5
///
/// Layout on single, enhanced and double density media:
///
/// - sectors 1-3: boot
/// - sector 360: VTOC (type code, total and free counts, bitmap of sectors
///   0-719, most significant bit first)
/// - sectors 361-368: directory, eight 16 byte entries in the first 128 bytes
///   of each sector
/// - sector 1024 on enhanced density: second VTOC with the bitmap of sectors
///   720-1023
///
/// Every data sector ends in three link bytes: file number and the high bits
/// of the next sector, the low byte of the next sector, and the number of
/// payload bytes in use. MyDOS entries use the first two bytes as a plain
/// 16-bit next sector and carry no file number.

use super::boot::BootRecord;
use super::directory::{Dirent, Directory};
use super::vtoc::Vtoc;
use super::{comment_all, flag_list, Filesystem};
use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::executable::executable_segments;
use crate::image::sector::{read_sector, sector_range, write_sector, write_sectors};
use crate::image::WriteableSector;
use crate::media::Header;
use crate::segment::Segment;
use crate::style::StyleBits;
use std::collections::HashSet;
use std::ops::Range;

/// First VTOC sector
pub const VTOC_SECTOR: usize = 360;
/// Second VTOC sector on enhanced density media
pub const VTOC2_SECTOR: usize = 1024;
/// First directory sector
pub const DIRECTORY_START: usize = 361;
/// Directory sectors
pub const DIRECTORY_SECTORS: usize = 8;
/// Bytes per directory entry
pub const DIRENT_SIZE: usize = 16;
/// Directory entries per sector
pub const DIRENTS_PER_SECTOR: usize = 8;
/// Total directory entries
pub const MAX_DIRENTS: usize = DIRECTORY_SECTORS * DIRENTS_PER_SECTOR;
/// Link bytes at the end of each data sector
pub const SECTOR_LINK_SIZE: usize = 3;

const BITMAP_OFFSET: usize = 0x0a;
const VTOC2_MIRROR_FIRST: usize = 48;
const VTOC2_BITMAP_OFFSET: usize = 0x54;
const VTOC2_FREE_OFFSET: usize = 0x7a;
const FIRST_SECTOR_ABOVE_VTOC1: usize = 720;
const LAST_BITMAP_SECTOR: usize = 1023;

/// DOS 2.0S boot record: 3 sectors at $0700, init at $1540, then JMP $0714
const DOS2_BOOT_RECORD: [u8; 9] = [0x00, 0x03, 0x00, 0x07, 0x40, 0x15, 0x4C, 0x14, 0x07];

/// Directory entry flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirentFlags(pub u8);

impl DirentFlags {
    /// Opened for output
    pub const OUTPUT: u8 = 0x01;
    /// Created by DOS 2
    pub const DOS2: u8 = 0x02;
    /// MyDOS chain format
    pub const MYDOS: u8 = 0x04;
    /// MyDOS subdirectory
    pub const DIRECTORY: u8 = 0x10;
    /// Locked
    pub const LOCKED: u8 = 0x20;
    /// Entry in use
    pub const IN_USE: u8 = 0x40;
    /// Entry deleted
    pub const DELETED: u8 = 0x80;

    /// Check a flag bit
    pub fn has(&self, bit: u8) -> bool {
        (self.0 & bit) != 0
    }

    /// Names of the set bits
    pub fn names(&self) -> Vec<&'static str> {
        [
            (Self::OUTPUT, "OUT"),
            (Self::DOS2, "DOS2"),
            (Self::MYDOS, "MYDOS"),
            (Self::DIRECTORY, "DIR"),
            (Self::LOCKED, "LOCKED"),
            (Self::IN_USE, "IN_USE"),
            (Self::DELETED, "DEL"),
        ]
        .iter()
        .filter(|(bit, _)| self.has(*bit))
        .map(|&(_, name)| name)
        .collect()
    }
}

/// Atari DOS 2.0S, or 2.5 on enhanced density media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtariDos2 {
    /// Media has the second VTOC at sector 1024
    pub enhanced: bool,
}

impl AtariDos2 {
    /// Filesystem for the given geometry
    pub fn for_header(header: &Header) -> Self {
        Self {
            enhanced: header.sector_size == 128 && header.sector_is_valid(VTOC2_SECTOR),
        }
    }

    /// Write an empty DOS 2 layout: boot record, VTOC and directory
    pub fn format(buffer: &mut ByteBuffer, header: &Header) -> Result<()> {
        check_geometry(header)?;
        let fs = Self::for_header(header);

        let mut vtoc = Vtoc::new();
        for sector in (4..VTOC_SECTOR).chain(DIRECTORY_START + DIRECTORY_SECTORS..FIRST_SECTOR_ABOVE_VTOC1) {
            vtoc.set_free(sector, true);
        }
        if fs.enhanced {
            for sector in FIRST_SECTOR_ABOVE_VTOC1 + 1..=LAST_BITMAP_SECTOR {
                vtoc.set_free(sector, true);
            }
        }

        let boot_size = sector_range(header, 1)?.len();
        write_sector(buffer, header, &WriteableSector::with_data(boot_size, &DOS2_BOOT_RECORD, 1))?;

        let size = header.sector_size;
        let mut first = vec![0u8; size];
        first[0] = 2;
        first[1..3].copy_from_slice(&(vtoc.num_free() as u16).to_le_bytes());
        write_sector(buffer, header, &WriteableSector::with_data(size, &first, VTOC_SECTOR))?;
        for sector in DIRECTORY_START..DIRECTORY_START + DIRECTORY_SECTORS {
            write_sector(buffer, header, &WriteableSector::with_data(size, &[], sector))?;
        }
        if fs.enhanced {
            write_sector(buffer, header, &WriteableSector::with_data(size, &[], VTOC2_SECTOR))?;
        }

        let sectors = fs.encode_vtoc(&vtoc, buffer, header)?;
        write_sectors(buffer, header, &sectors)?;
        log::info!("formatted {} with {} free sectors", fs.name(), vtoc.num_free());
        Ok(())
    }

    fn link_fields(raw: &[u8], mydos: bool) -> (Option<usize>, usize, usize) {
        let tail = raw.len() - SECTOR_LINK_SIZE;
        let count = (raw[tail + 2] as usize).min(tail);
        if mydos {
            let next = (raw[tail] as usize) << 8 | raw[tail + 1] as usize;
            (None, next, count)
        } else {
            let file_num = (raw[tail] >> 2) as usize;
            let next = ((raw[tail] & 0x03) as usize) << 8 | raw[tail + 1] as usize;
            (Some(file_num), next, count)
        }
    }

    /// Follow a file's sector chain, returning each sector with the absolute
    /// range of its payload bytes
    fn walk_chain(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<(usize, Range<usize>)>> {
        if !dirent.is_sane {
            return Err(AtrError::InvalidDirent(format!("Invalid directory entry '{}'", dirent)));
        }
        let mydos = DirentFlags(dirent.flag).has(DirentFlags::MYDOS);
        let mut chain = Vec::with_capacity(dirent.num_sectors);
        let mut seen = HashSet::new();
        let mut sector = dirent.starting_sector;
        while sector != 0 {
            if !seen.insert(sector) {
                return Err(AtrError::invalid_file(format!(
                    "Bad sector pointer data: attempting to reread sector {}",
                    sector
                )));
            }
            let range = sector_range(header, sector)?;
            let raw = buffer
                .data()
                .get(range.clone())
                .ok_or(AtrError::InvalidSector(sector))?;
            let (file_num, next, count) = Self::link_fields(raw, mydos);
            if let Some(found) = file_num {
                if found != dirent.file_num {
                    return Err(AtrError::FileNumberMismatch {
                        expected: dirent.file_num,
                        found,
                    });
                }
            }
            log::trace!("{}: sector {} holds {} bytes, next {}", dirent.filename, sector, count, next);
            chain.push((sector, range.start..range.start + count));
            sector = next;
        }
        Ok(chain)
    }

    fn decode_dirent(raw: &[u8], file_num: usize, header: &Header) -> Dirent {
        let flags = DirentFlags(raw[0]);
        let num_sectors = u16::from_le_bytes([raw[1], raw[2]]) as usize;
        let starting_sector = u16::from_le_bytes([raw[3], raw[4]]) as usize;
        let basename = String::from_utf8_lossy(&raw[5..13]).trim_end().to_string();
        let ext = String::from_utf8_lossy(&raw[13..16]).trim_end().to_string();
        let filename = if ext.is_empty() {
            basename
        } else {
            format!("{}.{}", basename, ext)
        };

        let in_use = flags.has(DirentFlags::IN_USE);
        let is_sane = !in_use
            || (num_sectors == 0 && starting_sector == 0)
            || (header.sector_is_valid(starting_sector) && num_sectors <= header.max_sectors);

        Dirent {
            file_num,
            filename,
            filetype: String::new(),
            flag: flags.0,
            starting_sector,
            num_sectors,
            in_use,
            deleted: flags.has(DirentFlags::DELETED),
            locked: flags.has(DirentFlags::LOCKED),
            is_sane,
            file_length: 0,
        }
    }

    fn encode_dirent(dirent: &Dirent) -> Vec<u8> {
        let mut flag = dirent.flag & !(DirentFlags::IN_USE | DirentFlags::DELETED | DirentFlags::LOCKED);
        if dirent.in_use {
            flag |= DirentFlags::IN_USE;
        }
        if dirent.deleted {
            flag |= DirentFlags::DELETED;
        }
        if dirent.locked {
            flag |= DirentFlags::LOCKED;
        }
        let (basename, ext) = dirent.filename.split_once('.').unwrap_or((dirent.filename.as_str(), ""));
        let mut raw = vec![b' '; DIRENT_SIZE];
        raw[0] = flag;
        raw[1..3].copy_from_slice(&(dirent.num_sectors as u16).to_le_bytes());
        raw[3..5].copy_from_slice(&(dirent.starting_sector as u16).to_le_bytes());
        for (dest, &b) in raw[5..13].iter_mut().zip(basename.as_bytes()) {
            *dest = b;
        }
        for (dest, &b) in raw[13..16].iter_mut().zip(ext.as_bytes()) {
            *dest = b;
        }
        raw
    }
}

fn check_geometry(header: &Header) -> Result<()> {
    if header.starting_sector_label != 1
        || !(header.sector_size == 128 || header.sector_size == 256)
        || header.max_sectors < DIRECTORY_START + DIRECTORY_SECTORS
        || header.max_sectors > 1040
    {
        return Err(AtrError::invalid_disk(format!("{} can't hold Atari DOS 2", header)));
    }
    Ok(())
}

/// Validate and normalise an `NAME.EXT` filename
pub fn normalise_filename(filename: &str) -> Result<String> {
    let upper = filename.trim().to_ascii_uppercase();
    let (basename, ext) = upper.split_once('.').unwrap_or((upper.as_str(), ""));
    let valid = |part: &str| part.bytes().all(|b| b.is_ascii_alphanumeric());
    if basename.is_empty() || basename.len() > 8 || ext.len() > 3 || !valid(basename) || !valid(ext) {
        return Err(AtrError::InvalidFilename(filename.to_string()));
    }
    Ok(if ext.is_empty() {
        basename.to_string()
    } else {
        format!("{}.{}", basename, ext)
    })
}

fn bit(bytes: &[u8], index: usize) -> bool {
    bytes.get(index / 8).map_or(false, |&b| b & (0x80 >> (index % 8)) != 0)
}

fn set_bit(bytes: &mut [u8], index: usize, value: bool) {
    if let Some(b) = bytes.get_mut(index / 8) {
        let mask = 0x80 >> (index % 8);
        if value {
            *b |= mask;
        } else {
            *b &= !mask;
        }
    }
}

impl Filesystem for AtariDos2 {
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        check_geometry(header)?;
        let vtoc = read_sector(buffer, header, VTOC_SECTOR)?;
        let code = vtoc[0];
        let total = u16::from_le_bytes([vtoc[1], vtoc[2]]) as usize;
        let free = u16::from_le_bytes([vtoc[3], vtoc[4]]) as usize;
        if !(code == 0 || code == 2) || total == 0 || total > header.max_sectors || free > total {
            return Err(AtrError::invalid_disk(format!(
                "Invalid VTOC: code {}, {} free of {} sectors",
                code, free, total
            )));
        }
        Ok(Self::for_header(header))
    }

    fn name(&self) -> &'static str {
        if self.enhanced {
            "Atari DOS 2.5"
        } else {
            "Atari DOS 2"
        }
    }

    fn payload_size(&self, header: &Header) -> usize {
        header.sector_size - SECTOR_LINK_SIZE
    }

    fn read_vtoc(&self, buffer: &ByteBuffer, header: &Header) -> Result<Vtoc> {
        let mut vtoc = Vtoc::new();
        let first = read_sector(buffer, header, VTOC_SECTOR)?;
        let bitmap = &first[BITMAP_OFFSET..];
        for sector in 0..FIRST_SECTOR_ABOVE_VTOC1 {
            if bit(bitmap, sector) && header.sector_is_valid(sector) {
                vtoc.set_free(sector, true);
            }
        }
        if self.enhanced {
            let second = read_sector(buffer, header, VTOC2_SECTOR)?;
            let bitmap = &second[VTOC2_BITMAP_OFFSET..VTOC2_FREE_OFFSET];
            for sector in FIRST_SECTOR_ABOVE_VTOC1..=LAST_BITMAP_SECTOR {
                if bit(bitmap, sector - FIRST_SECTOR_ABOVE_VTOC1) && header.sector_is_valid(sector) {
                    vtoc.set_free(sector, true);
                }
            }
        }
        log::debug!("{}", vtoc);
        Ok(vtoc)
    }

    fn encode_vtoc(&self, vtoc: &Vtoc, buffer: &ByteBuffer, header: &Header) -> Result<Vec<WriteableSector>> {
        let mut first = read_sector(buffer, header, VTOC_SECTOR)?.to_vec();
        for sector in 0..FIRST_SECTOR_ABOVE_VTOC1 {
            set_bit(&mut first[BITMAP_OFFSET..], sector, vtoc.is_free(sector));
        }
        let free_low = vtoc.num_free_in(0..FIRST_SECTOR_ABOVE_VTOC1) as u16;
        first[3..5].copy_from_slice(&free_low.to_le_bytes());
        let mut sectors = vec![WriteableSector::with_data(first.len(), &first, VTOC_SECTOR)];

        if self.enhanced {
            let mut second = read_sector(buffer, header, VTOC2_SECTOR)?.to_vec();
            for sector in VTOC2_MIRROR_FIRST..FIRST_SECTOR_ABOVE_VTOC1 {
                set_bit(&mut second, sector - VTOC2_MIRROR_FIRST, vtoc.is_free(sector));
            }
            for sector in FIRST_SECTOR_ABOVE_VTOC1..=LAST_BITMAP_SECTOR {
                set_bit(
                    &mut second[VTOC2_BITMAP_OFFSET..VTOC2_FREE_OFFSET],
                    sector - FIRST_SECTOR_ABOVE_VTOC1,
                    vtoc.is_free(sector),
                );
            }
            let free_high = vtoc.num_free_in(FIRST_SECTOR_ABOVE_VTOC1..LAST_BITMAP_SECTOR + 1) as u16;
            second[VTOC2_FREE_OFFSET..VTOC2_FREE_OFFSET + 2].copy_from_slice(&free_high.to_le_bytes());
            sectors.push(WriteableSector::with_data(second.len(), &second, VTOC2_SECTOR));
        }
        Ok(sectors)
    }

    fn read_directory(&self, buffer: &ByteBuffer, header: &Header) -> Result<Directory> {
        let mut directory = Directory::new(MAX_DIRENTS);
        for i in 0..DIRECTORY_SECTORS {
            let data = read_sector(buffer, header, DIRECTORY_START + i)?;
            for j in 0..DIRENTS_PER_SECTOR {
                let raw = &data[j * DIRENT_SIZE..(j + 1) * DIRENT_SIZE];
                if raw[0] == 0 {
                    return Ok(directory);
                }
                let dirent = Self::decode_dirent(raw, i * DIRENTS_PER_SECTOR + j, header);
                if !dirent.is_sane {
                    log::warn!("Illegally formatted directory entry {}", dirent);
                }
                directory.set(dirent);
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
        let bytes = directory.encode(DIRENT_SIZE, &[0; DIRENT_SIZE], Self::encode_dirent);
        let per_sector = DIRENT_SIZE * DIRENTS_PER_SECTOR;
        let mut sectors = Vec::with_capacity(DIRECTORY_SECTORS);
        for (i, chunk) in bytes.chunks(per_sector).take(DIRECTORY_SECTORS).enumerate() {
            let num = DIRECTORY_START + i;
            let mut data = read_sector(buffer, header, num)?.to_vec();
            data[..chunk.len()].copy_from_slice(chunk);
            sectors.push(WriteableSector::with_data(data.len(), &data, num));
        }
        Ok(sectors)
    }

    fn new_dirent(&self, filename: &str, _filetype: &str) -> Result<Dirent> {
        let name = normalise_filename(filename)?;
        Ok(Dirent::new(name, "", DirentFlags::DOS2 | DirentFlags::IN_USE))
    }

    fn link_chain(
        &self,
        _buffer: &ByteBuffer,
        header: &Header,
        _vtoc: &mut Vtoc,
        dirent: &mut Dirent,
        mut sectors: Vec<WriteableSector>,
    ) -> Result<Vec<WriteableSector>> {
        let tail = self.payload_size(header);
        for sector in &mut sectors {
            let next = sector.next_sector_num;
            if next > 0x3FF {
                return Err(AtrError::InvalidSector(next));
            }
            sector.data[tail] = ((dirent.file_num as u8) << 2) | ((next >> 8) as u8 & 0x03);
            sector.data[tail + 1] = (next & 0xFF) as u8;
            sector.data[tail + 2] = sector.used as u8;
        }
        Ok(sectors)
    }

    fn file_sectors(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        Ok(self
            .walk_chain(buffer, header, dirent)?
            .into_iter()
            .map(|(sector, _)| sector)
            .collect())
    }

    fn file_offsets(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        Ok(self
            .walk_chain(buffer, header, dirent)?
            .into_iter()
            .flat_map(|(_, range)| range)
            .collect())
    }

    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();

        let record = BootRecord::read(buffer, header)?;
        match record.check(BootRecord::sector_size(header)) {
            Ok(()) => segments.extend(record.segments(buffer, header)?),
            Err(err) => log::debug!("no boot segments: {}", err),
        }

        let range = sector_range(header, VTOC_SECTOR)?;
        let vtoc = Segment::new(buffer, range.start, range.len(), "VTOC")?;
        vtoc.set_style_ranges(buffer, &[0..vtoc.len()], StyleBits::data())?;
        let comments: Vec<(usize, String)> = [
            (0x00, "Type code"),
            (0x01, "Total number of sectors"),
            (0x03, "Number of free sectors"),
            (0x05, "reserved"),
            (0x06, "unused"),
            (0x0a, "Sector bit map"),
            (0x64, "unused"),
        ]
        .iter()
        .map(|&(i, t)| (i, t.to_string()))
        .collect();
        comment_all(buffer, &vtoc, &comments)?;
        segments.push(vtoc);

        if self.enhanced {
            let range = sector_range(header, VTOC2_SECTOR)?;
            let vtoc2 = Segment::new(buffer, range.start, range.len(), "VTOC2")?;
            vtoc2.set_style_ranges(buffer, &[0..vtoc2.len()], StyleBits::data())?;
            let comments: Vec<(usize, String)> = [
                (0x00, "Repeat of sectors 48-719"),
                (VTOC2_BITMAP_OFFSET, "Sector bit map 720-1023"),
                (VTOC2_FREE_OFFSET, "Number of free sectors above 720"),
                (0x7c, "unused"),
            ]
            .iter()
            .map(|&(i, t)| (i, t.to_string()))
            .collect();
            comment_all(buffer, &vtoc2, &comments)?;
            segments.push(vtoc2);
        }

        let mut offsets = Vec::with_capacity(DIRECTORY_SECTORS * DIRENT_SIZE * DIRENTS_PER_SECTOR);
        for sector in DIRECTORY_START..DIRECTORY_START + DIRECTORY_SECTORS {
            let start = sector_range(header, sector)?.start;
            offsets.extend(start..start + DIRENT_SIZE * DIRENTS_PER_SECTOR);
        }
        let directory = Segment::from_offsets(buffer, &offsets, "Directory")?;
        directory.set_style_ranges(buffer, &[0..directory.len()], StyleBits::data())?;
        let mut comments = Vec::with_capacity(MAX_DIRENTS * 5);
        for n in 0..MAX_DIRENTS {
            let base = n * DIRENT_SIZE;
            comments.push((base, format!("FILE #{}: Flag", n)));
            comments.push((base + 1, format!("FILE #{}: Number of sectors in file", n)));
            comments.push((base + 3, format!("FILE #{}: Starting sector number", n)));
            comments.push((base + 5, format!("FILE #{}: Filename", n)));
            comments.push((base + 0x0d, format!("FILE #{}: Extension", n)));
        }
        comment_all(buffer, &directory, &comments)?;
        segments.push(directory);

        Ok(segments)
    }

    fn file_segment_names(&self, dirent: &Dirent) -> (String, String) {
        let name = format!("{} {}s@{}", dirent.filename, dirent.num_sectors, dirent.starting_sector);
        let verbose = format!(
            "{} ({} sectors, first@{}) {}",
            dirent.filename,
            dirent.num_sectors,
            dirent.starting_sector,
            flag_list(&DirentFlags(dirent.flag).names())
        );
        (name, verbose)
    }

    fn sub_segments(&self, buffer: &mut ByteBuffer, _dirent: &Dirent, file: &Segment) -> Vec<Segment> {
        executable_segments(buffer, file)
    }
}
