/// SpartaDOS
///
/// Sector 1 carries the boot record extended with the filesystem
/// parameters: the sector map of the main directory, the bitmap location,
/// sector counts, the volume name and the filesystem version.
///
/// Files are reached through sector maps. Each map sector starts with
/// 16-bit links to the next and previous map sector, then lists data
/// sectors as 16-bit labels; a zero label ends the list. A directory is a
/// file of 23 byte entries whose first entry describes the directory itself
/// and gives the length of the directory file.

use super::directory::{Dirent, Directory};
use super::vtoc::Vtoc;
use super::{comment_all, flag_list, read_only, Filesystem};
use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::executable::executable_segments;
use crate::image::sector::{read_sector, sector_range};
use crate::image::WriteableSector;
use crate::media::Header;
use crate::segment::Segment;
use crate::style::StyleBits;
use std::collections::HashSet;

/// Bytes per directory entry
pub const DIRENT_SIZE: usize = 23;
/// Boot record and filesystem parameters at the start of sector 1
pub const BOOT_INFO_SIZE: usize = 43;
/// Link bytes at the start of each sector map sector
pub const SECTOR_MAP_HEADER: usize = 4;
/// Versions written by SpartaDOS 1.1, 2.x and 3.x
pub const FS_VERSIONS: [u8; 3] = [0x11, 0x20, 0x21];

const BOOT_INFO_MIN: usize = 33;
const ROOT_NAME: &str = "MAIN";

/// Directory entry status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpartaFlags(pub u8);

impl SpartaFlags {
    /// Write protected
    pub const LOCKED: u8 = 0x01;
    /// Hidden from listings by DOS
    pub const HIDDEN: u8 = 0x02;
    /// Archived
    pub const ARCHIVED: u8 = 0x04;
    /// Entry in use
    pub const IN_USE: u8 = 0x08;
    /// Entry deleted
    pub const DELETED: u8 = 0x10;
    /// Subdirectory
    pub const DIRECTORY: u8 = 0x20;
    /// Opened for output
    pub const OUTPUT: u8 = 0x80;

    /// Check a flag bit
    pub fn has(&self, bit: u8) -> bool {
        (self.0 & bit) != 0
    }

    /// Names of the set bits
    pub fn names(&self) -> Vec<&'static str> {
        [
            (Self::OUTPUT, "OUT"),
            (Self::DIRECTORY, "DIR"),
            (Self::IN_USE, "IN_USE"),
            (Self::DELETED, "DEL"),
            (Self::LOCKED, "LOCK"),
            (Self::HIDDEN, "HIDDEN"),
            (Self::ARCHIVED, "ARCHIVED"),
        ]
        .iter()
        .filter(|(bit, _)| self.has(*bit))
        .map(|&(_, name)| name)
        .collect()
    }
}

/// Filesystem parameters from sector 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpartaBootInfo {
    /// Sectors loaded at boot
    pub num_boot: u8,
    /// Boot load address
    pub boot_address: u16,
    /// Init address
    pub init_address: u16,
    /// First sector map sector of the main directory
    pub root_dir: usize,
    /// Sectors on the disk
    pub num_sectors: usize,
    /// Free sectors
    pub num_free: usize,
    /// Sectors in the allocation bitmap
    pub num_bitmap: usize,
    /// First bitmap sector
    pub first_bitmap: usize,
    /// Next free data sector
    pub first_free: usize,
    /// Next free directory sector
    pub first_free_dir: usize,
    /// Volume name, trailing spaces removed
    pub volume_name: String,
    /// Tracks on the disk
    pub num_tracks: u8,
    /// Sector size in bytes
    pub sector_size: usize,
    /// Filesystem version byte
    pub fs_version: u8,
}

impl SpartaBootInfo {
    /// Decode from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BOOT_INFO_MIN {
            return Err(AtrError::invalid_disk("Boot sector too short"));
        }
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let sector_size = match bytes[31] {
            0x00 => 256,
            0x01 => 512,
            0x80 => 128,
            other => {
                return Err(AtrError::invalid_disk(format!(
                    "Unknown SpartaDOS sector size code {:#04x}",
                    other
                )))
            }
        };
        Ok(Self {
            num_boot: bytes[1],
            boot_address: word(2),
            init_address: word(4),
            root_dir: word(9) as usize,
            num_sectors: word(11) as usize,
            num_free: word(13) as usize,
            num_bitmap: bytes[15] as usize,
            first_bitmap: word(16) as usize,
            first_free: word(18) as usize,
            first_free_dir: word(20) as usize,
            volume_name: String::from_utf8_lossy(&bytes[22..30]).trim_end().to_string(),
            num_tracks: bytes[30],
            sector_size,
            fs_version: bytes[32],
        })
    }

    /// Check the parameters agree with the media
    pub fn check(&self, header: &Header) -> Result<()> {
        let num = header.max_sectors;
        let bitmap_fits = self.num_bitmap > 0 && header.sector_is_valid(self.first_bitmap + self.num_bitmap - 1);
        if self.num_sectors != num
            || self.first_free > num
            || !header.sector_is_valid(self.first_bitmap)
            || !bitmap_fits
            || !header.sector_is_valid(self.root_dir)
            || !FS_VERSIONS.contains(&self.fs_version)
            || self.sector_size != header.sector_size
        {
            return Err(AtrError::invalid_disk("Invalid SpartaDos parameters in boot header"));
        }
        Ok(())
    }
}

/// Sectors of one sector map chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorMap {
    /// The map sectors themselves, in chain order
    pub map_sectors: Vec<usize>,
    /// Data sectors up to the first zero entry
    pub data_sectors: Vec<usize>,
}

/// SpartaDOS 1.1 to 3.x, read only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpartaDos {
    /// Parameters from sector 1
    pub boot: SpartaBootInfo,
}

impl SpartaDos {
    /// Follow a sector map chain starting at `first`
    pub fn sector_map(buffer: &ByteBuffer, header: &Header, first: usize) -> Result<SectorMap> {
        let mut map = SectorMap::default();
        let mut seen = HashSet::new();
        let mut ended = false;
        let mut sector = first;
        while sector > 0 {
            if !seen.insert(sector) {
                return Err(AtrError::invalid_file(format!("Sector map loops back to sector {}", sector)));
            }
            let data = read_sector(buffer, header, sector)?;
            map.map_sectors.push(sector);
            for pair in data[SECTOR_MAP_HEADER..].chunks_exact(2) {
                let entry = u16::from_le_bytes([pair[0], pair[1]]) as usize;
                ended |= entry == 0;
                if !ended {
                    map.data_sectors.push(entry);
                }
            }
            sector = u16::from_le_bytes([data[0], data[1]]) as usize;
        }
        Ok(map)
    }

    fn decode_dirent(raw: &[u8], file_num: usize, header: &Header) -> Dirent {
        let flags = SpartaFlags(raw[0]);
        let starting_sector = u16::from_le_bytes([raw[1], raw[2]]) as usize;
        let file_length = raw[3] as usize | (raw[4] as usize) << 8 | (raw[5] as usize) << 16;
        let basename = String::from_utf8_lossy(&raw[6..14]).trim_end().to_string();
        let ext = String::from_utf8_lossy(&raw[14..17]).trim_end().to_string();
        let filename = if flags.has(SpartaFlags::DIRECTORY) || ext.is_empty() {
            basename
        } else {
            format!("{}.{}", basename, ext)
        };
        let in_use = flags.has(SpartaFlags::IN_USE);

        Dirent {
            file_num,
            filename,
            filetype: String::new(),
            flag: flags.0,
            starting_sector,
            num_sectors: file_length.div_ceil(header.sector_size.max(1)),
            in_use,
            deleted: flags.has(SpartaFlags::DELETED),
            locked: flags.has(SpartaFlags::LOCKED),
            is_sane: !in_use || header.sector_is_valid(starting_sector),
            file_length,
        }
    }

    /// Entry describing the main directory, `None` when its map is empty
    ///
    /// The entry on disk holds the parent link where files hold their sector
    /// map, so the starting sector is taken from the boot record instead.
    pub fn root_dirent(&self, buffer: &ByteBuffer, header: &Header) -> Result<Option<Dirent>> {
        let map = Self::sector_map(buffer, header, self.boot.root_dir)?;
        let Some(&first) = map.data_sectors.first() else {
            return Ok(None);
        };
        let raw = read_sector(buffer, header, first)?;
        if raw.len() < DIRENT_SIZE {
            return Err(AtrError::invalid_disk("Directory sector too short"));
        }
        let mut dirent = Self::decode_dirent(&raw[..DIRENT_SIZE], 0, header);
        dirent.starting_sector = self.boot.root_dir;
        dirent.is_sane = true;
        if dirent.filename.is_empty() {
            dirent.filename = ROOT_NAME.to_string();
        }
        Ok(Some(dirent))
    }

    fn directory_bytes(&self, buffer: &ByteBuffer, header: &Header) -> Result<Vec<u8>> {
        match self.root_dirent(buffer, header)? {
            Some(root) => {
                let offsets = self.file_offsets(buffer, header, &root)?;
                Ok(offsets.iter().map(|&i| buffer.data()[i]).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    fn timestamp(raw: &[u8]) -> String {
        format!(
            "{}/{}/{} {}:{}:{}",
            raw[17], raw[18], raw[19], raw[20], raw[21], raw[22]
        )
    }

    fn map_segment(buffer: &mut ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Segment> {
        let map = Self::sector_map(buffer, header, dirent.starting_sector)?;
        let mut offsets = Vec::with_capacity(map.map_sectors.len() * header.sector_size);
        for &sector in &map.map_sectors {
            offsets.extend(sector_range(header, sector)?);
        }
        let segment = Segment::from_offsets(buffer, &offsets, format!("Sector Map: {}", dirent.filename))?;
        segment.set_style_ranges(buffer, &[0..segment.len()], StyleBits::data())?;
        let mut comments = Vec::new();
        for i in 0..map.map_sectors.len() {
            let base = i * header.sector_size;
            comments.push((base, "Next sector map sector".to_string()));
            comments.push((base + 2, "Previous sector map sector".to_string()));
        }
        comment_all(buffer, &segment, &comments)?;
        Ok(segment)
    }
}

impl Filesystem for SpartaDos {
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        if header.starting_sector_label != 1 {
            return Err(AtrError::invalid_disk("Not an Atari disk"));
        }
        let boot = SpartaBootInfo::from_bytes(read_sector(buffer, header, 1)?)?;
        boot.check(header)?;
        Ok(Self { boot })
    }

    fn name(&self) -> &'static str {
        "SpartaDOS"
    }

    fn is_writable(&self) -> bool {
        false
    }

    /// Free sectors from the bitmap, one bit per sector label, most
    /// significant bit first, set when free
    fn read_vtoc(&self, buffer: &ByteBuffer, header: &Header) -> Result<Vtoc> {
        let mut bits = Vec::with_capacity(self.boot.num_bitmap * header.sector_size);
        for n in 0..self.boot.num_bitmap {
            bits.extend_from_slice(read_sector(buffer, header, self.boot.first_bitmap + n)?);
        }
        let mut vtoc = Vtoc::new();
        let first = header.starting_sector_label;
        for sector in first..first + header.num_sectors() {
            let byte = bits.get(sector / 8).copied().unwrap_or(0);
            vtoc.set_free(sector, byte & (0x80 >> (sector % 8)) != 0);
        }
        Ok(vtoc)
    }

    fn encode_vtoc(&self, _vtoc: &Vtoc, _buffer: &ByteBuffer, _header: &Header) -> Result<Vec<WriteableSector>> {
        Ok(Vec::new())
    }

    fn read_directory(&self, buffer: &ByteBuffer, header: &Header) -> Result<Directory> {
        let bytes = self.directory_bytes(buffer, header)?;
        let count = bytes.len() / DIRENT_SIZE;
        let mut directory = Directory::new(count.saturating_sub(1));
        for (file_num, raw) in bytes.chunks_exact(DIRENT_SIZE).enumerate().skip(1) {
            let dirent = Self::decode_dirent(raw, file_num, header);
            if !dirent.is_sane {
                log::warn!("Invalid directory entry {}", dirent);
            }
            directory.set(dirent);
        }
        Ok(directory)
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

    fn file_sectors(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        let map = Self::sector_map(buffer, header, dirent.starting_sector)?;
        let mut sectors = map.map_sectors;
        sectors.extend(map.data_sectors);
        Ok(sectors)
    }

    fn file_offsets(&self, buffer: &ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        if !dirent.is_sane {
            return Err(AtrError::InvalidDirent(format!(
                "Invalid directory entry '{}'",
                dirent.filename
            )));
        }
        let map = Self::sector_map(buffer, header, dirent.starting_sector)?;
        let mut remaining = dirent.file_length;
        let mut offsets = Vec::with_capacity(remaining);
        for sector in map.data_sectors {
            if remaining == 0 {
                break;
            }
            let range = sector_range(header, sector)?;
            let n = remaining.min(range.len());
            offsets.extend(range.start..range.start + n);
            remaining -= n;
        }
        if remaining > 0 {
            log::warn!("{}: sector map ends {} bytes short", dirent.filename, remaining);
        }
        Ok(offsets)
    }

    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let boot = sector_range(header, 1)?;
        let origin = self.boot.boot_address;
        let info_len = BOOT_INFO_SIZE.min(boot.len());
        let info = Segment::new(buffer, boot.start, info_len, "Boot Header")?.with_origin(origin);
        info.set_style_ranges(buffer, &[0..info_len], StyleBits::data())?;
        let comments: Vec<(usize, String)> = [
            (0, "unused"),
            (1, "Number of boot sectors"),
            (2, "Boot load address"),
            (4, "Init address"),
            (6, "JMP"),
            (7, "Boot continuation address"),
            (9, "Sector map of main directory"),
            (11, "Total sectors"),
            (13, "Free sectors"),
            (15, "Number of bitmap sectors"),
            (16, "First bitmap sector"),
            (18, "Next free data sector"),
            (20, "Next free directory sector"),
            (22, "Volume name"),
            (30, "Tracks on disk"),
            (31, "Sector size"),
            (32, "Filesystem version"),
        ]
        .iter()
        .map(|&(i, t)| (i, t.to_string()))
        .collect();
        comment_all(buffer, &info, &comments)?;
        segments.push(info);

        let count = self.boot.num_boot as usize;
        if count > 0 && header.sector_is_valid(count) {
            let end = sector_range(header, count)?.end;
            segments.push(Segment::new(buffer, boot.start, end - boot.start, "Boot Sectors")?.with_origin(origin));
            segments.push(
                Segment::new(buffer, boot.start + info_len, end - boot.start - info_len, "Boot Code")?
                    .with_origin(origin.wrapping_add(info_len as u16)),
            );
        }

        let mut offsets = Vec::with_capacity(self.boot.num_bitmap * header.sector_size);
        for n in 0..self.boot.num_bitmap {
            offsets.extend(sector_range(header, self.boot.first_bitmap + n)?);
        }
        let bitmap = Segment::from_offsets(buffer, &offsets, "Bitmap")?;
        bitmap.set_style_ranges(buffer, &[0..bitmap.len()], StyleBits::data())?;
        segments.push(bitmap);

        let Some(root) = self.root_dirent(buffer, header)? else {
            return Ok(segments);
        };
        let offsets = self.file_offsets(buffer, header, &root)?;
        let directory = Segment::from_offsets(buffer, &offsets, root.filename.clone())?;
        directory.set_style_ranges(buffer, &[0..directory.len()], StyleBits::data())?;
        let mut comments = Vec::new();
        for n in 0..directory.len() / DIRENT_SIZE {
            let base = n * DIRENT_SIZE;
            for (offset, field) in [
                (0, "Status"),
                (1, "Sector map"),
                (3, "Length"),
                (6, "Filename"),
                (14, "Extension"),
                (17, "Date"),
                (20, "Time"),
            ] {
                comments.push((base + offset, format!("FILE #{}: {}", n, field)));
            }
        }
        comment_all(buffer, &directory, &comments)?;
        segments.push(directory);

        segments.push(Self::map_segment(buffer, header, &root)?);
        let entries = self.read_directory(buffer, header)?;
        for dirent in entries.iter_in_use() {
            match Self::map_segment(buffer, header, dirent) {
                Ok(segment) => segments.push(segment),
                Err(err) => log::warn!("{}: {}", dirent.filename, err),
            }
        }
        Ok(segments)
    }

    fn file_segment_names(&self, dirent: &Dirent) -> (String, String) {
        let name = format!("{} {}@{}", dirent.filename, dirent.file_length, dirent.starting_sector);
        let verbose = format!(
            "{} ({} bytes, sector map@{}) {}",
            dirent.filename,
            dirent.file_length,
            dirent.starting_sector,
            flag_list(&SpartaFlags(dirent.flag).names())
        );
        (name, verbose)
    }

    fn file_segment(&self, buffer: &mut ByteBuffer, header: &Header, dirent: &Dirent) -> Result<Segment> {
        let offsets = self.file_offsets(buffer, header, dirent)?;
        let (mut name, mut verbose_name) = self.file_segment_names(dirent);
        let entries = self.directory_bytes(buffer, header)?;
        let start = dirent.file_num * DIRENT_SIZE;
        if let Some(raw) = entries.get(start..start + DIRENT_SIZE) {
            let stamp = Self::timestamp(raw);
            name = format!("{} {}", name, stamp);
            verbose_name = format!("{} {}", verbose_name, stamp);
        }
        Ok(Segment::from_offsets(buffer, &offsets, name)?.with_verbose_name(verbose_name))
    }

    fn sub_segments(&self, buffer: &mut ByteBuffer, _dirent: &Dirent, file: &Segment) -> Vec<Segment> {
        executable_segments(buffer, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::build_xex;
    use crate::filesystem::guess;
    use crate::image::Image;
    use crate::media::AtrHeader;

    const ROOT_MAP: usize = 5;

    fn put(buffer: &mut ByteBuffer, header: &Header, sector: usize, offset: usize, bytes: &[u8]) {
        let start = sector_range(header, sector).unwrap().start + offset;
        buffer.data_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn put_map(buffer: &mut ByteBuffer, header: &Header, sector: usize, next: u16, data: &[u16]) {
        put(buffer, header, sector, 0, &next.to_le_bytes());
        for (i, s) in data.iter().enumerate() {
            put(buffer, header, sector, SECTOR_MAP_HEADER + i * 2, &s.to_le_bytes());
        }
    }

    fn entry(status: u8, map: u16, length: usize, name: &str, ext: &str) -> Vec<u8> {
        let mut raw = vec![b' '; DIRENT_SIZE];
        raw[0] = status;
        raw[1..3].copy_from_slice(&map.to_le_bytes());
        raw[3..6].copy_from_slice(&(length as u32).to_le_bytes()[..3]);
        raw[6..6 + name.len()].copy_from_slice(name.as_bytes());
        raw[14..14 + ext.len()].copy_from_slice(ext.as_bytes());
        raw[17..23].copy_from_slice(&[1, 2, 99, 12, 30, 0]);
        raw
    }

    /// Single density disk: boot in 1-3, bitmap in 4, main directory map in 5
    /// and data in 6, HELLO.TXT mapped by 7, GAME.XEX by 10
    fn disk() -> (ByteBuffer, Header, Vec<u8>, Vec<u8>) {
        let header = Header::new("ATR", 16, 92160, 128, 1);
        let mut buffer = ByteBuffer::new(vec![0; 16 + 92160]);

        let mut boot = vec![0u8; BOOT_INFO_SIZE];
        boot[1] = 3;
        boot[2..4].copy_from_slice(&0x3000u16.to_le_bytes());
        boot[9..11].copy_from_slice(&(ROOT_MAP as u16).to_le_bytes());
        boot[11..13].copy_from_slice(&720u16.to_le_bytes());
        boot[13..15].copy_from_slice(&709u16.to_le_bytes());
        boot[15] = 1;
        boot[16..18].copy_from_slice(&4u16.to_le_bytes());
        boot[18..20].copy_from_slice(&12u16.to_le_bytes());
        boot[20..22].copy_from_slice(&6u16.to_le_bytes());
        boot[22..30].copy_from_slice(b"TESTDISK");
        boot[30] = 40;
        boot[31] = 0x80;
        boot[32] = 0x20;
        put(&mut buffer, &header, 1, 0, &boot);

        let mut bitmap = vec![0u8; 128];
        for sector in 12..=720 {
            bitmap[sector / 8] |= 0x80 >> (sector % 8);
        }
        put(&mut buffer, &header, 4, 0, &bitmap);

        let hello: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let xex = build_xex(&[(0x2000, &[0xA9, 0x00, 0x60])], Some(0x2000)).unwrap();

        let mut directory = entry(0x28, 0, 4 * DIRENT_SIZE, "MAIN", "");
        directory.extend(entry(0x09, 7, hello.len(), "HELLO", "TXT"));
        directory.extend(entry(0x08, 10, xex.len(), "GAME", "XEX"));
        directory.extend(entry(0x10, 0, 50, "OLD", "DAT"));
        put_map(&mut buffer, &header, ROOT_MAP, 0, &[6]);
        put(&mut buffer, &header, 6, 0, &directory);

        put_map(&mut buffer, &header, 7, 0, &[8, 9]);
        put(&mut buffer, &header, 8, 0, &hello[..128]);
        put(&mut buffer, &header, 9, 0, &hello[128..]);
        put_map(&mut buffer, &header, 10, 0, &[11]);
        put(&mut buffer, &header, 11, 0, &xex);
        (buffer, header, hello, xex)
    }

    #[test]
    fn test_boot_info() {
        let (buffer, header, _, _) = disk();
        let fs = SpartaDos::probe(&buffer, &header).unwrap();
        assert_eq!(fs.name(), "SpartaDOS");
        assert!(!fs.is_writable());
        assert_eq!(fs.boot.volume_name, "TESTDISK");
        assert_eq!(fs.boot.root_dir, ROOT_MAP);
        assert_eq!(fs.boot.sector_size, 128);
        assert_eq!(fs.boot.fs_version, 0x20);
    }

    #[test]
    fn test_rejects_other_disks() {
        let (mut buffer, header, _, _) = disk();
        put(&mut buffer, &header, 1, 32, &[0x05]);
        assert!(matches!(
            SpartaDos::probe(&buffer, &header),
            Err(AtrError::InvalidDiskImage(_))
        ));

        let blank = ByteBuffer::new(vec![0; 16 + 92160]);
        assert!(SpartaDos::probe(&blank, &header).is_err());
    }

    #[test]
    fn test_guess_finds_spartados() {
        let (buffer, header, _, _) = disk();
        let fs = guess(&buffer, &header).unwrap().unwrap();
        assert_eq!(fs.name(), "SpartaDOS");
    }

    #[test]
    fn test_directory_listing() {
        let (buffer, header, hello, _) = disk();
        let fs = SpartaDos::probe(&buffer, &header).unwrap();
        let directory = fs.read_directory(&buffer, &header).unwrap();
        assert_eq!(directory.capacity(), 3);
        let names: Vec<_> = directory.iter_in_use().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, vec!["HELLO.TXT", "GAME.XEX"]);
        assert!(directory.get(3).unwrap().deleted);

        let dirent = directory.find("hello.txt").unwrap();
        assert_eq!(dirent.file_num, 1);
        assert_eq!(dirent.file_length, hello.len());
        assert_eq!(dirent.num_sectors, 2);
        assert!(dirent.locked);
        assert_eq!(fs.file_sectors(&buffer, &header, dirent).unwrap(), vec![7, 8, 9]);

        let info = fs.info(&buffer, &header).unwrap();
        assert_eq!(info.fs_type, "SpartaDOS");
        assert_eq!(info.free_sectors, 709);
        assert_eq!(info.num_files, 2);
    }

    #[test]
    fn test_file_contents() {
        let (mut buffer, header, hello, xex) = disk();
        let fs = SpartaDos::probe(&buffer, &header).unwrap();
        let directory = fs.read_directory(&buffer, &header).unwrap();

        let dirent = directory.find("HELLO.TXT").unwrap().clone();
        let segment = fs.file_segment(&mut buffer, &header, &dirent).unwrap();
        assert_eq!(segment.to_bytes(&buffer), hello);
        assert_eq!(segment.name, "HELLO.TXT 200@7 1/2/99 12:30:0");
        assert_eq!(
            segment.verbose_name,
            "HELLO.TXT (200 bytes, sector map@7) [IN_USE, LOCK] 1/2/99 12:30:0"
        );

        let dirent = directory.find("GAME.XEX").unwrap().clone();
        let segment = fs.file_segment(&mut buffer, &header, &dirent).unwrap();
        assert_eq!(segment.to_bytes(&buffer), xex);
        let subs = fs.sub_segments(&mut buffer, &dirent, &segment);
        assert_eq!(subs[0].origin, 0x2000);
    }

    #[test]
    fn test_metadata_segments() {
        let (mut buffer, header, _, _) = disk();
        let fs = SpartaDos::probe(&buffer, &header).unwrap();
        let segments = fs.metadata_segments(&mut buffer, &header).unwrap();
        let names: Vec<_> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Boot Header",
                "Boot Sectors",
                "Boot Code",
                "Bitmap",
                "MAIN",
                "Sector Map: MAIN",
                "Sector Map: HELLO.TXT",
                "Sector Map: GAME.XEX",
            ]
        );
        assert_eq!(segments[0].len(), BOOT_INFO_SIZE);
        assert_eq!(segments[0].origin, 0x3000);
        assert_eq!(segments[0].get_comment(&buffer, 9), Some("Sector map of main directory"));
        assert_eq!(segments[2].origin, 0x3000 + BOOT_INFO_SIZE as u16);
        assert_eq!(segments[4].len(), 4 * DIRENT_SIZE);
        assert_eq!(segments[4].get_comment(&buffer, DIRENT_SIZE + 1), Some("FILE #1: Sector map"));
        assert_eq!(segments[6].len(), 128);
        assert!(buffer.style_at(16 + 3 * 128).is_data());
    }

    #[test]
    fn test_sector_map_loop() {
        let (buffer, header, _, _) = disk();
        let mut looped = buffer.clone();
        put_map(&mut looped, &header, 7, 7, &[8, 9]);
        let fs = SpartaDos::probe(&looped, &header).unwrap();
        let directory = fs.read_directory(&looped, &header).unwrap();
        let dirent = directory.find("HELLO.TXT").unwrap();
        match fs.file_offsets(&looped, &header, dirent) {
            Err(AtrError::InvalidFile(msg)) => assert_eq!(msg, "Sector map loops back to sector 7"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_image_lists_files() {
        let (buffer, _, hello, _) = disk();
        let mut bytes = buffer.data().to_vec();
        bytes[..16].copy_from_slice(&AtrHeader::new(92160, 128).to_bytes());
        let image = Image::from_bytes(bytes).unwrap();
        assert_eq!(image.filesystem().unwrap().name(), "SpartaDOS");
        assert_eq!(image.files().len(), 2);
        assert_eq!(image.get_file("HELLO.TXT").unwrap(), hello);
        assert!(image.segment_by_name("Bitmap").is_some());
    }

    #[test]
    fn test_writes_are_refused() {
        let (buffer, header, _, _) = disk();
        let fs = SpartaDos::probe(&buffer, &header).unwrap();
        assert!(matches!(
            fs.new_dirent("NEW.TXT", ""),
            Err(AtrError::UnsupportedDiskImage(_))
        ));
    }
}
