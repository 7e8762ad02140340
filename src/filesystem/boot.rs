/// Atari boot records, boot-only disks and KBoot executable disks
///
/// Sector 1 of every bootable Atari disk starts with a six byte record telling
/// the OS how many sectors to load and where. A boot-only disk is media with a
/// sane boot record and no DOS. A KBoot disk is three boot sectors of loader
/// code followed by a single executable.

use super::directory::{Dirent, Directory};
use super::vtoc::Vtoc;
use super::{read_only, Filesystem};
use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::executable::executable_segments;
use crate::image::sector::{read_sector, sector_range};
use crate::image::WriteableSector;
use crate::media::Header;
use crate::segment::Segment;
use crate::style::StyleBits;

/// Top of the RAM available while boot sectors load
pub const BOOT_RAM_TOP: usize = 0xC000;
/// Lowest sane boot load address
pub const BOOT_RAM_BOTTOM: usize = 0x0200;
/// Size of the boot record
pub const BOOT_HEADER_SIZE: usize = 6;

/// The first six bytes of sector 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    /// BFLAG, 0 on bootable disks
    pub flag: u8,
    /// BRCNT, sectors to load
    pub num_sectors: u8,
    /// BLDADR, load address
    pub load_address: u16,
    /// BWTARR, init address
    pub init_address: u16,
}

impl BootRecord {
    /// Decode from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BOOT_HEADER_SIZE {
            return Err(AtrError::invalid_disk("Boot sector too short"));
        }
        Ok(Self {
            flag: bytes[0],
            num_sectors: bytes[1],
            load_address: u16::from_le_bytes([bytes[2], bytes[3]]),
            init_address: u16::from_le_bytes([bytes[4], bytes[5]]),
        })
    }

    /// Decode from sector 1 of the media
    pub fn read(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        Self::from_bytes(read_sector(buffer, header, 1)?)
    }

    /// Size of the sectors the OS boots from
    pub fn sector_size(header: &Header) -> usize {
        if header.num_initial_sectors > 0 {
            header.initial_sector_size
        } else {
            header.sector_size
        }
    }

    /// Check the record describes a plausible boot
    pub fn check(&self, sector_size: usize) -> Result<()> {
        if self.flag == 0xFF && self.num_sectors == 0xFF {
            return Err(AtrError::invalid_disk("Appears to be an executable"));
        }
        let load = self.load_address as usize;
        let max_sectors = BOOT_RAM_TOP.saturating_sub(load) / sector_size.max(1);
        let count = self.num_sectors as usize;
        if count < 1 || count > max_sectors {
            return Err(AtrError::invalid_disk(format!(
                "Number of boot sectors out of range (tried {}, max={})",
                count, max_sectors
            )));
        }
        if load < BOOT_RAM_BOTTOM || load > BOOT_RAM_TOP - count * sector_size {
            return Err(AtrError::invalid_disk("Bad boot load address"));
        }
        Ok(())
    }

    /// Boot sectors, boot header and boot code segments
    ///
    /// Produces nothing unless BFLAG is 0 and the sector count fits on the
    /// media. The header bytes are styled as data and commented.
    pub fn segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        let count = self.num_sectors as usize;
        if self.flag != 0 || count == 0 || !header.sector_is_valid(count) {
            return Ok(Vec::new());
        }
        let start = sector_range(header, 1)?.start;
        let end = sector_range(header, count)?.end;
        let origin = self.load_address;

        let sectors = Segment::new(buffer, start, end - start, "Boot Sectors")?.with_origin(origin);
        let boot_header = Segment::new(buffer, start, BOOT_HEADER_SIZE, "Boot Header")?.with_origin(origin);
        let code = Segment::new(
            buffer,
            start + BOOT_HEADER_SIZE,
            end - start - BOOT_HEADER_SIZE,
            "Boot Code",
        )?
        .with_origin(origin.wrapping_add(BOOT_HEADER_SIZE as u16));

        boot_header.set_style_ranges(buffer, &[0..BOOT_HEADER_SIZE], StyleBits::data())?;
        for (index, text) in [
            (0, "Boot flag"),
            (1, "Number of boot sectors"),
            (2, "Boot load address"),
            (4, "Init address"),
        ] {
            boot_header.set_comment(buffer, index..index + 1, text)?;
        }
        Ok(vec![sectors, boot_header, code])
    }
}

/// Media that boots but has no DOS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtariBootDisk {
    /// Boot record from sector 1
    pub record: BootRecord,
}

impl Filesystem for AtariBootDisk {
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        if header.starting_sector_label != 1 {
            return Err(AtrError::invalid_disk("Not an Atari disk"));
        }
        let record = BootRecord::read(buffer, header)?;
        record.check(BootRecord::sector_size(header))?;
        Ok(Self { record })
    }

    fn name(&self) -> &'static str {
        "Atari Boot Disk"
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

    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        self.record.segments(buffer, header)
    }
}

/// Name of the single file on a KBoot disk
pub const KBOOT_FILENAME: &str = "KBOOT.XEX";
/// Sector holding the first byte of the executable
pub const KBOOT_FIRST_SECTOR: usize = 4;
/// Offset in sector 1 of the 24-bit executable length
pub const KBOOT_LENGTH_OFFSET: usize = 9;

/// Boot loader followed by one executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KBoot {
    /// Absolute offset of the first executable byte
    pub exe_start: usize,
    /// Executable length in bytes
    pub exe_size: usize,
}

impl KBoot {
    fn locate(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        if header.starting_sector_label != 1 || header.sector_size != 128 {
            return Err(AtrError::invalid_disk("KBoot images use 128 byte sectors"));
        }
        let boot = read_sector(buffer, header, 1)?;
        let i = KBOOT_LENGTH_OFFSET;
        let exe_size = boot[i] as usize | (boot[i + 1] as usize) << 8 | (boot[i + 2] as usize) << 16;
        let exe_start = sector_range(header, KBOOT_FIRST_SECTOR)?.start;
        let end = header.payload_range().end;
        let exe_end = exe_start + exe_size;
        if exe_size == 0 || exe_end > end || exe_end + 128 < end {
            return Err(AtrError::invalid_disk("Doesn't seem to be KBoot header"));
        }
        Ok(Self { exe_start, exe_size })
    }
}

impl Filesystem for KBoot {
    fn probe(buffer: &ByteBuffer, header: &Header) -> Result<Self> {
        let record = BootRecord::read(buffer, header)?;
        if record.flag != 0 {
            return Err(AtrError::invalid_disk("KBoot disks have a zero boot flag"));
        }
        Self::locate(buffer, header)
    }

    fn name(&self) -> &'static str {
        "KBoot"
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
        let mut dirent = Dirent::new(KBOOT_FILENAME, "", 0x60);
        dirent.locked = true;
        dirent.starting_sector = KBOOT_FIRST_SECTOR;
        dirent.num_sectors = self.exe_size / 128 + 1;
        dirent.file_length = self.exe_size;
        let mut directory = Directory::new(1);
        directory.set(dirent);
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

    fn file_sectors(&self, _buffer: &ByteBuffer, _header: &Header, dirent: &Dirent) -> Result<Vec<usize>> {
        Ok((dirent.starting_sector..dirent.starting_sector + dirent.num_sectors).collect())
    }

    fn file_offsets(&self, buffer: &ByteBuffer, header: &Header, _dirent: &Dirent) -> Result<Vec<usize>> {
        let current = Self::locate(buffer, header)?;
        Ok((current.exe_start..current.exe_start + current.exe_size).collect())
    }

    fn metadata_segments(&self, buffer: &mut ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
        BootRecord::read(buffer, header)?.segments(buffer, header)
    }

    fn file_segment_names(&self, dirent: &Dirent) -> (String, String) {
        (
            "KBoot Executable".to_string(),
            format!("{} ({} bytes)", dirent.filename, dirent.file_length),
        )
    }

    fn sub_segments(&self, buffer: &mut ByteBuffer, _dirent: &Dirent, file: &Segment) -> Vec<Segment> {
        executable_segments(buffer, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::build_xex;

    fn disk(boot: &[u8]) -> (ByteBuffer, Header) {
        let header = Header::new("ATR", 16, 92160, 128, 1);
        let mut data = vec![0; 16 + 92160];
        data[16..16 + boot.len()].copy_from_slice(boot);
        (ByteBuffer::new(data), header)
    }

    #[test]
    fn test_boot_record_checks() {
        let ok = BootRecord::from_bytes(&[0, 3, 0x00, 0x07, 0x40, 0x15]).unwrap();
        assert_eq!(ok.load_address, 0x0700);
        assert!(ok.check(128).is_ok());

        let exe = BootRecord::from_bytes(&[0xFF, 0xFF, 0, 0x20, 0, 0]).unwrap();
        match exe.check(128) {
            Err(AtrError::InvalidDiskImage(msg)) => assert_eq!(msg, "Appears to be an executable"),
            other => panic!("unexpected {:?}", other),
        }

        let none = BootRecord::from_bytes(&[0, 0, 0x00, 0x07, 0, 0]).unwrap();
        match none.check(128) {
            Err(AtrError::InvalidDiskImage(msg)) => {
                assert!(msg.starts_with("Number of boot sectors out of range (tried 0"))
            }
            other => panic!("unexpected {:?}", other),
        }

        let low = BootRecord::from_bytes(&[0, 1, 0x00, 0x01, 0, 0]).unwrap();
        assert!(matches!(low.check(128), Err(AtrError::InvalidDiskImage(_))));

        let high = BootRecord::from_bytes(&[0, 4, 0x00, 0xBF, 0, 0]).unwrap();
        match high.check(128) {
            Err(AtrError::InvalidDiskImage(msg)) => assert!(msg.starts_with("Number of boot sectors")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_boot_disk_segments() {
        let (mut buffer, header) = disk(&[0, 3, 0x00, 0x07, 0x40, 0x15]);
        let fs = AtariBootDisk::probe(&buffer, &header).unwrap();
        assert!(!fs.is_writable());
        let segments = fs.metadata_segments(&mut buffer, &header).unwrap();
        let names: Vec<_> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Boot Sectors", "Boot Header", "Boot Code"]);
        assert_eq!(segments[0].len(), 384);
        assert_eq!(segments[1].origin, 0x0700);
        assert_eq!(segments[2].origin, 0x0706);
        assert_eq!(segments[2].len(), 378);
        assert_eq!(segments[1].get_comment(&buffer, 1), Some("Number of boot sectors"));
        assert!(buffer.style_at(16).is_data());
    }

    #[test]
    fn test_boot_disk_rejects_executable() {
        let (buffer, header) = disk(&[0xFF, 0xFF, 0x00, 0x20, 0x03, 0x20]);
        assert!(matches!(
            AtariBootDisk::probe(&buffer, &header),
            Err(AtrError::InvalidDiskImage(_))
        ));
    }

    #[test]
    fn test_kboot() {
        let xex = build_xex(&[(0x2000, &[0xEA; 300])], Some(0x2000)).unwrap();
        let mut boot = vec![0u8; 384];
        boot[..6].copy_from_slice(&[0, 3, 0x00, 0x07, 0x0D, 0x07]);
        boot[9] = xex.len() as u8;
        boot[10] = (xex.len() >> 8) as u8;
        let sectors = (xex.len() + 127) / 128;
        let size = (3 + sectors) * 128;
        let header = Header::new("ATR", 16, size, 128, 1);
        let mut data = vec![0u8; 16 + size];
        data[16..16 + 384].copy_from_slice(&boot);
        data[16 + 384..16 + 384 + xex.len()].copy_from_slice(&xex);
        let mut buffer = ByteBuffer::new(data);

        let fs = KBoot::probe(&buffer, &header).unwrap();
        assert_eq!(fs.exe_size, xex.len());
        let directory = fs.read_directory(&buffer, &header).unwrap();
        let dirent = directory.find("kboot.xex").unwrap().clone();
        let file = fs.file_segment(&mut buffer, &header, &dirent).unwrap();
        assert_eq!(file.to_bytes(&buffer), xex);
        let subs = fs.sub_segments(&mut buffer, &dirent, &file);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].origin, 0x2000);
        assert_eq!(subs[1].name, "Run Address");
    }

    #[test]
    fn test_kboot_bad_length() {
        let (buffer, header) = disk(&[0, 3, 0x00, 0x07, 0x0D, 0x07, 0, 0, 0, 0x10, 0, 0]);
        assert!(matches!(
            KBoot::probe(&buffer, &header),
            Err(AtrError::InvalidDiskImage(_))
        ));
    }
}
