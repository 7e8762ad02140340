/// Atari 8-bit cartridges and MAME ROM sets

use super::header::Header;
use super::{default_segments, IdentifyOptions, MediaType, SizeRule};
use crate::buffer::ByteBuffer;
use crate::container::{RomEntry, Unpacked};
use crate::error::{AtrError, Result};
use crate::segment::Segment;
use std::fmt;

/// Size of a `.car` header
pub const CART_HEADER_SIZE: usize = 16;

/// A fixed region of cartridge ROM: size and offset in K, load address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartRegion {
    /// Size in K
    pub size_kb: usize,
    /// Offset of the first (or only) bank in K
    pub offset_kb: usize,
    /// Address the region appears at
    pub origin: u16,
}

/// Cartridge type from the atari800 numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartType {
    /// atari800 type number
    pub id: u32,
    /// Name
    pub name: &'static str,
    /// Total ROM size in K
    pub size_kb: usize,
    /// Region that is always mapped
    pub main: Option<CartRegion>,
    /// Switchable bank layout
    pub banked: Option<CartRegion>,
}

const fn cart(id: u32, name: &'static str, size_kb: usize) -> CartType {
    CartType {
        id,
        name,
        size_kb,
        main: None,
        banked: None,
    }
}

const fn cart_static(id: u32, name: &'static str, size_kb: usize, origin: u16) -> CartType {
    CartType {
        id,
        name,
        size_kb,
        main: Some(CartRegion {
            size_kb,
            offset_kb: 0,
            origin,
        }),
        banked: None,
    }
}

const fn cart_banked(id: u32, name: &'static str, size_kb: usize, main_kb: usize, main_origin: u16, bank_kb: usize, bank_origin: u16) -> CartType {
    CartType {
        id,
        name,
        size_kb,
        main: Some(CartRegion {
            size_kb: main_kb,
            offset_kb: size_kb - main_kb,
            origin: main_origin,
        }),
        banked: Some(CartRegion {
            size_kb: bank_kb,
            offset_kb: 0,
            origin: bank_origin,
        }),
    }
}

/// Known cartridge types
pub const KNOWN_CARTS: &[CartType] = &[
    cart_static(1, "Standard 8K", 8, 0xa000),
    cart_static(2, "Standard 16K", 16, 0x8000),
    cart_banked(3, "OSS 16K", 16, 4, 0xb000, 4, 0xa000),
    cart_static(4, "5200 32K", 32, 0x4000),
    cart(5, "DB 32K", 32),
    cart(6, "5200 EE 16K", 16),
    cart(7, "5200 BBSB 40K", 40),
    cart(8, "WILL 64K", 64),
    cart(9, "EXP 64K", 64),
    cart(10, "DIAMOND 64K", 64),
    cart(11, "SDX 64K", 64),
    cart_banked(12, "XEGS 32K", 32, 8, 0xa000, 8, 0x8000),
    cart_banked(13, "XEGS 64K", 64, 8, 0xa000, 8, 0x8000),
    cart_banked(14, "XEGS 128K", 128, 8, 0xa000, 8, 0x8000),
    cart(15, "OSS M091 16K", 16),
    cart(16, "5200 NS 16K", 16),
    cart(17, "ATRAX 128K", 128),
    cart(18, "BBSB 40K", 40),
    cart_static(19, "5200 8K", 8, 0x8000),
    cart_static(20, "5200 4K", 4, 0x8000),
    cart(21, "RIGHT 8K", 8),
    cart(22, "WILL 32K", 32),
    cart_banked(23, "XEGS 256K", 256, 8, 0xa000, 8, 0x8000),
    cart_banked(24, "XEGS 512K", 512, 8, 0xa000, 8, 0x8000),
    cart_banked(25, "XEGS 1024K", 1024, 8, 0xa000, 8, 0x8000),
    cart(26, "MEGA 16K", 16),
    cart(27, "MEGA 32K", 32),
    cart(28, "MEGA 64K", 64),
    cart(29, "MEGA 128K", 128),
    cart(30, "MEGA 256K", 256),
    cart(31, "MEGA 512K", 512),
    cart(32, "MEGA 1024K", 1024),
    cart_banked(33, "SWXEGS 32K", 32, 8, 0xa000, 8, 0x8000),
    cart_banked(34, "SWXEGS 64K", 64, 8, 0xa000, 8, 0x8000),
    cart_banked(35, "SWXEGS 128K", 128, 8, 0xa000, 8, 0x8000),
    cart_banked(36, "SWXEGS 256K", 256, 8, 0xa000, 8, 0x8000),
    cart_banked(37, "SWXEGS 512K", 512, 8, 0xa000, 8, 0x8000),
    cart_banked(38, "SWXEGS 1024K", 1024, 8, 0xa000, 8, 0x8000),
    cart(39, "PHOENIX 8K", 8),
    cart_static(40, "BLIZZARD 16K", 16, 0x8000),
    cart(41, "ATMAX 128K", 128),
    cart(42, "ATMAX 1024K", 1024),
    cart(43, "SDX 128K", 128),
    cart(44, "OSS 8K", 8),
    cart_banked(45, "OSS 043M 16K", 16, 4, 0xb000, 4, 0xa000),
    cart(46, "BLIZZARD 4K", 4),
    cart(47, "AST 32K", 32),
    cart(48, "ATRAX SDX 64K", 64),
    cart(49, "ATRAX SDX 128K", 128),
    cart(50, "TURBOSOFT 64K", 64),
    cart(51, "TURBOSOFT 128K", 128),
    cart(52, "ULTRACART 32K", 32),
    cart_static(53, "LOW BANK 8K", 8, 0x8000),
    cart(54, "SIC 128K", 128),
    cart(55, "SIC 256K", 256),
    cart(56, "SIC 512K", 512),
    cart_static(57, "Standard 2K", 2, 0xb800),
    cart_static(58, "Standard 4K", 4, 0xb000),
    cart_static(59, "Right 4K", 4, 0x9000),
    cart(60, "TURBO HIT 32K", 32),
    cart(61, "MEGA 2048K", 2048),
    cart(62, "THECART 128M", 128 * 1024),
    cart(63, "MEGA 4096K", 4096),
    cart(64, "MEGA 2048K", 2048),
    cart(65, "THECART 32M", 32 * 1024),
    cart(66, "THECART 64M", 64 * 1024),
    cart(67, "XEGS 64K (8F)", 64),
];

impl CartType {
    /// Look up a type by atari800 number
    pub fn from_id(id: u32) -> Option<&'static CartType> {
        KNOWN_CARTS.iter().find(|c| c.id == id)
    }

    /// ROM size in bytes
    pub fn size(&self) -> usize {
        self.size_kb * 1024
    }

    /// Offsets in K of every switchable bank
    pub fn bank_offsets(&self) -> Vec<usize> {
        let (Some(banked), main_kb) = (self.banked, self.main.map_or(0, |m| m.size_kb)) else {
            return Vec::new();
        };
        let count = (self.size_kb - main_kb) / banked.size_kb;
        (0..count)
            .map(|i| banked.offset_kb + i * banked.size_kb)
            .collect()
    }
}

impl fmt::Display for CartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type {}, {}K)", self.name, self.id, self.size_kb)
    }
}

/// 16 byte `.car` header, big-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartHeader {
    /// atari800 cartridge type
    pub cart_type: u32,
    /// Sum of all ROM bytes
    pub checksum: u32,
    /// Unused
    pub unused: u32,
}

impl CartHeader {
    /// Decode from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CART_HEADER_SIZE || &bytes[0..4] != b"CART" {
            return Err(AtrError::invalid_header("no CART header"));
        }
        let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            cart_type: word(4),
            checksum: word(8),
            unused: word(12),
        })
    }

    /// Header for `rom` as type `cart_type`
    pub fn new(cart_type: u32, rom: &[u8]) -> Self {
        Self {
            cart_type,
            checksum: checksum(rom),
            unused: 0,
        }
    }

    /// Encode to 16 bytes
    pub fn to_bytes(&self) -> [u8; CART_HEADER_SIZE] {
        let mut out = [0u8; CART_HEADER_SIZE];
        out[0..4].copy_from_slice(b"CART");
        out[4..8].copy_from_slice(&self.cart_type.to_be_bytes());
        out[8..12].copy_from_slice(&self.checksum.to_be_bytes());
        out[12..16].copy_from_slice(&self.unused.to_be_bytes());
        out
    }
}

/// atari800 checksum: the sum of all ROM bytes
pub fn checksum(rom: &[u8]) -> u32 {
    rom.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}

/// Cartridge image with a `.car` header
#[derive(Debug, Clone, Copy, Default)]
pub struct AtariCart;

impl MediaType for AtariCart {
    fn pretty_name(&self) -> &'static str {
        "Atari 8bit Cart"
    }

    fn file_format(&self) -> &'static str {
        "CART"
    }

    fn expected_size(&self) -> SizeRule {
        SizeRule::Any
    }

    fn sector_size(&self) -> usize {
        0
    }

    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
        let cart = CartHeader::from_bytes(&unpacked.data)?;
        if CartType::from_id(cart.cart_type).is_none() {
            return Err(AtrError::invalid_header(format!(
                "unknown cartridge type {}",
                cart.cart_type
            )));
        }
        let mut header = Header::unsectored("CART", CART_HEADER_SIZE, unpacked.data.len() - CART_HEADER_SIZE);
        header.crc = cart.checksum;
        header.unused = cart.unused;
        Ok(header)
    }

    fn verify_data(&self, unpacked: &Unpacked, header: Header, _options: &IdentifyOptions) -> Result<Header> {
        let cart = CartHeader::from_bytes(&unpacked.data)?;
        let kind = CartType::from_id(cart.cart_type)
            .ok_or_else(|| AtrError::invalid_header("unknown cartridge type"))?;
        if header.image_size != kind.size() {
            return Err(AtrError::invalid_size(format!(
                "{} bytes doesn't match {}",
                header.image_size, kind
            )));
        }
        let sum = checksum(&unpacked.data[CART_HEADER_SIZE..]);
        if sum != cart.checksum {
            log::warn!("cartridge checksum {:#x} doesn't match header {:#x}", sum, cart.checksum);
        }
        Ok(header)
    }

    fn segments(&self, buffer: &ByteBuffer, header: &Header, _roms: &[RomEntry]) -> Result<Vec<Segment>> {
        let mut segments = default_segments(buffer, header)?;
        let cart = CartHeader::from_bytes(buffer.data())?;
        let Some(kind) = CartType::from_id(cart.cart_type) else {
            return Ok(segments);
        };
        let base = header.header_offset;
        if let Some(main) = kind.main {
            segments.push(
                Segment::new(buffer, base + main.offset_kb * 1024, main.size_kb * 1024, "Main Bank")?
                    .with_origin(main.origin)
                    .with_verbose_name(kind.name),
            );
        }
        if let Some(banked) = kind.banked {
            for (i, offset_kb) in kind.bank_offsets().into_iter().enumerate() {
                segments.push(
                    Segment::new(buffer, base + offset_kb * 1024, banked.size_kb * 1024, format!("Bank #{}", i + 1))?
                        .with_origin(banked.origin),
                );
            }
        }
        Ok(segments)
    }
}

/// ROM set unwrapped from a MAME ZIP
#[derive(Debug, Clone, Copy, Default)]
pub struct MameRomSet;

impl MediaType for MameRomSet {
    fn pretty_name(&self) -> &'static str {
        "MAME ROM Set"
    }

    fn file_format(&self) -> &'static str {
        "MAME"
    }

    fn expected_size(&self) -> SizeRule {
        SizeRule::Any
    }

    fn sector_size(&self) -> usize {
        0
    }

    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
        if unpacked.rom_entries.is_empty() {
            return Err(AtrError::invalid_header("not a MAME ROM set"));
        }
        Ok(Header::unsectored("MAME", 0, unpacked.data.len()))
    }

    fn segments(&self, buffer: &ByteBuffer, header: &Header, roms: &[RomEntry]) -> Result<Vec<Segment>> {
        let mut segments = default_segments(buffer, header)?;
        for rom in roms {
            segments.push(
                Segment::new(buffer, rom.offset, rom.size, rom.name.clone())?
                    .with_verbose_name(format!("{} (crc {:08x})", rom.name, rom.crc)),
            );
        }
        Ok(segments)
    }
}
