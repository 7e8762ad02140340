/// Media type identification
///
/// Each media type knows its header layout, its size rules and how sectors map
/// to buffer offsets. The registry tries them in order and falls back to raw
/// data when nothing matches.

/// Apple II disk images
pub mod apple;
/// Atari 8-bit disk images (ATR and XFD)
pub mod atari;
/// Cartridges and ROM sets
pub mod cart;
/// Geometry record and ATR header codec
pub mod header;

pub use apple::AppleDsk;
pub use atari::{AtrMedia, XfdMedia};
pub use cart::{AtariCart, CartHeader, CartType, MameRomSet, KNOWN_CARTS};
pub use header::{AtrHeader, Header, ATR_HEADER_SIZE, ATR_MAGIC};

use crate::buffer::ByteBuffer;
use crate::container::{RomEntry, Unpacked};
use crate::error::{AtrError, Result};
use crate::segment::Segment;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Allowed payload sizes for a media type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// Exactly this many bytes
    Exact(usize),
    /// Fewer than this many bytes
    LessThan(usize),
    /// More than this many bytes
    GreaterThan(usize),
    /// One of a fixed set of sizes
    OneOf(&'static [usize]),
    /// Any size
    Any,
}

impl SizeRule {
    /// Check a payload size against the rule
    pub fn accepts(&self, size: usize) -> bool {
        match *self {
            SizeRule::Exact(n) => size == n,
            SizeRule::LessThan(n) => size < n,
            SizeRule::GreaterThan(n) => size > n,
            SizeRule::OneOf(sizes) => sizes.contains(&size),
            SizeRule::Any => true,
        }
    }
}

impl fmt::Display for SizeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeRule::Exact(n) => write!(f, "{}", n),
            SizeRule::LessThan(n) => write!(f, "< {}", n),
            SizeRule::GreaterThan(n) => write!(f, "> {}", n),
            SizeRule::OneOf(sizes) => write!(f, "one of {:?}", sizes),
            SizeRule::Any => write!(f, "any"),
        }
    }
}

/// Options controlling identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyOptions {
    /// Only accept headerless images of well known sizes
    pub strict: bool,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self { strict: true }
    }
}

/// A kind of media that can be recognised in unwrapped bytes
pub trait MediaType: Send + Sync + fmt::Debug {
    /// Display name, e.g. "Atari SD (90K) Floppy Disk Image"
    fn pretty_name(&self) -> &'static str;

    /// Format tag stored in the [`Header`]
    fn file_format(&self) -> &'static str;

    /// Payload size rule
    fn expected_size(&self) -> SizeRule;

    /// Sector size in bytes; 0 for media without sectors
    fn sector_size(&self) -> usize;

    /// Label of the first sector
    fn starting_sector_label(&self) -> usize {
        1
    }

    /// Parse and check any header, returning the geometry it implies
    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header>;

    /// Check the payload against the size rules
    fn verify_data(&self, unpacked: &Unpacked, header: Header, options: &IdentifyOptions) -> Result<Header> {
        let _ = (unpacked, options);
        let rule = self.expected_size();
        if !rule.accepts(header.image_size) {
            return Err(AtrError::invalid_size(format!(
                "{} bytes, expected {}",
                header.image_size, rule
            )));
        }
        if header.sector_size > 0 {
            let initial = header.num_initial_sectors * header.initial_sector_size;
            if header.image_size < initial || (header.image_size - initial) % header.sector_size != 0 {
                return Err(AtrError::invalid_size(format!(
                    "{} bytes is not a whole number of {} byte sectors",
                    header.image_size, header.sector_size
                )));
            }
        }
        Ok(header)
    }

    /// Segments describing the media itself: header, raw payload and any
    /// media specific regions
    fn segments(&self, buffer: &ByteBuffer, header: &Header, roms: &[RomEntry]) -> Result<Vec<Segment>> {
        let _ = roms;
        default_segments(buffer, header)
    }
}

/// Header segment (if any) followed by a segment over the whole payload
pub fn default_segments(buffer: &ByteBuffer, header: &Header) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    if header.header_offset > 0 {
        segments.push(Segment::new(
            buffer,
            0,
            header.header_offset,
            format!("{} Header", header.file_format),
        )?);
    }
    let name = if header.has_sectors() {
        "Raw disk sectors"
    } else {
        "Raw data"
    };
    let payload = header.payload_range();
    segments.push(Segment::new(buffer, payload.start, payload.len(), name)?);
    Ok(segments)
}

/// Fallback for bytes no media type accepted
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMedia;

impl MediaType for RawMedia {
    fn pretty_name(&self) -> &'static str {
        "Raw Data"
    }

    fn file_format(&self) -> &'static str {
        "RAW"
    }

    fn expected_size(&self) -> SizeRule {
        SizeRule::Any
    }

    fn sector_size(&self) -> usize {
        0
    }

    fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
        Ok(Header::unsectored("RAW", 0, unpacked.data.len()))
    }
}

/// Identified media: the descriptor that matched plus its geometry
#[derive(Debug, Clone)]
pub struct Media {
    kind: Arc<dyn MediaType>,
    /// Geometry
    pub header: Header,
}

impl Media {
    /// Pair a descriptor with a geometry
    pub fn new(kind: Arc<dyn MediaType>, header: Header) -> Self {
        Self { kind, header }
    }

    /// Raw fallback covering all of `data`
    pub fn raw(data_len: usize) -> Self {
        Self {
            kind: Arc::new(RawMedia),
            header: Header::unsectored("RAW", 0, data_len),
        }
    }

    /// Descriptor that matched
    pub fn kind(&self) -> &dyn MediaType {
        self.kind.as_ref()
    }

    /// Display name of the media type
    pub fn pretty_name(&self) -> &'static str {
        self.kind.pretty_name()
    }

    /// Number of sectors
    pub fn num_sectors(&self) -> usize {
        self.header.num_sectors()
    }

    /// Check if a sector label exists
    pub fn sector_is_valid(&self, sector: usize) -> bool {
        self.header.sector_is_valid(sector)
    }

    /// Absolute buffer offset and size of a sector
    pub fn get_index_of_sector(&self, sector: usize) -> Result<(usize, usize)> {
        self.header.get_index_of_sector(sector)
    }

    /// Media level segments
    pub fn segments(&self, buffer: &ByteBuffer, roms: &[RomEntry]) -> Result<Vec<Segment>> {
        self.kind.segments(buffer, &self.header, roms)
    }
}

/// Ordered list of media types
#[derive(Debug, Clone)]
pub struct MediaRegistry {
    media: Vec<Arc<dyn MediaType>>,
}

impl Default for MediaRegistry {
    fn default() -> Self {
        let media: Vec<Arc<dyn MediaType>> = vec![
            Arc::new(MameRomSet),
            Arc::new(AtariCart),
            Arc::new(AtrMedia::SINGLE_DENSITY),
            Arc::new(AtrMedia::SINGLE_DENSITY_SHORT),
            Arc::new(AtrMedia::ENHANCED_DENSITY),
            Arc::new(AtrMedia::DOUBLE_DENSITY),
            Arc::new(AtrMedia::DOUBLE_DENSITY_SHORT_BOOT),
            Arc::new(AtrMedia::DOUBLE_DENSITY_HARD_DRIVE),
            Arc::new(AppleDsk),
            Arc::new(XfdMedia),
        ];
        Self { media }
    }
}

impl MediaRegistry {
    /// Create a registry with no media types
    pub fn new() -> Self {
        Self { media: Vec::new() }
    }

    /// Append a media type; it is tried after the existing ones
    pub fn register(&mut self, media: Arc<dyn MediaType>) {
        self.media.push(media);
    }

    /// Pretty names in probe order
    pub fn names(&self) -> Vec<&'static str> {
        self.media.iter().map(|m| m.pretty_name()).collect()
    }

    /// Find the first media type that accepts both header and data
    ///
    /// Header and size mismatches move on to the next candidate. Unsupported
    /// formats stop the search. Nothing matching gives [`RawMedia`].
    pub fn guess(&self, unpacked: &Unpacked, options: &IdentifyOptions) -> Result<Media> {
        for media in &self.media {
            let verified = media
                .verify_header(unpacked)
                .and_then(|header| media.verify_data(unpacked, header, options));
            match verified {
                Ok(header) => {
                    log::info!("identified {}", media.pretty_name());
                    return Ok(Media::new(Arc::clone(media), header));
                }
                Err(e) if e.is_probe_miss() => {
                    log::debug!("not {}: {}", media.pretty_name(), e);
                }
                Err(e) => return Err(e),
            }
        }
        log::info!("no media type matched, using raw data");
        Ok(Media::raw(unpacked.data.len()))
    }
}

static REGISTRY: OnceLock<RwLock<MediaRegistry>> = OnceLock::new();

/// Process wide media registry
pub fn registry() -> &'static RwLock<MediaRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(MediaRegistry::default()))
}

/// Add a media type to the process wide registry
pub fn register(media: Arc<dyn MediaType>) {
    let mut registry = registry().write().unwrap_or_else(|e| e.into_inner());
    registry.register(media);
}

/// Identify media using the process wide registry
pub fn guess(unpacked: &Unpacked, options: &IdentifyOptions) -> Result<Media> {
    let registry = registry().read().unwrap_or_else(|e| e.into_inner());
    registry.guess(unpacked, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atr_bytes(image_size: usize, sector_size: u16) -> Vec<u8> {
        let mut data = AtrHeader::new(image_size, sector_size).to_bytes().to_vec();
        data.resize(ATR_HEADER_SIZE + image_size, 0);
        data
    }

    fn guess_name(data: Vec<u8>) -> &'static str {
        MediaRegistry::default()
            .guess(&Unpacked::uncompressed(data), &IdentifyOptions::default())
            .unwrap()
            .pretty_name()
    }

    #[test]
    fn test_registry_order() {
        let names = MediaRegistry::default().names();
        assert_eq!(names[0], "MAME ROM Set");
        assert_eq!(names[2], "Atari SD (90K) Floppy Disk Image");
        assert_eq!(names[9], "Atari XFD Floppy Disk Image");
    }

    #[test]
    fn test_guess_atr_family() {
        assert_eq!(guess_name(atr_bytes(92160, 128)), "Atari SD (90K) Floppy Disk Image");
        assert_eq!(guess_name(atr_bytes(133120, 128)), "Atari ED (130K) Floppy Disk Image");
        assert_eq!(guess_name(atr_bytes(184320, 256)), "Atari DD (180K) Floppy Disk Image");
        assert_eq!(
            guess_name(atr_bytes(183936, 256)),
            "Atari DD (180K) Floppy Disk Image (Short Boot Sectors)"
        );
        assert_eq!(guess_name(atr_bytes(256 * 2048, 256)), "Atari DD Hard Drive Image");
        assert_eq!(guess_name(atr_bytes(128 * 100, 128)), "Atari SD Non-Standard Image");
    }

    #[test]
    fn test_guess_headerless() {
        assert_eq!(guess_name(vec![0; 143360]), "Apple ][ Floppy Disk Image (16 sector tracks)");
        assert_eq!(guess_name(vec![0; 92160]), "Atari XFD Floppy Disk Image");
        assert_eq!(guess_name(vec![0; 1000]), "Raw Data");
    }

    #[test]
    fn test_lenient_xfd() {
        let unpacked = Unpacked::uncompressed(vec![0; 128 * 50]);
        let registry = MediaRegistry::default();
        let strict = registry.guess(&unpacked, &IdentifyOptions::default()).unwrap();
        assert_eq!(strict.pretty_name(), "Raw Data");
        let lenient = registry
            .guess(&unpacked, &IdentifyOptions { strict: false })
            .unwrap();
        assert_eq!(lenient.pretty_name(), "Atari XFD Floppy Disk Image");
        assert_eq!(lenient.num_sectors(), 50);
    }

    #[test]
    fn test_register_extends_registry() {
        #[derive(Debug)]
        struct Tiny;
        impl MediaType for Tiny {
            fn pretty_name(&self) -> &'static str {
                "Tiny"
            }
            fn file_format(&self) -> &'static str {
                "TINY"
            }
            fn expected_size(&self) -> SizeRule {
                SizeRule::Exact(7)
            }
            fn sector_size(&self) -> usize {
                0
            }
            fn verify_header(&self, unpacked: &Unpacked) -> Result<Header> {
                Ok(Header::unsectored("TINY", 0, unpacked.data.len()))
            }
        }

        let mut registry = MediaRegistry::new();
        registry.register(Arc::new(Tiny));
        let media = registry
            .guess(&Unpacked::uncompressed(vec![0; 7]), &IdentifyOptions::default())
            .unwrap();
        assert_eq!(media.pretty_name(), "Tiny");
        let media = registry
            .guess(&Unpacked::uncompressed(vec![0; 8]), &IdentifyOptions::default())
            .unwrap();
        assert_eq!(media.pretty_name(), "Raw Data");
    }

    #[test]
    fn test_default_segments() {
        let data = atr_bytes(92160, 128);
        let buffer = ByteBuffer::new(data.clone());
        let media = MediaRegistry::default()
            .guess(&Unpacked::uncompressed(data), &IdentifyOptions::default())
            .unwrap();
        let segments = media.segments(&buffer, &[]).unwrap();
        assert_eq!(segments[0].name, "ATR Header");
        assert_eq!(segments[0].len(), 16);
        assert_eq!(segments[1].name, "Raw disk sectors");
        assert_eq!(segments[1].len(), 92160);
    }
}
