/// Integration tests for atrcopy

use atrcopy::container::Compression;
use atrcopy::executable::build_xex;
use atrcopy::filesystem::Vtoc;
use atrcopy::media::cart::{CartHeader, CART_HEADER_SIZE};
use atrcopy::media::AtrHeader;
use atrcopy::*;
use proptest::prelude::*;
use std::io::{Cursor, Write};

const SD_HEADER: [u8; 16] = [
    0x96, 0x02, 0x80, 0x16, 0x80, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

fn sd_bytes() -> Vec<u8> {
    let mut bytes = SD_HEADER.to_vec();
    bytes.resize(16 + 92160, 0);
    bytes
}

fn free_sectors(image: &Image) -> usize {
    image.info().expect("filesystem").free_sectors
}

#[test]
fn test_identify_single_density_atr() {
    let image = Image::from_bytes(sd_bytes()).expect("Failed to identify image");
    assert_eq!(image.media().pretty_name(), "Atari SD (90K) Floppy Disk Image");
    assert_eq!(image.header().num_sectors(), 720);
    assert_eq!(image.header().get_index_of_sector(1).unwrap(), (16, 128));
}

#[test]
fn test_malformed_atr_is_raw_data() {
    let mut bytes = sd_bytes();
    bytes[0] = 0x00;
    let image = Image::from_bytes(bytes).expect("Raw data is always accepted");
    assert_eq!(image.media().pretty_name(), "Raw Data");
    assert!(image.filesystem().is_none());
}

#[test]
fn test_dcm_recognised_but_unsupported() {
    let mut bytes = vec![0xF9, 0x21];
    bytes.resize(256, 0);
    match Image::from_bytes(bytes) {
        Err(AtrError::UnsupportedContainer(msg)) => assert_eq!(msg, "DCM archives are not yet supported"),
        other => panic!("Expected UnsupportedContainer, got {:?}", other.map(|i| i.describe())),
    }
}

#[test]
fn test_dcm_wrong_pass_order() {
    let mut bytes = vec![0xF9, 0x22];
    bytes.resize(256, 0);
    match Image::from_bytes(bytes) {
        Err(AtrError::InvalidContainer(msg)) => {
            assert_eq!(msg, "DCM multi-file archive combined in the wrong order")
        }
        other => panic!("Expected InvalidContainer, got {:?}", other.map(|i| i.describe())),
    }
}

#[test]
fn test_segment_subset_writes_through() {
    let mut buffer = ByteBuffer::new((0..100u8).collect());
    let segment = Segment::new(&buffer, 0, 100, "all").unwrap();
    let subset = segment.subset(&[0, 2, 4, 6, 8]).unwrap();
    assert_eq!(subset.to_bytes(&buffer), vec![0, 2, 4, 6, 8]);

    subset.set(&mut buffer, 3, 0xAA).unwrap();
    assert_eq!(buffer.data()[6], 0xAA);
    assert_eq!(segment.get(&buffer, 6).unwrap(), 0xAA);
}

#[test]
fn test_write_delete_preserves_bytes() {
    let mut image = ImageBuilder::new().build().unwrap();
    let before = image.buffer().data().to_vec();
    let vtoc_range = 16 + 359 * 128..16 + 360 * 128;
    let directory_range = 16 + 360 * 128..16 + 368 * 128;

    image.write_file("FOO", "", &[0x55; 200]).unwrap();
    let dirent = image.find_file("FOO").unwrap().clone();
    let fs = image.filesystem().unwrap();
    let touched: Vec<usize> = fs.file_sectors(image.buffer(), image.header(), &dirent).unwrap();
    assert_eq!(touched.len(), 2);

    image.delete_file("FOO").unwrap();
    let after = image.buffer().data();
    assert_eq!(&after[vtoc_range.clone()], &before[vtoc_range]);

    let sector_ranges: Vec<_> = touched
        .iter()
        .map(|&s| image.header().get_index_of_sector(s).unwrap())
        .map(|(start, size)| start..start + size)
        .collect();
    for (i, (a, b)) in after.iter().zip(&before).enumerate() {
        if a != b {
            assert!(
                directory_range.contains(&i) || sector_ranges.iter().any(|r| r.contains(&i)),
                "unexpected change at offset {}",
                i
            );
        }
    }
}

#[test]
fn test_save_and_reopen() {
    let path = std::env::temp_dir().join(format!("atrcopy-it-{}.atr", uuid::Uuid::new_v4()));
    let mut image = ImageBuilder::new().format(DiskFormat::AtariDos2Ed).build().unwrap();
    image.write_file("GAME.XEX", "", &build_xex(&[(0x2000, &[0xA9, 0x00, 0x60])], Some(0x2000)).unwrap()).unwrap();
    image.save(&path).unwrap();
    assert!(!image.is_changed());

    let reopened = Image::open(&path).unwrap();
    assert_eq!(reopened.media().pretty_name(), "Atari ED (130K) Floppy Disk Image");
    assert_eq!(reopened.files().len(), 1);
    assert_eq!(reopened.get_file("game.xex").unwrap(), image.get_file("GAME.XEX").unwrap());
    assert!(reopened.segments().iter().any(|s| s.origin == 0x2000));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_apple_dos33_files() {
    let mut image = ImageBuilder::new().format(DiskFormat::AppleDos33).build().unwrap();
    let free = free_sectors(&image);
    let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
    image.write_file("HELLO", "T", &data).unwrap();
    // 4 data sectors and one track/sector list
    assert_eq!(free_sectors(&image), free - 5);

    let contents = image.get_file("HELLO").unwrap();
    assert_eq!(&contents[..1000], &data[..]);
    image.delete_file("HELLO").unwrap();
    assert_eq!(free_sectors(&image), free);
}

#[test]
fn test_apple_vtoc_limits_ts_pairs() {
    let mut image = ImageBuilder::new().format(DiskFormat::AppleDos33).build().unwrap();
    image.buffer_mut().data_mut()[17 * 16 * 256 + 0x27] = 10;
    image.refresh().unwrap();
    let data: Vec<u8> = (0..5120u32).map(|i| (i % 253) as u8).collect();
    image.write_file("BIG", "B", &data).unwrap();
    assert_eq!(image.get_file("BIG").unwrap(), data);
}

#[test]
fn test_lzma_container_roundtrip() {
    let mut plain = ImageBuilder::new().build().unwrap();
    plain.write_file("README", "", b"packed").unwrap();
    let mut packed = Vec::new();
    lzma_rs::lzma_compress(&mut &plain.buffer().data()[..], &mut packed).unwrap();

    let image = Image::from_bytes(packed).unwrap();
    assert_eq!(image.compression(), Compression::Lzma);
    assert_eq!(image.filesystem().unwrap().name(), "Atari DOS 2");
    assert_eq!(image.get_file("README").unwrap(), b"packed");

    let repacked = Image::from_bytes(image.to_bytes().unwrap()).unwrap();
    assert_eq!(repacked.buffer().data(), plain.buffer().data());
}

#[test]
fn test_mame_zip_rom_set() {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("low.rom", options).unwrap();
    zip.write_all(&[0x11; 64]).unwrap();
    zip.start_file("high.rom", options).unwrap();
    zip.write_all(&[0x22; 32]).unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    let image = Image::from_bytes(bytes).unwrap();
    assert_eq!(image.media().pretty_name(), "MAME ROM Set");
    assert_eq!(image.compression(), Compression::MameZip);
    assert_eq!(image.rom_entries().len(), 2);
    assert_eq!(image.rom_entries()[1].offset, 64);
    assert_eq!(image.buffer().len(), 96);
    assert!(image.to_bytes().is_err());
}

#[test]
fn test_standard_cartridge() {
    let rom = vec![0xEA; 8192];
    let mut bytes = CartHeader::new(1, &rom).to_bytes().to_vec();
    assert_eq!(bytes.len(), CART_HEADER_SIZE);
    bytes.extend_from_slice(&rom);

    let image = Image::from_bytes(bytes).unwrap();
    assert_eq!(image.media().pretty_name(), "Atari 8bit Cart");
    let main = image.segment_by_name("Main Bank").unwrap();
    assert_eq!(main.origin, 0xA000);
    assert_eq!(main.len(), 8192);
}

#[test]
fn test_metadata_sidecar_roundtrip() {
    let image_path = std::env::temp_dir().join(format!("atrcopy-meta-{}.atr", uuid::Uuid::new_v4()));
    let sidecar = metadata::sidecar_path(&image_path);
    let mut image = ImageBuilder::new().build().unwrap();
    let vtoc = image.segment_by_name("VTOC").unwrap().clone();
    vtoc.set_comment(image.buffer_mut(), 0..1, "DOS code").unwrap();
    Metadata::from_buffer(image.buffer(), vec![(0x2E0, "RUNAD".to_string())]).save(&sidecar).unwrap();

    let mut fresh = ImageBuilder::new().build().unwrap();
    let loaded = Metadata::load(&sidecar).unwrap();
    assert_eq!(loaded.memory_map, vec![(0x2E0, "RUNAD".to_string())]);
    loaded.apply(fresh.buffer_mut()).unwrap();
    let vtoc = fresh.segment_by_name("VTOC").unwrap();
    assert_eq!(vtoc.get_comment(fresh.buffer(), 0), Some("DOS code"));
    std::fs::remove_file(&sidecar).unwrap();
}

#[test]
fn test_error_handling() {
    let mut image = ImageBuilder::new().build().unwrap();
    assert!(matches!(image.get_file("NOPE"), Err(AtrError::FileNotFound(_))));
    assert!(matches!(image.delete_file("NOPE"), Err(AtrError::FileNotFound(_))));
    assert!(matches!(image.read_sector(721), Err(AtrError::InvalidSector(721))));

    let too_big = vec![0; 800 * 125];
    let before = image.buffer().data().to_vec();
    assert!(matches!(
        image.write_file("BIG", "", &too_big),
        Err(AtrError::NotEnoughSpaceOnDisk { .. })
    ));
    assert_eq!(image.buffer().data(), &before[..]);

    let raw = Image::from_bytes(vec![0; 1000]).unwrap();
    assert!(matches!(raw.info(), Err(AtrError::UnsupportedDiskImage(_))));
}

fn sd_free_after_write(len: usize) -> (usize, usize, Vec<u8>, Image) {
    let mut image = ImageBuilder::new().build().unwrap();
    let before = free_sectors(&image);
    let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
    image.write_file("DATA.BIN", "", &data).unwrap();
    (before, free_sectors(&image), data, image)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_style_ranges_cover_set_range(start in 0usize..64, len in 0usize..64, bits in 1u8..8) {
        let end = (start + len).min(64);
        let mut buffer = ByteBuffer::new(vec![0; 64]);
        let segment = Segment::new(&buffer, 0, 64, "all").unwrap();
        let style = StyleBits(bits << 4);
        segment.set_style_ranges(&mut buffer, &[start..end], style).unwrap();
        let ranges = segment.get_style_ranges(&buffer, style);
        for i in start..end {
            prop_assert!(ranges.iter().any(|r| r.contains(&i)));
        }
    }

    #[test]
    fn prop_fixup_comments_idempotent(
        styles in proptest::collection::vec(any::<u8>(), 32),
        comments in proptest::collection::vec((0usize..40, "[a-z]{1,8}"), 0..6),
    ) {
        let mut buffer = ByteBuffer::new(vec![0; 32]);
        buffer.style_mut().copy_from_slice(&styles);
        for (index, text) in comments {
            buffer.set_comment(index, text);
        }
        buffer.fixup_comments();
        let once = (buffer.style().to_vec(), buffer.comments().clone());
        buffer.fixup_comments();
        prop_assert_eq!(once, (buffer.style().to_vec(), buffer.comments().clone()));
    }

    #[test]
    fn prop_contiguous_get_matches_buffer(
        data in proptest::collection::vec(any::<u8>(), 1..200),
        start_frac in 0.0f64..1.0,
    ) {
        let start = ((data.len() - 1) as f64 * start_frac) as usize;
        let len = data.len() - start;
        let buffer = ByteBuffer::new(data.clone());
        let segment = Segment::new(&buffer, start, len, "s").unwrap();
        for i in 0..len {
            prop_assert_eq!(segment.get(&buffer, i).unwrap(), data[start + i]);
        }
    }

    #[test]
    fn prop_atr_header_roundtrip(tail in proptest::collection::vec(any::<u8>(), 14)) {
        let mut bytes = vec![0x96, 0x02];
        bytes.extend_from_slice(&tail);
        let header = AtrHeader::from_bytes(&bytes).unwrap();
        prop_assert_eq!(header.to_bytes().to_vec(), bytes);
    }

    #[test]
    fn prop_compare_equal_data_has_no_diff(data in proptest::collection::vec(any::<u8>(), 0..128)) {
        let mut a = ByteBuffer::new(data.clone());
        a.style_mut().iter_mut().for_each(|s| *s = StyleBits::DIFF);
        let segment = Segment::new(&a, 0, data.len(), "a").unwrap();
        segment.compare_to(&mut a, &data);
        prop_assert!(a.style().iter().all(|&s| !StyleBits(s).is_diff()));
    }

    #[test]
    fn prop_vtoc_reserve_free_balance(free in 10usize..700, n in 1usize..10) {
        let mut vtoc = Vtoc::new();
        for sector in 4..4 + free {
            vtoc.set_free(sector, true);
        }
        let total = vtoc.num_free();
        let first = vtoc.reserve(n).unwrap();
        prop_assert_eq!(vtoc.num_free(), total - n);
        vtoc.free(&first);
        prop_assert_eq!(vtoc.num_free(), total);
        prop_assert_eq!(vtoc.reserve(n).unwrap(), first);
    }

    #[test]
    fn prop_write_file_roundtrip(len in 1usize..3000) {
        let (before, after, data, image) = sd_free_after_write(len);
        prop_assert_eq!(before - after, (len + 124) / 125);
        prop_assert_eq!(image.get_file("DATA.BIN").unwrap(), data);
    }

    #[test]
    fn prop_delete_restores_free_count(len in 1usize..3000) {
        let (before, _, _, mut image) = sd_free_after_write(len);
        image.delete_file("DATA.BIN").unwrap();
        prop_assert_eq!(free_sectors(&image), before);
    }
}
