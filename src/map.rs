/// VTOC map rendering

use crate::error::{AtrError, Result};
use crate::image::Image;
use std::collections::HashSet;
use std::fmt::Write;

/// ANSI color codes for the sector map
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
}

const BLOCK_FREE: char = '\u{2591}';
const BLOCK_USED: char = '\u{2593}';

/// How a sector is used according to the VTOC and the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorUse {
    /// Marked free in the VTOC
    Free,
    /// Part of a listed file
    File,
    /// Marked used but not owned by any file: boot, VTOC, directory
    System,
    /// Owned by a file but marked free in the VTOC
    Conflict,
}

impl SectorUse {
    fn symbol(&self) -> char {
        match self {
            SectorUse::Free => BLOCK_FREE,
            SectorUse::Conflict => '!',
            SectorUse::File | SectorUse::System => BLOCK_USED,
        }
    }

    fn color(&self) -> &'static str {
        match self {
            SectorUse::Free => colors::DARK_WHITE,
            SectorUse::File => colors::BRIGHT_WHITE,
            SectorUse::System => colors::BRIGHT_YELLOW,
            SectorUse::Conflict => colors::BRIGHT_RED,
        }
    }
}

/// Classify every sector of the image, in label order
pub fn sector_usage(image: &Image) -> Result<Vec<(usize, SectorUse)>> {
    let fs = image
        .filesystem()
        .ok_or_else(|| AtrError::unsupported_disk(format!("No filesystem found on {}", image.media().pretty_name())))?;
    let header = image.header();
    let vtoc = fs.read_vtoc(image.buffer(), header)?;

    let mut owned = HashSet::new();
    for dirent in image.files() {
        match fs.file_sectors(image.buffer(), header, dirent) {
            Ok(sectors) => owned.extend(sectors),
            Err(err) => log::debug!("map skips {}: {}", dirent.filename, err),
        }
    }

    Ok(image
        .iter_sectors()
        .map(|(num, _)| {
            let usage = match (vtoc.is_free(num), owned.contains(&num)) {
                (true, false) => SectorUse::Free,
                (true, true) => SectorUse::Conflict,
                (false, true) => SectorUse::File,
                (false, false) => SectorUse::System,
            };
            (num, usage)
        })
        .collect())
}

/// Render the sector usage as rows of blocks
///
/// Apple disks get one row per track; Atari disks 40 sectors per row.
pub fn render(image: &Image, color: bool) -> Result<String> {
    let usage = sector_usage(image)?;
    let per_row = if image.header().starting_sector_label == 0 { 16 } else { 40 };
    let mut out = String::new();

    if color {
        let _ = writeln!(
            out,
            "Legend: {}File{} {}System{} {}Free{} {}Conflict{}",
            colors::BRIGHT_WHITE,
            colors::RESET,
            colors::BRIGHT_YELLOW,
            colors::RESET,
            colors::DARK_WHITE,
            colors::RESET,
            colors::BRIGHT_RED,
            colors::RESET
        );
    } else {
        let _ = writeln!(out, "Legend: {} used {} free ! conflict", BLOCK_USED, BLOCK_FREE);
    }

    for row in usage.chunks(per_row) {
        if let Some((first, _)) = row.first() {
            let _ = write!(out, "{:>5} ", first);
        }
        for (_, usage) in row {
            if color {
                let _ = write!(out, "{}{}{}", usage.color(), usage.symbol(), colors::RESET);
            } else {
                out.push(usage.symbol());
            }
        }
        out.push('\n');
    }

    let free = usage.iter().filter(|(_, u)| *u == SectorUse::Free).count();
    let _ = writeln!(out, "{} of {} sectors free", free, usage.len());
    Ok(out)
}
