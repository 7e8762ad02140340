/*!
# atrcopy

A Rust library for reading and writing Atari 8-bit and Apple ][ disk images.

## Features

- Unwrap compressed containers (XZ/LZMA, MAME ROM ZIPs) and detect DCM archives
- Identify ATR, XFD, Apple DSK and Atari cartridge media
- Atari DOS 2.0S/2.5, MyDOS, boot disk, KBoot and Apple DOS 3.3 filesystems
- Read-only SpartaDOS and Apple Standard Delivery disks
- Read, write and delete files as transactions that roll back on failure
- Named segments over one shared buffer with style bits and comments
- Executable (XEX and BSAVE) sub-segments
- JSON sidecar metadata for comments and style ranges

## Quick Start

```rust,no_run
use atrcopy::{DiskFormat, Image, ImageBuilder};

// Open an existing image
let mut image = Image::open("game.atr")?;
println!("{}", image.describe());

// List files
for dirent in image.files() {
    println!("{}", dirent);
}

// Read a file
let data = image.get_file("AUTORUN.SYS")?;

// Write a file and save
image.write_file("COPY.SYS", "", &data)?;
image.save("game.atr")?;

// Create a blank formatted image
let mut blank = ImageBuilder::new().format(DiskFormat::AtariDos2Ed).build()?;
blank.save("blank.atr")?;
# Ok::<(), atrcopy::AtrError>(())
```

## Modules

- `container`: compressed and archive wrappers around image bytes
- `media`: media identification and sector geometry
- `filesystem`: DOS implementations
- `image`: opened images, file operations and the image builder
- `segment`: views into the shared buffer
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Shared data and style buffer
pub mod buffer;
/// Container unwrapping: LZMA/XZ, DCM, MAME ZIP
pub mod container;
/// Error types and Result alias
pub mod error;
/// Atari XEX and Apple BSAVE executables
pub mod executable;
/// Filesystem implementations (Atari DOS, SpartaDOS, Apple DOS 3.3, boot disks)
pub mod filesystem;
/// Opened images and file operations
pub mod image;
/// I/O operations for reading and writing image files
pub mod io;
/// VTOC map rendering
pub mod map;
/// Media types and geometry
pub mod media;
/// Sidecar metadata
pub mod metadata;
/// Operations on image files by path
pub mod ops;
/// Segments over the shared buffer
pub mod segment;
/// Style bits
pub mod style;

// Re-export common types
pub use buffer::ByteBuffer;
pub use container::{Compression, ContainerRegistry, RomEntry, Unpacked};
pub use error::{AtrError, Result};
pub use filesystem::{Dirent, Directory, FileSystemInfo, Filesystem, Vtoc};
pub use image::{DisassemblyView, DiskFormat, Image, ImageBuilder, WriteableSector};
pub use media::{Header, IdentifyOptions, Media, MediaType};
pub use metadata::Metadata;
pub use segment::Segment;
pub use style::StyleBits;
