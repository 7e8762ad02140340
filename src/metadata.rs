/// Sidecar metadata: comments, style ranges and a memory map saved as JSON
///
/// Integer keyed maps are stored as lists of `[key, value]` pairs so that keys
/// stay integers in the JSON document.

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::segment::Segment;
use crate::style::StyleBits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Suffix appended to an image path for its sidecar file
pub const SIDECAR_SUFFIX: &str = ".atrcopy.json";

/// Half-open `[start, end]` runs of absolute offsets
pub type Runs = Vec<(usize, usize)>;

/// Style runs by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRanges {
    /// Bytes carrying a comment
    #[serde(default)]
    pub comment: Runs,
    /// Bytes in user class 1
    #[serde(default)]
    pub data: Runs,
    /// Bytes in user classes 2 to 7, keyed `user_N`
    #[serde(flatten)]
    pub user: BTreeMap<String, Runs>,
}

/// Everything saved alongside an image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Labels for addresses
    #[serde(default)]
    pub memory_map: Vec<(u16, String)>,
    /// Comment text by absolute offset
    #[serde(default)]
    pub comments: Vec<(usize, String)>,
    /// Style runs
    #[serde(default)]
    pub style_ranges: StyleRanges,
}

fn runs<F: Fn(StyleBits) -> bool>(style: &[u8], matches: F) -> Runs {
    let mut out = Vec::new();
    let mut start = None;
    for (i, &s) in style.iter().enumerate() {
        match (matches(StyleBits(s)), start) {
            (true, None) => start = Some(i),
            (false, Some(first)) => {
                out.push((first, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(first) = start {
        out.push((first, style.len()));
    }
    out
}

impl Metadata {
    /// Capture the comments and style runs of a buffer
    pub fn from_buffer(buffer: &ByteBuffer, memory_map: Vec<(u16, String)>) -> Self {
        let style = buffer.style();
        let mut user = BTreeMap::new();
        for class in 2..=StyleBits::MAX_USER_CLASS {
            let found = runs(style, |s| s.user_class() == class);
            if !found.is_empty() {
                user.insert(format!("user_{}", class), found);
            }
        }
        Self {
            memory_map,
            comments: buffer.comments().iter().map(|(&i, t)| (i, t.clone())).collect(),
            style_ranges: StyleRanges {
                comment: runs(style, |s| s.has_comment()),
                data: runs(style, |s| s.is_data()),
                user,
            },
        }
    }

    /// Replay comments and style runs onto a buffer
    ///
    /// Runs or comments outside the buffer fail with `InvalidIndex`; nothing
    /// is applied past the failing entry.
    pub fn apply(&self, buffer: &mut ByteBuffer) -> Result<()> {
        let all = Segment::new(buffer, 0, buffer.len(), "metadata")?;
        let to_ranges = |runs: &Runs| runs.iter().map(|&(s, e)| s..e).collect::<Vec<_>>();

        all.set_style_ranges(buffer, &to_ranges(&self.style_ranges.comment), StyleBits::comment())?;
        all.set_user_data(buffer, &to_ranges(&self.style_ranges.data), StyleBits::DATA)?;
        for (key, runs) in &self.style_ranges.user {
            match key.strip_prefix("user_").and_then(|n| n.parse::<u8>().ok()) {
                Some(class) if (2..=StyleBits::MAX_USER_CLASS).contains(&class) => {
                    all.set_user_data(buffer, &to_ranges(runs), class)?;
                }
                _ => log::warn!("ignoring unknown style range '{}'", key),
            }
        }
        for (index, text) in &self.comments {
            all.set_comment(buffer, *index..*index + 1, text.as_str())?;
        }
        log::debug!("applied {} comments", self.comments.len());
        Ok(())
    }

    /// Serialize to pretty printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Read from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Sidecar path for an image, e.g. `game.atr.atrcopy.json`
pub fn sidecar_path<P: AsRef<Path>>(image: P) -> PathBuf {
    let mut name = image.as_ref().as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}
