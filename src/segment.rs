/// Segments: indexed windows into a shared byte buffer

use crate::buffer::ByteBuffer;
use crate::error::{AtrError, Result};
use crate::style::StyleBits;
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

/// Mapping from local segment indexes to absolute buffer offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offsets {
    /// `start..start + len`
    Contiguous {
        /// First absolute offset
        start: usize,
        /// Number of bytes
        len: usize,
    },
    /// Arbitrary ordered absolute offsets
    Indexed(Vec<u32>),
}

impl Offsets {
    /// Build from explicit absolute offsets, collapsing a consecutive run
    pub fn from_indexes(indexes: &[usize]) -> Result<Self> {
        if let Some(&first) = indexes.first() {
            if indexes.windows(2).all(|w| w[1] == w[0] + 1) {
                return Ok(Offsets::Contiguous {
                    start: first,
                    len: indexes.len(),
                });
            }
        } else {
            return Ok(Offsets::Contiguous { start: 0, len: 0 });
        }
        let mut packed = Vec::with_capacity(indexes.len());
        for &index in indexes {
            let value = u32::try_from(index).map_err(|_| {
                AtrError::InvalidSegmentLength(format!("offset {} exceeds 32 bits", index))
            })?;
            packed.push(value);
        }
        Ok(Offsets::Indexed(packed))
    }

    /// Number of local indexes
    pub fn len(&self) -> usize {
        match self {
            Offsets::Contiguous { len, .. } => *len,
            Offsets::Indexed(v) => v.len(),
        }
    }

    /// Check if there are no offsets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute offset of a local index
    #[inline]
    pub fn get(&self, index: usize) -> Option<usize> {
        match self {
            Offsets::Contiguous { start, len } => (index < *len).then(|| start + index),
            Offsets::Indexed(v) => v.get(index).map(|&o| o as usize),
        }
    }

    /// Iterate absolute offsets in local order
    pub fn iter(&self) -> OffsetsIter<'_> {
        match self {
            Offsets::Contiguous { start, len } => OffsetsIter::Range(*start..start + len),
            Offsets::Indexed(v) => OffsetsIter::Indexed(v.iter()),
        }
    }

    /// Offsets of a local sub-range
    pub fn window(&self, range: Range<usize>) -> Result<Offsets> {
        if range.start > range.end || range.end > self.len() {
            return Err(AtrError::InvalidIndex {
                index: range.end,
                len: self.len(),
            });
        }
        Ok(match self {
            Offsets::Contiguous { start, .. } => Offsets::Contiguous {
                start: start + range.start,
                len: range.len(),
            },
            Offsets::Indexed(v) => Offsets::Indexed(v[range].to_vec()),
        })
    }

    /// Check if this is the contiguous representation
    pub fn is_contiguous(&self) -> bool {
        matches!(self, Offsets::Contiguous { .. })
    }
}

/// Iterator over absolute offsets
pub enum OffsetsIter<'a> {
    /// Contiguous run
    Range(Range<usize>),
    /// Explicit table
    Indexed(std::slice::Iter<'a, u32>),
}

impl Iterator for OffsetsIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            OffsetsIter::Range(r) => r.next(),
            OffsetsIter::Indexed(it) => it.next().map(|&o| o as usize),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            OffsetsIter::Range(r) => r.size_hint(),
            OffsetsIter::Indexed(it) => it.size_hint(),
        }
    }
}

/// A named view over part of a [`ByteBuffer`]
///
/// The segment does not hold the buffer. Every operation that touches data or
/// style takes the owning buffer explicitly and routes local indexes through
/// the offset table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    offsets: Offsets,
    /// Address of the first byte in the target machine's memory
    pub origin: u16,
    /// Short name
    pub name: String,
    /// Longer description
    pub verbose_name: String,
    uuid: String,
    /// Set when the segment stands in for data that could not be parsed
    pub error: Option<String>,
    /// Whether the segment may grow or shrink
    pub can_resize: bool,
}

impl Segment {
    /// Create a contiguous segment over `start..start + len`
    pub fn new<S: Into<String>>(buffer: &ByteBuffer, start: usize, len: usize, name: S) -> Result<Self> {
        let end = start.checked_add(len).unwrap_or(usize::MAX);
        if end > buffer.len() {
            return Err(AtrError::InvalidSegmentLength(format!(
                "{}..{} outside buffer of {} bytes",
                start,
                end,
                buffer.len()
            )));
        }
        Ok(Self::with_offsets(Offsets::Contiguous { start, len }, name))
    }

    /// Create a segment from explicit absolute offsets
    pub fn from_offsets<S: Into<String>>(buffer: &ByteBuffer, indexes: &[usize], name: S) -> Result<Self> {
        if let Some(&bad) = indexes.iter().find(|&&i| i >= buffer.len()) {
            return Err(AtrError::InvalidSegmentLength(format!(
                "offset {} outside buffer of {} bytes",
                bad,
                buffer.len()
            )));
        }
        check_unique(indexes.iter().copied())?;
        Ok(Self::with_offsets(Offsets::from_indexes(indexes)?, name))
    }

    /// Create a zero length segment, usually to carry an error
    pub fn empty<S: Into<String>>(name: S) -> Self {
        Self::with_offsets(Offsets::Contiguous { start: 0, len: 0 }, name)
    }

    fn with_offsets<S: Into<String>>(offsets: Offsets, name: S) -> Self {
        Self {
            offsets,
            origin: 0,
            name: name.into(),
            verbose_name: String::new(),
            uuid: uuid::Uuid::new_v4().to_string(),
            error: None,
            can_resize: false,
        }
    }

    /// Set the origin address
    pub fn with_origin(mut self, origin: u16) -> Self {
        self.origin = origin;
        self
    }

    /// Set the verbose name
    pub fn with_verbose_name<S: Into<String>>(mut self, verbose_name: S) -> Self {
        self.verbose_name = verbose_name.into();
        self
    }

    /// Attach an error string
    pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Rename the segment
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Unique identifier of this segment
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Offset table
    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    /// Number of visible bytes
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Check if the segment shows no bytes
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Absolute offset of a local index
    pub fn absolute(&self, index: usize) -> Result<usize> {
        self.offsets.get(index).ok_or(AtrError::InvalidIndex {
            index,
            len: self.len(),
        })
    }

    /// Local index of an absolute offset
    pub fn local_index(&self, absolute: usize) -> Option<usize> {
        match &self.offsets {
            Offsets::Contiguous { start, len } => {
                (absolute >= *start && absolute < start + len).then(|| absolute - start)
            }
            Offsets::Indexed(v) => v.iter().position(|&o| o as usize == absolute),
        }
    }

    /// Local index for every absolute offset of a buffer of `buffer_len` bytes
    pub fn reverse_offsets(&self, buffer_len: usize) -> Vec<Option<usize>> {
        let mut reverse = vec![None; buffer_len];
        for (local, absolute) in self.offsets.iter().enumerate() {
            if let Some(slot) = reverse.get_mut(absolute) {
                *slot = Some(local);
            }
        }
        reverse
    }

    /// Read one byte
    pub fn get(&self, buffer: &ByteBuffer, index: usize) -> Result<u8> {
        let absolute = self.absolute(index)?;
        buffer
            .data()
            .get(absolute)
            .copied()
            .ok_or(AtrError::InvalidIndex { index, len: self.len() })
    }

    /// Write one byte through to the buffer
    pub fn set(&self, buffer: &mut ByteBuffer, index: usize, value: u8) -> Result<()> {
        let absolute = self.absolute(index)?;
        let len = self.len();
        let byte = buffer
            .data_mut()
            .get_mut(absolute)
            .ok_or(AtrError::InvalidIndex { index, len })?;
        *byte = value;
        Ok(())
    }

    /// Style of one byte
    pub fn style(&self, buffer: &ByteBuffer, index: usize) -> Result<StyleBits> {
        Ok(buffer.style_at(self.absolute(index)?))
    }

    /// Borrowed read-only window over a local range
    pub fn slice<'a>(&self, buffer: &'a ByteBuffer, range: Range<usize>) -> Result<SegmentSlice<'a>> {
        Ok(SegmentSlice {
            buffer,
            offsets: self.offsets.window(range)?,
        })
    }

    /// Borrowed writable window over a local range
    pub fn slice_mut<'a>(&self, buffer: &'a mut ByteBuffer, range: Range<usize>) -> Result<SegmentSliceMut<'a>> {
        Ok(SegmentSliceMut {
            buffer,
            offsets: self.offsets.window(range)?,
        })
    }

    /// New segment showing the given local indexes in the given order
    pub fn subset(&self, order: &[usize]) -> Result<Segment> {
        let mut indexes = Vec::with_capacity(order.len());
        for &local in order {
            indexes.push(self.absolute(local)?);
        }
        check_unique(indexes.iter().copied())?;
        let mut segment = Self::with_offsets(Offsets::from_indexes(&indexes)?, self.name.clone());
        segment.origin = self.origin;
        segment.verbose_name = self.verbose_name.clone();
        Ok(segment)
    }

    /// Contiguous copy of the visible bytes
    pub fn to_bytes(&self, buffer: &ByteBuffer) -> Vec<u8> {
        match self.offsets {
            Offsets::Contiguous { start, len } => buffer
                .data()
                .get(start..start + len)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            Offsets::Indexed(_) => {
                let data = buffer.data();
                self.offsets.iter().filter_map(|o| data.get(o).copied()).collect()
            }
        }
    }

    /// Contiguous copy of the visible style bytes
    pub fn style_bytes(&self, buffer: &ByteBuffer) -> Vec<u8> {
        let style = buffer.style();
        self.offsets.iter().filter_map(|o| style.get(o).copied()).collect()
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.len() {
            return Err(AtrError::InvalidIndex {
                index: range.end,
                len: self.len(),
            });
        }
        Ok(())
    }

    fn absolute_in(&self, ranges: &[Range<usize>]) -> Result<Vec<usize>> {
        let mut indexes = Vec::new();
        for range in ranges {
            self.check_range(range)?;
            indexes.extend(range.clone().filter_map(|i| self.offsets.get(i)));
        }
        Ok(indexes)
    }

    /// OR `bits` into the style of every byte in the local ranges
    pub fn set_style_ranges(&self, buffer: &mut ByteBuffer, ranges: &[Range<usize>], bits: StyleBits) -> Result<()> {
        let indexes = self.absolute_in(ranges)?;
        let style = buffer.style_mut();
        for absolute in indexes {
            style[absolute] |= bits.0;
        }
        Ok(())
    }

    /// Clear `bits` from the style of every byte in the local ranges
    pub fn clear_style_ranges(&self, buffer: &mut ByteBuffer, ranges: &[Range<usize>], bits: StyleBits) -> Result<()> {
        let indexes = self.absolute_in(ranges)?;
        let mask = bits.clear_mask();
        let style = buffer.style_mut();
        for absolute in indexes {
            style[absolute] &= mask;
        }
        Ok(())
    }

    /// OR `bits` into the style at each local index
    pub fn set_style_at_indexes(&self, buffer: &mut ByteBuffer, indexes: &[usize], bits: StyleBits) -> Result<()> {
        let absolute = indexes
            .iter()
            .map(|&i| self.absolute(i))
            .collect::<Result<Vec<_>>>()?;
        let style = buffer.style_mut();
        for a in absolute {
            style[a] |= bits.0;
        }
        Ok(())
    }

    /// Clear `bits` from the style at each local index
    pub fn clear_style_at_indexes(&self, buffer: &mut ByteBuffer, indexes: &[usize], bits: StyleBits) -> Result<()> {
        let absolute = indexes
            .iter()
            .map(|&i| self.absolute(i))
            .collect::<Result<Vec<_>>>()?;
        let mask = bits.clear_mask();
        let style = buffer.style_mut();
        for a in absolute {
            style[a] &= mask;
        }
        Ok(())
    }

    /// Half-open local runs where every style byte carries all of `bits`
    pub fn get_style_ranges(&self, buffer: &ByteBuffer, bits: StyleBits) -> Vec<Range<usize>> {
        let style = buffer.style();
        let mut ranges = Vec::new();
        let mut run_start: Option<usize> = None;
        for (local, absolute) in self.offsets.iter().enumerate() {
            let matched = style
                .get(absolute)
                .map(|&s| StyleBits(s).contains(bits))
                .unwrap_or(false);
            match (matched, run_start) {
                (true, None) => run_start = Some(local),
                (false, Some(start)) => {
                    ranges.push(start..local);
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            ranges.push(start..self.len());
        }
        ranges
    }

    /// Set the user data class across local ranges and record it in the buffer
    pub fn set_user_data(&self, buffer: &mut ByteBuffer, ranges: &[Range<usize>], class: u8) -> Result<()> {
        let indexes = self.absolute_in(ranges)?;
        let class = class & StyleBits::USER_MASK;
        for absolute in indexes {
            let style = &mut buffer.style_mut()[absolute];
            *style = (*style & !StyleBits::USER_MASK) | class;
            buffer.set_user_data(absolute, class);
        }
        Ok(())
    }

    /// User data class at a local index
    pub fn get_user_data(&self, buffer: &ByteBuffer, index: usize) -> Result<u8> {
        Ok(self.style(buffer, index)?.user_class())
    }

    /// Start of the next run carrying `bits` after local index `index`, wrapping
    pub fn find_next(&self, buffer: &ByteBuffer, index: usize, bits: StyleBits) -> Option<usize> {
        let ranges = self.get_style_ranges(buffer, bits);
        ranges
            .iter()
            .map(|r| r.start)
            .find(|&start| start > index)
            .or_else(|| ranges.first().map(|r| r.start))
    }

    /// Start of the previous run carrying `bits` before local index `index`, wrapping
    pub fn find_previous(&self, buffer: &ByteBuffer, index: usize, bits: StyleBits) -> Option<usize> {
        let ranges = self.get_style_ranges(buffer, bits);
        ranges
            .iter()
            .rev()
            .map(|r| r.start)
            .find(|&start| start < index)
            .or_else(|| ranges.last().map(|r| r.start))
    }

    /// Attach a comment to a local range
    ///
    /// The comment bit is set across the whole range; the text is stored once,
    /// keyed by the first absolute offset of the range.
    pub fn set_comment<S: Into<String>>(&self, buffer: &mut ByteBuffer, range: Range<usize>, text: S) -> Result<()> {
        let indexes = self.absolute_in(std::slice::from_ref(&range))?;
        if let Some(&first) = indexes.first() {
            let style = buffer.style_mut();
            for &absolute in &indexes {
                style[absolute] |= StyleBits::COMMENT;
            }
            buffer.set_comment(first, text);
        }
        Ok(())
    }

    /// Comment stored at a local index
    pub fn get_comment<'a>(&self, buffer: &'a ByteBuffer, index: usize) -> Option<&'a str> {
        self.offsets.get(index).and_then(|a| buffer.comment(a))
    }

    /// Remove comments and comment bits across a local range
    pub fn clear_comment(&self, buffer: &mut ByteBuffer, range: Range<usize>) -> Result<()> {
        for absolute in self.absolute_in(std::slice::from_ref(&range))? {
            buffer.remove_comment(absolute);
        }
        Ok(())
    }

    /// Comments inside this segment as `(local index, text)` in local order
    pub fn get_sorted_comments(&self, buffer: &ByteBuffer) -> Vec<(usize, String)> {
        self.offsets
            .iter()
            .enumerate()
            .filter_map(|(local, absolute)| buffer.comment(absolute).map(|t| (local, t.to_string())))
            .collect()
    }

    /// Reconcile comment bits with comment text across the shared buffer
    pub fn fixup_comments(&self, buffer: &mut ByteBuffer) {
        buffer.fixup_comments();
    }

    /// Mark every byte that differs from `other` with the diff bit
    ///
    /// Diff bits are cleared across the whole segment first; only the overlap
    /// with `other` is compared.
    pub fn compare_to(&self, buffer: &mut ByteBuffer, other: &[u8]) {
        let (data, style) = buffer.split_mut();
        for (local, absolute) in self.offsets.iter().enumerate() {
            let Some(s) = style.get_mut(absolute) else {
                continue;
            };
            *s &= !StyleBits::DIFF;
            if let Some(&theirs) = other.get(local) {
                if data[absolute] != theirs {
                    *s |= StyleBits::DIFF;
                }
            }
        }
    }

    /// Capture everything needed to undo a style or comment edit over `ranges`
    pub fn get_comment_restore_data(&self, buffer: &ByteBuffer, ranges: &[Range<usize>]) -> Result<CommentRestoreData> {
        let mut styles = Vec::with_capacity(ranges.len());
        let mut comments = Vec::new();
        for range in ranges {
            self.check_range(range)?;
            let mut copy = Vec::with_capacity(range.len());
            for local in range.clone() {
                let absolute = self.absolute(local)?;
                copy.push(buffer.style()[absolute]);
                if let Some(text) = buffer.comment(absolute) {
                    comments.push((absolute, text.to_string()));
                }
            }
            styles.push(copy);
        }
        Ok(CommentRestoreData {
            ranges: ranges.to_vec(),
            styles,
            comments,
        })
    }

    /// Replay a capture from [`Segment::get_comment_restore_data`]
    pub fn restore_comments(&self, buffer: &mut ByteBuffer, data: &CommentRestoreData) -> Result<()> {
        for (range, styles) in data.ranges.iter().zip(&data.styles) {
            self.check_range(range)?;
            for (local, &saved) in range.clone().zip(styles) {
                let absolute = self.absolute(local)?;
                buffer.remove_comment(absolute);
                buffer.style_mut()[absolute] = saved;
            }
        }
        for (absolute, text) in &data.comments {
            buffer.insert_comment_text(*absolute, text.clone());
        }
        Ok(())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (${:04x}, {} bytes)", self.name, self.origin, self.len())?;
        if let Some(err) = &self.error {
            write!(f, " [{}]", err)?;
        }
        Ok(())
    }
}

fn check_unique<I: Iterator<Item = usize>>(indexes: I) -> Result<()> {
    let mut seen = HashSet::new();
    for index in indexes {
        if !seen.insert(index) {
            return Err(AtrError::InvalidSegmentOrder(format!(
                "absolute offset {} appears more than once",
                index
            )));
        }
    }
    Ok(())
}

/// Opaque undo record for style and comment edits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRestoreData {
    ranges: Vec<Range<usize>>,
    styles: Vec<Vec<u8>>,
    comments: Vec<(usize, String)>,
}

/// Read-only gather window over a segment
#[derive(Debug)]
pub struct SegmentSlice<'a> {
    buffer: &'a ByteBuffer,
    offsets: Offsets,
}

impl<'a> SegmentSlice<'a> {
    /// Number of bytes visible
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Check if the window is empty
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Byte at a window index
    pub fn get(&self, index: usize) -> Option<u8> {
        self.offsets.get(index).and_then(|a| self.buffer.data().get(a).copied())
    }

    /// Style at a window index
    pub fn style(&self, index: usize) -> Option<StyleBits> {
        self.offsets.get(index).map(|a| self.buffer.style_at(a))
    }

    /// Direct slice when the window is contiguous
    pub fn as_slice(&self) -> Option<&'a [u8]> {
        match self.offsets {
            Offsets::Contiguous { start, len } => self.buffer.data().get(start..start + len),
            Offsets::Indexed(_) => None,
        }
    }

    /// Iterate bytes in window order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        let data = self.buffer.data();
        self.offsets.iter().filter_map(move |a| data.get(a).copied())
    }

    /// Copy the window out
    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }
}

/// Writable scatter window over a segment
#[derive(Debug)]
pub struct SegmentSliceMut<'a> {
    buffer: &'a mut ByteBuffer,
    offsets: Offsets,
}

impl SegmentSliceMut<'_> {
    /// Number of bytes visible
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Check if the window is empty
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Byte at a window index
    pub fn get(&self, index: usize) -> Option<u8> {
        self.offsets.get(index).and_then(|a| self.buffer.data().get(a).copied())
    }

    /// Write a byte at a window index
    pub fn set(&mut self, index: usize, value: u8) -> Result<()> {
        let len = self.offsets.len();
        let absolute = self.offsets.get(index).ok_or(AtrError::InvalidIndex { index, len })?;
        self.buffer.data_mut()[absolute] = value;
        Ok(())
    }

    /// Fill the whole window with one value
    pub fn fill(&mut self, value: u8) {
        let data = self.buffer.data_mut();
        for a in self.offsets.iter() {
            data[a] = value;
        }
    }

    /// Copy `bytes` into the window starting at window index 0
    pub fn copy_from(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.offsets.len() {
            return Err(AtrError::InvalidIndex {
                index: bytes.len(),
                len: self.offsets.len(),
            });
        }
        let data = self.buffer.data_mut();
        for (a, &b) in self.offsets.iter().zip(bytes) {
            data[a] = b;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_buffer(len: usize) -> ByteBuffer {
        ByteBuffer::new((0..len).map(|i| i as u8).collect())
    }

    #[test]
    fn test_contiguous_access() {
        let mut buffer = counting_buffer(100);
        let segment = Segment::new(&buffer, 10, 20, "window").unwrap();
        assert_eq!(segment.len(), 20);
        assert_eq!(segment.get(&buffer, 0).unwrap(), 10);
        segment.set(&mut buffer, 5, 0xAA).unwrap();
        assert_eq!(buffer.data()[15], 0xAA);
        assert!(matches!(
            segment.get(&buffer, 20),
            Err(AtrError::InvalidIndex { index: 20, len: 20 })
        ));
    }

    #[test]
    fn test_construction_errors() {
        let buffer = counting_buffer(16);
        assert!(matches!(
            Segment::new(&buffer, 10, 7, "too long"),
            Err(AtrError::InvalidSegmentLength(_))
        ));
        assert!(matches!(
            Segment::from_offsets(&buffer, &[1, 2, 1], "dup"),
            Err(AtrError::InvalidSegmentOrder(_))
        ));
        assert!(matches!(
            Segment::from_offsets(&buffer, &[3, 16], "oob"),
            Err(AtrError::InvalidSegmentLength(_))
        ));
    }

    #[test]
    fn test_from_offsets_collapses_runs() {
        let buffer = counting_buffer(16);
        let segment = Segment::from_offsets(&buffer, &[4, 5, 6], "run").unwrap();
        assert!(segment.offsets().is_contiguous());
        let segment = Segment::from_offsets(&buffer, &[6, 5, 4], "reversed").unwrap();
        assert!(!segment.offsets().is_contiguous());
        assert_eq!(segment.to_bytes(&buffer), vec![6, 5, 4]);
    }

    #[test]
    fn test_subset_writes_through() {
        let mut buffer = counting_buffer(100);
        let segment = Segment::new(&buffer, 0, 100, "all").unwrap().with_origin(0x2000);
        let subset = segment.subset(&[0, 2, 4, 6, 8]).unwrap();
        assert_eq!(subset.to_bytes(&buffer), vec![0, 2, 4, 6, 8]);
        assert_eq!(subset.origin, 0x2000);
        subset.set(&mut buffer, 3, 0xFF).unwrap();
        assert_eq!(buffer.data()[6], 0xFF);
        assert!(matches!(
            segment.subset(&[1, 1]),
            Err(AtrError::InvalidSegmentOrder(_))
        ));
    }

    #[test]
    fn test_reverse_offsets() {
        let buffer = counting_buffer(8);
        let segment = Segment::from_offsets(&buffer, &[7, 2], "pair").unwrap();
        let reverse = segment.reverse_offsets(buffer.len());
        assert_eq!(reverse.len(), 8);
        assert_eq!(reverse[7], Some(0));
        assert_eq!(reverse[2], Some(1));
        assert_eq!(reverse[0], None);
        assert_eq!(segment.local_index(2), Some(1));
    }

    #[test]
    fn test_slices() {
        let mut buffer = counting_buffer(32);
        let segment = Segment::from_offsets(&buffer, &[1, 3, 5, 7, 9], "odd").unwrap();
        let window = segment.slice(&buffer, 1..4).unwrap();
        assert_eq!(window.to_vec(), vec![3, 5, 7]);
        assert!(window.as_slice().is_none());

        let mut window = segment.slice_mut(&mut buffer, 2..5).unwrap();
        window.fill(0);
        window.set(0, 0x55).unwrap();
        assert_eq!(buffer.data()[5], 0x55);
        assert_eq!(buffer.data()[9], 0);
        assert_eq!(buffer.data()[8], 8);

        let contiguous = Segment::new(&buffer, 10, 4, "run").unwrap();
        let window = contiguous.slice(&buffer, 0..4).unwrap();
        assert_eq!(window.as_slice(), Some(&[10u8, 11, 12, 13][..]));
    }

    #[test]
    fn test_style_ranges_collapse() {
        let mut buffer = counting_buffer(64);
        let segment = Segment::new(&buffer, 0, 64, "all").unwrap();
        segment
            .set_style_ranges(&mut buffer, &[2..5, 5..8, 20..22], StyleBits::selected())
            .unwrap();
        assert_eq!(
            segment.get_style_ranges(&buffer, StyleBits::selected()),
            vec![2..8, 20..22]
        );
        segment
            .clear_style_ranges(&mut buffer, &[3..4], StyleBits::selected())
            .unwrap();
        assert_eq!(
            segment.get_style_ranges(&buffer, StyleBits::selected()),
            vec![2..3, 4..8, 20..22]
        );
    }

    #[test]
    fn test_style_at_indexes() {
        let mut buffer = counting_buffer(16);
        let segment = Segment::new(&buffer, 4, 8, "mid").unwrap();
        segment
            .set_style_at_indexes(&mut buffer, &[0, 1, 7], StyleBits::matched())
            .unwrap();
        assert!(buffer.style_at(4).is_match());
        assert!(buffer.style_at(11).is_match());
        segment
            .clear_style_at_indexes(&mut buffer, &[1], StyleBits::matched())
            .unwrap();
        assert!(!buffer.style_at(5).is_match());
        assert!(segment
            .set_style_at_indexes(&mut buffer, &[8], StyleBits::matched())
            .is_err());
    }

    #[test]
    fn test_find_wraps() {
        let mut buffer = counting_buffer(100);
        let segment = Segment::new(&buffer, 0, 100, "all").unwrap();
        let bits = StyleBits::matched();
        assert_eq!(segment.find_next(&buffer, 0, bits), None);
        segment
            .set_style_ranges(&mut buffer, &[10..12, 40..45, 70..71], bits)
            .unwrap();
        assert_eq!(segment.find_next(&buffer, 10, bits), Some(40));
        assert_eq!(segment.find_next(&buffer, 70, bits), Some(10));
        assert_eq!(segment.find_previous(&buffer, 40, bits), Some(10));
        assert_eq!(segment.find_previous(&buffer, 5, bits), Some(70));
    }

    #[test]
    fn test_user_data() {
        let mut buffer = counting_buffer(16);
        let segment = Segment::new(&buffer, 0, 16, "all").unwrap();
        segment.set_user_data(&mut buffer, &[4..8], 3).unwrap();
        assert_eq!(segment.get_user_data(&buffer, 5).unwrap(), 3);
        segment.set_user_data(&mut buffer, &[4..6], 1).unwrap();
        assert_eq!(segment.get_user_data(&buffer, 5).unwrap(), 1);
        assert_eq!(segment.get_user_data(&buffer, 7).unwrap(), 3);
        assert_eq!(buffer.user_data().get(&4), Some(&1));
    }

    #[test]
    fn test_comments_live_on_buffer() {
        let mut buffer = counting_buffer(32);
        let segment = Segment::new(&buffer, 8, 16, "code").unwrap();
        segment.set_comment(&mut buffer, 2..5, "loop start").unwrap();
        assert_eq!(buffer.comment(10), Some("loop start"));
        assert!(buffer.style_at(12).has_comment());

        let subset = segment.subset(&[2, 3]).unwrap();
        assert_eq!(subset.get_comment(&buffer, 0), Some("loop start"));
        assert_eq!(
            segment.get_sorted_comments(&buffer),
            vec![(2, "loop start".to_string())]
        );

        segment.clear_comment(&mut buffer, 0..16).unwrap();
        assert!(buffer.comments().is_empty());
        assert!(!buffer.style_at(12).has_comment());
    }

    #[test]
    fn test_compare_to() {
        let mut buffer = counting_buffer(8);
        let segment = Segment::new(&buffer, 0, 8, "all").unwrap();
        let mut other: Vec<u8> = (0..8).collect();
        other[3] = 0xEE;
        segment.compare_to(&mut buffer, &other);
        assert_eq!(segment.get_style_ranges(&buffer, StyleBits::diff()), vec![3..4]);

        let same = segment.to_bytes(&buffer);
        segment.compare_to(&mut buffer, &same);
        assert!(segment.get_style_ranges(&buffer, StyleBits::diff()).is_empty());
    }

    #[test]
    fn test_comment_restore() {
        let mut buffer = counting_buffer(32);
        let segment = Segment::new(&buffer, 0, 32, "all").unwrap();
        segment.set_comment(&mut buffer, 4..6, "original").unwrap();
        let before = buffer.clone();

        let undo = segment.get_comment_restore_data(&buffer, &[0..10]).unwrap();
        segment.clear_comment(&mut buffer, 0..10).unwrap();
        segment.set_comment(&mut buffer, 7..9, "replacement").unwrap();
        segment.restore_comments(&mut buffer, &undo).unwrap();
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_empty_segment() {
        let segment = Segment::empty("BROKEN.COM").with_error("Bad sector pointer data");
        assert!(segment.is_empty());
        assert_eq!(segment.error.as_deref(), Some("Bad sector pointer data"));
        assert_ne!(segment.uuid(), Segment::empty("other").uuid());
    }
}
