/// Backing byte storage shared by every segment of an image

use crate::error::{AtrError, Result};
use crate::style::StyleBits;
use std::collections::BTreeMap;

/// Owned image bytes with a parallel style array and side tables
///
/// This is the only owner of image memory. Segments refer to it by absolute
/// offset and route every read and write through it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    style: Vec<u8>,
    comments: BTreeMap<usize, String>,
    user_data: BTreeMap<usize, u8>,
    populated: bool,
}

/// Copy of the data and style arrays taken at the start of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    data: Vec<u8>,
    style: Vec<u8>,
}

impl ByteBuffer {
    /// Create an unpopulated buffer
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a buffer holding `data` with all styles cleared
    pub fn new(data: Vec<u8>) -> Self {
        let style = vec![0; data.len()];
        Self {
            data,
            style,
            comments: BTreeMap::new(),
            user_data: BTreeMap::new(),
            populated: true,
        }
    }

    /// Fill an empty buffer; buffers are write-once
    pub fn populate(&mut self, data: Vec<u8>) -> Result<()> {
        if self.populated {
            return Err(AtrError::ReadOnlyContainer);
        }
        *self = Self::new(data);
        Ok(())
    }

    /// Check if the buffer has been populated
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Style bytes, one per data byte
    pub fn style(&self) -> &[u8] {
        &self.style
    }

    /// Mutable style bytes
    pub fn style_mut(&mut self) -> &mut [u8] {
        &mut self.style
    }

    /// Data and style together, for operations that touch both
    pub fn split_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.data, &mut self.style)
    }

    /// Style at an absolute offset
    pub fn style_at(&self, index: usize) -> StyleBits {
        StyleBits(self.style.get(index).copied().unwrap_or(0))
    }

    /// Comments keyed by absolute offset
    pub fn comments(&self) -> &BTreeMap<usize, String> {
        &self.comments
    }

    /// Comment at an absolute offset
    pub fn comment(&self, index: usize) -> Option<&str> {
        self.comments.get(&index).map(String::as_str)
    }

    /// Store a comment and set the comment bit at an absolute offset
    pub fn set_comment<S: Into<String>>(&mut self, index: usize, text: S) {
        if index < self.style.len() {
            self.style[index] |= StyleBits::COMMENT;
            self.comments.insert(index, text.into());
        }
    }

    /// Remove a comment and clear the comment bit at an absolute offset
    pub fn remove_comment(&mut self, index: usize) -> Option<String> {
        if let Some(style) = self.style.get_mut(index) {
            *style &= !StyleBits::COMMENT;
        }
        self.comments.remove(&index)
    }

    /// Store comment text without touching the style bit
    pub(crate) fn insert_comment_text(&mut self, index: usize, text: String) {
        self.comments.insert(index, text);
    }

    /// User data classes keyed by absolute offset
    pub fn user_data(&self) -> &BTreeMap<usize, u8> {
        &self.user_data
    }

    /// Record a user data class for an absolute offset; class 0 removes it
    pub fn set_user_data(&mut self, index: usize, class: u8) {
        let class = class & StyleBits::USER_MASK;
        if class == 0 {
            self.user_data.remove(&index);
        } else {
            self.user_data.insert(index, class);
        }
    }

    /// Make the comment bits and the comment table agree
    ///
    /// A comment bit without text is cleared, text without a bit gets the bit.
    /// Comments keyed past the end of the buffer are dropped.
    pub fn fixup_comments(&mut self) {
        let len = self.style.len();
        self.comments.retain(|&index, _| index < len);
        for (index, style) in self.style.iter_mut().enumerate() {
            if self.comments.contains_key(&index) {
                *style |= StyleBits::COMMENT;
            } else {
                *style &= !StyleBits::COMMENT;
            }
        }
    }

    /// Clone the data and style arrays
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            data: self.data.clone(),
            style: self.style.clone(),
        }
    }

    /// Put back a snapshot taken with [`ByteBuffer::snapshot`]
    pub fn restore(&mut self, snapshot: BufferSnapshot) {
        self.data = snapshot.data;
        self.style = snapshot.style;
    }
}
