/// Style byte definitions
///
/// Every byte of an image carries a parallel style byte. The upper nibble holds
/// flags used by editors and search; the low three bits hold a user data class
/// that tells a disassembler how to treat the byte.

use std::fmt;

/// Per-byte style flags and user data class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StyleBits(pub u8);

impl StyleBits {
    /// Selected - Bit 7
    pub const SELECTED: u8 = 0x80;

    /// Comment present - Bit 6
    pub const COMMENT: u8 = 0x40;

    /// Search match - Bit 5
    pub const MATCH: u8 = 0x20;

    /// Differs from a baseline - Bit 4
    pub const DIFF: u8 = 0x10;

    /// User data class - Bits 2..0
    pub const USER_MASK: u8 = 0x07;

    /// User class 1 marks data rather than code
    pub const DATA: u8 = 0x01;

    /// Highest user data class
    pub const MAX_USER_CLASS: u8 = 7;

    /// Create a new StyleBits from a raw byte
    #[inline]
    pub fn new(value: u8) -> Self {
        StyleBits(value)
    }

    /// Style with only the data class set
    #[inline]
    pub fn data() -> Self {
        StyleBits(Self::DATA)
    }

    /// Style with only the comment flag set
    #[inline]
    pub fn comment() -> Self {
        StyleBits(Self::COMMENT)
    }

    /// Style with only the selected flag set
    #[inline]
    pub fn selected() -> Self {
        StyleBits(Self::SELECTED)
    }

    /// Style with only the match flag set
    #[inline]
    pub fn matched() -> Self {
        StyleBits(Self::MATCH)
    }

    /// Style with only the diff flag set
    #[inline]
    pub fn diff() -> Self {
        StyleBits(Self::DIFF)
    }

    /// Style with the given user class, clamped to the three class bits
    #[inline]
    pub fn user(class: u8) -> Self {
        StyleBits(class & Self::USER_MASK)
    }

    /// Check if the selected flag is set
    #[inline]
    pub fn is_selected(&self) -> bool {
        (self.0 & Self::SELECTED) != 0
    }

    /// Check if the comment flag is set
    #[inline]
    pub fn has_comment(&self) -> bool {
        (self.0 & Self::COMMENT) != 0
    }

    /// Check if the search match flag is set
    #[inline]
    pub fn is_match(&self) -> bool {
        (self.0 & Self::MATCH) != 0
    }

    /// Check if the diff flag is set
    #[inline]
    pub fn is_diff(&self) -> bool {
        (self.0 & Self::DIFF) != 0
    }

    /// User data class (0 = code)
    #[inline]
    pub fn user_class(&self) -> u8 {
        self.0 & Self::USER_MASK
    }

    /// Check if the byte is marked as data
    #[inline]
    pub fn is_data(&self) -> bool {
        self.user_class() == Self::DATA
    }

    /// Combine two styles
    #[inline]
    pub fn union(self, other: StyleBits) -> Self {
        StyleBits(self.0 | other.0)
    }

    /// True when every bit of `bits` is also set here
    #[inline]
    pub fn contains(&self, bits: StyleBits) -> bool {
        (self.0 & bits.0) == bits.0
    }

    /// Mask that clears these bits when AND-ed with a style byte
    ///
    /// Any user class bit widens the mask to the whole class field so that
    /// setting a new class never leaves bits of the old one behind.
    #[inline]
    pub fn clear_mask(&self) -> u8 {
        let mut bits = self.0;
        if bits & Self::USER_MASK != 0 {
            bits |= Self::USER_MASK;
        }
        !bits
    }

    /// Check if no bits are set
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for StyleBits {
    fn from(value: u8) -> Self {
        StyleBits(value)
    }
}

impl fmt::Display for StyleBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "-")?;
        } else {
            let mut flags = Vec::new();
            if self.is_selected() {
                flags.push("SEL".to_string());
            }
            if self.has_comment() {
                flags.push("CMT".to_string());
            }
            if self.is_match() {
                flags.push("MATCH".to_string());
            }
            if self.is_diff() {
                flags.push("DIFF".to_string());
            }
            match self.user_class() {
                0 => {}
                Self::DATA => flags.push("DATA".to_string()),
                n => flags.push(format!("USER{}", n)),
            }
            write!(f, "{}", flags.join("|"))?;
        }
        Ok(())
    }
}
