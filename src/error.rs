use thiserror::Error;

/// Result type alias for disk image operations
pub type Result<T> = std::result::Result<T, AtrError>;

/// Errors that can occur when working with disk images
#[derive(Debug, Error)]
pub enum AtrError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar metadata could not be encoded or decoded
    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),

    /// Recognised container header, malformed body
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// Recognised container, decoder not implemented
    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    /// Header magic or field out of range
    #[error("Invalid media header: {0}")]
    InvalidMediaHeader(String),

    /// Data length violates the media's size rule
    #[error("Invalid media size: {0}")]
    InvalidMediaSize(String),

    /// Media recognised, structure internally inconsistent
    #[error("Invalid disk image: {0}")]
    InvalidDiskImage(String),

    /// Media recognised, filesystem variant not implemented
    #[error("Unsupported disk image: {0}")]
    UnsupportedDiskImage(String),

    /// A parser claimed the format but cannot continue
    #[error("Invalid segment parser: {0}")]
    InvalidSegmentParser(String),

    /// Directory entry internally inconsistent
    #[error("Invalid directory entry: {0}")]
    InvalidDirent(String),

    /// File sector chain is broken
    #[error("Invalid file: {0}")]
    InvalidFile(String),

    /// Sector link carries another file's number
    #[error("File number mismatch: expecting file {expected}, found {found}")]
    FileNumberMismatch {
        /// File number from the directory entry
        expected: usize,
        /// File number stored in the sector
        found: usize,
    },

    /// Sector number outside the media
    #[error("Sector {0} out of range")]
    InvalidSector(usize),

    /// Executable file structure could not be parsed
    #[error("Invalid binary file: {0}")]
    InvalidBinaryFile(String),

    /// Local index outside a segment
    #[error("Index {index} out of range for segment of length {len}")]
    InvalidIndex {
        /// Requested local index
        index: usize,
        /// Segment length
        len: usize,
    },

    /// File not found in the directory
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Filename not representable by the filesystem
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    /// Directory has no free entries
    #[error("No space in directory")]
    NoSpaceInDirectory,

    /// VTOC cannot satisfy a reservation
    #[error("Not enough space on disk: need {needed} sectors, {available} available")]
    NotEnoughSpaceOnDisk {
        /// Sectors requested
        needed: usize,
        /// Free sectors in the VTOC
        available: usize,
    },

    /// Buffer was already populated
    #[error("Container already populated with data")]
    ReadOnlyContainer,

    /// Segment offsets contain a duplicate absolute index
    #[error("Invalid segment order: {0}")]
    InvalidSegmentOrder(String),

    /// Segment offsets fall outside the buffer
    #[error("Invalid segment length: {0}")]
    InvalidSegmentLength(String),

    /// A transaction failed and refreshing the rolled back image failed too
    #[error("{source} (refresh after rollback also failed: {refresh})")]
    Rollback {
        /// Error that aborted the transaction
        source: Box<AtrError>,
        /// Error raised while refreshing metadata after the rollback
        refresh: Box<AtrError>,
    },
}

impl AtrError {
    /// Create an invalid container error
    pub fn invalid_container<S: Into<String>>(message: S) -> Self {
        AtrError::InvalidContainer(message.into())
    }

    /// Create an unsupported container error
    pub fn unsupported_container<S: Into<String>>(message: S) -> Self {
        AtrError::UnsupportedContainer(message.into())
    }

    /// Create an invalid media header error
    pub fn invalid_header<S: Into<String>>(message: S) -> Self {
        AtrError::InvalidMediaHeader(message.into())
    }

    /// Create an invalid media size error
    pub fn invalid_size<S: Into<String>>(message: S) -> Self {
        AtrError::InvalidMediaSize(message.into())
    }

    /// Create an invalid disk image error
    pub fn invalid_disk<S: Into<String>>(message: S) -> Self {
        AtrError::InvalidDiskImage(message.into())
    }

    /// Create an unsupported disk image error
    pub fn unsupported_disk<S: Into<String>>(message: S) -> Self {
        AtrError::UnsupportedDiskImage(message.into())
    }

    /// Create an invalid file error
    pub fn invalid_file<S: Into<String>>(message: S) -> Self {
        AtrError::InvalidFile(message.into())
    }

    /// True for errors that mean "this candidate doesn't apply" while probing
    pub fn is_probe_miss(&self) -> bool {
        matches!(
            self,
            AtrError::InvalidMediaHeader(_)
                | AtrError::InvalidMediaSize(_)
                | AtrError::InvalidDiskImage(_)
                | AtrError::InvalidDirent(_)
                | AtrError::InvalidSector(_)
                | AtrError::InvalidSegmentParser(_)
        )
    }

    /// True for errors that short-circuit probing
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            AtrError::UnsupportedContainer(_) | AtrError::UnsupportedDiskImage(_)
        )
    }

    /// True for errors raised while following a file's sector chain
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            AtrError::InvalidFile(_)
                | AtrError::FileNumberMismatch { .. }
                | AtrError::InvalidSector(_)
                | AtrError::InvalidDirent(_)
        )
    }

    /// Process exit code used by the console front end
    ///
    /// 1 for user errors, 2 for format errors, 3 for unsupported formats.
    pub fn exit_code(&self) -> i32 {
        match self {
            AtrError::Rollback { source, .. } => source.exit_code(),
            AtrError::UnsupportedContainer(_) | AtrError::UnsupportedDiskImage(_) => 3,
            AtrError::InvalidContainer(_)
            | AtrError::InvalidMediaHeader(_)
            | AtrError::InvalidMediaSize(_)
            | AtrError::InvalidDiskImage(_)
            | AtrError::InvalidSegmentParser(_)
            | AtrError::InvalidDirent(_)
            | AtrError::InvalidFile(_)
            | AtrError::FileNumberMismatch { .. }
            | AtrError::InvalidSector(_)
            | AtrError::InvalidBinaryFile(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AtrError::NotEnoughSpaceOnDisk {
            needed: 12,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Not enough space on disk: need 12 sectors, 3 available"
        );
    }

    #[test]
    fn test_container_error() {
        let err = AtrError::unsupported_container("DCM archives are not yet supported");
        assert_eq!(
            err.to_string(),
            "Unsupported container: DCM archives are not yet supported"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AtrError::FileNotFound("FOO".into()).exit_code(), 1);
        assert_eq!(AtrError::invalid_container("bad").exit_code(), 2);
        assert_eq!(AtrError::invalid_size("short").exit_code(), 2);
        assert_eq!(AtrError::unsupported_disk("ProDOS").exit_code(), 3);
        let rollback = AtrError::Rollback {
            source: Box::new(AtrError::NoSpaceInDirectory),
            refresh: Box::new(AtrError::invalid_disk("gone")),
        };
        assert_eq!(rollback.exit_code(), 1);
    }

    #[test]
    fn test_error_classes() {
        assert!(AtrError::invalid_header("magic").is_probe_miss());
        assert!(!AtrError::unsupported_container("x").is_probe_miss());
        assert!(AtrError::unsupported_container("x").is_unsupported());
        assert!(AtrError::FileNumberMismatch { expected: 1, found: 2 }.is_file_error());
    }
}
