/// Reading and writing image files

use crate::error::Result;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Read a whole image file
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    log::debug!("read {} bytes from {}", bytes.len(), path.as_ref().display());
    Ok(bytes)
}

/// Write a whole image file, replacing any existing file
pub fn write_image<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    log::debug!("wrote {} bytes to {}", bytes.len(), path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtrError;

    #[test]
    fn test_roundtrip() {
        let path = std::env::temp_dir().join(format!("atrcopy-io-{}.bin", uuid::Uuid::new_v4()));
        write_image(&path, &[1, 2, 3]).unwrap();
        assert_eq!(read_image(&path).unwrap(), vec![1, 2, 3]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join(format!("atrcopy-missing-{}.bin", uuid::Uuid::new_v4()));
        assert!(matches!(read_image(&path), Err(AtrError::Io(_))));
    }
}
