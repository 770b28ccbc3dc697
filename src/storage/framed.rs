//! Checksummed binary file framing shared by the persisted index artifacts.
//!
//! Frame layout: 4 magic bytes, u32 format version, u32 crc32 of the body,
//! then the body. Writes go to a sibling tmp file followed by an atomic
//! rename, so a crash mid-write leaves the previous artifact intact.

use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Bytes before the body: magic + version + checksum.
const FRAME_HEADER: usize = 12;

/// Why a framed file could not be read. Callers map these onto their
/// domain errors (index vs. mapping) with the collection name attached.
#[derive(Debug)]
pub enum FrameError {
    /// No file at the path.
    Missing,
    /// Unreadable: bad magic, truncated, checksum mismatch, or an
    /// unrecognized format version.
    Corrupt(String),
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Self::Missing
        } else {
            Self::Io(e)
        }
    }
}

/// Writes `body` framed under `magic`/`version`, atomically.
pub fn write_framed(path: &Path, magic: &[u8; 4], version: u32, body: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(magic)?;
        file.write_all(&version.to_le_bytes())?;
        file.write_all(&crc32fast::hash(body).to_le_bytes())?;
        file.write_all(body)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Reads and verifies a framed file, returning the body bytes.
pub fn read_framed(path: &Path, magic: &[u8; 4], version: u32) -> Result<Vec<u8>, FrameError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file).map_err(FrameError::Io)? };

    if mmap.len() < FRAME_HEADER {
        return Err(FrameError::Corrupt(format!(
            "file too small to contain header ({} bytes)",
            mmap.len()
        )));
    }
    if &mmap[0..4] != magic {
        return Err(FrameError::Corrupt("invalid magic bytes".to_string()));
    }

    let found_version = u32::from_le_bytes(mmap[4..8].try_into().expect("slice is 4 bytes"));
    if found_version != version {
        return Err(FrameError::Corrupt(format!(
            "unrecognized format version {found_version} (supported: {version})"
        )));
    }

    let stored_crc = u32::from_le_bytes(mmap[8..12].try_into().expect("slice is 4 bytes"));
    let body = &mmap[FRAME_HEADER..];
    let actual_crc = crc32fast::hash(body);
    if stored_crc != actual_crc {
        return Err(FrameError::Corrupt(format!(
            "checksum mismatch (stored {stored_crc:#010x}, computed {actual_crc:#010x})"
        )));
    }

    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAGIC: &[u8; 4] = b"TEST";

    #[test]
    fn round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");

        write_framed(&path, MAGIC, 1, b"hello world").unwrap();
        let body = read_framed(&path, MAGIC, 1).unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn missing_file_is_distinguished() {
        let dir = TempDir::new().unwrap();
        let result = read_framed(&dir.path().join("absent.bin"), MAGIC, 1);
        assert!(matches!(result, Err(FrameError::Missing)));
    }

    #[test]
    fn truncation_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        write_framed(&path, MAGIC, 1, &[7u8; 256]).unwrap();

        // Chop off the tail
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let result = read_framed(&path, MAGIC, 1);
        assert!(matches!(result, Err(FrameError::Corrupt(_))));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        write_framed(&path, MAGIC, 1, &[7u8; 64]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let result = read_framed(&path, MAGIC, 1);
        assert!(matches!(result, Err(FrameError::Corrupt(ref r)) if r.contains("checksum")));
    }

    #[test]
    fn wrong_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        write_framed(&path, MAGIC, 2, b"body").unwrap();

        let result = read_framed(&path, MAGIC, 1);
        assert!(matches!(result, Err(FrameError::Corrupt(ref r)) if r.contains("version")));
    }

    #[test]
    fn tmp_file_is_not_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        write_framed(&path, MAGIC, 1, b"body").unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
}
