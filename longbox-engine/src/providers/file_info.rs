//! File stat and fingerprint provider

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Default window hashed from each end of a large file
pub const DEFAULT_HASH_SAMPLE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Size/mtime and content fingerprint source
///
/// Synchronous: the scanner calls it from blocking worker threads.
pub trait FileInfoProvider: Send + Sync {
    fn stat(&self, path: &Path) -> std::io::Result<FileStat>;

    /// Content fingerprint; may be sampled for large files
    fn hash(&self, path: &Path) -> std::io::Result<String>;
}

/// `std::fs` + SHA-256 provider
///
/// Files up to twice the sample window are hashed whole. Larger files hash
/// the head window, the tail window and the length.
#[derive(Debug, Clone)]
pub struct FsFileInfoProvider {
    sample_bytes: u64,
}

impl FsFileInfoProvider {
    pub fn new(sample_bytes: u64) -> Self {
        Self {
            sample_bytes: sample_bytes.max(1),
        }
    }
}

impl Default for FsFileInfoProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SAMPLE_BYTES)
    }
}

impl FileInfoProvider for FsFileInfoProvider {
    fn stat(&self, path: &Path) -> std::io::Result<FileStat> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileStat {
            size: metadata.len(),
            modified_at: longbox_common::time::from_system_time(metadata.modified()?),
        })
    }

    fn hash(&self, path: &Path) -> std::io::Result<String> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut hasher = Sha256::new();

        if len <= self.sample_bytes * 2 {
            let mut contents = Vec::with_capacity(len as usize);
            file.read_to_end(&mut contents)?;
            hasher.update(&contents);
        } else {
            let mut buffer = vec![0u8; self.sample_bytes as usize];
            file.read_exact(&mut buffer)?;
            hasher.update(&buffer);
            file.seek(SeekFrom::End(-(self.sample_bytes as i64)))?;
            file.read_exact(&mut buffer)?;
            hasher.update(&buffer);
            hasher.update(len.to_le_bytes());
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_stat_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cbz");
        fs::write(&path, b"hello").unwrap();

        let stat = FsFileInfoProvider::default().stat(&path).unwrap();
        assert_eq!(stat.size, 5);
    }

    #[test]
    fn test_hash_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.cbz");
        let b = dir.path().join("b.cbz");
        let c = dir.path().join("c.cbz");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        fs::write(&c, b"other bytes").unwrap();

        let provider = FsFileInfoProvider::default();
        assert_eq!(provider.hash(&a).unwrap(), provider.hash(&b).unwrap());
        assert_ne!(provider.hash(&a).unwrap(), provider.hash(&c).unwrap());
    }

    #[test]
    fn test_sampled_hash_ignores_middle_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.cbz");
        let b = dir.path().join("b.cbz");
        let mut bytes = vec![7u8; 64];
        fs::write(&a, &bytes).unwrap();
        bytes[32] = 9;
        fs::write(&b, &bytes).unwrap();

        // 8-byte windows: head and tail identical, middle differs
        let provider = FsFileInfoProvider::new(8);
        assert_eq!(provider.hash(&a).unwrap(), provider.hash(&b).unwrap());
        assert_ne!(
            FsFileInfoProvider::default().hash(&a).unwrap(),
            FsFileInfoProvider::default().hash(&b).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let provider = FsFileInfoProvider::default();
        assert!(provider.stat(Path::new("/nonexistent/file.cbz")).is_err());
        assert!(provider.hash(Path::new("/nonexistent/file.cbz")).is_err());
    }
}
