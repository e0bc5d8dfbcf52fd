use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{ConvertError, Result};

/// Chunk size for streaming file hashes; keeps memory constant no matter
/// how large the source file is.
const HASH_CHUNK_SIZE: usize = 8192;

/// Fixed-size blake3 digest of a file's byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    New,
    DuplicateOf(PathBuf),
}

/// Duplicate-detection state for exactly one scan. A fresh session is
/// created per scan invocation; nothing persists across scans.
#[derive(Debug, Default)]
pub struct ScanSession {
    index: HashMap<ContentDigest, PathBuf>,
    duplicates: Vec<PathBuf>,
}

impl ScanSession {
    pub fn new() -> Self {
        ScanSession::default()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }

    pub fn duplicates(&self) -> &[PathBuf] {
        &self.duplicates
    }

    /// Classifies `path` against everything indexed so far. A file that
    /// cannot be hashed is conservatively treated as new: a false negative
    /// converts a file twice, a false positive would silently drop one.
    pub fn classify(&mut self, path: &Path) -> Classification {
        let digest = match hash_file(path) {
            Ok(digest) => digest,
            Err(err) => {
                warn!("{err}; treating file as unique");
                return Classification::New;
            }
        };

        if let Some(canonical) = self.index.get(&digest) {
            if canonical.exists() {
                info!("duplicate content: {path:?} matches {canonical:?}");
                self.duplicates.push(path.to_path_buf());
                return Classification::DuplicateOf(canonical.clone());
            }
            // The first-seen file has vanished since it was indexed; this
            // one takes over as canonical.
        }

        self.index.insert(digest, path.to_path_buf());
        Classification::New
    }
}

/// Hashes a file in fixed-size chunks.
pub fn hash_file(path: &Path) -> Result<ContentDigest> {
    let mut file = File::open(path).map_err(|source| ConvertError::Hash {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = blake3::Hasher::new();
    let mut chunk = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut chunk).map_err(|source| ConvertError::Hash {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(ContentDigest(*hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_identical_content_hashes_equal() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.bin", b"same bytes");
        let b = write_file(dir.path(), "b.bin", b"same bytes");
        let c = write_file(dir.path(), "c.bin", b"other bytes");
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
        assert_ne!(hash_file(&a).unwrap(), hash_file(&c).unwrap());
    }

    #[test]
    fn test_copies_classified_as_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp4", b"payload");
        let b = write_file(dir.path(), "b.mp4", b"payload");
        let c = write_file(dir.path(), "c.mp4", b"payload");

        let mut session = ScanSession::new();
        assert_eq!(session.classify(&a), Classification::New);
        assert_eq!(session.classify(&b), Classification::DuplicateOf(a.clone()));
        assert_eq!(session.classify(&c), Classification::DuplicateOf(a.clone()));
        assert_eq!(session.duplicate_count(), 2);
    }

    #[test]
    fn test_vanished_canonical_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp4", b"payload");
        let b = write_file(dir.path(), "b.mp4", b"payload");
        let c = write_file(dir.path(), "c.mp4", b"payload");

        let mut session = ScanSession::new();
        assert_eq!(session.classify(&a), Classification::New);

        // canonical disappears between indexing and classifying the copy
        fs::remove_file(&a).unwrap();
        assert_eq!(session.classify(&b), Classification::New);
        assert_eq!(session.duplicate_count(), 0);

        // and the promoted file now anchors later copies
        assert_eq!(session.classify(&c), Classification::DuplicateOf(b.clone()));
        assert_eq!(session.duplicate_count(), 1);
    }

    #[test]
    fn test_unreadable_file_is_treated_as_new() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.mp4");
        let mut session = ScanSession::new();
        assert_eq!(session.classify(&missing), Classification::New);
        assert_eq!(session.duplicate_count(), 0);
    }

    #[test]
    fn test_sessions_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp4", b"payload");

        let mut first = ScanSession::new();
        assert_eq!(first.classify(&a), Classification::New);

        let mut second = ScanSession::new();
        assert_eq!(second.classify(&a), Classification::New);
    }
}
