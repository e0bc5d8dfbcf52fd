use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::dedup::{Classification, ScanSession};
use crate::error::{ConvertError, Result};

/// A source file discovered during a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub extension: String,
    pub size: u64,
}

/// Scan result: the deduplicated work list plus how many candidates were
/// dropped as duplicates.
#[derive(Debug)]
pub struct ScanOutcome {
    pub files: Vec<CandidateFile>,
    pub duplicates: usize,
}

pub struct FileScanner {
    recursive: bool,
    extensions: Vec<String>,
}

impl FileScanner {
    pub fn new(recursive: bool) -> Self {
        FileScanner {
            recursive,
            extensions: crate::config::Config::default().video_extensions,
        }
    }

    /// Replaces the default extension allow-list. Entries are matched
    /// case-insensitively and without the dot.
    pub fn extensions(mut self, extensions: &[String]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Scans `root` (a directory, or a single file) and returns the matching
    /// files ordered case-insensitively by file name, duplicates excluded.
    /// Duplicate detection is scoped to this call: a fresh session each time.
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome> {
        let metadata = fs::metadata(root).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ConvertError::NotFound(root.to_path_buf()),
            _ => ConvertError::Io(err),
        })?;

        let mut session = ScanSession::new();
        if metadata.is_file() {
            return self.scan_single_file(root, &mut session);
        }
        if !metadata.is_dir() {
            return Err(ConvertError::InvalidInput {
                path: root.to_path_buf(),
                reason: String::from("neither a regular file nor a directory"),
            });
        }

        let mut matching: Vec<PathBuf> = Vec::new();
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && self.matches_extension(entry.path()) {
                matching.push(entry.into_path());
            }
        }

        // Classify in sorted order so the canonical pick for identical
        // content is deterministic across runs.
        sort_by_file_name(&mut matching);

        let mut files = Vec::new();
        for path in matching {
            match session.classify(&path) {
                Classification::New => {
                    if let Some(candidate) = make_candidate(path) {
                        files.push(candidate);
                    }
                }
                Classification::DuplicateOf(canonical) => {
                    debug!("skipping {path:?}: duplicate of {canonical:?}");
                }
            }
        }

        info!(
            "scan of {root:?}: {} to convert, {} duplicates",
            files.len(),
            session.duplicate_count()
        );
        Ok(ScanOutcome {
            files,
            duplicates: session.duplicate_count(),
        })
    }

    fn scan_single_file(&self, path: &Path, session: &mut ScanSession) -> Result<ScanOutcome> {
        if !self.matches_extension(path) {
            return Err(ConvertError::InvalidInput {
                path: path.to_path_buf(),
                reason: String::from("unsupported file extension"),
            });
        }
        // On a fresh session a lone file is trivially non-duplicate, but
        // classify anyway so it lands in the index.
        let files = match session.classify(path) {
            Classification::New => make_candidate(path.to_path_buf()).into_iter().collect(),
            Classification::DuplicateOf(_) => Vec::new(),
        };
        Ok(ScanOutcome {
            files,
            duplicates: session.duplicate_count(),
        })
    }

    fn matches_extension(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}

fn make_candidate(path: PathBuf) -> Option<CandidateFile> {
    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())?;
    Some(CandidateFile {
        path,
        extension,
        size,
    })
}

fn sort_by_file_name(paths: &mut [PathBuf]) {
    paths.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
}
