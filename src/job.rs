use std::path::{Path, PathBuf};

/// One source-to-destination conversion unit dispatched to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub format: String,
    pub bitrate: String,
}

impl ConversionJob {
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.to_string_lossy().into_owned())
    }
}

/// How destination paths are derived from sources. Evaluated once per job.
#[derive(Clone, Debug)]
pub struct DestinationPolicy {
    pub output_root: Option<PathBuf>,
    /// With an output root set, mirror the source's parent directory name
    /// underneath it instead of flattening everything.
    pub preserve_directory_structure: bool,
}

impl DestinationPolicy {
    pub fn plan(&self, source: &Path, format: &str, bitrate: &str) -> ConversionJob {
        let file_name = match source.file_stem() {
            Some(stem) => format!("{}.{}", stem.to_string_lossy(), format),
            None => format!("converted.{format}"),
        };

        let directory = match &self.output_root {
            Some(root) => {
                let mut dir = root.clone();
                if self.preserve_directory_structure {
                    if let Some(parent_name) = source.parent().and_then(|p| p.file_name()) {
                        dir.push(parent_name);
                    }
                }
                dir
            }
            None => source.parent().map(PathBuf::from).unwrap_or_default(),
        };

        ConversionJob {
            source: source.to_path_buf(),
            destination: directory.join(file_name),
            format: String::from(format),
            bitrate: String::from(bitrate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_next_to_source_by_default() {
        let policy = DestinationPolicy {
            output_root: None,
            preserve_directory_structure: true,
        };
        let job = policy.plan(Path::new("/media/shows/clip.mp4"), "mp3", "192k");
        assert_eq!(job.destination, PathBuf::from("/media/shows/clip.mp3"));
        assert_eq!(job.format, "mp3");
        assert_eq!(job.bitrate, "192k");
    }

    #[test]
    fn test_output_root_flattened() {
        let policy = DestinationPolicy {
            output_root: Some(PathBuf::from("/out")),
            preserve_directory_structure: false,
        };
        let job = policy.plan(Path::new("/media/shows/clip.mkv"), "flac", "320k");
        assert_eq!(job.destination, PathBuf::from("/out/clip.flac"));
    }

    #[test]
    fn test_output_root_preserving_parent_directory() {
        let policy = DestinationPolicy {
            output_root: Some(PathBuf::from("/out")),
            preserve_directory_structure: true,
        };
        let job = policy.plan(Path::new("/media/shows/clip.mkv"), "mp3", "192k");
        assert_eq!(job.destination, PathBuf::from("/out/shows/clip.mp3"));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let policy = DestinationPolicy {
            output_root: Some(PathBuf::from("/out")),
            preserve_directory_structure: true,
        };
        let a = policy.plan(Path::new("/media/x/clip.mp4"), "mp3", "192k");
        let b = policy.plan(Path::new("/media/x/clip.mp4"), "mp3", "192k");
        assert_eq!(a, b);
    }

    #[test]
    fn test_file_name_label() {
        let policy = DestinationPolicy {
            output_root: None,
            preserve_directory_structure: false,
        };
        let job = policy.plan(Path::new("/media/clip.mp4"), "mp3", "192k");
        assert_eq!(job.file_name(), "clip.mp4");
    }
}
