use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Engine configuration, loadable from a TOML file. Every field has a
/// default so a partial (or absent) file still yields a usable config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub default_input_directory: Option<PathBuf>,
    pub default_output_directory: Option<PathBuf>,
    pub output_format: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub overwrite_existing: bool,
    pub preserve_directory_structure: bool,
    pub max_concurrent_jobs: usize,
    pub timeout_secs: u64,
    /// Source extensions the scanner accepts, lowercase, without the dot.
    pub video_extensions: Vec<String>,
    /// Target format -> ffmpeg audio codec. Hosts may add entries.
    pub audio_codecs: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            default_input_directory: None,
            default_output_directory: None,
            output_format: String::from("mp3"),
            audio_bitrate: String::from("192k"),
            audio_sample_rate: 44100,
            overwrite_existing: false,
            preserve_directory_structure: true,
            max_concurrent_jobs: 1,
            timeout_secs: 300,
            video_extensions: default_video_extensions(),
            audio_codecs: default_audio_codecs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|err| ConvertError::Config(err.to_string()))
    }

    /// Loads `path` if it exists, otherwise writes the defaults there so the
    /// user has a file to edit. A write failure is not fatal.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Config::default();
        match toml::to_string_pretty(&config) {
            Ok(serialized) => {
                if let Err(err) = fs::write(path, serialized) {
                    warn!("could not write default config to {path:?}: {err}");
                }
            }
            Err(err) => warn!("could not serialize default config: {err}"),
        }
        Ok(config)
    }

    pub fn codec_for(&self, format: &str) -> Option<&str> {
        self.audio_codecs
            .get(&format.to_lowercase())
            .map(String::as_str)
    }
}

fn default_video_extensions() -> Vec<String> {
    [
        "mp4", "avi", "mov", "wmv", "flv", "mkv", "webm", "mp4v", "m4v", "3gp", "mpg", "mpeg",
        "m2v", "vob", "asf",
    ]
    .iter()
    .map(|s| String::from(*s))
    .collect()
}

fn default_audio_codecs() -> BTreeMap<String, String> {
    [
        ("mp3", "libmp3lame"),
        ("wav", "pcm_s16le"),
        ("aac", "aac"),
        ("m4a", "aac"),
        ("ogg", "libvorbis"),
        ("flac", "flac"),
    ]
    .iter()
    .map(|(k, v)| (String::from(*k), String::from(*v)))
    .collect()
}
