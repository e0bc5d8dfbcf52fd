use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{ConvertError, Result};

#[derive(Deserialize, Debug)]
struct FFProbeJsonOutput {
    format: FFProbeJsonFormat,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonFormat {
    duration: Option<String>,
}

/// Asks ffprobe for the source's total duration in seconds, bounded by
/// `timeout` so a wedged probe cannot hold a worker past the job ceiling.
/// Failure here is never fatal to a job; the supervisor falls back to
/// estimation.
pub fn probe_duration(ffprobe_path: &Path, media: &Path, timeout: Duration) -> Result<f64> {
    let mut child = Command::new(ffprobe_path)
        .args(["-v", "error", "-of", "json", "-show_format"])
        .arg(media)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| probe_error(media, format!("could not run ffprobe: {err}")))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| probe_error(media, String::from("ffprobe stdout was not piped")))?;

    let deadline = Instant::now() + timeout;
    let child = Mutex::new(child);
    let done = AtomicBool::new(false);
    let timed_out = AtomicBool::new(false);

    let mut raw = String::new();
    let read_result = thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                if Instant::now() >= deadline {
                    timed_out.store(true, Ordering::Relaxed);
                    let _ = child.lock().unwrap().kill();
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        });
        let result = stdout.read_to_string(&mut raw);
        done.store(true, Ordering::Relaxed);
        result
    });

    let status = match child.into_inner() {
        Ok(mut child) => child.wait(),
        Err(poisoned) => poisoned.into_inner().wait(),
    }
    .map_err(|err| probe_error(media, format!("could not wait for ffprobe: {err}")))?;

    if timed_out.load(Ordering::Relaxed) {
        return Err(probe_error(
            media,
            format!("ffprobe did not finish within {}s", timeout.as_secs()),
        ));
    }
    read_result
        .map_err(|err| probe_error(media, format!("could not read ffprobe output: {err}")))?;
    if !status.success() {
        return Err(probe_error(
            media,
            String::from("ffprobe did not exit successfully"),
        ));
    }

    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(&raw)
        .map_err(|err| probe_error(media, format!("unexpected ffprobe output: {err}")))?;
    deserialized
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| probe_error(media, String::from("no usable duration field")))
}

fn probe_error(media: &Path, reason: String) -> ConvertError {
    ConvertError::Probe {
        path: media.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_json_shape() {
        let parsed: FFProbeJsonOutput =
            serde_json::from_str(r#"{"format":{"duration":"93.43","size":"123"}}"#).unwrap();
        assert_eq!(parsed.format.duration.as_deref(), Some("93.43"));
    }

    #[test]
    fn test_duration_field_may_be_absent() {
        let parsed: FFProbeJsonOutput = serde_json::from_str(r#"{"format":{}}"#).unwrap();
        assert!(parsed.format.duration.is_none());
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_probe_against_stub_ffprobe() {
            let dir = tempfile::tempdir().unwrap();
            let stub = write_stub(
                dir.path(),
                "ffprobe",
                "#!/bin/sh\necho '{\"format\":{\"duration\":\"12.5\"}}'\n",
            );
            let duration =
                probe_duration(&stub, Path::new("whatever.mp4"), Duration::from_secs(30)).unwrap();
            assert_eq!(duration, 12.5);
        }

        #[test]
        fn test_probe_failure_is_probe_error() {
            let dir = tempfile::tempdir().unwrap();
            let stub = write_stub(dir.path(), "ffprobe", "#!/bin/sh\nexit 1\n");
            let err = probe_duration(&stub, Path::new("whatever.mp4"), Duration::from_secs(30))
                .unwrap_err();
            assert!(matches!(err, ConvertError::Probe { .. }));
        }

        #[test]
        fn test_stalled_probe_is_killed_at_the_deadline() {
            let dir = tempfile::tempdir().unwrap();
            let stub = write_stub(dir.path(), "ffprobe", "#!/bin/sh\nexec sleep 30\n");
            let started = Instant::now();
            let err = probe_duration(&stub, Path::new("whatever.mp4"), Duration::from_secs(1))
                .unwrap_err();
            assert!(matches!(err, ConvertError::Probe { .. }));
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
