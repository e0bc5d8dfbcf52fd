use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::job::ConversionJob;
use crate::probe::probe_duration;
use crate::progress::{DiagLines, ProgressEvent, ProgressParser, is_failure_hint};

/// Terminal state of one supervised conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }

    pub fn describe(&self) -> String {
        match self {
            JobOutcome::Succeeded => String::from("succeeded"),
            JobOutcome::Failed(reason) => reason.clone(),
            JobOutcome::TimedOut => String::from("timed out"),
            JobOutcome::Cancelled => String::from("cancelled"),
        }
    }
}

/// Verifies the transcoder binary responds at all. Run once before a batch;
/// a missing binary should fail the whole batch up front, not every job.
pub fn check_ffmpeg(ffmpeg_path: &Path) -> Result<()> {
    match Command::new(ffmpeg_path).arg("-version").output() {
        Ok(output) if output.status.success() => Ok(()),
        _ => Err(ConvertError::FfmpegUnavailable(ffmpeg_path.to_path_buf())),
    }
}

/// Wraps one external ffmpeg invocation: probes the source duration, spawns
/// the process with stderr piped back, feeds each diagnostic line through
/// the progress parser, and maps exit state to a `JobOutcome`.
pub struct Supervisor {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    sample_rate: u32,
    overwrite: bool,
    timeout: Duration,
    codecs: BTreeMap<String, String>,
    stop: Option<Arc<AtomicBool>>,
}

impl Supervisor {
    pub fn new(config: &Config) -> Self {
        Supervisor {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            sample_rate: config.audio_sample_rate,
            overwrite: config.overwrite_existing,
            timeout: Duration::from_secs(config.timeout_secs),
            codecs: config.audio_codecs.clone(),
            stop: None,
        }
    }

    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Runs one job to a terminal state, invoking `on_progress` zero or more
    /// times along the way. Only structural problems (spawn failure, broken
    /// destination directory) surface as `Err`.
    pub fn run(
        &self,
        job: &ConversionJob,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<JobOutcome> {
        if job.destination.exists() && !self.overwrite {
            info!("skipping {:?}: destination already exists", job.source);
            on_progress(ProgressEvent {
                elapsed: 0.0,
                total: 0.0,
                percentage: 100.0,
            });
            return Ok(JobOutcome::Succeeded);
        }

        if self.stop_requested() {
            return Ok(JobOutcome::Cancelled);
        }

        if let Some(parent) = job.destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // The wall-clock ceiling covers the whole job, probe included; a
        // wedged ffprobe must not let a worker run past the timeout.
        let started = Instant::now();
        let deadline = started + self.timeout;

        let total = match probe_duration(&self.ffprobe_path, &job.source, self.timeout) {
            Ok(duration) => Some(duration),
            Err(err) => {
                warn!("{err}; falling back to estimated progress");
                None
            }
        };
        if Instant::now() >= deadline {
            warn!(
                "transcode of {:?} exceeded {}s, killed",
                job.source,
                self.timeout.as_secs()
            );
            return Ok(JobOutcome::TimedOut);
        }

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.build_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ConvertError::Transcode {
                path: job.source.clone(),
                reason: format!("could not spawn ffmpeg: {err}"),
            })?;
        let stderr = child.stderr.take().ok_or_else(|| ConvertError::Transcode {
            path: job.source.clone(),
            reason: String::from("ffmpeg stderr was not piped"),
        })?;

        let child = Mutex::new(child);
        let done = AtomicBool::new(false);
        let timed_out = AtomicBool::new(false);
        let mut cancelled = false;

        let parser = thread::scope(|s| {
            // Watchdog covering the case where ffmpeg hangs without writing
            // anything, which would leave the read loop blocked forever.
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

            let mut parser = ProgressParser::new(total);
            for line in DiagLines::new(BufReader::new(stderr)) {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if self.stop_requested() {
                    cancelled = true;
                    let _ = child.lock().unwrap().kill();
                    break;
                }
                if is_failure_hint(&line) {
                    warn!("ffmpeg: {line}");
                }
                if let Some(event) = parser.handle_line(&line, started.elapsed().as_secs_f64()) {
                    on_progress(event);
                }
            }
            done.store(true, Ordering::Relaxed);
            parser
        });

        let status = match child.into_inner() {
            Ok(mut child) => child.wait()?,
            Err(poisoned) => poisoned.into_inner().wait()?,
        };

        if timed_out.load(Ordering::Relaxed) {
            warn!(
                "transcode of {:?} exceeded {}s, killed",
                job.source,
                self.timeout.as_secs()
            );
            let _ = fs::remove_file(&job.destination);
            return Ok(JobOutcome::TimedOut);
        }
        if cancelled {
            let _ = fs::remove_file(&job.destination);
            return Ok(JobOutcome::Cancelled);
        }

        if status.success() && output_is_usable(&job.destination) {
            on_progress(parser.finish());
            info!("converted {:?} -> {:?}", job.source, job.destination);
            return Ok(JobOutcome::Succeeded);
        }

        let reason = if status.success() {
            String::from("output file missing or empty")
        } else {
            match status.code() {
                Some(code) => format!("ffmpeg exited with status {code}"),
                None => String::from("ffmpeg was terminated by a signal"),
            }
        };
        discard_empty_output(&job.destination);
        warn!("conversion of {:?} failed: {reason}", job.source);
        Ok(JobOutcome::Failed(reason))
    }

    fn build_args(&self, job: &ConversionJob) -> Vec<PathBuf> {
        let codec = match self.codecs.get(&job.format.to_lowercase()) {
            Some(codec) => codec.clone(),
            None => {
                warn!(
                    "no codec mapping for format {:?}, defaulting to libmp3lame",
                    job.format
                );
                String::from("libmp3lame")
            }
        };

        vec![
            PathBuf::from("-hide_banner"),
            PathBuf::from("-i"),
            job.source.clone(),
            PathBuf::from("-vn"),
            PathBuf::from("-acodec"),
            PathBuf::from(codec),
            PathBuf::from("-ab"),
            PathBuf::from(&job.bitrate),
            PathBuf::from("-ar"),
            PathBuf::from(self.sample_rate.to_string()),
            PathBuf::from(if self.overwrite { "-y" } else { "-n" }),
            job.destination.clone(),
        ]
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|s| s.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

fn output_is_usable(destination: &Path) -> bool {
    fs::metadata(destination).map(|m| m.len() > 0).unwrap_or(false)
}

/// Cleans up a zero-byte leftover without touching a destination that might
/// be a pre-existing good file (ffmpeg refuses to overwrite under `-n`).
fn discard_empty_output(destination: &Path) {
    if let Ok(metadata) = fs::metadata(destination) {
        if metadata.len() == 0 {
            let _ = fs::remove_file(destination);
        }
    }
}
