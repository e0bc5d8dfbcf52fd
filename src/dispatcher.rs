use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::job::{ConversionJob, DestinationPolicy};
use crate::progress::ProgressEvent;
use crate::scanner::CandidateFile;
use crate::supervisor::{JobOutcome, Supervisor, check_ffmpeg};

/// Receives dispatcher callbacks. Invoked from worker threads, so
/// implementations must be thread-safe; calls to `on_job_done` are
/// serialized by the dispatcher's tally lock.
pub trait BatchObserver: Sync {
    /// Per-file progress, re-labeled with the originating file name.
    fn on_file_progress(&self, _file_name: &str, _event: &ProgressEvent) {}

    /// A job reached a terminal state. `completed`/`total` give aggregate
    /// job-count progress, independent of per-file timing.
    fn on_job_done(&self, _result: &JobResult, _completed: usize, _total: usize) {}
}

pub struct NullObserver;

impl BatchObserver for NullObserver {}

#[derive(Clone, Debug)]
pub struct JobResult {
    pub job: ConversionJob,
    pub outcome: JobOutcome,
}

#[derive(Clone, Debug)]
pub struct JobFailure {
    pub source: PathBuf,
    pub reason: String,
}

/// Final tally for one batch. `succeeded + failures.len() == total` unless
/// the batch was stopped early, in which case unstarted jobs appear in
/// neither bucket.
#[derive(Clone, Debug, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub total: usize,
    pub duplicates: usize,
    pub failures: Vec<JobFailure>,
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    completed: usize,
    failures: Vec<JobFailure>,
}

/// Owns the worker pool. Jobs are submitted in scan order; with one worker
/// they also complete in scan order, with more the completion order is
/// unconstrained and only the tally is guaranteed.
pub struct Dispatcher {
    config: Config,
    stop: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        Dispatcher {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs a shared stop flag. Once set, no further jobs are dequeued
    /// and in-flight supervisors are asked to terminate their children.
    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Converts every candidate, returning the aggregate tally. Per-job
    /// failures are recorded and never abort the batch; only a missing
    /// transcoder binary fails before anything is scheduled.
    pub fn convert_all(
        &self,
        candidates: &[CandidateFile],
        duplicates: usize,
        observer: &dyn BatchObserver,
    ) -> Result<BatchSummary> {
        check_ffmpeg(&self.config.ffmpeg_path)?;

        let policy = DestinationPolicy {
            output_root: self.config.default_output_directory.clone(),
            preserve_directory_structure: self.config.preserve_directory_structure,
        };
        let jobs: VecDeque<ConversionJob> = candidates
            .iter()
            .map(|c| {
                policy.plan(
                    &c.path,
                    &self.config.output_format,
                    &self.config.audio_bitrate,
                )
            })
            .collect();

        let total = jobs.len();
        let workers = self.config.max_concurrent_jobs.clamp(1, total.max(1));
        info!("dispatching {total} jobs across {workers} workers");

        let queue = Mutex::new(jobs);
        let tally = Mutex::new(Tally::default());

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| self.worker_loop(&queue, &tally, total, observer));
            }
        });

        let tally = tally.into_inner().unwrap_or_else(|p| p.into_inner());
        Ok(BatchSummary {
            succeeded: tally.succeeded,
            total,
            duplicates,
            failures: tally.failures,
        })
    }

    fn worker_loop(
        &self,
        queue: &Mutex<VecDeque<ConversionJob>>,
        tally: &Mutex<Tally>,
        total: usize,
        observer: &dyn BatchObserver,
    ) {
        let supervisor =
            Supervisor::new(&self.config).stop_flag(Arc::clone(&self.stop));
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            let Some(job) = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front() else {
                return;
            };

            let file_name = job.file_name();
            let mut forward =
                |event: ProgressEvent| observer.on_file_progress(&file_name, &event);
            let outcome = match supervisor.run(&job, &mut forward) {
                Ok(outcome) => outcome,
                Err(err) => JobOutcome::Failed(err.to_string()),
            };

            // All counter updates happen under the one tally lock, which
            // also serializes on_job_done invocations.
            let mut tally = tally.lock().unwrap_or_else(|p| p.into_inner());
            tally.completed += 1;
            if outcome.is_success() {
                tally.succeeded += 1;
            } else {
                warn!("job for {:?} did not succeed: {}", job.source, outcome.describe());
                tally.failures.push(JobFailure {
                    source: job.source.clone(),
                    reason: outcome.describe(),
                });
            }
            let result = JobResult { job, outcome };
            observer.on_job_done(&result, tally.completed, total);
        }
    }
}
