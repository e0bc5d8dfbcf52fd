//! Batch video→audio conversion engine. Transcoding itself is delegated to
//! an external ffmpeg process; this crate owns duplicate-content detection,
//! directory scanning, concurrent job dispatch, and real-time progress
//! extraction from ffmpeg's diagnostic stream.

pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod probe;
pub mod progress;
pub mod scanner;
pub mod supervisor;

pub use config::Config;
pub use dispatcher::{BatchObserver, BatchSummary, Dispatcher, JobFailure, JobResult, NullObserver};
pub use error::{ConvertError, Result};
pub use job::{ConversionJob, DestinationPolicy};
pub use progress::ProgressEvent;
pub use scanner::{CandidateFile, FileScanner, ScanOutcome};
pub use supervisor::{JobOutcome, Supervisor};
