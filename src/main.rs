use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use human_repr::HumanCount;
use kdam::{Bar, BarExt, term, tqdm};
use rustop::opts;

use convert_audio::dispatcher::{BatchObserver, JobResult};
use convert_audio::progress::ProgressEvent;
use convert_audio::{Config, Dispatcher, FileScanner};

struct CliObserver {
    bar: Mutex<Bar>,
}

impl BatchObserver for CliObserver {
    fn on_file_progress(&self, file_name: &str, event: &ProgressEvent) {
        let mut bar = self.bar.lock().unwrap();
        bar.set_postfix(format!("{file_name} {:.1}%", event.percentage));
        let _ = bar.refresh();
    }

    fn on_job_done(&self, result: &JobResult, completed: usize, _total: usize) {
        let mut bar = self.bar.lock().unwrap();
        if !result.outcome.is_success() {
            let _ = bar.write(format!(
                "failed: {} ({})",
                result.job.file_name(),
                result.outcome.describe()
            ));
        }
        let _ = bar.update_to(completed);
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let (args, _rest) = opts! {
        synopsis "Batch-convert video files to audio using ffmpeg.";
        opt output:Option<String>, desc:"Output directory. Defaults to each source file's directory.";
        opt format:Option<String>, desc:"Target audio format. [mp3, wav, aac, m4a, ogg, flac]";
        opt quality:Option<String>, desc:"Audio bitrate. [64k, 128k, 192k, 256k, 320k]";
        opt overwrite:bool=false, short:'w', desc:"Overwrite existing output files.";
        opt no_recursive:bool=false, desc:"Do not recurse into subdirectories.";
        opt jobs:Option<usize>, desc:"Number of concurrent conversion workers.";
        opt config:String=String::from("config.toml"), desc:"Configuration file path.";
        param input:Option<String>, desc:"Input file or directory. Falls back to the configured default.";
    }.parse_or_exit();

    let mut config = match Config::load_or_create(Path::new(&args.config)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("could not load {:?}: {err}", args.config);
            return ExitCode::FAILURE;
        }
    };
    if let Some(output) = args.output {
        config.default_output_directory = Some(PathBuf::from(output));
    }
    if let Some(format) = args.format {
        config.output_format = format.to_lowercase();
    }
    if let Some(quality) = args.quality {
        config.audio_bitrate = quality;
    }
    if let Some(jobs) = args.jobs {
        config.max_concurrent_jobs = jobs;
    }
    if args.overwrite {
        config.overwrite_existing = true;
    }

    let input = match args
        .input
        .map(PathBuf::from)
        .or_else(|| config.default_input_directory.clone())
    {
        Some(input) => input,
        None => {
            eprintln!("no input given and no default_input_directory configured");
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop)) {
        eprintln!("could not install SIGINT handler: {err}");
    }

    let scanner =
        FileScanner::new(!args.no_recursive).extensions(&config.video_extensions);
    let outcome = match scanner.scan(&input) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("scan failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if outcome.duplicates > 0 {
        println!("skipping {} duplicate file(s)", outcome.duplicates);
    }
    if outcome.files.is_empty() {
        println!("no video files to convert");
        return ExitCode::FAILURE;
    }
    let total_bytes: u64 = outcome.files.iter().map(|f| f.size).sum();
    println!(
        "converting {} file(s) ({}) to {} with {} worker(s)",
        outcome.files.len(),
        total_bytes.human_count_bytes(),
        config.output_format,
        config.max_concurrent_jobs.max(1),
    );

    term::init(false);
    let observer = CliObserver {
        bar: Mutex::new(tqdm!(
            total = outcome.files.len(),
            desc = String::from("converting"),
            position = 0,
            force_refresh = true
        )),
    };

    let dispatcher = Dispatcher::new(config).stop_flag(Arc::clone(&stop));
    let summary = match dispatcher.convert_all(&outcome.files, outcome.duplicates, &observer) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("batch failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!(
        "done: {} succeeded, {} failed, {} duplicate(s) skipped",
        summary.succeeded,
        summary.total - summary.succeeded,
        summary.duplicates
    );
    for failure in &summary.failures {
        println!("  failed: {:?} ({})", failure.source, failure.reason);
    }

    if summary.succeeded == summary.total {
        ExitCode::SUCCESS
    } else if summary.succeeded == 0 {
        ExitCode::from(2)
    } else {
        ExitCode::from(3)
    }
}
