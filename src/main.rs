//! MP3 Speed
//!
//! Command-line tool that speeds up MP3 files (audiobooks, podcasts) with
//! ffmpeg's atempo filter, one file at a time, with per-file and overall
//! progress.

mod audio;
mod conversion;
mod core;
mod error;
mod logging;
#[cfg(test)]
mod test_fixtures;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use clap::{Args, Parser, Subcommand};

use audio::{AudioFile, ProbeStore};
use conversion::{
    ArchiveSink, BatchEvent, BatchOrchestrator, BatchReport, DirectorySink, FfmpegEngine,
    ResultSink,
};
use crate::core::{Settings, collect_inputs, format_hms, format_size_mb, total_after_conversion};

/// Name of the JSON report written next to the outputs
const REPORT_FILE: &str = "report.json";

#[derive(Debug, Parser)]
#[command(name = "mp3-speed", version, about = "Speed up MP3 files with ffmpeg")]
struct Cli {
    /// Show debug output in the terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show tags, duration and bitrate of each file
    Probe {
        /// MP3 files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Speed used for the converted total duration
        #[arg(short, long)]
        speed: Option<f64>,
    },
    /// Convert files to a faster playback speed
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// MP3 files or directories
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Speed multiplier (e.g. 1.5)
    #[arg(short, long)]
    speed: Option<f64>,

    /// Directory for converted files and the report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Bundle outputs into converted.zip
    #[arg(long)]
    zip: bool,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Output bitrate in kbps instead of each file's own
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Output codec passed to ffmpeg
    #[arg(long)]
    codec: Option<String>,

    /// Store the effective options as the new defaults
    #[arg(long)]
    save_settings: bool,
}

impl ConvertArgs {
    /// Apply command-line overrides on top of saved settings
    fn apply(&self, settings: &mut Settings) {
        if let Some(speed) = self.speed {
            settings.speed = speed;
        }
        if let Some(output) = &self.output {
            settings.output_dir = Some(output.clone());
        }
        if self.zip {
            settings.archive = true;
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            settings.ffmpeg_path = Some(ffmpeg.clone());
        }
        if let Some(bitrate) = self.bitrate {
            settings.bitrate_kbps = Some(bitrate);
        }
        if let Some(codec) = &self.codec {
            settings.codec = codec.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let result = match cli.command {
        Command::Probe { inputs, speed } => run_probe(&inputs, speed).await,
        Command::Convert(args) => run_convert(args).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Read every input into memory; unreadable files are logged and skipped
async fn load_files(paths: &[PathBuf]) -> (Vec<AudioFile>, usize) {
    let mut files = Vec::with_capacity(paths.len());
    let mut failures = 0;
    for path in paths {
        match AudioFile::load(path).await {
            Ok(file) => files.push(file),
            Err(e) => {
                log::error!("{}", e);
                failures += 1;
            }
        }
    }
    (files, failures)
}

async fn run_probe(inputs: &[PathBuf], speed: Option<f64>) -> Result<bool, String> {
    let speed = speed.unwrap_or_else(|| Settings::load().speed);
    if !speed.is_finite() || speed <= 0.0 {
        return Err(format!("Speed must be a positive number, got {}", speed));
    }

    let paths = collect_inputs(inputs);
    if paths.is_empty() {
        return Err("No MP3 files found".to_string());
    }

    let (files, failures) = load_files(&paths).await;
    let store = ProbeStore::new();
    let mut durations = Vec::with_capacity(files.len());

    for file in &files {
        let meta = store.probe(file);
        println!("{}", file.name);
        println!("  Author:   {}", meta.author);
        println!("  Album:    {}", meta.album);
        println!("  Title:    {}", meta.title);
        println!("  Duration: {}", format_hms(meta.duration_secs));
        println!("  Size:     {}", format_size_mb(file.size()));
        println!("  Bitrate:  {} kbps", meta.bitrate_kbps);
        durations.push(meta.duration_secs);
    }

    println!(
        "Total after conversion (x{}): {}",
        speed,
        format_hms(total_after_conversion(&durations, speed))
    );
    Ok(failures == 0)
}

async fn run_convert(args: ConvertArgs) -> Result<bool, String> {
    let mut settings = Settings::load();
    args.apply(&mut settings);
    settings.validate()?;

    if args.save_settings {
        let path = settings.save()?;
        log::info!("Saved settings to {}", path.display());
    }

    let ffmpeg = conversion::verify_ffmpeg(settings.ffmpeg_path.as_deref())?;

    let paths = collect_inputs(&args.inputs);
    if paths.is_empty() {
        return Err("No MP3 files found".to_string());
    }
    let (files, load_failures) = load_files(&paths).await;

    let output_dir = settings.output_dir();
    let mut sink: Box<dyn ResultSink> = if settings.archive {
        Box::new(ArchiveSink::in_dir(&output_dir))
    } else {
        Box::new(DirectorySink::new(&output_dir)?)
    };

    let engine = FfmpegEngine::new(ffmpeg)?;
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || print_events(rx));

    let mut orchestrator =
        BatchOrchestrator::new(engine, Arc::new(ProbeStore::new()), settings.batch_options())
            .with_events(tx);
    let report = orchestrator.run(&files, sink.as_mut()).await;

    // Dropping the orchestrator closes the event channel
    drop(orchestrator);
    let _ = printer.join();

    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        log::warn!("Failed to create output directory: {}", e);
    }
    save_report(&report, &output_dir);
    print_summary(&report);

    Ok(report.all_succeeded() && load_failures == 0)
}

fn save_report(report: &BatchReport, output_dir: &Path) {
    let path = output_dir.join(REPORT_FILE);
    match report.save(&path) {
        Ok(()) => log::info!("Report written to {}", path.display()),
        Err(e) => log::warn!("{}", e),
    }
}

fn print_summary(report: &BatchReport) {
    for job in &report.jobs {
        if let Some(error) = &job.error {
            println!("FAILED  {}: {}", job.source_name, error);
        }
    }
    if let Some(path) = &report.archive_path {
        println!("Archive: {}", path.display());
    }
    if let Some(error) = &report.archive_error {
        println!("Archive not written: {}", error);
    }
    println!("{} converted, {} failed", report.succeeded, report.failed);
}

/// Render batch events as a single updating progress line
fn print_events(rx: Receiver<BatchEvent>) {
    let mut names: Vec<String> = Vec::new();
    let mut stderr = std::io::stderr();

    for event in rx {
        match event {
            BatchEvent::BatchStarted { total } => {
                names = vec![String::new(); total];
            }
            BatchEvent::JobStarted { index, name } => {
                if let Some(slot) = names.get_mut(index) {
                    *slot = name;
                }
            }
            BatchEvent::JobStateChanged { .. } | BatchEvent::JobConverting { .. } => {}
            BatchEvent::JobProgress { index, local, global } => {
                let name = names.get(index).map(String::as_str).unwrap_or("");
                let _ = write!(stderr, "\r\x1b[2K[{:>3}%] {} {:>3}%", global, name, local);
                let _ = stderr.flush();
            }
            BatchEvent::JobCompleted { output_name, output_size, global, .. } => {
                let _ = writeln!(
                    stderr,
                    "\r\x1b[2K[{:>3}%] {} ({})",
                    global,
                    output_name,
                    format_size_mb(output_size)
                );
            }
            BatchEvent::JobFailed { index, error, global } => {
                let name = names.get(index).map(String::as_str).unwrap_or("");
                let _ = writeln!(stderr, "\r\x1b[2K[{:>3}%] {} failed: {}", global, name, error);
            }
            BatchEvent::BatchFinished { .. } => {}
        }
    }
}
