//! Sequential batch conversion
//!
//! Runs one job per input file, strictly in order, against a single shared
//! engine. Each job walks `Idle -> Preparing -> Converting -> Done | Error`;
//! the next job only starts once the previous one is terminal. A failed job
//! is recorded and skipped, it never stops the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use serde::Serialize;

use super::engine::{transcode_args, TranscodeEngine};
use super::filter::{build_chain, filter_spec};
use super::output::ResultSink;
use super::output_name;
use super::progress::{
    select_source, AttachedSource, JobProgress, ProgressAggregator, SourceKind,
};
use crate::audio::{AudioFile, Metadata, ProbeStore};
use crate::error::ConversionError;

/// Lifecycle of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Idle,
    Preparing,
    Converting,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

/// Events emitted while a batch runs
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    BatchStarted { total: usize },
    JobStarted { index: usize, name: String },
    JobStateChanged { index: usize, state: JobState },
    JobConverting { index: usize, source: SourceKind },
    JobProgress { index: usize, local: u8, global: u8 },
    JobCompleted { index: usize, output_name: String, output_size: u64, global: u8 },
    JobFailed { index: usize, error: String, global: u8 },
    BatchFinished { succeeded: usize, failed: usize },
}

/// Settings that apply to every job in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Overall speed multiplier
    pub speed: f64,
    /// Output audio codec passed to the engine
    pub codec: String,
    /// Use this bitrate instead of the probed one
    pub bitrate_override: Option<u32>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            speed: 1.5,
            codec: "libmp3lame".to_string(),
            bitrate_override: None,
        }
    }
}

/// One file's conversion
#[derive(Debug, Clone)]
pub struct Job {
    pub file: AudioFile,
    pub metadata: Arc<Metadata>,
    pub stages: Vec<f64>,
    pub target_bitrate: u32,
    /// Name of the input entry in the engine namespace
    pub input_name: String,
    pub output_name: String,
    pub state: JobState,
    pub error: Option<ConversionError>,
}

/// State of the current (or last) run
#[derive(Debug, Default)]
pub struct BatchState {
    pub jobs: Vec<Job>,
    progress: Option<Arc<ProgressAggregator>>,
}

impl BatchState {
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs that reached a terminal state
    pub fn completed(&self) -> usize {
        self.jobs.iter().filter(|j| j.state.is_terminal()).count()
    }

    pub fn global_percent(&self) -> u8 {
        self.progress.as_ref().map(|p| p.global()).unwrap_or(0)
    }
}

/// Outcome of one job, as recorded in the report
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub source_name: String,
    /// Where the input was loaded from, if it came from disk
    pub source_path: Option<PathBuf>,
    pub output_name: String,
    pub state: JobState,
    pub duration_secs: f64,
    pub bitrate_kbps: u32,
    pub output_size: Option<u64>,
    pub error: Option<String>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: String,
    pub finished_at: String,
    pub speed: f64,
    pub jobs: Vec<JobReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub archive_path: Option<PathBuf>,
    pub archive_error: Option<String>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.archive_error.is_none()
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize report: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write report: {}", e))?;
        log::debug!("Saved batch report to {:?}", path);
        Ok(())
    }
}

/// Drives batches of jobs through one engine
pub struct BatchOrchestrator<E: TranscodeEngine> {
    engine: E,
    probes: Arc<ProbeStore>,
    options: BatchOptions,
    events: Option<Sender<BatchEvent>>,
    state: BatchState,
}

impl<E: TranscodeEngine> BatchOrchestrator<E> {
    pub fn new(engine: E, probes: Arc<ProbeStore>, options: BatchOptions) -> Self {
        Self {
            engine,
            probes,
            options,
            events: None,
            state: BatchState::default(),
        }
    }

    /// Send progress events to `tx`
    pub fn with_events(mut self, tx: Sender<BatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    /// Drop the jobs of the last run and every cached probe
    pub fn clear(&mut self) {
        self.state = BatchState::default();
        self.probes.clear();
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn create_job(&self, file: &AudioFile) -> Job {
        let metadata = self.probes.probe(file);
        let target_bitrate = self.options.bitrate_override.unwrap_or(metadata.bitrate_kbps);
        Job {
            file: file.clone(),
            stages: build_chain(self.options.speed),
            target_bitrate,
            input_name: file.name.clone(),
            output_name: output_name(&file.name, self.options.speed),
            state: JobState::Idle,
            error: None,
            metadata,
        }
    }

    /// Convert every file in order and hand the results to `sink`
    pub async fn run(&mut self, files: &[AudioFile], sink: &mut dyn ResultSink) -> BatchReport {
        let started_at = chrono::Utc::now().to_rfc3339();
        let total = files.len();
        let aggregator = Arc::new(ProgressAggregator::new(total));

        self.state = BatchState {
            jobs: files.iter().map(|f| self.create_job(f)).collect(),
            progress: Some(aggregator.clone()),
        };

        log::info!(
            "Starting batch: {} files at x{} ({})",
            total,
            self.options.speed,
            filter_spec(&build_chain(self.options.speed))
        );
        self.emit(BatchEvent::BatchStarted { total });

        let mut reports = Vec::with_capacity(total);
        for index in 0..total {
            let progress = Arc::new(JobProgress::new(index, aggregator.clone(), self.events.clone()));

            let outcome = self.run_job(index, &progress, sink).await;

            let output_size = match outcome {
                Ok(size) => {
                    self.set_job_state(index, JobState::Done);
                    progress.report(100);
                    let global = aggregator.complete_job();
                    let output_name = self.state.jobs[index].output_name.clone();
                    log::info!("Done ({}/{}): {}", index + 1, total, output_name);
                    self.emit(BatchEvent::JobCompleted {
                        index,
                        output_name,
                        output_size: size,
                        global,
                    });
                    Some(size)
                }
                Err(err) => {
                    self.set_job_state(index, JobState::Error);
                    let global = aggregator.complete_job();
                    log::error!("Error converting {}: {}", self.state.jobs[index].file.name, err);
                    self.emit(BatchEvent::JobFailed {
                        index,
                        error: err.to_string(),
                        global,
                    });
                    self.state.jobs[index].error = Some(err);
                    None
                }
            };

            let job = &self.state.jobs[index];
            reports.push(JobReport {
                source_name: job.file.name.clone(),
                source_path: job.file.path.clone(),
                output_name: job.output_name.clone(),
                state: job.state,
                duration_secs: job.metadata.duration_secs,
                bitrate_kbps: job.target_bitrate,
                output_size,
                error: job.error.as_ref().map(|e| e.to_string()),
            });
        }

        let (archive_path, archive_error) = match sink.finish() {
            Ok(path) => (path, None),
            Err(e) => {
                let err = ConversionError::Archive(e);
                log::error!("{}", err);
                (None, Some(err.to_string()))
            }
        };

        let succeeded = reports.iter().filter(|r| r.state == JobState::Done).count();
        let failed = reports.len() - succeeded;
        log::info!(
            "All conversions finished ({}/{} jobs, {}%): {} ok, {} failed",
            self.state.completed(),
            self.state.total(),
            self.state.global_percent(),
            succeeded,
            failed
        );
        self.emit(BatchEvent::BatchFinished { succeeded, failed });

        BatchReport {
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            speed: self.options.speed,
            jobs: reports,
            succeeded,
            failed,
            archive_path,
            archive_error,
        }
    }

    /// Record a transition of job `index` and announce it
    fn set_job_state(&mut self, index: usize, state: JobState) {
        self.state.jobs[index].state = state;
        self.emit(BatchEvent::JobStateChanged { index, state });
    }

    /// Run one job up to (not including) its terminal transition
    ///
    /// Returns the size of the delivered output. Scratch entries are removed
    /// on every path.
    async fn run_job(
        &mut self,
        index: usize,
        progress: &Arc<JobProgress>,
        sink: &mut dyn ResultSink,
    ) -> Result<u64, ConversionError> {
        self.set_job_state(index, JobState::Preparing);
        let job = self.state.jobs[index].clone();
        log::info!("Preparing {}", job.file.name);
        self.emit(BatchEvent::JobStarted {
            index,
            name: job.file.name.clone(),
        });

        let result = self.convert(index, &job, progress).await;
        self.cleanup(&job).await;
        let data = result?;

        let size = data.len() as u64;
        sink.accept(&job.output_name, data)
            .map_err(|reason| ConversionError::Sink {
                name: job.output_name.clone(),
                reason,
            })?;
        Ok(size)
    }

    /// Stage the input, run the engine and read the output back
    async fn convert(
        &mut self,
        index: usize,
        job: &Job,
        progress: &Arc<JobProgress>,
    ) -> Result<Vec<u8>, ConversionError> {
        self.engine
            .write_file(&job.input_name, job.file.copy_bytes())
            .await
            .map_err(|reason| ConversionError::Write {
                name: job.input_name.clone(),
                reason,
            })?;

        self.set_job_state(index, JobState::Converting);
        let args = transcode_args(
            &job.input_name,
            &filter_spec(&job.stages),
            &self.options.codec,
            job.target_bitrate,
            &job.output_name,
        );

        let source = select_source(
            self.engine.capabilities(),
            job.metadata.duration_secs,
            progress.clone(),
        );
        let mut attached = AttachedSource::attach(&self.engine, source);
        log::debug!("{}: progress via {:?}", job.file.name, attached.kind());
        self.emit(BatchEvent::JobConverting {
            index,
            source: attached.kind(),
        });

        let mut ticker = attached.ticker();
        let exec = self.engine.exec(&args);
        tokio::pin!(exec);
        let result = loop {
            tokio::select! {
                biased;
                result = &mut exec => break result,
                _ = ticker.tick() => attached.on_tick(),
            }
        };
        ticker.stop();
        drop(attached);

        result.map_err(ConversionError::Exec)?;

        self.engine
            .read_file(&job.output_name)
            .await
            .map_err(|reason| ConversionError::Read {
                name: job.output_name.clone(),
                reason,
            })
    }

    /// Remove the job's scratch entries from the engine namespace
    async fn cleanup(&self, job: &Job) {
        for name in [&job.input_name, &job.output_name] {
            if let Err(e) = self.engine.delete_file(name).await {
                log::debug!("Scratch cleanup skipped {}: {}", name, e);
            }
        }
    }
}
