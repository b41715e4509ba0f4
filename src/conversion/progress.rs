//! Per-job progress sources and batch-level aggregation
//!
//! Each job gets exactly one `ProgressSource`, picked from a fixed ranking
//! according to what the engine can report:
//!
//! 1. Ratio callbacks (engine reports a completion fraction)
//! 2. Log lines with `time=H:MM:SS.ss`, scaled by the known duration
//! 3. A synthetic ticker that creeps forward so the display never freezes
//!
//! All sources write into the same `JobProgress`, which folds the value into
//! the batch-wide `ProgressAggregator`.

use std::sync::{Arc, LazyLock};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::Serialize;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::batch::BatchEvent;
use super::engine::{EngineCapabilities, ProgressHooks};

/// How often the synthetic source advances
pub const SYNTHETIC_TICK: Duration = Duration::from_millis(500);

/// The synthetic source never goes past this until the job really finishes
pub const SYNTHETIC_CAP: u8 = 95;

/// Convert a completion ratio to a whole percentage in [0, 100]
pub fn ratio_to_percent(ratio: f64) -> u8 {
    if !ratio.is_finite() {
        return 0;
    }
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Global percentage for `completed` finished jobs plus one job at `local` percent
pub fn global_percent(completed: usize, total: usize, local: u8) -> u8 {
    if total == 0 {
        return 0;
    }
    let share = 100.0 / total as f64;
    let value = completed as f64 * share + (f64::from(local) / 100.0) * share;
    value.round().clamp(0.0, 100.0) as u8
}

/// `time=H:MM:SS[.fraction]` as printed in ffmpeg status lines
static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("valid time pattern")
});

/// Parse the elapsed time out of an ffmpeg status line
///
/// Returns the first `time=H:MM:SS[.ff]` in the line as seconds. Lines
/// without one (including `time=N/A`) yield `None`.
pub fn parse_time_secs(line: &str) -> Option<f64> {
    let caps = TIME_PATTERN.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Batch-wide progress: finished job count plus a monotonic global percentage
#[derive(Debug)]
pub struct ProgressAggregator {
    total: usize,
    completed: AtomicUsize,
    global: AtomicU8,
}

impl ProgressAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            global: AtomicU8::new(0),
        }
    }

    /// Fold the current job's local percent in; returns the global percent
    pub fn update(&self, local: u8) -> u8 {
        let completed = self.completed.load(Ordering::SeqCst);
        self.raise(global_percent(completed, self.total, local))
    }

    /// Mark the current job finished; returns the global percent
    pub fn complete_job(&self) -> u8 {
        let completed = (self.completed.fetch_add(1, Ordering::SeqCst) + 1).min(self.total);
        self.raise(global_percent(completed, self.total, 0))
    }

    fn raise(&self, value: u8) -> u8 {
        let previous = self.global.fetch_max(value, Ordering::SeqCst);
        previous.max(value)
    }

    pub fn global(&self) -> u8 {
        self.global.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Progress of the job currently running
///
/// Shared between the orchestrator and whatever handler the progress source
/// installed on the engine. The percentage never decreases.
#[derive(Debug)]
pub struct JobProgress {
    index: usize,
    percent: AtomicU8,
    aggregator: Arc<ProgressAggregator>,
    events: Option<Sender<BatchEvent>>,
}

impl JobProgress {
    pub fn new(
        index: usize,
        aggregator: Arc<ProgressAggregator>,
        events: Option<Sender<BatchEvent>>,
    ) -> Self {
        Self {
            index,
            percent: AtomicU8::new(0),
            aggregator,
            events,
        }
    }

    /// Record a new local percentage; lower or repeated values are ignored
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.percent.fetch_max(percent, Ordering::SeqCst);
        if percent <= previous {
            return;
        }

        let global = self.aggregator.update(percent);
        if let Some(tx) = &self.events {
            let _ = tx.send(BatchEvent::JobProgress {
                index: self.index,
                local: percent,
                global,
            });
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }
}

/// The kinds of progress source, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Ratio,
    LogLine,
    Synthetic,
}

impl SourceKind {
    /// Priority order used when picking a source for a job
    pub const RANKING: [SourceKind; 3] = [SourceKind::Ratio, SourceKind::LogLine, SourceKind::Synthetic];

    /// Whether this source can run given the engine's capabilities and the
    /// job's known duration
    pub fn is_available(self, caps: EngineCapabilities, duration_secs: f64) -> bool {
        match self {
            SourceKind::Ratio => caps.ratio_progress,
            SourceKind::LogLine => caps.log_lines && duration_secs > 0.0,
            SourceKind::Synthetic => true,
        }
    }
}

/// A strategy that turns some engine signal into `JobProgress` updates
pub trait ProgressSource {
    fn kind(&self) -> SourceKind;

    /// Install whatever handler this source needs on the engine
    fn attach(&mut self, hooks: &dyn ProgressHooks);

    /// Remove the handler installed by `attach`
    fn detach(&mut self, hooks: &dyn ProgressHooks);

    /// Period at which `on_tick` wants to be called, if at all
    fn tick_period(&self) -> Option<Duration> {
        None
    }

    fn on_tick(&mut self) {}
}

/// Engine reports a completion ratio directly
pub struct RatioSource {
    progress: Arc<JobProgress>,
}

impl RatioSource {
    pub fn new(progress: Arc<JobProgress>) -> Self {
        Self { progress }
    }
}

impl ProgressSource for RatioSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ratio
    }

    fn attach(&mut self, hooks: &dyn ProgressHooks) {
        let progress = self.progress.clone();
        hooks.set_ratio_handler(Some(Arc::new(move |ratio: f64| {
            progress.report(ratio_to_percent(ratio));
        })));
    }

    fn detach(&mut self, hooks: &dyn ProgressHooks) {
        hooks.set_ratio_handler(None);
    }
}

/// Engine emits log lines with an elapsed `time=` field
pub struct LogLineSource {
    progress: Arc<JobProgress>,
    duration_secs: f64,
}

impl LogLineSource {
    pub fn new(progress: Arc<JobProgress>, duration_secs: f64) -> Self {
        Self { progress, duration_secs }
    }
}

impl ProgressSource for LogLineSource {
    fn kind(&self) -> SourceKind {
        SourceKind::LogLine
    }

    fn attach(&mut self, hooks: &dyn ProgressHooks) {
        let progress = self.progress.clone();
        let duration = self.duration_secs;
        hooks.set_log_handler(Some(Arc::new(move |line: &str| {
            if let Some(elapsed) = parse_time_secs(line) {
                progress.report(ratio_to_percent(elapsed / duration));
            }
        })));
    }

    fn detach(&mut self, hooks: &dyn ProgressHooks) {
        hooks.set_log_handler(None);
    }
}

/// Pseudo-progress for engines that report nothing
///
/// Carries no accuracy guarantee; it only keeps the display moving.
pub struct SyntheticSource {
    progress: Arc<JobProgress>,
    current: u8,
}

impl SyntheticSource {
    pub fn new(progress: Arc<JobProgress>) -> Self {
        Self { progress, current: 0 }
    }
}

impl ProgressSource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    fn attach(&mut self, _hooks: &dyn ProgressHooks) {
        self.current = self.progress.percent();
    }

    fn detach(&mut self, _hooks: &dyn ProgressHooks) {}

    fn tick_period(&self) -> Option<Duration> {
        Some(SYNTHETIC_TICK)
    }

    fn on_tick(&mut self) {
        let step: u8 = rand::rng().random_range(2..=7);
        self.current = self.current.saturating_add(step).min(SYNTHETIC_CAP);
        self.progress.report(self.current);
    }
}

/// Pick the highest-ranked source the engine supports
pub fn select_source(
    caps: EngineCapabilities,
    duration_secs: f64,
    progress: Arc<JobProgress>,
) -> Box<dyn ProgressSource> {
    let kind = SourceKind::RANKING
        .into_iter()
        .find(|kind| kind.is_available(caps, duration_secs))
        .unwrap_or(SourceKind::Synthetic);

    match kind {
        SourceKind::Ratio => Box::new(RatioSource::new(progress)),
        SourceKind::LogLine => Box::new(LogLineSource::new(progress, duration_secs)),
        SourceKind::Synthetic => Box::new(SyntheticSource::new(progress)),
    }
}

/// A progress source attached to an engine for the lifetime of this value
///
/// Dropping it detaches the source, so the engine's handler slot is free
/// again on every exit path of a job.
pub struct AttachedSource<'a> {
    hooks: &'a dyn ProgressHooks,
    source: Box<dyn ProgressSource>,
}

impl<'a> AttachedSource<'a> {
    pub fn attach(hooks: &'a dyn ProgressHooks, mut source: Box<dyn ProgressSource>) -> Self {
        source.attach(hooks);
        Self { hooks, source }
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// A ticker matching the source's tick period (idle if it has none)
    pub fn ticker(&self) -> Ticker {
        match self.source.tick_period() {
            Some(period) => Ticker::start(period),
            None => Ticker::idle(),
        }
    }

    pub fn on_tick(&mut self) {
        self.source.on_tick();
    }
}

impl Drop for AttachedSource<'_> {
    fn drop(&mut self) {
        self.source.detach(self.hooks);
    }
}

/// Cancellable periodic ticker owned by a job
///
/// An idle or stopped ticker never fires.
#[derive(Debug)]
pub struct Ticker {
    interval: Option<Interval>,
}

impl Ticker {
    pub fn start(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval: Some(interval) }
    }

    pub fn idle() -> Self {
        Self { interval: None }
    }

    /// Wait for the next tick
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }
}
