//! Throughput accounting and periodic progress reporting
//!
//! The scheduler is the only writer of [`Metrics`]; the reporter reads a
//! snapshot on a timer and hands it to the logger.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::logger::Logger;

pub struct Metrics {
    start: Instant,
    bytes_uploaded: AtomicU64,
    bytes_sent: AtomicU64,
    units_uploaded: AtomicU64,
    in_flight: AtomicUsize,
    in_flight_bytes: AtomicU64,
    limit_concurrency: AtomicU64,
    limit_queued_bytes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            bytes_uploaded: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            units_uploaded: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            in_flight_bytes: AtomicU64::new(0),
            limit_concurrency: AtomicU64::new(0),
            limit_queued_bytes: AtomicU64::new(0),
        }
    }

    pub fn record_upload(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
        self.units_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Wire progress, including transfers that later fail.
    pub fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn set_in_flight(&self, units: usize, bytes: u64) {
        self.in_flight.store(units, Ordering::Relaxed);
        self.in_flight_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_limits(&self, concurrency: f64, queued_bytes: f64) {
        self.limit_concurrency
            .store(concurrency.to_bits(), Ordering::Relaxed);
        self.limit_queued_bytes
            .store(queued_bytes.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            elapsed: self.start.elapsed(),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            units_uploaded: self.units_uploaded.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            in_flight_bytes: self.in_flight_bytes.load(Ordering::Relaxed),
            limit_concurrency: f64::from_bits(self.limit_concurrency.load(Ordering::Relaxed)),
            limit_queued_bytes: f64::from_bits(self.limit_queued_bytes.load(Ordering::Relaxed)),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub bytes_uploaded: u64,
    pub bytes_sent: u64,
    pub units_uploaded: u64,
    pub in_flight: usize,
    pub in_flight_bytes: u64,
    pub limit_concurrency: f64,
    pub limit_queued_bytes: f64,
}

impl ProgressSnapshot {
    /// Completed bytes per second since start.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_uploaded as f64 / secs
        } else {
            0.0
        }
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub units_uploaded: u64,
    pub bytes_uploaded: u64,
    pub packs_uploaded: u64,
    /// Already present on the remote; marked done without transfer.
    pub units_existing: u64,
    /// Remote answered "not stored"; left for the next run.
    pub units_rejected: u64,
    /// Local file gone between crawl and upload.
    pub units_vanished: u64,
    pub failed_attempts: u64,
    pub units_retried: u64,
    pub units_abandoned: u64,
    pub abandoned: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.units_abandoned == 0
    }

    /// Units the remote accepted or already had.
    pub fn units_done(&self) -> u64 {
        self.units_uploaded + self.units_existing
    }
}

/// Timer task emitting a progress snapshot every `interval`.
pub struct Reporter {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Reporter {
    pub fn spawn(metrics: Arc<Metrics>, logger: Arc<dyn Logger>, interval: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => logger.progress(&metrics.snapshot()),
                }
            }
        });
        Self {
            stop: Some(stop),
            handle,
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Live one-line status for interactive terminals.
pub struct StatusLine {
    spinner: ProgressBar,
}

impl StatusLine {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }

    /// Handle for sinks that print lines above the spinner.
    pub fn bar(&self) -> ProgressBar {
        self.spinner.clone()
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for StatusLine {
    fn progress(&self, s: &ProgressSnapshot) {
        self.spinner.set_message(format!(
            "{} units, {:.1} MB @ {:.2} MB/s | in flight {} ({:.1} MB) | limits {:.1} / {:.1} MB",
            s.units_uploaded,
            s.bytes_uploaded as f64 / 1_000_000.0,
            s.throughput() / 1_000_000.0,
            s.in_flight,
            s.in_flight_bytes as f64 / 1_000_000.0,
            s.limit_concurrency,
            s.limit_queued_bytes / 1_000_000.0,
        ));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
