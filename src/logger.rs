use anyhow::Result;
use chrono::Utc;
use indicatif::ProgressBar;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::progress::{ProgressSnapshot, RunSummary};
use crate::unit::Unit;

/// Event sink for the upload pipeline. Every method defaults to a no-op so
/// sinks only implement what they care about.
pub trait Logger: Send + Sync {
    fn start(&self, _root: &Path) {}
    fn skipped(&self, _path: &str, _reason: &str) {}
    fn admitted(&self, _unit: &Unit) {}
    fn uploaded(&self, _unit: &Unit, _bytes: u64) {}
    fn exists(&self, _unit: &Unit) {}
    fn rejected(&self, _unit: &Unit) {}
    fn failed(&self, _unit: &Unit, _attempt: u32, _msg: &str) {}
    fn abandoned(&self, _unit: &Unit, _attempts: u32) {}
    fn window(&self, _concurrency: f64, _queued_bytes: f64) {}
    fn info(&self, _context: &str, _path: &str, _msg: &str) {}
    fn warn(&self, _context: &str, _path: &str, _msg: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn progress(&self, _snapshot: &ProgressSnapshot) {}
    fn done(&self, _summary: &RunSummary) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Human-readable lines on the terminal.
pub struct ConsoleLogger {
    verbose: bool,
    progress_lines: bool,
    status: Option<ProgressBar>,
}

impl ConsoleLogger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            progress_lines: true,
            status: None,
        }
    }

    /// Share the terminal with a live status line: periodic progress is left
    /// to the bar and every other line is printed above it.
    pub fn attach(mut self, bar: ProgressBar) -> Self {
        self.progress_lines = false;
        self.status = Some(bar);
        self
    }

    fn emit<F: FnOnce()>(&self, f: F) {
        match &self.status {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    fn stamp() -> String {
        Utc::now().format("%H:%M:%S").to_string()
    }
}

impl Logger for ConsoleLogger {
    fn start(&self, root: &Path) {
        self.emit(|| println!("[{}] Uploading {}", Self::stamp(), root.display()));
    }
    fn skipped(&self, path: &str, reason: &str) {
        if self.verbose {
            self.emit(|| println!("[{}] Skip {} ({})", Self::stamp(), path, reason));
        }
    }
    fn uploaded(&self, unit: &Unit, bytes: u64) {
        if self.verbose {
            self.emit(|| {
                println!(
                    "[{}] Uploaded {} ({:.2} MB)",
                    Self::stamp(),
                    unit.remote_path,
                    bytes as f64 / 1_000_000.0
                )
            });
        }
    }
    fn rejected(&self, unit: &Unit) {
        self.emit(|| {
            eprintln!(
                "[{}] WARN remote did not store {} (left for next run)",
                Self::stamp(),
                unit.remote_path
            )
        });
    }
    fn failed(&self, unit: &Unit, attempt: u32, msg: &str) {
        self.emit(|| {
            eprintln!(
                "[{}] ERROR upload {} attempt {}: {}",
                Self::stamp(),
                unit.remote_path,
                attempt,
                msg
            )
        });
    }
    fn abandoned(&self, unit: &Unit, attempts: u32) {
        self.emit(|| {
            eprintln!(
                "[{}] ERROR giving up on {} after {} attempts",
                Self::stamp(),
                unit.remote_path,
                attempts
            )
        });
    }
    fn info(&self, context: &str, path: &str, msg: &str) {
        self.emit(|| println!("[{}] {} {}: {}", Self::stamp(), context, path, msg));
    }
    fn warn(&self, context: &str, path: &str, msg: &str) {
        self.emit(|| eprintln!("[{}] WARN {} {}: {}", Self::stamp(), context, path, msg));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.emit(|| eprintln!("[{}] ERROR {} {}: {}", Self::stamp(), context, path, msg));
    }
    fn progress(&self, s: &ProgressSnapshot) {
        if !self.progress_lines {
            return;
        }
        println!(
            "[{}] Uploaded {:.2} MB in {:.1}s. Speed: {:.2} MB/s. In flight {} units, {:.2} MB. Limits: {:.1} units, {:.2} MB",
            Self::stamp(),
            s.bytes_uploaded as f64 / 1_000_000.0,
            s.elapsed.as_secs_f64(),
            s.throughput() / 1_000_000.0,
            s.in_flight,
            s.in_flight_bytes as f64 / 1_000_000.0,
            s.limit_concurrency,
            s.limit_queued_bytes / 1_000_000.0,
        );
    }
}

/// Appends timestamped `EVENT key=value` lines to a file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn start(&self, root: &Path) {
        self.line(&format!("START root={}", root.display()));
    }
    fn skipped(&self, path: &str, reason: &str) {
        self.line(&format!("SKIP path={path} reason={reason}"));
    }
    fn admitted(&self, unit: &Unit) {
        self.line(&format!(
            "ADMIT path={} size={} attempt={}",
            unit.remote_path,
            unit.size,
            unit.attempts + 1
        ));
    }
    fn uploaded(&self, unit: &Unit, bytes: u64) {
        self.line(&format!("UPLOAD path={} bytes={}", unit.remote_path, bytes));
    }
    fn exists(&self, unit: &Unit) {
        self.line(&format!("EXISTS path={}", unit.remote_path));
    }
    fn rejected(&self, unit: &Unit) {
        self.line(&format!("REJECTED path={}", unit.remote_path));
    }
    fn failed(&self, unit: &Unit, attempt: u32, msg: &str) {
        self.line(&format!(
            "FAIL path={} attempt={} msg={}",
            unit.remote_path, attempt, msg
        ));
    }
    fn abandoned(&self, unit: &Unit, attempts: u32) {
        self.line(&format!(
            "ABANDON path={} attempts={}",
            unit.remote_path, attempts
        ));
    }
    fn window(&self, concurrency: f64, queued_bytes: f64) {
        self.line(&format!(
            "WINDOW concurrency={concurrency:.2} queued_bytes={queued_bytes:.0}"
        ));
    }
    fn info(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("INFO ctx={context} path={path} msg={msg}"));
    }
    fn warn(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("WARN ctx={context} path={path} msg={msg}"));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} path={path} msg={msg}"));
    }
    fn done(&self, s: &RunSummary) {
        self.line(&format!(
            "DONE units={} bytes={} exists={} rejected={} vanished={} failures={} abandoned={} seconds={:.3}",
            s.units_uploaded,
            s.bytes_uploaded,
            s.units_existing,
            s.units_rejected,
            s.units_vanished,
            s.failed_attempts,
            s.units_abandoned,
            s.elapsed.as_secs_f64()
        ));
    }
}

/// Forwards every event to each inner sink.
pub struct TeeLogger {
    sinks: Vec<Arc<dyn Logger>>,
}

impl TeeLogger {
    pub fn new(sinks: Vec<Arc<dyn Logger>>) -> Self {
        Self { sinks }
    }
}

impl Logger for TeeLogger {
    fn start(&self, root: &Path) {
        self.sinks.iter().for_each(|s| s.start(root));
    }
    fn skipped(&self, path: &str, reason: &str) {
        self.sinks.iter().for_each(|s| s.skipped(path, reason));
    }
    fn admitted(&self, unit: &Unit) {
        self.sinks.iter().for_each(|s| s.admitted(unit));
    }
    fn uploaded(&self, unit: &Unit, bytes: u64) {
        self.sinks.iter().for_each(|s| s.uploaded(unit, bytes));
    }
    fn exists(&self, unit: &Unit) {
        self.sinks.iter().for_each(|s| s.exists(unit));
    }
    fn rejected(&self, unit: &Unit) {
        self.sinks.iter().for_each(|s| s.rejected(unit));
    }
    fn failed(&self, unit: &Unit, attempt: u32, msg: &str) {
        self.sinks.iter().for_each(|s| s.failed(unit, attempt, msg));
    }
    fn abandoned(&self, unit: &Unit, attempts: u32) {
        self.sinks.iter().for_each(|s| s.abandoned(unit, attempts));
    }
    fn window(&self, concurrency: f64, queued_bytes: f64) {
        self.sinks
            .iter()
            .for_each(|s| s.window(concurrency, queued_bytes));
    }
    fn info(&self, context: &str, path: &str, msg: &str) {
        self.sinks.iter().for_each(|s| s.info(context, path, msg));
    }
    fn warn(&self, context: &str, path: &str, msg: &str) {
        self.sinks.iter().for_each(|s| s.warn(context, path, msg));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.sinks.iter().for_each(|s| s.error(context, path, msg));
    }
    fn progress(&self, snapshot: &ProgressSnapshot) {
        self.sinks.iter().for_each(|s| s.progress(snapshot));
    }
    fn done(&self, summary: &RunSummary) {
        self.sinks.iter().for_each(|s| s.done(summary));
    }
}
