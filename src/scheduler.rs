//! Admission control
//!
//! A single controller loop owns the control window, the in-flight table
//! and the retry queue. A fixed pool of worker tasks pulls admitted units
//! from a job channel and reports every terminal outcome back on a
//! completion channel; the controller applies the control law there.
//!
//! Primary units (crawler/packer order) are always admitted before any
//! retry; retries go out in the order they failed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::logger::Logger;
use crate::progress::{Metrics, RunSummary};
use crate::unit::{Unit, UnitState};
use crate::window::{ControlWindow, WindowBounds};
use crate::worker::{Outcome, UploadWorker};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt; `None` retries forever.
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempts + 1`; zero for the first attempt.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempts - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries.is_some_and(|max| attempts > max)
    }
}

struct Job {
    id: u64,
    unit: Unit,
    delay: Duration,
}

struct Completion {
    id: u64,
    unit: Unit,
    outcome: Outcome,
}

struct InFlight {
    size: u64,
}

pub struct Scheduler {
    window: ControlWindow,
    pool_size: usize,
    retry: RetryPolicy,
    retry_queue: VecDeque<Unit>,
    in_flight: HashMap<u64, InFlight>,
    in_flight_bytes: u64,
    next_id: u64,
    worker: Arc<UploadWorker>,
    metrics: Arc<Metrics>,
    logger: Arc<dyn Logger>,
    summary: RunSummary,
}

impl Scheduler {
    pub fn new(
        bounds: WindowBounds,
        retry: RetryPolicy,
        worker: Arc<UploadWorker>,
        metrics: Arc<Metrics>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let window = ControlWindow::new(bounds);
        metrics.set_limits(window.limit_concurrency(), window.limit_queued_bytes());
        Self {
            window,
            pool_size: bounds.max_concurrency.max(bounds.min_concurrency).max(1),
            retry,
            retry_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            in_flight_bytes: 0,
            next_id: 0,
            worker,
            metrics,
            logger,
            summary: RunSummary::default(),
        }
    }

    /// Drain `primary`, then the retry queue, until nothing is left in
    /// flight.
    pub async fn run(mut self, mut primary: mpsc::Receiver<Unit>) -> RunSummary {
        let started = Instant::now();
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.pool_size);
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(self.pool_size);
        let workers = self.spawn_workers(job_rx, done_tx);

        let mut primary_open = true;
        'run: loop {
            while !self
                .window
                .admits(self.in_flight.len(), self.in_flight_bytes)
            {
                if !self.wait_one(&mut done_rx).await {
                    break 'run;
                }
            }

            let unit = if primary_open {
                tokio::select! {
                    biased;
                    c = done_rx.recv(), if !self.in_flight.is_empty() => {
                        match c {
                            Some(c) => self.complete(c),
                            None => break 'run,
                        }
                        continue;
                    }
                    next = primary.recv() => match next {
                        Some(unit) => unit,
                        None => {
                            primary_open = false;
                            continue;
                        }
                    },
                }
            } else if let Some(unit) = self.retry_queue.pop_front() {
                unit
            } else if !self.in_flight.is_empty() {
                if !self.wait_one(&mut done_rx).await {
                    break;
                }
                continue;
            } else {
                break;
            };

            if !self.dispatch(unit, &job_tx).await {
                break;
            }
        }

        drop(job_tx);
        for w in workers {
            let _ = w.await;
        }

        self.summary.elapsed = started.elapsed();
        self.summary
    }

    fn spawn_workers(
        &self,
        job_rx: mpsc::Receiver<Job>,
        done_tx: mpsc::Sender<Completion>,
    ) -> Vec<JoinHandle<()>> {
        let jobs = Arc::new(Mutex::new(job_rx));
        (0..self.pool_size)
            .map(|_| {
                let jobs = Arc::clone(&jobs);
                let done_tx = done_tx.clone();
                let worker = Arc::clone(&self.worker);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut q = jobs.lock().await;
                            q.recv().await
                        };
                        let Some(Job { id, mut unit, delay }) = job else {
                            break;
                        };
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        unit.state = UnitState::Uploading;
                        let outcome = worker.run(&unit).await;
                        if done_tx.send(Completion { id, unit, outcome }).await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect()
    }

    /// Block until one in-flight unit resolves. `false` if the pool is gone.
    async fn wait_one(&mut self, done_rx: &mut mpsc::Receiver<Completion>) -> bool {
        match done_rx.recv().await {
            Some(c) => {
                self.complete(c);
                true
            }
            None => {
                self.logger
                    .error("scheduler", "", "upload workers exited unexpectedly");
                false
            }
        }
    }

    async fn dispatch(&mut self, mut unit: Unit, job_tx: &mpsc::Sender<Job>) -> bool {
        let id = self.next_id;
        self.next_id += 1;
        unit.state = UnitState::Admitted;
        let delay = self.retry.delay_for(unit.attempts);

        self.in_flight.insert(
            id,
            InFlight { size: unit.size },
        );
        self.in_flight_bytes += unit.size;
        self.metrics
            .set_in_flight(self.in_flight.len(), self.in_flight_bytes);
        self.logger.admitted(&unit);

        job_tx.send(Job { id, unit, delay }).await.is_ok()
    }

    fn complete(&mut self, c: Completion) {
        let Completion {
            id,
            mut unit,
            outcome,
        } = c;
        if let Some(slot) = self.in_flight.remove(&id) {
            self.in_flight_bytes = self.in_flight_bytes.saturating_sub(slot.size);
        }
        self.metrics
            .set_in_flight(self.in_flight.len(), self.in_flight_bytes);
        unit.attempts += 1;

        match outcome {
            Outcome::Uploaded(bytes) => {
                self.window.on_success();
                unit.state = UnitState::Done;
                self.summary.units_uploaded += 1;
                self.summary.bytes_uploaded += bytes;
                if unit.is_pack() {
                    self.summary.packs_uploaded += 1;
                }
                self.metrics.record_upload(bytes);
                self.logger.uploaded(&unit, bytes);
            }
            Outcome::Exists => {
                self.window.on_success();
                unit.state = UnitState::Done;
                self.summary.units_existing += 1;
                self.logger.exists(&unit);
            }
            Outcome::Rejected => {
                // Terminal for this run, but never recorded as done.
                self.window.on_success();
                self.summary.units_rejected += 1;
                self.logger.rejected(&unit);
            }
            Outcome::Vanished => {
                self.summary.units_vanished += 1;
                self.logger.skipped(&unit.key, "vanished before upload");
            }
            Outcome::Unroutable(msg) => {
                self.summary.units_abandoned += 1;
                self.summary.abandoned.push(unit.remote_path.clone());
                self.logger.error("route", &unit.remote_path, &msg);
                self.logger.abandoned(&unit, unit.attempts);
            }
            Outcome::Failed(msg) => {
                self.window.on_failure();
                unit.state = UnitState::Failed;
                self.summary.failed_attempts += 1;
                self.logger.failed(&unit, unit.attempts, &msg);
                if self.retry.exhausted(unit.attempts) {
                    self.summary.units_abandoned += 1;
                    self.summary.abandoned.push(unit.remote_path.clone());
                    self.logger.abandoned(&unit, unit.attempts);
                } else {
                    if unit.attempts == 1 {
                        self.summary.units_retried += 1;
                    }
                    self.retry_queue.push_back(unit);
                }
            }
        }

        let (c, q) = (
            self.window.limit_concurrency(),
            self.window.limit_queued_bytes(),
        );
        self.metrics.set_limits(c, q);
        self.logger.window(c, q);
    }
}
