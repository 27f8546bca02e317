//! One upload run: crawl -> pack -> schedule -> upload

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::crawl::Crawler;
use crate::logger::Logger;
use crate::pack::{PackConfig, Packer};
use crate::progress::{Metrics, Reporter, RunSummary};
use crate::remote::EndpointPool;
use crate::scheduler::{RetryPolicy, Scheduler};
use crate::state::StateStore;
use crate::unit::Unit;
use crate::window::WindowBounds;
use crate::worker::UploadWorker;

/// Units buffered between the crawl thread and the scheduler.
const DISCOVERY_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub root: PathBuf,
    pub ignore: Vec<String>,
    pub pack: PackConfig,
    pub bounds: WindowBounds,
    pub retry: RetryPolicy,
    pub check_exists: bool,
    pub remote_prefix: String,
    pub report_interval: Duration,
}

/// Everything a run needs, built once and owned by the run.
pub struct Pipeline {
    options: PipelineOptions,
    pool: Arc<EndpointPool>,
    state: Arc<dyn StateStore>,
    logger: Arc<dyn Logger>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        pool: Arc<EndpointPool>,
        state: Arc<dyn StateStore>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            options,
            pool,
            state,
            logger,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub async fn run(self) -> Result<RunSummary> {
        let Pipeline {
            options,
            pool,
            state,
            logger,
            metrics,
        } = self;

        if !options.root.is_dir() {
            anyhow::bail!("Source is not a directory: {}", options.root.display());
        }
        logger.start(&options.root);

        let (tx, rx) = mpsc::channel::<Unit>(DISCOVERY_BUFFER);
        let discovery = {
            let options = options.clone();
            let state = state.clone();
            let logger = logger.clone();
            tokio::task::spawn_blocking(move || {
                let crawler =
                    Crawler::new(&options.root, &options.ignore, state.clone(), logger.clone());
                let packer = Packer::new(crawler, options.pack, &options.remote_prefix, state, logger);
                for unit in packer {
                    if tx.blocking_send(unit).is_err() {
                        break;
                    }
                }
            })
        };

        let reporter = Reporter::spawn(metrics.clone(), logger.clone(), options.report_interval);
        let worker = Arc::new(UploadWorker::new(
            pool,
            state,
            logger.clone(),
            metrics.clone(),
            options.check_exists,
        ));
        let scheduler = Scheduler::new(options.bounds, options.retry, worker, metrics, logger.clone());
        let summary = scheduler.run(rx).await;

        reporter.shutdown().await;
        logger.done(&summary);
        if discovery.await.is_err() {
            anyhow::bail!("Crawl of {} panicked", options.root.display());
        }
        Ok(summary)
    }
}
