//! Uploads one admitted unit

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::logger::Logger;
use crate::paths;
use crate::progress::Metrics;
use crate::remote::{EndpointPool, PutOptions, PutOutcome, UploadBody};
use crate::state::{StateStore, DONE};
use crate::unit::{ContentSource, Unit};

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Transferred and recorded as done.
    Uploaded(u64),
    /// Already on the remote; recorded as done without transfer.
    Exists,
    /// Remote declined to store it. Not recorded.
    Rejected,
    /// Local file disappeared after the crawl. Not recorded, not retried.
    Vanished,
    /// No endpoint accepts a unit of this size; retrying cannot help.
    Unroutable(String),
    Failed(String),
}

pub struct UploadWorker {
    pool: Arc<EndpointPool>,
    state: Arc<dyn StateStore>,
    logger: Arc<dyn Logger>,
    metrics: Arc<Metrics>,
    check_exists: bool,
}

impl UploadWorker {
    pub fn new(
        pool: Arc<EndpointPool>,
        state: Arc<dyn StateStore>,
        logger: Arc<dyn Logger>,
        metrics: Arc<Metrics>,
        check_exists: bool,
    ) -> Self {
        Self {
            pool,
            state,
            logger,
            metrics,
            check_exists,
        }
    }

    /// Run one attempt; every error becomes [`Outcome::Failed`].
    pub async fn run(&self, unit: &Unit) -> Outcome {
        match self.upload(unit).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(format!("{e:#}")),
        }
    }

    async fn upload(&self, unit: &Unit) -> Result<Outcome> {
        let endpoint = match self.pool.select(unit.size) {
            Ok(e) => e,
            Err(e) => return Ok(Outcome::Unroutable(e.to_string())),
        };
        let store = &endpoint.store;

        if self.check_exists && store.exists(&unit.remote_path).await? {
            self.mark_done(unit)?;
            return Ok(Outcome::Exists);
        }

        let Some((body, content_length)) = self.materialize(unit).await? else {
            return Ok(Outcome::Vanished);
        };

        if let Some(dir) = paths::remote_parent(&unit.remote_path) {
            endpoint.dirs.ensure(dir, &*self.logger).await;
        }

        let metrics = self.metrics.clone();
        let reported = Arc::new(AtomicU64::new(0));
        let options = PutOptions {
            overwrite: true,
            content_length,
            on_progress: Some(Arc::new(move |sent: u64, _total: u64| {
                let prev = reported.swap(sent, Ordering::Relaxed);
                metrics.record_sent(sent.saturating_sub(prev));
            })),
        };

        match store
            .put_file_contents(&unit.remote_path, body, options)
            .await?
        {
            PutOutcome::Stored => {
                self.mark_done(unit)?;
                Ok(Outcome::Uploaded(content_length))
            }
            PutOutcome::NotStored => Ok(Outcome::Rejected),
        }
    }

    /// `None` when a loose file is gone from local storage.
    async fn materialize(&self, unit: &Unit) -> Result<Option<(UploadBody, u64)>> {
        match &unit.source {
            ContentSource::File(path) => {
                let file = match tokio::fs::File::open(path).await {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to open {}", path.display()))
                    }
                };
                let len = file.metadata().await?.len();
                Ok(Some((UploadBody::File(file), len)))
            }
            ContentSource::Archive(pack) => {
                let pack = pack.clone();
                let logger = self.logger.clone();
                let buf = tokio::task::spawn_blocking(move || pack.build_archive(&*logger))
                    .await
                    .map_err(|_| anyhow::anyhow!("Archive builder panicked"))??;
                let len = buf.len() as u64;
                Ok(Some((UploadBody::Bytes(buf), len)))
            }
        }
    }

    fn mark_done(&self, unit: &Unit) -> Result<()> {
        self.state
            .put(&unit.key, DONE)
            .with_context(|| format!("Failed to record {} as done", unit.key))
    }
}
