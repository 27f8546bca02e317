//! Remote object store interface and implementations

use async_trait::async_trait;
use std::sync::Arc;

pub mod dircache;
pub mod dry_run;
pub mod pool;
pub mod webdav;

pub use dircache::DirectoryCache;
pub use dry_run::DryRunStore;
pub use pool::{Endpoint, EndpointPool, NoEndpoint};
pub use webdav::{WebDavClient, WebDavSettings};

/// Upload content: a local file stream or an in-memory buffer.
#[derive(Debug)]
pub enum UploadBody {
    File(tokio::fs::File),
    Bytes(Vec<u8>),
}

/// Called with `(bytes_sent, content_length)` while a body is transferred.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Clone)]
pub struct PutOptions {
    pub overwrite: bool,
    pub content_length: u64,
    pub on_progress: Option<ProgressFn>,
}

impl std::fmt::Debug for PutOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutOptions")
            .field("overwrite", &self.overwrite)
            .field("content_length", &self.content_length)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Result of a write that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The server answered but declined to store the object.
    NotStored,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{op} {path}: HTTP {status}")]
    Http {
        op: &'static str,
        path: String,
        status: u16,
    },
    #[error("{op} {path}: {source}")]
    Transport {
        op: &'static str,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid remote path {0}")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name used in log lines.
    fn label(&self) -> String;

    async fn exists(&self, path: &str) -> Result<bool, RemoteError>;

    /// Create one directory. Parents must already exist.
    async fn create_directory(&self, path: &str) -> Result<(), RemoteError>;

    async fn put_file_contents(
        &self,
        path: &str,
        body: UploadBody,
        options: PutOptions,
    ) -> Result<PutOutcome, RemoteError>;
}
