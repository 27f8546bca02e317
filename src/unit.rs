//! Things the scheduler admits and uploads

use std::path::PathBuf;
use std::sync::Arc;

use crate::pack::Pack;

/// A file found by the crawler. Content is read later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Normalized path, used both as state key and remote path.
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Discovered,
    Admitted,
    Uploading,
    Done,
    Failed,
}

/// Where a unit's bytes come from when it is dispatched.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Streamed from local storage.
    File(PathBuf),
    /// Tar archive built from the pack's members on demand.
    Archive(Arc<Pack>),
}

/// One upload: a loose file or a sealed pack.
#[derive(Debug, Clone)]
pub struct Unit {
    /// State index key marked `done` on success.
    pub key: String,
    /// Destination path on the remote store.
    pub remote_path: String,
    /// Bytes counted against the in-flight budget.
    pub size: u64,
    pub source: ContentSource,
    pub state: UnitState,
    /// Completed attempts so far.
    pub attempts: u32,
}

impl Unit {
    pub fn file(candidate: Candidate, remote_prefix: &str) -> Self {
        Self {
            remote_path: crate::paths::join_remote(remote_prefix, &candidate.key),
            key: candidate.key,
            size: candidate.size,
            source: ContentSource::File(candidate.path),
            state: UnitState::Discovered,
            attempts: 0,
        }
    }

    pub fn pack(pack: Pack, remote_prefix: &str) -> Self {
        Self {
            key: pack.name.clone(),
            remote_path: crate::paths::join_remote(remote_prefix, &pack.name),
            size: pack.size,
            source: ContentSource::Archive(Arc::new(pack)),
            state: UnitState::Discovered,
            attempts: 0,
        }
    }

    pub fn is_pack(&self) -> bool {
        matches!(self.source, ContentSource::Archive(_))
    }
}
