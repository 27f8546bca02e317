//! Small-file packing
//!
//! Files below the packing threshold are grouped into size-bounded tar
//! archives. Membership is written to the state index when a file joins a
//! pack, before the pack is uploaded, so a resumed run knows which pack a
//! file was promised to.

use anyhow::{Context, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tar::Builder;

use crate::logger::Logger;
use crate::state::StateStore;
use crate::unit::{Candidate, Unit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackMember {
    pub path: PathBuf,
    pub key: String,
    pub size: u64,
}

/// An archive of small files. `size` is the sum of member sizes and never
/// exceeds the configured pack size.
#[derive(Debug, Clone)]
pub struct Pack {
    pub index: u64,
    pub name: String,
    pub files: Vec<PackMember>,
    pub size: u64,
}

impl Pack {
    pub fn new(index: u64) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            index,
            name: format!("pack.{}.{}.tar", index, &id[..9]),
            files: Vec::new(),
            size: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn next(&self) -> Pack {
        Pack::new(self.index + 1)
    }

    /// Build the tar archive in memory. Members that vanished since the
    /// crawl are left out and reported.
    pub fn build_archive(&self, logger: &dyn Logger) -> Result<Vec<u8>> {
        let mut builder = Builder::new(Vec::with_capacity(self.size as usize + 1024));
        for member in &self.files {
            let name = member.key.trim_start_matches('/');
            match std::fs::metadata(&member.path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    logger.warn("pack", &member.key, "file vanished before packing");
                    continue;
                }
                _ => {}
            }
            if let Err(e) = builder.append_path_with_name(&member.path, name) {
                if e.kind() == io::ErrorKind::NotFound {
                    logger.warn("pack", &member.key, "file vanished before packing");
                    continue;
                }
                return Err(e).with_context(|| format!("Failed to add {} to {}", member.key, self.name));
            }
        }
        builder
            .into_inner()
            .with_context(|| format!("Failed to finish {}", self.name))
    }
}

/// Packing thresholds.
#[derive(Debug, Clone, Copy)]
pub struct PackConfig {
    /// Files strictly smaller than this are packed.
    pub pack_files_smaller_than: u64,
    /// Upper bound on a pack's aggregate size.
    pub pack_size: u64,
}

/// Turns a stream of candidates into upload units.
pub struct Packer<I> {
    inner: I,
    config: PackConfig,
    current: Pack,
    finished: bool,
    remote_prefix: String,
    state: Arc<dyn StateStore>,
    logger: Arc<dyn Logger>,
}

impl<I: Iterator<Item = Candidate>> Packer<I> {
    pub fn new(
        inner: I,
        config: PackConfig,
        remote_prefix: &str,
        state: Arc<dyn StateStore>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            inner,
            config,
            current: Pack::new(0),
            finished: false,
            remote_prefix: remote_prefix.to_string(),
            state,
            logger,
        }
    }

    fn should_pack(&self, c: &Candidate) -> bool {
        c.size < self.config.pack_files_smaller_than && c.size <= self.config.pack_size
    }

    fn absorb(&mut self, c: Candidate) {
        if let Err(e) = self.state.put(&c.key, &self.current.name) {
            self.logger.error("state", &c.key, &e.to_string());
        }
        self.current.size += c.size;
        self.current.files.push(PackMember {
            path: c.path,
            key: c.key,
            size: c.size,
        });
    }

    fn seal(&mut self) -> Unit {
        let next = self.current.next();
        let sealed = std::mem::replace(&mut self.current, next);
        Unit::pack(sealed, &self.remote_prefix)
    }
}

impl<I: Iterator<Item = Candidate>> Iterator for Packer<I> {
    type Item = Unit;

    fn next(&mut self) -> Option<Unit> {
        if self.finished {
            return None;
        }
        while let Some(c) = self.inner.next() {
            if !self.should_pack(&c) {
                return Some(Unit::file(c, &self.remote_prefix));
            }
            if self.current.size + c.size > self.config.pack_size {
                let sealed = self.seal();
                self.absorb(c);
                return Some(sealed);
            }
            self.absorb(c);
        }
        self.finished = true;
        if self.current.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }
}
