use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use walkdir::{DirEntry, WalkDir};

use crate::logger::Logger;
use crate::paths;
use crate::state::{resolve, Resolution, StateStore};
use crate::unit::Candidate;

/// Directory identity used to break symlink cycles.
#[cfg(unix)]
type DirId = (u64, u64);
#[cfg(not(unix))]
type DirId = std::path::PathBuf;

#[cfg(unix)]
fn dir_identity(entry: &DirEntry) -> Option<DirId> {
    use std::os::unix::fs::MetadataExt;
    let md = entry.metadata().ok()?;
    Some((md.dev(), md.ino()))
}

#[cfg(not(unix))]
fn dir_identity(entry: &DirEntry) -> Option<DirId> {
    std::fs::canonicalize(entry.path()).ok()
}

type EntryFilter = Box<dyn FnMut(&DirEntry) -> bool + Send>;

/// Lazy depth-first walk yielding files that still need uploading.
///
/// Symlinks are followed; a directory reached a second time (by any route)
/// is skipped silently. Ignored paths are pruned with their subtree.
/// Unreadable directories are logged and skipped. Files whose state key
/// resolves to `done` are skipped one by one, the walk continues.
pub struct Crawler {
    walker: walkdir::FilterEntry<walkdir::IntoIter, EntryFilter>,
    state: Arc<dyn StateStore>,
    logger: Arc<dyn Logger>,
}

impl Crawler {
    pub fn new(
        root: &Path,
        ignore: &[String],
        state: Arc<dyn StateStore>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let ignore: HashSet<String> = ignore
            .iter()
            .map(|p| paths::normalize_str(p.trim_end_matches(['/', '\\'])))
            .collect();
        let mut visited: HashSet<DirId> = HashSet::new();

        let filter: EntryFilter = Box::new(move |e: &DirEntry| {
            if !ignore.is_empty() && ignore.contains(&paths::to_remote(e.path())) {
                return false;
            }
            if e.file_type().is_dir() {
                // Without an identity we cannot detect a revisit; walk it anyway.
                if let Some(id) = dir_identity(e) {
                    return visited.insert(id);
                }
            }
            true
        });

        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(filter);

        Self {
            walker,
            state,
            logger,
        }
    }
}

impl Iterator for Crawler {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let entry = match self.walker.next()? {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    if e.loop_ancestor().is_none() {
                        self.logger.warn("crawl", &path, &e.to_string());
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(md) => md.len(),
                Err(e) => {
                    self.logger
                        .warn("crawl", &entry.path().display().to_string(), &e.to_string());
                    continue;
                }
            };
            let key = paths::to_remote(entry.path());

            match resolve(&*self.state, &key) {
                Ok(Resolution::Done) => {
                    self.logger.skipped(&key, "already uploaded");
                    continue;
                }
                Ok(Resolution::Pending(pack)) => {
                    self.logger
                        .warn("crawl", &key, &format!("pack {pack} never finished, repacking"));
                }
                Ok(Resolution::Unknown) => {}
                Err(e) => {
                    self.logger.error("state", &key, &e.to_string());
                }
            }

            return Some(Candidate {
                path: entry.into_path(),
                key,
                size,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use crate::state::{MemoryStore, DONE};

    fn crawl(root: &Path, ignore: &[String], state: Arc<MemoryStore>) -> Vec<Candidate> {
        Crawler::new(root, ignore, state, Arc::new(NoopLogger)).collect()
    }

    #[test]
    fn yields_every_file_with_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join("a/b/deep.txt"), b"123").unwrap();

        let mut found = crawl(dir.path(), &[], Arc::new(MemoryStore::new()));
        found.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(found.len(), 2);
        assert!(found[0].key.ends_with("/a/b/deep.txt"));
        assert_eq!(found[0].size, 3);
        assert!(found[1].key.ends_with("/top.txt"));
        assert_eq!(found[1].size, 5);
        assert!(found.iter().all(|c| !c.key.contains('\\')));
    }

    #[test]
    fn done_file_is_skipped_without_stopping_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1.txt", "2.txt", "3.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let state = Arc::new(MemoryStore::new());
        let done_key = paths::to_remote(&dir.path().join("2.txt"));
        state.put(&done_key, DONE).unwrap();

        let found = crawl(dir.path(), &[], state);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.key != done_key));
    }

    #[test]
    fn pending_pack_members_are_yielded_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.txt"), b"x").unwrap();
        let state = Arc::new(MemoryStore::new());
        let key = paths::to_remote(&dir.path().join("m.txt"));
        state.put(&key, "pack.0.zzz.tar").unwrap();

        let found = crawl(dir.path(), &[], state);
        assert_eq!(found.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/f.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("a"), dir.path().join("a/b/loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("a/b"), dir.path().join("alias")).unwrap();

        let found = crawl(dir.path(), &[], Arc::new(MemoryStore::new()));
        assert_eq!(found.len(), 1);
    }
}
