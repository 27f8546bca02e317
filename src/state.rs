//! Durable path -> status index
//!
//! Keys are normalized file paths (or pack names), values are either
//! [`DONE`] or the name of the pack a file was absorbed into.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Completion marker.
pub const DONE: &str = "done";

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Outcome of the two-level lookup for a file key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Never seen.
    Unknown,
    /// Uploaded, directly or through its pack.
    Done,
    /// Absorbed into a pack that never finished uploading.
    Pending(String),
}

/// Resolve a file key: the value is either `done` or a pack name whose own
/// key must be `done`.
pub fn resolve(store: &dyn StateStore, key: &str) -> Result<Resolution> {
    match store.get(key)? {
        None => Ok(Resolution::Unknown),
        Some(v) if v == DONE => Ok(Resolution::Done),
        Some(pack) => match store.get(&pack)? {
            Some(p) if p == DONE => Ok(Resolution::Done),
            _ => Ok(Resolution::Pending(pack)),
        },
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct JournalRecord {
    key: String,
    value: String,
}

/// Append-only JSONL journal replayed into memory on open.
pub struct JournalStore {
    path: PathBuf,
    inner: Mutex<JournalInner>,
}

struct JournalInner {
    map: HashMap<String, String>,
    writer: BufWriter<File>,
    #[cfg(test)]
    syncs: u64,
}

impl JournalStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let (map, records, torn) = Self::replay(path)?;
        if torn || records > map.len() {
            Self::compact(path, &map)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open state journal")?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(JournalInner {
                map,
                writer: BufWriter::new(file),
                #[cfg(test)]
                syncs: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replay(path: &Path) -> Result<(HashMap<String, String>, usize, bool)> {
        let mut map = HashMap::new();
        if !path.exists() {
            return Ok((map, 0, false));
        }
        let file = File::open(path).context("Failed to open state journal for reading")?;
        let reader = BufReader::new(file);
        let mut records = 0usize;
        let mut torn = false;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A crash mid-append leaves a torn last line; everything before it is intact.
            let record: JournalRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(_) => {
                    torn = true;
                    continue;
                }
            };
            records += 1;
            map.insert(record.key, record.value);
        }
        Ok((map, records, torn))
    }

    fn compact(path: &Path, map: &HashMap<String, String>) -> Result<()> {
        let tmp = path.with_extension("jsonl.compact");
        {
            let file = File::create(&tmp).context("Failed to create compacted journal")?;
            let mut writer = BufWriter::new(file);
            for (key, value) in map {
                serde_json::to_writer(
                    &mut writer,
                    &JournalRecord {
                        key: key.clone(),
                        value: value.clone(),
                    },
                )?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path).context("Failed to replace state journal")?;
        Ok(())
    }
}

impl StateStore for JournalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = JournalRecord {
            key: key.to_string(),
            value: value.to_string(),
        };
        serde_json::to_writer(&mut inner.writer, &record)?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        // Membership records ride along with the next `done` sync; losing
        // them in a crash only means those files are packed again.
        if value == DONE {
            inner
                .writer
                .get_ref()
                .sync_data()
                .context("Failed to sync state journal")?;
            #[cfg(test)]
            {
                inner.syncs += 1;
            }
        }
        inner.map.insert(record.key, record.value);
        Ok(())
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.lock().clone()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
