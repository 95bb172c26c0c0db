//! Content cache: remembers the digest of the source each binary was last
//! built from.

use anyhow::Result;
use qstress_core::{atomic_write_bytes, sha256_bytes};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::Artifact;

/// One digest per artifact; an empty string means "never built".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheRecord {
    pub check: String,
    pub gen: String,
    pub main: String,
    pub slow: String,
}

impl CacheRecord {
    pub fn get(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::Check => &self.check,
            Artifact::Gen => &self.gen,
            Artifact::Main => &self.main,
            Artifact::Slow => &self.slow,
        }
    }

    pub fn set(&mut self, artifact: Artifact, digest: String) {
        let slot = match artifact {
            Artifact::Check => &mut self.check,
            Artifact::Gen => &mut self.gen,
            Artifact::Main => &mut self.main,
            Artifact::Slow => &mut self.slow,
        };
        *slot = digest;
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    sha256_bytes(bytes)
}

pub trait CacheStore {
    /// Never fails: unreadable state is reported as an empty record.
    fn load(&self) -> CacheRecord;

    fn store(&self, record: &CacheRecord) -> Result<()>;
}

/// `cache.json` under the tool home.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self) -> CacheRecord {
        if !self.path.exists() {
            let record = CacheRecord::default();
            if let Err(err) = self.store(&record) {
                tracing::warn!(path = %self.path.display(), error = %err, "cannot initialize build cache");
            }
            return record;
        }
        let parsed = fs::read(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| serde_json::from_slice::<CacheRecord>(&bytes).map_err(Into::into));
        match parsed {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "build cache unreadable; treating every artifact as stale"
                );
                CacheRecord::default()
            }
        }
    }

    fn store(&self, record: &CacheRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        atomic_write_bytes(&self.path, &bytes)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    record: RefCell<CacheRecord>,
    writes: Cell<usize>,
}

impl MemoryCacheStore {
    pub fn new(record: CacheRecord) -> Self {
        Self {
            record: RefCell::new(record),
            writes: Cell::new(0),
        }
    }

    pub fn snapshot(&self) -> CacheRecord {
        self.record.borrow().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self) -> CacheRecord {
        self.snapshot()
    }

    fn store(&self, record: &CacheRecord) -> Result<()> {
        *self.record.borrow_mut() = record.clone();
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
