use anyhow::{anyhow, Result};
use qstress_core::{atomic_write_bytes, ensure_dir};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::artifact::Artifact;
use crate::process::{Executor, ProcessOutcome, RunRequest};

const CASE_PREFIX: &str = "input_";
const CASE_SUFFIX: &str = ".txt";

/// Folder of failing inputs, `input_1.txt ..= input_K.txt` in discovery order.
#[derive(Debug, Clone)]
pub struct FailureStore {
    dir: PathBuf,
}

impl FailureStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn case_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}{}{}", CASE_PREFIX, index, CASE_SUFFIX))
    }

    /// Creates the folder if needed and removes everything inside it.
    pub fn clear(&self) -> Result<()> {
        ensure_dir(&self.dir)?;
        let mut removed = 0usize;
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
            removed += 1;
        }
        tracing::debug!(dir = %self.dir.display(), removed, "cleared failing-case folder");
        Ok(())
    }

    pub fn persist(&self, index: usize, input: &[u8]) -> Result<PathBuf> {
        if index == 0 {
            return Err(anyhow!("failing-case indices start at 1"));
        }
        let path = self.case_path(index);
        atomic_write_bytes(&path, input)?;
        Ok(path)
    }

    /// Stored case indices in ascending order. Files that do not follow the
    /// `input_<n>.txt` naming are ignored.
    pub fn list(&self) -> Result<Vec<usize>> {
        if !self.dir.exists() {
            return Err(anyhow!("failing-case folder not found: {}", self.dir.display()));
        }
        let mut indices = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(index) = entry.file_name().to_str().and_then(parse_case_index) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    pub fn read(&self, index: usize) -> Result<Vec<u8>> {
        let path = self.case_path(index);
        fs::read(&path).map_err(|e| anyhow!("cannot read test case {} ({}): {}", index, path.display(), e))
    }
}

fn parse_case_index(name: &str) -> Option<usize> {
    name.strip_prefix(CASE_PREFIX)?
        .strip_suffix(CASE_SUFFIX)?
        .parse::<usize>()
        .ok()
        .filter(|i| *i > 0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutput {
    pub artifact: Artifact,
    pub outcome: ProcessOutcome,
    pub stdout: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayView {
    pub index: usize,
    pub input: String,
    pub outputs: Vec<ReplayOutput>,
}

/// Re-runs `main` (and `slow` unless `checker_mode`) on a stored input. No
/// judging happens here.
pub fn replay_case(
    executor: &dyn Executor,
    store: &FailureStore,
    index: usize,
    checker_mode: bool,
) -> Result<ReplayView> {
    let input = store.read(index)?;
    let mut artifacts = vec![Artifact::Main];
    if !checker_mode {
        artifacts.push(Artifact::Slow);
    }
    let mut outputs = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let run = executor.run(artifact, &RunRequest::captured().with_stdin(&input))?;
        outputs.push(ReplayOutput {
            artifact,
            outcome: run.outcome,
            stdout: run.stdout_text(),
        });
    }
    Ok(ReplayView {
        index,
        input: String::from_utf8_lossy(&input).into_owned(),
        outputs,
    })
}

pub fn replay_all(
    executor: &dyn Executor,
    store: &FailureStore,
    checker_mode: bool,
) -> Result<Vec<ReplayView>> {
    store
        .list()?
        .into_iter()
        .map(|index| replay_case(executor, store, index, checker_mode))
        .collect()
}
