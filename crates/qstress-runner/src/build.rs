//! Build orchestration: compile an artifact only when its source digest
//! differs from the cached one.

use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::artifact::Artifact;
use crate::cache::{content_digest, CacheRecord, CacheStore};
use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Cached,
    Compiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileStatus {
    pub success: bool,
    pub code: Option<i32>,
}

impl CompileStatus {
    fn describe(self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

pub trait Compiler {
    fn compile(&self, source: &Path, output: &Path) -> Result<CompileStatus, BuildError>;
}

/// `<program> <args...> <source> -o <output>`
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    program: String,
    args: Vec<String>,
}

impl ExternalCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn command_line(&self, source: &Path, output: &Path) -> Vec<OsString> {
        let mut parts: Vec<OsString> = Vec::with_capacity(self.args.len() + 4);
        parts.push(OsString::from(&self.program));
        parts.extend(self.args.iter().map(OsString::from));
        parts.push(source.as_os_str().to_os_string());
        parts.push(OsString::from("-o"));
        parts.push(output.as_os_str().to_os_string());
        parts
    }
}

impl Compiler for ExternalCompiler {
    fn compile(&self, source: &Path, output: &Path) -> Result<CompileStatus, BuildError> {
        let parts = self.command_line(source, output);
        tracing::debug!(command = ?parts, "invoking compiler");
        let status = Command::new(&parts[0])
            .args(&parts[1..])
            .status()
            .map_err(|source| BuildError::CompilerSpawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(CompileStatus {
            success: status.success(),
            code: status.code(),
        })
    }
}

/// Owns the cache record for one invocation and flushes it after every
/// successful compile.
pub struct BuildOrchestrator<S: CacheStore, C: Compiler> {
    store: S,
    compiler: C,
    bin_dir: PathBuf,
    record: CacheRecord,
}

impl<S: CacheStore, C: Compiler> BuildOrchestrator<S, C> {
    pub fn new(store: S, compiler: C, bin_dir: impl AsRef<Path>) -> Self {
        let record = store.load();
        Self {
            store,
            compiler,
            bin_dir: bin_dir.as_ref().to_path_buf(),
            record,
        }
    }

    pub fn record(&self) -> &CacheRecord {
        &self.record
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ensure_built(&mut self, artifact: Artifact, source: &Path) -> Result<BuildOutcome, BuildError> {
        let bytes = fs::read(source).map_err(|err| BuildError::SourceUnreadable {
            artifact,
            path: source.to_path_buf(),
            source: err,
        })?;
        let digest = content_digest(&bytes);
        let binary = artifact.binary_path(&self.bin_dir);

        if self.record.get(artifact) == digest && binary.exists() {
            tracing::debug!(%artifact, source = %source.display(), "build cache hit");
            return Ok(BuildOutcome::Cached);
        }
        tracing::debug!(%artifact, source = %source.display(), "build cache miss");

        // Compile beside the live binary so a failed build leaves it intact.
        let staging = artifact.staging_path(&self.bin_dir);
        let _ = fs::remove_file(&staging);
        let status = self.compiler.compile(source, &staging)?;
        if !status.success {
            let _ = fs::remove_file(&staging);
            tracing::info!(%artifact, status = %status.describe(), "compile failed");
            return Err(BuildError::CompileFailed {
                artifact,
                path: source.to_path_buf(),
                status: status.describe(),
            });
        }
        if !staging.exists() {
            return Err(BuildError::MissingOutput { artifact });
        }
        fs::rename(&staging, &binary).map_err(|source| BuildError::Install { artifact, source })?;

        self.record.set(artifact, digest);
        self.store
            .store(&self.record)
            .map_err(|e| BuildError::CacheWrite(e.to_string()))?;
        tracing::info!(%artifact, source = %source.display(), "compiled");
        Ok(BuildOutcome::Compiled)
    }
}
