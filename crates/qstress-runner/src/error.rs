use std::path::PathBuf;
use thiserror::Error;

use crate::artifact::Artifact;
use crate::process::ProcessOutcome;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot read source {path} for {artifact}: {source}")]
    SourceUnreadable {
        artifact: Artifact,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start compiler '{program}': {source}")]
    CompilerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile {path} ({status})")]
    CompileFailed {
        artifact: Artifact,
        path: PathBuf,
        status: String,
    },

    #[error("compiler reported success but produced no binary for {artifact}")]
    MissingOutput { artifact: Artifact },

    #[error("cannot install binary for {artifact}: {source}")]
    Install {
        artifact: Artifact,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot persist build cache: {0}")]
    CacheWrite(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no compiled binary for {artifact} at {path}")]
    MissingBinary { artifact: Artifact, path: PathBuf },

    #[error("cannot start {artifact}: {source}")]
    Spawn {
        artifact: Artifact,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running {artifact}: {source}")]
    Io {
        artifact: Artifact,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that stops a trial from producing a verdict. These abort the run.
#[derive(Debug, Error)]
pub enum TrialFault {
    #[error("{artifact} {outcome}")]
    ChildFailed {
        artifact: Artifact,
        outcome: ProcessOutcome,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Store(String),
}
