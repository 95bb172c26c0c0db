use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::ensure_dir;

/// Overrides the default `~/.qstress` home root.
pub const HOME_ENV_VAR: &str = "QSTRESS_HOME";

const DEFAULT_HOME_DIR: &str = ".qstress";
const INTERNAL_DIR: &str = "_internal";

/// On-disk layout of the tool home.
///
/// ```text
/// <root>/config.json
/// <root>/_internal/cache.json
/// <root>/_internal/bin/<artifact>
/// <root>/_internal/io/input.txt
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressHome {
    root: PathBuf,
}

impl StressHome {
    /// Resolves the home from `QSTRESS_HOME`, falling back to `~/.qstress`.
    pub fn discover() -> Result<Self> {
        Self::resolve(std::env::var(HOME_ENV_VAR).ok(), dirs::home_dir())
    }

    /// A blank override counts as unset.
    fn resolve(override_root: Option<String>, user_home: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = override_root.filter(|p| !p.trim().is_empty()) {
            return Ok(Self::at(root));
        }
        let home = user_home.ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(Self::at(home.join(DEFAULT_HOME_DIR)))
    }

    pub fn at(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Creates every missing directory of the layout.
    pub fn ensure(&self) -> Result<()> {
        ensure_dir(&self.root)?;
        ensure_dir(&self.internal_dir())?;
        ensure_dir(&self.bin_dir())?;
        ensure_dir(&self.io_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.root.join(INTERNAL_DIR)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.internal_dir().join("cache.json")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.internal_dir().join("bin")
    }

    pub fn io_dir(&self) -> PathBuf {
        self.internal_dir().join("io")
    }

    pub fn io_input_path(&self) -> PathBuf {
        self.io_dir().join("input.txt")
    }
}
