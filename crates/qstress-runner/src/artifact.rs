use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A logical build target. Each one owns exactly one binary slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Artifact {
    Check,
    Gen,
    Main,
    Slow,
}

impl Artifact {
    pub fn as_str(self) -> &'static str {
        match self {
            Artifact::Check => "check",
            Artifact::Gen => "gen",
            Artifact::Main => "main",
            Artifact::Slow => "slow",
        }
    }

    pub fn binary_path(self, bin_dir: &Path) -> PathBuf {
        bin_dir.join(self.as_str())
    }

    /// Where the compiler writes before the result is moved into place.
    pub(crate) fn staging_path(self, bin_dir: &Path) -> PathBuf {
        bin_dir.join(format!(".{}.build", self.as_str()))
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
