use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::{atomic_write_json_pretty, StressHome};

/// Settings read from `config.json`. Each key present in the file replaces
/// its default wholesale; missing keys keep the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub compiler_bin: String,
    pub compile_args: Vec<String>,
    pub tests: usize,
    pub find: usize,
    pub folder: String,
    /// Wall-clock limit per child process; 0 disables it.
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compiler_bin: "g++".to_string(),
            compile_args: vec!["-O2".to_string(), "-std=c++17".to_string()],
            tests: 200,
            find: 1,
            folder: "test_cases".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.find == 0 {
            return Err(anyhow!("invalid config: find must be at least 1"));
        }
        if self.compiler_bin.trim().is_empty() {
            return Err(anyhow!("invalid config: compilerBin cannot be empty"));
        }
        if self.folder.trim().is_empty() {
            return Err(anyhow!("invalid config: folder cannot be empty"));
        }
        Ok(())
    }
}

/// Loads the config under `home`, writing the defaults first if the file is
/// absent.
pub fn load_config(home: &StressHome) -> Result<Config> {
    let path = home.config_path();
    if !path.exists() {
        let defaults = serde_json::to_value(Config::default())?;
        atomic_write_json_pretty(&path, &defaults)?;
        tracing::debug!(path = %path.display(), "wrote default config");
    }
    parse_config_file(&path)
}

fn parse_config_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow!("malformed config {}: {}", path.display(), e))
}
