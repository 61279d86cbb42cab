//! Configuration loading: `lattice.toml` in the workspace root, overridden
//! field by field by CLI flags. Unknown fields are ignored so older
//! binaries tolerate newer config files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    /// Apply autocorrects to disk after a batch run.
    #[serde(default)]
    pub autocorrect: bool,
    /// Worker threads; defaults to available parallelism minus one.
    #[serde(default)]
    pub max_threads: Option<usize>,
    #[serde(default)]
    pub statsd: StatsdConfig,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StatsdConfig {
    /// `host:port` of a statsd agent; unset disables metrics export.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "StatsdConfig::default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "StatsdConfig::default_prefix")]
    pub prefix: String,
}

impl StatsdConfig {
    fn default_interval() -> u64 {
        300
    }

    fn default_prefix() -> String {
        "lattice".to_owned()
    }
}

/// Load an explicit config path, or discover `lattice.toml` next to the
/// first input directory. Absent files are the default config, not an
/// error; a present-but-malformed file is fatal.
pub fn load(explicit: Option<&Path>, fallback_dir: Option<&Path>) -> Result<ConfigFile> {
    let path: Option<PathBuf> = match explicit {
        Some(path) => Some(path.to_owned()),
        None => fallback_dir.map(|dir| dir.join("lattice.toml")).filter(|p| p.exists()),
    };
    let Some(path) = path else {
        return Ok(ConfigFile::default());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let parsed: ConfigFile =
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
    tracing::info!(target: "runtime.config", path = %path.display(), "loaded configuration");
    Ok(parsed)
}
