use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use optrack_report::DEFAULT_SIMILARITY_THRESHOLD;
use optrack_storage::LockOptions;
use serde::Deserialize;
use tracing::{debug, warn};

/// Looked up inside the data directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "optrack.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub data_dir: PathBuf,
    pub lock_timeout_ms: u64,
    /// Zero disables stale-lock takeover.
    pub stale_lock_secs: u64,
    pub similarity_threshold: f64,
    pub follow_up_tasks: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout_ms: 2_000,
            stale_lock_secs: 300,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            follow_up_tasks: true,
        }
    }
}

impl TrackerConfig {
    /// Defaults, then YAML, then `OPTRACK_*` variables, then the `--data-dir` flag.
    pub fn load(config_path: Option<&Path>, data_dir_flag: Option<&Path>) -> Result<Self> {
        Self::load_with(config_path, data_dir_flag, |key| std::env::var(key).ok())
    }

    fn load_with(
        config_path: Option<&Path>,
        data_dir_flag: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_yaml_file(path)?,
            None => {
                let data_dir = data_dir_flag
                    .map(Path::to_path_buf)
                    .or_else(|| env("OPTRACK_DATA_DIR").map(PathBuf::from))
                    .unwrap_or_else(|| Self::default().data_dir);
                let implicit = data_dir.join(CONFIG_FILE_NAME);
                if implicit.is_file() {
                    Self::from_yaml_file(&implicit)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(env);
        if let Some(dir) = data_dir_flag {
            config.data_dir = dir.to_path_buf();
        }
        debug!(?config, "configuration resolved");
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = env("OPTRACK_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = parse_env(&env, "OPTRACK_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = ms;
        }
        if let Some(secs) = parse_env(&env, "OPTRACK_STALE_LOCK_SECS") {
            self.stale_lock_secs = secs;
        }
        if let Some(threshold) = parse_env::<f64>(&env, "OPTRACK_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(flag) = env("OPTRACK_FOLLOW_UP_TASKS") {
            self.follow_up_tasks = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            stale_after: (self.stale_lock_secs > 0)
                .then(|| Duration::from_secs(self.stale_lock_secs)),
            ..LockOptions::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
