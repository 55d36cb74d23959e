//! Sweep configuration
//!
//! Loaded from `sweep.json` in the config directory, then overridden by
//! environment variables. Every field is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::SweepOptions;

/// Config filename in the config directory
pub const CONFIG_FILE: &str = "sweep.json";

const DATABASE_FILE: &str = "ingest.sqlite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub database_path: Option<PathBuf>,
    pub subjects: Vec<String>,
    /// Newline-separated subjects, `#` starts a comment
    pub subjects_file: Option<PathBuf>,
    pub window_days: u32,
    pub page_size: u32,
    /// Items per unit before pagination stops early; `null` disables the cap
    pub result_cap: Option<usize>,
    pub concurrency: usize,
    pub page_timeout_secs: u64,
    pub subject_timeout_secs: u64,
    pub rate_limit_backoff_secs: u64,
    pub lease_ttl_secs: u64,
    pub verbose: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            subjects: Vec::new(),
            subjects_file: None,
            window_days: 30,
            page_size: 100,
            result_cap: Some(1000),
            concurrency: 4,
            page_timeout_secs: 30,
            subject_timeout_secs: 900,
            rate_limit_backoff_secs: 3600,
            lease_ttl_secs: 1800,
            verbose: false,
        }
    }
}

impl SweepConfig {
    /// Load `sweep.json` if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut cfg: Self = if config::config_exists(CONFIG_FILE) {
            config::load_json(CONFIG_FILE)?
        } else {
            Self::default()
        };
        cfg.apply_env(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Apply `INGEST_DATABASE`, `INGEST_SUBJECTS` and `INGEST_SYNC_DEBUG`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("INGEST_DATABASE").filter(|v| !v.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(list) = var("INGEST_SUBJECTS") {
            self.subjects.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        if let Some(flag) = var("INGEST_SYNC_DEBUG") {
            self.verbose = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
    }

    /// Configured database path, or `ingest.sqlite` in the config directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DATABASE_FILE).context("Could not determine config directory"),
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    /// Orchestrator options derived from this config
    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            concurrency: self.concurrency.max(1),
            window: chrono::Duration::days(i64::from(self.window_days)),
            result_cap: self.result_cap,
            subject_timeout: (self.subject_timeout_secs > 0)
                .then(|| Duration::from_secs(self.subject_timeout_secs)),
            rate_limit_backoff: Duration::from_secs(self.rate_limit_backoff_secs),
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            verbose: self.verbose,
            ..SweepOptions::default()
        }
    }
}
