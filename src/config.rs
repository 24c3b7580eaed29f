//! Runtime configuration.
//!
//! CLI flags and the manifest always win; an optional `config.toml` only
//! fills in tuning knobs (retry counts, backoff, worker pool sizes,
//! prefetch window bounds, upload part threshold, memory budget), falling
//! back to built-in defaults when absent or unparsable.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TuningConfig {
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub prefetch_workers: usize,
    pub prefetch_initial_window_bytes: u64,
    pub prefetch_max_window_bytes: u64,
    pub prefetch_memory_budget_bytes: u64,
    pub upload_workers: usize,
    pub upload_part_threshold_bytes: u64,
    pub http_client_pool_size: usize,
    pub kernel_attr_timeout_seconds: u64,
    pub kernel_entry_timeout_seconds: u64,
    pub upload_drain_timeout_seconds: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_backoff_ms: 200,
            prefetch_workers: 4,
            prefetch_initial_window_bytes: 1 << 20, // 1 MiB
            prefetch_max_window_bytes: 16 << 20,    // 16 MiB
            prefetch_memory_budget_bytes: 256 << 20, // 256 MiB
            upload_workers: 4,
            upload_part_threshold_bytes: 16 << 20, // 16 MiB
            http_client_pool_size: 4,
            kernel_attr_timeout_seconds: 1,
            kernel_entry_timeout_seconds: 1,
            upload_drain_timeout_seconds: 30,
        }
    }
}

pub fn load_tuning_config(path: &Path) -> TuningConfig {
    if !path.exists() {
        tracing::debug!(?path, "no tuning config found, using defaults");
        return TuningConfig::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(?path, error = %e, "could not read tuning config, using defaults");
            return TuningConfig::default();
        }
    };

    match toml::from_str(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(?path, error = %e, "could not parse tuning config, using defaults");
            TuningConfig::default()
        }
    }
}

/// Fully resolved mount configuration: CLI flags, on-disk state paths, and
/// the tuning knobs loaded from `config.toml` if present.
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub read_only: bool,
    pub uid: u32,
    pub gid: u32,
    pub verbose: u8,
    pub debug_fuse: bool,
    pub metadata_db_path: PathBuf,
    pub staging_dir: PathBuf,
    pub log_path: Option<PathBuf>,
    pub tuning: TuningConfig,
}
