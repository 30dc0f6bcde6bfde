//! Core configuration: thresholds, retry budgets, pool sizing, and data
//! paths. Loaded from environment (`SAVANT_*`), from a TOML file, or built
//! with the defaults below. Unset or invalid values fall back to defaults.
//!
//! Similarity thresholds and the quality gate are tunable configuration,
//! not fixed constants; tests and embedders override them freely.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default on-disk location for the sled-backed knowledge store.
const DEFAULT_DATA_DIR: &str = "./data/savant_store";

/// Tag-set Jaccard similarity at or above which `find` treats a document as
/// covering the query.
const DEFAULT_FIND_SIMILARITY: f32 = 0.5;

/// Tag-set Jaccard similarity at or above which the synthesis engine groups
/// documents into one cluster.
const DEFAULT_CLUSTER_SIMILARITY: f32 = 0.4;

/// Quality score at or above which an existing fresh document short-circuits
/// dispatch.
const DEFAULT_QUALITY_THRESHOLD: f32 = 0.6;

const DEFAULT_FRESHNESS_WINDOW_DAYS: i64 = 30;
const DEFAULT_WRITE_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_WRITE_RETRY_BACKOFF_MS: u64 = 25;
const DEFAULT_QUEUE_BOUND: usize = 32;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TASK_RETENTION_HOURS: i64 = 24;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 1800;

/// Runtime configuration for the store, scheduler, executor, and synthesis
/// engine.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | SAVANT_DATA_DIR | ./data/savant_store | Sled database directory. |
/// | SAVANT_FIND_SIMILARITY | 0.5 | Jaccard threshold for coverage queries. |
/// | SAVANT_CLUSTER_SIMILARITY | 0.4 | Jaccard threshold for synthesis clustering. |
/// | SAVANT_QUALITY_THRESHOLD | 0.6 | Quality gate for dedup short-circuit. |
/// | SAVANT_FRESHNESS_WINDOW_DAYS | 30 | Age limit for coverage queries. |
/// | SAVANT_WRITE_RETRY_ATTEMPTS | 3 | Optimistic write retry budget (min 1). |
/// | SAVANT_WRITE_RETRY_BACKOFF_MS | 25 | Initial backoff; doubles per retry. |
/// | SAVANT_POOL_SIZE | cores | Concurrent executor slots (min 1). |
/// | SAVANT_QUEUE_BOUND | 32 | Executor queue depth before Overloaded. |
/// | SAVANT_TASK_TIMEOUT_SECS | 300 | Default task deadline (min 1). |
/// | SAVANT_TASK_RETENTION_HOURS | 24 | Terminal tasks kept before sweep. |
/// | SAVANT_SCAN_INTERVAL_SECS | 1800 | Synthesis scan cadence (min 60). |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_find_similarity")]
    pub find_similarity_threshold: f32,
    #[serde(default = "default_cluster_similarity")]
    pub cluster_similarity_threshold: f32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,
    #[serde(default = "default_freshness_window_days")]
    pub freshness_window_days: i64,
    #[serde(default = "default_write_retry_attempts")]
    pub write_retry_attempts: u32,
    #[serde(default = "default_write_retry_backoff_ms")]
    pub write_retry_backoff_ms: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_task_retention_hours")]
    pub task_retention_hours: i64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_find_similarity() -> f32 {
    DEFAULT_FIND_SIMILARITY
}

fn default_cluster_similarity() -> f32 {
    DEFAULT_CLUSTER_SIMILARITY
}

fn default_quality_threshold() -> f32 {
    DEFAULT_QUALITY_THRESHOLD
}

fn default_freshness_window_days() -> i64 {
    DEFAULT_FRESHNESS_WINDOW_DAYS
}

fn default_write_retry_attempts() -> u32 {
    DEFAULT_WRITE_RETRY_ATTEMPTS
}

fn default_write_retry_backoff_ms() -> u64 {
    DEFAULT_WRITE_RETRY_BACKOFF_MS
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_queue_bound() -> usize {
    DEFAULT_QUEUE_BOUND
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn default_task_retention_hours() -> i64 {
    DEFAULT_TASK_RETENTION_HOURS
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            find_similarity_threshold: DEFAULT_FIND_SIMILARITY,
            cluster_similarity_threshold: DEFAULT_CLUSTER_SIMILARITY,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            freshness_window_days: DEFAULT_FRESHNESS_WINDOW_DAYS,
            write_retry_attempts: DEFAULT_WRITE_RETRY_ATTEMPTS,
            write_retry_backoff_ms: DEFAULT_WRITE_RETRY_BACKOFF_MS,
            pool_size: default_pool_size(),
            queue_bound: DEFAULT_QUEUE_BOUND,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            task_retention_hours: DEFAULT_TASK_RETENTION_HOURS,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
        }
    }
}

impl CoreConfig {
    /// Load from environment. Unset or invalid values keep the defaults
    /// documented on the struct; out-of-range values are clamped.
    pub fn from_env() -> Self {
        Self {
            data_dir: env_path("SAVANT_DATA_DIR", DEFAULT_DATA_DIR),
            find_similarity_threshold: env_ratio("SAVANT_FIND_SIMILARITY", DEFAULT_FIND_SIMILARITY),
            cluster_similarity_threshold: env_ratio(
                "SAVANT_CLUSTER_SIMILARITY",
                DEFAULT_CLUSTER_SIMILARITY,
            ),
            quality_threshold: env_ratio("SAVANT_QUALITY_THRESHOLD", DEFAULT_QUALITY_THRESHOLD),
            freshness_window_days: env_i64("SAVANT_FRESHNESS_WINDOW_DAYS", DEFAULT_FRESHNESS_WINDOW_DAYS)
                .max(1),
            write_retry_attempts: env_u32("SAVANT_WRITE_RETRY_ATTEMPTS", DEFAULT_WRITE_RETRY_ATTEMPTS)
                .max(1),
            write_retry_backoff_ms: env_u64(
                "SAVANT_WRITE_RETRY_BACKOFF_MS",
                DEFAULT_WRITE_RETRY_BACKOFF_MS,
            ),
            pool_size: env_usize("SAVANT_POOL_SIZE", default_pool_size()).max(1),
            queue_bound: env_usize("SAVANT_QUEUE_BOUND", DEFAULT_QUEUE_BOUND).max(1),
            task_timeout_secs: env_u64("SAVANT_TASK_TIMEOUT_SECS", DEFAULT_TASK_TIMEOUT_SECS).max(1),
            task_retention_hours: env_i64("SAVANT_TASK_RETENTION_HOURS", DEFAULT_TASK_RETENTION_HOURS)
                .max(0),
            scan_interval_secs: env_u64("SAVANT_SCAN_INTERVAL_SECS", DEFAULT_SCAN_INTERVAL_SECS)
                .max(60),
        }
    }

    /// Load from a TOML file; missing fields keep their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, crate::CoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Returns a copy pointing the store at `dir`. Used by tests and
    /// embedders with per-instance data directories.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.freshness_window_days)
    }

    pub fn task_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.task_timeout_secs as i64)
    }

    pub fn task_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.task_retention_hours)
    }

    pub fn write_retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.write_retry_backoff_ms)
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_secs)
    }
}

fn env_path(name: &str, default: &str) -> PathBuf {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => PathBuf::from(default),
    }
}

fn env_ratio(name: &str, default: f32) -> f32 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<f32>().unwrap_or(default).clamp(0.0, 1.0),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert!(config.find_similarity_threshold > config.cluster_similarity_threshold);
        assert!(config.write_retry_attempts >= 1);
        assert!(config.pool_size >= 1);
        assert_eq!(config.freshness_window(), chrono::Duration::days(30));
    }

    #[test]
    fn toml_partial_override() {
        let config: CoreConfig =
            toml::from_str("quality_threshold = 0.8\nqueue_bound = 4").unwrap();
        assert_eq!(config.quality_threshold, 0.8);
        assert_eq!(config.queue_bound, 4);
        assert_eq!(config.freshness_window_days, 30);
    }
}
