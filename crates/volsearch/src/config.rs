//! Search configuration, loadable from a JSON settings file.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::filter::{FolderFilter, QuickFilter};

/// A volume declared in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub mount_path: PathBuf,
    #[serde(default)]
    pub internal: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Watcher cadence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period before a batch of events is applied.
    pub debounce_ms: u64,
    /// Upper bound on how long a continuous event storm can delay a batch.
    pub max_batch_latency_ms: u64,
    /// Flush cadence while the front-end is suspended.
    pub suspended_interval_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_batch_latency_ms: 2_000,
            suspended_interval_ms: 10_000,
            retry_initial_ms: 1_000,
            retry_max_ms: 60_000,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_batch_latency(&self) -> Duration {
        Duration::from_millis(self.max_batch_latency_ms)
    }

    pub fn suspended_interval(&self) -> Duration {
        Duration::from_millis(self.suspended_interval_ms)
    }

    /// Backoff before registration attempt `attempt` (0-based) is retried.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.retry_initial_ms
                .saturating_mul(factor)
                .min(self.retry_max_ms),
        )
    }
}

/// Query and result publication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Delay applied to query keystrokes when the index is large.
    pub debounce_ms: u64,
    /// Index size from which query input is debounced.
    pub debounce_min_entries: usize,
    /// Longest continuous changes may hold back a result update.
    pub max_latency_ms: u64,
    pub max_results: usize,
    pub max_recents: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            debounce_min_entries: 50_000,
            max_latency_ms: 500,
            max_results: 500,
            max_recents: 100,
        }
    }
}

impl QueryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Volumes to index. Empty means discover them from the system.
    pub volumes: Vec<VolumeConfig>,
    /// Directory whose subdirectories are external mounts, polled for
    /// volumes mounted or unmounted while running. Defaults to `/Volumes`
    /// when no volumes are configured.
    pub volumes_dir: Option<PathBuf>,
    pub mount_poll_ms: u64,
    pub ignored_paths: Vec<PathBuf>,
    pub include_hidden: bool,
    pub watch: WatchConfig,
    pub query: QueryConfig,
    pub folder_filters: Vec<FolderFilter>,
    pub quick_filters: Vec<QuickFilter>,
    /// File extension (lowercase, no dot) to the applications able to open it.
    /// The `*` key lists applications that open anything.
    pub open_with: BTreeMap<String, Vec<PathBuf>>,
    /// A path only readable with full disk access. `None` skips the check.
    pub full_disk_access_path: Option<PathBuf>,
    pub full_disk_access_poll_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            volumes_dir: None,
            mount_poll_ms: 2_000,
            ignored_paths: Vec::new(),
            include_hidden: false,
            watch: WatchConfig::default(),
            query: QueryConfig::default(),
            folder_filters: Vec::new(),
            quick_filters: Vec::new(),
            open_with: BTreeMap::new(),
            full_disk_access_path: None,
            full_disk_access_poll_ms: 2_000,
        }
    }
}

impl SearchConfig {
    /// Loads and validates a JSON settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| {
            SearchError::Config(format!("unable to read {}: {error}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| SearchError::Config(format!("invalid settings: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.max_results == 0 {
            return Err(SearchError::Config("query.max_results must be > 0".into()));
        }
        if self.query.max_recents == 0 {
            return Err(SearchError::Config("query.max_recents must be > 0".into()));
        }
        if self.mount_poll_ms == 0 {
            return Err(SearchError::Config("mount_poll_ms must be > 0".into()));
        }
        if self.watch.retry_initial_ms == 0 {
            return Err(SearchError::Config(
                "watch.retry_initial_ms must be > 0".into(),
            ));
        }

        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        let declared = self
            .folder_filters
            .iter()
            .map(|filter| (filter.id.as_str(), filter.key))
            .chain(
                self.quick_filters
                    .iter()
                    .map(|filter| (filter.id.as_str(), filter.key)),
            );
        for (id, key) in declared {
            if !ids.insert(id) {
                return Err(SearchError::Config(format!("duplicate filter id: {id}")));
            }
            if let Some(key) = key {
                if !keys.insert(key.to_ascii_lowercase()) {
                    return Err(SearchError::Config(format!(
                        "duplicate filter shortcut: {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn mount_poll(&self) -> Duration {
        Duration::from_millis(self.mount_poll_ms)
    }

    pub fn full_disk_access_poll(&self) -> Duration {
        Duration::from_millis(self.full_disk_access_poll_ms)
    }
}

fn default_true() -> bool {
    true
}
