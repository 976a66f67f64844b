//! Resolved cache configuration
//!
//! Configuration is a plain value object constructed at the CLI entry
//! point and threaded explicitly through the façade and wrappers. The
//! store persists a JSON snapshot of the effective configuration at its
//! root; the snapshot also carries the durable `max_cache_size` set via
//! `--max-size`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default cache size cap: 5 GiB.
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Resolved configuration for one prewarm invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root path of the on-disk store.
    pub dir: PathBuf,

    /// Total byte cap for the store; eviction threshold. Zero means
    /// unlimited.
    pub max_cache_size: u64,

    /// Per-entry admission cap for the local store. Zero means
    /// unbounded.
    pub max_local_entry_size: u64,

    /// Per-entry admission cap for the remote store. Zero means
    /// unbounded.
    pub max_remote_entry_size: u64,

    /// Compress local payloads.
    pub compress: bool,

    /// Permit hard-link materialization when the wrapper allows it.
    pub hard_links: bool,

    /// Suppress remote `add` even when a remote is connected.
    pub read_only_remote: bool,

    /// Remote endpoint URL, if any.
    pub remote: Option<String>,

    /// Diagnostic log file; events go to stderr when unset.
    pub log_file: Option<PathBuf>,

    /// Verbose diagnostic logging.
    pub debug: bool,

    /// Emit per-phase performance events.
    pub perf: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".prewarm"),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_local_entry_size: 0,
            max_remote_entry_size: 0,
            compress: false,
            hard_links: false,
            read_only_remote: false,
            remote: None,
            log_file: None,
            debug: false,
            perf: false,
        }
    }
}

impl CacheConfig {
    /// Loads the persisted configuration snapshot from a store root.
    ///
    /// Fail-safe: a missing or unparsable snapshot yields `None`.
    #[must_use]
    pub fn load_snapshot(root: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(root.join("config")).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Persists this configuration as the store's snapshot.
    ///
    /// Written via a temp name so concurrent invocations never observe
    /// a torn snapshot.
    pub fn save_snapshot(&self, root: &Path) -> Result<()> {
        std::fs::create_dir_all(root).map_err(|e| Error::io(e, root, "create_dir_all"))?;
        let path = root.join("config");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization(format!("failed to serialize config: {e}")))?;
        let tmp = root.join(format!("config.{}", std::process::id()));
        std::fs::write(&tmp, json).map_err(|e| Error::io(e, &tmp, "write"))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::io(e, &path, "rename"))
    }
}
