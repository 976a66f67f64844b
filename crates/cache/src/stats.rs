//! Hit/miss statistics
//!
//! Counters are kept twice: one global `stats` file at the store root,
//! and one per fingerprint directory. Per-entry counters feed the
//! eviction tie-breaks (fewer hits evict first); the per-entry stats
//! file's mtime doubles as the LRU timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One countable cache event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// Direct-mode manifest resolved and validated.
    DirectHit,
    /// No usable direct-mode manifest.
    DirectMiss,
    /// Preprocessor-mode lookup succeeded in some tier.
    PreprocessorHit,
    /// Preprocessor-mode lookup missed every tier.
    PreprocessorMiss,
    /// Entry served from the local store.
    LocalHit,
    /// Entry served from the remote store.
    RemoteHit,
    /// Remote store probed and missed.
    RemoteMiss,
    /// Entry admitted to the local store.
    LocalAdd,
    /// Entry admitted to the remote store.
    RemoteAdd,
}

impl StatKind {
    /// Whether this event is attributed to the fingerprint's own
    /// counter file in addition to the global counters. Misses are
    /// global-only so that probing absent fingerprints does not
    /// populate the store.
    #[must_use]
    pub fn is_entry_scoped(self) -> bool {
        matches!(
            self,
            Self::DirectHit
                | Self::PreprocessorHit
                | Self::LocalHit
                | Self::RemoteHit
                | Self::LocalAdd
                | Self::RemoteAdd
        )
    }
}

/// Counter set for cache events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Direct-mode hits.
    #[serde(default)]
    pub direct_hit: u64,
    /// Direct-mode misses.
    #[serde(default)]
    pub direct_miss: u64,
    /// Preprocessor-mode hits.
    #[serde(default)]
    pub preprocessor_hit: u64,
    /// Preprocessor-mode misses.
    #[serde(default)]
    pub preprocessor_miss: u64,
    /// Local-tier hits.
    #[serde(default)]
    pub local_hit: u64,
    /// Remote-tier hits.
    #[serde(default)]
    pub remote_hit: u64,
    /// Remote-tier misses.
    #[serde(default)]
    pub remote_miss: u64,
    /// Local-tier admissions.
    #[serde(default)]
    pub local_add: u64,
    /// Remote-tier admissions.
    #[serde(default)]
    pub remote_add: u64,
}

impl CacheStats {
    /// Increments the counter for one event.
    pub fn record(&mut self, kind: StatKind) {
        let counter = match kind {
            StatKind::DirectHit => &mut self.direct_hit,
            StatKind::DirectMiss => &mut self.direct_miss,
            StatKind::PreprocessorHit => &mut self.preprocessor_hit,
            StatKind::PreprocessorMiss => &mut self.preprocessor_miss,
            StatKind::LocalHit => &mut self.local_hit,
            StatKind::RemoteHit => &mut self.remote_hit,
            StatKind::RemoteMiss => &mut self.remote_miss,
            StatKind::LocalAdd => &mut self.local_add,
            StatKind::RemoteAdd => &mut self.remote_add,
        };
        *counter += 1;
    }

    /// Field-wise addition of another counter set.
    pub fn merge(&mut self, other: &CacheStats) {
        self.direct_hit += other.direct_hit;
        self.direct_miss += other.direct_miss;
        self.preprocessor_hit += other.preprocessor_hit;
        self.preprocessor_miss += other.preprocessor_miss;
        self.local_hit += other.local_hit;
        self.remote_hit += other.remote_hit;
        self.remote_miss += other.remote_miss;
        self.local_add += other.local_add;
        self.remote_add += other.remote_add;
    }

    /// Total hits served from any tier, any mode. Used for eviction
    /// tie-breaks.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.direct_hit + self.local_hit + self.remote_hit
    }

    /// Hit ratio over preprocessor-mode lookups, if any were made.
    #[must_use]
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.preprocessor_hit + self.preprocessor_miss;
        if total == 0 {
            None
        } else {
            Some(self.preprocessor_hit as f64 / total as f64)
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  direct hits:          {}", self.direct_hit)?;
        writeln!(f, "  direct misses:        {}", self.direct_miss)?;
        writeln!(f, "  preprocessor hits:    {}", self.preprocessor_hit)?;
        writeln!(f, "  preprocessor misses:  {}", self.preprocessor_miss)?;
        writeln!(f, "  local hits:           {}", self.local_hit)?;
        writeln!(f, "  remote hits:          {}", self.remote_hit)?;
        writeln!(f, "  remote misses:        {}", self.remote_miss)?;
        writeln!(f, "  local adds:           {}", self.local_add)?;
        writeln!(f, "  remote adds:          {}", self.remote_add)?;
        match self.hit_ratio() {
            Some(ratio) => writeln!(f, "  hit ratio:            {:.1}%", ratio * 100.0),
            None => writeln!(f, "  hit ratio:            n/a"),
        }
    }
}
