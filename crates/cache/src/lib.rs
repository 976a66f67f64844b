//! Content-addressed invocation caching for prewarm
//!
//! This crate provides the caching core that sits between the command
//! driver and the filesystem:
//! - Streaming fingerprints over bytes and files
//! - Cross-process scoped file locking
//! - A sharded on-disk content store with size-bounded LRU eviction
//! - Versioned entry descriptors and direct-mode manifests
//! - Hit/miss statistics, global and per-entry
//! - A façade orchestrating direct → preprocessor → local → remote lookup
//!
//! # Failure philosophy
//!
//! The cache must never make a build fail. Lookup errors are downgraded
//! to misses, add errors are logged and swallowed, and remote-tier
//! failures never propagate past a warning.

mod error;

pub mod config;
pub mod entry;
pub mod facade;
pub mod fingerprint;
pub mod lock;
pub mod manifest;
pub mod remote;
pub mod stats;
pub mod store;

pub use config::CacheConfig;
pub use entry::{CacheEntry, CompressionMode, ExpectedFile};
pub use error::{Error, Result};
pub use facade::{direct_fingerprint, preprocessor_fingerprint, total_entry_size, Cache, Replay};
pub use fingerprint::{fingerprint_bytes, fingerprint_file, Fingerprint, Hasher};
pub use lock::{LockNamespace, ScopedLock};
pub use manifest::DirectManifest;
pub use remote::RemoteCache;
pub use stats::{CacheStats, StatKind};
pub use store::{EntryLookup, LocalStore, StoreSummary};
