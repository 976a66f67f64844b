//! The local content-addressed store
//!
//! On-disk layout, rooted at the configured cache directory:
//!
//! ```text
//! <root>/
//!   config          configuration snapshot
//!   stats           global counters
//!   trash/          staging area for atomic entry removal
//!   <AA>/<BBBB…>/   one directory per fingerprint (2-hex-char shard)
//!       entry           serialized descriptor
//!       <slot_id>       payload file per slot (optionally compressed)
//!       manifest        direct-mode manifest (direct fingerprints only)
//!       stats           per-entry counters (mtime doubles as LRU stamp)
//!       .lock           lock sentinel
//! ```
//!
//! A fingerprint directory is valid only when it holds a decodable
//! descriptor plus every payload the descriptor references; anything
//! else reads as a miss. Writers stage payloads under temporary names
//! and write the descriptor last, so a torn add never reads as valid.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CompressionMode, ExpectedFile};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::lock::{LockNamespace, ScopedLock};
use crate::manifest::DirectManifest;
use crate::stats::{CacheStats, StatKind};

const ENTRY_FILE: &str = "entry";
const MANIFEST_FILE: &str = "manifest";
const STATS_FILE: &str = "stats";
const LOCK_FILE: &str = ".lock";
const TRASH_DIR: &str = "trash";
const EVICTION_LOCK: &str = "eviction.lock";
const GLOBAL_STATS_LOCK: &str = "stats.lock";

/// File names a slot id must not shadow.
const RESERVED_SLOTS: [&str; 4] = [ENTRY_FILE, MANIFEST_FILE, STATS_FILE, LOCK_FILE];

/// Shard prefix length in hex characters (256-way sharding).
const SHARD_LEN: usize = 2;

/// zstd level for payload compression, matching what we use for any
/// bulk artifact data.
const ZSTD_LEVEL: i32 = 3;

/// Outcome of a descriptor lookup.
#[derive(Debug)]
pub enum EntryLookup {
    /// A complete, valid entry.
    Hit(CacheEntry),
    /// No entry recorded for this fingerprint.
    Miss,
    /// Something is on disk but unusable; treated as a miss by callers.
    Corrupt(String),
}

impl EntryLookup {
    /// `true` for [`EntryLookup::Hit`].
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Candidate gathered by the eviction scan.
struct EvictionCandidate {
    dir: PathBuf,
    size: u64,
    last_used: SystemTime,
    hits: u64,
}

/// Summary used by `--show-stats`.
#[derive(Debug, Clone)]
pub struct StoreSummary {
    /// Aggregated global counters.
    pub stats: CacheStats,
    /// Number of fingerprint directories.
    pub entries: usize,
    /// Total bytes under the sharded namespace.
    pub total_size: u64,
}

/// The sharded on-disk store.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    config: CacheConfig,
}

impl LocalStore {
    /// Opens (creating if needed) the store rooted at `config.dir`.
    ///
    /// Sweeps leftover trash from interrupted evictions and refreshes
    /// the configuration snapshot (best effort).
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let root = config.dir.clone();
        std::fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create_dir_all"))?;

        let store = Self {
            root,
            config: config.clone(),
        };
        store.sweep_trash();
        if let Err(e) = config.save_snapshot(&store.root) {
            tracing::debug!(error = %e, "Could not refresh config snapshot");
        }
        Ok(store)
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one fingerprint's files.
    #[must_use]
    pub fn entry_dir(&self, fp: &Fingerprint) -> PathBuf {
        let hex = fp.to_string();
        self.root.join(&hex[..SHARD_LEN]).join(&hex[SHARD_LEN..])
    }

    fn acquire_entry_lock(&self, fp: &Fingerprint) -> Result<ScopedLock> {
        ScopedLock::acquire(&self.entry_dir(fp).join(LOCK_FILE), LockNamespace::Remote)
    }

    fn try_acquire_entry_lock(&self, fp: &Fingerprint) -> Result<Option<ScopedLock>> {
        ScopedLock::try_acquire(&self.entry_dir(fp).join(LOCK_FILE), LockNamespace::Remote)
    }

    /// Reads and validates the descriptor for `fp`.
    ///
    /// The returned lock extends the holder's exclusion through payload
    /// retrieval; a miss or corrupt entry still surfaces the lock so
    /// the caller may choose to populate.
    pub fn lookup(&self, fp: &Fingerprint) -> Result<(EntryLookup, ScopedLock)> {
        let lock = self.acquire_entry_lock(fp)?;
        let dir = self.entry_dir(fp);

        let raw = match std::fs::read(dir.join(ENTRY_FILE)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((EntryLookup::Miss, lock)),
            Err(e) => return Err(Error::io(e, dir.join(ENTRY_FILE), "read")),
        };

        let entry = match CacheEntry::from_bytes(&raw) {
            Ok(entry) => entry,
            Err(e) => return Ok((EntryLookup::Corrupt(e.to_string()), lock)),
        };

        // Every referenced payload must be present
        for slot in &entry.file_ids {
            if !dir.join(slot).is_file() {
                return Ok((
                    EntryLookup::Corrupt(format!("missing payload for slot '{slot}'")),
                    lock,
                ));
            }
        }

        Ok((EntryLookup::Hit(entry), lock))
    }

    /// Materializes one payload to `target`.
    ///
    /// Compressed payloads are decompressed during transfer. When
    /// `allow_hard_links` is set and the payload is uncompressed, a
    /// hard link is attempted first, falling back to a copy.
    pub fn get_file(
        &self,
        fp: &Fingerprint,
        slot: &str,
        target: &Path,
        compressed: bool,
        allow_hard_links: bool,
    ) -> Result<()> {
        let source = self.entry_dir(fp).join(slot);

        if compressed {
            let input = std::fs::File::open(&source).map_err(|e| Error::io(e, &source, "open"))?;
            let mut output =
                std::fs::File::create(target).map_err(|e| Error::io(e, target, "create"))?;
            zstd::stream::copy_decode(input, &mut output)
                .map_err(|e| Error::io(e, target, "decompress"))?;
            return Ok(());
        }

        if allow_hard_links {
            match std::fs::remove_file(target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, target, "remove")),
            }
            if std::fs::hard_link(&source, target).is_ok() {
                return Ok(());
            }
            tracing::debug!(
                source = %source.display(),
                target = %target.display(),
                "Hard link failed, falling back to copy"
            );
        }

        std::fs::copy(&source, target).map_err(|e| Error::io(e, target, "copy"))?;
        Ok(())
    }

    /// Ingests a new entry: payload files read from their expected
    /// paths, descriptor written last.
    ///
    /// Atomic at entry granularity: on failure the fingerprint
    /// directory is torn down. If another process holds the entry lock
    /// the add is skipped (the other populator will finish).
    pub fn add(
        &self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
    ) -> Result<()> {
        for slot in &entry.file_ids {
            validate_slot_id(slot)?;
            if !expected_files.contains_key(slot) {
                return Err(Error::Inconsistency {
                    hash: fp.to_string(),
                    slot: slot.clone(),
                });
            }
        }

        let Some(lock) = self.try_acquire_entry_lock(fp)? else {
            tracing::debug!(hash = %fp, "Entry locked by a concurrent populator, skipping add");
            return Ok(());
        };

        let dir = self.entry_dir(fp);
        if dir.join(ENTRY_FILE).is_file() {
            // A concurrent populator finished before we took the lock;
            // both writers produce identical content.
            tracing::debug!(hash = %fp, "Entry already populated");
            drop(lock);
            return Ok(());
        }

        let result = self.populate_entry(&dir, entry, expected_files, allow_hard_links);
        if let Err(e) = &result {
            tracing::debug!(hash = %fp, error = %e, "Add failed, tearing down entry directory");
            let _ = std::fs::remove_dir_all(&dir);
            drop(lock);
            return result;
        }
        drop(lock);

        self.evict_if_needed();
        Ok(())
    }

    fn populate_entry(
        &self,
        dir: &Path,
        entry: &CacheEntry,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
    ) -> Result<()> {
        // Clear remnants of any previously torn add; keep the held lock
        // sentinel and any accumulated stats
        if let Ok(listing) = std::fs::read_dir(dir) {
            for item in listing.flatten() {
                let name = item.file_name();
                if name != LOCK_FILE && name != STATS_FILE {
                    let _ = std::fs::remove_file(item.path());
                }
            }
        }

        let compress = entry.compression == CompressionMode::All;
        for slot in &entry.file_ids {
            let source = &expected_files[slot].path;
            let dest = dir.join(slot);
            if compress {
                let tmp = dir.join(format!("{slot}.partial"));
                let input =
                    std::fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
                let mut output =
                    std::fs::File::create(&tmp).map_err(|e| Error::io(e, &tmp, "create"))?;
                zstd::stream::copy_encode(input, &mut output, ZSTD_LEVEL)
                    .map_err(|e| Error::io(e, &tmp, "compress"))?;
                std::fs::rename(&tmp, &dest).map_err(|e| Error::io(e, &dest, "rename"))?;
            } else if allow_hard_links && std::fs::hard_link(source, &dest).is_ok() {
                // Linked straight into the store
            } else {
                let tmp = dir.join(format!("{slot}.partial"));
                std::fs::copy(source, &tmp).map_err(|e| Error::io(e, &tmp, "copy"))?;
                std::fs::rename(&tmp, &dest).map_err(|e| Error::io(e, &dest, "rename"))?;
            }
        }

        // Refresh (or create) the per-entry stats file; its mtime is
        // the LRU stamp
        let stats = read_stats_or_default(&dir.join(STATS_FILE));
        write_json_atomic(&dir.join(STATS_FILE), &stats)?;

        // Descriptor last: its presence defines validity
        let raw = entry.to_bytes()?;
        write_bytes_atomic(&dir.join(ENTRY_FILE), &raw)
    }

    /// Loads the direct-mode manifest for `fp`, if one exists.
    ///
    /// Fail-safe: unreadable or version-mismatched manifests read as
    /// `None`.
    pub fn lookup_direct(&self, fp: &Fingerprint) -> Result<Option<DirectManifest>> {
        let _lock = self.acquire_entry_lock(fp)?;
        let path = self.entry_dir(fp).join(MANIFEST_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        match DirectManifest::from_bytes(&raw) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                tracing::debug!(hash = %fp, error = %e, "Unusable direct manifest");
                Ok(None)
            }
        }
    }

    /// Writes (or overwrites) the direct-mode manifest for `fp`.
    pub fn add_direct(&self, fp: &Fingerprint, manifest: &DirectManifest) -> Result<()> {
        let lock = self.acquire_entry_lock(fp)?;
        let dir = self.entry_dir(fp);

        let stats = read_stats_or_default(&dir.join(STATS_FILE));
        write_json_atomic(&dir.join(STATS_FILE), &stats)?;
        let result = write_bytes_atomic(&dir.join(MANIFEST_FILE), &manifest.to_bytes()?);
        drop(lock);

        if result.is_ok() {
            self.evict_if_needed();
        }
        result
    }

    /// Records one event against `fp`'s counters and the global
    /// counters.
    ///
    /// The per-entry write also refreshes the stats file's mtime, which
    /// is what the eviction scan uses as the recency stamp. Miss
    /// events are global-only (see [`StatKind::is_entry_scoped`]).
    pub fn update_stats(&self, fp: &Fingerprint, kind: StatKind) -> Result<()> {
        if kind.is_entry_scoped() {
            let _lock = self.acquire_entry_lock(fp)?;
            let path = self.entry_dir(fp).join(STATS_FILE);
            let mut stats = read_stats_or_default(&path);
            stats.record(kind);
            write_json_atomic(&path, &stats)?;
        }
        {
            let _lock = ScopedLock::acquire(&self.root.join(GLOBAL_STATS_LOCK), LockNamespace::Remote)?;
            let path = self.root.join(STATS_FILE);
            let mut stats = read_stats_or_default(&path);
            stats.record(kind);
            write_json_atomic(&path, &stats)?;
        }
        Ok(())
    }

    /// Reads the global counters.
    pub fn get_stats(&self) -> Result<CacheStats> {
        let _lock = ScopedLock::acquire(&self.root.join(GLOBAL_STATS_LOCK), LockNamespace::Remote)?;
        Ok(read_stats_or_default(&self.root.join(STATS_FILE)))
    }

    /// Gathers the numbers shown by `--show-stats`.
    pub fn summary(&self) -> Result<StoreSummary> {
        let stats = self.get_stats()?;
        let candidates = self.scan_entries()?;
        Ok(StoreSummary {
            stats,
            entries: candidates.len(),
            total_size: candidates.iter().map(|c| c.size).sum(),
        })
    }

    /// Removes every entry and the global counters, preserving the
    /// configuration snapshot.
    pub fn clear(&self) -> Result<()> {
        for shard in self.shard_dirs()? {
            std::fs::remove_dir_all(&shard).map_err(|e| Error::io(e, &shard, "remove_dir_all"))?;
        }
        match std::fs::remove_file(self.root.join(STATS_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(e, self.root.join(STATS_FILE), "remove")),
        }
        self.sweep_trash();
        Ok(())
    }

    /// Total bytes under the sharded namespace (root `config`, global
    /// `stats`, and lock sentinels at the root are excluded).
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.scan_entries()?.iter().map(|c| c.size).sum())
    }

    /// Updates the byte cap, persists it into the snapshot, and evicts
    /// down to the new cap immediately.
    pub fn set_max_cache_size(&mut self, bytes: u64) -> Result<()> {
        self.config.max_cache_size = bytes;
        self.config.save_snapshot(&self.root)?;
        self.evict_if_needed();
        Ok(())
    }

    /// Runs an eviction pass if the store exceeds its cap.
    ///
    /// Least-recently-used entries go first; ties break toward fewer
    /// hits, then larger size. Failures are logged, never propagated.
    fn evict_if_needed(&self) {
        if self.config.max_cache_size == 0 {
            return;
        }
        if let Err(e) = self.evict_to_cap(self.config.max_cache_size) {
            tracing::warn!(error = %e, "Eviction pass failed");
        }
    }

    fn evict_to_cap(&self, cap: u64) -> Result<()> {
        // One eviction pass at a time; a held lock means another
        // process is already sweeping
        let Some(_guard) =
            ScopedLock::try_acquire(&self.root.join(EVICTION_LOCK), LockNamespace::Remote)?
        else {
            return Ok(());
        };

        let mut candidates = self.scan_entries()?;
        let mut total: u64 = candidates.iter().map(|c| c.size).sum();
        if total <= cap {
            return Ok(());
        }

        candidates.sort_by(|a, b| {
            a.last_used
                .cmp(&b.last_used)
                .then(a.hits.cmp(&b.hits))
                .then(b.size.cmp(&a.size))
        });

        for candidate in &candidates {
            if total <= cap {
                break;
            }
            match self.remove_entry_dir(&candidate.dir) {
                Ok(true) => {
                    tracing::debug!(
                        dir = %candidate.dir.display(),
                        size = candidate.size,
                        "Evicted cache entry"
                    );
                    total = total.saturating_sub(candidate.size);
                }
                Ok(false) => {} // busy, skip
                Err(e) => {
                    tracing::warn!(dir = %candidate.dir.display(), error = %e, "Eviction failed");
                }
            }
        }
        Ok(())
    }

    /// Atomically removes one fingerprint directory: rename into trash,
    /// then delete. Returns `false` when the entry lock is contended.
    fn remove_entry_dir(&self, dir: &Path) -> Result<bool> {
        let Some(lock) = ScopedLock::try_acquire(&dir.join(LOCK_FILE), LockNamespace::Remote)?
        else {
            return Ok(false);
        };

        let trash = self.root.join(TRASH_DIR);
        std::fs::create_dir_all(&trash).map_err(|e| Error::io(e, &trash, "create_dir_all"))?;
        let shard = dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged = trash.join(format!("{shard}{name}"));

        match std::fs::rename(dir, &staged) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::io(e, dir, "rename")),
        }
        drop(lock);
        let _ = std::fs::remove_dir_all(&staged);
        Ok(true)
    }

    fn sweep_trash(&self) {
        let trash = self.root.join(TRASH_DIR);
        if let Ok(listing) = std::fs::read_dir(&trash) {
            for item in listing.flatten() {
                let _ = std::fs::remove_dir_all(item.path());
            }
        }
    }

    fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut shards = Vec::new();
        let listing =
            std::fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for item in listing {
            let item = item.map_err(|e| Error::io(e, &self.root, "read_dir"))?;
            let name = item.file_name();
            let name = name.to_string_lossy();
            let is_shard = name.len() == SHARD_LEN
                && name
                    .chars()
                    .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
            if is_shard && item.path().is_dir() {
                shards.push(item.path());
            }
        }
        Ok(shards)
    }

    fn scan_entries(&self) -> Result<Vec<EvictionCandidate>> {
        let mut candidates = Vec::new();
        for shard in self.shard_dirs()? {
            let listing = std::fs::read_dir(&shard).map_err(|e| Error::io(e, &shard, "read_dir"))?;
            for item in listing.flatten() {
                let dir = item.path();
                if !dir.is_dir() {
                    continue;
                }
                let mut size = 0u64;
                for file in walkdir::WalkDir::new(&dir).into_iter().flatten() {
                    if let Ok(meta) = file.metadata() {
                        if meta.is_file() {
                            size += meta.len();
                        }
                    }
                }
                let stats_path = dir.join(STATS_FILE);
                let last_used = std::fs::metadata(&stats_path)
                    .and_then(|m| m.modified())
                    .or_else(|_| std::fs::metadata(&dir).and_then(|m| m.modified()))
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                let hits = read_stats_or_default(&stats_path).total_hits();
                candidates.push(EvictionCandidate {
                    dir,
                    size,
                    last_used,
                    hits,
                });
            }
        }
        Ok(candidates)
    }
}

fn validate_slot_id(slot: &str) -> Result<()> {
    if slot.is_empty()
        || RESERVED_SLOTS.contains(&slot)
        || slot.contains('/')
        || slot.contains('\\')
        || slot.ends_with(".partial")
    {
        return Err(Error::configuration(format!("invalid slot id '{slot}'")));
    }
    Ok(())
}

fn read_stats_or_default(path: &Path) -> CacheStats {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| Error::serialization(format!("failed to encode {}: {e}", path.display())))?;
    write_bytes_atomic(path, &raw)
}

fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    let tmp = path.with_extension("partial");
    std::fs::write(&tmp, data).map_err(|e| Error::io(e, &tmp, "write"))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io(e, path, "rename"))
}
