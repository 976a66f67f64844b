//! The cache façade
//!
//! Orchestrates the lookup protocol consumed by the command driver:
//! direct-mode manifest resolution, then preprocessor-mode lookup in
//! the local store, then the remote tier, mirroring remote hits back
//! into the local store. Adds are size-gated per tier.
//!
//! Lookup errors never propagate: a fall-back run of the wrapped
//! program would lose the chance to re-populate a corrupted entry, so
//! every failure here reads as a cache miss.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CompressionMode, ExpectedFile};
use crate::error::{Error, Result};
use crate::fingerprint::{fingerprint_file, Fingerprint, Hasher};
use crate::manifest::DirectManifest;
use crate::remote::RemoteCache;
use crate::stats::StatKind;
use crate::store::{EntryLookup, LocalStore};

/// The replayed result of a cached invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    /// Captured standard output of the original run.
    pub stdout: Vec<u8>,
    /// Captured standard error of the original run.
    pub stderr: Vec<u8>,
    /// Exit code of the original run.
    pub return_code: i32,
}

/// Two-tier cache façade.
pub struct Cache {
    local: LocalStore,
    remote: Option<Box<dyn RemoteCache>>,
    config: CacheConfig,
}

impl Cache {
    /// Opens the local store and wires in an optional remote tier.
    pub fn new(config: &CacheConfig, remote: Option<Box<dyn RemoteCache>>) -> Result<Self> {
        Ok(Self {
            local: LocalStore::open(config)?,
            remote,
            config: config.clone(),
        })
    }

    /// The underlying local store.
    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Preprocessor-mode lookup. On a hit the cached stdout/stderr are
    /// written to this process's stdout/stderr byte-for-byte and the
    /// cached exit code is returned.
    pub fn lookup(
        &mut self,
        fp: &Fingerprint,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
        create_target_dirs: bool,
    ) -> Option<i32> {
        let replay = self.lookup_replay(fp, expected_files, allow_hard_links, create_target_dirs)?;
        emit_replay(&replay);
        Some(replay.return_code)
    }

    /// Preprocessor-mode lookup returning the replay instead of
    /// emitting it. Misses and every internal failure read as `None`.
    pub fn lookup_replay(
        &mut self,
        fp: &Fingerprint,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
        create_target_dirs: bool,
    ) -> Option<Replay> {
        match self.lookup_in_local(fp, expected_files, allow_hard_links, create_target_dirs) {
            Ok(Some(replay)) => {
                record(&self.local, fp, StatKind::LocalHit);
                record(&self.local, fp, StatKind::PreprocessorHit);
                return Some(replay);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(hash = %fp, error = %e, "Local lookup failed, treating as miss");
            }
        }

        match self.lookup_in_remote(fp, expected_files, allow_hard_links, create_target_dirs) {
            Ok(Some(replay)) => {
                record(&self.local, fp, StatKind::PreprocessorHit);
                return Some(replay);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(hash = %fp, error = %e, "Remote lookup failed, treating as miss");
            }
        }

        record(&self.local, fp, StatKind::PreprocessorMiss);
        None
    }

    /// Direct-mode lookup: resolve the manifest, re-validate the
    /// implicit inputs, then delegate to the preprocessor-mode lookup.
    ///
    /// Direct stats land on the direct fingerprint; downstream stats on
    /// the preprocessor fingerprint.
    pub fn lookup_direct(
        &mut self,
        direct_fp: &Fingerprint,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
        create_target_dirs: bool,
    ) -> Option<i32> {
        let preprocessor_fp = self.resolve_direct(direct_fp)?;
        self.lookup(
            &preprocessor_fp,
            expected_files,
            allow_hard_links,
            create_target_dirs,
        )
    }

    /// Resolves a direct fingerprint to its preprocessor fingerprint if
    /// the manifest exists and every implicit input still digests the
    /// same.
    pub fn resolve_direct(&mut self, direct_fp: &Fingerprint) -> Option<Fingerprint> {
        let manifest = match self.local.lookup_direct(direct_fp) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                tracing::debug!(hash = %direct_fp, "Direct mode cache miss");
                record(&self.local, direct_fp, StatKind::DirectMiss);
                return None;
            }
            Err(e) => {
                tracing::warn!(hash = %direct_fp, error = %e, "Direct lookup failed, treating as miss");
                record(&self.local, direct_fp, StatKind::DirectMiss);
                return None;
            }
        };

        for (path, recorded) in &manifest.implicit_inputs {
            match fingerprint_file(path) {
                Ok(current) if current == *recorded => {}
                _ => {
                    tracing::debug!(
                        hash = %direct_fp,
                        input = %path.display(),
                        "Implicit input changed, direct mode cache miss"
                    );
                    record(&self.local, direct_fp, StatKind::DirectMiss);
                    return None;
                }
            }
        }

        tracing::debug!(
            hash = %direct_fp,
            preprocessor_hash = %manifest.preprocessor_hash,
            "Direct mode cache hit"
        );
        record(&self.local, direct_fp, StatKind::DirectHit);
        Some(manifest.preprocessor_hash)
    }

    /// Records a fresh entry in both tiers, size-gated per tier.
    /// Failures are logged; the caller is never told.
    pub fn add(
        &mut self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
    ) {
        let size = match total_entry_size(entry, expected_files) {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(hash = %fp, error = %e, "Could not size cache entry, skipping add");
                return;
            }
        };

        let max_local = self.config.max_local_entry_size;
        if max_local == 0 || size < max_local {
            match self.local.add(fp, entry, expected_files, allow_hard_links) {
                Ok(()) => record(&self.local, fp, StatKind::LocalAdd),
                Err(e) => {
                    tracing::debug!(hash = %fp, error = %e, "Local add failed");
                }
            }
        } else {
            tracing::warn!(hash = %fp, size, "Cache entry too large for the local cache");
        }

        let read_only = self.config.read_only_remote;
        let max_remote = self.config.max_remote_entry_size;
        if let Some(remote) = self.remote.as_mut() {
            if remote.connect() && !read_only {
                if max_remote == 0 || size < max_remote {
                    // Remote entries are always fully compressed
                    let remote_entry = CacheEntry::new(
                        entry.file_ids.clone(),
                        CompressionMode::All,
                        entry.stdout.clone(),
                        entry.stderr.clone(),
                        entry.return_code,
                    );
                    match remote.add(fp, &remote_entry, expected_files) {
                        Ok(()) => record(&self.local, fp, StatKind::RemoteAdd),
                        Err(e) => {
                            tracing::warn!(hash = %fp, error = %e, "Remote cache error");
                        }
                    }
                } else {
                    tracing::warn!(hash = %fp, size, "Cache entry too large for the remote cache");
                }
            }
        }
    }

    /// Hashes the implicit inputs and records a direct-mode manifest.
    /// Errors are logged and swallowed.
    pub fn add_direct(
        &self,
        direct_fp: &Fingerprint,
        preprocessor_fp: &Fingerprint,
        implicit_inputs: &[PathBuf],
    ) {
        let mut inputs = BTreeMap::new();
        for path in implicit_inputs {
            match fingerprint_file(path) {
                Ok(digest) => {
                    inputs.insert(path.clone(), digest);
                }
                Err(e) => {
                    tracing::warn!(
                        hash = %direct_fp,
                        input = %path.display(),
                        error = %e,
                        "Creation of direct mode entry failed"
                    );
                    return;
                }
            }
        }

        let manifest = DirectManifest::new(*preprocessor_fp, inputs);
        if let Err(e) = self.local.add_direct(direct_fp, &manifest) {
            tracing::warn!(hash = %direct_fp, error = %e, "Creation of direct mode entry failed");
        }
    }

    fn lookup_in_local(
        &mut self,
        fp: &Fingerprint,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
        create_target_dirs: bool,
    ) -> Result<Option<Replay>> {
        let (lookup, lock) = self.local.lookup(fp)?;
        let entry = match lookup {
            EntryLookup::Hit(entry) => entry,
            EntryLookup::Miss => return Ok(None),
            EntryLookup::Corrupt(reason) => {
                tracing::warn!(hash = %fp, reason, "Corrupt cache entry, treating as miss");
                return Ok(None);
            }
        };

        // The lock extends through payload materialization
        let compressed = entry.compression == CompressionMode::All;
        for slot in &entry.file_ids {
            let expected = expected_files.get(slot).ok_or_else(|| Error::Inconsistency {
                hash: fp.to_string(),
                slot: slot.clone(),
            })?;
            tracing::debug!(hash = %fp, slot = %slot, target = %expected.path.display(), "Local cache hit");
            if create_target_dirs {
                create_parent_dirs(&expected.path)?;
            }
            self.local
                .get_file(fp, slot, &expected.path, compressed, allow_hard_links)?;
        }
        drop(lock);

        Ok(Some(Replay {
            stdout: entry.stdout,
            stderr: entry.stderr,
            return_code: entry.return_code,
        }))
    }

    fn lookup_in_remote(
        &mut self,
        fp: &Fingerprint,
        expected_files: &BTreeMap<String, ExpectedFile>,
        allow_hard_links: bool,
        create_target_dirs: bool,
    ) -> Result<Option<Replay>> {
        let Some(remote) = self.remote.as_mut() else {
            return Ok(None);
        };
        if !remote.connect() {
            return Ok(None);
        }

        let Some(entry) = remote.lookup(fp)? else {
            record(&self.local, fp, StatKind::RemoteMiss);
            return Ok(None);
        };

        let compressed = entry.compression == CompressionMode::All;
        for slot in &entry.file_ids {
            let expected = expected_files.get(slot).ok_or_else(|| Error::Inconsistency {
                hash: fp.to_string(),
                slot: slot.clone(),
            })?;
            tracing::debug!(hash = %fp, slot = %slot, target = %expected.path.display(), "Remote cache hit");
            if create_target_dirs {
                create_parent_dirs(&expected.path)?;
            }
            remote.get_file(fp, slot, &expected.path, compressed)?;
        }

        record(&self.local, fp, StatKind::RemoteHit);

        // Mirror into the local store for faster future hits. The
        // payloads were just materialized at their target paths, so the
        // local add reads them from there, re-encoding per the local
        // compression policy.
        match total_entry_size(&entry, expected_files) {
            Ok(size) => {
                let max_local = self.config.max_local_entry_size;
                if max_local == 0 || size < max_local {
                    let local_entry = CacheEntry::new(
                        entry.file_ids.clone(),
                        if self.config.compress {
                            CompressionMode::All
                        } else {
                            CompressionMode::None
                        },
                        entry.stdout.clone(),
                        entry.stderr.clone(),
                        entry.return_code,
                    );
                    match self
                        .local
                        .add(fp, &local_entry, expected_files, allow_hard_links)
                    {
                        Ok(()) => record(&self.local, fp, StatKind::LocalAdd),
                        Err(e) => {
                            tracing::warn!(hash = %fp, error = %e, "Unable to mirror remote entry locally");
                        }
                    }
                } else {
                    tracing::warn!(hash = %fp, size, "Cache entry too large for the local cache");
                }
            }
            Err(e) => {
                tracing::warn!(hash = %fp, error = %e, "Unable to size remote entry for mirroring");
            }
        }

        Ok(Some(Replay {
            stdout: entry.stdout,
            stderr: entry.stderr,
            return_code: entry.return_code,
        }))
    }
}

/// Stat updates never fail a lookup; a failed write is just logged.
fn record(local: &LocalStore, fp: &Fingerprint, kind: StatKind) {
    if let Err(e) = local.update_stats(fp, kind) {
        tracing::debug!(hash = %fp, error = %e, "Failed to update stats");
    }
}

/// Total uncompressed bytes an entry accounts for: stdout + stderr +
/// the sizes of every declared output that exists. A missing required
/// output is an error; a missing optional one contributes nothing.
pub fn total_entry_size(
    entry: &CacheEntry,
    expected_files: &BTreeMap<String, ExpectedFile>,
) -> Result<u64> {
    let mut total = (entry.stdout.len() + entry.stderr.len()) as u64;
    for expected in expected_files.values() {
        match std::fs::metadata(&expected.path) {
            Ok(meta) => total += meta.len(),
            Err(e) => {
                if expected.required {
                    return Err(Error::io(e, &expected.path, "stat"));
                }
            }
        }
    }
    Ok(total)
}

/// Builds the preprocessor-mode fingerprint from its four components.
///
/// The hash order is part of the cache key contract: preprocessed
/// source, then the relevant arguments joined by single spaces
/// (order-preserving), then the relevant environment sorted by name,
/// then the program id. Changing this order invalidates every existing
/// cache entry.
#[must_use]
pub fn preprocessor_fingerprint(
    preprocessed_source: &[u8],
    relevant_arguments: &[String],
    relevant_env: &BTreeMap<String, String>,
    program_id: &str,
) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update(preprocessed_source);
    hasher.update_str(&relevant_arguments.join(" "));
    hasher.update_map(relevant_env);
    hasher.update_str(program_id);
    hasher.finalize()
}

/// Builds the direct-mode fingerprint: the unpreprocessed command, the
/// relevant environment, and the program id — no preprocessor output.
#[must_use]
pub fn direct_fingerprint(
    arguments: &[String],
    relevant_env: &BTreeMap<String, String>,
    program_id: &str,
) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update_str(&arguments.join(" "));
    hasher.update_map(relevant_env);
    hasher.update_str(program_id);
    hasher.finalize()
}

fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    Ok(())
}

fn emit_replay(replay: &Replay) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(&replay.stdout);
    let _ = out.flush();

    let stderr = std::io::stderr();
    let mut err = stderr.lock();
    let _ = err.write_all(&replay.stderr);
    let _ = err.flush();
}
