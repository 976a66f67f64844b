//! Remote cache interface
//!
//! The remote tier is an optional secondary store behind an
//! object-safe trait. No transport ships with this crate: concrete
//! backends (HTTP, S3, custom) are external collaborators registered
//! by the embedding application. Every method may fail; the façade
//! downgrades remote failures to warnings and a disconnected remote is
//! a silent no-op.

use std::collections::BTreeMap;
use std::path::Path;

use crate::entry::{CacheEntry, ExpectedFile};
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// A secondary cache tier.
///
/// Implementations are assumed internally safe for concurrent
/// `lookup`; concurrent `add` of the same fingerprint is
/// last-writer-wins (both writers produce identical content, so races
/// are harmless).
pub trait RemoteCache {
    /// Establishes the connection, returning `true` when the remote is
    /// usable. Called lazily before the first probe; may be called
    /// repeatedly.
    fn connect(&mut self) -> bool;

    /// Whether the remote is currently usable.
    fn is_connected(&self) -> bool;

    /// Fetches the descriptor for `fp`, or `None` on a remote miss.
    fn lookup(&self, fp: &Fingerprint) -> Result<Option<CacheEntry>>;

    /// Downloads one payload to `target`, decompressing if
    /// `compressed`.
    fn get_file(
        &self,
        fp: &Fingerprint,
        slot: &str,
        target: &Path,
        compressed: bool,
    ) -> Result<()>;

    /// Uploads an entry together with its payload files.
    fn add(
        &self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        expected_files: &BTreeMap<String, ExpectedFile>,
    ) -> Result<()>;
}
