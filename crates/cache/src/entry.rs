//! Cache entry descriptors
//!
//! A [`CacheEntry`] is the persisted record of one cached invocation:
//! the logical slot ids of its output payloads, the compression mode
//! the payloads were stored with, the captured stdout/stderr bytes, and
//! the recorded exit code. Descriptors are immutable once written and
//! versioned; readers treat an unknown version as corruption.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Current descriptor format version. Increment on breaking changes.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// How the payload files of an entry are stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// Payloads are stored verbatim.
    None,
    /// Every payload is zstd-compressed.
    All,
}

/// The persisted record of one cached invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Descriptor format version; unknown versions are treated as
    /// corrupt.
    pub format_version: u32,

    /// Logical slot names of the output payloads stored beside this
    /// descriptor, in wrapper-declared order.
    pub file_ids: Vec<String>,

    /// Compression mode governing the payload files.
    pub compression: CompressionMode,

    /// Captured standard output, byte-for-byte.
    pub stdout: Vec<u8>,

    /// Captured standard error, byte-for-byte.
    pub stderr: Vec<u8>,

    /// Exit code of the original invocation.
    pub return_code: i32,
}

impl CacheEntry {
    /// Creates a current-version entry.
    #[must_use]
    pub fn new(
        file_ids: Vec<String>,
        compression: CompressionMode,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        return_code: i32,
    ) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            file_ids,
            compression,
            stdout,
            stderr,
            return_code,
        }
    }

    /// Serializes the descriptor for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::serialization(format!("failed to encode entry: {e}")))
    }

    /// Deserializes a descriptor, rejecting unknown format versions.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let entry: Self = serde_json::from_slice(data)
            .map_err(|e| Error::serialization(format!("failed to decode entry: {e}")))?;
        if entry.format_version != ENTRY_FORMAT_VERSION {
            return Err(Error::serialization(format!(
                "unknown entry format version {}",
                entry.format_version
            )));
        }
        Ok(entry)
    }
}

/// An output file declared by the wrapper at lookup/add time.
///
/// The slot id keys the declaration; the path is where the payload must
/// be materialized (lookup) or read from (add). `required = false`
/// means the output may be legitimately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedFile {
    /// Target filesystem path for this slot.
    pub path: PathBuf,

    /// Whether the output must exist.
    pub required: bool,
}

impl ExpectedFile {
    /// A required output at `path`.
    #[must_use]
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: true,
        }
    }

    /// An optional output at `path`.
    #[must_use]
    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: false,
        }
    }
}
