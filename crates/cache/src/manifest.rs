//! Direct-mode manifests
//!
//! A direct-mode manifest maps an invocation's *direct* fingerprint
//! (raw command, environment, program id — no preprocessing) to the
//! preprocessor-mode fingerprint it resolved to, together with content
//! digests of every implicit input the tool read (header-like files).
//! If all implicit inputs still digest the same, the recorded
//! preprocessor hash is the right key to consult and the preprocessing
//! step can be skipped entirely.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Mapping from a direct fingerprint to its preprocessor fingerprint
/// and the implicit-input digests that validate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectManifest {
    /// Manifest format version; unknown versions are treated as
    /// corrupt.
    pub format_version: u32,

    /// The preprocessor-mode fingerprint to consult when the implicit
    /// inputs are unchanged.
    pub preprocessor_hash: Fingerprint,

    /// Absolute path → content digest for every implicit input read by
    /// the original invocation.
    pub implicit_inputs: BTreeMap<PathBuf, Fingerprint>,
}

impl DirectManifest {
    /// Creates a current-version manifest.
    #[must_use]
    pub fn new(
        preprocessor_hash: Fingerprint,
        implicit_inputs: BTreeMap<PathBuf, Fingerprint>,
    ) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            preprocessor_hash,
            implicit_inputs,
        }
    }

    /// Serializes the manifest for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::serialization(format!("failed to encode manifest: {e}")))
    }

    /// Deserializes a manifest, rejecting unknown format versions.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| Error::serialization(format!("failed to decode manifest: {e}")))?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(Error::serialization(format!(
                "unknown manifest format version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }
}
