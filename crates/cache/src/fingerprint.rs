//! Invocation fingerprints and the streaming hasher

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Read buffer size for file hashing.
const FILE_CHUNK: usize = 64 * 1024;

/// A fingerprint over an invocation's relevant inputs.
///
/// Two invocations with the same `Fingerprint` are assumed to produce
/// identical outputs. Rendered as 64 lowercase hex characters; the first
/// two characters are used as the shard prefix in the on-disk store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Parses a fingerprint from its 64-char lowercase hex rendering.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::serialization(format!("invalid fingerprint hex: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::serialization(format!("fingerprint must be 32 bytes, got '{s}'"))
        })?;
        Ok(Self(arr))
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Streaming fingerprint builder.
///
/// The update order is part of the cache key contract: feeding the same
/// data in a different order produces a different fingerprint, and
/// changing the order in the driver invalidates every existing entry.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Feeds raw bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Feeds a string's UTF-8 bytes into the digest.
    pub fn update_str(&mut self, data: &str) {
        self.inner.update(data.as_bytes());
    }

    /// Feeds a name → value mapping into the digest.
    ///
    /// `BTreeMap` iteration is key-ordered, so two maps with the same
    /// contents digest identically regardless of insertion order.
    pub fn update_map(&mut self, map: &BTreeMap<String, String>) {
        for (name, value) in map {
            self.inner.update(name.as_bytes());
            self.inner.update(value.as_bytes());
        }
    }

    /// Streams a file's contents into the digest.
    ///
    /// Only content bytes enter the digest; the path, mtime, and other
    /// metadata do not.
    pub fn update_from_file(&mut self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut buf = [0u8; FILE_CHUNK];
        loop {
            let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
            if n == 0 {
                break;
            }
            self.inner.update(&buf[..n]);
        }
        Ok(())
    }

    /// Finalizes the digest into a fingerprint.
    #[must_use]
    pub fn finalize(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience: fingerprint of a single byte slice.
#[must_use]
pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Convenience: fingerprint of one file's contents.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let mut hasher = Hasher::new();
    hasher.update_from_file(path)?;
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = fingerprint_bytes(b"gcc -c main.c");
        let b = fingerprint_bytes(b"gcc -c main.c");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(fingerprint_bytes(b"-O2"), fingerprint_bytes(b"-O3"));
    }

    #[test]
    fn display_is_64_lowercase_hex() {
        let fp = fingerprint_bytes(b"test");
        let s = fp.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hex_roundtrip() {
        let fp = fingerprint_bytes(b"roundtrip");
        let back = Fingerprint::from_hex(&fp.to_string()).unwrap();
        assert_eq!(fp, back);
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(Fingerprint::from_hex("not hex").is_err());
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn serde_roundtrip_through_hex_string() {
        let fp = fingerprint_bytes(b"serde");
        let json = serde_json::to_string(&fp).unwrap();
        assert!(json.contains(&fp.to_string()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }

    #[test]
    fn update_order_matters() {
        let mut a = Hasher::new();
        a.update(b"one");
        a.update(b"two");

        let mut b = Hasher::new();
        b.update(b"two");
        b.update(b"one");

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn map_insertion_order_does_not_matter() {
        let mut m1 = BTreeMap::new();
        m1.insert("PATH".to_string(), "/usr/bin".to_string());
        m1.insert("LANG".to_string(), "C".to_string());

        let mut m2 = BTreeMap::new();
        m2.insert("LANG".to_string(), "C".to_string());
        m2.insert("PATH".to_string(), "/usr/bin".to_string());

        let mut a = Hasher::new();
        a.update_map(&m1);
        let mut b = Hasher::new();
        b.update_map(&m2);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn file_hash_matches_bytes_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.c");
        std::fs::write(&path, b"int main() { return 0; }").unwrap();

        let from_file = fingerprint_file(&path).unwrap();
        let from_bytes = fingerprint_bytes(b"int main() { return 0; }");
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn file_hash_ignores_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.c");
        std::fs::write(&path, b"contents").unwrap();
        let h1 = fingerprint_file(&path).unwrap();

        // Rewrite the same bytes (fresh mtime, same content)
        std::fs::write(&path, b"contents").unwrap();
        let h2 = fingerprint_file(&path).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn missing_file_errors() {
        assert!(fingerprint_file(Path::new("/nonexistent/file.c")).is_err());
    }
}
