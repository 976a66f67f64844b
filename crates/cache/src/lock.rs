//! Cross-process scoped locking
//!
//! A [`ScopedLock`] grants exclusive access to a named resource for the
//! lifetime of the guard and releases it on every exit path, including
//! unwinding. Locks are implemented over exclusively-locked sentinel
//! files, which synchronize correctly even on network filesystems.
//!
//! Two disjoint namespaces exist: [`LockNamespace::Remote`] for
//! filesystems that may be shared across OS instances, and
//! [`LockNamespace::Local`] for known-local filesystems. On this
//! implementation the local namespace uses the same sentinel-file
//! primitive under a different sentinel name; the namespaces must never
//! be mixed for the same resource because their sentinels are unaware
//! of each other.

use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Which lock namespace to use for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockNamespace {
    /// Safe across OS instances (network shares). Sentinel: the path
    /// as given.
    Remote,
    /// Only guaranteed on a local filesystem. Sentinel: the path with
    /// `.local` appended.
    Local,
}

impl LockNamespace {
    fn sentinel_for(self, path: &Path) -> PathBuf {
        match self {
            Self::Remote => path.to_path_buf(),
            Self::Local => {
                let mut os = path.as_os_str().to_os_string();
                os.push(".local");
                PathBuf::from(os)
            }
        }
    }
}

/// A scoped exclusive lock over a named resource.
///
/// The sentinel file is created if absent and left on disk after
/// release; only the OS-level lock is dropped.
#[derive(Debug)]
pub struct ScopedLock {
    file: File,
    path: PathBuf,
}

impl ScopedLock {
    /// Acquires the lock, blocking until it is held.
    pub fn acquire(path: &Path, namespace: LockNamespace) -> Result<Self> {
        let sentinel = namespace.sentinel_for(path);
        let file = Self::open_sentinel(&sentinel)?;
        file.lock_exclusive()
            .map_err(|e| Error::io(e, &sentinel, "lock"))?;
        Ok(Self {
            file,
            path: sentinel,
        })
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// Returns `Ok(None)` when another process holds the lock; any
    /// other failure is an I/O error.
    pub fn try_acquire(path: &Path, namespace: LockNamespace) -> Result<Option<Self>> {
        let sentinel = namespace.sentinel_for(path);
        let file = Self::open_sentinel(&sentinel)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: sentinel,
            })),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::io(e, &sentinel, "try_lock")),
        }
    }

    /// The sentinel path this lock is held on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_sentinel(sentinel: &Path) -> Result<File> {
        if let Some(parent) = sentinel.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(sentinel)
            .map_err(|e| Error::io(e, sentinel, "open"))
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        {
            let lock = ScopedLock::acquire(&path, LockNamespace::Remote).unwrap();
            assert_eq!(lock.path(), path.as_path());
            // While held, a non-blocking attempt from this process would
            // succeed on some platforms (same-process re-entry), so
            // contention is exercised via threads below.
        }

        // Sentinel remains, lock is free again
        assert!(path.exists());
        let _relock = ScopedLock::acquire(&path, LockNamespace::Remote).unwrap();
    }

    #[test]
    fn try_acquire_free_lock_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let lock = ScopedLock::try_acquire(&path, LockNamespace::Remote).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn namespaces_use_disjoint_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resource.lock");

        let remote = ScopedLock::acquire(&path, LockNamespace::Remote).unwrap();
        let local = ScopedLock::acquire(&path, LockNamespace::Local).unwrap();
        assert_ne!(remote.path(), local.path());
        assert!(local.path().to_string_lossy().ends_with(".local"));
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c/.lock");
        let _lock = ScopedLock::acquire(&path, LockNamespace::Remote).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn contention_serializes_across_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join(".lock"));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let path = Arc::clone(&path);
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    let _guard = ScopedLock::acquire(&path, LockNamespace::Remote).unwrap();
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::yield_now();
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn released_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let path2 = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = ScopedLock::acquire(&path2, LockNamespace::Remote).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());

        // The unwind must have released the lock
        let relock = ScopedLock::try_acquire(&path, LockNamespace::Remote).unwrap();
        assert!(relock.is_some());
    }
}
