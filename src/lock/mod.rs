//! Cooperative filesystem mutex
//!
//! Independent processes (possibly on different cluster nodes sharing one
//! filesystem) serialize access to a shared resource through a marker file.
//! Ownership is the successful exclusive creation of the marker; the marker
//! content records the owner's token.
//!
//! # Marker File Format
//!
//! ```text
//! node17:48211:9f2c4e0a7b3d1c55
//! 2026-01-25T10:30:00.000000Z
//! ```
//!
//! The first line is the owner token, the second the acquisition time.
//!
//! There is no timeout and no deadlock detection. A holder that dies inside
//! its critical section leaves the marker behind until it is removed by hand.
//! Exclusive create must be atomic on the host filesystem.

use crate::error::Error;
use chrono::Utc;
use rand::Rng;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Lower bound of the randomized retry interval
pub const MIN_BACKOFF_MS: u64 = 1;

/// Upper bound of the randomized retry interval
pub const MAX_BACKOFF_MS: u64 = 100;

/// Identity of a lock owner
///
/// Host name, process id and a random nonce. The nonce keeps two holders
/// apart when a pid is recycled, and lets several independent mutex
/// instances in one process compete with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Generate a fresh token for the current process
    pub fn generate() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let nonce: u64 = rand::thread_rng().gen();
        Self(format!("{}:{}:{:016x}", host, std::process::id(), nonce))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OwnerToken {
    fn from(s: String) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<&str> for OwnerToken {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filesystem-marker mutex
#[derive(Debug, Clone)]
pub struct FileMutex {
    path: PathBuf,
    token: OwnerToken,
}

impl FileMutex {
    /// Create a mutex on `path` with a freshly generated owner token
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_token(path, OwnerToken::generate())
    }

    /// Create a mutex on `path` acting as `token`
    ///
    /// Used to release a marker left behind by a known previous owner.
    pub fn with_token(path: impl Into<PathBuf>, token: OwnerToken) -> Self {
        Self {
            path: path.into(),
            token,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &OwnerToken {
        &self.token
    }

    /// Attempt one exclusive create of the marker
    ///
    /// Returns `Ok(false)` when another owner holds it. If the owner record
    /// cannot be written, the marker is removed again and the error returned.
    pub fn try_acquire(&self) -> Result<bool, Error> {
        self.create_marker(|file| {
            write_marker(file, &self.token)?;
            file.sync_all()
        })
    }

    fn create_marker<F>(&self, fill: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut fs::File) -> std::io::Result<()>,
    {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Error::Io(e)),
        };

        if let Err(e) = fill(&mut file) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&self.path) {
                warn!(lock = %self.path.display(), error = %remove_err, "failed to remove incomplete lock marker");
            }
            return Err(Error::Io(e));
        }

        debug!(lock = %self.path.display(), owner = %self.token, "lock acquired");
        Ok(true)
    }

    /// Block until the marker is ours
    ///
    /// Retries forever, sleeping a uniformly random interval in
    /// [`MIN_BACKOFF_MS`, `MAX_BACKOFF_MS`] between attempts so that many
    /// competitors do not retry in lockstep.
    pub fn acquire(&self) -> Result<FileMutexGuard<'_>, Error> {
        let mut rng = rand::thread_rng();
        let mut attempts: u64 = 0;

        while !self.try_acquire()? {
            attempts += 1;
            if attempts % 1000 == 0 {
                debug!(lock = %self.path.display(), attempts, "still waiting for lock");
            }
            let wait = rng.gen_range(MIN_BACKOFF_MS..=MAX_BACKOFF_MS);
            std::thread::sleep(Duration::from_millis(wait));
        }

        Ok(FileMutexGuard {
            mutex: self,
            released: false,
        })
    }

    /// Token recorded in the marker, or `None` if the marker is absent
    pub fn owner(&self) -> Result<Option<OwnerToken>, Error> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(OwnerToken::from(
                content.lines().next().unwrap_or(""),
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Give up ownership if we still hold it
    ///
    /// - marker records our token: delete it, `true`
    /// - marker absent: `true`
    /// - marker owned by someone else: left untouched, `false`
    pub fn release(&self) -> Result<bool, Error> {
        let owner = match self.owner()? {
            Some(owner) => owner,
            None => return Ok(true),
        };

        if owner != self.token {
            debug!(lock = %self.path.display(), owner = %owner, caller = %self.token, "release refused");
            return Ok(false);
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        debug!(lock = %self.path.display(), owner = %self.token, "lock released");
        Ok(true)
    }
}

/// Owner token on the first line, acquisition time on the second
fn write_marker<W: Write>(out: &mut W, token: &OwnerToken) -> std::io::Result<()> {
    writeln!(out, "{}", token)?;
    writeln!(out, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"))
}

/// Scoped ownership of a [`FileMutex`]
///
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct FileMutexGuard<'a> {
    mutex: &'a FileMutex,
    released: bool,
}

impl FileMutexGuard<'_> {
    /// Release now, surfacing a lost marker as [`Error::LockViolation`]
    pub fn release(mut self) -> Result<(), Error> {
        self.released = true;
        if self.mutex.release()? {
            Ok(())
        } else {
            let owner = self
                .mutex
                .owner()?
                .map(|t| t.to_string())
                .unwrap_or_default();
            Err(Error::LockViolation {
                path: self.mutex.path.clone(),
                owner,
            })
        }
    }
}

impl Drop for FileMutexGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.mutex.release() {
            Ok(true) => {}
            Ok(false) => warn!(lock = %self.mutex.path.display(), "lock marker was taken over while held"),
            Err(e) => warn!(lock = %self.mutex.path.display(), error = %e, "failed to release lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.lock");
        let mutex = FileMutex::new(&path);

        let guard = mutex.acquire().unwrap();
        assert!(path.exists());
        assert_eq!(mutex.owner().unwrap(), Some(mutex.token().clone()));

        guard.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_drop_releases() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.lock");
        let mutex = FileMutex::new(&path);

        {
            let _guard = mutex.acquire().unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_release_never_acquired() {
        let temp_dir = TempDir::new().unwrap();
        let mutex = FileMutex::new(temp_dir.path().join("absent.lock"));

        assert!(mutex.release().unwrap());
        assert!(mutex.release().unwrap());
    }

    #[test]
    fn test_try_acquire_contended() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.lock");
        let a = FileMutex::new(&path);
        let b = FileMutex::new(&path);

        assert!(a.try_acquire().unwrap());
        assert!(!b.try_acquire().unwrap());
        assert!(a.release().unwrap());
        assert!(b.try_acquire().unwrap());
    }

    #[test]
    fn test_crashed_holder_keeps_marker() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.lock");
        let holder = FileMutex::new(&path);
        let other = FileMutex::new(&path);

        // Holder dies inside its critical section: no release ever runs
        std::mem::forget(holder.acquire().unwrap());

        assert!(!other.release().unwrap());
        assert!(path.exists());
        assert_eq!(other.owner().unwrap(), Some(holder.token().clone()));
        assert!(!other.try_acquire().unwrap());

        // The known owner can still clean up
        let recovered = FileMutex::with_token(&path, holder.token().clone());
        assert!(recovered.release().unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_release_reports_violation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.lock");
        let mutex = FileMutex::new(&path);

        let guard = mutex.acquire().unwrap();
        fs::write(&path, "someone-else\n").unwrap();

        let err = guard.release().unwrap_err();
        assert!(matches!(err, Error::LockViolation { ref owner, .. } if owner == "someone-else"));
        assert!(path.exists());
    }

    #[test]
    fn test_marker_content() {
        let token = OwnerToken::from("n1:42:00000000000000ab");
        let mut out = Vec::new();
        write_marker(&mut out, &token).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "n1:42:00000000000000ab");
        assert!(lines[1].ends_with('Z'));
    }

    #[test]
    fn test_failed_marker_write_leaves_no_marker() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.lock");
        let mutex = FileMutex::new(&path);

        // Disk fills up after the exclusive create succeeded
        let err = mutex
            .create_marker(|file| {
                write!(file, "n1:")?;
                Err(std::io::Error::new(ErrorKind::Other, "no space left on device"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!path.exists());

        assert!(mutex.try_acquire().unwrap());
        assert!(mutex.release().unwrap());
    }

    #[test]
    fn test_same_process_tokens_differ() {
        let a = OwnerToken::generate();
        let b = OwnerToken::generate();
        assert_ne!(a, b);
        assert!(a.as_str().contains(&format!(":{}:", std::process::id())));
    }

    #[test]
    fn test_mutual_exclusion() {
        const WORKERS: usize = 4;
        const ROUNDS: usize = 10;

        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("counter.lock");
        let counter_path = temp_dir.path().join("counter");
        fs::write(&counter_path, "0").unwrap();

        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let lock_path = lock_path.clone();
                let counter_path = counter_path.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    let mutex = FileMutex::new(lock_path);
                    for _ in 0..ROUNDS {
                        let guard = mutex.acquire().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);

                        let value: usize = fs::read_to_string(&counter_path).unwrap().parse().unwrap();
                        std::thread::sleep(Duration::from_millis(1));
                        fs::write(&counter_path, (value + 1).to_string()).unwrap();

                        inside.fetch_sub(1, Ordering::SeqCst);
                        guard.release().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let total: usize = fs::read_to_string(&counter_path).unwrap().parse().unwrap();
        assert_eq!(total, WORKERS * ROUNDS);
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!lock_path.exists());
    }
}
