//! Controller exclusivity enforcement.
//!
//! A hardware controller must be unique both between processes and within a
//! process. [`ExclusivityGuard::acquire`] combines a process-wide slot with
//! an advisory exclusive lock on a well-known file, in that order, with
//! all-or-nothing semantics: if the file lock cannot be taken, the process
//! slot is released before the error is returned. Both acquisition steps
//! are non-blocking; contention fails immediately with
//! [`HwError::AlreadyLocked`] instead of waiting.
//!
//! The returned [`LockHandle`] releases both locks when dropped, on every
//! exit path including unwinding. The lock file itself is created if absent
//! and never deleted on release; the advisory lock on it is the resource,
//! not the file.

use crate::error::{HwError, HwResult, LockContention};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide controller slot. There is one per process; taking it is the
/// in-process half of the exclusivity guard.
static PROCESS_SLOT: AtomicBool = AtomicBool::new(false);

/// Non-blocking acquisition of the combined in-process and host-level
/// controller locks.
pub struct ExclusivityGuard;

impl ExclusivityGuard {
    /// Try to take the process slot and the exclusive file lock at `path`.
    ///
    /// Returns a [`LockHandle`] owning both on success. On contention the
    /// error names the holder: [`LockContention::Thread`] when the process
    /// slot is taken, [`LockContention::Process`] when another process holds
    /// the file lock.
    pub fn acquire(path: &Path) -> HwResult<LockHandle> {
        if PROCESS_SLOT
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HwError::AlreadyLocked(LockContention::Thread));
        }

        match Self::try_acquire_file_lock(path) {
            Ok(file) => {
                debug!("acquired hardware controller lock at {}", path.display());
                Ok(LockHandle { file })
            }
            Err(err) => {
                // All-or-nothing: give the slot back before failing.
                PROCESS_SLOT.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn try_acquire_file_lock(path: &Path) -> HwResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(HwError::AlreadyLocked(LockContention::Process))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// The combined exclusivity token. Exactly one may be live per host while a
/// controller exists; dropping it releases both locks.
#[derive(Debug)]
pub struct LockHandle {
    file: File,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            debug!("failed to unlock controller lock file: {err}");
        }
        PROCESS_SLOT.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn lock_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("hardware.lock")
    }

    #[test]
    #[serial]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        let handle = ExclusivityGuard::acquire(&path).expect("first acquire");
        match ExclusivityGuard::acquire(&path) {
            Err(HwError::AlreadyLocked(LockContention::Thread)) => {}
            other => panic!("expected thread contention, got {other:?}"),
        }
        drop(handle);
    }

    #[test]
    #[serial]
    fn test_reacquire_succeeds_after_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        let handle = ExclusivityGuard::acquire(&path).expect("first acquire");
        drop(handle);
        let handle = ExclusivityGuard::acquire(&path).expect("reacquire after release");
        drop(handle);
    }

    #[test]
    #[serial]
    fn test_externally_locked_file_reports_process_contention() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        // Stand in for another process: a separate descriptor holding the
        // advisory lock.
        let outside = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .expect("open lock file");
        outside.try_lock_exclusive().expect("external lock");

        match ExclusivityGuard::acquire(&path) {
            Err(HwError::AlreadyLocked(LockContention::Process)) => {}
            other => panic!("expected process contention, got {other:?}"),
        }

        // The failed acquire must have released the process slot.
        fs2::FileExt::unlock(&outside).expect("external unlock");
        let handle = ExclusivityGuard::acquire(&path).expect("acquire after external release");
        drop(handle);
    }

    #[test]
    #[serial]
    fn test_exactly_one_concurrent_acquire_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        let wins = Arc::new(AtomicUsize::new(0));
        let losses = Arc::new(AtomicUsize::new(0));
        // Second rendezvous keeps the winner's handle alive until every
        // thread has made its attempt.
        let start = Arc::new(std::sync::Barrier::new(8));
        let done = Arc::new(std::sync::Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let wins = Arc::clone(&wins);
                let losses = Arc::clone(&losses);
                let start = Arc::clone(&start);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    start.wait();
                    match ExclusivityGuard::acquire(&path) {
                        Ok(handle) => {
                            wins.fetch_add(1, Ordering::SeqCst);
                            done.wait();
                            drop(handle);
                        }
                        Err(HwError::AlreadyLocked(_)) => {
                            losses.fetch_add(1, Ordering::SeqCst);
                            done.wait();
                        }
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("thread join");
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(losses.load(Ordering::SeqCst), 7);
    }

    #[test]
    #[serial]
    fn test_lock_file_survives_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        let handle = ExclusivityGuard::acquire(&path).expect("acquire");
        drop(handle);
        assert!(path.exists(), "lock file must not be deleted on release");
    }
}
