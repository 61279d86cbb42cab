//! Cancellation and commit for slow-path typechecks.
//!
//! Three epoch counters, treated as a single protected state:
//!
//! - `currently_processing`: the epoch the typechecker thread is committing.
//! - `invalidator`: bumped by the preprocessor to cancel the slow path.
//! - `last_committed`: the last epoch whose results clients can see.
//!
//! The counters are atomics so [`was_typechecking_canceled`] can be polled
//! from workers without a lock; every *transition* happens under one mutex so
//! `start_commit_epoch` / `try_cancel_slow_path` / `try_commit_epoch`
//! linearize against each other. Callers never see the raw atomics; state
//! questions are answered with a [`TypecheckingStatus`] snapshot.
//!
//! [`was_typechecking_canceled`]: TypecheckEpochManager::was_typechecking_canceled

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::ThreadId;

/// Snapshot of the three counters, computed under the epoch mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypecheckingStatus {
    pub slow_path_running: bool,
    pub slow_path_was_canceled: bool,
    pub epoch: u32,
}

#[derive(Debug, Default)]
pub struct TypecheckEpochManager {
    currently_processing: AtomicU32,
    invalidator: AtomicU32,
    last_committed: AtomicU32,
    epoch_mutex: Mutex<()>,
    /// Thread-affinity bookkeeping, enforced in debug builds only.
    typechecking_thread: Mutex<Option<ThreadId>>,
    message_processing_thread: Mutex<Option<ThreadId>>,
}

impl TypecheckEpochManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn assert_consistent_thread(slot: &Mutex<Option<ThreadId>>, method: &str) {
        if cfg!(debug_assertions) {
            let mut slot = slot.lock().unwrap();
            let current = std::thread::current().id();
            match *slot {
                None => *slot = Some(current),
                Some(expected) => {
                    debug_assert_eq!(expected, current, "{method} called from the wrong thread");
                }
            }
        }
    }

    /// Typechecker thread: begin committing `epoch`. The epoch must be fresh:
    /// neither currently processing nor already committed.
    pub fn start_commit_epoch(&self, epoch: u32) {
        Self::assert_consistent_thread(&self.typechecking_thread, "start_commit_epoch");
        let _guard = self.epoch_mutex.lock().unwrap();
        debug_assert_ne!(epoch, self.currently_processing.load(Ordering::Relaxed));
        debug_assert_ne!(epoch, self.last_committed.load(Ordering::Relaxed));
        // The new epoch is some number of fast-path edits ahead of the last
        // slow path. Epochs wrap, so no ordering assertion is possible here.
        self.currently_processing.store(epoch, Ordering::Relaxed);
        self.invalidator.store(epoch, Ordering::Relaxed);
    }

    /// Any thread, lock-free; the answer can be momentarily stale.
    pub fn was_typechecking_canceled(&self) -> bool {
        self.invalidator.load(Ordering::Relaxed) != self.currently_processing.load(Ordering::Relaxed)
    }

    fn status_locked(&self, _guard: &MutexGuard<'_, ()>) -> TypecheckingStatus {
        let processing = self.currently_processing.load(Ordering::Relaxed);
        let committed = self.last_committed.load(Ordering::Relaxed);
        let invalidator = self.invalidator.load(Ordering::Relaxed);
        TypecheckingStatus {
            slow_path_running: processing != committed,
            slow_path_was_canceled: processing != invalidator,
            epoch: processing,
        }
    }

    pub fn status(&self) -> TypecheckingStatus {
        let guard = self.epoch_mutex.lock().unwrap();
        self.status_locked(&guard)
    }

    /// Run `f` with the epoch mutex held and a coherent status snapshot.
    pub fn with_epoch_lock<R>(&self, f: impl FnOnce(TypecheckingStatus) -> R) -> R {
        let guard = self.epoch_mutex.lock().unwrap();
        let status = self.status_locked(&guard);
        f(status)
    }

    /// Preprocessor thread: cancel a running slow path by invalidating its
    /// epoch. Returns false when no slow path is in flight.
    pub fn try_cancel_slow_path(&self, new_epoch: u32) -> bool {
        Self::assert_consistent_thread(&self.message_processing_thread, "try_cancel_slow_path");
        let _guard = self.epoch_mutex.lock().unwrap();
        let processing = self.currently_processing.load(Ordering::Relaxed);
        // Canceling with the epoch being processed would make the
        // cancellation invisible.
        debug_assert_ne!(new_epoch, processing);
        let committed = self.last_committed.load(Ordering::Relaxed);
        if processing == committed || new_epoch == processing {
            return false;
        }
        self.invalidator.store(new_epoch, Ordering::Relaxed);
        tracing::debug!(target: "lsp.typecheck", canceled = processing, by = new_epoch, "slow path canceled");
        true
    }

    /// Typechecker thread: run `typecheck` and commit `epoch` unless it was
    /// canceled mid-run. Non-cancelable runs always commit.
    ///
    /// `typecheck` runs *without* the mutex held, so the preprocessor can
    /// call [`try_cancel_slow_path`] concurrently. On cancellation both the
    /// processing and invalidator counters roll back to `last_committed`.
    ///
    /// [`try_cancel_slow_path`]: Self::try_cancel_slow_path
    pub fn try_commit_epoch(
        &self,
        epoch: u32,
        cancelable: bool,
        typecheck: impl FnOnce(),
    ) -> bool {
        Self::assert_consistent_thread(&self.typechecking_thread, "try_commit_epoch");
        if !cancelable {
            typecheck();
            return true;
        }
        debug_assert_eq!(
            self.currently_processing.load(Ordering::Relaxed),
            epoch,
            "start_commit_epoch must precede try_commit_epoch"
        );
        typecheck();

        let _guard = self.epoch_mutex.lock().unwrap();
        let processing = self.currently_processing.load(Ordering::Relaxed);
        let invalidator = self.invalidator.load(Ordering::Relaxed);
        if processing == invalidator {
            debug_assert_ne!(
                self.last_committed.load(Ordering::Relaxed),
                processing,
                "committing an already-committed epoch"
            );
            self.last_committed.store(processing, Ordering::Relaxed);
            true
        } else {
            let last = self.last_committed.load(Ordering::Relaxed);
            self.currently_processing.store(last, Ordering::Relaxed);
            self.invalidator.store(last, Ordering::Relaxed);
            false
        }
    }

    pub fn last_committed_epoch(&self) -> u32 {
        self.last_committed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_without_cancel_promotes_epoch() {
        let manager = TypecheckEpochManager::new();
        manager.start_commit_epoch(10);
        let ran = std::cell::Cell::new(false);
        let committed = manager.try_commit_epoch(10, true, || ran.set(true));
        assert!(ran.get());
        assert!(committed);
        assert_eq!(manager.last_committed_epoch(), 10);
        assert!(!manager.was_typechecking_canceled());
    }

    #[test]
    fn non_cancelable_always_commits() {
        let manager = TypecheckEpochManager::new();
        assert!(manager.try_commit_epoch(42, false, || {}));
    }

    #[test]
    fn cancel_requires_running_slow_path() {
        let manager = TypecheckEpochManager::new();
        // Nothing processing: cancellation has nothing to hit. The check runs
        // on a second thread because the manager records per-role affinity.
        let res = std::thread::scope(|s| {
            s.spawn(|| manager.try_cancel_slow_path(5)).join().unwrap()
        });
        assert!(!res);
    }

    #[test]
    fn status_reflects_running_and_canceled() {
        let manager = TypecheckEpochManager::new();
        manager.start_commit_epoch(7);
        let status = manager.status();
        assert!(status.slow_path_running);
        assert!(!status.slow_path_was_canceled);
        assert_eq!(status.epoch, 7);

        std::thread::scope(|s| {
            s.spawn(|| assert!(manager.try_cancel_slow_path(8))).join().unwrap();
        });
        let status = manager.status();
        assert!(status.slow_path_was_canceled);
        assert!(manager.was_typechecking_canceled());
    }
}
