//! Preemption: running a short task on the typechecker thread while a slow
//! path is parked.
//!
//! Workers hold the typecheck lock in *reader* mode while they churn through
//! files and release it periodically; the scheduled task runs under the
//! *writer* mode acquisition, so it observes a quiesced pool. At most one
//! task can be scheduled at a time, a canceled slow path cannot be
//! preempted, and cancellation cannot land while the task runs (both
//! transitions take the epoch lock).

use crate::GlobalState;
use crate::epochs::TypecheckEpochManager;
use core_errors::ErrorQueue;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

/// A unit of work the preprocessor hands to the typechecker thread.
pub trait Task: Send + Sync {
    fn run(&self, gs: &mut GlobalState);
}

pub struct PreemptionTaskManager {
    epoch_manager: Arc<TypecheckEpochManager>,
    /// The single scheduled-task slot.
    preempt_task: Mutex<Option<Arc<dyn Task>>>,
    /// Readers: slow-path workers. Writer: the preemption runner.
    typecheck_lock: RwLock<()>,
}

impl PreemptionTaskManager {
    pub fn new(epoch_manager: Arc<TypecheckEpochManager>) -> Self {
        PreemptionTaskManager {
            epoch_manager,
            preempt_task: Mutex::new(None),
            typecheck_lock: RwLock::new(()),
        }
    }

    /// Preprocessor thread. Succeeds only while a live (not canceled) slow
    /// path is running and no other task is already scheduled.
    pub fn try_schedule_preemption_task(&self, task: Arc<dyn Task>) -> bool {
        self.epoch_manager.with_epoch_lock(|status| {
            let mut slot = self.preempt_task.lock().unwrap();
            // The scheduled task blocks the scheduling thread, so a second
            // schedule while one is pending should be impossible.
            debug_assert!(slot.is_none(), "two preemption tasks scheduled at once");
            if !status.slow_path_running || status.slow_path_was_canceled || slot.is_some() {
                return false;
            }
            *slot = Some(task);
            tracing::debug!(target: "lsp.typecheck", epoch = status.epoch, "preemption task scheduled");
            true
        })
    }

    /// Unschedule `task` if it has not started running. Pointer identity
    /// decides: a different scheduled task is left alone.
    pub fn try_cancel_scheduled_preemption_task(&self, task: &Arc<dyn Task>) -> bool {
        let mut slot = self.preempt_task.lock().unwrap();
        match &*slot {
            Some(scheduled) if Arc::ptr_eq(scheduled, task) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Typechecker thread (or its pool): run the scheduled task, if any,
    /// with the pool quiesced and a fresh error queue swapped in so the
    /// task's diagnostics cannot interleave with the slow path's.
    pub fn try_run_scheduled_preemption_task(&self, gs: &mut GlobalState) -> bool {
        let task = self.preempt_task.lock().unwrap().clone();
        let Some(task) = task else {
            return false;
        };
        // All workers park before we proceed.
        let _write_guard = self.typecheck_lock.write().unwrap();
        debug_assert!(
            !self.epoch_manager.was_typechecking_canceled(),
            "typechecking canceled before a preemption task"
        );
        let previous_queue = std::mem::replace(&mut gs.error_queue, Arc::new(ErrorQueue::new()));
        gs.error_queue.ignore_flushes.store(true, Ordering::Relaxed);
        // Clear the slot before running: the task unblocks the preprocessor,
        // which may immediately schedule a new one.
        *self.preempt_task.lock().unwrap() = None;
        tracing::debug!(target: "lsp.typecheck", "beginning preemption task");
        task.run(gs);
        tracing::debug!(target: "lsp.typecheck", "preemption task complete");
        gs.error_queue = previous_queue;
        debug_assert!(
            !self.epoch_manager.was_typechecking_canceled(),
            "typechecking canceled during a preemption task"
        );
        true
    }

    /// Worker-side reader acquisition. Release and re-acquire this at safe
    /// points so a scheduled preemption's writer acquisition can proceed.
    pub fn lock_preemption(&self) -> RwLockReadGuard<'_, ()> {
        self.typecheck_lock.read().unwrap()
    }

    pub fn has_scheduled_task(&self) -> bool {
        self.preempt_task.lock().unwrap().is_some()
    }
}
