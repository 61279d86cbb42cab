//! End-to-end scenarios for the cancellation and preemption contracts, with
//! the preprocessor and typechecker roles on real threads.

use core_errors::ErrorQueue;
use core_state::{GlobalState, PreemptionTaskManager, Task, TypecheckEpochManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

#[test]
fn canceled_slow_path_rolls_back_and_does_not_commit() {
    let manager = Arc::new(TypecheckEpochManager::new());
    let prior_committed = manager.last_committed_epoch();

    manager.start_commit_epoch(10);

    // Preprocessor cancels from its own thread mid-typecheck.
    let cancel_manager = manager.clone();
    let committed = manager.try_commit_epoch(10, true, || {
        let handle = std::thread::spawn(move || cancel_manager.try_cancel_slow_path(11));
        assert!(handle.join().unwrap(), "cancel must land while the slow path runs");
    });

    assert!(!committed);
    assert_eq!(manager.last_committed_epoch(), prior_committed);
    // Rollback restores the idle state: nothing processing, nothing canceled.
    let status = manager.status();
    assert!(!status.slow_path_running);
    assert!(!status.slow_path_was_canceled);
}

#[test]
fn commit_succeeds_when_no_cancel_arrives() {
    let manager = Arc::new(TypecheckEpochManager::new());
    manager.start_commit_epoch(10);
    assert!(manager.try_commit_epoch(10, true, || {}));
    assert_eq!(manager.last_committed_epoch(), 10);
    assert!(!manager.was_typechecking_canceled());

    // A fresh cancel now fails: nothing is running.
    let m = manager.clone();
    let canceled = std::thread::spawn(move || m.try_cancel_slow_path(11)).join().unwrap();
    assert!(!canceled);
}

struct FlagTask {
    ran: AtomicBool,
    saw_fresh_queue: AtomicBool,
    original_queue: *const ErrorQueue,
}

// The raw pointer is only compared, never dereferenced.
unsafe impl Send for FlagTask {}
unsafe impl Sync for FlagTask {}

impl Task for FlagTask {
    fn run(&self, gs: &mut GlobalState) {
        self.ran.store(true, Ordering::SeqCst);
        let fresh = !std::ptr::eq(Arc::as_ptr(&gs.error_queue), self.original_queue);
        self.saw_fresh_queue.store(fresh, Ordering::SeqCst);
    }
}

#[test]
fn preemption_window_runs_task_with_fresh_queue() {
    let epochs = Arc::new(TypecheckEpochManager::new());
    let preemption = Arc::new(PreemptionTaskManager::new(epochs.clone()));
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));

    epochs.start_commit_epoch(10);

    let task = Arc::new(FlagTask {
        ran: AtomicBool::new(false),
        saw_fresh_queue: AtomicBool::new(false),
        original_queue: Arc::as_ptr(&gs.error_queue),
    });

    // Preprocessor thread schedules while the slow path holds the reader lock.
    let worker_preemption = preemption.clone();
    let sync = Arc::new(Barrier::new(2));
    let worker_sync = sync.clone();
    let scheduled = {
        let preemption = preemption.clone();
        let task: Arc<dyn Task> = task.clone();
        std::thread::spawn(move || {
            worker_sync.wait(); // until the worker holds the reader lock
            preemption.try_schedule_preemption_task(task)
        })
    };

    // Worker: hold the reader lock over a stretch of work, then release it at
    // a safe point so the writer acquisition in try_run can proceed.
    let guard = worker_preemption.lock_preemption();
    sync.wait();
    assert!(scheduled.join().unwrap(), "schedule succeeds during a live slow path");
    drop(guard);

    let original_queue = Arc::as_ptr(&gs.error_queue);
    assert!(preemption.try_run_scheduled_preemption_task(&mut gs));
    assert!(task.ran.load(Ordering::SeqCst));
    assert!(task.saw_fresh_queue.load(Ordering::SeqCst));
    assert!(std::ptr::eq(Arc::as_ptr(&gs.error_queue), original_queue));
    assert!(!epochs.was_typechecking_canceled());

    // The slow path then finishes and commits normally.
    assert!(epochs.try_commit_epoch(10, true, || {}));
    assert_eq!(epochs.last_committed_epoch(), 10);
}

#[test]
fn scheduling_fails_after_cancellation() {
    let epochs = Arc::new(TypecheckEpochManager::new());
    let preemption = Arc::new(PreemptionTaskManager::new(epochs.clone()));

    epochs.start_commit_epoch(10);
    let schedule_thread = {
        let epochs = epochs.clone();
        let preemption = preemption.clone();
        std::thread::spawn(move || {
            assert!(epochs.try_cancel_slow_path(11));
            let task: Arc<dyn Task> = Arc::new(NopTask);
            preemption.try_schedule_preemption_task(task)
        })
    };
    assert!(
        !schedule_thread.join().unwrap(),
        "a canceled slow path cannot be preempted"
    );
}

struct NopTask;

impl Task for NopTask {
    fn run(&self, _gs: &mut GlobalState) {}
}
