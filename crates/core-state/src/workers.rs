//! The fixed-size worker pool for data-parallel pipeline stages.
//!
//! Threads are spawned once and live until the pool drops. Stages hand the
//! pool a closure; every worker runs it once against a fresh per-worker
//! [`CounterState`], and the pool merges the deltas into one state returned
//! to the caller. Work distribution *within* a stage happens through
//! whatever shared queue the closure captures (typically a crossbeam channel
//! of file refs), not through the pool itself.
//!
//! A pool of size zero degrades to running stages inline on the caller,
//! which keeps single-threaded batch runs and unit tests deterministic.

use core_errors::CounterState;
use std::sync::Arc;

type Job = Box<dyn FnOnce(&mut CounterState) + Send>;

pub struct WorkerPool {
    senders: Vec<crossbeam_channel::Sender<Job>>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let (tx, rx) = crossbeam_channel::unbounded::<Job>();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    // Disconnect is the shutdown signal.
                    while let Ok(job) = rx.recv() {
                        let mut counters = CounterState::new();
                        job(&mut counters);
                    }
                })
                .expect("spawning worker thread");
            senders.push(tx);
            handles.push(handle);
        }
        tracing::debug!(target: "workers", size, "worker pool ready");
        WorkerPool { senders, handles }
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Run `f` once on every worker (or inline when the pool is empty),
    /// block until all invocations finish, and return the merged counters.
    pub fn multiplex<F>(&self, name: &'static str, f: F) -> CounterState
    where
        F: Fn(usize, &mut CounterState) + Send + Sync + 'static,
    {
        let mut merged = CounterState::new();
        if self.senders.is_empty() {
            f(0, &mut merged);
            return merged;
        }
        let f = Arc::new(f);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<CounterState>(self.senders.len());
        for (i, sender) in self.senders.iter().enumerate() {
            let f = f.clone();
            let done_tx = done_tx.clone();
            let job: Job = Box::new(move |counters| {
                tracing::trace!(target: "workers", worker = i, stage = name, "stage start");
                f(i, counters);
                let _ = done_tx.send(std::mem::take(counters));
            });
            sender.send(job).expect("worker pool hung up");
        }
        drop(done_tx);
        while let Ok(counters) = done_rx.recv() {
            merged.merge(counters);
        }
        merged
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_worker_runs_the_stage_once() {
        let pool = WorkerPool::new(4);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        pool.multiplex("count", move |_, _| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn counters_merge_across_workers() {
        let pool = WorkerPool::new(3);
        let merged = pool.multiplex("count", |_, counters| {
            counters.add("stage.items", 2);
        });
        assert_eq!(merged.counter("stage.items"), 6);
    }

    #[test]
    fn empty_pool_runs_inline() {
        let pool = WorkerPool::new(0);
        let merged = pool.multiplex("inline", |worker, counters| {
            assert_eq!(worker, 0);
            counters.inc("ran");
        });
        assert_eq!(merged.counter("ran"), 1);
    }

    #[test]
    fn work_queue_drains_across_workers() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = crossbeam_channel::unbounded::<u32>();
        for i in 0..100 {
            tx.send(i).unwrap();
        }
        drop(tx);
        let merged = pool.multiplex("drain", move |_, counters| {
            while let Ok(item) = rx.try_recv() {
                counters.add("sum", item as u64);
            }
        });
        assert_eq!(merged.counter("sum"), (0..100u64).sum());
    }
}
