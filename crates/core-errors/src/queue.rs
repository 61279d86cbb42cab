//! The multi-producer, single-consumer error queue.
//!
//! Producers (worker threads) push errors, query responses, and per-file
//! flush barriers. The single consumer, fixed at construction time, drains
//! the transport channel into per-file buckets and releases a bucket when its
//! barrier message arrives. A message enqueued before its file's barrier on
//! the same thread is guaranteed to be part of the batch that barrier
//! releases; the channel preserves per-producer order.
//!
//! Dropping the queue drops the channel, which unblocks any consumer still
//! waiting: the disconnect acts as the shutdown sentinel.

use crate::errors::Error;
use crate::flushers::ErrorFlusher;
use core_loc::{FileRef, FileTable};
use core_query::QueryResponse;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::ThreadId;

#[derive(Debug)]
pub enum ErrorQueueMessage {
    Error {
        file: FileRef,
        /// Rendered at push time: the producing thread holds the context.
        text: String,
        error: Box<Error>,
    },
    Flush(FileRef),
    QueryResponse(Box<QueryResponse>),
}

impl ErrorQueueMessage {
    fn file(&self) -> FileRef {
        match self {
            ErrorQueueMessage::Error { file, .. } => *file,
            ErrorQueueMessage::Flush(file) => *file,
            // Query responses ride in the file-less bucket and are released
            // by any barrier.
            ErrorQueueMessage::QueryResponse(_) => FileRef::default(),
        }
    }
}

#[derive(Debug)]
pub struct ErrorQueue {
    sender: crossbeam_channel::Sender<ErrorQueueMessage>,
    receiver: crossbeam_channel::Receiver<ErrorQueueMessage>,
    /// Only this thread may drain or flush.
    owner: ThreadId,
    /// Buckets keyed by file, filled by drains, emptied by barriers.
    collected: Mutex<ahash::AHashMap<FileRef, Vec<ErrorQueueMessage>>>,
    non_silenced_errors: AtomicUsize,
    silenced_errors: AtomicUsize,
    /// While set, `flush_*` calls are no-ops (used during preemption so a
    /// nested task cannot emit into the middle of a slow path's output).
    pub ignore_flushes: AtomicBool,
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorQueue {
    /// The constructing thread becomes the owner/consumer.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        ErrorQueue {
            sender,
            receiver,
            owner: std::thread::current().id(),
            collected: Mutex::new(ahash::AHashMap::new()),
            non_silenced_errors: AtomicUsize::new(0),
            silenced_errors: AtomicUsize::new(0),
            ignore_flushes: AtomicBool::new(false),
        }
    }

    fn check_owned(&self) {
        assert_eq!(
            std::thread::current().id(),
            self.owner,
            "error queue drained from a non-owner thread"
        );
    }

    /// Any thread. Silenced errors count toward the silenced histogram but
    /// will not render.
    pub fn push_error(&self, error: Error, files: &FileTable) {
        if error.is_silenced {
            self.silenced_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.non_silenced_errors.fetch_add(1, Ordering::Relaxed);
        }
        let msg = ErrorQueueMessage::Error {
            file: error.loc.file(),
            text: error.render(files),
            error: Box::new(error),
        };
        // Send fails only when the consumer is gone during shutdown.
        let _ = self.sender.send(msg);
    }

    /// Any thread.
    pub fn push_query_response(&self, response: QueryResponse) {
        let _ = self.sender.send(ErrorQueueMessage::QueryResponse(Box::new(response)));
    }

    /// Any thread. Emits the barrier releasing `file`'s bucket (and the
    /// file-less bucket) at the next drain.
    pub fn mark_file_for_flushing(&self, file: FileRef) {
        let _ = self.sender.send(ErrorQueueMessage::Flush(file));
    }

    pub fn non_silenced_error_count(&self) -> usize {
        self.non_silenced_errors.load(Ordering::Relaxed)
    }

    pub fn silenced_error_count(&self) -> usize {
        self.silenced_errors.load(Ordering::Relaxed)
    }

    /// Consumer only: everything whose barrier has been observed, in enqueue
    /// order per file.
    pub fn drain_flushed(&self) -> Vec<ErrorQueueMessage> {
        self.check_owned();
        let mut collected = self.collected.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            match msg {
                ErrorQueueMessage::Flush(file) => {
                    if let Some(batch) = collected.remove(&file) {
                        out.extend(batch);
                    }
                    if file.exists() {
                        if let Some(batch) = collected.remove(&FileRef::default()) {
                            out.extend(batch);
                        }
                    }
                }
                other => collected.entry(other.file()).or_default().push(other),
            }
        }
        out
    }

    /// Consumer only: everything, flushed or not. Unflushed buckets drain in
    /// file-id order so batch output is deterministic.
    pub fn drain_all(&self) -> Vec<ErrorQueueMessage> {
        let mut out = self.drain_flushed();
        let mut collected = self.collected.lock().unwrap();
        let mut rest: Vec<(FileRef, Vec<ErrorQueueMessage>)> = collected.drain().collect();
        rest.sort_by_key(|(file, _)| *file);
        for (_, batch) in rest {
            out.extend(batch);
        }
        out
    }

    /// Consumer only: drain and hand off to the flusher, unless flushes are
    /// suppressed.
    pub fn flush_errors(&self, flusher: &mut dyn ErrorFlusher, files: &FileTable, all: bool) {
        self.check_owned();
        if self.ignore_flushes.load(Ordering::Relaxed) {
            return;
        }
        let messages = if all { self.drain_all() } else { self.drain_flushed() };
        flusher.flush_errors(files, messages);
    }

    /// Consumer only: pull every query response out of the queue, ordered
    /// most-precise-first (shortest loc, then position, then specificity).
    pub fn drain_query_responses(&self) -> Vec<QueryResponse> {
        let mut out: Vec<QueryResponse> = self
            .drain_all()
            .into_iter()
            .filter_map(|msg| match msg {
                ErrorQueueMessage::QueryResponse(resp) => Some(*resp),
                _ => None,
            })
            .collect();
        sort_query_responses(&mut out);
        out
    }
}

/// Most precise information first. Construction usually produces this order
/// already, but threading can reorder messages in flight; the sort is stable
/// so equal keys keep their arrival order.
pub fn sort_query_responses(responses: &mut [QueryResponse]) {
    responses.sort_by(|left, right| {
        let ll = left.term_loc();
        let rl = right.term_loc();
        (ll.len())
            .cmp(&rl.len())
            .then(ll.begin().cmp(&rl.begin()))
            .then(ll.end().cmp(&rl.end()))
            .then(right.specificity().cmp(&left.specificity()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use core_loc::{Loc, LocOffsets, StrictLevel};

    fn fixture() -> (FileTable, FileRef, FileRef) {
        let mut files = FileTable::new();
        let a = files.enter_file("a.rb", "aaaa\n".to_owned(), 0);
        let b = files.enter_file("b.rb", "bbbb\n".to_owned(), 0);
        (files, a, b)
    }

    fn error_at(file: FileRef, begin: u32, header: &str) -> Error {
        Error::new(
            Loc::new(file, LocOffsets::new(begin, begin + 1)),
            ErrorClass::new(7003, StrictLevel::True),
            header,
        )
    }

    #[test]
    fn drain_on_empty_queue_returns_nothing() {
        let queue = ErrorQueue::new();
        assert!(queue.drain_flushed().is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn barrier_releases_only_that_file() {
        let (files, a, b) = fixture();
        let queue = ErrorQueue::new();
        queue.push_error(error_at(a, 0, "first in a"), &files);
        queue.push_error(error_at(b, 0, "first in b"), &files);
        queue.mark_file_for_flushing(a);

        let flushed = queue.drain_flushed();
        assert_eq!(flushed.len(), 1);
        assert!(matches!(&flushed[0], ErrorQueueMessage::Error { file, .. } if *file == a));

        // The other file's message is still pending and comes out of drain_all.
        let rest = queue.drain_all();
        assert_eq!(rest.len(), 1);
        assert!(matches!(&rest[0], ErrorQueueMessage::Error { file, .. } if *file == b));
    }

    #[test]
    fn same_thread_order_is_preserved_within_a_file() {
        let (files, a, _) = fixture();
        let queue = ErrorQueue::new();
        queue.push_error(error_at(a, 0, "one"), &files);
        queue.push_error(error_at(a, 1, "two"), &files);
        queue.mark_file_for_flushing(a);
        let flushed = queue.drain_flushed();
        let headers: Vec<&str> = flushed
            .iter()
            .map(|m| match m {
                ErrorQueueMessage::Error { error, .. } => error.header.as_str(),
                _ => panic!("unexpected message"),
            })
            .collect();
        assert_eq!(headers, vec!["one", "two"]);
    }

    #[test]
    fn two_drains_equal_one_drain_over_the_union() {
        let (files, a, b) = fixture();
        let queue = ErrorQueue::new();
        queue.push_error(error_at(a, 0, "a0"), &files);
        let mut first = queue.drain_all();
        queue.push_error(error_at(b, 0, "b0"), &files);
        first.extend(queue.drain_all());
        assert_eq!(first.len(), 2);
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn silenced_errors_count_but_do_not_lose_nonsilenced() {
        let (files, a, _) = fixture();
        let queue = ErrorQueue::new();
        queue.push_error(error_at(a, 0, "visible"), &files);
        queue.push_error(error_at(a, 1, "hidden").silenced(), &files);
        assert_eq!(queue.non_silenced_error_count(), 1);
        assert_eq!(queue.silenced_error_count(), 1);
    }

    #[test]
    fn query_responses_ride_the_fileless_bucket() {
        let (files, a, _) = fixture();
        let queue = ErrorQueue::new();
        queue.push_query_response(QueryResponse::Literal {
            loc: Loc::new(a, LocOffsets::new(0, 2)),
            ty: core_names::Ty::Untyped,
        });
        // Released by any file's barrier.
        queue.mark_file_for_flushing(a);
        let flushed = queue.drain_flushed();
        assert_eq!(flushed.len(), 1);
        assert!(matches!(flushed[0], ErrorQueueMessage::QueryResponse(_)));
    }

    #[test]
    fn producers_on_other_threads_are_seen() {
        let (files, a, _) = fixture();
        let queue = std::sync::Arc::new(ErrorQueue::new());
        let files = std::sync::Arc::new(files);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let queue = queue.clone();
                let files = files.clone();
                std::thread::spawn(move || {
                    queue.push_error(error_at(a, i, "worker error"), &files);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.drain_all().len(), 4);
    }
}
