//! Emission ends here: flushers turn drained queue batches into output.
//!
//! The stdout flusher is the batch-mode product surface; the collector keeps
//! errors for tests and for the batch driver's exit-code decision; the null
//! flusher drops everything (typechecks run purely for their side tables);
//! the query collector retains responses and applies the response ordering.

use crate::autocorrect::{self, AutocorrectSuggestion};
use crate::errors::Error;
use crate::queue::{ErrorQueueMessage, sort_query_responses};
use core_loc::{FileRef, FileTable};
use core_query::QueryResponse;
use std::io::Write;

pub trait ErrorFlusher: Send {
    fn flush_errors(&mut self, files: &FileTable, messages: Vec<ErrorQueueMessage>);

    /// The trailing summary line in batch mode.
    fn flush_error_count(&mut self, _count: usize) {}
}

/// Renders to a writer (stdout in production), critical errors first.
pub struct StdoutFlusher {
    out: Box<dyn Write + Send>,
    printed_at_least_one: bool,
    autocorrects: Vec<AutocorrectSuggestion>,
}

impl Default for StdoutFlusher {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl StdoutFlusher {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        StdoutFlusher {
            out,
            printed_at_least_one: false,
            autocorrects: Vec::new(),
        }
    }

    /// Autocorrects harvested from every flushed error so far, consumed by
    /// the batch driver after the final flush.
    pub fn take_autocorrects(&mut self) -> Vec<AutocorrectSuggestion> {
        std::mem::take(&mut self.autocorrects)
    }

    /// Apply harvested autocorrects against the file table, returning new
    /// contents per file.
    pub fn apply_autocorrects(&mut self, files: &FileTable) -> ahash::AHashMap<FileRef, String> {
        let autocorrects = self.take_autocorrects();
        autocorrect::apply(files, &autocorrects)
    }

    fn print_block(&mut self, block: &str) {
        if block.is_empty() {
            return;
        }
        if self.printed_at_least_one {
            let _ = writeln!(self.out);
        }
        let _ = writeln!(self.out, "{block}");
        self.printed_at_least_one = true;
    }
}

impl ErrorFlusher for StdoutFlusher {
    fn flush_errors(&mut self, _files: &FileTable, messages: Vec<ErrorQueueMessage>) {
        let mut critical = String::new();
        let mut non_critical = String::new();
        for message in messages {
            let ErrorQueueMessage::Error { text, error, .. } = message else {
                continue;
            };
            if error.is_silenced {
                continue;
            }
            let out = if error.is_critical { &mut critical } else { &mut non_critical };
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&text);
            self.autocorrects.extend(error.autocorrects);
        }
        self.print_block(&critical);
        self.print_block(&non_critical);
        let _ = self.out.flush();
    }

    fn flush_error_count(&mut self, count: usize) {
        if count == 0 {
            let _ = writeln!(self.out, "No errors! Great job.");
        } else {
            let _ = writeln!(self.out, "Errors: {count}");
        }
        let _ = self.out.flush();
    }
}

/// Retains flushed errors in arrival order. Used by tests and by server-side
/// paths that postprocess errors instead of printing them.
#[derive(Default)]
pub struct CollectorFlusher {
    errors: Vec<Error>,
}

impl CollectorFlusher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl ErrorFlusher for CollectorFlusher {
    fn flush_errors(&mut self, _files: &FileTable, messages: Vec<ErrorQueueMessage>) {
        for message in messages {
            if let ErrorQueueMessage::Error { error, .. } = message {
                self.errors.push(*error);
            }
        }
    }
}

/// Swallows everything.
#[derive(Default)]
pub struct NullFlusher;

impl ErrorFlusher for NullFlusher {
    fn flush_errors(&mut self, _files: &FileTable, _messages: Vec<ErrorQueueMessage>) {}
}

/// Retains query responses and errors separately; responses come back in the
/// most-precise-first order the LSP layer expects.
#[derive(Default)]
pub struct QueryCollector {
    responses: Vec<QueryResponse>,
    errors: Vec<Error>,
}

impl QueryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_query_responses(&mut self) -> Vec<QueryResponse> {
        let mut out = std::mem::take(&mut self.responses);
        sort_query_responses(&mut out);
        out
    }

    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }
}

impl ErrorFlusher for QueryCollector {
    fn flush_errors(&mut self, _files: &FileTable, messages: Vec<ErrorQueueMessage>) {
        for message in messages {
            match message {
                ErrorQueueMessage::QueryResponse(resp) => self.responses.push(*resp),
                ErrorQueueMessage::Error { error, .. } => self.errors.push(*error),
                ErrorQueueMessage::Flush(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use crate::queue::ErrorQueue;
    use core_loc::{Loc, LocOffsets, StrictLevel};
    use core_names::Ty;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn fixture() -> (FileTable, FileRef) {
        let mut files = FileTable::new();
        let fref = files.enter_file("a.rb", "xyzw\n".to_owned(), 0);
        (files, fref)
    }

    #[test]
    fn critical_errors_print_before_others() {
        let (files, fref) = fixture();
        let queue = ErrorQueue::new();
        queue.push_error(
            Error::new(
                Loc::new(fref, LocOffsets::new(0, 1)),
                ErrorClass::new(7003, StrictLevel::True),
                "ordinary",
            ),
            &files,
        );
        queue.push_error(
            Error::critical(Loc::new(fref, LocOffsets::new(1, 2)), "invariant violated"),
            &files,
        );

        let buf = SharedBuf::default();
        let mut flusher = StdoutFlusher::new(Box::new(buf.clone()));
        queue.flush_errors(&mut flusher, &files, true);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let critical_pos = text.find("invariant violated").unwrap();
        let ordinary_pos = text.find("ordinary").unwrap();
        assert!(critical_pos < ordinary_pos);
    }

    #[test]
    fn silenced_errors_are_not_rendered() {
        let (files, fref) = fixture();
        let queue = ErrorQueue::new();
        queue.push_error(
            Error::new(
                Loc::new(fref, LocOffsets::new(0, 1)),
                ErrorClass::new(7003, StrictLevel::True),
                "should not appear",
            )
            .silenced(),
            &files,
        );
        let buf = SharedBuf::default();
        let mut flusher = StdoutFlusher::new(Box::new(buf.clone()));
        queue.flush_errors(&mut flusher, &files, true);
        assert!(buf.0.lock().unwrap().is_empty());
    }

    #[test]
    fn query_collector_orders_by_precision() {
        let (_, fref) = fixture();
        let wide = QueryResponse::Send {
            loc: Loc::new(fref, LocOffsets::new(0, 4)),
            receiver: Ty::Untyped,
            fun: core_names::well_known::STAT_TEMP,
            method: core_names::SymbolRef::default(),
            ret: Ty::Untyped,
        };
        let narrow = QueryResponse::Literal {
            loc: Loc::new(fref, LocOffsets::new(1, 2)),
            ty: Ty::Untyped,
        };
        let mut collector = QueryCollector::new();
        collector.responses.push(wide.clone());
        collector.responses.push(narrow.clone());
        let drained = collector.drain_query_responses();
        assert_eq!(drained[0], narrow);
        assert_eq!(drained[1], wide);
    }

    #[test]
    fn specificity_breaks_exact_loc_ties() {
        let (_, fref) = fixture();
        let loc = Loc::new(fref, LocOffsets::new(0, 2));
        let literal = QueryResponse::Literal { loc, ty: Ty::Untyped };
        let edit = QueryResponse::Edit {
            loc,
            title: "insert".to_owned(),
            edits: vec![],
        };
        let mut collector = QueryCollector::new();
        collector.responses.push(literal);
        collector.responses.push(edit.clone());
        let drained = collector.drain_query_responses();
        assert_eq!(drained[0], edit, "Edit outranks Literal at the same loc");
    }
}
