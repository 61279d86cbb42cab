//! Diagnostics publishing with epoch gating.
//!
//! Per file we track the last epoch whose diagnostics the client saw and
//! whether that push contained errors. A new push happens only when the
//! file's epoch is current and there is something to say: either new errors,
//! or a now-clean file whose previous push had errors (so the client clears
//! them). Cancelable runs stage their statuses in an uncommitted table that
//! merges into the committed one only when the epoch commits.

use crate::messages::{Diagnostic, Position, PublishDiagnosticsParams, Range};
use crate::output::LSPOutput;
use core_errors::Error;
use core_loc::{FileRef, Loc};
use core_state::GlobalState;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorStatus {
    pub last_reported_epoch: u32,
    pub has_errors: bool,
}

pub struct ErrorReporter {
    output: Arc<LSPOutput>,
    /// Indexed by file id; grows as files appear.
    committed: Vec<ErrorStatus>,
    uncommitted: ahash::AHashMap<FileRef, ErrorStatus>,
}

impl ErrorReporter {
    pub fn new(output: Arc<LSPOutput>) -> Self {
        ErrorReporter {
            output,
            committed: Vec::new(),
            uncommitted: ahash::AHashMap::new(),
        }
    }

    fn status(&self, file: FileRef) -> ErrorStatus {
        if let Some(status) = self.uncommitted.get(&file) {
            return *status;
        }
        self.committed
            .get(file.id() as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Promote every staged status; called when the epoch commits.
    pub fn commit(&mut self) {
        for (file, status) in self.uncommitted.drain() {
            let index = file.id() as usize;
            if index >= self.committed.len() {
                self.committed.resize(index + 1, ErrorStatus::default());
            }
            self.committed[index] = status;
        }
    }

    /// Throw away staged statuses; returns the files whose diagnostics were
    /// already pushed for the canceled epoch and must be re-reported.
    pub fn abort(&mut self) -> Vec<FileRef> {
        self.uncommitted.drain().map(|(file, _)| file).collect()
    }

    /// Push one file's diagnostics for `epoch`, honoring the gating rules.
    pub fn push_diagnostics(&mut self, epoch: u32, file: FileRef, errors: &[Error], gs: &GlobalState) {
        debug_assert!(file.exists());
        if gs.files.file(file).epoch > epoch {
            return;
        }
        let status = self.status(file);
        if status.last_reported_epoch > epoch {
            return;
        }
        if errors.is_empty() && !status.has_errors {
            return;
        }
        self.uncommitted.insert(
            file,
            ErrorStatus {
                last_reported_epoch: epoch,
                has_errors: !errors.is_empty(),
            },
        );

        let path = gs.files.file(file).path().to_owned();
        let uri = format!("file://{path}");
        tracing::debug!(target: "lsp.diagnostics", %path, epoch, count = errors.len(), "publishing");
        let diagnostics: Vec<Diagnostic> = errors
            .iter()
            .filter(|error| !error.is_silenced)
            .filter_map(|error| {
                Some(Diagnostic {
                    range: loc_to_range(error.loc, gs)?,
                    severity: 1,
                    code: error.what.code,
                    message: error.header.clone(),
                })
            })
            .collect();
        self.output.write_notification(
            "textDocument/publishDiagnostics",
            serde_json::to_value(PublishDiagnosticsParams { uri, diagnostics }).unwrap(),
        );
    }
}

pub fn loc_to_range(loc: Loc, gs: &GlobalState) -> Option<Range> {
    if !loc.exists() {
        return None;
    }
    let file = gs.files.file(loc.file());
    let begin = file.position(loc.begin());
    let end = file.position(loc.end());
    Some(Range {
        start: Position {
            line: begin.line,
            character: begin.column,
        },
        end: Position {
            line: end.line,
            character: end.column,
        },
    })
}
