//! The per-build global state and the server-mode coordination primitives.
//!
//! [`GlobalState`] owns the file, name, and symbol tables plus the handle to
//! the error queue and the active LSP query. During indexing it is mutated by
//! one thread (or externally synchronized); before inference the tables are
//! frozen and the state can be shared read-only across the worker pool.

pub mod epochs;
pub mod preemption;
pub mod workers;

pub use epochs::{TypecheckEpochManager, TypecheckingStatus};
pub use preemption::{PreemptionTaskManager, Task};
pub use workers::WorkerPool;

use core_errors::{Error, ErrorClass, ErrorQueue};
use core_loc::{FileRef, FileTable, StrictLevel};
use core_names::{NameTable, SymbolTable};
use core_query::{Query, QueryResponse};
use std::sync::Arc;

pub struct GlobalState {
    pub files: FileTable,
    pub names: NameTable,
    pub symbols: SymbolTable,
    /// Shared handle: workers clone it, preemption swaps it.
    pub error_queue: Arc<ErrorQueue>,
    /// The active LSP query, or `Query::Empty` outside query runs.
    pub lsp_query: Query,
    /// Present in server mode only; batch runs never cancel.
    pub epoch_manager: Option<Arc<TypecheckEpochManager>>,
    /// The epoch this state was built for. Zero in batch mode.
    pub epoch: u32,
}

impl GlobalState {
    pub fn new(error_queue: Arc<ErrorQueue>) -> Self {
        GlobalState {
            files: FileTable::new(),
            names: NameTable::new(),
            symbols: SymbolTable::new(),
            error_queue,
            lsp_query: Query::Empty,
            epoch_manager: None,
            epoch: 0,
        }
    }

    pub fn enter_file(&mut self, path: &str, source: String) -> FileRef {
        let epoch = self.epoch;
        self.files.enter_file(path, source, epoch)
    }

    /// Freeze both tables; idempotent. Afterwards the state may be shared
    /// immutably across threads without locks.
    pub fn freeze_tables(&mut self) {
        self.names.freeze();
        self.symbols.freeze();
    }

    pub fn tables_frozen(&self) -> bool {
        self.names.is_frozen() && self.symbols.is_frozen()
    }

    /// Whether `what` should be reported for `file` given its strict level.
    pub fn should_report(&self, what: ErrorClass, file: FileRef) -> bool {
        if !file.exists() {
            return true;
        }
        self.files.file(file).strict() >= what.min_level
    }

    /// Report an error, applying the silencing policy. Silenced errors still
    /// reach the queue so the would-be-error counters stay accurate.
    pub fn report_error(&self, mut error: Error) {
        if !error.is_critical && !self.should_report(error.what, error.loc.file()) {
            error.is_silenced = true;
        }
        self.error_queue.push_error(error, &self.files);
    }

    pub fn push_query_response(&self, response: QueryResponse) {
        self.error_queue.push_query_response(response);
    }

    /// Cheap cancellation probe for workers; false outside server mode.
    pub fn was_typechecking_canceled(&self) -> bool {
        self.epoch_manager
            .as_ref()
            .is_some_and(|m| m.was_typechecking_canceled())
    }
}

impl std::fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalState")
            .field("files", &self.files.len())
            .field("names", &self.names.len())
            .field("symbols", &self.symbols.len())
            .field("epoch", &self.epoch)
            .field("frozen", &self.tables_frozen())
            .finish()
    }
}
