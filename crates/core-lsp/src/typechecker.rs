//! The typechecker coordinator: owns the committed global state, the worker
//! pool, and the diagnostics reporter; consumes tasks from the queue.
//!
//! Fast-path edits run inline on this thread and always commit. Slow-path
//! edits rebuild the whole state against the new file contents under the
//! epoch manager's cancelable-commit protocol; a canceled rebuild leaves no
//! trace (the fresh state is dropped, staged diagnostics are aborted, and
//! the canceled files fold into the next edit batch).

use crate::messages::Position;
use crate::output::LSPOutput;
use crate::reporter::{ErrorReporter, loc_to_range};
use crate::tasks::{QueryKind, Task, WorkspaceEditTask};
use crate::updates::{LSPFileUpdates, LSPIndexer};
use core_errors::{CollectorFlusher, CounterState, Error, ErrorQueue};
use core_loc::{FileRef, Loc, LocOffsets};
use core_names::Ty;
use core_query::{Query, QueryResponse};
use core_state::{GlobalState, PreemptionTaskManager, TypecheckEpochManager, WorkerPool};
use core_tree::Tree;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct LSPTypechecker {
    gs: GlobalState,
    trees: ahash::AHashMap<FileRef, Arc<Tree>>,
    /// Shared with the preprocessor, which consults it for capability
    /// queries while tasks are still queued.
    indexer: Arc<std::sync::Mutex<LSPIndexer>>,
    epoch_manager: Arc<TypecheckEpochManager>,
    preemption: Arc<PreemptionTaskManager>,
    reporter: ErrorReporter,
    output: Arc<LSPOutput>,
    workers: WorkerPool,
    counters: CounterState,
    /// Updates from a canceled slow path, waiting to fold into the next
    /// edit batch.
    pending_canceled: Option<LSPFileUpdates>,
}

impl LSPTypechecker {
    pub fn new(
        indexer: Arc<std::sync::Mutex<LSPIndexer>>,
        epoch_manager: Arc<TypecheckEpochManager>,
        preemption: Arc<PreemptionTaskManager>,
        output: Arc<LSPOutput>,
        workers: WorkerPool,
    ) -> Self {
        let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
        gs.epoch_manager = Some(epoch_manager.clone());
        LSPTypechecker {
            gs,
            trees: ahash::AHashMap::new(),
            indexer,
            epoch_manager,
            preemption,
            reporter: ErrorReporter::new(output.clone()),
            output,
            workers,
            counters: CounterState::new(),
            pending_canceled: None,
        }
    }

    pub fn counters(&self) -> &CounterState {
        &self.counters
    }

    pub fn state(&self) -> &GlobalState {
        &self.gs
    }

    /// Returns false when the task asked the server to exit.
    pub fn run_task(&mut self, task: Task) -> bool {
        match task {
            Task::Initialize { id } => {
                self.output.write_response(
                    id,
                    json!({
                        "capabilities": {
                            "textDocumentSync": 1,
                            "definitionProvider": true,
                            "hoverProvider": true,
                            "referencesProvider": true,
                            "documentHighlightProvider": true,
                        }
                    }),
                );
            }
            Task::Initialized => {}
            Task::Shutdown { id } => {
                self.output.write_response(id, Value::Null);
            }
            Task::Exit => return false,
            Task::WorkspaceEdit(edit) => self.run_edit(edit),
            Task::PositionQuery {
                id,
                kind,
                uri,
                position,
            } => self.run_query(id, kind, &uri, position),
            Task::DocumentSymbols { id, uri } => self.run_document_symbols(id, &uri),
            Task::WorkspaceSymbols { id, query } => self.run_workspace_symbols(id, &query),
        }
        true
    }

    fn symbol_json(&self, sym: core_names::SymbolRef, loc: Loc) -> Option<Value> {
        let range = loc_to_range(loc, &self.gs)?;
        let data = self.gs.symbols.symbol(sym);
        let kind = if data.is_method() {
            6 // Method
        } else if data.flags.contains(core_names::SymbolFlags::MODULE) {
            2 // Module
        } else {
            5 // Class
        };
        let path = self.gs.files.file(loc.file()).path();
        Some(json!({
            "name": self.gs.names.show(data.name),
            "kind": kind,
            "location": {"uri": format!("file://{path}"), "range": range},
        }))
    }

    fn run_document_symbols(&mut self, id: Value, path: &str) {
        let Some(fref) = self.gs.files.lookup(path) else {
            self.output.write_response(id, json!([]));
            return;
        };
        let symbols: Vec<Value> = self
            .gs
            .symbols
            .iter()
            .filter_map(|(sym, data)| {
                let loc = data.locs.iter().find(|l| l.file() == fref)?;
                self.symbol_json(sym, *loc)
            })
            .collect();
        self.counters.inc("lsp.queries");
        self.output.write_response(id, json!(symbols));
    }

    fn run_workspace_symbols(&mut self, id: Value, query: &str) {
        let needle = query.to_lowercase();
        let symbols: Vec<Value> = self
            .gs
            .symbols
            .iter()
            .filter(|(_, data)| {
                !data.locs.is_empty() && self.gs.names.show(data.name).to_lowercase().contains(&needle)
            })
            .filter_map(|(sym, data)| self.symbol_json(sym, data.loc()))
            .collect();
        self.counters.inc("lsp.queries");
        self.output.write_response(id, json!(symbols));
    }

    fn run_edit(&mut self, mut edit: WorkspaceEditTask) {
        self.counters.inc("lsp.updates");
        let mut updates = edit_into_updates(&mut edit, &mut self.indexer.lock().unwrap());
        // A canceled slow path's files ride along with the superseding edit.
        if let Some(canceled) = self.pending_canceled.take() {
            let mut files = canceled.files;
            let mut hashes = canceled.hashes;
            for (pos, (path, contents)) in updates.files.into_iter().enumerate() {
                match files.iter_mut().position(|(p, _)| *p == path) {
                    Some(existing) => {
                        files[existing].1 = contents;
                        hashes[existing] = updates.hashes[pos];
                    }
                    None => {
                        files.push((path, contents));
                        hashes.push(updates.hashes[pos]);
                    }
                }
            }
            updates.files = files;
            updates.hashes = hashes;
            updates.can_take_fast_path = false;
        }

        if updates.can_take_fast_path {
            self.run_fast_path(&updates);
            self.counters.category_add(
                "lsp.messages.processed",
                "sorbet.mergedEdits",
                (updates.edit_count - 1) as u64,
            );
        } else if self.run_slow_path(&updates) {
            self.counters.inc("typecheck.retypecheck_full");
            self.counters.category_add(
                "lsp.messages.processed",
                "sorbet.mergedEdits",
                (updates.edit_count - 1) as u64,
            );
        } else {
            tracing::debug!(target: "lsp.typecheck", epoch = updates.epoch, "slow path canceled; rescheduling");
            self.pending_canceled = Some(updates);
        }
        // A preemption may have snuck in while we were finishing up.
        self.preemption.try_run_scheduled_preemption_task(&mut self.gs);
    }

    /// Fast path: only method bodies changed. Never cancelable; reruns
    /// inference on the touched files against the committed tables.
    fn run_fast_path(&mut self, updates: &LSPFileUpdates) {
        let epoch = updates.epoch;
        tracing::debug!(target: "lsp.typecheck", epoch, files = updates.files.len(), "fast path");
        self.counters.inc("typecheck.retypecheck_fast");
        self.gs.epoch = epoch;
        let parser = self.indexer.lock().unwrap().parser();

        let mut touched: Vec<FileRef> = Vec::with_capacity(updates.files.len());
        for (path, contents) in &updates.files {
            let fref = self.gs.enter_file(path, contents.clone());
            let result = {
                let data = self.gs.files.file(fref);
                parser.parse(data.path(), data.source(), &mut self.gs.names)
            };
            self.trees.insert(fref, Arc::new(result.tree));
            touched.push(fref);
        }
        self.gs.freeze_tables();

        for &fref in &touched {
            let tree = self.trees.get(&fref).cloned().expect("tree just inserted");
            core_infer::typecheck_file(&self.gs, fref, &tree);
            self.counters.inc("types.input.files");
        }
        self.publish_from_queue(epoch, &touched);
        self.reporter.commit();
        self.indexer.lock().unwrap().commit_hashes(&updates.files, &updates.hashes);
    }

    /// Slow path: rebuild everything under the cancelable-commit protocol.
    /// Returns true when the epoch committed.
    fn run_slow_path(&mut self, updates: &LSPFileUpdates) -> bool {
        let epoch = updates.epoch;
        tracing::debug!(target: "lsp.typecheck", epoch, "slow path start");
        self.epoch_manager.start_commit_epoch(epoch);

        // Assemble the full file view: committed contents overridden by the
        // update batch.
        let mut file_view: Vec<(String, String)> = Vec::new();
        for fref in self.gs.files.iter() {
            let data = self.gs.files.file(fref);
            if !updates.files.iter().any(|(path, _)| path == data.path()) {
                file_view.push((data.path().to_owned(), data.source().to_owned()));
            }
        }
        file_view.extend(updates.files.iter().cloned());

        // Index into a fresh state.
        let mut new_gs = GlobalState::new(Arc::new(ErrorQueue::new()));
        new_gs.epoch = epoch;
        new_gs.epoch_manager = Some(self.epoch_manager.clone());
        let parser = self.indexer.lock().unwrap().parser();
        let mut new_trees: ahash::AHashMap<FileRef, Arc<Tree>> = ahash::AHashMap::new();
        let mut all_files: Vec<FileRef> = Vec::with_capacity(file_view.len());
        for (path, contents) in file_view {
            let fref = new_gs.enter_file(&path, contents);
            let (tree, _hash) = core_infer::index_file(&mut new_gs, &*parser, fref);
            new_trees.insert(fref, Arc::new(tree));
            all_files.push(fref);
        }
        new_gs.freeze_tables();

        // Typecheck on the pool; runs without the epoch mutex so the
        // preprocessor can cancel concurrently.
        let shared_gs = Arc::new(new_gs);
        let shared_trees = Arc::new(new_trees);
        let preemption = self.preemption.clone();
        let mut stage_counters: Option<CounterState> = None;
        let committed = self.epoch_manager.try_commit_epoch(epoch, true, || {
            let (tx, rx) = crossbeam_channel::unbounded::<FileRef>();
            for &fref in &all_files {
                tx.send(fref).expect("queue open");
            }
            drop(tx);
            let gs = shared_gs.clone();
            let trees = shared_trees.clone();
            let merged = self.workers.multiplex("typecheck.slowpath", move |_, counters| {
                while let Ok(fref) = rx.try_recv() {
                    // Parking point: a scheduled preemption's writer
                    // acquisition slots in between files.
                    let _preemption_guard = preemption.lock_preemption();
                    if gs.was_typechecking_canceled() {
                        break;
                    }
                    let Some(tree) = trees.get(&fref) else { continue };
                    core_infer::typecheck_file(&gs, fref, tree);
                    counters.inc("types.input.files");
                }
            });
            stage_counters = Some(merged);
        });
        if let Some(stage) = stage_counters {
            self.counters.merge(stage);
        }

        let new_gs = Arc::try_unwrap(shared_gs)
            .ok()
            .expect("workers have released the rebuilt state");
        let new_trees = Arc::try_unwrap(shared_trees)
            .ok()
            .expect("workers have released the rebuilt trees");

        if committed {
            self.gs = new_gs;
            self.trees = new_trees;
            self.publish_from_queue(epoch, &all_files);
            self.reporter.commit();
            self.indexer.lock().unwrap().commit_hashes(&updates.files, &updates.hashes);
            tracing::debug!(target: "lsp.typecheck", epoch, "slow path committed");
        } else {
            // Nothing from the canceled run may remain visible.
            let _stale = self.reporter.abort();
            tracing::debug!(target: "lsp.typecheck", epoch, "slow path dropped");
        }
        committed
    }

    /// Drain the error queue and publish per-file diagnostics for `epoch`.
    fn publish_from_queue(&mut self, epoch: u32, files: &[FileRef]) {
        let mut flusher = CollectorFlusher::new();
        self.gs.error_queue.flush_errors(&mut flusher, &self.gs.files, true);
        let all_errors = flusher.take_errors();
        for &fref in files {
            let for_file: Vec<Error> = all_errors
                .iter()
                .filter(|e| e.loc.file() == fref && !e.is_silenced)
                .cloned()
                .collect();
            self.reporter.push_diagnostics(epoch, fref, &for_file, &self.gs);
        }
    }

    /// Run a position query against the committed state with a scratch
    /// error queue, so query traffic never disturbs diagnostics.
    fn run_query(&mut self, id: Value, kind: QueryKind, path: &str, position: Position) {
        let Some(fref) = self.gs.files.lookup(path) else {
            self.output.write_response(id, Value::Null);
            return;
        };
        let Some(offset) = position_to_offset(&self.gs, fref, position) else {
            self.output.write_response(id, Value::Null);
            return;
        };
        let Some(tree) = self.trees.get(&fref).cloned() else {
            self.output.write_response(id, Value::Null);
            return;
        };

        let loc = Loc::new(fref, LocOffsets::new(offset, offset));
        let scratch_queue = Arc::new(ErrorQueue::new());
        let previous_queue = std::mem::replace(&mut self.gs.error_queue, scratch_queue.clone());
        self.gs.lsp_query = Query::Loc(loc);
        self.gs.freeze_tables();
        core_infer::typecheck_file(&self.gs, fref, &tree);
        self.gs.lsp_query = Query::Empty;
        self.gs.error_queue = previous_queue;

        let responses = scratch_queue.drain_query_responses();
        self.counters.inc("lsp.queries");
        self.output.write_response(id, render_query_result(kind, &responses, &self.gs));
    }
}

fn edit_into_updates(edit: &mut WorkspaceEditTask, indexer: &mut LSPIndexer) -> LSPFileUpdates {
    let replacement = WorkspaceEditTask::new(edit.epoch, Vec::new());
    let owned = std::mem::replace(edit, replacement);
    owned.into_updates(indexer)
}

fn position_to_offset(gs: &GlobalState, fref: FileRef, position: Position) -> Option<u32> {
    let source = gs.files.file(fref).source();
    let mut line = 0u32;
    let mut offset = 0usize;
    if position.line > 0 {
        for (index, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line += 1;
                if line == position.line {
                    offset = index + 1;
                    break;
                }
            }
        }
        if line < position.line {
            return None;
        }
    }
    Some((offset + position.character as usize).min(source.len()) as u32)
}

fn response_locations(responses: &[QueryResponse], gs: &GlobalState) -> Vec<Value> {
    let mut out = Vec::new();
    for response in responses {
        let locs: Vec<Loc> = match response {
            QueryResponse::Ident { origins, .. } => origins.clone(),
            QueryResponse::Send { method, .. } if method.exists() => {
                gs.symbols.symbol(*method).locs.iter().copied().collect()
            }
            QueryResponse::Constant { symbol, .. } | QueryResponse::Definition { symbol, .. } => {
                gs.symbols.symbol(*symbol).locs.iter().copied().collect()
            }
            QueryResponse::MethodDef { loc, .. } => vec![*loc],
            _ => Vec::new(),
        };
        for loc in locs {
            if let Some(range) = loc_to_range(loc, gs) {
                let path = gs.files.file(loc.file()).path();
                out.push(json!({"uri": format!("file://{path}"), "range": range}));
            }
        }
    }
    out
}

fn render_query_result(kind: QueryKind, responses: &[QueryResponse], gs: &GlobalState) -> Value {
    match kind {
        QueryKind::Definition => {
            let locations = response_locations(responses, gs);
            json!(locations)
        }
        QueryKind::Hover => {
            let Some(response) = responses.first() else {
                return Value::Null;
            };
            let ty = match response {
                QueryResponse::Send { ret, .. } => ret.clone(),
                QueryResponse::Ident { ty, .. }
                | QueryResponse::Literal { ty, .. }
                | QueryResponse::Constant { ty, .. }
                | QueryResponse::Field { ty, .. } => ty.clone(),
                QueryResponse::MethodDef { ret, .. } => ret.clone(),
                QueryResponse::Definition { .. } | QueryResponse::Edit { .. } => Ty::Untyped,
            };
            json!({
                "contents": {
                    "kind": "markdown",
                    "value": format!("```ruby\n{}\n```", ty.show(&gs.names, &gs.symbols)),
                }
            })
        }
        QueryKind::Completion => {
            // Autocomplete surfaces only Edit responses; everything else at
            // the position is context, not a candidate.
            let items: Vec<Value> = responses
                .iter()
                .filter_map(|response| match response {
                    QueryResponse::Edit { title, edits, .. } => Some(json!({
                        "label": title,
                        "insertText": edits.first().map(|e| e.replacement.clone()).unwrap_or_default(),
                    })),
                    _ => None,
                })
                .collect();
            json!({"isIncomplete": false, "items": items})
        }
        QueryKind::References | QueryKind::DocumentHighlight => {
            let mut ranges = Vec::new();
            for response in responses {
                if let Some(range) = loc_to_range(response.term_loc(), gs) {
                    match kind {
                        QueryKind::References => {
                            let path = gs.files.file(response.term_loc().file()).path();
                            ranges.push(json!({"uri": format!("file://{path}"), "range": range}));
                        }
                        _ => ranges.push(json!({"range": range})),
                    }
                }
            }
            json!(ranges)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_to_offset_walks_lines() {
        let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
        let fref = gs.enter_file("a.rb", "ab\ncde\nf\n".to_owned());
        let at = |line, character| position_to_offset(&gs, fref, Position { line, character });
        assert_eq!(at(0, 0), Some(0));
        assert_eq!(at(1, 0), Some(3));
        assert_eq!(at(1, 2), Some(5));
        assert_eq!(at(2, 0), Some(7));
        assert_eq!(at(9, 0), None);
    }
}
