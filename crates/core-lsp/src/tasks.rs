//! Tasks: the unit of work flowing from the preprocessor to the
//! typechecker coordinator.
//!
//! Every task declares its final phase plus two capability queries: whether
//! it may preempt an in-flight slow path, and whether it must own the
//! worker pool. The canonical task is the workspace edit, which indexes its
//! files, decides fast vs. slow, and either runs inline on the coordinator
//! or monopolizes the workers.

use crate::messages::Position;
use crate::updates::{LSPFileUpdates, LSPIndexer};
use core_tree::FileHash;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Fully handled by the preprocessor; never reaches the queue.
    Preprocess,
    /// Discarded after indexing.
    Index,
    /// Runs on the typechecker.
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Definition,
    Hover,
    References,
    DocumentHighlight,
    Completion,
}

#[derive(Debug)]
pub enum Task {
    Initialize { id: Value },
    Initialized,
    Shutdown { id: Value },
    Exit,
    WorkspaceEdit(WorkspaceEditTask),
    PositionQuery {
        id: Value,
        kind: QueryKind,
        uri: String,
        position: Position,
    },
    /// `textDocument/documentSymbol`.
    DocumentSymbols { id: Value, uri: String },
    /// `workspace/symbol`.
    WorkspaceSymbols { id: Value, query: String },
}

impl Task {
    pub fn final_phase(&self) -> Phase {
        match self {
            // A no-op edit (all files outside the workspace) dies in the
            // preprocessor.
            Task::WorkspaceEdit(edit) if edit.files.is_empty() => Phase::Preprocess,
            _ => Phase::Run,
        }
    }

    /// May this task interrupt a running slow path?
    pub fn can_preempt(&mut self, indexer: &mut LSPIndexer) -> bool {
        match self {
            Task::WorkspaceEdit(edit) => edit.can_take_fast_path(indexer),
            Task::PositionQuery { .. } | Task::DocumentSymbols { .. } | Task::WorkspaceSymbols { .. } => {
                true
            }
            _ => false,
        }
    }

    /// Must this task own the worker pool?
    pub fn needs_multithreading(&mut self, indexer: &mut LSPIndexer) -> bool {
        match self {
            Task::WorkspaceEdit(edit) => !edit.can_take_fast_path(indexer),
            _ => false,
        }
    }
}

/// An edit batch on its way to becoming an [`LSPFileUpdates`].
#[derive(Debug)]
pub struct WorkspaceEditTask {
    pub epoch: u32,
    /// One entry per file; merging replaces earlier contents.
    pub files: Vec<(String, String)>,
    pub edit_count: u32,
    pub canceled_slow_path: bool,
    /// Hashes computed lazily by the capability queries, invalidated on
    /// merge.
    cached_hashes: Option<Vec<FileHash>>,
    cached_fast_path: Option<bool>,
}

impl WorkspaceEditTask {
    pub fn new(epoch: u32, files: Vec<(String, String)>) -> Self {
        WorkspaceEditTask {
            epoch,
            files,
            edit_count: 1,
            canceled_slow_path: false,
            cached_hashes: None,
            cached_fast_path: None,
        }
    }

    /// Fold a newer edit into this task. Only legal before indexing; the
    /// newer epoch wins, cached decisions reset.
    pub fn merge_newer(&mut self, newer: WorkspaceEditTask) {
        debug_assert!(newer.epoch > self.epoch, "merging an older edit");
        for (path, contents) in newer.files {
            match self.files.iter_mut().find(|(p, _)| *p == path) {
                Some(slot) => slot.1 = contents,
                None => self.files.push((path, contents)),
            }
        }
        self.epoch = newer.epoch;
        self.edit_count += newer.edit_count;
        self.canceled_slow_path |= newer.canceled_slow_path;
        self.cached_hashes = None;
        self.cached_fast_path = None;
    }

    pub fn can_take_fast_path(&mut self, indexer: &mut LSPIndexer) -> bool {
        if let Some(cached) = self.cached_fast_path {
            return cached;
        }
        let hashes = indexer.compute_file_hashes(&self.files);
        let fast = indexer.can_take_fast_path(&self.files, &hashes);
        self.cached_hashes = Some(hashes);
        self.cached_fast_path = Some(fast);
        fast
    }

    /// Finalize into updates for the typechecker.
    pub fn into_updates(mut self, indexer: &mut LSPIndexer) -> LSPFileUpdates {
        let fast = self.can_take_fast_path(indexer);
        LSPFileUpdates {
            epoch: self.epoch,
            hashes: self.cached_hashes.take().expect("hashes computed by the decision"),
            files: self.files,
            edit_count: self.edit_count,
            can_take_fast_path: fast,
            canceled_slow_path: self.canceled_slow_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_tree::NullParser;
    use std::sync::Arc;

    #[test]
    fn merge_accumulates_edit_count_and_takes_newest_contents() {
        let mut task = WorkspaceEditTask::new(1, vec![("a.rb".into(), "v1".into())]);
        task.merge_newer(WorkspaceEditTask::new(2, vec![("a.rb".into(), "v2".into())]));
        task.merge_newer(WorkspaceEditTask::new(
            3,
            vec![("a.rb".into(), "v3".into()), ("b.rb".into(), "b".into())],
        ));
        assert_eq!(task.epoch, 3);
        assert_eq!(task.edit_count, 3);
        assert_eq!(task.files.len(), 2);
        assert_eq!(task.files[0], ("a.rb".to_owned(), "v3".to_owned()));
    }

    #[test]
    fn slow_path_tasks_need_the_pool_and_cannot_preempt() {
        let mut indexer = LSPIndexer::new(Arc::new(NullParser));
        let task = Task::WorkspaceEdit(WorkspaceEditTask::new(1, vec![("new.rb".into(), "x".into())]));
        let mut task = task;
        assert!(!task.can_preempt(&mut indexer), "unknown file means slow path");
        assert!(task.needs_multithreading(&mut indexer));
    }
}
