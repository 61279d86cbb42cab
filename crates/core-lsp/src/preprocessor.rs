//! The preprocessor: raw client messages in, tasks out.
//!
//! Runs on its own long-lived thread. Keeps the client-visible state (open
//! documents, pending cancellations), merges consecutive edits to the same
//! workspace before they ever reach the task queue, and is the only thread
//! allowed to cancel a running slow path.

use crate::messages::{
    self, CancelParams, DidChangeParams, DidCloseParams, DidOpenParams, LSPMessage,
    TextDocumentPositionParams, WatchmanFileChangeParams,
};
use crate::tasks::{Phase, QueryKind, Task, WorkspaceEditTask};
use core_state::TypecheckEpochManager;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// The queue between the preprocessor and the typechecker coordinator.
pub struct TaskQueue {
    state: Mutex<TaskQueueState>,
    available: Condvar,
}

#[derive(Default)]
struct TaskQueueState {
    tasks: VecDeque<Task>,
    terminated: bool,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue {
            state: Mutex::new(TaskQueueState::default()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        state.tasks.push_back(task);
        self.available.notify_one();
    }

    /// Blocks until a task is available or the queue is terminated.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<Task> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.tasks.is_empty() && !s.terminated)
            .unwrap();
        state.tasks.pop_front()
    }

    pub fn terminate(&self) {
        self.state.lock().unwrap().terminated = true;
        self.available.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().unwrap().terminated
    }

    /// Merge `edit` into a pending trailing edit task, or push it fresh.
    /// Returns whether the pending (merged) batch can take the fast path,
    /// evaluated under the queue lock so the answer matches what the
    /// coordinator will eventually pop.
    fn push_or_merge_edit(
        &self,
        edit: WorkspaceEditTask,
        indexer: &std::sync::Mutex<crate::updates::LSPIndexer>,
    ) -> (MergeOutcome, bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(Task::WorkspaceEdit(pending)) = state.tasks.back_mut() {
            pending.merge_newer(edit);
            let fast = pending.can_take_fast_path(&mut indexer.lock().unwrap());
            return (MergeOutcome::Merged, fast);
        }
        state.tasks.push_back(Task::WorkspaceEdit(edit));
        self.available.notify_one();
        let fast = match state.tasks.back_mut() {
            Some(Task::WorkspaceEdit(pending)) => {
                pending.can_take_fast_path(&mut indexer.lock().unwrap())
            }
            _ => false,
        };
        (MergeOutcome::Queued, fast)
    }

    /// Drop a queued request canceled by the client. Running requests are
    /// not interrupted; LSP allows a response to a canceled request.
    fn cancel_request(&self, id: &Value) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.tasks.len();
        state.tasks.retain(|task| match task {
            Task::PositionQuery { id: task_id, .. } => task_id != id,
            _ => true,
        });
        before != state.tasks.len()
    }

    /// Flag a pending trailing edit as having canceled the slow path.
    fn mark_pending_edit_canceled_slow_path(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(Task::WorkspaceEdit(pending)) = state.tasks.back_mut() {
            pending.canceled_slow_path = true;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum MergeOutcome {
    Merged,
    Queued,
}

pub struct Preprocessor {
    queue: Arc<TaskQueue>,
    epoch_manager: Arc<TypecheckEpochManager>,
    /// Shared with the coordinator: capability queries here must agree with
    /// the fast/slow decision made when the task runs.
    indexer: Arc<Mutex<crate::updates::LSPIndexer>>,
    /// For immediate replies the typechecker never needs to see
    /// (unsupported methods). Absent in some unit tests.
    output: Option<Arc<crate::output::LSPOutput>>,
    /// Current text of documents the client has opened.
    open_documents: ahash::AHashMap<String, String>,
    /// Workspace root; edits to files outside it are dropped.
    workspace: Option<String>,
    next_epoch: u32,
}

impl Preprocessor {
    pub fn new(
        queue: Arc<TaskQueue>,
        epoch_manager: Arc<TypecheckEpochManager>,
        indexer: Arc<Mutex<crate::updates::LSPIndexer>>,
        workspace: Option<String>,
    ) -> Self {
        Preprocessor {
            queue,
            epoch_manager,
            indexer,
            output: None,
            open_documents: ahash::AHashMap::new(),
            workspace,
            next_epoch: 0,
        }
    }

    pub fn with_output(mut self, output: Arc<crate::output::LSPOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn uri_to_path(&self, uri: &str) -> String {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        match &self.workspace {
            Some(root) => path
                .strip_prefix(root.as_str())
                .map(|rest| rest.trim_start_matches('/').to_owned())
                .unwrap_or_else(|| path.to_owned()),
            None => path.to_owned(),
        }
    }

    /// Process one raw message. Returns false when the client asked the
    /// server to exit.
    pub fn handle(&mut self, message: LSPMessage) -> bool {
        match message {
            LSPMessage::Request { id, method, params } => self.handle_request(id, &method, params),
            LSPMessage::Notification { method, params } => {
                return self.handle_notification(&method, params);
            }
            LSPMessage::Response { .. } => {}
        }
        true
    }

    fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        let query_kind = match method {
            "initialize" => {
                self.queue.push(Task::Initialize { id });
                return;
            }
            "shutdown" => {
                self.queue.push(Task::Shutdown { id });
                return;
            }
            "textDocument/documentSymbol" => {
                #[derive(serde::Deserialize)]
                struct Params {
                    #[serde(rename = "textDocument")]
                    text_document: crate::messages::TextDocumentIdentifier,
                }
                if let Ok(parsed) = serde_json::from_value::<Params>(params) {
                    let uri = self.uri_to_path(&parsed.text_document.uri);
                    self.queue.push(Task::DocumentSymbols { id, uri });
                }
                return;
            }
            "workspace/symbol" => {
                #[derive(serde::Deserialize)]
                struct Params {
                    query: String,
                }
                let query = serde_json::from_value::<Params>(params)
                    .map(|p| p.query)
                    .unwrap_or_default();
                self.queue.push(Task::WorkspaceSymbols { id, query });
                return;
            }
            "textDocument/definition" => Some(QueryKind::Definition),
            "textDocument/hover" => Some(QueryKind::Hover),
            "textDocument/references" => Some(QueryKind::References),
            "textDocument/documentHighlight" => Some(QueryKind::DocumentHighlight),
            "textDocument/completion" => Some(QueryKind::Completion),
            _ => None,
        };
        match query_kind {
            Some(kind) => match serde_json::from_value::<TextDocumentPositionParams>(params) {
                Ok(parsed) => {
                    let uri = self.uri_to_path(&parsed.text_document.uri);
                    self.queue.push(Task::PositionQuery {
                        id,
                        kind,
                        uri,
                        position: parsed.position,
                    });
                }
                Err(error) => {
                    tracing::error!(target: "lsp.preprocess", method, %error, "bad request params");
                }
            },
            None => {
                tracing::debug!(target: "lsp.preprocess", method, "unsupported request");
                if let Some(output) = &self.output {
                    output.write_error_response(id, -32601, &format!("method not found: {method}"));
                }
            }
        }
    }

    fn handle_notification(&mut self, method: &str, params: Value) -> bool {
        match method {
            "initialized" => self.queue.push(Task::Initialized),
            "exit" => {
                self.queue.push(Task::Exit);
                return false;
            }
            "$/cancelRequest" => {
                if let Ok(parsed) = serde_json::from_value::<CancelParams>(params) {
                    if self.queue.cancel_request(&parsed.id) {
                        tracing::debug!(target: "lsp.preprocess", "canceled a queued request");
                    }
                }
            }
            "textDocument/didOpen" => {
                if let Ok(parsed) = serde_json::from_value::<DidOpenParams>(params) {
                    let path = self.uri_to_path(&parsed.text_document.uri);
                    self.open_documents
                        .insert(path.clone(), parsed.text_document.text.clone());
                    self.commit_edit(vec![(path, parsed.text_document.text)]);
                }
            }
            "textDocument/didChange" => {
                if let Ok(parsed) = serde_json::from_value::<DidChangeParams>(params) {
                    // Full-document sync: the last content change wins.
                    if let Some(change) = parsed.content_changes.into_iter().last() {
                        let path = self.uri_to_path(&parsed.text_document.uri);
                        self.open_documents.insert(path.clone(), change.text.clone());
                        self.commit_edit(vec![(path, change.text)]);
                    }
                }
            }
            "textDocument/didClose" => {
                if let Ok(parsed) = serde_json::from_value::<DidCloseParams>(params) {
                    let path = self.uri_to_path(&parsed.text_document.uri);
                    self.open_documents.remove(&path);
                }
            }
            messages::WATCHMAN_FILE_CHANGE => {
                if let Ok(parsed) = serde_json::from_value::<WatchmanFileChangeParams>(params) {
                    // Edits from the editor win over disk state.
                    let files: Vec<(String, String)> = parsed
                        .paths
                        .into_iter()
                        .filter(|path| !self.open_documents.contains_key(path))
                        .filter_map(|path| std::fs::read_to_string(&path).ok().map(|text| (path, text)))
                        .collect();
                    if !files.is_empty() {
                        self.commit_edit(files);
                    }
                }
            }
            other => {
                tracing::debug!(target: "lsp.preprocess", method = other, "ignored notification");
            }
        }
        true
    }

    /// Queue (or merge) an edit. A batch that will need the slow path
    /// cancels an in-flight slow path in favor of its newer epoch; a
    /// fast-path batch leaves the slow path alone (it can preempt instead).
    fn commit_edit(&mut self, files: Vec<(String, String)>) {
        self.next_epoch = self.next_epoch.wrapping_add(1);
        let epoch = self.next_epoch;
        let task = WorkspaceEditTask::new(epoch, files);
        if task.files.is_empty() {
            debug_assert_eq!(Task::WorkspaceEdit(task).final_phase(), Phase::Preprocess);
            return;
        }
        let (outcome, can_take_fast_path) = self.queue.push_or_merge_edit(task, &self.indexer);
        tracing::debug!(target: "lsp.preprocess", epoch, ?outcome, can_take_fast_path, "edit accepted");

        if !can_take_fast_path && self.epoch_manager.try_cancel_slow_path(epoch) {
            self.queue.mark_pending_edit_canceled_slow_path();
        }
    }

    /// Current epoch counter, for tests.
    pub fn epoch(&self) -> u32 {
        self.next_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updates::LSPIndexer;
    use core_tree::NullParser;
    use serde_json::json;

    fn shared_indexer() -> Arc<Mutex<LSPIndexer>> {
        Arc::new(Mutex::new(LSPIndexer::new(Arc::new(NullParser))))
    }

    fn fixture() -> (Preprocessor, Arc<TaskQueue>) {
        let queue = Arc::new(TaskQueue::new());
        let epochs = Arc::new(TypecheckEpochManager::new());
        (
            Preprocessor::new(queue.clone(), epochs, shared_indexer(), None),
            queue,
        )
    }

    fn did_change(uri: &str, text: &str) -> LSPMessage {
        LSPMessage::Notification {
            method: "textDocument/didChange".to_owned(),
            params: json!({
                "textDocument": {"uri": uri},
                "contentChanges": [{"text": text}],
            }),
        }
    }

    #[test]
    fn consecutive_edits_merge_into_one_task() {
        let (mut pre, queue) = fixture();
        for text in ["v1", "v2", "v3"] {
            assert!(pre.handle(did_change("file:///a.rb", text)));
        }
        let task = queue.pop_blocking(Duration::from_millis(10)).unwrap();
        let Task::WorkspaceEdit(edit) = task else {
            panic!("expected a workspace edit");
        };
        assert_eq!(edit.edit_count, 3);
        assert_eq!(edit.epoch, 3);
        assert_eq!(edit.files, vec![("/a.rb".to_owned(), "v3".to_owned())]);
        assert!(queue.pop_blocking(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn interleaved_request_breaks_the_merge_window() {
        let (mut pre, queue) = fixture();
        pre.handle(did_change("file:///a.rb", "v1"));
        pre.handle(LSPMessage::Request {
            id: json!(7),
            method: "textDocument/hover".to_owned(),
            params: json!({"textDocument": {"uri": "file:///a.rb"}, "position": {"line": 0, "character": 0}}),
        });
        pre.handle(did_change("file:///a.rb", "v2"));

        let first = queue.pop_blocking(Duration::from_millis(10)).unwrap();
        assert!(matches!(first, Task::WorkspaceEdit(ref e) if e.edit_count == 1));
        assert!(matches!(
            queue.pop_blocking(Duration::from_millis(10)).unwrap(),
            Task::PositionQuery { .. }
        ));
        let third = queue.pop_blocking(Duration::from_millis(10)).unwrap();
        assert!(matches!(third, Task::WorkspaceEdit(ref e) if e.edit_count == 1));
    }

    #[test]
    fn cancel_request_drops_queued_queries() {
        let (mut pre, queue) = fixture();
        pre.handle(LSPMessage::Request {
            id: json!(3),
            method: "textDocument/definition".to_owned(),
            params: json!({"textDocument": {"uri": "file:///a.rb"}, "position": {"line": 1, "character": 2}}),
        });
        pre.handle(LSPMessage::Notification {
            method: "$/cancelRequest".to_owned(),
            params: json!({"id": 3}),
        });
        assert!(queue.pop_blocking(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn exit_stops_the_preprocessor() {
        let (mut pre, queue) = fixture();
        assert!(!pre.handle(LSPMessage::Notification {
            method: "exit".to_owned(),
            params: Value::Null,
        }));
        assert!(matches!(
            queue.pop_blocking(Duration::from_millis(10)).unwrap(),
            Task::Exit
        ));
    }

    #[test]
    fn edits_cancel_a_running_slow_path() {
        let queue = Arc::new(TaskQueue::new());
        let epochs = Arc::new(TypecheckEpochManager::new());
        let mut pre = Preprocessor::new(queue.clone(), epochs.clone(), shared_indexer(), None);

        // A slow path is mid-flight on another thread's behalf.
        std::thread::scope(|s| {
            s.spawn(|| epochs.start_commit_epoch(100)).join().unwrap();
        });
        pre.handle(did_change("file:///a.rb", "v1"));

        assert!(epochs.was_typechecking_canceled());
        let Task::WorkspaceEdit(edit) = queue.pop_blocking(Duration::from_millis(10)).unwrap() else {
            panic!("expected edit");
        };
        assert!(edit.canceled_slow_path);
    }
}
