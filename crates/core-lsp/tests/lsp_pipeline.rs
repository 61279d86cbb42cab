//! Coordinator-level scenarios: edit merging into fast-path runs, the
//! merged-edits counter, slow-path commits, and a full threaded server
//! session over programmatic input.

use core_lsp::input::LSPProgrammaticInput;
use core_lsp::messages::LSPMessage;
use core_lsp::output::LSPOutput;
use core_lsp::preprocessor::{Preprocessor, TaskQueue};
use core_lsp::server::{LSPOptions, run_server};
use core_lsp::typechecker::LSPTypechecker;
use core_lsp::updates::LSPIndexer;
use core_state::{PreemptionTaskManager, TypecheckEpochManager, WorkerPool};
use core_tree::NullParser;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

struct Fixture {
    preprocessor: Preprocessor,
    typechecker: LSPTypechecker,
    queue: Arc<TaskQueue>,
    output: SharedBuf,
}

fn fixture() -> Fixture {
    let epoch_manager = Arc::new(TypecheckEpochManager::new());
    let preemption = Arc::new(PreemptionTaskManager::new(epoch_manager.clone()));
    let queue = Arc::new(TaskQueue::new());
    let buf = SharedBuf::default();
    let output = Arc::new(LSPOutput::new(Box::new(buf.clone())));
    let indexer = Arc::new(Mutex::new(LSPIndexer::new(Arc::new(NullParser))));
    let preprocessor = Preprocessor::new(queue.clone(), epoch_manager.clone(), indexer.clone(), None)
        .with_output(output.clone());
    let typechecker = LSPTypechecker::new(
        indexer,
        epoch_manager,
        preemption,
        output,
        WorkerPool::new(0),
    );
    Fixture {
        preprocessor,
        typechecker,
        queue,
        output: buf,
    }
}

fn did_open(uri: &str, text: &str) -> LSPMessage {
    LSPMessage::Notification {
        method: "textDocument/didOpen".to_owned(),
        params: json!({"textDocument": {"uri": uri, "text": text, "version": 1}}),
    }
}

fn did_change(uri: &str, text: &str) -> LSPMessage {
    LSPMessage::Notification {
        method: "textDocument/didChange".to_owned(),
        params: json!({"textDocument": {"uri": uri}, "contentChanges": [{"text": text}]}),
    }
}

fn drain_and_run(fixture: &mut Fixture) {
    while let Some(task) = fixture.queue.pop_blocking(Duration::from_millis(10)) {
        assert!(fixture.typechecker.run_task(task));
    }
}

#[test]
fn first_edit_takes_the_slow_path_and_commits() {
    let mut f = fixture();
    f.preprocessor.handle(did_open("file:///a.rb", "# typed: true\n"));
    drain_and_run(&mut f);
    assert_eq!(f.typechecker.counters().counter("typecheck.retypecheck_full"), 1);
    assert_eq!(f.typechecker.state().epoch, 1);
}

#[test]
fn merged_edits_take_the_fast_path_and_count() {
    let mut f = fixture();
    // Commit the file once so later edits are body-only by the indexer's
    // bookkeeping.
    f.preprocessor.handle(did_open("file:///a.rb", "v0"));
    drain_and_run(&mut f);

    // Three consecutive edits to the same file merge into one task.
    for text in ["v1", "v2", "v3"] {
        f.preprocessor.handle(did_change("file:///a.rb", text));
    }
    drain_and_run(&mut f);

    let counters = f.typechecker.counters();
    assert_eq!(counters.counter("typecheck.retypecheck_fast"), 1);
    assert_eq!(
        counters.category("lsp.messages.processed", "sorbet.mergedEdits"),
        2,
        "three merged edits count as two merges"
    );
    // The committed state sees the final contents.
    let gs = f.typechecker.state();
    let fref = gs.files.lookup("/a.rb").unwrap();
    assert_eq!(gs.files.file(fref).source(), "v3");
}

#[test]
fn hover_query_responds() {
    let mut f = fixture();
    f.preprocessor.handle(did_open("file:///a.rb", "x = 1\n"));
    drain_and_run(&mut f);

    f.preprocessor.handle(LSPMessage::Request {
        id: json!(42),
        method: "textDocument/hover".to_owned(),
        params: json!({"textDocument": {"uri": "file:///a.rb"}, "position": {"line": 0, "character": 0}}),
    });
    drain_and_run(&mut f);
    let raw = f.output.contents();
    assert!(raw.contains(r#""id":42"#), "hover request must be answered: {raw}");
}

#[test]
fn server_session_over_programmatic_input() {
    let input = Arc::new(LSPProgrammaticInput::new());
    input.write(LSPMessage::Request {
        id: json!(1),
        method: "initialize".to_owned(),
        params: json!({}),
    });
    input.write(LSPMessage::Notification {
        method: "initialized".to_owned(),
        params: json!({}),
    });
    input.write(did_open("file:///lib/a.rb", "# typed: true\nx = 1\n"));
    input.write(LSPMessage::Request {
        id: json!(2),
        method: "shutdown".to_owned(),
        params: json!(null),
    });
    input.write(LSPMessage::Notification {
        method: "exit".to_owned(),
        params: json!(null),
    });
    // No more traffic: the reader observes EOF after draining the queue.
    input.close();

    let buf = SharedBuf::default();
    let output = Arc::new(LSPOutput::new(Box::new(buf.clone())));
    let code = run_server(
        Box::new(input.clone()),
        output,
        Arc::new(NullParser),
        LSPOptions {
            workspace: None,
            disable_watchman: true,
            worker_threads: 2,
        },
    );
    assert_eq!(code, 0);
    let raw = buf.contents();
    assert!(raw.contains(r#""id":1"#), "initialize answered: {raw}");
    assert!(raw.contains("capabilities"));
    assert!(raw.contains(r#""id":2"#), "shutdown answered: {raw}");
}
