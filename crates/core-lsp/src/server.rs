//! Thread wiring for server mode.
//!
//! The calling thread becomes the typechecker coordinator; the reader,
//! optional watchman listener, and preprocessor run on their own threads.
//! Shutdown propagates from an `exit` notification (or input EOF) through
//! the task queue's termination flag.

use crate::input::{LSPInput, ReadOutput};
use crate::messages::LSPMessage;
use crate::output::LSPOutput;
use crate::preprocessor::{Preprocessor, TaskQueue};
use crate::typechecker::LSPTypechecker;
use crate::updates::LSPIndexer;
use crate::watchman::WatchmanProcess;
use core_state::{PreemptionTaskManager, TypecheckEpochManager, WorkerPool};
use core_tree::Parser;
use std::sync::Arc;
use std::time::Duration;

pub struct LSPOptions {
    pub workspace: Option<String>,
    pub disable_watchman: bool,
    pub worker_threads: usize,
}

impl Default for LSPOptions {
    fn default() -> Self {
        LSPOptions {
            workspace: None,
            disable_watchman: false,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1),
        }
    }
}

/// Run the server until the client disconnects or asks it to exit.
/// Returns the process exit code.
pub fn run_server(
    input: Box<dyn LSPInput>,
    output: Arc<LSPOutput>,
    parser: Arc<dyn Parser>,
    options: LSPOptions,
) -> i32 {
    let epoch_manager = Arc::new(TypecheckEpochManager::new());
    let preemption = Arc::new(PreemptionTaskManager::new(epoch_manager.clone()));
    let queue = Arc::new(TaskQueue::new());

    // Raw messages: reader and watchman both feed this channel.
    let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<LSPMessage>();

    let watchman = match (&options.workspace, options.disable_watchman) {
        (Some(workspace), false) => match WatchmanProcess::spawn(workspace, raw_tx.clone()) {
            Ok(process) => Some(process),
            Err(error) => {
                tracing::info!(
                    target: "lsp.watchman",
                    %error,
                    "could not start watchman; changes made outside your editor will not be \
                     detected. Don't need watchman? Run with --disable-watchman."
                );
                None
            }
        },
        _ => None,
    };

    let reader = {
        let raw_tx = raw_tx.clone();
        let queue = queue.clone();
        std::thread::Builder::new()
            .name("lsp-reader".to_owned())
            .spawn(move || {
                loop {
                    match input.read(Duration::from_millis(100)) {
                        ReadOutput::Success(message) => {
                            if raw_tx.send(message).is_err() {
                                return;
                            }
                        }
                        ReadOutput::Timeout => {
                            // The session can end by `exit` while the input
                            // stays open; stop reading once it does.
                            if queue.is_terminated() {
                                return;
                            }
                        }
                        ReadOutput::ErrorOrEof => {
                            // Input closed: synthesize an exit so every
                            // downstream thread unwinds gracefully.
                            let _ = raw_tx.send(LSPMessage::Notification {
                                method: "exit".to_owned(),
                                params: serde_json::Value::Null,
                            });
                            return;
                        }
                    }
                }
            })
            .expect("spawning reader thread")
    };
    drop(raw_tx);

    let indexer = Arc::new(std::sync::Mutex::new(LSPIndexer::new(parser)));

    let preprocessor = {
        let queue = queue.clone();
        let epoch_manager = epoch_manager.clone();
        let workspace = options.workspace.clone();
        let output = output.clone();
        let indexer = indexer.clone();
        std::thread::Builder::new()
            .name("lsp-preprocessor".to_owned())
            .spawn(move || {
                let mut preprocessor = Preprocessor::new(queue.clone(), epoch_manager, indexer, workspace)
                    .with_output(output);
                while let Ok(message) = raw_rx.recv() {
                    if !preprocessor.handle(message) {
                        break;
                    }
                }
                queue.terminate();
            })
            .expect("spawning preprocessor thread")
    };

    // This thread is the typechecker coordinator.
    let workers = WorkerPool::new(options.worker_threads);
    let mut typechecker = LSPTypechecker::new(
        indexer,
        epoch_manager,
        preemption,
        output,
        workers,
    );
    tracing::debug!(target: "lsp.server", "coordinator running");
    loop {
        let Some(task) = queue.pop_blocking(Duration::from_millis(100)) else {
            if queue.is_terminated() {
                break;
            }
            continue;
        };
        if !typechecker.run_task(task) {
            break;
        }
    }
    queue.terminate();

    // Kill watchman first: its reader thread holds a sender into the raw
    // channel the preprocessor drains.
    drop(watchman);
    let _ = preprocessor.join();
    let _ = reader.join();
    0
}
