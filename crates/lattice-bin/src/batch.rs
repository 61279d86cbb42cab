//! The batch checker: gather files, run the pipeline once, print errors,
//! optionally apply autocorrects, exit 0 or 1.

use crate::config::ConfigFile;
use anyhow::{Context, Result};
use core_errors::{ErrorFlusher, ErrorQueue, FatalError, StdoutFlusher};
use core_loc::FileRef;
use core_state::{GlobalState, WorkerPool};
use core_tree::{Parser, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct BatchOptions {
    pub paths: Vec<PathBuf>,
    pub autocorrect: bool,
    pub max_threads: usize,
}

/// Recursively gather `.rb`/`.rbi` files under each input path, sorted for
/// deterministic output.
pub fn collect_input_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, FatalError> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_dir(path, &mut out).map_err(|e| {
                tracing::error!(target: "runtime", path = %path.display(), error = %e, "unreadable input directory");
                FatalError::EarlyReturnWithCode(64)
            })?;
        } else if path.is_file() {
            out.push(path.clone());
        } else {
            tracing::error!(target: "runtime", path = %path.display(), "input path does not exist");
            return Err(FatalError::EarlyReturnWithCode(64));
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn collect_dir(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dir(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("rb") | Some("rbi")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

/// One full batch run. Returns the process exit code.
pub fn run(options: &BatchOptions, config: &ConfigFile, parser: Arc<dyn Parser>) -> Result<i32, FatalError> {
    let inputs = collect_input_files(&options.paths)?;
    tracing::info!(target: "runtime", files = inputs.len(), "batch run starting");

    let queue = Arc::new(ErrorQueue::new());
    let mut gs = GlobalState::new(queue.clone());

    // Read + enter + index, single threaded; the tables are unfrozen here.
    let mut trees: Vec<(FileRef, Arc<Tree>)> = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let path_display = path.to_string_lossy().into_owned();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) => {
                tracing::error!(target: "runtime", path = %path_display, %error, "could not read file");
                return Err(FatalError::EarlyReturnWithCode(66));
            }
        };
        let fref = gs.enter_file(&path_display, contents);
        let (tree, _hash) = core_infer::index_file(&mut gs, &*parser, fref);
        trees.push((fref, Arc::new(tree)));
    }
    gs.freeze_tables();

    // Typecheck across the pool; results merge into the main counters.
    let workers = WorkerPool::new(options.max_threads);
    let shared = Arc::new(gs);
    let (tx, rx) = crossbeam_channel::unbounded::<(FileRef, Arc<Tree>)>();
    for item in &trees {
        tx.send(item.clone()).expect("queue open");
    }
    drop(tx);
    let pool_gs = shared.clone();
    let mut counters = workers.multiplex("typecheck", move |_, counters| {
        while let Ok((fref, tree)) = rx.try_recv() {
            core_infer::typecheck_file(&pool_gs, fref, &tree);
            counters.inc("types.input.files");
        }
    });
    let gs = Arc::try_unwrap(shared).ok().expect("workers have finished");

    // Emission is centralized on this thread.
    let mut flusher = StdoutFlusher::default();
    queue.flush_errors(&mut flusher, &gs.files, true);
    let error_count = queue.non_silenced_error_count();
    flusher.flush_error_count(error_count);
    counters.add("errors.reported", error_count as u64);
    counters.add("errors.silenced", queue.silenced_error_count() as u64);

    if options.autocorrect {
        let rewritten = flusher.apply_autocorrects(&gs.files);
        for (fref, contents) in rewritten {
            let path = gs.files.file(fref).path();
            if let Err(error) = std::fs::write(path, contents) {
                tracing::error!(target: "runtime", path, %error, "failed writing autocorrect");
                return Err(FatalError::EarlyReturnWithCode(74));
            }
            tracing::info!(target: "runtime", path, "autocorrect applied");
        }
    }

    if let Some(host) = &config.statsd.host {
        crate::statsd::send(host, &config.statsd.prefix, &counters)
            .context("shipping counters to statsd")
            .unwrap_or_else(|error| {
                tracing::warn!(target: "runtime", %error, "statsd export failed");
            });
    }

    Ok(if error_count == 0 { 0 } else { 1 })
}
