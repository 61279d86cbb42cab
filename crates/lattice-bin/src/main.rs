//! Lattice entrypoint: batch checker by default, language server with
//! `--lsp`.

mod batch;
mod config;
mod statsd;

use anyhow::Result;
use clap::Parser as ClapParser;
use core_errors::FatalError;
use core_lsp::input::LSPStreamInput;
use core_lsp::output::LSPOutput;
use core_lsp::server::LSPOptions;
use core_tree::NullParser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(ClapParser, Debug)]
#[command(name = "lattice", version, about = "A gradual type checker")]
struct Args {
    /// Files or directories to check.
    pub paths: Vec<PathBuf>,
    /// Run as a language server over stdio.
    #[arg(long = "lsp")]
    pub lsp: bool,
    /// Apply autocorrects to the checked files.
    #[arg(short = 'a', long = "autocorrect")]
    pub autocorrect: bool,
    /// Worker threads for the typecheck phase.
    #[arg(long = "max-threads")]
    pub max_threads: Option<usize>,
    /// Do not spawn watchman in server mode.
    #[arg(long = "disable-watchman")]
    pub disable_watchman: bool,
    /// Configuration file path (overrides discovery of `lattice.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Log file for server mode (stdout carries the protocol).
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

/// In server mode stdout belongs to the wire protocol, so logs go to a file
/// (or are dropped); batch mode logs to stderr. The returned guard must
/// outlive the process to flush the non-blocking writer.
fn configure_logging(lsp: bool, log_file: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("LATTICE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    if lsp {
        let path = log_file.cloned()?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!(target: "runtime", %panic_info, "fatal internal error");
        default_hook(panic_info);
    }));
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
}

fn run(args: Args) -> Result<i32, FatalError> {
    let fallback_dir = args.paths.first().filter(|p| p.is_dir()).map(PathBuf::as_path);
    let config = config::load(args.config.as_deref(), fallback_dir).map_err(|error| {
        tracing::error!(target: "runtime", %error, "configuration problem");
        FatalError::EarlyReturnWithCode(64)
    })?;
    let max_threads = args
        .max_threads
        .or(config.max_threads)
        .unwrap_or_else(default_worker_threads);
    let parser = Arc::new(NullParser);

    if args.lsp {
        // Without watchman a single workspace directory is required so the
        // server knows what to watch through the client instead.
        let workspace = args
            .paths
            .first()
            .map(|p| p.to_string_lossy().into_owned());
        if workspace.is_none() && !args.disable_watchman {
            tracing::error!(target: "runtime", "server mode needs a workspace directory (or --disable-watchman)");
            return Err(FatalError::EarlyReturnWithCode(64));
        }
        info!(target: "runtime", ?workspace, "starting language server");
        let code = core_lsp::run_server(
            Box::new(LSPStreamInput::stdin()),
            Arc::new(LSPOutput::stdout()),
            parser,
            LSPOptions {
                workspace,
                disable_watchman: args.disable_watchman,
                worker_threads: max_threads,
            },
        );
        return Ok(code);
    }

    if args.paths.is_empty() {
        tracing::error!(target: "runtime", "no input files");
        return Err(FatalError::EarlyReturnWithCode(64));
    }
    let options = batch::BatchOptions {
        paths: args.paths,
        autocorrect: args.autocorrect || config.autocorrect,
        max_threads,
    };
    batch::run(&options, &config, parser)
}

fn main() {
    let args = Args::parse();
    let _log_guard = configure_logging(args.lsp, args.log_file.as_ref());
    install_panic_hook();
    info!(target: "runtime", lsp = args.lsp, "startup");

    let code = match run(args) {
        Ok(code) => code,
        Err(fatal) => {
            tracing::error!(target: "runtime", error = %fatal, "exiting");
            fatal.exit_code()
        }
    };
    std::process::exit(code);
}
