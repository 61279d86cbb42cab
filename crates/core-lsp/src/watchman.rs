//! The watchman subprocess listener.
//!
//! Spawns `watchman -j -p --no-pretty`, writes one subscribe command for the
//! workspace, and translates line-delimited JSON notifications into
//! synthetic file-change messages for the preprocessor. Watchman failing to
//! start (or dying) disables the feature with an informative message; the
//! server keeps running on editor-reported edits alone.

use crate::messages::{LSPMessage, WATCHMAN_FILE_CHANGE, WatchmanFileChangeParams};
use serde_json::{Value, json};
use std::io::{BufRead, Write};
use std::process::{Child, Command, Stdio};

/// File extensions the subscription watches.
pub const WATCHED_EXTENSIONS: [&str; 2] = ["rb", "rbi"];

pub struct WatchmanProcess {
    child: Child,
    reader: Option<std::thread::JoinHandle<()>>,
}

/// The subscribe command, shaped for watchman 4.9: `anyof` over per-suffix
/// clauses (newer versions accept a suffix list, deployed ones may not),
/// and `empty_on_fresh_instance` so a cold daemon does not replay the whole
/// tree.
pub fn subscribe_command(workspace: &str, subscription: &str, extensions: &[&str]) -> Value {
    let suffixes: Vec<Value> = extensions.iter().map(|ext| json!(["suffix", ext])).collect();
    json!([
        "subscribe",
        workspace,
        subscription,
        {
            "expression": ["allof", ["type", "f"], Value::Array({
                let mut anyof = vec![json!("anyof")];
                anyof.extend(suffixes);
                anyof
            })],
            "defer_vcs": false,
            "fields": ["name"],
            "empty_on_fresh_instance": true,
        }
    ])
}

/// Translate one notification line into a synthetic edit message, or None
/// for subscription acks and unrecognized traffic.
pub fn parse_notification(line: &str) -> Option<LSPMessage> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(target: "lsp.watchman", %error, "notification is not valid json");
            return None;
        }
    };
    if value.get("is_fresh_instance").is_none() {
        if value.get("subscribe").is_none() {
            tracing::debug!(target: "lsp.watchman", "unknown watchman response");
        }
        return None;
    }
    let files = value.get("files")?.as_array()?;
    let paths: Vec<String> = files
        .iter()
        .filter_map(|f| f.as_str().map(str::to_owned))
        .collect();
    if paths.is_empty() {
        return None;
    }
    Some(LSPMessage::Notification {
        method: WATCHMAN_FILE_CHANGE.to_owned(),
        params: serde_json::to_value(WatchmanFileChangeParams { paths }).unwrap(),
    })
}

impl WatchmanProcess {
    /// Spawn watchman and start forwarding notifications into `sink`.
    pub fn spawn(
        workspace: &str,
        sink: crossbeam_channel::Sender<LSPMessage>,
    ) -> anyhow::Result<WatchmanProcess> {
        let subscription = format!("lattice-{}", std::process::id());
        tracing::debug!(
            target: "lsp.watchman",
            workspace,
            subscription,
            "starting watchman monitoring"
        );
        let mut child = Command::new("watchman")
            .args(["-j", "-p", "--no-pretty"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let command = subscribe_command(workspace, &subscription, &WATCHED_EXTENSIONS);
        let mut stdin = child.stdin.take().expect("piped stdin");
        writeln!(stdin, "{command}")?;

        let stdout = child.stdout.take().expect("piped stdout");
        let reader = std::thread::Builder::new()
            .name("watchman-reader".to_owned())
            .spawn(move || {
                let reader = std::io::BufReader::new(stdout);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    tracing::trace!(target: "lsp.watchman", %line, "notification");
                    if let Some(message) = parse_notification(&line) {
                        if sink.send(message).is_err() {
                            return;
                        }
                    }
                }
                // Swallow the failure and keep serving editor edits.
                tracing::info!(
                    target: "lsp.watchman",
                    "watchman exited; changes made outside your editor will not be detected. \
                     Don't need watchman? Run with --disable-watchman."
                );
            })?;
        Ok(WatchmanProcess {
            child,
            reader: Some(reader),
        })
    }
}

impl Drop for WatchmanProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
