//! Message sources with millisecond-timeout reads.
//!
//! The read contract distinguishes `Timeout` (nothing arrived yet; call
//! again) from `ErrorOrEof` (the peer is gone; shut down gracefully); a
//! timeout never raises.

use crate::codec;
use crate::messages::LSPMessage;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub enum ReadOutput {
    Success(LSPMessage),
    Timeout,
    ErrorOrEof,
}

pub trait LSPInput: Send {
    fn read(&self, timeout: Duration) -> ReadOutput;
}

/// Frames off a reader on a dedicated pump thread; `read` waits on the
/// channel with the caller's timeout. A disconnected channel (pump exited
/// on EOF or parse-fatal error) reads as `ErrorOrEof`.
pub struct LSPStreamInput {
    receiver: crossbeam_channel::Receiver<LSPMessage>,
}

impl LSPStreamInput {
    pub fn new<R: std::io::BufRead + Send + 'static>(mut reader: R) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("lsp-reader-pump".to_owned())
            .spawn(move || {
                loop {
                    match codec::read_frame(&mut reader) {
                        Ok(body) => {
                            tracing::trace!(target: "lsp.input", bytes = body.len(), "frame read");
                            match LSPMessage::from_json(&body) {
                                Ok(message) => {
                                    if sender.send(message).is_err() {
                                        return;
                                    }
                                }
                                Err(error) => {
                                    // A malformed body is the client's bug;
                                    // skip it and keep the session alive.
                                    tracing::error!(target: "lsp.input", %error, "discarding malformed message");
                                }
                            }
                        }
                        Err(codec::FrameError::Eof) => return,
                        Err(error) => {
                            tracing::error!(target: "lsp.input", %error, "input stream failed");
                            return;
                        }
                    }
                }
            })
            .expect("spawning reader pump");
        LSPStreamInput { receiver }
    }

    pub fn stdin() -> Self {
        Self::new(std::io::BufReader::new(StdinReader))
    }
}

/// BufRead adapter over the process stdin lock.
struct StdinReader;

impl std::io::Read for StdinReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut std::io::stdin().lock(), buf)
    }
}

impl LSPInput for LSPStreamInput {
    fn read(&self, timeout: Duration) -> ReadOutput {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => ReadOutput::Success(message),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => ReadOutput::Timeout,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => ReadOutput::ErrorOrEof,
        }
    }
}

/// Channel-free input for tests: writers enqueue parsed messages directly.
#[derive(Default)]
pub struct LSPProgrammaticInput {
    state: Mutex<ProgrammaticState>,
    available: Condvar,
}

#[derive(Default)]
struct ProgrammaticState {
    queue: VecDeque<LSPMessage>,
    closed: bool,
}

impl LSPProgrammaticInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue one message. Panics if the input was closed: writing after
    /// close is a test bug.
    pub fn write(&self, message: LSPMessage) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.closed, "write to a closed programmatic input");
        state.queue.push_back(message);
        self.available.notify_one();
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.closed, "programmatic input closed twice");
        state.closed = true;
        self.available.notify_all();
    }
}

// Tests hold a handle for writing while the server owns the reader side.
impl LSPInput for std::sync::Arc<LSPProgrammaticInput> {
    fn read(&self, timeout: Duration) -> ReadOutput {
        LSPProgrammaticInput::read(self, timeout)
    }
}

impl LSPInput for LSPProgrammaticInput {
    fn read(&self, timeout: Duration) -> ReadOutput {
        let mut state = self.state.lock().unwrap();
        if state.queue.is_empty() {
            if state.closed {
                return ReadOutput::ErrorOrEof;
            }
            let (next, _timed_out) = self
                .available
                .wait_timeout_while(state, timeout, |s| s.queue.is_empty() && !s.closed)
                .unwrap();
            state = next;
        }
        match state.queue.pop_front() {
            Some(message) => ReadOutput::Success(message),
            None if state.closed => ReadOutput::ErrorOrEof,
            None => ReadOutput::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_input_reads_frames_and_reports_eof() {
        let mut buf = Vec::new();
        codec::write_frame(&mut buf, r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#).unwrap();
        let input = LSPStreamInput::new(std::io::BufReader::new(std::io::Cursor::new(buf)));

        match input.read(Duration::from_millis(500)) {
            ReadOutput::Success(msg) => assert_eq!(msg.method(), Some("initialized")),
            other => panic!("expected a message, got {other:?}"),
        }
        // The pump hits EOF and drops the sender.
        match input.read(Duration::from_millis(500)) {
            ReadOutput::ErrorOrEof => {}
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[test]
    fn programmatic_input_times_out_then_delivers() {
        let input = LSPProgrammaticInput::new();
        assert!(matches!(input.read(Duration::from_millis(10)), ReadOutput::Timeout));
        input.write(LSPMessage::Notification {
            method: "exit".to_owned(),
            params: serde_json::Value::Null,
        });
        assert!(matches!(input.read(Duration::from_millis(10)), ReadOutput::Success(_)));
        input.close();
        assert!(matches!(input.read(Duration::from_millis(10)), ReadOutput::ErrorOrEof));
    }
}
