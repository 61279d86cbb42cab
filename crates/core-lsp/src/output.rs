//! The single writer for server-to-client traffic. Shared across threads;
//! each message is framed and flushed under the lock so frames never
//! interleave.

use serde_json::{Value, json};
use std::io::Write;
use std::sync::Mutex;

pub struct LSPOutput {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Default for LSPOutput {
    fn default() -> Self {
        Self::stdout()
    }
}

impl LSPOutput {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        LSPOutput {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn write_notification(&self, method: &str, params: Value) {
        self.write_raw(&json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    pub fn write_response(&self, id: Value, result: Value) {
        self.write_raw(&json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    pub fn write_error_response(&self, id: Value, code: i64, message: &str) {
        self.write_raw(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        }));
    }

    fn write_raw(&self, value: &Value) {
        let body = value.to_string();
        let mut writer = self.writer.lock().unwrap();
        if let Err(error) = crate::codec::write_frame(&mut *writer, &body) {
            tracing::error!(target: "lsp.output", %error, "failed writing to client");
        }
    }
}
