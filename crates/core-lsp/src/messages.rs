//! JSON-RPC 2.0 message model, tolerant of fields we do not consume.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message as read off the wire, split by shape rather than method.
#[derive(Debug, Clone, PartialEq)]
pub enum LSPMessage {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A response from the client (e.g. to a server-initiated request).
    Response {
        id: Value,
        result: Option<Value>,
    },
}

impl LSPMessage {
    pub fn method(&self) -> Option<&str> {
        match self {
            LSPMessage::Request { method, .. } | LSPMessage::Notification { method, .. } => {
                Some(method.as_str())
            }
            LSPMessage::Response { .. } => None,
        }
    }

    pub fn from_json(json: &str) -> Result<LSPMessage, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            id: Option<Value>,
            method: Option<String>,
            #[serde(default)]
            params: Value,
            result: Option<Value>,
        }
        let raw: Raw = serde_json::from_str(json)?;
        Ok(match (raw.id, raw.method) {
            (Some(id), Some(method)) => LSPMessage::Request {
                id,
                method,
                params: raw.params,
            },
            (None, Some(method)) => LSPMessage::Notification {
                method,
                params: raw.params,
            },
            (Some(id), None) => LSPMessage::Response {
                id,
                result: raw.result,
            },
            (None, None) => LSPMessage::Notification {
                method: String::new(),
                params: raw.params,
            },
        })
    }
}

// Typed parameter shells for the methods the server consumes. Unknown
// fields are ignored everywhere.

#[derive(Debug, Clone, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDocumentItem {
    pub uri: String,
    pub text: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidOpenParams {
    #[serde(rename = "textDocument")]
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentChange {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidChangeParams {
    #[serde(rename = "textDocument")]
    pub text_document: TextDocumentIdentifier,
    #[serde(rename = "contentChanges")]
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidCloseParams {
    #[serde(rename = "textDocument")]
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelParams {
    pub id: Value,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDocumentPositionParams {
    #[serde(rename = "textDocument")]
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: u8,
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Synthetic notification the watchman listener injects for file updates
/// observed outside the editor.
pub const WATCHMAN_FILE_CHANGE: &str = "sorbet/watchmanFileChange";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchmanFileChangeParams {
    pub paths: Vec<String>,
}
