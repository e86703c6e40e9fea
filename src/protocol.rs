// SPDX-License-Identifier: MIT
//! Wire types for the ashlet IPC protocol.
//!
//! Messages are JSON-encoded and exchanged over a Unix domain socket, one
//! object per connection, one newline-terminated reply.

use serde::{Deserialize, Serialize};

use crate::config::Config;

// ─── Error codes ──────────────────────────────────────────────────────────────

pub const NOT_CONFIGURED: &str = "not_configured";
pub const API_ERROR: &str = "api_error";
pub const INVALID_REQUEST: &str = "invalid_request";
pub const CONFIG_ERROR: &str = "config_error";
pub const UNKNOWN_ACTION: &str = "unknown_action";

// ─── Completion ───────────────────────────────────────────────────────────────

/// A completion request sent from the shell client to the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    /// Per-session incrementing identifier assigned by the shell. Echoed
    /// back in the response so the client can match replies to requests.
    #[serde(default)]
    pub request_id: i64,
    /// Current command-line buffer content.
    #[serde(default)]
    pub input: String,
    /// Cursor byte offset within the input.
    #[serde(default)]
    pub cursor_pos: i64,
    /// Shell working directory (absolute path, or empty).
    #[serde(default)]
    pub cwd: String,
    /// Opaque shell-session identifier. Empty means unsessioned.
    #[serde(default)]
    pub session_id: String,
    /// Maximum number of candidates to return. Non-positive means default.
    #[serde(default)]
    pub max_candidates: i64,
}

/// A single completion suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The full command line that replaces the buffer on accept.
    pub completion: String,
    /// Desired cursor byte offset within `completion`. `None` means end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_pos: Option<usize>,
    /// Position-derived confidence in [0.10, 0.95].
    pub confidence: f64,
}

/// The daemon's reply to a completion [`Request`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    /// Echoed from the request.
    #[serde(default)]
    pub request_id: i64,
    /// Suggestions sorted best-first. Serialises as `[]` when empty,
    /// never as `null`.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl Response {
    /// An empty candidate list with no error.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An error response. The candidate list stays empty.
    pub fn from_error(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(Error {
                code: code.to_string(),
                message: message.into(),
            }),
            ..Self::default()
        }
    }
}

/// A daemon-side error surfaced to the shell client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    /// Machine-readable identifier, e.g. `not_configured`, `api_error`.
    pub code: String,
    pub message: String,
}

// ─── Context warm-up ──────────────────────────────────────────────────────────

/// Warms the directory-context cache for a directory the shell just entered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextRequest {
    /// Always `"context"`; used to discriminate the request shape.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub cwd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

// ─── Config actions ───────────────────────────────────────────────────────────

/// A configuration operation: `get`, `reload`, `defaults`, `default_prompt`,
/// or `validate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigRequest {
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
