// SPDX-License-Identifier: MIT
//! Ashlet — a background daemon that answers shell-completion requests.
//!
//! The shell client sends the current command-line buffer, cursor
//! position, and working directory over a Unix domain socket; the daemon
//! gathers local context (recent and semantically related history,
//! directory listings, git state, project manifests), prompts a remote
//! text-generation model, and returns ranked completion candidates.

pub mod config;
pub mod context;
pub mod engine;
pub mod history;
pub mod ipc;
pub mod protocol;

pub use engine::{Completer, Engine};
pub use ipc::{resolve_socket_path, Server};
