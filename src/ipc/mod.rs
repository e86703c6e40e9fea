// SPDX-License-Identifier: MIT
//! Unix-domain-socket IPC server.
//!
//! One JSON object per connection, one newline-terminated JSON reply on
//! the same connection. The request shape picks the handler: a
//! `type:"context"` object warms the directory cache, an `action:"…"`
//! object drives config operations, anything else is a completion
//! request. At most one completion per shell session is in flight; a
//! newer request cancels the older one, whose reply is then suppressed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::engine::{Completer, Engine};
use crate::protocol::{
    self, ConfigRequest, ConfigResponse, ContextRequest, ContextResponse, Error, Request,
};

/// A cancellable in-flight completion for one shell session.
struct SessionEntry {
    request_id: i64,
    cancel: CancellationToken,
}

struct ServerState {
    engine: RwLock<Arc<dyn Completer>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

/// Listens on a Unix domain socket for shell-client requests.
pub struct Server {
    listener: UnixListener,
    sock_path: PathBuf,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind the socket and build the engine from the on-disk config.
    pub fn new(sock_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_completer(sock_path, Arc::new(Engine::new()))
    }

    /// Bind the socket around a custom [`Completer`].
    pub fn with_completer(
        sock_path: impl Into<PathBuf>,
        completer: Arc<dyn Completer>,
    ) -> Result<Self> {
        let sock_path = sock_path.into();

        // Remove a stale socket left by a previous run.
        match std::fs::remove_file(&sock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&sock_path)?;
        Ok(Self {
            listener,
            sock_path,
            state: Arc::new(ServerState {
                engine: RwLock::new(completer),
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.sock_path
    }

    /// Accept connections until a shutdown signal arrives.
    pub async fn serve(&self) -> Result<()> {
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    return Ok(());
                }

                conn = self.listener.accept() => {
                    let (stream, _) = conn?;
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_conn(stream, state).await {
                            debug!(error = %e, "connection error");
                        }
                    });
                }
            }
        }
    }

    /// Shut down the engine and remove the socket file.
    pub fn close(&self) {
        self.state.engine.read().expect("engine lock").close();
        let _ = std::fs::remove_file(&self.sock_path);
    }
}

/// Resolves when SIGTERM or Ctrl-C is received.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

async fn handle_conn(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    debug!(data = %line.trim_end(), "request");

    let raw: serde_json::Value = match serde_json::from_str(&line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "invalid request");
            return Ok(());
        }
    };

    // Discriminate by shape: context warm-up, config action, completion.
    if raw.get("type").and_then(|t| t.as_str()) == Some("context") {
        let req: ContextRequest = serde_json::from_value(raw)?;
        return handle_context(&mut write_half, &state, req).await;
    }
    if raw
        .get("action")
        .and_then(|a| a.as_str())
        .is_some_and(|a| !a.is_empty())
    {
        let req: ConfigRequest = serde_json::from_value(raw)?;
        return handle_config(&mut write_half, &state, req).await;
    }

    let req: Request = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "invalid request");
            return Ok(());
        }
    };
    handle_completion(&mut write_half, &state, req).await
}

async fn handle_completion(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    state: &Arc<ServerState>,
    req: Request,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let session_id = req.session_id.clone();
    let request_id = req.request_id;

    // Pre-empt any older in-flight completion for this session.
    // Unsessioned requests are never tracked or pre-empted.
    if !session_id.is_empty() {
        let mut sessions = state.sessions.lock().expect("session lock");
        if let Some(prev) = sessions.insert(
            session_id.clone(),
            SessionEntry {
                request_id,
                cancel: cancel.clone(),
            },
        ) {
            prev.cancel.cancel();
        }
    }

    // Hold our own reference so a concurrent reload cannot tear the
    // engine down under us.
    let engine = Arc::clone(&*state.engine.read().expect("engine lock"));
    let result = engine.complete(req, &cancel).await;

    if !session_id.is_empty() {
        let mut sessions = state.sessions.lock().expect("session lock");
        if sessions
            .get(&session_id)
            .is_some_and(|cur| cur.request_id == request_id)
        {
            sessions.remove(&session_id);
        }
    }

    // A cancelled request produces no reply; the client has moved on.
    let Some(mut resp) = result else {
        return Ok(());
    };
    if cancel.is_cancelled() {
        return Ok(());
    }

    resp.request_id = request_id;
    write_json_line(write_half, &resp).await
}

async fn handle_context(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    state: &Arc<ServerState>,
    req: ContextRequest,
) -> Result<()> {
    let cwd = req.cwd.trim_end_matches('\n').to_string();

    let resp = if cwd.is_empty() {
        ContextResponse {
            ok: false,
            error: Some(Error {
                code: protocol::INVALID_REQUEST.to_string(),
                message: "cwd is required".to_string(),
            }),
        }
    } else {
        // Reply immediately; the gather runs detached. This is a warm-up,
        // not a synchronous fetch.
        let engine = Arc::clone(&*state.engine.read().expect("engine lock"));
        tokio::spawn(async move {
            engine.warm_context(&cwd).await;
        });
        ContextResponse {
            ok: true,
            error: None,
        }
    };

    write_json_line(write_half, &resp).await
}

async fn handle_config(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    state: &Arc<ServerState>,
    req: ConfigRequest,
) -> Result<()> {
    let mut resp = ConfigResponse::default();

    match req.action.as_str() {
        "get" => match config::load() {
            Ok(cfg) => resp.config = Some(cfg),
            Err(e) => resp.error = Some(config_error(e)),
        },

        "reload" => {
            // Respond with the current on-disk config immediately; the
            // engine rebuild can block on network clients, so it runs in
            // the background, serialized under the engine lock.
            let state = Arc::clone(state);
            tokio::spawn(async move {
                let mut guard = state.engine.write().expect("engine lock");
                guard.close();
                *guard = Arc::new(Engine::new());
                info!("engine reloaded");
            });
            resp.config = config::load().ok();
        }

        "defaults" => resp.config = Some(config::default_config()),

        "default_prompt" => resp.prompt = Some(config::DEFAULT_PROMPT.to_string()),

        "validate" => match config::load() {
            Ok(cfg) => resp.warnings = Some(config::validate(&cfg)),
            Err(e) => resp.error = Some(config_error(e)),
        },

        other => {
            resp.error = Some(Error {
                code: protocol::UNKNOWN_ACTION.to_string(),
                message: format!("unknown config action: {other}"),
            });
        }
    }

    write_json_line(write_half, &resp).await
}

fn config_error(e: anyhow::Error) -> Error {
    Error {
        code: protocol::CONFIG_ERROR.to_string(),
        message: e.to_string(),
    }
}

async fn write_json_line<T: serde::Serialize>(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    value: &T,
) -> Result<()> {
    let mut data = match serde_json::to_vec(value) {
        Ok(data) => data,
        Err(e) => {
            error!(error = %e, "failed to marshal response");
            return Ok(());
        }
    };
    data.push(b'\n');
    write_half.write_all(&data).await?;
    Ok(())
}

// ─── Socket path ──────────────────────────────────────────────────────────────

/// Socket resolution: `$ASHLET_SOCKET` → `$XDG_RUNTIME_DIR/ashlet.sock` →
/// `/tmp/ashlet-<uid>.sock`. Must match the shell client exactly.
pub fn resolve_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("ASHLET_SOCKET") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("ashlet.sock");
        }
    }
    PathBuf::from(format!("/tmp/ashlet-{}.sock", uid()))
}

fn uid() -> u32 {
    // SAFETY: getuid cannot fail and touches no shared state.
    unsafe { libc::getuid() }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_resolution_order() {
        // One test body so the env mutations cannot race each other.
        std::env::set_var("ASHLET_SOCKET", "/custom/ashlet.sock");
        assert_eq!(
            resolve_socket_path(),
            PathBuf::from("/custom/ashlet.sock")
        );

        std::env::set_var("ASHLET_SOCKET", "");
        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        assert_eq!(
            resolve_socket_path(),
            PathBuf::from("/run/user/1000/ashlet.sock")
        );

        std::env::set_var("XDG_RUNTIME_DIR", "");
        assert_eq!(
            resolve_socket_path(),
            PathBuf::from(format!("/tmp/ashlet-{}.sock", uid()))
        );

        std::env::remove_var("ASHLET_SOCKET");
        std::env::remove_var("XDG_RUNTIME_DIR");
    }
}
