// SPDX-License-Identifier: MIT
// Socket-level tests: a real server on a real Unix socket, driven by a
// stub completion engine so no network is involved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

use ashlet::protocol::{Candidate, ConfigResponse, ContextResponse, Request, Response};
use ashlet::{Completer, Server};

/// Completer returning a canned response, optionally after a delay so
/// pre-emption can be exercised.
struct StubCompleter {
    response: Response,
    delay: Duration,
    warmed: Mutex<Vec<String>>,
}

impl StubCompleter {
    fn instant(response: Response) -> Arc<Self> {
        Arc::new(Self {
            response,
            delay: Duration::ZERO,
            warmed: Mutex::new(Vec::new()),
        })
    }

    fn slow(response: Response, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            response,
            delay,
            warmed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl Completer for StubCompleter {
    async fn complete(&self, _req: Request, cancel: &CancellationToken) -> Option<Response> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return None,
            }
        }
        Some(self.response.clone())
    }

    async fn warm_context(&self, cwd: &str) {
        self.warmed.lock().unwrap().push(cwd.to_string());
    }

    fn close(&self) {}
}

struct TestServer {
    sock_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn start_server(completer: Arc<dyn Completer>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let sock_path = dir.path().join("ashlet.sock");
    let server = Server::with_completer(&sock_path, completer).unwrap();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    TestServer {
        sock_path,
        _dir: dir,
    }
}

async fn send_line(sock_path: &std::path::Path, line: &str) -> Option<String> {
    let stream = UnixStream::connect(sock_path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(line.as_bytes()).await.unwrap();
    write_half.write_all(b"\n").await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut reply = String::new();
    let n = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut reply))
        .await
        .expect("read timed out")
        .unwrap();
    if n == 0 {
        None
    } else {
        Some(reply)
    }
}

async fn send_request(sock_path: &std::path::Path, req: &serde_json::Value) -> Response {
    let reply = send_line(sock_path, &req.to_string())
        .await
        .expect("no response from server");
    serde_json::from_str(&reply).unwrap()
}

fn one_candidate() -> Response {
    Response {
        request_id: 0,
        candidates: vec![Candidate {
            completion: "git status".into(),
            cursor_pos: None,
            confidence: 0.95,
        }],
        error: None,
    }
}

// ─── Completion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn echoes_request_id() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let resp = send_request(
        &srv.sock_path,
        &serde_json::json!({"request_id": 17, "input": "git st", "cursor_pos": 6}),
    )
    .await;
    assert_eq!(resp.request_id, 17);
}

#[tokio::test]
async fn empty_candidates_on_the_wire_are_an_array() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let raw = send_line(
        &srv.sock_path,
        r#"{"request_id": 1, "input": "ls", "cursor_pos": 2}"#,
    )
    .await
    .expect("no response");
    assert!(
        raw.contains(r#""candidates":[]"#),
        "expected candidates:[] in raw reply: {raw}"
    );
    assert!(!raw.contains("null"));
}

#[tokio::test]
async fn candidates_pass_through() {
    let srv = start_server(StubCompleter::instant(one_candidate()));

    let resp = send_request(
        &srv.sock_path,
        &serde_json::json!({"request_id": 2, "input": "git s", "cursor_pos": 5}),
    )
    .await;
    assert_eq!(resp.candidates.len(), 1);
    assert_eq!(resp.candidates[0].completion, "git status");
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn error_response_passes_through() {
    let srv = start_server(StubCompleter::instant(Response::from_error(
        "api_error",
        "backend unavailable",
    )));

    let resp = send_request(
        &srv.sock_path,
        &serde_json::json!({"request_id": 3, "input": "ls", "cursor_pos": 2}),
    )
    .await;
    assert!(resp.candidates.is_empty());
    let err = resp.error.expect("error set");
    assert_eq!(err.code, "api_error");
}

#[tokio::test]
async fn newer_session_request_preempts_older() {
    let srv = start_server(StubCompleter::slow(
        one_candidate(),
        Duration::from_millis(400),
    ));

    // First request stalls in the stub.
    let first = {
        let sock = srv.sock_path.clone();
        tokio::spawn(async move {
            send_line(
                &sock,
                r#"{"request_id": 1, "input": "git s", "cursor_pos": 5, "session_id": "s"}"#,
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second request for the same session cancels the first.
    let resp = send_request(
        &srv.sock_path,
        &serde_json::json!({
            "request_id": 2, "input": "git st", "cursor_pos": 6, "session_id": "s"
        }),
    )
    .await;
    assert_eq!(resp.request_id, 2);
    assert_eq!(resp.candidates.len(), 1);

    // The first connection closes without ever receiving a reply.
    let first_reply = first.await.unwrap();
    assert!(first_reply.is_none(), "pre-empted request must not reply");
}

#[tokio::test]
async fn unsessioned_requests_are_never_preempted() {
    let srv = start_server(StubCompleter::slow(
        one_candidate(),
        Duration::from_millis(100),
    ));

    let a = {
        let sock = srv.sock_path.clone();
        tokio::spawn(async move {
            send_line(&sock, r#"{"request_id": 1, "input": "ls", "cursor_pos": 2}"#).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = send_line(
        &srv.sock_path,
        r#"{"request_id": 2, "input": "ls -l", "cursor_pos": 5}"#,
    )
    .await;

    let a = a.await.unwrap();
    assert!(a.is_some(), "unsessioned request 1 must reply");
    assert!(b.is_some(), "unsessioned request 2 must reply");
}

#[tokio::test]
async fn distinct_sessions_do_not_interfere() {
    let srv = start_server(StubCompleter::slow(
        one_candidate(),
        Duration::from_millis(100),
    ));

    let a = {
        let sock = srv.sock_path.clone();
        tokio::spawn(async move {
            send_line(
                &sock,
                r#"{"request_id": 1, "input": "ls", "cursor_pos": 2, "session_id": "s1"}"#,
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = send_line(
        &srv.sock_path,
        r#"{"request_id": 2, "input": "ls", "cursor_pos": 2, "session_id": "s2"}"#,
    )
    .await;

    assert!(a.await.unwrap().is_some());
    assert!(b.is_some());
}

#[tokio::test]
async fn concurrent_requests_each_get_their_reply() {
    let srv = start_server(StubCompleter::instant(one_candidate()));

    let mut handles = Vec::new();
    for id in 1..=8 {
        let sock = srv.sock_path.clone();
        handles.push(tokio::spawn(async move {
            send_request(
                &sock,
                &serde_json::json!({"request_id": id, "input": "ls", "cursor_pos": 2}),
            )
            .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let resp = handle.await.unwrap();
        assert_eq!(resp.request_id, i as i64 + 1);
    }
}

#[tokio::test]
async fn malformed_request_is_dropped_and_server_survives() {
    let srv = start_server(StubCompleter::instant(one_candidate()));

    let reply = send_line(&srv.sock_path, "{not json at all").await;
    assert!(reply.is_none(), "malformed input must produce no reply");

    // The server still answers well-formed requests afterwards.
    let resp = send_request(
        &srv.sock_path,
        &serde_json::json!({"request_id": 9, "input": "ls", "cursor_pos": 2}),
    )
    .await;
    assert_eq!(resp.request_id, 9);
}

// ─── Context warm-up ──────────────────────────────────────────────────────────

#[tokio::test]
async fn context_warmup_rejects_empty_cwd() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let reply = send_line(&srv.sock_path, r#"{"type": "context", "cwd": ""}"#)
        .await
        .expect("no response");
    let resp: ContextResponse = serde_json::from_str(&reply).unwrap();
    assert!(!resp.ok);
    assert_eq!(resp.error.unwrap().code, "invalid_request");
}

#[tokio::test]
async fn context_warmup_replies_immediately_and_gathers_detached() {
    let stub = StubCompleter::instant(Response::default());
    let srv = start_server(stub.clone());

    let reply = send_line(&srv.sock_path, r#"{"type": "context", "cwd": "/tmp"}"#)
        .await
        .expect("no response");
    let resp: ContextResponse = serde_json::from_str(&reply).unwrap();
    assert!(resp.ok);
    assert!(resp.error.is_none());

    // The gather runs after the reply; give the detached task a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stub.warmed.lock().unwrap().as_slice(), ["/tmp"]);
}

// ─── Config actions ───────────────────────────────────────────────────────────

async fn send_config(sock_path: &std::path::Path, action: &str) -> ConfigResponse {
    let reply = send_line(sock_path, &format!(r#"{{"action": "{action}"}}"#))
        .await
        .expect("no response");
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn config_defaults_action() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let resp = send_config(&srv.sock_path, "defaults").await;
    let cfg = resp.config.expect("defaults present");
    assert_eq!(cfg.embedding.max_history_commands, 3000);
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn config_default_prompt_action() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let resp = send_config(&srv.sock_path, "default_prompt").await;
    let prompt = resp.prompt.expect("prompt present");
    assert!(prompt.contains("auto-completion engine"));
}

#[tokio::test]
async fn config_unknown_action() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let resp = send_config(&srv.sock_path, "bogus").await;
    let err = resp.error.expect("error set");
    assert_eq!(err.code, "unknown_action");
    assert!(err.message.contains("bogus"));
}

#[tokio::test]
async fn config_validate_action() {
    let srv = start_server(StubCompleter::instant(Response::default()));

    let resp = send_config(&srv.sock_path, "validate").await;
    // With a default (or absent) config there is nothing to warn about.
    assert!(resp.error.is_none());
}
