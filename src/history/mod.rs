// SPDX-License-Identifier: MIT
//! Shell-history indexing and semantic search.
//!
//! The indexer locates the most recently written history file, exposes a
//! recency view over it, and — when an embedder is configured — maintains
//! an in-memory nearest-neighbour index of redacted commands refreshed on
//! a TTL by a background task.

pub mod cache;
pub mod embed;
pub mod nn;
pub mod redact;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use embed::Embedder;
use nn::NnGraph;
use redact::redact_command;

/// Commands embedded per HTTP request.
const EMBED_BATCH_SIZE: usize = 32;

/// Tail-read estimate of bytes per history line.
const BYTES_PER_LINE: u64 = 100;

struct IndexInner {
    graph: NnGraph,
    /// hash → redacted command. Keys mirror the graph's node keys.
    commands: HashMap<String, String>,
}

/// Reads shell history and serves recency and similarity queries.
pub struct HistoryIndex {
    history_path: Option<PathBuf>,
    embedder: Option<Embedder>,
    max_history_commands: usize,
    ttl: Duration,
    inner: RwLock<IndexInner>,
    init_tx: watch::Sender<bool>,
    init_rx: watch::Receiver<bool>,
}

impl HistoryIndex {
    /// Create an indexer over the resolved history file. `embedder` may be
    /// `None`, which disables semantic features but keeps the recency view.
    pub fn new(embedder: Option<Embedder>, max_history_commands: usize, ttl: Duration) -> Self {
        Self::with_path(resolve_history_path(), embedder, max_history_commands, ttl)
    }

    fn with_path(
        history_path: Option<PathBuf>,
        embedder: Option<Embedder>,
        max_history_commands: usize,
        ttl: Duration,
    ) -> Self {
        let (init_tx, init_rx) = watch::channel(false);
        Self {
            history_path,
            embedder,
            max_history_commands,
            ttl,
            inner: RwLock::new(IndexInner {
                graph: NnGraph::new(),
                commands: HashMap::new(),
            }),
            init_tx,
            init_rx,
        }
    }

    /// The embedding model in use, or empty when embedding is disabled.
    pub fn embedding_model(&self) -> &str {
        self.embedder.as_ref().map(Embedder::model).unwrap_or("")
    }

    /// Whether the first index build (or a cache load) has completed.
    pub fn init_done(&self) -> bool {
        *self.init_rx.borrow()
    }

    /// Block until the first index build completes, the timeout elapses, or
    /// the request is cancelled. Returns true only on init completion.
    pub async fn wait_init(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let mut rx = self.init_rx.clone();
        tokio::select! {
            res = rx.wait_for(|done| *done) => res.is_ok(),
            _ = tokio::time::sleep(timeout) => false,
            _ = cancel.cancelled() => false,
        }
    }

    fn signal_init(&self) {
        self.init_tx.send_replace(true);
    }

    /// Spawn the background refresher: one index build now, then one per
    /// TTL. The init-done signal fires after the first build returns,
    /// whether or not it succeeded. The caller owns the handle and aborts
    /// it on engine teardown.
    pub fn spawn_refresher(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.index_history().await;
            self.signal_init();

            let mut interval = tokio::time::interval(self.ttl);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.index_history().await;
            }
        })
    }

    /// The last `n` parsed commands from the history file, oldest first.
    pub fn recent_commands(&self, n: usize) -> Vec<String> {
        let Some(path) = &self.history_path else {
            return Vec::new();
        };
        let lines = read_last_lines(path, n);
        let mut cmds: Vec<String> = lines
            .iter()
            .filter_map(|l| parse_history_line(l))
            .collect();
        if cmds.len() > n {
            cmds.drain(..cmds.len() - n);
        }
        cmds
    }

    /// Read, redact, and embed new history commands into the graph.
    ///
    /// Embedding failures are logged and skipped; partial progress is kept.
    /// All nodes gathered in one call are installed under a single write
    /// lock so searches never observe a half-built batch.
    pub async fn index_history(&self) {
        let Some(embedder) = &self.embedder else { return };
        let Some(path) = &self.history_path else { return };

        let cmds = read_tail_commands(path, self.max_history_commands);
        if cmds.is_empty() {
            return;
        }

        // (hash, redacted) pairs not yet in the graph.
        let pending: Vec<(String, String)> = {
            let inner = self.inner.read().expect("history lock");
            cmds.iter()
                .filter_map(|cmd| {
                    let hash = hash_command(cmd);
                    if inner.graph.contains(&hash) {
                        None
                    } else {
                        Some((hash, redact_command(cmd)))
                    }
                })
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        let mut new_nodes: Vec<(String, String, Vec<f32>)> = Vec::with_capacity(pending.len());
        for chunk in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = chunk.iter().map(|(_, r)| r.clone()).collect();
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for ((hash, redacted), vector) in chunk.iter().cloned().zip(vectors) {
                        new_nodes.push((hash, redacted, vector));
                    }
                }
                Err(e) => error!(error = %e, "batch embed failed"),
            }
        }
        if new_nodes.is_empty() {
            return;
        }

        let indexed = new_nodes.len();
        let mut inner = self.inner.write().expect("history lock");
        for (hash, redacted, vector) in new_nodes {
            inner.commands.insert(hash.clone(), redacted);
            inner.graph.insert(hash, vector);
        }
        debug!(indexed, total = inner.graph.len(), "history index updated");
    }

    /// Top-`top_k` redacted commands semantically closest to `query`.
    /// Empty when embedding is disabled, the graph is empty, or `top_k` is 0.
    pub async fn search_relevant(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }
        {
            let inner = self.inner.read().expect("history lock");
            if inner.graph.is_empty() {
                return Ok(Vec::new());
            }
        }

        let query_vec = embedder.embed(&redact_command(query)).await?;

        let inner = self.inner.read().expect("history lock");
        Ok(inner
            .graph
            .search(&query_vec, top_k)
            .into_iter()
            .filter_map(|(key, _)| inner.commands.get(&key).cloned())
            .collect())
    }
}

// ─── History file handling ────────────────────────────────────────────────────

/// Pick the single most recently modified history file.
/// `$HISTFILE` is considered first, then the usual zsh and bash locations.
fn resolve_history_path() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(hf) = std::env::var("HISTFILE") {
        if !hf.is_empty() {
            candidates.push(PathBuf::from(hf));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(&home).join(".zsh_history"));
        candidates.push(PathBuf::from(&home).join(".bash_history"));
    }

    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    for path in candidates {
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        if best.as_ref().map_or(true, |(_, t)| mtime > *t) {
            best = Some((path, mtime));
        }
    }
    best.map(|(p, _)| p)
}

/// Strip shell-specific prefixes from a history line.
///
/// Zsh extended format is `": <timestamp>:<duration>;<command>"`; bash
/// lines are the bare command. Empty lines yield `None`.
fn parse_history_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix(": ") {
        if let Some((_, cmd)) = rest.split_once(';') {
            let cmd = cmd.trim();
            return if cmd.is_empty() {
                None
            } else {
                Some(cmd.to_string())
            };
        }
    }
    Some(line.to_string())
}

/// The last `n` parsed commands, deduplicated by original text.
fn read_tail_commands(path: &Path, n: usize) -> Vec<String> {
    let lines = read_last_lines(path, n);
    let mut seen = std::collections::HashSet::new();
    lines
        .iter()
        .filter_map(|l| parse_history_line(l))
        .filter(|cmd| seen.insert(cmd.clone()))
        .collect()
}

/// Read the last `n` lines of a file, seeking near the end for large
/// files and falling back to a full read when the estimate undershoots.
fn read_last_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(mut f) = File::open(path) else {
        return Vec::new();
    };
    let Ok(meta) = f.metadata() else {
        return Vec::new();
    };

    let estimated = n as u64 * BYTES_PER_LINE;
    if estimated < meta.len() {
        if f.seek(SeekFrom::End(-(estimated as i64))).is_ok() {
            let mut reader = BufReader::new(&mut f);
            let mut partial = String::new();
            let _ = reader.read_line(&mut partial);
            let lines: Vec<String> = reader.lines().map_while(|l| l.ok()).collect();
            if lines.len() >= n {
                return lines[lines.len() - n..].to_vec();
            }
        }
        let _ = f.seek(SeekFrom::Start(0));
    }

    let reader = BufReader::new(f);
    let mut lines: Vec<String> = reader.lines().map_while(|l| l.ok()).collect();
    if lines.len() > n {
        lines.drain(..lines.len() - n);
    }
    lines
}

/// SHA-256 hex digest of the original (pre-redaction) command text, so an
/// identical command deduplicates even if the redaction rules change.
fn hash_command(cmd: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cmd.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
