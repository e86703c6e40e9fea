// SPDX-License-Identifier: MIT
//! The completion engine.
//!
//! Owns one generator client, one directory-context cache, and one history
//! index, and orchestrates a completion request end to end: gather
//! context, render the prompt, call the model, parse and rank candidates.

pub mod generator;
pub mod parse;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{self, Config};
use crate::context::DirCache;
use crate::history::embed::Embedder;
use crate::history::HistoryIndex;
use crate::protocol::{self, Request, Response};

use generator::Generator;

/// Used when the request does not specify a candidate limit.
pub const DEFAULT_MAX_CANDIDATES: usize = 4;

/// Commands requested from recency and similarity views.
const HISTORY_CONTEXT_SIZE: usize = 20;

/// How long a gated request waits for the first index build.
const INIT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can serve completion requests. The IPC server talks to
/// this trait so tests can drop in a stub engine.
#[async_trait::async_trait]
pub trait Completer: Send + Sync + 'static {
    /// Process one request. Returns `None` when the request was cancelled
    /// mid-flight, in which case no reply must be written.
    async fn complete(&self, req: Request, cancel: &CancellationToken) -> Option<Response>;

    /// Pre-populate the directory-context cache for `cwd`.
    async fn warm_context(&self, cwd: &str);

    /// Release background tasks and flush opportunistic caches.
    fn close(&self);
}

pub struct Engine {
    generator: Option<Generator>,
    dir_cache: DirCache,
    history: Arc<HistoryIndex>,
    custom_prompt: String,
    embedding_enabled: bool,
    no_raw_history: bool,
    refresher: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    /// Build an engine from the on-disk configuration. Must be called from
    /// within a tokio runtime (background tasks are spawned here).
    pub fn new() -> Self {
        let cfg = config::load().unwrap_or_else(|e| {
            warn!(error = %e, "failed to load config, using defaults");
            config::default_config()
        });
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: Config) -> Self {
        let custom_prompt = std::fs::read_to_string(config::prompt_path()).unwrap_or_default();

        let embedding_enabled = config::embedding_enabled(&cfg);
        let embedder = embedding_enabled.then(|| {
            Embedder::new(
                config::resolve_embedding_base_url(&cfg),
                config::resolve_embedding_api_key(&cfg),
                config::resolve_embedding_model(&cfg),
            )
        });

        let gen_api_key = config::resolve_generation_api_key(&cfg);
        let generator = if gen_api_key.is_empty() {
            warn!("generation API key not configured");
            None
        } else {
            Some(Generator::new(
                config::resolve_generation_base_url(&cfg),
                gen_api_key,
                config::resolve_generation_model(&cfg),
                cfg.generation.api_type.clone(),
                cfg.generation.max_tokens,
                cfg.generation.temperature,
                cfg.generation.stop.clone(),
                config::openrouter_telemetry_enabled(&cfg),
            ))
        };

        let history = Arc::new(HistoryIndex::new(
            embedder,
            cfg.embedding.max_history_commands.max(1),
            Duration::from_secs(cfg.embedding.ttl_minutes.max(1) * 60),
        ));

        let refresher = if embedding_enabled {
            let cache_path = config::embedding_cache_path();
            if let Err(e) = history.load_cache(&cache_path, history.embedding_model()) {
                debug!(error = %e, "no usable embedding cache");
            }
            Some(Arc::clone(&history).spawn_refresher())
        } else {
            None
        };

        Self {
            generator,
            dir_cache: DirCache::new(),
            history,
            custom_prompt,
            embedding_enabled,
            no_raw_history: cfg.generation.no_raw_history.unwrap_or(false),
            refresher,
        }
    }

    /// History context per the raw-history policy:
    /// with `no_raw_history` set, raw recent commands never leave the
    /// process — the request blocks (bounded) on the index and uses only
    /// semantic matches; otherwise recent commands are always included
    /// and semantic matches are added opportunistically once the index
    /// is ready.
    async fn gather_history(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> (Vec<String>, Vec<String>) {
        if self.no_raw_history {
            if !self.embedding_enabled {
                // Misconfiguration surfaced by `validate`; the gate wins.
                return (Vec::new(), Vec::new());
            }
            if !self.history.wait_init(INIT_WAIT_TIMEOUT, cancel).await {
                warn!("history index not ready, no history context available");
                return (Vec::new(), Vec::new());
            }
            let relevant = self.search_relevant(input).await;
            return (Vec::new(), relevant);
        }

        let recent = self.history.recent_commands(HISTORY_CONTEXT_SIZE);
        let relevant = if self.embedding_enabled && self.history.init_done() {
            self.search_relevant(input).await
        } else {
            Vec::new()
        };
        (recent, relevant)
    }

    async fn search_relevant(&self, input: &str) -> Vec<String> {
        match self.history.search_relevant(input, HISTORY_CONTEXT_SIZE).await {
            Ok(cmds) => cmds,
            Err(e) => {
                error!(error = %e, "history search failed");
                Vec::new()
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Completer for Engine {
    async fn complete(&self, req: Request, cancel: &CancellationToken) -> Option<Response> {
        // The shell client terminates the buffer and cwd with newlines.
        let input = req.input.trim_end_matches('\n');
        let cwd = req.cwd.trim_end_matches('\n');

        let mut cursor_pos = req.cursor_pos.clamp(0, input.len() as i64) as usize;
        while !input.is_char_boundary(cursor_pos) {
            cursor_pos -= 1;
        }

        if input.trim().is_empty() {
            return Some(Response::empty());
        }

        let Some(generator) = &self.generator else {
            return Some(Response::from_error(
                protocol::NOT_CONFIGURED,
                "generation API key not configured; set ASHLET_GENERATION_API_KEY or edit config.json",
            ));
        };

        let (recent, relevant) = self.gather_history(input, cancel).await;
        debug!(
            recent = recent.len(),
            relevant = relevant.len(),
            "context gathered"
        );

        if cancel.is_cancelled() {
            return None;
        }

        let max_candidates = if req.max_candidates > 0 {
            req.max_candidates as usize
        } else {
            DEFAULT_MAX_CANDIDATES
        };

        let dir_ctx = self.dir_cache.get(cwd);

        let system_prompt = prompt::build_system_prompt(&self.custom_prompt, max_candidates);
        let user_message = prompt::build_user_message(
            input,
            cursor_pos,
            cwd,
            dir_ctx.as_deref(),
            &recent,
            &relevant,
        );
        debug!(system = %system_prompt, user = %user_message, "prompt");

        let output = tokio::select! {
            result = generator.generate(&system_prompt, &user_message) => match result {
                Ok(output) => output,
                Err(e) => {
                    error!(error = %e, "generation error");
                    return Some(Response::from_error(protocol::API_ERROR, e.to_string()));
                }
            },
            _ = cancel.cancelled() => return None,
        };

        let input = input.trim_start_matches([' ', '\t']);
        let mut candidates = parse::parse_candidates(&output, input, max_candidates);
        candidates = parse::filter_candidate_quotes(candidates, input);
        parse::sort_candidates(&mut candidates, input);

        Some(Response {
            candidates,
            ..Response::default()
        })
    }

    async fn warm_context(&self, cwd: &str) {
        self.dir_cache.gather(cwd).await;
    }

    fn close(&self) {
        if let Some(handle) = &self.refresher {
            handle.abort();
        }
        if self.embedding_enabled {
            let path = config::embedding_cache_path();
            if let Err(e) = self.history.save_cache(&path, self.history.embedding_model()) {
                warn!(error = %e, "failed to write embedding cache");
            }
        }
        self.dir_cache.close();
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_engine() -> Engine {
        // No generator, no embedder: exercises the not_configured path and
        // the history gate without touching the network.
        Engine {
            generator: None,
            dir_cache: DirCache::new(),
            history: Arc::new(HistoryIndex::new(None, 3000, Duration::from_secs(3600))),
            custom_prompt: String::new(),
            embedding_enabled: false,
            no_raw_history: false,
            refresher: None,
        }
    }

    #[tokio::test]
    async fn not_configured_without_api_key() {
        let engine = bare_engine();
        let req = Request {
            input: "git st".into(),
            cursor_pos: 6,
            ..Request::default()
        };
        let resp = engine
            .complete(req, &CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.candidates.is_empty());
        let err = resp.error.expect("error set");
        assert_eq!(err.code, protocol::NOT_CONFIGURED);
        engine.close();
    }

    #[tokio::test]
    async fn empty_input_short_circuits_before_key_check() {
        let engine = bare_engine();
        for input in ["", "  \n"] {
            let req = Request {
                input: input.into(),
                cursor_pos: 99,
                ..Request::default()
            };
            let resp = engine
                .complete(req, &CancellationToken::new())
                .await
                .unwrap();
            assert!(resp.candidates.is_empty(), "input: {input:?}");
            assert!(resp.error.is_none(), "input: {input:?}");
        }
        engine.close();
    }

    #[tokio::test]
    async fn gated_history_without_embedding_is_silent() {
        let mut engine = bare_engine();
        engine.no_raw_history = true;

        let (recent, relevant) = engine
            .gather_history("git ", &CancellationToken::new())
            .await;
        assert!(recent.is_empty());
        assert!(relevant.is_empty());
        engine.close();
    }

    #[tokio::test]
    async fn ungated_history_skips_search_without_embedder() {
        let engine = bare_engine();
        let (_, relevant) = engine
            .gather_history("git ", &CancellationToken::new())
            .await;
        assert!(relevant.is_empty());
        engine.close();
    }
}
