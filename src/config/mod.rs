// SPDX-License-Identifier: MIT
//! Configuration loading and resolution.
//!
//! The config file lives at `<config dir>/config.json`; a missing file
//! yields the embedded defaults. For each API setting an `ASHLET_*`
//! environment variable overrides the file value, which lets shell users
//! try the daemon without writing a config at all.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Embedded default configuration, parsed lazily on first use.
pub const DEFAULT_CONFIG_JSON: &str = include_str!("../assets/default_config.json");

/// Embedded default system-prompt template.
pub const DEFAULT_PROMPT: &str = include_str!("../assets/default_prompt.md");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Wire shape: `"responses"` or `"chat_completions"`.
    #[serde(default)]
    pub api_type: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// When true, raw recent history is never sent to the model; only
    /// embedding-matched commands are.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_raw_history: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub dimensions: u32,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub ttl_minutes: u64,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub max_history_commands: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openrouter: Option<bool>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}
fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}
fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

// ─── Paths ────────────────────────────────────────────────────────────────────

/// Config directory resolution:
/// `$ASHLET_CONFIG_DIR` → `$XDG_CONFIG_HOME/ashlet` → `~/.config/ashlet`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ASHLET_CONFIG_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("ashlet");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("ashlet");
    }
    PathBuf::from("/tmp/ashlet-config")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Path of the user-supplied prompt template, if any.
pub fn prompt_path() -> PathBuf {
    config_dir().join("prompt.md")
}

/// Path of the single-file embedding disk cache.
pub fn embedding_cache_path() -> PathBuf {
    config_dir().join("embedding_cache.json")
}

// ─── Loading ──────────────────────────────────────────────────────────────────

/// The embedded default configuration.
pub fn default_config() -> Config {
    serde_json::from_str(DEFAULT_CONFIG_JSON).expect("embedded default_config.json is valid")
}

/// Load the configuration from disk, falling back to defaults for a missing
/// file and for individually unset fields.
pub fn load() -> anyhow::Result<Config> {
    let path = config_path();
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(default_config()),
        Err(e) => return Err(e.into()),
    };

    let mut cfg: Config = serde_json::from_str(&data)?;
    let defaults = default_config();

    if cfg.generation.base_url.is_empty() {
        cfg.generation.base_url = defaults.generation.base_url;
    }
    if cfg.generation.api_type.is_empty() {
        cfg.generation.api_type = defaults.generation.api_type;
    }
    if cfg.generation.model.is_empty() {
        cfg.generation.model = defaults.generation.model;
    }
    if cfg.generation.max_tokens == 0 {
        cfg.generation.max_tokens = defaults.generation.max_tokens;
    }
    if cfg.generation.temperature == 0.0 {
        cfg.generation.temperature = defaults.generation.temperature;
    }
    if cfg.generation.no_raw_history.is_none() {
        cfg.generation.no_raw_history = defaults.generation.no_raw_history;
    }
    if cfg.embedding.model.is_empty() {
        cfg.embedding.model = defaults.embedding.model;
    }
    if cfg.embedding.dimensions == 0 {
        cfg.embedding.dimensions = defaults.embedding.dimensions;
    }
    if cfg.embedding.ttl_minutes == 0 {
        cfg.embedding.ttl_minutes = defaults.embedding.ttl_minutes;
    }
    if cfg.embedding.max_history_commands == 0 {
        cfg.embedding.max_history_commands = defaults.embedding.max_history_commands;
    }
    if cfg.telemetry.openrouter.is_none() {
        cfg.telemetry.openrouter = defaults.telemetry.openrouter;
    }

    Ok(cfg)
}

/// Check the configuration for likely misconfigurations and return warnings.
pub fn validate(cfg: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg.generation.no_raw_history == Some(true) && !embedding_enabled(cfg) {
        warnings.push(
            "no_raw_history is enabled but embedding API key is not configured; \
             history context will be unavailable"
                .to_string(),
        );
    }
    warnings
}

// ─── Env-overridable resolution ───────────────────────────────────────────────

fn env_or(var: &str, fallback: &str) -> String {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

pub fn resolve_generation_base_url(cfg: &Config) -> String {
    env_or("ASHLET_GENERATION_API_BASE_URL", &cfg.generation.base_url)
}

pub fn resolve_generation_api_key(cfg: &Config) -> String {
    env_or("ASHLET_GENERATION_API_KEY", &cfg.generation.api_key)
}

pub fn resolve_generation_model(cfg: &Config) -> String {
    env_or("ASHLET_GENERATION_MODEL", &cfg.generation.model)
}

pub fn resolve_embedding_base_url(cfg: &Config) -> String {
    env_or("ASHLET_EMBEDDING_API_BASE_URL", &cfg.embedding.base_url)
}

pub fn resolve_embedding_api_key(cfg: &Config) -> String {
    env_or("ASHLET_EMBEDDING_API_KEY", &cfg.embedding.api_key)
}

pub fn resolve_embedding_model(cfg: &Config) -> String {
    env_or("ASHLET_EMBEDDING_MODEL", &cfg.embedding.model)
}

/// Embedding is enabled iff both the base URL and the API key resolve
/// non-empty.
pub fn embedding_enabled(cfg: &Config) -> bool {
    !resolve_embedding_base_url(cfg).is_empty() && !resolve_embedding_api_key(cfg).is_empty()
}

/// Whether OpenRouter attribution headers should be attached. Defaults on.
pub fn openrouter_telemetry_enabled(cfg: &Config) -> bool {
    cfg.telemetry.openrouter.unwrap_or(true)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
