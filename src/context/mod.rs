// SPDX-License-Identifier: MIT
//! Directory-context cache.
//!
//! Maps an absolute path to a bundle of cheap facts about it — directory
//! listing, git state, detected package manager, project-manifest
//! summaries — gathered by short-lived external tools under a hard
//! deadline and cached with a TTL. The shell client warms an entry on
//! every directory change, so completion requests usually hit the cache.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

const DIR_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const GATHER_TIMEOUT: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Byte cap for every string field of a [`DirContext`].
const FIELD_MAX_BYTES: usize = 512;

/// Byte cap for each manifest summary.
const MANIFEST_MAX_BYTES: usize = 512;

/// Gathered context for one directory.
#[derive(Debug, Clone, Default)]
pub struct DirContext {
    pub cwd_path: String,
    /// Space-joined `ls -A` output, truncated.
    pub cwd_listing: String,
    /// Manifest label → extracted summary.
    pub cwd_manifests: BTreeMap<String, String>,
    /// Detected from lockfiles: pnpm, yarn, bun, npm, cargo, or empty.
    pub package_manager: String,
    pub git_root: String,
    pub git_root_listing: String,
    /// Single line of status-tagged staged files (`M:a A:b R:old→new`).
    pub git_staged_files: String,
    pub git_manifests: BTreeMap<String, String>,
}

struct CacheSlot {
    ctx: Arc<DirContext>,
    expires_at: Instant,
}

/// TTL cache of [`DirContext`] entries keyed by absolute path.
///
/// Reads may run concurrently with a gather; a gather replaces any prior
/// entry unconditionally, last writer wins. Hits do not refresh the TTL.
pub struct DirCache {
    entries: Arc<RwLock<HashMap<String, CacheSlot>>>,
    ttl: Duration,
    sweeper: tokio::task::JoinHandle<()>,
}

impl DirCache {
    pub fn new() -> Self {
        Self::with_ttl(DIR_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let entries: Arc<RwLock<HashMap<String, CacheSlot>>> = Arc::default();
        let sweeper = {
            let entries = Arc::clone(&entries);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SWEEP_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let now = Instant::now();
                    entries
                        .write()
                        .expect("dir cache lock")
                        .retain(|_, slot| slot.expires_at > now);
                }
            })
        };
        Self {
            entries,
            ttl,
            sweeper,
        }
    }

    /// Stop the background sweeper.
    pub fn close(&self) {
        self.sweeper.abort();
    }

    /// The cached context for `path`, or `None` on miss or expiry.
    pub fn get(&self, path: &str) -> Option<Arc<DirContext>> {
        let entries = self.entries.read().expect("dir cache lock");
        let slot = entries.get(path)?;
        if slot.expires_at <= Instant::now() {
            return None;
        }
        Some(Arc::clone(&slot.ctx))
    }

    /// Build a fresh entry for `cwd` and install it.
    ///
    /// The three primary fetchers run in parallel; every external tool is
    /// bounded by the shared 5 s deadline. Whatever finished in time goes
    /// into the entry — a slow tool degrades the entry, never the daemon.
    pub async fn gather(&self, cwd: &str) {
        let deadline = Instant::now() + GATHER_TIMEOUT;

        let (listing_out, git_root_out, staged_out) = tokio::join!(
            run_tool(cwd, "ls", &["-A"], deadline),
            run_tool(cwd, "git", &["rev-parse", "--show-toplevel"], deadline),
            run_tool(cwd, "git", &["diff", "--cached", "--name-status"], deadline),
        );

        let mut entry = DirContext {
            cwd_path: cwd.to_string(),
            cwd_listing: truncate(&to_single_line(&listing_out), FIELD_MAX_BYTES),
            git_root: git_root_out.trim().to_string(),
            git_staged_files: parse_staged_files(staged_out.trim(), FIELD_MAX_BYTES),
            ..DirContext::default()
        };

        if !entry.git_root.is_empty() && entry.git_root != cwd {
            let out = run_tool(&entry.git_root, "ls", &["-A"], deadline).await;
            entry.git_root_listing = truncate(&to_single_line(&out), FIELD_MAX_BYTES);
            gather_manifests(Path::new(&entry.git_root), &mut entry.git_manifests);
        }

        gather_manifests(Path::new(cwd), &mut entry.cwd_manifests);
        entry.package_manager = detect_package_manager(cwd, &entry.git_root);

        let slot = CacheSlot {
            ctx: Arc::new(entry),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .write()
            .expect("dir cache lock")
            .insert(cwd.to_string(), slot);

        debug!(path = %cwd, "gathered directory context");
    }
}

/// Run an external tool in `dir` and return its stdout, or empty on any
/// failure or once the shared deadline has passed.
async fn run_tool(dir: &str, name: &str, args: &[&str], deadline: Instant) -> String {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return String::new();
    }

    let fut = tokio::process::Command::new(name)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(remaining, fut).await {
        Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
        _ => String::new(),
    }
}

// ─── Manifest extraction ──────────────────────────────────────────────────────

const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "Makefile",
    "justfile",
    "Cargo.toml",
    "pyproject.toml",
    "go.mod",
    "CMakeLists.txt",
];

fn gather_manifests(dir: &Path, out: &mut BTreeMap<String, String>) {
    for name in MANIFEST_FILES {
        let path = dir.join(name);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };

        let extracted = match *name {
            "package.json" => extract_package_json_scripts(&content),
            "Makefile" => extract_makefile_targets(&content),
            "justfile" => extract_justfile_recipes(&content),
            "Cargo.toml" => extract_cargo_info(&content),
            "go.mod" => extract_go_mod_info(&content),
            "pyproject.toml" => extract_pyproject_info(&content),
            "CMakeLists.txt" => extract_cmake_info(&content),
            _ => String::new(),
        };

        if !extracted.is_empty() {
            let label = match *name {
                "package.json" => "package.json scripts",
                "Makefile" => "Makefile targets",
                "justfile" => "justfile recipes",
                other => other,
            };
            out.insert(label.to_string(), extracted);
        }
    }
}

/// `scripts` entries from package.json as comma-joined `key: value` pairs.
fn extract_package_json_scripts(content: &str) -> String {
    let Ok(pkg) = serde_json::from_str::<serde_json::Value>(content) else {
        return String::new();
    };
    let Some(scripts) = pkg.get("scripts").and_then(|s| s.as_object()) else {
        return String::new();
    };
    let parts: Vec<String> = scripts
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}: {v}")))
        .collect();
    truncate(&parts.join(", "), MANIFEST_MAX_BYTES)
}

/// Target names from a Makefile, skipping recipes, comments, `.PHONY`-style
/// lines, assignments, and targets containing `$` or `%`.
fn extract_makefile_targets(content: &str) -> String {
    let mut targets = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for line in content.lines() {
        let bytes = line.as_bytes();
        if bytes.is_empty() || matches!(bytes[0], b'\t' | b'#' | b'.') {
            continue;
        }
        let Some(idx) = line.find(':') else { continue };
        if idx == 0 || line.as_bytes().get(idx + 1) == Some(&b'=') {
            continue;
        }
        let target = line[..idx].trim();
        if target.contains(['$', '%']) {
            continue;
        }
        if seen.insert(target.to_string()) {
            targets.push(target.to_string());
        }
    }
    truncate(&targets.join(", "), MANIFEST_MAX_BYTES)
}

/// Recipe names from a justfile, skipping comments, indented bodies, and
/// `:=` assignments.
fn extract_justfile_recipes(content: &str) -> String {
    let mut recipes = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for line in content.lines() {
        let bytes = line.as_bytes();
        if bytes.is_empty() || matches!(bytes[0], b'#' | b' ' | b'\t') {
            continue;
        }
        if line.contains(":=") {
            continue;
        }
        let Some(idx) = line.find(':') else { continue };
        if idx == 0 {
            continue;
        }
        let recipe = line[..idx].trim();
        if recipe.contains(['$', '{', '}', '(', ')']) {
            continue;
        }
        if seen.insert(recipe.to_string()) {
            recipes.push(recipe.to_string());
        }
    }
    truncate(&recipes.join(", "), MANIFEST_MAX_BYTES)
}

/// `name = "…"` for `[package]` and each `[[bin]]` in Cargo.toml.
fn extract_cargo_info(content: &str) -> String {
    let Ok(value) = content.parse::<toml::Value>() else {
        return String::new();
    };
    let mut parts = Vec::new();
    if let Some(name) = value
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
    {
        parts.push(format!("name = \"{name}\""));
    }
    if let Some(bins) = value.get("bin").and_then(|b| b.as_array()) {
        for bin in bins {
            if let Some(name) = bin.get("name").and_then(|n| n.as_str()) {
                parts.push(format!("name = \"{name}\""));
            }
        }
    }
    truncate(&parts.join(", "), MANIFEST_MAX_BYTES)
}

/// The first `module` and `go` directives from go.mod.
fn extract_go_mod_info(content: &str) -> String {
    let mut module = None;
    let mut go_version = None;
    for line in content.lines() {
        let line = line.trim();
        if module.is_none() && line.starts_with("module ") {
            module = Some(line.to_string());
        } else if go_version.is_none() && line.starts_with("go ") && !line.starts_with("go.") {
            go_version = Some(line.to_string());
        }
    }
    let parts: Vec<String> = [module, go_version].into_iter().flatten().collect();
    truncate(&parts.join(", "), MANIFEST_MAX_BYTES)
}

/// `name = "…"` from `[project]` in pyproject.toml.
fn extract_pyproject_info(content: &str) -> String {
    let Ok(value) = content.parse::<toml::Value>() else {
        return String::new();
    };
    match value
        .get("project")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
    {
        Some(name) => format!("name = \"{name}\""),
        None => String::new(),
    }
}

/// The first `project(...)` line of CMakeLists.txt.
fn extract_cmake_info(content: &str) -> String {
    for line in content.lines() {
        let line = line.trim();
        let lower = line.to_lowercase();
        if lower.starts_with("project(") || lower.starts_with("project (") {
            return truncate(line, MANIFEST_MAX_BYTES);
        }
    }
    String::new()
}

// ─── Package manager detection ────────────────────────────────────────────────

/// Lockfile → package manager, ordered by priority.
const LOCKFILES: &[(&str, &str)] = &[
    ("pnpm-lock.yaml", "pnpm"),
    ("yarn.lock", "yarn"),
    ("bun.lockb", "bun"),
    ("package-lock.json", "npm"),
    ("Cargo.lock", "cargo"),
];

/// Detect the package manager from lockfile presence, checking `cwd` first
/// and the git root second.
fn detect_package_manager(cwd: &str, git_root: &str) -> String {
    for dir in [cwd, git_root] {
        if dir.is_empty() {
            continue;
        }
        for (file, manager) in LOCKFILES {
            if Path::new(dir).join(file).is_file() {
                return (*manager).to_string();
            }
        }
    }
    String::new()
}

// ─── String helpers ───────────────────────────────────────────────────────────

static RE_STATUS_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]\d*$").expect("regex: status"));

/// Parse `git diff --cached --name-status` output into a single line of
/// status-tagged paths. Rename/copy scores collapse to their letter and
/// render as `R:old→new`.
fn parse_staged_files(s: &str, max_bytes: usize) -> String {
    if s.is_empty() {
        return String::new();
    }
    let mut parts = Vec::new();
    for line in s.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 || !RE_STATUS_LINE.is_match(fields[0]) {
            continue;
        }
        let status = &fields[0][..1];
        if (status == "R" || status == "C") && fields.len() >= 3 {
            parts.push(format!("{status}:{}→{}", fields[1], fields[2]));
        } else {
            parts.push(format!("{status}:{}", fields[1]));
        }
    }
    truncate(&parts.join(" "), max_bytes)
}

/// Collapse any run of whitespace (including newlines) to single spaces.
fn to_single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_bytes`, appending `...` when cut.
fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

// ─── Tests ────────────────────────────────────────────────────────────────────
