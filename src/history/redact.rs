// SPDX-License-Identifier: MIT
//! Redaction of sensitive material in shell commands.
//!
//! History commands are sent to remote APIs (for embedding and as prompt
//! context), so every command is rewritten first: references to
//! environment variables and assignment values are hidden unless the
//! variable is on a small allow-list of well-known, non-sensitive names.
//!
//! The primary pass is a quote-aware scan of the command (single-quoted
//! text is literal and preserved; double-quoted text is expanded and
//! redacted). When the scan cannot make sense of the input — an
//! unterminated quote or brace — a regex fallback covers the same three
//! patterns.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Environment variables that are non-sensitive and useful as model context.
static SAFE_VARS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "HOME",
        "USER",
        "PWD",
        "OLDPWD",
        "SHELL",
        "PATH",
        "LANG",
        "TERM",
        "EDITOR",
        "PAGER",
        "HOSTNAME",
        "LOGNAME",
        "TMPDIR",
        "XDG_CONFIG_HOME",
        "XDG_DATA_HOME",
        "XDG_RUNTIME_DIR",
        "DISPLAY",
        "WAYLAND_DISPLAY",
        "HISTFILE",
        "HISTSIZE",
        "SHLVL",
        "COLUMNS",
        "LINES",
        "LC_ALL",
        "LC_CTYPE",
    ]
    .into_iter()
    .collect()
});

/// Shell special parameters (`$?`, `$!`, `$0`…`$9`, …) are never redacted.
fn is_special_param(name: &str) -> bool {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => matches!(c, '?' | '!' | '#' | '@' | '*' | '-' | '$' | '_') || c.is_ascii_digit(),
        _ => false,
    }
}

fn is_safe_name(name: &str) -> bool {
    SAFE_VARS.contains(name) || is_special_param(name)
}

/// Redact sensitive variable references and assignment values in a shell
/// command. Idempotent: redacting an already-redacted command is a no-op.
pub fn redact_command(cmd: &str) -> String {
    match scan_redact(cmd) {
        Some(redacted) => redacted,
        None => regex_redact(cmd),
    }
}

/// Apply [`redact_command`] to each element.
pub fn redact_commands(cmds: &[String]) -> Vec<String> {
    cmds.iter().map(|c| redact_command(c)).collect()
}

// ─── Quote-aware scanner ──────────────────────────────────────────────────────

/// Scan the command, rewriting variable references and assignments.
/// Returns `None` when the input is not well-formed shell (unterminated
/// quote or brace), signalling the caller to use the regex fallback.
fn scan_redact(cmd: &str) -> Option<String> {
    let b = cmd.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    let mut word_start = true;

    while i < b.len() {
        let ch = b[i];
        match ch {
            b'\'' => {
                // Single quotes: contents are literal, copy verbatim.
                let close = find_byte(b, i + 1, b'\'')?;
                out.extend_from_slice(&b[i..=close]);
                i = close + 1;
                word_start = false;
            }
            b'"' => {
                out.push(b'"');
                i += 1;
                loop {
                    if i >= b.len() {
                        return None;
                    }
                    match b[i] {
                        b'\\' if i + 1 < b.len() => {
                            out.extend_from_slice(&b[i..i + 2]);
                            i += 2;
                        }
                        b'"' => {
                            out.push(b'"');
                            i += 1;
                            break;
                        }
                        b'$' => i = emit_expansion(b, i, &mut out)?,
                        c => {
                            out.push(c);
                            i += 1;
                        }
                    }
                }
                word_start = false;
            }
            b'\\' if i + 1 < b.len() => {
                out.extend_from_slice(&b[i..i + 2]);
                i += 2;
                word_start = false;
            }
            b'$' => {
                i = emit_expansion(b, i, &mut out)?;
                word_start = false;
            }
            _ if word_start && (ch == b'_' || ch.is_ascii_alphabetic()) => {
                if let Some(next) = try_assignment(b, i, &mut out)? {
                    i = next;
                } else {
                    out.push(ch);
                    i += 1;
                }
                word_start = false;
            }
            _ => {
                out.push(ch);
                word_start = matches!(ch, b' ' | b'\t' | b';' | b'|' | b'&' | b'(');
                i += 1;
            }
        }
    }

    // Only ASCII was interpreted; everything else was copied byte-for-byte.
    Some(String::from_utf8(out).expect("rewrite preserves UTF-8"))
}

/// Emit a `$…` expansion starting at `b[i] == b'$'`, redacting unsafe
/// variable names. Returns the index after the expansion, or `None` on an
/// unterminated `${`.
fn emit_expansion(b: &[u8], i: usize, out: &mut Vec<u8>) -> Option<usize> {
    debug_assert_eq!(b[i], b'$');
    let next = match b.get(i + 1) {
        Some(&c) => c,
        None => {
            out.push(b'$');
            return Some(i + 1);
        }
    };

    if next == b'{' {
        let close = find_byte(b, i + 2, b'}')?;
        let body = &b[i + 2..close];
        let ident_len = ident_prefix_len(body);
        let ident = std::str::from_utf8(&body[..ident_len]).ok()?;
        out.extend_from_slice(b"${");
        if ident_len > 0 && !is_safe_name(ident) {
            out.extend_from_slice(b"REDACTED");
        } else {
            out.extend_from_slice(&body[..ident_len]);
        }
        out.extend_from_slice(&body[ident_len..]);
        out.push(b'}');
        return Some(close + 1);
    }

    if next == b'_' || next.is_ascii_alphabetic() {
        let end = i + 1 + ident_prefix_len(&b[i + 1..]);
        let name = std::str::from_utf8(&b[i + 1..end]).ok()?;
        if is_safe_name(name) {
            out.extend_from_slice(&b[i..end]);
        } else {
            out.extend_from_slice(b"$REDACTED");
        }
        return Some(end);
    }

    if next.is_ascii_digit() || matches!(next, b'?' | b'!' | b'#' | b'@' | b'*' | b'-' | b'$') {
        out.extend_from_slice(&b[i..i + 2]);
        return Some(i + 2);
    }

    out.push(b'$');
    Some(i + 1)
}

/// At a word start, recognise `NAME=value` and redact the value when NAME
/// is not safe. Returns `Ok(Some(next_index))` when an assignment was
/// consumed, `Ok(None)` when the word is not an assignment, and `None`
/// (the outer option) on a malformed quoted value.
#[allow(clippy::type_complexity)]
fn try_assignment(b: &[u8], i: usize, out: &mut Vec<u8>) -> Option<Option<usize>> {
    let name_len = ident_prefix_len(&b[i..]);
    let eq = i + name_len;
    if name_len == 0 || b.get(eq) != Some(&b'=') {
        return Some(None);
    }
    let name = std::str::from_utf8(&b[i..eq]).ok()?;

    if SAFE_VARS.contains(name) {
        // Safe assignment: emit NAME= and let the scanner continue through
        // the value so any references inside it are still redacted.
        out.extend_from_slice(&b[i..=eq]);
        return Some(Some(eq + 1));
    }

    // Unsafe assignment: swallow the value up to unquoted whitespace.
    let mut j = eq + 1;
    while j < b.len() {
        match b[j] {
            b' ' | b'\t' => break,
            b'\'' => j = find_byte(b, j + 1, b'\'')? + 1,
            b'"' => j = find_dquote_close(b, j + 1)? + 1,
            b'\\' if j + 1 < b.len() => j += 2,
            _ => j += 1,
        }
    }
    out.extend_from_slice(&b[i..=eq]);
    out.extend_from_slice(b"***");
    Some(Some(j))
}

fn ident_prefix_len(b: &[u8]) -> usize {
    let mut n = 0;
    while n < b.len() && (b[n] == b'_' || b[n].is_ascii_alphanumeric()) {
        n += 1;
    }
    // Identifiers cannot start with a digit.
    if n > 0 && b[0].is_ascii_digit() {
        return 0;
    }
    n
}

fn find_byte(b: &[u8], from: usize, target: u8) -> Option<usize> {
    b[from..].iter().position(|&c| c == target).map(|p| from + p)
}

/// Find the closing `"` starting at `from`, honouring backslash escapes.
fn find_dquote_close(b: &[u8], from: usize) -> Option<usize> {
    let mut j = from;
    while j < b.len() {
        match b[j] {
            b'\\' if j + 1 < b.len() => j += 2,
            b'"' => return Some(j),
            _ => j += 1,
        }
    }
    None
}

// ─── Regex fallback ───────────────────────────────────────────────────────────

static RE_BRACE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("regex: brace var"));
static RE_SIMPLE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("regex: simple var"));
static RE_ASSIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)=(\S+)").expect("regex: assignment"));

/// Fallback for commands the scanner rejects. Covers the same three
/// patterns without quote awareness.
fn regex_redact(cmd: &str) -> String {
    let cmd = RE_BRACE_VAR.replace_all(cmd, |caps: &regex::Captures| {
        let name = &caps[1];
        if is_safe_name(name) {
            caps[0].to_string()
        } else {
            "${REDACTED}".to_string()
        }
    });

    let cmd = RE_SIMPLE_VAR.replace_all(&cmd, |caps: &regex::Captures| {
        let name = &caps[1];
        if name == "REDACTED" || is_safe_name(name) {
            caps[0].to_string()
        } else {
            "$REDACTED".to_string()
        }
    });

    let cmd = RE_ASSIGN.replace_all(&cmd, |caps: &regex::Captures| {
        let name = &caps[1];
        if SAFE_VARS.contains(name) {
            caps[0].to_string()
        } else {
            format!("{name}=***")
        }
    });

    cmd.into_owned()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
