// SPDX-License-Identifier: MIT
//! Parsing and ranking of model output into completion candidates.
//!
//! The model is asked to wrap each suggestion in `<candidate>` tags with
//! `<command>` children; replies that ignore the format fall back to a
//! line-based parse. Candidates then pass through quote filtering and a
//! re-ranking step that favours suggestions extending quoted content.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::Candidate;

/// Caret sentinel the model places inside `<command>` text.
pub const CURSOR_MARKER: &str = "█";

static RE_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<candidate[^>]*\btype="(replace|append)"[^>]*>(.*?)</candidate>"#)
        .expect("regex: candidate block")
});
static RE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<command\s*>([^<]*)</command>").expect("regex: command tag"));

struct CandidateBlock<'a> {
    kind: &'a str,
    content: &'a str,
}

struct CommandTag {
    text: String,
    /// Byte offset of the cursor sentinel within the raw tag text, after
    /// removing the sentinel itself. `None` when no sentinel was present.
    cursor: Option<usize>,
}

fn parse_candidate_blocks(output: &str) -> Vec<CandidateBlock<'_>> {
    RE_CANDIDATE
        .captures_iter(output)
        .map(|c| CandidateBlock {
            kind: c.get(1).map_or("", |m| m.as_str()),
            content: c.get(2).map_or("", |m| m.as_str()),
        })
        .collect()
}

fn parse_commands(content: &str) -> Vec<CommandTag> {
    RE_COMMAND
        .captures_iter(content)
        .filter_map(|c| {
            let mut raw = c.get(1).map_or("", |m| m.as_str()).to_string();
            let cursor = raw.find(CURSOR_MARKER);
            if let Some(idx) = cursor {
                raw.replace_range(idx..idx + CURSOR_MARKER.len(), "");
            }
            let text = collapse_spaces(raw.trim());
            if text.is_empty() {
                None
            } else {
                Some(CommandTag { text, cursor })
            }
        })
        .collect()
}

/// The separator inserted between existing input and appended commands.
/// An input already ending in a chain operator only needs a space (or
/// nothing when one is already there); otherwise ` && `.
pub fn chain_separator(input: &str) -> &'static str {
    let trimmed = input.trim_end_matches([' ', '\t']);
    for op in ["&&", "||", "|", ";"] {
        if trimmed.ends_with(op) {
            return if input.ends_with(' ') { "" } else { " " };
        }
    }
    " && "
}

/// Parse a model reply into at most `max` candidates with position-based
/// confidences assigned.
pub fn parse_candidates(output: &str, input: &str, max: usize) -> Vec<Candidate> {
    let blocks = parse_candidate_blocks(output);
    if blocks.is_empty() {
        return parse_candidates_fallback(output, input, max);
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for block in blocks {
        if candidates.len() >= max {
            break;
        }

        let commands = parse_commands(block.content);
        if commands.is_empty() {
            continue;
        }

        let joined = commands
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" && ");

        let (completion, cursor_offset) = if block.kind == "append" {
            let sep = chain_separator(input);
            (format!("{input}{sep}{joined}"), input.len() + sep.len())
        } else {
            (joined, 0)
        };

        let completion = collapse_spaces(completion.trim());
        if completion.is_empty() || !seen.insert(completion.clone()) {
            continue;
        }

        // Only the first sentinel-carrying command contributes the cursor.
        let cursor_pos = commands
            .iter()
            .find_map(|c| c.cursor)
            .map(|c| (c + cursor_offset).min(completion.len()));

        candidates.push(Candidate {
            completion,
            cursor_pos,
            confidence: 0.0,
        });
    }

    assign_confidences(&mut candidates);
    candidates
}

/// Line-based fallback for replies without candidate tags. Skips prompt
/// delimiters and stray tags; accepts a line only when it shares its first
/// word with the input (or the input is empty).
fn parse_candidates_fallback(output: &str, input: &str, max: usize) -> Vec<Candidate> {
    let trimmed_input = input.trim();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for raw_line in output.trim().lines() {
        if candidates.len() >= max {
            break;
        }
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("$ ") || line.starts_with('<') {
            continue;
        }

        let candidate = line.trim_matches('`').trim();
        if !trimmed_input.is_empty() && first_word(candidate) != first_word(trimmed_input) {
            continue;
        }

        let command = collapse_spaces(candidate);
        if command.is_empty() || !seen.insert(command.clone()) {
            continue;
        }

        candidates.push(Candidate {
            completion: command,
            cursor_pos: None,
            confidence: 0.0,
        });
    }

    assign_confidences(&mut candidates);
    candidates
}

/// Position-based confidence: `max(0.10, 0.95 − 0.15·i)`.
pub fn assign_confidences(candidates: &mut [Candidate]) {
    for (i, c) in candidates.iter_mut().enumerate() {
        c.confidence = (0.95 - 0.15 * i as f64).max(0.10);
    }
}

fn collapse_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch == ' ' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out
}

fn first_word(s: &str) -> &str {
    let s = s.trim();
    s.split_once(' ').map_or(s, |(w, _)| w)
}

// ─── Quote filtering ──────────────────────────────────────────────────────────

/// Empty every matched quote pair while keeping the quote characters,
/// honouring backslash escapes inside quoted text.
pub fn filter_quote_content(cmd: &str) -> String {
    let b = cmd.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        let ch = b[i];
        if ch == b'"' || ch == b'\'' {
            let quote = ch;
            out.push(quote);
            i += 1;
            while i < b.len() {
                if b[i] == b'\\' && i + 1 < b.len() {
                    i += 2;
                    continue;
                }
                if b[i] == quote {
                    break;
                }
                i += 1;
            }
            if i < b.len() {
                out.push(quote);
                i += 1;
            }
        } else {
            out.push(ch);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// [`filter_quote_content`] over each element, deduplicated.
pub fn filter_quote_content_slice(cmds: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    cmds.iter()
        .map(|c| filter_quote_content(c))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Byte index of the last matched closing quote, honouring escapes.
pub fn find_last_closing_quote_pos(s: &str) -> Option<usize> {
    let b = s.as_bytes();
    let mut last_close = None;
    let mut i = 0;
    while i < b.len() {
        let ch = b[i];
        if ch == b'"' || ch == b'\'' {
            let quote = ch;
            i += 1;
            while i < b.len() {
                if b[i] == b'\\' && i + 1 < b.len() {
                    i += 2;
                    continue;
                }
                if b[i] == quote {
                    last_close = Some(i);
                    break;
                }
                i += 1;
            }
        }
        i += 1;
    }
    last_close
}

/// Post-process candidates against the input's quoting.
///
/// When the input carries no quotes, quoted content in candidates is
/// emptied (it is model-invented anyway) and duplicates collapse. In
/// either case a candidate without an explicit cursor gets one placed
/// inside its final empty quote pair — but only when nothing meaningful
/// follows the closing quote.
pub fn filter_candidate_quotes(candidates: Vec<Candidate>, input: &str) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    let input_has_quotes = input.contains(['"', '\'']);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(candidates.len());

    for c in candidates {
        let cmd = if input_has_quotes {
            c.completion
        } else {
            filter_quote_content(&c.completion)
        };
        if !seen.insert(cmd.clone()) {
            continue;
        }

        let cursor_pos = c.cursor_pos.or_else(|| {
            find_last_closing_quote_pos(&cmd).and_then(|pos| {
                if cmd[pos + 1..].trim().is_empty() {
                    Some(pos)
                } else {
                    None
                }
            })
        });

        out.push(Candidate {
            completion: cmd,
            cursor_pos,
            confidence: c.confidence,
        });
    }
    out
}

// ─── Re-ranking ───────────────────────────────────────────────────────────────

/// Byte length of the longest common prefix of all completions, floored to
/// a char boundary.
fn common_prefix_len(candidates: &[Candidate]) -> usize {
    let first = candidates[0].completion.as_bytes();
    let mut len = first.len();
    for c in &candidates[1..] {
        let b = c.completion.as_bytes();
        let mut n = 0;
        while n < len && n < b.len() && first[n] == b[n] {
            n += 1;
        }
        len = n;
        if len == 0 {
            break;
        }
    }
    while len > 0 && !candidates[0].completion.is_char_boundary(len) {
        len -= 1;
    }
    len
}

/// Bytes before the first unescaped quote in `suffix`; 0 when the suffix
/// starts with a quote or has none.
fn quote_extension_length(suffix: &str) -> usize {
    let b = suffix.as_bytes();
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\\' if i + 1 < b.len() => i += 2,
            b'"' | b'\'' => return i,
            _ => i += 1,
        }
    }
    0
}

/// Re-order candidates with a weighted score favouring quote extension.
///
/// Only applies when all candidates share a meaningful common prefix (at
/// least `max(3, input_len/2)` bytes); otherwise the model's ordering
/// stands. After sorting, position-based confidences are re-assigned.
pub fn sort_candidates(candidates: &mut Vec<Candidate>, input: &str) {
    if candidates.len() < 2 {
        return;
    }

    let lcp = common_prefix_len(candidates);
    let min_len = (input.len() / 2).max(3);
    if lcp < min_len {
        return;
    }

    let raw: Vec<f64> = candidates
        .iter()
        .map(|c| {
            let suffix = &c.completion[lcp..];
            suffix.len() as f64 * 0.2 + quote_extension_length(suffix) as f64 * 0.8
        })
        .collect();

    let min_raw = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_raw = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max_raw - min_raw;

    let mut items: Vec<(Candidate, f64)> = candidates
        .drain(..)
        .zip(raw)
        .map(|(c, r)| {
            let normalized = if range > 0.0 { (r - min_raw) / range } else { 0.0 };
            let weight = c.confidence * 0.2 + 0.8 * normalized;
            (c, weight)
        })
        .collect();

    items.sort_by(|a, b| b.1.total_cmp(&a.1));

    candidates.extend(items.into_iter().map(|(c, _)| c));
    assign_confidences(candidates);
}

// ─── Tests ────────────────────────────────────────────────────────────────────
