// SPDX-License-Identifier: MIT
//! System-prompt rendering and user-message assembly.

use crate::config::DEFAULT_PROMPT;
use crate::context::DirContext;
use crate::history::redact::redact_commands;

use super::parse::filter_quote_content_slice;

/// Recent commands included in the user message.
const RECENT_IN_PROMPT: usize = 5;

/// Render the system prompt from the user's template when it is present
/// and well-formed, otherwise from the embedded default. Rendering never
/// fails outward; a bad template silently falls back.
pub fn build_system_prompt(custom_prompt: &str, max_candidates: usize) -> String {
    let max = max_candidates.to_string();
    let vars = [("max_candidates", max.as_str())];

    let rendered = if custom_prompt.is_empty() {
        render_template(DEFAULT_PROMPT, &vars)
    } else {
        render_template(custom_prompt, &vars).or_else(|e| {
            tracing::warn!(error = %e, "custom prompt template rejected, using default");
            render_template(DEFAULT_PROMPT, &vars)
        })
    };

    rendered
        .expect("embedded default prompt renders")
        .trim_end_matches([' ', '\t', '\n'])
        .to_string()
}

/// Substitute `{{name}}` placeholders. Unknown names and unclosed
/// placeholders are errors, which is what lets a broken user template be
/// detected and replaced by the default.
fn render_template(template: &str, vars: &[(&str, &str)]) -> anyhow::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            anyhow::bail!("unclosed placeholder");
        };
        let name = after[..end].trim();
        match vars.iter().find(|(k, _)| *k == name) {
            Some((_, value)) => out.push_str(value),
            None => anyhow::bail!("unknown placeholder {name:?}"),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Build the plain-text user message: context lines in a fixed order,
/// history commands redacted and quote-emptied, and the raw input line
/// with the cursor marked when it is not at the end.
///
/// The `Input:` value is deliberately never redacted — the user's own
/// typing must reach the model unchanged.
pub fn build_user_message(
    input: &str,
    cursor_pos: usize,
    cwd: &str,
    dir_ctx: Option<&DirContext>,
    recent: &[String],
    relevant: &[String],
) -> String {
    let mut msg = String::new();

    if !cwd.is_empty() {
        msg.push_str("cwd: ");
        msg.push_str(cwd);
        msg.push('\n');
    }

    if let Some(ctx) = dir_ctx {
        push_field(&mut msg, "files", &ctx.cwd_listing);
        push_field(&mut msg, "pkg", &ctx.package_manager);
        push_field(&mut msg, "git root", &ctx.git_root);
        push_field(&mut msg, "project files", &ctx.git_root_listing);
        push_field(&mut msg, "staged", &ctx.git_staged_files);
        for (label, content) in &ctx.cwd_manifests {
            push_field(&mut msg, label, content);
        }
        for (label, content) in &ctx.git_manifests {
            push_field(&mut msg, label, content);
        }
    }

    let tail = recent.len().saturating_sub(RECENT_IN_PROMPT);
    let recent_cmds = filter_quote_content_slice(&redact_commands(&recent[tail..]));
    if !recent_cmds.is_empty() {
        push_field(&mut msg, "recent", &recent_cmds.join(", "));
    }

    let relevant_cmds = filter_quote_content_slice(&redact_commands(relevant));
    if !relevant_cmds.is_empty() {
        push_field(&mut msg, "related", &relevant_cmds.join(", "));
    }

    let before = &input[..cursor_pos];
    let after = &input[cursor_pos..];
    msg.push_str("\nInput: `");
    msg.push_str(before);
    if !after.is_empty() {
        msg.push_str(super::parse::CURSOR_MARKER);
    }
    msg.push_str(after);
    msg.push('`');

    msg
}

fn push_field(msg: &mut String, label: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    msg.push_str(label);
    msg.push_str(": ");
    msg.push_str(value);
    msg.push('\n');
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn default_prompt_renders_with_count() {
        let prompt = build_system_prompt("", 4);
        assert!(prompt.contains("auto-completion engine"));
        assert!(prompt.contains("up to 4 completions"));
        assert!(prompt.contains(r#"<candidate type="replace">"#));
        assert!(prompt.contains(r#"<candidate type="append">"#));
        assert!(!prompt.ends_with('\n'));
    }

    #[test]
    fn custom_prompt_is_used_when_valid() {
        let prompt = build_system_prompt("return {{max_candidates}} things", 3);
        assert_eq!(prompt, "return 3 things");
    }

    #[test]
    fn invalid_custom_prompt_falls_back() {
        for bad in ["{{nonexistent_field}}", "{{max_candidates"] {
            let prompt = build_system_prompt(bad, 4);
            assert!(
                prompt.contains("auto-completion engine"),
                "expected fallback for {bad:?}"
            );
        }
    }

    #[test]
    fn message_contains_cwd_and_input() {
        let msg = build_user_message("git st", 6, "/home/user/project", None, &[], &[]);
        assert!(msg.contains("cwd: /home/user/project"));
        assert!(msg.contains("Input: `git st`"));
        assert!(!msg.contains(CURSOR_MARKER_STR));
    }

    const CURSOR_MARKER_STR: &str = "█";

    #[test]
    fn cursor_marker_only_when_mid_input() {
        let input = r#"git commit -m """#;
        let msg = build_user_message(input, 15, "/home/user", None, &[], &[]);
        assert!(msg.contains("Input: `git commit -m \"█\"`"));
    }

    #[test]
    fn dir_context_fields_in_order() {
        let ctx = DirContext {
            cwd_path: "/p".into(),
            cwd_listing: "node_modules package.json src".into(),
            package_manager: "pnpm".into(),
            cwd_manifests: BTreeMap::from([(
                "package.json scripts".to_string(),
                "build: tsc, test: jest".to_string(),
            )]),
            ..DirContext::default()
        };
        let msg = build_user_message("npm run", 7, "/p", Some(&ctx), &[], &[]);
        assert!(msg.contains("files: node_modules package.json src"));
        assert!(msg.contains("pkg: pnpm"));
        assert!(msg.contains("package.json scripts: build: tsc, test: jest"));
        assert!(!msg.contains("staged:"));
    }

    #[test]
    fn nil_dir_context_omits_sections() {
        let msg = build_user_message("git st", 6, "/home/user", None, &[], &[]);
        assert!(!msg.contains("files:"));
        assert!(!msg.contains("pkg:"));
    }

    #[test]
    fn recent_capped_at_five_most_recent() {
        let recent: Vec<String> = (0..10).map(|i| format!("cmd{i} --n{i}")).collect();
        let msg = build_user_message("test", 4, "", None, &recent, &[]);
        assert!(msg.contains("cmd9"));
        assert!(msg.contains("cmd5"));
        assert!(!msg.contains("cmd4 "));
    }

    #[test]
    fn related_emitted_only_when_non_empty() {
        let relevant = vec!["docker build -t myapp .".to_string()];
        let msg = build_user_message("docker ", 7, "", None, &[], &relevant);
        assert!(msg.contains("related: docker build -t myapp ."));

        let msg = build_user_message("git st", 6, "", None, &[], &[]);
        assert!(!msg.contains("related:"));
    }

    #[test]
    fn history_is_redacted_and_quote_filtered() {
        let recent = vec![
            "curl -H $SECRET_TOKEN http://example.com".to_string(),
            r#"git commit -m "fix: something""#.to_string(),
            "export API_KEY=supersecret".to_string(),
        ];
        let msg = build_user_message("curl ", 5, "", None, &recent, &[]);
        assert!(!msg.contains("SECRET_TOKEN"));
        assert!(!msg.contains("supersecret"));
        assert!(!msg.contains("fix: something"));
        assert!(msg.contains("$REDACTED"));
        assert!(msg.contains("API_KEY=***"));
        assert!(msg.contains(r#"git commit -m """#));
    }

    #[test]
    fn safe_vars_survive_in_history() {
        let recent = vec!["cd $HOME/projects".to_string()];
        let msg = build_user_message("cd ", 3, "", None, &recent, &[]);
        assert!(msg.contains("$HOME"));
    }

    #[test]
    fn input_is_never_redacted() {
        let msg = build_user_message("echo $SECRET_VAR", 16, "", None, &[], &[]);
        assert!(msg.contains("Input: `echo $SECRET_VAR`"));
    }
}
