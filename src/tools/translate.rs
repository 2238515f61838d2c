//! Translation of raw agent tool announcements into ACP tool-call shapes.
//!
//! Tool messages carry a JSON payload in their text. Parsing is best-effort
//! throughout: malformed payloads degrade to a phrase-pattern name guess and
//! finally to the `unknown` tool, never to an error.

use agent_client_protocol as acp;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use super::classify::{ToolCategory, classify_tool, tool_kind};
use crate::constants::{ERROR_CHUNK_PREFIX, TOOL_CALL_ID_PREFIX, UNKNOWN_TOOL_NAME};
use crate::extension::SayKind;

/// Everything the bridge derives from one tool announcement.
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    pub title: String,
    pub category: ToolCategory,
    pub kind: acp::ToolKind,
    pub locations: Vec<acp::ToolCallLocation>,
    pub raw_input: Option<Value>,
    pub content: Vec<acp::ToolCallContent>,
}

/// Deterministic id so re-delivery of the same logical event is idempotent
/// for downstream consumers.
pub fn tool_call_id(timestamp: i64) -> String {
    format!("{TOOL_CALL_ID_PREFIX}{timestamp}")
}

static PHRASE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:using|executing|running)\s+([A-Za-z0-9_.\-]+)").unwrap()
});

// `# path/to/file` headers inside search-result content.
static RESULT_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#\s+(\S.*)$").unwrap());

pub fn build_tool_call(text: &str, timestamp: i64, workspace: &Path) -> ToolCallInfo {
    match serde_json::from_str::<Value>(text) {
        Ok(payload) if payload.is_object() => from_payload(payload, timestamp, workspace),
        _ => from_plain_text(text, timestamp),
    }
}

/// Tool-call shape for a bare command line (the agent's `command` messages
/// carry the shell invocation as plain text).
pub fn command_tool_call(command: &str, timestamp: i64) -> ToolCallInfo {
    let category = ToolCategory::Execute;
    let first_line = command.lines().next().unwrap_or_default();
    ToolCallInfo {
        id: tool_call_id(timestamp),
        name: "execute_command".to_string(),
        title: format!("Run `{first_line}`"),
        category,
        kind: tool_kind(category),
        locations: Vec::new(),
        raw_input: Some(serde_json::json!({ "command": command })),
        content: Vec::new(),
    }
}

fn from_payload(payload: Value, timestamp: i64, workspace: &Path) -> ToolCallInfo {
    let name = str_field(&payload, "tool")
        .unwrap_or(UNKNOWN_TOOL_NAME)
        .to_string();
    let category = classify_tool(&name);
    let path = str_field(&payload, "path");
    let query = str_field(&payload, "regex").or_else(|| str_field(&payload, "query"));
    let command = str_field(&payload, "command");
    let result_content = str_field(&payload, "content");
    let diff = str_field(&payload, "diff");

    let locations = tool_locations(category, path, result_content, workspace);
    let content = tool_content(category, path, diff, result_content, workspace);
    let title = tool_title(&name, category, path, query, command);

    ToolCallInfo {
        id: tool_call_id(timestamp),
        title,
        category,
        kind: tool_kind(category),
        name,
        locations,
        raw_input: Some(payload),
        content,
    }
}

fn from_plain_text(text: &str, timestamp: i64) -> ToolCallInfo {
    let name = PHRASE_PATTERN
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string());
    let category = classify_tool(&name);
    ToolCallInfo {
        id: tool_call_id(timestamp),
        title: name.clone(),
        category,
        kind: tool_kind(category),
        name,
        locations: Vec::new(),
        raw_input: None,
        content: Vec::new(),
    }
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn tool_locations(
    category: ToolCategory,
    path: Option<&str>,
    result_content: Option<&str>,
    workspace: &Path,
) -> Vec<acp::ToolCallLocation> {
    match category {
        // the `path` parameter is only the search scope; the hits live in
        // the result content
        ToolCategory::Search => mine_result_paths(result_content.unwrap_or_default())
            .into_iter()
            .map(|hit| acp::ToolCallLocation::new(workspace.join(hit)))
            .collect(),
        _ => path
            .filter(|p| !p.is_empty())
            .map(|p| vec![acp::ToolCallLocation::new(workspace.join(p))])
            .unwrap_or_default(),
    }
}

fn tool_content(
    category: ToolCategory,
    path: Option<&str>,
    diff: Option<&str>,
    result_content: Option<&str>,
    workspace: &Path,
) -> Vec<acp::ToolCallContent> {
    if category != ToolCategory::Edit {
        return Vec::new();
    }
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Vec::new();
    };
    let absolute = workspace.join(path);

    if let Some(diff) = diff {
        if looks_like_unified_diff(diff) {
            let (old_text, new_text) = unified_diff_to_old_new(diff);
            let mut rendered = acp::Diff::new(absolute, new_text);
            if let Some(old) = old_text {
                rendered = rendered.old_text(old);
            }
            return vec![acp::ToolCallContent::Diff(rendered)];
        }
        return vec![acp::ToolCallContent::Diff(acp::Diff::new(absolute, diff))];
    }

    if let Some(new_text) = result_content {
        return vec![acp::ToolCallContent::Diff(acp::Diff::new(
            absolute, new_text,
        ))];
    }

    Vec::new()
}

fn tool_title(
    name: &str,
    category: ToolCategory,
    path: Option<&str>,
    query: Option<&str>,
    command: Option<&str>,
) -> String {
    match category {
        ToolCategory::Read => titled("Read", path, "file"),
        ToolCategory::Edit => titled("Edit", path, "file"),
        ToolCategory::Delete => titled("Delete", path, "file"),
        ToolCategory::Move => titled("Move", path, "file"),
        ToolCategory::Search => titled("Search", query, "files"),
        ToolCategory::List => titled("List", path, "files"),
        ToolCategory::Execute => match command {
            Some(command) => format!("Run `{command}`"),
            None => "Run command".to_string(),
        },
        ToolCategory::Fetch => titled("Fetch", query, "resource"),
        ToolCategory::SwitchMode => "Switch mode".to_string(),
        ToolCategory::Think | ToolCategory::Other => name.to_string(),
    }
}

fn titled(verb: &str, subject: Option<&str>, fallback: &str) -> String {
    match subject.filter(|s| !s.is_empty()) {
        Some(subject) => format!("{verb} {subject}"),
        None => format!("{verb} {fallback}"),
    }
}

/// Collects `# path` header lines from search results, first-seen order,
/// duplicates dropped.
pub(crate) fn mine_result_paths(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for captures in RESULT_PATH_PATTERN.captures_iter(content) {
        if let Some(found) = captures.get(1) {
            let path = found.as_str().trim();
            if seen.insert(path.to_string()) {
                paths.push(path.to_string());
            }
        }
    }
    paths
}

pub(crate) fn looks_like_unified_diff(text: &str) -> bool {
    text.lines()
        .any(|line| line.starts_with("@@") || line.starts_with("--- ") || line.starts_with("+++ "))
}

/// Reconstructs the old and new text of a single-file unified diff. An
/// old side of `/dev/null` means a new file and yields `None`.
pub(crate) fn unified_diff_to_old_new(diff: &str) -> (Option<String>, String) {
    let mut old_text = String::new();
    let mut new_text = String::new();
    let mut in_hunk = false;
    let mut old_is_dev_null = false;

    for line in diff.lines() {
        if let Some(from_file) = line.strip_prefix("--- ") {
            let from_file = from_file.trim();
            old_is_dev_null = from_file == "/dev/null";
            continue;
        }
        if line.starts_with("+++ ") {
            continue;
        }
        if line.starts_with("@@") {
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            continue;
        }
        // "\ No newline at end of file"
        if line.starts_with('\\') {
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            new_text.push_str(added);
            new_text.push('\n');
        } else if let Some(removed) = line.strip_prefix('-') {
            old_text.push_str(removed);
            old_text.push('\n');
        } else {
            let context = line.strip_prefix(' ').unwrap_or(line);
            old_text.push_str(context);
            old_text.push('\n');
            new_text.push_str(context);
            new_text.push('\n');
        }
    }

    let old = if old_is_dev_null { None } else { Some(old_text) };
    (old, new_text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamedUpdateKind {
    Message,
    Thought,
}

pub struct StreamRule {
    pub say: SayKind,
    pub kind: StreamedUpdateKind,
    pub prefix: Option<&'static str>,
}

/// Say subtypes that stream as chunks. Everything absent from the table is
/// suppressed or handled by a dedicated path.
pub static STREAM_RULES: &[StreamRule] = &[
    StreamRule {
        say: SayKind::Text,
        kind: StreamedUpdateKind::Message,
        prefix: None,
    },
    StreamRule {
        say: SayKind::Reasoning,
        kind: StreamedUpdateKind::Thought,
        prefix: None,
    },
    StreamRule {
        say: SayKind::Error,
        kind: StreamedUpdateKind::Message,
        prefix: Some(ERROR_CHUNK_PREFIX),
    },
];

pub fn stream_rule(say: SayKind) -> Option<&'static StreamRule> {
    STREAM_RULES.iter().find(|rule| rule.say == say)
}
