//! Tool name classification.
//!
//! Names are matched exactly after normalization, never by substring: a
//! `custom_search_tool` is not a search tool, and `http_get` must not drag
//! `get_info` along with it.

use agent_client_protocol as acp;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Think,
    Fetch,
    SwitchMode,
    List,
    Other,
}

// Normalized spellings (lowercase, separators stripped).
const READ_TOOLS: &[&str] = &["readfile", "read", "openfile", "viewfile"];
const EDIT_TOOLS: &[&str] = &[
    "writetofile",
    "applydiff",
    "applieddiff",
    "editedexistingfile",
    "newfilecreated",
    "insertcontent",
    "searchandreplace",
    "editfile",
    "createfile",
];
const DELETE_TOOLS: &[&str] = &["deletefile", "removefile"];
const MOVE_TOOLS: &[&str] = &["movefile", "renamefile"];
const SEARCH_TOOLS: &[&str] = &["searchfiles", "codebasesearch", "grepsearch", "search"];
const EXECUTE_TOOLS: &[&str] = &[
    "executecommand",
    "command",
    "runcommand",
    "terminal",
    "shell",
];
const THINK_TOOLS: &[&str] = &["think", "sequentialthinking", "updatetodolist"];
const FETCH_TOOLS: &[&str] = &["fetch", "webfetch", "urlfetch", "httpget", "browseraction"];
const SWITCH_MODE_TOOLS: &[&str] = &["switchmode"];
const LIST_TOOLS: &[&str] = &[
    "listfiles",
    "listfilestoplevel",
    "listfilesrecursive",
    "listcodedefinitionnames",
    "listdirectory",
];

static CATEGORY_BY_NAME: Lazy<HashMap<&'static str, ToolCategory>> = Lazy::new(|| {
    let groups: [(&[&str], ToolCategory); 10] = [
        (READ_TOOLS, ToolCategory::Read),
        (EDIT_TOOLS, ToolCategory::Edit),
        (DELETE_TOOLS, ToolCategory::Delete),
        (MOVE_TOOLS, ToolCategory::Move),
        (SEARCH_TOOLS, ToolCategory::Search),
        (EXECUTE_TOOLS, ToolCategory::Execute),
        (THINK_TOOLS, ToolCategory::Think),
        (FETCH_TOOLS, ToolCategory::Fetch),
        (SWITCH_MODE_TOOLS, ToolCategory::SwitchMode),
        (LIST_TOOLS, ToolCategory::List),
    ];

    let mut table = HashMap::new();
    for (names, category) in groups {
        for name in names {
            table.insert(*name, category);
        }
    }
    table
});

/// Lowercases and strips `_`, `-`, and spaces so spelling variants of the
/// same tool collapse onto one table entry.
pub fn normalize_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn classify_tool(name: &str) -> ToolCategory {
    CATEGORY_BY_NAME
        .get(normalize_tool_name(name).as_str())
        .copied()
        .unwrap_or(ToolCategory::Other)
}

pub fn tool_kind(category: ToolCategory) -> acp::ToolKind {
    match category {
        ToolCategory::Read => acp::ToolKind::Read,
        ToolCategory::Edit => acp::ToolKind::Edit,
        ToolCategory::Delete => acp::ToolKind::Delete,
        ToolCategory::Move => acp::ToolKind::Move,
        ToolCategory::Search => acp::ToolKind::Search,
        ToolCategory::Execute => acp::ToolKind::Execute,
        ToolCategory::Think => acp::ToolKind::Think,
        ToolCategory::Fetch => acp::ToolKind::Fetch,
        ToolCategory::SwitchMode => acp::ToolKind::SwitchMode,
        // directory listings render best as reads
        ToolCategory::List => acp::ToolKind::Read,
        ToolCategory::Other => acp::ToolKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn spelling_variants_collapse_onto_one_entry() {
        assert_eq!(classify_tool("read_file"), ToolCategory::Read);
        assert_eq!(classify_tool("readFile"), ToolCategory::Read);
        assert_eq!(classify_tool("READ-FILE"), ToolCategory::Read);
        assert_eq!(classify_tool("applied diff"), ToolCategory::Edit);
    }

    #[test]
    fn matching_is_exact_not_substring() {
        assert_eq!(classify_tool("custom_search_tool"), ToolCategory::Other);
        assert_eq!(classify_tool("http_get"), ToolCategory::Fetch);
        assert_eq!(classify_tool("get_info"), ToolCategory::Other);
    }

    #[test]
    fn unknown_names_fall_back_to_other() {
        assert_eq!(classify_tool(""), ToolCategory::Other);
        assert_eq!(classify_tool("frobnicate"), ToolCategory::Other);
    }

    #[test]
    fn list_category_renders_as_read() {
        assert_eq!(classify_tool("list_files"), ToolCategory::List);
        assert_eq!(tool_kind(ToolCategory::List), acp::ToolKind::Read);
    }

    #[test]
    fn execute_and_switch_mode_map_onto_their_kinds() {
        assert_eq!(
            tool_kind(classify_tool("execute_command")),
            acp::ToolKind::Execute
        );
        assert_eq!(
            tool_kind(classify_tool("switch_mode")),
            acp::ToolKind::SwitchMode
        );
    }
}
