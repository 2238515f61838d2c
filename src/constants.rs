//! Shared identifiers, wire prefixes, and user-visible strings.

pub(crate) const SESSION_ID_PREFIX: &str = "acp-bridge-session";
pub(crate) const TOOL_CALL_ID_PREFIX: &str = "tool-";
pub(crate) const UNKNOWN_TOOL_NAME: &str = "unknown";
pub(crate) const TODO_LIST_TOOL_NAME: &str = "updatetodolist";

pub(crate) const MODE_ID_CODE: &str = "code";
pub(crate) const MODE_ID_ASK: &str = "ask";
pub(crate) const MODE_ID_ARCHITECT: &str = "architect";

pub(crate) const ERROR_CHUNK_PREFIX: &str = "Error: ";
pub(crate) const COMMAND_FENCE_OPEN: &str = "\n```\n";
pub(crate) const COMMAND_FENCE_CLOSE: &str = "\n```\n";
pub(crate) const CONTENT_FENCE_CLOSE: &str = "\n```\n";

/// Lines of file content streamed verbatim before switching to progress markers.
pub(crate) const CONTENT_PREVIEW_MAX_LINES: usize = 24;
/// Progress marker past the preview cap; wraps the character count.
pub(crate) const CONTENT_PROGRESS_PREFIX: &str = "… streaming (";
pub(crate) const CONTENT_PROGRESS_SUFFIX: &str = " chars)\n";

pub(crate) const FOLLOWUP_AUTO_RESPONSE_DELAY_SECS: u64 = 30;
pub(crate) const FOLLOWUP_AUTO_RESPONSE: &str =
    "Proceed with whichever option you judge best.";
pub(crate) const MISTAKE_LIMIT_GUIDANCE: &str =
    "Break the problem into smaller steps and continue.";

pub(crate) const INITIALIZE_VERSION_MISMATCH_LOG: &str =
    "ACP client requested an unsupported protocol version; continuing with v1";
pub(crate) const UPDATE_CHANNEL_CLOSED_LOG: &str = "ACP session update channel closed";
pub(crate) const EVENT_HANDLER_FAILURE_LOG: &str = "Failed to translate agent event";
pub(crate) const NOTIFICATION_FORWARD_FAILURE_LOG: &str =
    "Failed to forward ACP session notification";
