//! Ordered tool-event dispatch.
//!
//! Handlers are consulted in declaration order; the first match wins and the
//! catch-all sits at the tail, so every tool event produces a dispatch.

use agent_client_protocol as acp;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::classify::ToolCategory;
use super::translate::ToolCallInfo;
use crate::extension::{AgentMessage, AskKind};

pub struct ToolHandlerContext<'a> {
    pub message: &'a AgentMessage,
    pub ask: Option<AskKind>,
    pub workspace: &'a Path,
    pub tool: &'a ToolCallInfo,
}

pub struct PendingCommandSpec {
    pub id: String,
    pub command: String,
    pub started_at: i64,
}

pub struct ToolDispatch {
    pub initial: acp::ToolCall,
    /// Set only by the command handler; the stream manager takes over from
    /// here and delivers the completion once output finishes.
    pub pending_command: Option<PendingCommandSpec>,
    pub completion: Option<acp::ToolCallUpdate>,
}

pub trait ToolHandler {
    fn name(&self) -> &'static str;
    fn can_handle(&self, context: &ToolHandlerContext<'_>) -> bool;
    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch;
}

fn tool_call_acp_id(tool: &ToolCallInfo) -> acp::ToolCallId {
    acp::ToolCallId::new(Arc::from(tool.id.clone()))
}

fn initial_tool_call(context: &ToolHandlerContext<'_>) -> acp::ToolCall {
    let tool = context.tool;
    let mut call = acp::ToolCall::new(tool_call_acp_id(tool), tool.title.clone())
        .kind(tool.kind)
        .status(acp::ToolCallStatus::InProgress);
    if let Some(raw_input) = &tool.raw_input {
        call = call.raw_input(raw_input.clone());
    }
    if !tool.locations.is_empty() {
        call = call.locations(tool.locations.clone());
    }
    if !tool.content.is_empty() {
        call = call.content(tool.content.clone());
    }
    call
}

fn completed_update(context: &ToolHandlerContext<'_>) -> acp::ToolCallUpdate {
    let fields = acp::ToolCallUpdateFields::default()
        .status(acp::ToolCallStatus::Completed)
        .raw_output(json!({
            "status": "success",
            "tool": context.tool.name,
        }));
    acp::ToolCallUpdate::new(tool_call_acp_id(context.tool), fields)
}

fn immediate_dispatch(context: &ToolHandlerContext<'_>) -> ToolDispatch {
    ToolDispatch {
        initial: initial_tool_call(context),
        pending_command: None,
        completion: Some(completed_update(context)),
    }
}

struct CommandHandler;

impl ToolHandler for CommandHandler {
    fn name(&self) -> &'static str {
        "command"
    }

    fn can_handle(&self, context: &ToolHandlerContext<'_>) -> bool {
        context.ask == Some(AskKind::Command) || context.tool.category == ToolCategory::Execute
    }

    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        let command = context
            .tool
            .raw_input
            .as_ref()
            .and_then(|raw| raw.get("command"))
            .and_then(Value::as_str)
            .unwrap_or(context.message.text.as_str())
            .to_string();

        ToolDispatch {
            initial: initial_tool_call(context),
            pending_command: Some(PendingCommandSpec {
                id: context.tool.id.clone(),
                command,
                started_at: context.message.timestamp,
            }),
            completion: None,
        }
    }
}

struct FileEditHandler;

impl ToolHandler for FileEditHandler {
    fn name(&self) -> &'static str {
        "file_edit"
    }

    fn can_handle(&self, context: &ToolHandlerContext<'_>) -> bool {
        context.tool.category == ToolCategory::Edit
    }

    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        immediate_dispatch(context)
    }
}

struct FileReadHandler;

impl ToolHandler for FileReadHandler {
    fn name(&self) -> &'static str {
        "file_read"
    }

    fn can_handle(&self, context: &ToolHandlerContext<'_>) -> bool {
        context.tool.category == ToolCategory::Read
    }

    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        immediate_dispatch(context)
    }
}

struct SearchHandler;

impl ToolHandler for SearchHandler {
    fn name(&self) -> &'static str {
        "search"
    }

    fn can_handle(&self, context: &ToolHandlerContext<'_>) -> bool {
        context.tool.category == ToolCategory::Search
    }

    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        immediate_dispatch(context)
    }
}

struct ListFilesHandler;

impl ToolHandler for ListFilesHandler {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn can_handle(&self, context: &ToolHandlerContext<'_>) -> bool {
        context.tool.category == ToolCategory::List
    }

    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        immediate_dispatch(context)
    }
}

struct DefaultHandler;

impl ToolHandler for DefaultHandler {
    fn name(&self) -> &'static str {
        "default"
    }

    fn can_handle(&self, _context: &ToolHandlerContext<'_>) -> bool {
        true
    }

    fn handle(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        immediate_dispatch(context)
    }
}

pub struct ToolHandlerRegistry {
    handlers: Vec<Box<dyn ToolHandler>>,
}

impl ToolHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: vec![
                Box::new(CommandHandler),
                Box::new(FileEditHandler),
                Box::new(FileReadHandler),
                Box::new(SearchHandler),
                Box::new(ListFilesHandler),
                Box::new(DefaultHandler),
            ],
        }
    }

    pub fn dispatch(&self, context: &ToolHandlerContext<'_>) -> ToolDispatch {
        for handler in &self.handlers {
            if handler.can_handle(context) {
                debug!(
                    handler = handler.name(),
                    tool = %context.tool.name,
                    "Dispatching tool event"
                );
                return handler.handle(context);
            }
        }
        DefaultHandler.handle(context)
    }
}

impl Default for ToolHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
