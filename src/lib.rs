//! Protocol bridge between an extension-hosted coding agent and Agent
//! Client Protocol clients.
//!
//! The hosted agent emits a raw, partial, event-driven message stream:
//! informational `say` messages and blocking `ask` messages keyed by
//! timestamp, live command output, task completion signals, and state
//! changes. This crate adapts that stream into well-formed ACP session
//! updates — message and thought chunks, tool calls and their updates,
//! plans, and mode changes — while managing the prompt lifecycle and
//! auto-approving the agent's permission gates.
//!
//! Embed [`BridgeAgent`] behind your own transport, or call [`serve`] to run
//! the bridge over stdio:
//!
//! ```no_run
//! use std::rc::Rc;
//! # use acp_bridge::ExtensionAgentFactory;
//! # async fn run(factory: Rc<dyn ExtensionAgentFactory>) -> anyhow::Result<()> {
//! acp_bridge::serve(factory).await
//! # }
//! ```

mod constants;
mod delta;
mod extension;
mod helpers;
mod prompt;
mod session;
mod stream;
mod tools;

pub use delta::DeltaTracker;
pub use extension::{
    AgentCommandError, AgentEvent, AgentMessage, AgentState, AskKind, ExtensionAgent,
    ExtensionAgentFactory, MessageKind, RunState, SayKind, SettingsUpdate,
};
pub use prompt::{PromptOutcome, PromptState, PromptStateMachine};
pub use session::{BridgeAgent, NotificationEnvelope, Session, serve};
pub use stream::{CommandStreamManager, ToolContentStreamManager};
pub use tools::classify::{ToolCategory, classify_tool, normalize_tool_name, tool_kind};
pub use tools::handlers::{
    PendingCommandSpec, ToolDispatch, ToolHandler, ToolHandlerContext, ToolHandlerRegistry,
};
pub use tools::translate::{
    STREAM_RULES, StreamRule, StreamedUpdateKind, ToolCallInfo, build_tool_call, command_tool_call,
    stream_rule, tool_call_id,
};
