//! Data model and command surface of the extension-hosted agent.
//!
//! The agent itself is opaque: it emits a raw event stream and accepts a
//! handful of commands. Everything here mirrors its wire shapes so the rest
//! of the bridge can stay typed.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure modes for commands sent to the extension-hosted agent.
#[derive(Debug, Error)]
pub enum AgentCommandError {
    #[error("agent connection closed")]
    Disconnected,
    #[error("agent rejected the command: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Say,
    Ask,
}

/// Subtype of an informational (`say`) message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SayKind {
    Text,
    Reasoning,
    Error,
    Tool,
    Command,
    CommandOutput,
    CompletionResult,
    ApiReqStarted,
    ApiReqFinished,
    CheckpointSaved,
    BrowserAction,
    McpServerResponse,
    UserFeedback,
    #[serde(other)]
    Unknown,
}

/// Subtype of a blocking (`ask`) message awaiting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskKind {
    Followup,
    Command,
    CommandOutput,
    CompletionResult,
    Tool,
    ApiReqFailed,
    ResumeTask,
    ResumeCompletedTask,
    BrowserActionLaunch,
    UseMcpServer,
    MistakeLimitReached,
    #[serde(other)]
    Unknown,
}

/// One entry of the agent's message log. Partial deliveries repeat the same
/// timestamp with a growing `text`; the terminal delivery clears `partial`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub say: Option<SayKind>,
    #[serde(default)]
    pub ask: Option<AskKind>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub partial: bool,
}

impl AgentMessage {
    pub fn say(timestamp: i64, say: SayKind, text: impl Into<String>, partial: bool) -> Self {
        Self {
            timestamp,
            kind: MessageKind::Say,
            say: Some(say),
            ask: None,
            text: text.into(),
            partial,
        }
    }

    pub fn ask(timestamp: i64, ask: AskKind, text: impl Into<String>, partial: bool) -> Self {
        Self {
            timestamp,
            kind: MessageKind::Ask,
            say: None,
            ask: Some(ask),
            text: text.into(),
            partial,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.partial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    WaitingForInput,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub run_state: RunState,
    pub is_running: bool,
    pub is_streaming: bool,
    #[serde(default)]
    pub current_ask: Option<AskKind>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl AgentState {
    /// True once the agent has nothing in flight.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.run_state,
            RunState::Idle | RunState::Completed | RunState::Aborted
        ) && !self.is_running
            && !self.is_streaming
    }
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Message(AgentMessage),
    MessageUpdated(AgentMessage),
    WaitingForInput {
        ask: AskKind,
        message: Option<AgentMessage>,
    },
    CommandExecutionOutput {
        execution_id: String,
        output: String,
    },
    TaskCompleted {
        success: bool,
    },
    StateChange {
        previous: AgentState,
        current: AgentState,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub mode: Option<String>,
}

/// Command surface of the hosted agent. One instance backs one ACP session.
#[async_trait(?Send)]
pub trait ExtensionAgent {
    /// Hands out the agent's event stream. Called once per session.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent>;
    async fn new_task(&self, text: &str, images: &[String]) -> Result<(), AgentCommandError>;
    async fn cancel_task(&self) -> Result<(), AgentCommandError>;
    async fn update_settings(&self, update: SettingsUpdate) -> Result<(), AgentCommandError>;
    async fn respond(&self, text: &str, images: &[String]) -> Result<(), AgentCommandError>;
    async fn approve(&self) -> Result<(), AgentCommandError>;
    async fn reject(&self) -> Result<(), AgentCommandError>;
    fn dispose(&self);
}

/// Activates one hosted agent per new session, rooted at the session's
/// working directory.
#[async_trait(?Send)]
pub trait ExtensionAgentFactory {
    async fn activate(&self, workspace: &Path) -> anyhow::Result<Rc<dyn ExtensionAgent>>;
}
