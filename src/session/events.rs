//! Translates the agent's raw event stream into ACP session updates.
//!
//! Events arrive on a single-threaded task and are handled run-to-completion,
//! so all per-session state lives behind `RefCell` without locks.

use agent_client_protocol as acp;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::NotificationEnvelope;
use crate::constants::{
    ERROR_CHUNK_PREFIX, FOLLOWUP_AUTO_RESPONSE, FOLLOWUP_AUTO_RESPONSE_DELAY_SECS,
    MISTAKE_LIMIT_GUIDANCE, TODO_LIST_TOOL_NAME, UPDATE_CHANNEL_CLOSED_LOG,
};
use crate::delta::DeltaTracker;
use crate::extension::{
    AgentEvent, AgentMessage, AgentState, AskKind, ExtensionAgent, MessageKind, SayKind,
};
use crate::helpers::{message_chunk, thought_chunk};
use crate::prompt::{PromptOutcome, PromptStateMachine};
use crate::stream::command::CommandStreamManager;
use crate::stream::content::ToolContentStreamManager;
use crate::tools::classify::{ToolCategory, normalize_tool_name};
use crate::tools::handlers::{ToolDispatch, ToolHandlerContext, ToolHandlerRegistry};
use crate::tools::translate::{
    StreamRule, StreamedUpdateKind, ToolCallInfo, build_tool_call, command_tool_call, stream_rule,
};

#[derive(Default)]
struct HandlerState {
    say_streams: DeltaTracker<i64>,
    commands: CommandStreamManager,
    tool_content: ToolContentStreamManager,
    answered_asks: HashSet<(AskKind, String)>,
    current_mode: Option<String>,
    last_plan: Option<String>,
}

pub(crate) struct SessionEventHandler {
    session_id: acp::SessionId,
    agent: Rc<dyn ExtensionAgent>,
    workspace: PathBuf,
    prompt: Rc<RefCell<PromptStateMachine>>,
    update_tx: mpsc::UnboundedSender<NotificationEnvelope>,
    registry: ToolHandlerRegistry,
    state: RefCell<HandlerState>,
    followup_generation: Cell<u64>,
}

impl SessionEventHandler {
    pub(crate) fn new(
        session_id: acp::SessionId,
        agent: Rc<dyn ExtensionAgent>,
        workspace: PathBuf,
        prompt: Rc<RefCell<PromptStateMachine>>,
        update_tx: mpsc::UnboundedSender<NotificationEnvelope>,
    ) -> Self {
        Self {
            session_id,
            agent,
            workspace,
            prompt,
            update_tx,
            registry: ToolHandlerRegistry::new(),
            state: RefCell::new(HandlerState::default()),
            followup_generation: Cell::new(0),
        }
    }

    pub(crate) async fn handle_event(self: &Rc<Self>, event: AgentEvent) -> Result<(), acp::Error> {
        match event {
            AgentEvent::Message(message) | AgentEvent::MessageUpdated(message) => {
                self.handle_message(message).await
            }
            AgentEvent::WaitingForInput { ask, message } => {
                self.handle_waiting_for_input(ask, message).await
            }
            AgentEvent::CommandExecutionOutput {
                execution_id,
                output,
            } => {
                let updates = self
                    .state
                    .borrow_mut()
                    .commands
                    .handle_execution_output(&execution_id, &output);
                self.send_updates(updates).await
            }
            AgentEvent::TaskCompleted { success } => {
                self.prompt.borrow_mut().complete(success);
                Ok(())
            }
            AgentEvent::StateChange { previous, current } => {
                self.handle_state_change(previous, current).await
            }
        }
    }

    pub(crate) fn current_mode(&self) -> Option<String> {
        self.state.borrow().current_mode.clone()
    }

    /// Clears every per-turn arena. A prompt still in flight resolves
    /// cancelled.
    pub(crate) fn reset(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.say_streams.reset();
            state.commands.reset();
            state.tool_content.reset();
            state.answered_asks.clear();
            state.last_plan = None;
        }
        self.followup_generation
            .set(self.followup_generation.get().wrapping_add(1));
        self.prompt.borrow_mut().reset();
    }

    async fn handle_message(self: &Rc<Self>, message: AgentMessage) -> Result<(), acp::Error> {
        if message.kind == MessageKind::Ask {
            // asks surface through WaitingForInput
            return Ok(());
        }
        let Some(say) = message.say else {
            return Ok(());
        };

        match say {
            SayKind::Tool => self.handle_tool_say(&message).await,
            SayKind::Command => self.handle_command_say(&message).await,
            SayKind::CommandOutput => {
                let updates = self
                    .state
                    .borrow_mut()
                    .commands
                    .handle_command_output(&message.text, message.partial);
                self.send_updates(updates).await
            }
            other => match stream_rule(other) {
                Some(rule) => self.stream_say(&message, rule).await,
                None => {
                    debug!(say = ?other, "Suppressing agent message subtype");
                    Ok(())
                }
            },
        }
    }

    async fn stream_say(
        &self,
        message: &AgentMessage,
        rule: &'static StreamRule,
    ) -> Result<(), acp::Error> {
        let mut updates = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let key = message.timestamp;
            if let Some(prefix) = rule.prefix
                && !state.say_streams.header_emitted(&key)
            {
                state.say_streams.mark_header_emitted(&key);
                updates.push(streamed_chunk(rule.kind, prefix));
            }
            if let Some(delta) = state.say_streams.get_delta(&key, &message.text) {
                updates.push(streamed_chunk(rule.kind, delta));
            }
        }
        self.send_updates(updates).await
    }

    async fn handle_tool_say(&self, message: &AgentMessage) -> Result<(), acp::Error> {
        if let Some(updates) = self.plan_updates(&message.text) {
            return self.send_updates(updates).await;
        }
        if message.partial {
            return self.stream_partial_tool_content(message).await;
        }

        let tool = build_tool_call(&message.text, message.timestamp, &self.workspace);
        let mut updates = Vec::new();
        if let Some((path, content)) = edit_stream_fields(&tool) {
            // close out any content preview opened by earlier partials
            updates.extend(self.state.borrow_mut().tool_content.handle_tool_content(
                message.timestamp,
                &path,
                &content,
                false,
            ));
        }
        let dispatch = self.registry.dispatch(&ToolHandlerContext {
            message,
            ask: None,
            workspace: &self.workspace,
            tool: &tool,
        });
        self.send_dispatch(dispatch, updates).await
    }

    async fn handle_command_say(&self, message: &AgentMessage) -> Result<(), acp::Error> {
        if message.partial {
            return Ok(());
        }
        let tool = command_tool_call(&message.text, message.timestamp);
        let dispatch = self.registry.dispatch(&ToolHandlerContext {
            message,
            ask: None,
            workspace: &self.workspace,
            tool: &tool,
        });
        self.send_dispatch(dispatch, Vec::new()).await
    }

    async fn stream_partial_tool_content(&self, message: &AgentMessage) -> Result<(), acp::Error> {
        let Ok(payload) = serde_json::from_str::<Value>(&message.text) else {
            return Ok(());
        };
        let path = payload.get("path").and_then(Value::as_str).unwrap_or_default();
        let content = payload
            .get("content")
            .or_else(|| payload.get("diff"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let updates = self.state.borrow_mut().tool_content.handle_tool_content(
            message.timestamp,
            path,
            content,
            true,
        );
        self.send_updates(updates).await
    }

    async fn handle_waiting_for_input(
        self: &Rc<Self>,
        ask: AskKind,
        message: Option<AgentMessage>,
    ) -> Result<(), acp::Error> {
        if ask != AskKind::Followup {
            // a newer gate supersedes any armed followup timer
            self.followup_generation
                .set(self.followup_generation.get().wrapping_add(1));
        }

        let raw_text = message.as_ref().map(|m| m.text.clone()).unwrap_or_default();
        let first_seen = self
            .state
            .borrow_mut()
            .answered_asks
            .insert((ask, raw_text));
        if first_seen {
            self.emit_ask_updates(ask, message.as_ref()).await?;
        } else {
            debug!(ask = ?ask, "Duplicate permission request; suppressing updates");
        }
        self.answer_ask(ask, message.as_ref()).await
    }

    async fn emit_ask_updates(
        &self,
        ask: AskKind,
        message: Option<&AgentMessage>,
    ) -> Result<(), acp::Error> {
        match ask {
            AskKind::Tool => {
                let Some(message) = message else {
                    return Ok(());
                };
                if let Some(updates) = self.plan_updates(&message.text) {
                    return self.send_updates(updates).await;
                }
                let tool = build_tool_call(&message.text, message.timestamp, &self.workspace);
                let dispatch = self.registry.dispatch(&ToolHandlerContext {
                    message,
                    ask: Some(ask),
                    workspace: &self.workspace,
                    tool: &tool,
                });
                self.send_dispatch(dispatch, Vec::new()).await
            }
            AskKind::Command => {
                let Some(message) = message else {
                    return Ok(());
                };
                let tool = command_tool_call(&message.text, message.timestamp);
                let dispatch = self.registry.dispatch(&ToolHandlerContext {
                    message,
                    ask: Some(ask),
                    workspace: &self.workspace,
                    tool: &tool,
                });
                self.send_dispatch(dispatch, Vec::new()).await
            }
            AskKind::Followup => {
                let Some(message) = message else {
                    return Ok(());
                };
                let question = followup_question(&message.text);
                if question.is_empty() {
                    return Ok(());
                }
                self.send_updates(vec![message_chunk(question)]).await
            }
            AskKind::ApiReqFailed | AskKind::MistakeLimitReached => {
                if let Some(message) = message
                    && !message.text.is_empty()
                {
                    return self
                        .send_updates(vec![message_chunk(format!(
                            "{ERROR_CHUNK_PREFIX}{}",
                            message.text
                        ))])
                        .await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Auto-approval policy: one explicit branch per ask kind. Responder
    /// failures are logged, never propagated; they must not corrupt
    /// translation state.
    async fn answer_ask(
        self: &Rc<Self>,
        ask: AskKind,
        _message: Option<&AgentMessage>,
    ) -> Result<(), acp::Error> {
        let result = match ask {
            AskKind::Tool
            | AskKind::Command
            | AskKind::CommandOutput
            | AskKind::BrowserActionLaunch
            | AskKind::UseMcpServer
            | AskKind::ResumeTask
            | AskKind::ResumeCompletedTask
            | AskKind::ApiReqFailed => self.agent.approve().await,
            AskKind::MistakeLimitReached => self.agent.respond(MISTAKE_LIMIT_GUIDANCE, &[]).await,
            AskKind::Followup => {
                self.schedule_followup_auto_response();
                Ok(())
            }
            AskKind::CompletionResult => {
                self.prompt.borrow_mut().complete(true);
                Ok(())
            }
            // nothing smarter to do with an unrecognized gate than wave it
            // through
            AskKind::Unknown => self.agent.approve().await,
        };

        if let Err(error) = result {
            warn!(%error, ask = ?ask, "Failed to answer agent permission request");
        }
        Ok(())
    }

    fn schedule_followup_auto_response(self: &Rc<Self>) {
        let generation = self.followup_generation.get().wrapping_add(1);
        self.followup_generation.set(generation);
        let handler = Rc::clone(self);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_secs(FOLLOWUP_AUTO_RESPONSE_DELAY_SECS)).await;
            if handler.followup_generation.get() != generation {
                return;
            }
            if !handler.prompt.borrow().is_processing() {
                return;
            }
            if let Err(error) = handler.agent.respond(FOLLOWUP_AUTO_RESPONSE, &[]).await {
                warn!(%error, "Failed to auto-answer followup question");
            }
        });
    }

    async fn handle_state_change(
        &self,
        previous: AgentState,
        current: AgentState,
    ) -> Result<(), acp::Error> {
        debug!(
            previous = ?previous.run_state,
            current = ?current.run_state,
            "Agent state changed"
        );

        if let Some(mode) = current.mode.clone() {
            let changed = {
                let mut state = self.state.borrow_mut();
                if state.current_mode.as_deref() == Some(mode.as_str()) {
                    false
                } else {
                    state.current_mode = Some(mode.clone());
                    true
                }
            };
            if changed {
                self.send_update(acp::SessionUpdate::CurrentModeUpdate(
                    acp::CurrentModeUpdate::new(acp::SessionModeId::new(mode)),
                ))
                .await?;
            }
        }

        let cancel_pending = self.prompt.borrow().cancel_requested();
        if cancel_pending && current.is_settled() {
            self.prompt
                .borrow_mut()
                .transition_to_complete(PromptOutcome::Cancelled);
        }
        Ok(())
    }

    /// Derives a plan update from an `update_todo_list` payload. Returns
    /// `None` for every other tool; an unchanged todo list yields an empty
    /// update set.
    fn plan_updates(&self, text: &str) -> Option<Vec<acp::SessionUpdate>> {
        let payload = serde_json::from_str::<Value>(text).ok()?;
        let tool_name = payload.get("tool").and_then(Value::as_str)?;
        if normalize_tool_name(tool_name) != TODO_LIST_TOOL_NAME {
            return None;
        }
        let todos = payload.get("todos")?;
        let fingerprint = todos.to_string();

        {
            let mut state = self.state.borrow_mut();
            if state.last_plan.as_deref() == Some(fingerprint.as_str()) {
                return Some(Vec::new());
            }
            state.last_plan = Some(fingerprint);
        }

        let entries = parse_plan_entries(todos);
        if entries.is_empty() {
            return Some(Vec::new());
        }
        Some(vec![acp::SessionUpdate::Plan(acp::Plan::new(entries))])
    }

    async fn send_dispatch(
        &self,
        dispatch: ToolDispatch,
        mut updates: Vec<acp::SessionUpdate>,
    ) -> Result<(), acp::Error> {
        // register the pending command before any await so execution output
        // arriving mid-send still finds it
        if let Some(pending) = dispatch.pending_command {
            self.state.borrow_mut().commands.track_command(
                pending.id,
                pending.command,
                pending.started_at,
            );
        }
        updates.push(acp::SessionUpdate::ToolCall(dispatch.initial));
        if let Some(completion) = dispatch.completion {
            updates.push(acp::SessionUpdate::ToolCallUpdate(completion));
        }
        self.send_updates(updates).await
    }

    async fn send_updates(&self, updates: Vec<acp::SessionUpdate>) -> Result<(), acp::Error> {
        for update in updates {
            self.send_update(update).await?;
        }
        Ok(())
    }

    async fn send_update(&self, update: acp::SessionUpdate) -> Result<(), acp::Error> {
        let (completion, completion_rx) = oneshot::channel();
        let notification = acp::SessionNotification::new(self.session_id.clone(), update);

        self.update_tx
            .send(NotificationEnvelope {
                notification,
                completion,
            })
            .map_err(|_| {
                error!("{UPDATE_CHANNEL_CLOSED_LOG}");
                acp::Error::internal_error()
            })?;

        completion_rx
            .await
            .map_err(|_| acp::Error::internal_error())
    }
}

fn streamed_chunk(kind: StreamedUpdateKind, text: impl Into<String>) -> acp::SessionUpdate {
    match kind {
        StreamedUpdateKind::Message => message_chunk(text),
        StreamedUpdateKind::Thought => thought_chunk(text),
    }
}

fn edit_stream_fields(tool: &ToolCallInfo) -> Option<(String, String)> {
    if tool.category != ToolCategory::Edit {
        return None;
    }
    let raw = tool.raw_input.as_ref()?;
    let path = raw.get("path").and_then(Value::as_str)?.to_string();
    // same field fallback as the partial path: diff-only edits stream too
    let content = raw
        .get("content")
        .or_else(|| raw.get("diff"))
        .and_then(Value::as_str)?
        .to_string();
    Some((path, content))
}

/// Followup asks carry either a bare question or `{"question": ..}` JSON.
fn followup_question(text: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(text)
        && let Some(question) = payload.get("question").and_then(Value::as_str)
    {
        return question.to_string();
    }
    text.to_string()
}

fn parse_plan_entries(todos: &Value) -> Vec<acp::PlanEntry> {
    match todos {
        Value::Array(items) => items.iter().filter_map(plan_entry_from_item).collect(),
        Value::String(text) => plan_entries_from_markdown(text),
        _ => Vec::new(),
    }
}

fn plan_entry_from_item(item: &Value) -> Option<acp::PlanEntry> {
    let content = item.get("content").and_then(Value::as_str)?;
    let status = match item.get("status").and_then(Value::as_str) {
        Some("completed") => acp::PlanEntryStatus::Completed,
        Some("in_progress") => acp::PlanEntryStatus::InProgress,
        _ => acp::PlanEntryStatus::Pending,
    };
    Some(acp::PlanEntry::new(
        content,
        acp::PlanEntryPriority::Medium,
        status,
    ))
}

fn plan_entries_from_markdown(text: &str) -> Vec<acp::PlanEntry> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line
                .trim_start()
                .trim_start_matches(['-', '*'])
                .trim_start();
            let (status, rest) = if let Some(rest) = trimmed
                .strip_prefix("[x]")
                .or_else(|| trimmed.strip_prefix("[X]"))
            {
                (acp::PlanEntryStatus::Completed, rest)
            } else if let Some(rest) = trimmed.strip_prefix("[-]") {
                (acp::PlanEntryStatus::InProgress, rest)
            } else if let Some(rest) = trimmed.strip_prefix("[ ]") {
                (acp::PlanEntryStatus::Pending, rest)
            } else {
                return None;
            };
            let content = rest.trim();
            if content.is_empty() {
                return None;
            }
            Some(acp::PlanEntry::new(
                content,
                acp::PlanEntryPriority::Medium,
                status,
            ))
        })
        .collect()
}
