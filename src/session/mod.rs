//! Session lifecycle and the ACP agent surface.

mod events;

use agent_client_protocol as acp;
use agent_client_protocol::Client;
use anyhow::{Context, Result};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, error, warn};

use crate::constants::{
    EVENT_HANDLER_FAILURE_LOG, INITIALIZE_VERSION_MISMATCH_LOG, MODE_ID_ARCHITECT, MODE_ID_ASK,
    MODE_ID_CODE, NOTIFICATION_FORWARD_FAILURE_LOG, SESSION_ID_PREFIX,
};
use crate::extension::{ExtensionAgent, ExtensionAgentFactory, SettingsUpdate};
use crate::helpers::{agent_implementation_info, session_modes};
use crate::prompt::{PromptOutcome, PromptStateMachine};
use events::SessionEventHandler;

/// One queued session update plus the ack the sender awaits, so updates
/// reach the client in order before the turn proceeds.
pub struct NotificationEnvelope {
    pub notification: acp::SessionNotification,
    pub completion: oneshot::Sender<()>,
}

/// Ties one hosted agent to one ACP session: the event pump, the prompt
/// lifecycle, and the translated update stream.
pub struct Session {
    agent: Rc<dyn ExtensionAgent>,
    handler: Rc<SessionEventHandler>,
    prompt: Rc<RefCell<PromptStateMachine>>,
    events_task: RefCell<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn spawn(
        session_id: acp::SessionId,
        agent: Rc<dyn ExtensionAgent>,
        workspace: PathBuf,
        update_tx: mpsc::UnboundedSender<NotificationEnvelope>,
    ) -> Rc<Self> {
        let prompt = Rc::new(RefCell::new(PromptStateMachine::new()));
        let handler = Rc::new(SessionEventHandler::new(
            session_id,
            Rc::clone(&agent),
            workspace,
            Rc::clone(&prompt),
            update_tx,
        ));

        let mut events = agent.subscribe();
        let pump_handler = Rc::clone(&handler);
        let events_task = tokio::task::spawn_local(async move {
            while let Some(event) = events.recv().await {
                if let Err(error) = pump_handler.handle_event(event).await {
                    error!(%error, "{EVENT_HANDLER_FAILURE_LOG}");
                }
            }
            debug!("Agent event stream ended");
        });

        Rc::new(Self {
            agent,
            handler,
            prompt,
            events_task: RefCell::new(Some(events_task)),
        })
    }

    /// Runs one prompt turn to its single outcome. The receiver resolves
    /// when the agent confirms completion or cancellation.
    pub async fn prompt_turn(
        &self,
        text: String,
        images: Vec<String>,
    ) -> Result<PromptOutcome, acp::Error> {
        let (receiver, _cancellation) = self.prompt.borrow_mut().start_prompt(text.clone());
        if let Err(error) = self.agent.new_task(&text, &images).await {
            warn!(%error, "Failed to start agent task");
            self.prompt.borrow_mut().reset();
            return Err(acp::Error::internal_error());
        }
        receiver.await.map_err(|_| acp::Error::internal_error())
    }

    /// Requests cancellation. The turn resolves once the agent confirms;
    /// there is no timeout.
    pub async fn cancel_turn(&self) -> Result<(), acp::Error> {
        {
            self.prompt.borrow_mut().cancel();
        }
        self.agent.cancel_task().await.map_err(|error| {
            warn!(%error, "Failed to deliver cancellation to agent");
            acp::Error::internal_error()
        })
    }

    pub async fn set_mode(&self, mode: &str) -> Result<(), acp::Error> {
        self.agent
            .update_settings(SettingsUpdate {
                mode: Some(mode.to_string()),
            })
            .await
            .map_err(|error| {
                warn!(%error, mode, "Failed to switch agent mode");
                acp::Error::internal_error()
            })
    }

    pub fn current_mode(&self) -> Option<String> {
        self.handler.current_mode()
    }

    /// Tears the session down: the event pump stops before the agent is
    /// disposed so no event races the teardown.
    pub fn dispose(&self) {
        if let Some(task) = self.events_task.borrow_mut().take() {
            task.abort();
        }
        self.handler.reset();
        self.agent.dispose();
    }
}

/// The ACP-facing agent. Activates one hosted agent per session through the
/// factory and routes protocol requests to the owning session.
pub struct BridgeAgent {
    factory: Rc<dyn ExtensionAgentFactory>,
    sessions: Rc<RefCell<HashMap<acp::SessionId, Rc<Session>>>>,
    next_session_id: Cell<u64>,
    session_update_tx: mpsc::UnboundedSender<NotificationEnvelope>,
    client_capabilities: Rc<RefCell<Option<acp::ClientCapabilities>>>,
}

impl BridgeAgent {
    pub fn new(
        factory: Rc<dyn ExtensionAgentFactory>,
        session_update_tx: mpsc::UnboundedSender<NotificationEnvelope>,
    ) -> Self {
        Self {
            factory,
            sessions: Rc::new(RefCell::new(HashMap::new())),
            next_session_id: Cell::new(0),
            session_update_tx,
            client_capabilities: Rc::new(RefCell::new(None)),
        }
    }

    fn register_session_id(&self) -> acp::SessionId {
        let ordinal = self.next_session_id.get();
        self.next_session_id.set(ordinal + 1);
        acp::SessionId::new(format!("{SESSION_ID_PREFIX}-{ordinal}"))
    }

    fn session(&self, session_id: &acp::SessionId) -> Option<Rc<Session>> {
        self.sessions.borrow().get(session_id).cloned()
    }
}

#[async_trait::async_trait(?Send)]
impl acp::Agent for BridgeAgent {
    async fn initialize(
        &self,
        args: acp::InitializeRequest,
    ) -> Result<acp::InitializeResponse, acp::Error> {
        self.client_capabilities
            .replace(Some(args.client_capabilities.clone()));

        if args.protocol_version != acp::ProtocolVersion::V1 {
            warn!(
                requested = %args.protocol_version,
                "{}",
                INITIALIZE_VERSION_MISMATCH_LOG
            );
        }

        let mut capabilities = acp::AgentCapabilities::default();
        capabilities.prompt_capabilities.embedded_context = true;
        capabilities.prompt_capabilities.image = true;
        capabilities.load_session = true;

        Ok(acp::InitializeResponse::new(acp::ProtocolVersion::V1)
            .agent_capabilities(capabilities)
            .agent_info(agent_implementation_info()))
    }

    async fn authenticate(
        &self,
        _args: acp::AuthenticateRequest,
    ) -> Result<acp::AuthenticateResponse, acp::Error> {
        Ok(acp::AuthenticateResponse::default())
    }

    async fn new_session(
        &self,
        args: acp::NewSessionRequest,
    ) -> Result<acp::NewSessionResponse, acp::Error> {
        let workspace = args.cwd.clone();
        let agent = self.factory.activate(&workspace).await.map_err(|error| {
            error!(%error, "Failed to activate extension agent");
            acp::Error::internal_error()
        })?;

        let session_id = self.register_session_id();
        let session = Session::spawn(
            session_id.clone(),
            agent,
            workspace,
            self.session_update_tx.clone(),
        );
        self.sessions
            .borrow_mut()
            .insert(session_id.clone(), session);

        let modes =
            acp::SessionModeState::new(acp::SessionModeId::from(MODE_ID_CODE), session_modes());
        Ok(acp::NewSessionResponse::new(session_id).modes(modes))
    }

    async fn load_session(
        &self,
        args: acp::LoadSessionRequest,
    ) -> Result<acp::LoadSessionResponse, acp::Error> {
        // sessions are in-memory only; nothing survives a restart
        let Some(session) = self.session(&args.session_id) else {
            return Err(acp::Error::invalid_params().data(json!({
                "reason": "unknown_session",
                "session_id": args.session_id.0,
            })));
        };

        let current = session
            .current_mode()
            .map(|mode| acp::SessionModeId::new(mode))
            .unwrap_or_else(|| acp::SessionModeId::from(MODE_ID_CODE));
        let modes = acp::SessionModeState::new(current, session_modes());
        Ok(acp::LoadSessionResponse::new().modes(modes))
    }

    async fn prompt(&self, args: acp::PromptRequest) -> Result<acp::PromptResponse, acp::Error> {
        let Some(session) = self.session(&args.session_id) else {
            return Err(acp::Error::invalid_params().data(json!({ "reason": "unknown_session" })));
        };

        let (text, images) = resolve_prompt(&args.prompt);
        let outcome = session.prompt_turn(text, images).await?;
        Ok(acp::PromptResponse::new(outcome.into()))
    }

    async fn set_session_mode(
        &self,
        args: acp::SetSessionModeRequest,
    ) -> Result<acp::SetSessionModeResponse, acp::Error> {
        let Some(session) = self.session(&args.session_id) else {
            return Err(acp::Error::invalid_params().data(json!({ "reason": "unknown_session" })));
        };

        let valid_modes: HashSet<Arc<str>> = [
            Arc::from(MODE_ID_ASK),
            Arc::from(MODE_ID_ARCHITECT),
            Arc::from(MODE_ID_CODE),
        ]
        .into_iter()
        .collect();
        if !valid_modes.contains(&args.mode_id.0) {
            return Err(acp::Error::invalid_params()
                .data(json!({ "reason": "unknown_mode", "mode_id": args.mode_id.0 })));
        }

        // the confirmed mode comes back through the agent's state change and
        // is emitted as a current_mode_update there
        session.set_mode(args.mode_id.0.as_ref()).await?;
        Ok(acp::SetSessionModeResponse::new())
    }

    async fn cancel(&self, args: acp::CancelNotification) -> Result<(), acp::Error> {
        if let Some(session) = self.session(&args.session_id) {
            session.cancel_turn().await?;
        }
        Ok(())
    }
}

/// Flattens prompt content blocks into the task text handed to the agent.
/// Image blocks travel separately as data URIs.
fn resolve_prompt(prompt: &[acp::ContentBlock]) -> (String, Vec<String>) {
    let mut aggregated = String::new();
    let mut images = Vec::new();

    for block in prompt {
        match block {
            acp::ContentBlock::Text(text) => append_segment(&mut aggregated, &text.text),
            acp::ContentBlock::ResourceLink(link) => {
                append_segment(&mut aggregated, &format!("@{}", link.uri));
            }
            acp::ContentBlock::Resource(resource) => match &resource.resource {
                acp::EmbeddedResourceResource::TextResourceContents(text) => {
                    append_segment(
                        &mut aggregated,
                        &format!("<file uri=\"{}\">\n{}\n</file>", text.uri, text.text),
                    );
                }
                acp::EmbeddedResourceResource::BlobResourceContents(blob) => {
                    warn!(uri = blob.uri, "Ignoring unsupported embedded blob resource");
                }
                _ => {
                    warn!("Ignoring unrecognized embedded resource variant");
                }
            },
            acp::ContentBlock::Image(image) => {
                images.push(format!("data:{};base64,{}", image.mime_type, image.data));
            }
            acp::ContentBlock::Audio(audio) => {
                warn!(mime = audio.mime_type, "Ignoring unsupported audio block");
            }
            _ => {
                warn!("Ignoring unrecognized prompt content block");
            }
        }
    }

    (aggregated, images)
}

fn append_segment(target: &mut String, segment: &str) {
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(segment);
}

/// Serves the bridge over stdio until the client disconnects.
pub async fn serve(factory: Rc<dyn ExtensionAgentFactory>) -> Result<()> {
    let outgoing = tokio::io::stdout().compat_write();
    let incoming = tokio::io::stdin().compat();

    let local_set = tokio::task::LocalSet::new();
    local_set
        .run_until(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEnvelope>();
            let agent = BridgeAgent::new(factory, tx);
            let (conn, io_task) = acp::AgentSideConnection::new(agent, outgoing, incoming, |fut| {
                tokio::task::spawn_local(fut);
            });
            let conn = Arc::new(conn);

            let notifications_conn = Arc::clone(&conn);
            let notifications = tokio::task::spawn_local(async move {
                while let Some(envelope) = rx.recv().await {
                    let result = notifications_conn
                        .session_notification(envelope.notification)
                        .await;
                    if let Err(error) = result {
                        error!(%error, "{NOTIFICATION_FORWARD_FAILURE_LOG}");
                    }
                    let _ = envelope.completion.send(());
                }
            });

            let io_result = io_task.await;
            notifications.abort();
            io_result
        })
        .await
        .context("ACP stdio bridge task failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{
        AgentCommandError, AgentEvent, AgentMessage, AgentState, AskKind, RunState, SayKind,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::future::Future;

    struct StubAgent {
        events: RefCell<Option<mpsc::UnboundedReceiver<AgentEvent>>>,
        approvals: Cell<usize>,
        responses: RefCell<Vec<String>>,
        cancel_requests: Cell<usize>,
    }

    impl StubAgent {
        fn new() -> (Rc<Self>, mpsc::UnboundedSender<AgentEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let agent = Rc::new(Self {
                events: RefCell::new(Some(rx)),
                approvals: Cell::new(0),
                responses: RefCell::new(Vec::new()),
                cancel_requests: Cell::new(0),
            });
            (agent, tx)
        }
    }

    #[async_trait::async_trait(?Send)]
    impl ExtensionAgent for StubAgent {
        fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
            self.events.borrow_mut().take().expect("subscribed once")
        }

        async fn new_task(&self, _text: &str, _images: &[String]) -> Result<(), AgentCommandError> {
            Ok(())
        }

        async fn cancel_task(&self) -> Result<(), AgentCommandError> {
            self.cancel_requests.set(self.cancel_requests.get() + 1);
            Ok(())
        }

        async fn update_settings(&self, _update: SettingsUpdate) -> Result<(), AgentCommandError> {
            Ok(())
        }

        async fn respond(&self, text: &str, _images: &[String]) -> Result<(), AgentCommandError> {
            self.responses.borrow_mut().push(text.to_string());
            Ok(())
        }

        async fn approve(&self) -> Result<(), AgentCommandError> {
            self.approvals.set(self.approvals.get() + 1);
            Ok(())
        }

        async fn reject(&self) -> Result<(), AgentCommandError> {
            Ok(())
        }

        fn dispose(&self) {}
    }

    fn session_id() -> acp::SessionId {
        acp::SessionId::new("acp-bridge-session-test")
    }

    /// Drains the update pump, acking every envelope so senders unblock.
    fn collect_updates(
        mut rx: mpsc::UnboundedReceiver<NotificationEnvelope>,
    ) -> Rc<RefCell<Vec<acp::SessionUpdate>>> {
        let collected = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&collected);
        tokio::task::spawn_local(async move {
            while let Some(envelope) = rx.recv().await {
                sink.borrow_mut().push(envelope.notification.update);
                let _ = envelope.completion.send(());
            }
        });
        collected
    }

    async fn run_local<F: Future>(future: F) -> F::Output {
        tokio::task::LocalSet::new().run_until(future).await
    }

    fn settled_state(mode: Option<&str>) -> AgentState {
        AgentState {
            run_state: RunState::Idle,
            is_running: false,
            is_streaming: false,
            current_ask: None,
            mode: mode.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn prompt_streams_text_and_resolves_end_turn() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            events
                .send(AgentEvent::Message(AgentMessage::say(
                    1,
                    SayKind::Text,
                    "Hello",
                    true,
                )))
                .unwrap();
            events
                .send(AgentEvent::MessageUpdated(AgentMessage::say(
                    1,
                    SayKind::Text,
                    "Hello, world",
                    false,
                )))
                .unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            let outcome = session
                .prompt_turn("greet".to_string(), Vec::new())
                .await
                .unwrap();
            assert_eq!(outcome, PromptOutcome::EndTurn);

            let chunks: Vec<String> = updates
                .borrow()
                .iter()
                .filter_map(|update| match update {
                    acp::SessionUpdate::AgentMessageChunk(chunk) => match &chunk.content {
                        acp::ContentBlock::Text(text) => Some(text.text.clone()),
                        _ => None,
                    },
                    _ => None,
                })
                .collect();
            assert_eq!(chunks, vec!["Hello".to_string(), ", world".to_string()]);
        })
        .await;
    }

    #[tokio::test]
    async fn cancellation_outranks_a_successful_completion() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let _updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let stub = Rc::clone(&agent);
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let turn = {
                let session = Rc::clone(&session);
                tokio::task::spawn_local(async move {
                    session.prompt_turn("work".to_string(), Vec::new()).await
                })
            };
            tokio::task::yield_now().await;

            session.cancel_turn().await.unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            let outcome = turn.await.unwrap().unwrap();
            assert_eq!(outcome, PromptOutcome::Cancelled);
            assert_eq!(stub.cancel_requests.get(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn settled_state_change_resolves_a_cancelled_turn() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let _updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let turn = {
                let session = Rc::clone(&session);
                tokio::task::spawn_local(async move {
                    session.prompt_turn("work".to_string(), Vec::new()).await
                })
            };
            tokio::task::yield_now().await;

            session.cancel_turn().await.unwrap();
            events
                .send(AgentEvent::StateChange {
                    previous: AgentState {
                        run_state: RunState::Running,
                        is_running: true,
                        is_streaming: false,
                        current_ask: None,
                        mode: None,
                    },
                    current: settled_state(None),
                })
                .unwrap();

            assert_eq!(turn.await.unwrap().unwrap(), PromptOutcome::Cancelled);
        })
        .await;
    }

    #[tokio::test]
    async fn duplicate_permission_requests_reapprove_without_updates() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let stub = Rc::clone(&agent);
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let ask_text = json!({"tool": "read_file", "path": "src/lib.rs"}).to_string();
            let ask = AgentMessage::ask(5, AskKind::Tool, ask_text, false);
            for _ in 0..2 {
                events
                    .send(AgentEvent::WaitingForInput {
                        ask: AskKind::Tool,
                        message: Some(ask.clone()),
                    })
                    .unwrap();
            }
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("read it".to_string(), Vec::new())
                .await
                .unwrap();

            assert_eq!(stub.approvals.get(), 2);
            let tool_calls = updates
                .borrow()
                .iter()
                .filter(|update| matches!(update, acp::SessionUpdate::ToolCall(_)))
                .count();
            assert_eq!(tool_calls, 1);
        })
        .await;
    }

    #[tokio::test]
    async fn search_permission_emits_mined_locations() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let ask_text = json!({
                "tool": "searchFiles",
                "path": "src",
                "regex": "fn",
                "content": "# src/a.ts\nhit\n# src/b.ts\nhit\n# src/a.ts\nhit\n",
            })
            .to_string();
            events
                .send(AgentEvent::WaitingForInput {
                    ask: AskKind::Tool,
                    message: Some(AgentMessage::ask(8, AskKind::Tool, ask_text, false)),
                })
                .unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("find fns".to_string(), Vec::new())
                .await
                .unwrap();

            let collected = updates.borrow();
            let call = collected
                .iter()
                .find_map(|update| match update {
                    acp::SessionUpdate::ToolCall(call) => Some(call.clone()),
                    _ => None,
                })
                .expect("tool call emitted");
            let paths: Vec<_> = call
                .locations
                .iter()
                .map(|location| location.path.clone())
                .collect();
            assert_eq!(
                paths,
                vec![
                    PathBuf::from("/ws/src/a.ts"),
                    PathBuf::from("/ws/src/b.ts"),
                ]
            );
        })
        .await;
    }

    #[tokio::test]
    async fn command_flow_opens_fence_streams_and_completes() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            events
                .send(AgentEvent::WaitingForInput {
                    ask: AskKind::Command,
                    message: Some(AgentMessage::ask(20, AskKind::Command, "echo hi", false)),
                })
                .unwrap();
            events
                .send(AgentEvent::CommandExecutionOutput {
                    execution_id: "exec-20".to_string(),
                    output: "hi\n".to_string(),
                })
                .unwrap();
            events
                .send(AgentEvent::Message(AgentMessage::say(
                    21,
                    SayKind::CommandOutput,
                    "hi\n",
                    false,
                )))
                .unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("run echo".to_string(), Vec::new())
                .await
                .unwrap();

            let collected = updates.borrow();
            let completion = collected
                .iter()
                .find_map(|update| match update {
                    acp::SessionUpdate::ToolCallUpdate(update) => Some(update.clone()),
                    _ => None,
                })
                .expect("command completion emitted");
            assert_eq!(completion.tool_call_id.0.as_ref(), "tool-20");
            let raw = completion.fields.raw_output.as_ref().unwrap();
            assert_eq!(raw["output"], "hi\n");
        })
        .await;
    }

    #[tokio::test]
    async fn mode_changes_surface_exactly_once() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let running = AgentState {
                run_state: RunState::Running,
                is_running: true,
                is_streaming: false,
                current_ask: None,
                mode: Some("architect".to_string()),
            };
            events
                .send(AgentEvent::StateChange {
                    previous: settled_state(Some("code")),
                    current: running.clone(),
                })
                .unwrap();
            // repeated state change with the same mode must not re-emit
            events
                .send(AgentEvent::StateChange {
                    previous: running,
                    current: settled_state(Some("architect")),
                })
                .unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("switch".to_string(), Vec::new())
                .await
                .unwrap();

            let mode_updates = updates
                .borrow()
                .iter()
                .filter(
                    |update| matches!(update, acp::SessionUpdate::CurrentModeUpdate(_)),
                )
                .count();
            assert_eq!(mode_updates, 1);
            assert_eq!(session.current_mode().as_deref(), Some("architect"));
        })
        .await;
    }

    #[tokio::test]
    async fn todo_list_updates_become_plans_only_on_change() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let todos = json!({
                "tool": "update_todo_list",
                "todos": [
                    {"content": "Investigate", "status": "in_progress"},
                    {"content": "Fix", "status": "pending"},
                ],
            })
            .to_string();
            for _ in 0..2 {
                events
                    .send(AgentEvent::Message(AgentMessage::say(
                        30,
                        SayKind::Tool,
                        todos.clone(),
                        false,
                    )))
                    .unwrap();
            }
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("plan".to_string(), Vec::new())
                .await
                .unwrap();

            let plans = updates
                .borrow()
                .iter()
                .filter(|update| matches!(update, acp::SessionUpdate::Plan(_)))
                .count();
            assert_eq!(plans, 1);
        })
        .await;
    }

    #[tokio::test]
    async fn diff_streamed_edits_close_their_preview_fence() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let diff = "--- a/a.rs\n+++ b/a.rs\n@@ -1,1 +1,1 @@\n-old\n+new\n";
            let payload = json!({"tool": "apply_diff", "path": "a.rs", "diff": diff}).to_string();
            events
                .send(AgentEvent::Message(AgentMessage::say(
                    70,
                    SayKind::Tool,
                    payload.clone(),
                    true,
                )))
                .unwrap();
            events
                .send(AgentEvent::Message(AgentMessage::say(
                    70,
                    SayKind::Tool,
                    payload,
                    false,
                )))
                .unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("patch it".to_string(), Vec::new())
                .await
                .unwrap();

            let chunks: Vec<String> = updates
                .borrow()
                .iter()
                .filter_map(|update| match update {
                    acp::SessionUpdate::AgentMessageChunk(chunk) => match &chunk.content {
                        acp::ContentBlock::Text(text) => Some(text.text.clone()),
                        _ => None,
                    },
                    _ => None,
                })
                .collect();
            assert_eq!(
                chunks,
                vec![
                    "\n`a.rs`\n```\n".to_string(),
                    diff.to_string(),
                    crate::constants::CONTENT_FENCE_CLOSE.to_string(),
                ]
            );
            let tool_calls = updates
                .borrow()
                .iter()
                .filter(|update| matches!(update, acp::SessionUpdate::ToolCall(_)))
                .count();
            assert_eq!(tool_calls, 1);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn followup_questions_auto_answer_after_the_delay() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let _updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let stub = Rc::clone(&agent);
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let turn = {
                let session = Rc::clone(&session);
                tokio::task::spawn_local(async move {
                    session.prompt_turn("ask me".to_string(), Vec::new()).await
                })
            };
            tokio::task::yield_now().await;

            events
                .send(AgentEvent::WaitingForInput {
                    ask: AskKind::Followup,
                    message: Some(AgentMessage::ask(
                        50,
                        AskKind::Followup,
                        r#"{"question": "Which path?"}"#,
                        false,
                    )),
                })
                .unwrap();
            tokio::task::yield_now().await;
            assert!(stub.responses.borrow().is_empty());

            tokio::time::sleep(std::time::Duration::from_secs(31)).await;
            assert_eq!(
                stub.responses.borrow().as_slice(),
                [crate::constants::FOLLOWUP_AUTO_RESPONSE.to_string()]
            );

            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();
            turn.await.unwrap().unwrap();
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn a_newer_ask_disarms_the_followup_timer() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let _updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let stub = Rc::clone(&agent);
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            let turn = {
                let session = Rc::clone(&session);
                tokio::task::spawn_local(async move {
                    session.prompt_turn("ask me".to_string(), Vec::new()).await
                })
            };
            tokio::task::yield_now().await;

            events
                .send(AgentEvent::WaitingForInput {
                    ask: AskKind::Followup,
                    message: Some(AgentMessage::ask(60, AskKind::Followup, "Which?", false)),
                })
                .unwrap();
            tokio::task::yield_now().await;
            events
                .send(AgentEvent::WaitingForInput {
                    ask: AskKind::Tool,
                    message: Some(AgentMessage::ask(
                        61,
                        AskKind::Tool,
                        json!({"tool": "read_file", "path": "a.rs"}).to_string(),
                        false,
                    )),
                })
                .unwrap();
            tokio::task::yield_now().await;

            tokio::time::sleep(std::time::Duration::from_secs(31)).await;
            assert!(stub.responses.borrow().is_empty());

            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();
            turn.await.unwrap().unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn completion_result_say_messages_are_suppressed() {
        run_local(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let updates = collect_updates(rx);
            let (agent, events) = StubAgent::new();
            let session = Session::spawn(session_id(), agent, PathBuf::from("/ws"), tx);

            events
                .send(AgentEvent::Message(AgentMessage::say(
                    40,
                    SayKind::CompletionResult,
                    "All done",
                    false,
                )))
                .unwrap();
            events
                .send(AgentEvent::TaskCompleted { success: true })
                .unwrap();

            session
                .prompt_turn("finish".to_string(), Vec::new())
                .await
                .unwrap();
            assert!(updates.borrow().is_empty());
        })
        .await;
    }
}
