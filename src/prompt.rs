//! Prompt turn lifecycle.
//!
//! A session runs at most one prompt at a time. The machine owns the settle
//! channel for the in-flight turn and guarantees exactly one outcome per
//! `start_prompt`, with cancellation taking precedence over any completion
//! signal that arrives afterwards.

use agent_client_protocol as acp;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    EndTurn,
    Refusal,
    Cancelled,
}

impl From<PromptOutcome> for acp::StopReason {
    fn from(outcome: PromptOutcome) -> Self {
        match outcome {
            PromptOutcome::EndTurn => acp::StopReason::EndTurn,
            PromptOutcome::Refusal => acp::StopReason::Refusal,
            PromptOutcome::Cancelled => acp::StopReason::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    Processing,
}

pub struct PromptStateMachine {
    state: PromptState,
    prompt_text: Option<String>,
    settle: Option<oneshot::Sender<PromptOutcome>>,
    cancellation: Option<CancellationToken>,
    cancel_requested: bool,
}

impl PromptStateMachine {
    pub fn new() -> Self {
        Self {
            state: PromptState::Idle,
            prompt_text: None,
            settle: None,
            cancellation: None,
            cancel_requested: false,
        }
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        self.state == PromptState::Processing
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt_text.as_deref()
    }

    /// Begins a new turn. A still-running previous turn is settled as
    /// cancelled and its token detached without being tripped.
    pub fn start_prompt(
        &mut self,
        text: impl Into<String>,
    ) -> (oneshot::Receiver<PromptOutcome>, CancellationToken) {
        if self.state == PromptState::Processing {
            self.settle_with(PromptOutcome::Cancelled);
            self.cancellation.take();
        }

        let (settle, receiver) = oneshot::channel();
        let token = CancellationToken::new();
        self.state = PromptState::Processing;
        self.prompt_text = Some(text.into());
        self.settle = Some(settle);
        self.cancellation = Some(token.clone());
        self.cancel_requested = false;
        (receiver, token)
    }

    /// Settles the turn from the agent's completion signal. A no-op while
    /// idle; resolves cancelled if cancellation was requested first.
    pub fn complete(&mut self, success: bool) {
        if self.state != PromptState::Processing {
            return;
        }
        let outcome = if self.cancel_requested {
            PromptOutcome::Cancelled
        } else if success {
            PromptOutcome::EndTurn
        } else {
            PromptOutcome::Refusal
        };
        self.finish(outcome);
    }

    /// Marks the turn as cancelled and trips the token. The turn stays
    /// processing until the agent confirms through a completion or an
    /// explicit transition; there is no timeout.
    pub fn cancel(&mut self) {
        if self.state != PromptState::Processing {
            return;
        }
        self.cancel_requested = true;
        if let Some(token) = &self.cancellation {
            token.cancel();
        }
    }

    /// Settles the turn with an explicit outcome. A no-op while idle.
    pub fn transition_to_complete(&mut self, outcome: PromptOutcome) {
        if self.state != PromptState::Processing {
            return;
        }
        self.finish(outcome);
    }

    /// Forces the machine back to idle. A pending turn resolves cancelled.
    pub fn reset(&mut self) {
        self.settle_with(PromptOutcome::Cancelled);
        if let Some(token) = self.cancellation.take() {
            token.cancel();
        }
        self.state = PromptState::Idle;
        self.prompt_text = None;
        self.cancel_requested = false;
    }

    fn finish(&mut self, outcome: PromptOutcome) {
        self.settle_with(outcome);
        self.cancellation.take();
        self.state = PromptState::Idle;
        self.prompt_text = None;
        self.cancel_requested = false;
    }

    fn settle_with(&mut self, outcome: PromptOutcome) {
        if let Some(settle) = self.settle.take() {
            let _ = settle.send(outcome);
        }
    }
}

impl Default for PromptStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
