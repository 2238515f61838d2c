//! Live shell output, fenced and streamed exactly once.
//!
//! Correlation between execution ids and tool-call ids is weak on the wire,
//! so completion matches the most recently tracked pending command and closes
//! the most recently opened fence.

use agent_client_protocol as acp;
use serde_json::json;
use std::sync::Arc;

use crate::constants::{COMMAND_FENCE_CLOSE, COMMAND_FENCE_OPEN};
use crate::delta::DeltaTracker;
use crate::helpers::message_chunk;

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub id: String,
    pub command: String,
    pub started_at: i64,
}

/// Pure reducer: methods return the updates to forward, no I/O happens here.
#[derive(Default)]
pub struct CommandStreamManager {
    pending: Vec<PendingCommand>,
    deltas: DeltaTracker<String>,
    open_fences: Vec<String>,
}

impl CommandStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command awaiting output. Re-tracking an id replaces the
    /// earlier registration and makes it the most recent one.
    pub fn track_command(
        &mut self,
        id: impl Into<String>,
        command: impl Into<String>,
        started_at: i64,
    ) {
        let id = id.into();
        self.pending.retain(|entry| entry.id != id);
        self.pending.push(PendingCommand {
            id,
            command: command.into(),
            started_at,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn most_recent(&self) -> Option<&PendingCommand> {
        self.pending.last()
    }

    /// Streams one growing execution output. The first delivery for an id
    /// opens its fence; every delivery emits at most one delta chunk.
    pub fn handle_execution_output(
        &mut self,
        execution_id: &str,
        output: &str,
    ) -> Vec<acp::SessionUpdate> {
        let mut updates = Vec::new();
        let key = execution_id.to_string();
        if !self.open_fences.iter().any(|id| id == &key) {
            self.open_fences.push(key.clone());
            updates.push(message_chunk(COMMAND_FENCE_OPEN));
        }
        if let Some(delta) = self.deltas.get_delta(&key, output) {
            updates.push(message_chunk(delta));
        }
        updates
    }

    /// Handles a `command_output` message. Partial deliveries stream into a
    /// fence keyed by the most recent pending command; the terminal delivery
    /// flushes and closes the most recently opened fence, completes the
    /// pending command with the full output as `raw_output`, and unregisters
    /// it. Without a pending command the terminal delivery is dropped.
    pub fn handle_command_output(&mut self, output: &str, partial: bool) -> Vec<acp::SessionUpdate> {
        if partial {
            let Some(pending) = self.pending.last() else {
                return Vec::new();
            };
            let id = pending.id.clone();
            return self.handle_execution_output(&id, output);
        }

        let mut updates = Vec::new();
        let Some(pending) = self.pending.pop() else {
            return updates;
        };

        if let Some(fence_id) = self.open_fences.pop() {
            if let Some(delta) = self.deltas.get_delta(&fence_id, output) {
                updates.push(message_chunk(delta));
            }
            self.deltas.clear(&fence_id);
            updates.push(message_chunk(COMMAND_FENCE_CLOSE));
        }

        let fields = acp::ToolCallUpdateFields::default()
            .status(acp::ToolCallStatus::Completed)
            .raw_output(json!({
                "command": pending.command,
                "output": output,
            }));
        updates.push(acp::SessionUpdate::ToolCallUpdate(acp::ToolCallUpdate::new(
            acp::ToolCallId::new(Arc::from(pending.id)),
            fields,
        )));
        updates
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.deltas.reset();
        self.open_fences.clear();
    }
}
