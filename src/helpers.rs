use agent_client_protocol as acp;

use crate::constants::{MODE_ID_ARCHITECT, MODE_ID_ASK, MODE_ID_CODE};

pub(crate) fn text_chunk(text: impl Into<String>) -> acp::ContentChunk {
    acp::ContentChunk::new(acp::ContentBlock::from(text.into()))
}

pub(crate) fn message_chunk(text: impl Into<String>) -> acp::SessionUpdate {
    acp::SessionUpdate::AgentMessageChunk(text_chunk(text))
}

pub(crate) fn thought_chunk(text: impl Into<String>) -> acp::SessionUpdate {
    acp::SessionUpdate::AgentThoughtChunk(text_chunk(text))
}

pub(crate) fn session_modes() -> Vec<acp::SessionMode> {
    vec![
        acp::SessionMode::new(MODE_ID_ASK, "Ask")
            .description("Answer questions without modifying the workspace"),
        acp::SessionMode::new(MODE_ID_ARCHITECT, "Architect")
            .description("Design and plan software systems without implementation"),
        acp::SessionMode::new(MODE_ID_CODE, "Code")
            .description("Write and modify code with full tool access"),
    ]
}

pub(crate) fn agent_implementation_info() -> acp::Implementation {
    acp::Implementation::new("acp-bridge", env!("CARGO_PKG_VERSION"))
        .title(Some("ACP Bridge".to_string()))
}
