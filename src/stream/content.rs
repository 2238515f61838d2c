//! Streams file content as a tool writes it, with a bounded preview.

use agent_client_protocol as acp;
use std::collections::HashMap;
use std::path::Path;

use crate::constants::{
    CONTENT_FENCE_CLOSE, CONTENT_PREVIEW_MAX_LINES, CONTENT_PROGRESS_PREFIX,
    CONTENT_PROGRESS_SUFFIX,
};
use crate::delta::DeltaTracker;
use crate::helpers::message_chunk;

/// Pure reducer over `(timestamp, path, content, partial)` deliveries.
///
/// The header is withheld until the delivery carries both a plausible file
/// path and non-empty content; early partials often have neither.
#[derive(Default)]
pub struct ToolContentStreamManager {
    deltas: DeltaTracker<i64>,
    lines_streamed: HashMap<i64, usize>,
}

impl ToolContentStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_tool_content(
        &mut self,
        timestamp: i64,
        path: &str,
        content: &str,
        partial: bool,
    ) -> Vec<acp::SessionUpdate> {
        let mut updates = Vec::new();

        if !self.deltas.header_emitted(&timestamp) {
            if !plausible_file_path(path) || content.is_empty() {
                return updates;
            }
            updates.push(message_chunk(format!("\n`{path}`\n```\n")));
            self.deltas.mark_header_emitted(&timestamp);
        }

        if let Some(delta) = self.deltas.get_delta(&timestamp, content) {
            let streamed = self.lines_streamed.entry(timestamp).or_insert(0);
            if *streamed < CONTENT_PREVIEW_MAX_LINES {
                *streamed += delta.lines().count().max(1);
                updates.push(message_chunk(delta));
            } else {
                updates.push(message_chunk(format!(
                    "{CONTENT_PROGRESS_PREFIX}{}{CONTENT_PROGRESS_SUFFIX}",
                    content.len()
                )));
            }
        }

        if !partial {
            if self.deltas.header_emitted(&timestamp) {
                updates.push(message_chunk(CONTENT_FENCE_CLOSE));
            }
            self.deltas.clear(&timestamp);
            self.lines_streamed.remove(&timestamp);
        }

        updates
    }

    pub fn reset(&mut self) {
        self.deltas.reset();
        self.lines_streamed.clear();
    }
}

fn plausible_file_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|extension| !extension.is_empty())
}
