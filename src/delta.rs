//! Incremental text differ for streams that re-deliver their full text.
//!
//! The agent repeats the whole accumulated text of a message on every
//! delivery. `DeltaTracker` remembers what was already emitted per stream key
//! and hands back only the unseen suffix, so every character reaches the
//! client exactly once.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Default)]
struct StreamState {
    last_text: String,
    header_emitted: bool,
}

#[derive(Debug)]
pub struct DeltaTracker<K> {
    streams: HashMap<K, StreamState>,
}

impl<K: Eq + Hash + Clone> DeltaTracker<K> {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }

    /// Returns the portion of `full_text` not yet emitted for this stream.
    ///
    /// An unseen key yields the whole text. A shrinking or diverging text is
    /// a stream restart, never an error: the stored value is replaced and the
    /// whole text is yielded again. Equal text yields `None`.
    pub fn get_delta(&mut self, key: &K, full_text: &str) -> Option<String> {
        match self.streams.get_mut(key) {
            None => {
                self.streams.insert(
                    key.clone(),
                    StreamState {
                        last_text: full_text.to_string(),
                        header_emitted: false,
                    },
                );
                if full_text.is_empty() {
                    None
                } else {
                    Some(full_text.to_string())
                }
            }
            Some(state) => {
                if full_text == state.last_text {
                    return None;
                }
                let delta = match full_text.strip_prefix(state.last_text.as_str()) {
                    Some(suffix) => suffix.to_string(),
                    None => full_text.to_string(),
                };
                state.last_text = full_text.to_string();
                if delta.is_empty() { None } else { Some(delta) }
            }
        }
    }

    pub fn is_tracked(&self, key: &K) -> bool {
        self.streams.contains_key(key)
    }

    pub fn header_emitted(&self, key: &K) -> bool {
        self.streams
            .get(key)
            .map(|state| state.header_emitted)
            .unwrap_or(false)
    }

    pub fn mark_header_emitted(&mut self, key: &K) {
        self.streams
            .entry(key.clone())
            .or_default()
            .header_emitted = true;
    }

    pub fn last_text(&self, key: &K) -> Option<&str> {
        self.streams.get(key).map(|state| state.last_text.as_str())
    }

    pub fn clear(&mut self, key: &K) {
        self.streams.remove(key);
    }

    pub fn reset(&mut self) {
        self.streams.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for DeltaTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
