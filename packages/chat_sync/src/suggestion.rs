//! Suggestion routing: an AI suggestion is shown only for the active chat.

use tracing::debug;

use crate::types::{ChatId, Suggestion};

/// Deliver `suggestion` only if it targets the active chat. Nothing is queued.
pub fn route(suggestion: Suggestion, active_chat_id: Option<&ChatId>) -> Option<Suggestion> {
    match active_chat_id {
        Some(active) if *active == suggestion.chat_id => Some(suggestion),
        _ => {
            debug!(chat_id = %suggestion.chat_id, "dropping suggestion for inactive chat");
            None
        }
    }
}

/// The single suggestion currently displayed to the viewer.
#[derive(Debug, Default)]
pub struct SuggestionSlot {
    current: Option<Suggestion>,
}

impl SuggestionSlot {
    /// Route and, if delivered, replace whatever was displayed.
    pub fn offer(&mut self, suggestion: Suggestion, active_chat_id: Option<&ChatId>) -> bool {
        match route(suggestion, active_chat_id) {
            Some(delivered) => {
                self.current = Some(delivered);
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<&Suggestion> {
        self.current.as_ref()
    }

    /// Take the reply text as a draft and hide the suggestion.
    pub fn accept(&mut self) -> Option<String> {
        self.current.take().map(|s| s.suggested_reply)
    }

    /// Hide the suggestion. Returns whether one was displayed.
    pub fn dismiss(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
