//! Wire frames carried by the dashboard and chat-room channels.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::MalformedEvent;
use crate::types::{ChatSummary, Message, Suggestion};

/// Type tag of the suggestion event on the dashboard feed.
pub const AI_SUGGESTION: &str = "ai_suggestion";

/// Anything the dashboard feed can deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DashboardEvent {
    /// Full or partial chat-list snapshot (a bare JSON array on the wire).
    Snapshot(Vec<ChatSummary>),
    /// `{"type":"ai_suggestion", ...}`
    Suggestion(Suggestion),
}

/// Parse one dashboard frame.
///
/// Snapshot entries are decoded one at a time. An entry that fails to decode
/// is logged and skipped; the rest of the list is kept.
pub fn parse_dashboard_frame(text: &str) -> Result<DashboardEvent, MalformedEvent> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| MalformedEvent::new(e.to_string(), text))?;

    if let Value::Array(entries) = value {
        return Ok(DashboardEvent::Snapshot(parse_snapshot(entries)));
    }
    if !value.is_object() {
        return Err(MalformedEvent::new("expected array or object", text));
    }

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some(AI_SUGGESTION) => serde_json::from_value(value)
            .map(DashboardEvent::Suggestion)
            .map_err(|e| MalformedEvent::new(format!("bad suggestion: {e}"), text)),
        Some(other) => Err(MalformedEvent::new(
            format!("unknown event type '{other}'"),
            text,
        )),
        None => Err(MalformedEvent::new("event without type tag", text)),
    }
}

fn parse_snapshot(entries: Vec<Value>) -> Vec<ChatSummary> {
    let total = entries.len();
    let chats: Vec<ChatSummary> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(chat) => Some(chat),
            Err(e) => {
                warn!(index, "skipping bad chat list entry: {}", e);
                None
            }
        })
        .collect();
    if chats.len() < total {
        warn!(kept = chats.len(), total, "chat list snapshot had bad entries");
    }
    chats
}

/// Parse one inbound chat-room frame (`{sender_external_id, content}`).
pub fn parse_chat_frame(text: &str) -> Result<Message, MalformedEvent> {
    serde_json::from_str(text).map_err(|e| MalformedEvent::new(e.to_string(), text))
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    content: &'a str,
}

/// Encode an outbound chat message.
pub fn encode_outbound(content: &str) -> String {
    // A struct holding a single &str always serializes.
    serde_json::to_string(&OutboundFrame { content }).unwrap_or_default()
}
