use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::AuthError;

/// Number of characters shown when an identifier is abbreviated for display.
pub const SHORT_ID_LEN: usize = 8;

fn short(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First few characters, for headers and list rows.
            pub fn short(&self) -> &str {
                short(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// Backend identifier of a chat (`chat_external_id` on the wire).
    ChatId
);
opaque_id!(
    /// Backend identifier of a user or agent (`user_external_id` on the wire).
    UserId
);
opaque_id!(
    /// Backend identifier of a persisted message, when the backend supplies one.
    MessageId
);

/// Bearer token returned by login. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Role attached to a logged-in account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Superadmin,
    #[serde(other)]
    Other,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::Superadmin)
    }

    /// Gate for the admin dashboard: anything but admin/superadmin is rejected
    /// before a session or transport is created.
    pub fn ensure_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                role: self.to_string(),
            })
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
            Role::Other => "other",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a chat as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Open,
    Pending,
    Closed,
    #[serde(other)]
    Other,
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatStatus::Open => "open",
            ChatStatus::Pending => "pending",
            ChatStatus::Closed => "closed",
            ChatStatus::Other => "other",
        };
        f.write_str(s)
    }
}

/// One row of the admin chat list. Keyed by `chat_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    #[serde(rename = "chat_external_id", alias = "chat_id")]
    pub chat_id: ChatId,
    #[serde(rename = "user_external_id", alias = "user_id")]
    pub user_id: UserId,
    pub status: ChatStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// RFC 3339, or the same shape without an offset (taken as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

/// A chat message, either replayed from history or received live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(
        rename = "message_external_id",
        alias = "message_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<MessageId>,
    #[serde(rename = "sender_external_id", alias = "sender_id")]
    pub sender_id: UserId,
    pub content: String,
}

impl Message {
    pub fn new(sender_id: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender_id: sender_id.into(),
            content: content.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether the viewer identified by `user` wrote this message.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }
}

/// Action tag attached to an AI suggestion (e.g. `close_chat`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SuggestedAction(String);

impl SuggestedAction {
    /// `"none"` and blank tags mean "no action".
    pub fn parse(raw: &str) -> Option<Self> {
        let tag = raw.trim();
        if tag.is_empty() || tag.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(Self(tag.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn deserialize_action<'de, D>(deserializer: D) -> Result<Option<SuggestedAction>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(SuggestedAction::parse))
}

/// Externally generated candidate reply for one chat. Transient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "chat_external_id", alias = "chat_id")]
    pub chat_id: ChatId,
    pub suggested_reply: String,
    #[serde(
        default,
        deserialize_with = "deserialize_action",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_action: Option<SuggestedAction>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_without_offset_is_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T10:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T10:05:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:05:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-05-01T10:05:00.5"),
            Some(expected + chrono::Duration::milliseconds(500))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("2024-05-01"), None);
    }

    #[test]
    fn summary_accepts_naive_updated_at() {
        let chat: ChatSummary = serde_json::from_str(
            r#"{"chat_external_id":"c1","user_external_id":"u1","status":"open","updated_at":"2024-05-01T10:05:00"}"#,
        )
        .unwrap();
        assert_eq!(chat.updated_at, Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap());

        let bad = serde_json::from_str::<ChatSummary>(
            r#"{"chat_external_id":"c1","user_external_id":"u1","status":"open","updated_at":"soon"}"#,
        )
        .unwrap_err();
        assert!(bad.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn short_id_truncates_on_char_boundary() {
        let id = ChatId::new("1a2b3c4d-5e6f");
        assert_eq!(id.short(), "1a2b3c4d");
        assert_eq!(ChatId::new("abc").short(), "abc");
        assert_eq!(ChatId::new("ééééééééé").short(), "éééééééé");
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("secret");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
        assert_eq!(token.expose(), "secret");
    }

    #[test]
    fn admin_roles_pass_gate() {
        assert!(Role::Admin.ensure_admin().is_ok());
        assert!(Role::Superadmin.ensure_admin().is_ok());
    }

    #[test]
    fn user_role_is_forbidden_on_admin_surface() {
        let err = Role::User.ensure_admin().unwrap_err();
        assert_eq!(
            err,
            AuthError::Forbidden {
                role: "user".to_string()
            }
        );
    }

    #[test]
    fn unknown_role_deserializes_as_other() {
        let role: Role = serde_json::from_str("\"auditor\"").unwrap();
        assert_eq!(role, Role::Other);
        assert!(!role.is_admin());
    }

    #[test]
    fn summary_uses_external_id_field_names() {
        let json = r#"{
            "chat_external_id": "c1",
            "user_external_id": "u1",
            "status": "open",
            "updated_at": "2024-05-01T10:00:00Z"
        }"#;
        let summary: ChatSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.chat_id, ChatId::new("c1"));
        assert_eq!(summary.user_id, UserId::new("u1"));
        assert_eq!(summary.status, ChatStatus::Open);
    }

    #[test]
    fn summary_accepts_short_field_names_and_unknown_status() {
        let json = r#"{
            "chat_id": "c1",
            "user_id": "u1",
            "status": "escalated",
            "updated_at": "2024-05-01T10:00:00Z"
        }"#;
        let summary: ChatSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.chat_id.as_str(), "c1");
        assert_eq!(summary.status, ChatStatus::Other);
    }

    #[test]
    fn message_ownership() {
        let me = UserId::new("agent-1");
        let msg = Message::new("agent-1", "hello");
        assert!(msg.is_from(&me));
        assert!(!msg.is_from(&UserId::new("u1")));
    }

    #[test]
    fn message_ignores_extra_fields() {
        let json = r#"{"sender_external_id":"u1","content":"hi","created_at":"2024-05-01T10:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg, Message::new("u1", "hi"));
    }

    #[test]
    fn none_action_is_absent() {
        let json = r#"{"chat_external_id":"c1","suggested_reply":"try X","suggested_action":"none"}"#;
        let s: Suggestion = serde_json::from_str(json).unwrap();
        assert_eq!(s.suggested_action, None);

        let json = r#"{"chat_external_id":"c1","suggested_reply":"bye","suggested_action":"close_chat"}"#;
        let s: Suggestion = serde_json::from_str(json).unwrap();
        assert_eq!(s.suggested_action.as_ref().map(|a| a.as_str()), Some("close_chat"));
    }

    #[test]
    fn missing_action_is_absent() {
        let json = r#"{"chat_id":"c1","suggested_reply":"try X"}"#;
        let s: Suggestion = serde_json::from_str(json).unwrap();
        assert_eq!(s.chat_id, ChatId::new("c1"));
        assert!(s.suggested_action.is_none());
    }
}
