use std::time::Duration;

use crate::session::SessionPhase;

/// Failures of a transport channel. Handled inside the owning component;
/// only `RepeatedFailure` is meant to reach the viewer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send: {0}")]
    Send(String),

    /// The stream broke after the channel opened.
    #[error("failed to receive: {0}")]
    Receive(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport failed {attempts} times in a row")]
    RepeatedFailure { attempts: u32 },
}

/// History fetch failures. Never fatal: the session continues with no history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryLoadError {
    #[error("history request failed: {0}")]
    Network(String),

    #[error("history request returned status {0}")]
    Status(u16),

    #[error("history response could not be decoded: {0}")]
    Decode(String),
}

/// An inbound payload that could not be understood. Dropped with a warning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event: {reason}")]
pub struct MalformedEvent {
    pub reason: String,
    pub payload: String,
}

impl MalformedEvent {
    pub fn new(reason: impl Into<String>, payload: &str) -> Self {
        Self {
            reason: reason.into(),
            payload: payload.to_string(),
        }
    }
}

/// Timing/programming errors returned by chat session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is not streaming yet")]
    NotReady,

    #[error("session is closed")]
    Closed,

    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Credential and role failures. Surfaced immediately; no session starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("access denied: role '{role}' is not an admin")]
    Forbidden { role: String },

    #[error("not logged in")]
    MissingCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("no chat is selected")]
    NoActiveChat,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
