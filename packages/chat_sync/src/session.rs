//! Chat session: history replay followed by live streaming for one chat.
//!
//! ```text
//! Init ──► LoadingHistory ──► Streaming ──► Closed
//!   │             │                            ▲
//!   └─────────────┴──────── close() ───────────┘
//! ```
//!
//! History is always appended before the live channel exists, so history
//! messages can never follow live ones in the log. `Closed` is terminal;
//! reconnecting means building a new session.

use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{HistoryLoadError, SessionError, TransportError};
use crate::history::HistoryLoader;
use crate::protocol::{encode_outbound, parse_chat_frame};
use crate::transport::{ChannelEvent, ConnectionState, Connector, Endpoint, TransportChannel};
use crate::types::{AccessToken, ChatId, Message, MessageId};

/// Identity of one session instance. A fresh id is minted for every
/// selection, so results addressed to a replaced session can be recognised.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    LoadingHistory,
    Streaming,
    Closed,
}

/// What applying a channel event did to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    Opened,
    Appended(Message),
    /// Malformed payload or a message already in the log.
    Dropped,
    Closed(Option<TransportError>),
    /// Event arrived while not streaming.
    Ignored,
}

pub struct ChatSession {
    id: SessionId,
    chat_id: ChatId,
    phase: SessionPhase,
    log: Vec<Message>,
    seen: HashSet<MessageId>,
    channel: Option<TransportChannel>,
    active: bool,
}

impl ChatSession {
    pub fn new(id: SessionId, chat_id: ChatId) -> Self {
        Self {
            id,
            chat_id,
            phase: SessionPhase::Init,
            log: Vec::new(),
            seen: HashSet::new(),
            channel: None,
            active: false,
        }
    }

    /// Run the whole start-up sequence: fetch history, then open the room
    /// channel. History failure is logged and treated as empty.
    pub async fn connect<H, C>(
        id: SessionId,
        chat_id: ChatId,
        loader: &H,
        connector: &C,
        token: &AccessToken,
    ) -> Result<Self, SessionError>
    where
        H: HistoryLoader,
        C: Connector,
    {
        let mut session = Self::new(id, chat_id);
        session.begin_history()?;
        let history = loader.fetch(&session.chat_id).await;
        session.apply_history(history)?;
        let channel = connector.open(Endpoint::ChatRoom(session.chat_id.clone()), token);
        session.start_streaming(channel)?;
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Ordered message log: history first, then live messages.
    pub fn log(&self) -> &[Message] {
        &self.log
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.phase {
            SessionPhase::Init | SessionPhase::LoadingHistory => ConnectionState::Connecting,
            SessionPhase::Streaming => self
                .channel
                .as_ref()
                .map(TransportChannel::state)
                .unwrap_or(ConnectionState::Connecting),
            SessionPhase::Closed => ConnectionState::Closed,
        }
    }

    fn transition(&mut self, to: SessionPhase) -> Result<(), SessionError> {
        let allowed = matches!(
            (self.phase, to),
            (SessionPhase::Init, SessionPhase::LoadingHistory)
                | (SessionPhase::LoadingHistory, SessionPhase::Streaming)
                | (SessionPhase::Init, SessionPhase::Closed)
                | (SessionPhase::LoadingHistory, SessionPhase::Closed)
                | (SessionPhase::Streaming, SessionPhase::Closed)
        );
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        if !allowed {
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        debug!(session = %self.id, chat_id = %self.chat_id, from = ?self.phase, ?to, "session transition");
        self.phase = to;
        Ok(())
    }

    pub fn begin_history(&mut self) -> Result<(), SessionError> {
        self.transition(SessionPhase::LoadingHistory)
    }

    /// Append a history result. Only valid while loading history; returns the
    /// number of messages appended (zero on a failed fetch).
    pub fn apply_history(
        &mut self,
        result: Result<Vec<Message>, HistoryLoadError>,
    ) -> Result<usize, SessionError> {
        match self.phase {
            SessionPhase::LoadingHistory => {}
            SessionPhase::Closed => return Err(SessionError::Closed),
            other => {
                return Err(SessionError::InvalidTransition {
                    from: other,
                    to: SessionPhase::LoadingHistory,
                });
            }
        }

        match result {
            Ok(messages) => {
                let before = self.log.len();
                for message in messages {
                    self.push(message);
                }
                let appended = self.log.len() - before;
                debug!(session = %self.id, chat_id = %self.chat_id, appended, "history loaded");
                Ok(appended)
            }
            Err(e) => {
                warn!(session = %self.id, chat_id = %self.chat_id, "history unavailable, continuing without it: {}", e);
                Ok(0)
            }
        }
    }

    /// Attach the live channel and enter `Streaming`.
    pub fn start_streaming(&mut self, mut channel: TransportChannel) -> Result<(), SessionError> {
        if let Err(e) = self.transition(SessionPhase::Streaming) {
            channel.close();
            return Err(e);
        }
        self.channel = Some(channel);
        Ok(())
    }

    /// Next event from the live channel, or `None` when there is no channel
    /// or it has finished.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        match self.channel.as_mut() {
            Some(channel) => channel.recv().await,
            None => None,
        }
    }

    pub fn apply_event(&mut self, event: ChannelEvent) -> SessionUpdate {
        if self.phase != SessionPhase::Streaming {
            debug!(session = %self.id, phase = ?self.phase, "ignoring channel event outside streaming");
            return SessionUpdate::Ignored;
        }

        match event {
            ChannelEvent::Opened => {
                info!(chat_id = %self.chat_id, "chat room connected");
                SessionUpdate::Opened
            }
            ChannelEvent::Message(text) => match parse_chat_frame(&text) {
                Ok(message) => {
                    if self.push(message.clone()) {
                        SessionUpdate::Appended(message)
                    } else {
                        SessionUpdate::Dropped
                    }
                }
                Err(e) => {
                    warn!(chat_id = %self.chat_id, payload = %e.payload, "dropping chat frame: {}", e);
                    SessionUpdate::Dropped
                }
            },
            ChannelEvent::Closed { error } => {
                match &error {
                    Some(e) => warn!(chat_id = %self.chat_id, "chat room closed: {}", e),
                    None => info!(chat_id = %self.chat_id, "chat room closed"),
                }
                self.channel = None;
                self.phase = SessionPhase::Closed;
                SessionUpdate::Closed(error)
            }
        }
    }

    /// Send a chat message. Only allowed while streaming.
    pub fn send(&self, text: &str) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Streaming => {
                let channel = self.channel.as_ref().ok_or(SessionError::NotReady)?;
                channel.send(encode_outbound(text))?;
                Ok(())
            }
            SessionPhase::Closed => Err(SessionError::Closed),
            SessionPhase::Init | SessionPhase::LoadingHistory => Err(SessionError::NotReady),
        }
    }

    /// Close the session and its channel. In-flight sends may be lost.
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.transition(SessionPhase::Closed)?;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.active = false;
        Ok(())
    }

    /// Append unless the message carries an id already in the log.
    fn push(&mut self, message: Message) -> bool {
        if let Some(id) = &message.id {
            if !self.seen.insert(id.clone()) {
                debug!(chat_id = %self.chat_id, message_id = %id, "skipping duplicate message");
                return false;
            }
        }
        self.log.push(message);
        true
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("chat_id", &self.chat_id)
            .field("phase", &self.phase)
            .field("messages", &self.log.len())
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;

    fn session() -> ChatSession {
        ChatSession::new(SessionId(1), ChatId::new("c1"))
    }

    fn contents(session: &ChatSession) -> Vec<&str> {
        session.log().iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn starts_in_init() {
        let s = session();
        assert_eq!(s.phase(), SessionPhase::Init);
        assert_eq!(s.connection_state(), ConnectionState::Connecting);
        assert!(s.log().is_empty());
    }

    #[test]
    fn send_before_streaming_is_not_ready() {
        let mut s = session();
        assert_eq!(s.send("hi"), Err(SessionError::NotReady));
        s.begin_history().unwrap();
        assert_eq!(s.send("hi"), Err(SessionError::NotReady));
    }

    #[test]
    fn history_failure_is_not_fatal() {
        let mut s = session();
        s.begin_history().unwrap();
        let appended = s
            .apply_history(Err(HistoryLoadError::Network("down".to_string())))
            .unwrap();
        assert_eq!(appended, 0);
        assert_eq!(s.phase(), SessionPhase::LoadingHistory);
    }

    #[test]
    fn history_outside_loading_is_rejected() {
        let mut s = session();
        assert!(matches!(
            s.apply_history(Ok(vec![])),
            Err(SessionError::InvalidTransition { .. })
        ));
        s.close().unwrap();
        assert_eq!(s.apply_history(Ok(vec![])), Err(SessionError::Closed));
    }

    #[test]
    fn cannot_skip_history() {
        let mut s = session();
        let (channel, _driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        assert!(matches!(
            s.start_streaming(channel),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn history_then_live_in_order() {
        let mut s = session();
        s.begin_history().unwrap();
        s.apply_history(Ok(vec![
            Message::new("u1", "a"),
            Message::new("agent1", "b"),
        ]))
        .unwrap();

        let (channel, driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        s.start_streaming(channel).unwrap();
        driver.opened();
        driver.deliver(r#"{"sender_external_id":"u1","content":"c"}"#);

        let ev = s.next_event().await.unwrap();
        assert_eq!(s.apply_event(ev), SessionUpdate::Opened);
        assert_eq!(s.connection_state(), ConnectionState::Open);
        let ev = s.next_event().await.unwrap();
        assert!(matches!(s.apply_event(ev), SessionUpdate::Appended(_)));

        assert_eq!(contents(&s), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_stream_continues() {
        let mut s = session();
        s.begin_history().unwrap();
        s.apply_history(Ok(vec![])).unwrap();
        let (channel, driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        s.start_streaming(channel).unwrap();
        driver.opened();
        driver.deliver("{broken");
        driver.deliver(r#"{"sender_external_id":"u1","content":"ok"}"#);

        let mut updates = Vec::new();
        for _ in 0..3 {
            let ev = s.next_event().await.unwrap();
            updates.push(s.apply_event(ev));
        }
        assert_eq!(updates[1], SessionUpdate::Dropped);
        assert_eq!(contents(&s), vec!["ok"]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_skipped() {
        let mut s = session();
        s.begin_history().unwrap();
        s.apply_history(Ok(vec![Message::new("u1", "hi").with_id("m1")]))
            .unwrap();
        let (channel, driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        s.start_streaming(channel).unwrap();
        driver.deliver(r#"{"message_external_id":"m1","sender_external_id":"u1","content":"hi"}"#);

        let ev = s.next_event().await.unwrap();
        assert_eq!(s.apply_event(ev), SessionUpdate::Dropped);
        assert_eq!(s.log().len(), 1);
    }

    #[tokio::test]
    async fn transport_close_is_terminal() {
        let mut s = session();
        s.begin_history().unwrap();
        s.apply_history(Ok(vec![])).unwrap();
        let (channel, driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        s.start_streaming(channel).unwrap();
        driver.closed(Some(TransportError::Connect("refused".to_string())));

        let ev = s.next_event().await.unwrap();
        assert_eq!(
            s.apply_event(ev),
            SessionUpdate::Closed(Some(TransportError::Connect("refused".to_string())))
        );
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert_eq!(s.send("late"), Err(SessionError::Closed));
        assert_eq!(s.close(), Err(SessionError::Closed));
        assert_eq!(s.next_event().await, None);
    }

    #[tokio::test]
    async fn send_is_forwarded_as_content_frame() {
        let mut s = session();
        s.begin_history().unwrap();
        s.apply_history(Ok(vec![])).unwrap();
        let (channel, mut driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        s.start_streaming(channel).unwrap();

        // Streaming but transport still connecting
        assert_eq!(
            s.send("early"),
            Err(SessionError::Transport(TransportError::NotConnected))
        );

        driver.opened();
        s.send("hello").unwrap();
        assert_eq!(
            driver.next_outbound().await.as_deref(),
            Some(r#"{"content":"hello"}"#)
        );
    }

    #[tokio::test]
    async fn close_shuts_the_channel() {
        let mut s = session();
        s.begin_history().unwrap();
        s.apply_history(Ok(vec![])).unwrap();
        let (channel, mut driver) = TransportChannel::pair(Endpoint::ChatRoom(ChatId::new("c1")));
        s.start_streaming(channel).unwrap();
        driver.opened();

        s.close().unwrap();
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert_eq!(driver.next_outbound().await, None);
    }

    #[tokio::test]
    async fn connect_runs_history_then_opens_room() {
        let (connector, mut server) = MemoryConnector::pair();
        let token = AccessToken::new("tok");
        let s = ChatSession::connect(
            SessionId(7),
            ChatId::new("c9"),
            &crate::history::NoHistory,
            &connector,
            &token,
        )
        .await
        .unwrap();

        assert_eq!(s.phase(), SessionPhase::Streaming);
        let link = server.accept().await.unwrap();
        assert_eq!(
            link.driver.endpoint(),
            &Endpoint::ChatRoom(ChatId::new("c9"))
        );
    }
}
