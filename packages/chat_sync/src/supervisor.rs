//! Session supervisor for the admin dashboard.
//!
//! Owns the always-on dashboard channel, the chat-list store, the displayed
//! suggestion, and the single active [`ChatSession`]. It is the only place
//! that changes the active chat id.
//!
//! Everything runs on the caller's task. User actions are `&mut self` calls;
//! inbound traffic is pulled with [`SessionSupervisor::next_update`], which
//! waits on the dashboard feed, the active room feed and history fetches, and
//! applies exactly one event per returned [`Update`].

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dashboard::DashboardReconciler;
use crate::error::{HistoryLoadError, SupervisorError, TransportError};
use crate::history::HistoryLoader;
use crate::protocol::{DashboardEvent, parse_dashboard_frame};
use crate::session::{ChatSession, SessionId, SessionPhase, SessionUpdate};
use crate::suggestion::SuggestionSlot;
use crate::transport::{ChannelEvent, ConnectionState, Connector, Endpoint, TransportChannel};
use crate::types::{AccessToken, ChatId, ChatSummary, Message, Suggestion};

pub const DEFAULT_MAX_DASHBOARD_FAILURES: u32 = 3;

/// When to give up reconnecting the dashboard feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive connects that closed without ever opening.
    pub max_dashboard_failures: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_dashboard_failures: DEFAULT_MAX_DASHBOARD_FAILURES,
        }
    }
}

/// Notification that state changed; the renderer re-reads what it needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    DashboardOpened,
    DashboardClosed(Option<TransportError>),
    ChatListChanged,
    SuggestionChanged,
    HistoryLoaded { chat_id: ChatId, messages: usize },
    ChatOpened(ChatId),
    MessageAppended { chat_id: ChatId, message: Message },
    ChatClosed { chat_id: ChatId, error: Option<TransportError> },
}

struct HistoryOutcome {
    session: SessionId,
    result: Result<Vec<Message>, HistoryLoadError>,
}

pub struct SessionSupervisor<C, H> {
    connector: C,
    loader: Arc<H>,
    token: AccessToken,
    policy: ReconnectPolicy,

    dashboard: Option<TransportChannel>,
    dashboard_seen_open: bool,
    dashboard_failures: u32,
    reconciler: DashboardReconciler,
    suggestions: SuggestionSlot,

    active_chat_id: Option<ChatId>,
    session: Option<ChatSession>,
    history_task: Option<JoinHandle<()>>,
    history_tx: mpsc::UnboundedSender<HistoryOutcome>,
    history_rx: mpsc::UnboundedReceiver<HistoryOutcome>,
    next_session_id: u64,
}

impl<C: Connector, H: HistoryLoader> SessionSupervisor<C, H> {
    pub fn new(connector: C, loader: H, token: AccessToken, policy: ReconnectPolicy) -> Self {
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            loader: Arc::new(loader),
            token,
            policy,
            dashboard: None,
            dashboard_seen_open: false,
            dashboard_failures: 0,
            reconciler: DashboardReconciler::new(),
            suggestions: SuggestionSlot::default(),
            active_chat_id: None,
            session: None,
            history_task: None,
            history_tx,
            history_rx,
            next_session_id: 1,
        }
    }

    // -- dashboard feed --

    /// (Re)open the dashboard feed, closing any existing one first.
    pub fn open_dashboard(&mut self) {
        if let Some(mut old) = self.dashboard.take() {
            old.close();
        }
        info!("opening dashboard feed");
        self.dashboard = Some(self.connector.open(Endpoint::Dashboard, &self.token));
        self.dashboard_seen_open = false;
    }

    /// Reconnect the dashboard feed unless it is already open. Returns whether
    /// a reconnect was started. Fails once the feed has failed to open
    /// `max_dashboard_failures` times in a row.
    pub fn refresh_dashboard(&mut self) -> Result<bool, TransportError> {
        if self.dashboard_state() == ConnectionState::Open {
            return Ok(false);
        }
        if self.dashboard_failures >= self.policy.max_dashboard_failures {
            return Err(TransportError::RepeatedFailure {
                attempts: self.dashboard_failures,
            });
        }
        info!(failures = self.dashboard_failures, "reconnecting dashboard feed");
        self.open_dashboard();
        Ok(true)
    }

    pub fn dashboard_state(&self) -> ConnectionState {
        self.dashboard
            .as_ref()
            .map(TransportChannel::state)
            .unwrap_or(ConnectionState::Closed)
    }

    // -- chat selection --

    /// Make `chat_id` the active chat. Any session for another chat is closed
    /// first and the displayed suggestion is discarded. Selecting the chat
    /// that is already live is a no-op.
    pub fn select_chat(&mut self, chat_id: ChatId) -> SessionId {
        if let Some(session) = &self.session {
            if session.chat_id() == &chat_id && session.phase() != SessionPhase::Closed {
                return session.id();
            }
        }

        self.retire_session();

        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;

        let mut session = ChatSession::new(id, chat_id.clone());
        session.set_active(true);
        if let Err(e) = session.begin_history() {
            warn!(session = %id, "could not start history load: {}", e);
        }

        let loader = Arc::clone(&self.loader);
        let tx = self.history_tx.clone();
        let fetch_chat = chat_id.clone();
        self.history_task = Some(tokio::spawn(async move {
            let result = loader.fetch(&fetch_chat).await;
            let _ = tx.send(HistoryOutcome {
                session: id,
                result,
            });
        }));

        info!(session = %id, chat_id = %chat_id, "selected chat");
        self.session = Some(session);
        self.active_chat_id = Some(chat_id);
        self.suggestions.clear();
        id
    }

    /// Close the active chat without selecting another.
    pub fn close_chat(&mut self) -> bool {
        let had_session = self.session.is_some();
        self.retire_session();
        self.active_chat_id = None;
        self.suggestions.clear();
        had_session
    }

    fn retire_session(&mut self) {
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
        if let Some(mut session) = self.session.take() {
            if session.phase() != SessionPhase::Closed {
                if let Err(e) = session.close() {
                    debug!(session = %session.id(), "close on retire: {}", e);
                }
            }
            session.set_active(false);
            debug!(session = %session.id(), chat_id = %session.chat_id(), "retired session");
        }
    }

    pub fn send(&self, text: &str) -> Result<(), SupervisorError> {
        let session = self.session.as_ref().ok_or(SupervisorError::NoActiveChat)?;
        session.send(text)?;
        Ok(())
    }

    // -- suggestions --

    pub fn displayed_suggestion(&self) -> Option<&Suggestion> {
        self.suggestions.current()
    }

    /// Take the displayed suggestion's reply as draft text.
    pub fn accept_suggestion(&mut self) -> Option<String> {
        self.suggestions.accept()
    }

    pub fn dismiss_suggestion(&mut self) -> bool {
        self.suggestions.dismiss()
    }

    // -- queries --

    pub fn active_chat_id(&self) -> Option<&ChatId> {
        self.active_chat_id.as_ref()
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    pub fn current_order(&self) -> Vec<&ChatSummary> {
        self.reconciler.current_order()
    }

    pub fn chat(&self, chat_id: &ChatId) -> Option<&ChatSummary> {
        self.reconciler.get(chat_id)
    }

    /// Log of the active session, empty when none is selected.
    pub fn current_log(&self) -> &[Message] {
        self.session.as_ref().map(ChatSession::log).unwrap_or(&[])
    }

    // -- event loop --

    /// Wait for the next inbound event that changes visible state and apply
    /// it. Events with no visible effect (stale history, malformed frames,
    /// suggestions for other chats) are consumed silently.
    ///
    /// Cancel safe: dropping the future before it completes loses no events.
    pub async fn next_update(&mut self) -> Update {
        loop {
            let step = tokio::select! {
                Some(outcome) = self.history_rx.recv() => self.on_history(outcome),
                Some(event) = next_dashboard_event(&mut self.dashboard) => self.on_dashboard_event(event),
                Some(event) = next_session_event(&mut self.session) => self.on_session_event(event),
            };
            if let Some(update) = step {
                return update;
            }
        }
    }

    fn on_history(&mut self, outcome: HistoryOutcome) -> Option<Update> {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.id() == outcome.session)
        else {
            debug!(session = %outcome.session, "discarding history for replaced session");
            return None;
        };

        let messages = match session.apply_history(outcome.result) {
            Ok(count) => count,
            Err(e) => {
                debug!(session = %outcome.session, "discarding history: {}", e);
                return None;
            }
        };
        self.history_task = None;

        let chat_id = session.chat_id().clone();
        let channel = self
            .connector
            .open(Endpoint::ChatRoom(chat_id.clone()), &self.token);
        if let Err(e) = session.start_streaming(channel) {
            warn!(chat_id = %chat_id, "could not start streaming: {}", e);
            return None;
        }
        Some(Update::HistoryLoaded { chat_id, messages })
    }

    fn on_dashboard_event(&mut self, event: ChannelEvent) -> Option<Update> {
        match event {
            ChannelEvent::Opened => {
                info!("dashboard feed connected");
                self.dashboard_seen_open = true;
                self.dashboard_failures = 0;
                Some(Update::DashboardOpened)
            }
            ChannelEvent::Message(text) => match parse_dashboard_frame(&text) {
                Ok(DashboardEvent::Snapshot(chats)) => self
                    .reconciler
                    .apply_snapshot(chats)
                    .then_some(Update::ChatListChanged),
                Ok(DashboardEvent::Suggestion(suggestion)) => self
                    .suggestions
                    .offer(suggestion, self.active_chat_id.as_ref())
                    .then_some(Update::SuggestionChanged),
                Err(e) => {
                    warn!(payload = %e.payload, "dropping dashboard frame: {}", e);
                    None
                }
            },
            ChannelEvent::Closed { error } => {
                if !self.dashboard_seen_open {
                    self.dashboard_failures += 1;
                }
                match &error {
                    Some(e) => warn!(failures = self.dashboard_failures, "dashboard feed closed: {}", e),
                    None => info!("dashboard feed closed"),
                }
                self.dashboard = None;
                Some(Update::DashboardClosed(error))
            }
        }
    }

    fn on_session_event(&mut self, event: ChannelEvent) -> Option<Update> {
        let session = self.session.as_mut()?;
        let chat_id = session.chat_id().clone();
        match session.apply_event(event) {
            SessionUpdate::Opened => Some(Update::ChatOpened(chat_id)),
            SessionUpdate::Appended(message) => Some(Update::MessageAppended { chat_id, message }),
            SessionUpdate::Closed(error) => Some(Update::ChatClosed { chat_id, error }),
            SessionUpdate::Dropped | SessionUpdate::Ignored => None,
        }
    }
}

impl<C, H> Drop for SessionSupervisor<C, H> {
    fn drop(&mut self) {
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
    }
}

async fn next_dashboard_event(dashboard: &mut Option<TransportChannel>) -> Option<ChannelEvent> {
    match dashboard.as_mut() {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_session_event(session: &mut Option<ChatSession>) -> Option<ChannelEvent> {
    match session.as_mut() {
        Some(session) => session.next_event().await,
        None => None,
    }
}
