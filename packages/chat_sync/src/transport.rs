//! Transport channel: one reconnect-free duplex stream.
//!
//! A [`TransportChannel`] is the consumer half. It exposes `send`/`close` and a
//! lazy sequence of [`ChannelEvent`]s that always ends with exactly one
//! `Closed`. The producer half, [`ChannelDriver`], is held by whatever moves
//! bytes (a WebSocket task, or the in-memory [`MemoryConnector`] used in
//! tests). Retrying is not this module's job.

use std::fmt;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::TransportError;
use crate::types::{AccessToken, ChatId};

/// Which logical stream a channel carries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Admin feed: chat-list snapshots and AI suggestions.
    Dashboard,
    /// Per-chat room feed.
    ChatRoom(ChatId),
}

impl Endpoint {
    /// Path relative to the WebSocket base URL.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Dashboard => "/ws/admin/chats".to_string(),
            Endpoint::ChatRoom(chat_id) => format!("/ws/chats/{}", chat_id),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Dashboard => f.write_str("dashboard"),
            Endpoint::ChatRoom(chat_id) => write!(f, "chat {}", chat_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Inbound events, in the order the transport produced them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    /// Terminal. `error` is `None` for an orderly close.
    Closed { error: Option<TransportError> },
}

enum Outbound {
    Payload(String),
    Close,
}

/// Consumer half of a transport channel.
pub struct TransportChannel {
    endpoint: Endpoint,
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    close_requested: bool,
    finished: bool,
}

impl TransportChannel {
    /// Create a connected channel/driver pair. The channel starts `Connecting`.
    pub fn pair(endpoint: Endpoint) -> (TransportChannel, ChannelDriver) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let channel = TransportChannel {
            endpoint: endpoint.clone(),
            state: state_rx,
            outbound: outbound_tx,
            events: events_rx,
            close_requested: false,
            finished: false,
        };
        let driver = ChannelDriver {
            endpoint,
            state: state_tx,
            events: events_tx,
            outbound: outbound_rx,
            closed: false,
        };
        (channel, driver)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connection state as seen by the consumer. A requested close reads as
    /// `Closed` immediately.
    pub fn state(&self) -> ConnectionState {
        if self.close_requested {
            ConnectionState::Closed
        } else {
            *self.state.borrow()
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a payload for the transport. Fails unless the channel is open.
    pub fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(Outbound::Payload(payload))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Ask the transport to close. Idempotent.
    pub fn close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;
        debug!(endpoint = %self.endpoint, "closing transport channel");
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Next inbound event. Returns `None` once `Closed` has been yielded.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            // Driver vanished without reporting; treat as an orderly close.
            None => ChannelEvent::Closed { error: None },
        };
        if matches!(event, ChannelEvent::Closed { .. }) {
            self.finished = true;
        }
        Some(event)
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Producer half of a transport channel.
pub struct ChannelDriver {
    endpoint: Endpoint,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    closed: bool,
}

impl ChannelDriver {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Report a successful connect. Only the first call has an effect.
    pub fn opened(&self) {
        if self.closed || *self.state.borrow() != ConnectionState::Connecting {
            return;
        }
        self.state.send_replace(ConnectionState::Open);
        let _ = self.events.send(ChannelEvent::Opened);
    }

    /// Hand an inbound payload to the consumer. Returns false if the consumer
    /// is gone.
    pub fn deliver(&self, payload: impl Into<String>) -> bool {
        if self.closed {
            return false;
        }
        self.events
            .send(ChannelEvent::Message(payload.into()))
            .is_ok()
    }

    /// Next payload the consumer wants sent. `None` means the consumer closed
    /// the channel (or dropped it) and the transport should shut down.
    pub async fn next_outbound(&mut self) -> Option<String> {
        match self.outbound.recv().await {
            Some(Outbound::Payload(payload)) => Some(payload),
            Some(Outbound::Close) | None => None,
        }
    }

    /// Report the end of the stream.
    pub fn closed(mut self, error: Option<TransportError>) {
        self.finish(error);
    }

    fn finish(&mut self, error: Option<TransportError>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state.send_replace(ConnectionState::Closed);
        let _ = self.events.send(ChannelEvent::Closed { error });
    }
}

impl Drop for ChannelDriver {
    fn drop(&mut self) {
        self.finish(None);
    }
}

/// Opens transport channels. Implementations spawn whatever task drives the
/// returned channel; `open` itself never blocks.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: Endpoint, token: &AccessToken) -> TransportChannel;
}

/// A channel opened through a [`MemoryConnector`], as seen from the far side.
pub struct MemoryLink {
    pub token: AccessToken,
    pub driver: ChannelDriver,
}

/// In-process connector: every `open` hands the driver half to a
/// [`MemoryServer`] instead of touching the network.
#[derive(Clone)]
pub struct MemoryConnector {
    links: mpsc::UnboundedSender<MemoryLink>,
}

pub struct MemoryServer {
    links: mpsc::UnboundedReceiver<MemoryLink>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryConnector { links: tx }, MemoryServer { links: rx })
    }
}

impl Connector for MemoryConnector {
    fn open(&self, endpoint: Endpoint, token: &AccessToken) -> TransportChannel {
        let (channel, driver) = TransportChannel::pair(endpoint);
        // If the server side is gone the driver drops here and the channel
        // reports Closed.
        let _ = self.links.send(MemoryLink {
            token: token.clone(),
            driver,
        });
        channel
    }
}

impl MemoryServer {
    /// Wait for the next channel opened by the paired connector.
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.links.recv().await
    }

    /// Take an already-opened link without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryLink> {
        self.links.try_recv().ok()
    }
}
