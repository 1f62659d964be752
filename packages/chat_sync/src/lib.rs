//! # chat_sync
//!
//! Client-side synchronization core for a live support chat.
//!
//! It keeps one viewer's state consistent with a live message stream:
//!
//! - [`session::ChatSession`]: history replay followed by live streaming for
//!   a single chat, producing one ordered message log.
//! - [`dashboard::DashboardReconciler`]: merges chat-list snapshots into a
//!   keyed store with a stable display order.
//! - [`suggestion::route`]: delivers an AI suggestion only when it targets the
//!   active chat.
//! - [`supervisor::SessionSupervisor`]: owns the dashboard feed and the single
//!   active chat session, and switches between chats.
//!
//! The crate knows nothing about HTTP or WebSockets. Transports plug in
//! through [`transport::Connector`], history through
//! [`history::HistoryLoader`].
//!
//! ## Example
//!
//! ```no_run
//! use chat_sync::history::NoHistory;
//! use chat_sync::supervisor::{ReconnectPolicy, SessionSupervisor, Update};
//! use chat_sync::transport::MemoryConnector;
//! use chat_sync::types::{AccessToken, ChatId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (connector, _server) = MemoryConnector::pair();
//!     let mut supervisor = SessionSupervisor::new(
//!         connector,
//!         NoHistory,
//!         AccessToken::new("token"),
//!         ReconnectPolicy::default(),
//!     );
//!     supervisor.open_dashboard();
//!     supervisor.select_chat(ChatId::new("c1"));
//!
//!     loop {
//!         match supervisor.next_update().await {
//!             Update::MessageAppended { message, .. } => println!("{}", message.content),
//!             Update::ChatListChanged => {
//!                 for chat in supervisor.current_order() {
//!                     println!("{} [{}]", chat.chat_id.short(), chat.status);
//!                 }
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

pub mod dashboard;
pub mod error;
pub mod history;
pub mod protocol;
pub mod session;
pub mod suggestion;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use dashboard::DashboardReconciler;
pub use error::{
    AuthError, HistoryLoadError, MalformedEvent, SessionError, SupervisorError, TransportError,
};
pub use history::HistoryLoader;
pub use session::{ChatSession, SessionId, SessionPhase, SessionUpdate};
pub use supervisor::{ReconnectPolicy, SessionSupervisor, Update};
pub use transport::{ChannelEvent, ConnectionState, Connector, Endpoint, TransportChannel};
pub use types::{
    AccessToken, ChatId, ChatStatus, ChatSummary, Message, Role, SuggestedAction, Suggestion,
    UserId,
};
