// Library interface for support_chat
// Concrete collaborators for the chat_sync core: REST backend client,
// WebSocket transport, configuration and stored credentials.

pub mod api;
pub mod config;
pub mod credentials;
pub mod ws;

pub use api::{ApiClient, ApiError};
pub use config::{ClientConfig, FileConfig, SupportChatDirs, load_config};
pub use credentials::Credentials;
pub use ws::WsConnector;
