//! REST client for the support backend: login, registration, chat creation
//! and message history.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chat_sync::history::{HistoryLoader, chronological};
use chat_sync::{AccessToken, AuthError, ChatId, ChatSummary, HistoryLoadError, Message, Role, UserId};

/// Substring of the backend error returned when a user already has an open chat.
pub const OPEN_CHAT_EXISTS: &str = "open chat already exists";

const NEW_CHAT_CONTENT: &str = "New support request";
const NEW_CHAT_NAME: &str = "Support Request";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("you already have an open chat")]
    OpenChatExists,

    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Other(err.into())
        }
    }
}

/// Account fields returned alongside the access token.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccountInfo {
    #[serde(rename = "user_external_id", alias = "user_id")]
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: AccessToken,
    pub user: AccountInfo,
}

/// New customer account. The role is always `user`.
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    pub name: String,
    pub username: String,
    pub phone_number: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl Registration {
    pub fn customer(
        name: impl Into<String>,
        username: impl Into<String>,
        phone_number: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            phone_number: phone_number.into(),
            email: email.into(),
            password: password.into(),
            role: Role::User,
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct NewChatRequest<'a> {
    content: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct NewChatResponse {
    #[serde(rename = "chat_external_id", alias = "chat_id")]
    chat_id: ChatId,
}

#[derive(Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<AccessToken>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.token = Some(token);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        match &self.token {
            Some(token) => Ok(request.bearer_auth(token.expose())),
            None => Err(AuthError::MissingCredentials.into()),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let resp = self
            .http
            .post(self.url("/users/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !resp.status().is_success() {
            debug!(status = %resp.status(), "login rejected");
            return Err(match error_from(resp).await {
                ApiError::Status { status, .. } if is_auth_status(status) => {
                    AuthError::InvalidCredentials.into()
                }
                other => other,
            });
        }
        resp.json().await.map_err(ApiError::from_reqwest)
    }

    /// Login for the agent dashboard. Non-admin accounts are refused before
    /// anything is stored or connected.
    pub async fn login_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError> {
        let login = self.login(username, password).await?;
        login.user.role.ensure_admin()?;
        Ok(login)
    }

    pub async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/users"))
            .json(registration)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(error_from(resp).await)
        }
    }

    /// Chats owned by the logged-in user.
    pub async fn user_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        let resp = self
            .authorized(self.http.get(self.url("/chats/user")))?
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        let chats: Option<Vec<ChatSummary>> = resp.json().await.map_err(ApiError::from_reqwest)?;
        Ok(chats.unwrap_or_default())
    }

    pub async fn create_chat(&self) -> Result<ChatId, ApiError> {
        let resp = self
            .authorized(self.http.post(self.url("/chats")))?
            .json(&NewChatRequest {
                content: NEW_CHAT_CONTENT,
                name: NEW_CHAT_NAME,
            })
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !resp.status().is_success() {
            return Err(match error_from(resp).await {
                ApiError::Status { message, .. } if message.contains(OPEN_CHAT_EXISTS) => {
                    ApiError::OpenChatExists
                }
                other => other,
            });
        }
        let created: NewChatResponse = resp.json().await.map_err(ApiError::from_reqwest)?;
        Ok(created.chat_id)
    }

    /// Reuse the user's first existing chat, otherwise open a new one. A
    /// failed lookup falls through to creation.
    pub async fn resume_or_create_chat(&self) -> Result<ChatId, ApiError> {
        match self.user_chats().await {
            Ok(chats) => {
                if let Some(existing) = chats.into_iter().next() {
                    debug!(chat_id = %existing.chat_id, "resuming existing chat");
                    return Ok(existing.chat_id);
                }
            }
            Err(e) => warn!("Could not list existing chats: {}", e),
        }
        self.create_chat().await
    }

    /// Most recent persisted messages of a chat, oldest first.
    pub async fn recent_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>, ApiError> {
        let path = format!("/chats/{}/messages/recent", chat_id);
        let resp = self
            .authorized(self.http.get(self.url(&path)))?
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        let page: Option<Vec<Message>> = resp.json().await.map_err(ApiError::from_reqwest)?;
        Ok(chronological(page.unwrap_or_default()))
    }
}

impl HistoryLoader for ApiClient {
    async fn fetch(&self, chat_id: &ChatId) -> Result<Vec<Message>, HistoryLoadError> {
        self.recent_messages(chat_id).await.map_err(|e| match e {
            ApiError::Status { status, .. } => HistoryLoadError::Status(status),
            ApiError::Decode(reason) => HistoryLoadError::Decode(reason),
            other => HistoryLoadError::Network(other.to_string()),
        })
    }
}

fn is_auth_status(status: u16) -> bool {
    status == StatusCode::UNAUTHORIZED.as_u16() || status == StatusCode::FORBIDDEN.as_u16()
}

/// Turn a non-success response into `ApiError::Status`, preferring the
/// backend's `{"error": ...}` text.
async fn error_from(resp: Response) -> ApiError {
    let status = resp.status();
    let body: ErrorBody = resp.json().await.unwrap_or_default();
    let message = body
        .error
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}
