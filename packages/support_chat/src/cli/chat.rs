use anyhow::{Result, bail};
use tracing::{debug, info};

use chat_sync::{ChatSession, SessionId, SessionPhase, SessionUpdate};
use support_chat::api::{ApiClient, ApiError};
use support_chat::{ClientConfig, SupportChatDirs, WsConnector};

use super::{load_credentials, print_message, stdin_lines};

const QUIT: &str = "/quit";

/// Customer chat window: resume (or open) the user's chat, replay history,
/// then stream until the room closes or the user quits.
pub async fn chat_command(config: &ClientConfig, dirs: &SupportChatDirs) -> Result<()> {
    let creds = load_credentials(dirs)?;
    let api = ApiClient::new(&config.api_url).with_token(creds.access_token.clone());

    let chat_id = match api.resume_or_create_chat().await {
        Ok(chat_id) => chat_id,
        Err(ApiError::OpenChatExists) => bail!("You already have an open chat."),
        Err(ApiError::Unavailable) => bail!("Error connecting to server at {}", config.api_url),
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to create chat session")),
    };

    let connector = WsConnector::new(&config.ws_url, config.connect_timeout);
    let mut session =
        ChatSession::connect(SessionId(1), chat_id, &api, &connector, &creds.access_token).await?;
    info!(chat_id = %session.chat_id(), history = session.log().len(), "chat session started");

    eprintln!(
        "Support chat {} (type {} to leave)",
        session.chat_id().short(),
        QUIT
    );
    for message in session.log() {
        print_message(message, &creds.user_id, "Support");
    }

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                match session.apply_event(event) {
                    SessionUpdate::Opened => eprintln!("[online]"),
                    SessionUpdate::Appended(message) => {
                        print_message(&message, &creds.user_id, "Support");
                    }
                    SessionUpdate::Closed(Some(e)) => {
                        eprintln!("[offline: {e}]");
                        break;
                    }
                    SessionUpdate::Closed(None) => {
                        eprintln!("[offline]");
                        break;
                    }
                    SessionUpdate::Dropped | SessionUpdate::Ignored => {}
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text == QUIT {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = session.send(text) {
                    eprintln!("[not sent: {e}]");
                }
            }
        }
    }

    if session.phase() != SessionPhase::Closed {
        session.close()?;
    }
    debug!("chat window closed");
    Ok(())
}
