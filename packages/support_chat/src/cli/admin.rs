use anyhow::{Context, Result};
use chrono::Local;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use chat_sync::{
    ChatId, ChatSummary, Connector, HistoryLoader, SessionSupervisor, Suggestion, Update, UserId,
};
use support_chat::{ApiClient, ClientConfig, SupportChatDirs, WsConnector};

use super::{load_credentials, print_message, stdin_lines};

/// One line of agent input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Open(String),
    Close,
    List,
    Use,
    Dismiss,
    Refresh,
    Help,
    Quit,
    Say(String),
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "open" | "o" if !arg.is_empty() => Command::Open(arg.to_string()),
        "close" => Command::Close,
        "list" | "ls" => Command::List,
        "use" => Command::Use,
        "dismiss" => Command::Dismiss,
        "refresh" => Command::Refresh,
        "help" | "h" => Command::Help,
        "quit" | "q" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Resolve a 1-based list index or a unique chat-id prefix.
fn resolve_selection(target: &str, order: &[&ChatSummary]) -> Result<ChatId, String> {
    if let Ok(index) = target.parse::<usize>() {
        return match index.checked_sub(1).and_then(|i| order.get(i)) {
            Some(chat) => Ok(chat.chat_id.clone()),
            None => Err(format!("No chat #{index} (list has {})", order.len())),
        };
    }

    let matches: Vec<&&ChatSummary> = order
        .iter()
        .filter(|chat| chat.chat_id.as_str().starts_with(target))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.chat_id.clone()),
        [] => Err(format!("No chat matching '{target}'")),
        _ => Err(format!("'{target}' matches {} chats", matches.len())),
    }
}

fn format_row(index: usize, chat: &ChatSummary, active: bool) -> String {
    format!(
        "{} {:>2}. User: {}...  {:<7}  {}",
        if active { "*" } else { " " },
        index,
        chat.user_id.short(),
        chat.status.to_string(),
        chat.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
    )
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  /open <n|id>   open a chat from the list");
    eprintln!("  /close         close the open chat");
    eprintln!("  /list          show the chat list");
    eprintln!("  /use           put the AI suggestion into the draft");
    eprintln!("  /dismiss       hide the AI suggestion");
    eprintln!("  /refresh       reconnect the dashboard feed");
    eprintln!("  /quit          leave");
    eprintln!("Anything else is sent to the open chat. Enter on an empty line sends the draft.");
}

enum Flow {
    Continue,
    Quit,
}

/// Agent dashboard: live chat list, one open chat, AI suggestions.
pub async fn admin_command(config: &ClientConfig, dirs: &SupportChatDirs) -> Result<()> {
    let creds = load_credentials(dirs)?;
    creds
        .role
        .ensure_admin()
        .context("The dashboard needs an admin account (`support-chat login --admin`)")?;

    let api = ApiClient::new(&config.api_url).with_token(creds.access_token.clone());
    let connector = WsConnector::new(&config.ws_url, config.connect_timeout);
    let mut sup = SessionSupervisor::new(connector, api, creds.access_token.clone(), config.reconnect);

    sup.open_dashboard();
    print_help();

    let mut lines = stdin_lines();
    let mut draft: Option<String> = None;

    let reconnect = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(reconnect);
    let mut reconnect_pending = false;

    loop {
        tokio::select! {
            update = sup.next_update() => {
                if matches!(update, Update::DashboardClosed(_)) {
                    reconnect.as_mut().reset(Instant::now() + config.reconnect_backoff);
                    reconnect_pending = true;
                }
                render_update(&sup, update, &creds.user_id);
            }
            () = &mut reconnect, if reconnect_pending => {
                reconnect_pending = false;
                if let Err(e) = sup.refresh_dashboard() {
                    eprintln!("[dashboard unavailable: {e}]");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Flow::Quit = handle_command(&mut sup, parse_command(&line), &mut draft) {
                    break;
                }
            }
        }
    }

    sup.close_chat();
    Ok(())
}

fn handle_command<C: Connector, H: HistoryLoader>(
    sup: &mut SessionSupervisor<C, H>,
    command: Command,
    draft: &mut Option<String>,
) -> Flow {
    match command {
        Command::Open(target) => {
            let selection = resolve_selection(&target, &sup.current_order());
            match selection {
                Ok(chat_id) => {
                    *draft = None;
                    let session = sup.select_chat(chat_id.clone());
                    debug!(%session, "opening chat");
                    eprintln!("Opening chat {}...", chat_id.short());
                }
                Err(msg) => eprintln!("{msg}"),
            }
        }
        Command::Close => {
            *draft = None;
            if sup.close_chat() {
                eprintln!("Chat closed.");
            } else {
                eprintln!("No chat is open.");
            }
        }
        Command::List => print_chat_list(sup),
        Command::Use => match sup.accept_suggestion() {
            Some(reply) => {
                println!("Draft: {reply}");
                eprintln!("(Enter sends it, or type a different reply)");
                *draft = Some(reply);
            }
            None => eprintln!("No suggestion to use."),
        },
        Command::Dismiss => {
            if !sup.dismiss_suggestion() {
                eprintln!("No suggestion to dismiss.");
            }
        }
        Command::Refresh => match sup.refresh_dashboard() {
            Ok(true) => eprintln!("Reconnecting dashboard..."),
            Ok(false) => eprintln!("Dashboard is connected."),
            Err(e) => eprintln!("[dashboard unavailable: {e}]"),
        },
        Command::Help => print_help(),
        Command::Quit => return Flow::Quit,
        Command::Say(text) => {
            *draft = None;
            send(sup, &text);
        }
        Command::Empty => {
            if let Some(text) = draft.take() {
                send(sup, &text);
            }
        }
        Command::Unknown(line) => eprintln!("Unknown command: {line} (try /help)"),
    }
    Flow::Continue
}

fn send<C: Connector, H: HistoryLoader>(sup: &SessionSupervisor<C, H>, text: &str) {
    if let Err(e) = sup.send(text) {
        eprintln!("[not sent: {e}]");
    }
}

fn print_chat_list<C: Connector, H: HistoryLoader>(sup: &SessionSupervisor<C, H>) {
    let order = sup.current_order();
    if order.is_empty() {
        println!("No chats.");
        return;
    }
    let active = sup.active_chat_id();
    for (i, chat) in order.iter().enumerate() {
        println!("{}", format_row(i + 1, chat, active == Some(&chat.chat_id)));
    }
}

fn print_suggestion(suggestion: &Suggestion) {
    println!("AI suggestion: {}", suggestion.suggested_reply);
    if let Some(action) = &suggestion.suggested_action {
        println!("Suggested action: {action}");
    }
    eprintln!("(/use to draft it, /dismiss to hide)");
}

fn render_update<C: Connector, H: HistoryLoader>(
    sup: &SessionSupervisor<C, H>,
    update: Update,
    me: &UserId,
) {
    match update {
        Update::DashboardOpened => eprintln!("[dashboard connected]"),
        Update::DashboardClosed(Some(e)) => eprintln!("[dashboard disconnected: {e}]"),
        Update::DashboardClosed(None) => eprintln!("[dashboard disconnected]"),
        Update::ChatListChanged => print_chat_list(sup),
        Update::SuggestionChanged => {
            if let Some(suggestion) = sup.displayed_suggestion() {
                print_suggestion(suggestion);
            }
        }
        Update::HistoryLoaded { chat_id, .. } => {
            match sup.chat(&chat_id) {
                Some(chat) => println!(
                    "── Chat with {}... | Status: {} ──",
                    chat.user_id.short(),
                    chat.status
                ),
                None => println!("── Chat {} ──", chat_id.short()),
            }
            for message in sup.current_log() {
                print_message(message, me, "User");
            }
        }
        Update::ChatOpened(chat_id) => eprintln!("[chat {} connected]", chat_id.short()),
        Update::MessageAppended { message, .. } => print_message(&message, me, "User"),
        Update::ChatClosed { chat_id, error } => match error {
            Some(e) => eprintln!("[chat {} closed: {e}]", chat_id.short()),
            None => eprintln!("[chat {} closed]", chat_id.short()),
        },
    }
}
