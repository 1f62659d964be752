pub mod admin;
pub mod chat;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use chat_sync::{AuthError, Message, UserId};
use support_chat::api::{ApiClient, ApiError, Registration};
use support_chat::{ClientConfig, Credentials, SupportChatDirs};

use crate::{LoginArgs, RegisterArgs};

/// Log in, check the role if the agent dashboard was requested, and store
/// the token for later commands.
pub async fn login_command(
    config: &ClientConfig,
    dirs: &SupportChatDirs,
    args: LoginArgs,
) -> Result<()> {
    let username = match args.username {
        Some(u) => u,
        None => prompt("Username: ").await?,
    };
    let password = prompt("Password: ").await?;

    let api = ApiClient::new(&config.api_url);
    let login = if args.admin {
        api.login_admin(&username, &password).await
    } else {
        api.login(&username, &password).await
    };

    let login = match login {
        Ok(login) => login,
        Err(ApiError::Unavailable) => bail!("Server is unavailable at {}", config.api_url),
        Err(e) => return Err(anyhow::Error::new(e).context("Login failed")),
    };

    let creds = Credentials::from(login);
    creds.save(&dirs.credentials_path)?;
    eprintln!("Logged in as {} ({})", username, creds.role);
    Ok(())
}

/// Create a customer account. The password is confirmed locally before
/// anything is sent.
pub async fn register_command(config: &ClientConfig, args: RegisterArgs) -> Result<()> {
    let name = prompt_unless("Name: ", args.name).await?;
    let username = prompt_unless("Username: ", args.username).await?;
    let phone = prompt_unless("Phone number: ", args.phone).await?;
    let email = prompt_unless("Email: ", args.email).await?;
    let password = prompt("Password: ").await?;
    let confirm = prompt("Confirm password: ").await?;

    if password != confirm {
        bail!("Passwords do not match");
    }

    let registration = Registration::customer(name, username.clone(), phone, email, password);
    match ApiClient::new(&config.api_url).register(&registration).await {
        Ok(()) => {
            eprintln!("Registration successful. Log in with `support-chat login -u {username}`.");
            Ok(())
        }
        Err(ApiError::Status { message, .. }) => bail!("Registration failed: {}", message),
        Err(e) => Err(anyhow::Error::new(e).context("Registration failed")),
    }
}

pub fn logout_command(dirs: &SupportChatDirs) -> Result<()> {
    if Credentials::clear(&dirs.credentials_path)? {
        eprintln!("Logged out.");
    } else {
        eprintln!("Not logged in.");
    }
    Ok(())
}

fn load_credentials(dirs: &SupportChatDirs) -> Result<Credentials> {
    Credentials::load(&dirs.credentials_path)?
        .ok_or(AuthError::MissingCredentials)
        .context("Run `support-chat login` first")
}

async fn prompt_unless(label: &'static str, given: Option<String>) -> Result<String> {
    match given {
        Some(value) => Ok(value),
        None => prompt(label).await,
    }
}

async fn prompt(label: &'static str) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        use std::io::{self, BufRead, Write};

        print!("{label}");
        io::stdout().lock().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await?
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Author label for one line of the transcript.
fn speaker<'a>(message: &Message, me: &UserId, other: &'a str) -> &'a str {
    if message.is_from(me) { "You" } else { other }
}

fn print_message(message: &Message, me: &UserId, other: &str) {
    println!("{}: {}", speaker(message, me, other), message.content);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_labels_own_messages() {
        let me = UserId::new("u-1");
        assert_eq!(speaker(&Message::new("u-1", "hi"), &me, "Support"), "You");
        assert_eq!(speaker(&Message::new("a-9", "hello"), &me, "Support"), "Support");
    }
}
