use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::prelude::*;

use support_chat::SupportChatDirs;

mod cli;

#[derive(Parser)]
#[command(name = "support-chat")]
#[command(about = "Live support chat for customers and support agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.support-chat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and remember the access token
    Login(LoginArgs),
    /// Create a customer account
    Register(RegisterArgs),
    /// Forget the stored access token
    Logout,
    /// Open your support chat (resumes an existing one)
    Chat,
    /// Agent dashboard: live chat list, replies and AI suggestions
    Admin,
}

#[derive(Args)]
pub(crate) struct LoginArgs {
    /// Username (prompted if omitted)
    #[arg(short, long)]
    pub username: Option<String>,

    /// Require an admin or superadmin account
    #[arg(long)]
    pub admin: bool,
}

#[derive(Args)]
pub(crate) struct RegisterArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub username: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the transcript on stdout
    let default_directive = if cli.debug {
        "support_chat=debug,chat_sync=debug,warn"
    } else {
        "support_chat=warn,chat_sync=warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let dirs = SupportChatDirs::new(cli.data_dir)?;
    let config = dirs.load_client_config()?;
    debug!(?config, "loaded configuration");

    match cli.command {
        Commands::Login(args) => cli::login_command(&config, &dirs, args).await,
        Commands::Register(args) => cli::register_command(&config, args).await,
        Commands::Logout => cli::logout_command(&dirs),
        Commands::Chat => cli::chat::chat_command(&config, &dirs).await,
        Commands::Admin => cli::admin::admin_command(&config, &dirs).await,
    }
}
