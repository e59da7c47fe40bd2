use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use client_core::{load_settings, MemoryChatClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;
mod repl;

/// Terminal client for the preference-memory assistant.
#[derive(Parser, Debug)]
#[command(name = "memochat")]
struct Args {
    /// Base address of the identity service.
    #[arg(long)]
    identity_url: Option<String>,
    /// Base address of the assistant service. Defaults to the identity address.
    #[arg(long)]
    assistant_url: Option<String>,
    /// TOML settings file (defaults to ./memochat.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    let assistant_follows_identity = settings.assistant_url == settings.identity_url;
    if let Some(url) = args.identity_url {
        if assistant_follows_identity {
            settings.assistant_url = url.clone();
        }
        settings.identity_url = url;
    }
    if let Some(url) = args.assistant_url {
        settings.assistant_url = url;
    }
    let settings = settings.normalize()?;
    info!(
        identity_url = %settings.identity_url,
        assistant_url = %settings.assistant_url,
        "starting memochat"
    );

    let client = MemoryChatClient::new(&settings);
    repl::run(client).await
}
