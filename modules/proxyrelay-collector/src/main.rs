use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proxyrelay_collector::store::OutputStore;
use proxyrelay_collector::Relay;
use proxyrelay_common::Config;
use telegram_client::TelegramClient;

#[derive(Parser)]
#[command(name = "proxyrelay", about = "Collect proxy configs from Telegram channels and republish a batch")]
struct Cli {
    /// Source list, one channel handle per line
    #[arg(long, default_value = "./channels.txt")]
    channels: PathBuf,

    /// Directory receiving the run artifacts
    #[arg(long, default_value = "./output")]
    output: PathBuf,

    /// Directory for downloaded config files (defaults to <output>/attachments)
    #[arg(long)]
    attachments: Option<PathBuf>,

    /// Collect and write artifacts without posting anything
    #[arg(long)]
    no_publish: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("proxyrelay=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("proxyrelay starting...");

    let config = Config::from_env().context("Invalid configuration")?;
    config.log_redacted();

    let attachments_dir = cli
        .attachments
        .unwrap_or_else(|| cli.output.join("attachments"));
    let transport = Arc::new(TelegramClient::new(config.bot_token.clone()));

    let relay = Relay::builder()
        .transport(transport)
        .policy(config.policy.clone())
        .destination(config.destination_chat.clone())
        .sources_path(cli.channels.clone())
        .attachments_dir(attachments_dir)
        .store(OutputStore::new(cli.output.clone()))
        .publish(!cli.no_publish)
        .build();

    let summary = relay
        .run(chrono::Utc::now())
        .await
        .context("Relay run aborted")?;
    println!("{summary}");
    Ok(())
}
