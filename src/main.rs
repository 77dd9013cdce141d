//! Tabrelay - drive browser tabs from a remote operator
//!
//! Main entry point for the relay service and its one-shot commands.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tabrelay::{
    Browser, CommandExecutor, ControlChannel, IngestionSender, LaunchConfig, RelayConfig,
    DEFAULT_INGEST_URL, DEFAULT_SOCKET_URL,
};

/// Tabrelay CLI.
#[derive(Parser)]
#[command(name = "tabrelay")]
#[command(about = "Drive browser tabs from a remote operator over a persistent WebSocket")]
#[command(version)]
struct Cli {
    /// DevTools HTTP endpoint of a running Chrome
    #[arg(long, env = "TABRELAY_CDP", default_value = "http://127.0.0.1:9222", global = true)]
    cdp: String,

    /// Launch a local Chrome instead of attaching to one
    #[arg(long, env = "TABRELAY_LAUNCH", global = true)]
    launch: bool,

    /// Path to Chrome/Chromium binary (with --launch)
    #[arg(long, env = "TABRELAY_CHROME_PATH", global = true)]
    chrome_path: Option<PathBuf>,

    /// Run the launched Chrome headless
    #[arg(long, env = "TABRELAY_HEADLESS", global = true)]
    headless: bool,

    /// Controller WebSocket endpoint
    #[arg(long, env = "TABRELAY_SOCKET_URL", default_value = DEFAULT_SOCKET_URL, global = true)]
    socket_url: String,

    /// Ingestion HTTP endpoint
    #[arg(long, env = "TABRELAY_INGEST_URL", default_value = DEFAULT_INGEST_URL, global = true)]
    ingest_url: String,

    /// Include the serialized document in captures
    #[arg(long, env = "TABRELAY_INCLUDE_HTML", global = true)]
    include_html: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the control channel open until Ctrl-C
    Serve,

    /// Capture a tab and POST it to the ingestion endpoint
    Send {
        /// Tab to capture (default: active tab)
        #[arg(long)]
        tab_id: Option<i64>,
    },

    /// Print capturable tabs as JSON
    Tabs,
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            socket_url: self.socket_url.clone(),
            ingest_url: self.ingest_url.clone(),
            include_html: self.include_html,
            ..Default::default()
        }
    }

    async fn browser(&self) -> tabrelay::Result<Browser> {
        if self.launch {
            Browser::launch(&LaunchConfig {
                chrome_path: self.chrome_path.clone(),
                headless: self.headless,
            })
            .await
        } else {
            Browser::connect(&self.cdp).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> tabrelay::Result<bool> {
    let config = Arc::new(cli.relay_config());
    let browser = Arc::new(cli.browser().await?);
    info!("Using {}", browser.version().await?);

    let executor = Arc::new(CommandExecutor::new(browser.clone(), config.clone()));

    let ok = match cli.command {
        Commands::Serve => {
            let channel = ControlChannel::new(config, executor);
            channel.start();
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            channel.stop();
            true
        }
        Commands::Send { tab_id } => {
            IngestionSender::new(&config)
                .send_tab(&executor, tab_id)
                .await
        }
        Commands::Tabs => {
            let tabs = executor.list_tabs().await?;
            println!("{}", serde_json::to_string_pretty(&tabs)?);
            true
        }
    };

    browser.close().await?;
    Ok(ok)
}
