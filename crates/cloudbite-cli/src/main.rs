use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use cloudbite_client::config::ClientConfig;
use cloudbite_client::discovery::DiscoveryEngine;
use cloudbite_client::facade::ConnectionManager;
use cloudbite_client::netwatch::NetworkWatcher;
use cloudbite_client::probe::{HttpProbe, Probe};
use cloudbite_client::storage::ConnectionStore;
use cloudbite_client::ConnectionMode;

#[derive(Parser, Debug)]
#[command(name = "cloudbite", about = "CloudBite connection daemon and tools")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the connection daemon, streaming state changes
    Run,
    /// One-shot LAN scan for a compatible server
    Discover,
    /// Probe a server URL and print its identity
    Test {
        /// Base URL, e.g. http://192.168.1.50:3737
        url: String,
    },
    /// Show persisted connection state
    Status,
    /// Set the connection mode preference (auto|manual|remote)
    Mode {
        mode: String,
        /// Server URL for manual/remote mode
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::load(&args.config).await?;
    let store = Arc::new(ConnectionStore::open().await?);

    match args.command {
        Commands::Run => run_daemon(config, store).await,
        Commands::Discover => discover(config, store).await,
        Commands::Test { url } => test_connection(config, store, &url).await,
        Commands::Status => status(store).await,
        Commands::Mode { mode, url } => set_mode(store, &mode, url).await,
    }
}

async fn run_daemon(config: ClientConfig, store: Arc<ConnectionStore>) -> anyhow::Result<()> {
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new());
    let watcher = NetworkWatcher::spawn(Duration::from_secs(2));
    let manager = ConnectionManager::new(&config, probe, store, watcher.subscribe());

    info!("CloudBite connection daemon starting");
    manager.initialize().await;

    // Stream every state snapshot to the log until ctrl-c.
    let mut rx = manager.subscribe();
    let state_task = tokio::spawn(async move {
        loop {
            {
                let state = rx.borrow();
                info!(
                    connected = state.is_connected,
                    healthy = state.is_healthy,
                    wifi = state.has_wifi,
                    searching = state.is_searching,
                    attempts = state.attempts,
                    url = state.server_url.as_deref().unwrap_or("-"),
                    error = state.error.as_deref().unwrap_or("-"),
                    "Connection state"
                );
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    state_task.abort();
    manager.cleanup();
    watcher.stop();
    Ok(())
}

async fn discover(config: ClientConfig, store: Arc<ConnectionStore>) -> anyhow::Result<()> {
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new());
    let engine = Arc::new(DiscoveryEngine::new(config.discovery, probe, store));

    println!("Scanning the local network...");
    match engine.force_rediscovery().await {
        Ok(url) => {
            println!("Found server: {}", url);
            Ok(())
        }
        Err(e) => {
            anyhow::bail!("{}", e);
        }
    }
}

async fn test_connection(
    config: ClientConfig,
    store: Arc<ConnectionStore>,
    url: &str,
) -> anyhow::Result<()> {
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new());
    let engine = DiscoveryEngine::new(config.discovery, probe, store);

    match engine.test_connection(url).await {
        Some(identity) => {
            println!("Server at {}", url);
            println!("══════════════════════════════");
            println!("  Name:      {}", identity.name);
            println!("  Version:   {}", identity.version);
            println!("  Port:      {}", identity.port);
            println!("  Features:  {}", identity.features.join(", "));
            Ok(())
        }
        None => anyhow::bail!("no compatible server at {}", url),
    }
}

async fn status(store: Arc<ConnectionStore>) -> anyhow::Result<()> {
    println!("Persisted connection state");
    println!("══════════════════════════════");
    println!(
        "  Last server:  {}",
        store.last_api_url().await.as_deref().unwrap_or("none")
    );
    println!("  Mode:         {:?}", store.mode().await);
    println!(
        "  Manual URL:   {}",
        store.manual_url().await.as_deref().unwrap_or("none")
    );
    Ok(())
}

async fn set_mode(
    store: Arc<ConnectionStore>,
    mode: &str,
    url: Option<String>,
) -> anyhow::Result<()> {
    let mode = match mode {
        "auto" => ConnectionMode::Auto,
        "manual" => ConnectionMode::Manual,
        "remote" => ConnectionMode::Remote,
        other => anyhow::bail!("unknown mode '{}', expected auto|manual|remote", other),
    };

    if matches!(mode, ConnectionMode::Manual | ConnectionMode::Remote) && url.is_none() {
        let existing = store.manual_url().await;
        if existing.is_none() {
            anyhow::bail!("manual/remote mode needs --url");
        }
    }

    store.set_mode(mode).await?;
    if let Some(url) = url {
        store.set_manual_url(Some(url)).await?;
    }
    println!("Mode set to {:?}", mode);
    Ok(())
}
