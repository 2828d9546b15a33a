use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use giftlog::{
    config::RelayConfig,
    core::reducer::GiftReducer,
    history::HistoryLog,
    persist::{sqlite::SqliteHistorySink, HistorySink},
    relay::{serve_until, spawn_relay},
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Relays gift-list patches between WebSocket clients.
#[derive(Debug, Parser)]
#[command(name = "gift-relay", version)]
struct Args {
    /// TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening address, overriding the config file.
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// SQLite journal path, overriding the config file.
    #[arg(long)]
    journal: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(journal) = args.journal {
        config.journal_path = Some(journal);
    }
    config.validate()?;

    let seed = config.load_seed()?;
    let reducer = GiftReducer::from_seed(&seed)?;
    info!(
        users = reducer.users().len(),
        gifts = reducer.defaults().len(),
        "seed loaded"
    );

    let (history, sink) = match &config.journal_path {
        Some(path) => {
            let sink = SqliteHistorySink::open(path)?;
            let history = sink.load_history()?;
            info!(path = %path.display(), batches = history.len(), "journal opened");
            (history, Some(Box::new(sink) as Box<dyn HistorySink>))
        }
        None => (HistoryLog::new(), None),
    };

    // Fails fast on a journal that no longer replays against the seed.
    let handle = spawn_relay(reducer.relay_state(), history, sink, config.clone())?;
    let listener = TcpListener::bind(config.bind_addr).await?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    serve_until(listener, handle.clone(), shutdown).await?;

    handle.shutdown().await?;
    info!("relay stopped");
    Ok(())
}
