//! pwacache - drive the cache-aside worker from the command line.
//!
//! Runs the worker's lifecycle events against a real origin, with cache
//! stores persisted on disk so that successive invocations share them.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use pwacache_core::cache::{InstallOutcome, ResponseSource};
use pwacache_core::{
    CacheManager, CacheStorage, Config, DiskStorage, EventOutcome, HttpNetwork, Request,
    WorkerEvent,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: pwacache <command>

Commands:
  install          Create the current cache and precache the install manifest
  activate         Delete every cache not named after the current version
  fetch <target>   Serve a path or URL cache-first; body is written to stdout
  caches           List cache stores and their entries
  message <json>   Post a message to the worker, e.g. '{\"type\":\"SKIP_WAITING\"}'
  help             Show this message

Configuration is read from $PWACACHE_CONFIG or ~/.config/pwacache/config.json.
Set RUST_LOG (e.g. RUST_LOG=debug) to control log output.";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Everything a command needs, built from the loaded config.
struct CliState {
    config: Config,
    storage: Arc<DiskStorage>,
    manager: CacheManager,
}

impl CliState {
    fn load() -> Result<Self> {
        let config = Config::load().context("Failed to load config")?;
        let cache_dir = config.cache_dir()?;
        let storage = Arc::new(
            DiskStorage::new(cache_dir.clone())
                .with_context(|| format!("Failed to open cache directory: {}", cache_dir.display()))?,
        );
        let network = Arc::new(HttpNetwork::new(config.origin_url()?)?);
        let manager = CacheManager::new(config.worker_config()?, storage.clone(), network);
        Ok(Self {
            config,
            storage,
            manager,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");

    match command {
        "install" => install().await,
        "activate" => activate().await,
        "fetch" => {
            let target = args.get(1).context("fetch requires a path or URL")?;
            fetch(target).await
        }
        "caches" => caches().await,
        "message" => {
            let raw = args.get(1).context("message requires a JSON payload")?;
            message(raw).await
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

async fn install() -> Result<()> {
    let state = CliState::load()?;
    info!(cache = %state.manager.cache_name(), "Installing");

    if let EventOutcome::Installed(outcome) = state.manager.dispatch(WorkerEvent::Install).await {
        match outcome {
            InstallOutcome::Precached(count) => {
                eprintln!("Installed {}: precached {} resources", state.manager.cache_name(), count);
            }
            InstallOutcome::PrecacheFailed => {
                eprintln!(
                    "Installed {}: precaching failed, cache left empty (set RUST_LOG=error for details)",
                    state.manager.cache_name()
                );
            }
        }
    }
    Ok(())
}

async fn activate() -> Result<()> {
    let state = CliState::load()?;

    if let EventOutcome::Activated { deleted } = state.manager.dispatch(WorkerEvent::Activate).await {
        if deleted.is_empty() {
            eprintln!("Activated {}: no old caches", state.manager.cache_name());
        } else {
            eprintln!("Activated {}: deleted {}", state.manager.cache_name(), deleted.join(", "));
        }
    }
    Ok(())
}

async fn fetch(target: &str) -> Result<()> {
    let state = CliState::load()?;
    let request = Request::get(state.config.resolve(target)?);

    if let EventOutcome::Responded(outcome) = state.manager.dispatch(WorkerEvent::Fetch(request)).await {
        // Let the background cache write finish before the process exits
        state.manager.settle().await;

        let source = match outcome.source {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
        };
        eprintln!("{} ({}, {} bytes)", outcome.response.status, source, outcome.response.body.len());
        io::stdout().write_all(&outcome.response.body)?;
    }
    Ok(())
}

async fn caches() -> Result<()> {
    let state = CliState::load()?;
    let current = state.manager.cache_name();

    let names = state.storage.keys().await?;
    if names.is_empty() {
        println!("No caches in {}", state.storage.root().display());
        return Ok(());
    }

    for name in names {
        let marker = if current == &name { "*" } else { " " };
        let mut keys = state.storage.entries(&name).await?;
        keys.sort_by(|a, b| a.url.cmp(&b.url));
        println!("{} {} ({} entries)", marker, name, keys.len());

        for key in keys {
            match state.storage.lookup(&name, &key).await? {
                Some(stored) => println!("    {} [{} bytes, {} old]", key, stored.size(), stored.age_label()),
                None => println!("    {} [missing]", key),
            }
        }
    }
    Ok(())
}

async fn message(raw: &str) -> Result<()> {
    let state = CliState::load()?;
    let payload: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("Invalid JSON message: {}", raw))?;

    if let EventOutcome::Message(command) = state.manager.dispatch(WorkerEvent::Message(payload)).await {
        match command {
            Some(command) => println!("Recognized command: {:?}", command),
            None => println!("Message ignored"),
        }
    }
    Ok(())
}
