//! huddle - command-line front end for the Huddle data layer.
//!
//! `huddle` prints the signed-in user's activity feed, served from the cache
//! when possible. `--sync` refetches everything, `--watch` keeps the cache
//! fresh and logs changes until Ctrl-C, and `--logout` drops all cached data.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use huddle_core::config::{ENV_TOKEN, ENV_USER_ID};
use huddle_core::{
    AuthContext, CacheEvent, CachePolicy, CacheStore, Config, DataService, DataSource,
    HttpTransport, ResourceDescriptor, Session, SessionData, Transport,
};

const LOG_FILE_PREFIX: &str = "huddle.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Feed,
    Sync,
    Watch,
    Logout,
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        match args.get(1).map(String::as_str) {
            None => Ok(Command::Feed),
            Some("--sync") => Ok(Command::Sync),
            Some("--watch") => Ok(Command::Watch),
            Some("--logout") => Ok(Command::Logout),
            Some("--help") | Some("-h") => Ok(Command::Help),
            Some(other) => anyhow::bail!("Unknown argument: {} (try --help)", other),
        }
    }
}

/// Initialize the tracing subscriber for logging.
/// Watch mode also writes a daily-rolling log file under `log_dir`.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Session from `HUDDLE_TOKEN` and `HUDDLE_USER_ID`; empty if either is unset.
fn session_from_env() -> Result<Session> {
    let token = std::env::var(ENV_TOKEN).ok().filter(|t| !t.is_empty());
    let user_id = std::env::var(ENV_USER_ID).ok().filter(|u| !u.is_empty());

    match (token, user_id) {
        (Some(token), Some(user_id)) => {
            let user_id = Uuid::parse_str(user_id.trim())
                .with_context(|| format!("{} is not a valid user id", ENV_USER_ID))?;
            Ok(Session::with_data(SessionData::new(token, user_id)))
        }
        _ => Ok(Session::new()),
    }
}

fn usage() {
    println!("Usage: huddle [--sync | --watch | --logout]");
    println!();
    println!("  (no args)  Print your activity feed");
    println!("  --sync     Refetch every cached resource");
    println!("  --watch    Keep the cache fresh and log changes until Ctrl-C");
    println!("  --logout   Clear all cached data");
    println!();
    println!("Set {} and {} to sign in.", ENV_TOKEN, ENV_USER_ID);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        usage();
        return Ok(());
    }

    let mut config = Config::load()?.apply_env();
    let session = Arc::new(session_from_env()?);
    let user_id = session.current_user_id();
    let cache_dir = config.cache_dir(user_id)?;

    let log_dir = (command == Command::Watch).then(|| cache_dir.join("logs"));
    let _log_guard = init_tracing(log_dir);
    info!(command = ?command, "huddle starting");

    let mut transport = HttpTransport::new(config.request_timeout())?;
    if let Some(token) = session.token() {
        transport.set_token(token);
    }
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let store = if config.persist_cache {
        CacheStore::open(cache_dir, config.fetch_ordering)?
    } else {
        CacheStore::with_ordering(config.fetch_ordering)
    };
    let auth: Arc<dyn AuthContext> = session.clone();
    let service = DataService::from_config(&config, transport, Arc::new(store), auth)?;

    if command == Command::Logout {
        service.logout().await;
        config.last_user_id = None;
        config.save()?;
        println!("Logged out, cache cleared.");
        return Ok(());
    }

    let Some(user_id) = user_id else {
        anyhow::bail!("Not signed in. Set {} and {}.", ENV_TOKEN, ENV_USER_ID);
    };
    if session.data().is_some_and(|d| d.needs_refresh()) {
        warn!("Session token expires soon");
    }
    if config.last_user_id != Some(user_id) {
        config.last_user_id = Some(user_id);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    let result = match command {
        Command::Feed => print_feed(&service, user_id).await,
        Command::Sync => sync(&service, user_id).await,
        Command::Watch => watch(&service, &config).await,
        Command::Logout | Command::Help => Ok(()),
    };

    service.shutdown().await;
    info!("huddle shutting down");
    result
}

async fn print_feed(service: &DataService, user_id: Uuid) -> Result<()> {
    let result = service
        .visible_activities(user_id, CachePolicy::default())
        .await?;

    let freshness = match result.source {
        DataSource::Api => "just fetched".to_string(),
        DataSource::Cache => service
            .store()
            .get_raw(&ResourceDescriptor::Activities { user_id }.cache_key())
            .map(|entry| format!("cached, updated {}", entry.age_display()))
            .unwrap_or_else(|| "cached".to_string()),
    };

    println!("Activities ({}, {})", result.data.len(), freshness);
    for activity in &result.data {
        let limit = activity
            .participant_limit
            .map(|n| format!("  [{} max]", n))
            .unwrap_or_default();
        println!("  {}  {}{}", activity.formatted_start(), activity.display_title(), limit);
    }

    // Let the background refresh land so the next run starts warm
    service.wait_for_refreshes().await;
    Ok(())
}

async fn sync(service: &DataService, user_id: Uuid) -> Result<()> {
    let failures = service.refresh_all(user_id).await;
    if failures.is_empty() {
        println!("Everything is up to date.");
    } else {
        for (kind, error) in &failures {
            println!("  {}: {}", kind, error);
        }
    }

    for (key, age) in service.store().ages() {
        println!("  {:<60} {}", key.to_string(), age);
    }
    Ok(())
}

fn event_label(event: &CacheEvent) -> &'static str {
    match event {
        CacheEvent::Updated { .. } => "updated",
        CacheEvent::Removed { .. } => "removed",
        CacheEvent::Invalidated { .. } => "invalidated",
        CacheEvent::Cleared => "cleared",
    }
}

async fn watch(service: &DataService, config: &Config) -> Result<()> {
    let mut events = service.subscribe_all();
    service.start_background(config)?;
    println!("Watching for changes, press Ctrl-C to stop.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Some(event) => match event.key() {
                    Some(key) => {
                        info!(key = %key, change = event_label(&event), "Cache changed");
                        println!("{:<12} {}", event_label(&event), key);
                    }
                    None => println!("cache cleared"),
                },
                None => break,
            },
        }
    }
    Ok(())
}
