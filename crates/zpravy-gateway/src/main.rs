use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rusqlite::Connection;
use tracing::{info, warn};
use zpravy_core::{SourceRegistry, ZpravyConfig};
use zpravy_executor::{Executor, ExecutorSettings, Intake};
use zpravy_ingest::DedupGate;
use zpravy_jobs::{JobStore, Trigger};
use zpravy_scheduler::Scheduler;

mod app;
mod fetcher;
mod http;

/// Busy writers on other connections are waited for up to this long.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Scheduled scraping of Czech news portals")]
struct Cli {
    /// Path to zpravy.toml (default: ~/.zpravy/zpravy.toml)
    #[arg(short, long, env = "ZPRAVY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "zpravy_gateway=info,zpravy_executor=info,zpravy_scheduler=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    // run all schema migrations (idempotent)
    {
        let db = open_connection(&db_path)?;
        zpravy_jobs::init_db(&db)?;
        zpravy_ingest::init_db(&db)?;
        zpravy_scheduler::db::init_db(&db)?;
    }
    info!("database migrations complete");

    let sources = SourceRegistry::new(config.sources.clone());
    for source in config.sources.iter().filter(|s| s.feed_url.trim().is_empty()) {
        warn!(source = %source.name, "source has no feed_url; its jobs will fail");
    }

    // each subsystem gets its own connection
    let store = Arc::new(JobStore::new(open_connection(&db_path)?));
    let gate = Arc::new(DedupGate::new(open_connection(&db_path)?));
    let intake = Arc::new(Intake::new());

    let fetcher = Arc::new(fetcher::JsonFeedFetcher::new(sources.clone())?);
    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        Arc::clone(&gate),
        fetcher,
        Arc::clone(&intake),
        ExecutorSettings::from(&config.executor),
    ));
    let scheduler = Arc::new(Scheduler::new(
        open_connection(&db_path)?,
        Arc::clone(&store),
        Arc::clone(&intake),
        sources,
        &config.scheduler,
    )?);

    let every = Trigger::Interval {
        every_secs: config.scheduler.interval().as_secs(),
    };
    for source in &config.sources {
        scheduler.register_recurring(&source.name, &every)?;
    }

    let requeued = executor.recover()?;
    if requeued > 0 {
        info!(requeued, "re-queued pending jobs from previous run");
    }

    let executor_handle = executor.start();
    let scheduler_handle = scheduler.start();

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, store, gate, executor, scheduler));
    let router = app::build_router(state);

    info!("zpravy gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop creating jobs before draining the workers
    scheduler_handle.stop().await;
    executor_handle.stop().await;
    Ok(())
}

/// A missing file falls back to defaults; anything invalid is fatal.
fn load_config(path: Option<&str>) -> anyhow::Result<ZpravyConfig> {
    ZpravyConfig::load(path).context("invalid configuration")
}

fn open_connection(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_reads_config_flag() {
        let cli = Cli::parse_from(["zpravy-gateway", "--config", "/etc/zpravy.toml"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/zpravy.toml"));
    }

    #[test]
    fn invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zpravy.toml");
        std::fs::write(&path, "[executor]\nmax_concurrent_jobs = 0\n").unwrap();

        let err = load_config(path.to_str()).unwrap_err();
        assert!(format!("{err:#}").contains("max_concurrent_jobs"));

        assert!(load_config(dir.path().join("absent.toml").to_str()).is_ok());
    }

    #[test]
    fn connections_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zpravy.db");
        let path = path.to_str().unwrap();

        let a = open_connection(path).unwrap();
        zpravy_jobs::init_db(&a).unwrap();
        let store = JobStore::new(open_connection(path).unwrap());
        store.create("aktualne", &Trigger::Manual).unwrap();

        let n: i64 = a
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }
}
