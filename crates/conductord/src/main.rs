//! Conductor Daemon - command dispatch over line-delimited JSON
//!
//! Reads one `DispatchRequest` per line on stdin and writes one
//! `DispatchResponse` per line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use conductor_shared::{
    DispatchRequest, DispatchResponse, DispatchStatus, ErrorKind, FailureReport,
};
use conductord::config::DaemonConfig;
use conductord::dispatcher::TracingHook;
use conductord::handlers::HandlerEntry;
use conductord::{logging, Dispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "conductord")]
#[command(about = "Conductor - command dispatch and resilience engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to /etc/conductor/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "conductord=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the default config and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        println!("{}", DaemonConfig::default_toml()?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load_from_path(path)?,
        None => DaemonConfig::load(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    logging::init(&config.logging)?;

    info!("Conductor Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let dispatcher = Dispatcher::builder(config.clone())
        .default_handler(HandlerEntry::Describe)
        .hook(Arc::new(TracingHook))
        .build()
        .await
        .context("Failed to build dispatcher")?;
    let dispatcher = Arc::new(dispatcher);

    let _sweeper = dispatcher
        .cache()
        .spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));
    let _persister = dispatcher
        .decisions()
        .spawn_persister(Duration::from_secs(config.decision.persist_interval_secs));
    let pruner = dispatcher.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            pruner.security().prune();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!("stdout closed, dropping responses");
                break;
            }
        }
    });

    info!("Conductor Daemon ready, reading requests from stdin");

    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let dispatcher = dispatcher.clone();
                        let tx = tx.clone();
                        tasks.spawn(async move {
                            let response = handle_line(&dispatcher, &line).await;
                            match serde_json::to_string(&response) {
                                Ok(json) => {
                                    let _ = tx.send(json);
                                }
                                Err(e) => error!("Failed to serialize response: {}", e),
                            }
                        });
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }

    // Let running requests finish writing
    while tasks.join_next().await.is_some() {}
    drop(tx);
    let _ = writer.await;

    if let Err(e) = dispatcher.decisions().save() {
        warn!("Failed to persist decision state: {:#}", e);
    }
    let stats = dispatcher.stats();
    info!(
        "Handled {} requests ({} ok, {} failed)",
        stats.total, stats.successes, stats.failures
    );

    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher, line: &str) -> DispatchResponse {
    match serde_json::from_str::<DispatchRequest>(line) {
        Ok(request) => dispatcher.dispatch(request).await,
        Err(e) => {
            let report = FailureReport::new(ErrorKind::Validation, format!("Malformed request: {}", e))
                .with_suggestions(vec![
                    r#"Send {"command": "/help", "parameters": {}, "context": {"caller_id": "me"}}"#
                        .to_string(),
                ]);
            DispatchResponse::failure(uuid::Uuid::new_v4().to_string(), DispatchStatus::Failed, report)
        }
    }
}
