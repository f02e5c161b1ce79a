//! keyledger
//!
//! Adds, removes, cleans up and lists ephemeral keys kept in a versioned
//! JSON document. `watch` stays running and expires keys on time.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use keyledger_config::{AppConfig, BackendKind};
use keyledger_keys::{
    execute, DocumentStore, ExpirationScheduler, FileDocumentStore, GitHubDocumentStore,
    KeyStore, MemoryDocumentStore,
};
use keyledger_logging::{init_console_logging, init_logging};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "keyledger";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration, then let explicit flags win
    let mut config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    cli.store.apply(&mut config);

    match &cli.command {
        Commands::Watch { .. } => init_logging(SERVICE_NAME, config.log_level()),
        _ => init_console_logging(SERVICE_NAME, config.log_level()),
    }

    let backend = build_backend(&config).await?;
    info!(
        backend = backend.backend_name(),
        path = %config.keys_path,
        "Configuration loaded"
    );

    match cli.command.to_command(&config.added_by) {
        Some(command) => {
            let store = KeyStore::new(backend, config.keys_path.clone());
            let output = execute(&store, command).await?;
            println!("{}", output);
            Ok(())
        }
        None => {
            let sweep_secs = match cli.command {
                Commands::Watch { sweep_interval } => {
                    sweep_interval.unwrap_or(config.scheduler.sweep_interval_secs)
                }
                _ => config.scheduler.sweep_interval_secs,
            };
            watch(backend, &config, sweep_secs).await
        }
    }
}

async fn build_backend(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    let backend: Arc<dyn DocumentStore> = match config.backend {
        BackendKind::Github => {
            let github = config
                .require_github()
                .map_err(|e| anyhow::anyhow!("GitHub backend is not configured: {}", e))?;
            Arc::new(
                GitHubDocumentStore::new(&github.owner, &github.repo, &github.token)?
                    .with_api_url(&github.api_url)
                    .with_branch(github.branch.clone()),
            )
        }
        BackendKind::File => Arc::new(
            FileDocumentStore::new(&config.file_root)
                .await
                .with_context(|| {
                    format!("Failed to open key directory {}", config.file_root.display())
                })?,
        ),
        BackendKind::Memory => {
            warn!("Using the in-memory backend; keys are lost on exit");
            Arc::new(MemoryDocumentStore::new())
        }
    };
    Ok(backend)
}

async fn watch(backend: Arc<dyn DocumentStore>, config: &AppConfig, sweep_secs: u64) -> Result<()> {
    info!("Starting key expiration watcher");

    let scheduler = Arc::new(if config.scheduler.enabled {
        ExpirationScheduler::new()
    } else {
        ExpirationScheduler::disabled()
    });
    let store = Arc::new(
        KeyStore::new(backend, config.keys_path.clone()).with_scheduler(scheduler.clone()),
    );

    // Anything already overdue goes now; the rest gets a timer
    let removed = store.cleanup().await?;
    if !removed.is_empty() {
        info!(count = removed.len(), "Removed keys that expired while not watching");
    }
    let entries = store.list_keys().await?;
    let scheduled = scheduler.schedule_entries(&entries);
    info!(keys = entries.len(), timers = scheduled, "Loaded key document");

    let sweep = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));
    let handle = scheduler.spawn(store, sweep);

    info!(sweep_interval_secs = sweep_secs, "Watcher running. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    handle.shutdown().await;
    info!("Watcher stopped");

    Ok(())
}
