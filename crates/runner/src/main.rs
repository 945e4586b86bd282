use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billrun_core::{
    create_audit_system, load_config, validate_config, ActionClient, ArtifactManager,
    ArtifactStore, AuditEvent, AuditStore, BatchStore, HttpActionClient, JsonBatchStore,
    PipelineExecutor, SqliteAuditStore,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("BILLRUN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Batch data directory: {:?}", config.storage.data_dir);
    info!("Artifact directory: {:?}", config.storage.artifact_dir);
    info!("Audit database: {:?}", config.audit.db_path);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];
    info!("Config fingerprint: {}", config_hash_short);

    // Create batch store
    let store: Arc<dyn BatchStore> = Arc::new(JsonBatchStore::new(&config.storage.data_dir));

    // Create action API client
    let actions: Arc<dyn ActionClient> = Arc::new(HttpActionClient::new(config.actions.clone()));
    info!("Action client targets {}", config.actions.base_url);

    // Create artifact manager
    let artifacts = Arc::new(ArtifactManager::new(
        Arc::clone(&actions),
        ArtifactStore::new(&config.storage.artifact_dir),
    ));

    // Create SQLite audit store
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.audit.db_path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);

    // Spawn audit writer task
    let writer_handle = tokio::spawn(audit_writer.run());

    // Select the batch: positional argument, or the most recently
    // modified batch file in the data directory.
    let batch_id = match std::env::args().nth(1) {
        Some(id) => id,
        None => {
            let batches = store
                .list_batches()
                .await
                .context("Failed to list batches")?;
            match batches.into_iter().next() {
                Some(id) => id,
                None => bail!("No batch id given and no batches in {:?}", config.storage.data_dir),
            }
        }
    };

    let document = store
        .load(&batch_id)
        .await
        .with_context(|| format!("Failed to load batch '{}'", batch_id))?;
    info!(
        batch_id,
        groups = document.groups.len(),
        "Batch loaded"
    );

    // Emit RunStarted event
    audit_handle
        .emit(AuditEvent::RunStarted {
            batch_id: batch_id.clone(),
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
            groups_total: document.groups.len() as u32,
        })
        .await;

    // Create pipeline executor
    let executor = PipelineExecutor::new(
        Arc::clone(&store),
        Arc::clone(&actions),
        Arc::clone(&artifacts),
        config.pipeline.clone(),
    )
    .with_audit(audit_handle.clone());

    // Run one pass, racing against shutdown signals. An aborted run
    // leaves the batch document resumable: every step commits its
    // status change before the next one starts.
    let report = tokio::select! {
        result = executor.run_batch(&batch_id) => {
            Some(result.with_context(|| format!("Pipeline run over '{}' failed", batch_id))?)
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received; run aborted, batch state remains resumable");
            None
        }
    };

    if let Some(ref report) = report {
        // Emit RunCompleted event
        audit_handle
            .emit(AuditEvent::RunCompleted {
                batch_id: batch_id.clone(),
                succeeded: report.succeeded,
                failed: report.failed,
                already_done: report.already_done,
                duration_ms: report.duration_ms,
            })
            .await;

        print!("{}", report.render());
        log_metrics().context("Failed to encode metrics")?;
    }

    // Drop all holders of AuditHandle so the writer's channel closes.
    // The executor holds a clone, so it must go first. Order matters:
    // the final event is emitted BEFORE the handles are dropped.
    drop(executor);
    drop(audit_handle);

    // Wait for writer to finish processing remaining events
    let _ = writer_handle.await;
    info!("Audit writer stopped");

    match report {
        Some(report) if report.has_failures() => {
            bail!("{} group(s) failed; see report above", report.failed)
        }
        Some(_) => Ok(()),
        None => bail!("run interrupted by signal"),
    }
}

/// Dump all collectors in Prometheus text format.
fn log_metrics() -> Result<()> {
    let registry = prometheus::Registry::new();
    for metric in billrun_core::metrics::all_metrics() {
        registry.register(metric)?;
    }

    let mut dump = String::new();
    prometheus::TextEncoder::new().encode_utf8(&registry.gather(), &mut dump)?;
    info!("Run metrics:\n{}", dump);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
