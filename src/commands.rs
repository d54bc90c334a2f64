use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::IngestError;
use crate::config::{Config, show_config};
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::CacheStatus;
use crate::embeddings::OllamaClient;
use crate::ingestion::{
    ChangeDetector, DetectionSummary, Orchestrator, ResultRecord, RunOptions, RunReport,
    RunState, UploadEvent,
};
use crate::storage::{ObjectStorage, results_location};

async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")
}

fn open_uploads(config: &Config) -> Result<ObjectStorage> {
    ObjectStorage::local(&config.uploads_path()).context("Failed to open uploads store")
}

fn open_artifacts(config: &Config) -> Result<ObjectStorage> {
    ObjectStorage::local(&config.artifacts_path()).context("Failed to open artifacts store")
}

fn print_detection(summary: &DetectionSummary) {
    println!("Marked pending: {}", summary.marked_pending());
    println!("  Created: {}", summary.created);
    println!("  Updated: {}", summary.updated);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Skipped: {}", summary.skipped);
}

/// Print the effective configuration, or write it to the config file
#[inline]
pub fn configure(config: &Config, show: bool) -> Result<()> {
    if show {
        println!("{}", show_config(config)?);
    } else {
        config.save()?;
        println!("Configuration written to {}", config.config_file_path().display());
    }
    Ok(())
}

/// Treat `keys` as freshly uploaded objects
#[inline]
pub async fn notify(config: &Config, keys: Vec<String>) -> Result<DetectionSummary> {
    let detector = ChangeDetector::new(open_database(config).await?, open_uploads(config)?);
    let summary = detector.handle_event(&UploadEvent::for_keys(keys)).await?;
    print_detection(&summary);
    Ok(summary)
}

/// Notify for every object in the uploads store
#[inline]
pub async fn scan(config: &Config) -> Result<DetectionSummary> {
    let detector = ChangeDetector::new(open_database(config).await?, open_uploads(config)?);
    let summary = detector.scan().await?;
    print_detection(&summary);
    Ok(summary)
}

/// One pipeline run against the configured stores. Ctrl-C stops starting
/// new documents and lets running ones finish.
#[inline]
pub async fn run_pipeline(config: &Config, run_id: Option<String>, purge: bool) -> Result<RunReport> {
    config.validate()?;

    let client = OllamaClient::new(&config.ollama)?;
    let client = tokio::task::spawn_blocking(move || client.health_check().map(|()| client))
        .await
        .context("Ollama check task failed")?
        .context("Ollama is not ready")?;
    info!("Using embedding model {}", client.model());

    let database = open_database(config).await?;
    let vector_store = Arc::new(VectorStore::new(config).await?);
    let orchestrator = Orchestrator::new(
        config,
        database,
        open_uploads(config)?,
        open_artifacts(config)?,
        vector_store,
        Arc::new(client),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing documents in flight");
            signal_cancel.cancel();
        }
    });

    let result = orchestrator
        .run(
            RunOptions {
                run_id,
                purge_vector_store: purge,
            },
            &cancel,
        )
        .await;
    signal_task.abort();

    let report = result?;
    print!("{report}");
    if report.state == RunState::Cancelled {
        return Err(IngestError::Cancelled.into());
    }
    Ok(report)
}

/// Cache entry counts per status and the number of stored vectors
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let statistics = database.get_statistics().await?;

    println!("Cache entries: {}", statistics.total);
    for status in CacheStatus::ALL {
        let count = match status {
            CacheStatus::Pending => statistics.pending,
            CacheStatus::Processing => statistics.processing,
            CacheStatus::Processed => statistics.processed,
            CacheStatus::Failed => statistics.failed,
        };
        println!("  {status}: {count}");
    }

    let vector_store = VectorStore::new(config).await?;
    println!(
        "Vectors in {}: {}",
        vector_store.table_name(),
        vector_store.count_embeddings().await?
    );
    Ok(())
}

/// Print the result records of `run_id`
#[inline]
pub async fn show_results(config: &Config, run_id: &str) -> Result<Vec<ResultRecord>> {
    let artifacts = open_artifacts(config)?;
    let location = results_location(run_id);
    let records: Vec<ResultRecord> = artifacts
        .read_json_lines(&location)
        .await
        .with_context(|| format!("No results for run {run_id}"))?;

    for record in &records {
        match &record.error_detail {
            Some(detail) => println!("{}  error  {}", record.document_uri, detail),
            None => println!(
                "{}  success  {} vectors",
                record.document_uri, record.vector_count
            ),
        }
    }
    let failed = records.iter().filter(|r| !r.is_success()).count();
    println!("{} documents, {} failed", records.len(), failed);
    Ok(records)
}

/// Move every `failed` entry back to `pending`
#[inline]
pub async fn requeue_failed(config: &Config) -> Result<u64> {
    let database = open_database(config).await?;
    let requeued = database.requeue(CacheStatus::Failed).await?;
    println!("Requeued {requeued} failed documents");
    Ok(requeued)
}
