
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::lancedb::{ChunkMetadata, EmbeddingRecord};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::CacheStatus;
use crate::embeddings::{ChunkingConfig, Embedder, chunk_text};
use crate::ingestion::database_error;
use crate::ingestion::extract::{DocumentKind, extract, sidecar_location};
use crate::ingestion::manifest::{ManifestEntry, load_manifest};
use crate::storage::{ObjectStorage, results_location};
use crate::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
}

/// Outcome of one manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub document_uri: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Vectors written, zero on error
    #[serde(default)]
    pub vector_count: usize,
}

impl ResultRecord {
    #[inline]
    pub fn success(document_uri: impl Into<String>, vector_count: usize) -> Self {
        Self {
            document_uri: document_uri.into(),
            outcome: Outcome::Success,
            error_detail: None,
            vector_count,
        }
    }

    #[inline]
    pub fn error(document_uri: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            document_uri: document_uri.into(),
            outcome: Outcome::Error,
            error_detail: Some(detail.into()),
            vector_count: 0,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// What a processing pass did with its manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub records: Vec<ResultRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub vectors: usize,
    /// Claimed entries handed back to `pending` without being started
    pub released: usize,
    pub cancelled: bool,
    /// Where the records were written, `None` if writing them failed
    pub results_location: Option<String>,
    /// Problems that did not fail the pass but lost part of its output
    pub warnings: Vec<String>,
}

impl BatchSummary {
    fn from_records(mut records: Vec<ResultRecord>, released: usize, cancelled: bool) -> Self {
        records.sort_by(|a, b| a.document_uri.cmp(&b.document_uri));
        let succeeded = records.iter().filter(|r| r.is_success()).count();
        let vectors = records.iter().map(|r| r.vector_count).sum();
        Self {
            succeeded,
            failed: records.len() - succeeded,
            vectors,
            released,
            cancelled,
            results_location: None,
            warnings: Vec::new(),
            records,
        }
    }
}

/// Result records of one run, rewritten as each entry completes so a crash
/// mid-run keeps what was already done
struct ResultsLog<'a> {
    artifacts: &'a ObjectStorage,
    location: String,
    records: Vec<ResultRecord>,
    last_error: Option<String>,
}

impl<'a> ResultsLog<'a> {
    /// Create the run's (empty) results object; fails if the run already has one
    async fn create(artifacts: &'a ObjectStorage, run_id: &str) -> Result<Self> {
        let location = results_location(run_id);
        artifacts
            .put_json_lines_new::<ResultRecord>(&location, &[])
            .await?;
        Ok(Self {
            artifacts,
            location,
            records: Vec::new(),
            last_error: None,
        })
    }

    async fn append(&mut self, record: &ResultRecord) {
        self.records.push(record.clone());
        self.flush().await;
    }

    async fn flush(&mut self) {
        match self
            .artifacts
            .put_json_lines(&self.location, &self.records)
            .await
        {
            Ok(()) => self.last_error = None,
            Err(e) => {
                warn!("Failed to write result records to {}: {}", self.location, e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Final write in `records` order. Returns the location, or the reason
    /// the records could not be written.
    async fn finish(mut self, records: &[ResultRecord]) -> std::result::Result<String, String> {
        records.clone_into(&mut self.records);
        self.flush().await;
        match self.last_error {
            None => Ok(self.location),
            Some(e) => Err(format!(
                "Result records could not be written to {}: {e}",
                self.location
            )),
        }
    }
}

/// Everything one document needs, shared by all workers of a pass
struct DocumentWorker {
    database: Database,
    uploads: ObjectStorage,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    dimension: usize,
}

/// Processes manifest entries with at most `max_concurrency` in flight
pub struct ParallelProcessor {
    worker: Arc<DocumentWorker>,
    artifacts: ObjectStorage,
    max_concurrency: usize,
}

impl ParallelProcessor {
    #[inline]
    pub fn new(
        config: &Config,
        database: Database,
        uploads: ObjectStorage,
        artifacts: ObjectStorage,
        vector_store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            worker: Arc::new(DocumentWorker {
                database,
                uploads,
                vector_store,
                embedder,
                chunking: config.chunking.clone(),
                dimension: config.ollama.embedding_dimension as usize,
            }),
            artifacts,
            max_concurrency: config.ingestion.max_concurrency.max(1),
        }
    }

    #[inline]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Hand claimed entries back to `pending` without processing them
    #[inline]
    pub async fn release(&self, entries: &[ManifestEntry]) -> usize {
        self.worker.release(entries).await
    }

    /// Process the manifest at `manifest_location` and write the run's
    /// result records. An unreadable manifest, or a run that already has
    /// results, is fatal; document failures only show up in the records.
    #[instrument(skip(self, cancel))]
    #[inline]
    pub async fn process(
        &self,
        run_id: &str,
        manifest_location: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let entries = load_manifest(&self.artifacts, manifest_location).await?;
        let mut log = match ResultsLog::create(&self.artifacts, run_id).await {
            Ok(log) => log,
            Err(e) => {
                error!("Cannot record results for run {}: {}", run_id, e);
                let released = self.worker.release(&entries).await;
                warn!("Released {} claimed documents", released);
                return Err(e);
            }
        };
        info!(
            "Processing {} documents with up to {} workers",
            entries.len(),
            self.max_concurrency
        );

        let mut summary = self.fan_out(entries, cancel, Some(&mut log)).await?;

        match log.finish(&summary.records).await {
            Ok(location) => summary.results_location = Some(location),
            Err(warning) => {
                error!("{}", warning);
                summary.warnings.push(warning);
            }
        }

        info!(
            "Processed {} documents: {} succeeded, {} failed, {} vectors, {} released",
            summary.records.len(),
            summary.succeeded,
            summary.failed,
            summary.vectors,
            summary.released
        );
        Ok(summary)
    }

    /// Fan out over `entries`. Once `cancel` fires no further entry is
    /// started; running ones finish and the rest go back to `pending`.
    #[inline]
    pub async fn process_entries(
        &self,
        entries: Vec<ManifestEntry>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        self.fan_out(entries, cancel, None).await
    }

    async fn fan_out(
        &self,
        entries: Vec<ManifestEntry>,
        cancel: &CancellationToken,
        mut log: Option<&mut ResultsLog<'_>>,
    ) -> Result<BatchSummary> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<Id, ManifestEntry> = HashMap::new();
        let mut remaining = entries.into_iter();
        let mut next = remaining.next();
        let mut unstarted = Vec::new();
        let mut records = Vec::new();

        // Completions are collected while waiting for permits so each record
        // is logged as soon as its entry is done
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled(), if next.is_some() => {
                    unstarted.extend(next.take());
                    unstarted.extend(remaining.by_ref());
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    let record = match joined {
                        Ok((id, record)) => {
                            in_flight.remove(&id);
                            record
                        }
                        Err(e) => {
                            let Some(entry) = in_flight.remove(&e.id()) else {
                                error!("Unknown document worker did not complete: {}", e);
                                continue;
                            };
                            let detail = if e.is_panic() {
                                "Document worker panicked".to_string()
                            } else {
                                format!("Document worker did not complete: {e}")
                            };
                            error!("{} on {}", detail, entry.document_uri);
                            self.worker.fail(entry, detail).await
                        }
                    };
                    if let Some(log) = log.as_deref_mut() {
                        log.append(&record).await;
                    }
                    records.push(record);
                }
                permit = Arc::clone(&semaphore).acquire_owned(), if next.is_some() => {
                    let permit = permit
                        .map_err(|e| IngestError::Other(anyhow!("Worker pool closed: {e}")))?;
                    if let Some(entry) = next.take() {
                        let worker = Arc::clone(&self.worker);
                        let task_entry = entry.clone();
                        let handle = tasks.spawn(async move {
                            let _permit = permit;
                            worker.process(task_entry).await
                        });
                        in_flight.insert(handle.id(), entry);
                    }
                    next = remaining.next();
                }
                else => break,
            }
        }

        let released = self.worker.release(&unstarted).await;
        if !unstarted.is_empty() {
            warn!(
                "Cancelled with {} documents not started, {} released",
                unstarted.len(),
                released
            );
        }

        Ok(BatchSummary::from_records(
            records,
            released,
            cancel.is_cancelled(),
        ))
    }
}

impl DocumentWorker {
    #[instrument(skip_all, fields(document_uri = %entry.document_uri))]
    async fn process(&self, entry: ManifestEntry) -> ResultRecord {
        // The lease runs from here rather than from the claim
        match self
            .database
            .renew_lease(&entry.document_uri, &entry.content_fingerprint)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Entry is no longer claimed under this fingerprint"),
            Err(e) => warn!("Failed to renew lease: {:#}", e),
        }

        match self.ingest(&entry).await {
            Ok(vector_count) => {
                match self
                    .database
                    .record_outcome(
                        &entry.document_uri,
                        &entry.content_fingerprint,
                        CacheStatus::Processed,
                        None,
                    )
                    .await
                {
                    Ok(_) => ResultRecord::success(entry.document_uri, vector_count),
                    Err(e) => {
                        error!("Failed to record success: {:#}", e);
                        ResultRecord::error(
                            entry.document_uri,
                            format!("Vectors written but cache update failed: {e:#}"),
                        )
                    }
                }
            }
            Err(e) => {
                let detail = e.to_string();
                warn!("Failed to ingest document: {}", detail);
                self.fail(entry, detail).await
            }
        }
    }

    /// Mark `entry` failed and build its error record
    async fn fail(&self, entry: ManifestEntry, detail: String) -> ResultRecord {
        if let Err(db_error) = self
            .database
            .record_outcome(
                &entry.document_uri,
                &entry.content_fingerprint,
                CacheStatus::Failed,
                Some(&detail),
            )
            .await
        {
            error!(
                "Failed to record failure of {}: {:#}",
                entry.document_uri, db_error
            );
        }
        ResultRecord::error(entry.document_uri, detail)
    }

    /// Fetch, extract, chunk, embed and store one document. Returns the
    /// number of vectors written.
    async fn ingest(&self, entry: &ManifestEntry) -> Result<usize> {
        let uri = entry.document_uri.as_str();

        let kind = DocumentKind::from_content_type(&entry.content_type).ok_or_else(|| {
            IngestError::Extraction(format!("Unsupported content type {}", entry.content_type))
        })?;
        let content = self.uploads.read(uri).await?;

        let concat_csv_rows = self.chunking.concat_csv_rows;
        let mut document =
            tokio::task::spawn_blocking(move || extract(&content, kind, concat_csv_rows))
                .await
                .map_err(|e| IngestError::Extraction(format!("Text extraction aborted: {e}")))??;
        if let Some(sidecar) = self.uploads.read_optional(&sidecar_location(uri)).await? {
            document.merge_sidecar(&sidecar);
        }

        let mut texts = Vec::new();
        for section in &document.sections {
            let chunks = chunk_text(section, &self.chunking)
                .map_err(|e| IngestError::Extraction(format!("{e:#}")))?;
            texts.extend(chunks.into_iter().map(|chunk| chunk.content));
        }

        if texts.is_empty() {
            debug!("Document has no text, clearing its vectors");
            self.vector_store.replace_document_vectors(uri, &[]).await?;
            return Ok(0);
        }

        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IngestError::Embedding(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IngestError::Embedding(format!(
                "Embedding has {} dimensions, expected {}",
                bad.len(),
                self.dimension
            )));
        }

        let metadata_text = document.metadata_text();
        let created_at = Utc::now().to_rfc3339();
        let records: Vec<EmbeddingRecord> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (content, vector))| {
                let chunk_index = u32::try_from(index).unwrap_or(u32::MAX);
                EmbeddingRecord {
                    id: EmbeddingRecord::vector_id(uri, chunk_index),
                    vector,
                    metadata: ChunkMetadata {
                        document_uri: uri.to_string(),
                        content_fingerprint: entry.content_fingerprint.clone(),
                        chunk_index,
                        content,
                        source_url: document.source_url.clone(),
                        document_metadata: metadata_text.clone(),
                        created_at: created_at.clone(),
                    },
                }
            })
            .collect();

        let written = self
            .vector_store
            .replace_document_vectors(uri, &records)
            .await?;
        debug!("Stored {} vectors", written);
        Ok(written)
    }

    /// Hand unstarted entries back to `pending`, returns how many were released
    async fn release(&self, entries: &[ManifestEntry]) -> usize {
        let mut released = 0;
        for entry in entries {
            match self
                .database
                .release(&entry.document_uri, &entry.content_fingerprint)
                .await
                .map_err(database_error)
            {
                Ok(true) => released += 1,
                Ok(false) => debug!("{} was no longer claimed", entry.document_uri),
                Err(e) => error!("Failed to release {}: {}", entry.document_uri, e),
            }
        }
        released
    }
}
