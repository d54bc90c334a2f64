
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::sqlite::Database;
use crate::embeddings::Embedder;
use crate::ingestion::database_error;
use crate::ingestion::manifest::{ManifestBuilder, load_manifest};
use crate::ingestion::preparer::VectorStorePreparer;
use crate::ingestion::processor::ParallelProcessor;
use crate::storage::ObjectStorage;
use crate::{IngestError, Result};

const MAX_RUN_ID_LEN: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Generated when not given
    pub run_id: Option<String>,
    /// Drop and recreate the vector table before processing
    pub purge_vector_store: bool,
}

/// Terminal state of a run that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Succeeded,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    ReclaimLeases,
    BuildManifest,
    PrepareStore,
    ProcessAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    /// Stages that ran, in order
    pub stages: Vec<RunStage>,
    pub reclaimed: u64,
    pub manifest_location: Option<String>,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub vectors: usize,
    pub released: usize,
    pub results_location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            state: RunState::Succeeded,
            stages: Vec::new(),
            reclaimed: 0,
            manifest_location: None,
            claimed: 0,
            succeeded: 0,
            failed: 0,
            vectors: 0,
            released: 0,
            results_location: None,
            warnings: Vec::new(),
        }
    }
}

impl std::fmt::Display for RunReport {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run {}: {:?}", self.run_id, self.state)?;
        writeln!(f, "  Reclaimed leases: {}", self.reclaimed)?;
        writeln!(f, "  Documents claimed: {}", self.claimed)?;
        if self.claimed > 0 {
            writeln!(f, "  Succeeded: {}", self.succeeded)?;
            writeln!(f, "  Failed: {}", self.failed)?;
            writeln!(f, "  Vectors written: {}", self.vectors)?;
            writeln!(f, "  Released: {}", self.released)?;
        }
        if let Some(location) = &self.manifest_location {
            writeln!(f, "  Manifest: {location}")?;
        }
        if let Some(location) = &self.results_location {
            writeln!(f, "  Results: {location}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  Warning: {warning}")?;
        }
        Ok(())
    }
}

/// Run ids become part of artifact locations
#[inline]
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id.len() <= MAX_RUN_ID_LEN
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(IngestError::Config(format!(
            "Invalid run id {run_id:?}: use up to {MAX_RUN_ID_LEN} letters, digits, '-' or '_'"
        )))
    }
}

/// Sequences the stages of one pipeline run
pub struct Orchestrator {
    database: Database,
    artifacts: ObjectStorage,
    lease_timeout: std::time::Duration,
    manifest_builder: ManifestBuilder,
    preparer: VectorStorePreparer,
    processor: ParallelProcessor,
}

impl Orchestrator {
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
            manifest_builder: ManifestBuilder::new(database.clone(), artifacts.clone()),
            preparer: VectorStorePreparer::from_config(Arc::clone(&vector_store), config),
            processor: ParallelProcessor::new(
                config,
                database.clone(),
                uploads,
                artifacts.clone(),
                vector_store,
                embedder,
            ),
            lease_timeout: config.ingestion.lease_timeout(),
            database,
            artifacts,
        }
    }

    /// One pipeline run.
    ///
    /// Only cache store or artifact store failures while reclaiming, building
    /// the manifest or opening the run's results, a reused run id, and vector
    /// store preparation failures end in `Err`. Individual documents that
    /// fail are reported in the result records.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    #[inline]
    pub async fn run(&self, options: RunOptions, cancel: &CancellationToken) -> Result<RunReport> {
        let run_id = match options.run_id {
            Some(run_id) => {
                validate_run_id(&run_id)?;
                run_id
            }
            None => Uuid::new_v4().to_string(),
        };
        tracing::Span::current().record("run_id", run_id.as_str());
        info!("Starting ingestion run {}", run_id);

        let mut report = RunReport::new(run_id);

        report.stages.push(RunStage::ReclaimLeases);
        report.reclaimed = self
            .database
            .reclaim_older_than(self.lease_timeout)
            .await
            .map_err(database_error)?;

        if cancel.is_cancelled() {
            warn!("Run {} cancelled before building its manifest", report.run_id);
            report.state = RunState::Cancelled;
            return Ok(report);
        }

        report.stages.push(RunStage::BuildManifest);
        let manifest = self
            .manifest_builder
            .build(&report.run_id)
            .await
            .inspect_err(|e| error!("Failed to build manifest: {}", e))?;
        report.manifest_location = Some(manifest.manifest_location.clone());
        report.claimed = manifest.pending_documents;

        if !manifest.is_valid {
            info!("Nothing to ingest, run {} succeeded", report.run_id);
            return Ok(report);
        }

        report.stages.push(RunStage::PrepareStore);
        if let Err(e) = self.preparer.prepare(options.purge_vector_store).await {
            self.release_manifest(&manifest.manifest_location).await;
            return Err(e);
        }

        report.stages.push(RunStage::ProcessAll);
        let summary = self
            .processor
            .process(&report.run_id, &manifest.manifest_location, cancel)
            .await?;

        report.succeeded = summary.succeeded;
        report.failed = summary.failed;
        report.vectors = summary.vectors;
        report.released = summary.released;
        report.results_location = summary.results_location;
        report.warnings = summary.warnings;
        if summary.cancelled {
            report.state = RunState::Cancelled;
        }

        info!(
            "Run {} finished as {:?}: {} succeeded, {} failed",
            report.run_id, report.state, report.succeeded, report.failed
        );
        Ok(report)
    }

    /// Undo the claims of a run that cannot proceed
    async fn release_manifest(&self, location: &str) {
        match load_manifest(&self.artifacts, location).await {
            Ok(entries) => {
                let released = self.processor.release(&entries).await;
                warn!("Released {} claimed documents", released);
            }
            Err(e) => error!(
                "Could not read manifest {} to release its claims: {}",
                location, e
            ),
        }
    }
}
