//! Incremental ingestion pipeline: change detection, manifest building,
//! vector store preparation and bounded parallel processing

pub mod detector;
pub mod extract;
pub mod manifest;
pub mod orchestrator;
pub mod preparer;
pub mod processor;

pub use detector::{ChangeDetector, DetectionSummary, UploadEvent, UploadRecord};
pub use manifest::{ManifestBuilder, ManifestEntry, ManifestOutcome, load_manifest};
pub use orchestrator::{Orchestrator, RunOptions, RunReport, RunStage, RunState};
pub use preparer::VectorStorePreparer;
pub use processor::{BatchSummary, Outcome, ParallelProcessor, ResultRecord};

use crate::IngestError;

/// Cache store failures surface as `IngestError::Database` at stage boundaries
pub(crate) fn database_error(error: anyhow::Error) -> IngestError {
    IngestError::Database(format!("{error:#}"))
}
