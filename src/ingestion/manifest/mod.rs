#[cfg(test)]
mod tests;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{IngestError, Result};
use crate::database::sqlite::models::{CacheEntry, CacheStatus};
use crate::database::sqlite::queries::CacheEntryQueries;
use crate::database::sqlite::{DEFAULT_PAGE_SIZE, Database};
use crate::ingestion::database_error;
use crate::storage::{ObjectStorage, manifest_location};

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// One document claimed for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub document_uri: String,
    pub content_fingerprint: String,
    /// Older manifests carry no content type; those documents are plain text
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl From<CacheEntry> for ManifestEntry {
    #[inline]
    fn from(entry: CacheEntry) -> Self {
        Self {
            document_uri: entry.document_uri,
            content_fingerprint: entry.content_fingerprint,
            content_type: entry.content_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestOutcome {
    /// Whether the manifest holds anything to process
    pub is_valid: bool,
    pub manifest_location: String,
    pub pending_documents: usize,
}

/// Claims every `pending` cache entry and writes the run manifest
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    database: Database,
    artifacts: ObjectStorage,
    page_size: u32,
}

impl ManifestBuilder {
    #[inline]
    pub fn new(database: Database, artifacts: ObjectStorage) -> Self {
        Self {
            database,
            artifacts,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[inline]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Build the manifest of `run_id`.
    ///
    /// The pending entries are read first; the claims and the manifest write
    /// then succeed or fail together. Entries that changed between the read
    /// and the claim are left for the next run.
    ///
    /// Manifests are written once per run id: a second build for the same
    /// run fails with `ArtifactExists` before anything is claimed.
    #[instrument(skip(self))]
    #[inline]
    pub async fn build(&self, run_id: &str) -> Result<ManifestOutcome> {
        let location = manifest_location(run_id);
        if self.artifacts.head(&location).await?.is_some() {
            return Err(IngestError::ArtifactExists(location));
        }

        let snapshot: Vec<CacheEntry> = self
            .database
            .list_by_status(CacheStatus::Pending, self.page_size)
            .try_collect()
            .await
            .map_err(database_error)?;
        debug!("Found {} pending entries", snapshot.len());

        let mut transaction = self.database.begin().await.map_err(database_error)?;

        let mut entries = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            let claimed = CacheEntryQueries::claim(
                &mut transaction,
                &entry.document_uri,
                &entry.content_fingerprint,
            )
            .await
            .map_err(database_error)?;

            if claimed {
                entries.push(ManifestEntry::from(entry));
            } else {
                debug!(
                    "Entry {} changed since it was listed, leaving it for the next run",
                    entry.document_uri
                );
            }
        }

        // Dropping the transaction on a failed write rolls the claims back
        self.artifacts.put_json_lines_new(&location, &entries).await?;
        transaction
            .commit()
            .await
            .map_err(|e| database_error(anyhow::Error::new(e).context("Failed to commit claims")))?;

        info!(
            "Manifest for run {} written to {} with {} documents",
            run_id,
            location,
            entries.len()
        );

        Ok(ManifestOutcome {
            is_valid: !entries.is_empty(),
            manifest_location: location,
            pending_documents: entries.len(),
        })
    }
}

/// Read back a manifest written by `ManifestBuilder::build`
#[inline]
pub async fn load_manifest(artifacts: &ObjectStorage, location: &str) -> Result<Vec<ManifestEntry>> {
    artifacts.read_json_lines(location).await
}
