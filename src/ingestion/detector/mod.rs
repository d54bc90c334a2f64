
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument};

use crate::Result;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewCacheEntry, UpsertOutcome};
use crate::ingestion::database_error;
use crate::ingestion::extract::{DocumentKind, is_sidecar};
use crate::storage::{ObjectInfo, ObjectStorage};

/// Notification that one or more objects were created or overwritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub records: Vec<UploadRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Object key in the uploads store
    pub key: String,
}

impl UploadEvent {
    #[inline]
    pub fn for_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: keys
                .into_iter()
                .map(|key| UploadRecord { key: key.into() })
                .collect(),
        }
    }
}

/// What happened to each notified object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Unsupported content type, sidecar, or object no longer present
    pub skipped: usize,
}

impl DetectionSummary {
    fn record(&mut self, outcome: Option<UpsertOutcome>) {
        match outcome {
            Some(UpsertOutcome::Created) => self.created += 1,
            Some(UpsertOutcome::Updated) => self.updated += 1,
            Some(UpsertOutcome::Unchanged) => self.unchanged += 1,
            None => self.skipped += 1,
        }
    }

    /// Number of entries that became `pending`
    #[inline]
    pub fn marked_pending(&self) -> usize {
        self.created + self.updated
    }
}

/// Content type tracked for `key`, `None` if the object is not ingested
#[inline]
pub fn tracked_content_type(key: &str) -> Option<String> {
    if is_sidecar(key) {
        return None;
    }
    let content_type = from_path(key).first()?.essence_str().to_string();
    DocumentKind::from_content_type(&content_type).map(|_| content_type)
}

/// Marks cache entries `pending` when their object is new or changed
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    database: Database,
    uploads: ObjectStorage,
}

impl ChangeDetector {
    #[inline]
    pub fn new(database: Database, uploads: ObjectStorage) -> Self {
        Self { database, uploads }
    }

    /// Handle one upload notification.
    ///
    /// Any store failure is returned so the notification is not acknowledged
    /// and gets delivered again; already handled records are no-ops then.
    #[inline]
    pub async fn handle_event(&self, event: &UploadEvent) -> Result<DetectionSummary> {
        debug!("Processing {} upload records", event.records.len());

        let mut summary = DetectionSummary::default();
        for record in &event.records {
            let outcome = self.observe(&record.key).await.inspect_err(|e| {
                error!("Error processing upload of {}: {}", record.key, e);
            })?;
            summary.record(outcome);
        }

        info!(
            "Upload event handled: {} created, {} updated, {} unchanged, {} skipped",
            summary.created, summary.updated, summary.unchanged, summary.skipped
        );
        Ok(summary)
    }

    /// Notify for every object currently in the uploads store
    #[inline]
    pub async fn scan(&self) -> Result<DetectionSummary> {
        let objects = self.uploads.list(None).await?;
        let event = UploadEvent::for_keys(objects.into_iter().map(|object| object.location));
        self.handle_event(&event).await
    }

    /// Record the current state of one object. `None` when it is skipped.
    #[instrument(skip(self))]
    #[inline]
    pub async fn observe(&self, key: &str) -> Result<Option<UpsertOutcome>> {
        let Some(content_type) = tracked_content_type(key) else {
            debug!("Content type of {} is not supported, skipping", key);
            return Ok(None);
        };

        let Some(info) = self.uploads.head(key).await? else {
            debug!("Object {} no longer exists, skipping", key);
            return Ok(None);
        };

        let content_fingerprint = self.fingerprint(&info).await?;
        let observed = NewCacheEntry {
            document_uri: key.to_string(),
            content_fingerprint,
            content_type,
            size: i64::try_from(info.size).unwrap_or(i64::MAX),
        };

        let outcome = self
            .database
            .record_observed(&observed)
            .await
            .map_err(database_error)?;

        if outcome == UpsertOutcome::Unchanged {
            debug!("File {} has not changed, skipping update", key);
        }
        Ok(Some(outcome))
    }

    /// ETag, else version id, else SHA-256 of the content
    async fn fingerprint(&self, info: &ObjectInfo) -> Result<String> {
        if let Some(e_tag) = info.e_tag.as_deref() {
            return Ok(e_tag.trim_matches('"').to_string());
        }
        if let Some(version) = &info.version {
            return Ok(version.clone());
        }

        let content = self.uploads.read(&info.location).await?;
        Ok(content_digest(&content))
    }
}

/// Fingerprint derived from the content itself
#[inline]
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{:x}", hasher.finalize())
}
