
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Last-known processing state of one uploaded document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CacheEntry {
    pub document_uri: String,
    pub content_fingerprint: String,
    pub content_type: String,
    pub size: i64,
    pub status: CacheStatus,
    pub error_message: Option<String>,
    pub last_updated_at: NaiveDateTime,
    pub ingested_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl CacheStatus {
    pub const ALL: [CacheStatus; 4] = [
        CacheStatus::Pending,
        CacheStatus::Processing,
        CacheStatus::Processed,
        CacheStatus::Failed,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Pending => "pending",
            CacheStatus::Processing => "processing",
            CacheStatus::Processed => "processed",
            CacheStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            CacheStatus::Pending => write!(f, "Pending"),
            CacheStatus::Processing => write!(f, "Processing"),
            CacheStatus::Processed => write!(f, "Processed"),
            CacheStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Observation of an uploaded object, as written by the change detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCacheEntry {
    pub document_uri: String,
    pub content_fingerprint: String,
    pub content_type: String,
    pub size: i64,
}

/// Outcome of recording an observed object in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No entry existed for the document
    Created,
    /// The fingerprint changed and the entry was reset to `pending`
    Updated,
    /// Same fingerprint as the stored entry, nothing was written
    Unchanged,
}

/// One page of a status listing plus the token to resume after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePage {
    pub entries: Vec<CacheEntry>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CacheStatistics {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub processed: i64,
    pub failed: i64,
}

impl CacheEntry {
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == CacheStatus::Pending
    }

    #[inline]
    pub fn is_processed(&self) -> bool {
        self.status == CacheStatus::Processed
    }

    /// Whether a `processing` claim on this entry is older than `cutoff`
    #[inline]
    pub fn lease_expired(&self, cutoff: NaiveDateTime) -> bool {
        self.status == CacheStatus::Processing && self.last_updated_at < cutoff
    }
}
