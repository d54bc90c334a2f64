use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{
    CacheEntry, CachePage, CacheStatistics, CacheStatus, NewCacheEntry, UpsertOutcome,
};
use crate::database::sqlite::queries::CacheEntryQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Number of cache entries fetched per page when streaming a status listing
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// SQLite-backed cache store, one row per uploaded document
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("cache.db");

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(&db_path).await
    }

    #[inline]
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin cache transaction")
    }

    // Cache entry operations
    #[inline]
    pub async fn get(&self, document_uri: &str) -> Result<Option<CacheEntry>> {
        CacheEntryQueries::get(&self.pool, document_uri).await
    }

    #[inline]
    pub async fn record_observed(&self, observed: &NewCacheEntry) -> Result<UpsertOutcome> {
        CacheEntryQueries::record_observed(&self.pool, observed).await
    }

    #[inline]
    pub async fn upsert(
        &self,
        document_uri: &str,
        content_fingerprint: &str,
        status: CacheStatus,
    ) -> Result<()> {
        CacheEntryQueries::upsert(&self.pool, document_uri, content_fingerprint, status).await
    }

    /// Record the end state of a processed entry. Returns false when the
    /// document was re-uploaded in the meantime and the write was skipped.
    #[inline]
    pub async fn record_outcome(
        &self,
        document_uri: &str,
        content_fingerprint: &str,
        status: CacheStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let applied = CacheEntryQueries::record_outcome(
            &self.pool,
            document_uri,
            content_fingerprint,
            status,
            error_message,
        )
        .await?;

        if !applied {
            warn!(
                "Skipped {} outcome for {}: fingerprint {} is no longer current",
                status, document_uri, content_fingerprint
            );
        }
        Ok(applied)
    }

    #[inline]
    pub async fn list_by_status_page(
        &self,
        status: CacheStatus,
        after: Option<&str>,
        limit: u32,
    ) -> Result<CachePage> {
        CacheEntryQueries::list_by_status_page(&self.pool, status, after, limit).await
    }

    /// Lazily walk every entry with `status`, one page at a time
    #[inline]
    pub fn list_by_status(
        &self,
        status: CacheStatus,
        page_size: u32,
    ) -> BoxStream<'_, Result<CacheEntry>> {
        stream::try_unfold(Some(None::<String>), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok(None);
            };
            let page = self
                .list_by_status_page(status, after.as_deref(), page_size)
                .await?;
            let next = page.next_token.map(Some);
            Ok::<_, anyhow::Error>(Some((page.entries, next)))
        })
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, anyhow::Error>)))
        .try_flatten()
        .boxed()
    }

    #[inline]
    pub async fn release(&self, document_uri: &str, content_fingerprint: &str) -> Result<bool> {
        CacheEntryQueries::release(&self.pool, document_uri, content_fingerprint).await
    }

    #[inline]
    pub async fn renew_lease(&self, document_uri: &str, content_fingerprint: &str) -> Result<bool> {
        CacheEntryQueries::renew_lease(&self.pool, document_uri, content_fingerprint).await
    }

    /// Hand `processing` entries claimed before `lease_cutoff` back to `pending`
    #[inline]
    pub async fn reclaim_expired(&self, lease_cutoff: NaiveDateTime) -> Result<u64> {
        let reclaimed = CacheEntryQueries::reclaim_expired(&self.pool, lease_cutoff).await?;
        if reclaimed > 0 {
            info!(
                "Reclaimed {} entries stuck in processing since before {}",
                reclaimed, lease_cutoff
            );
        }
        Ok(reclaimed)
    }

    #[inline]
    pub async fn reclaim_older_than(&self, lease: std::time::Duration) -> Result<u64> {
        let lease = chrono::Duration::from_std(lease).context("Lease timeout out of range")?;
        self.reclaim_expired(Utc::now().naive_utc() - lease).await
    }

    #[inline]
    pub async fn requeue(&self, from: CacheStatus) -> Result<u64> {
        CacheEntryQueries::requeue(&self.pool, from).await
    }

    #[inline]
    pub async fn delete(&self, document_uri: &str) -> Result<bool> {
        CacheEntryQueries::delete(&self.pool, document_uri).await
    }

    #[inline]
    pub async fn get_statistics(&self) -> Result<CacheStatistics> {
        CacheEntryQueries::get_statistics(&self.pool).await
    }
}
