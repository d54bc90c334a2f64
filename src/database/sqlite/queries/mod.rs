
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

const SELECT_COLUMNS: &str = r#"
    SELECT document_uri,
           content_fingerprint,
           content_type,
           size,
           status,
           error_message,
           last_updated_at,
           ingested_at
    FROM cache_entries
"#;

pub struct CacheEntryQueries;

impl CacheEntryQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool, document_uri: &str) -> Result<Option<CacheEntry>> {
        let query = format!("{SELECT_COLUMNS} WHERE document_uri = ?");
        let result = sqlx::query_as::<_, CacheEntry>(&query)
            .bind(document_uri)
            .fetch_optional(pool)
            .await
            .context("Failed to get cache entry")?;

        Ok(result)
    }

    /// Record an observed object. The entry is (re)set to `pending` when it is
    /// new, its fingerprint changed, or it previously failed; an unchanged
    /// fingerprint on a pending/processing/processed entry leaves it untouched.
    #[inline]
    pub async fn record_observed(
        pool: &SqlitePool,
        observed: &NewCacheEntry,
    ) -> Result<UpsertOutcome> {
        let existed = Self::get(pool, &observed.document_uri).await?.is_some();
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO cache_entries
                (document_uri, content_fingerprint, content_type, size, status, error_message, last_updated_at)
            VALUES (?, ?, ?, ?, 'pending', NULL, ?)
            ON CONFLICT(document_uri) DO UPDATE SET
                content_fingerprint = excluded.content_fingerprint,
                content_type = excluded.content_type,
                size = excluded.size,
                status = 'pending',
                error_message = NULL,
                last_updated_at = excluded.last_updated_at
            WHERE cache_entries.content_fingerprint != excluded.content_fingerprint
               OR cache_entries.status = 'failed'
            "#,
        )
        .bind(&observed.document_uri)
        .bind(&observed.content_fingerprint)
        .bind(&observed.content_type)
        .bind(observed.size)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to record observed object")?;

        let outcome = match (result.rows_affected(), existed) {
            (0, _) => UpsertOutcome::Unchanged,
            (_, true) => UpsertOutcome::Updated,
            (_, false) => UpsertOutcome::Created,
        };

        debug!(
            "Recorded {} with fingerprint {}: {:?}",
            observed.document_uri, observed.content_fingerprint, outcome
        );
        Ok(outcome)
    }

    /// Unconditional last-writer-wins write of `(fingerprint, status)`
    #[inline]
    pub async fn upsert(
        pool: &SqlitePool,
        document_uri: &str,
        content_fingerprint: &str,
        status: CacheStatus,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (document_uri, content_fingerprint, content_type, size, status, last_updated_at)
            VALUES (?, ?, 'text/plain', 0, ?, ?)
            ON CONFLICT(document_uri) DO UPDATE SET
                content_fingerprint = excluded.content_fingerprint,
                status = excluded.status,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(document_uri)
        .bind(content_fingerprint)
        .bind(status)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert cache entry")?;

        Ok(())
    }

    /// Write the outcome of processing one claimed entry. The write only
    /// applies while the stored fingerprint still matches the processed one,
    /// so a change observed mid-run keeps the entry `pending`.
    #[inline]
    pub async fn record_outcome(
        pool: &SqlitePool,
        document_uri: &str,
        content_fingerprint: &str,
        status: CacheStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let ingested_at = (status == CacheStatus::Processed).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET status = ?,
                error_message = ?,
                last_updated_at = ?,
                ingested_at = COALESCE(?, ingested_at)
            WHERE document_uri = ? AND content_fingerprint = ?
            "#,
        )
        .bind(status)
        .bind(error_message)
        .bind(now)
        .bind(ingested_at)
        .bind(document_uri)
        .bind(content_fingerprint)
        .execute(pool)
        .await
        .context("Failed to record processing outcome")?;

        Ok(result.rows_affected() > 0)
    }

    /// One page of entries with `status`, ordered by document URI, starting
    /// strictly after `after`.
    #[inline]
    pub async fn list_by_status_page(
        pool: &SqlitePool,
        status: CacheStatus,
        after: Option<&str>,
        limit: u32,
    ) -> Result<CachePage> {
        let query = format!(
            "{SELECT_COLUMNS} WHERE status = ? AND document_uri > ? ORDER BY document_uri ASC LIMIT ?"
        );
        let entries = sqlx::query_as::<_, CacheEntry>(&query)
            .bind(status)
            .bind(after.unwrap_or(""))
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await
            .context("Failed to list cache entries by status")?;

        let next_token = if entries.len() as u64 == u64::from(limit) {
            entries.last().map(|entry| entry.document_uri.clone())
        } else {
            None
        };

        Ok(CachePage {
            entries,
            next_token,
        })
    }

    /// Claim a pending entry for a run. Fails (returns false) when the entry
    /// is no longer pending or its fingerprint moved on since it was listed.
    #[inline]
    pub async fn claim(
        conn: &mut SqliteConnection,
        document_uri: &str,
        content_fingerprint: &str,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET status = 'processing', last_updated_at = ?
            WHERE document_uri = ? AND content_fingerprint = ? AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(document_uri)
        .bind(content_fingerprint)
        .execute(conn)
        .await
        .context("Failed to claim cache entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// Hand a claimed entry back to `pending` without processing it
    #[inline]
    pub async fn release(
        pool: &SqlitePool,
        document_uri: &str,
        content_fingerprint: &str,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET status = 'pending', last_updated_at = ?
            WHERE document_uri = ? AND content_fingerprint = ? AND status = 'processing'
            "#,
        )
        .bind(now)
        .bind(document_uri)
        .bind(content_fingerprint)
        .execute(pool)
        .await
        .context("Failed to release cache entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// Restart the lease of a claimed entry. Returns false when the entry is
    /// no longer `processing` under `content_fingerprint`.
    #[inline]
    pub async fn renew_lease(
        pool: &SqlitePool,
        document_uri: &str,
        content_fingerprint: &str,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET last_updated_at = ?
            WHERE document_uri = ? AND content_fingerprint = ? AND status = 'processing'
            "#,
        )
        .bind(now)
        .bind(document_uri)
        .bind(content_fingerprint)
        .execute(pool)
        .await
        .context("Failed to renew cache entry lease")?;

        Ok(result.rows_affected() > 0)
    }

    /// Revert `processing` entries whose claim is older than `cutoff`
    #[inline]
    pub async fn reclaim_expired(pool: &SqlitePool, cutoff: NaiveDateTime) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET status = 'pending', last_updated_at = ?
            WHERE status = 'processing' AND last_updated_at < ?
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to reclaim expired leases")?;

        Ok(result.rows_affected())
    }

    /// Move every entry in `from` back to `pending`
    #[inline]
    pub async fn requeue(pool: &SqlitePool, from: CacheStatus) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE cache_entries SET status = 'pending', error_message = NULL, last_updated_at = ? WHERE status = ?",
        )
        .bind(now)
        .bind(from)
        .execute(pool)
        .await
        .context("Failed to requeue cache entries")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, document_uri: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE document_uri = ?")
            .bind(document_uri)
            .execute(pool)
            .await
            .context("Failed to delete cache entry")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn get_statistics(pool: &SqlitePool) -> Result<CacheStatistics> {
        let (total, pending, processing, processed, failed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
                FROM cache_entries
                "#,
            )
            .fetch_one(pool)
            .await
            .context("Failed to get cache statistics")?;

        Ok(CacheStatistics {
            total,
            pending,
            processing,
            processed,
            failed,
        })
    }
}
