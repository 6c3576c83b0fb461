//! SHA-256 content-addressable dedup store fronting all scraper output.
//!
//! Grounded on the teacher's `ArchiveStore` (`rootsignal-archive/src/store.rs`):
//! a thin Postgres wrapper using runtime-checked `sqlx::query_as` (no
//! `DATABASE_URL` needed to build) rather than the `query!` macro family.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use pantry_domain::ContentEntry;

#[derive(Error, Debug)]
pub enum ContentStoreError {
    #[error("content store database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ContentStoreError>;

#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub hash: String,
    pub is_new: bool,
    pub existing_job_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ContentStore {
    pool: PgPool,
}

impl ContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_entries (
                hash TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL,
                first_scraper_id TEXT NOT NULL,
                job_id UUID,
                payload_ref TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Compute the SHA-256 of the canonicalized payload and insert iff the
    /// hash is unseen, as a single conditional write (`ON CONFLICT DO
    /// NOTHING`, the Postgres equivalent of a `SETNX`). The check-and-insert
    /// is therefore atomic: two concurrent `store` calls with identical
    /// bytes can never both observe `is_new = true`.
    pub async fn store(&self, payload: &[u8], scraper_id: &str, payload_ref: &str) -> Result<StoreOutcome> {
        let hash = hex::encode(Sha256::digest(payload));

        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO content_entries (hash, created_at, first_scraper_id, payload_ref)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (hash) DO NOTHING
            RETURNING hash
            "#,
        )
        .bind(&hash)
        .bind(Utc::now())
        .bind(scraper_id)
        .bind(payload_ref)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            tracing::info!(%hash, scraper_id, "content store: new entry");
            return Ok(StoreOutcome { hash, is_new: true, existing_job_id: None });
        }

        let existing_job_id = self.lookup_job(&hash).await?;
        tracing::debug!(%hash, scraper_id, "content store: dedup hit");
        Ok(StoreOutcome { hash, is_new: false, existing_job_id })
    }

    pub async fn lookup_job(&self, hash: &str) -> Result<Option<Uuid>> {
        let row: Option<(Option<Uuid>,)> =
            sqlx::query_as("SELECT job_id FROM content_entries WHERE hash = $1")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(job_id,)| job_id))
    }

    pub async fn get(&self, hash: &str) -> Result<Option<ContentEntry>> {
        let entry = sqlx::query_as::<_, ContentEntry>(
            "SELECT hash, created_at, first_scraper_id, job_id, payload_ref FROM content_entries WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Record that `hash` produced `job_id`. Idempotent: re-attaching the
    /// same pair is a no-op. A failure here is logged, not propagated — at
    /// worst the next submission pays a redundant LLM call, which is far
    /// cheaper than failing the scraper's submission outright.
    pub async fn attach_job(&self, hash: &str, job_id: Uuid) {
        let result = sqlx::query("UPDATE content_entries SET job_id = $1 WHERE hash = $2 AND job_id IS NULL")
            .bind(job_id)
            .bind(hash)
            .execute(&self.pool)
            .await;

        if let Err(err) = result {
            tracing::warn!(%hash, %job_id, error = %err, "content store: attach_job failed, tolerating");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encode_matches_known_sha256() {
        let digest = Sha256::digest(b"hello world");
        let hex = hex::encode(digest);
        assert_eq!(hex, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde");
    }
}
