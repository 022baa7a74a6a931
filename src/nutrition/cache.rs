use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{types::Json, PgPool};
use thiserror::Error;
use time::OffsetDateTime;

use super::facts::CachedFacts;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache call timed out")]
    Timeout,
}

/// Key-value store for per-100 g facts. Writes are whole-value upserts.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedFacts>, CacheError>;
    async fn set(&self, key: &str, value: &CachedFacts, ttl: Duration) -> Result<(), CacheError>;

    /// Drops entries whose TTL has passed; returns how many went.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

pub fn cache_key(normalized_name: &str) -> String {
    format!("nutrition:{}", normalized_name)
}

/// Process-local cache with lazy expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (CachedFacts, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedFacts>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|e| e.value().1 > now)
            .map(|e| e.value().0.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &CachedFacts, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Cache shared by every instance through the `nutrition_cache` table.
#[derive(Clone)]
pub struct PgCache {
    db: PgPool,
}

impl PgCache {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheStore for PgCache {
    async fn get(&self, key: &str) -> Result<Option<CachedFacts>, CacheError> {
        let row: Option<(Json<CachedFacts>,)> = sqlx::query_as(
            r#"
            SELECT payload
            FROM nutrition_cache
            WHERE key = $1 AND expires_at > now()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(row.map(|(Json(v),)| v))
    }

    async fn set(&self, key: &str, value: &CachedFacts, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = OffsetDateTime::now_utc() + ttl;
        sqlx::query(
            r#"
            INSERT INTO nutrition_cache (key, payload, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(Json(value))
        .bind(expires_at)
        .execute(&self.db)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let done = sqlx::query("DELETE FROM nutrition_cache WHERE expires_at <= now()")
            .execute(&self.db)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(done.rows_affected() as usize)
    }
}
