use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::debug;

use crate::db::Dialect;
use crate::store::snapshot::LineSnapshot;

/// Max keys per `IN (...)` read.
const READ_CHUNK: usize = 500;

/// Shared durable key/value service behind the opening line store.
///
/// Reads return raw payloads so the store can decode them strictly.
/// Writes must be idempotent: an existing key is left untouched.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Native multi-key read. `Ok(None)` means the backend has no such
    /// request and callers fall back to per-key reads.
    async fn batch_get(&self, keys: &[String]) -> anyhow::Result<Option<HashMap<String, String>>> {
        let _ = keys;
        Ok(None)
    }

    /// Returns true if this call stored the value.
    async fn set_if_absent(&self, key: &str, snap: &LineSnapshot) -> anyhow::Result<bool>;

    /// Returns the number of keys this call stored.
    async fn set_if_absent_many(&self, entries: &[(String, LineSnapshot)]) -> anyhow::Result<u64> {
        let mut stored = 0;
        for (key, snap) in entries {
            if self.set_if_absent(key, snap).await? {
                stored += 1;
            }
        }
        Ok(stored)
    }
}

/// SQLx-backed remote layer. Set-if-absent is a single
/// `INSERT ... ON CONFLICT DO NOTHING`, so first writer wins atomically.
pub struct SqlxRemoteStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlxRemoteStore {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO opening_lines (line_key, payload, captured_at) VALUES ({}, {}, {}) \
             ON CONFLICT (line_key) DO NOTHING",
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
        )
    }
}

#[async_trait]
impl RemoteStore for SqlxRemoteStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let sql = format!(
            "SELECT payload FROM opening_lines WHERE line_key = {}",
            self.dialect.placeholder(1)
        );

        let row = sqlx::query(&sql)
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("remote get failed")?;

        match row {
            Some(r) => Ok(Some(r.try_get::<String, _>("payload")?)),
            None => Ok(None),
        }
    }

    async fn batch_get(&self, keys: &[String]) -> anyhow::Result<Option<HashMap<String, String>>> {
        let mut out = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(READ_CHUNK) {
            let placeholders = (1..=chunk.len())
                .map(|n| self.dialect.placeholder(n))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT line_key, payload FROM opening_lines WHERE line_key IN ({placeholders})"
            );

            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key.clone());
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .context("remote batch get failed")?;

            for r in rows {
                out.insert(
                    r.try_get::<String, _>("line_key")?,
                    r.try_get::<String, _>("payload")?,
                );
            }
        }

        debug!(requested = keys.len(), found = out.len(), "remote batch get");
        Ok(Some(out))
    }

    async fn set_if_absent(&self, key: &str, snap: &LineSnapshot) -> anyhow::Result<bool> {
        let result = sqlx::query(&self.insert_sql())
            .bind(key.to_string())
            .bind(snap.encode()?)
            .bind(snap.captured_at)
            .execute(&self.pool)
            .await
            .context("remote set_if_absent failed")?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_if_absent_many(&self, entries: &[(String, LineSnapshot)]) -> anyhow::Result<u64> {
        let sql = self.insert_sql();
        let mut tx = self.pool.begin().await.context("remote begin failed")?;
        let mut stored = 0;

        for (key, snap) in entries {
            let result = sqlx::query(&sql)
                .bind(key.clone())
                .bind(snap.encode()?)
                .bind(snap.captured_at)
                .execute(&mut *tx)
                .await
                .context("remote batch insert failed")?;
            stored += result.rows_affected();
        }

        tx.commit().await.context("remote commit failed")?;
        Ok(stored)
    }
}
