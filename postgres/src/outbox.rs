//! The transactional outbox table.
//!
//! Outbox rows are inserted in the same transaction as the aggregate
//! write they accompany (see [`crate::orders::PgOrderStore`]); this
//! module only covers the drain side. Rows are immutable except for the
//! single `pending -> published` transition, which is idempotent: the
//! `UPDATE` is guarded on `status = 'pending'`, so a relay retrying
//! after a crash marks each row at most once.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The database query failed.
    #[error("Outbox database error: {0}")]
    Database(String),

    /// A stored payload or status could not be decoded.
    #[error("Outbox serialization error: {0}")]
    Serialization(String),
}

/// Publication status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Waiting for the relay.
    Pending,
    /// Delivered to the event log.
    Published,
}

impl OutboxStatus {
    /// Converts the status to its database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
        }
    }

    /// Parses a status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Serialization`] for an unknown string.
    pub fn parse(s: &str) -> Result<Self, OutboxError> {
        match s {
            "pending" => Ok(Self::Pending),
            "published" => Ok(Self::Published),
            _ => Err(OutboxError::Serialization(format!(
                "Invalid outbox status: {s}"
            ))),
        }
    }
}

/// One row of the outbox table.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// Row id (publication cursor; ascending insert order).
    pub id: i64,
    /// Kind of aggregate that produced the event (e.g. "order").
    pub aggregate_type: String,
    /// Id of the producing aggregate.
    pub aggregate_id: String,
    /// Wire name of the event.
    pub event_type: String,
    /// JSON-encoded domain event.
    pub payload: serde_json::Value,
    /// When the event occurred inside the aggregate.
    pub occurred_at: DateTime<Utc>,
    /// Publication status.
    pub status: OutboxStatus,
    /// When the relay marked the row published.
    pub published_at: Option<DateTime<Utc>>,
}

/// Drain-side contract of the outbox table.
///
/// Behind a trait so the relay can be exercised against an in-memory
/// outbox in tests.
pub trait OutboxStore: Send + Sync {
    /// Fetches up to `limit` pending rows, oldest first.
    fn fetch_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEntry>, OutboxError>> + Send + '_>>;

    /// Marks the given rows published. Rows already published are left
    /// untouched, so retrying after a partial failure is safe.
    fn mark_as_published(
        &self,
        ids: &[i64],
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>>;
}

/// `PostgreSQL`-backed outbox store.
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Creates an outbox store on the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, OutboxError> {
        let status: String = row
            .try_get("status")
            .map_err(|e| OutboxError::Database(e.to_string()))?;
        Ok(OutboxEntry {
            id: row
                .try_get("id")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
            aggregate_type: row
                .try_get("aggregate_type")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
            aggregate_id: row
                .try_get("aggregate_id")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
            event_type: row
                .try_get("event_type")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
            payload: row
                .try_get("payload")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
            occurred_at: row
                .try_get("occurred_at")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
            status: OutboxStatus::parse(&status)?,
            published_at: row
                .try_get("published_at")
                .map_err(|e| OutboxError::Database(e.to_string()))?,
        })
    }
}

impl OutboxStore for PgOutboxStore {
    fn fetch_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEntry>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
            let rows = sqlx::query(
                r"
                SELECT id, aggregate_type, aggregate_id, event_type, payload,
                       occurred_at, status, published_at
                FROM outbox
                WHERE status = 'pending'
                ORDER BY id ASC
                LIMIT $1
                ",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn mark_as_published(
        &self,
        ids: &[i64],
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        let ids = ids.to_vec();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let result = sqlx::query(
                r"
                UPDATE outbox
                SET status = 'published', published_at = NOW()
                WHERE id = ANY($1) AND status = 'pending'
                ",
            )
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

            tracing::debug!(
                requested = ids.len(),
                marked = result.rows_affected(),
                "Outbox rows marked published"
            );
            metrics::counter!("outbox.marked_published").increment(result.rows_affected());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        assert_eq!(
            OutboxStatus::parse(OutboxStatus::Pending.as_str()).ok(),
            Some(OutboxStatus::Pending)
        );
        assert_eq!(
            OutboxStatus::parse(OutboxStatus::Published.as_str()).ok(),
            Some(OutboxStatus::Published)
        );
        assert!(OutboxStatus::parse("bogus").is_err());
    }
}
