//! Durable failure queue.
//!
//! Priority-ordered store of work items that failed somewhere in the
//! pipeline, with attempt counters and retry-eligibility timestamps.
//! State machine: `Pending → Processing → {Completed | Pending (re-armed)
//! | Failed (terminal)}`; `Cancelled` is reachable administratively from
//! the non-terminal states. All mutation goes through this type.

use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::models::{ContentKind, Priority, QueueItem, QueueStatus};

/// Default re-arm delay when `fail_item` is called without one.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue item not found: {0}")]
    NotFound(String),
    #[error("invalid transition for '{id}': {status} -> {requested}")]
    InvalidTransition {
        id: String,
        status: QueueStatus,
        requested: QueueStatus,
    },
    #[error("queue storage error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Arguments for [`FailureQueue::add_item`].
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    /// Caller-supplied unique id; re-adding an existing id re-arms it.
    pub id: String,
    pub kind: Option<ContentKind>,
    pub data: Value,
    pub error: String,
    pub priority: Priority,
    /// `None` uses the queue's configured default.
    pub max_attempts: Option<i64>,
    pub context: Value,
}

impl NewQueueItem {
    pub fn new(id: impl Into<String>, error: impl Into<String>) -> Self {
        NewQueueItem {
            id: id.into(),
            kind: None,
            data: Value::Null,
            error: error.into(),
            priority: Priority::Normal,
            max_attempts: None,
            context: Value::Null,
        }
    }
}

#[derive(Clone)]
pub struct FailureQueue {
    pool: SqlitePool,
    default_max_attempts: i64,
    default_retry_delay: Duration,
}

impl FailureQueue {
    pub fn new(pool: SqlitePool) -> Self {
        FailureQueue {
            pool,
            default_max_attempts: 3,
            default_retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_config(pool: SqlitePool, config: &QueueConfig) -> Self {
        FailureQueue {
            pool,
            default_max_attempts: config.default_max_attempts.max(1),
            default_retry_delay: Duration::from_secs(config.retry_delay_secs.max(0) as u64),
        }
    }

    /// Insert a work item, or re-arm an existing one: if the id is already
    /// present the row is reset to `Pending` with `attempt_count = 0`.
    /// There is never more than one row per id.
    pub async fn add_item(&self, item: NewQueueItem) -> Result<(), QueueError> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO failure_queue
                (id, kind, data, error, attempt_count, max_attempts, priority, status,
                 created_at, updated_at, next_retry_at, context, metadata)
            VALUES (?, ?, ?, ?, 0, ?, ?, 'pending', ?, ?, NULL, ?, '{}')
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                data = excluded.data,
                error = excluded.error,
                attempt_count = 0,
                max_attempts = excluded.max_attempts,
                priority = excluded.priority,
                status = 'pending',
                updated_at = excluded.updated_at,
                next_retry_at = NULL,
                context = excluded.context
            "#,
        )
        .bind(&item.id)
        .bind(item.kind.map(|k| k.as_str().to_string()))
        .bind(item.data.to_string())
        .bind(&item.error)
        .bind(item.max_attempts.unwrap_or(self.default_max_attempts).max(1))
        .bind(item.priority.as_i64())
        .bind(now)
        .bind(now)
        .bind(item.context.to_string())
        .execute(&self.pool)
        .await?;

        debug!(id = %item.id, priority = item.priority.as_str(), "queued item");
        Ok(())
    }

    /// Claim the next eligible item: highest priority first, oldest first
    /// within a priority, skipping rows whose `next_retry_at` is still in
    /// the future. The status flip to `Processing` happens in the same
    /// statement, so concurrent pollers never take the same item.
    pub async fn get_next_item(&self) -> Result<Option<QueueItem>, QueueError> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            UPDATE failure_queue SET status = 'processing', updated_at = ?1
            WHERE id = (
                SELECT id FROM failure_queue
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            RETURNING id, kind, data, error, attempt_count, max_attempts, priority,
                      status, created_at, updated_at, next_retry_at, context, metadata
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_item(&r)))
    }

    /// `Processing → Completed`. The optional result is stored under
    /// `metadata.result` for later inspection.
    pub async fn complete_item(&self, id: &str, result: Option<Value>) -> Result<(), QueueError> {
        let current = self.require_item(id).await?;
        if current.status != QueueStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status: current.status,
                requested: QueueStatus::Completed,
            });
        }

        let mut metadata = current.metadata;
        if let Some(result) = result {
            if !metadata.is_object() {
                metadata = serde_json::json!({});
            }
            metadata["result"] = result;
        }

        sqlx::query(
            "UPDATE failure_queue SET status = 'completed', updated_at = ?, metadata = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(Utc::now().timestamp())
        .bind(metadata.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(id, "completed queue item");
        Ok(())
    }

    /// Record a failed attempt on a claimed (`Processing`) item. Below the
    /// attempt cap the item re-arms to `Pending` with
    /// `next_retry_at = now + delay`; at the cap it becomes terminally
    /// `Failed` with `next_retry_at` cleared.
    pub async fn fail_item(
        &self,
        id: &str,
        error: &str,
        delay: Option<Duration>,
    ) -> Result<QueueStatus, QueueError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT attempt_count, max_attempts, status FROM failure_queue WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let attempt_count: i64 = row.get("attempt_count");
        let max_attempts: i64 = row.get("max_attempts");
        let status = QueueStatus::parse(row.get::<String, _>("status").as_str());
        if status != QueueStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status,
                requested: QueueStatus::Failed,
            });
        }

        let new_count = (attempt_count + 1).min(max_attempts);
        let now = Utc::now().timestamp();

        let new_status = if new_count >= max_attempts {
            sqlx::query(
                "UPDATE failure_queue SET status = 'failed', attempt_count = ?, error = ?,
                 updated_at = ?, next_retry_at = NULL WHERE id = ?",
            )
            .bind(new_count)
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            warn!(id, attempts = new_count, "queue item terminally failed");
            QueueStatus::Failed
        } else {
            let delay_secs = delay.unwrap_or(self.default_retry_delay).as_secs() as i64;
            sqlx::query(
                "UPDATE failure_queue SET status = 'pending', attempt_count = ?, error = ?,
                 updated_at = ?, next_retry_at = ? WHERE id = ?",
            )
            .bind(new_count)
            .bind(error)
            .bind(now)
            .bind(now + delay_secs)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            debug!(id, attempts = new_count, delay_secs, "re-armed queue item");
            QueueStatus::Pending
        };

        tx.commit().await?;
        Ok(new_status)
    }

    /// Operator-triggered re-arm: reset any non-processing item to
    /// `Pending` with a fresh attempt budget. Used to retry a terminally
    /// failed item after the underlying fault is fixed.
    pub async fn rearm_item(&self, id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE failure_queue SET status = 'pending', attempt_count = 0,
             next_retry_at = NULL, updated_at = ?
             WHERE id = ? AND status != 'processing'",
        )
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.require_item(id).await?;
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status: current.status,
                requested: QueueStatus::Pending,
            });
        }
        info!(id, "re-armed queue item");
        Ok(())
    }

    /// Administrative cancellation. Only prevents future dequeuing;
    /// in-flight work is not preempted.
    pub async fn cancel_item(&self, id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE failure_queue SET status = 'cancelled', updated_at = ?
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.require_item(id).await?;
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status: current.status,
                requested: QueueStatus::Cancelled,
            });
        }
        info!(id, "cancelled queue item");
        Ok(())
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<QueueItem>, QueueError> {
        let row = sqlx::query(
            "SELECT id, kind, data, error, attempt_count, max_attempts, priority, status,
                    created_at, updated_at, next_retry_at, context, metadata
             FROM failure_queue WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_item(&r)))
    }

    /// Delete terminal (`Completed`/`Failed`) rows older than the cutoff.
    /// Never touches `Pending`, `Processing`, or `Cancelled` rows.
    pub async fn cleanup_old_items(&self, days: i64) -> Result<u64, QueueError> {
        let cutoff = Utc::now().timestamp() - days * 86_400;
        let result = sqlx::query(
            "DELETE FROM failure_queue
             WHERE status IN ('completed', 'failed') AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, days, "queue cleanup");
        }
        Ok(removed)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn require_item(&self, id: &str) -> Result<QueueItem, QueueError> {
        self.get_item(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> QueueItem {
    let kind: Option<String> = row.get("kind");
    QueueItem {
        id: row.get("id"),
        kind: kind.and_then(|k| ContentKind::from_str(&k).ok()),
        data: parse_json(row.get::<String, _>("data")),
        error: row.get("error"),
        attempt_count: row.get("attempt_count"),
        max_attempts: row.get("max_attempts"),
        priority: Priority::from_i64(row.get("priority")),
        status: QueueStatus::parse(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        next_retry_at: row.get("next_retry_at"),
        context: parse_json(row.get::<String, _>("context")),
        metadata: parse_json(row.get::<String, _>("metadata")),
    }
}

fn parse_json(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::Null)
}
