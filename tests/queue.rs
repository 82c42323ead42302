//! Failure-queue state machine tests against an in-memory database.

use intake::db;
use intake::migrate;
use intake::models::{Priority, QueueStatus};
use intake::queue::{FailureQueue, NewQueueItem, QueueError};
use std::time::Duration;

async fn setup() -> FailureQueue {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    FailureQueue::new(pool)
}

fn item(id: &str, priority: Priority, max_attempts: i64) -> NewQueueItem {
    NewQueueItem {
        priority,
        max_attempts: Some(max_attempts),
        data: serde_json::json!({"path": format!("/vault/{}.md", id)}),
        ..NewQueueItem::new(id, "write failed: disk full")
    }
}

/// Force a row's creation time, for deterministic age ordering.
async fn set_created_at(queue: &FailureQueue, id: &str, ts: i64) {
    sqlx::query("UPDATE failure_queue SET created_at = ? WHERE id = ?")
        .bind(ts)
        .bind(id)
        .execute(queue.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_priority_then_age_ordering() {
    let queue = setup().await;
    queue.add_item(item("low", Priority::Low, 3)).await.unwrap();
    queue.add_item(item("critical", Priority::Critical, 3)).await.unwrap();
    queue.add_item(item("normal-old", Priority::Normal, 3)).await.unwrap();
    queue.add_item(item("normal-new", Priority::Normal, 3)).await.unwrap();
    set_created_at(&queue, "normal-old", 1_000).await;
    set_created_at(&queue, "normal-new", 2_000).await;

    let order: Vec<String> = {
        let mut ids = Vec::new();
        while let Some(next) = queue.get_next_item().await.unwrap() {
            assert_eq!(next.status, QueueStatus::Processing);
            ids.push(next.id);
        }
        ids
    };
    assert_eq!(order, vec!["critical", "normal-old", "normal-new", "low"]);
}

#[tokio::test]
async fn test_claimed_item_not_returned_twice() {
    let queue = setup().await;
    queue.add_item(item("only", Priority::Normal, 3)).await.unwrap();

    let first = queue.get_next_item().await.unwrap();
    assert!(first.is_some());
    let second = queue.get_next_item().await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn test_attempt_cap_reaches_terminal_failed() {
    let queue = setup().await;
    queue.add_item(item("doomed", Priority::Normal, 3)).await.unwrap();

    for attempt in 1..=3i64 {
        let claimed = queue.get_next_item().await.unwrap().unwrap();
        assert_eq!(claimed.id, "doomed");
        let status = queue
            .fail_item("doomed", "still broken", Some(Duration::ZERO))
            .await
            .unwrap();
        let stored = queue.get_item("doomed").await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, attempt);
        if attempt < 3 {
            assert_eq!(status, QueueStatus::Pending);
        } else {
            assert_eq!(status, QueueStatus::Failed);
            assert!(stored.next_retry_at.is_none());
            assert_eq!(stored.error, "still broken");
        }
    }

    // Terminal: no 4th re-arm, no further dequeue, no further fail.
    assert!(queue.get_next_item().await.unwrap().is_none());
    assert!(matches!(
        queue.fail_item("doomed", "again", None).await,
        Err(QueueError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_fail_requires_processing() {
    let queue = setup().await;
    queue.add_item(item("idle", Priority::Normal, 3)).await.unwrap();

    // Failing an unclaimed item is an invalid transition.
    assert!(matches!(
        queue.fail_item("idle", "boom", None).await,
        Err(QueueError::InvalidTransition { .. })
    ));
    let stored = queue.get_item("idle").await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.attempt_count, 0);

    queue.get_next_item().await.unwrap().unwrap();
    assert!(queue.fail_item("idle", "boom", None).await.is_ok());
}

#[tokio::test]
async fn test_retry_delay_gates_eligibility() {
    let queue = setup().await;
    queue.add_item(item("later", Priority::Normal, 5)).await.unwrap();

    queue.get_next_item().await.unwrap().unwrap();
    queue
        .fail_item("later", "timeout", Some(Duration::from_secs(600)))
        .await
        .unwrap();

    // Not eligible while next_retry_at is in the future.
    assert!(queue.get_next_item().await.unwrap().is_none());

    // Rewind the eligibility timestamp: item becomes visible again.
    sqlx::query("UPDATE failure_queue SET next_retry_at = ? WHERE id = 'later'")
        .bind(chrono::Utc::now().timestamp() - 1)
        .execute(queue.pool())
        .await
        .unwrap();
    let claimed = queue.get_next_item().await.unwrap().unwrap();
    assert_eq!(claimed.id, "later");
    assert_eq!(claimed.attempt_count, 1);
}

#[tokio::test]
async fn test_add_existing_id_rearms() {
    let queue = setup().await;
    queue.add_item(item("dup", Priority::Normal, 2)).await.unwrap();

    queue.get_next_item().await.unwrap().unwrap();
    queue.fail_item("dup", "a", Some(Duration::ZERO)).await.unwrap();
    queue.get_next_item().await.unwrap().unwrap();
    let status = queue.fail_item("dup", "b", Some(Duration::ZERO)).await.unwrap();
    assert_eq!(status, QueueStatus::Failed);

    // Re-adding resets to pending with a fresh attempt budget, same row.
    queue.add_item(item("dup", Priority::High, 2)).await.unwrap();
    let stored = queue.get_item("dup").await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.attempt_count, 0);
    assert_eq!(stored.priority, Priority::High);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failure_queue")
        .fetch_one(queue.pool())
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_complete_stores_result() {
    let queue = setup().await;
    queue.add_item(item("done", Priority::Normal, 3)).await.unwrap();

    queue.get_next_item().await.unwrap().unwrap();
    queue
        .complete_item("done", Some(serde_json::json!({"written": "done.md"})))
        .await
        .unwrap();

    let stored = queue.get_item("done").await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.metadata["result"]["written"], "done.md");
}

#[tokio::test]
async fn test_complete_requires_processing() {
    let queue = setup().await;
    queue.add_item(item("idle", Priority::Normal, 3)).await.unwrap();

    assert!(matches!(
        queue.complete_item("idle", None).await,
        Err(QueueError::InvalidTransition { .. })
    ));
    assert!(matches!(
        queue.complete_item("ghost", None).await,
        Err(QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_prevents_dequeue() {
    let queue = setup().await;
    queue.add_item(item("nope", Priority::Critical, 3)).await.unwrap();
    queue.cancel_item("nope").await.unwrap();

    assert!(queue.get_next_item().await.unwrap().is_none());
    let stored = queue.get_item("nope").await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Cancelled);

    // Cancelled is not terminal-failed; a second cancel is invalid.
    assert!(matches!(
        queue.cancel_item("nope").await,
        Err(QueueError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_rearm_resets_failed_item() {
    let queue = setup().await;
    queue.add_item(item("revive", Priority::Normal, 1)).await.unwrap();
    queue.get_next_item().await.unwrap().unwrap();
    queue.fail_item("revive", "boom", None).await.unwrap();

    queue.rearm_item("revive").await.unwrap();
    let stored = queue.get_item("revive").await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.attempt_count, 0);
    assert!(stored.next_retry_at.is_none());
}

#[tokio::test]
async fn test_cleanup_only_removes_old_terminal_rows() {
    let queue = setup().await;
    for id in ["pending", "completed", "failed"] {
        queue.add_item(item(id, Priority::Normal, 1)).await.unwrap();
    }
    // Deterministic claim order, then drive two rows to terminal states.
    set_created_at(&queue, "completed", 0).await;
    set_created_at(&queue, "failed", 1_000).await;
    set_created_at(&queue, "pending", 2_000).await;

    queue.get_next_item().await.unwrap().unwrap();
    queue.complete_item("completed", None).await.unwrap();
    queue.get_next_item().await.unwrap().unwrap();
    queue.fail_item("failed", "x", None).await.unwrap();

    // Age every row past the cutoff.
    sqlx::query("UPDATE failure_queue SET updated_at = 0")
        .execute(queue.pool())
        .await
        .unwrap();

    let removed = queue.cleanup_old_items(30).await.unwrap();
    assert_eq!(removed, 2);
    assert!(queue.get_item("pending").await.unwrap().is_some());
    assert!(queue.get_item("completed").await.unwrap().is_none());
    assert!(queue.get_item("failed").await.unwrap().is_none());
}
