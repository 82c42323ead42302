//! Queue statistics and health overview.
//!
//! Summarizes the failure queue for operators: totals per status and
//! priority, plus age bounds on the pending backlog. Used by
//! `intake queue stats` to show whether the drain loop is keeping up.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::models::Priority;

/// Aggregate view of the failure queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: i64,
    pub status_counts: BTreeMap<String, i64>,
    pub priority_counts: BTreeMap<String, i64>,
    /// Age in seconds of the oldest and newest pending items.
    pub oldest_pending_secs: Option<i64>,
    pub newest_pending_secs: Option<i64>,
}

pub async fn queue_stats(pool: &SqlitePool) -> Result<QueueStats> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failure_queue")
        .fetch_one(pool)
        .await?;

    let mut status_counts = BTreeMap::new();
    let status_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM failure_queue GROUP BY status")
        .fetch_all(pool)
        .await?;
    for row in &status_rows {
        status_counts.insert(row.get::<String, _>("status"), row.get::<i64, _>("n"));
    }

    let mut priority_counts = BTreeMap::new();
    let priority_rows =
        sqlx::query("SELECT priority, COUNT(*) AS n FROM failure_queue GROUP BY priority")
            .fetch_all(pool)
            .await?;
    for row in &priority_rows {
        let priority = Priority::from_i64(row.get::<i64, _>("priority"));
        priority_counts.insert(priority.as_str().to_string(), row.get::<i64, _>("n"));
    }

    let bounds = sqlx::query(
        "SELECT MIN(created_at) AS oldest, MAX(created_at) AS newest
         FROM failure_queue WHERE status = 'pending'",
    )
    .fetch_one(pool)
    .await?;

    let now = Utc::now().timestamp();
    let oldest: Option<i64> = bounds.get("oldest");
    let newest: Option<i64> = bounds.get("newest");

    Ok(QueueStats {
        total,
        status_counts,
        priority_counts,
        oldest_pending_secs: oldest.map(|ts| now - ts),
        newest_pending_secs: newest.map(|ts| now - ts),
    })
}

/// Print the stats the way `intake queue stats` shows them.
pub fn print_queue_stats(stats: &QueueStats) {
    println!("Intake — Failure Queue");
    println!("======================");
    println!();
    println!("  Items:  {}", stats.total);

    if !stats.status_counts.is_empty() {
        println!();
        println!("  By status:");
        for (status, count) in &stats.status_counts {
            println!("    {:<12} {}", status, count);
        }
    }

    if !stats.priority_counts.is_empty() {
        println!();
        println!("  By priority:");
        for (priority, count) in &stats.priority_counts {
            println!("    {:<12} {}", priority, count);
        }
    }

    if let Some(oldest) = stats.oldest_pending_secs {
        println!();
        println!("  Oldest pending: {}", format_age(oldest));
    }
    println!();
}

fn format_age(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs.max(0))
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}
