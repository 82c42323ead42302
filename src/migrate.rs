use anyhow::Result;
use sqlx::SqlitePool;

/// Create the intake schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Failure queue: one row per logical work item, keyed by the caller's id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS failure_queue (
            id TEXT PRIMARY KEY,
            kind TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            error TEXT NOT NULL DEFAULT '',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            priority INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            next_retry_at INTEGER,
            context TEXT NOT NULL DEFAULT '{}',
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Collision registry: memoized filename resolutions, authoritative once
    // populated.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collision_registry (
            directory TEXT NOT NULL,
            base_filename TEXT NOT NULL,
            resolved_filename TEXT NOT NULL,
            collision_count INTEGER NOT NULL DEFAULT 1,
            strategy TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (directory, base_filename)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dequeue scans filter on status + eligibility and order by priority,
    // then age.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_dequeue ON failure_queue(status, priority DESC, created_at ASC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_retry_at ON failure_queue(next_retry_at)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_registry_directory ON collision_registry(directory)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
