//! Collision-safe filename assignment.
//!
//! Resolution is memoized in a durable SQLite registry so that replaying
//! the same request returns the same answer even after a crash between
//! resolution and file creation. The registry is authoritative once
//! populated; the filesystem is only probed for names it has never seen.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

use crate::config::CollisionConfig;
use crate::identity::sha256_hex;

/// Strategy that produced a resolved name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// No collision; base name used as-is.
    None,
    /// `base-2`, `base-3`, ... numeric probing.
    NumericSuffix,
    /// 8-hex-char suffix after the numeric space was exhausted.
    HashSuffix,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::None => "none",
            ResolutionStrategy::NumericSuffix => "numeric_suffix",
            ResolutionStrategy::HashSuffix => "hash_suffix",
        }
    }

    fn parse(s: &str) -> ResolutionStrategy {
        match s {
            "numeric_suffix" => ResolutionStrategy::NumericSuffix,
            "hash_suffix" => ResolutionStrategy::HashSuffix,
            _ => ResolutionStrategy::None,
        }
    }
}

/// How a resolution was arrived at, for writer-side provenance.
#[derive(Debug, Clone)]
pub struct CollisionInfo {
    pub collided: bool,
    pub strategy: ResolutionStrategy,
    /// Times this base name has been requested since its first collision.
    pub collision_count: i64,
}

pub struct CollisionResolver {
    pool: SqlitePool,
    config: CollisionConfig,
}

impl CollisionResolver {
    pub fn new(pool: SqlitePool, config: CollisionConfig) -> Self {
        CollisionResolver { pool, config }
    }

    /// Resolve a base filename (extension-less stem) against a target
    /// directory. Deterministic: the registry short-circuits repeat requests,
    /// and new resolutions are written through before being returned.
    pub async fn resolve(
        &self,
        directory: &Path,
        base_filename: &str,
    ) -> Result<(String, CollisionInfo)> {
        let dir_key = directory.to_string_lossy().to_string();

        // 1. Registry is authoritative for names it has already resolved.
        let existing = sqlx::query(
            "SELECT resolved_filename, collision_count, strategy FROM collision_registry
             WHERE directory = ? AND base_filename = ?",
        )
        .bind(&dir_key)
        .bind(base_filename)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let resolved: String = row.get("resolved_filename");
            let count: i64 = row.get("collision_count");
            let strategy = ResolutionStrategy::parse(row.get::<String, _>("strategy").as_str());

            // The memo holds until the resolved file is actually created.
            // Replaying the same request before the writer ran must get the
            // same answer; once the file exists, a new request advances.
            if !self.on_disk(directory, &resolved) {
                sqlx::query(
                    "UPDATE collision_registry SET collision_count = collision_count + 1, last_updated = ?
                     WHERE directory = ? AND base_filename = ?",
                )
                .bind(Utc::now().timestamp())
                .bind(&dir_key)
                .bind(base_filename)
                .execute(&self.pool)
                .await?;

                debug!(base = base_filename, resolved = %resolved, "registry hit");
                return Ok((
                    resolved,
                    CollisionInfo {
                        collided: true,
                        strategy,
                        collision_count: count + 1,
                    },
                ));
            }

            let (next, strategy) = match self.probe_numeric(directory, base_filename) {
                Some(name) => (name, ResolutionStrategy::NumericSuffix),
                None => (
                    self.hashed_fallback(directory, base_filename),
                    ResolutionStrategy::HashSuffix,
                ),
            };
            self.register(&dir_key, base_filename, &next, strategy).await?;
            debug!(base = base_filename, resolved = %next, "registry advanced");
            return Ok((
                next,
                CollisionInfo {
                    collided: true,
                    strategy,
                    collision_count: count + 1,
                },
            ));
        }

        // 2. Fresh name, nothing on disk: no collision, no registry write.
        if !self.on_disk(directory, base_filename) {
            return Ok((
                base_filename.to_string(),
                CollisionInfo {
                    collided: false,
                    strategy: ResolutionStrategy::None,
                    collision_count: 0,
                },
            ));
        }

        // 3. Probe numeric suffixes up to the configured ceiling.
        let (resolved, strategy) = match self.probe_numeric(directory, base_filename) {
            Some(name) => (name, ResolutionStrategy::NumericSuffix),
            None => (
                self.hashed_fallback(directory, base_filename),
                ResolutionStrategy::HashSuffix,
            ),
        };

        // 4. Write-through before returning, so a crash between resolution
        //    and file creation cannot yield a different answer later.
        self.register(&dir_key, base_filename, &resolved, strategy)
            .await?;

        info!(
            base = base_filename,
            resolved = %resolved,
            strategy = strategy.as_str(),
            "resolved filename collision"
        );

        Ok((
            resolved,
            CollisionInfo {
                collided: true,
                strategy,
                collision_count: 1,
            },
        ))
    }

    fn on_disk(&self, directory: &Path, stem: &str) -> bool {
        directory
            .join(format!("{}.{}", stem, self.config.extension))
            .exists()
    }

    fn probe_numeric(&self, directory: &Path, base: &str) -> Option<String> {
        for n in 2..=self.config.suffix_ceiling.max(2) {
            let candidate = format!("{}-{}", base, n);
            if !self.on_disk(directory, &candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// 8-hex suffix from base + current timestamp; re-hash exactly once if
    /// even that name is taken.
    fn hashed_fallback(&self, directory: &Path, base: &str) -> String {
        let seed = format!("{}{}", base, Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let first = sha256_hex(&seed);
        let candidate = format!("{}-{}", base, &first[..8]);
        if !self.on_disk(directory, &candidate) {
            return candidate;
        }
        let second = sha256_hex(&first);
        format!("{}-{}", base, &second[..8])
    }

    async fn register(
        &self,
        directory: &str,
        base: &str,
        resolved: &str,
        strategy: ResolutionStrategy,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO collision_registry
                (directory, base_filename, resolved_filename, collision_count, strategy, created_at, last_updated)
            VALUES (?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(directory, base_filename) DO UPDATE SET
                resolved_filename = excluded.resolved_filename,
                collision_count = collision_registry.collision_count + 1,
                strategy = excluded.strategy,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(directory)
        .bind(base)
        .bind(resolved)
        .bind(strategy.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop registry entries whose resolved file no longer exists on disk.
    /// Returns the number of removed entries. Never touches entries whose
    /// file is still present.
    pub async fn cleanup_registry(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT directory, base_filename, resolved_filename FROM collision_registry",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut removed = 0u64;
        for row in &rows {
            let directory: String = row.get("directory");
            let base: String = row.get("base_filename");
            let resolved: String = row.get("resolved_filename");

            if self.on_disk(Path::new(&directory), &resolved) {
                continue;
            }

            sqlx::query(
                "DELETE FROM collision_registry WHERE directory = ? AND base_filename = ?",
            )
            .bind(&directory)
            .bind(&base)
            .execute(&self.pool)
            .await?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "collision registry cleanup");
        }
        Ok(removed)
    }
}
