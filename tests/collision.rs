//! Collision resolver tests: determinism, monotonicity, registry cleanup.

use intake::collision::{CollisionResolver, ResolutionStrategy};
use intake::config::CollisionConfig;
use intake::db;
use intake::migrate;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

async fn setup() -> (CollisionResolver, TempDir) {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let resolver = CollisionResolver::new(pool, CollisionConfig::default());
    (resolver, TempDir::new().unwrap())
}

fn touch(dir: &Path, stem: &str) {
    fs::write(dir.join(format!("{}.md", stem)), "content").unwrap();
}

#[tokio::test]
async fn test_no_collision_returns_base_unchanged() {
    let (resolver, tmp) = setup().await;

    let (name, info) = resolver.resolve(tmp.path(), "fresh-note").await.unwrap();
    assert_eq!(name, "fresh-note");
    assert!(!info.collided);
    assert_eq!(info.strategy, ResolutionStrategy::None);
}

#[tokio::test]
async fn test_collision_determinism() {
    let (resolver, tmp) = setup().await;
    touch(tmp.path(), "post");

    // Same request twice, no new file created: same answer both times.
    let (first, info) = resolver.resolve(tmp.path(), "post").await.unwrap();
    assert_eq!(first, "post-2");
    assert!(info.collided);
    assert_eq!(info.strategy, ResolutionStrategy::NumericSuffix);

    let (second, info) = resolver.resolve(tmp.path(), "post").await.unwrap();
    assert_eq!(second, "post-2");
    assert_eq!(info.collision_count, 2);
}

#[tokio::test]
async fn test_collision_monotonicity() {
    let (resolver, tmp) = setup().await;
    touch(tmp.path(), "post");

    let (first, _) = resolver.resolve(tmp.path(), "post").await.unwrap();
    assert_eq!(first, "post-2");

    // Once the resolved file exists, the next request advances.
    touch(tmp.path(), "post-2");
    let (second, _) = resolver.resolve(tmp.path(), "post").await.unwrap();
    assert_eq!(second, "post-3");

    touch(tmp.path(), "post-3");
    let (third, _) = resolver.resolve(tmp.path(), "post").await.unwrap();
    assert_eq!(third, "post-4");
}

#[tokio::test]
async fn test_numeric_exhaustion_falls_back_to_hash() {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let resolver = CollisionResolver::new(
        pool,
        CollisionConfig {
            suffix_ceiling: 4,
            ..CollisionConfig::default()
        },
    );
    let tmp = TempDir::new().unwrap();

    touch(tmp.path(), "busy");
    for n in 2..=4 {
        touch(tmp.path(), &format!("busy-{}", n));
    }

    let (name, info) = resolver.resolve(tmp.path(), "busy").await.unwrap();
    assert_eq!(info.strategy, ResolutionStrategy::HashSuffix);
    // busy-<8 hex chars>
    let suffix = name.strip_prefix("busy-").unwrap();
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_different_directories_are_independent() {
    let (resolver, tmp) = setup().await;
    let dir_a = tmp.path().join("a");
    let dir_b = tmp.path().join("b");
    fs::create_dir_all(&dir_a).unwrap();
    fs::create_dir_all(&dir_b).unwrap();
    touch(&dir_a, "note");

    let (in_a, _) = resolver.resolve(&dir_a, "note").await.unwrap();
    let (in_b, _) = resolver.resolve(&dir_b, "note").await.unwrap();
    assert_eq!(in_a, "note-2");
    assert_eq!(in_b, "note");
}

#[tokio::test]
async fn test_cleanup_removes_only_stale_entries() {
    let (resolver, tmp) = setup().await;
    touch(tmp.path(), "kept");
    touch(tmp.path(), "gone");

    let (kept, _) = resolver.resolve(tmp.path(), "kept").await.unwrap();
    let (gone, _) = resolver.resolve(tmp.path(), "gone").await.unwrap();

    // Writer persisted one resolution but not the other.
    touch(tmp.path(), &kept);
    let _ = gone; // gone-2.md never written

    let removed = resolver.cleanup_registry().await.unwrap();
    assert_eq!(removed, 1);

    // The surviving entry still short-circuits to a new suffix, the
    // removed one starts over from the filesystem.
    let (kept_again, _) = resolver.resolve(tmp.path(), "kept").await.unwrap();
    assert_eq!(kept_again, "kept-3");
    let (gone_again, _) = resolver.resolve(tmp.path(), "gone").await.unwrap();
    assert_eq!(gone_again, "gone-2");
}
