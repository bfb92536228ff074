//! Persisted registry-probe results and per-(endpoint, stack) update
//! dismissals (§4.3 "Update probes", §6 "On-disk state"). WorldView never
//! calls the registry itself; it only reads the map this module maintains.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// image_ref → last-known remote digest, for every reference that has ever
/// been probed. WorldView compares this against each container's running
/// digest to set `image_update_available`.
pub async fn image_update_digests(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT image_ref, remote_digest FROM image_update_state")
            .fetch_all(pool)
            .await
            .context("Failed to load image_update_state")?;

    Ok(rows
        .into_iter()
        .filter_map(|(reference, digest)| digest.map(|d| (reference, d)))
        .collect())
}

/// Record the result of a registry probe (§4.3's N-hourly background
/// loop). `update_available` is recomputed by the caller by comparing
/// `remote_digest` against the locally pulled digest at probe time; it's
/// stored too so a UI can show "last checked" state without re-deriving it.
pub async fn record_probe(
    pool: &SqlitePool,
    image_ref: &str,
    remote_digest: Option<&str>,
    update_available: bool,
) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    sqlx::query(
        "INSERT INTO image_update_state (image_ref, update_available, remote_digest, last_checked_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(image_ref) DO UPDATE SET
            update_available = excluded.update_available,
            remote_digest = excluded.remote_digest,
            last_checked_at = excluded.last_checked_at",
    )
    .bind(image_ref)
    .bind(update_available)
    .bind(remote_digest)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to record image update probe")?;

    Ok(())
}

/// Dismiss a specific digest's update prompt for one (endpoint, stack,
/// image). A later probe surfacing a *different* digest is not suppressed.
pub async fn dismiss_update(
    pool: &SqlitePool,
    endpoint: &str,
    stack_name: &str,
    image_ref: &str,
    digest: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO image_update_dismissal (endpoint, stack_name, image_ref, dismissed_digest)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(endpoint, stack_name, image_ref) DO UPDATE SET
            dismissed_digest = excluded.dismissed_digest",
    )
    .bind(endpoint)
    .bind(stack_name)
    .bind(image_ref)
    .bind(digest)
    .execute(pool)
    .await
    .context("Failed to record image update dismissal")?;

    Ok(())
}

/// Whether `digest` has already been dismissed for this (endpoint, stack,
/// image) triple.
pub async fn is_dismissed(
    pool: &SqlitePool,
    endpoint: &str,
    stack_name: &str,
    image_ref: &str,
    digest: &str,
) -> Result<bool> {
    let dismissed: Option<String> = sqlx::query_scalar(
        "SELECT dismissed_digest FROM image_update_dismissal
         WHERE endpoint = ? AND stack_name = ? AND image_ref = ?",
    )
    .bind(endpoint)
    .bind(stack_name)
    .bind(image_ref)
    .fetch_optional(pool)
    .await
    .context("Failed to query image update dismissal")?;

    Ok(dismissed.as_deref() == Some(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn record_then_read_back_digest() {
        let pool = setup_pool().await;
        record_probe(&pool, "nginx:1.25", Some("sha256:bbb"), true)
            .await
            .unwrap();

        let map = image_update_digests(&pool).await.unwrap();
        assert_eq!(map.get("nginx:1.25").map(|s| s.as_str()), Some("sha256:bbb"));
    }

    #[tokio::test]
    async fn dismissal_is_digest_specific() {
        let pool = setup_pool().await;
        dismiss_update(&pool, "", "demo", "nginx:1.25", "sha256:bbb")
            .await
            .unwrap();

        assert!(is_dismissed(&pool, "", "demo", "nginx:1.25", "sha256:bbb")
            .await
            .unwrap());
        assert!(!is_dismissed(&pool, "", "demo", "nginx:1.25", "sha256:ccc")
            .await
            .unwrap());
    }
}
