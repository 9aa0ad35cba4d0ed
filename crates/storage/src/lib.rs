//! Storage layer: SQLite schemas and helpers.
//!
//! Holds DB pool setup, the migration runner and the row models shared by the
//! matching and categorization engine.

pub mod models;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::debug;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}?mode=rwc", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}?mode=rwc", norm);
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        // Every connection to ":memory:" is its own database.
        opts = opts
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        opts = opts.max_connections(5);
    }
    debug!(url = %url, "opening sqlite pool");
    let pool = opts.connect(&url).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_engine_tables() {
        let pool = connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        // Running twice is a no-op.
        migrate(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '_sqlx%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "description_cache",
            "embeddings",
            "job_leases",
            "match_proposals",
            "receipts",
            "tier_usage_log",
            "transactions",
            "vendor_aliases",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn embeddings_reject_verified_rows_with_expiry() {
        let pool = connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();

        let bad = sqlx::query(
            "INSERT INTO embeddings (id, user_id, description_text, gl_code, department, vector, verified, expires_at, created_at) \
             VALUES ('a', 'u', 'x', '6100', 'OPS', '[]', 1, 100, 0)",
        )
        .execute(&pool)
        .await;
        assert!(bad.is_err());

        let ok = sqlx::query(
            "INSERT INTO embeddings (id, user_id, description_text, gl_code, department, vector, verified, expires_at, created_at) \
             VALUES ('b', 'u', 'x', '6100', 'OPS', '[]', 0, 100, 0)",
        )
        .execute(&pool)
        .await;
        assert!(ok.is_ok());
    }
}
