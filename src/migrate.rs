//! Schema creation. Idempotent; runs on every store open and on `mmi init`.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per unit: vector, text and metadata are written together.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS units (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            unit_type TEXT NOT NULL,
            source_file TEXT NOT NULL,
            document_text TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_type ON units(collection, unit_type)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_units_source_file ON units(collection, source_file)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
