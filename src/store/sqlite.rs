//! SQLite-backed [`VectorStore`].
//!
//! Each unit is one row of the `units` table: the vector as a little-endian
//! f32 BLOB, the document text, and the metadata as JSON, plus `unit_type`
//! and `source_file` columns so the common filters run in SQL. Similarity
//! is computed in Rust over the candidate rows.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::{rank, CollectionInfo, VectorStore};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{IndexError, Result};
use crate::filter::MetadataFilter;
use crate::migrate;
use crate::models::{ContentUnit, SearchHit, UnitMeta};

pub struct SqliteStore {
    pool: SqlitePool,
    name: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            name: collection.into(),
        }
    }

    /// Connects to (creating if needed) the database and runs migrations.
    pub async fn open(db_path: &Path, collection: &str) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, collection))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_unit(row: &SqliteRow) -> Result<ContentUnit> {
    let id: String = row.try_get("id")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let meta: UnitMeta = serde_json::from_str(&metadata_json)
        .map_err(|e| IndexError::Store(format!("corrupt metadata for {}: {}", id, e)))?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(ContentUnit {
        vector: blob_to_vec(&blob),
        document_text: row.try_get("document_text")?,
        meta,
        id,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<CollectionInfo> {
        sqlx::query(
            r#"
            INSERT INTO collections (name, dims, model, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(dims as i64)
        .bind(model)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.collection_info()
            .await?
            .ok_or_else(|| IndexError::Store(format!("collection '{}' was not created", self.name)))
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query("SELECT name, dims, model FROM collections WHERE name = ?")
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let dims: i64 = r.try_get("dims")?;
                Ok(Some(CollectionInfo {
                    name: r.try_get("name")?,
                    dims: dims as usize,
                    model: r.try_get("model")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, units: &[ContentUnit]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for unit in units {
            let metadata_json = serde_json::to_string(&unit.meta)
                .map_err(|e| IndexError::Store(format!("metadata for {}: {}", unit.id, e)))?;
            sqlx::query(
                r#"
                INSERT INTO units (collection, id, unit_type, source_file, document_text,
                                   metadata_json, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    unit_type = excluded.unit_type,
                    source_file = excluded.source_file,
                    document_text = excluded.document_text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.name)
            .bind(&unit.id)
            .bind(unit.kind().as_str())
            .bind(unit.meta.source_file())
            .bind(&unit.document_text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&unit.vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(units.len())
    }

    async fn get(&self, id: &str) -> Result<Option<ContentUnit>> {
        let row = sqlx::query(
            "SELECT id, document_text, metadata_json, embedding FROM units WHERE collection = ? AND id = ?",
        )
        .bind(&self.name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM units WHERE collection = ? AND id = ?")
            .bind(&self.name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        let mut sql = String::from(
            "SELECT id, document_text, metadata_json, embedding FROM units WHERE collection = ?",
        );
        let kind = match filter.kind_eq() {
            Some(None) => return Ok(Vec::new()),
            Some(Some(kind)) => {
                sql.push_str(" AND unit_type = ?");
                Some(kind)
            }
            None => None,
        };
        let source_file = filter.source_file_eq();
        if source_file.is_some() {
            sql.push_str(" AND source_file = ?");
        }

        let mut query = sqlx::query(&sql).bind(&self.name);
        if let Some(kind) = kind {
            query = query.bind(kind.as_str());
        }
        if let Some(source_file) = source_file {
            query = query.bind(source_file);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let units = rows.iter().map(row_to_unit).collect::<Result<Vec<_>>>()?;
        Ok(rank(units, vector, k, filter))
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioUnitMeta, TextUnitMeta};
    use tempfile::TempDir;

    fn text_unit(id: &str, page: u32, vector: Vec<f32>) -> ContentUnit {
        ContentUnit {
            id: id.to_string(),
            vector,
            document_text: format!("text of {}", id),
            meta: UnitMeta::Text(TextUnitMeta {
                source_file: "report.pdf".into(),
                page: Some(page),
                chunk_index: 0,
                start_char: 0,
                end_char: 10,
            }),
        }
    }

    fn audio_unit(id: &str, vector: Vec<f32>) -> ContentUnit {
        ContentUnit {
            id: id.to_string(),
            vector,
            document_text: "spoken words".into(),
            meta: UnitMeta::Audio(AudioUnitMeta {
                source_file: "talk.mp3".into(),
                start: 0.0,
                end: 10.0,
            }),
        }
    }

    #[tokio::test]
    async fn units_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("data").join("mmi.sqlite");
        {
            let store = SqliteStore::open(&db_path, "c").await.unwrap();
            store.ensure_collection(3, "hash").await.unwrap();
            store
                .upsert(&[text_unit("report.pdf_chunk_0", 1, vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
            store.pool().close().await;
        }
        let store = SqliteStore::open(&db_path, "c").await.unwrap();
        let info = store.collection_info().await.unwrap().unwrap();
        assert_eq!((info.dims, info.model.as_str()), (3, "hash"));
        let unit = store.get("report.pdf_chunk_0").await.unwrap().unwrap();
        assert_eq!(unit.vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(unit.meta, text_unit("x", 1, vec![]).meta);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_last_wins() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("db.sqlite"), "c").await.unwrap();
        let batch = vec![
            text_unit("a", 1, vec![1.0, 0.0]),
            text_unit("a", 2, vec![0.0, 1.0]),
            audio_unit("b", vec![0.5, 0.5]),
        ];
        assert_eq!(store.upsert(&batch).await.unwrap(), 3);
        store.upsert(&batch).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        let a = store.get("a").await.unwrap().unwrap();
        assert_eq!(a.vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite");
        let one = SqliteStore::open(&path, "one").await.unwrap();
        let two = SqliteStore::new(one.pool().clone(), "two");
        one.upsert(&[audio_unit("x", vec![1.0])]).await.unwrap();
        assert_eq!(two.count().await.unwrap(), 0);
        assert!(two.get("x").await.unwrap().is_none());
        assert!(!two.delete("x").await.unwrap());
        assert!(one.delete("x").await.unwrap());
    }

    #[tokio::test]
    async fn query_filters_in_sql_and_in_rust() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("db.sqlite"), "c").await.unwrap();
        store
            .upsert(&[
                text_unit("p1", 1, vec![1.0, 0.0]),
                text_unit("p2", 2, vec![0.9, 0.1]),
                audio_unit("s0", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let texts = MetadataFilter::parse_cli(&["type=text", "page>=2"]).unwrap();
        let hits = store.query(&[1.0, 0.0], 10, &texts).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["p2"]);

        let all = store
            .query(&[1.0, 0.0], 10, &MetadataFilter::new())
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|h| h.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "s0", "p2"]);

        let none = MetadataFilter::new().eq("type", "video");
        assert!(store.query(&[1.0, 0.0], 10, &none).await.unwrap().is_empty());
    }
}
