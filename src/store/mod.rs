//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait covers everything the indexer and retriever
//! need from a backend: one named collection with a fixed dimension, atomic
//! batch upserts keyed by unit id, point reads and deletes, and exact
//! cosine top-k with metadata filtering.
//!
//! Backends:
//! - [`SqliteStore`]: persistent, one row per unit (vector, text and metadata
//!   together, so a reader never sees a torn unit).
//! - [`InMemoryStore`]: a single `RwLock` over a map; tests and ephemeral runs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::filter::MetadataFilter;
use crate::models::{ContentUnit, SearchHit};

/// Dimension and model recorded when a collection is created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dims: usize,
    pub model: String,
}

/// Abstract vector store holding one collection.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | Create the collection or return its recorded info |
/// | [`upsert`](VectorStore::upsert) | Insert or replace units, atomically |
/// | [`get`](VectorStore::get) | Fetch one unit by id |
/// | [`delete`](VectorStore::delete) | Remove one unit by id |
/// | [`query`](VectorStore::query) | Cosine top-k with a metadata filter |
/// | [`count`](VectorStore::count) | Number of units |
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    /// Creates the collection with `dims` and `model` if it does not exist.
    /// Returns the recorded info, which may differ from the arguments.
    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<CollectionInfo>;

    async fn collection_info(&self) -> Result<Option<CollectionInfo>>;

    /// Writes all `units` in one atomic step. Within the slice, the last
    /// unit with a given id wins. Returns the number of units written.
    async fn upsert(&self, units: &[ContentUnit]) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Option<ContentUnit>>;

    /// Returns whether a unit was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Exact nearest neighbours of `vector`, ordered by score descending and
    /// then id ascending.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self) -> Result<usize>;
}

/// Scores, filters and orders candidates; keeps the best `k`.
pub fn rank<I>(candidates: I, vector: &[f32], k: usize, filter: &MetadataFilter) -> Vec<SearchHit>
where
    I: IntoIterator<Item = ContentUnit>,
{
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|unit| filter.is_empty() || filter.matches(&unit.metadata()))
        .map(|unit| {
            let score = cosine_similarity(vector, &unit.vector);
            SearchHit { unit, score }
        })
        .collect();
    hits.sort_by(compare_hits);
    hits.truncate(k);
    hits
}

pub fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.unit.id.cmp(&b.unit.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TextUnitMeta, UnitMeta};

    fn unit(id: &str, vector: Vec<f32>) -> ContentUnit {
        ContentUnit {
            id: id.to_string(),
            vector,
            document_text: id.to_string(),
            meta: UnitMeta::Text(TextUnitMeta {
                source_file: "a.txt".into(),
                page: None,
                chunk_index: 0,
                start_char: 0,
                end_char: 1,
            }),
        }
    }

    #[test]
    fn rank_orders_by_score_then_id() {
        let hits = rank(
            vec![
                unit("c", vec![1.0, 0.0]),
                unit("b", vec![0.0, 1.0]),
                unit("a", vec![1.0, 0.0]),
            ],
            &[1.0, 0.0],
            10,
            &MetadataFilter::new(),
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn rank_truncates_and_filters() {
        let units = vec![unit("a", vec![1.0, 0.0]), unit("b", vec![0.5, 0.5])];
        assert_eq!(rank(units.clone(), &[1.0, 0.0], 1, &MetadataFilter::new()).len(), 1);
        let images = MetadataFilter::new().eq("type", "image");
        assert!(rank(units, &[1.0, 0.0], 10, &images).is_empty());
    }
}
