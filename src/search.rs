//! Query-time retrieval.
//!
//! A [`Query`] (text or image bytes) is embedded with the same embedder used
//! at ingestion, then the store returns the exact cosine top-k, restricted by
//! a [`MetadataFilter`]. Results are ordered by score descending, ties broken
//! by id ascending, so identical queries always produce identical lists.

use std::sync::Arc;
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::filter::MetadataFilter;
use crate::models::{SearchHit, UnitContent};
use crate::store::VectorStore;

#[derive(Debug, Clone)]
pub enum Query {
    Text(String),
    /// Encoded image file bytes.
    Image(Vec<u8>),
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    max_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, max_k: usize) -> Self {
        Self {
            store,
            embedder,
            max_k: max_k.max(1),
        }
    }

    pub async fn search(
        &self,
        query: &Query,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        let content = match query {
            Query::Text(text) => {
                if text.trim().is_empty() {
                    return Err(IndexError::InvalidQuery("query text is empty".to_string()));
                }
                UnitContent::Text(text.clone())
            }
            Query::Image(bytes) => {
                image::guess_format(bytes)
                    .and_then(|format| image::load_from_memory_with_format(bytes, format))
                    .map_err(|e| IndexError::InvalidQuery(format!("query image: {}", e)))?;
                UnitContent::Image(bytes.clone())
            }
        };
        let vector = self.embedder.embed(&content).await?;
        self.search_vector(&vector, k, filter).await
    }

    /// Top-k for a precomputed vector.
    pub async fn search_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        let info = match self.store.collection_info().await? {
            Some(info) => info,
            None => return Ok(Vec::new()),
        };
        if vector.len() != info.dims {
            return Err(IndexError::DimensionMismatch {
                collection: info.name,
                expected: info.dims,
                actual: vector.len(),
            });
        }

        let k = k.min(self.max_k);
        let hits = self.store.query(vector, k, filter).await?;
        debug!(k, hits = hits.len(), "search complete");
        Ok(hits)
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(IndexError::InvalidQuery("k must be >= 1".to_string()));
    }
    Ok(())
}
