//! Validated, batched writes into a [`VectorStore`].
//!
//! The indexer owns the collection's dimension contract. Every upsert call
//! is validated as a whole before anything is written: one malformed unit
//! rejects the call with [`IndexError::InvalidBatch`]. A valid call is
//! written in one atomic store write, so it either commits whole or fails
//! with nothing written. Callers bound the size of a call.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::models::ContentUnit;
use crate::store::{CollectionInfo, VectorStore};

pub struct Indexer {
    store: Arc<dyn VectorStore>,
    info: Option<CollectionInfo>,
}

impl Indexer {
    /// Establishes the collection with `dims`, or checks an existing one.
    ///
    /// Fails with `DimensionMismatch` when the collection was created with a
    /// different dimension. A different model name with the same dimension
    /// is only logged.
    pub async fn open(
        store: Arc<dyn VectorStore>,
        dims: usize,
        model: &str,
    ) -> Result<Self> {
        let info = store.ensure_collection(dims, model).await?;
        if info.dims != dims {
            return Err(IndexError::DimensionMismatch {
                collection: info.name,
                expected: info.dims,
                actual: dims,
            });
        }
        if info.model != model {
            warn!(
                collection = %info.name,
                stored = %info.model,
                current = %model,
                "collection was created with a different model of the same dimension"
            );
        }
        Ok(Self {
            store,
            info: Some(info),
        })
    }

    /// Attaches to whatever collection exists, for reads and deletes.
    pub async fn attach(store: Arc<dyn VectorStore>) -> Result<Self> {
        let info = store.collection_info().await?;
        Ok(Self { store, info })
    }

    pub fn info(&self) -> Option<&CollectionInfo> {
        self.info.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Checks every unit of the call; returns all offending ids with reasons.
    pub fn validate(&self, units: &[ContentUnit]) -> Result<()> {
        let dims = match &self.info {
            Some(info) => info.dims,
            None => {
                return Err(IndexError::Store(format!(
                    "collection '{}' does not exist yet",
                    self.store.collection()
                )))
            }
        };

        let mut rejected = Vec::new();
        for unit in units {
            let reason = if unit.id.trim().is_empty() {
                Some("empty id".to_string())
            } else if unit.vector.len() != dims {
                Some(format!(
                    "vector has {} dims, collection has {}",
                    unit.vector.len(),
                    dims
                ))
            } else if unit.vector.iter().any(|x| !x.is_finite()) {
                Some("vector contains non-finite values".to_string())
            } else if unit.document_text.trim().is_empty() {
                Some("empty document_text".to_string())
            } else {
                unit.meta.validate().err()
            };
            if let Some(reason) = reason {
                rejected.push((unit.id.clone(), reason));
            }
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(IndexError::InvalidBatch(rejected))
        }
    }

    /// Inserts or replaces `units` in one store write. Returns the number of
    /// distinct ids written.
    pub async fn upsert(&self, units: &[ContentUnit]) -> Result<usize> {
        self.validate(units)?;
        let written = self.store.upsert(units).await?;
        debug!(written, "store write committed");
        let distinct: HashSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
        Ok(distinct.len())
    }

    pub async fn fetch(&self, id: &str) -> Result<ContentUnit> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| IndexError::NotFound(id.to_string()))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(IndexError::NotFound(id.to_string()))
        }
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }
}
