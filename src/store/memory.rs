//! In-memory [`VectorStore`] for tests and ephemeral runs.
//!
//! One `RwLock` guards both the collection info and the units, so an upsert
//! is visible all at once. Search is brute-force cosine similarity.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{rank, CollectionInfo, VectorStore};
use crate::error::{IndexError, Result};
use crate::filter::MetadataFilter;
use crate::models::{ContentUnit, SearchHit};

#[derive(Default)]
struct Inner {
    info: Option<CollectionInfo>,
    units: BTreeMap<String, ContentUnit>,
}

pub struct InMemoryStore {
    name: String,
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| IndexError::Store("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| IndexError::Store("memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("multimodal_collection")
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<CollectionInfo> {
        let mut inner = self.write()?;
        let info = inner.info.get_or_insert_with(|| CollectionInfo {
            name: self.name.clone(),
            dims,
            model: model.to_string(),
        });
        Ok(info.clone())
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        Ok(self.read()?.info.clone())
    }

    async fn upsert(&self, units: &[ContentUnit]) -> Result<usize> {
        let mut inner = self.write()?;
        for unit in units {
            inner.units.insert(unit.id.clone(), unit.clone());
        }
        Ok(units.len())
    }

    async fn get(&self, id: &str) -> Result<Option<ContentUnit>> {
        Ok(self.read()?.units.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.units.remove(id).is_some())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        let inner = self.read()?;
        Ok(rank(inner.units.values().cloned(), vector, k, filter))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.units.len())
    }
}
