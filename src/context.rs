//! Wiring from [`Config`] to the pipeline components.
//!
//! The CLI and the HTTP server both build an [`AppContext`]: the store is
//! opened eagerly, the embedder is loaded on first use so `get`, `delete`
//! and `count` work without model files.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use crate::audio::{create_transcriber, Transcriber};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{IndexError, Result};
use crate::indexer::Indexer;
use crate::ingest::{Pipeline, PipelineOptions};
use crate::search::Retriever;
use crate::store::{SqliteStore, VectorStore};

pub struct AppContext {
    pub config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    embedder: OnceCell<Arc<dyn Embedder>>,
    transcriber: Arc<dyn Transcriber>,
}

impl AppContext {
    /// Opens the SQLite store named in the config.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db.path, &config.collection.name).await?;
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: &Config, store: Arc<dyn VectorStore>) -> Result<Self> {
        let transcriber =
            create_transcriber(&config.transcription).map_err(|e| IndexError::Config(e.to_string()))?;
        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            embedder: OnceCell::new(),
            transcriber,
        })
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        self.embedder
            .get_or_try_init(|| async {
                let config = self.config.embedding.clone();
                let timeout = Duration::from_secs(config.timeout_secs);
                let embedder = load_embedder(move || create_embedder(&config), timeout).await?;
                info!(
                    model = embedder.model_name(),
                    dims = embedder.dims(),
                    "embedder loaded"
                );
                Ok::<_, IndexError>(embedder)
            })
            .await
            .cloned()
    }

    pub async fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::new(
            self.store.clone(),
            self.embedder().await?,
            self.transcriber.clone(),
            PipelineOptions::from_config(&self.config),
        )
        .await
    }

    pub async fn retriever(&self) -> Result<Retriever> {
        Ok(Retriever::new(
            self.store.clone(),
            self.embedder().await?,
            self.config.retrieval.max_k,
        ))
    }

    /// Indexer for reads and deletes; does not load the embedder.
    pub async fn indexer(&self) -> Result<Indexer> {
        Indexer::attach(self.store.clone()).await
    }
}

/// Runs a model load on a blocking thread, bounded by `timeout`.
///
/// A load that does not finish in time (for example a model download that
/// stalls) fails with `ModelUnavailable`; the blocking thread is left to
/// finish on its own.
async fn load_embedder<F>(loader: F, timeout: Duration) -> Result<Arc<dyn Embedder>>
where
    F: FnOnce() -> Result<Arc<dyn Embedder>> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(loader)).await {
        Ok(joined) => joined.map_err(|e| IndexError::ModelUnavailable(e.to_string()))?,
        Err(_) => Err(IndexError::ModelUnavailable(format!(
            "model load did not finish within {}s",
            timeout.as_secs_f64()
        ))),
    }
}
