//! CLIP ViT-B/32 via fastembed: text and vision encoders in one space.
//!
//! Both models are loaded once in [`LocalEmbedder::load`] and kept behind a
//! mutex; inference runs on the blocking pool, bounded by
//! `embedding.timeout_secs`.

use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use super::{Embedder, CLIP_DIMS};
use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};
use crate::models::UnitContent;

/// Hugging Face repositories fastembed pulls the two encoders from.
const CLIP_TEXT_REPO: &str = "Qdrant/clip-ViT-B-32-text";
const CLIP_VISION_REPO: &str = "Qdrant/clip-ViT-B-32-vision";

pub struct LocalEmbedder {
    model_name: String,
    text: Arc<Mutex<TextEmbedding>>,
    vision: Arc<Mutex<ImageEmbedding>>,
    batch_size: usize,
    timeout: Duration,
}

impl LocalEmbedder {
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        if config.model != "clip-vit-b-32" {
            return Err(IndexError::ModelUnavailable(format!(
                "unknown local embedding model '{}'; supported: clip-vit-b-32",
                config.model
            )));
        }
        if let Some(dims) = config.dims {
            if dims != CLIP_DIMS {
                return Err(IndexError::ModelUnavailable(format!(
                    "clip-vit-b-32 produces {} dims, config asks for {}",
                    CLIP_DIMS, dims
                )));
            }
        }

        let cache_dir = resolve_cache_dir(config.cache_dir.as_deref());
        if config.offline {
            for repo in [CLIP_TEXT_REPO, CLIP_VISION_REPO] {
                if !is_cached(&cache_dir, repo) {
                    return Err(IndexError::ModelUnavailable(format!(
                        "{} not found in {} and embedding.offline = true; \
                         run once with offline = false to download it",
                        repo,
                        cache_dir.display()
                    )));
                }
            }
        }

        info!(cache_dir = %cache_dir.display(), "loading CLIP ViT-B/32 encoders");
        let text = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::ClipVitB32)
                .with_cache_dir(cache_dir.clone())
                .with_show_download_progress(false),
        )
        .map_err(|e| IndexError::ModelUnavailable(format!("CLIP text encoder: {}", e)))?;
        let vision = ImageEmbedding::try_new(
            ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false),
        )
        .map_err(|e| IndexError::ModelUnavailable(format!("CLIP vision encoder: {}", e)))?;

        Ok(Self {
            model_name: config.model.clone(),
            text: Arc::new(Mutex::new(text)),
            vision: Arc::new(Mutex::new(vision)),
            batch_size: config.batch_size,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Runs `job` on the blocking pool with the configured timeout.
    async fn run_blocking<F>(&self, job: F) -> Result<Vec<Vec<f32>>>
    where
        F: FnOnce() -> Result<Vec<Vec<f32>>> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(job);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(IndexError::Embedding(format!(
                "inference task failed: {}",
                join
            ))),
            Err(_) => Err(IndexError::Embedding(format!(
                "inference timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.text);
        let batch_size = self.batch_size;
        self.run_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| IndexError::Embedding("text encoder lock poisoned".to_string()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| IndexError::Embedding(format!("text inference failed: {}", e)))
        })
        .await
    }

    async fn embed_images(&self, images: Vec<Vec<u8>>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.vision);
        let batch_size = self.batch_size;
        self.run_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| IndexError::Embedding("vision encoder lock poisoned".to_string()))?;
            let refs: Vec<&[u8]> = images.iter().map(Vec::as_slice).collect();
            model
                .embed_bytes(&refs, Some(batch_size))
                .map_err(|e| IndexError::Embedding(format!("image inference failed: {}", e)))
        })
        .await
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        CLIP_DIMS
    }

    /// Splits the batch by modality, embeds each part, and restores input order.
    async fn embed_batch(&self, items: &[UnitContent]) -> Result<Vec<Vec<f32>>> {
        let mut text_slots = Vec::new();
        let mut texts = Vec::new();
        let mut image_slots = Vec::new();
        let mut images = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match item {
                UnitContent::Text(t) => {
                    text_slots.push(i);
                    texts.push(t.clone());
                }
                UnitContent::Image(b) => {
                    image_slots.push(i);
                    images.push(b.clone());
                }
            }
        }
        debug!(texts = texts.len(), images = images.len(), "embedding batch");

        let mut out: Vec<Vec<f32>> = vec![Vec::new(); items.len()];
        if !texts.is_empty() {
            for (slot, v) in text_slots.into_iter().zip(self.embed_texts(texts).await?) {
                out[slot] = v;
            }
        }
        if !images.is_empty() {
            for (slot, v) in image_slots.into_iter().zip(self.embed_images(images).await?) {
                out[slot] = v;
            }
        }
        if out.iter().any(Vec::is_empty) {
            return Err(IndexError::Embedding(
                "model returned fewer vectors than inputs".to_string(),
            ));
        }
        Ok(out)
    }
}

fn resolve_cache_dir(configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) => dir.to_path_buf(),
        None => std::env::var_os("FASTEMBED_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".fastembed_cache")),
    }
}

/// Whether the hf-hub cache layout in `cache_dir` holds a snapshot of `repo`.
fn is_cached(cache_dir: &Path, repo: &str) -> bool {
    let dir = cache_dir
        .join(format!("models--{}", repo.replace('/', "--")))
        .join("snapshots");
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
