//! Embedder abstraction and implementations.
//!
//! Texts and images are embedded into one shared vector space so a text
//! query can retrieve images and vice versa. Implementations:
//! - **[`LocalEmbedder`]**: CLIP ViT-B/32 text and vision encoders via
//!   fastembed; no network calls once the model files are cached.
//! - **[`HashEmbedder`]**: deterministic feature hashing, no model files.
//!   Used by tests and air-gapped smoke runs.
//! - **[`DisabledEmbedder`]**: fails every call with `ModelUnavailable`.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Provider Selection
//!
//! ```rust
//! # use multimodal_index::config::EmbeddingConfig;
//! # use multimodal_index::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "hash".into(),
//!     dims: Some(64),
//!     ..Default::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 64);
//! ```

mod hash;
#[cfg(feature = "local-embeddings-fastembed")]
mod local;

pub use hash::HashEmbedder;
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};
use crate::models::UnitContent;

/// Output dimension of CLIP ViT-B/32, for both encoders.
pub const CLIP_DIMS: usize = 512;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded with the collection (e.g. `"clip-vit-b-32"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality, fixed for the embedder's lifetime.
    fn dims(&self) -> usize;

    /// Embeds a batch, one vector per input, in input order.
    async fn embed_batch(&self, items: &[UnitContent]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, item: &UnitContent) -> Result<Vec<f32>> {
        self.embed_batch(std::slice::from_ref(item))
            .await?
            .pop()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))
    }
}

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _items: &[UnitContent]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::ModelUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (feature `local-embeddings-fastembed`) |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"disabled"` | [`DisabledEmbedder`] |
///
/// # Errors
///
/// `ModelUnavailable` when the local model cannot be resolved (offline with
/// no cached files, or the feature is not compiled in).
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(CLIP_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::load(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(IndexError::ModelUnavailable(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(IndexError::ModelUnavailable(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use multimodal_index::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Scales `v` to unit length in place; zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn disabled_embedder_is_model_unavailable() {
        let err = DisabledEmbedder
            .embed(&UnitContent::Text("hello".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::ModelUnavailable(_)));
    }

    #[test]
    fn create_embedder_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
