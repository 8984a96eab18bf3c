use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{l2_normalize, Embedder};
use crate::error::Result;
use crate::models::UnitContent;

/// Deterministic embedder based on feature hashing.
///
/// Text is split into lowercase alphanumeric tokens; each token adds `±1` to
/// a bucket chosen by its SHA-256. Image bytes are expanded into a
/// pseudo-random vector seeded by their digest. Texts sharing words score
/// higher than unrelated texts, which is enough to exercise ranking without
/// model files.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let mut tokens = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .peekable();
        if tokens.peek().is_none() {
            self.add_feature(&mut v, lowered.as_bytes());
        }
        for token in tokens {
            self.add_feature(&mut v, token.as_bytes());
        }
        finish(v)
    }

    fn embed_image(&self, bytes: &[u8]) -> Vec<f32> {
        let seed = Sha256::digest(bytes);
        let mut v = Vec::with_capacity(self.dims);
        let mut counter = 0u32;
        while v.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(b"image:");
            hasher.update(seed);
            hasher.update(counter.to_le_bytes());
            let block = hasher.finalize();
            for pair in block.chunks_exact(2) {
                if v.len() == self.dims {
                    break;
                }
                let raw = u16::from_le_bytes([pair[0], pair[1]]);
                v.push(raw as f32 / u16::MAX as f32 * 2.0 - 1.0);
            }
            counter += 1;
        }
        finish(v)
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8]) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign;
    }
}

fn finish(mut v: Vec<f32>) -> Vec<f32> {
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    l2_normalize(&mut v);
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, items: &[UnitContent]) -> Result<Vec<Vec<f32>>> {
        Ok(items
            .iter()
            .map(|item| match item {
                UnitContent::Text(text) => self.embed_text(text),
                UnitContent::Image(bytes) => self.embed_image(bytes),
            })
            .collect())
    }
}
