//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, a deterministic offline [`HashingEmbedder`], a
//! content-hash keyed [`CachedEmbedder`], and pure helpers for vector
//! serialization, dimension checks and similarity.
//!
//! Network and model-backed providers (OpenAI, Ollama, fastembed) live in
//! the `docgate` app crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::checksum;

/// Trait for embedding providers.
///
/// The same provider (same model, same dimension) must embed both indexed
/// chunks and incoming queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let mut vecs = provider.embed_batch(&[text.to_string()]).await?;
    let vec = vecs
        .pop()
        .ok_or_else(|| anyhow!("provider '{}' returned no vector", provider.model_name()))?;
    check_dims(provider.dims(), vec.len())?;
    Ok(vec)
}

/// Fail fast when a vector does not have the pipeline-wide dimension.
pub fn check_dims(expected: usize, actual: usize) -> Result<(), PipelineError> {
    if expected != actual {
        return Err(PipelineError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Lowercased word tokens and their character trigrams are hashed (FNV-1a)
/// into `dims` signed buckets, then the vector is L2-normalized. Needs no
/// model download or network, so it is the default for tests and offline
/// deployments. Identical text always yields an identical vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model: format!("hash-v1-{}", dims.max(1)),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            self.add_feature(&mut v, token.as_bytes(), 1.0);

            let chars: Vec<char> = token.chars().collect();
            if chars.len() >= 3 {
                for tri in chars.windows(3) {
                    let tri: String = tri.iter().collect();
                    self.add_feature(&mut v, tri.as_bytes(), 0.5);
                }
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], bytes: &[u8], weight: f32) {
        let h = fnv1a(bytes);
        let idx = (h % self.dims as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Content-hash keyed cache in front of another provider.
///
/// Identical chunk text is embedded once. The cache is cleared wholesale
/// when it grows past `capacity` entries.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Vec<f32>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| checksum(t.as_bytes())).collect();
        let mut out: Vec<Option<Vec<f32>>> = {
            let cache = self
                .cache
                .read()
                .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
            keys.iter().map(|k| cache.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        self.hits
            .fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch).await?;
            if fresh.len() != batch.len() {
                bail!(
                    "provider '{}' returned {} vectors for {} inputs",
                    self.inner.model_name(),
                    fresh.len(),
                    batch.len()
                );
            }

            let mut cache = self
                .cache
                .write()
                .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
            if cache.len() + fresh.len() > self.capacity {
                cache.clear();
            }
            for (&i, vec) in missing.iter().zip(fresh) {
                check_dims(self.inner.dims(), vec.len())?;
                cache.insert(keys[i].clone(), vec.clone());
                out[i] = Some(vec);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docgate_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
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

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero vector.
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

    dot / denom
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
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(384, 384).is_ok());
        assert_eq!(
            check_dims(384, 768),
            Err(PipelineError::DimensionMismatch {
                expected: 384,
                actual: 768
            })
        );
    }

    #[test]
    fn test_hashing_embedder_self_similarity() {
        let e = HashingEmbedder::new(256);
        let text = "Pump P-101 bearing temperature exceeded alarm limit";
        let a = e.embed_text(text);
        let b = e.embed_text(text);
        assert_eq!(a.len(), 256);
        assert!(cosine_similarity(&a, &b) >= 0.95);
    }

    #[test]
    fn test_hashing_embedder_separates_topics() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_text("pump bearing overheating");
        let near = e.embed_text("the pump bearing is overheating again");
        let far = e.embed_text("quarterly catering invoice for the cafeteria");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_text("  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_cache_avoids_recompute() {
        let inner: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(32));
        let cached = CachedEmbedder::new(inner, 100);
        let texts = vec!["alpha".to_string(), "beta".to_string()];

        let first = cached.embed_batch(&texts).await.unwrap();
        assert_eq!(cached.misses(), 2);
        let second = cached
            .embed_batch(&["beta".to_string(), "alpha".to_string()])
            .await
            .unwrap();
        assert_eq!(cached.hits(), 2);
        assert_eq!(first[0], second[1]);
        assert_eq!(first[1], second[0]);
    }

    #[tokio::test]
    async fn test_embed_one_checks_dims() {
        let e = HashingEmbedder::new(8);
        let v = embed_one(&e, "hello").await.unwrap();
        assert_eq!(v.len(), 8);
    }
}
