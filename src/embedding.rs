//! Text embeddings.
//!
//! The retriever only needs a deterministic text-to-vector function with a
//! fixed dimension; [`HashingEmbedder`] provides one without any model
//! download by hashing word frequencies into a dense vector.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::AppError;

/// Words too common in investigation questions to carry signal.
const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "by", "did", "do", "does", "for",
    "from", "give", "has", "have", "how", "in", "is", "it", "its", "list", "me", "my", "of", "on",
    "or", "show", "tell", "that", "the", "there", "these", "this", "those", "to", "was", "were",
    "what", "when", "where", "which", "who", "with",
];

/// Computes text embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    /// Dimension of the vectors produced.
    fn dimensions(&self) -> usize;
}

/// Deterministic bag-of-words embedding.
///
/// Each distinct term adds its term frequency at three hashed positions
/// (weights 1.0, 0.7, 0.5); the result is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

/// Lower-cased alphanumeric terms, without stop words and single characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Embedding("cannot embed empty text".into()));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        let words = tokenize(text);
        if words.is_empty() {
            return Ok(vector);
        }

        // Ordered map keeps float accumulation order stable across runs
        let mut freq: BTreeMap<&str, f32> = BTreeMap::new();
        for word in &words {
            *freq.entry(word.as_str()).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            let bytes = word.as_bytes();
            let h1 = fnv1a(bytes) as usize;
            let h2 = fnv1a(&[bytes, &[1u8]].concat()) as usize;
            let h3 = fnv1a(&[bytes, &[2u8]].concat()) as usize;

            vector[h1 % self.dimensions] += tf;
            vector[h2 % self.dimensions] += tf * 0.7;
            vector[h3 % self.dimensions] += tf * 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// FNV-1a, 32 bit.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Cosine similarity; zero for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dimension_and_normalization() {
        let embedder = HashingEmbedder::new(128);
        let v = embedder.embed("failed login from 10.0.0.5").await.unwrap();
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let embedder = HashingEmbedder::default();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(AppError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("critical nginx vulnerability").await.unwrap();
        let b = embedder.embed("critical nginx vulnerability").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_terms_score_higher() {
        let embedder = HashingEmbedder::default();
        let q = embedder.embed("failed login attempts").await.unwrap();
        let hit = embedder
            .embed("Login attempt by alice (failed)")
            .await
            .unwrap();
        let miss = embedder.embed("Role administrators").await.unwrap();
        assert!(cosine_similarity(&q, &hit) > cosine_similarity(&q, &miss));
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        assert_eq!(
            tokenize("Which assets are affected by critical CVEs?"),
            vec!["assets", "affected", "critical", "cves"]
        );
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
