//! Deterministic feature-hashing embedder.
//!
//! Tokens are uppercased words plus character trigrams of each word, hashed
//! with blake3 into a fixed number of buckets with a sign bit, then the vector
//! is L2-normalized. Identical text always yields an identical vector, and
//! texts sharing most tokens land close together under cosine similarity.

use crate::{EmbedResponse, EmbeddingProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let upper = text.to_uppercase();
        for word in upper
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.accumulate(&mut vector, word, 1.0);
            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 3 {
                for gram in chars.windows(3) {
                    let gram: String = gram.iter().collect();
                    self.accumulate(&mut vector, &format!("#{gram}"), 0.5);
                }
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], token: &str, weight: f32) {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&bytes[..8]);
        let idx = (u64::from_le_bytes(idx_bytes) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign * weight;
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| self.embed_one(t)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_are_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_one("Starbucks Store 123");
        let b = embedder.embed_one("STARBUCKS STORE 123");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_tokens_score_higher_than_unrelated_text() {
        let embedder = HashingEmbedder::new(256);
        let base = embedder.embed_one("DELTA AIR LINES ATLANTA");
        let near = embedder.embed_one("DELTA AIR LINES");
        let far = embedder.embed_one("WHOLE FOODS MARKET");
        assert!(cosine(&base, &near) > cosine(&base, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_one("  ").iter().all(|v| *v == 0.0));
    }
}
