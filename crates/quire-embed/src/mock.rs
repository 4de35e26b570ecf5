//! Deterministic embedder for tests and offline use.

use async_trait::async_trait;

use crate::{Embedder, Result};

/// Bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimensions`
/// buckets and the result is normalized to unit length. Texts that share
/// words therefore end up close together, which is enough to exercise
/// ranking without a real model. Queries and passages embed identically.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (simple_hash(&token.to_lowercase()) % self.dimensions as u64) as usize;
            embedding[bucket] += 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// djb2.
fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedder_unit_length() {
        let embedder = MockEmbedder::default();
        let embedding = embedder.embed_passage("hello world").await.unwrap();
        assert_eq!(embedding.len(), 384);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::default();
        let e1 = embedder.embed_passage("test text").await.unwrap();
        let e2 = embedder.embed_query("test text").await.unwrap();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = MockEmbedder::new(64);
        let query = embedder.embed_query("rust borrow checker").await.unwrap();
        let near = embedder
            .embed_passage("notes on the rust borrow checker")
            .await
            .unwrap();
        let far = embedder
            .embed_passage("grocery list: apples, bread")
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = MockEmbedder::new(8);
        let e = embedder.embed_passage("  ").await.unwrap();
        assert!(e.iter().all(|x| *x == 0.0));
    }
}
