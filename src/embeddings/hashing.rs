// Deterministic feature-hashing embedder
// Runs without a model server; used for offline runs, tests and benchmarks

use async_trait::async_trait;

use super::{EmbeddedBatch, EmbeddingProvider};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bag-of-identifiers embedding: each lowercase token adds weight to one hashed bucket
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed one text synchronously
    #[inline]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> crate::Result<EmbeddedBatch> {
        Ok(EmbeddedBatch {
            vectors: texts.iter().map(|text| self.embed(text)).collect(),
            failed_indices: Vec::new(),
        })
    }

    async fn embed_query(&self, text: &str) -> crate::Result<Vec<f32>> {
        Ok(self.embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_vector() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("fn main() {}"), embedder.embed("fn main() {}"));
        assert_eq!(embedder.embed("x").len(), 64);
    }

    #[test]
    fn tokens_are_case_insensitive() {
        let embedder = HashingEmbedder::new(128);
        assert_eq!(embedder.embed("Foo BAR"), embedder.embed("foo bar"));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed("  ();  ").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn batch_never_reports_failures() {
        let embedder = HashingEmbedder::new(32);
        let batch = embedder
            .embed_documents(&["a".to_string(), "b".to_string()])
            .await
            .expect("hashing never fails");
        assert_eq!(batch.vectors.len(), 2);
        assert!(batch.failed_indices.is_empty());
    }
}
