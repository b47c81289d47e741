use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;

use super::embed::EmbeddingsProvider;
use super::index::VectorIndex;
use super::types::{MetadataFilter, VectorMatch, VectorRecord};

/// Process-local vector index with brute-force cosine search.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: Mutex<HashMap<String, Vec<VectorRecord>>>,
}

#[cfg(test)]
impl InMemoryVectorIndex {
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .lock()
            .map(|namespaces| namespaces.get(namespace).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let mut namespaces = self
            .namespaces
            .lock()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        let stored = namespaces.entry(namespace.to_string()).or_default();

        for record in records {
            match stored.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<VectorMatch>> {
        let namespaces = self
            .namespaces
            .lock()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))?;
        let Some(stored) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = stored
            .iter()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.metadata)))
            .map(|record| VectorMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: record.metadata.clone(),
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic bag-of-words embeddings for offline runs: each lowercase token is
/// hashed into one of `dim` buckets.
#[derive(Debug, Clone)]
pub struct HashedEmbeddings {
    dim: usize,
}

impl HashedEmbeddings {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

#[async_trait]
impl EmbeddingsProvider for HashedEmbeddings {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&hash.as_bytes()[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dim as u64) as usize;
            vector[slot] += 1.0;
        }

        anyhow::ensure!(
            vector.iter().any(|v| *v != 0.0),
            "text has no tokens to embed"
        );
        Ok(vector)
    }
}
