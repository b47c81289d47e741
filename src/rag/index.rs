use std::sync::Arc;

use async_trait::async_trait;

use super::types::{MetadataFilter, VectorMatch, VectorRecord};

/// Namespaced nearest-neighbor store keyed by opaque ids.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> anyhow::Result<()>;

    /// Matches ordered by descending score, at most `top_k`.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<VectorMatch>>;
}

pub type SharedVectorIndex = Arc<dyn VectorIndex>;
