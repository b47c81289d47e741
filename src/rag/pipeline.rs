use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::chunk::{chunk_with_overlap, CHUNK_CHARS, OVERLAP_CHARS};
use super::config::{RagConfig, VectorIndexConfig};
use super::embed::{OpenAiEmbeddingsClient, SharedEmbeddings};
use super::index::SharedVectorIndex;
use super::mock::{HashedEmbeddings, InMemoryVectorIndex};
use super::pinecone::PineconeClient;
use super::types::{
    DocumentChunk, IngestSummary, Metadata, MetadataFilter, RetrievedSnippet, VectorRecord,
    CHUNK_INDEX_KEY, FILENAME_KEY, TEXT_KEY,
};

pub type SharedRetriever = Arc<ContextRetriever>;

struct Backend {
    embedder: SharedEmbeddings,
    index: SharedVectorIndex,
}

/// Chunk → embed → upsert on the way in; embed → nearest neighbors on the way out.
/// Without a backend every operation is a silent no-op.
pub struct ContextRetriever {
    backend: Option<Backend>,
    chunk_chars: usize,
    overlap_chars: usize,
    batch_size: usize,
}

impl ContextRetriever {
    pub const UPSERT_BATCH_SIZE: usize = 100;

    pub fn new(embedder: SharedEmbeddings, index: SharedVectorIndex) -> Self {
        Self {
            backend: Some(Backend { embedder, index }),
            chunk_chars: CHUNK_CHARS,
            overlap_chars: OVERLAP_CHARS,
            batch_size: Self::UPSERT_BATCH_SIZE,
        }
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            chunk_chars: CHUNK_CHARS,
            overlap_chars: OVERLAP_CHARS,
            batch_size: Self::UPSERT_BATCH_SIZE,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Split a document into chunks carrying the parent metadata, `chunk_index` and `text`.
    pub fn prepare_chunks(&self, text: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        let prefix = metadata
            .get(FILENAME_KEY)
            .and_then(Value::as_str)
            .unwrap_or("doc")
            .to_string();

        chunk_with_overlap(text, self.chunk_chars, self.overlap_chars)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, chunk)| {
                let mut chunk_metadata = metadata.clone();
                chunk_metadata.insert(TEXT_KEY.to_string(), json!(chunk));
                chunk_metadata.insert(CHUNK_INDEX_KEY.to_string(), json!(chunk_index));
                let suffix = Uuid::new_v4().simple().to_string();

                DocumentChunk {
                    id: format!("{prefix}_{chunk_index}_{}", &suffix[..8]),
                    chunk_index,
                    text: chunk,
                    metadata: chunk_metadata,
                }
            })
            .collect()
    }

    /// Best effort: chunks that fail to embed are skipped and failing batches are logged.
    #[instrument(skip_all, fields(namespace = %namespace, chars = text.len()))]
    pub async fn ingest(&self, text: &str, metadata: Metadata, namespace: &str) -> IngestSummary {
        let Some(backend) = &self.backend else {
            debug!("Retrieval disabled; skipping ingest");
            return IngestSummary::default();
        };

        let chunks = self.prepare_chunks(text, &metadata);
        let mut summary = IngestSummary {
            chunks: chunks.len(),
            ..IngestSummary::default()
        };

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match backend.embedder.embed(&chunk.text).await {
                Ok(values) => records.push(VectorRecord {
                    id: chunk.id,
                    values,
                    metadata: chunk.metadata,
                }),
                Err(err) => {
                    warn!(?err, chunk_index = chunk.chunk_index, "Embedding failed; skipping chunk")
                }
            }
        }
        summary.embedded = records.len();

        for batch in records.chunks(self.batch_size) {
            match backend.index.upsert(namespace, batch.to_vec()).await {
                Ok(()) => summary.upserted += batch.len(),
                Err(err) => warn!(?err, size = batch.len(), "Vector upsert batch failed"),
            }
        }

        info!(
            chunks = summary.chunks,
            embedded = summary.embedded,
            upserted = summary.upserted,
            "Document ingested"
        );
        summary
    }

    /// Never fails: any embedding or index problem yields an empty result.
    #[instrument(skip_all, fields(namespace = %namespace, top_k))]
    pub async fn query(
        &self,
        text: &str,
        namespace: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<RetrievedSnippet> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };

        let vector = match backend.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(?err, "Query embedding failed; continuing without context");
                return Vec::new();
            }
        };

        let matches = match backend.index.query(namespace, &vector, top_k, filter).await {
            Ok(matches) => matches,
            Err(err) => {
                warn!(?err, "Vector query failed; continuing without context");
                return Vec::new();
            }
        };

        let mut snippets: Vec<RetrievedSnippet> = matches
            .into_iter()
            .map(|m| RetrievedSnippet {
                text: m
                    .metadata
                    .get(TEXT_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: m.score,
                metadata: m.metadata,
            })
            .collect();
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
        snippets.truncate(top_k);
        debug!(count = snippets.len(), "Retrieved context snippets");
        snippets
    }
}

#[cfg(test)]
impl ContextRetriever {
    pub fn with_chunking(mut self, chunk_chars: usize, overlap_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self.overlap_chars = overlap_chars.min(self.chunk_chars - 1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Context block prepended to the user's query in the prompt.
pub fn format_context_block(snippets: &[RetrievedSnippet]) -> Option<String> {
    if snippets.is_empty() {
        return None;
    }

    let mut block = String::from("\nRELEVANT CONTEXT FROM FILES/MEMORY:\n");
    for (i, snippet) in snippets.iter().enumerate() {
        block.push_str(&format!(
            "[{}] {} (Source: {})\n",
            i + 1,
            snippet.text,
            snippet.source()
        ));
    }
    block.push_str("\nEND CONTEXT\n");
    Some(block)
}

/// Build the retriever from env. Without Pinecone credentials retrieval is disabled,
/// unless an in-process index is requested.
pub async fn build_retriever_from_env(config: &RagConfig, use_memory_index: bool) -> ContextRetriever {
    if use_memory_index {
        info!("Using in-memory vector index with hashed embeddings");
        return ContextRetriever::new(
            Arc::new(HashedEmbeddings::new(config.vector_dim)),
            Arc::new(InMemoryVectorIndex::default()),
        );
    }

    let index_config = match VectorIndexConfig::from_env() {
        Ok(index_config) => index_config,
        Err(err) => {
            warn!(%err, "Vector index not configured; retrieval disabled");
            return ContextRetriever::disabled();
        }
    };

    match PineconeClient::connect(index_config, config.vector_dim).await {
        Ok(client) => ContextRetriever::new(
            Arc::new(OpenAiEmbeddingsClient::from_config(config)),
            Arc::new(client),
        ),
        Err(err) => {
            warn!(?err, "Pinecone initialization failed; retrieval disabled");
            ContextRetriever::disabled()
        }
    }
}
