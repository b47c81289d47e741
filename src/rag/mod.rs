pub mod chunk;
pub mod config;
pub mod embed;
pub mod extract;
pub mod index;
pub mod mock;
pub mod pinecone;
pub mod pipeline;
pub mod types;

pub use config::{RagConfig, VectorIndexConfig};
pub use extract::{Extracted, PlainTextExtractor, TextExtractor};
pub use pinecone::PineconeClient;
pub use pipeline::{
    build_retriever_from_env, format_context_block, ContextRetriever, SharedRetriever,
};
pub use types::{Metadata, MetadataFilter};
