use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub embedding_api_key: String,
    pub embedding_base_url: Option<String>,
    pub embedding_model: String,
    pub vector_dim: usize,
    pub namespace: String,
    pub top_k: usize,
}

impl RagConfig {
    const EMBEDDING_KEY_VARS: [&'static str; 3] = [
        "JARVIS_EMBEDDING_API_KEY",
        "JARVIS_LLM_API_KEY",
        "OPENAI_API_KEY",
    ];
    const EMBEDDING_BASE_URL_VARS: [&'static str; 3] = [
        "JARVIS_EMBEDDING_BASE_URL",
        "JARVIS_LLM_BASE_URL",
        "OPENAI_BASE_URL",
    ];
    const EMBEDDING_MODEL_VARS: [&'static str; 2] = ["JARVIS_EMBEDDING_MODEL", "EMBEDDING_MODEL"];
    const VECTOR_DIM_VARS: [&'static str; 1] = ["JARVIS_VECTOR_DIM"];

    pub const DEFAULT_NAMESPACE: &'static str = "default";
    pub const DEFAULT_TOP_K: usize = 5;

    pub fn from_env() -> Self {
        let embedding_api_key =
            Self::read_env(&Self::EMBEDDING_KEY_VARS).unwrap_or_else(|| "ollama".to_string());
        let embedding_model = Self::read_env(&Self::EMBEDDING_MODEL_VARS)
            .unwrap_or_else(|| "nomic-embed-text".to_string());
        let vector_dim: usize = Self::read_env(&Self::VECTOR_DIM_VARS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(768);

        Self {
            embedding_api_key,
            embedding_base_url: Self::read_env(&Self::EMBEDDING_BASE_URL_VARS)
                .or_else(|| Some("http://localhost:11434/v1".to_string())),
            embedding_model,
            vector_dim,
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            top_k: Self::DEFAULT_TOP_K,
        }
    }

    pub(crate) fn read_env(candidates: &[&'static str]) -> Option<String> {
        candidates
            .iter()
            .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
    }
}

/// Pinecone settings. Absence of an API key means retrieval runs disabled.
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub api_key: String,
    pub index_name: String,
    pub index_host: Option<String>,
    pub control_plane_url: String,
    pub region: String,
    pub http_timeout_ms: u64,
}

impl VectorIndexConfig {
    const API_KEY_VARS: [&'static str; 2] = ["PINECONE_API_KEY", "JARVIS_PINECONE_API_KEY"];
    const INDEX_NAME_VARS: [&'static str; 1] = ["PINECONE_INDEX_NAME"];
    const INDEX_HOST_VARS: [&'static str; 1] = ["PINECONE_INDEX_HOST"];
    const REGION_VARS: [&'static str; 1] = ["PINECONE_ENVIRONMENT"];
    const TIMEOUT_VARS: [&'static str; 1] = ["PINECONE_HTTP_TIMEOUT_MS"];

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = RagConfig::read_env(&Self::API_KEY_VARS)
            .context("Set PINECONE_API_KEY to enable retrieval")?;
        let http_timeout_ms = RagConfig::read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10_000);

        Ok(Self {
            api_key,
            index_name: RagConfig::read_env(&Self::INDEX_NAME_VARS)
                .unwrap_or_else(|| "jarvis-memory".to_string()),
            index_host: RagConfig::read_env(&Self::INDEX_HOST_VARS),
            control_plane_url: "https://api.pinecone.io".to_string(),
            region: RagConfig::read_env(&Self::REGION_VARS)
                .unwrap_or_else(|| "us-east-1".to_string()),
            http_timeout_ms,
        })
    }
}
