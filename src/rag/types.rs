use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arbitrary key/value metadata carried by vectors.
pub type Metadata = Map<String, Value>;

pub const TEXT_KEY: &str = "text";
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
pub const FILENAME_KEY: &str = "filename";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Equality predicate over metadata keys; every entry must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter(pub Metadata);

impl MetadataFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(key.into(), value.into());
        Self(map)
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| metadata.get(key).is_some_and(|v| values_equal(v, expected)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Numbers compare by value so `1` and `1.0` match like they do in the hosted index.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// A fragment of a source document, ready to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub chunk_index: usize,
    pub text: String,
    pub metadata: Metadata,
}

/// Retrieved context, highest score first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedSnippet {
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl RetrievedSnippet {
    /// Where the snippet came from; anything without a filename is a memory.
    pub fn source(&self) -> &str {
        self.metadata
            .get(FILENAME_KEY)
            .and_then(Value::as_str)
            .unwrap_or("memory")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub chunks: usize,
    pub embedded: usize,
    pub upserted: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn metadata(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn filters_require_every_key_to_match() {
        let filter = MetadataFilter::equals("project_id", 3);
        assert!(filter.matches(&metadata(json!({"project_id": 3, "filename": "a.md"}))));
        assert!(filter.matches(&metadata(json!({"project_id": 3.0}))));
        assert!(!filter.matches(&metadata(json!({"project_id": 4}))));
        assert!(!filter.matches(&metadata(json!({"filename": "a.md"}))));
        assert!(MetadataFilter::default().matches(&Metadata::new()));
    }

    #[test]
    fn snippet_source_falls_back_to_memory() {
        let file = RetrievedSnippet {
            text: "x".into(),
            score: 0.5,
            metadata: metadata(json!({"filename": "notes.md"})),
        };
        let memory = RetrievedSnippet {
            metadata: Metadata::new(),
            ..file.clone()
        };
        assert_eq!(file.source(), "notes.md");
        assert_eq!(memory.source(), "memory");
    }
}
