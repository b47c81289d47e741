use std::path::Path;

/// Result of turning an uploaded blob into indexable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Text(String),
    Unsupported,
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, filename: &str, bytes: &[u8]) -> Extracted;
}

/// Handles UTF-8 text and source files. Rich formats (PDF, DOCX) belong to a
/// dedicated extractor and come back as `Unsupported` here.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    const BINARY_EXTENSIONS: &'static [&'static str] = &[
        "pdf", "docx", "doc", "png", "jpg", "jpeg", "gif", "zip", "gz", "mp3", "wav", "m4a",
    ];
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, filename: &str, bytes: &[u8]) -> Extracted {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if Self::BINARY_EXTENSIONS.contains(&extension.as_str()) {
            return Extracted::Unsupported;
        }

        match std::str::from_utf8(bytes) {
            Ok(text) => Extracted::Text(text.to_string()),
            Err(_) => Extracted::Unsupported,
        }
    }
}
