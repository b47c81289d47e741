/// Window length in characters.
pub const CHUNK_CHARS: usize = 500;
/// Characters shared by consecutive windows.
pub const OVERLAP_CHARS: usize = 50;

/// Split `content` into windows of `chunk_chars` characters, each starting
/// `chunk_chars - overlap_chars` after the previous one. The last window ends at the
/// end of the text; empty text yields no windows.
pub fn chunk_with_overlap(content: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    if chunk_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = content.chars().collect();
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());

        if end == chars.len() {
            break;
        }

        start += step;
    }

    chunks
}
