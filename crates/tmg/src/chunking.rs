/// Maximum characters in a single Discord message
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Split `text` into consecutive slices of at most `limit` characters.
///
/// Splits only on char boundaries, so concatenating the chunks gives back
/// `text` exactly. Empty input yields no chunks.
pub fn chunk_text(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (index, _) in text.char_indices() {
        if count == limit {
            chunks.push(&text[start..index]);
            start = index;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks
}
