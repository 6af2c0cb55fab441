//! Small string helpers shared across modules

/// Truncate `text` to at most `max_chars` characters, respecting char boundaries
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
