/// Characters that close a sentence in either Latin or CJK text.
const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Trim surrounding whitespace. Returns `None` when nothing is left.
pub fn normalize_text(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Returns `true` if the text ends with sentence-final punctuation.
pub fn ends_with_terminal(text: &str) -> bool {
    text.ends_with(TERMINAL_PUNCTUATION)
}

/// Returns `true` if the text contains sentence-final punctuation anywhere.
pub fn contains_terminal(text: &str) -> bool {
    text.contains(TERMINAL_PUNCTUATION)
}

/// Shorten text for log fields to at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}
