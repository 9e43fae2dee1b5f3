// src/plate_text.rs
//
// OCR output cleanup. Anything that does not look like a plate is dropped
// here so it never reaches the consensus window.

/// Shortest accepted plate after cleanup.
pub const MIN_PLATE_LEN: usize = 8;

/// Uppercase, strip non-alphanumerics, and reject short reads or reads that
/// do not start with a letter.
pub fn normalize(raw: &str) -> Option<String> {
    normalize_with_min(raw, MIN_PLATE_LEN)
}

pub fn normalize_with_min(raw: &str, min_len: usize) -> Option<String> {
    let text: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if text.len() < min_len {
        return None;
    }
    if !text.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(text)
}
