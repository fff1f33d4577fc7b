//! Text normalization and path-safe names.

/// Normalize a key field for hashing: trim, lowercase, collapse whitespace.
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

const MAX_FILENAME_CHARS: usize = 100;

/// Sanitize a filename for filesystem use.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_').trim_start_matches('.');
    if trimmed.is_empty() {
        return "file".to_string();
    }

    // Truncate on char boundaries, keeping the extension when there is one
    if trimmed.chars().count() <= MAX_FILENAME_CHARS {
        return trimmed.to_string();
    }
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if ext.chars().count() <= 10 => {
            let keep = MAX_FILENAME_CHARS - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{}.{}", stem, ext)
        }
        _ => trimmed.chars().take(MAX_FILENAME_CHARS).collect(),
    }
}

/// Sanitize one object-key segment: like [`sanitize_filename`], and also
/// collapses whitespace to `_` and rejects `.`/`..`.
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned = sanitize_filename(&segment.split_whitespace().collect::<Vec<_>>().join("_"));
    match cleaned.as_str() {
        "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
