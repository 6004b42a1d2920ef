//! Folder-safe identifiers for agent names.

/// Lower-case, collapse whitespace runs into one hyphen, drop anything
/// outside `[a-z0-9-]`.
pub fn sanitize_agent(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('-');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        for lower in ch.to_lowercase() {
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '-' {
                out.push(lower);
            }
        }
    }
    out
}
