//! Node name normalization.

/// Normalize a configured node name into its registry key form.
///
/// Every whitespace character becomes `-` and the result is lowercased, so
/// `"Web Server"` and `"web server"` announce the same key.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .flat_map(char::to_lowercase)
        .collect()
}
