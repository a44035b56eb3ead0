//! Text normalization used by client-side search.
//!
//! Upstream sources with no native search get a substring fallback: the query
//! and the serialized document are both normalized, then matched by simple
//! containment. Normalization strips everything that is not alphanumeric so
//! that punctuation, casing, and whitespace differences never affect a match.

/// Normalize text for comparison.
///
/// Keeps alphanumeric characters only and lowercases them, in input order.
#[must_use]
pub fn normalized(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether `query` matches the rendered form of `value`.
///
/// Both sides are normalized before the containment check, so
/// `matches("helloworld", ...)` and `matches("Hello, World!", ...)` are
/// equivalent. An empty normalized query matches everything.
#[must_use]
pub fn matches(query: &str, value: impl std::fmt::Display) -> bool {
    normalized(&value.to_string()).contains(&normalized(query))
}
