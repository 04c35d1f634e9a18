//! Text normalization shared by indexing and querying.

use std::collections::BTreeSet;

/// Split text into lowercase alphanumeric tokens.
///
/// Punctuation and whitespace are separators; empty fragments are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Distinct tokens of `text`, in lexical order.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}
