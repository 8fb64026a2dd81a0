//! Tokenization and top-K word-frequency reduction

use std::collections::HashMap;

/// Compute the `k` most frequent tokens in `text`
///
/// Tokenization is case-insensitive and word-character based: runs of
/// alphanumerics and underscores, split on everything else. Results are
/// ordered by descending count; ties break toward the token that appeared
/// first in the text.
pub fn top_k_words(text: &str, k: usize) -> Vec<(String, u64)> {
    if k == 0 {
        return Vec::new();
    }

    let mut counts: HashMap<String, (u64, usize)> = HashMap::new();
    let mut order = 0usize;

    for token in tokens(text) {
        let entry = counts.entry(token).or_insert((0, order));
        entry.0 += 1;
        order += 1;
    }

    let mut ranked: Vec<(String, u64, usize)> = counts
        .into_iter()
        .map(|(token, (count, first_seen))| (token, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(k);

    ranked
        .into_iter()
        .map(|(token, count, _)| (token, count))
        .collect()
}

/// Iterate lowercase word tokens of `text`
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
