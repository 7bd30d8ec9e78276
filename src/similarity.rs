//! Fuzzy string similarity for reconciling scraped artist/track names against
//! Spotify search results.
//!
//! Scraped names routinely carry OCR/typo artifacts such as transposed
//! characters, so the edit distance counts an adjacent transposition as a
//! single operation (Damerau-Levenshtein) instead of the two a plain
//! Levenshtein metric would charge.

/// Edit distance with insertion, deletion, substitution and adjacent
/// transposition all costing 1. O(|a|*|b|) time and space.
pub fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut d = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in d.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        d[0][j] = j;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut distance = (d[i - 1][j] + 1)
                .min(d[i][j - 1] + 1)
                .min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                distance = distance.min(d[i - 2][j - 2] + 1);
            }
            d[i][j] = distance;
        }
    }

    d[n][m]
}

/// Normalized similarity in [0, 100]. 100 means identical, 0 completely
/// dissimilar; empty input scores 0 rather than erroring.
pub fn score(a: &str, b: &str) -> u32 {
    let len = a.chars().count().max(b.chars().count());
    if len == 0 || a.is_empty() || b.is_empty() {
        return 0;
    }
    let distance = damerau_levenshtein(a, b);
    (100 - (100 * distance / len).min(100)) as u32
}
