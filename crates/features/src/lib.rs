//! String similarity kernel for person-name comparison.
//!
//! Provides pure functions for computing features used in scoring:
//! - Name normalization (diacritics, case, whitespace)
//! - Levenshtein edit distance
//! - Percentage similarity and threshold checks
//! - Date proximity

use chrono::NaiveDate;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a name for comparison.
///
/// Decomposes to NFD and drops combining marks so that "José" and "Jose"
/// compare equal, lowercases, and collapses runs of whitespace.
pub fn normalize_name(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute Levenshtein edit distance between two names.
///
/// Both inputs are normalized first, so the result is case-, accent- and
/// surrounding-whitespace-insensitive.
pub fn edit_distance(s1: &str, s2: &str) -> usize {
    let s1: Vec<char> = normalize_name(s1).chars().collect();
    let s2: Vec<char> = normalize_name(s2).chars().collect();
    let len1 = s1.len();
    let len2 = s2.len();

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate() {
        *cell = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1[i - 1] == s2[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[len1][len2]
}

/// Percentage similarity (0.0 - 100.0) derived from edit distance.
///
/// Two empty names are identical (100.0).
pub fn similarity(s1: &str, s2: &str) -> f64 {
    let max_len = normalize_name(s1)
        .chars()
        .count()
        .max(normalize_name(s2).chars().count());

    if max_len == 0 {
        return 100.0;
    }

    let distance = edit_distance(s1, s2);
    100.0 * (max_len - distance) as f64 / max_len as f64
}

/// Check whether two names are within `max_distance` edits of each other.
pub fn is_similar(s1: &str, s2: &str, max_distance: usize) -> bool {
    edit_distance(s1, s2) <= max_distance
}

/// Check whether two names are equal after normalization.
pub fn names_equal(s1: &str, s2: &str) -> bool {
    normalize_name(s1) == normalize_name(s2)
}

/// Absolute number of days between two dates.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  José   María  "), "jose maria");
        assert_eq!(normalize_name("NÚÑEZ"), "nunez");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("Juan", "Juan"), 0);
        assert_eq!(edit_distance("Juan", "Jhuan"), 1);
        assert!(edit_distance("Pedro", "María") >= 4);
        assert_eq!(edit_distance("", "Perez"), 5);
        assert_eq!(edit_distance("Perez", ""), 5);
    }

    #[test]
    fn test_edit_distance_ignores_case_and_accents() {
        assert_eq!(edit_distance("GONZÁLEZ", "gonzalez"), 0);
        assert_eq!(edit_distance(" Ana ", "ana"), 0);
    }

    #[test]
    fn test_edit_distance_symmetric() {
        let pairs = [("Juan", "Jhuan"), ("Sofía", "Sofi"), ("Benítez", "Venites"), ("", "x")];
        for (a, b) in pairs {
            assert_eq!(edit_distance(a, b), edit_distance(b, a), "{a} / {b}");
        }
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("", ""), 100.0);
        assert_eq!(similarity("Martina", "martina"), 100.0);
        assert_eq!(similarity("Juan", "Jhuan"), 80.0);
        assert_eq!(similarity("", "Ana"), 0.0);
        assert!(similarity("Juan", "Juana") < 100.0);
    }

    #[test]
    fn test_is_similar() {
        assert!(is_similar("Juan", "Jhuan", 1));
        assert!(!is_similar("Juan", "Pedro", 2));
    }

    #[test]
    fn test_days_between() {
        let a = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2016, 1, 1).unwrap();
        assert_eq!(days_between(a, b), 365);
        assert_eq!(days_between(b, a), 365);
    }
}
