//! Dotted version numbers.
//!
//! A version is a `.`-separated list of non-negative integers of any length,
//! optionally prefixed with `v`. Missing trailing components count as zero, so
//! `1.2` and `1.2.0` are equal. A component that is not a number counts as zero.

use std::cmp::Ordering;

/// Leading digits of each component with leading zeros stripped, so that
/// numbers of any size compare by length, then lexically. Zero is `""`.
fn components(version: &str) -> Vec<&str> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('.')
        .map(|part| {
            let end = part
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(part.len());
            part[..end].trim_start_matches('0')
        })
        .collect()
}

fn compare_component(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = components(a);
    let b = components(b);
    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).copied().unwrap_or("");
        let right = b.get(i).copied().unwrap_or("");
        match compare_component(left, right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Strictly newer.
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

/// `version` is at least `minimum`.
pub fn version_satisfies(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_zeros_are_equal() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.0.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2.0", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert!(is_newer_version("1.10.0", "1.9.9"));
        assert!(!is_newer_version("1.9.9", "1.10.0"));
        assert!(is_newer_version("2", "1.99.99"));
        assert!(!is_newer_version("1.0.0", "1.0.0"));
    }

    #[test]
    fn test_components_of_any_size() {
        assert!(is_newer_version("99999999999999999999.0", "1.0"));
        assert!(is_newer_version("1.99999999999999999999", "1.18446744073709551615"));
        assert_eq!(compare_versions("1.007", "1.7"), Ordering::Equal);
        assert_eq!(compare_versions("1.0rc", "1"), Ordering::Equal);
    }

    #[test]
    fn test_order_is_consistent() {
        let versions = ["0.9", "1", "1.0.1", "1.2", "v1.2.0", "1.10", "2.0.0.1"];
        for a in versions {
            assert_eq!(compare_versions(a, a), Ordering::Equal);
            for b in versions {
                assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse());
                for c in versions {
                    if compare_versions(a, b) != Ordering::Greater
                        && compare_versions(b, c) != Ordering::Greater
                    {
                        assert_ne!(compare_versions(a, c), Ordering::Greater, "{a} {b} {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_version_satisfies_minimum() {
        assert!(version_satisfies("1.2.0", "1.2"));
        assert!(version_satisfies("1.3", "1.2.9"));
        assert!(!version_satisfies("1.1.9", "1.2"));
    }
}
