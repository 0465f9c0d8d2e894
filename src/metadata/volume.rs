//! Comic volume/issue normalization.
//!
//! Trailing `#7`, `v07`, `Vol. 7` and `Volume 7` all become ` v7`.

use regex::Regex;
use std::sync::LazyLock;

static VOLUME_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*?)[\s,\-]*(?:#|\bv(?:ol(?:ume)?)?\.?)\s*0*(\d+)(\.\d+)?\s*$").unwrap()
});

/// Rewrite a trailing volume marker into the canonical `Title vN` form.
///
/// Titles without a marker, or that are nothing but a marker, come back
/// unchanged.
pub fn normalize_volume(title: &str) -> String {
    let Some(caps) = VOLUME_SUFFIX.captures(title) else {
        return title.to_string();
    };

    let prefix = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    if prefix.is_empty() {
        return title.to_string();
    }

    let whole = caps.get(2).map(|m| m.as_str()).unwrap_or("0");
    let fraction = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    format!("{prefix} v{whole}{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_issue() {
        assert_eq!(normalize_volume("Saga #001"), "Saga v1");
    }

    #[test]
    fn test_vol_variants() {
        assert_eq!(normalize_volume("Saga v02"), "Saga v2");
        assert_eq!(normalize_volume("Saga Vol. 3"), "Saga v3");
        assert_eq!(normalize_volume("Saga vol 4"), "Saga v4");
        assert_eq!(normalize_volume("Saga Volume 12"), "Saga v12");
        assert_eq!(normalize_volume("Saga - Volume 5.5"), "Saga v5.5");
    }

    #[test]
    fn test_zero_volume_keeps_digit() {
        assert_eq!(normalize_volume("Prelude #0"), "Prelude v0");
    }

    #[test]
    fn test_untouched_titles() {
        assert_eq!(normalize_volume("Catch 22"), "Catch 22");
        assert_eq!(normalize_volume("Watchmen"), "Watchmen");
        assert_eq!(normalize_volume("#5"), "#5");
        assert_eq!(normalize_volume("Nav 3"), "Nav 3");
    }
}
