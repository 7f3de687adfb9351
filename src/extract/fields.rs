//! Numeric field normalisation and stable listing ids.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::ops::RangeInclusive;

pub const PRICE_BOUNDS: RangeInclusive<f64> = 10_000.0..=10_000_000.0;
pub const SIZE_BOUNDS: RangeInclusive<u32> = 20..=500;

static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| build_regex(r"[^\d,.]"));
static SIZE: Lazy<Regex> = Lazy::new(|| build_regex(r"(\d+)\s*m[²q2]"));
static URL_ID: Lazy<Regex> = Lazy::new(|| build_regex(r"(?:id[-_]|/)(\d{5,})"));

pub(crate) fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid extraction regex `{}`: {}", pattern, err))
}

/// Parse a European-formatted price ("€ 250.000", "1.250,50").
///
/// Returns `None` outside [`PRICE_BOUNDS`].
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned = NON_NUMERIC.replace_all(text, "");
    let normalized = cleaned.replace('.', "").replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    let price: f64 = normalized.parse().ok()?;
    PRICE_BOUNDS.contains(&price).then_some(price)
}

/// Parse a surface in square metres ("85 m²", "120mq").
pub fn parse_size(text: &str) -> Option<u32> {
    let size: u32 = SIZE.captures(text)?.get(1)?.as_str().parse().ok()?;
    SIZE_BOUNDS.contains(&size).then_some(size)
}

pub fn price_per_sqm(price: Option<f64>, size: Option<u32>) -> Option<f64> {
    match (price, size) {
        (Some(price), Some(size)) if size > 0 => Some((price / f64::from(size) * 100.0).round() / 100.0),
        _ => None,
    }
}

/// Deterministic id for a listing URL: the numeric id embedded in the URL
/// when there is one, otherwise a short SHA-256 of the URL.
pub fn external_id(platform: &str, url: &str) -> String {
    if let Some(id) = URL_ID.captures(url).and_then(|caps| caps.get(1)) {
        return format!("{platform}_{}", id.as_str());
    }
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{platform}_{}", &digest[..10])
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_outside_bounds_are_rejected() {
        assert_eq!(parse_price("€ 250.000"), Some(250_000.0));
        assert_eq!(parse_price("1.250.000,50 €"), Some(1_250_000.5));
        assert_eq!(parse_price("€ 9.999"), None);
        assert_eq!(parse_price("€ 12.000.000"), None);
        assert_eq!(parse_price("Prezzo su richiesta"), None);
    }

    #[test]
    fn sizes_outside_bounds_are_rejected() {
        assert_eq!(parse_size("85 m²"), Some(85));
        assert_eq!(parse_size("120mq"), Some(120));
        assert_eq!(parse_size("15 mq"), None);
        assert_eq!(parse_size("900 m2"), None);
        assert_eq!(parse_size("3 locali"), None);
    }

    #[test]
    fn per_sqm_price_is_rounded() {
        assert_eq!(price_per_sqm(Some(100_000.0), Some(30)), Some(3333.33));
        assert_eq!(price_per_sqm(None, Some(30)), None);
    }

    #[test]
    fn ids_prefer_numeric_url_segment() {
        assert_eq!(
            external_id("casa_it", "https://www.casa.it/immobili/47123456/"),
            "casa_it_47123456"
        );
        let hashed = external_id("casa_it", "https://www.casa.it/vendita/residenziale/roma/attico");
        assert_eq!(hashed.len(), "casa_it_".len() + 10);
        assert_eq!(
            hashed,
            external_id("casa_it", "https://www.casa.it/vendita/residenziale/roma/attico")
        );
    }
}
