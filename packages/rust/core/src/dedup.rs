//! Tiered dedup-key generation.
//!
//! Keys depend only on candidate data, never on call order, time, or object
//! identity, so the same candidate yields the same key in every run.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use ingestkit_shared::Candidate;

/// Decimal places coordinates are rounded to before keying.
const GEO_PRECISION: i32 = 4;

/// Which identity signal produced a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupTier {
    StrongId,
    Geo,
    ContentHash,
}

/// Case-fold, trim, and collapse internal whitespace runs to one space.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generate the dedup key for a candidate. First matching tier wins.
pub fn dedup_key(candidate: &Candidate) -> String {
    dedup_key_with_tier(candidate).0
}

/// Like [`dedup_key`], also reporting the tier used.
pub fn dedup_key_with_tier(candidate: &Candidate) -> (String, DedupTier) {
    // Tier 1: lexicographically first provider with a usable id. Ids are
    // keyed trimmed, so " 42" and "42" from the same provider collide.
    // TODO: replace the alphabetical choice with a declared provider priority list.
    if let Some((provider, id)) = candidate
        .identifiers
        .iter()
        .find(|(_, id)| !id.trim().is_empty())
    {
        return (format!("id:{provider}:{}", id.trim()), DedupTier::StrongId);
    }

    let name = normalize_name(&candidate.name);

    // Tier 2: presence check, not truthiness; (0.0, 0.0) is a real place.
    if let (Some(lat), Some(lon)) = (candidate.latitude, candidate.longitude) {
        return (
            format!("geo:{name}:{}:{}", round_coord(lat), round_coord(lon)),
            DedupTier::Geo,
        );
    }

    // Tier 3: digest over a key-sorted canonical serialization.
    (format!("hash:{}", content_digest(candidate, &name)), DedupTier::ContentHash)
}

/// Round to [`GEO_PRECISION`] places and format with a fixed width,
/// folding negative zero into zero.
fn round_coord(value: f64) -> String {
    let factor = 10f64.powi(GEO_PRECISION);
    let mut rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        rounded = 0.0;
    }
    format!("{rounded:.4}")
}

fn content_digest(candidate: &Candidate, normalized_name: &str) -> String {
    let mut canonical: BTreeMap<&str, Value> = BTreeMap::new();
    canonical.insert("name", Value::String(normalized_name.to_string()));
    canonical.insert("identifiers", serde_json::json!(candidate.identifiers));
    canonical.insert("attributes", serde_json::json!(candidate.attributes));
    if let Some(lat) = candidate.latitude {
        canonical.insert("latitude", Value::String(round_coord(lat)));
    }
    if let Some(lon) = candidate.longitude {
        canonical.insert("longitude", Value::String(round_coord(lon)));
    }

    // BTreeMap keys serialize in sorted order; so do nested serde_json maps.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_name("  The   CROWN\tInn "), "the crown inn");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn strong_id_uses_first_provider_alphabetically() {
        let c = Candidate::named("Leeds Padel")
            .with_identifier("osm", "node/42")
            .with_identifier("google", "ChIJ123");
        assert_eq!(
            dedup_key_with_tier(&c),
            ("id:google:ChIJ123".to_string(), DedupTier::StrongId)
        );
    }

    #[test]
    fn strong_id_value_is_trimmed() {
        let padded = Candidate::named("Leeds Padel").with_identifier("osm", " node/42 ");
        let plain = Candidate::named("Leeds Padel").with_identifier("osm", "node/42");
        assert_eq!(dedup_key(&padded), "id:osm:node/42");
        assert_eq!(dedup_key(&padded), dedup_key(&plain));
    }

    #[test]
    fn blank_identifier_is_skipped() {
        let c = Candidate::named("Leeds Padel")
            .with_identifier("a_provider", "  ")
            .with_identifier("osm", "node/42");
        assert_eq!(dedup_key(&c), "id:osm:node/42");
    }

    #[test]
    fn zero_coordinates_use_geo_tier() {
        let c = Candidate::named("Null Island Cafe").with_coordinates(0.0, 0.0);
        assert_eq!(
            dedup_key_with_tier(&c),
            ("geo:null island cafe:0.0000:0.0000".to_string(), DedupTier::Geo)
        );
    }

    #[test]
    fn geo_rounding_to_four_places() {
        let a = Candidate::named("Cafe").with_coordinates(53.800_81, -1.549_14);
        let b = Candidate::named(" CAFE ").with_coordinates(53.800_79, -1.549_06);
        assert_eq!(dedup_key(&a), "geo:cafe:53.8008:-1.5491");
        assert_eq!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn negative_zero_folds_into_zero() {
        let a = Candidate::named("x").with_coordinates(-0.000_01, 0.0);
        assert_eq!(dedup_key(&a), "geo:x:0.0000:0.0000");
    }

    #[test]
    fn single_coordinate_falls_through_to_hash() {
        let mut c = Candidate::named("Half Located");
        c.latitude = Some(10.0);
        let (key, tier) = dedup_key_with_tier(&c);
        assert_eq!(tier, DedupTier::ContentHash);
        assert!(key.starts_with("hash:"));
        assert_eq!(key.len(), "hash:".len() + 64);
    }

    #[test]
    fn hash_is_stable_and_ignores_source_and_confidence() {
        let a = Candidate::named("Corner Shop")
            .with_attribute("phone", json!("0113 000"))
            .with_attribute("address", json!({"street": "1 Main St", "city": "Leeds"}));
        let mut b = Candidate::named("corner   shop")
            .with_attribute("address", json!({"city": "Leeds", "street": "1 Main St"}))
            .with_attribute("phone", json!("0113 000"))
            .with_confidence(0.4);
        b.source = Some("other_connector".into());

        assert_eq!(dedup_key(&a), dedup_key(&b));
        // Same input, repeated calls: identical key.
        assert_eq!(dedup_key(&a), dedup_key(&a.clone()));
    }

    #[test]
    fn hash_differs_on_attribute_change() {
        let a = Candidate::named("Corner Shop").with_attribute("phone", json!("1"));
        let b = Candidate::named("Corner Shop").with_attribute("phone", json!("2"));
        assert_ne!(dedup_key(&a), dedup_key(&b));
    }
}
