//! Deterministic query feature extraction.
//!
//! Before any connector is scheduled, the raw query is reduced to a small set
//! of signals (category search, geographic intent, domain hints) that gating
//! conditions can test. Extraction is pure: the same query (after
//! normalization) and request always yield an identical [`QueryFeatures`].

mod lexicon;

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ingestkit_shared::{IngestMode, IngestRequest};

// ---------------------------------------------------------------------------
// QueryFeatures
// ---------------------------------------------------------------------------

/// Signals derived from a query. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFeatures {
    /// Case-folded, trimmed, whitespace-collapsed query.
    pub normalized_query: String,
    /// True when the query carried no usable text.
    pub is_empty: bool,
    pub token_count: usize,
    /// The query describes a kind of thing rather than one named entity.
    pub looks_like_category_search: bool,
    pub has_geo_intent: bool,
    /// Place text following `in` / `near` / `around` / `within`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_hint: Option<String>,
    pub has_coordinates: bool,
    /// Inline `lat, lon` pair found in the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<[f64; 2]>,
    /// Domains whose keywords appear in the query, sorted.
    pub domain_hints: BTreeSet<String>,
    /// The run should aim for many entities.
    pub wants_many: bool,
}

impl QueryFeatures {
    /// The "no signal" value returned for empty or whitespace-only queries.
    pub fn empty() -> Self {
        Self {
            normalized_query: String::new(),
            is_empty: true,
            token_count: 0,
            looks_like_category_search: false,
            has_geo_intent: false,
            geo_hint: None,
            has_coordinates: false,
            coordinates: None,
            domain_hints: BTreeSet::new(),
            wants_many: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Trailing `in <place>`, `near <place>`, ...
static GEO_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:in|near|around|within)\s+([a-z0-9][a-z0-9 ,.'-]*)$").expect("geo regex")
});

/// Inline decimal coordinate pair, e.g. `51.5072, -0.1276`.
static COORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d{1,2}(?:\.\d+)?)\s*,\s*(-?\d{1,3}(?:\.\d+)?)").expect("coords regex")
});

/// Phrase markers that cannot be matched token by token.
static LIST_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:list of|places to|where to)\b").expect("list regex"));

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Case-fold, trim, and collapse internal whitespace runs to one space.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive [`QueryFeatures`] from a raw query and, optionally, the request.
///
/// Never fails: empty input produces [`QueryFeatures::empty`].
pub fn extract(query: &str, request: Option<&IngestRequest>) -> QueryFeatures {
    let normalized = normalize_query(query);
    let discover_many = request.is_some_and(|r| r.mode == IngestMode::DiscoverMany);

    if normalized.is_empty() {
        return QueryFeatures {
            wants_many: discover_many,
            ..QueryFeatures::empty()
        };
    }

    let quoted = normalized.contains('"');
    let tokens: Vec<&str> = normalized
        .split(|c: char| c.is_whitespace() || c == ',' || c == '"')
        .filter(|t| !t.is_empty())
        .collect();

    // --- Geography ---
    let coordinates = COORDS_RE.captures(&normalized).and_then(|caps| {
        let lat: f64 = caps[1].parse().ok()?;
        let lon: f64 = caps[2].parse().ok()?;
        ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some([lat, lon])
    });

    let near_me = normalized.ends_with("near me") || normalized.contains(" near me ");
    let geo_hint = GEO_SUFFIX_RE
        .captures(&normalized)
        .map(|caps| caps[1].trim().trim_end_matches(',').to_string())
        .filter(|place| place != "me" && !place.is_empty() && COORDS_RE.find(place).is_none());

    let has_geo_intent = near_me || geo_hint.is_some() || coordinates.is_some();

    // --- Domains and plurality ---
    let mut domain_hints = BTreeSet::new();
    let mut plural_domain_word = false;

    for token in &tokens {
        if let Some(domain) = lexicon::domain_of(token) {
            domain_hints.insert(domain.to_string());
            continue;
        }
        if let Some(stem) = lexicon::singular(token) {
            if let Some(domain) = lexicon::domain_of(&stem) {
                domain_hints.insert(domain.to_string());
                plural_domain_word = true;
            }
        }
    }

    let has_marker = tokens.iter().any(|t| lexicon::CATEGORY_MARKERS.contains(t))
        || LIST_OF_RE.is_match(&normalized);

    let looks_like_category_search = !quoted && (has_marker || plural_domain_word);

    let features = QueryFeatures {
        token_count: tokens.len(),
        is_empty: false,
        looks_like_category_search,
        has_geo_intent,
        geo_hint,
        has_coordinates: coordinates.is_some(),
        coordinates,
        domain_hints,
        wants_many: looks_like_category_search || discover_many,
        normalized_query: normalized,
    };

    debug!(
        query = %features.normalized_query,
        category = features.looks_like_category_search,
        geo = features.has_geo_intent,
        domains = ?features.domain_hints,
        "query features extracted"
    );

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_queries_have_no_signal() {
        assert_eq!(extract("", None), QueryFeatures::empty());
        assert_eq!(extract("   \t\n ", None), QueryFeatures::empty());
    }

    #[test]
    fn empty_query_still_reflects_discover_many_request() {
        let req = IngestRequest::discover_many("");
        let f = extract("", Some(&req));
        assert!(f.is_empty);
        assert!(f.wants_many);
    }

    #[test]
    fn normalization_makes_equivalent_queries_identical() {
        let a = extract("  Padel COURTS   in Leeds ", None);
        let b = extract("padel courts in leeds", None);
        assert_eq!(a, b);
        assert_eq!(a.normalized_query, "padel courts in leeds");
    }

    #[test]
    fn category_search_with_place() {
        let f = extract("padel courts in leeds", None);
        assert!(f.looks_like_category_search);
        assert!(f.has_geo_intent);
        assert_eq!(f.geo_hint.as_deref(), Some("leeds"));
        assert!(f.domain_hints.contains("sports"));
        assert!(f.wants_many);
        assert_eq!(f.token_count, 4);
    }

    #[test]
    fn named_entity_is_not_a_category_search() {
        let f = extract("The Crown Inn, Harrogate", None);
        assert!(!f.looks_like_category_search);
        assert!(f.domain_hints.contains("lodging"));
        assert!(!f.has_geo_intent);
        assert!(!f.wants_many);
    }

    #[test]
    fn quoted_name_suppresses_category() {
        let f = extract("\"Best Bakeries Ltd\"", None);
        assert!(!f.looks_like_category_search);
        assert!(f.domain_hints.contains("food"));
    }

    #[test]
    fn near_me_is_geo_without_hint() {
        let f = extract("best coffee near me", None);
        assert!(f.has_geo_intent);
        assert!(f.geo_hint.is_none());
        assert!(f.looks_like_category_search);
    }

    #[test]
    fn coordinates_detected() {
        let f = extract("clinic at 53.8008, -1.5491", None);
        assert!(f.has_coordinates);
        assert_eq!(f.coordinates, Some([53.8008, -1.5491]));
        assert!(f.has_geo_intent);
    }

    #[test]
    fn out_of_range_coordinates_ignored() {
        let f = extract("order 99.5, 300.1", None);
        assert!(!f.has_coordinates);
    }

    #[test]
    fn features_serialize_for_conditions() {
        let f = extract("top hotels in york", None);
        let json = serde_json::to_value(&f).expect("serialize");
        assert_eq!(json["has_geo_intent"], true);
        assert_eq!(json["domain_hints"][0], "lodging");
    }
}
