//! Static keyword lexicon used for domain hints and category detection.

/// Domain name → keywords (singular forms). Kept sorted by domain.
pub(crate) const DOMAINS: &[(&str, &[&str])] = &[
    ("education", &["school", "college", "university", "academy", "tutor", "nursery"]),
    ("food", &["restaurant", "cafe", "coffee", "bar", "pub", "bakery", "pizza", "takeaway"]),
    ("health", &["clinic", "dentist", "doctor", "pharmacy", "hospital", "physio", "optician"]),
    ("lodging", &["hotel", "hostel", "motel", "inn", "campsite", "apartment"]),
    ("retail", &["shop", "store", "market", "boutique", "supermarket", "outlet"]),
    ("services", &["plumber", "electrician", "mechanic", "garage", "salon", "barber", "locksmith"]),
    ("sports", &["gym", "court", "club", "pool", "stadium", "padel", "tennis", "football", "golf"]),
];

/// Words that signal "give me many of these" regardless of domain.
pub(crate) const CATEGORY_MARKERS: &[&str] = &["all", "best", "cheap", "nearby", "top", "every"];

/// Strip common English plural endings. Returns `None` for words that do not look plural.
pub(crate) fn singular(token: &str) -> Option<String> {
    if token.len() <= 3 || !token.ends_with('s') || token.ends_with("ss") {
        return None;
    }
    if let Some(stem) = token.strip_suffix("ies") {
        return Some(format!("{stem}y"));
    }
    if let Some(stem) = token.strip_suffix("es") {
        if stem.ends_with("sh") || stem.ends_with("ch") || stem.ends_with('x') {
            return Some(stem.to_string());
        }
    }
    token.strip_suffix('s').map(str::to_string)
}

/// Look up the domain a (singular) keyword belongs to.
pub(crate) fn domain_of(word: &str) -> Option<&'static str> {
    DOMAINS
        .iter()
        .find(|(_, words)| words.contains(&word))
        .map(|(domain, _)| *domain)
}
