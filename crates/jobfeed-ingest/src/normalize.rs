//! Canonicalization of raw postings into fingerprint-able shape.

use jobfeed_core::{canonical, fingerprint, NormalizedPosting, RawPosting};

/// Pure and total: missing company/location canonicalize to empty strings,
/// so every raw posting gets a fingerprint. Running it twice on the same
/// input yields the same fingerprint.
pub fn normalize(raw: RawPosting) -> NormalizedPosting {
    let title = canonical(&raw.title);
    let company = canonical(raw.company.as_deref().unwrap_or(""));
    let location = canonical(raw.location.as_deref().unwrap_or(""));

    let fingerprint = fingerprint(&title, &company, &location);
    let comparison_text = [title, company, location]
        .iter()
        .filter(|part| !part.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    NormalizedPosting {
        raw,
        fingerprint,
        comparison_text,
    }
}

/// Comparison text for a historical record, using the same canonicalization
/// as candidates so the fuzzy layer compares like with like.
pub fn history_comparison_text(title: &str, company: &str, location: &str) -> String {
    [canonical(title), canonical(company), canonical(location)]
        .iter()
        .filter(|part| !part.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str, company: Option<&str>, location: Option<&str>) -> RawPosting {
        RawPosting {
            source: "test".into(),
            title: title.into(),
            company: company.map(String::from),
            location: location.map(String::from),
            description: None,
            url: None,
            posted_at: None,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let a = normalize(raw("Data   Scientist", Some(" Acme "), Some("Berlin")));
        let b = normalize(a.raw.clone());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.comparison_text, b.comparison_text);
    }

    #[test]
    fn cross_source_case_variants_share_a_fingerprint() {
        let a = normalize(raw("Data Scientist", Some("Acme"), Some("Berlin")));
        let b = normalize(raw("data scientist", Some("ACME"), Some("berlin ")));
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn missing_fields_normalize_to_empty_not_failure() {
        let p = normalize(raw("Solo Title", None, None));
        assert!(!p.fingerprint.is_empty());
        assert_eq!(p.comparison_text, "solo title");

        let empty = normalize(raw("", None, None));
        assert!(!empty.fingerprint.is_empty());
        assert_eq!(empty.comparison_text, "");
    }

    #[test]
    fn history_text_matches_candidate_text() {
        let candidate = normalize(raw("Data Scientist", Some("Acme"), Some("Berlin")));
        let history = history_comparison_text("Data  Scientist", "ACME", " berlin");
        assert_eq!(candidate.comparison_text, history);
    }
}
