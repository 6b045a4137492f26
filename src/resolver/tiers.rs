//! Ordered label-matching strategies.
//!
//! Each tier is a pure function over the scanned candidates. Tiers are tried
//! in order; the first one returning any candidate wins.

use super::candidates::Candidate;
use crate::models::TrackedDocument;

/// One ranked matching heuristic.
pub trait TierMatcher: Send + Sync {
    /// Tier number reported as `matched_tier` (1 = most specific).
    fn tier(&self) -> u8;

    /// Indices into `candidates` that match, in document order.
    fn matches(&self, document: &TrackedDocument, candidates: &[Candidate]) -> Vec<usize>;
}

/// Lowercase and drop whitespace and punctuation.
///
/// `"허가초과 항암요법(용법·용량)"` and `"허가초과항암요법 용법 용량"` normalize
/// to the same string.
pub fn normalize_label(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Tier 1: label equals the display name (whitespace collapsed).
pub struct ExactLabel;

impl TierMatcher for ExactLabel {
    fn tier(&self) -> u8 {
        1
    }

    fn matches(&self, document: &TrackedDocument, candidates: &[Candidate]) -> Vec<usize> {
        let wanted = super::candidates::collapse_whitespace(&document.display_name);
        candidates
            .iter()
            .filter(|c| c.label == wanted)
            .map(|c| c.index)
            .collect()
    }
}

/// Tier 2: normalized label equals the normalized display name.
pub struct NormalizedLabel;

impl TierMatcher for NormalizedLabel {
    fn tier(&self) -> u8 {
        2
    }

    fn matches(&self, document: &TrackedDocument, candidates: &[Candidate]) -> Vec<usize> {
        let wanted = normalize_label(&document.display_name);
        if wanted.is_empty() {
            return Vec::new();
        }
        candidates
            .iter()
            .filter(|c| normalize_label(&c.label) == wanted)
            .map(|c| c.index)
            .collect()
    }
}

/// Tiers 3-5: every keyword of the tier's set appears in the label, and a
/// format hint for the expected format sits on or around the element.
pub struct KeywordsNearFormat {
    tier: u8,
}

impl KeywordsNearFormat {
    pub fn new(tier: u8) -> Self {
        Self { tier }
    }
}

impl TierMatcher for KeywordsNearFormat {
    fn tier(&self) -> u8 {
        self.tier
    }

    fn matches(&self, document: &TrackedDocument, candidates: &[Candidate]) -> Vec<usize> {
        let Some(keywords) = document.keywords_for_tier(self.tier) else {
            return Vec::new();
        };
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| normalize_label(k))
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Vec::new();
        }
        let hints = document.expected_format.hints();

        candidates
            .iter()
            .filter(|c| {
                let label = normalize_label(&c.label);
                keywords.iter().all(|k| label.contains(k.as_str()))
            })
            .filter(|c| {
                let url = c.target_url().unwrap_or_default().to_lowercase();
                hints
                    .iter()
                    .any(|h| c.context.contains(h) || url.contains(h))
            })
            .map(|c| c.index)
            .collect()
    }
}

/// Tier 6: the distinctive keyword anywhere in label or attributes,
/// regardless of format.
pub struct DistinctiveKeyword;

impl TierMatcher for DistinctiveKeyword {
    fn tier(&self) -> u8 {
        6
    }

    fn matches(&self, document: &TrackedDocument, candidates: &[Candidate]) -> Vec<usize> {
        let Some(keyword) = document.link_label_tiers.distinctive_keyword.as_deref() else {
            return Vec::new();
        };
        let normalized = normalize_label(keyword);
        let lowered = keyword.trim().to_lowercase();
        if normalized.is_empty() {
            return Vec::new();
        }

        candidates
            .iter()
            .filter(|c| {
                normalize_label(&c.label).contains(&normalized)
                    || c.attributes.contains(&lowered)
                    || c.attributes.contains(&normalized)
            })
            .map(|c| c.index)
            .collect()
    }
}

/// The six tiers in evaluation order.
pub fn default_tiers() -> Vec<Box<dyn TierMatcher>> {
    vec![
        Box::new(ExactLabel),
        Box::new(NormalizedLabel),
        Box::new(KeywordsNearFormat::new(3)),
        Box::new(KeywordsNearFormat::new(4)),
        Box::new(KeywordsNearFormat::new(5)),
        Box::new(DistinctiveKeyword),
    ]
}
