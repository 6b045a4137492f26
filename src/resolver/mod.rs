//! Download link resolution over rendered pages.
//!
//! The source board reshuffles its markup often, so the link for a tracked
//! document is found by trying progressively looser label heuristics
//! ([`tiers`]) over every clickable element ([`candidates`]).

pub mod candidates;
pub mod tiers;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use candidates::{collect_candidates, Candidate, DownloadTarget, ElementLocator};
pub use tiers::{default_tiers, normalize_label, TierMatcher};

use crate::models::TrackedDocument;
use crate::scrapers::PageSnapshot;

/// How sure the resolver is about a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// The winning tier matched exactly one element.
    High,
    /// The winning tier matched several; the first in document order was taken.
    Low,
}

/// Result of resolving a document's link on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    /// File URL, or the page URL when the link must be clicked.
    pub url: String,
    /// Set when the download is triggered by clicking an element.
    pub click: Option<ElementLocator>,
    pub label: String,
    pub matched_tier: u8,
    pub source_url_used: String,
    pub confidence: Confidence,
    /// Number of elements the winning tier matched.
    pub match_count: usize,
}

impl ResolvedLink {
    pub fn is_low_confidence(&self) -> bool {
        self.confidence == Confidence::Low
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No link matching '{display_name}' among {scanned} elements on {url}")]
    NotFound {
        display_name: String,
        url: String,
        scanned: usize,
    },
}

/// Runs tier strategies in order over a page snapshot.
pub struct LinkResolver {
    tiers: Vec<Box<dyn TierMatcher>>,
}

impl Default for LinkResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkResolver {
    pub fn new() -> Self {
        Self {
            tiers: default_tiers(),
        }
    }

    pub fn with_tiers(tiers: Vec<Box<dyn TierMatcher>>) -> Self {
        Self { tiers }
    }

    pub fn resolve(
        &self,
        document: &TrackedDocument,
        snapshot: &PageSnapshot,
    ) -> Result<ResolvedLink, ResolveError> {
        let candidates = collect_candidates(snapshot);
        debug!(
            "Scanning {} candidate elements on {} for '{}'",
            candidates.len(),
            snapshot.url,
            document.display_name
        );

        for tier in &self.tiers {
            let matches = tier.matches(document, &candidates);
            let Some(candidate) = matches.first().and_then(|&idx| candidates.get(idx)) else {
                continue;
            };

            let confidence = if matches.len() > 1 {
                warn!(
                    "Tier {} matched {} elements for '{}'; using first ('{}')",
                    tier.tier(),
                    matches.len(),
                    document.display_name,
                    candidate.label
                );
                Confidence::Low
            } else {
                Confidence::High
            };

            let (url, click) = match &candidate.target {
                DownloadTarget::Url(url) => (url.clone(), None),
                DownloadTarget::Click(locator) => (snapshot.url.clone(), Some(locator.clone())),
            };

            debug!(
                "Resolved '{}' at tier {} -> {}",
                document.display_name,
                tier.tier(),
                url
            );

            return Ok(ResolvedLink {
                url,
                click,
                label: candidate.label.clone(),
                matched_tier: tier.tier(),
                source_url_used: snapshot.url.clone(),
                confidence,
                match_count: matches.len(),
            });
        }

        Err(ResolveError::NotFound {
            display_name: document.display_name.clone(),
            url: snapshot.url.clone(),
            scanned: candidates.len(),
        })
    }
}

/// Resolve with the default tier sequence.
pub fn resolve(
    document: &TrackedDocument,
    snapshot: &PageSnapshot,
) -> Result<ResolvedLink, ResolveError> {
    LinkResolver::new().resolve(document, snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.hira.or.kr/bbsDummy.do?pgmid=HIRAA030023030000";

    #[test]
    fn exact_label_wins_at_tier_one() {
        let doc = TrackedDocument::off_label_regimens();
        let snapshot = PageSnapshot::new(
            PAGE,
            r#"<a href="/a.xlsx">허가초과 항암요법</a><a href="/b.pdf">기타</a>"#,
        );
        let link = resolve(&doc, &snapshot).unwrap();
        assert_eq!(link.matched_tier, 1);
        assert_eq!(link.url, "https://www.hira.or.kr/a.xlsx");
        assert_eq!(link.confidence, Confidence::High);
        assert_eq!(link.source_url_used, PAGE);
    }

    #[test]
    fn falls_back_to_keyword_tier_four() {
        let doc = TrackedDocument::off_label_regimens();
        // No exact or normalized match; tier 3 needs "용법" which is absent.
        let snapshot = PageSnapshot::new(
            PAGE,
            r#"<ul class="file-list">
                <li><a href="/board/view.do?seq=10">허가초과 사용 승인 안내</a></li>
                <li><span class="ico xls"></span><a href="/download.do?seq=11">2024 허가초과 항암요법 목록</a></li>
            </ul>"#,
        );
        let link = resolve(&doc, &snapshot).unwrap();
        assert_eq!(link.matched_tier, 4);
        assert_eq!(link.url, "https://www.hira.or.kr/download.do?seq=11");
        assert!(!link.is_low_confidence());
    }

    #[test]
    fn multiple_matches_take_first_with_low_confidence() {
        let doc = TrackedDocument::announcement_full_text();
        let snapshot = PageSnapshot::new(
            PAGE,
            r#"<a href="/1.pdf">항암화학요법 등 공고내용 전문</a>
               <a href="/2.pdf">항암화학요법 등 공고내용 전문</a>"#,
        );
        let link = resolve(&doc, &snapshot).unwrap();
        assert_eq!(link.matched_tier, 1);
        assert_eq!(link.url, "https://www.hira.or.kr/1.pdf");
        assert_eq!(link.confidence, Confidence::Low);
        assert_eq!(link.match_count, 2);
    }

    #[test]
    fn click_target_reports_page_url() {
        let doc = TrackedDocument::announcement_full_text();
        let snapshot = PageSnapshot::new(
            PAGE,
            r#"<div><a href="javascript:fnFileDown(3)">항암화학요법 등 공고내용 전문</a></div>"#,
        );
        let link = resolve(&doc, &snapshot).unwrap();
        assert_eq!(link.url, PAGE);
        assert!(link.click.is_some());
    }

    #[test]
    fn link_inside_frame_is_found() {
        let doc = TrackedDocument::off_label_regimens();
        let snapshot = PageSnapshot::new(PAGE, r#"<iframe src="/board.do"></iframe>"#).with_frame(
            PageSnapshot::new(
                "https://www.hira.or.kr/board.do",
                r#"<a href="/f/list.xlsx">허가초과 항암요법</a>"#,
            ),
        );
        let link = resolve(&doc, &snapshot).unwrap();
        assert_eq!(link.matched_tier, 1);
        assert_eq!(link.url, "https://www.hira.or.kr/f/list.xlsx");
    }

    #[test]
    fn links_under_delegated_handler_resolve() {
        let doc = TrackedDocument::off_label_regimens();
        let snapshot = PageSnapshot::new(
            "https://www.hira.or.kr/board",
            r#"<ul onclick="go()">
                <li><a href="/files/regimens.xlsx">허가초과 항암요법</a></li>
                <li><a href="/files/other.pdf">공지사항</a></li>
            </ul>"#,
        );
        let link = resolve(&doc, &snapshot).unwrap();
        assert_eq!(link.matched_tier, 1);
        assert_eq!(link.url, "https://www.hira.or.kr/files/regimens.xlsx");
        assert!(link.click.is_none());
    }

    #[test]
    fn no_match_is_not_found() {
        let doc = TrackedDocument::off_label_regimens();
        let snapshot = PageSnapshot::new(PAGE, r#"<a href="/x.pdf">공지사항</a>"#);
        let err = resolve(&doc, &snapshot).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { scanned: 1, .. }));
    }
}
