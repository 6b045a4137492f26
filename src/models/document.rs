//! Tracked document definitions.
//!
//! A tracked document is one file published on a source page that we poll
//! for changes. Definitions are loaded from config at startup and never
//! mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// HIRA anticancer chemotherapy announcement board.
pub const HIRA_ANNOUNCEMENT_URL: &str = "https://www.hira.or.kr/bbsDummy.do?pgmid=HIRAA030023030000";

/// Expected binary format of a tracked document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Spreadsheet,
    Pdf,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "spreadsheet",
            Self::Pdf => "pdf",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spreadsheet" | "xlsx" | "xls" | "excel" => Some(Self::Spreadsheet),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// File extension used when materializing bytes of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "xlsx",
            Self::Pdf => "pdf",
        }
    }

    /// Lowercase markers that indicate a link points at this format.
    ///
    /// Matched against element attributes, icon sources and surrounding text.
    pub fn hints(&self) -> &'static [&'static str] {
        match self {
            Self::Spreadsheet => &[".xlsx", ".xls", "xlsx", "excel", "엑셀", "xls"],
            Self::Pdf => &[".pdf", "pdf"],
        }
    }

    /// Whether `data` starts with a signature of this format.
    ///
    /// Spreadsheets are either OOXML (zip) or legacy BIFF (OLE compound file).
    pub fn matches_magic(&self, data: &[u8]) -> bool {
        match self {
            Self::Spreadsheet => {
                data.starts_with(b"PK\x03\x04")
                    || data.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
            }
            Self::Pdf => data.starts_with(b"%PDF-"),
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword tiers used when the display name cannot be matched exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkLabelTiers {
    /// Keyword sets for tiers 3..=5, most specific first. Every keyword of
    /// a set must appear in the label, and the element must sit near a
    /// format hint.
    #[serde(default)]
    pub keyword_sets: Vec<Vec<String>>,
    /// Last-resort keyword for tier 6, matched anywhere in label or attributes.
    #[serde(default)]
    pub distinctive_keyword: Option<String>,
}

/// One monitored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDocument {
    /// Stable identifier, also used for on-disk layout.
    pub key: String,
    /// Canonical label of the download link.
    pub display_name: String,
    /// Format we expect to download.
    pub expected_format: FileFormat,
    /// Pages known to host the download link, in priority order.
    pub candidate_source_urls: Vec<String>,
    #[serde(default)]
    pub link_label_tiers: LinkLabelTiers,
    /// Sheet read when a table read names no sheet.
    #[serde(default)]
    pub default_sheet: Option<String>,
    /// Named PDF sections and the heading keywords that open them.
    #[serde(default)]
    pub pdf_sections: BTreeMap<String, Vec<String>>,
}

impl TrackedDocument {
    /// Built-in definitions for the two HIRA anticancer publications.
    pub fn hira_defaults() -> Vec<Self> {
        vec![Self::off_label_regimens(), Self::announcement_full_text()]
    }

    /// Off-label anticancer regimens (spreadsheet).
    pub fn off_label_regimens() -> Self {
        Self {
            key: "허가초과_항암요법".to_string(),
            display_name: "허가초과 항암요법".to_string(),
            expected_format: FileFormat::Spreadsheet,
            candidate_source_urls: vec![HIRA_ANNOUNCEMENT_URL.to_string()],
            link_label_tiers: LinkLabelTiers {
                keyword_sets: vec![
                    strings(&["허가초과", "항암요법", "용법"]),
                    strings(&["허가초과", "항암요법"]),
                    strings(&["허가초과"]),
                ],
                distinctive_keyword: Some("허가초과".to_string()),
            },
            default_sheet: Some("인정되고 있는 허가초과 항암요법(용법용량포함)".to_string()),
            pdf_sections: BTreeMap::new(),
        }
    }

    /// Full text of the anticancer chemotherapy announcement (PDF).
    pub fn announcement_full_text() -> Self {
        let mut sections = BTreeMap::new();
        sections.insert("개요".to_string(), strings(&["개요", "총칙", "일반원칙"]));
        sections.insert("급여기준".to_string(), strings(&["급여기준", "요양급여"]));
        sections.insert("약제목록".to_string(), strings(&["약제", "목록"]));
        sections.insert("별표".to_string(), strings(&["별표", "[별표"]));
        sections.insert("부록".to_string(), strings(&["부록", "참고"]));

        Self {
            key: "항암화학요법_공고전문".to_string(),
            display_name: "항암화학요법 등 공고내용 전문".to_string(),
            expected_format: FileFormat::Pdf,
            candidate_source_urls: vec![HIRA_ANNOUNCEMENT_URL.to_string()],
            link_label_tiers: LinkLabelTiers {
                keyword_sets: vec![
                    strings(&["항암화학요법", "공고내용", "전문"]),
                    strings(&["공고내용", "전문"]),
                    strings(&["공고전문"]),
                ],
                distinctive_keyword: Some("공고내용".to_string()),
            },
            default_sheet: None,
            pdf_sections: sections,
        }
    }

    /// Keyword sets for a keyword tier (3, 4 or 5).
    pub fn keywords_for_tier(&self, tier: u8) -> Option<&[String]> {
        let idx = usize::from(tier.checked_sub(3)?);
        self.link_label_tiers
            .keyword_sets
            .get(idx)
            .map(|set| set.as_slice())
            .filter(|set| !set.is_empty())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_round_trips_through_str() {
        assert_eq!(FileFormat::from_str("pdf"), Some(FileFormat::Pdf));
        assert_eq!(FileFormat::from_str("XLSX"), Some(FileFormat::Spreadsheet));
        assert_eq!(FileFormat::from_str("hwp"), None);
        assert_eq!(FileFormat::Spreadsheet.as_str(), "spreadsheet");
    }

    #[test]
    fn magic_rejects_html_error_pages() {
        assert!(FileFormat::Pdf.matches_magic(b"%PDF-1.7\n"));
        assert!(FileFormat::Spreadsheet.matches_magic(b"PK\x03\x04rest"));
        assert!(!FileFormat::Pdf.matches_magic(b"<!DOCTYPE html>"));
        assert!(!FileFormat::Spreadsheet.matches_magic(b"%PDF-1.4"));
    }

    #[test]
    fn defaults_cover_both_formats() {
        let docs = TrackedDocument::hira_defaults();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].expected_format, FileFormat::Spreadsheet);
        assert_eq!(docs[1].expected_format, FileFormat::Pdf);
        assert!(docs.iter().all(|d| !d.candidate_source_urls.is_empty()));
    }

    #[test]
    fn keyword_tiers_are_indexed_from_three() {
        let doc = TrackedDocument::off_label_regimens();
        assert_eq!(doc.keywords_for_tier(3).map(|k| k.len()), Some(3));
        assert_eq!(doc.keywords_for_tier(5).map(|k| k.len()), Some(1));
        assert!(doc.keywords_for_tier(2).is_none());
        assert!(doc.keywords_for_tier(6).is_none());
    }

    #[test]
    fn tracked_document_parses_from_toml() {
        let doc: TrackedDocument = toml::from_str(
            r#"
            key = "report"
            display_name = "Annual Report"
            expected_format = "pdf"
            candidate_source_urls = ["https://example.com/a", "https://example.com/b"]

            [link_label_tiers]
            keyword_sets = [["annual", "report"], ["report"]]
            distinctive_keyword = "annual"
            "#,
        )
        .unwrap();
        assert_eq!(doc.expected_format, FileFormat::Pdf);
        assert_eq!(doc.candidate_source_urls.len(), 2);
        assert_eq!(doc.keywords_for_tier(4).unwrap(), ["report".to_string()]);
        assert!(doc.pdf_sections.is_empty());
    }
}
