//! Candidate extraction from rendered DOM snapshots.
//!
//! The site puts the real download trigger on anchors, buttons, bare
//! elements with click handlers or inside iframes, so all of them are
//! scanned. An element nested inside another candidate (an `<img>` inside
//! an `<a onclick>`, say) is folded into the outermost one, except that a
//! handler on a list or row wrapping real links yields those links.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::scrapers::PageSnapshot;

static CANDIDATE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a, button, [onclick], iframe, area").expect("candidate selector is valid")
});

/// Quoted string literals inside an inline handler.
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("quoted literal regex"));

/// Elements that are clickable on their own.
const NATIVE_TAGS: &[&str] = &["a", "button", "area", "iframe"];

/// Containers whose text and icons count as "near" an element.
const CONTAINER_TAGS: &[&str] = &["li", "tr", "dd", "td", "p", "div"];

/// Attributes carrying a file URL on script-driven download buttons.
const DATA_URL_ATTRS: &[&str] = &["data-url", "data-href", "data-file", "data-download"];

/// How to reach an element again inside a live page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementLocator {
    /// Index into the page's `iframe, frame` list, `None` for the main document.
    pub frame: Option<usize>,
    /// `tag:nth-of-type(n)` chain from `<html>` down to the element.
    pub css_path: String,
}

/// What following a candidate means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// A URL that can be fetched directly.
    Url(String),
    /// The element has to be clicked inside the page.
    Click(ElementLocator),
}

/// One clickable element found on a page.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Position in document order, main document first, then frames.
    pub index: usize,
    /// Visible label, whitespace collapsed.
    pub label: String,
    /// Lowercased attribute values of the element and its descendants.
    pub attributes: String,
    /// Lowercased attributes plus surrounding container text and attributes.
    pub context: String,
    pub target: DownloadTarget,
    /// URL of the document the element lives in.
    pub document_url: String,
}

impl Candidate {
    pub fn target_url(&self) -> Option<&str> {
        match &self.target {
            DownloadTarget::Url(url) => Some(url),
            DownloadTarget::Click(_) => None,
        }
    }
}

/// Scan the main document and then each captured frame.
pub fn collect_candidates(snapshot: &PageSnapshot) -> Vec<Candidate> {
    let mut out = Vec::new();
    scan_document(&snapshot.html, &snapshot.url, None, &mut out);
    for (idx, frame) in snapshot.frames.iter().enumerate() {
        if frame.html.is_empty() {
            continue;
        }
        let base = if frame.url.is_empty() {
            snapshot.url.as_str()
        } else {
            frame.url.as_str()
        };
        scan_document(&frame.html, base, Some(idx), &mut out);
    }
    out
}

fn scan_document(html: &str, base_url: &str, frame: Option<usize>, out: &mut Vec<Candidate>) {
    let document = Html::parse_document(html);
    let mut taken = HashSet::new();

    for element in document.select(&CANDIDATE_SELECTOR) {
        if element.ancestors().any(|a| taken.contains(&a.id())) {
            continue;
        }
        if delegates_clicks(&element) {
            continue;
        }
        taken.insert(element.id());

        let attributes = collect_attributes(&element);
        let context = match container_of(&element) {
            Some(container) => format!(
                "{} {} {}",
                attributes,
                collect_attributes(&container),
                collapse_whitespace(&container.text().collect::<String>()).to_lowercase()
            ),
            None => attributes.clone(),
        };

        let target = match direct_url(&element, base_url) {
            Some(url) => DownloadTarget::Url(url),
            None => DownloadTarget::Click(ElementLocator {
                frame,
                css_path: css_path(&element),
            }),
        };

        out.push(Candidate {
            index: out.len(),
            label: element_label(&element),
            attributes,
            context,
            target,
            document_url: base_url.to_string(),
        });
    }
}

/// A bare element with a click handler that wraps its own links, like
/// `<ul onclick>` or `<tr onclick>`: the inner elements are the candidates.
fn delegates_clicks(element: &ElementRef) -> bool {
    if NATIVE_TAGS.contains(&element.value().name()) {
        return false;
    }
    element
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|inner| {
            NATIVE_TAGS.contains(&inner.value().name()) || inner.value().attr("onclick").is_some()
        })
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_label(element: &ElementRef) -> String {
    let text = collapse_whitespace(&element.text().collect::<String>());
    if !text.is_empty() {
        return text;
    }

    for attr in ["title", "alt", "aria-label", "value"] {
        if let Some(value) = element.value().attr(attr) {
            let value = collapse_whitespace(value);
            if !value.is_empty() {
                return value;
            }
        }
    }

    // Icon-only links: use the first descendant image's alt/title.
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|e| e.value().attr("alt").or_else(|| e.value().attr("title")))
        .map(collapse_whitespace)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn collect_attributes(element: &ElementRef) -> String {
    let mut parts = Vec::new();
    for node in element.descendants().filter_map(ElementRef::wrap) {
        for (_, value) in node.value().attrs() {
            let value = value.trim();
            if !value.is_empty() {
                parts.push(value.to_lowercase());
            }
        }
    }
    parts.join(" ")
}

fn container_of<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| CONTAINER_TAGS.contains(&a.value().name()))
}

/// A directly fetchable URL for the element, if it carries one.
fn direct_url(element: &ElementRef, base_url: &str) -> Option<String> {
    let el = element.value();

    if el.name() == "iframe" {
        return el
            .attr("src")
            .filter(|src| usable_href(src))
            .and_then(|src| resolve_url(base_url, src));
    }

    if let Some(href) = el.attr("href").filter(|h| usable_href(h)) {
        return resolve_url(base_url, href);
    }

    for node in element.descendants().filter_map(ElementRef::wrap) {
        for attr in DATA_URL_ATTRS {
            if let Some(value) = node.value().attr(attr).filter(|v| usable_href(v)) {
                return resolve_url(base_url, value);
            }
        }
    }

    for node in element.descendants().filter_map(ElementRef::wrap) {
        if let Some(handler) = node.value().attr("onclick") {
            if let Some(path) = path_in_handler(handler) {
                return resolve_url(base_url, &path);
            }
        }
    }

    None
}

fn usable_href(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty()
        && !href.starts_with('#')
        && !href.to_ascii_lowercase().starts_with("javascript:")
        && href != "about:blank"
}

/// First quoted literal in an inline handler that looks like a path.
fn path_in_handler(handler: &str) -> Option<String> {
    QUOTED
        .captures_iter(handler)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim())
        .find(|s| looks_like_path(s))
        .map(str::to_string)
}

fn looks_like_path(s: &str) -> bool {
    if s.is_empty() || s.contains(char::is_whitespace) {
        return false;
    }
    let lower = s.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with('/')
        || lower.starts_with("./")
        || lower.starts_with("../")
        || lower.contains(".do?")
        || [".pdf", ".xlsx", ".xls", ".hwp", ".zip"]
            .iter()
            .any(|ext| lower.ends_with(ext))
}

/// Resolve a relative URL against the document URL.
fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// `html:nth-of-type(1) > body:nth-of-type(1) > ...` path to the element.
fn css_path(element: &ElementRef) -> String {
    let mut segments = Vec::new();
    let chain = std::iter::once(*element).chain(element.ancestors().filter_map(ElementRef::wrap));
    for node in chain {
        let name = node.value().name();
        let position = node
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|sibling| sibling.value().name() == name)
            .count()
            + 1;
        segments.push(format!("{}:nth-of-type({})", name, position));
    }
    segments.reverse();
    segments.join(" > ")
}
