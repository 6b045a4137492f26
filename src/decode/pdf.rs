//! PDF decoding: per-page classification, text extraction and rasterization.
//!
//! Every selected page is classified from its content stream alone. Text
//! pages yield extracted text; table pages are rendered to PNG so the grid
//! survives, unless the caller asked for text only.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use base64::Engine;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::pages::{format_page_range, parse_page_range};
use super::{handle_cmd_output, DecodeError};

/// Leading characters of a page searched for section headings.
const SECTION_HEADER_CHARS: usize = 500;
/// Pages scanned past a section start when looking for the next section.
const SECTION_SCAN_LIMIT: u32 = 100;
/// Form XObjects nested deeper than this are not followed.
const MAX_FORM_DEPTH: usize = 8;

/// Drawing and text statistics of one page's content stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLayout {
    pub text_ops: usize,
    /// Bytes of string operands shown by text operators.
    pub text_chars: usize,
    pub rectangles: usize,
    pub line_segments: usize,
    pub images: usize,
}

impl PageLayout {
    /// Scan the content stream of `page_id`, following form XObjects.
    pub fn scan(doc: &Document, page_id: ObjectId) -> Result<Self, DecodeError> {
        let data = doc
            .get_page_content(page_id)
            .map_err(|e| DecodeError::CorruptDocument(e.to_string()))?;
        let resources = page_resources(doc, page_id);

        let mut layout = Self::default();
        layout.scan_stream(doc, &data, &resources, 0)?;
        Ok(layout)
    }

    fn scan_stream<'a>(
        &mut self,
        doc: &'a Document,
        data: &[u8],
        resources: &[&'a Dictionary],
        depth: usize,
    ) -> Result<(), DecodeError> {
        let content =
            Content::decode(data).map_err(|e| DecodeError::CorruptDocument(e.to_string()))?;

        for op in &content.operations {
            match op.operator.as_str() {
                "Tj" | "'" | "\"" | "TJ" => {
                    self.text_ops += 1;
                    self.text_chars += op.operands.iter().map(string_len).sum::<usize>();
                }
                "re" => self.rectangles += 1,
                "l" => self.line_segments += 1,
                "BI" => self.images += 1,
                "Do" => {
                    let xobject = op
                        .operands
                        .first()
                        .and_then(|name| name.as_name().ok())
                        .and_then(|name| find_xobject(doc, resources, name));
                    match xobject {
                        Some(form) if is_form(form) => {
                            if depth >= MAX_FORM_DEPTH {
                                debug!("Form XObjects nested past {} levels; skipping", depth);
                                continue;
                            }
                            let inner_data = form
                                .get_plain_content()
                                .map_err(|e| DecodeError::CorruptDocument(e.to_string()))?;
                            let mut inner: Vec<&Dictionary> = form
                                .dict
                                .get_deref(b"Resources", doc)
                                .and_then(Object::as_dict)
                                .ok()
                                .into_iter()
                                .collect();
                            inner.extend(resources.iter().copied());
                            self.scan_stream(doc, &inner_data, &inner, depth + 1)?;
                        }
                        _ => self.images += 1,
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn rules(&self) -> usize {
        self.rectangles + self.line_segments
    }
}

/// Resource dictionaries visible to a page, its own first.
fn page_resources(doc: &Document, page_id: ObjectId) -> Vec<&Dictionary> {
    match doc.get_page_resources(page_id) {
        Ok((own, inherited)) => own
            .into_iter()
            .chain(inherited.into_iter().filter_map(|id| doc.get_dictionary(id).ok()))
            .collect(),
        Err(e) => {
            debug!("Page resources unreadable: {}", e);
            Vec::new()
        }
    }
}

fn find_xobject<'a>(
    doc: &'a Document,
    resources: &[&'a Dictionary],
    name: &[u8],
) -> Option<&'a Stream> {
    resources.iter().find_map(|res| {
        res.get_deref(b"XObject", doc)
            .and_then(Object::as_dict)
            .ok()?
            .get_deref(name, doc)
            .and_then(Object::as_stream)
            .ok()
    })
}

fn is_form(xobject: &Stream) -> bool {
    xobject.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Form"[..])
}

fn string_len(obj: &Object) -> usize {
    match obj {
        Object::String(bytes, _) => bytes.len(),
        Object::Array(items) => items.iter().map(string_len).sum(),
        _ => 0,
    }
}

/// How a page is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Text,
    Table,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
        }
    }
}

/// Decides whether a page is prose or a table.
///
/// Implementations must be deterministic for a given layout.
pub trait PageClassifier: Send + Sync {
    fn classify(&self, layout: &PageLayout) -> PageKind;
}

/// Table when the page draws enough rules, or is mostly image with little text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuledGridClassifier {
    #[serde(default = "default_min_rules")]
    pub min_rules: usize,
    #[serde(default = "default_sparse_text_chars")]
    pub sparse_text_chars: usize,
}

fn default_min_rules() -> usize {
    8
}

fn default_sparse_text_chars() -> usize {
    40
}

impl Default for RuledGridClassifier {
    fn default() -> Self {
        Self {
            min_rules: default_min_rules(),
            sparse_text_chars: default_sparse_text_chars(),
        }
    }
}

impl PageClassifier for RuledGridClassifier {
    fn classify(&self, layout: &PageLayout) -> PageKind {
        if layout.rules() >= self.min_rules
            || (layout.images > 0 && layout.text_chars < self.sparse_text_chars)
        {
            PageKind::Table
        } else {
            PageKind::Text
        }
    }
}

/// Renders a single PDF page to PNG.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32) -> Result<Vec<u8>, DecodeError>;
}

/// Rasterizer backed by poppler's `pdftoppm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdftoppmRasterizer;

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32) -> Result<Vec<u8>, DecodeError> {
        let out_dir = tempfile::tempdir()?;
        let prefix = out_dir.path().join("page");
        let page_arg = page.to_string();

        let output = Command::new("pdftoppm")
            .args(["-png", "-singlefile", "-r", &dpi.to_string()])
            .args(["-f", &page_arg, "-l", &page_arg])
            .arg(pdf)
            .arg(&prefix)
            .output();
        handle_cmd_output(output, "pdftoppm (install poppler-utils)", "pdftoppm failed")?;

        Ok(std::fs::read(prefix.with_extension("png"))?)
    }
}

/// Where page text comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextExtractor {
    /// `pdftotext` when it is on PATH, else lopdf.
    #[default]
    Auto,
    Lopdf,
    Pdftotext,
}

/// Limits and tunables for PDF reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfPolicy {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_call: usize,
    #[serde(default)]
    pub text_extractor: TextExtractor,
    #[serde(default)]
    pub classifier: RuledGridClassifier,
}

fn default_dpi() -> u32 {
    150
}

fn default_max_pages() -> usize {
    50
}

impl Default for PdfPolicy {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            max_pages_per_call: default_max_pages(),
            text_extractor: TextExtractor::default(),
            classifier: RuledGridClassifier::default(),
        }
    }
}

/// What to read from a PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfQuery {
    /// 1-indexed pages, e.g. `"1-10"` or `"3,7-9"`. Bypasses `search_term`.
    #[serde(default)]
    pub page_range: Option<String>,
    #[serde(default)]
    pub search_term: Option<String>,
    /// Named section configured for the document.
    #[serde(default)]
    pub section: Option<String>,
    /// Return text for table pages instead of images.
    #[serde(default)]
    pub text_only: bool,
}

/// PNG rendering of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterImage {
    #[serde(with = "base64_bytes")]
    pub png: Vec<u8>,
    pub dpi: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PageContent {
    Text(String),
    Image(RasterImage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPage {
    pub page_number: u32,
    pub classification: PageKind,
    pub content: PageContent,
}

/// Result of one PDF read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPdf {
    pub total_pages: u32,
    pub pages: Vec<DecodedPage>,
    /// More pages were selected than one call returns.
    pub truncated: bool,
    /// First selected page that was not returned.
    pub next_page: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl DecodedPdf {
    /// Plain-text rendering, image pages shown as placeholders.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for page in &self.pages {
            out.push_str(&format!(
                "=== p.{} ({}) ===\n",
                page.page_number,
                page.classification.as_str()
            ));
            match &page.content {
                PageContent::Text(text) => out.push_str(text.trim_end()),
                PageContent::Image(img) => out.push_str(&format!(
                    "[PNG image, {} bytes at {} dpi]",
                    img.png.len(),
                    img.dpi
                )),
            }
            out.push_str("\n\n");
        }
        if let Some(message) = &self.message {
            out.push_str(message);
            out.push('\n');
        }
        out
    }
}

/// Decodes PDFs under a [`PdfPolicy`].
#[derive(Clone)]
pub struct PdfDecoder {
    policy: PdfPolicy,
    classifier: Arc<dyn PageClassifier>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl std::fmt::Debug for PdfDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDecoder")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for PdfDecoder {
    fn default() -> Self {
        Self::new(PdfPolicy::default())
    }
}

impl PdfDecoder {
    pub fn new(policy: PdfPolicy) -> Self {
        Self {
            classifier: Arc::new(policy.classifier),
            rasterizer: Arc::new(PdftoppmRasterizer),
            policy,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PageClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn policy(&self) -> &PdfPolicy {
        &self.policy
    }

    /// Decode the pages `query` selects, at most `max_pages_per_call` of them.
    pub fn decode(
        &self,
        bytes: &[u8],
        query: &PdfQuery,
        sections: &BTreeMap<String, Vec<String>>,
    ) -> Result<DecodedPdf, DecodeError> {
        let doc =
            Document::load_mem(bytes).map_err(|e| DecodeError::CorruptDocument(e.to_string()))?;
        let page_ids = doc.get_pages();
        let total = page_ids.len() as u32;
        let mut source = PageSource::new(&doc, bytes, self.policy.text_extractor);
        let mut message = None;

        let mut selected: Vec<u32> = match (&query.page_range, &query.section) {
            (Some(range), _) => parse_page_range(range, total)?,
            (None, Some(section)) => {
                match find_section(&mut source, total, section, sections) {
                    Some(pages) => pages,
                    None => {
                        let available: Vec<&str> = sections.keys().map(String::as_str).collect();
                        return Ok(DecodedPdf {
                            total_pages: total,
                            message: Some(format!(
                                "Section '{}' not found. Available sections: {}",
                                section,
                                if available.is_empty() {
                                    "(none)".to_string()
                                } else {
                                    available.join(", ")
                                }
                            )),
                            ..Default::default()
                        });
                    }
                }
            }
            (None, None) => (1..=total).collect(),
        };

        if let (None, Some(term)) = (&query.page_range, &query.search_term) {
            let needle = term.to_lowercase();
            selected.retain(|&page| source.text(page).to_lowercase().contains(&needle));
            debug!("Search '{}' matched {} page(s)", term, selected.len());
            if selected.is_empty() {
                message = Some(format!("No pages contain '{}'", term));
            }
        }

        let cap = self.policy.max_pages_per_call.max(1);
        let truncated = selected.len() > cap;
        let next_page = selected.get(cap).copied();
        if truncated {
            let rest = format_page_range(&selected[cap..]);
            message = Some(format!(
                "Returned {} of {} selected pages (limit {} per call). Remaining: {}",
                cap,
                selected.len(),
                cap,
                rest
            ));
            selected.truncate(cap);
        }

        let mut pages = Vec::with_capacity(selected.len());
        for page in selected {
            let Some(&page_id) = page_ids.get(&page) else {
                continue;
            };
            let layout = PageLayout::scan(&doc, page_id).unwrap_or_else(|e| {
                debug!("Page {} layout scan failed: {}", page, e);
                PageLayout::default()
            });
            let classification = self.classifier.classify(&layout);

            let content = match classification {
                PageKind::Table if !query.text_only => match self.render(&mut source, page) {
                    Ok(png) => PageContent::Image(RasterImage {
                        png,
                        dpi: self.policy.dpi,
                    }),
                    Err(e) => {
                        warn!("Rasterizing page {} failed, returning text: {}", page, e);
                        PageContent::Text(source.text(page))
                    }
                },
                _ => PageContent::Text(source.text(page)),
            };

            pages.push(DecodedPage {
                page_number: page,
                classification,
                content,
            });
        }

        Ok(DecodedPdf {
            total_pages: total,
            pages,
            truncated,
            next_page,
            message,
        })
    }

    fn render(&self, source: &mut PageSource<'_>, page: u32) -> Result<Vec<u8>, DecodeError> {
        let path = source.spooled_path()?;
        self.rasterizer.rasterize(path, page, self.policy.dpi)
    }
}

/// Decode with the default policy and no sections.
pub fn decode_pdf(bytes: &[u8], query: &PdfQuery) -> Result<DecodedPdf, DecodeError> {
    PdfDecoder::default().decode(bytes, query, &BTreeMap::new())
}

/// Page text with per-page caching, and the PDF spooled to disk for tools.
struct PageSource<'a> {
    doc: &'a Document,
    bytes: &'a [u8],
    use_pdftotext: bool,
    spooled: Option<NamedTempFile>,
    texts: BTreeMap<u32, String>,
}

impl<'a> PageSource<'a> {
    fn new(doc: &'a Document, bytes: &'a [u8], extractor: TextExtractor) -> Self {
        let use_pdftotext = match extractor {
            TextExtractor::Lopdf => false,
            TextExtractor::Pdftotext => true,
            TextExtractor::Auto => which::which("pdftotext").is_ok(),
        };
        Self {
            doc,
            bytes,
            use_pdftotext,
            spooled: None,
            texts: BTreeMap::new(),
        }
    }

    fn spooled_path(&mut self) -> Result<&Path, DecodeError> {
        if self.spooled.is_none() {
            let mut file = tempfile::Builder::new()
                .prefix("read-")
                .suffix(".pdf")
                .tempfile()?;
            std::io::Write::write_all(&mut file, self.bytes)?;
            self.spooled = Some(file);
        }
        match &self.spooled {
            Some(file) => Ok(file.path()),
            None => Err(DecodeError::Io(std::io::Error::other("spool file missing"))),
        }
    }

    fn text(&mut self, page: u32) -> String {
        if let Some(text) = self.texts.get(&page) {
            return text.clone();
        }
        let text = if self.use_pdftotext {
            match self.pdftotext(page) {
                Ok(text) => text,
                Err(e) => {
                    debug!("pdftotext failed on page {}, using lopdf: {}", page, e);
                    self.lopdf_text(page)
                }
            }
        } else {
            self.lopdf_text(page)
        };
        self.texts.insert(page, text.clone());
        text
    }

    fn lopdf_text(&self, page: u32) -> String {
        self.doc.extract_text(&[page]).unwrap_or_else(|e| {
            debug!("No text extracted from page {}: {}", page, e);
            String::new()
        })
    }

    fn pdftotext(&mut self, page: u32) -> Result<String, DecodeError> {
        let path = self.spooled_path()?.to_path_buf();
        let page_arg = page.to_string();
        let output = Command::new("pdftotext")
            .args(["-layout", "-enc", "UTF-8", "-f", &page_arg, "-l", &page_arg])
            .arg(&path)
            .arg("-")
            .output();
        let stdout = handle_cmd_output(output, "pdftotext (install poppler-utils)", "pdftotext failed")?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

fn header(text: &str) -> String {
    text.chars().take(SECTION_HEADER_CHARS).collect()
}

/// Pages of `section`, or `None` when no page opens it.
///
/// A name with no configured keywords is searched for literally.
fn find_section(
    source: &mut PageSource<'_>,
    total: u32,
    section: &str,
    sections: &BTreeMap<String, Vec<String>>,
) -> Option<Vec<u32>> {
    let own: Vec<String> = sections
        .get(section)
        .cloned()
        .unwrap_or_else(|| vec![section.to_string()]);
    let others: Vec<&String> = sections
        .iter()
        .filter(|(name, _)| name.as_str() != section)
        .flat_map(|(_, keywords)| keywords)
        .filter(|kw| !own.contains(kw))
        .collect();

    let start = (1..=total).find(|&page| {
        let head = header(&source.text(page));
        own.iter().any(|kw| head.contains(kw.as_str()))
    })?;

    let mut end = total;
    for page in (start + 1)..(start + SECTION_SCAN_LIMIT).min(total + 1) {
        let head = header(&source.text(page));
        if others.iter().any(|kw| head.contains(kw.as_str())) {
            end = page - 1;
            break;
        }
    }

    debug!("Section '{}' spans pages {}-{}", section, start, end);
    Some((start..=end).collect())
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

impl RasterImage {
    /// `data:` URL for embedding the image.
    pub fn data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}
