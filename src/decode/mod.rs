//! On-demand decoding of published bytes.
//!
//! Nothing is decoded at fetch time. A read names the query for the
//! document's format and the decoder for that format runs over the
//! published file.

mod pages;
pub mod pdf;
pub mod table;

use std::collections::BTreeMap;
use std::process::Output;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FileFormat;

pub use pages::{format_page_range, parse_page_range};
pub use pdf::{
    decode_pdf, DecodedPage, DecodedPdf, PageClassifier, PageContent, PageKind, PageLayout,
    PageRasterizer, PdfDecoder, PdfPolicy, PdfQuery, PdftoppmRasterizer, RasterImage,
    RuledGridClassifier, TextExtractor,
};
pub use table::{decode_table, DecodedTable, RowFilter, TableQuery};

/// Errors raised while decoding a published file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Document could not be parsed: {0}")]
    CorruptDocument(String),

    #[error("Sheet '{sheet}' not found (available: {})", .available.join(", "))]
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },

    #[error("Column '{column}' not found (available: {})", .available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("Invalid page range {0}")]
    InvalidPageRange(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool failed: {0}")]
    ToolFailed(String),

    #[error("Expected a {expected} read, but the document is {actual}")]
    WrongFormat {
        expected: FileFormat,
        actual: FileFormat,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map an external tool's result into raw stdout or a decode error.
pub(crate) fn handle_cmd_output(
    result: std::io::Result<Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<Vec<u8>, DecodeError> {
    match result {
        Ok(output) if output.status.success() => Ok(output.stdout),
        Ok(output) => Err(DecodeError::ToolFailed(format!(
            "{}: {}",
            error_prefix,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(DecodeError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(DecodeError::Io(e)),
    }
}

/// A read against one document, typed by format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ReadRequest {
    Table(TableQuery),
    Pdf(PdfQuery),
}

impl ReadRequest {
    pub fn format(&self) -> FileFormat {
        match self {
            Self::Table(_) => FileFormat::Spreadsheet,
            Self::Pdf(_) => FileFormat::Pdf,
        }
    }
}

/// Output of [`decode`].
#[derive(Debug, Clone)]
pub enum Decoded {
    Table(DecodedTable),
    Pdf(DecodedPdf),
}

/// Per-document decode context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentHints<'a> {
    pub default_sheet: Option<&'a str>,
    pub pdf_sections: Option<&'a BTreeMap<String, Vec<String>>>,
}

/// Decode `bytes` of `format` as `request` asks.
///
/// The request must match the format; a table read of a PDF is
/// [`DecodeError::WrongFormat`].
pub fn decode(
    format: FileFormat,
    bytes: &[u8],
    request: &ReadRequest,
    hints: DocumentHints<'_>,
    pdf: &PdfDecoder,
) -> Result<Decoded, DecodeError> {
    match (format, request) {
        (FileFormat::Spreadsheet, ReadRequest::Table(query)) => {
            decode_table(bytes, query, hints.default_sheet).map(Decoded::Table)
        }
        (FileFormat::Pdf, ReadRequest::Pdf(query)) => {
            let empty = BTreeMap::new();
            let sections = hints.pdf_sections.unwrap_or(&empty);
            pdf.decode(bytes, query, sections).map(Decoded::Pdf)
        }
        (actual, request) => Err(DecodeError::WrongFormat {
            expected: request.format(),
            actual,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_read_is_wrong_format() {
        let decoder = PdfDecoder::default();
        let request = ReadRequest::Table(TableQuery::default());
        let err = decode(
            FileFormat::Pdf,
            b"%PDF-1.5",
            &request,
            DocumentHints::default(),
            &decoder,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::WrongFormat {
                expected: FileFormat::Spreadsheet,
                actual: FileFormat::Pdf
            }
        ));
    }

    #[test]
    fn missing_tool_maps_to_tool_not_found() {
        let result = std::process::Command::new("definitely-not-a-real-tool-xyz").output();
        assert!(matches!(
            handle_cmd_output(result, "xyz", "xyz failed"),
            Err(DecodeError::ToolNotFound(_))
        ));
    }

    #[test]
    fn read_request_is_tagged_by_format() {
        let req: ReadRequest =
            serde_json::from_str(r#"{"format": "table", "sheet": "A", "max_rows": 5}"#).unwrap();
        match req {
            ReadRequest::Table(q) => {
                assert_eq!(q.sheet.as_deref(), Some("A"));
                assert_eq!(q.max_rows, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
