//! Spreadsheet decoding with merged-cell forward-fill.
//!
//! HIRA's regimen workbook merges the cancer-type column across every row
//! of a group, so a plain cell read leaves all but the first row blank. The
//! logical grid is built first, with each merged region's anchor value
//! copied to every covered cell, and only then are rows emitted and filtered.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Dimensions, Range, Reader, Sheets};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DecodeError;

/// Cell text longer than this is cut when rendering markdown.
pub const MARKDOWN_CELL_LIMIT: usize = 300;

/// Header keywords that mark the cancer-type column.
const CANCER_COLUMN_KEYWORDS: &[&str] = &["암종", "cancer", "질환", "적응증", "진단"];

/// Column used when no header names the cancer type.
const FALLBACK_FILTER_COLUMN: usize = 2;

/// Keep rows whose filter column contains `value` (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    /// Header to filter on. `None` picks the cancer-type column.
    #[serde(default)]
    pub column: Option<String>,
    pub value: String,
}

impl RowFilter {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            column: None,
            value: value.into(),
        }
    }

    pub fn on(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: Some(column.into()),
            value: value.into(),
        }
    }
}

/// What to read from a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQuery {
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

pub fn default_max_rows() -> usize {
    200
}

impl Default for TableQuery {
    fn default() -> Self {
        Self {
            sheet: None,
            filter: None,
            max_rows: default_max_rows(),
        }
    }
}

/// Decoded sheet: headers plus rows aligned with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTable {
    pub sheet: String,
    pub available_sheets: Vec<String>,
    /// Unique, non-empty column names.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Rows that passed the filter, before `max_rows` truncation.
    pub matched_rows: usize,
    pub truncated: bool,
    /// Header the row filter was applied to, if any.
    pub filter_column: Option<String>,
}

impl DecodedTable {
    /// Value of `header` in row `row`.
    pub fn get(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.headers.iter().position(|h| h == header)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Row as `(header, value)` pairs in column order.
    pub fn record(&self, row: usize) -> Option<Vec<(&str, &str)>> {
        let cells = self.rows.get(row)?;
        Some(
            self.headers
                .iter()
                .map(String::as_str)
                .zip(cells.iter().map(String::as_str))
                .collect(),
        )
    }

    /// GitHub-flavored markdown table.
    pub fn to_markdown(&self) -> String {
        if self.headers.is_empty() {
            return "(empty table)".to_string();
        }

        let mut lines = Vec::with_capacity(self.rows.len() + 2);
        lines.push(markdown_row(self.headers.iter()));
        lines.push(format!(
            "| {} |",
            vec!["---"; self.headers.len()].join(" | ")
        ));
        for row in &self.rows {
            lines.push(markdown_row(row.iter()));
        }
        lines.join("\n")
    }

    /// One-line description: sheet, matched rows, filter, truncation.
    pub fn summary(&self, filter: Option<&RowFilter>) -> String {
        let mut parts = vec![
            format!("sheet: {}", self.sheet),
            format!("rows: {}", self.matched_rows),
        ];
        if let Some(filter) = filter {
            match &self.filter_column {
                Some(column) => parts.push(format!("filter: {} ~ '{}'", column, filter.value)),
                None => parts.push(format!("filter: any ~ '{}'", filter.value)),
            }
        }
        if self.truncated {
            parts.push(format!(
                "showing first {} of {}",
                self.rows.len(),
                self.matched_rows
            ));
        }
        parts.join(" | ")
    }
}

fn markdown_row<'a>(cells: impl Iterator<Item = &'a String>) -> String {
    let cells: Vec<String> = cells.map(|c| markdown_cell(c)).collect();
    format!("| {} |", cells.join(" | "))
}

fn markdown_cell(value: &str) -> String {
    let flat = value.replace(['\r', '\n'], " ").replace('|', "\\|");
    if flat.chars().count() > MARKDOWN_CELL_LIMIT {
        let cut: String = flat.chars().take(MARKDOWN_CELL_LIMIT).collect();
        format!("{}…", cut)
    } else {
        flat
    }
}

/// Decode one sheet of a workbook.
///
/// With no sheet requested, `default_sheet` is used when the workbook has
/// it, else the first sheet.
pub fn decode_table(
    bytes: &[u8],
    query: &TableQuery,
    default_sheet: Option<&str>,
) -> Result<DecodedTable, DecodeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| DecodeError::CorruptDocument(e.to_string()))?;
    let available = workbook.sheet_names();

    let sheet = match query.sheet.as_deref() {
        Some(requested) => available
            .iter()
            .find(|name| name.as_str() == requested || name.trim() == requested.trim())
            .cloned()
            .ok_or_else(|| DecodeError::SheetNotFound {
                sheet: requested.to_string(),
                available: available.clone(),
            })?,
        None => default_sheet
            .and_then(|d| available.iter().find(|name| name.as_str() == d))
            .or_else(|| available.first())
            .cloned()
            .ok_or_else(|| DecodeError::CorruptDocument("workbook has no sheets".to_string()))?,
    };

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| DecodeError::CorruptDocument(e.to_string()))?;
    let merges = merged_regions(&mut workbook, &sheet);
    debug!("Sheet '{}': {} merged region(s)", sheet, merges.len());

    let grid = logical_grid(&range, &merges);
    let mut table = rows_from_grid(grid, query)?;
    table.sheet = sheet;
    table.available_sheets = available;
    Ok(table)
}

fn merged_regions(workbook: &mut Sheets<Cursor<&[u8]>>, sheet: &str) -> Vec<Dimensions> {
    match workbook {
        Sheets::Xlsx(xlsx) => {
            if let Err(e) = xlsx.load_merged_regions() {
                debug!("No merged regions loaded: {}", e);
                return Vec::new();
            }
            xlsx.merged_regions_by_sheet(sheet)
                .into_iter()
                .map(|(_, _, dims)| dims.clone())
                .collect()
        }
        Sheets::Xls(xls) => xls.worksheet_merge_cells(sheet).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Cell text for every coordinate of the used range, merges filled.
fn logical_grid(range: &Range<Data>, merges: &[Dimensions]) -> Vec<Vec<String>> {
    let (Some(start), Some(end)) = (range.start(), range.end()) else {
        return Vec::new();
    };
    let height = (end.0 - start.0 + 1) as usize;
    let width = (end.1 - start.1 + 1) as usize;

    let mut grid: Vec<Vec<String>> = (start.0..=end.0)
        .map(|r| {
            (start.1..=end.1)
                .map(|c| cell_text(range.get_value((r, c))))
                .collect()
        })
        .collect();

    for merge in merges {
        let value = cell_text(range.get_value(merge.start));
        for r in merge.start.0..=merge.end.0 {
            for c in merge.start.1..=merge.end.1 {
                if r < start.0 || c < start.1 {
                    continue;
                }
                let (row, col) = ((r - start.0) as usize, (c - start.1) as usize);
                if row < height && col < width {
                    grid[row][col] = value.clone();
                }
            }
        }
    }

    grid
}

fn cell_text(value: Option<&Data>) -> String {
    match value {
        None | Some(Data::Empty) => String::new(),
        Some(Data::Error(e)) => format!("#{:?}", e),
        Some(data) => data.to_string().trim().to_string(),
    }
}

fn rows_from_grid(grid: Vec<Vec<String>>, query: &TableQuery) -> Result<DecodedTable, DecodeError> {
    let mut rows = grid.into_iter();

    // Header: first row with any non-empty cell.
    let raw_headers = rows
        .by_ref()
        .find(|row| row.iter().any(|c| !c.is_empty()))
        .unwrap_or_default();
    let headers = unique_headers(&raw_headers);

    let data: Vec<Vec<String>> = rows.filter(|row| row.iter().any(|c| !c.is_empty())).collect();

    let (filter_col, filtered) = match &query.filter {
        Some(filter) => {
            let col = filter_column(&headers, filter)?;
            let needle = filter.value.to_lowercase();
            let matched: Vec<Vec<String>> = data
                .into_iter()
                .filter(|row| match col {
                    Some(idx) => row
                        .get(idx)
                        .is_some_and(|cell| cell.to_lowercase().contains(&needle)),
                    None => row.iter().any(|cell| cell.to_lowercase().contains(&needle)),
                })
                .collect();
            (col, matched)
        }
        None => (None, data),
    };

    let matched_rows = filtered.len();
    let truncated = matched_rows > query.max_rows;
    let rows = filtered.into_iter().take(query.max_rows).collect();

    Ok(DecodedTable {
        sheet: String::new(),
        available_sheets: Vec::new(),
        filter_column: filter_col.and_then(|i| headers.get(i).cloned()),
        headers,
        rows,
        matched_rows,
        truncated,
    })
}

/// Empty headers become `column_N`; repeats get a `_2`, `_3` suffix.
fn unique_headers(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for (idx, header) in raw.iter().enumerate() {
        let base = if header.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            header.clone()
        };
        let mut name = base.clone();
        let mut n = 2;
        while out.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        out.push(name);
    }
    out
}

/// Column index to filter on; `None` means match any cell.
fn filter_column(headers: &[String], filter: &RowFilter) -> Result<Option<usize>, DecodeError> {
    if let Some(column) = &filter.column {
        let wanted = column.trim().to_lowercase();
        return headers
            .iter()
            .position(|h| h.to_lowercase() == wanted)
            .or_else(|| headers.iter().position(|h| h.to_lowercase().contains(&wanted)))
            .map(Some)
            .ok_or_else(|| DecodeError::ColumnNotFound {
                column: column.clone(),
                available: headers.to_vec(),
            });
    }

    let by_keyword = headers.iter().position(|h| {
        let h = h.to_lowercase();
        CANCER_COLUMN_KEYWORDS.iter().any(|kw| h.contains(kw))
    });
    Ok(by_keyword.or_else(|| (headers.len() > FALLBACK_FILTER_COLUMN).then_some(FALLBACK_FILTER_COLUMN)))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Minimal XLSX writer for tests.

    use std::io::Write;

    use zip::write::SimpleFileOptions;

    pub struct Sheet<'a> {
        pub name: &'a str,
        /// `(cell ref, text)`, e.g. `("A2", "난소암")`.
        pub cells: Vec<(&'a str, &'a str)>,
        /// Merge ranges, e.g. `"A2:A4"`.
        pub merges: Vec<&'a str>,
    }

    fn escape(s: &str) -> String {
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
    }

    fn row_of(cell: &str) -> u32 {
        cell.trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .parse()
            .unwrap()
    }

    pub fn xlsx(sheets: &[Sheet]) -> Vec<u8> {
        let mut strings: Vec<String> = Vec::new();
        let mut sheet_xml = Vec::new();

        for sheet in sheets {
            let mut rows: std::collections::BTreeMap<u32, Vec<String>> = Default::default();
            for (cell, text) in &sheet.cells {
                let idx = match strings.iter().position(|s| s == text) {
                    Some(i) => i,
                    None => {
                        strings.push(text.to_string());
                        strings.len() - 1
                    }
                };
                rows.entry(row_of(cell))
                    .or_default()
                    .push(format!(r#"<c r="{}" t="s"><v>{}</v></c>"#, cell, idx));
            }
            let body: String = rows
                .iter()
                .map(|(r, cells)| format!(r#"<row r="{}">{}</row>"#, r, cells.concat()))
                .collect();
            let merges = if sheet.merges.is_empty() {
                String::new()
            } else {
                let refs: String = sheet
                    .merges
                    .iter()
                    .map(|m| format!(r#"<mergeCell ref="{}"/>"#, m))
                    .collect();
                format!(
                    r#"<mergeCells count="{}">{}</mergeCells>"#,
                    sheet.merges.len(),
                    refs
                )
            };
            sheet_xml.push(format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData>{}</worksheet>"#,
                body, merges
            ));
        }

        let shared: String = strings
            .iter()
            .map(|s| format!("<si><t>{}</t></si>", escape(s)))
            .collect();

        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();

        let overrides: String = (1..=sheets.len())
            .map(|i| format!(r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#, i))
            .collect();
        let files: Vec<(String, String)> = vec![
            (
                "[Content_Types].xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>{}</Types>"#,
                    overrides
                ),
            ),
            (
                "_rels/.rels".to_string(),
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                    .to_string(),
            ),
            (
                "xl/workbook.xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
                    sheets
                        .iter()
                        .enumerate()
                        .map(|(i, s)| format!(
                            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                            escape(s.name),
                            i + 1,
                            i + 1
                        ))
                        .collect::<String>()
                ),
            ),
            (
                "xl/_rels/workbook.xml.rels".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}<Relationship Id="rIdStrings" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#,
                    (1..=sheets.len())
                        .map(|i| format!(
                            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                            i, i
                        ))
                        .collect::<String>()
                ),
            ),
            (
                "xl/sharedStrings.xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">{1}</sst>"#,
                    strings.len(),
                    shared
                ),
            ),
        ];

        for (name, content) in files {
            zip.start_file(name, opts).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        for (i, xml) in sheet_xml.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Regimen sheet: header row 1, "난소암" merged over A2:A4.
    pub fn regimen_workbook() -> Vec<u8> {
        xlsx(&[
            Sheet {
                name: "인정되고 있는 허가초과 항암요법(용법용량포함)",
                cells: vec![
                    ("A1", "시트명"),
                    ("B1", "구분"),
                    ("C1", "항암요법"),
                    ("A2", "난소암"),
                    ("B2", "1차"),
                    ("C2", "paclitaxel + carboplatin"),
                    ("B3", "2차"),
                    ("C3", "gemcitabine"),
                    ("B4", "3차"),
                    ("C4", "topotecan"),
                    ("A5", "자궁경부암"),
                    ("B5", "1차"),
                    ("C5", "cisplatin"),
                ],
                merges: vec!["A2:A4"],
            },
            Sheet {
                name: "참고",
                cells: vec![("A1", "비고")],
                merges: vec![],
            },
        ])
    }
}
