//! Page-range syntax: `"5"`, `"1-10"`, `"1,3,7-10"`, `"40-"`.

use super::DecodeError;

/// Parse a 1-indexed page range, clamped to `total` pages.
///
/// The result is sorted and deduplicated. Pages past the end are dropped;
/// an open-ended `"n-"` runs to the last page.
pub fn parse_page_range(spec: &str, total: u32) -> Result<Vec<u32>, DecodeError> {
    let invalid = |reason: &str| DecodeError::InvalidPageRange(format!("'{}': {}", spec, reason));
    let number = |s: &str| -> Result<u32, DecodeError> {
        match s.trim().parse::<u32>() {
            Ok(0) => Err(invalid("pages start at 1")),
            Ok(n) => Ok(n),
            Err(_) => Err(invalid(&format!("'{}' is not a page number", s.trim()))),
        }
    };

    let mut pages = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = number(start)?;
                let end = if end.trim().is_empty() {
                    total.max(start)
                } else {
                    number(end)?
                };
                if start > end {
                    return Err(invalid(&format!("{} is after {}", start, end)));
                }
                pages.extend(start..=end.min(total));
            }
            None => {
                let page = number(part)?;
                if page <= total {
                    pages.push(page);
                }
            }
        }
    }

    if pages.is_empty() && spec.trim().is_empty() {
        return Err(invalid("empty range"));
    }

    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

/// Render pages as `p.1-3, p.7`.
pub fn format_page_range(pages: &[u32]) -> String {
    let Some((&first, rest)) = pages.split_first() else {
        return "(none)".to_string();
    };

    let mut parts = Vec::new();
    let (mut start, mut prev) = (first, first);
    for &page in rest {
        if page == prev + 1 {
            prev = page;
            continue;
        }
        parts.push(span(start, prev));
        start = page;
        prev = page;
    }
    parts.push(span(start, prev));
    parts.join(", ")
}

fn span(start: u32, end: u32) -> String {
    if start == end {
        format!("p.{}", start)
    } else {
        format!("p.{}-{}", start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_range() {
        assert_eq!(parse_page_range("5", 10).unwrap(), vec![5]);
        assert_eq!(parse_page_range("1-3", 10).unwrap(), vec![1, 2, 3]);
        assert_eq!(
            parse_page_range("1,3,7-10", 20).unwrap(),
            vec![1, 3, 7, 8, 9, 10]
        );
        assert_eq!(parse_page_range(" 3 , 1-2, 2 ", 10).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn range_is_clamped_to_document() {
        assert_eq!(parse_page_range("1-200", 80).unwrap().len(), 80);
        assert_eq!(parse_page_range("90", 80).unwrap(), Vec::<u32>::new());
        assert_eq!(parse_page_range("78-", 80).unwrap(), vec![78, 79, 80]);
        assert!(parse_page_range("90-", 80).unwrap().is_empty());
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(matches!(
            parse_page_range("0", 10),
            Err(DecodeError::InvalidPageRange(_))
        ));
        assert!(parse_page_range("abc", 10).is_err());
        assert!(parse_page_range("5-2", 10).is_err());
        assert!(parse_page_range("", 10).is_err());
    }

    #[test]
    fn test_format_page_range() {
        assert_eq!(format_page_range(&[1, 2, 3, 7]), "p.1-3, p.7");
        assert_eq!(format_page_range(&[4]), "p.4");
        assert_eq!(format_page_range(&[1, 3, 4, 5, 9, 10]), "p.1, p.3-5, p.9-10");
        assert_eq!(format_page_range(&[]), "(none)");
    }
}
