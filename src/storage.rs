//! Storage helpers for document content on disk.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Subdirectory holding per-key metadata records.
pub const STATE_SUBDIR: &str = "state";
/// Subdirectory holding materialized bytes, one directory per key.
pub const FILES_SUBDIR: &str = "files";
/// Subdirectory for in-flight downloads.
pub const STAGING_SUBDIR: &str = "staging";

/// Replace characters that are not allowed in filenames.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the materialized filename for a version.
///
/// `{sanitized_basename}-{hash[0..8]}.{extension}`
pub fn version_file_name(basename: &str, content_hash: &str, extension: &str) -> String {
    format!(
        "{}-{}.{}",
        sanitize_filename(basename),
        &content_hash[..content_hash.len().min(8)],
        extension
    )
}

/// Split a suggested download filename into basename and extension.
pub fn split_filename(name: &str) -> (String, Option<String>) {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 => {
            (stem.to_string(), Some(ext.to_lowercase()))
        }
        _ => (name.to_string(), None),
    }
}

/// Map MIME type to file extension.
pub fn mime_to_extension(mime: &str) -> Option<&'static str> {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    match mime {
        "application/pdf" => Some("pdf"),
        "application/vnd.ms-excel" => Some("xls"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some("xlsx"),
        "application/zip" => Some("zip"),
        _ => None,
    }
}

/// Compute the SHA-256 of a file on disk without loading it whole.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write `contents` to `path` so readers see either the old or new file.
///
/// Data goes to a temp file in the same directory, is synced, then renamed
/// over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory with a descriptive error on failure.
pub fn ensure_dir(path: &Path, label: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(path).map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("Failed to create {} '{}': {}", label, path.display(), e),
        )
    })?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c?.xlsx"), "a_b_c_.xlsx");
        assert_eq!(sanitize_filename("  허가초과 항암요법 "), "허가초과 항암요법");
        assert_eq!(sanitize_filename(".."), "file");
    }

    #[test]
    fn test_version_file_name() {
        let hash = "abcdef1234567890abcdef1234567890";
        assert_eq!(version_file_name("report", hash, "pdf"), "report-abcdef12.pdf");
        assert_eq!(
            version_file_name("My: Report", hash, "xlsx"),
            "My_ Report-abcdef12.xlsx"
        );
    }

    #[test]
    fn test_split_filename() {
        assert_eq!(
            split_filename("허가초과항암요법.xlsx"),
            ("허가초과항암요법".to_string(), Some("xlsx".to_string()))
        );
        assert_eq!(
            split_filename("/tmp/dl/Notice.PDF"),
            ("Notice".to_string(), Some("pdf".to_string()))
        );
        assert_eq!(split_filename("README"), ("README".to_string(), None));
        assert_eq!(split_filename(".hidden"), (".hidden".to_string(), None));
    }

    #[test]
    fn test_mime_to_extension() {
        assert_eq!(mime_to_extension("application/pdf"), Some("pdf"));
        assert_eq!(
            mime_to_extension(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet; charset=binary"
            ),
            Some("xlsx")
        );
        assert_eq!(mime_to_extension("text/html"), None);
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("record.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_hash_file_matches_in_memory_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let content = vec![7u8; 20_000];
        fs::write(&path, &content).unwrap();

        assert_eq!(
            hash_file(&path).unwrap(),
            crate::models::FileVersion::compute_hash(&content)
        );
    }
}
