//! Download queue file parsing and validation
//!
//! The queue file holds one `name:url` pair per line. Blank lines and lines
//! starting with `#` are ignored. Every other line either yields a
//! [`QueueEntry`] or a [`QueueFormatError`]; one bad line never aborts the
//! rest of the file.

use crate::error::{Error, QueueFormatError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Extension used when the URL path does not carry a usable one
const DEFAULT_EXTENSION: &str = "jpg";

/// One image to download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    /// Unique file stem
    pub name: String,
    /// Absolute http(s) source URL
    pub url: String,
}

impl QueueEntry {
    /// File name the image is saved under: the name plus the URL's extension
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, url_extension(&self.url))
    }

    /// Full destination path inside `dir`
    pub fn destination_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Lowercased extension of the URL's last path segment, or `jpg`
fn url_extension(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|segment| {
            Path::new(&segment)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Result of validating a queue file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Valid entries in file order
    pub entries: Vec<QueueEntry>,
    /// Rejected lines in file order
    pub errors: Vec<QueueFormatError>,
}

impl QueueReport {
    /// True when no line was rejected
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate queue file contents
///
/// Malformed and empty URLs are both hard errors for their line.
pub fn parse_queue(contents: &str) -> QueueReport {
    let mut report = QueueReport::default();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse_line(line, trimmed) {
            Ok(entry) => match seen.get(&entry.name) {
                Some(&first_line) => report.errors.push(QueueFormatError::DuplicateName {
                    line,
                    name: entry.name,
                    first_line,
                }),
                None => {
                    seen.insert(entry.name.clone(), line);
                    report.entries.push(entry);
                }
            },
            Err(e) => report.errors.push(e),
        }
    }

    report
}

fn parse_line(line: usize, text: &str) -> std::result::Result<QueueEntry, QueueFormatError> {
    let (name, url) = text
        .split_once(':')
        .ok_or(QueueFormatError::MissingSeparator { line })?;
    let name = name.trim();
    let url = url.trim();

    if name.is_empty() {
        return Err(QueueFormatError::EmptyName { line });
    }
    if url.is_empty() {
        return Err(QueueFormatError::EmptyUrl { line });
    }
    if name.starts_with('.') || name.contains(['/', '\\']) || name.contains('\0') {
        return Err(QueueFormatError::InvalidName {
            line,
            name: name.to_string(),
        });
    }

    let invalid_url = |reason: String| QueueFormatError::InvalidUrl {
        line,
        url: url.to_string(),
        reason,
    };
    let parsed = url::Url::parse(url).map_err(|e| invalid_url(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid_url(format!(
            "scheme {:?} is not http or https",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid_url("missing host".to_string()));
    }

    Ok(QueueEntry {
        name: name.to_string(),
        url: url.to_string(),
    })
}

/// Read and validate a queue file
///
/// Every rejected line is logged; the caller decides whether to proceed.
pub async fn validate_queue(path: &Path) -> Result<QueueReport> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let contents = tokio::fs::read_to_string(path).await?;
    let report = parse_queue(&contents);

    for error in &report.errors {
        tracing::warn!(file = %path.display(), line = error.line(), "{}", error);
    }
    tracing::info!(
        file = %path.display(),
        valid = report.entries.len(),
        invalid = report.errors.len(),
        "Validated queue"
    );
    Ok(report)
}

/// Write entries as `name:url` lines
pub async fn write_queue(path: &Path, entries: &[QueueEntry]) -> Result<()> {
    let mut body = String::new();
    for entry in entries {
        body.push_str(&entry.name);
        body.push(':');
        body.push_str(&entry.url);
        body.push('\n');
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::filesystem(parent, e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| Error::filesystem(path, e))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_line_yields_entry() {
        let report = parse_queue("fido:https://example.com/a.jpg\n");
        assert!(report.is_clean());
        assert_eq!(
            report.entries,
            vec![QueueEntry {
                name: "fido".into(),
                url: "https://example.com/a.jpg".into()
            }]
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        let report = parse_queue(":https://x/y.jpg");
        assert!(report.entries.is_empty());
        assert_eq!(report.errors, vec![QueueFormatError::EmptyName { line: 1 }]);
    }

    #[test]
    fn missing_separator_is_rejected() {
        let report = parse_queue("just-a-name");
        assert_eq!(
            report.errors,
            vec![QueueFormatError::MissingSeparator { line: 1 }]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_not_errors() {
        let report = parse_queue("# pets for today\n\n   \n  # indented comment\nrex:http://h/r.png\n");
        assert!(report.is_clean());
        assert_eq!(report.entries.len(), 1);
    }

    #[test]
    fn empty_and_malformed_urls_are_both_errors() {
        let report = parse_queue("a:\nb:ftp://h/b.jpg\nc:not a url\nd:http://\n");
        assert!(report.entries.is_empty());
        let lines: Vec<usize> = report.errors.iter().map(QueueFormatError::line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
        assert_eq!(report.errors[0], QueueFormatError::EmptyUrl { line: 1 });
        assert!(matches!(report.errors[1], QueueFormatError::InvalidUrl { .. }));
    }

    #[test]
    fn path_like_names_are_rejected() {
        let report = parse_queue("../etc:https://h/a.jpg\n.hidden:https://h/b.jpg\n");
        assert_eq!(report.errors.len(), 2);
        assert!(
            report
                .errors
                .iter()
                .all(|e| matches!(e, QueueFormatError::InvalidName { .. }))
        );
    }

    #[test]
    fn duplicate_names_keep_first_occurrence() {
        let report = parse_queue("max:https://h/1.jpg\nmax:https://h/2.jpg\n");
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].url, "https://h/1.jpg");
        assert_eq!(
            report.errors,
            vec![QueueFormatError::DuplicateName {
                line: 2,
                name: "max".into(),
                first_line: 1
            }]
        );
    }

    #[test]
    fn bad_lines_do_not_abort_the_batch() {
        let report = parse_queue("nosep\nfido:https://h/f.jpg\n:https://h/x.jpg\nrex:https://h/r.jpg");
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn file_name_uses_url_extension() {
        let entry = |url: &str| QueueEntry {
            name: "fido".into(),
            url: url.into(),
        };
        assert_eq!(entry("https://h/p/a.PNG").file_name(), "fido.png");
        assert_eq!(entry("https://h/p/a.jpeg?width=300").file_name(), "fido.jpeg");
        assert_eq!(entry("https://h/photos/12345").file_name(), "fido.jpg");
        assert_eq!(entry("https://h/").file_name(), "fido.jpg");
    }

    #[tokio::test]
    async fn validate_queue_requires_file() {
        let err = validate_queue(Path::new("/nonexistent/queue.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }

    #[tokio::test]
    async fn written_queue_validates_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q/pets.queue.txt");
        let entries = vec![
            QueueEntry {
                name: "Fido".into(),
                url: "https://h/f.jpg".into(),
            },
            QueueEntry {
                name: "Rex".into(),
                url: "https://h/r.jpg".into(),
            },
        ];
        write_queue(&path, &entries).await.unwrap();

        let report = validate_queue(&path).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.entries, entries);
    }
}
