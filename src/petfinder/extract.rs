//! Turn a listing document into download queue entries.

use crate::config::PhotoSize;
use crate::error::{Error, Result};
use crate::petfinder::listings::validate_listings;
use crate::queue::QueueEntry;
use serde_json::Value;
use std::path::Path;

/// Listings whose name contains this marker are courtesy posts, not adoptable pets
const COURTESY_MARKER: &str = "Courtesy";

/// Extraction counts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Entries written to the queue
    pub queued: usize,
    /// Courtesy listings skipped
    pub courtesy: usize,
    /// Listings without a photo at the requested size
    pub without_photo: usize,
    /// Listings whose name sanitizes to nothing
    pub unnamed: usize,
    /// Listings replaced by a later listing with the same name
    pub replaced: usize,
}

/// Make a listing name usable as a file stem
///
/// Spaces are removed, parentheses become `_`, and anything else outside
/// `[A-Za-z0-9_-]` is dropped.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' => None,
            '(' | ')' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect()
}

/// Build queue entries from a listing document
///
/// Later listings with an already-seen name replace the earlier entry in place.
pub fn extract_queue(document: &Value, size: PhotoSize) -> Result<(Vec<QueueEntry>, ExtractReport)> {
    validate_listings(document)?;
    let animals = document[crate::petfinder::LISTINGS_FIELD]
        .as_array()
        .ok_or_else(|| Error::Schema("listing array disappeared".to_string()))?;

    let mut entries: Vec<QueueEntry> = Vec::new();
    let mut report = ExtractReport::default();

    for animal in animals {
        let raw_name = animal.get("name").and_then(Value::as_str).unwrap_or("");
        if raw_name.contains(COURTESY_MARKER) {
            tracing::debug!(name = raw_name, "Skipping courtesy listing");
            report.courtesy += 1;
            continue;
        }

        let name = sanitize_name(raw_name);
        if name.is_empty() {
            tracing::warn!(name = raw_name, "Skipping listing with unusable name");
            report.unnamed += 1;
            continue;
        }

        let url = animal
            .get("photos")
            .and_then(Value::as_array)
            .and_then(|photos| photos.first())
            .and_then(|photo| photo.get(size.key()))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty());

        let Some(url) = url else {
            tracing::info!(name = raw_name, size = size.key(), "Listing has no photos");
            report.without_photo += 1;
            continue;
        };

        let entry = QueueEntry {
            name,
            url: url.to_string(),
        };
        match entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => {
                tracing::debug!(name = %entry.name, "Replacing earlier listing with the same name");
                report.replaced += 1;
                *existing = entry;
            }
            None => entries.push(entry),
        }
    }

    report.queued = entries.len();
    Ok((entries, report))
}

/// Read a listing file and write the queue file
pub async fn extract_file(
    listings: &Path,
    queue_file: &Path,
    size: PhotoSize,
) -> Result<ExtractReport> {
    if !listings.exists() {
        return Err(Error::MissingFile(listings.to_path_buf()));
    }
    let content = tokio::fs::read(listings).await?;
    let document: Value = serde_json::from_slice(&content)
        .map_err(|e| Error::Schema(format!("{} is not valid JSON: {}", listings.display(), e)))?;

    let (entries, report) = extract_queue(&document, size)?;
    crate::queue::write_queue(queue_file, &entries).await?;

    tracing::info!(
        queued = report.queued,
        courtesy = report.courtesy,
        without_photo = report.without_photo,
        replaced = report.replaced,
        queue_file = %queue_file.display(),
        "Wrote download queue"
    );
    Ok(report)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn photo(url: &str) -> Value {
        json!({"small": format!("{url}?s"), "medium": url, "large": format!("{url}?l"), "full": format!("{url}?f")})
    }

    #[test]
    fn sanitize_matches_file_stem_rules() {
        assert_eq!(sanitize_name("Mr Whiskers (Bonded)"), "MrWhiskers_Bonded_");
        assert_eq!(sanitize_name("Zoë's pup!"), "Zospup");
        assert_eq!(sanitize_name("../../etc"), "etc");
    }

    #[test]
    fn extracts_first_photo_and_skips_courtesy_and_photoless() {
        let doc = json!({
            "animals": [
                {"name": "Fido", "photos": [photo("https://img/fido.jpg"), photo("https://img/other.jpg")]},
                {"name": "Courtesy Post: Rex", "photos": [photo("https://img/rex.jpg")]},
                {"name": "Ghost", "photos": []},
                {"name": "Luna Belle", "photos": [photo("https://img/luna.jpg")]},
            ]
        });

        let (entries, report) = extract_queue(&doc, PhotoSize::Medium).unwrap();
        assert_eq!(
            entries,
            vec![
                QueueEntry {
                    name: "Fido".into(),
                    url: "https://img/fido.jpg".into()
                },
                QueueEntry {
                    name: "LunaBelle".into(),
                    url: "https://img/luna.jpg".into()
                },
            ]
        );
        assert_eq!(report.courtesy, 1);
        assert_eq!(report.without_photo, 1);
        assert_eq!(report.queued, 2);
    }

    #[test]
    fn photo_size_selects_variant() {
        let doc = json!({"animals": [{"name": "Fido", "photos": [photo("https://img/f.jpg")]}]});
        let (entries, _) = extract_queue(&doc, PhotoSize::Small).unwrap();
        assert_eq!(entries[0].url, "https://img/f.jpg?s");
    }

    #[test]
    fn later_duplicate_replaces_earlier_in_place() {
        let doc = json!({"animals": [
            {"name": "Max", "photos": [photo("https://img/1.jpg")]},
            {"name": "Bella", "photos": [photo("https://img/2.jpg")]},
            {"name": "Max", "photos": [photo("https://img/3.jpg")]},
        ]});
        let (entries, report) = extract_queue(&doc, PhotoSize::Medium).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://img/3.jpg");
        assert_eq!(report.replaced, 1);
    }

    #[test]
    fn document_without_animals_is_rejected() {
        let err = extract_queue(&json!({"data": []}), PhotoSize::Medium).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[tokio::test]
    async fn extract_file_writes_queue_lines() {
        let dir = tempfile::tempdir().unwrap();
        let listings = dir.path().join("pets.json");
        let queue = dir.path().join("pets.queue.txt");
        std::fs::write(
            &listings,
            json!({"animals": [{"name": "Fido", "photos": [photo("https://img/fido.jpg")]}]})
                .to_string(),
        )
        .unwrap();

        let report = extract_file(&listings, &queue, PhotoSize::Medium)
            .await
            .unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(
            std::fs::read_to_string(&queue).unwrap(),
            "Fido:https://img/fido.jpg\n"
        );
    }

    #[tokio::test]
    async fn extract_file_requires_listing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_file(
            &dir.path().join("missing.json"),
            &dir.path().join("q.txt"),
            PhotoSize::Medium,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }
}
