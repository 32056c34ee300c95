//! Animal listing queries.

use crate::config::{FetchConfig, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::retry::retry_with_backoff;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level field holding the listing array
pub const LISTINGS_FIELD: &str = "animals";

const SIZES: [&str; 4] = ["small", "medium", "large", "xlarge"];
const TYPED_FILTERS: [&str; 4] = ["type", "size", "location", "limit"];

/// Validated listing filters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingQuery {
    animal_type: Option<String>,
    size: Option<String>,
    location: Option<String>,
    limit: u32,
    params: BTreeMap<String, String>,
}

impl ListingQuery {
    /// Validate the configured filters
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let non_empty = |value: &Option<String>, key: &str| -> Result<Option<String>> {
            match value.as_deref().map(str::trim) {
                None => Ok(None),
                Some("") => Err(Error::config(format!("{key} must not be empty"), key)),
                Some(v) => Ok(Some(v.to_string())),
            }
        };

        let animal_type = non_empty(&config.animal_type, "type")?;
        let location = non_empty(&config.location, "location")?;
        let size = non_empty(&config.size, "size")?
            .map(|s| s.to_ascii_lowercase())
            .map(|s| {
                if SIZES.contains(&s.as_str()) {
                    Ok(s)
                } else {
                    Err(Error::config(
                        format!("size must be one of {}, got {s:?}", SIZES.join(", ")),
                        "size",
                    ))
                }
            })
            .transpose()?;

        if !(1..=100).contains(&config.limit) {
            return Err(Error::config(
                format!("limit must be between 1 and 100, got {}", config.limit),
                "limit",
            ));
        }

        for key in config.params.keys() {
            if key.trim().is_empty() {
                return Err(Error::config("parameter name must not be empty", "param"));
            }
            if TYPED_FILTERS.contains(&key.as_str()) {
                return Err(Error::config(
                    format!("use the dedicated option for {key:?} instead of a passthrough parameter"),
                    "param",
                ));
            }
        }

        Ok(Self {
            animal_type,
            size,
            location,
            limit: config.limit,
            params: config.params.clone(),
        })
    }

    /// Query string pairs in a stable order
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(4 + self.params.len());
        if let Some(v) = &self.animal_type {
            pairs.push(("type".to_string(), v.clone()));
        }
        if let Some(v) = &self.size {
            pairs.push(("size".to_string(), v.clone()));
        }
        if let Some(v) = &self.location {
            pairs.push(("location".to_string(), v.clone()));
        }
        pairs.push(("limit".to_string(), self.limit.to_string()));
        pairs.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

/// Parse a passthrough `key=value` argument
pub fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(Error::config(
            format!("expected key=value, got {raw:?}"),
            "param",
        )),
    }
}

/// Issues listing requests with bounded retries
pub struct ListingFetcher {
    http: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl ListingFetcher {
    /// Create a fetcher for the listing endpoint under `base_url`
    pub fn new(http: reqwest::Client, base_url: &str, retry: RetryConfig) -> Self {
        Self {
            http,
            url: format!("{}/animals", base_url.trim_end_matches('/')),
            retry,
        }
    }

    /// Fetch one page of listings and check its shape
    pub async fn fetch_listings(&self, token: &str, query: &ListingQuery) -> Result<Value> {
        let pairs = query.to_pairs();
        let document = retry_with_backoff(&self.retry, || self.request(token, &pairs)).await?;
        validate_listings(&document)?;
        Ok(document)
    }

    async fn request(&self, token: &str, pairs: &[(String, String)]) -> Result<Value> {
        let response = self
            .http
            .get(&self.url)
            .bearer_auth(token)
            .query(pairs)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            401 => return Err(FetchError::Unauthorized.into()),
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(FetchError::RateLimited { retry_after }.into());
            }
            _ => return Err(FetchError::Status { status }.into()),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Schema(format!("response is not valid JSON: {e}")))
    }
}

/// Check the document has an array under [`LISTINGS_FIELD`]
pub fn validate_listings(document: &Value) -> Result<usize> {
    match document.get(LISTINGS_FIELD) {
        Some(Value::Array(items)) => Ok(items.len()),
        Some(_) => Err(Error::Schema(format!(
            "field {LISTINGS_FIELD:?} is not an array"
        ))),
        None => Err(Error::Schema(format!(
            "response has no {LISTINGS_FIELD:?} field"
        ))),
    }
}

/// Write the listing document, replacing `path` atomically
pub async fn write_listings(path: &Path, document: &Value, pretty: bool) -> Result<()> {
    let mut body = if pretty {
        serde_json::to_vec_pretty(document)?
    } else {
        serde_json::to_vec(document)?
    };
    body.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::filesystem(parent, e))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| Error::filesystem(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::filesystem(path, e))?;
    Ok(())
}
