//! Petfinder API client and the fetch/extract stages.
//!
//! - [`token`] - OAuth2 client-credentials tokens with an on-disk cache
//! - [`listings`] - Filtered listing queries with rate-limit aware retries
//! - [`extract`] - Listing JSON to `name:url` queue conversion

pub mod extract;
pub mod listings;
pub mod token;

pub use extract::{ExtractReport, extract_file, extract_queue, sanitize_name};
pub use listings::{LISTINGS_FIELD, ListingFetcher, ListingQuery, validate_listings, write_listings};
pub use token::{BearerToken, TokenCache, TokenManager};

use crate::config::Config;
use crate::error::{Error, FetchError, Result};

/// Build the HTTP client shared by the token and listing requests
pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.api.request_timeout)
        .user_agent(concat!("petfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::Network)
}

/// Fetch stage: obtain a token, query listings and write them to `config.fetch.output`
///
/// Returns the number of listings written. A rejected bearer token is refreshed
/// once; no output file is written unless a valid document was received.
pub async fn run_fetch(config: &Config) -> Result<usize> {
    let (client_id, client_secret) = config.api.credentials()?;
    let query = ListingQuery::from_config(&config.fetch)?;
    let http = http_client(config)?;

    let tokens = TokenManager::new(
        http.clone(),
        &config.api.base_url,
        client_id,
        client_secret,
        TokenCache::new(&config.api.cache_dir),
    )
    .with_retry(config.api.retry.clone())
    .with_safety_margin(config.api.token_safety_margin);
    let fetcher = ListingFetcher::new(http, &config.api.base_url, config.api.retry.clone());

    let token = tokens.get_token().await?;
    let document = match fetcher.fetch_listings(&token.token, &query).await {
        Err(Error::Fetch(FetchError::Unauthorized)) => {
            tracing::warn!("Bearer token rejected, refreshing");
            let token = tokens.refresh().await?;
            fetcher.fetch_listings(&token.token, &query).await?
        }
        other => other?,
    };

    let count = validate_listings(&document)?;
    write_listings(&config.fetch.output, &document, config.fetch.pretty).await?;
    tracing::info!(
        listings = count,
        output = %config.fetch.output.display(),
        "Wrote listings"
    );
    Ok(count)
}

/// Extract stage: turn the listing file into the download queue
pub async fn run_extract(config: &Config) -> Result<ExtractReport> {
    extract_file(
        &config.fetch.output,
        &config.download.queue_file,
        config.extract.photo_size,
    )
    .await
}
