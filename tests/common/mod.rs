//! Shared helpers for petfeed integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use petfeed::{Config, RetryConfig};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config pointed at a mock API with every path inside `dir`
pub fn test_config(dir: &TempDir, server: &MockServer) -> Config {
    let root = dir.path();
    let mut config = Config::default();

    config.api.base_url = server.uri();
    config.api.client_id = Some("test-client".into());
    config.api.client_secret = Some("test-secret".into());
    config.api.cache_dir = root.join("cache");
    config.api.retry = fast_retry(3);

    config.fetch.output = root.join("pets.json");
    config.fetch.animal_type = Some("dog".into());

    config.download.queue_file = root.join("pets.queue.txt");
    config.download.download_dir = root.join("images");
    config.download.retry_delay = Duration::from_millis(10);
    config.download.pause = Duration::ZERO;

    config.convert.output_dir = root.join("converted");
    config.publish.watch_dir = root.join("converted");
    config.publish.destination = root.join("www/frame.raw");
    config.publish.archive_dir = root.join("published");
    config
}

/// Retry policy with millisecond delays
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        rate_limit_delay: Duration::from_millis(300),
        jitter: false,
    }
}

/// Token endpoint issuing `token`, expected to be hit `times` times
pub async fn mount_token(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
            "access_token": token,
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Listing document whose photos are served by `server`
pub fn listing_document(server: &MockServer) -> Value {
    let photo = |name: &str| {
        let url = format!("{}/photos/{name}.jpg", server.uri());
        json!({ "small": url, "medium": url, "large": url, "full": url })
    };
    json!({
        "animals": [
            { "id": 1, "name": "Fido", "photos": [photo("fido")] },
            { "id": 2, "name": "Rex (Senior)", "photos": [photo("rex")] },
            { "id": 3, "name": "Courtesy Listing: Max", "photos": [photo("max")] },
            { "id": 4, "name": "Shy Bella", "photos": [] },
        ],
        "pagination": { "count_per_page": 20, "total_count": 4 }
    })
}

/// Serve a small body for every photo path
pub async fn mount_photos(server: &MockServer) {
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"^/photos/[a-z]+\.jpg$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"JPEG".to_vec()))
        .mount(server)
        .await;
}
