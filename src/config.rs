//! Configuration types for petfeed
//!
//! Settings are layered: built-in defaults, then an optional JSON config file,
//! then environment variables, then command line flags (applied by the CLI).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Petfinder API access (endpoints, credentials, token cache)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API base URL (default: "https://api.petfinder.com/v2")
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// OAuth2 client id
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth2 client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Directory holding the cached bearer token (default: "./.petfeed-cache")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Subtracted from the issued token lifetime before caching (default: 60 seconds)
    #[serde(default = "default_token_safety_margin", with = "duration_serde")]
    pub token_safety_margin: Duration,

    /// Per-request timeout for API calls (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Retry policy for token and listing requests
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            client_id: None,
            client_secret: None,
            cache_dir: default_cache_dir(),
            token_safety_margin: default_token_safety_margin(),
            request_timeout: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Client credential pair, or a credentials error naming what is missing
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let id = self
            .client_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Credentials("PETFINDER_CLIENT_ID is not set".to_string()))?;
        let secret = self
            .client_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Credentials("PETFINDER_CLIENT_SECRET is not set".to_string()))?;
        Ok((id, secret))
    }
}

/// Retry configuration for transient failures
///
/// `max_attempts` counts every attempt, including the first one.
/// A `backoff_multiplier` of 1.0 gives a fixed delay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts before giving up (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay after a rate-limited (HTTP 429) response (default: 30 seconds)
    #[serde(default = "default_rate_limit_delay", with = "duration_ms_serde")]
    pub rate_limit_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            rate_limit_delay: default_rate_limit_delay(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Fixed-delay policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            rate_limit_delay: delay,
            jitter: false,
        }
    }
}

/// Listing query and output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Animal type filter (e.g. "dog")
    #[serde(default)]
    pub animal_type: Option<String>,

    /// Size filter: small, medium, large or xlarge
    #[serde(default)]
    pub size: Option<String>,

    /// Location filter (zip code or "city, state")
    #[serde(default)]
    pub location: Option<String>,

    /// Number of results, 1..=100 (default: 20)
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Extra query parameters passed through unchanged
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Where the listing JSON is written (default: "pets.json")
    #[serde(default = "default_listings_file")]
    pub output: PathBuf,

    /// Pretty-print the JSON output (default: true)
    #[serde(default = "default_true")]
    pub pretty: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            animal_type: None,
            size: None,
            location: None,
            limit: default_limit(),
            params: BTreeMap::new(),
            output: default_listings_file(),
            pretty: true,
        }
    }
}

/// Photo variant taken from each listing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoSize {
    /// Thumbnail-sized photo
    Small,
    /// Medium photo (default)
    #[default]
    Medium,
    /// Large photo
    Large,
    /// Original upload
    Full,
}

impl PhotoSize {
    /// Key of this variant in a listing's photo object
    pub fn key(&self) -> &'static str {
        match self {
            PhotoSize::Small => "small",
            PhotoSize::Medium => "medium",
            PhotoSize::Large => "large",
            PhotoSize::Full => "full",
        }
    }
}

impl std::str::FromStr for PhotoSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(PhotoSize::Small),
            "medium" => Ok(PhotoSize::Medium),
            "large" => Ok(PhotoSize::Large),
            "full" => Ok(PhotoSize::Full),
            other => Err(Error::config(
                format!("unknown photo size {other:?} (expected small, medium, large or full)"),
                "photo_size",
            )),
        }
    }
}

/// Queue extraction settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Photo variant to queue
    #[serde(default)]
    pub photo_size: PhotoSize,
}

/// Image download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Queue file of `name:url` lines (default: "pets.queue.txt")
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,

    /// Directory images are saved to (default: "./images")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum in-flight downloads (default: 1)
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Attempts per image (default: 3)
    #[serde(default = "default_max_attempts")]
    pub retries: u32,

    /// Fixed delay between attempts (default: 2 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Per-attempt timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Pause between sequential downloads (default: 1 second)
    #[serde(default = "default_pause", with = "duration_serde")]
    pub pause: Duration,

    /// Download the valid entries even if some queue lines are invalid
    #[serde(default)]
    pub skip_invalid: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            download_dir: default_download_dir(),
            parallel: default_parallel(),
            retries: default_max_attempts(),
            retry_delay: default_retry_delay(),
            timeout: default_request_timeout(),
            pause: default_pause(),
            skip_invalid: false,
        }
    }
}

/// External converter settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Converter program (name on PATH or path)
    #[serde(default)]
    pub program: Option<String>,

    /// Argument template; `{input}` and `{output}` are substituted
    #[serde(default = "default_convert_args")]
    pub args: Vec<String>,

    /// Directory converted artifacts are written to (default: "./converted")
    #[serde(default = "default_watch_dir")]
    pub output_dir: PathBuf,

    /// Artifact file extension (default: "raw")
    #[serde(default = "default_artifact_extension")]
    pub extension: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_convert_args(),
            output_dir: default_watch_dir(),
            extension: default_artifact_extension(),
        }
    }
}

/// Publisher loop settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Directory scanned for ready artifacts (default: "./converted")
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,

    /// Glob matched against artifact file names (default: "*.raw")
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Device-visible path (default: "./www/frame.raw")
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    /// Optional file receiving the published pet's name
    #[serde(default)]
    pub name_file: Option<PathBuf>,

    /// Directory published artifacts are moved to (default: "./published")
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Sleep between scans when no artifact is waiting (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Sleep between checks while the destination is still occupied (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub busy_interval: Duration,

    /// Time given to the device to read a published artifact (default: 60 seconds)
    #[serde(default = "default_consumption_window", with = "duration_serde")]
    pub consumption_window: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            pattern: default_pattern(),
            destination: default_destination(),
            name_file: None,
            archive_dir: default_archive_dir(),
            poll_interval: default_poll_interval(),
            busy_interval: default_poll_interval(),
            consumption_window: default_consumption_window(),
        }
    }
}

/// Main configuration for petfeed
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// API endpoints, credentials and token cache
    #[serde(default)]
    pub api: ApiConfig,

    /// Listing query
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Queue extraction
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Image downloads
    #[serde(default)]
    pub download: DownloadConfig,

    /// External conversion
    #[serde(default)]
    pub convert: ConvertConfig,

    /// Publisher loop
    #[serde(default)]
    pub publish: PublishConfig,

    /// Additional log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load defaults, overlay an optional JSON file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("invalid config file {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Overlay settings from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay settings from an arbitrary variable lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PETFINDER_CLIENT_ID") {
            self.api.client_id = Some(v);
        }
        if let Some(v) = get("PETFINDER_CLIENT_SECRET") {
            self.api.client_secret = Some(v);
        }
        if let Some(v) = get("PETFEED_API_BASE") {
            self.api.base_url = v;
        }
        if let Some(v) = get("PETFEED_CACHE_DIR") {
            self.api.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PETFEED_DOWNLOAD_DIR") {
            self.download.download_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PETFEED_PARALLEL") {
            self.download.parallel = parse_env("PETFEED_PARALLEL", &v)?;
        }
        if let Some(v) = get("PETFEED_RETRIES") {
            self.download.retries = parse_env("PETFEED_RETRIES", &v)?;
        }
        if let Some(v) = get("PETFEED_SLEEP_SECS") {
            self.download.pause = Duration::from_secs(parse_env("PETFEED_SLEEP_SECS", &v)?);
        }
        if let Some(v) = get("PETFEED_WATCH_DIR") {
            self.publish.watch_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PETFEED_DESTINATION") {
            self.publish.destination = PathBuf::from(v);
        }
        if let Some(v) = get("PETFEED_ARCHIVE_DIR") {
            self.publish.archive_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PETFEED_CONSUME_SECS") {
            self.publish.consumption_window =
                Duration::from_secs(parse_env("PETFEED_CONSUME_SECS", &v)?);
        }
        if let Some(v) = get("PETFEED_POLL_SECS") {
            let secs = parse_env("PETFEED_POLL_SECS", &v)?;
            self.publish.poll_interval = Duration::from_secs(secs);
            self.publish.busy_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get("PETFEED_LOG_FILE") {
            self.log_file = Some(PathBuf::from(v));
        }

        Ok(())
    }

    /// Reject values no stage can run with
    pub fn validate(&self) -> Result<()> {
        if self.download.parallel == 0 {
            return Err(Error::config("parallel must be at least 1", "parallel"));
        }
        if self.download.retries == 0 {
            return Err(Error::config("retries must be at least 1", "retries"));
        }
        if self.api.retry.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts must be at least 1",
                "api.retry.max_attempts",
            ));
        }
        if self.api.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier must be >= 1.0",
                "api.retry.backoff_multiplier",
            ));
        }
        if !(1..=100).contains(&self.fetch.limit) {
            return Err(Error::config(
                format!("limit must be between 1 and 100, got {}", self.fetch.limit),
                "limit",
            ));
        }
        if self.publish.pattern.trim().is_empty() {
            return Err(Error::config("pattern must not be empty", "pattern"));
        }
        if self.publish.watch_dir == self.publish.archive_dir {
            return Err(Error::config(
                "archive_dir must differ from watch_dir",
                "archive_dir",
            ));
        }
        url::Url::parse(&self.api.base_url).map_err(|e| {
            Error::config(format!("invalid api base url: {}", e), "api.base_url")
        })?;
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{key}={value:?}: {e}"), key))
}

fn default_api_base() -> String {
    "https://api.petfinder.com/v2".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./.petfeed-cache")
}

fn default_token_safety_margin() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limit_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_limit() -> u32 {
    20
}

fn default_listings_file() -> PathBuf {
    PathBuf::from("pets.json")
}

fn default_true() -> bool {
    true
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("pets.queue.txt")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_parallel() -> usize {
    1
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_convert_args() -> Vec<String> {
    vec!["{input}".to_string(), "{output}".to_string()]
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("./converted")
}

fn default_artifact_extension() -> String {
    "raw".to_string()
}

fn default_pattern() -> String {
    "*.raw".to_string()
}

fn default_destination() -> PathBuf {
    PathBuf::from("./www/frame.raw")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./published")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_consumption_window() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond duration serialization helper (retry delays)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
