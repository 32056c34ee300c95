//! Error types for petfeed
//!
//! This module provides the error hierarchy shared by every pipeline stage:
//! - Stage-level errors that abort a run (configuration, credentials, missing files)
//! - Per-item errors that are aggregated into a batch summary (queue lines, downloads, conversions)
//! - Process exit code mapping for the command line surface

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for petfeed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for petfeed
///
/// Each variant includes enough context to produce a clear one-line message
/// when a stage aborts.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "parallel")
        key: Option<String>,
    },

    /// API credentials are missing or were rejected
    #[error("credentials error: {0}")]
    Credentials(String),

    /// A required external program is not installed
    #[error("required program not found: {program}")]
    DependencyMissing {
        /// Program name or path that could not be resolved
        program: String,
    },

    /// A file the stage needs as input does not exist
    #[error("required file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// Token acquisition failed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Listing request failed after all retries
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Listing response did not have the expected shape
    #[error("schema error: {0}")]
    Schema(String),

    /// A single malformed queue line
    #[error("queue format error: {0}")]
    QueueFormat(#[from] QueueFormatError),

    /// Queue validation found errors and the caller refused to proceed
    #[error("validation failed: {errors} invalid queue line(s)")]
    Validation {
        /// Number of rejected lines
        errors: usize,
    },

    /// A single download failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// A single conversion failed
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// Directory creation, copy, or archive failure
    #[error("filesystem error at {}: {reason}", path.display())]
    Filesystem {
        /// The path the operation was acting on
        path: PathBuf,
        /// The reason the operation failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was stopped by a termination signal
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// Shorthand for [`Error::Config`] with a key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Shorthand for [`Error::Filesystem`]
    pub fn filesystem(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Filesystem {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Token endpoint errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The endpoint refused the client credentials (400/401/403)
    #[error("token endpoint rejected the client credentials (HTTP {status})")]
    Rejected {
        /// HTTP status returned by the endpoint
        status: u16,
    },

    /// Non-success status that may succeed on a later attempt
    #[error("token endpoint returned HTTP {status}")]
    Status {
        /// HTTP status returned by the endpoint
        status: u16,
    },

    /// Transport-level failure (connect, timeout, body read)
    #[error("token request failed: {0}")]
    Request(String),

    /// 2xx response without a usable token
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

/// Listing endpoint errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 429 from the listing endpoint
    #[error("rate limited by listing endpoint")]
    RateLimited {
        /// Server-provided `Retry-After` delay, if any
        retry_after: Option<Duration>,
    },

    /// Bearer token was not accepted
    #[error("listing endpoint rejected the bearer token")]
    Unauthorized,

    /// Any other non-success status
    #[error("listing endpoint returned HTTP {status}")]
    Status {
        /// HTTP status returned by the endpoint
        status: u16,
    },

    /// Transport-level failure (connect, timeout, body read)
    #[error("listing request failed: {0}")]
    Request(String),
}

/// Per-line queue file errors
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueFormatError {
    /// Line has no `:` separator
    #[error("line {line}: missing ':' separator between name and url")]
    MissingSeparator {
        /// Line number
        line: usize,
    },

    /// Nothing before the separator
    #[error("line {line}: empty name")]
    EmptyName {
        /// Line number
        line: usize,
    },

    /// Nothing after the separator
    #[error("line {line}: empty url")]
    EmptyUrl {
        /// Line number
        line: usize,
    },

    /// Name cannot be used as a file stem
    #[error("line {line}: invalid name {name:?}")]
    InvalidName {
        /// Line number
        line: usize,
        /// The offending name
        name: String,
    },

    /// URL is not an absolute http(s) URL
    #[error("line {line}: invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// Line number
        line: usize,
        /// The offending URL
        url: String,
        /// Why the URL was rejected
        reason: String,
    },

    /// Name already used by an earlier line
    #[error("line {line}: duplicate name {name:?} (first seen on line {first_line})")]
    DuplicateName {
        /// Line number
        line: usize,
        /// The repeated name
        name: String,
        /// Line of the first occurrence
        first_line: usize,
    },
}

impl QueueFormatError {
    /// Line the error was found on
    pub fn line(&self) -> usize {
        match self {
            QueueFormatError::MissingSeparator { line }
            | QueueFormatError::EmptyName { line }
            | QueueFormatError::EmptyUrl { line }
            | QueueFormatError::InvalidName { line, .. }
            | QueueFormatError::InvalidUrl { line, .. }
            | QueueFormatError::DuplicateName { line, .. } => *line,
        }
    }
}

/// Per-item download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Non-success HTTP status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Source URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Attempt exceeded the per-attempt timeout
    #[error("{url} timed out after {}s", after.as_secs())]
    Timeout {
        /// Source URL
        url: String,
        /// The timeout that elapsed
        after: Duration,
    },

    /// Transport-level failure
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Source URL
        url: String,
        /// Underlying error text
        reason: String,
    },

    /// Writing the destination file failed
    #[error("failed to write {}: {reason}", path.display())]
    Write {
        /// File being written
        path: PathBuf,
        /// Underlying error text
        reason: String,
    },
}

/// Per-item conversion errors
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter could not be started
    #[error("failed to run {program}: {reason}")]
    Spawn {
        /// Converter program
        program: String,
        /// Underlying error text
        reason: String,
    },

    /// The converter exited unsuccessfully
    #[error("converter failed for {} (exit code {code:?}): {stderr}", input.display())]
    Failed {
        /// Image being converted
        input: PathBuf,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Trimmed stderr output
        stderr: String,
    },

    /// The converter succeeded but produced no output file
    #[error("converter produced no output at {}", .0.display())]
    NoOutput(PathBuf),
}

/// Process exit codes used by the command line surface
pub mod exit_code {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// Runtime failure (auth, fetch, schema, filesystem, failed batch items)
    pub const FAILURE: i32 = 1;
    /// Invalid input parameter (clap uses the same code for usage errors)
    pub const INVALID_INPUT: i32 = 2;
    /// Required external program missing
    pub const DEPENDENCY_MISSING: i32 = 3;
    /// Missing or invalid API credentials
    pub const CREDENTIALS: i32 = 4;
    /// Required input file missing
    pub const MISSING_FILE: i32 = 5;
    /// Queue validation failed
    pub const VALIDATION: i32 = 6;
    /// Stopped by SIGINT/SIGTERM
    pub const INTERRUPTED: i32 = 130;
}

/// Map errors to process exit codes
pub trait ToExitCode {
    /// Exit code the process should terminate with
    fn exit_code(&self) -> i32;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => exit_code::INVALID_INPUT,
            Error::Credentials(_) => exit_code::CREDENTIALS,
            Error::Auth(AuthError::Rejected { .. }) => exit_code::CREDENTIALS,
            Error::DependencyMissing { .. } => exit_code::DEPENDENCY_MISSING,
            Error::MissingFile(_) => exit_code::MISSING_FILE,
            Error::QueueFormat(_) | Error::Validation { .. } => exit_code::VALIDATION,
            Error::Interrupted => exit_code::INTERRUPTED,
            Error::Auth(_)
            | Error::Fetch(_)
            | Error::Schema(_)
            | Error::Download(_)
            | Error::Convert(_)
            | Error::Filesystem { .. }
            | Error::Io(_)
            | Error::Network(_)
            | Error::Serialization(_) => exit_code::FAILURE,
        }
    }
}
