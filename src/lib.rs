//! # petfeed
//!
//! Pipeline that fetches adoptable-pet listings from the Petfinder API,
//! downloads their photos and publishes one device-ready frame at a time to a
//! path a picture-frame microcontroller polls over HTTP.
//!
//! ## Stages
//!
//! Each stage is a library function and a `petfeed` subcommand:
//!
//! | Stage | Function | Input | Output |
//! |-------|----------|-------|--------|
//! | fetch | [`petfinder::run_fetch`] | API | listing JSON |
//! | extract | [`petfinder::run_extract`] | listing JSON | queue file |
//! | validate | [`queue::validate_queue`] | queue file | report |
//! | download | [`downloader::run_download`] | queue file | images |
//! | convert | [`converter::run_convert`] | images | artifacts |
//! | publish | [`publisher::Publisher::run`] | artifacts | device path |
//!
//! ## Quick Start
//!
//! ```no_run
//! use petfeed::{Config, downloader::run_download, shutdown_on_signal};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let shutdown = CancellationToken::new();
//!     tokio::spawn(shutdown_on_signal(shutdown.clone()));
//!
//!     let summary = run_download(&config, shutdown).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Command line surface
pub mod cli;
/// Configuration types
pub mod config;
/// External image conversion
pub mod converter;
/// Image download engine
pub mod downloader;
/// Error types
pub mod error;
/// Tracing subscriber setup
pub mod logging;
/// Petfinder API client and listing stages
pub mod petfinder;
/// Artifact publisher loop
pub mod publisher;
/// Queue file parsing and validation
pub mod queue;
/// Retry logic with backoff
pub mod retry;

pub use config::{
    ApiConfig, Config, ConvertConfig, DownloadConfig, ExtractConfig, FetchConfig, PhotoSize,
    PublishConfig, RetryConfig,
};
pub use converter::{ConvertSummary, Converter, run_convert};
pub use downloader::{DownloadEngine, DownloadOutcome, DownloadSummary, run_download};
pub use error::{Error, Result, ToExitCode};
pub use publisher::{PublishSummary, Publisher, PublisherState};
pub use queue::{QueueEntry, QueueReport, validate_queue};
pub use retry::{IsRetryable, retry_with_backoff};

use tokio_util::sync::CancellationToken;

/// Cancel `shutdown` when a termination signal arrives
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early without cancelling if the token is cancelled elsewhere.
pub async fn shutdown_on_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = wait_for_signal() => {
            tracing::warn!("Shutdown requested, finishing in-flight work");
            shutdown.cancel();
        }
    }
}

/// Register a listener for `kind`, logging instead of failing
#[cfg(unix)]
fn listen(
    kind: tokio::signal::unix::SignalKind,
    label: &'static str,
) -> Option<(tokio::signal::unix::Signal, &'static str)> {
    match tokio::signal::unix::signal(kind) {
        Ok(listener) => Some((listener, label)),
        Err(e) => {
            tracing::warn!(error = %e, signal = label, "Could not register signal handler");
            None
        }
    }
}

/// Wait on an optional listener; a missing one never fires
#[cfg(unix)]
async fn received(listener: &mut Option<(tokio::signal::unix::Signal, &'static str)>) -> &'static str {
    match listener {
        Some((signal, label)) => {
            signal.recv().await;
            *label
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::SignalKind;

    // Registration can fail in restricted environments (containers, tests)
    let mut sigterm = listen(SignalKind::terminate(), "SIGTERM");
    let mut sigint = listen(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("No signal handlers registered, falling back to ctrl_c");
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C");
        }
        return;
    }

    let name = tokio::select! {
        name = received(&mut sigterm) => name,
        name = received(&mut sigint) => name,
    };
    tracing::info!(signal = name, "Received termination signal");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
