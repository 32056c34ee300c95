//! Image download engine.
//!
//! Downloads queue entries into a directory with per-item retries. Items that
//! already exist are skipped, so re-running a finished queue is a no-op.
//!
//! - With `parallel > 1` a semaphore gates how many downloads are in flight.
//! - With `parallel == 1` downloads run one after another with a pause between them.
//! - Cancelling the shutdown token stops new downloads from starting; in-flight
//!   downloads finish and the summary is marked interrupted.

mod transfer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use transfer::{HttpTransfer, Transfer};

use crate::config::{Config, DownloadConfig, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::queue::{QueueEntry, validate_queue};
use crate::retry::retry_with_backoff;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What happened to one queue entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// File was downloaded
    Downloaded,
    /// File already existed
    Skipped,
    /// All attempts failed
    Failed,
}

/// Run-level download counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Entries downloaded in this run
    pub downloaded: usize,
    /// Entries whose file already existed
    pub skipped: usize,
    /// Entries that exhausted their attempts
    pub failed: usize,
    /// The run stopped early because of a shutdown request
    pub interrupted: bool,
}

impl DownloadSummary {
    /// Count one outcome
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded => self.downloaded += 1,
            DownloadOutcome::Skipped => self.skipped += 1,
            DownloadOutcome::Failed => self.failed += 1,
        }
    }

    /// Entries processed
    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}

impl std::fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} downloaded={} skipped={} failed={}",
            self.total(),
            self.downloaded,
            self.skipped,
            self.failed
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Sibling path a transfer streams into before it is renamed into place
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial file"),
    }
}

/// Download a single entry to `destination`
///
/// Skips when `destination` exists. Otherwise makes up to `retry.max_attempts`
/// attempts, each bounded by `timeout`.
pub async fn download(
    transfer: &dyn Transfer,
    entry: &QueueEntry,
    destination: &Path,
    retry: &RetryConfig,
    timeout: Duration,
) -> DownloadOutcome {
    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        tracing::info!(name = %entry.name, path = %destination.display(), "Skipped, file exists");
        return DownloadOutcome::Skipped;
    }

    let part = partial_path(destination);
    let part_path = part.as_path();
    let attempt = || async move {
        match tokio::time::timeout(timeout, transfer.fetch(&entry.url, part_path)).await {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout {
                url: entry.url.clone(),
                after: timeout,
            }),
        }
    };

    match retry_with_backoff(retry, attempt).await {
        Ok(bytes) => match tokio::fs::rename(&part, destination).await {
            Ok(()) => {
                tracing::info!(
                    name = %entry.name,
                    bytes,
                    path = %destination.display(),
                    "Downloaded"
                );
                DownloadOutcome::Downloaded
            }
            Err(e) => {
                tracing::error!(name = %entry.name, error = %e, "Failed to move download into place");
                remove_partial(&part).await;
                DownloadOutcome::Failed
            }
        },
        Err(e) => {
            remove_partial(&part).await;
            tracing::error!(name = %entry.name, url = %entry.url, error = %e, "Download failed");
            DownloadOutcome::Failed
        }
    }
}

/// Runs a batch of downloads with bounded parallelism and graceful interruption
#[derive(Clone)]
pub struct DownloadEngine {
    transfer: Arc<dyn Transfer>,
    config: Arc<DownloadConfig>,
    shutdown: CancellationToken,
}

impl DownloadEngine {
    /// Create an engine using `transfer` and the download settings
    pub fn new(transfer: Arc<dyn Transfer>, config: DownloadConfig) -> Self {
        Self {
            transfer,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Token that interrupts the batch when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn retry_policy(&self) -> RetryConfig {
        RetryConfig::fixed(self.config.retries.max(1), self.config.retry_delay)
    }

    /// Download one entry into the configured directory
    pub async fn download(&self, entry: &QueueEntry) -> DownloadOutcome {
        let destination = entry.destination_in(&self.config.download_dir);
        download(
            self.transfer.as_ref(),
            entry,
            &destination,
            &self.retry_policy(),
            self.config.timeout,
        )
        .await
    }

    /// Download every entry, returning the run summary
    pub async fn run(&self, entries: Vec<QueueEntry>) -> Result<DownloadSummary> {
        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| Error::filesystem(&self.config.download_dir, e))?;

        let parallel = self.config.parallel.max(1);
        tracing::info!(
            entries = entries.len(),
            parallel,
            dir = %self.config.download_dir.display(),
            backend = self.transfer.name(),
            "Starting downloads"
        );

        let mut summary = if parallel == 1 {
            self.run_sequential(entries).await
        } else {
            self.run_parallel(entries, parallel).await
        };
        // A signal during the last in-flight downloads still counts
        summary.interrupted |= self.shutdown.is_cancelled();

        if summary.interrupted {
            tracing::warn!(%summary, "Downloads interrupted");
        } else {
            tracing::info!(%summary, "Downloads finished");
        }
        Ok(summary)
    }

    async fn run_sequential(&self, entries: Vec<QueueEntry>) -> DownloadSummary {
        let mut summary = DownloadSummary::default();
        let remaining = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let outcome = self.download(entry).await;
            summary.record(outcome);

            let more = index + 1 < remaining;
            if more && outcome != DownloadOutcome::Skipped && !self.config.pause.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        summary.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.pause) => {}
                }
            }
        }

        summary
    }

    async fn run_parallel(&self, entries: Vec<QueueEntry>, parallel: usize) -> DownloadSummary {
        let mut summary = DownloadSummary::default();
        let gate = Arc::new(Semaphore::new(parallel));
        let mut tasks = JoinSet::new();

        for entry in entries {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    summary.interrupted = true;
                    break;
                }
                permit = gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                engine.download(&entry).await
            });
        }

        if summary.interrupted {
            tracing::warn!(in_flight = tasks.len(), "Shutdown requested, waiting for in-flight downloads");
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Download task panicked");
                    summary.record(DownloadOutcome::Failed);
                }
            }
        }

        summary
    }
}

/// Download stage: validate the queue file and download its entries
pub async fn run_download(config: &Config, shutdown: CancellationToken) -> Result<DownloadSummary> {
    let report = validate_queue(&config.download.queue_file).await?;
    if !report.is_clean() {
        if config.download.skip_invalid {
            tracing::warn!(
                skipped_lines = report.errors.len(),
                "Continuing with valid queue entries only"
            );
        } else {
            return Err(Error::Validation {
                errors: report.errors.len(),
            });
        }
    }

    let transfer = HttpTransfer::with_default_client()?;
    DownloadEngine::new(Arc::new(transfer), config.download.clone())
        .with_shutdown(shutdown)
        .run(report.entries)
        .await
}
