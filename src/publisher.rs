//! Publisher loop handing one artifact at a time to the device
//!
//! The publisher scans a watch directory for artifacts matching a glob
//! pattern and publishes them in arrival order (modification time, then file
//! name). Publishing an artifact means:
//!
//! 1. Wait until the destination path is free (the device removes or the web
//!    server rotates it once consumed).
//! 2. Copy the artifact into the destination via a temp file and rename, and
//!    optionally write its display name next to it.
//! 3. Give the device the consumption window to pick it up.
//! 4. Move the artifact into the archive directory.
//!
//! A single task owns all publisher state. An artifact that was copied but
//! could not be archived is kept as pending; only its archive step is retried,
//! so it is never copied twice.
//!
//! # Example
//!
//! ```no_run
//! use petfeed::config::PublishConfig;
//! use petfeed::publisher::Publisher;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> petfeed::Result<()> {
//! let shutdown = CancellationToken::new();
//! let publisher = Publisher::new(PublishConfig::default())?.with_shutdown(shutdown.clone());
//!
//! // Runs until `shutdown` is cancelled
//! let summary = publisher.run().await?;
//! println!("published {} artifacts", summary.published);
//! # Ok(())
//! # }
//! ```

use crate::config::PublishConfig;
use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the publisher is in its cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    /// Waiting for an artifact or for the destination to free up
    Idle,
    /// Copying an artifact into the destination
    Copying,
    /// Artifact published, giving the device time to read it
    WaitingForConsumption,
    /// Moving the published artifact into the archive
    Archiving,
}

impl std::fmt::Display for PublisherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PublisherState::Idle => "idle",
            PublisherState::Copying => "copying",
            PublisherState::WaitingForConsumption => "waiting_for_consumption",
            PublisherState::Archiving => "archiving",
        };
        f.write_str(name)
    }
}

/// Result of one publisher step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No artifact is waiting
    NothingToPublish,
    /// The destination still holds an unconsumed artifact
    DestinationBusy,
    /// Copying failed; the artifact stays in the watch directory
    CopyFailed(PathBuf),
    /// Artifact was published and archived to the returned path
    Published(PathBuf),
    /// Artifact was published but archiving failed; it is retried next step
    ArchiveFailed(PathBuf),
    /// A previously pending artifact was archived to the returned path
    Archived(PathBuf),
    /// The artifact was removed from the watch directory before it could be
    /// archived; it is no longer tracked
    Vanished(PathBuf),
}

enum Archive {
    Moved(PathBuf),
    Failed,
    Vanished,
}

/// Counters reported when the loop stops
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Artifacts copied to the destination and archived
    pub published: usize,
    /// Failed copy attempts
    pub copy_failures: usize,
    /// Failed archive attempts
    pub archive_failures: usize,
}

/// Convert a file name glob (`*`, `?`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| Error::config(format!("invalid pattern {pattern:?}: {e}"), "pattern"))
}

/// Artifacts in `dir` whose file name matches `pattern`, oldest first
///
/// Ties on modification time are broken by file name. Hidden files are
/// ignored.
pub async fn scan_artifacts(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(SystemTime, String, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::filesystem(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::filesystem(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        // Dotfiles are still being written by the converter
        if name.starts_with('.') || !pattern.is_match(&name) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot stat artifact");
                continue;
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, name, entry.path()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

/// Hidden sibling used while a file is being written
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::filesystem(parent, e))?;
    }
    Ok(())
}

/// Copy `source` to `destination` so readers never see a partial file
pub async fn copy_atomic(source: &Path, destination: &Path) -> Result<u64> {
    ensure_parent(destination).await?;
    let tmp = temp_sibling(destination);

    let bytes = match tokio::fs::copy(source, &tmp).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(Error::filesystem(source, e));
        }
    };
    if let Err(e) = tokio::fs::rename(&tmp, destination).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(Error::filesystem(destination, e));
    }
    Ok(bytes)
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path).await?;
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::filesystem(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::filesystem(path, e))
}

/// First free path for `file_name` in `dir`, adding `-1`, `-2`, ... to the stem
fn unique_archive_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = as_path.extension().map(|e| e.to_string_lossy().into_owned());

    (1..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{stem}-{n}.{ext}")),
            None => dir.join(format!("{stem}-{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Move `artifact` into `archive_dir`, returning its new path
///
/// Falls back to copy and delete when a plain rename is not possible (for
/// example across filesystems).
pub async fn archive_artifact(artifact: &Path, archive_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(archive_dir)
        .await
        .map_err(|e| Error::filesystem(archive_dir, e))?;

    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::filesystem(artifact, "artifact has no file name"))?;
    let target = unique_archive_path(archive_dir, &file_name);

    if let Err(rename_err) = tokio::fs::rename(artifact, &target).await {
        debug!(error = %rename_err, "Rename into archive failed, copying instead");
        copy_atomic(artifact, &target).await?;
        if let Err(e) = tokio::fs::remove_file(artifact).await {
            // An artifact must not live in both directories
            tokio::fs::remove_file(&target).await.ok();
            return Err(Error::filesystem(artifact, e));
        }
    }
    Ok(target)
}

/// Name shown on the device for an artifact: its file stem
pub fn display_name(artifact: &Path) -> String {
    artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Long-running publisher
pub struct Publisher {
    config: PublishConfig,
    pattern: Regex,
    state: PublisherState,
    pending_archive: Option<PathBuf>,
    summary: PublishSummary,
    shutdown: CancellationToken,
}

impl Publisher {
    /// Create a publisher; fails if the pattern is not a valid glob
    pub fn new(config: PublishConfig) -> Result<Self> {
        let pattern = glob_to_regex(&config.pattern)?;
        Ok(Self {
            config,
            pattern,
            state: PublisherState::Idle,
            pending_archive: None,
            summary: PublishSummary::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Current state
    pub fn state(&self) -> PublisherState {
        self.state
    }

    /// Artifact copied to the destination but not yet archived
    pub fn pending_archive(&self) -> Option<&Path> {
        self.pending_archive.as_deref()
    }

    /// Counters so far
    pub fn summary(&self) -> &PublishSummary {
        &self.summary
    }

    fn transition(&mut self, next: PublisherState, artifact: Option<&Path>) {
        if self.state == next {
            return;
        }
        info!(
            from = %self.state,
            to = %next,
            artifact = artifact.map(|p| p.display().to_string()).unwrap_or_default(),
            "Publisher state change"
        );
        self.state = next;
    }

    /// Create the watch directory if it does not exist yet
    pub async fn prepare(&self) -> Result<()> {
        if !self.config.watch_dir.exists() {
            tokio::fs::create_dir_all(&self.config.watch_dir)
                .await
                .map_err(|e| Error::filesystem(&self.config.watch_dir, e))?;
            info!(dir = %self.config.watch_dir.display(), "Created watch directory");
        }
        Ok(())
    }

    /// Run one publishing cycle without the poll sleep
    ///
    /// The consumption window is still waited out; cancelling the shutdown
    /// token cuts it short and archives immediately.
    pub async fn step(&mut self) -> StepOutcome {
        if let Some(pending) = self.pending_archive.clone() {
            return match self.archive(&pending).await {
                Archive::Moved(archived) => StepOutcome::Archived(archived),
                Archive::Failed => StepOutcome::ArchiveFailed(pending),
                Archive::Vanished => StepOutcome::Vanished(pending),
            };
        }

        let artifact = match scan_artifacts(&self.config.watch_dir, &self.pattern).await {
            Ok(found) => match found.into_iter().next() {
                Some(artifact) => artifact,
                None => return StepOutcome::NothingToPublish,
            },
            Err(e) => {
                warn!(error = %e, "Failed to scan watch directory");
                return StepOutcome::NothingToPublish;
            }
        };

        match tokio::fs::try_exists(&self.config.destination).await {
            Ok(true) => {
                debug!(
                    destination = %self.config.destination.display(),
                    "Destination still occupied"
                );
                return StepOutcome::DestinationBusy;
            }
            Ok(false) => {}
            // The copy below reports the failure
            Err(e) => warn!(
                destination = %self.config.destination.display(),
                error = %e,
                "Cannot check destination"
            ),
        }

        self.transition(PublisherState::Copying, Some(artifact.as_path()));
        match copy_atomic(&artifact, &self.config.destination).await {
            Ok(bytes) => info!(
                artifact = %artifact.display(),
                destination = %self.config.destination.display(),
                bytes,
                "Published artifact"
            ),
            Err(e) => {
                error!(artifact = %artifact.display(), error = %e, "Failed to publish artifact");
                self.summary.copy_failures += 1;
                self.transition(PublisherState::Idle, Some(artifact.as_path()));
                return StepOutcome::CopyFailed(artifact);
            }
        }
        self.pending_archive = Some(artifact.clone());

        if let Some(name_file) = &self.config.name_file {
            let name = display_name(&artifact);
            match write_atomic(name_file, &name).await {
                Ok(()) => debug!(name = %name, path = %name_file.display(), "Wrote name file"),
                Err(e) => warn!(error = %e, "Failed to write name file"),
            }
        }

        self.transition(PublisherState::WaitingForConsumption, Some(artifact.as_path()));
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested during consumption window, archiving now");
            }
            _ = tokio::time::sleep(self.config.consumption_window) => {}
        }

        match self.archive(&artifact).await {
            Archive::Moved(archived) => {
                self.summary.published += 1;
                StepOutcome::Published(archived)
            }
            Archive::Failed => StepOutcome::ArchiveFailed(artifact),
            Archive::Vanished => {
                self.summary.published += 1;
                StepOutcome::Vanished(artifact)
            }
        }
    }

    async fn archive(&mut self, artifact: &Path) -> Archive {
        self.transition(PublisherState::Archiving, Some(artifact));
        let result = archive_artifact(artifact, &self.config.archive_dir).await;
        let archived = match result {
            Ok(archived) => {
                info!(
                    artifact = %artifact.display(),
                    archived = %archived.display(),
                    "Archived artifact"
                );
                self.pending_archive = None;
                Archive::Moved(archived)
            }
            Err(_) if matches!(tokio::fs::try_exists(artifact).await, Ok(false)) => {
                warn!(
                    artifact = %artifact.display(),
                    "Artifact disappeared before it could be archived"
                );
                self.pending_archive = None;
                Archive::Vanished
            }
            Err(e) => {
                error!(artifact = %artifact.display(), error = %e, "Failed to archive artifact");
                self.summary.archive_failures += 1;
                Archive::Failed
            }
        };
        self.transition(PublisherState::Idle, Some(artifact));
        archived
    }

    fn wait_after(&self, outcome: &StepOutcome) -> Duration {
        match outcome {
            StepOutcome::Published(_) | StepOutcome::Archived(_) | StepOutcome::Vanished(_) => {
                Duration::ZERO
            }
            StepOutcome::DestinationBusy => self.config.busy_interval,
            StepOutcome::NothingToPublish
            | StepOutcome::CopyFailed(_)
            | StepOutcome::ArchiveFailed(_) => self.config.poll_interval,
        }
    }

    /// Publish artifacts until the shutdown token is cancelled
    pub async fn run(mut self) -> Result<PublishSummary> {
        self.prepare().await?;
        info!(
            watch_dir = %self.config.watch_dir.display(),
            pattern = %self.config.pattern,
            destination = %self.config.destination.display(),
            archive_dir = %self.config.archive_dir.display(),
            "Publisher started"
        );

        while !self.shutdown.is_cancelled() {
            let outcome = self.step().await;
            let wait = self.wait_after(&outcome);
            if wait.is_zero() {
                continue;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        if let Some(pending) = self.pending_archive.clone() {
            // Last chance so the artifact is not published again on restart
            self.archive(&pending).await;
        }

        info!(
            published = self.summary.published,
            copy_failures = self.summary.copy_failures,
            archive_failures = self.summary.archive_failures,
            "Publisher stopped"
        );
        Ok(self.summary)
    }
}
