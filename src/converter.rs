//! External image conversion
//!
//! Runs a configured converter program over downloaded images to produce the
//! device artifacts the publisher picks up. The conversion itself is opaque;
//! this module only resolves the program, fills in its argument template and
//! keeps the output directory free of half-written artifacts.
//!
//! The argument template understands two placeholders:
//! - `{input}` - path of the source image
//! - `{output}` - path the artifact must be written to
//!
//! Artifacts are written under a hidden temporary name and renamed into place
//! once the program exits successfully.

use crate::config::{Config, ConvertConfig};
use crate::error::{ConvertError, Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Image extensions picked up from the download directory
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Resolve the converter program to an executable path
///
/// Values containing a path separator must point at an existing file; bare
/// names are looked up on `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let missing = || Error::DependencyMissing {
        program: program.to_string(),
    };

    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let path = PathBuf::from(program);
        return if path.is_file() { Ok(path) } else { Err(missing()) };
    }
    which::which(program).map_err(|_| missing())
}

/// Substitute `{input}` and `{output}` in every template argument
pub fn render_args(template: &[String], input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    template
        .iter()
        .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
        .collect()
}

/// Images in `dir` with a known extension, sorted by file name
pub async fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::MissingFile(dir.to_path_buf()));
    }

    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::filesystem(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::filesystem(dir, e))?
    {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// What happened to one image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertOutcome {
    /// Artifact was produced
    Converted,
    /// Artifact already existed
    Skipped,
    /// The converter failed
    Failed,
}

/// Run-level conversion counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    /// Images converted in this run
    pub converted: usize,
    /// Images whose artifact already existed
    pub skipped: usize,
    /// Images the converter failed on
    pub failed: usize,
    /// The run stopped early because of a shutdown request
    pub interrupted: bool,
}

impl ConvertSummary {
    fn record(&mut self, outcome: ConvertOutcome) {
        match outcome {
            ConvertOutcome::Converted => self.converted += 1,
            ConvertOutcome::Skipped => self.skipped += 1,
            ConvertOutcome::Failed => self.failed += 1,
        }
    }

    /// Images processed
    pub fn total(&self) -> usize {
        self.converted + self.skipped + self.failed
    }
}

impl std::fmt::Display for ConvertSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} converted={} skipped={} failed={}",
            self.total(),
            self.converted,
            self.skipped,
            self.failed
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Runs the external converter over a directory of images
pub struct Converter {
    program: PathBuf,
    args: Vec<String>,
    output_dir: PathBuf,
    archive_dir: Option<PathBuf>,
    extension: String,
}

impl Converter {
    /// Create a converter for an already resolved program
    pub fn new(program: PathBuf, config: &ConvertConfig) -> Self {
        Self {
            program,
            args: config.args.clone(),
            output_dir: config.output_dir.clone(),
            archive_dir: None,
            extension: config.extension.trim_start_matches('.').to_string(),
        }
    }

    /// Resolve the configured program and create a converter
    pub fn from_config(config: &ConvertConfig) -> Result<Self> {
        let program = config
            .program
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::config("no converter program configured", "convert.program"))?;
        let resolved = resolve_program(program)?;
        debug!(program = %resolved.display(), "Resolved converter");
        Ok(Self::new(resolved, config))
    }

    /// Also treat artifacts already moved into `archive_dir` as converted
    pub fn with_archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(archive_dir.into());
        self
    }

    async fn already_published(&self, artifact: &Path) -> bool {
        match (&self.archive_dir, artifact.file_name()) {
            (Some(dir), Some(name)) => tokio::fs::try_exists(dir.join(name)).await.unwrap_or(false),
            _ => false,
        }
    }

    /// Artifact path for `image`
    pub fn artifact_path(&self, image: &Path) -> PathBuf {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_dir.join(format!("{stem}.{}", self.extension))
    }

    async fn run_program(&self, input: &Path, output: &Path) -> std::result::Result<(), ConvertError> {
        let args = render_args(&self.args, input, output);
        let result = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConvertError::Spawn {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(ConvertError::Failed {
                input: input.to_path_buf(),
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ConvertError::NoOutput(output.to_path_buf()));
        }
        Ok(())
    }

    /// Convert one image unless its artifact already exists or was archived
    pub async fn convert(&self, image: &Path) -> ConvertOutcome {
        let artifact = self.artifact_path(image);
        if tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            debug!(image = %image.display(), "Skipped, artifact exists");
            return ConvertOutcome::Skipped;
        }
        if self.already_published(&artifact).await {
            debug!(image = %image.display(), "Skipped, artifact already published");
            return ConvertOutcome::Skipped;
        }

        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = artifact.with_file_name(format!(".{file_name}"));

        let result = match self.run_program(image, &staging).await {
            Ok(()) => tokio::fs::rename(&staging, &artifact)
                .await
                .map_err(|e| Error::filesystem(&artifact, e)),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                info!(image = %image.display(), artifact = %artifact.display(), "Converted");
                ConvertOutcome::Converted
            }
            Err(e) => {
                tokio::fs::remove_file(&staging).await.ok();
                error!(image = %image.display(), error = %e, "Conversion failed");
                ConvertOutcome::Failed
            }
        }
    }

    /// Convert every image in `images_dir`
    pub async fn run(&self, images_dir: &Path, shutdown: &CancellationToken) -> Result<ConvertSummary> {
        let images = list_images(images_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Error::filesystem(&self.output_dir, e))?;

        info!(
            images = images.len(),
            program = %self.program.display(),
            output_dir = %self.output_dir.display(),
            "Starting conversion"
        );

        let mut summary = ConvertSummary::default();
        for image in &images {
            if shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            summary.record(self.convert(image).await);
        }

        if summary.interrupted {
            warn!(%summary, "Conversion interrupted");
        } else {
            info!(%summary, "Conversion finished");
        }
        Ok(summary)
    }
}

/// Convert stage: turn downloaded images into artifacts
pub async fn run_convert(config: &Config, shutdown: CancellationToken) -> Result<ConvertSummary> {
    Converter::from_config(&config.convert)?
        .with_archive_dir(&config.publish.archive_dir)
        .run(&config.download.download_dir, &shutdown)
        .await
}
