//! Command line surface
//!
//! Every flag is optional and, when given, overrides the value loaded from the
//! config file and environment.

use crate::config::{Config, PhotoSize};
use crate::petfinder::listings::parse_param;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level arguments
#[derive(Parser, Debug)]
#[command(name = "petfeed")]
#[command(about = "Fetch adoptable pet listings and feed their photos to a picture frame", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// JSON config file
    #[arg(long, global = true, env = "PETFEED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Pipeline stages
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Query the listing API and save the result as JSON
    Fetch(FetchArgs),
    /// Turn saved listings into a `name:url` download queue
    Extract(ExtractArgs),
    /// Check a queue file and report every invalid line
    Validate(ValidateArgs),
    /// Download the images named in a queue file
    Download(DownloadArgs),
    /// Run the external converter over downloaded images
    Convert(ConvertArgs),
    /// Hand converted artifacts to the device one at a time
    Publish(PublishArgs),
}

/// `fetch` flags
#[derive(Parser, Debug, Default)]
pub struct FetchArgs {
    /// Animal type (e.g. dog, cat)
    #[arg(long = "type")]
    pub animal_type: Option<String>,

    /// Size: small, medium, large or xlarge
    #[arg(long)]
    pub size: Option<String>,

    /// Zip code or "city, state"
    #[arg(long)]
    pub location: Option<String>,

    /// Number of results (1-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub limit: Option<u32>,

    /// Extra query parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Output file for the listing JSON
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Write compact instead of pretty JSON
    #[arg(long)]
    pub compact: bool,

    /// Token cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// API base URL
    #[arg(long)]
    pub api_base: Option<String>,
}

impl FetchArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.animal_type {
            config.fetch.animal_type = Some(v.clone());
        }
        if let Some(v) = &self.size {
            config.fetch.size = Some(v.clone());
        }
        if let Some(v) = &self.location {
            config.fetch.location = Some(v.clone());
        }
        if let Some(v) = self.limit {
            config.fetch.limit = v;
        }
        for (key, value) in &self.params {
            config.fetch.params.insert(key.clone(), value.clone());
        }
        if let Some(v) = &self.output {
            config.fetch.output = v.clone();
        }
        if self.compact {
            config.fetch.pretty = false;
        }
        if let Some(v) = &self.cache_dir {
            config.api.cache_dir = v.clone();
        }
        if let Some(v) = &self.api_base {
            config.api.base_url = v.clone();
        }
    }
}

/// `extract` flags
#[derive(Parser, Debug, Default)]
pub struct ExtractArgs {
    /// Listing JSON to read
    #[arg(long)]
    pub listings: Option<PathBuf>,

    /// Queue file to write
    #[arg(long)]
    pub queue_file: Option<PathBuf>,

    /// Photo size: small, medium, large or full
    #[arg(long)]
    pub photo_size: Option<PhotoSize>,
}

impl ExtractArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.listings {
            config.fetch.output = v.clone();
        }
        if let Some(v) = &self.queue_file {
            config.download.queue_file = v.clone();
        }
        if let Some(v) = self.photo_size {
            config.extract.photo_size = v;
        }
    }
}

/// `validate` flags
#[derive(Parser, Debug, Default)]
pub struct ValidateArgs {
    /// Queue file to check
    pub queue_file: Option<PathBuf>,
}

impl ValidateArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.queue_file {
            config.download.queue_file = v.clone();
        }
    }
}

/// `download` flags
#[derive(Parser, Debug, Default)]
pub struct DownloadArgs {
    /// Queue file to download
    pub queue_file: Option<PathBuf>,

    /// Directory to save images in
    #[arg(long, short)]
    pub dir: Option<PathBuf>,

    /// Maximum concurrent downloads
    #[arg(long, short, value_parser = clap::value_parser!(u64).range(1..=64))]
    pub parallel: Option<u64>,

    /// Attempts per image
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub retries: Option<u32>,

    /// Seconds to pause between sequential downloads
    #[arg(long)]
    pub sleep: Option<u64>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Download valid entries even when some queue lines are invalid
    #[arg(long)]
    pub skip_invalid: bool,
}

impl DownloadArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.queue_file {
            config.download.queue_file = v.clone();
        }
        if let Some(v) = &self.dir {
            config.download.download_dir = v.clone();
        }
        if let Some(v) = self.parallel {
            config.download.parallel = v as usize;
        }
        if let Some(v) = self.retries {
            config.download.retries = v;
        }
        if let Some(v) = self.sleep {
            config.download.pause = Duration::from_secs(v);
        }
        if let Some(v) = self.timeout {
            config.download.timeout = Duration::from_secs(v);
        }
        if self.skip_invalid {
            config.download.skip_invalid = true;
        }
    }
}

/// `convert` flags
#[derive(Parser, Debug, Default)]
pub struct ConvertArgs {
    /// Converter program (name on PATH or path)
    #[arg(long)]
    pub program: Option<String>,

    /// Converter argument; `{input}` and `{output}` are substituted (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Directory of downloaded images
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Directory to write artifacts to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Artifact file extension
    #[arg(long)]
    pub extension: Option<String>,
}

impl ConvertArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.program {
            config.convert.program = Some(v.clone());
        }
        if !self.args.is_empty() {
            config.convert.args = self.args.clone();
        }
        if let Some(v) = &self.images_dir {
            config.download.download_dir = v.clone();
        }
        if let Some(v) = &self.output_dir {
            config.convert.output_dir = v.clone();
        }
        if let Some(v) = &self.extension {
            config.convert.extension = v.clone();
        }
    }
}

/// `publish` flags
#[derive(Parser, Debug, Default)]
pub struct PublishArgs {
    /// Directory scanned for artifacts
    #[arg(long)]
    pub watch_dir: Option<PathBuf>,

    /// File name glob for artifacts (e.g. "*.raw")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Device-visible destination path
    #[arg(long)]
    pub destination: Option<PathBuf>,

    /// File receiving the published pet's name
    #[arg(long)]
    pub name_file: Option<PathBuf>,

    /// Directory published artifacts are moved to
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Seconds between scans
    #[arg(long)]
    pub poll: Option<u64>,

    /// Seconds the device is given to read a published artifact
    #[arg(long)]
    pub consume: Option<u64>,
}

impl PublishArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.watch_dir {
            config.publish.watch_dir = v.clone();
        }
        if let Some(v) = &self.pattern {
            config.publish.pattern = v.clone();
        }
        if let Some(v) = &self.destination {
            config.publish.destination = v.clone();
        }
        if let Some(v) = &self.name_file {
            config.publish.name_file = Some(v.clone());
        }
        if let Some(v) = &self.archive_dir {
            config.publish.archive_dir = v.clone();
        }
        if let Some(v) = self.poll {
            config.publish.poll_interval = Duration::from_secs(v);
            config.publish.busy_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.consume {
            config.publish.consumption_window = Duration::from_secs(v);
        }
    }
}

impl Cli {
    /// Overlay command line flags onto `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.log_file {
            config.log_file = Some(v.clone());
        }
        match &self.command {
            Commands::Fetch(args) => args.apply(config),
            Commands::Extract(args) => args.apply(config),
            Commands::Validate(args) => args.apply(config),
            Commands::Download(args) => args.apply(config),
            Commands::Convert(args) => args.apply(config),
            Commands::Publish(args) => args.apply(config),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("petfeed").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn fetch_flags_override_config() {
        let cli = parse(&[
            "fetch", "--type", "dog", "--limit", "50", "--param", "age=baby", "--compact",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.fetch.animal_type.as_deref(), Some("dog"));
        assert_eq!(config.fetch.limit, 50);
        assert_eq!(config.fetch.params.get("age").map(String::as_str), Some("baby"));
        assert!(!config.fetch.pretty);
    }

    #[test]
    fn out_of_range_limit_is_rejected() {
        let err = Cli::try_parse_from(["petfeed", "fetch", "--limit", "500"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn malformed_param_is_rejected() {
        assert!(Cli::try_parse_from(["petfeed", "fetch", "--param", "novalue"]).is_err());
    }

    #[test]
    fn download_flags_and_positional_queue() {
        let cli = parse(&[
            "download", "today.txt", "--parallel", "4", "--sleep", "0", "--skip-invalid",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.download.queue_file, PathBuf::from("today.txt"));
        assert_eq!(config.download.parallel, 4);
        assert_eq!(config.download.pause, Duration::ZERO);
        assert!(config.download.skip_invalid);
    }

    #[test]
    fn zero_parallel_is_rejected() {
        assert!(Cli::try_parse_from(["petfeed", "download", "--parallel", "0"]).is_err());
    }

    #[test]
    fn unset_flags_keep_config_values() {
        let cli = parse(&["download"]);
        let mut config = Config::default();
        config.download.parallel = 3;
        cli.apply(&mut config);
        assert_eq!(config.download.parallel, 3);
        assert!(!config.download.skip_invalid);
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = parse(&["publish", "--consume", "30", "--log-file", "/tmp/petfeed.log"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/petfeed.log")));
        assert_eq!(config.publish.consumption_window, Duration::from_secs(30));
    }

    #[test]
    fn convert_args_accept_leading_hyphens() {
        let cli = parse(&[
            "convert", "--program", "magick", "--arg", "{input}", "--arg", "-resize", "--arg",
            "{output}",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.convert.args, vec!["{input}", "-resize", "{output}"]);
    }

    #[test]
    fn photo_size_flag_parses() {
        let cli = parse(&["extract", "--photo-size", "large"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.extract.photo_size, PhotoSize::Large);
    }
}
