//! Main entry point for the petfeed CLI

use clap::Parser;
use petfeed::cli::{Cli, Commands};
use petfeed::error::exit_code;
use petfeed::{Config, Error, Publisher, Result, ToExitCode};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Exit code for a batch stage that ran to completion or was interrupted
fn batch_exit_code(interrupted: bool, failed: usize) -> i32 {
    if interrupted {
        exit_code::INTERRUPTED
    } else if failed > 0 {
        exit_code::FAILURE
    } else {
        exit_code::SUCCESS
    }
}

/// Run `stage` unless shutdown is requested first
async fn interruptible<T>(
    shutdown: &CancellationToken,
    stage: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(Error::Interrupted),
        result = stage => result,
    }
}

async fn run(cli: Cli, config: Config, shutdown: CancellationToken) -> Result<i32> {
    match cli.command {
        Commands::Fetch(_) => {
            let count = interruptible(&shutdown, petfeed::petfinder::run_fetch(&config)).await?;
            println!("fetched {count} listings into {}", config.fetch.output.display());
            Ok(exit_code::SUCCESS)
        }
        Commands::Extract(_) => {
            let report =
                interruptible(&shutdown, petfeed::petfinder::run_extract(&config)).await?;
            println!(
                "queued {} pets into {}",
                report.queued,
                config.download.queue_file.display()
            );
            Ok(exit_code::SUCCESS)
        }
        Commands::Validate(_) => {
            let report = interruptible(
                &shutdown,
                petfeed::validate_queue(&config.download.queue_file),
            )
            .await?;
            for error in &report.errors {
                println!("{error}");
            }
            println!(
                "valid={} invalid={}",
                report.entries.len(),
                report.errors.len()
            );
            if report.is_clean() {
                Ok(exit_code::SUCCESS)
            } else {
                Err(Error::Validation {
                    errors: report.errors.len(),
                })
            }
        }
        Commands::Download(_) => {
            let summary = petfeed::run_download(&config, shutdown).await?;
            println!("{summary}");
            Ok(batch_exit_code(summary.interrupted, summary.failed))
        }
        Commands::Convert(_) => {
            let summary = petfeed::run_convert(&config, shutdown).await?;
            println!("{summary}");
            Ok(batch_exit_code(summary.interrupted, summary.failed))
        }
        Commands::Publish(_) => {
            let summary = Publisher::new(config.publish.clone())?
                .with_shutdown(shutdown)
                .run()
                .await?;
            println!(
                "published={} copy_failures={} archive_failures={}",
                summary.published, summary.copy_failures, summary.archive_failures
            );
            Ok(exit_code::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("petfeed: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = petfeed::logging::init(config.log_file.as_deref()) {
        eprintln!("petfeed: {e}");
        std::process::exit(e.exit_code());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(petfeed::shutdown_on_signal(shutdown.clone()));

    let code = match run(cli, config, shutdown).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "petfeed failed");
            eprintln!("petfeed: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
