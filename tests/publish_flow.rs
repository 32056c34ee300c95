//! Convert and publish stages working on the same directories

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::test_config;
use petfeed::publisher::StepOutcome;
use petfeed::{Publisher, run_convert};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

#[tokio::test]
async fn converted_artifacts_are_published_one_at_a_time() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &server);
    config.convert.program = Some("sh".into());
    config.convert.args = vec![
        "-c".into(),
        r#"cp "$0" "$1""#.into(),
        "{input}".into(),
        "{output}".into(),
    ];
    config.publish.name_file = Some(dir.path().join("www/name.txt"));
    config.publish.consumption_window = Duration::ZERO;

    let images = &config.download.download_dir;
    std::fs::create_dir_all(images).unwrap();
    std::fs::write(images.join("Fido.jpg"), "fido").unwrap();
    std::fs::write(images.join("Rex.png"), "rex").unwrap();

    let summary = run_convert(&config, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.converted, 2);

    let mut publisher = Publisher::new(config.publish.clone()).unwrap();
    let first = publisher.step().await;
    assert!(matches!(first, StepOutcome::Published(_)));
    let shown = std::fs::read_to_string(dir.path().join("www/name.txt")).unwrap();

    // The device has not fetched the frame yet
    assert_eq!(publisher.step().await, StepOutcome::DestinationBusy);

    std::fs::remove_file(&config.publish.destination).unwrap();
    assert!(matches!(publisher.step().await, StepOutcome::Published(_)));
    let shown_next = std::fs::read_to_string(dir.path().join("www/name.txt")).unwrap();
    assert_ne!(shown, shown_next);

    assert_eq!(publisher.step().await, StepOutcome::NothingToPublish);

    let archived = std::fs::read_dir(&config.publish.archive_dir).unwrap().count();
    assert_eq!(archived, 2);

    // The images are still downloaded; published pets are not converted again
    let rerun = run_convert(&config, CancellationToken::new()).await.unwrap();
    assert_eq!(rerun.converted, 0);
    assert_eq!(rerun.skipped, 2);
    assert_eq!(publisher.step().await, StepOutcome::NothingToPublish);
}
