use super::*;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::{TempDir, tempdir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Transfer that records how many fetches run at once
#[derive(Default)]
struct InstrumentedTransfer {
    delay: Duration,
    fail_urls: HashSet<String>,
    started: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl InstrumentedTransfer {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for InstrumentedTransfer {
    async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<u64, DownloadError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let result = if self.fail_urls.contains(url) {
            tokio::fs::write(dest, b"partial").await.ok();
            Err(DownloadError::Status {
                url: url.to_string(),
                status: 503,
            })
        } else {
            tokio::fs::write(dest, b"image").await.map_err(|e| DownloadError::Write {
                path: dest.to_path_buf(),
                reason: e.to_string(),
            })?;
            Ok(5)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "instrumented"
    }
}

fn entries(count: usize) -> Vec<QueueEntry> {
    (0..count)
        .map(|i| QueueEntry {
            name: format!("pet{i}"),
            url: format!("https://img.example/pet{i}.jpg"),
        })
        .collect()
}

fn download_config(dir: &TempDir, parallel: usize) -> DownloadConfig {
    DownloadConfig {
        download_dir: dir.path().join("images"),
        parallel,
        retries: 2,
        retry_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        pause: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn second_run_skips_everything() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::default());
    let engine = DownloadEngine::new(transfer.clone(), download_config(&dir, 2));

    let first = engine.run(entries(4)).await.unwrap();
    assert_eq!(first.downloaded, 4);
    assert_eq!(transfer.started(), 4);

    let second = engine.run(entries(4)).await.unwrap();
    assert_eq!(
        second,
        DownloadSummary {
            downloaded: 0,
            skipped: 4,
            failed: 0,
            interrupted: false
        }
    );
    assert_eq!(transfer.started(), 4, "no new transfers on the second run");
}

#[tokio::test]
async fn parallel_downloads_never_exceed_the_gate() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::with_delay(Duration::from_millis(30)));
    let engine = DownloadEngine::new(transfer.clone(), download_config(&dir, 3));

    let summary = engine.run(entries(10)).await.unwrap();

    assert_eq!(summary.downloaded, 10);
    let max_active = transfer.max_active.load(Ordering::SeqCst);
    assert!(max_active <= 3, "saw {max_active} concurrent downloads");
    assert!(max_active > 1, "downloads should overlap, saw {max_active}");
}

#[tokio::test]
async fn sequential_mode_runs_one_at_a_time_with_pause() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::default());
    let mut config = download_config(&dir, 1);
    config.pause = Duration::from_millis(50);
    let engine = DownloadEngine::new(transfer.clone(), config);

    let start = std::time::Instant::now();
    let summary = engine.run(entries(3)).await.unwrap();

    assert_eq!(summary.downloaded, 3);
    assert_eq!(transfer.max_active.load(Ordering::SeqCst), 1);
    // Two pauses between three downloads
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn skipped_entries_do_not_pause() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::default());
    let mut config = download_config(&dir, 1);
    config.pause = Duration::from_millis(500);
    std::fs::create_dir_all(&config.download_dir).unwrap();
    for entry in entries(3) {
        std::fs::write(entry.destination_in(&config.download_dir), b"x").unwrap();
    }
    let engine = DownloadEngine::new(transfer, config);

    let start = std::time::Instant::now();
    let summary = engine.run(entries(3)).await.unwrap();
    assert_eq!(summary.skipped, 3);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn interrupt_drains_in_flight_and_stops_new_work() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::with_delay(Duration::from_millis(100)));
    let engine = DownloadEngine::new(transfer.clone(), download_config(&dir, 2));
    let shutdown = engine.shutdown_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.cancel();
    });

    let summary = engine.run(entries(10)).await.unwrap();

    assert!(summary.interrupted);
    assert!(transfer.started() < 10, "new work must stop after interrupt");
    assert_eq!(
        summary.total(),
        transfer.started(),
        "every started download is accounted for"
    );
    assert_eq!(
        transfer.active.load(Ordering::SeqCst),
        0,
        "in-flight downloads finished before run returned"
    );

    // Nothing half-written is left behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("images"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn interrupt_after_last_entry_started_is_reported() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::with_delay(Duration::from_millis(150)));
    let engine = DownloadEngine::new(transfer.clone(), download_config(&dir, 3));
    let shutdown = engine.shutdown_token();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
    });
    let summary = engine.run(entries(2)).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(summary.downloaded, 2);
    assert!(summary.interrupted);
}

#[tokio::test]
async fn interrupt_during_sequential_pause_returns_promptly() {
    let dir = tempdir().unwrap();
    let transfer = Arc::new(InstrumentedTransfer::default());
    let mut config = download_config(&dir, 1);
    config.pause = Duration::from_secs(30);
    let engine = DownloadEngine::new(transfer.clone(), config);
    let shutdown = engine.shutdown_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
    });

    let start = std::time::Instant::now();
    let summary = engine.run(entries(5)).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(summary.interrupted);
    assert_eq!(summary.downloaded, 1);
}

#[tokio::test]
async fn failed_download_removes_partial_file() {
    let dir = tempdir().unwrap();
    let doomed = entries(2);
    let transfer = Arc::new(InstrumentedTransfer {
        fail_urls: [doomed[1].url.clone()].into(),
        ..Default::default()
    });
    let config = download_config(&dir, 1);
    let images = config.download_dir.clone();
    let engine = DownloadEngine::new(transfer.clone(), config);

    let summary = engine.run(doomed.clone()).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 1);
    // One attempt for the good entry, two for the failing one
    assert_eq!(transfer.started(), 3);
    let failed_dest = doomed[1].destination_in(&images);
    assert!(!failed_dest.exists());
    assert!(!partial_path(&failed_dest).exists());
}

#[tokio::test]
async fn slow_attempts_time_out() {
    let dir = tempdir().unwrap();
    let transfer = InstrumentedTransfer::with_delay(Duration::from_secs(10));
    let entry = &entries(1)[0];
    let destination = dir.path().join(entry.file_name());

    let outcome = download(
        &transfer,
        entry,
        &destination,
        &RetryConfig::fixed(2, Duration::from_millis(5)),
        Duration::from_millis(50),
    )
    .await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    assert_eq!(transfer.started(), 2);
    assert!(!destination.exists());
}

#[test]
fn partial_path_appends_suffix() {
    assert_eq!(
        partial_path(Path::new("/tmp/images/fido.jpg")),
        PathBuf::from("/tmp/images/fido.jpg.part")
    );
}

#[test]
fn summary_display_includes_interruption() {
    let summary = DownloadSummary {
        downloaded: 2,
        skipped: 1,
        failed: 1,
        interrupted: true,
    };
    assert_eq!(
        summary.to_string(),
        "total=4 downloaded=2 skipped=1 failed=1 (interrupted)"
    );
}

// HTTP transfer tests

#[tokio::test]
async fn http_transfer_writes_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photos/fido.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"JPEGDATA".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let entry = QueueEntry {
        name: "fido".into(),
        url: format!("{}/photos/fido.jpg", server.uri()),
    };
    let destination = entry.destination_in(dir.path());
    let transfer = HttpTransfer::with_default_client().unwrap();

    let outcome = download(
        &transfer,
        &entry,
        &destination,
        &RetryConfig::fixed(3, Duration::from_millis(5)),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome, DownloadOutcome::Downloaded);
    assert_eq!(std::fs::read(&destination).unwrap(), b"JPEGDATA");
}

#[tokio::test]
async fn http_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let entry = QueueEntry {
        name: "gone".into(),
        url: format!("{}/gone.jpg", server.uri()),
    };
    let transfer = HttpTransfer::with_default_client().unwrap();
    let outcome = download(
        &transfer,
        &entry,
        &entry.destination_in(dir.path()),
        &RetryConfig::fixed(3, Duration::from_millis(5)),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome, DownloadOutcome::Failed);
}

#[tokio::test]
async fn http_server_errors_use_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let entry = QueueEntry {
        name: "busy".into(),
        url: format!("{}/busy.jpg", server.uri()),
    };
    let transfer = HttpTransfer::with_default_client().unwrap();
    let outcome = download(
        &transfer,
        &entry,
        &entry.destination_in(dir.path()),
        &RetryConfig::fixed(3, Duration::from_millis(5)),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    assert!(!entry.destination_in(dir.path()).exists());
}

// Stage entry point

#[tokio::test]
async fn run_download_refuses_invalid_queue() {
    let dir = tempdir().unwrap();
    let queue = dir.path().join("queue.txt");
    std::fs::write(&queue, "fido:https://h/f.jpg\nbroken line\n").unwrap();

    let mut config = Config::default();
    config.download.queue_file = queue;
    config.download.download_dir = dir.path().join("images");

    let err = run_download(&config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { errors: 1 }));
    assert!(!dir.path().join("images").exists());
}

#[tokio::test]
async fn run_download_requires_queue_file() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.download.queue_file = dir.path().join("missing.txt");

    let err = run_download(&config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingFile(_)));
}

#[tokio::test]
async fn run_download_with_skip_invalid_uses_valid_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/f.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"F".to_vec()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let queue = dir.path().join("queue.txt");
    std::fs::write(
        &queue,
        format!("# today\nfido:{}/f.jpg\n:no-name\n", server.uri()),
    )
    .unwrap();

    let mut config = Config::default();
    config.download.queue_file = queue;
    config.download.download_dir = dir.path().join("images");
    config.download.skip_invalid = true;
    config.download.pause = Duration::ZERO;

    let summary = run_download(&config, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.downloaded, 1);
    assert!(dir.path().join("images/fido.jpg").exists());
}
