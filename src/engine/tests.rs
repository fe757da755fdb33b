use super::*;
use crate::{
  error::ErrorCode,
  test_support::{chunked_body, cut_off_body, full_body, partial_body, rom_bytes, serve, slow_body},
};
use axum::{
  extract::State,
  http::{header, HeaderMap, StatusCode},
  response::IntoResponse,
  routing::get,
  Router,
};
use std::{
  path::Path,
  sync::atomic::{AtomicUsize, Ordering},
};
use tempfile::TempDir;

struct Harness {
  dir: TempDir,
  settings: SettingsStore,
  engine: DownloadEngine,
}

impl Harness {
  fn library(&self) -> PathBuf {
    self.dir.path().join("ROMs")
  }

  fn staging(&self) -> PathBuf {
    self.dir.path().join("Downloads").join("CrocStore")
  }

  async fn wait_terminal(&self, rom_id: &str) -> DownloadTask {
    self
      .wait_until(rom_id, |t| t.status.is_terminal())
      .await
  }

  async fn wait_until(&self, rom_id: &str, pred: impl Fn(&DownloadTask) -> bool) -> DownloadTask {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
      if let Some(task) = self.engine.progress(rom_id) {
        if pred(&task) {
          return task;
        }
      }
      assert!(Instant::now() < deadline, "timed out waiting on {rom_id}");
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }
}

async fn harness(limit: usize, limits: EngineLimits) -> Harness {
  let dir = tempfile::tempdir().unwrap();
  let settings = SettingsStore::new(dir.path().join("settings").join("settings.json"));
  settings.load().await;
  let db = Db::open(dir.path().join("settings").join("history.sqlite3")).unwrap();
  db.init_schema().unwrap();
  let engine = DownloadEngine::with_limits(
    LibraryPaths {
      library_dir: dir.path().join("ROMs"),
      staging_dir: dir.path().join("Downloads").join("CrocStore"),
    },
    settings.clone(),
    Transport::new().unwrap(),
    db,
    limit,
    limits,
  );
  Harness {
    dir,
    settings,
    engine,
  }
}

fn quick_retries() -> EngineLimits {
  EngineLimits {
    retry_base_delay: Duration::from_millis(10),
    ..EngineLimits::default()
  }
}

fn rom(id: &str, name: &str, platform: &str, url: String) -> RomRecord {
  RomRecord {
    id: id.to_string(),
    name: name.to_string(),
    platform: platform.to_string(),
    download_url: url,
    ..RomRecord::default()
  }
}

async fn static_server() -> String {
  let app = Router::new()
    .route("/roms/foo", get(|| async { full_body(rom_bytes(4096)) }))
    .route("/roms/bar", get(|| async { full_body(rom_bytes(1000)) }))
    .route(
      "/roms/slow",
      get(|| async { slow_body(200, 1024, Duration::from_millis(25)) }),
    )
    .route(
      "/roms/trickle-a",
      get(|| async { slow_body(8, 1024, Duration::from_millis(15)) }),
    )
    .route(
      "/roms/trickle-b",
      get(|| async { slow_body(5, 2048, Duration::from_millis(20)) }),
    )
    .route("/roms/broken", get(|| async { cut_off_body(rom_bytes(4096), 1024) }))
    .route("/roms/missing", get(|| async { StatusCode::NOT_FOUND }));
  serve(app).await
}

/// Records every progress value `rom_id` reports until the handle is aborted.
fn sample_progress(
  engine: &DownloadEngine,
  rom_id: &str,
) -> (tokio::task::JoinHandle<()>, Arc<parking_lot::Mutex<Vec<u8>>>) {
  let samples = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let handle = {
    let engine = engine.clone();
    let rom_id = rom_id.to_string();
    let samples = samples.clone();
    tokio::spawn(async move {
      loop {
        if let Some(t) = engine.progress(&rom_id) {
          samples.lock().push(t.progress);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
      }
    })
  };
  (handle, samples)
}

type SeenRanges = Arc<parking_lot::Mutex<Vec<Option<String>>>>;

fn range_start(range: Option<&str>) -> Option<usize> {
  range?.strip_prefix("bytes=")?.strip_suffix('-')?.parse().ok()
}

/// First request is cut off after 1 KiB. Later ones honor `Range` when `ranged` is set
/// and otherwise send the whole body again.
async fn interrupted_server(ranged: bool) -> (String, SeenRanges) {
  let seen: SeenRanges = Arc::default();
  let app = Router::new()
    .route(
      "/roms/flaky",
      get(move |State(seen): State<SeenRanges>, headers: HeaderMap| async move {
        let range = headers
          .get(header::RANGE)
          .and_then(|v| v.to_str().ok())
          .map(str::to_string);
        let first = {
          let mut seen = seen.lock();
          seen.push(range.clone());
          seen.len() == 1
        };
        let data = rom_bytes(4096);
        if first {
          return cut_off_body(data, 1024);
        }
        match range_start(range.as_deref()).filter(|_| ranged) {
          Some(start) => partial_body(data[start..].to_vec()),
          None => full_body(data),
        }
      }),
    )
    .with_state(seen.clone());
  (serve(app).await, seen)
}

#[tokio::test]
async fn completed_download_is_organized_into_the_platform_dir() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/foo")))
    .await;

  assert!(ok);
  let task = h.engine.progress("rom_1").unwrap();
  let expected = h.library().join("NES").join("Foo.zip");
  assert_eq!(task.status, DownloadStatus::Completed);
  assert_eq!(task.progress, 100);
  assert_eq!(task.total_size, 4096);
  assert_eq!(task.downloaded_size, 4096);
  assert_eq!(task.final_path.as_deref(), Some(expected.display().to_string().as_str()));
  assert_eq!(std::fs::read(&expected).unwrap(), rom_bytes(4096));
  assert!(!h.staging().join("Foo.zip").exists());
}

#[tokio::test]
async fn concurrent_downloads_track_progress_independently() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;

  let samples = Arc::new(parking_lot::Mutex::new(Vec::<(String, u8)>::new()));
  let poller = {
    let engine = h.engine.clone();
    let samples = samples.clone();
    tokio::spawn(async move {
      loop {
        for id in ["rom_a", "rom_b"] {
          if let Some(t) = engine.progress(id) {
            samples.lock().push((id.to_string(), t.progress));
          }
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
      }
    })
  };

  let (a, b) = tokio::join!(
    h.engine
      .download("rom_a", rom("rom_a", "Alpha", "GBA", format!("{base}/roms/trickle-a"))),
    h.engine
      .download("rom_b", rom("rom_b", "Beta", "SNES", format!("{base}/roms/trickle-b"))),
  );
  poller.abort();

  assert!(a && b);
  let a = h.engine.progress("rom_a").unwrap();
  let b = h.engine.progress("rom_b").unwrap();
  assert_eq!(a.downloaded_size, 8 * 1024);
  assert_eq!(b.downloaded_size, 5 * 2048);
  assert!(Path::new(a.final_path.as_deref().unwrap()).ends_with("GBA/Alpha.zip"));
  assert!(Path::new(b.final_path.as_deref().unwrap()).ends_with("SNES/Beta.zip"));

  let samples = samples.lock();
  for id in ["rom_a", "rom_b"] {
    let seq: Vec<u8> = samples.iter().filter(|(s, _)| s == id).map(|(_, p)| *p).collect();
    assert!(seq.windows(2).all(|w| w[0] <= w[1]), "{id} went backwards: {seq:?}");
  }
}

#[tokio::test]
async fn progress_before_download_is_not_found() {
  let h = harness(3, EngineLimits::default()).await;
  assert!(h.engine.progress("rom_404").is_none());
  assert!(h.engine.all_progress().is_empty());
}

#[tokio::test]
async fn failed_download_never_reaches_the_library() {
  let base = static_server().await;
  let h = harness(3, quick_retries()).await;

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/missing")))
    .await;

  assert!(!ok);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.status, DownloadStatus::Failed);
  assert_eq!(task.error_code, Some(ErrorCode::Http4xx));
  assert!(task.error.unwrap().contains("404"));
  assert_eq!(task.final_path, None);
  assert!(!h.library().join("NES").join("Foo.zip").exists());
}

#[tokio::test]
async fn invalid_url_fails_without_network() {
  let h = harness(3, quick_retries()).await;

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", "ftp://example.com/foo.zip".to_string()))
    .await;

  assert!(!ok);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.error_code, Some(ErrorCode::InvalidUrl));
}

#[tokio::test]
async fn server_errors_are_retried_before_failing() {
  let hits = Arc::new(AtomicUsize::new(0));
  let app = Router::new()
    .route(
      "/roms/flaky",
      get(|State(hits): State<Arc<AtomicUsize>>| async move {
        hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::INTERNAL_SERVER_ERROR
      }),
    )
    .with_state(hits.clone());
  let base = serve(app).await;
  let h = harness(3, quick_retries()).await;

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/flaky")))
    .await;

  assert!(!ok);
  assert_eq!(hits.load(Ordering::SeqCst), 3);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.status, DownloadStatus::Failed);
  assert_eq!(task.error_code, Some(ErrorCode::Http5xx));
}

#[tokio::test]
async fn transient_server_error_recovers_on_retry() {
  let hits = Arc::new(AtomicUsize::new(0));
  let app = Router::new()
    .route(
      "/roms/once",
      get(|State(hits): State<Arc<AtomicUsize>>| async move {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
          StatusCode::SERVICE_UNAVAILABLE.into_response()
        } else {
          full_body(rom_bytes(2048))
        }
      }),
    )
    .with_state(hits.clone());
  let base = serve(app).await;
  let h = harness(3, quick_retries()).await;

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/once")))
    .await;

  assert!(ok);
  assert_eq!(hits.load(Ordering::SeqCst), 2);
  let final_path = h.library().join("NES").join("Foo.zip");
  assert_eq!(std::fs::read(final_path).unwrap(), rom_bytes(2048));
}

#[tokio::test]
async fn cancel_stops_the_download_and_removes_staging() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;

  let mut status = h
    .engine
    .enqueue("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/slow")))
    .unwrap();
  h.wait_until("rom_1", |t| t.downloaded_size > 0).await;
  assert!(h.staging().join("Foo.zip").exists());

  assert!(h.engine.cancel("rom_1"));
  let end = *status.wait_for(|s| s.is_terminal()).await.unwrap();

  assert_eq!(end, DownloadStatus::Cancelled);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.error_code, Some(ErrorCode::Cancelled));
  assert_eq!(task.final_path, None);
  assert!(!h.staging().join("Foo.zip").exists());
  assert!(!h.library().join("NES").join("Foo.zip").exists());
  assert!(!h.engine.cancel("rom_1"));
}

#[tokio::test]
async fn cancel_of_unknown_rom_is_a_noop() {
  let h = harness(3, EngineLimits::default()).await;
  assert!(!h.engine.cancel("nope"));
  assert_eq!(h.engine.cancel_all(), 0);
}

#[tokio::test]
async fn limit_of_one_keeps_the_second_download_pending() {
  let base = static_server().await;
  let h = harness(1, EngineLimits::default()).await;

  h.engine
    .enqueue("rom_a", rom("rom_a", "Alpha", "NES", format!("{base}/roms/slow")))
    .unwrap();
  let mut second = h
    .engine
    .enqueue("rom_b", rom("rom_b", "Beta", "NES", format!("{base}/roms/bar")))
    .unwrap();

  h.wait_until("rom_a", |t| t.status == DownloadStatus::Downloading).await;
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(h.engine.progress("rom_b").unwrap().status, DownloadStatus::Pending);

  assert!(h.engine.cancel("rom_a"));
  let end = *second.wait_for(|s| s.is_terminal()).await.unwrap();
  assert_eq!(end, DownloadStatus::Completed);
}

#[tokio::test]
async fn raising_the_limit_admits_a_waiting_download() {
  let base = static_server().await;
  let h = harness(1, EngineLimits::default()).await;

  h.engine
    .enqueue("rom_a", rom("rom_a", "Alpha", "NES", format!("{base}/roms/slow")))
    .unwrap();
  let mut second = h
    .engine
    .enqueue("rom_b", rom("rom_b", "Beta", "NES", format!("{base}/roms/bar")))
    .unwrap();
  h.wait_until("rom_a", |t| t.status == DownloadStatus::Downloading).await;

  h.engine.set_concurrent_limit(2);
  let end = *second.wait_for(|s| s.is_terminal()).await.unwrap();
  assert_eq!(end, DownloadStatus::Completed);
  assert_eq!(h.engine.progress("rom_a").unwrap().status, DownloadStatus::Downloading);
  h.engine.cancel_all();
}

#[tokio::test]
async fn full_queue_rejects_without_registering_a_task() {
  let base = static_server().await;
  let limits = EngineLimits {
    max_queued: 1,
    ..EngineLimits::default()
  };
  let h = harness(1, limits).await;
  let slow = |id: &str| rom(id, id, "NES", format!("{base}/roms/slow"));

  h.engine.enqueue("rom_a", slow("rom_a")).unwrap();
  h.engine.enqueue("rom_b", slow("rom_b")).unwrap();
  let err = h.engine.enqueue("rom_c", slow("rom_c")).unwrap_err();

  assert!(matches!(err, StoreError::Rejected));
  assert!(h.engine.progress("rom_c").is_none());
  assert!(!h.engine.download("rom_c", slow("rom_c")).await);
  assert_eq!(h.engine.cancel_all(), 2);
}

#[tokio::test]
async fn same_rom_cannot_be_downloaded_twice_at_once() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;
  let slow = rom("rom_1", "Foo", "NES", format!("{base}/roms/slow"));

  h.engine.enqueue("rom_1", slow.clone()).unwrap();
  let err = h.engine.enqueue("rom_1", slow).unwrap_err();

  assert!(matches!(err, StoreError::AlreadyActive(id) if id == "rom_1"));
  assert!(h.engine.cancel("rom_1"));
  h.wait_terminal("rom_1").await;
}

#[tokio::test]
async fn same_display_name_gets_the_rom_id_appended() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;
  let nes = h.library().join("NES");

  assert!(h.engine.download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/foo"))).await);
  assert!(h.engine.download("rom_2", rom("rom_2", "Foo", "NES", format!("{base}/roms/bar"))).await);

  assert_eq!(std::fs::metadata(nes.join("Foo.zip")).unwrap().len(), 4096);
  assert_eq!(std::fs::metadata(nes.join("Foo [rom_2].zip")).unwrap().len(), 1000);

  // A re-download of the owner keeps its plain name and overwrites the task in place.
  assert!(h.engine.download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/foo"))).await);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.final_path.as_deref(), Some(nes.join("Foo.zip").display().to_string().as_str()));
  assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn auto_organize_off_leaves_the_file_in_staging() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;
  h.settings
    .save_partial(serde_json::json!({ "auto_organize": false }))
    .await
    .unwrap();

  assert!(h.engine.download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/foo"))).await);

  let staged = h.staging().join("Foo.zip");
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.final_path.as_deref(), Some(staged.display().to_string().as_str()));
  assert!(staged.exists());
  assert!(!h.library().join("NES").join("Foo.zip").exists());
}

#[tokio::test]
async fn finished_tasks_are_evicted_but_stay_readable() {
  let base = static_server().await;
  let limits = EngineLimits {
    max_retained_finished: 1,
    ..EngineLimits::default()
  };
  let h = harness(3, limits).await;

  assert!(h.engine.download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/foo"))).await);
  assert!(h.engine.download("rom_2", rom("rom_2", "Bar", "NES", format!("{base}/roms/bar"))).await);

  let deadline = Instant::now() + Duration::from_secs(5);
  while h.engine.inner.tasks.len() > 1 {
    assert!(Instant::now() < deadline, "finished task never evicted");
    tokio::time::sleep(Duration::from_millis(5)).await;
  }

  let evicted = h.engine.progress("rom_1").unwrap();
  assert_eq!(evicted.status, DownloadStatus::Completed);
  assert_eq!(evicted.progress, 100);
  let all = h.engine.all_progress();
  assert_eq!(all.keys().collect::<Vec<_>>(), ["rom_1", "rom_2"]);
}

#[tokio::test]
async fn same_display_name_in_staging_gets_the_rom_id_appended() {
  let base = static_server().await;
  let h = harness(3, EngineLimits::default()).await;
  h.settings
    .save_partial(serde_json::json!({ "auto_organize": false }))
    .await
    .unwrap();

  assert!(h.engine.download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/foo"))).await);
  assert!(h.engine.download("rom_2", rom("rom_2", "Foo", "NES", format!("{base}/roms/bar"))).await);

  let first = h.engine.progress("rom_1").unwrap();
  let second = h.engine.progress("rom_2").unwrap();
  let plain = h.staging().join("Foo.zip");
  let suffixed = h.staging().join("Foo [rom_2].zip");
  assert_eq!(first.final_path.as_deref(), Some(plain.display().to_string().as_str()));
  assert_eq!(second.final_path.as_deref(), Some(suffixed.display().to_string().as_str()));
  assert_eq!(std::fs::read(&plain).unwrap(), rom_bytes(4096));
  assert_eq!(std::fs::read(&suffixed).unwrap(), rom_bytes(1000));
}

#[tokio::test]
async fn failed_download_keeps_its_staging_file_from_other_roms() {
  let base = static_server().await;
  let h = harness(3, quick_retries()).await;

  assert!(!h.engine.download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/broken"))).await);
  let failed = h.engine.progress("rom_1").unwrap();
  assert_eq!(failed.status, DownloadStatus::Failed);
  assert_eq!(failed.error_code, Some(ErrorCode::Incomplete));
  let leftover = h.staging().join("Foo.zip");
  assert_eq!(std::fs::metadata(&leftover).unwrap().len(), 1024);

  assert!(h.engine.download("rom_2", rom("rom_2", "Foo", "NES", format!("{base}/roms/bar"))).await);

  let task = h.engine.progress("rom_2").unwrap();
  let expected = h.library().join("NES").join("Foo [rom_2].zip");
  assert_eq!(task.final_path.as_deref(), Some(expected.display().to_string().as_str()));
  assert_eq!(std::fs::metadata(&leftover).unwrap().len(), 1024);
}

#[tokio::test]
async fn interrupted_download_resumes_with_a_range_request() {
  let (base, seen) = interrupted_server(true).await;
  let h = harness(3, quick_retries()).await;
  let (sampler, samples) = sample_progress(&h.engine, "rom_1");

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/flaky")))
    .await;
  sampler.abort();

  assert!(ok);
  assert_eq!(*seen.lock(), vec![None, Some("bytes=1024-".to_string())]);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.total_size, 4096);
  assert_eq!(task.downloaded_size, 4096);
  assert_eq!(std::fs::read(h.library().join("NES").join("Foo.zip")).unwrap(), rom_bytes(4096));

  let samples = samples.lock();
  assert!(samples.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {samples:?}");
}

#[tokio::test]
async fn server_ignoring_range_restarts_the_file() {
  let (base, seen) = interrupted_server(false).await;
  let h = harness(3, quick_retries()).await;
  let (sampler, samples) = sample_progress(&h.engine, "rom_1");

  let ok = h
    .engine
    .download("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/flaky")))
    .await;
  sampler.abort();

  assert!(ok);
  assert_eq!(seen.lock().len(), 2);
  assert_eq!(seen.lock()[1].as_deref(), Some("bytes=1024-"));
  // A 200 reply replaces what was there instead of being appended to it.
  assert_eq!(std::fs::read(h.library().join("NES").join("Foo.zip")).unwrap(), rom_bytes(4096));

  let samples = samples.lock();
  assert!(samples.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {samples:?}");
}

#[tokio::test]
async fn unknown_length_reports_zero_until_complete() {
  let app = Router::new().route(
    "/roms/chunked",
    get(|| async { chunked_body(8, 256, Duration::from_millis(20)) }),
  );
  let base = serve(app).await;
  let h = harness(3, EngineLimits::default()).await;

  let mut status = h
    .engine
    .enqueue("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/chunked")))
    .unwrap();
  let midway = h
    .wait_until("rom_1", |t| t.status == DownloadStatus::Downloading && t.downloaded_size > 0)
    .await;
  assert_eq!(midway.progress, 0);
  assert_eq!(midway.total_size, 0);

  let end = *status.wait_for(|s| s.is_terminal()).await.unwrap();
  assert_eq!(end, DownloadStatus::Completed);
  let task = h.engine.progress("rom_1").unwrap();
  assert_eq!(task.progress, 100);
  assert_eq!(task.total_size, 2048);
  assert_eq!(task.downloaded_size, 2048);
}

#[tokio::test]
async fn cancel_during_retry_backoff_stops_at_once() {
  let hits = Arc::new(AtomicUsize::new(0));
  let app = Router::new()
    .route(
      "/roms/down",
      get(|State(hits): State<Arc<AtomicUsize>>| async move {
        hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::SERVICE_UNAVAILABLE
      }),
    )
    .with_state(hits.clone());
  let base = serve(app).await;
  let limits = EngineLimits {
    retry_base_delay: Duration::from_secs(30),
    ..EngineLimits::default()
  };
  let h = harness(3, limits).await;

  let mut status = h
    .engine
    .enqueue("rom_1", rom("rom_1", "Foo", "NES", format!("{base}/roms/down")))
    .unwrap();
  let deadline = Instant::now() + Duration::from_secs(5);
  while hits.load(Ordering::SeqCst) == 0 {
    assert!(Instant::now() < deadline, "first attempt never arrived");
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  tokio::time::sleep(Duration::from_millis(50)).await;

  assert!(h.engine.cancel("rom_1"));
  let end = *tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| s.is_terminal()))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(end, DownloadStatus::Cancelled);
  assert_eq!(hits.load(Ordering::SeqCst), 1);
  assert_eq!(h.engine.progress("rom_1").unwrap().error_code, Some(ErrorCode::Cancelled));
}

#[tokio::test]
async fn terminal_task_is_kept_until_history_has_it() {
  let limits = EngineLimits {
    max_retained_finished: 0,
    finished_ttl: Duration::ZERO,
    ..EngineLimits::default()
  };
  let h = harness(3, limits).await;
  let record = rom("rom_1", "Foo", "NES", "http://127.0.0.1:9/foo.zip".to_string());
  let slot = Arc::new(TaskSlot::new(DownloadTask::pending("rom_1", &record, 1, now_rfc3339())));
  h.engine.inner.tasks.insert("rom_1".to_string(), slot.clone());

  slot.update(|t| t.status = DownloadStatus::Completed);
  h.engine.all_progress();
  assert_eq!(h.engine.progress("rom_1").unwrap().status, DownloadStatus::Completed);
  assert_eq!(h.engine.inner.tasks.len(), 1);

  h.engine.inner.record_finished(&slot);
  assert!(h.engine.inner.tasks.is_empty());
  assert_eq!(h.engine.progress("rom_1").unwrap().status, DownloadStatus::Completed);
}
