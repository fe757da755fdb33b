pub mod admission;
mod job;
pub mod naming;
pub mod placement;

use crate::{
  error::StoreError,
  model::{DownloadMap, DownloadStatus, DownloadTask, RomRecord},
  persistence::{Db, SettingsStore},
  transport::Transport,
};
use admission::Admission;
use dashmap::{mapref::entry::Entry, DashMap};
use job::{JobContext, JobControl};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::watch, time::Instant};

#[derive(Debug, Clone)]
pub struct LibraryPaths {
  /// `<home>/ROMs`, one subdirectory per platform.
  pub library_dir: PathBuf,
  /// `<home>/Downloads/CrocStore`
  pub staging_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EngineLimits {
  pub max_queued: usize,
  pub max_attempts: u32,
  pub retry_base_delay: Duration,
  pub max_retained_finished: usize,
  pub finished_ttl: Duration,
}

impl Default for EngineLimits {
  fn default() -> Self {
    Self {
      max_queued: 8,
      max_attempts: 3,
      retry_base_delay: Duration::from_millis(500),
      max_retained_finished: 64,
      finished_ttl: Duration::from_secs(30 * 60),
    }
  }
}

/// One rom id's live task. Only the job for that id writes to it.
pub(crate) struct TaskSlot {
  id: String,
  task: parking_lot::Mutex<DownloadTask>,
  control_tx: watch::Sender<JobControl>,
  status_tx: watch::Sender<DownloadStatus>,
  finished_at: parking_lot::Mutex<Option<Instant>>,
}

impl TaskSlot {
  fn new(task: DownloadTask) -> Self {
    let (control_tx, _) = watch::channel(JobControl::Run);
    let (status_tx, _) = watch::channel(task.status);
    Self {
      id: task.id.clone(),
      task: parking_lot::Mutex::new(task),
      control_tx,
      status_tx,
      finished_at: parking_lot::Mutex::new(None),
    }
  }

  pub(crate) fn id(&self) -> &str {
    &self.id
  }

  fn snapshot(&self) -> DownloadTask {
    self.task.lock().clone()
  }

  pub(crate) fn update(&self, f: impl FnOnce(&mut DownloadTask)) {
    let status = {
      let mut task = self.task.lock();
      let before = task.status;
      f(&mut task);
      task.updated_at = now_rfc3339();
      (task.status != before).then_some(task.status)
    };
    // Terminal statuses are published by `EngineInner::record_finished` once history has them.
    if let Some(status) = status.filter(|s| !s.is_terminal()) {
      self.status_tx.send_replace(status);
    }
  }

  fn finished_at(&self) -> Option<Instant> {
    *self.finished_at.lock()
  }

  fn is_finished(&self) -> bool {
    self.task.lock().status.is_terminal()
  }
}

/// Download-and-organize pipeline. Cheap to clone; all clones share one task map.
#[derive(Clone)]
pub struct DownloadEngine {
  inner: Arc<EngineInner>,
}

struct EngineInner {
  ctx: JobContext,
  admission: Admission,
  tasks: DashMap<String, Arc<TaskSlot>>,
}

impl DownloadEngine {
  pub fn new(
    paths: LibraryPaths,
    settings: SettingsStore,
    transport: Transport,
    db: Db,
    concurrent_limit: usize,
  ) -> Self {
    Self::with_limits(paths, settings, transport, db, concurrent_limit, EngineLimits::default())
  }

  pub fn with_limits(
    paths: LibraryPaths,
    settings: SettingsStore,
    transport: Transport,
    db: Db,
    concurrent_limit: usize,
    limits: EngineLimits,
  ) -> Self {
    let admission = Admission::new(concurrent_limit, limits.max_queued);
    Self {
      inner: Arc::new(EngineInner {
        ctx: JobContext {
          paths,
          settings,
          transport,
          db,
          limits,
          claims: Arc::new(DashMap::new()),
        },
        admission,
        tasks: DashMap::new(),
      }),
    }
  }

  /// Registers a Pending task and starts its job in the background.
  ///
  /// Fails without registering anything when the queue is full or the same rom id is
  /// still in flight. The returned receiver follows the task's status.
  pub fn enqueue(&self, rom_id: &str, rom: RomRecord) -> Result<watch::Receiver<DownloadStatus>, StoreError> {
    let ticket = self.inner.admission.try_reserve()?;
    let attempts = self.previous_attempts(rom_id) + 1;
    let slot = Arc::new(TaskSlot::new(DownloadTask::pending(rom_id, &rom, attempts, now_rfc3339())));

    match self.inner.tasks.entry(rom_id.to_string()) {
      Entry::Occupied(mut e) => {
        if !e.get().is_finished() {
          return Err(StoreError::AlreadyActive(rom_id.to_string()));
        }
        e.insert(slot.clone());
      }
      Entry::Vacant(e) => {
        e.insert(slot.clone());
      }
    }

    let status_rx = slot.status_tx.subscribe();
    let control_rx = slot.control_tx.subscribe();
    tracing::info!(rom_id = %rom_id, attempts, platform = %rom.platform, "download queued");

    let inner = self.inner.clone();
    tokio::spawn(async move {
      job::run_download_job(&inner.ctx, &slot, rom, ticket, control_rx).await;
      inner.record_finished(&slot);
    });

    Ok(status_rx)
  }

  /// Runs a download to its end. `true` only when it completed.
  pub async fn download(&self, rom_id: &str, rom: RomRecord) -> bool {
    let mut status_rx = match self.enqueue(rom_id, rom) {
      Ok(rx) => rx,
      Err(e) => {
        tracing::warn!(rom_id = %rom_id, error = %e, "download not started");
        return false;
      }
    };
    let end = status_rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
    matches!(end, Ok(DownloadStatus::Completed))
  }

  /// `None` means the download was never started, which is not an error.
  pub fn progress(&self, rom_id: &str) -> Option<DownloadTask> {
    if let Some(slot) = self.inner.tasks.get(rom_id) {
      return Some(slot.snapshot());
    }
    match self.inner.ctx.db.get_task(rom_id) {
      Ok(task) => task,
      Err(e) => {
        tracing::warn!(rom_id = %rom_id, error = %e, "history lookup failed");
        None
      }
    }
  }

  pub fn all_progress(&self) -> DownloadMap {
    self.inner.evict_finished();
    let mut out = DownloadMap::new();
    match self.inner.ctx.db.list_tasks() {
      Ok(history) => out.extend(history.into_iter().map(|t| (t.id.clone(), t))),
      Err(e) => tracing::warn!(error = %e, "history listing failed"),
    }
    for slot in self.inner.tasks.iter() {
      out.insert(slot.key().clone(), slot.snapshot());
    }
    out
  }

  /// Asks an in-flight download to stop. `false` if there is nothing to cancel.
  pub fn cancel(&self, rom_id: &str) -> bool {
    let Some(slot) = self.inner.tasks.get(rom_id).map(|s| Arc::clone(s.value())) else {
      return false;
    };
    if slot.is_finished() {
      return false;
    }
    slot.control_tx.send_replace(JobControl::Cancel);
    tracing::info!(rom_id = %rom_id, "cancellation requested");
    true
  }

  pub fn cancel_all(&self) -> usize {
    let ids: Vec<String> = self.inner.tasks.iter().map(|s| s.key().clone()).collect();
    ids.iter().filter(|id| self.cancel(id)).count()
  }

  pub fn set_concurrent_limit(&self, limit: usize) {
    if self.inner.admission.limit() != limit.max(1) {
      self.inner.admission.set_limit(limit);
    }
  }

  pub fn concurrent_limit(&self) -> usize {
    self.inner.admission.limit()
  }

  fn previous_attempts(&self, rom_id: &str) -> u32 {
    if let Some(slot) = self.inner.tasks.get(rom_id) {
      return slot.task.lock().attempts;
    }
    self
      .inner
      .ctx
      .db
      .get_task(rom_id)
      .ok()
      .flatten()
      .map(|t| t.attempts)
      .unwrap_or(0)
  }
}

impl EngineInner {
  fn record_finished(&self, slot: &TaskSlot) {
    let task = slot.snapshot();
    if let Err(e) = self.ctx.db.upsert_task(&task) {
      tracing::error!(rom_id = %task.id, error = %e, "failed to persist download history");
    }
    // Only from here on may the slot be evicted.
    *slot.finished_at.lock() = Some(Instant::now());
    slot.status_tx.send_replace(task.status);
    self.evict_finished();
  }

  /// Drops finished tasks from memory once they are past the TTL or beyond the
  /// retention cap (oldest first). They remain readable from history.
  fn evict_finished(&self) {
    let limits = &self.ctx.limits;
    let now = Instant::now();
    let mut finished: Vec<(String, Instant)> = self
      .tasks
      .iter()
      .filter_map(|s| s.finished_at().map(|at| (s.key().clone(), at)))
      .collect();
    finished.sort_by_key(|(_, at)| *at);

    let overflow = finished.len().saturating_sub(limits.max_retained_finished);
    for (i, (id, at)) in finished.into_iter().enumerate() {
      if i < overflow || now.saturating_duration_since(at) >= limits.finished_ttl {
        self.tasks.remove_if(&id, |_, s| s.finished_at() == Some(at));
      }
    }
  }
}

fn now_rfc3339() -> String {
  time::OffsetDateTime::now_utc()
    .format(&time::format_description::well_known::Rfc3339)
    .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests;
