use crate::{
  engine::{admission::QueueTicket, naming, placement, EngineLimits, LibraryPaths, TaskSlot},
  error::StoreError,
  model::{DownloadStatus, RomRecord},
  persistence::{Db, SettingsStore},
  transport::Transport,
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::StreamExt;
use reqwest::{header::RANGE, StatusCode};
use std::{
  path::{Path, PathBuf},
  sync::Arc,
};
use tokio::{io::AsyncWriteExt, sync::watch};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
  Run,
  Cancel,
}

/// Everything a download job needs besides its own slot.
#[derive(Clone)]
pub(crate) struct JobContext {
  pub paths: LibraryPaths,
  pub settings: SettingsStore,
  pub transport: Transport,
  pub db: Db,
  pub limits: EngineLimits,
  // path -> rom id currently writing it
  pub claims: Arc<DashMap<PathBuf, String>>,
}

struct Targets {
  staging: PathBuf,
  final_path: PathBuf,
}

pub(crate) async fn run_download_job(
  ctx: &JobContext,
  slot: &TaskSlot,
  rom: RomRecord,
  ticket: QueueTicket,
  mut control_rx: watch::Receiver<JobControl>,
) {
  let rom_id = slot.id().to_string();

  let _admitted = tokio::select! {
    biased;
    _ = wait_cancelled(&mut control_rx) => {
      finish_cancelled(slot, None).await;
      return;
    }
    admitted = ticket.admit() => match admitted {
      Ok(a) => a,
      Err(e) => {
        finish_failed(slot, e);
        return;
      }
    },
  };

  let targets = match claim_targets(ctx, &rom_id, &rom).await {
    Ok(t) => t,
    Err(e) => {
      finish_failed(slot, e);
      return;
    }
  };

  let outcome = download_and_place(ctx, slot, &rom, &targets, &mut control_rx).await;

  release_claims(ctx, &rom_id, &targets);
  match outcome {
    Ok(final_path) => {
      tracing::info!(rom_id = %rom_id, final_path = %final_path.display(), "download completed");
      slot.update(|t| {
        t.status = DownloadStatus::Completed;
        t.progress = 100;
        if t.total_size == 0 {
          t.total_size = t.downloaded_size;
        }
        t.final_path = Some(final_path.display().to_string());
        t.error = None;
        t.error_code = None;
      });
    }
    Err(StoreError::Cancelled) => finish_cancelled(slot, Some(&targets.staging)).await,
    // The staging file stays where it is for inspection or a later retry.
    Err(e) => finish_failed(slot, e),
  }
}

async fn download_and_place(
  ctx: &JobContext,
  slot: &TaskSlot,
  rom: &RomRecord,
  targets: &Targets,
  control_rx: &mut watch::Receiver<JobControl>,
) -> Result<PathBuf, StoreError> {
  let url = Transport::parse_download_url(&rom.download_url)
    .ok_or_else(|| StoreError::InvalidUrl(rom.download_url.clone()))?;

  slot.update(|t| t.status = DownloadStatus::Downloading);
  tracing::info!(rom_id = %slot.id(), url = %url, staging = %targets.staging.display(), "download started");

  let mut attempt: u32 = 0;
  loop {
    attempt += 1;
    match fetch_to_staging(ctx, slot, &url, &targets.staging, attempt > 1, control_rx).await {
      Ok(()) => break,
      Err(e) if e.is_retryable() && attempt < ctx.limits.max_attempts => {
        let delay = ctx.limits.retry_base_delay * 2u32.saturating_pow(attempt - 1);
        tracing::warn!(rom_id = %slot.id(), attempt, error = %e, delay_ms = delay.as_millis() as u64, "download attempt failed, retrying");
        tokio::select! {
          biased;
          _ = wait_cancelled(control_rx) => return Err(StoreError::Cancelled),
          _ = tokio::time::sleep(delay) => {}
        }
      }
      Err(e) => return Err(e),
    }
  }

  if *control_rx.borrow() == JobControl::Cancel {
    return Err(StoreError::Cancelled);
  }

  // Read at completion so a toggle made mid-download still applies.
  let settings = ctx.settings.load().await;
  if settings.auto_organize {
    placement::promote(&targets.staging, &targets.final_path).await?;
    Ok(targets.final_path.clone())
  } else {
    Ok(targets.staging.clone())
  }
}

/// Streams the artifact into `staging`. On a retry the existing bytes are kept when the
/// server honors a range request; otherwise the file starts over.
async fn fetch_to_staging(
  ctx: &JobContext,
  slot: &TaskSlot,
  url: &Url,
  staging: &Path,
  resume: bool,
  control_rx: &mut watch::Receiver<JobControl>,
) -> Result<(), StoreError> {
  let start = if resume {
    tokio::fs::metadata(staging).await.map(|m| m.len()).unwrap_or(0)
  } else {
    0
  };

  let mut req = ctx.transport.download().get(url.clone());
  if start > 0 {
    req = req.header(RANGE, format!("bytes={start}-"));
  }

  let resp = tokio::select! {
    biased;
    _ = wait_cancelled(control_rx) => return Err(StoreError::Cancelled),
    resp = req.send() => resp?,
  };
  let status = resp.status();
  if !status.is_success() {
    return Err(StoreError::HttpStatus {
      status: status.as_u16(),
      url: url.to_string(),
    });
  }

  let offset = if start > 0 && status == StatusCode::PARTIAL_CONTENT { start } else { 0 };
  let total = resp.content_length().filter(|l| *l > 0).map(|l| l + offset);

  let mut file = if offset > 0 {
    tokio::fs::OpenOptions::new().append(true).open(staging).await?
  } else {
    tokio::fs::File::create(staging).await?
  };

  slot.update(|t| {
    t.total_size = total.unwrap_or(0);
    t.downloaded_size = offset;
    if let Some(total) = total {
      t.progress = t.progress.max(percent(offset, total));
    }
  });

  let mut received = offset;
  let mut stream = resp.bytes_stream();
  loop {
    let next = tokio::select! {
      biased;
      _ = wait_cancelled(control_rx) => return Err(StoreError::Cancelled),
      next = stream.next() => next,
    };
    let Some(chunk) = next else { break };
    let chunk = match chunk {
      Ok(chunk) => chunk,
      Err(e) => {
        // Land what already arrived so the retry can ask for the rest.
        file.flush().await?;
        return Err(e.into());
      }
    };
    file.write_all(&chunk).await?;
    received += chunk.len() as u64;
    slot.update(|t| {
      t.downloaded_size = received;
      if let Some(total) = total {
        t.progress = t.progress.max(percent(received, total));
      }
    });
  }
  file.flush().await?;
  file.sync_all().await?;

  if let Some(expected) = total {
    if received < expected {
      return Err(StoreError::Incomplete { expected, received });
    }
  }
  Ok(())
}

fn percent(done: u64, total: u64) -> u8 {
  if total == 0 {
    return 0;
  }
  ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Picks `<name>.<ext>` unless another rom owns that name in the platform dir or in
/// staging, in which case the rom id is appended.
async fn claim_targets(ctx: &JobContext, rom_id: &str, rom: &RomRecord) -> Result<Targets, StoreError> {
  let platform_dir = ctx.paths.library_dir.join(naming::platform_dir_name(&rom.platform));
  tokio::fs::create_dir_all(&platform_dir).await?;
  tokio::fs::create_dir_all(&ctx.paths.staging_dir).await?;

  let stem = naming::display_stem(rom_id, &rom.name);
  let ext = naming::extension_for(&rom.download_url);
  let candidates = [
    naming::plain_filename(&stem, &ext),
    naming::disambiguated_filename(&stem, rom_id, &ext),
  ];

  for (i, filename) in candidates.iter().enumerate() {
    let last = i + 1 == candidates.len();
    let targets = Targets {
      staging: ctx.paths.staging_dir.join(filename),
      final_path: platform_dir.join(filename),
    };
    if !last && taken_by_another(ctx, rom_id, &targets).await {
      continue;
    }
    if try_claim(ctx, rom_id, &targets.final_path) {
      if try_claim(ctx, rom_id, &targets.staging) {
        return Ok(targets);
      }
      ctx.claims.remove_if(&targets.final_path, |_, owner| owner == rom_id);
    }
  }
  // Only reachable if the same rom id is somehow active twice.
  Err(StoreError::AlreadyActive(rom_id.to_string()))
}

/// With `auto_organize` off the staging file is the finished download, so both
/// locations are checked against history and the disk.
async fn taken_by_another(ctx: &JobContext, rom_id: &str, targets: &Targets) -> bool {
  for path in [&targets.final_path, &targets.staging] {
    if owned_by_someone_else(ctx, rom_id, path).await {
      return true;
    }
  }
  false
}

async fn owned_by_someone_else(ctx: &JobContext, rom_id: &str, path: &Path) -> bool {
  let key = path.display().to_string();
  match ctx.db.owner_of_path(&key) {
    Ok(Some(owner)) => return owner != rom_id,
    Ok(None) => {}
    Err(e) => tracing::warn!(error = %e, "history lookup failed during filename selection"),
  }
  tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn try_claim(ctx: &JobContext, rom_id: &str, path: &Path) -> bool {
  match ctx.claims.entry(path.to_path_buf()) {
    Entry::Occupied(e) => e.get() == rom_id,
    Entry::Vacant(e) => {
      e.insert(rom_id.to_string());
      true
    }
  }
}

fn release_claims(ctx: &JobContext, rom_id: &str, targets: &Targets) {
  for path in [&targets.final_path, &targets.staging] {
    ctx.claims.remove_if(path, |_, owner| owner == rom_id);
  }
}

async fn wait_cancelled(rx: &mut watch::Receiver<JobControl>) {
  if rx.wait_for(|c| *c == JobControl::Cancel).await.is_err() {
    // Sender gone: nobody can cancel any more.
    std::future::pending::<()>().await;
  }
}

async fn finish_cancelled(slot: &TaskSlot, staging: Option<&Path>) {
  if let Some(staging) = staging {
    if let Err(e) = tokio::fs::remove_file(staging).await {
      if e.kind() != std::io::ErrorKind::NotFound {
        tracing::warn!(rom_id = %slot.id(), error = %e, "failed to remove staging file of cancelled download");
      }
    }
  }
  tracing::info!(rom_id = %slot.id(), "download cancelled");
  slot.update(|t| {
    t.status = DownloadStatus::Cancelled;
    t.final_path = None;
    t.error = Some(StoreError::Cancelled.to_string());
    t.error_code = Some(StoreError::Cancelled.code());
  });
}

fn finish_failed(slot: &TaskSlot, e: StoreError) {
  tracing::error!(rom_id = %slot.id(), error = %e, "download failed");
  slot.update(|t| {
    t.status = DownloadStatus::Failed;
    t.final_path = None;
    t.error = Some(e.to_string());
    t.error_code = Some(e.code());
  });
}
