//! Plugin loader hooks.

use crate::app_state::{AppPaths, AppState};
use std::path::{Path, PathBuf};

/// Moves files left behind by older releases into the current layout. Existing files at
/// the destination always win. Returns how many files were moved.
pub async fn migrate(paths: &AppPaths) -> usize {
  let legacy_settings = paths.home_dir.join(".config").join("croc-store");
  let legacy_staging = paths.home_dir.join("Downloads").join("CrocStore");

  let mut moved = move_missing_files(&legacy_settings, &paths.settings_dir).await;
  moved += move_missing_files(&legacy_staging, &paths.downloads_dir).await;
  if moved > 0 {
    tracing::info!(moved, "migrated legacy files");
  }
  moved
}

async fn move_missing_files(from: &Path, to: &Path) -> usize {
  if from == to || !tokio::fs::try_exists(from).await.unwrap_or(false) {
    return 0;
  }
  let mut rd = match tokio::fs::read_dir(from).await {
    Ok(rd) => rd,
    Err(e) => {
      tracing::warn!(from = %from.display(), error = %e, "cannot read legacy dir");
      return 0;
    }
  };
  if let Err(e) = tokio::fs::create_dir_all(to).await {
    tracing::warn!(to = %to.display(), error = %e, "cannot create migration target");
    return 0;
  }

  let mut moved = 0;
  while let Ok(Some(entry)) = rd.next_entry().await {
    if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
      continue;
    }
    let dest: PathBuf = to.join(entry.file_name());
    if tokio::fs::try_exists(&dest).await.unwrap_or(true) {
      tracing::debug!(dest = %dest.display(), "keeping existing file, legacy copy left in place");
      continue;
    }
    match move_file(&entry.path(), &dest).await {
      Ok(()) => moved += 1,
      Err(e) => tracing::warn!(from = %entry.path().display(), error = %e, "failed to migrate file"),
    }
  }
  moved
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
  if tokio::fs::rename(from, to).await.is_ok() {
    return Ok(());
  }
  tokio::fs::copy(from, to).await?;
  tokio::fs::remove_file(from).await
}

/// Stops every running download; finished ones stay in history.
pub fn unload(state: &AppState) {
  let cancelled = state.engine.cancel_all();
  tracing::info!(cancelled, "unloading");
}

/// The library and settings are user data and stay on disk.
pub fn uninstall(paths: &AppPaths) {
  tracing::info!(
    roms = %paths.roms_dir.display(),
    settings = %paths.settings_dir.display(),
    "uninstalled; leaving library and settings in place"
  );
}
