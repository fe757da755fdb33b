//! Host-visible commands. None of these return an error: failures are logged and
//! reported as an empty, default or `false` value.

use crate::{
  app_state::AppState,
  model::{DownloadMap, DownloadTask, EmulatorStatus, LibraryEntry, Platform, RomRecord},
  persistence::Settings,
};
use serde_json::Value;

pub const DEFAULT_SEARCH_LIMIT: u32 = 50;

pub async fn cmd_search_roms(state: &AppState, query: &str, platform: &str, limit: Option<u32>) -> Vec<RomRecord> {
  state
    .catalog
    .search(query, platform, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
    .await
}

pub async fn cmd_get_platforms(state: &AppState) -> Vec<Platform> {
  state.catalog.list_platforms().await
}

/// Downloads to the end and, if the user asked for it, starts the finished ROM.
pub async fn cmd_download_rom(state: &AppState, rom_id: &str, rom_info: RomRecord) -> bool {
  let platform = rom_info.platform.clone();
  if !state.engine.download(rom_id, rom_info).await {
    return false;
  }

  launch_if_enabled(state, rom_id, &platform).await;
  true
}

/// Starts a just-completed download when `auto_launch` is on.
pub(crate) async fn launch_if_enabled(state: &AppState, rom_id: &str, platform: &str) {
  if !state.settings.load().await.auto_launch {
    return;
  }
  match state.engine.progress(rom_id).and_then(|t| t.final_path) {
    Some(path) => {
      if !state.launcher.launch(&path, platform).await {
        tracing::warn!(rom_id = %rom_id, path = %path, "auto-launch failed");
      }
    }
    None => tracing::warn!(rom_id = %rom_id, "completed download has no path to launch"),
  }
}

pub fn cmd_get_download_progress(state: &AppState, rom_id: &str) -> Option<DownloadTask> {
  state.engine.progress(rom_id)
}

pub fn cmd_get_all_downloads(state: &AppState) -> DownloadMap {
  state.engine.all_progress()
}

pub fn cmd_cancel_download(state: &AppState, rom_id: &str) -> bool {
  state.engine.cancel(rom_id)
}

pub async fn cmd_detect_emulators(state: &AppState) -> EmulatorStatus {
  state.launcher.detect().await
}

pub async fn cmd_launch_rom(state: &AppState, rom_path: &str, platform: &str) -> bool {
  state.launcher.launch(rom_path, platform).await
}

pub async fn cmd_get_local_roms(state: &AppState) -> Vec<LibraryEntry> {
  state.library.list_local().await
}

pub async fn cmd_get_settings(state: &AppState) -> Settings {
  state.settings.load().await
}

/// Accepts a partial settings object; missing keys take their defaults.
pub async fn cmd_save_settings(state: &AppState, partial: Value) -> bool {
  match state.settings.save_partial(partial).await {
    Some(saved) => {
      state.engine.set_concurrent_limit(saved.concurrent_limit());
      true
    }
    None => false,
  }
}
