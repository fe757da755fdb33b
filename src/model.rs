use crate::error::ErrorCode;
use std::collections::BTreeMap;

/// A ROM as returned by the catalog. Handed to the engine by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RomRecord {
  pub id: String,
  pub name: String,
  pub platform: String,
  pub region: String,
  pub language: String,
  pub size: String,
  pub description: String,
  pub download_url: String,
  pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Platform {
  pub id: String,
  pub name: String,
  pub short_name: String,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
  Pending,
  Downloading,
  Completed,
  Failed,
  Cancelled,
}

impl DownloadStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      DownloadStatus::Pending => "pending",
      DownloadStatus::Downloading => "downloading",
      DownloadStatus::Completed => "completed",
      DownloadStatus::Failed => "failed",
      DownloadStatus::Cancelled => "cancelled",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "downloading" => DownloadStatus::Downloading,
      "completed" => DownloadStatus::Completed,
      "failed" => DownloadStatus::Failed,
      "cancelled" => DownloadStatus::Cancelled,
      _ => DownloadStatus::Pending,
    }
  }
}

/// Progress snapshot for one rom id.
///
/// `final_path` is `Some` exactly when `status` is `Completed`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DownloadTask {
  pub id: String,
  pub status: DownloadStatus,
  pub progress: u8,
  pub total_size: u64,
  pub downloaded_size: u64,
  pub filename: String,
  pub platform: String,
  pub final_path: Option<String>,
  pub error: Option<String>,
  pub error_code: Option<ErrorCode>,
  pub attempts: u32,
  pub updated_at: String,
}

impl DownloadTask {
  pub fn pending(id: &str, rom: &RomRecord, attempts: u32, now: String) -> Self {
    let filename = if rom.name.trim().is_empty() {
      id.to_string()
    } else {
      rom.name.clone()
    };
    Self {
      id: id.to_string(),
      status: DownloadStatus::Pending,
      progress: 0,
      total_size: 0,
      downloaded_size: 0,
      filename,
      platform: rom.platform.clone(),
      final_path: None,
      error: None,
      error_code: None,
      attempts,
      updated_at: now,
    }
  }
}

pub type DownloadMap = BTreeMap<String, DownloadTask>;

/// A ROM file already present in the library tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LibraryEntry {
  pub name: String,
  pub platform: String,
  pub path: String,
  pub size: u64,
  pub modified: f64,
}

pub type EmulatorStatus = BTreeMap<String, bool>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DownloadRequest {
  pub rom_id: String,
  pub rom_info: RomRecord,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LaunchRequest {
  pub rom_path: String,
  #[serde(default)]
  pub platform: String,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SearchQuery {
  #[serde(default)]
  pub query: String,
  #[serde(default)]
  pub platform: String,
  pub limit: Option<u32>,
}
