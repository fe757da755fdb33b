use serde_json::{Map, Value};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::Mutex;

/// User configuration persisted as `settings.json`.
///
/// Keys the schema doesn't know about are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
  pub auto_organize: bool,
  pub auto_launch: bool,
  pub preferred_emulator: String,
  pub download_concurrent_limit: i64,
  pub regions: Vec<String>,
  pub languages: Vec<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      auto_organize: true,
      auto_launch: true,
      preferred_emulator: "retroarch".to_string(),
      download_concurrent_limit: 3,
      regions: vec!["USA".to_string(), "Europe".to_string(), "Japan".to_string()],
      languages: vec!["English".to_string()],
      extra: Map::new(),
    }
  }
}

impl Settings {
  /// Overlays `stored` key by key on top of the defaults.
  pub fn merged_over_defaults(stored: Value) -> Result<Self, serde_json::Error> {
    let Value::Object(stored) = stored else {
      return Err(serde::de::Error::custom("settings must be a JSON object"));
    };
    let mut merged = match serde_json::to_value(Settings::default())? {
      Value::Object(m) => m,
      _ => Map::new(),
    };
    merged.extend(stored);
    serde_json::from_value(Value::Object(merged))
  }

  pub fn concurrent_limit(&self) -> usize {
    self.download_concurrent_limit.clamp(1, 64) as usize
  }
}

#[derive(Clone)]
pub struct SettingsStore {
  path: Arc<PathBuf>,
  write_lock: Arc<Mutex<()>>,
}

impl SettingsStore {
  pub fn new(path: PathBuf) -> Self {
    Self {
      path: Arc::new(path),
      write_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  /// Never fails: a missing file is created with defaults, a broken one yields defaults.
  pub async fn load(&self) -> Settings {
    match tokio::fs::read_to_string(self.path.as_ref()).await {
      Ok(content) => {
        let parsed = serde_json::from_str::<Value>(&content).and_then(Settings::merged_over_defaults);
        match parsed {
          Ok(s) => s,
          Err(e) => {
            tracing::error!(path = %self.path.display(), error = %e, "error loading settings, using defaults");
            Settings::default()
          }
        }
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        let defaults = Settings::default();
        if self.save(&defaults).await {
          tracing::info!(path = %self.path.display(), "created default settings file");
        }
        defaults
      }
      Err(e) => {
        tracing::error!(path = %self.path.display(), error = %e, "error reading settings, using defaults");
        Settings::default()
      }
    }
  }

  /// Full overwrite via write-to-temp-then-rename.
  pub async fn save(&self, settings: &Settings) -> bool {
    match self.write(settings).await {
      Ok(()) => true,
      Err(e) => {
        tracing::error!(path = %self.path.display(), error = %e, "error saving settings");
        false
      }
    }
  }

  /// Validates a partial object against the schema, then persists the merged result.
  pub async fn save_partial(&self, partial: Value) -> Option<Settings> {
    let merged = match Settings::merged_over_defaults(partial) {
      Ok(s) => s,
      Err(e) => {
        tracing::warn!(error = %e, "rejected invalid settings update");
        return None;
      }
    };
    self.save(&merged).await.then_some(merged)
  }

  async fn write(&self, settings: &Settings) -> anyhow::Result<()> {
    let _guard = self.write_lock.lock().await;
    if let Some(parent) = self.path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let tmp_path = self.path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, self.path.as_ref()).await?;
    tracing::debug!(path = %self.path.display(), "saved settings");
    Ok(())
  }
}
