use crate::{
  catalog::CatalogClient,
  engine::{DownloadEngine, LibraryPaths},
  launcher::EmulatorLauncher,
  library::LibraryScanner,
  persistence::{Db, SettingsStore},
  transport::Transport,
};
use anyhow::Context;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "CrocStore";
pub const DEFAULT_CATALOG_URL: &str = "https://api.crocdb.net";
pub const DEFAULT_API_PORT: u16 = 17878;

#[derive(Debug, Clone)]
pub struct AppPaths {
  pub home_dir: PathBuf,
  pub roms_dir: PathBuf,
  pub downloads_dir: PathBuf,
  pub settings_dir: PathBuf,
  pub runtime_dir: PathBuf,
  pub logs_dir: PathBuf,
}

impl AppPaths {
  /// Resolves directories from the plugin loader's environment, falling back to `$HOME`.
  pub fn from_env() -> anyhow::Result<Self> {
    let home_dir = env_path("DECKY_USER_HOME")
      .or_else(|| env_path("HOME"))
      .context("neither DECKY_USER_HOME nor HOME is set")?;
    let settings_dir =
      env_path("DECKY_SETTINGS_DIR").unwrap_or_else(|| home_dir.join(".config").join("crocstore"));
    let runtime_dir = env_path("DECKY_PLUGIN_RUNTIME_DIR").unwrap_or_else(|| settings_dir.clone());
    let logs_dir = env_path("DECKY_PLUGIN_LOG_DIR").unwrap_or_else(|| settings_dir.join("logs"));
    Ok(Self::with_dirs(home_dir, settings_dir, runtime_dir, logs_dir))
  }

  pub fn with_dirs(home_dir: PathBuf, settings_dir: PathBuf, runtime_dir: PathBuf, logs_dir: PathBuf) -> Self {
    Self {
      roms_dir: home_dir.join("ROMs"),
      downloads_dir: home_dir.join("Downloads").join(APP_NAME),
      home_dir,
      settings_dir,
      runtime_dir,
      logs_dir,
    }
  }

  /// Lays everything out under one root; used by tests and portable installs.
  pub fn under(root: &Path) -> Self {
    let settings_dir = root.join("settings");
    Self::with_dirs(
      root.to_path_buf(),
      settings_dir.clone(),
      settings_dir.clone(),
      settings_dir.join("logs"),
    )
  }

  pub fn ensure_dirs(&self) -> anyhow::Result<()> {
    for dir in [&self.roms_dir, &self.downloads_dir, &self.settings_dir, &self.runtime_dir, &self.logs_dir] {
      std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
  }

  pub fn settings_path(&self) -> PathBuf {
    self.settings_dir.join("settings.json")
  }

  pub fn emulators_path(&self) -> PathBuf {
    self.settings_dir.join("emulators.json")
  }

  pub fn db_path(&self) -> PathBuf {
    self.runtime_dir.join("crocstore.sqlite3")
  }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
  pub catalog_url: String,
  pub api_port: u16,
  pub api_token: Option<String>,
}

impl ServiceConfig {
  pub fn from_env() -> Self {
    let catalog_url = std::env::var("CROCSTORE_CATALOG_URL")
      .ok()
      .filter(|s| !s.trim().is_empty())
      .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());
    let api_port = std::env::var("CROCSTORE_API_PORT")
      .ok()
      .and_then(|s| s.trim().parse::<u16>().ok())
      .unwrap_or(DEFAULT_API_PORT);
    let api_token = std::env::var("CROCSTORE_API_TOKEN")
      .ok()
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty());
    Self {
      catalog_url,
      api_port,
      api_token,
    }
  }
}

fn env_path(key: &str) -> Option<PathBuf> {
  std::env::var_os(key)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
}

#[derive(Clone)]
pub struct AppState {
  pub paths: AppPaths,
  pub settings: SettingsStore,
  pub catalog: CatalogClient,
  pub engine: DownloadEngine,
  pub library: LibraryScanner,
  pub launcher: EmulatorLauncher,
}

impl AppState {
  pub async fn init(paths: AppPaths, config: &ServiceConfig) -> anyhow::Result<Self> {
    paths.ensure_dirs()?;

    let db = Db::open(paths.db_path())?;
    db.init_schema()?;

    let settings = SettingsStore::new(paths.settings_path());
    let snapshot = settings.load().await;

    let transport = Transport::new()?;
    let catalog = CatalogClient::new(transport.clone(), &config.catalog_url);
    let engine = DownloadEngine::new(
      LibraryPaths {
        library_dir: paths.roms_dir.clone(),
        staging_dir: paths.downloads_dir.clone(),
      },
      settings.clone(),
      transport,
      db,
      snapshot.concurrent_limit(),
    );
    let library = LibraryScanner::new(paths.roms_dir.clone());
    let launcher = EmulatorLauncher::from_file(&paths.emulators_path(), settings.clone()).await;

    Ok(Self {
      paths,
      settings,
      catalog,
      engine,
      library,
      launcher,
    })
  }
}
