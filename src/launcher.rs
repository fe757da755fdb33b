use crate::{error::StoreError, model::EmulatorStatus, persistence::SettingsStore};
use serde::{Deserialize, Serialize};
use std::{
  collections::BTreeMap,
  ffi::OsString,
  path::{Path, PathBuf},
  process::Stdio,
  sync::Arc,
};

const DEFAULT_PRIMARY: &str = "retroarch";
const DEFAULT_OPENER: &str = "xdg-open";

/// One known emulator. Detection only looks at `install_paths`; launching needs an
/// `executable` that exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorSpec {
  pub install_paths: Vec<PathBuf>,
  pub executable: Option<PathBuf>,
  pub core_dir: Option<PathBuf>,
  /// platform -> core file name inside `core_dir`
  pub cores: BTreeMap<String, String>,
}

impl EmulatorSpec {
  fn core_for(&self, platform: &str) -> Option<PathBuf> {
    let platform = platform.trim();
    if platform.is_empty() {
      return None;
    }
    let core = self
      .cores
      .iter()
      .find(|(p, _)| p.eq_ignore_ascii_case(platform))
      .map(|(_, core)| core)?;
    Some(self.core_dir.as_deref().unwrap_or(Path::new("")).join(core))
  }
}

/// Emulators and cores, loadable from `emulators.json` so new ones need no code change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorTable {
  #[serde(default = "default_primary")]
  pub primary: String,
  #[serde(default = "default_opener")]
  pub fallback_opener: String,
  #[serde(default)]
  pub emulators: BTreeMap<String, EmulatorSpec>,
}

fn default_primary() -> String {
  DEFAULT_PRIMARY.to_string()
}

fn default_opener() -> String {
  DEFAULT_OPENER.to_string()
}

impl Default for EmulatorTable {
  fn default() -> Self {
    let cores = [
      ("NES", "nestopia_libretro.so"),
      ("SNES", "snes9x_libretro.so"),
      ("GBA", "mgba_libretro.so"),
      ("N64", "mupen64plus_next_libretro.so"),
      ("PSX", "swanstation_libretro.so"),
      ("Genesis", "genesis_plus_gx_libretro.so"),
    ]
    .into_iter()
    .map(|(p, c)| (p.to_string(), c.to_string()))
    .collect();

    let mut emulators = BTreeMap::new();
    emulators.insert(
      "retroarch".to_string(),
      EmulatorSpec {
        install_paths: vec![PathBuf::from("/usr/bin/retroarch")],
        executable: Some(PathBuf::from("/usr/bin/retroarch")),
        core_dir: Some(PathBuf::from("/usr/lib/libretro")),
        cores,
      },
    );
    emulators.insert(
      "emudeck".to_string(),
      EmulatorSpec {
        install_paths: vec![PathBuf::from("/home/deck/.local/share/Steam/steamapps/common/EmuDeck")],
        ..EmulatorSpec::default()
      },
    );

    Self {
      primary: default_primary(),
      fallback_opener: default_opener(),
      emulators,
    }
  }
}

#[derive(Clone)]
pub struct EmulatorLauncher {
  table: Arc<EmulatorTable>,
  settings: SettingsStore,
}

impl EmulatorLauncher {
  pub fn new(table: EmulatorTable, settings: SettingsStore) -> Self {
    Self {
      table: Arc::new(table),
      settings,
    }
  }

  /// Uses the built-in table when the file is missing or unreadable.
  pub async fn from_file(path: &Path, settings: SettingsStore) -> Self {
    let table = match tokio::fs::read_to_string(path).await {
      Ok(content) => match serde_json::from_str::<EmulatorTable>(&content) {
        Ok(table) => {
          tracing::info!(path = %path.display(), count = table.emulators.len(), "loaded emulator table");
          table
        }
        Err(e) => {
          tracing::warn!(path = %path.display(), error = %e, "invalid emulator table, using built-in");
          EmulatorTable::default()
        }
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => EmulatorTable::default(),
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "error reading emulator table, using built-in");
        EmulatorTable::default()
      }
    };
    Self::new(table, settings)
  }

  pub fn table(&self) -> &EmulatorTable {
    &self.table
  }

  pub async fn detect(&self) -> EmulatorStatus {
    let mut status = EmulatorStatus::new();
    for (name, spec) in &self.table.emulators {
      status.insert(name.clone(), any_exists(&spec.install_paths).await);
    }
    status
  }

  /// Starts the ROM in the preferred emulator, or the system opener when that emulator
  /// is not available. `false` if the ROM does not exist or nothing could be spawned.
  pub async fn launch(&self, rom_path: &str, platform: &str) -> bool {
    let rom = Path::new(rom_path);
    if !tokio::fs::try_exists(rom).await.unwrap_or(false) {
      let e = StoreError::NotFound(rom_path.to_string());
      tracing::error!(error = %e, "rom file not found");
      return false;
    }

    let settings = self.settings.load().await;
    let preferred = if settings.preferred_emulator.trim().is_empty() {
      self.table.primary.clone()
    } else {
      settings.preferred_emulator.trim().to_string()
    };

    if let Some((program, args)) = self.emulator_command(&preferred, rom, platform).await {
      match spawn_detached(&program, &args) {
        Ok(()) => {
          tracing::info!(emulator = %preferred, rom = %rom_path, platform = %platform, "launched rom");
          return true;
        }
        Err(e) => {
          tracing::warn!(emulator = %preferred, error = %e, "emulator failed to start, trying system opener")
        }
      }
    } else {
      tracing::info!(emulator = %preferred, "preferred emulator unavailable, using system opener");
    }

    let opener = PathBuf::from(&self.table.fallback_opener);
    match spawn_detached(&opener, &[rom.as_os_str().to_os_string()]) {
      Ok(()) => {
        tracing::info!(opener = %opener.display(), rom = %rom_path, "opened rom with system handler");
        true
      }
      Err(e) => {
        tracing::error!(opener = %opener.display(), rom = %rom_path, error = %e, "error launching rom");
        false
      }
    }
  }

  /// `None` when the emulator is unknown or its executable is missing.
  async fn emulator_command(&self, name: &str, rom: &Path, platform: &str) -> Option<(PathBuf, Vec<OsString>)> {
    let spec = self.table.emulators.get(name)?;
    let executable = spec.executable.as_ref()?;
    if !tokio::fs::try_exists(executable).await.unwrap_or(false) {
      return None;
    }
    Some((executable.clone(), launch_args(spec, rom, platform)))
  }
}

fn launch_args(spec: &EmulatorSpec, rom: &Path, platform: &str) -> Vec<OsString> {
  let mut args = Vec::new();
  if let Some(core) = spec.core_for(platform) {
    args.push(OsString::from("-L"));
    args.push(core.into_os_string());
  }
  args.push(rom.as_os_str().to_os_string());
  args
}

async fn any_exists(paths: &[PathBuf]) -> bool {
  for p in paths {
    if tokio::fs::try_exists(p).await.unwrap_or(false) {
      return true;
    }
  }
  false
}

/// The child is reaped in the background so it never lingers as a zombie.
fn spawn_detached(program: &Path, args: &[OsString]) -> std::io::Result<()> {
  let mut child = tokio::process::Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()?;
  let program = program.display().to_string();
  tokio::spawn(async move {
    match child.wait().await {
      Ok(status) => tracing::debug!(program = %program, %status, "launched process exited"),
      Err(e) => tracing::warn!(program = %program, error = %e, "failed to wait on launched process"),
    }
  });
  Ok(())
}
