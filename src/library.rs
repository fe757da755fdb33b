use crate::model::LibraryEntry;
use std::{
  path::{Path, PathBuf},
  time::UNIX_EPOCH,
};

/// File extensions listed as ROMs, lowercase and without the dot.
pub const ROM_EXTENSIONS: &[&str] = &["zip", "nes", "smc", "gba", "n64", "iso", "bin", "md"];

/// Read-only view of `<home>/ROMs/<platform>/<file>`.
#[derive(Debug, Clone)]
pub struct LibraryScanner {
  root: PathBuf,
}

impl LibraryScanner {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  /// Unreadable directories or files are skipped; the rest is still returned.
  pub async fn list_local(&self) -> Vec<LibraryEntry> {
    let mut platforms = match tokio::fs::read_dir(&self.root).await {
      Ok(rd) => rd,
      Err(e) => {
        if e.kind() != std::io::ErrorKind::NotFound {
          tracing::error!(root = %self.root.display(), error = %e, "error reading rom library");
        }
        return Vec::new();
      }
    };

    let mut entries = Vec::new();
    loop {
      let dir = match platforms.next_entry().await {
        Ok(Some(dir)) => dir,
        Ok(None) => break,
        Err(e) => {
          tracing::warn!(root = %self.root.display(), error = %e, "library scan stopped early");
          break;
        }
      };
      if !dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
        continue;
      }
      let platform = dir.file_name().to_string_lossy().into_owned();
      scan_platform_dir(&dir.path(), &platform, &mut entries).await;
    }

    entries.sort_by(|a, b| a.platform.cmp(&b.platform).then_with(|| a.name.cmp(&b.name)));
    entries
  }
}

async fn scan_platform_dir(dir: &Path, platform: &str, out: &mut Vec<LibraryEntry>) {
  let mut files = match tokio::fs::read_dir(dir).await {
    Ok(rd) => rd,
    Err(e) => {
      tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable platform dir");
      return;
    }
  };
  loop {
    let file = match files.next_entry().await {
      Ok(Some(file)) => file,
      Ok(None) => break,
      Err(e) => {
        tracing::warn!(dir = %dir.display(), error = %e, "platform dir scan stopped early");
        break;
      }
    };
    let path = file.path();
    if !has_rom_extension(&path) {
      continue;
    }
    let meta = match file.metadata().await {
      Ok(m) if m.is_file() => m,
      Ok(_) => continue,
      Err(e) => {
        tracing::debug!(path = %path.display(), error = %e, "skipping rom without metadata");
        continue;
      }
    };
    let modified = meta
      .modified()
      .ok()
      .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
      .map(|d| d.as_secs_f64())
      .unwrap_or(0.0);
    out.push(LibraryEntry {
      name: path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default(),
      platform: platform.to_string(),
      path: path.display().to_string(),
      size: meta.len(),
      modified,
    });
  }
}

pub fn has_rom_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| ROM_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(e)))
    .unwrap_or(false)
}
