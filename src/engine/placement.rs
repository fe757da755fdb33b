use crate::error::StoreError;
use std::path::{Path, PathBuf};

/// Moves a finished staging file into the library.
///
/// A same-filesystem rename is tried first. Otherwise the file is copied, the copy's
/// size is checked, and the staging file is deleted. A failed copy never leaves a file
/// behind at `final_path`.
pub async fn promote(staging: &Path, final_path: &Path) -> Result<(), StoreError> {
  if let Some(parent) = final_path.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  match tokio::fs::rename(staging, final_path).await {
    Ok(()) => Ok(()),
    Err(e) => {
      tracing::debug!(
        staging = %staging.display(),
        final_path = %final_path.display(),
        error = %e,
        "rename failed, falling back to copy"
      );
      promote_by_copy(staging, final_path).await
    }
  }
}

pub(crate) async fn promote_by_copy(staging: &Path, final_path: &Path) -> Result<(), StoreError> {
  let expected = tokio::fs::metadata(staging).await?.len();
  copy_into_place(staging, final_path, expected).await?;

  if let Err(e) = tokio::fs::remove_file(staging).await {
    // The library copy is complete and verified; a stale staging file is only clutter.
    tracing::warn!(staging = %staging.display(), error = %e, "failed to remove staging file after copy");
  }
  Ok(())
}

/// Copies through `<final>.part` and renames it over `dst` only once the size matches.
async fn copy_into_place(src: &Path, dst: &Path, expected: u64) -> Result<(), StoreError> {
  let part = part_path(dst);
  let copied = match copy_verified(src, &part, expected).await {
    Ok(()) => tokio::fs::rename(&part, dst).await.map_err(StoreError::from),
    Err(e) => Err(e),
  };

  if copied.is_err() {
    if let Err(cleanup) = tokio::fs::remove_file(&part).await {
      if cleanup.kind() != std::io::ErrorKind::NotFound {
        tracing::warn!(part = %part.display(), error = %cleanup, "failed to remove partial copy");
      }
    }
  }
  copied
}

async fn copy_verified(src: &Path, dst: &Path, expected: u64) -> Result<(), StoreError> {
  tokio::fs::copy(src, dst).await?;
  let received = tokio::fs::metadata(dst).await?.len();
  if received != expected {
    return Err(StoreError::Incomplete { expected, received });
  }
  Ok(())
}

fn part_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".part");
  path.with_file_name(name)
}
