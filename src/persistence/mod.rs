mod settings;

pub use settings::{Settings, SettingsStore};

use crate::{
  error::ErrorCode,
  model::{DownloadStatus, DownloadTask},
};
use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::{path::PathBuf, sync::Arc};

/// Finished download history. The in-memory task map evicts into this table.
#[derive(Clone)]
pub struct Db {
  // A single connection behind a mutex; writes happen once per finished download.
  conn: Arc<Mutex<Connection>>,
}

const TASK_COLUMNS: &str = r#"
  rom_id, status, progress, total_size, downloaded_size, filename, platform,
  final_path, error_message, error_code, attempts, updated_at
"#;

impl Db {
  pub fn open(path: PathBuf) -> anyhow::Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).context("failed to create db parent dir")?;
    }
    let conn = Connection::open(&path).context("failed to open sqlite db")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  pub fn init_schema(&self) -> anyhow::Result<()> {
    let sql = r#"
      CREATE TABLE IF NOT EXISTS download_history (
        rom_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        total_size INTEGER NOT NULL DEFAULT 0,
        downloaded_size INTEGER NOT NULL DEFAULT 0,
        filename TEXT NOT NULL,
        platform TEXT NOT NULL DEFAULT '',
        final_path TEXT,
        error_message TEXT,
        error_code TEXT,
        attempts INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
      );

      CREATE INDEX IF NOT EXISTS idx_history_final_path ON download_history(final_path);
    "#;

    let conn = self.conn.lock();
    conn.execute_batch(sql).context("failed to initialize schema")?;
    Ok(())
  }

  /// Re-downloading a rom id overwrites its row in place.
  pub fn upsert_task(&self, task: &DownloadTask) -> Result<(), rusqlite::Error> {
    let conn = self.conn.lock();
    conn.execute(
      r#"
        INSERT INTO download_history (
          rom_id, status, progress, total_size, downloaded_size, filename, platform,
          final_path, error_message, error_code, attempts, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(rom_id) DO UPDATE SET
          status=excluded.status,
          progress=excluded.progress,
          total_size=excluded.total_size,
          downloaded_size=excluded.downloaded_size,
          filename=excluded.filename,
          platform=excluded.platform,
          final_path=excluded.final_path,
          error_message=excluded.error_message,
          error_code=excluded.error_code,
          attempts=excluded.attempts,
          updated_at=excluded.updated_at
      "#,
      params![
        task.id,
        task.status.as_str(),
        task.progress as i64,
        task.total_size as i64,
        task.downloaded_size as i64,
        task.filename,
        task.platform,
        task.final_path,
        task.error,
        task.error_code.map(|c| c.as_str()),
        task.attempts as i64,
        task.updated_at,
      ],
    )?;
    Ok(())
  }

  pub fn get_task(&self, rom_id: &str) -> Result<Option<DownloadTask>, rusqlite::Error> {
    let conn = self.conn.lock();
    conn
      .query_row(
        &format!("SELECT {TASK_COLUMNS} FROM download_history WHERE rom_id=?1"),
        params![rom_id],
        task_from_row,
      )
      .optional()
  }

  pub fn list_tasks(&self) -> Result<Vec<DownloadTask>, rusqlite::Error> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(&format!(
      "SELECT {TASK_COLUMNS} FROM download_history ORDER BY updated_at DESC"
    ))?;
    let rows = stmt.query_map([], task_from_row)?;
    rows.collect()
  }

  /// Which rom id, if any, completed into `final_path`.
  pub fn owner_of_path(&self, final_path: &str) -> Result<Option<String>, rusqlite::Error> {
    let conn = self.conn.lock();
    conn
      .query_row(
        r#"SELECT rom_id FROM download_history WHERE final_path=?1 AND status='completed' LIMIT 1"#,
        params![final_path],
        |r| r.get(0),
      )
      .optional()
  }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<DownloadTask> {
  let status: String = row.get(1)?;
  let error_code: Option<String> = row.get(9)?;
  Ok(DownloadTask {
    id: row.get(0)?,
    status: DownloadStatus::parse(&status),
    progress: row.get::<_, i64>(2)?.clamp(0, 100) as u8,
    total_size: row.get::<_, i64>(3)?.max(0) as u64,
    downloaded_size: row.get::<_, i64>(4)?.max(0) as u64,
    filename: row.get(5)?,
    platform: row.get(6)?,
    final_path: row.get(7)?,
    error: row.get(8)?,
    error_code: error_code.as_deref().and_then(ErrorCode::parse),
    attempts: row.get::<_, i64>(10)?.max(1) as u32,
    updated_at: row.get(11)?,
  })
}
