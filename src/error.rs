use crate::app_state::AppPaths;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  ConnectFail,
  Http4xx,
  Http5xx,
  Timeout,
  DiskFull,
  PermissionDenied,
  Cancelled,
  InvalidUrl,
  Incomplete,
  Rejected,
  Unknown,
}

impl ErrorCode {
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      ErrorCode::ConnectFail | ErrorCode::Http5xx | ErrorCode::Timeout | ErrorCode::Incomplete
    )
  }

  pub fn as_str(&self) -> &'static str {
    use ErrorCode::*;
    match self {
      ConnectFail => "CONNECT_FAIL",
      Http4xx => "HTTP_4XX",
      Http5xx => "HTTP_5XX",
      Timeout => "TIMEOUT",
      DiskFull => "DISK_FULL",
      PermissionDenied => "PERMISSION_DENIED",
      Cancelled => "CANCELLED",
      InvalidUrl => "INVALID_URL",
      Incomplete => "INCOMPLETE",
      Rejected => "REJECTED",
      Unknown => "UNKNOWN",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    use ErrorCode::*;
    Some(match s {
      "CONNECT_FAIL" => ConnectFail,
      "HTTP_4XX" => Http4xx,
      "HTTP_5XX" => Http5xx,
      "TIMEOUT" => Timeout,
      "DISK_FULL" => DiskFull,
      "PERMISSION_DENIED" => PermissionDenied,
      "CANCELLED" => Cancelled,
      "INVALID_URL" => InvalidUrl,
      "INCOMPLETE" => Incomplete,
      "REJECTED" => Rejected,
      "UNKNOWN" => Unknown,
      _ => return None,
    })
  }
}

/// Everything that can go wrong between the catalog, the network and the disk.
///
/// Collaborator-facing commands swallow these after logging; the download engine
/// surfaces them through the task record instead of returning them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("HTTP {status} from {url}")]
  HttpStatus { status: u16, url: String },
  #[error("malformed response: {0}")]
  MalformedResponse(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("invalid download url: {0:?}")]
  InvalidUrl(String),
  #[error("received {received} of {expected} bytes")]
  Incomplete { expected: u64, received: u64 },
  #[error("download queue is full, retry later")]
  Rejected,
  #[error("a download for {0} is already in progress")]
  AlreadyActive(String),
  #[error("download cancelled")]
  Cancelled,
  #[error("history database error: {0}")]
  Db(#[from] rusqlite::Error),
}

impl StoreError {
  pub fn code(&self) -> ErrorCode {
    match self {
      StoreError::Transport(e) => {
        if e.is_timeout() {
          ErrorCode::Timeout
        } else if e.is_connect() {
          ErrorCode::ConnectFail
        } else if e.is_body() || e.is_decode() {
          ErrorCode::Incomplete
        } else {
          ErrorCode::Unknown
        }
      }
      StoreError::HttpStatus { status, .. } => {
        if (400..500).contains(status) {
          ErrorCode::Http4xx
        } else if (500..600).contains(status) {
          ErrorCode::Http5xx
        } else {
          ErrorCode::Unknown
        }
      }
      StoreError::Io(e) => match e.kind() {
        std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
        _ if e.raw_os_error() == Some(ENOSPC) => ErrorCode::DiskFull,
        _ => ErrorCode::Unknown,
      },
      StoreError::InvalidUrl(_) => ErrorCode::InvalidUrl,
      StoreError::Incomplete { .. } => ErrorCode::Incomplete,
      StoreError::Rejected => ErrorCode::Rejected,
      StoreError::Cancelled => ErrorCode::Cancelled,
      StoreError::MalformedResponse(_)
      | StoreError::NotFound(_)
      | StoreError::AlreadyActive(_)
      | StoreError::Db(_) => ErrorCode::Unknown,
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.code().is_retryable()
  }
}

// errno for "no space left on device" on Linux and macOS.
const ENOSPC: i32 = 28;

pub fn init_tracing(paths: &AppPaths) -> anyhow::Result<()> {
  // Rotate daily; logs live next to the plugin's other logs so the loader can collect them.
  let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "crocstore.jsonl");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  let _ = LOG_GUARD.set(guard);

  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,reqwest=warn,hyper=warn"));

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(non_blocking)
    .json()
    .with_current_span(true)
    .with_span_list(true)
    .try_init()
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

  Ok(())
}
