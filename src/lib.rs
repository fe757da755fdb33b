mod app_state;
pub mod catalog;
pub mod engine;
mod error;
pub mod launcher;
pub mod library;
pub mod lifecycle;
pub mod local_api;
pub mod model;
pub mod persistence;
#[cfg(test)]
mod test_support;
mod transport;
pub mod ui_bridge;

pub use app_state::{AppPaths, AppState, ServiceConfig};
pub use error::{ErrorCode, StoreError};
pub use transport::Transport;

/// Runs the backend until ctrl-c or SIGTERM. `crocstore uninstall` runs the loader's
/// uninstall hook instead and exits.
pub async fn run() -> anyhow::Result<()> {
  let paths = AppPaths::from_env()?;
  paths.ensure_dirs()?;
  error::init_tracing(&paths)?;

  if std::env::args().nth(1).as_deref() == Some("uninstall") {
    lifecycle::uninstall(&paths);
    return Ok(());
  }
  let config = ServiceConfig::from_env();

  tracing::info!(
    version = env!("CARGO_PKG_VERSION"),
    home = %paths.home_dir.display(),
    settings_dir = %paths.settings_dir.display(),
    catalog = %config.catalog_url,
    "starting crocstore"
  );

  lifecycle::migrate(&paths).await;
  let state = AppState::init(paths, &config).await?;

  local_api::serve(state.clone(), config.api_port, config.api_token.clone(), shutdown_signal()).await?;

  lifecycle::unload(&state);
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::warn!(error = %e, "ctrl-c handler unavailable");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::warn!(error = %e, "SIGTERM handler unavailable");
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
  tracing::info!("shutdown requested");
}
