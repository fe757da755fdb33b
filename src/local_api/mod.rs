use crate::{
  app_state::AppState,
  error::StoreError,
  model::{DownloadRequest, LaunchRequest, SearchQuery},
  ui_bridge,
};
use axum::{
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde_json::{json, Value};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct ApiState {
  app: AppState,
  token: Option<Arc<str>>,
}

/// JSON over loopback for the plugin's web UI. Clients poll; nothing is pushed.
pub fn router(app: AppState, token: Option<String>) -> Router {
  let state = ApiState {
    app,
    token: token.map(Arc::from),
  };

  Router::new()
    .route("/search", get(get_search))
    .route("/platforms", get(get_platforms))
    .route("/downloads", post(post_download).get(get_downloads))
    .route("/downloads/:id", get(get_download))
    .route("/downloads/:id/cancel", post(post_cancel))
    .route("/emulators", get(get_emulators))
    .route("/launch", post(post_launch))
    .route("/library", get(get_library))
    .route("/settings", get(get_settings).put(put_settings))
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// Serves on `127.0.0.1:<port>` until `shutdown` resolves.
pub async fn serve(
  app: AppState,
  port: u16,
  token: Option<String>,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| anyhow::anyhow!("failed to bind local api on {addr}: {e}"))?;
  tracing::info!(%addr, auth = token.is_some(), "starting local api");

  axum::serve(listener, router(app, token))
    .with_graceful_shutdown(shutdown)
    .await?;
  tracing::info!("local api stopped");
  Ok(())
}

fn check_auth(headers: &HeaderMap, token: Option<&str>) -> bool {
  let Some(token) = token else {
    return true;
  };
  if let Some(v) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
    if let Some(rest) = v.strip_prefix("Bearer ") {
      return rest.trim() == token;
    }
  }
  if let Some(v) = headers.get("x-crocstore-token").and_then(|v| v.to_str().ok()) {
    return v.trim() == token;
  }
  false
}

async fn get_search(State(st): State<ApiState>, headers: HeaderMap, Query(q): Query<SearchQuery>) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_search_roms(&st.app, &q.query, &q.platform, q.limit).await).into_response()
}

async fn get_platforms(State(st): State<ApiState>, headers: HeaderMap) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_get_platforms(&st.app).await).into_response()
}

async fn post_download(State(st): State<ApiState>, headers: HeaderMap, Json(req): Json<DownloadRequest>) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  let rom_id = req.rom_id.trim().to_string();
  if rom_id.is_empty() {
    return (StatusCode::BAD_REQUEST, Json(json!({ "error": "rom_id is required" }))).into_response();
  }

  let platform = req.rom_info.platform.clone();
  match st.app.engine.enqueue(&rom_id, req.rom_info) {
    Ok(mut status_rx) => {
      // Same follow-up as the blocking command: launch once it completes.
      let app = st.app.clone();
      let id = rom_id.clone();
      tokio::spawn(async move {
        let completed = matches!(
          status_rx.wait_for(|s| s.is_terminal()).await.map(|s| *s),
          Ok(crate::model::DownloadStatus::Completed)
        );
        if completed {
          ui_bridge::launch_if_enabled(&app, &id, &platform).await;
        }
      });
      let task = st.app.engine.progress(&rom_id);
      (StatusCode::ACCEPTED, Json(task)).into_response()
    }
    Err(e) => {
      let status = match e {
        StoreError::AlreadyActive(_) => StatusCode::CONFLICT,
        StoreError::Rejected => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::BAD_REQUEST,
      };
      (status, Json(json!({ "error": e.to_string(), "code": e.code() }))).into_response()
    }
  }
}

async fn get_downloads(State(st): State<ApiState>, headers: HeaderMap) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_get_all_downloads(&st.app)).into_response()
}

async fn get_download(State(st): State<ApiState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_get_download_progress(&st.app, &id)).into_response()
}

async fn post_cancel(State(st): State<ApiState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_cancel_download(&st.app, &id)).into_response()
}

async fn get_emulators(State(st): State<ApiState>, headers: HeaderMap) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_detect_emulators(&st.app).await).into_response()
}

async fn post_launch(State(st): State<ApiState>, headers: HeaderMap, Json(req): Json<LaunchRequest>) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_launch_rom(&st.app, &req.rom_path, &req.platform).await).into_response()
}

async fn get_library(State(st): State<ApiState>, headers: HeaderMap) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_get_local_roms(&st.app).await).into_response()
}

async fn get_settings(State(st): State<ApiState>, headers: HeaderMap) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  Json(ui_bridge::cmd_get_settings(&st.app).await).into_response()
}

async fn put_settings(State(st): State<ApiState>, headers: HeaderMap, Json(partial): Json<Value>) -> Response {
  if !check_auth(&headers, st.token.as_deref()) {
    return StatusCode::UNAUTHORIZED.into_response();
  }
  if ui_bridge::cmd_save_settings(&st.app, partial).await {
    Json(true).into_response()
  } else {
    (StatusCode::BAD_REQUEST, Json(false)).into_response()
  }
}
