// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Admin HTTP endpoints on the base domain: the welcome page, the
//! `/status` JSON endpoint, and the `/tunnel` control-channel upgrade (the
//! latter lives in `control.rs`).
//!
//! Grounded on the original `handlers.py`'s `handle_index`/`handle_status`:
//! the welcome page lists the live tunnel
//! count and route categories, and `/status` returns the same shape as
//! the Python original's `{"status": "running", ...}`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct TunnelInfoView {
  tunnel_id: String,
  public_id: String,
  request_count: u64,
}

#[derive(Serialize)]
pub(crate) struct StatusResponse {
  status: &'static str,
  active_tunnels: usize,
  tunnels: Vec<TunnelInfoView>,
}

pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
  let tunnels: Vec<TunnelInfoView> = state
    .snapshot()
    .await
    .into_iter()
    .map(|info| TunnelInfoView {
      tunnel_id: info.tunnel_id.to_string(),
      public_id: info.public_id,
      request_count: info.request_count,
    })
    .collect();
  Json(StatusResponse {
    status: "running",
    active_tunnels: tunnels.len(),
    tunnels,
  })
}

pub async fn handle_index(State(state): State<Arc<AppState>>) -> Html<String> {
  let active = state.active_tunnel_count().await;
  Html(format!(
    "<!DOCTYPE html>\
<html><head><title>wormhole</title></head><body>\
<h1>wormhole reverse-tunnel server</h1>\
<p>{active} tunnel(s) currently connected.</p>\
<ul>\
<li><code>GET /tunnel</code> — control channel upgrade for tunnel clients</li>\
<li><code>GET /status</code> — JSON status of active tunnels</li>\
<li>any other path or subdomain — proxied to a connected tunnel</li>\
</ul>\
</body></html>"
  ))
}

/// Fallback for requests that resolve to no tunnel and no admin route.
pub fn not_found() -> Response {
  (StatusCode::NOT_FOUND, "not found").into_response()
}
