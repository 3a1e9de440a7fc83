// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Ingress dispatcher: classify a public HTTP request to a tunnel, marshal
//! it to a request frame, suspend on the transport, and resume with the
//! HTTP reply.
//!
//! Grounded on `mockforge-tunnel`'s `path_based_proxy_handler` /
//! `host_header_proxy_handler` / `forward_request` shape: an axum handler
//! that reads the body, strips hop-by-hop headers, and forwards — adapted
//! here to go through the tunnel transport abstraction instead of
//! `reqwest`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use wormhole_core::frame::{RequestFrame, ResponseFrame};
use wormhole_core::headers::HeaderList;
use wormhole_core::pending::deadline_from_now;
use wormhole_core::routing::resolve_public_id;

use crate::error::IngressError;
use crate::state::AppState;

pub async fn handle_proxied_request(
  State(state): State<Arc<AppState>>,
  method: Method,
  headers: HeaderMap,
  OriginalUri(uri): OriginalUri,
  body: Bytes,
) -> Response {
  match dispatch(&state, method, headers, uri, body).await {
    Ok(response) => response,
    Err(err) => err.into_response(),
  }
}

async fn dispatch(
  state: &AppState,
  method: Method,
  headers: HeaderMap,
  uri: axum::http::Uri,
  body: Bytes,
) -> Result<Response, IngressError> {
  let host_header = headers
    .get(axum::http::header::HOST)
    .and_then(|v| v.to_str().ok());

  let resolved = resolve_public_id(
    state.config.routing_mode(),
    host_header,
    &state.config.base_domain,
    uri.path(),
  );

  let Some(resolved) = resolved else {
    return Ok(crate::admin::not_found());
  };

  if body.len() > state.config.max_body_bytes {
    return Err(IngressError::BodyTooLarge);
  }

  let request_id = uuid::Uuid::new_v4().to_string();
  let query = uri.query().unwrap_or("").to_string();
  let forwarded_path = resolved.forwarded_path;
  let forwarded_headers = HeaderList::from_forwarded(
    headers
      .iter()
      .filter(|(name, _)| *name != axum::http::header::HOST)
      .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string())),
  );
  let method_str = method.to_string();
  let body_bytes = body.to_vec();

  let deadline = deadline_from_now(state.config.request_timeout());
  let response = state
    .call(&resolved.public_id, deadline, move |tunnel_id| RequestFrame {
      request_id,
      tunnel_id,
      method: method_str,
      path: forwarded_path,
      query,
      headers: forwarded_headers,
      body: body_bytes,
      is_websocket: false,
    })
    .await?;

  Ok(build_http_response(response))
}

fn build_http_response(frame: ResponseFrame) -> Response {
  let status = StatusCode::from_u16(frame.status).unwrap_or(StatusCode::BAD_GATEWAY);
  let mut builder = Response::builder().status(status);
  if let Some(builder_headers) = builder.headers_mut() {
    for (name, value) in HeaderList::from_forwarded(frame.headers.0).iter() {
      if let (Ok(name), Ok(value)) = (
        axum::http::HeaderName::from_bytes(name.as_bytes()),
        axum::http::HeaderValue::from_str(value),
      ) {
        builder_headers.append(name, value);
      }
    }
  }
  builder
    .body(axum::body::Body::from(frame.body))
    .map(|response| response.map(axum::body::boxed))
    .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

#[cfg(test)]
mod tests {
  use super::*;
  use wormhole_core::headers::HeaderList as CoreHeaderList;

  #[test]
  fn build_http_response_copies_status_and_body() {
    let response = build_http_response(ResponseFrame {
      request_id: "r1".into(),
      status: 201,
      headers: CoreHeaderList::new(),
      body: b"created".to_vec(),
    });
    assert_eq!(response.status(), StatusCode::CREATED);
  }
}
