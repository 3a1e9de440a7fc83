// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Control channel: the `/tunnel` WebSocket upgrade that hosts one
//! persistent bidirectional connection per client.
//!
//! Grounded on the original `handlers.py`'s `handle_tunnel_connect`
//! (the WebSocket admission + pump loop) and on
//! `localup-dev-localup`'s `handle_connection`/heartbeat `tokio::select!`
//! shape, re-expressed against `wormhole_core::session`'s channel-based
//! state machine: this module's only job is turning a real `WebSocket`
//! into the two plain channels that module expects, so the state machine
//! itself stays socket-agnostic and testable without one.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use wormhole_core::frame::{WireRequestFrame, WireResponseFrame};
use wormhole_core::session::{self, ClientMessage, HandshakeError};
use wormhole_core::transport::DirectTransport;
use wormhole_core::tunnel::OutboundMessage;

use crate::broker::{self, DirectoryEvent};
use crate::state::{AppState, Backend};

pub async fn upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  Query(params): Query<HashMap<String, String>>,
) -> Response {
  let requested_public_id = params.get("requested_public_id").cloned();
  ws.on_upgrade(move |socket| handle_socket(socket, state, requested_public_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, requested_public_id: Option<String>) {
  let (registry, pending, broker_client) = match &state.backend {
    Backend::Direct { registry, pending, broker } => (registry.clone(), pending.clone(), broker.clone()),
    Backend::Broker { .. } => {
      tracing::error!("control channel upgrade attempted on an ingress-only (broker) node");
      return;
    }
  };

  let (mut ws_sink, mut ws_stream) = socket.split();
  let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.outbound_queue_depth);

  let tunnel = match session::admit(registry.as_ref(), outbound_tx.clone(), requested_public_id).await {
    Ok(tunnel) => tunnel,
    Err(err) => {
      let _ = ws_sink.send(Message::Text(handshake_error_json(&err))).await;
      let _ = ws_sink.close().await;
      return;
    }
  };

  let public_url = state.config.public_url_for(&tunnel.public_id);
  if tunnel.notify_connected(public_url).is_err() {
    return;
  }

  // In the split shape, this process both hosts the control socket and
  // answers broker requests for it; announce the tunnel on the directory
  // subject so ingress-only nodes can resolve it.
  let broker_subject_task = broker_client.as_ref().map(|client| {
    let client = client.clone();
    let transport: Arc<dyn wormhole_core::transport::TunnelTransport> =
      Arc::new(DirectTransport::new(tunnel.clone(), pending.clone()));
    let tunnel_id = tunnel.tunnel_id;
    let public_id = tunnel.public_id.clone();
    let request_timeout = state.config.request_timeout();
    tokio::spawn(async move {
      let event = DirectoryEvent::Registered {
        public_id,
        tunnel_id: tunnel_id.to_string(),
      };
      if let Err(err) = broker::publish_directory_event(&client, event).await {
        tracing::warn!(%err, "failed to publish tunnel registration");
      }
      if let Err(err) = broker::serve_tunnel_subject(client, tunnel_id, transport, request_timeout).await {
        tracing::warn!(%err, "broker subject subscriber exited");
      }
    })
  });

  // Drain the outbound queue to the socket on a dedicated task so the
  // session state machine never blocks on socket writes directly; all
  // writes to one tunnel's socket go through this single task.
  let writer = tokio::spawn(async move {
    while let Some(message) = outbound_rx.recv().await {
      let ws_message = match message {
        OutboundMessage::Connected {
          tunnel_id,
          public_id,
          public_url,
        } => Message::Text(
          json!({
            "type": "connected",
            "tunnel_id": tunnel_id.to_string(),
            "public_id": public_id,
            "public_url": public_url,
          })
          .to_string(),
        ),
        OutboundMessage::HttpRequest(frame) => {
          let wire = WireRequestFrame::from(&frame);
          let mut value = serde_json::to_value(&wire).unwrap_or(json!({}));
          if let Some(obj) = value.as_object_mut() {
            obj.insert("type".to_string(), json!("http_request"));
          }
          Message::Text(value.to_string())
        }
        OutboundMessage::Ping => Message::Ping(Vec::new()),
      };
      if ws_sink.send(ws_message).await.is_err() {
        break;
      }
    }
  });

  let (inbound_tx, inbound_rx) = mpsc::channel(state.config.outbound_queue_depth);
  let reader = tokio::spawn(async move {
    while let Some(message) = ws_stream.next().await {
      let client_message = match message {
        Ok(Message::Text(text)) => decode_client_text(&text),
        Ok(Message::Pong(_)) => ClientMessage::Pong,
        Ok(Message::Ping(_)) => continue, // axum replies automatically
        Ok(Message::Close(_)) => break,
        Ok(Message::Binary(_)) => ClientMessage::Fault,
        Err(_) => ClientMessage::Fault,
      };
      let is_fault = matches!(client_message, ClientMessage::Fault);
      if inbound_tx.send(client_message).await.is_err() || is_fault {
        break;
      }
    }
  });

  let public_id = tunnel.public_id.clone();
  session::run_active_session(
    tunnel,
    registry,
    pending,
    inbound_rx,
    state.config.heartbeat_interval(),
  )
  .await;

  reader.abort();
  writer.abort();
  if let Some(task) = broker_subject_task {
    task.abort();
  }
  if let Some(client) = broker_client {
    let event = DirectoryEvent::Deregistered { public_id };
    if let Err(err) = broker::publish_directory_event(&client, event).await {
      tracing::warn!(%err, "failed to publish tunnel deregistration");
    }
  }
}

fn decode_client_text(text: &str) -> ClientMessage {
  match serde_json::from_str::<WireResponseFrame>(text) {
    Ok(wire) => {
      let request_id = wire.request_id.clone();
      match wire.into_frame() {
        Ok(frame) => ClientMessage::Response(frame),
        Err(_) => ClientMessage::MalformedReply(request_id),
      }
    }
    Err(_) => ClientMessage::Unrecognized,
  }
}

fn handshake_error_json(err: &HandshakeError) -> String {
  json!({
    "type": "error",
    "reason": err.to_string(),
  })
  .to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn valid_response_decodes_to_a_response_message() {
    let text = r#"{"request_id":"r1","status":200,"headers":{},"body":""}"#;
    assert!(matches!(decode_client_text(text), ClientMessage::Response(_)));
  }

  #[test]
  fn out_of_range_status_decodes_to_malformed_reply_with_its_request_id() {
    let text = r#"{"request_id":"r1","status":700,"headers":{},"body":""}"#;
    match decode_client_text(text) {
      ClientMessage::MalformedReply(request_id) => assert_eq!(request_id, "r1"),
      other => panic!("expected MalformedReply, got {other:?}"),
    }
  }

  #[test]
  fn non_hex_body_decodes_to_malformed_reply() {
    let text = r#"{"request_id":"r2","status":200,"headers":{},"body":"not-hex"}"#;
    assert!(matches!(decode_client_text(text), ClientMessage::MalformedReply(id) if id == "r2"));
  }

  #[test]
  fn unparseable_json_decodes_to_unrecognized() {
    assert!(matches!(decode_client_text("not json"), ClientMessage::Unrecognized));
  }
}
