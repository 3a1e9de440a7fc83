// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Tunnel session: per-connection state machine.
//!
//! ```text
//!   (none) --accept--> Handshake --ok--> Active --drain--> Draining --last-ack/deadline--> Closed
//!                         |                  |
//!                         fail               fault
//!                          \-----------------+----> Closed
//! ```
//!
//! This module owns the state machine logic only. The actual control
//! socket (a WebSocket upgrade in `wormhole-server`) is reduced to two
//! channels — a decoded-message receiver and the tunnel's own outbound
//! sender — the same "pass a dependency, not a concrete transport" shape
//! `ModularDaemon` uses for its tunnel incoming streams, and one that lets
//! the whole state machine be exercised in tests with plain
//! `tokio::sync::mpsc` channels instead of real sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::frame::ResponseFrame;
use crate::pending::PendingError;
use crate::pending::PendingTable;
use crate::registry::TunnelRegistry;
use crate::tunnel::{Tunnel, TunnelId, TunnelState};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
  #[error("preferred public id was already claimed by an active tunnel")]
  PublicIdCollision,
  #[error("exhausted retries generating a unique public id")]
  RetriesExhausted,
}

/// A decoded message arriving from the client over the control channel.
#[derive(Clone, Debug)]
pub enum ClientMessage {
  Response(ResponseFrame),
  Pong,
  /// A recognized-but-unactionable text frame (forward-compat); logged and
  /// ignored.
  Unrecognized,
  /// A reply that parsed as JSON but failed frame validation (bad status or
  /// non-hex body). Carries the `request_id` so the pending slot can still
  /// be resolved instead of left to time out.
  MalformedReply(String),
  /// A binary frame or decode error; terminates the session.
  Fault,
}

/// Why an active session stopped running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainReason {
  InboundClosed,
  Fault,
  HeartbeatTimeout,
  Shutdown,
}

const DEFAULT_MAX_HANDSHAKE_ATTEMPTS: usize = 8;

/// Generates an 8-byte, URL-safe public id. Hex-encoded: every character
/// falls in `[0-9a-f]`, a subset of the URL-safe alphabet.
pub fn generate_public_id() -> String {
  let bytes: [u8; 8] = rand::random();
  hex::encode(bytes)
}

/// Admits a new tunnel: allocates `tunnel_id`, resolves `public_id`
/// (preferred or generated, with bounded retry on collision), and
/// registers it. Does not send the `Connected` acknowledgement — callers
/// do that once they have the returned `Tunnel` handle, so the outbound
/// channel is fully wired first.
pub async fn admit(
  registry: &dyn TunnelRegistry,
  outbound: mpsc::Sender<crate::tunnel::OutboundMessage>,
  requested_public_id: Option<String>,
) -> Result<Arc<Tunnel>, HandshakeError> {
  let tunnel_id = TunnelId::new_v4();

  if let Some(public_id) = requested_public_id {
    let tunnel = Tunnel::new(tunnel_id, public_id.clone(), outbound);
    return match registry.insert(public_id, tunnel.clone()).await {
      Ok(()) => Ok(tunnel),
      // An explicit preferred id that collides with an active tunnel fails
      // the handshake outright; the server never evicts the incumbent in
      // favor of a newcomer.
      Err(_) => Err(HandshakeError::PublicIdCollision),
    };
  }

  for _ in 0..DEFAULT_MAX_HANDSHAKE_ATTEMPTS {
    let public_id = generate_public_id();
    let tunnel = Tunnel::new(tunnel_id, public_id.clone(), outbound.clone());
    if registry.insert(public_id, tunnel.clone()).await.is_ok() {
      return Ok(tunnel);
    }
  }
  Err(HandshakeError::RetriesExhausted)
}

/// Drives the `Active` phase: the inbound response pump and the heartbeat
/// liveness check run concurrently until one of them decides the session
/// is over, then transitions the tunnel through `Draining` to `Closed`,
/// removing it from the registry and resolving every pending request
/// bound to it with [`PendingError::TunnelGone`].
pub async fn run_active_session(
  tunnel: Arc<Tunnel>,
  registry: Arc<dyn TunnelRegistry>,
  pending: Arc<PendingTable>,
  mut inbound: mpsc::Receiver<ClientMessage>,
  heartbeat_interval: Duration,
) -> DrainReason {
  tunnel.set_state(TunnelState::Active).await;

  let mut last_pong = Instant::now();
  let mut heartbeat = tokio::time::interval(heartbeat_interval);
  heartbeat.tick().await; // first tick is immediate; consume it up front

  let reason = loop {
    tokio::select! {
      message = inbound.recv() => {
        match message {
          Some(ClientMessage::Response(frame)) => {
            let request_id = frame.request_id.clone();
            pending.resolve(&request_id, frame).await;
          }
          Some(ClientMessage::Pong) => {
            last_pong = Instant::now();
          }
          Some(ClientMessage::Unrecognized) => {
            tracing::warn!(tunnel_id = %tunnel.tunnel_id, "ignoring unrecognized control frame");
          }
          Some(ClientMessage::MalformedReply(request_id)) => {
            tracing::warn!(tunnel_id = %tunnel.tunnel_id, %request_id, "reply failed frame validation");
            pending.resolve_with(&request_id, PendingError::MalformedReply).await;
          }
          Some(ClientMessage::Fault) => break DrainReason::Fault,
          None => break DrainReason::InboundClosed,
        }
      }
      _ = heartbeat.tick() => {
        if last_pong.elapsed() > heartbeat_interval {
          break DrainReason::HeartbeatTimeout;
        }
        if tunnel.ping().is_err() {
          break DrainReason::Fault;
        }
      }
    }
  };

  drain(&tunnel, registry.as_ref(), &pending).await;
  reason
}

/// Transitions a tunnel to `Draining` then `Closed`: removes the registry
/// entry so no new requests arrive, and resolves every in-flight pending
/// request bound to this tunnel with `TunnelGone`.
pub async fn drain(tunnel: &Tunnel, registry: &dyn TunnelRegistry, pending: &PendingTable) {
  tunnel.set_state(TunnelState::Draining).await;
  registry.remove(&tunnel.public_id, tunnel.tunnel_id).await;
  pending.drain(tunnel.tunnel_id, PendingError::TunnelGone).await;
  tunnel.set_state(TunnelState::Closed).await;
}
