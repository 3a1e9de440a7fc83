// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Transport abstraction: "send one request, await one reply, with
//! timeout". The dispatcher depends only on [`TunnelTransport`]; swapping
//! between the monolithic direct transport and the split broker transport
//! is a wiring concern in `wormhole-server`.
//!
//! Grounded on the `BoxFuture`-returning trait-object pattern from
//! `snocat::common::protocol::traits` (`Router`, `Client`): a small
//! interface with two implementations rather than an inheritance
//! hierarchy.

use std::time::Instant;

use futures::future::BoxFuture;

use crate::frame::{RequestFrame, ResponseFrame};
use crate::pending::{PendingError, PendingTable};
use crate::tunnel::{SendError, Tunnel};
use std::sync::Arc;

/// Reported by [`TunnelTransport::call`]. `Backpressure` covers a full
/// outbound writer queue (mapped to HTTP 503 at ingress) and is folded
/// into this enum rather than given a second return path, so the
/// single-contract interface can report it alongside every other
/// terminal outcome.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
  #[error("no response arrived before the deadline")]
  Timeout,
  #[error("the tunnel closed before replying")]
  TunnelGone,
  #[error("transport I/O failure")]
  TransportFault,
  #[error("response frame failed schema validation")]
  MalformedReply,
  #[error("outbound queue is full")]
  Backpressure,
}

impl From<PendingError> for CallError {
  fn from(err: PendingError) -> Self {
    match err {
      PendingError::Timeout => CallError::Timeout,
      PendingError::TunnelGone | PendingError::Cancelled => CallError::TunnelGone,
      PendingError::MalformedReply => CallError::MalformedReply,
    }
  }
}

impl From<SendError> for CallError {
  fn from(err: SendError) -> Self {
    match err {
      SendError::Backpressure => CallError::Backpressure,
      SendError::Closed => CallError::TunnelGone,
    }
  }
}

/// The single contract shared by the direct (in-process) and broker
/// (split-shape) transports.
pub trait TunnelTransport: Send + Sync {
  fn call(&self, request: RequestFrame, deadline: Instant) -> BoxFuture<'_, Result<ResponseFrame, CallError>>;
}

/// Monolithic-shape transport: enqueues the frame on the tunnel's own
/// outbound writer and awaits resolution through the shared pending-request
/// table, which the tunnel session's inbound pump resolves directly.
pub struct DirectTransport {
  tunnel: Arc<Tunnel>,
  pending: Arc<PendingTable>,
}

impl DirectTransport {
  pub fn new(tunnel: Arc<Tunnel>, pending: Arc<PendingTable>) -> Self {
    Self { tunnel, pending }
  }
}

impl TunnelTransport for DirectTransport {
  fn call(&self, request: RequestFrame, deadline: Instant) -> BoxFuture<'_, Result<ResponseFrame, CallError>> {
    Box::pin(async move {
      let request_id = request.request_id.clone();
      let tunnel_id = request.tunnel_id;
      let rx = self.pending.register(request_id.clone(), tunnel_id, deadline).await;

      if let Err(err) = self.tunnel.dispatch(request) {
        self.pending.cancel(&request_id).await;
        return Err(err.into());
      }

      match rx.await {
        Ok(outcome) => outcome.map_err(CallError::from),
        // Sender dropped without resolving: the session task that owned
        // this tunnel exited uncleanly.
        Err(_) => Err(CallError::TunnelGone),
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::headers::HeaderList;
  use crate::pending::deadline_from_now;
  use crate::tunnel::{OutboundMessage, TunnelId};
  use std::time::Duration;
  use tokio::sync::mpsc;

  fn sample_request(tunnel_id: TunnelId) -> RequestFrame {
    RequestFrame {
      request_id: "r1".into(),
      tunnel_id,
      method: "GET".into(),
      path: "/hello".into(),
      query: "".into(),
      headers: HeaderList::new(),
      body: Vec::new(),
      is_websocket: false,
    }
  }

  #[tokio::test]
  async fn call_resolves_once_session_replies() {
    let pending = PendingTable::new();
    let (tx, mut rx) = mpsc::channel(8);
    let tunnel = Tunnel::new(TunnelId::new_v4(), "abc123xy".into(), tx);
    let transport = DirectTransport::new(tunnel.clone(), pending.clone());

    let request = sample_request(tunnel.tunnel_id);
    let deadline = deadline_from_now(Duration::from_secs(5));
    let call = tokio::spawn({
      let transport_request = request.clone();
      async move { transport.call(transport_request, deadline).await }
    });

    let dispatched = rx.recv().await.unwrap();
    let request_id = match dispatched {
      OutboundMessage::HttpRequest(frame) => frame.request_id,
      _ => panic!("expected http request"),
    };
    pending
      .resolve(
        &request_id.clone(),
        ResponseFrame {
          request_id,
          status: 200,
          headers: HeaderList::new(),
          body: b"hi".to_vec(),
        },
      )
      .await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
  }

  #[tokio::test]
  async fn call_reports_backpressure_on_full_queue() {
    let pending = PendingTable::new();
    let (tx, _rx) = mpsc::channel(1);
    let tunnel = Tunnel::new(TunnelId::new_v4(), "abc123xy".into(), tx);
    tunnel.dispatch(sample_request(tunnel.tunnel_id)).unwrap();

    let transport = DirectTransport::new(tunnel.clone(), pending);
    let deadline = deadline_from_now(Duration::from_secs(5));
    let err = transport
      .call(sample_request(tunnel.tunnel_id), deadline)
      .await
      .unwrap_err();
    assert_eq!(err, CallError::Backpressure);
  }

  #[test]
  fn malformed_reply_maps_from_pending_error() {
    assert_eq!(CallError::from(PendingError::MalformedReply), CallError::MalformedReply);
  }
}
