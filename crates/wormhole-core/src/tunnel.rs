// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! The tunnel value itself: identity, state, and the observability view
//! derived from it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::frame::RequestFrame;

/// Opaque unique tunnel identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TunnelId(uuid::Uuid);

impl TunnelId {
  pub fn new_v4() -> Self {
    Self(uuid::Uuid::new_v4())
  }
}

impl fmt::Display for TunnelId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl std::str::FromStr for TunnelId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self(s.parse::<uuid::Uuid>()?))
  }
}

/// A message the tunnel session delivers to the connected client: either a
/// request frame to replay, or the one-time admission acknowledgement.
#[derive(Clone, Debug)]
pub enum OutboundMessage {
  Connected {
    tunnel_id: TunnelId,
    public_id: String,
    public_url: String,
  },
  HttpRequest(RequestFrame),
  Ping,
}

/// `Active` / `Draining` / `Closed`, driven by the session state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelState {
  Active,
  Draining,
  Closed,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
  #[error("outbound queue is full")]
  Backpressure,
  #[error("tunnel is no longer accepting frames")]
  Closed,
}

/// A live client session. Owned by the session task that drives its
/// control connection; the registry only holds a lookup `Arc`.
#[derive(Debug)]
pub struct Tunnel {
  pub tunnel_id: TunnelId,
  pub public_id: String,
  pub created_at: SystemTime,
  request_count: AtomicU64,
  state: Mutex<TunnelState>,
  outbound: mpsc::Sender<OutboundMessage>,
}

impl Tunnel {
  pub fn new(
    tunnel_id: TunnelId,
    public_id: String,
    outbound: mpsc::Sender<OutboundMessage>,
  ) -> Arc<Self> {
    Arc::new(Self {
      tunnel_id,
      public_id,
      created_at: SystemTime::now(),
      request_count: AtomicU64::new(0),
      state: Mutex::new(TunnelState::Active),
      outbound,
    })
  }

  pub fn request_count(&self) -> u64 {
    self.request_count.load(Ordering::SeqCst)
  }

  pub async fn state(&self) -> TunnelState {
    *self.state.lock().await
  }

  pub async fn set_state(&self, state: TunnelState) {
    *self.state.lock().await = state;
  }

  /// Enqueues a request frame on the outbound writer, incrementing
  /// `request_count` only on success: the count must equal the cumulative
  /// number of frames actually handed to the tunnel's outbound writer.
  pub fn dispatch(&self, frame: RequestFrame) -> Result<(), SendError> {
    self
      .outbound
      .try_send(OutboundMessage::HttpRequest(frame))
      .map_err(|err| match err {
        mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
        mpsc::error::TrySendError::Closed(_) => SendError::Closed,
      })?;
    self.request_count.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  /// Sends the one-time admission acknowledgement.
  pub fn notify_connected(&self, public_url: String) -> Result<(), SendError> {
    self
      .outbound
      .try_send(OutboundMessage::Connected {
        tunnel_id: self.tunnel_id,
        public_id: self.public_id.clone(),
        public_url,
      })
      .map_err(|err| match err {
        mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
        mpsc::error::TrySendError::Closed(_) => SendError::Closed,
      })
  }

  /// Sends a heartbeat ping; does not count against `request_count`.
  pub fn ping(&self) -> Result<(), SendError> {
    self.outbound.try_send(OutboundMessage::Ping).map_err(|err| match err {
      mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
      mpsc::error::TrySendError::Closed(_) => SendError::Closed,
    })
  }

  pub fn info(&self) -> TunnelInfo {
    TunnelInfo {
      tunnel_id: self.tunnel_id,
      public_id: self.public_id.clone(),
      created_at: self.created_at,
      request_count: self.request_count(),
    }
  }
}

/// Observability view. Derived; never mutated directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelInfo {
  pub tunnel_id: TunnelId,
  pub public_id: String,
  pub created_at: SystemTime,
  pub request_count: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_frame() -> RequestFrame {
    RequestFrame {
      request_id: "r1".into(),
      tunnel_id: TunnelId::new_v4(),
      method: "GET".into(),
      path: "/".into(),
      query: "".into(),
      headers: crate::headers::HeaderList::new(),
      body: Vec::new(),
      is_websocket: false,
    }
  }

  #[tokio::test]
  async fn dispatch_increments_request_count_only_on_success() {
    let (tx, mut rx) = mpsc::channel(1);
    let tunnel = Tunnel::new(TunnelId::new_v4(), "abc123xy".into(), tx);
    tunnel.dispatch(sample_frame()).unwrap();
    assert_eq!(tunnel.request_count(), 1);

    // queue now full (capacity 1, message not yet drained)
    let err = tunnel.dispatch(sample_frame()).unwrap_err();
    assert_eq!(err, SendError::Backpressure);
    assert_eq!(tunnel.request_count(), 1);

    rx.recv().await.unwrap();
  }

  #[tokio::test]
  async fn dispatch_after_close_reports_closed() {
    let (tx, rx) = mpsc::channel(1);
    let tunnel = Tunnel::new(TunnelId::new_v4(), "abc123xy".into(), tx);
    drop(rx);
    assert_eq!(tunnel.dispatch(sample_frame()), Err(SendError::Closed));
  }
}
