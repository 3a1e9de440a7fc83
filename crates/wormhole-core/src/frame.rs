// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Request and response frames: the fixed-schema records that travel over a
//! tunnel's duplex channel.
//!
//! Bodies are carried as opaque bytes in memory. On any text-based wire
//! (the monolithic control channel's JSON text frames, and the broker's
//! JSON payloads) bodies are hex-encoded uniformly, so that arbitrary byte
//! sequences — not just valid UTF-8 — round-trip exactly. A byte-exact
//! round trip only holds if every text transport hex-encodes consistently.

use serde::{Deserialize, Serialize};

use crate::headers::{HeaderList, WireHeaders};
use crate::tunnel::TunnelId;

/// A request handed from a tunnel session to a connected client, carrying
/// one public HTTP request to be replayed locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFrame {
  pub request_id: String,
  pub tunnel_id: TunnelId,
  pub method: String,
  pub path: String,
  pub query: String,
  pub headers: HeaderList,
  pub body: Vec<u8>,
  /// Reserved; always `false`. WebSocket-payload tunneling through the
  /// frame channel is not supported.
  pub is_websocket: bool,
}

/// A reply handed back from a client to the tunnel session that forwards
/// it to the waiting ingress caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseFrame {
  pub request_id: String,
  pub status: u16,
  pub headers: HeaderList,
  pub body: Vec<u8>,
}

impl ResponseFrame {
  /// `status` must fall in [100, 599].
  pub fn validate_status(status: u16) -> bool {
    (100..=599).contains(&status)
  }
}

/// Wire representation of [`RequestFrame`]: headers as an ordered pair list
/// and body hex-encoded, matching the control channel's `http_request`
/// message and the broker's equivalent payload.
#[derive(Serialize, Deserialize)]
pub struct WireRequestFrame {
  pub request_id: String,
  pub method: String,
  pub path: String,
  pub query_string: String,
  pub headers: WireHeaders,
  pub body: String,
  #[serde(default)]
  pub is_websocket: bool,
}

impl From<&RequestFrame> for WireRequestFrame {
  fn from(frame: &RequestFrame) -> Self {
    Self {
      request_id: frame.request_id.clone(),
      method: frame.method.clone(),
      path: frame.path.clone(),
      query_string: frame.query.clone(),
      headers: frame.headers.clone().into(),
      body: hex::encode(&frame.body),
      is_websocket: frame.is_websocket,
    }
  }
}

impl WireRequestFrame {
  pub fn into_frame(self, tunnel_id: TunnelId) -> Result<RequestFrame, FrameDecodeError> {
    let body = hex::decode(&self.body).map_err(|_| FrameDecodeError::InvalidBodyHex)?;
    Ok(RequestFrame {
      request_id: self.request_id,
      tunnel_id,
      method: self.method,
      path: self.path,
      query: self.query_string,
      headers: self.headers.into(),
      body,
      is_websocket: self.is_websocket,
    })
  }
}

/// Wire representation of [`ResponseFrame`]: body hex-encoded.
#[derive(Serialize, Deserialize)]
pub struct WireResponseFrame {
  pub request_id: String,
  pub status: u16,
  pub headers: WireHeaders,
  pub body: String,
}

impl From<&ResponseFrame> for WireResponseFrame {
  fn from(frame: &ResponseFrame) -> Self {
    Self {
      request_id: frame.request_id.clone(),
      status: frame.status,
      headers: frame.headers.clone().into(),
      body: hex::encode(&frame.body),
    }
  }
}

impl WireResponseFrame {
  pub fn into_frame(self) -> Result<ResponseFrame, FrameDecodeError> {
    let body = hex::decode(&self.body).map_err(|_| FrameDecodeError::InvalidBodyHex)?;
    if !ResponseFrame::validate_status(self.status) {
      return Err(FrameDecodeError::InvalidStatus(self.status));
    }
    Ok(ResponseFrame {
      request_id: self.request_id,
      status: self.status,
      headers: self.headers.into(),
      body,
    })
  }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
  #[error("response body was not valid hex")]
  InvalidBodyHex,
  #[error("response status {0} is outside the valid 100-599 range")]
  InvalidStatus(u16),
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_tunnel_id() -> TunnelId {
    TunnelId::new_v4()
  }

  #[test]
  fn request_frame_hex_round_trips_arbitrary_bytes() {
    let frame = RequestFrame {
      request_id: "req-1".into(),
      tunnel_id: sample_tunnel_id(),
      method: "POST".into(),
      path: "/hello".into(),
      query: "".into(),
      headers: HeaderList::new(),
      body: vec![0x00, 0xFF, 0x10],
      is_websocket: false,
    };
    let wire = WireRequestFrame::from(&frame);
    let decoded = wire.into_frame(frame.tunnel_id).unwrap();
    assert_eq!(decoded.body, vec![0x00, 0xFF, 0x10]);
  }

  #[test]
  fn response_frame_rejects_out_of_range_status() {
    let wire = WireResponseFrame {
      request_id: "req-1".into(),
      status: 700,
      headers: crate::headers::WireHeaders::default(),
      body: String::new(),
    };
    assert!(matches!(
      wire.into_frame(),
      Err(FrameDecodeError::InvalidStatus(700))
    ));
  }

  #[test]
  fn response_frame_rejects_invalid_hex() {
    let wire = WireResponseFrame {
      request_id: "req-1".into(),
      status: 200,
      headers: crate::headers::WireHeaders::default(),
      body: "not-hex".into(),
    };
    assert!(matches!(
      wire.into_frame(),
      Err(FrameDecodeError::InvalidBodyHex)
    ));
  }
}
