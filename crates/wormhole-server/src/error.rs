// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Maps the ingress error taxonomy onto HTTP status codes at the ingress
//! boundary. Grounded on `snocat::server::modular`'s
//! `RequestProcessingError`/`TunnelLifecycleError` thiserror enums: one
//! enum per subsystem, `Display` messages meant for logs, converted to a
//! wire-facing representation only at the edge (here, `IntoResponse`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use wormhole_core::transport::CallError;

/// Ingress-facing disposition of a proxied request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IngressError {
  #[error("tunnel {0} not found or not connected")]
  NoSuchTunnel(String),
  #[error("request body exceeded the configured limit")]
  BodyTooLarge,
  #[error("tunnel outbound queue is full")]
  Backpressure,
  #[error("tunnel request timeout")]
  Timeout,
  #[error("tunnel error")]
  TunnelGone,
  #[error("tunnel transport error")]
  TransportFault,
  #[error("tunnel returned a malformed response")]
  MalformedReply,
}

impl From<CallError> for IngressError {
  fn from(err: CallError) -> Self {
    match err {
      CallError::Timeout => IngressError::Timeout,
      CallError::TunnelGone => IngressError::TunnelGone,
      CallError::TransportFault => IngressError::TransportFault,
      CallError::MalformedReply => IngressError::MalformedReply,
      CallError::Backpressure => IngressError::Backpressure,
    }
  }
}

impl IngressError {
  pub fn status_code(&self) -> StatusCode {
    match self {
      IngressError::NoSuchTunnel(_) => StatusCode::NOT_FOUND,
      IngressError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
      IngressError::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
      IngressError::Timeout => StatusCode::GATEWAY_TIMEOUT,
      IngressError::TunnelGone | IngressError::TransportFault | IngressError::MalformedReply => {
        StatusCode::BAD_GATEWAY
      }
    }
  }
}

impl IntoResponse for IngressError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    let message = self.to_string();
    tracing::warn!(status = %status, "ingress request failed: {message}");
    (status, message).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_match_the_error_taxonomy() {
    assert_eq!(
      IngressError::NoSuchTunnel("x".into()).status_code(),
      StatusCode::NOT_FOUND
    );
    assert_eq!(IngressError::BodyTooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(IngressError::Backpressure.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(IngressError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(IngressError::TunnelGone.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(IngressError::TransportFault.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(IngressError::MalformedReply.status_code(), StatusCode::BAD_GATEWAY);
  }

  #[test]
  fn call_error_maps_onto_ingress_error() {
    assert_eq!(
      IngressError::from(CallError::Backpressure),
      IngressError::Backpressure
    );
  }
}
