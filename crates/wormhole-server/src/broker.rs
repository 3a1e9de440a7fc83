// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Split-shape transport: a subject-addressed request/reply call over NATS.
//!
//! Grounded on the original Python service's NATS-backed tunnel transport:
//! the tunnel-owning side subscribes to `tunnel.<tunnel_id>` and replies to
//! each message; the ingress side issues `client.request(subject, payload)`
//! with a timeout. `async-nats`'s `Client::request` manages the reply-to
//! subject internally, so no explicit reply subject type is needed here.
//!
//! The ingress process in split mode does not hold the tunnel's socket, so
//! it cannot share `wormhole_core::registry::TunnelRegistry` (keyed by a
//! live `Tunnel` with its own outbound writer). Instead it keeps a
//! [`RemoteDirectory`]: a lightweight `public_id -> tunnel_id` map kept in
//! sync by the tunnel-owning process publishing directory events on
//! `tunnel.directory` whenever it admits or drains a tunnel locally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use wormhole_core::frame::{RequestFrame, ResponseFrame, WireRequestFrame, WireResponseFrame};
use wormhole_core::transport::{CallError, TunnelTransport};
use wormhole_core::tunnel::TunnelId;

pub const DIRECTORY_SUBJECT: &str = "tunnel.directory";

pub fn request_subject(tunnel_id: TunnelId) -> String {
  format!("tunnel.{tunnel_id}")
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "event")]
pub enum DirectoryEvent {
  Registered { public_id: String, tunnel_id: String },
  Deregistered { public_id: String },
}

/// The ingress-side view of which tunnels currently exist, replicated from
/// directory events rather than owned locally.
#[derive(Default)]
pub struct RemoteDirectory {
  entries: Mutex<HashMap<String, TunnelId>>,
}

impl RemoteDirectory {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub async fn lookup(&self, public_id: &str) -> Option<TunnelId> {
    self.entries.lock().await.get(public_id).copied()
  }

  async fn apply(&self, event: DirectoryEvent) {
    let mut entries = self.entries.lock().await;
    match event {
      DirectoryEvent::Registered { public_id, tunnel_id } => {
        if let Ok(tunnel_id) = tunnel_id.parse() {
          entries.insert(public_id, tunnel_id);
        }
      }
      DirectoryEvent::Deregistered { public_id } => {
        entries.remove(&public_id);
      }
    }
  }

  /// Subscribes to [`DIRECTORY_SUBJECT`] and applies events as they arrive.
  /// Runs until the NATS connection closes the subscription.
  pub async fn run_sync(self: Arc<Self>, client: async_nats::Client) -> anyhow::Result<()> {
    let mut subscriber = client.subscribe(DIRECTORY_SUBJECT.to_string()).await?;
    while let Some(message) = subscriber.next().await {
      match serde_json::from_slice::<DirectoryEvent>(&message.payload) {
        Ok(event) => self.apply(event).await,
        Err(err) => tracing::warn!(%err, "ignoring malformed directory event"),
      }
    }
    Ok(())
  }
}

/// Publishes a [`DirectoryEvent`] on [`DIRECTORY_SUBJECT`]. Called by the
/// tunnel-owning role on admission and on drain.
pub async fn publish_directory_event(
  client: &async_nats::Client,
  event: DirectoryEvent,
) -> anyhow::Result<()> {
  let payload = serde_json::to_vec(&event)?;
  client.publish(DIRECTORY_SUBJECT.to_string(), payload.into()).await?;
  Ok(())
}

/// Split-shape transport used by the ingress role: looks up `tunnel_id`
/// has already been resolved by the caller via [`RemoteDirectory`]; this
/// type only performs the NATS request/reply call itself.
pub struct BrokerTransport {
  client: async_nats::Client,
}

impl BrokerTransport {
  pub fn new(client: async_nats::Client) -> Self {
    Self { client }
  }
}

impl TunnelTransport for BrokerTransport {
  fn call(&self, request: RequestFrame, deadline: Instant) -> BoxFuture<'_, Result<ResponseFrame, CallError>> {
    Box::pin(async move {
      let timeout = deadline.saturating_duration_since(Instant::now());
      let subject = request_subject(request.tunnel_id);
      let payload = serde_json::to_vec(&WireRequestFrame::from(&request))
        .map_err(|_| CallError::TransportFault)?;

      let reply = tokio::time::timeout(timeout, self.client.request(subject, payload.into()))
        .await
        .map_err(|_| CallError::Timeout)?
        .map_err(|_| CallError::TransportFault)?;

      let wire: WireResponseFrame =
        serde_json::from_slice(&reply.payload).map_err(|_| CallError::MalformedReply)?;
      wire.into_frame().map_err(|_| CallError::MalformedReply)
    })
  }
}

/// Runs on the tunnel-owning role: subscribes to this tunnel's subject and
/// forwards each request to the local transport (normally a
/// [`wormhole_core::transport::DirectTransport`] bound to the tunnel that
/// was just admitted), publishing the reply back to the implicit reply
/// subject NATS attaches to each request message.
pub async fn serve_tunnel_subject(
  client: async_nats::Client,
  tunnel_id: TunnelId,
  transport: Arc<dyn TunnelTransport>,
  request_timeout: Duration,
) -> anyhow::Result<()> {
  let subject = request_subject(tunnel_id);
  let mut subscriber = client.subscribe(subject).await?;
  while let Some(message) = subscriber.next().await {
    let Some(reply_subject) = message.reply.clone() else {
      tracing::warn!(%tunnel_id, "discarding broker request with no reply subject");
      continue;
    };
    let client = client.clone();
    let transport = transport.clone();
    tokio::spawn(async move {
      let response =
        handle_broker_request(transport.as_ref(), tunnel_id, &message.payload, request_timeout).await;
      if let Ok(payload) = response {
        let _ = client.publish(reply_subject, payload.into()).await;
      }
    });
  }
  Ok(())
}

async fn handle_broker_request(
  transport: &dyn TunnelTransport,
  tunnel_id: TunnelId,
  payload: &[u8],
  request_timeout: Duration,
) -> anyhow::Result<Vec<u8>> {
  let wire: WireRequestFrame = serde_json::from_slice(payload)?;
  let frame = wire.into_frame(tunnel_id)?;
  let deadline = Instant::now() + request_timeout;
  let outcome = transport.call(frame, deadline).await;
  let wire_response = match outcome {
    Ok(response) => WireResponseFrame::from(&response),
    Err(_) => WireResponseFrame {
      request_id: String::new(),
      status: 502,
      headers: wormhole_core::headers::WireHeaders::default(),
      body: String::new(),
    },
  };
  Ok(serde_json::to_vec(&wire_response)?)
}
