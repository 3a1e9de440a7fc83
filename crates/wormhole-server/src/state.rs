// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Shared application state and the deployment-shape backend it wires up.
//! No process-wide mutable state: everything here is handed to axum via a
//! passed `State<Arc<AppState>>` dependency rather than a global singleton.

use std::sync::Arc;
use std::time::Instant;

use wormhole_core::frame::{RequestFrame, ResponseFrame};
use wormhole_core::pending::PendingTable;
use wormhole_core::registry::TunnelRegistry;
use wormhole_core::transport::{DirectTransport, TunnelTransport};
use wormhole_core::tunnel::TunnelId;

use crate::broker::{BrokerTransport, RemoteDirectory};
use crate::config::Config;
use crate::error::IngressError;

/// The monolithic shape keeps tunnels (with live sockets) in a local
/// registry and dispatches directly; the split shape resolves `public_id`
/// through a replicated directory and calls out over the broker.
pub enum Backend {
  Direct {
    registry: Arc<dyn TunnelRegistry>,
    pending: Arc<PendingTable>,
    /// Set when this process also plays the split shape's tunnel-owning
    /// role: tunnels admitted here are announced on the broker's directory
    /// subject and served over their own subject, in addition to being
    /// reachable locally.
    broker: Option<async_nats::Client>,
  },
  Broker {
    directory: Arc<RemoteDirectory>,
    transport: Arc<BrokerTransport>,
  },
}

pub struct AppState {
  pub config: Arc<Config>,
  pub backend: Backend,
}

impl AppState {
  /// Resolves `public_id` to a tunnel and performs one "send request, await
  /// reply, with timeout" call, building the request frame lazily so the
  /// caller only pays for constructing it once a tunnel is known to exist.
  pub async fn call(
    &self,
    public_id: &str,
    deadline: Instant,
    build_frame: impl FnOnce(TunnelId) -> RequestFrame,
  ) -> Result<ResponseFrame, IngressError> {
    match &self.backend {
      Backend::Direct { registry, pending, .. } => {
        let Some(tunnel) = registry.lookup(public_id).await else {
          return Err(IngressError::NoSuchTunnel(public_id.to_string()));
        };
        let transport = DirectTransport::new(tunnel.clone(), pending.clone());
        let frame = build_frame(tunnel.tunnel_id);
        transport.call(frame, deadline).await.map_err(IngressError::from)
      }
      Backend::Broker { directory, transport } => {
        let Some(tunnel_id) = directory.lookup(public_id).await else {
          return Err(IngressError::NoSuchTunnel(public_id.to_string()));
        };
        let frame = build_frame(tunnel_id);
        transport.call(frame, deadline).await.map_err(IngressError::from)
      }
    }
  }

  pub async fn active_tunnel_count(&self) -> usize {
    match &self.backend {
      Backend::Direct { registry, .. } => registry.snapshot().await.len(),
      Backend::Broker { .. } => 0,
    }
  }

  pub async fn snapshot(&self) -> Vec<wormhole_core::tunnel::TunnelInfo> {
    match &self.backend {
      Backend::Direct { registry, .. } => registry.snapshot().await,
      Backend::Broker { .. } => Vec::new(),
    }
  }
}

