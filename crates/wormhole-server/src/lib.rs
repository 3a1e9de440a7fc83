// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Library half of the wormhole-server binary: the admin, control-channel,
//! and ingress route handlers, the deployment-shape backend, and the
//! router assembly that wires them onto one axum `Router`. Split out of
//! `main.rs` so the HTTP surface can be exercised in integration tests
//! without a bound socket, the way `agentgateway`'s `lib.rs` keeps its
//! route modules reachable from its `tests/` crate.

pub mod admin;
pub mod broker;
pub mod config;
pub mod control;
pub mod error;
pub mod ingress;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use wormhole_core::pending::PendingTable;
use wormhole_core::registry::InMemoryTunnelRegistry;

use crate::broker::{BrokerTransport, RemoteDirectory};
use crate::config::{BrokerRoleArg, Config};
use crate::state::{AppState, Backend};

/// Builds the deployment-shape backend from configuration. `broker_url`
/// absent means a monolithic node with no broker involvement at all.
/// `broker_url` present splits on `broker_role`: `TunnelOwner` builds a
/// `Backend::Direct` that also carries a connected NATS client, so
/// `control::handle_socket` announces tunnels admitted here on the
/// directory subject and serves them over their own subject in addition to
/// routing local calls directly; `IngressOnly` builds a `Backend::Broker`
/// that never hosts `/tunnel` itself and resolves every call through the
/// replicated directory instead.
pub async fn build_app_state(config: &Config) -> anyhow::Result<AppState> {
  let config = Arc::new(config.clone());

  let backend = match &config.broker_url {
    None => Backend::Direct {
      registry: Arc::new(InMemoryTunnelRegistry::new()),
      pending: PendingTable::new(),
      broker: None,
    },
    Some(url) => {
      let client = async_nats::connect(url).await?;
      match config.broker_role {
        BrokerRoleArg::TunnelOwner => Backend::Direct {
          registry: Arc::new(InMemoryTunnelRegistry::new()),
          pending: PendingTable::new(),
          broker: Some(client),
        },
        BrokerRoleArg::IngressOnly => {
          let directory = RemoteDirectory::new();
          tokio::spawn({
            let directory = directory.clone();
            let client = client.clone();
            async move {
              if let Err(err) = directory.run_sync(client).await {
                tracing::error!(%err, "directory sync subscriber exited");
              }
            }
          });
          Backend::Broker {
            directory,
            transport: Arc::new(BrokerTransport::new(client)),
          }
        }
      }
    }
  };

  Ok(AppState { config, backend })
}

/// Assembles the full route tree: admin routes (CORS-permissive), the
/// `/tunnel` control-channel upgrade, and the proxy fallback, all sharing
/// one `AppState`.
pub fn build_router(state: Arc<AppState>) -> Router {
  let admin_routes = Router::new()
    .route("/", get(admin::handle_index))
    .route("/status", get(admin::handle_status))
    .layer(CorsLayer::permissive());

  Router::new()
    .merge(admin_routes)
    .route("/tunnel", get(control::upgrade))
    .fallback(ingress::handle_proxied_request)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
