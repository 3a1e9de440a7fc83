//! End-to-end exercise of the HTTP surface: a request enters through the
//! axum router built by `build_router`, is resolved to a tunnel, and is
//! answered by a task standing in for a connected client — the same
//! "plain channels instead of a real socket" trick `wormhole_core::session`
//! uses for its own tests, applied one layer up at the router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use clap::Parser;
use tower::ServiceExt;

use wormhole_core::headers::HeaderList;
use wormhole_core::pending::PendingTable;
use wormhole_core::registry::{InMemoryTunnelRegistry, TunnelRegistry};
use wormhole_core::session;
use wormhole_core::tunnel::OutboundMessage;
use wormhole_server::config::Config;
use wormhole_server::state::{AppState, Backend};

fn test_config(args: &[&str]) -> Config {
  let mut full = vec!["wormhole-server"];
  full.extend_from_slice(args);
  Config::parse_from(full)
}

async fn respond_to_next_request(mut outbound_rx: tokio::sync::mpsc::Receiver<OutboundMessage>, pending: Arc<PendingTable>, status: u16, body: &'static [u8]) {
  while let Some(message) = outbound_rx.recv().await {
    if let OutboundMessage::HttpRequest(frame) = message {
      pending
        .resolve(
          &frame.request_id,
          wormhole_core::frame::ResponseFrame {
            request_id: frame.request_id.clone(),
            status,
            headers: HeaderList::new(),
            body: body.to_vec(),
          },
        )
        .await;
      return;
    }
  }
}

#[tokio::test]
async fn proxied_request_round_trips_through_a_connected_tunnel() {
  let config = Arc::new(test_config(&["--base-domain", "example.com"]));
  let registry: Arc<dyn TunnelRegistry> = Arc::new(InMemoryTunnelRegistry::new());
  let pending = PendingTable::new();

  let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(8);
  let tunnel = session::admit(registry.as_ref(), outbound_tx, Some("mytunnel".into()))
    .await
    .unwrap();
  tunnel.notify_connected("http://mytunnel.example.com".into()).unwrap();
  // Drain the Connected ack the real control channel would consume first.
  let mut outbound_rx = outbound_rx;
  let _ = outbound_rx.recv().await;

  tokio::spawn(respond_to_next_request(outbound_rx, pending.clone(), 200, b"hello from tunnel"));

  let state = Arc::new(AppState {
    config,
    backend: Backend::Direct {
      registry,
      pending,
      broker: None,
    },
  });
  let app = wormhole_server::build_router(state);

  let request = Request::builder()
    .uri("/greet")
    .header("host", "mytunnel.example.com")
    .body(Body::empty())
    .unwrap();

  let response = tokio::time::timeout(Duration::from_secs(5), app.oneshot(request))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
  assert_eq!(&body[..], b"hello from tunnel");
}

#[tokio::test]
async fn unknown_public_id_returns_not_found() {
  let config = Arc::new(test_config(&["--base-domain", "example.com"]));
  let registry: Arc<dyn TunnelRegistry> = Arc::new(InMemoryTunnelRegistry::new());
  let pending = PendingTable::new();
  let state = Arc::new(AppState {
    config,
    backend: Backend::Direct { registry, pending, broker: None },
  });
  let app = wormhole_server::build_router(state);

  let request = Request::builder()
    .uri("/anything")
    .header("host", "ghost.example.com")
    .body(Body::empty())
    .unwrap();

  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected_before_reaching_a_tunnel() {
  let config = Arc::new(test_config(&["--base-domain", "example.com", "--max-body-bytes", "4"]));
  let registry: Arc<dyn TunnelRegistry> = Arc::new(InMemoryTunnelRegistry::new());
  let pending = PendingTable::new();
  let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::channel(8);
  session::admit(registry.as_ref(), outbound_tx, Some("mytunnel".into())).await.unwrap();

  let state = Arc::new(AppState {
    config,
    backend: Backend::Direct { registry, pending, broker: None },
  });
  let app = wormhole_server::build_router(state);

  let request = Request::builder()
    .uri("/upload")
    .header("host", "mytunnel.example.com")
    .body(Body::from("way too much body"))
    .unwrap();

  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn status_endpoint_reports_active_tunnel_count() {
  let config = Arc::new(test_config(&["--base-domain", "example.com"]));
  let registry: Arc<dyn TunnelRegistry> = Arc::new(InMemoryTunnelRegistry::new());
  let pending = PendingTable::new();
  let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::channel(8);
  session::admit(registry.as_ref(), outbound_tx, Some("mytunnel".into())).await.unwrap();

  let state = Arc::new(AppState {
    config,
    backend: Backend::Direct { registry, pending, broker: None },
  });
  let app = wormhole_server::build_router(state);

  let request = Request::builder()
    .uri("/status")
    .header("host", "example.com")
    .body(Body::empty())
    .unwrap();

  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
  let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
  assert_eq!(json["active_tunnels"], 1);
}
