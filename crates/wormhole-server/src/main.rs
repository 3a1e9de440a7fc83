// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Entry point: parses configuration, wires the deployment-shape backend,
//! and serves the admin, control-channel, and proxy routes on one listener.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use wormhole_server::config::Config;
use wormhole_server::{build_app_state, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = Config::parse();
  init_tracing(&config.log_level);

  let state = Arc::new(build_app_state(&config).await?);
  let config = state.config.clone();
  let app = build_router(state);

  let addr: std::net::SocketAddr = config.bind_addr().parse()?;
  tracing::info!(%addr, routing_mode = ?config.routing_mode(), "wormhole-server listening");

  let grace_period = config.termination_grace_period();
  axum::Server::bind(&addr)
    .serve(app.into_make_service())
    .with_graceful_shutdown(shutdown_signal(grace_period))
    .await?;

  tracing::info!("wormhole-server stopped");
  Ok(())
}

fn init_tracing(log_level: &str) {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Waits for a shutdown signal, then gives in-flight proxied requests up to
/// `grace_period` to settle before returning and letting axum force-close
/// whatever remains.
async fn shutdown_signal(grace_period: Duration) {
  let ctrl_c = async {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("failed to install SIGTERM handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }

  tracing::info!(?grace_period, "shutdown signal received, draining");
  tokio::time::sleep(grace_period).await;
}
