// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Configuration: CLI flags via `clap`, with a `WH_`-prefixed environment
//! variable overlay mirroring the `env_prefix="WH_"` semantics of the
//! original `pydantic_settings.BaseSettings` draft, without pulling in a
//! Python-specific settings framework.
//!
//! Precedence: CLI flag > environment variable > default. `clap`'s `env`
//! feature gives us this directly per field — no manual overlay pass is
//! needed beyond naming each flag's environment variable.

use std::time::Duration;

use clap::Parser;
use wormhole_core::routing::{host_routing_disabled, RoutingMode};

#[derive(Parser, Debug, Clone)]
#[command(name = "wormhole-server", about = "HTTP reverse-tunnel server")]
pub struct Config {
  /// Bind address for the ingress listener.
  #[arg(long, env = "WH_HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// Bind port for the ingress listener.
  #[arg(long, env = "WH_PORT", default_value_t = 8080)]
  pub port: u16,

  /// Routing anchor. Empty or `localhost` disables host-based routing.
  #[arg(long, env = "WH_BASE_DOMAIN", default_value = "localhost")]
  pub base_domain: String,

  /// Force a routing mode instead of deriving it from `base_domain`.
  #[arg(long, env = "WH_ROUTING_MODE", value_enum)]
  pub routing_mode: Option<RoutingModeArg>,

  /// Per proxied request timeout, in seconds (>= 1).
  #[arg(long, env = "WH_REQUEST_TIMEOUT", default_value_t = 30)]
  pub request_timeout: u64,

  /// Control-channel heartbeat interval, in seconds (>= 10).
  #[arg(long, env = "WH_HEARTBEAT_INTERVAL", default_value_t = 30)]
  pub heartbeat_interval: u64,

  /// NATS URL. When present, enables split-shape transport; otherwise the
  /// server runs monolithic.
  #[arg(long, env = "WH_BROKER_URL")]
  pub broker_url: Option<String>,

  /// This process's role in the split shape, when `broker_url` is set.
  /// `tunnel-owner` hosts `/tunnel` control-channel connections and serves
  /// them over the broker; `ingress-only` resolves and forwards requests
  /// through the broker without ever hosting a tunnel itself. Ignored when
  /// `broker_url` is unset.
  #[arg(long, env = "WH_BROKER_ROLE", value_enum, default_value = "tunnel-owner")]
  pub broker_role: BrokerRoleArg,

  /// `tracing`/`RUST_LOG`-compatible filter directive.
  #[arg(long, env = "WH_LOG_LEVEL", default_value = "info")]
  pub log_level: String,

  /// Bound on the per-tunnel outbound writer queue.
  #[arg(long, env = "WH_OUTBOUND_QUEUE_DEPTH", default_value_t = 256)]
  pub outbound_queue_depth: usize,

  /// Bound on a proxied request body, in bytes.
  #[arg(long, env = "WH_MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
  pub max_body_bytes: usize,

  /// Seconds to wait for in-flight requests to settle during shutdown
  /// before forcing tunnels closed.
  #[arg(long, env = "WH_TERMINATION_GRACE_PERIOD", default_value_t = 10)]
  pub termination_grace_period: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingModeArg {
  Host,
  Path,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerRoleArg {
  TunnelOwner,
  IngressOnly,
}

impl Config {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout)
  }

  pub fn heartbeat_interval(&self) -> Duration {
    Duration::from_secs(self.heartbeat_interval)
  }

  pub fn termination_grace_period(&self) -> Duration {
    Duration::from_secs(self.termination_grace_period)
  }

  /// Resolves the effective routing mode: an explicit `routing_mode`
  /// override wins; otherwise `base_domain` decides.
  pub fn routing_mode(&self) -> RoutingMode {
    match self.routing_mode {
      Some(RoutingModeArg::Host) => RoutingMode::Host,
      Some(RoutingModeArg::Path) => RoutingMode::Path,
      None if host_routing_disabled(&self.base_domain) => RoutingMode::Path,
      None => RoutingMode::Host,
    }
  }

  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  pub fn public_url_for(&self, public_id: &str) -> String {
    match self.routing_mode() {
      RoutingMode::Host => format!("http://{public_id}.{base}", base = self.base_domain),
      RoutingMode::Path => format!("http://{base}/{public_id}", base = self.base_domain),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn routing_mode_defaults_to_path_for_localhost() {
    let config = Config::parse_from(["wormhole-server"]);
    assert_eq!(config.routing_mode(), RoutingMode::Path);
  }

  #[test]
  fn routing_mode_defaults_to_host_for_real_domain() {
    let config = Config::parse_from(["wormhole-server", "--base-domain", "example.com"]);
    assert_eq!(config.routing_mode(), RoutingMode::Host);
  }

  #[test]
  fn explicit_routing_mode_overrides_base_domain_inference() {
    let config = Config::parse_from([
      "wormhole-server",
      "--base-domain",
      "example.com",
      "--routing-mode",
      "path",
    ]);
    assert_eq!(config.routing_mode(), RoutingMode::Path);
  }

  #[test]
  fn broker_role_defaults_to_tunnel_owner() {
    let config = Config::parse_from(["wormhole-server"]);
    assert_eq!(config.broker_role, BrokerRoleArg::TunnelOwner);
  }
}
