// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Routing resolver: extract a public identifier (and, in path-based mode,
//! the forwarded path) from an inbound request.
//!
//! Grounded on `mockforge-tunnel`'s `extract_subdomain` host-matching
//! approach, generalized so a deployment picks one mode up front and fails
//! closed instead of sniffing both per request.

/// Which identifier extraction strategy a deployment uses. Chosen once via
/// configuration, not per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingMode {
  Host,
  Path,
}

/// The outcome of resolving one inbound request: either no tunnel applies
/// (fall back to admin routes) or a `public_id` plus the path that should
/// be forwarded to the tunnel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
  pub public_id: String,
  pub forwarded_path: String,
}

/// Host-based resolution: `host` is the raw `Host` header value (may carry
/// a `:port` suffix, stripped before comparison). `base_domain` is the
/// routing anchor. `request_path` is forwarded unchanged in this mode.
///
/// - `host == base_domain` → `None` (admin route).
/// - `host` ends with `.base_domain` → `Some` with everything before the
///   suffix as `public_id` (empty label → `None`).
/// - otherwise → `None`.
fn resolve_host(host: &str, base_domain: &str, request_path: &str) -> Option<Resolved> {
  let host = host.split(':').next().unwrap_or(host);
  if host.eq_ignore_ascii_case(base_domain) {
    return None;
  }
  let suffix = format!(".{base_domain}");
  let label = host.strip_suffix(suffix.as_str())?;
  if label.is_empty() {
    return None;
  }
  Some(Resolved {
    public_id: label.to_string(),
    forwarded_path: request_path.to_string(),
  })
}

/// Path-based legacy resolution: the identifier is the first non-empty
/// path segment; the forwarded path is everything after it (or `/` if
/// nothing remains).
fn resolve_path(request_path: &str) -> Option<Resolved> {
  let trimmed = request_path.trim_start_matches('/');
  let (first, rest) = match trimmed.split_once('/') {
    Some((first, rest)) => (first, rest),
    None => (trimmed, ""),
  };
  if first.is_empty() {
    return None;
  }
  let forwarded_path = if rest.is_empty() {
    "/".to_string()
  } else {
    format!("/{rest}")
  };
  Some(Resolved {
    public_id: first.to_string(),
    forwarded_path,
  })
}

/// Entry point used by the ingress dispatcher. `host` is `None` when the
/// request carries no `Host` header at all, which always fails closed to
/// "no tunnel" in host-based mode.
pub fn resolve_public_id(
  mode: RoutingMode,
  host: Option<&str>,
  base_domain: &str,
  request_path: &str,
) -> Option<Resolved> {
  match mode {
    RoutingMode::Host => resolve_host(host?, base_domain, request_path),
    RoutingMode::Path => resolve_path(request_path),
  }
}

/// `base_domain` values that disable host-based routing (empty, or the
/// literal `localhost`), used by configuration loading to pick a default
/// [`RoutingMode`] when none is given explicitly.
pub fn host_routing_disabled(base_domain: &str) -> bool {
  base_domain.is_empty() || base_domain.eq_ignore_ascii_case("localhost")
}
