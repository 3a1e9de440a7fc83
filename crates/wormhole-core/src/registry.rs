// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Tunnel registry: a shared, concurrently-mutated directory of live
//! tunnels keyed by `public_id`.
//!
//! Grounded on `snocat::common::protocol::traits::{TunnelRegistry,
//! InMemoryTunnelRegistry}`: a trait-object interface (`BoxFuture`-returning
//! methods so it can be held as `Arc<dyn TunnelRegistry + Send + Sync>`)
//! backed by a single async mutex over a map. There, tunnels are keyed by
//! `TunnelId` with naming layered on top; here the externally-visible
//! `public_id` is the primary key and collisions are refused outright
//! rather than replaced — the server never evicts an active tunnel in
//! favor of a newcomer.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;

use crate::tunnel::{Tunnel, TunnelId, TunnelInfo};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  #[error("public id was already bound to an active tunnel")]
  AlreadyBound,
}

/// A trait so the ingress dispatcher and session driver depend only on the
/// interface, never a concrete map type.
pub trait TunnelRegistry: Send + Sync {
  fn insert(&self, public_id: String, tunnel: Arc<Tunnel>) -> BoxFuture<'_, Result<(), RegistryError>>;
  fn lookup(&self, public_id: &str) -> BoxFuture<'_, Option<Arc<Tunnel>>>;
  /// Removes the entry only if it still points at `expected_tunnel_id`,
  /// preventing ABA removal when a client reconnects to the same label
  /// between this tunnel's drain and the removal call actually running.
  fn remove(&self, public_id: &str, expected_tunnel_id: TunnelId) -> BoxFuture<'_, bool>;
  fn snapshot(&self) -> BoxFuture<'_, Vec<TunnelInfo>>;
}

impl<T> TunnelRegistry for Arc<T>
where
  T: TunnelRegistry + ?Sized,
{
  fn insert(&self, public_id: String, tunnel: Arc<Tunnel>) -> BoxFuture<'_, Result<(), RegistryError>> {
    self.as_ref().insert(public_id, tunnel)
  }

  fn lookup(&self, public_id: &str) -> BoxFuture<'_, Option<Arc<Tunnel>>> {
    self.as_ref().lookup(public_id)
  }

  fn remove(&self, public_id: &str, expected_tunnel_id: TunnelId) -> BoxFuture<'_, bool> {
    self.as_ref().remove(public_id, expected_tunnel_id)
  }

  fn snapshot(&self) -> BoxFuture<'_, Vec<TunnelInfo>> {
    self.as_ref().snapshot()
  }
}

pub struct InMemoryTunnelRegistry {
  tunnels: Mutex<HashMap<String, Arc<Tunnel>>>,
}

impl InMemoryTunnelRegistry {
  pub fn new() -> Self {
    Self {
      tunnels: Mutex::new(HashMap::new()),
    }
  }
}

impl Default for InMemoryTunnelRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl TunnelRegistry for InMemoryTunnelRegistry {
  fn insert(&self, public_id: String, tunnel: Arc<Tunnel>) -> BoxFuture<'_, Result<(), RegistryError>> {
    async move {
      let mut tunnels = self.tunnels.lock().await;
      if tunnels.contains_key(&public_id) {
        return Err(RegistryError::AlreadyBound);
      }
      assert!(
        tunnels.insert(public_id, tunnel).is_none(),
        "public_id overlap despite locked map where contains_key returned false"
      );
      Ok(())
    }
    .boxed()
  }

  fn lookup(&self, public_id: &str) -> BoxFuture<'_, Option<Arc<Tunnel>>> {
    let public_id = public_id.to_string();
    async move {
      let tunnels = self.tunnels.lock().await;
      tunnels.get(&public_id).cloned()
    }
    .boxed()
  }

  fn remove(&self, public_id: &str, expected_tunnel_id: TunnelId) -> BoxFuture<'_, bool> {
    let public_id = public_id.to_string();
    async move {
      let mut tunnels = self.tunnels.lock().await;
      match tunnels.get(&public_id) {
        Some(tunnel) if tunnel.tunnel_id == expected_tunnel_id => {
          tunnels.remove(&public_id);
          true
        }
        _ => false,
      }
    }
    .boxed()
  }

  fn snapshot(&self) -> BoxFuture<'_, Vec<TunnelInfo>> {
    async move {
      let tunnels = self.tunnels.lock().await;
      tunnels.values().map(|t| t.info()).collect()
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::mpsc;

  fn make_tunnel(public_id: &str) -> Arc<Tunnel> {
    let (tx, _rx) = mpsc::channel(8);
    Tunnel::new(TunnelId::new_v4(), public_id.to_string(), tx)
  }

  #[tokio::test]
  async fn insert_refuses_duplicate_public_id() {
    let registry = InMemoryTunnelRegistry::new();
    registry
      .insert("abc123xy".into(), make_tunnel("abc123xy"))
      .await
      .unwrap();
    let err = registry
      .insert("abc123xy".into(), make_tunnel("abc123xy"))
      .await
      .unwrap_err();
    assert_eq!(err, RegistryError::AlreadyBound);
  }

  #[tokio::test]
  async fn remove_refuses_aba_mismatch() {
    let registry = InMemoryTunnelRegistry::new();
    let first = make_tunnel("abc123xy");
    registry.insert("abc123xy".into(), first.clone()).await.unwrap();

    // A stale caller still holding the first tunnel_id must not be able to
    // remove a second tunnel that reused the same public_id after the
    // first was already gone and re-registered.
    let stale_id = TunnelId::new_v4();
    assert!(!registry.remove("abc123xy", stale_id).await);
    assert!(registry.lookup("abc123xy").await.is_some());

    assert!(registry.remove("abc123xy", first.tunnel_id).await);
    assert!(registry.lookup("abc123xy").await.is_none());
  }

  #[tokio::test]
  async fn snapshot_reflects_live_tunnels() {
    let registry = InMemoryTunnelRegistry::new();
    registry.insert("a".into(), make_tunnel("a")).await.unwrap();
    registry.insert("b".into(), make_tunnel("b")).await.unwrap();
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.len(), 2);
  }
}
