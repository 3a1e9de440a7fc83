// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Pending-request table: `request_id → one-shot completion slot`, modeled
//! as a oneshot sink plus deadline rather than a general future. Grounded
//! on `modular.rs`'s oneshot-based suspend/resume discipline for its
//! request dispatch path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};

use crate::frame::ResponseFrame;
use crate::tunnel::TunnelId;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
  #[error("no response arrived before the request deadline")]
  Timeout,
  #[error("the tunnel was closed before a response arrived")]
  TunnelGone,
  #[error("the ingress caller disconnected before a response arrived")]
  Cancelled,
  #[error("the reply failed frame validation")]
  MalformedReply,
}

type Outcome = Result<ResponseFrame, PendingError>;

struct Entry {
  tunnel_id: TunnelId,
  sender: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct State {
  slots: HashMap<String, Entry>,
  by_tunnel: HashMap<TunnelId, HashSet<String>>,
}

/// A concurrent map from `request_id` to a completion slot. Every public
/// method is a single atomic operation against the shared lock; the only
/// cross-method invariant callers must hold themselves is "call
/// `register` before awaiting the slot," which the type system already
/// enforces by handing back the receiver from `register`.
pub struct PendingTable {
  state: Mutex<State>,
}

impl PendingTable {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(State::default()),
    })
  }

  /// Allocates a slot and schedules a timeout task that resolves it with
  /// [`PendingError::Timeout`] if nothing else resolves it first.
  pub async fn register(
    self: &Arc<Self>,
    request_id: String,
    tunnel_id: TunnelId,
    deadline: Instant,
  ) -> oneshot::Receiver<Outcome> {
    let (tx, rx) = oneshot::channel();
    {
      let mut state = self.state.lock().await;
      state.slots.insert(
        request_id.clone(),
        Entry {
          tunnel_id,
          sender: tx,
        },
      );
      state.by_tunnel.entry(tunnel_id).or_default().insert(request_id.clone());
    }

    let table = Arc::clone(self);
    let timeout_id = request_id;
    tokio::spawn(async move {
      let now = Instant::now();
      if deadline > now {
        tokio::time::sleep(deadline - now).await;
      }
      table.resolve_error(&timeout_id, PendingError::Timeout).await;
    });

    rx
  }

  /// Idempotent: only the first resolution for a given `request_id` has
  /// any effect. The slot is removed from every index before the oneshot
  /// send wakes the awaiter, so late duplicates are dropped silently.
  pub async fn resolve(&self, request_id: &str, frame: ResponseFrame) -> bool {
    self.complete(request_id, Ok(frame)).await
  }

  pub async fn cancel(&self, request_id: &str) -> bool {
    self.complete(request_id, Err(PendingError::Cancelled)).await
  }

  /// Resolves a single slot with an arbitrary terminal error, e.g. a
  /// [`PendingError::MalformedReply`] raised by the caller after decoding a
  /// reply that failed frame validation.
  pub async fn resolve_with(&self, request_id: &str, err: PendingError) -> bool {
    self.resolve_error(request_id, err).await
  }

  async fn resolve_error(&self, request_id: &str, err: PendingError) -> bool {
    self.complete(request_id, Err(err)).await
  }

  async fn complete(&self, request_id: &str, outcome: Outcome) -> bool {
    let entry = {
      let mut state = self.state.lock().await;
      let entry = state.slots.remove(request_id);
      if let Some(entry) = &entry {
        if let Some(set) = state.by_tunnel.get_mut(&entry.tunnel_id) {
          set.remove(request_id);
          if set.is_empty() {
            state.by_tunnel.remove(&entry.tunnel_id);
          }
        }
      }
      entry
    };
    match entry {
      Some(entry) => {
        // Send failure means the receiver was already dropped (caller
        // disconnected); there's nothing further to do either way.
        let _ = entry.sender.send(outcome);
        true
      }
      None => false,
    }
  }

  /// Resolves every slot registered against `tunnel_id` with `err`. No
  /// pending request may outlive the tunnel it was registered against.
  pub async fn drain(&self, tunnel_id: TunnelId, err: PendingError) {
    let request_ids: Vec<String> = {
      let mut state = self.state.lock().await;
      state
        .by_tunnel
        .remove(&tunnel_id)
        .map(|set| set.into_iter().collect())
        .unwrap_or_default()
    };
    for request_id in request_ids {
      self.resolve_error(&request_id, err.clone()).await;
    }
  }

  pub async fn len(&self) -> usize {
    self.state.lock().await.slots.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }
}

/// Convenience for callers computing an absolute deadline from a relative
/// timeout: `now + request_timeout`.
pub fn deadline_from_now(timeout: Duration) -> Instant {
  Instant::now() + timeout
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::headers::HeaderList;

  fn sample_response(request_id: &str) -> ResponseFrame {
    ResponseFrame {
      request_id: request_id.to_string(),
      status: 200,
      headers: HeaderList::new(),
      body: b"hi".to_vec(),
    }
  }

  #[tokio::test]
  async fn resolve_delivers_matching_response() {
    let table = PendingTable::new();
    let tunnel_id = TunnelId::new_v4();
    let rx = table
      .register("r1".into(), tunnel_id, deadline_from_now(Duration::from_secs(5)))
      .await;
    assert!(table.resolve("r1", sample_response("r1")).await);
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.unwrap().request_id, "r1");
    assert!(table.is_empty().await);
  }

  #[tokio::test]
  async fn duplicate_resolution_is_idempotent() {
    let table = PendingTable::new();
    let tunnel_id = TunnelId::new_v4();
    let rx = table
      .register("r1".into(), tunnel_id, deadline_from_now(Duration::from_secs(5)))
      .await;
    assert!(table.resolve("r1", sample_response("r1")).await);
    assert!(!table.resolve("r1", sample_response("r1")).await);
    assert!(table.is_empty().await);
    rx.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn unknown_request_id_resolution_is_a_no_op() {
    let table = PendingTable::new();
    assert!(!table.resolve("ghost", sample_response("ghost")).await);
  }

  #[tokio::test]
  async fn drain_resolves_only_requests_for_that_tunnel() {
    let table = PendingTable::new();
    let t1 = TunnelId::new_v4();
    let t2 = TunnelId::new_v4();
    let rx1 = table
      .register("r1".into(), t1, deadline_from_now(Duration::from_secs(5)))
      .await;
    let rx2 = table
      .register("r2".into(), t2, deadline_from_now(Duration::from_secs(5)))
      .await;

    table.drain(t1, PendingError::TunnelGone).await;

    assert_eq!(rx1.await.unwrap().unwrap_err(), PendingError::TunnelGone);
    assert_eq!(table.len().await, 1);
    table.cancel("r2").await;
    assert_eq!(rx2.await.unwrap().unwrap_err(), PendingError::Cancelled);
  }

  #[tokio::test]
  async fn timeout_fires_when_nothing_else_resolves() {
    let table = PendingTable::new();
    let tunnel_id = TunnelId::new_v4();
    let rx = table
      .register("r1".into(), tunnel_id, deadline_from_now(Duration::from_millis(20)))
      .await;
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.unwrap_err(), PendingError::Timeout);
    assert!(table.is_empty().await);
  }

  #[tokio::test]
  async fn resolve_with_delivers_the_given_error() {
    let table = PendingTable::new();
    let tunnel_id = TunnelId::new_v4();
    let rx = table
      .register("r1".into(), tunnel_id, deadline_from_now(Duration::from_secs(5)))
      .await;
    assert!(table.resolve_with("r1", PendingError::MalformedReply).await);
    assert_eq!(rx.await.unwrap().unwrap_err(), PendingError::MalformedReply);
  }
}
