// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Request-routing and correlation fabric for the wormhole reverse-tunnel
//! service: the tunnel registry, the pending-request table, the per-tunnel
//! session state machine, and the transport abstraction that binds them
//! together. HTTP ingress wiring, CLI, and process glue live in the
//! `wormhole-server` binary crate.

pub mod frame;
pub mod headers;
pub mod pending;
pub mod registry;
pub mod routing;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use frame::{RequestFrame, ResponseFrame};
pub use headers::HeaderList;
pub use pending::{PendingError, PendingTable};
pub use registry::{InMemoryTunnelRegistry, RegistryError, TunnelRegistry};
pub use routing::{resolve_public_id, RoutingMode};
pub use transport::{CallError, TunnelTransport};
pub use tunnel::{Tunnel, TunnelId, TunnelInfo, TunnelState};
