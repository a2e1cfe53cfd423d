/// Faro - distributed resource-routing core for clustered search backends
///
/// Faro orchestrates JSON-over-HTTP requests across a cluster without
/// implementing HTTP itself: the single-host transport is injected behind
/// the `Connection`/`Connector` traits, and faro layers on top of it
/// per-host pools of reusable connections with failure marks, load-priority
/// host selection with randomized tie-breaking, cooperative staged broadcast
/// with at-least-once resend semantics, shard-key partitioning with minimal
/// covering-set multicast, and ordered-replica write failover with a retry
/// budget.
pub mod config;
pub mod error;
pub mod route;
pub mod transport;

pub use crate::config::Config;
pub use crate::error::{Error, Result, TransportError};
pub use crate::route::{
    ConnectionPool, Host, PoisonPredicate, ReplicaSet, ResourceRouter, ShardIndex,
};
pub use crate::transport::{Connection, Connector, Method, Params, Response, AGENT};

#[cfg(test)]
pub(crate) mod testing;
