/// Distributed routing core: connection pools, host selection, shard
/// partitioning, and replica failover.
pub mod pool;
pub mod replica;
pub mod router;
pub mod shard;

pub use pool::{ConnectionPool, PoisonPredicate};
pub use replica::ReplicaSet;
pub use router::ResourceRouter;
pub use shard::ShardIndex;

/// Opaque host identifier (`address[:port]`), compared by string equality.
pub type Host = String;
