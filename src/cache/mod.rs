//! Tiered cache: a shared Redis store when configured, a process-local
//! store otherwise, behind one [`CacheCoordinator`].

pub mod backend;
pub mod coordinator;
pub mod invalidation;
pub mod keys;
pub mod memory;
pub mod remote;

pub use backend::CacheBackend;
pub use coordinator::CacheCoordinator;
pub use invalidation::{EntityType, Purge};
pub use keys::{ttl, KeyPrefix};
