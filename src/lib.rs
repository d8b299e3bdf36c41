//! Business trust scoring and tiered cache coordination.
//!
//! - [`trust`]: pure Trust Score engine and badge tiers
//! - [`cache`]: key policy, backends, and the [`cache::CacheCoordinator`]
//! - [`web`]: JSON API that scores through the cache and runs invalidation

pub mod cache;
pub mod config;
pub mod metrics;
pub mod trust;
pub mod web;
