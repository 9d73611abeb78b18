//! # bastion-core
//!
//! The distributed resilience layer for multi-process agent services.
//! Provides crash-safe cross-process locking, a dual-backend storage
//! abstraction that tolerates one backend being down, and cache-aside
//! utilities (session binding, sliding-window rate limiting, metadata
//! caching) that degrade to local fallbacks when the shared cache is
//! unreachable.

pub mod cache;
#[path = "cache_memory.rs"]
pub mod cache_memory;
#[cfg(feature = "redis")]
#[path = "cache_redis.rs"]
pub mod cache_redis;
pub mod client;
pub mod config;
pub mod dual_write;
pub mod error;
pub mod gateway;
pub mod infrastructure;
#[path = "infrastructure_file.rs"]
pub mod infrastructure_file;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod lock;
pub mod metadata;
pub mod rate_limit;
pub mod session;
pub mod time;
pub mod types;

#[cfg(test)]
mod dual_write_test;
#[cfg(test)]
mod gateway_test;
#[cfg(test)]
#[path = "infrastructure_test.rs"]
mod infrastructure_test;
#[cfg(test)]
mod degradation_test;
