//! Distributed storage abstraction over Redis.
//!
//! Supports a single-node store (multiplexed connection, optional read-only
//! replica endpoint) and a cluster store (read-affinity aware), unified
//! behind one [`RedisStore`] API, plus a TTL-based distributed lock.

pub mod config;
pub mod error;
pub mod keys;
pub mod lock;
pub mod redis;

pub use self::config::{ReadAffinity, RedisConfig};
pub use self::error::{Result, StorageError};
pub use self::keys::KeySchema;
pub use self::lock::DistributedLock;
pub use self::redis::RedisStore;
