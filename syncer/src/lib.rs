//! Synchronization & caching engine.
//!
//! Keeps three kinds of remote experimentation state — deployments, flag
//! configurations and cohorts — reconciled into local or distributed
//! storage, so evaluation can be served from the cache instead of calling
//! the remote backend per request.

pub mod cache;
pub mod cohort;
pub mod config;
pub mod dedup;
pub mod deployment;
pub mod error;
pub mod metrics_defs;
pub mod project;
pub mod remote;
pub mod retry;
pub mod singleflight;
pub mod types;

#[cfg(test)]
pub(crate) mod testutils;

pub use error::{Result, SyncError};
