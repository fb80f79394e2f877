//! Cohort persistence and synchronization from the remote cohort API.

mod loader;
mod storage;

pub use self::loader::CohortLoader;
pub use self::storage::{CohortStorage, InMemoryCohortStorage, RedisCohortStorage};
