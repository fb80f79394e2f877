//! Deployment persistence, flag synchronization and the per-deployment
//! refresh loop.

mod loader;
mod runner;
mod storage;

pub use self::loader::DeploymentLoader;
pub use self::runner::DeploymentRunner;
pub use self::storage::{DeploymentStorage, InMemoryDeploymentStorage, RedisDeploymentStorage};
