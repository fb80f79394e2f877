use serde::Deserialize;
use std::time::Duration;

/// Intervals and limits for the synchronization loops.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_flag_sync_interval_secs")]
    pub flag_sync_interval_secs: u64,
    #[serde(default = "default_cohort_sync_interval_secs")]
    pub cohort_sync_interval_secs: u64,
    #[serde(default = "default_deployment_sync_interval_secs")]
    pub deployment_sync_interval_secs: u64,
    /// Cohorts larger than this are not downloaded.
    #[serde(default = "default_max_cohort_size")]
    pub max_cohort_size: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

fn default_flag_sync_interval_secs() -> u64 {
    10
}

fn default_cohort_sync_interval_secs() -> u64 {
    60
}

fn default_deployment_sync_interval_secs() -> u64 {
    60
}

fn default_max_cohort_size() -> u64 {
    i32::MAX as u64
}

fn default_dedup_capacity() -> usize {
    1 << 20
}

fn default_dedup_ttl_secs() -> u64 {
    86_400
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            flag_sync_interval_secs: default_flag_sync_interval_secs(),
            cohort_sync_interval_secs: default_cohort_sync_interval_secs(),
            deployment_sync_interval_secs: default_deployment_sync_interval_secs(),
            max_cohort_size: default_max_cohort_size(),
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

impl SyncConfig {
    pub fn flag_sync_interval(&self) -> Duration {
        Duration::from_secs(self.flag_sync_interval_secs)
    }

    pub fn cohort_sync_interval(&self) -> Duration {
        Duration::from_secs(self.cohort_sync_interval_secs)
    }

    pub fn deployment_sync_interval(&self) -> Duration {
        Duration::from_secs(self.deployment_sync_interval_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}
