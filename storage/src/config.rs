use serde::Deserialize;
use std::time::Duration;

/// Which connection serves read traffic.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadAffinity {
    /// All reads go to the primary.
    Primary,
    /// Reads prefer the read-only endpoint (or cluster replicas), isolating
    /// evaluation-time read volume from write traffic.
    #[default]
    Replica,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RedisConfig {
    pub uri: String,
    /// Optional read-only endpoint, e.g. a replica behind its own address.
    /// Ignored in cluster mode, where replica reads are negotiated per node.
    pub read_uri: Option<String>,
    #[serde(default)]
    pub cluster: bool,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub read_affinity: ReadAffinity,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_prefix() -> String {
    "pennant".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_operation_timeout_secs() -> u64 {
    2
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
