use serde::Deserialize;
use std::fs::File;
use storage::RedisConfig;
use syncer::config::SyncConfig;
use syncer::types::Project;

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize)]
pub struct ApiConfig {
    pub server_url: String,
    pub cohort_server_url: String,
}

/// Storage backend, selected by the `type` tag.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Redis(RedisConfig),
}

#[derive(Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub api_key: String,
    pub secret_key: String,
    pub management_key: String,
}

impl ProjectConfig {
    pub fn to_project(&self) -> Project {
        Project {
            id: self.id.clone(),
            api_key: self.api_key.clone(),
            secret_key: self.secret_key.clone(),
            management_key: self.management_key.clone(),
        }
    }
}

#[derive(Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use storage::ReadAffinity;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn memory_storage_config() {
        let yaml = r#"
            api:
                server_url: https://api.example.com
                cohort_server_url: https://cohorts.example.com
            storage:
                type: memory
            projects:
                - id: p1
                  api_key: ak
                  secret_key: sk
                  management_key: mk
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].to_project().id, "p1");
        // Sync intervals fall back to their defaults.
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn redis_storage_config_with_defaults() {
        let yaml = r#"
            api:
                server_url: https://api.example.com
                cohort_server_url: https://cohorts.example.com
            storage:
                type: redis
                uri: redis://primary:6379
                read_uri: redis://replica:6379
            sync:
                flag_sync_interval_secs: 30
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        let StorageConfig::Redis(redis) = config.storage else {
            panic!("expected redis storage");
        };
        assert_eq!(redis.uri, "redis://primary:6379");
        assert_eq!(redis.read_uri.as_deref(), Some("redis://replica:6379"));
        assert!(!redis.cluster);
        assert_eq!(redis.prefix, "pennant");
        assert_eq!(redis.read_affinity, ReadAffinity::Replica);
        assert_eq!(config.sync.flag_sync_interval_secs, 30);
        assert_eq!(config.sync.cohort_sync_interval_secs, 60);
    }

    #[test]
    fn optional_sections_can_be_present() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            api:
                server_url: https://api.example.com
                cohort_server_url: https://cohorts.example.com
            storage:
                type: memory
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.metrics.expect("metrics").statsd_port, 8125);
        assert!(config.logging.is_some());
        assert!(config.projects.is_empty());
    }
}
