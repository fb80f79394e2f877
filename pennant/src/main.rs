mod config;

use clap::Parser;
use config::{Config, StorageConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{DistributedLock, RedisStore};
use syncer::cohort::{CohortLoader, CohortStorage, InMemoryCohortStorage, RedisCohortStorage};
use syncer::deployment::{
    DeploymentLoader, DeploymentStorage, InMemoryDeploymentStorage, RedisDeploymentStorage,
};
use syncer::project::ProjectRunner;
use syncer::remote::{HttpCohortApi, HttpFlagApi, HttpManagementApi};
use tracing_subscriber::EnvFilter;

const RECONCILE_LOCK_TTL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "pennant", about = "Feature flag synchronization proxy")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "pennant.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _sentry_guard = config
        .logging
        .as_ref()
        .map(|logging| sentry::init(logging.sentry_dsn.clone()));

    if let Some(metrics_config) = &config.metrics {
        let recorder = StatsdBuilder::from(&metrics_config.statsd_host, metrics_config.statsd_port)
            .build(Some("pennant"))?;
        if let Err(err) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %err, "failed to install the metrics recorder");
        } else {
            shared::metrics_defs::describe_all(syncer::metrics_defs::ALL_METRICS);
        }
    }

    let redis_store = match &config.storage {
        StorageConfig::Redis(redis_config) => Some(RedisStore::connect(redis_config).await?),
        StorageConfig::Memory => None,
    };

    let http_client = reqwest::Client::new();
    let mut runners = Vec::new();

    for project_config in &config.projects {
        let project = project_config.to_project();

        let (deployment_storage, cohort_storage, reconcile_lock): (
            Arc<dyn DeploymentStorage>,
            Arc<dyn CohortStorage>,
            Option<DistributedLock>,
        ) = match &redis_store {
            Some(store) => (
                Arc::new(RedisDeploymentStorage::new(store.clone(), project.id.clone())),
                Arc::new(RedisCohortStorage::new(store.clone(), project.id.clone())),
                Some(DistributedLock::new(
                    store.clone(),
                    &ProjectRunner::reconcile_lock_name(&project.id),
                    RECONCILE_LOCK_TTL,
                )),
            ),
            None => (
                Arc::new(InMemoryDeploymentStorage::new()),
                Arc::new(InMemoryCohortStorage::new()),
                None,
            ),
        };

        let management_api = HttpManagementApi::new(
            http_client.clone(),
            &config.api.server_url,
            project.management_key.clone(),
        )?;
        let flag_api = HttpFlagApi::new(http_client.clone(), &config.api.server_url)?;
        let cohort_api = HttpCohortApi::new(
            http_client.clone(),
            &config.api.cohort_server_url,
            project.api_key.clone(),
            project.secret_key.clone(),
        )?;

        let cohort_loader = CohortLoader::new(
            Arc::new(cohort_api),
            Arc::clone(&cohort_storage),
            config.sync.max_cohort_size,
        );
        let deployment_loader = DeploymentLoader::new(
            Arc::new(flag_api),
            cohort_loader.clone(),
            Arc::clone(&deployment_storage),
        );

        let runner = ProjectRunner::new(
            project.clone(),
            Arc::new(management_api),
            deployment_loader,
            cohort_loader,
            deployment_storage,
            cohort_storage,
            config.sync.clone(),
            reconcile_lock,
        );
        runner.start().await?;
        tracing::info!(project = %project.id, "synchronizing project");
        runners.push(runner);
    }

    if runners.is_empty() {
        tracing::warn!("no projects configured, nothing to synchronize");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    for runner in &runners {
        runner.stop().await;
    }
    Ok(())
}
