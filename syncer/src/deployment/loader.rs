use crate::cohort::CohortLoader;
use crate::deployment::DeploymentStorage;
use crate::error::{Result, SyncError};
use crate::remote::FlagApi;
use crate::singleflight::SingleFlight;
use crate::types::referenced_cohort_ids;
use std::collections::HashSet;
use std::sync::Arc;

/// Fetches a deployment's flag configurations and persists them, loading
/// any referenced cohorts first so flags never become visible before the
/// cohort data they depend on.
#[derive(Clone)]
pub struct DeploymentLoader {
    inner: Arc<DeploymentLoaderInner>,
}

struct DeploymentLoaderInner {
    flag_api: Arc<dyn FlagApi>,
    cohort_loader: CohortLoader,
    storage: Arc<dyn DeploymentStorage>,
    jobs: SingleFlight<()>,
}

impl DeploymentLoader {
    pub fn new(
        flag_api: Arc<dyn FlagApi>,
        cohort_loader: CohortLoader,
        storage: Arc<dyn DeploymentStorage>,
    ) -> Self {
        DeploymentLoader {
            inner: Arc::new(DeploymentLoaderInner {
                flag_api,
                cohort_loader,
                storage,
                jobs: SingleFlight::new(),
            }),
        }
    }

    /// Refresh one deployment. Concurrent calls for the same key share a
    /// single load; a failure leaves previously stored flags untouched.
    pub async fn load_deployment(&self, deployment_key: &str) -> Result<()> {
        self.inner
            .jobs
            .run(deployment_key, self.load(deployment_key))
            .await
            .map_err(SyncError::Shared)
    }

    async fn load(&self, deployment_key: &str) -> Result<()> {
        let flags = self.inner.flag_api.get_flag_configs(deployment_key).await?;

        let cohort_ids = referenced_cohort_ids(&flags);
        if !cohort_ids.is_empty() {
            self.inner.cohort_loader.load_cohorts(&cohort_ids).await?;
        }

        self.inner.storage.put_flags(deployment_key, &flags).await?;

        // Drop flags that no longer exist upstream.
        let fresh: HashSet<&str> = flags.iter().filter_map(|flag| flag.key()).collect();
        let stored = self.inner.storage.get_all_flags(deployment_key).await?;
        for stale in stored.keys().filter(|key| !fresh.contains(key.as_str())) {
            self.inner.storage.remove_flag(deployment_key, stale).await?;
        }

        tracing::debug!(
            deployment = deployment_key,
            flags = flags.len(),
            cohorts = cohort_ids.len(),
            "synchronized deployment"
        );
        Ok(())
    }
}
