//! Project-level reconciliation: converge the set of live deployments
//! against the remote management API and garbage-collect cohorts no longer
//! referenced by any stored flag.

use crate::cohort::{CohortLoader, CohortStorage};
use crate::config::SyncConfig;
use crate::deployment::{DeploymentLoader, DeploymentRunner, DeploymentStorage};
use crate::error::Result;
use crate::metrics_defs::RECONCILE_FAILURES;
use crate::remote::ManagementApi;
use crate::types::{Deployment, Project, referenced_cohort_ids};
use shared::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use storage::DistributedLock;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};

enum LoopState {
    Stopped,
    Running {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
}

/// Reconciles one project: refresh on start, then periodically.
#[derive(Clone)]
pub struct ProjectRunner {
    inner: Arc<ProjectInner>,
}

struct ProjectInner {
    project: Project,
    management_api: Arc<dyn ManagementApi>,
    deployment_loader: DeploymentLoader,
    cohort_loader: CohortLoader,
    deployment_storage: Arc<dyn DeploymentStorage>,
    cohort_storage: Arc<dyn CohortStorage>,
    config: SyncConfig,
    runners: Mutex<HashMap<String, DeploymentRunner>>,
    refresh_lock: Mutex<()>,
    /// Cross-replica exclusion, present when running on distributed
    /// storage. Advisory: losing the race skips the cycle, and writes stay
    /// idempotent either way.
    reconcile_lock: Option<Mutex<DistributedLock>>,
    state: Mutex<LoopState>,
}

impl ProjectRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: Project,
        management_api: Arc<dyn ManagementApi>,
        deployment_loader: DeploymentLoader,
        cohort_loader: CohortLoader,
        deployment_storage: Arc<dyn DeploymentStorage>,
        cohort_storage: Arc<dyn CohortStorage>,
        config: SyncConfig,
        reconcile_lock: Option<DistributedLock>,
    ) -> Self {
        ProjectRunner {
            inner: Arc::new(ProjectInner {
                project,
                management_api,
                deployment_loader,
                cohort_loader,
                deployment_storage,
                cohort_storage,
                config,
                runners: Mutex::new(HashMap::new()),
                refresh_lock: Mutex::new(()),
                reconcile_lock: reconcile_lock.map(Mutex::new),
                state: Mutex::new(LoopState::Stopped),
            }),
        }
    }

    /// The distributed lock name guarding this project's reconciliation.
    pub fn reconcile_lock_name(project_id: &str) -> String {
        format!("projects:{project_id}:reconcile")
    }

    /// Run an initial refresh, then reconcile periodically. A failed
    /// initial refresh propagates and leaves the runner stopped.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if matches!(*state, LoopState::Running { .. }) {
            return Ok(());
        }

        self.refresh().await?;

        let (shutdown, _) = watch::channel(false);
        let task = tokio::spawn(Self::reconcile_loop(self.clone(), shutdown.subscribe()));
        *state = LoopState::Running { shutdown, task };
        tracing::info!(project = %self.inner.project.id, "project runner started");
        Ok(())
    }

    /// Stop every tracked deployment runner, then the reconcile loop.
    pub async fn stop(&self) {
        // Lock order matches start(): state before runners.
        let mut state = self.inner.state.lock().await;

        {
            let mut runners = self.inner.runners.lock().await;
            for (_, runner) in runners.drain() {
                runner.stop().await;
            }
        }

        if let LoopState::Running { shutdown, task } =
            std::mem::replace(&mut *state, LoopState::Stopped)
        {
            let _ = shutdown.send(true);
            if let Err(err) = task.await {
                tracing::error!(
                    project = %self.inner.project.id,
                    error = %err,
                    "reconcile loop did not shut down cleanly"
                );
            }
        }

        // A cycle that was in flight while stopping may have started new
        // runners after the first drain.
        let mut runners = self.inner.runners.lock().await;
        for (_, runner) in runners.drain() {
            runner.stop().await;
        }
        tracing::info!(project = %self.inner.project.id, "project runner stopped");
    }

    /// Deployment keys with a live runner.
    pub async fn running_deployments(&self) -> HashSet<String> {
        self.inner.runners.lock().await.keys().cloned().collect()
    }

    async fn reconcile_loop(runner: ProjectRunner, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(runner.inner.config.deployment_sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = runner.refresh().await {
                        counter!(RECONCILE_FAILURES).increment(1);
                        tracing::error!(
                            project = %runner.inner.project.id,
                            error = %err,
                            "reconcile cycle failed"
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One reconciliation pass, serialized against concurrent passes in
    /// this process and (when configured) across replicas.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.inner.refresh_lock.lock().await;

        if let Some(lock) = &self.inner.reconcile_lock {
            let mut lock = lock.lock().await;
            match lock.acquire().await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        project = %self.inner.project.id,
                        "another replica is reconciling, skipping cycle"
                    );
                    return Ok(());
                }
                // The lock is advisory; reconcile anyway when the store
                // cannot answer, since all writes are idempotent.
                Err(err) => {
                    tracing::warn!(
                        project = %self.inner.project.id,
                        error = %err,
                        "reconcile lock unavailable, proceeding without it"
                    );
                }
            }
        }

        let result = self.reconcile().await;

        if let Some(lock) = &self.inner.reconcile_lock {
            let mut lock = lock.lock().await;
            match lock.release().await {
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        project = %self.inner.project.id,
                        error = %err,
                        "failed to release reconcile lock"
                    );
                }
            }
        }
        result
    }

    async fn reconcile(&self) -> Result<()> {
        let records = self.inner.management_api.get_deployments().await?;
        let network: HashMap<String, Deployment> = records
            .into_iter()
            .filter(|record| !record.deleted)
            .map(|record| (record.key.clone(), record.into_deployment()))
            .collect();
        let stored = self.inner.deployment_storage.get_deployments().await?;

        for (key, deployment) in &network {
            if !stored.contains_key(key) {
                self.inner.deployment_storage.put_deployment(deployment).await?;
                tracing::info!(
                    project = %self.inner.project.id,
                    deployment = %key,
                    "discovered deployment"
                );
            }
        }

        let mut starts = JoinSet::new();
        {
            let runners = self.inner.runners.lock().await;
            for key in network.keys() {
                if runners.contains_key(key) {
                    continue;
                }
                let runner = DeploymentRunner::new(
                    key.clone(),
                    self.inner.deployment_loader.clone(),
                    self.inner.cohort_loader.clone(),
                    Arc::clone(&self.inner.deployment_storage),
                    self.inner.config.clone(),
                );
                let key = key.clone();
                starts.spawn(async move {
                    let result = runner.start().await;
                    (key, runner, result)
                });
            }
        }

        let mut stops = JoinSet::new();
        for key in stored.keys().filter(|key| !network.contains_key(*key)) {
            let key = key.clone();
            let runner = self.inner.runners.lock().await.remove(&key);
            let storage = Arc::clone(&self.inner.deployment_storage);
            stops.spawn(async move {
                if let Some(runner) = runner {
                    runner.stop().await;
                }
                let result: Result<()> = async {
                    storage.remove_all_flags(&key).await?;
                    storage.remove_deployment(&key).await?;
                    Ok(())
                }
                .await;
                (key, result)
            });
        }

        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok((key, runner, Ok(()))) => {
                    self.inner.runners.lock().await.insert(key, runner);
                }
                Ok((key, _, Err(err))) => {
                    tracing::error!(
                        project = %self.inner.project.id,
                        deployment = %key,
                        error = %err,
                        "failed to start deployment runner"
                    );
                }
                Err(err) => {
                    tracing::error!(error = %err, "deployment start task panicked");
                }
            }
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((key, Ok(()))) => {
                    tracing::info!(
                        project = %self.inner.project.id,
                        deployment = %key,
                        "removed deployment"
                    );
                }
                Ok((key, Err(err))) => {
                    tracing::error!(
                        project = %self.inner.project.id,
                        deployment = %key,
                        error = %err,
                        "failed to remove deployment"
                    );
                }
                Err(err) => {
                    tracing::error!(error = %err, "deployment removal task panicked");
                }
            }
        }

        self.delete_unreferenced_cohorts(&network).await
    }

    /// Delete every stored cohort that no flag across the live deployment
    /// set references anymore.
    async fn delete_unreferenced_cohorts(
        &self,
        network: &HashMap<String, Deployment>,
    ) -> Result<()> {
        let mut referenced = HashSet::new();
        for key in network.keys() {
            let flags = self.inner.deployment_storage.get_all_flags(key).await?;
            referenced.extend(referenced_cohort_ids(flags.values()));
        }
        for (id, description) in self.inner.cohort_storage.get_descriptions().await? {
            if referenced.contains(&id) {
                continue;
            }
            tracing::info!(
                project = %self.inner.project.id,
                cohort_id = %id,
                "deleting unreferenced cohort"
            );
            self.inner.cohort_storage.delete_cohort(&description).await?;
        }
        Ok(())
    }
}
