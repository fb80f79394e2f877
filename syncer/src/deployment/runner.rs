use crate::cohort::CohortLoader;
use crate::config::SyncConfig;
use crate::deployment::{DeploymentLoader, DeploymentStorage};
use crate::error::Result;
use crate::metrics_defs::{COHORT_SYNC_FAILURES, FLAG_SYNC_FAILURES};
use crate::types::referenced_cohort_ids;
use shared::counter;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

enum RunnerState {
    Stopped,
    Running {
        shutdown: watch::Sender<bool>,
        tasks: Vec<JoinHandle<()>>,
    },
}

/// Periodic refresh for one deployment.
///
/// While running, two independent loops re-sync the flag configurations
/// and the cohorts referenced by the stored flags. An iteration that fails
/// is logged and retried on the next tick; a loop never dies from one bad
/// cycle.
#[derive(Clone)]
pub struct DeploymentRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    deployment_key: String,
    loader: DeploymentLoader,
    cohort_loader: CohortLoader,
    storage: Arc<dyn DeploymentStorage>,
    config: SyncConfig,
    state: Mutex<RunnerState>,
}

impl DeploymentRunner {
    pub fn new(
        deployment_key: String,
        loader: DeploymentLoader,
        cohort_loader: CohortLoader,
        storage: Arc<dyn DeploymentStorage>,
        config: SyncConfig,
    ) -> Self {
        DeploymentRunner {
            inner: Arc::new(RunnerInner {
                deployment_key,
                loader,
                cohort_loader,
                storage,
                config,
                state: Mutex::new(RunnerState::Stopped),
            }),
        }
    }

    pub fn deployment_key(&self) -> &str {
        &self.inner.deployment_key
    }

    /// Perform an initial synchronous load, then start the periodic loops.
    /// A failed initial load propagates and leaves the runner stopped.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if matches!(*state, RunnerState::Running { .. }) {
            return Ok(());
        }

        self.inner
            .loader
            .load_deployment(&self.inner.deployment_key)
            .await?;

        let (shutdown, _) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Self::flag_sync_loop(self.clone(), shutdown.subscribe())),
            tokio::spawn(Self::cohort_sync_loop(self.clone(), shutdown.subscribe())),
        ];
        *state = RunnerState::Running { shutdown, tasks };
        tracing::info!(deployment = %self.inner.deployment_key, "deployment runner started");
        Ok(())
    }

    /// Cancel the loops and wait for any in-flight iteration to finish.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if let RunnerState::Running { shutdown, tasks } =
            std::mem::replace(&mut *state, RunnerState::Stopped)
        {
            let _ = shutdown.send(true);
            for task in tasks {
                if let Err(err) = task.await {
                    tracing::error!(
                        deployment = %self.inner.deployment_key,
                        error = %err,
                        "sync loop did not shut down cleanly"
                    );
                }
            }
            tracing::info!(deployment = %self.inner.deployment_key, "deployment runner stopped");
        }
    }

    async fn flag_sync_loop(runner: DeploymentRunner, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(runner.inner.config.flag_sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial load already
        // ran in start().
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = runner
                        .inner
                        .loader
                        .load_deployment(&runner.inner.deployment_key)
                        .await
                    {
                        counter!(FLAG_SYNC_FAILURES).increment(1);
                        tracing::error!(
                            deployment = %runner.inner.deployment_key,
                            error = %err,
                            "flag sync failed"
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn cohort_sync_loop(runner: DeploymentRunner, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(runner.inner.config.cohort_sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = runner.sync_cohorts().await {
                        counter!(COHORT_SYNC_FAILURES).increment(1);
                        tracing::error!(
                            deployment = %runner.inner.deployment_key,
                            error = %err,
                            "cohort sync failed"
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Re-load every cohort referenced by the currently stored flags.
    async fn sync_cohorts(&self) -> Result<()> {
        let flags = self
            .inner
            .storage
            .get_all_flags(&self.inner.deployment_key)
            .await?;
        let cohort_ids = referenced_cohort_ids(flags.values());
        if cohort_ids.is_empty() {
            return Ok(());
        }
        self.inner.cohort_loader.load_cohorts(&cohort_ids).await
    }
}
