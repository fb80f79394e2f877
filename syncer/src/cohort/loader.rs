use crate::cohort::CohortStorage;
use crate::error::{Result, SyncError};
use crate::metrics_defs::COHORT_DOWNLOADS;
use crate::remote::{CohortApi, CohortMembers};
use crate::singleflight::SingleFlight;
use crate::types::CohortDescription;
use shared::counter;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Synchronizes cohorts from the remote cohort API into storage.
///
/// Downloads are deduplicated per cohort id, so overlapping `load_cohorts`
/// calls (from concurrent deployment loads) share one download per cohort.
#[derive(Clone)]
pub struct CohortLoader {
    inner: Arc<CohortLoaderInner>,
}

struct CohortLoaderInner {
    api: Arc<dyn CohortApi>,
    storage: Arc<dyn CohortStorage>,
    max_cohort_size: u64,
    jobs: SingleFlight<()>,
}

impl CohortLoader {
    pub fn new(
        api: Arc<dyn CohortApi>,
        storage: Arc<dyn CohortStorage>,
        max_cohort_size: u64,
    ) -> Self {
        CohortLoader {
            inner: Arc::new(CohortLoaderInner {
                api,
                storage,
                max_cohort_size,
                jobs: SingleFlight::new(),
            }),
        }
    }

    pub fn storage(&self) -> &Arc<dyn CohortStorage> {
        &self.inner.storage
    }

    /// Download every requested cohort whose remote version is newer than
    /// the stored one. All downloads started by this call are awaited; a
    /// failure in one propagates after the siblings finish.
    pub async fn load_cohorts(&self, cohort_ids: &HashSet<String>) -> Result<()> {
        if cohort_ids.is_empty() {
            return Ok(());
        }
        let descriptions = self.inner.api.get_descriptions(cohort_ids).await?;

        let mut downloads = JoinSet::new();
        for description in descriptions {
            if !cohort_ids.contains(&description.id) {
                continue;
            }
            let stored = self.inner.storage.get_description(&description.id).await?;
            if !self.should_download(&description, stored.as_ref()) {
                continue;
            }
            let loader = self.clone();
            downloads.spawn(async move {
                let id = description.id.clone();
                let result = loader
                    .inner
                    .jobs
                    .run(&id, loader.download(&description))
                    .await;
                (id, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(err))) => {
                    tracing::error!(cohort_id = %id, error = %err, "cohort download failed");
                    if first_error.is_none() {
                        first_error = Some(SyncError::Shared(err));
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "cohort download task panicked");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn should_download(
        &self,
        remote: &CohortDescription,
        stored: Option<&CohortDescription>,
    ) -> bool {
        if remote.size > self.inner.max_cohort_size {
            tracing::warn!(
                cohort_id = %remote.id,
                size = remote.size,
                max_size = self.inner.max_cohort_size,
                "cohort exceeds the maximum size, skipping"
            );
            return false;
        }
        match stored {
            Some(stored) => remote.last_computed > stored.last_computed,
            None => true,
        }
    }

    async fn download(&self, description: &CohortDescription) -> Result<()> {
        counter!(COHORT_DOWNLOADS).increment(1);
        match self
            .inner
            .api
            .get_members(description, self.inner.max_cohort_size)
            .await?
        {
            CohortMembers::Members(members) => {
                self.inner.storage.put_cohort(description, &members).await?;
                tracing::info!(
                    cohort_id = %description.id,
                    members = members.len(),
                    last_computed = description.last_computed,
                    "stored cohort"
                );
                Ok(())
            }
            CohortMembers::NotModified => {
                tracing::debug!(cohort_id = %description.id, "cohort not modified");
                Ok(())
            }
            CohortMembers::TooLarge => Err(SyncError::CohortTooLarge {
                id: description.id.clone(),
                size: description.size,
                max_size: self.inner.max_cohort_size,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::InMemoryCohortStorage;
    use crate::testutils::MockCohortApi;

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn loader_with(api: Arc<MockCohortApi>) -> (CohortLoader, Arc<InMemoryCohortStorage>) {
        let storage = Arc::new(InMemoryCohortStorage::new());
        let loader = CohortLoader::new(api, Arc::clone(&storage) as _, 1000);
        (loader, storage)
    }

    #[tokio::test]
    async fn downloads_and_stores_new_cohorts() {
        let api = Arc::new(MockCohortApi::new());
        api.add_cohort("vip", 100, &["1", "2"]);
        let (loader, storage) = loader_with(api);

        loader.load_cohorts(&ids(&["vip"])).await.unwrap();

        let stored = storage.get_description("vip").await.unwrap().unwrap();
        assert_eq!(stored.last_computed, 100);
        assert_eq!(
            storage.get_members(&stored).await.unwrap(),
            ids(&["1", "2"])
        );
    }

    #[tokio::test]
    async fn newer_remote_versions_replace_stored_cohorts() {
        let api = Arc::new(MockCohortApi::new());
        api.add_cohort("vip", 100, &["1", "2"]);
        let (loader, storage) = loader_with(Arc::clone(&api));

        loader.load_cohorts(&ids(&["vip"])).await.unwrap();
        api.add_cohort("vip", 150, &["1", "2", "3"]);
        loader.load_cohorts(&ids(&["vip"])).await.unwrap();

        let stored = storage.get_description("vip").await.unwrap().unwrap();
        assert_eq!(stored.last_computed, 150);
        assert_eq!(
            storage.get_members(&stored).await.unwrap(),
            ids(&["1", "2", "3"])
        );
    }

    #[tokio::test]
    async fn unchanged_cohorts_are_not_downloaded_again() {
        let api = Arc::new(MockCohortApi::new());
        api.add_cohort("vip", 100, &["1"]);
        let (loader, _storage) = loader_with(Arc::clone(&api));

        loader.load_cohorts(&ids(&["vip"])).await.unwrap();
        loader.load_cohorts(&ids(&["vip"])).await.unwrap();

        assert_eq!(api.member_fetches(), 1);
    }

    #[tokio::test]
    async fn oversized_cohorts_are_skipped() {
        let api = Arc::new(MockCohortApi::new());
        api.add_sized_cohort("huge", 100, 5000, &["1"]);
        api.add_cohort("small", 100, &["2"]);
        let (loader, storage) = loader_with(api);

        loader.load_cohorts(&ids(&["huge", "small"])).await.unwrap();

        assert!(storage.get_description("huge").await.unwrap().is_none());
        assert!(storage.get_description("small").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn one_failed_download_does_not_cancel_siblings() {
        let api = Arc::new(MockCohortApi::new());
        api.add_cohort("ok", 100, &["1"]);
        api.add_cohort("broken", 100, &["2"]);
        api.fail_members_for("broken");
        let (loader, storage) = loader_with(api);

        let result = loader.load_cohorts(&ids(&["ok", "broken"])).await;

        assert!(result.is_err());
        assert!(storage.get_description("ok").await.unwrap().is_some());
        assert!(storage.get_description("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrequested_descriptions_are_ignored() {
        let api = Arc::new(MockCohortApi::new());
        api.add_cohort("vip", 100, &["1"]);
        api.return_unrequested("extra", 100, &["9"]);
        let (loader, storage) = loader_with(api);

        loader.load_cohorts(&ids(&["vip"])).await.unwrap();

        assert!(storage.get_description("extra").await.unwrap().is_none());
    }
}
