use crate::error::Result;
use crate::metrics_defs::{COHORT_MEMBERS_ADDED, COHORT_MEMBERS_REMOVED};
use crate::types::{Cohort, CohortDescription};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::counter;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use storage::RedisStore;

/// Grace period before a superseded member set disappears from storage.
/// Readers holding the old key finish within this window.
const SUPERSEDED_MEMBERS_TTL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait CohortStorage: Send + Sync {
    async fn get_description(&self, cohort_id: &str) -> Result<Option<CohortDescription>>;

    async fn get_descriptions(&self) -> Result<HashMap<String, CohortDescription>>;

    async fn get_members(&self, description: &CohortDescription) -> Result<HashSet<String>>;

    /// Ids of the cohorts (restricted to `cohort_ids` when given) that
    /// contain the user.
    async fn get_memberships_for_user(
        &self,
        user_id: &str,
        cohort_ids: Option<&HashSet<String>>,
    ) -> Result<HashSet<String>>;

    /// Persist one computed cohort version. A no-op when the stored
    /// version is equal or newer.
    async fn put_cohort(
        &self,
        description: &CohortDescription,
        members: &HashSet<String>,
    ) -> Result<()>;

    /// Remove the described cohort. A no-op when storage holds a newer
    /// version than the one described.
    async fn delete_cohort(&self, description: &CohortDescription) -> Result<()>;
}

pub struct InMemoryCohortStorage {
    cohorts: RwLock<HashMap<String, Cohort>>,
}

impl InMemoryCohortStorage {
    pub fn new() -> Self {
        InMemoryCohortStorage {
            cohorts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCohortStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CohortStorage for InMemoryCohortStorage {
    async fn get_description(&self, cohort_id: &str) -> Result<Option<CohortDescription>> {
        Ok(self
            .cohorts
            .read()
            .get(cohort_id)
            .map(|cohort| cohort.description.clone()))
    }

    async fn get_descriptions(&self) -> Result<HashMap<String, CohortDescription>> {
        Ok(self
            .cohorts
            .read()
            .iter()
            .map(|(id, cohort)| (id.clone(), cohort.description.clone()))
            .collect())
    }

    async fn get_members(&self, description: &CohortDescription) -> Result<HashSet<String>> {
        Ok(self
            .cohorts
            .read()
            .get(&description.id)
            .map(|cohort| cohort.members.clone())
            .unwrap_or_default())
    }

    async fn get_memberships_for_user(
        &self,
        user_id: &str,
        cohort_ids: Option<&HashSet<String>>,
    ) -> Result<HashSet<String>> {
        let cohorts = self.cohorts.read();
        Ok(cohorts
            .values()
            .filter(|cohort| {
                cohort_ids.is_none_or(|ids| ids.contains(&cohort.description.id))
            })
            .filter(|cohort| cohort.members.contains(user_id))
            .map(|cohort| cohort.description.id.clone())
            .collect())
    }

    async fn put_cohort(
        &self,
        description: &CohortDescription,
        members: &HashSet<String>,
    ) -> Result<()> {
        let mut cohorts = self.cohorts.write();
        if let Some(stored) = cohorts.get(&description.id) {
            if stored.description.last_computed >= description.last_computed {
                return Ok(());
            }
        }
        cohorts.insert(
            description.id.clone(),
            Cohort {
                description: description.clone(),
                members: members.clone(),
            },
        );
        Ok(())
    }

    async fn delete_cohort(&self, description: &CohortDescription) -> Result<()> {
        let mut cohorts = self.cohorts.write();
        if let Some(stored) = cohorts.get(&description.id) {
            if stored.description.last_computed > description.last_computed {
                return Ok(());
            }
            cohorts.remove(&description.id);
        }
        Ok(())
    }
}

/// Distributed backend: descriptions live in one hash per project, the
/// members of each computed version in their own set. Writes commit the
/// description last, then expire the superseded version's member set.
pub struct RedisCohortStorage {
    store: RedisStore,
    project_id: String,
}

impl RedisCohortStorage {
    pub fn new(store: RedisStore, project_id: String) -> Self {
        RedisCohortStorage { store, project_id }
    }

    fn descriptions_key(&self) -> String {
        self.store.keys().cohort_descriptions(&self.project_id)
    }

    fn member_key(&self, description: &CohortDescription) -> String {
        self.store.keys().cohort_members(
            &self.project_id,
            &description.id,
            &description.group_type,
            description.last_computed,
        )
    }

    fn parse_description(&self, raw: &str) -> Result<CohortDescription> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl CohortStorage for RedisCohortStorage {
    async fn get_description(&self, cohort_id: &str) -> Result<Option<CohortDescription>> {
        match self.store.hget(&self.descriptions_key(), cohort_id).await? {
            Some(raw) => Ok(Some(self.parse_description(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_descriptions(&self) -> Result<HashMap<String, CohortDescription>> {
        let mut descriptions = HashMap::new();
        for (id, raw) in self.store.hgetall(&self.descriptions_key()).await? {
            descriptions.insert(id, self.parse_description(&raw)?);
        }
        Ok(descriptions)
    }

    async fn get_members(&self, description: &CohortDescription) -> Result<HashSet<String>> {
        Ok(self.store.sscan(&self.member_key(description)).await?)
    }

    async fn get_memberships_for_user(
        &self,
        user_id: &str,
        cohort_ids: Option<&HashSet<String>>,
    ) -> Result<HashSet<String>> {
        let descriptions = self.get_descriptions().await?;
        let candidates: Vec<&CohortDescription> = descriptions
            .values()
            .filter(|description| cohort_ids.is_none_or(|ids| ids.contains(&description.id)))
            .collect();
        let keys: Vec<String> = candidates
            .iter()
            .map(|description| self.member_key(description))
            .collect();
        let memberships = self.store.sismember_many(&keys, user_id).await?;
        Ok(candidates
            .iter()
            .zip(memberships)
            .filter(|(_, is_member)| *is_member)
            .map(|(description, _)| description.id.clone())
            .collect())
    }

    async fn put_cohort(
        &self,
        description: &CohortDescription,
        members: &HashSet<String>,
    ) -> Result<()> {
        let stored = self.get_description(&description.id).await?;
        if let Some(stored) = &stored {
            if stored.last_computed >= description.last_computed {
                return Ok(());
            }
        }

        let member_key = self.member_key(description);
        self.store.sadd_batched(&member_key, members).await?;
        // Committing the description makes the new version current.
        self.store
            .hset(
                &self.descriptions_key(),
                &description.id,
                &serde_json::to_string(description)?,
            )
            .await?;

        if let Some(old) = stored {
            let old_key = self.member_key(&old);
            if old_key != member_key {
                self.store.expire(&old_key, SUPERSEDED_MEMBERS_TTL).await?;
                // Both keys share the cohort's hash tag, so the diffs stay
                // single-partition in cluster mode.
                let added = self.store.sdiff(&member_key, &old_key).await?;
                let removed = self.store.sdiff(&old_key, &member_key).await?;
                counter!(COHORT_MEMBERS_ADDED).increment(added.len() as u64);
                counter!(COHORT_MEMBERS_REMOVED).increment(removed.len() as u64);
            }
        }
        Ok(())
    }

    async fn delete_cohort(&self, description: &CohortDescription) -> Result<()> {
        let Some(stored) = self.get_description(&description.id).await? else {
            return Ok(());
        };
        if stored.last_computed > description.last_computed {
            return Ok(());
        }
        let member_key = self.member_key(&stored);
        self.store
            .hdel(&self.descriptions_key(), &description.id)
            .await?;
        self.store.del(&member_key).await?;
        Ok(())
    }
}
