//! Mock remote APIs and fixture builders shared by the crate's tests.

use crate::error::{Result, SyncError};
use crate::remote::{CohortApi, CohortMembers, FlagApi, ManagementApi};
use crate::types::{CohortDescription, Deployment, DeploymentRecord, FlagConfig};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) fn deployment(project_id: &str, key: &str) -> Deployment {
    Deployment {
        id: format!("id-{key}"),
        project_id: project_id.to_string(),
        label: key.to_string(),
        key: key.to_string(),
    }
}

pub(crate) fn cohort_description(id: &str, last_computed: i64) -> CohortDescription {
    CohortDescription {
        id: id.to_string(),
        group_type: "User".to_string(),
        last_computed,
        size: 1,
    }
}

pub(crate) fn plain_flag(key: &str) -> FlagConfig {
    FlagConfig(json!({ "key": key, "variants": { "on": {}, "off": {} } }))
}

pub(crate) fn flag_with_cohorts(key: &str, cohort_ids: &[&str]) -> FlagConfig {
    FlagConfig(json!({
        "key": key,
        "variants": { "on": {}, "off": {} },
        "segments": [
            {
                "conditions": [[
                    {
                        "selector": ["context", "user", "cohort_ids"],
                        "op": "set contains any",
                        "values": cohort_ids,
                    }
                ]],
                "variant": "on",
            }
        ],
    }))
}

fn status_error(endpoint: &str) -> SyncError {
    SyncError::Status {
        endpoint: endpoint.to_string(),
        status: 500,
    }
}

pub(crate) struct MockManagementApi {
    records: RwLock<Vec<DeploymentRecord>>,
    fail_next: AtomicBool,
}

impl MockManagementApi {
    pub(crate) fn new() -> Self {
        MockManagementApi {
            records: RwLock::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_deployments(&self, project_id: &str, keys: &[&str]) {
        let mut records = self.records.write();
        records.retain(|record| record.deleted);
        for key in keys {
            records.push(DeploymentRecord {
                id: format!("id-{key}"),
                project_id: project_id.to_string(),
                label: key.to_string(),
                key: key.to_string(),
                deleted: false,
            });
        }
    }

    pub(crate) fn set_deleted(&self, project_id: &str, keys: &[&str]) {
        let mut records = self.records.write();
        for key in keys {
            records.push(DeploymentRecord {
                id: format!("id-{key}"),
                project_id: project_id.to_string(),
                label: key.to_string(),
                key: key.to_string(),
                deleted: true,
            });
        }
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManagementApi for MockManagementApi {
    async fn get_deployments(&self) -> Result<Vec<DeploymentRecord>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(status_error("deployments"));
        }
        Ok(self.records.read().clone())
    }
}

pub(crate) struct MockFlagApi {
    flags: RwLock<HashMap<String, Vec<FlagConfig>>>,
    failing: RwLock<HashSet<String>>,
}

impl MockFlagApi {
    pub(crate) fn new() -> Self {
        MockFlagApi {
            flags: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    pub(crate) fn set_flags(&self, deployment_key: &str, flags: Vec<FlagConfig>) {
        self.failing.write().remove(deployment_key);
        self.flags.write().insert(deployment_key.to_string(), flags);
    }

    pub(crate) fn fail_for(&self, deployment_key: &str) {
        self.failing.write().insert(deployment_key.to_string());
    }
}

#[async_trait]
impl FlagApi for MockFlagApi {
    async fn get_flag_configs(&self, deployment_key: &str) -> Result<Vec<FlagConfig>> {
        if self.failing.read().contains(deployment_key) {
            return Err(status_error("flags"));
        }
        Ok(self
            .flags
            .read()
            .get(deployment_key)
            .cloned()
            .unwrap_or_default())
    }
}

pub(crate) struct MockCohortApi {
    cohorts: RwLock<HashMap<String, (CohortDescription, HashSet<String>)>>,
    unrequested: RwLock<Vec<CohortDescription>>,
    failing_members: RwLock<HashSet<String>>,
    description_fetches: AtomicUsize,
    member_fetches: AtomicUsize,
}

impl MockCohortApi {
    pub(crate) fn new() -> Self {
        MockCohortApi {
            cohorts: RwLock::new(HashMap::new()),
            unrequested: RwLock::new(Vec::new()),
            failing_members: RwLock::new(HashSet::new()),
            description_fetches: AtomicUsize::new(0),
            member_fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn add_cohort(&self, id: &str, last_computed: i64, members: &[&str]) {
        self.add_sized_cohort(id, last_computed, members.len() as u64, members);
    }

    pub(crate) fn add_sized_cohort(
        &self,
        id: &str,
        last_computed: i64,
        size: u64,
        members: &[&str],
    ) {
        let description = CohortDescription {
            id: id.to_string(),
            group_type: "User".to_string(),
            last_computed,
            size,
        };
        let members = members.iter().map(|m| m.to_string()).collect();
        self.cohorts
            .write()
            .insert(id.to_string(), (description, members));
    }

    /// Make the API return this description even when it was not asked for.
    pub(crate) fn return_unrequested(&self, id: &str, last_computed: i64, members: &[&str]) {
        self.add_cohort(id, last_computed, members);
        let description = self.cohorts.read()[id].0.clone();
        self.cohorts.write().remove(id);
        self.unrequested.write().push(description);
    }

    pub(crate) fn fail_members_for(&self, id: &str) {
        self.failing_members.write().insert(id.to_string());
    }

    pub(crate) fn description_fetches(&self) -> usize {
        self.description_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn member_fetches(&self) -> usize {
        self.member_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CohortApi for MockCohortApi {
    async fn get_descriptions(
        &self,
        cohort_ids: &HashSet<String>,
    ) -> Result<Vec<CohortDescription>> {
        self.description_fetches.fetch_add(1, Ordering::SeqCst);
        let mut descriptions: Vec<CohortDescription> = self
            .cohorts
            .read()
            .values()
            .filter(|(description, _)| cohort_ids.contains(&description.id))
            .map(|(description, _)| description.clone())
            .collect();
        descriptions.extend(self.unrequested.read().iter().cloned());
        Ok(descriptions)
    }

    async fn get_members(
        &self,
        description: &CohortDescription,
        max_size: u64,
    ) -> Result<CohortMembers> {
        self.member_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_members.read().contains(&description.id) {
            return Err(status_error("cohort members"));
        }
        if description.size > max_size {
            return Ok(CohortMembers::TooLarge);
        }
        match self.cohorts.read().get(&description.id) {
            Some((_, members)) => Ok(CohortMembers::Members(members.clone())),
            None => Ok(CohortMembers::NotModified),
        }
    }
}
