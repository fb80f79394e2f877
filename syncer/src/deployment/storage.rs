use crate::error::Result;
use crate::types::{Deployment, FlagConfig, FlagSet};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use storage::RedisStore;
use tokio::sync::watch;

#[async_trait]
pub trait DeploymentStorage: Send + Sync {
    async fn get_deployments(&self) -> Result<HashMap<String, Deployment>>;

    async fn put_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn remove_deployment(&self, deployment_key: &str) -> Result<()>;

    async fn get_flag(&self, deployment_key: &str, flag_key: &str)
    -> Result<Option<FlagConfig>>;

    async fn get_all_flags(&self, deployment_key: &str) -> Result<FlagSet>;

    async fn put_flag(&self, deployment_key: &str, flag: &FlagConfig) -> Result<()>;

    async fn put_flags(&self, deployment_key: &str, flags: &[FlagConfig]) -> Result<()>;

    async fn remove_flag(&self, deployment_key: &str, flag_key: &str) -> Result<()>;

    async fn remove_all_flags(&self, deployment_key: &str) -> Result<()>;

    /// Change stream carrying the current deployment key set. A new value
    /// is published whenever the set changes.
    fn watch_deployments(&self) -> watch::Receiver<BTreeSet<String>>;
}

pub struct InMemoryDeploymentStorage {
    deployments: RwLock<HashMap<String, Deployment>>,
    flags: RwLock<HashMap<String, FlagSet>>,
    changes: watch::Sender<BTreeSet<String>>,
}

impl InMemoryDeploymentStorage {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(BTreeSet::new());
        InMemoryDeploymentStorage {
            deployments: RwLock::new(HashMap::new()),
            flags: RwLock::new(HashMap::new()),
            changes,
        }
    }

    fn publish_keys(&self) {
        let keys: BTreeSet<String> = self.deployments.read().keys().cloned().collect();
        self.changes.send_if_modified(|current| {
            if *current != keys {
                *current = keys;
                true
            } else {
                false
            }
        });
    }
}

impl Default for InMemoryDeploymentStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentStorage for InMemoryDeploymentStorage {
    async fn get_deployments(&self) -> Result<HashMap<String, Deployment>> {
        Ok(self.deployments.read().clone())
    }

    async fn put_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.deployments
            .write()
            .insert(deployment.key.clone(), deployment.clone());
        self.publish_keys();
        Ok(())
    }

    async fn remove_deployment(&self, deployment_key: &str) -> Result<()> {
        self.deployments.write().remove(deployment_key);
        self.flags.write().remove(deployment_key);
        self.publish_keys();
        Ok(())
    }

    async fn get_flag(
        &self,
        deployment_key: &str,
        flag_key: &str,
    ) -> Result<Option<FlagConfig>> {
        Ok(self
            .flags
            .read()
            .get(deployment_key)
            .and_then(|flags| flags.get(flag_key).cloned()))
    }

    async fn get_all_flags(&self, deployment_key: &str) -> Result<FlagSet> {
        Ok(self
            .flags
            .read()
            .get(deployment_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_flag(&self, deployment_key: &str, flag: &FlagConfig) -> Result<()> {
        if let Some(key) = flag.key() {
            self.flags
                .write()
                .entry(deployment_key.to_string())
                .or_default()
                .insert(key.to_string(), flag.clone());
        }
        Ok(())
    }

    async fn put_flags(&self, deployment_key: &str, flags: &[FlagConfig]) -> Result<()> {
        let mut stored = self.flags.write();
        let entry = stored.entry(deployment_key.to_string()).or_default();
        for flag in flags {
            if let Some(key) = flag.key() {
                entry.insert(key.to_string(), flag.clone());
            }
        }
        Ok(())
    }

    async fn remove_flag(&self, deployment_key: &str, flag_key: &str) -> Result<()> {
        if let Some(flags) = self.flags.write().get_mut(deployment_key) {
            flags.shift_remove(flag_key);
        }
        Ok(())
    }

    async fn remove_all_flags(&self, deployment_key: &str) -> Result<()> {
        self.flags.write().remove(deployment_key);
        Ok(())
    }

    fn watch_deployments(&self) -> watch::Receiver<BTreeSet<String>> {
        self.changes.subscribe()
    }
}

/// Distributed backend. Flag reads go through the read-only connection to
/// keep evaluation-time read volume off the primary, and flag writes are
/// skipped when the serialized value matches the last written copy.
pub struct RedisDeploymentStorage {
    store: RedisStore,
    project_id: String,
    changes: watch::Sender<BTreeSet<String>>,
    last_written: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl RedisDeploymentStorage {
    pub fn new(store: RedisStore, project_id: String) -> Self {
        let (changes, _) = watch::channel(BTreeSet::new());
        RedisDeploymentStorage {
            store,
            project_id,
            changes,
            last_written: Mutex::new(HashMap::new()),
        }
    }

    fn deployments_key(&self) -> String {
        self.store.keys().deployments(&self.project_id)
    }

    fn flags_key(&self, deployment_key: &str) -> String {
        self.store.keys().flags(&self.project_id, deployment_key)
    }

    async fn publish_keys(&self) -> Result<()> {
        let keys: BTreeSet<String> = self
            .store
            .hkeys(&self.deployments_key())
            .await?
            .into_iter()
            .collect();
        self.changes.send_if_modified(|current| {
            if *current != keys {
                *current = keys;
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

#[async_trait]
impl DeploymentStorage for RedisDeploymentStorage {
    async fn get_deployments(&self) -> Result<HashMap<String, Deployment>> {
        let mut deployments = HashMap::new();
        for (key, raw) in self.store.hgetall(&self.deployments_key()).await? {
            deployments.insert(key, serde_json::from_str(&raw)?);
        }
        Ok(deployments)
    }

    async fn put_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.store
            .sadd(&self.store.keys().projects(), &self.project_id)
            .await?;
        self.store
            .hset(
                &self.deployments_key(),
                &deployment.key,
                &serde_json::to_string(deployment)?,
            )
            .await?;
        self.publish_keys().await
    }

    async fn remove_deployment(&self, deployment_key: &str) -> Result<()> {
        self.store
            .hdel(&self.deployments_key(), deployment_key)
            .await?;
        self.store.del(&self.flags_key(deployment_key)).await?;
        self.last_written.lock().remove(deployment_key);
        self.publish_keys().await
    }

    async fn get_flag(
        &self,
        deployment_key: &str,
        flag_key: &str,
    ) -> Result<Option<FlagConfig>> {
        match self
            .store
            .hget(&self.flags_key(deployment_key), flag_key)
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_all_flags(&self, deployment_key: &str) -> Result<FlagSet> {
        let mut flags = FlagSet::new();
        for (key, raw) in self.store.hgetall(&self.flags_key(deployment_key)).await? {
            flags.insert(key, serde_json::from_str(&raw)?);
        }
        Ok(flags)
    }

    async fn put_flag(&self, deployment_key: &str, flag: &FlagConfig) -> Result<()> {
        self.put_flags(deployment_key, std::slice::from_ref(flag))
            .await
    }

    async fn put_flags(&self, deployment_key: &str, flags: &[FlagConfig]) -> Result<()> {
        let mut updates = Vec::new();
        {
            let mut last_written = self.last_written.lock();
            let written = last_written
                .entry(deployment_key.to_string())
                .or_default();
            for flag in flags {
                let Some(key) = flag.key() else {
                    tracing::warn!(deployment = deployment_key, "skipping flag without a key");
                    continue;
                };
                let raw = serde_json::to_string(flag)?;
                if written.get(key) == Some(&raw) {
                    continue;
                }
                written.insert(key.to_string(), raw.clone());
                updates.push((key.to_string(), raw));
            }
        }
        self.store
            .hset_multiple(&self.flags_key(deployment_key), &updates)
            .await
            .inspect_err(|_| {
                // The write may not have landed; do not skip it next time.
                self.last_written.lock().remove(deployment_key);
            })?;
        Ok(())
    }

    async fn remove_flag(&self, deployment_key: &str, flag_key: &str) -> Result<()> {
        self.store
            .hdel(&self.flags_key(deployment_key), flag_key)
            .await?;
        if let Some(written) = self.last_written.lock().get_mut(deployment_key) {
            written.remove(flag_key);
        }
        Ok(())
    }

    async fn remove_all_flags(&self, deployment_key: &str) -> Result<()> {
        self.store.del(&self.flags_key(deployment_key)).await?;
        self.last_written.lock().remove(deployment_key);
        Ok(())
    }

    fn watch_deployments(&self) -> watch::Receiver<BTreeSet<String>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(key: &str) -> Deployment {
        Deployment {
            id: format!("id-{key}"),
            project_id: "p1".to_string(),
            label: key.to_string(),
            key: key.to_string(),
        }
    }

    fn flag(key: &str) -> FlagConfig {
        FlagConfig(json!({ "key": key, "variants": {} }))
    }

    #[tokio::test]
    async fn deployments_roundtrip() {
        let store = InMemoryDeploymentStorage::new();
        store.put_deployment(&deployment("a")).await.unwrap();
        store.put_deployment(&deployment("b")).await.unwrap();

        let stored = store.get_deployments().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get("a").unwrap().label, "a");

        store.remove_deployment("a").await.unwrap();
        assert_eq!(store.get_deployments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flags_roundtrip() {
        let store = InMemoryDeploymentStorage::new();
        store
            .put_flags("dep", &[flag("one"), flag("two")])
            .await
            .unwrap();

        assert!(store.get_flag("dep", "one").await.unwrap().is_some());
        assert_eq!(store.get_all_flags("dep").await.unwrap().len(), 2);

        store.remove_flag("dep", "one").await.unwrap();
        assert!(store.get_flag("dep", "one").await.unwrap().is_none());

        store.remove_all_flags("dep").await.unwrap();
        assert!(store.get_all_flags("dep").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_a_deployment_drops_its_flags() {
        let store = InMemoryDeploymentStorage::new();
        store.put_deployment(&deployment("a")).await.unwrap();
        store.put_flags("a", &[flag("one")]).await.unwrap();

        store.remove_deployment("a").await.unwrap();
        assert!(store.get_all_flags("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_stream_tracks_the_key_set() {
        let store = InMemoryDeploymentStorage::new();
        let mut changes = store.watch_deployments();
        assert!(changes.borrow().is_empty());

        store.put_deployment(&deployment("a")).await.unwrap();
        store.put_deployment(&deployment("b")).await.unwrap();
        assert!(changes.has_changed().unwrap());
        {
            let keys = changes.borrow_and_update();
            assert_eq!(keys.len(), 2);
            assert!(keys.contains("a"));
        }

        // Re-putting an existing deployment does not publish a new value.
        store.put_deployment(&deployment("b")).await.unwrap();
        assert!(!changes.has_changed().unwrap());

        store.remove_deployment("a").await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(changes.borrow_and_update().len(), 1);
    }
}
