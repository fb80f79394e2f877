//! Deduplication of concurrent loads.

use crate::error::{SharedError, SyncError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

type JobResult<V> = Result<V, SharedError>;

enum Role<V> {
    /// First caller for the key; runs the work and publishes the result.
    Owner(watch::Sender<Option<JobResult<V>>>),
    /// Arrived while a job was in flight; awaits the shared result.
    Waiter(watch::Receiver<Option<JobResult<V>>>),
}

/// Collapses concurrent `run` calls for the same key into one execution.
///
/// The first caller for a key executes the work; callers that arrive while
/// it is in flight await the same result. The entry is removed before the
/// result is published, so a call arriving after completion starts a fresh
/// execution.
pub struct SingleFlight<V> {
    jobs: Mutex<HashMap<String, watch::Receiver<Option<JobResult<V>>>>>,
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        SingleFlight {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F>(&self, key: &str, work: F) -> JobResult<V>
    where
        F: Future<Output = Result<V, SyncError>>,
    {
        let role = {
            let mut jobs = self.jobs.lock();
            match jobs.get(key) {
                Some(rx) => Role::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    jobs.insert(key.to_string(), rx);
                    Role::Owner(tx)
                }
            }
        };

        match role {
            Role::Waiter(rx) => Self::wait(key, rx).await,
            Role::Owner(tx) => {
                let result = work.await.map_err(Arc::new);
                // Remove first: a caller arriving after completion must
                // start new work, not observe a finished generation.
                self.jobs.lock().remove(key);
                let _ = tx.send(Some(result.clone()));
                result
            }
        }
    }

    async fn wait(
        key: &str,
        mut rx: watch::Receiver<Option<JobResult<V>>>,
    ) -> JobResult<V> {
        loop {
            {
                let value = rx.borrow_and_update();
                if let Some(result) = value.as_ref() {
                    return result.clone();
                }
            }
            if rx.changed().await.is_err() {
                // The executing caller was dropped before publishing.
                return Err(Arc::new(SyncError::JobInterrupted(key.to_string())));
            }
        }
    }
}

impl<V: Clone> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}
