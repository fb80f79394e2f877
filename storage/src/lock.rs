//! Distributed mutual exclusion over Redis.
//!
//! `acquire` is SET NX PX with a fresh opaque value per acquisition, so a
//! lock reclaimed by TTL expiry cannot be released by the previous holder:
//! `release` deletes the key only when it still carries this acquisition's
//! value. A failed release is reported as `Ok(false)` — callers treat the
//! lock as advisory.

use crate::error::Result;
use crate::redis::RedisStore;
use std::time::Duration;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct DistributedLock {
    store: RedisStore,
    key: String,
    value: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: RedisStore, name: &str, ttl: Duration) -> Self {
        let key = store.keys().lock(name);
        DistributedLock {
            store,
            key,
            value: String::new(),
            ttl,
        }
    }

    /// Try to take the lock. Returns false when another holder has it.
    pub async fn acquire(&mut self) -> Result<bool> {
        self.value = Uuid::new_v4().to_string();
        self.store.set_nx_px(&self.key, &self.value, self.ttl).await
    }

    /// Release the lock if this instance still holds it. Returns false when
    /// the key is gone or carries another holder's value.
    pub async fn release(&mut self) -> Result<bool> {
        let mut conn = self.store.write_conn();
        let script = ::redis::Script::new(RELEASE_SCRIPT);
        let mut invocation = script.key(&self.key);
        invocation.arg(&self.value);
        let deleted: i64 = match tokio::time::timeout(
            self.store.operation_timeout(),
            invocation.invoke_async(&mut conn),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(crate::error::StorageError::Timeout(
                    self.store.operation_timeout(),
                ));
            }
        };
        self.value.clear();
        if deleted == 0 {
            tracing::debug!(key = %self.key, "lock was not held at release");
            return Ok(false);
        }
        Ok(true)
    }
}
