use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per deployment id. Mutating operations on the same
/// deployment run one after another; different deployments do not contend.
#[derive(Debug, Default)]
pub struct DeploymentLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `deployment_id`; released on drop.
    pub async fn acquire(&self, deployment_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map refers to are neither held nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(deployment_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Whether an operation currently holds `deployment_id`.
    pub fn is_locked(&self, deployment_id: i64) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&deployment_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
