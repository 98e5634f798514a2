//! # Background Task Registry
//!
//! Every timer and pump the managers spawn (heartbeat, performance
//! monitor, reconnect backoff, cache expiry, channel pumps) is
//! registered here so teardown can cancel all of them and tests can
//! assert none are left running.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

/// Registry of live background tasks.
///
/// Handles deregister themselves on completion; `cancel_all` aborts
/// whatever is still running.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and track it. Returns the task's registry id.
    pub fn spawn<F>(self: &Arc<Self>, fut: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);

        let handle = tokio::spawn(async move {
            fut.await;
            if let Ok(mut tasks) = registry.tasks.lock() {
                tasks.remove(&id);
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, handle);
        }
        id
    }

    /// Abort one task by id. Idempotent for unknown ids.
    pub fn cancel(&self, id: u64) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(handle) = tasks.remove(&id) {
                handle.abort();
            }
        }
    }

    /// Abort every tracked task.
    pub fn cancel_all(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }

    /// Number of tasks still live. Prunes finished handles first so the
    /// count reflects reality, not bookkeeping lag.
    pub fn active_count(&self) -> usize {
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.retain(|_, handle| !handle.is_finished());
                tasks.len()
            }
            Err(_) => 0,
        }
    }
}
