//! In-memory session → thread table.
//!
//! No eviction and no TTL: entries live until cleared or the process exits.
//! Each session also has an async mutex that the orchestration loop holds
//! for one whole run, so two requests on the same session cannot interleave
//! their get/set. Different sessions never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

use super::types::Thread;

#[derive(Default)]
pub struct SessionThreadStore {
    threads: Mutex<HashMap<String, Thread>>,
    locks: Mutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl SessionThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Thread> {
        self.threads().get(session_id).cloned()
    }

    /// Store `thread`, replacing any previous one.
    pub fn set(&self, session_id: &str, thread: Thread) {
        self.threads().insert(session_id.to_string(), thread);
        tracing::debug!(session_id, "session thread stored");
    }

    /// Forget a session. Returns whether it had a thread.
    ///
    /// The run lock is dropped too unless a run currently holds it.
    pub fn clear(&self, session_id: &str) -> bool {
        let existed = self.threads().remove(session_id).is_some();
        {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks
                .get(session_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(session_id);
            }
        }
        tracing::info!(session_id, existed, "session cleared");
        existed
    }

    /// Thread of a session as JSON, for handing to another process.
    pub fn export(&self, session_id: &str) -> Option<serde_json::Value> {
        self.get(session_id).map(Thread::into_value)
    }

    /// Install a previously exported thread.
    pub fn restore(&self, session_id: &str, state: serde_json::Value) {
        self.set(session_id, Thread::new(state));
    }

    pub fn len(&self) -> usize {
        self.threads().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire the run lock of a session.
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    fn threads(&self) -> std::sync::MutexGuard<'_, HashMap<String, Thread>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
