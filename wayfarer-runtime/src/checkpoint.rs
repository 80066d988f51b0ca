//! In-process conversation checkpoints with one writer per thread.

use crate::error::CheckpointError;
use crate::metrics::Histogram;
use crate::types::{ConversationState, ThreadId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// What happens when a turn starts while another is in flight on the same thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPolicy {
    /// Reject with `CheckpointError::Busy`.
    #[default]
    FailFast,
    /// Wait for the in-flight turn to finish.
    Queue,
}

#[derive(Default)]
struct ThreadSlot {
    turn: Arc<tokio::sync::Mutex<()>>,
    state: RwLock<ConversationState>,
}

/// Conversation state keyed by thread id, for the lifetime of the process.
#[derive(Default)]
pub struct CheckpointStore {
    threads: Mutex<HashMap<ThreadId, Arc<ThreadSlot>>>,
    policy: TurnPolicy,
}

impl CheckpointStore {
    pub fn new(policy: TurnPolicy) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> TurnPolicy {
        self.policy
    }

    fn slot(&self, thread_id: &ThreadId) -> Arc<ThreadSlot> {
        let mut threads = self.threads.lock();
        Arc::clone(threads.entry(thread_id.clone()).or_default())
    }

    /// Snapshot of a thread's state; empty if the thread is unseen.
    pub fn load(&self, thread_id: &ThreadId) -> ConversationState {
        let slot = self.threads.lock().get(thread_id).cloned();
        slot.map(|s| s.state.read().clone()).unwrap_or_default()
    }

    /// Replace a thread's state, honoring the turn policy.
    pub async fn save(
        &self,
        thread_id: &ThreadId,
        state: ConversationState,
    ) -> Result<(), CheckpointError> {
        let guard = self.begin_turn(thread_id).await?;
        guard.commit(&state);
        Ok(())
    }

    /// Take exclusive write access to a thread for the duration of a turn.
    pub async fn begin_turn(&self, thread_id: &ThreadId) -> Result<TurnGuard, CheckpointError> {
        let start = Instant::now();
        let slot = self.slot(thread_id);
        let lock = Arc::clone(&slot.turn);

        let permit = match self.policy {
            TurnPolicy::FailFast => lock
                .try_lock_owned()
                .map_err(|_| CheckpointError::Busy(thread_id.clone()))?,
            TurnPolicy::Queue => lock.lock_owned().await,
        };

        let wait_time = start.elapsed();
        crate::metrics::record(Histogram::TurnWait, wait_time);
        debug!(thread_id = %thread_id, wait_ms = wait_time.as_millis() as u64, "turn guard acquired");

        Ok(TurnGuard {
            thread_id: thread_id.clone(),
            slot,
            wait_time,
            _permit: permit,
        })
    }

    /// Whether a turn currently holds the thread.
    pub fn is_busy(&self, thread_id: &ThreadId) -> bool {
        self.threads
            .lock()
            .get(thread_id)
            .map(|s| s.turn.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Known thread ids, sorted.
    pub fn threads(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.threads.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Exclusive write access to one thread. Released on drop.
pub struct TurnGuard {
    thread_id: ThreadId,
    slot: Arc<ThreadSlot>,
    wait_time: Duration,
    _permit: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn load(&self) -> ConversationState {
        self.slot.state.read().clone()
    }

    /// Persist a checkpoint.
    pub fn commit(&self, state: &ConversationState) {
        *self.slot.state.write() = state.clone();
    }
}
