//! Per-session deferred tasks
//!
//! Each session has at most one armed timer per kind. Arming again replaces
//! (and aborts) the previous task. A timer that fires removes its own entry
//! before running, so the work it triggers may cancel the session's other
//! timers without aborting itself.

use crate::types::SessionId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// What a timer guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Offer an AI opponent to a participant still waiting
    Fallback,
    /// Resolve a voting session with whatever votes exist
    VoteTimeout,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKind::Fallback => write!(f, "fallback"),
            TimerKind::VoteTimeout => write!(f, "vote-timeout"),
        }
    }
}

struct ArmedTimer {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    timers: HashMap<(SessionId, TimerKind), ArmedTimer>,
}

/// Registry of armed session timers
#[derive(Clone, Default)]
pub struct TimerRegistry {
    table: Arc<Mutex<TimerTable>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The table holds only handles; a poisoned lock leaves it consistent.
    fn table(&self) -> MutexGuard<'_, TimerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `task` after `delay` unless cancelled first
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(&self, session_id: SessionId, kind: TimerKind, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut table = self.table();
        table.next_generation += 1;
        let generation = table.next_generation;

        let registry = self.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !registry.disarm(session_id, kind, generation) {
                return;
            }
            info!("{} timer fired for session {}", kind, session_id);
            task.await;
        });

        let previous = table.timers.insert(
            (session_id, kind),
            ArmedTimer {
                generation,
                handle: join.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!("Re-armed {} timer for session {}", kind, session_id);
        } else {
            debug!(
                "Armed {} timer for session {} ({:?})",
                kind, session_id, delay
            );
        }
    }

    /// Remove the entry if it still belongs to `generation`
    fn disarm(&self, session_id: SessionId, kind: TimerKind, generation: u64) -> bool {
        let mut table = self.table();
        match table.timers.get(&(session_id, kind)) {
            Some(armed) if armed.generation == generation => {
                table.timers.remove(&(session_id, kind));
                true
            }
            _ => false,
        }
    }

    /// Abort one timer; returns whether one was armed
    pub fn cancel(&self, session_id: SessionId, kind: TimerKind) -> bool {
        match self.table().timers.remove(&(session_id, kind)) {
            Some(armed) => {
                armed.handle.abort();
                debug!("Cancelled {} timer for session {}", kind, session_id);
                true
            }
            None => false,
        }
    }

    /// Abort every timer of a session
    pub fn cancel_all(&self, session_id: SessionId) -> usize {
        [TimerKind::Fallback, TimerKind::VoteTimeout]
            .into_iter()
            .filter(|kind| self.cancel(session_id, *kind))
            .count()
    }

    pub fn is_armed(&self, session_id: SessionId, kind: TimerKind) -> bool {
        self.table().timers.contains_key(&(session_id, kind))
    }

    pub fn armed_count(&self) -> usize {
        self.table().timers.len()
    }

    /// Abort everything
    pub fn shutdown(&self) {
        let mut table = self.table();
        let count = table.timers.len();
        for (_, armed) in table.timers.drain() {
            armed.handle.abort();
        }
        if count > 0 {
            info!("Aborted {} armed session timers", count);
        }
    }
}
