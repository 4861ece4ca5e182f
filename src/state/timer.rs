use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

use dashmap::DashMap;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Bookkeeping for one armed countdown.
struct TimerSlot {
    generation: u64,
    ends_at: SystemTime,
    handle: AbortHandle,
}

/// Registry of armed countdowns keyed by session id.
///
/// At most one tick loop is registered per session. Every arm gets a fresh
/// generation so a loop can tell whether it is still the current one.
#[derive(Default)]
pub struct TimerRegistry {
    slots: DashMap<Uuid, TimerSlot>,
    next_generation: AtomicU64,
}

impl TimerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a generation number for an upcoming tick loop.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a tick loop, aborting any loop previously armed for the session.
    pub fn install(&self, session_id: Uuid, generation: u64, ends_at: SystemTime, handle: AbortHandle) {
        let previous = self.slots.insert(
            session_id,
            TimerSlot {
                generation,
                ends_at,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Abort and forget the loop armed for the session. Returns whether one was armed.
    pub fn disarm(&self, session_id: Uuid) -> bool {
        match self.slots.remove(&session_id) {
            Some((_, slot)) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the slot without aborting it, used by a loop that is finishing on its own.
    ///
    /// Only removes the slot when it still belongs to `generation`.
    pub fn release(&self, session_id: Uuid, generation: u64) -> bool {
        self.slots
            .remove_if(&session_id, |_, slot| slot.generation == generation)
            .is_some()
    }

    /// Run `f` only while `generation` is the armed loop for the session.
    ///
    /// The slot stays locked for the duration of `f`, so a concurrent
    /// [`disarm`](Self::disarm) either happens before (and `f` is skipped) or
    /// waits until `f` returns.
    pub fn if_current<R>(&self, session_id: Uuid, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let slot = self.slots.get(&session_id)?;
        if slot.generation != generation {
            return None;
        }
        let result = f();
        drop(slot);
        Some(result)
    }

    /// Deadline of the armed loop, if any.
    pub fn ends_at(&self, session_id: Uuid) -> Option<SystemTime> {
        self.slots.get(&session_id).map(|slot| slot.ends_at)
    }

    /// Whether a loop is armed for the session.
    pub fn is_armed(&self, session_id: Uuid) -> bool {
        self.slots.contains_key(&session_id)
    }

    /// Number of sessions with an armed loop.
    pub fn armed_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parked_task() -> tokio::task::JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    #[tokio::test]
    async fn install_aborts_previous_loop() {
        let registry = TimerRegistry::new();
        let session_id = Uuid::new_v4();
        let first = parked_task();
        let second = parked_task();

        registry.install(session_id, registry.next_generation(), SystemTime::now(), first.abort_handle());
        registry.install(session_id, registry.next_generation(), SystemTime::now(), second.abort_handle());

        assert!(first.await.unwrap_err().is_cancelled());
        assert!(registry.is_armed(session_id));
        assert_eq!(registry.armed_count(), 1);
        registry.disarm(session_id);
        assert!(second.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn disarm_aborts_and_forgets() {
        let registry = TimerRegistry::new();
        let session_id = Uuid::new_v4();
        let task = parked_task();
        registry.install(session_id, registry.next_generation(), SystemTime::now(), task.abort_handle());

        assert!(registry.disarm(session_id));
        assert!(!registry.disarm(session_id));
        assert!(!registry.is_armed(session_id));
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn release_ignores_stale_generation() {
        let registry = TimerRegistry::new();
        let session_id = Uuid::new_v4();
        let task = parked_task();
        let generation = registry.next_generation();
        registry.install(session_id, generation, SystemTime::now(), task.abort_handle());

        assert!(!registry.release(session_id, generation + 1));
        assert!(registry.is_armed(session_id));
        assert!(registry.release(session_id, generation));
        assert!(!registry.is_armed(session_id));
        task.abort();
    }

    #[tokio::test]
    async fn if_current_skips_other_generations() {
        let registry = TimerRegistry::new();
        let session_id = Uuid::new_v4();
        let task = parked_task();
        let generation = registry.next_generation();
        registry.install(session_id, generation, SystemTime::now(), task.abort_handle());

        assert_eq!(registry.if_current(session_id, generation, || 7), Some(7));
        assert_eq!(registry.if_current(session_id, generation + 1, || 7), None);
        registry.disarm(session_id);
        assert_eq!(registry.if_current(session_id, generation, || 7), None);
    }
}
