//! Deduplicating work queue
//!
//! Event sources enqueue deployment keys; workers take them one at a time.
//! Invariants:
//! - a key is never ready more than once at a time
//! - a key is never handed to two workers at once; an enqueue during
//!   processing marks the key dirty and it is re-queued on `done`
//! - delayed keys become ready when their deadline passes

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::traits::DeploymentKey;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<DeploymentKey>,
    queued: HashSet<DeploymentKey>,
    in_flight: HashSet<DeploymentKey>,
    dirty: HashSet<DeploymentKey>,
    delayed: Vec<(Instant, DeploymentKey)>,
}

/// Work queue for deployment keys
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, collapsing duplicates. A key currently being processed is
    /// marked dirty instead and re-queued when its worker finishes.
    pub fn enqueue(&self, key: DeploymentKey) {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_flight.contains(&key) {
                state.dirty.insert(key);
                return;
            }
            if !state.queued.insert(key.clone()) {
                return;
            }
            state.ready.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Add a key that becomes ready after `delay`
    pub fn enqueue_after(&self, key: DeploymentKey, delay: Duration) {
        {
            let mut state = self.state.lock().unwrap();
            let already_waiting = state.queued.contains(&key)
                || state.delayed.iter().any(|(_, k)| *k == key);
            if already_waiting {
                return;
            }
            state.delayed.push((Instant::now() + delay, key));
        }
        // Wake a waiter so it recomputes its sleep deadline
        self.notify.notify_one();
    }

    /// Take the next ready key, waiting if none is available
    pub async fn next(&self) -> DeploymentKey {
        loop {
            let next_deadline = {
                let mut state = self.state.lock().unwrap();
                self.promote_due(&mut state);

                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    return key;
                }

                state.delayed.iter().map(|(at, _)| *at).min()
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Mark a key's processing finished, re-queueing it if it went dirty
    pub fn done(&self, key: &DeploymentKey) {
        let requeue = {
            let mut state = self.state.lock().unwrap();
            state.in_flight.remove(key);
            state.dirty.remove(key)
        };
        if requeue {
            self.enqueue(key.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.ready.is_empty() && state.delayed.is_empty() && state.in_flight.is_empty()
    }

    fn promote_due(&self, state: &mut QueueState) {
        let now = Instant::now();
        let mut index = 0;
        while index < state.delayed.len() {
            if state.delayed[index].0 <= now {
                let (_, key) = state.delayed.swap_remove(index);
                if state.in_flight.contains(&key) {
                    state.dirty.insert(key);
                } else if state.queued.insert(key.clone()) {
                    state.ready.push_back(key);
                }
            } else {
                index += 1;
            }
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-indexed): base * 2^attempt,
    /// capped at `max`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(32);
        self.base
            .checked_mul(2u32.saturating_pow(exp))
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> DeploymentKey {
        DeploymentKey::new("ns", name)
    }

    #[tokio::test]
    async fn test_enqueue_dedupes() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));

        assert_eq!(queue.next().await, key("a"));
        assert_eq!(queue.next().await, key("b"));
    }

    #[tokio::test]
    async fn test_in_flight_key_goes_dirty_and_requeues() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));

        let taken = queue.next().await;
        queue.enqueue(key("a"));
        assert!(!queue.is_empty());

        queue.done(&taken);
        assert_eq!(queue.next().await, key("a"));
    }

    #[tokio::test]
    async fn test_done_without_dirty_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));

        let taken = queue.next().await;
        queue.done(&taken);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_key_becomes_ready() {
        let queue = WorkQueue::new();
        queue.enqueue_after(key("a"), Duration::from_secs(5));

        let next = tokio::time::timeout(Duration::from_secs(10), queue.next())
            .await
            .unwrap();
        assert_eq!(next, key("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_enqueue_wins_over_delayed() {
        let queue = WorkQueue::new();
        queue.enqueue_after(key("slow"), Duration::from_secs(60));
        queue.enqueue(key("fast"));

        let next = tokio::time::timeout(Duration::from_secs(1), queue.next())
            .await
            .unwrap();
        assert_eq!(next, key("fast"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(16));
        assert_eq!(backoff.delay(20), Duration::from_secs(300));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(300));
    }
}
