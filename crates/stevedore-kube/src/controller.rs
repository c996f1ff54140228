//! Controller loop: workers draining the queue through the provisioner
//!
//! Each worker takes a key, runs a pass, and requeues per policy: converged
//! deployments come back on the resync interval, transient failures with
//! exponential backoff, and terminal content failures on a long fixed
//! interval since retrying cannot fix bad content.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info};

use crate::provisioner::{FailureClass, Provisioner, ReconcileFailure, ReconcileOutcome};
use crate::queue::{Backoff, WorkQueue};
use crate::traits::DeploymentKey;

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent workers
    pub workers: usize,

    /// Backoff schedule for transient failures
    pub backoff: Backoff,

    /// Periodic re-reconcile interval for converged deployments
    pub resync: Duration,

    /// Requeue interval after a terminal content failure
    pub content_error_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            backoff: Backoff::default(),
            resync: Duration::from_secs(300),
            content_error_requeue: Duration::from_secs(600),
        }
    }
}

/// When to see a key again after a pass. `attempt` counts consecutive
/// transient failures of this key, 0-indexed.
pub fn requeue_delay(
    config: &ControllerConfig,
    result: &Result<ReconcileOutcome, ReconcileFailure>,
    attempt: u32,
) -> Option<Duration> {
    match result {
        Ok(ReconcileOutcome::Converged { .. }) => Some(config.resync),
        Ok(ReconcileOutcome::Removed) | Ok(ReconcileOutcome::Skipped) => None,
        Err(failure) => match failure.class {
            FailureClass::Transient => Some(config.backoff.delay(attempt)),
            FailureClass::TerminalContent => Some(config.content_error_requeue),
        },
    }
}

/// Drives reconciliation workers over a shared queue
pub struct Controller {
    provisioner: Arc<Provisioner>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    failures: Mutex<HashMap<DeploymentKey, u32>>,
}

impl Controller {
    pub fn new(
        provisioner: Arc<Provisioner>,
        queue: Arc<WorkQueue>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            provisioner,
            queue,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Run all workers; never returns
    pub async fn run(&self) {
        info!(workers = self.config.workers, "controller started");
        let workers = (0..self.config.workers).map(|_| self.worker());
        futures::future::join_all(workers).await;
    }

    async fn worker(&self) {
        loop {
            let key = self.queue.next().await;
            let result = self.provisioner.reconcile(&key).await;

            let attempt = self.track_failures(&key, &result);
            match &result {
                Ok(outcome) => info!(deployment = %key, ?outcome, "reconciled"),
                Err(failure) => {
                    error!(deployment = %key, %failure, class = ?failure.class, "reconcile failed")
                }
            }

            // done() before the requeue so the delayed key is not swallowed
            // as dirty
            self.queue.done(&key);
            if let Some(delay) = requeue_delay(&self.config, &result, attempt) {
                self.queue.enqueue_after(key, delay);
            }
        }
    }

    /// Consecutive transient-failure count for this key, resetting on any
    /// other result
    fn track_failures(
        &self,
        key: &DeploymentKey,
        result: &Result<ReconcileOutcome, ReconcileFailure>,
    ) -> u32 {
        let mut failures = self.failures.lock().unwrap();
        match result {
            Err(failure) if failure.class == FailureClass::Transient => {
                let count = failures.entry(key.clone()).or_insert(0);
                let attempt = *count;
                *count = count.saturating_add(1);
                attempt
            }
            _ => {
                failures.remove(key);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ControllerConfig {
        ControllerConfig {
            workers: 1,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            resync: Duration::from_secs(300),
            content_error_requeue: Duration::from_secs(600),
        }
    }

    fn transient() -> ReconcileFailure {
        ReconcileFailure {
            message: "connection refused".to_string(),
            class: FailureClass::Transient,
        }
    }

    fn terminal() -> ReconcileFailure {
        ReconcileFailure {
            message: "gzip: invalid header".to_string(),
            class: FailureClass::TerminalContent,
        }
    }

    #[test]
    fn test_converged_requeues_at_resync() {
        let result = Ok(ReconcileOutcome::Converged { mutated: false });
        assert_eq!(
            requeue_delay(&config(), &result, 0),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_removed_and_skipped_never_requeue() {
        assert_eq!(requeue_delay(&config(), &Ok(ReconcileOutcome::Removed), 0), None);
        assert_eq!(requeue_delay(&config(), &Ok(ReconcileOutcome::Skipped), 0), None);
    }

    #[test]
    fn test_transient_failures_back_off_exponentially() {
        let config = config();
        assert_eq!(
            requeue_delay(&config, &Err(transient()), 0),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            requeue_delay(&config, &Err(transient()), 3),
            Some(Duration::from_secs(8))
        );
        assert_eq!(
            requeue_delay(&config, &Err(transient()), 30),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_terminal_content_requeues_on_fixed_interval() {
        let config = config();
        // Not affected by the attempt count
        assert_eq!(
            requeue_delay(&config, &Err(terminal()), 0),
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            requeue_delay(&config, &Err(terminal()), 9),
            Some(Duration::from_secs(600))
        );
    }
}
