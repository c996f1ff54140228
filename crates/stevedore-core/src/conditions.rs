//! Status conditions and their transition rules
//!
//! Two condition types are authoritative for a bundle deployment:
//! `HasValidBundle` (fetch + validate outcome) and `Installed` (render +
//! apply outcome). Conditions are overwritten per type on every pass, never
//! appended, and `lastTransitionTime` moves only when the status changes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type: did fetch + unpack + validate succeed
pub const TYPE_HAS_VALID_BUNDLE: &str = "HasValidBundle";
/// Condition type: did render + apply succeed
pub const TYPE_INSTALLED: &str = "Installed";

pub const REASON_UNPACK_FAILED: &str = "UnpackFailed";
pub const REASON_UNPACK_SUCCESSFUL: &str = "UnpackSuccessful";
pub const REASON_INSTALLATION_SUCCEEDED: &str = "InstallationSucceeded";
pub const REASON_INSTALL_FAILED: &str = "InstallFailed";

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A structured status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (`HasValidBundle` or `Installed`)
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    /// Machine-readable reason for the current status
    pub reason: String,

    /// Human-readable message; carries the literal underlying error text for
    /// fetch/decompress/lint failures
    pub message: String,

    /// When `status` last changed (not when the condition was last written)
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Find the condition of a given type
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Overwrite the condition of `new.condition_type`, preserving the previous
/// `lastTransitionTime` when the status did not change.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut new: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time;
            }
            *existing = new;
        }
        None => conditions.push(new),
    }
}

/// Internal per-deployment reconciliation state.
///
/// The failure counter backs the flap debounce: a prior `Installed=True` is
/// downgraded only after a configurable number of consecutive failures, so a
/// transient apply error does not flip a healthy deployment's status.
#[derive(Debug, Clone, Default)]
pub struct ReconcileState {
    pub consecutive_install_failures: u32,
}

impl ReconcileState {
    /// Record an install failure and return whether `Installed=True` should
    /// now be downgraded given the configured threshold.
    pub fn record_install_failure(&mut self, flap_threshold: u32) -> bool {
        self.consecutive_install_failures = self.consecutive_install_failures.saturating_add(1);
        self.consecutive_install_failures >= flap_threshold
    }

    pub fn reset_install_failures(&mut self) {
        self.consecutive_install_failures = 0;
    }
}
