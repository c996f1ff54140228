//! Drift detection: routing child-resource events back to their deployment
//!
//! Applied resources carry ownership labels. Watching those resources and
//! mapping each event back to its owning deployment key is what turns manual
//! edits and deletions into reconcile passes.

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use stevedore_core::ResourceRef;
use tracing::debug;

use crate::queue::WorkQueue;
use crate::reconciler::{OWNER_LABEL, OWNER_NAMESPACE_LABEL};
use crate::traits::DeploymentKey;

/// One observed change to a watched child resource
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub reference: ResourceRef,
    pub labels: BTreeMap<String, String>,
    pub deleted: bool,
}

/// The deployment owning a resource, read from its ownership labels.
/// Resources without both labels belong to no deployment.
pub fn owner_of(event: &ResourceEvent) -> Option<DeploymentKey> {
    let name = event.labels.get(OWNER_LABEL)?;
    let namespace = event.labels.get(OWNER_NAMESPACE_LABEL)?;
    Some(DeploymentKey::new(namespace.clone(), name.clone()))
}

/// Drain a resource event stream into the work queue.
///
/// Runs until the stream ends; spawn one pump per watched resource kind.
pub async fn pump<S>(mut events: S, queue: &WorkQueue)
where
    S: Stream<Item = ResourceEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        if let Some(owner) = owner_of(&event) {
            debug!(
                resource = %event.reference,
                deleted = event.deleted,
                owner = %owner,
                "drift event",
            );
            queue.enqueue(owner);
        }
    }
}
