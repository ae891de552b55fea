//! Change-event delivery.
//!
//! The [`crate::Workspace`] records resource mutations and, when the outermost transaction ends,
//! delivers one [`ResourceDelta`] tree to every registered [`ResourceObserver`]. Each batch is
//! delivered twice: first as [`ResourceEventKind::PreBuild`], then as
//! [`ResourceEventKind::PostChange`]. Both events carry the same batch id so consumers can tell
//! whether they already translated a batch.
//!
//! Delivery is synchronous, on the thread that ended the transaction, with no workspace lock held.
//! Observers may read the workspace from inside the callback.

use std::sync::Arc;

use crate::change::ResourceDelta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceEventKind {
    PreBuild,
    PostChange,
}

/// A change event delivered to [`ResourceObserver`]s.
#[derive(Debug, Clone)]
pub struct ResourceChangeEvent {
    pub kind: ResourceEventKind,
    pub batch: u64,
    pub delta: Arc<ResourceDelta>,
}

pub trait ResourceObserver: Send + Sync {
    fn resource_changed(&self, event: &ResourceChangeEvent);
}

impl<F> ResourceObserver for F
where
    F: Fn(&ResourceChangeEvent) + Send + Sync,
{
    fn resource_changed(&self, event: &ResourceChangeEvent) {
        self(event)
    }
}
