//! Element change listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use nova_vfs::{ResourceChangeEvent, ResourceEventKind, ResourceObserver};
use parking_lot::Mutex;

use crate::delta::ElementDelta;
use crate::manager::ModelManager;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const POST_CHANGE = 0x1;
        const PRE_AUTO_BUILD = 0x2;
    }
}

/// Which passes a firing runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireKind {
    /// A `PRE_AUTO_BUILD` pass followed by a `POST_CHANGE` pass with the same delta.
    Default,
    PreAutoBuild,
    PostChange,
}

#[derive(Clone, Debug)]
pub struct ElementChangedEvent {
    pub delta: Arc<ElementDelta>,
    pub kind: EventMask,
}

pub trait ElementChangedListener: Send + Sync {
    fn element_changed(&self, event: &ElementChangedEvent);
}

impl<F> ElementChangedListener for F
where
    F: Fn(&ElementChangedEvent) + Send + Sync,
{
    fn element_changed(&self, event: &ElementChangedEvent) {
        self(event)
    }
}

/// Search scopes cache derived data (e.g. the set of enclosing projects) and are refreshed with
/// every merged delta before listeners run.
pub trait SearchScope: Send + Sync {
    fn process_delta(&self, delta: &ElementDelta);
}

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    listener: Arc<dyn ElementChangedListener>,
    mask: EventMask,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Arc<Vec<ListenerEntry>>,
}

/// Listener table plus the weakly held search scopes.
///
/// Listeners are stored copy-on-write: a firing iterates the snapshot taken when it started, so
/// listeners may add or remove listeners (including themselves) from their callback.
#[derive(Default)]
pub(crate) struct Notifier {
    registry: Mutex<Registry>,
    scopes: Mutex<Vec<Weak<dyn SearchScope>>>,
}

impl Notifier {
    /// Adds `listener`, or updates its mask if it is already registered.
    pub(crate) fn add(&self, listener: Arc<dyn ElementChangedListener>, mask: EventMask) {
        let mut registry = self.registry.lock();
        let mut entries = (*registry.entries).clone();
        if let Some(existing) = entries
            .iter_mut()
            .find(|entry| Arc::ptr_eq(&entry.listener, &listener))
        {
            existing.mask = mask;
        } else {
            registry.next_id += 1;
            entries.push(ListenerEntry {
                id: registry.next_id,
                listener,
                mask,
            });
        }
        registry.entries = Arc::new(entries);
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn ElementChangedListener>) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.entries.len();
        let entries: Vec<ListenerEntry> = registry
            .entries
            .iter()
            .filter(|entry| !Arc::ptr_eq(&entry.listener, listener))
            .cloned()
            .collect();
        let removed = entries.len() != before;
        registry.entries = Arc::new(entries);
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    fn snapshot(&self) -> Arc<Vec<ListenerEntry>> {
        Arc::clone(&self.registry.lock().entries)
    }

    fn is_registered(&self, id: u64) -> bool {
        self.registry.lock().entries.iter().any(|entry| entry.id == id)
    }

    pub(crate) fn register_scope(&self, scope: Weak<dyn SearchScope>) {
        self.scopes.lock().push(scope);
    }

    fn refresh_scopes(&self, delta: &ElementDelta) {
        let live: Vec<Arc<dyn SearchScope>> = {
            let mut scopes = self.scopes.lock();
            scopes.retain(|scope| scope.strong_count() > 0);
            scopes.iter().filter_map(Weak::upgrade).collect()
        };
        for scope in live {
            scope.process_delta(delta);
        }
    }

    /// Notifies listeners of `delta` according to `kind`.
    pub(crate) fn fire(&self, delta: Arc<ElementDelta>, kind: FireKind) {
        self.refresh_scopes(&delta);
        let snapshot = self.snapshot();
        match kind {
            FireKind::Default => {
                self.notify(&snapshot, &delta, EventMask::PRE_AUTO_BUILD, false);
                self.notify(&snapshot, &delta, EventMask::POST_CHANGE, true);
            }
            FireKind::PreAutoBuild => {
                self.notify(&snapshot, &delta, EventMask::PRE_AUTO_BUILD, false)
            }
            FireKind::PostChange => self.notify(&snapshot, &delta, EventMask::POST_CHANGE, false),
        }
    }

    fn notify(
        &self,
        snapshot: &[ListenerEntry],
        delta: &Arc<ElementDelta>,
        kind: EventMask,
        skip_removed: bool,
    ) {
        let event = ElementChangedEvent {
            delta: Arc::clone(delta),
            kind,
        };
        for entry in snapshot {
            if !entry.mask.intersects(kind) {
                continue;
            }
            if skip_removed && !self.is_registered(entry.id) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| entry.listener.element_changed(&event)));
            if outcome.is_err() {
                tracing::error!(
                    target = "nova.model",
                    listener = entry.id,
                    ?kind,
                    "element change listener panicked"
                );
            }
        }
    }
}

/// Bridges host resource events into delta processing.
pub(crate) struct ResourceEventAdapter {
    pub(crate) manager: Weak<ModelManager>,
}

impl ResourceObserver for ResourceEventAdapter {
    fn resource_changed(&self, event: &ResourceChangeEvent) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        match event.kind {
            ResourceEventKind::PreBuild => {
                manager.translate_batch(event.batch, &event.delta);
                manager.fire(FireKind::PreAutoBuild);
            }
            ResourceEventKind::PostChange => {
                manager.translate_batch(event.batch, &event.delta);
                manager.fire(FireKind::PostChange);
                manager.finish_batch(event.batch);
            }
        }
    }
}
