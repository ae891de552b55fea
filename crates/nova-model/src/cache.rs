//! Handle -> info tables.
//!
//! The model, projects, roots and members live in plain maps; packages, compilation units and
//! class files (the *openables*) live in an LRU with a soft capacity. The presence of an entry is
//! what makes an element open.
//!
//! The cache never holds an info whose parent has no info: evicting or closing an element
//! removes its whole subtree, children first.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;

use crate::handle::{ElementHandle, ElementKind};
use crate::info::ElementInfo;

#[derive(Debug)]
pub(crate) struct ModelCache {
    model: Option<Arc<ElementInfo>>,
    projects: HashMap<ElementHandle, Arc<ElementInfo>>,
    roots: HashMap<ElementHandle, Arc<ElementInfo>>,
    openables: LruCache<ElementHandle, Arc<ElementInfo>>,
    members: HashMap<ElementHandle, Arc<ElementInfo>>,
    openable_capacity: usize,
}

enum Table {
    Model,
    Projects,
    Roots,
    Openables,
    Members,
}

fn table(kind: ElementKind) -> Table {
    match kind {
        ElementKind::Model => Table::Model,
        ElementKind::Project => Table::Projects,
        ElementKind::Root => Table::Roots,
        ElementKind::Package | ElementKind::CompilationUnit | ElementKind::ClassFile => {
            Table::Openables
        }
        _ => Table::Members,
    }
}

impl ModelCache {
    pub(crate) fn new(openable_capacity: usize) -> Self {
        Self {
            model: None,
            projects: HashMap::new(),
            roots: HashMap::new(),
            openables: LruCache::unbounded(),
            members: HashMap::new(),
            openable_capacity: openable_capacity.max(1),
        }
    }

    /// Looks up `handle` without touching LRU order.
    pub(crate) fn peek(&self, handle: &ElementHandle) -> Option<&Arc<ElementInfo>> {
        match table(handle.kind()) {
            Table::Model => self.model.as_ref(),
            Table::Projects => self.projects.get(handle),
            Table::Roots => self.roots.get(handle),
            Table::Openables => self.openables.peek(handle),
            Table::Members => self.members.get(handle),
        }
    }

    /// Looks up `handle`, marking openables as recently used.
    pub(crate) fn get(&mut self, handle: &ElementHandle) -> Option<Arc<ElementInfo>> {
        match table(handle.kind()) {
            Table::Openables => self.openables.get(handle).cloned(),
            _ => self.peek(handle).cloned(),
        }
    }

    pub(crate) fn contains(&self, handle: &ElementHandle) -> bool {
        self.peek(handle).is_some()
    }

    /// Whether `handle` may be published: the model root always, anything else only below an
    /// open parent.
    pub(crate) fn parent_is_open(&self, handle: &ElementHandle) -> bool {
        match handle.parent() {
            Some(parent) => self.contains(parent),
            None => true,
        }
    }

    fn insert_raw(&mut self, handle: ElementHandle, info: Arc<ElementInfo>) {
        match table(handle.kind()) {
            Table::Model => self.model = Some(info),
            Table::Projects => {
                self.projects.insert(handle, info);
            }
            Table::Roots => {
                self.roots.insert(handle, info);
            }
            Table::Openables => {
                self.openables.put(handle, info);
            }
            Table::Members => {
                self.members.insert(handle, info);
            }
        }
    }

    fn remove_raw(&mut self, handle: &ElementHandle) -> Option<Arc<ElementInfo>> {
        match table(handle.kind()) {
            Table::Model => self.model.take(),
            Table::Projects => self.projects.remove(handle),
            Table::Roots => self.roots.remove(handle),
            Table::Openables => self.openables.pop(handle),
            Table::Members => self.members.remove(handle),
        }
    }

    /// Publishes `handle`'s info together with the infos of members built with it.
    ///
    /// Returns the number of openables evicted to get back under capacity.
    pub(crate) fn publish(
        &mut self,
        handle: ElementHandle,
        info: ElementInfo,
        members: Vec<(ElementHandle, ElementInfo)>,
    ) -> usize {
        let members = members
            .into_iter()
            .map(|(member, member_info)| (member, Arc::new(member_info)))
            .collect();
        self.publish_shared(handle, Arc::new(info), members)
    }

    /// [`ModelCache::publish`] for infos the caller keeps a reference to.
    pub(crate) fn publish_shared(
        &mut self,
        handle: ElementHandle,
        info: Arc<ElementInfo>,
        members: Vec<(ElementHandle, Arc<ElementInfo>)>,
    ) -> usize {
        for (member, member_info) in members {
            self.insert_raw(member, member_info);
        }
        let is_openable = matches!(table(handle.kind()), Table::Openables);
        self.insert_raw(handle.clone(), info);
        if is_openable {
            self.evict_over_capacity(&handle)
        } else {
            0
        }
    }

    fn evict_over_capacity(&mut self, keep: &ElementHandle) -> usize {
        let excess = self.openables.len().saturating_sub(self.openable_capacity);
        if excess == 0 {
            return 0;
        }
        let victims: Vec<ElementHandle> = self
            .openables
            .iter()
            .rev()
            .map(|(handle, _)| handle)
            .filter(|handle| *handle != keep && !handle.is_ancestor_of(keep))
            .take(excess)
            .cloned()
            .collect();
        let mut evicted = 0;
        for victim in victims {
            if self.contains(&victim) {
                evicted += self.remove_subtree(&victim).len();
            }
        }
        tracing::trace!(target = "nova.model.cache", evicted, "evicted openables");
        evicted
    }

    /// Removes `handle` and everything below it, children first. Returns the removed entries in
    /// removal order.
    pub(crate) fn remove_subtree(&mut self, handle: &ElementHandle) -> Vec<(ElementHandle, Arc<ElementInfo>)> {
        let mut removed = Vec::new();
        self.remove_subtree_into(handle, &mut removed);
        removed
    }

    fn remove_subtree_into(
        &mut self,
        handle: &ElementHandle,
        removed: &mut Vec<(ElementHandle, Arc<ElementInfo>)>,
    ) {
        let Some(children) = self.peek(handle).map(|info| info.children.clone()) else {
            return;
        };
        for child in &children {
            self.remove_subtree_into(child, removed);
        }
        if let Some(info) = self.remove_raw(handle) {
            removed.push((handle.clone(), info));
        }
    }

    /// Applies `f` to the cached info of `handle` (copy-on-write). Returns `false` if closed.
    pub(crate) fn update(&mut self, handle: &ElementHandle, f: impl FnOnce(&mut ElementInfo)) -> bool {
        let slot = match table(handle.kind()) {
            Table::Model => self.model.as_mut(),
            Table::Projects => self.projects.get_mut(handle),
            Table::Roots => self.roots.get_mut(handle),
            Table::Openables => self.openables.peek_mut(handle),
            Table::Members => self.members.get_mut(handle),
        };
        match slot {
            Some(info) => {
                f(Arc::make_mut(info));
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        usize::from(self.model.is_some())
            + self.projects.len()
            + self.roots.len()
            + self.openables.len()
            + self.members.len()
    }

    pub(crate) fn openable_len(&self) -> usize {
        self.openables.len()
    }
}
