//! Element delta trees.
//!
//! A delta tree is rooted at some element (normally the model) and records, per affected
//! element, whether it was added, removed or changed plus detail flags. Deltas are inserted with
//! [`ElementDelta::insert_delta_tree`], which synthesizes `CHANGED | CHILDREN` ancestors as needed
//! and merges with an existing node for the same element.
//!
//! Merge rules for an existing child `old` and an incoming delta `new` of the same element:
//!
//! | old \ new | ADDED    | REMOVED  | CHANGED         |
//! |-----------|----------|----------|-----------------|
//! | ADDED     | ADDED    | dropped  | ADDED           |
//! | REMOVED   | CHANGED  | REMOVED  | REMOVED         |
//! | CHANGED   | new      | new      | merged children |
//!
//! A parent that is itself ADDED or REMOVED does not accumulate children.

use std::fmt;

use bitflags::bitflags;
use nova_vfs::ResourceDelta;

use crate::handle::{ElementHandle, ElementKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Removed,
    Changed,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeltaFlags: u32 {
        const CONTENT = 0x0001;
        const MODIFIERS = 0x0002;
        const CHILDREN = 0x0008;
        const MOVED_FROM = 0x0010;
        const MOVED_TO = 0x0020;
        const ADDED_TO_CLASSPATH = 0x0040;
        const REMOVED_FROM_CLASSPATH = 0x0080;
        const CLASSPATH_REORDER = 0x0100;
        const OPENED = 0x0200;
        const CLOSED = 0x0400;
        const SOURCE_ATTACHED = 0x1000;
        const SOURCE_DETACHED = 0x2000;
        const FINE_GRAINED = 0x4000;
        const ARCHIVE_CONTENT_CHANGED = 0x8000;
        const CLASSPATH_CHANGED = 0x20000;
        const NON_JAVA_RESOURCES = 0x40000;
    }
}

const FLAG_NAMES: &[(DeltaFlags, &str)] = &[
    (DeltaFlags::CHILDREN, "CHILDREN"),
    (DeltaFlags::CONTENT, "CONTENT"),
    (DeltaFlags::MODIFIERS, "MODIFIERS"),
    (DeltaFlags::MOVED_FROM, "MOVED_FROM"),
    (DeltaFlags::MOVED_TO, "MOVED_TO"),
    (DeltaFlags::ADDED_TO_CLASSPATH, "ADDED TO CLASSPATH"),
    (DeltaFlags::REMOVED_FROM_CLASSPATH, "REMOVED FROM CLASSPATH"),
    (DeltaFlags::CLASSPATH_REORDER, "REORDERED IN CLASSPATH"),
    (DeltaFlags::OPENED, "OPENED"),
    (DeltaFlags::CLOSED, "CLOSED"),
    (DeltaFlags::SOURCE_ATTACHED, "SOURCE ATTACHED"),
    (DeltaFlags::SOURCE_DETACHED, "SOURCE DETACHED"),
    (DeltaFlags::FINE_GRAINED, "FINE GRAINED"),
    (DeltaFlags::ARCHIVE_CONTENT_CHANGED, "ARCHIVE CONTENT CHANGED"),
    (DeltaFlags::CLASSPATH_CHANGED, "RESOLVED CLASSPATH CHANGED"),
    (DeltaFlags::NON_JAVA_RESOURCES, "NON-JAVA RESOURCES"),
];

#[derive(Clone, Debug)]
pub struct ElementDelta {
    element: ElementHandle,
    kind: DeltaKind,
    flags: DeltaFlags,
    children: Vec<ElementDelta>,
    moved_from: Option<ElementHandle>,
    moved_to: Option<ElementHandle>,
    resource_deltas: Vec<ResourceDelta>,
}

impl ElementDelta {
    /// An empty `CHANGED` delta for `element`, usable as a tree root.
    pub fn new(element: ElementHandle) -> Self {
        Self {
            element,
            kind: DeltaKind::Changed,
            flags: DeltaFlags::empty(),
            children: Vec::new(),
            moved_from: None,
            moved_to: None,
            resource_deltas: Vec::new(),
        }
    }

    fn with_kind(element: ElementHandle, kind: DeltaKind, flags: DeltaFlags) -> Self {
        Self {
            kind,
            flags,
            ..Self::new(element)
        }
    }

    pub fn element(&self) -> &ElementHandle {
        &self.element
    }

    pub fn kind(&self) -> DeltaKind {
        self.kind
    }

    pub fn flags(&self) -> DeltaFlags {
        self.flags
    }

    pub fn affected_children(&self) -> &[ElementDelta] {
        &self.children
    }

    pub fn added_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children_of_kind(DeltaKind::Added)
    }

    pub fn removed_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children_of_kind(DeltaKind::Removed)
    }

    pub fn changed_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children_of_kind(DeltaKind::Changed)
    }

    fn children_of_kind(&self, kind: DeltaKind) -> impl Iterator<Item = &ElementDelta> {
        self.children.iter().filter(move |child| child.kind == kind)
    }

    /// Element this one was moved from (set on `ADDED | MOVED_FROM` deltas).
    pub fn moved_from_element(&self) -> Option<&ElementHandle> {
        self.moved_from.as_ref()
    }

    /// Element this one was moved to (set on `REMOVED | MOVED_TO` deltas).
    pub fn moved_to_element(&self) -> Option<&ElementHandle> {
        self.moved_to.as_ref()
    }

    /// Host resource deltas folded into this node (`NON_JAVA_RESOURCES`).
    pub fn resource_deltas(&self) -> &[ResourceDelta] {
        &self.resource_deltas
    }

    /// Whether this tree records nothing.
    pub fn is_empty(&self) -> bool {
        self.kind == DeltaKind::Changed
            && self.flags.is_empty()
            && self.children.is_empty()
            && self.resource_deltas.is_empty()
    }

    /// Depth-first search for the node describing `element`.
    pub fn find(&self, element: &ElementHandle) -> Option<&ElementDelta> {
        if &self.element == element {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(element))
    }

    fn find_mut(&mut self, element: &ElementHandle) -> Option<&mut ElementDelta> {
        if &self.element == element {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(element))
    }

    /// Every node of the tree, pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &ElementDelta> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    pub fn added(&mut self, element: &ElementHandle) {
        self.added_with_flags(element, DeltaFlags::empty());
    }

    pub fn added_with_flags(&mut self, element: &ElementHandle, flags: DeltaFlags) {
        let delta = Self::with_kind(element.clone(), DeltaKind::Added, flags);
        self.insert_delta_tree(element, delta);
    }

    /// Records `element` as removed. Any change already recorded below it is discarded.
    pub fn removed(&mut self, element: &ElementHandle) {
        self.removed_with_flags(element, DeltaFlags::empty());
    }

    pub fn removed_with_flags(&mut self, element: &ElementHandle, flags: DeltaFlags) {
        self.insert_delta_tree(element, Self::new(element.clone()));
        if let Some(actual) = self.find_mut(element) {
            actual.kind = DeltaKind::Removed;
            actual.flags = flags;
            actual.children.clear();
        }
    }

    pub fn changed(&mut self, element: &ElementHandle, flags: DeltaFlags) {
        let delta = Self::with_kind(element.clone(), DeltaKind::Changed, flags);
        self.insert_delta_tree(element, delta);
    }

    pub fn opened(&mut self, element: &ElementHandle) {
        self.changed(element, DeltaFlags::OPENED);
    }

    pub fn closed(&mut self, element: &ElementHandle) {
        self.changed(element, DeltaFlags::CLOSED);
    }

    /// Records that `moved_from_element` went away to `moved_to_element`: a `REMOVED | MOVED_TO`
    /// delta on the old element.
    pub fn moved_from(
        &mut self,
        moved_from_element: &ElementHandle,
        moved_to_element: &ElementHandle,
        flags: DeltaFlags,
    ) {
        let mut delta = Self::with_kind(
            moved_from_element.clone(),
            DeltaKind::Removed,
            flags | DeltaFlags::MOVED_TO,
        );
        delta.moved_to = Some(moved_to_element.clone());
        self.insert_delta_tree(moved_from_element, delta);
    }

    /// Records that `moved_to_element` arrived from `moved_from_element`: an `ADDED | MOVED_FROM`
    /// delta on the new element.
    pub fn moved_to(
        &mut self,
        moved_to_element: &ElementHandle,
        moved_from_element: &ElementHandle,
        flags: DeltaFlags,
    ) {
        let mut delta = Self::with_kind(
            moved_to_element.clone(),
            DeltaKind::Added,
            flags | DeltaFlags::MOVED_FROM,
        );
        delta.moved_from = Some(moved_from_element.clone());
        self.insert_delta_tree(moved_to_element, delta);
    }

    /// Folds a host resource change with no element of its own into `element`.
    pub fn non_java_resource_changed(&mut self, element: &ElementHandle, resource: ResourceDelta) {
        let mut delta =
            Self::with_kind(element.clone(), DeltaKind::Changed, DeltaFlags::NON_JAVA_RESOURCES);
        delta.resource_deltas.push(resource);
        self.insert_delta_tree(element, delta);
    }

    /// Grafts `delta` (describing `element`) into this tree.
    ///
    /// Ancestors between the tree root and `element` that have no node yet get a `CHANGED`
    /// node. Elements that are not descendants of the root are ignored (returns `false`). If
    /// `element` is the root itself, the root's kind, flags and move targets are overwritten;
    /// flags of two `CHANGED` deltas are combined instead.
    pub fn insert_delta_tree(&mut self, element: &ElementHandle, delta: ElementDelta) -> bool {
        if element == &self.element {
            if self.kind == DeltaKind::Changed && delta.kind == DeltaKind::Changed {
                self.flags |= delta.flags;
            } else {
                self.kind = delta.kind;
                self.flags = delta.flags;
            }
            self.moved_from = delta.moved_from;
            self.moved_to = delta.moved_to;
            self.resource_deltas.extend(delta.resource_deltas);
            for child in delta.children {
                self.add_affected_child(child);
            }
            return true;
        }

        let mut ancestors: Vec<&ElementHandle> = Vec::new();
        let mut reached_root = false;
        for ancestor in element.ancestors() {
            if ancestor == &self.element {
                reached_root = true;
                break;
            }
            ancestors.push(ancestor);
        }
        if !reached_root {
            tracing::trace!(
                target = "nova.model.delta",
                element = ?element,
                root = ?self.element,
                "ignoring delta outside of tree"
            );
            return false;
        }

        let mut child = delta;
        for ancestor in ancestors {
            let mut parent = ElementDelta::new(ancestor.clone());
            parent.add_affected_child(child);
            child = parent;
        }
        self.add_affected_child(child);
        true
    }

    fn add_affected_child(&mut self, child: ElementDelta) {
        match self.kind {
            DeltaKind::Added | DeltaKind::Removed => return,
            DeltaKind::Changed => self.flags |= DeltaFlags::CHILDREN,
        }
        if self.element.kind() >= ElementKind::CompilationUnit {
            self.flags |= DeltaFlags::FINE_GRAINED;
        }

        let Some(idx) = self
            .children
            .iter()
            .position(|existing| existing.element == child.element)
        else {
            self.children.push(child);
            return;
        };

        let existing = &mut self.children[idx];
        match (existing.kind, child.kind) {
            (DeltaKind::Added, DeltaKind::Added | DeltaKind::Changed) => {}
            (DeltaKind::Added, DeltaKind::Removed) => {
                self.children.remove(idx);
            }
            (DeltaKind::Removed, DeltaKind::Added) => {
                let mut child = child;
                child.kind = DeltaKind::Changed;
                *existing = child;
            }
            (DeltaKind::Removed, _) => {}
            (DeltaKind::Changed, DeltaKind::Added | DeltaKind::Removed) => {
                *existing = child;
            }
            (DeltaKind::Changed, DeltaKind::Changed) => {
                let had_children = existing.flags.contains(DeltaFlags::CHILDREN);
                for grandchild in child.children {
                    existing.add_affected_child(grandchild);
                }
                existing.flags |= child.flags;
                if had_children && child.flags.contains(DeltaFlags::CONTENT) {
                    existing.flags.remove(DeltaFlags::CONTENT);
                }
                existing.resource_deltas.extend(child.resource_deltas);
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let marker = match self.kind {
            DeltaKind::Added => '+',
            DeltaKind::Removed => '-',
            DeltaKind::Changed => '*',
        };
        write!(f, "{:indent$}{}[{}]: {{", "", self.element, marker, indent = depth * 4)?;
        let mut first = true;
        for (flag, name) in FLAG_NAMES {
            if !self.flags.contains(*flag) {
                continue;
            }
            if !first {
                f.write_str(" | ")?;
            }
            first = false;
            match (&self.moved_from, &self.moved_to) {
                (Some(from), _) if *flag == DeltaFlags::MOVED_FROM => {
                    write!(f, "MOVED_FROM({from})")?
                }
                (_, Some(to)) if *flag == DeltaFlags::MOVED_TO => write!(f, "MOVED_TO({to})")?,
                _ => f.write_str(name)?,
            }
        }
        writeln!(f, "}}")?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        for resource in &self.resource_deltas {
            writeln!(
                f,
                "{:indent$}ResourceDelta({})",
                "",
                resource.path(),
                indent = (depth + 1) * 4
            )?;
        }
        Ok(())
    }
}

impl PartialEq for ElementDelta {
    /// Sibling order is not significant.
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element
            && self.kind == other.kind
            && self.flags == other.flags
            && self.moved_from == other.moved_from
            && self.moved_to == other.moved_to
            && self.resource_deltas.len() == other.resource_deltas.len()
            && self.children.len() == other.children.len()
            && self.children.iter().all(|child| {
                other
                    .children
                    .iter()
                    .find(|candidate| candidate.element == child.element)
                    .is_some_and(|candidate| candidate == child)
            })
    }
}

impl Eq for ElementDelta {}

impl fmt::Display for ElementDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Merges independently queued deltas into one tree rooted at the model.
///
/// Returns `None` if nothing remains after merging.
pub fn merge_deltas(deltas: impl IntoIterator<Item = ElementDelta>) -> Option<ElementDelta> {
    let mut deltas: Vec<ElementDelta> = deltas.into_iter().filter(|d| !d.is_empty()).collect();
    match deltas.len() {
        0 => return None,
        1 => {
            let only = deltas.pop()?;
            if only.element.kind() == ElementKind::Model {
                return Some(only);
            }
            deltas.push(only);
        }
        _ => {}
    }

    let mut root = ElementDelta::new(ElementHandle::model());
    for delta in deltas {
        if delta.element.kind() == ElementKind::Model {
            root.flags |= delta.flags;
            root.resource_deltas.extend(delta.resource_deltas);
            for child in delta.children {
                let element = child.element.clone();
                root.insert_delta_tree(&element, child);
            }
        } else {
            let element = delta.element.clone();
            root.insert_delta_tree(&element, delta);
        }
    }
    (!root.is_empty()).then_some(root)
}
