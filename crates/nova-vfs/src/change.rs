use std::fmt;

use bitflags::bitflags;

use crate::path::ResourcePath;

/// Kind of host resource a delta node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Root,
    Project,
    Folder,
    File,
}

impl ResourceKind {
    pub fn is_container(self) -> bool {
        !matches!(self, ResourceKind::File)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDeltaKind {
    Added,
    Removed,
    Changed,
}

bitflags! {
    /// Detail flags attached to a [`ResourceDelta`].
    ///
    /// Values follow the host platform's numbering so flag tests written against it keep their
    /// meaning (notably `CONTENT` is `0x100`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceDeltaFlags: u32 {
        const CONTENT = 0x100;
        const MOVED_FROM = 0x1000;
        const MOVED_TO = 0x2000;
        const OPEN = 0x4000;
        const REPLACED = 0x40000;
    }
}

/// One node of a host change-event tree.
///
/// Trees are rooted at the workspace root (`/`). Ancestors of changed resources are present as
/// `Changed` nodes without flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDelta {
    pub(crate) path: ResourcePath,
    pub(crate) resource_kind: ResourceKind,
    pub(crate) kind: ResourceDeltaKind,
    pub(crate) flags: ResourceDeltaFlags,
    pub(crate) moved_from: Option<ResourcePath>,
    pub(crate) moved_to: Option<ResourcePath>,
    pub(crate) children: Vec<ResourceDelta>,
}

impl ResourceDelta {
    pub fn new(path: ResourcePath, resource_kind: ResourceKind, kind: ResourceDeltaKind) -> Self {
        Self {
            path,
            resource_kind,
            kind,
            flags: ResourceDeltaFlags::empty(),
            moved_from: None,
            moved_to: None,
            children: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: ResourceDeltaFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_moved_from(mut self, from: ResourcePath) -> Self {
        self.flags |= ResourceDeltaFlags::MOVED_FROM;
        self.moved_from = Some(from);
        self
    }

    pub fn with_moved_to(mut self, to: ResourcePath) -> Self {
        self.flags |= ResourceDeltaFlags::MOVED_TO;
        self.moved_to = Some(to);
        self
    }

    pub fn with_child(mut self, child: ResourceDelta) -> Self {
        self.children.push(child);
        self
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.resource_kind
    }

    pub fn kind(&self) -> ResourceDeltaKind {
        self.kind
    }

    pub fn flags(&self) -> ResourceDeltaFlags {
        self.flags
    }

    pub fn moved_from(&self) -> Option<&ResourcePath> {
        self.moved_from.as_ref()
    }

    pub fn moved_to(&self) -> Option<&ResourcePath> {
        self.moved_to.as_ref()
    }

    pub fn children(&self) -> &[ResourceDelta] {
        &self.children
    }

    /// Children with the given kind.
    pub fn affected_children(
        &self,
        kind: ResourceDeltaKind,
    ) -> impl Iterator<Item = &ResourceDelta> + '_ {
        self.children.iter().filter(move |child| child.kind == kind)
    }

    /// Finds the node describing `path` within this subtree.
    pub fn find_member(&self, path: &ResourcePath) -> Option<&ResourceDelta> {
        if &self.path == path {
            return Some(self);
        }
        if !path.starts_with(&self.path) {
            return None;
        }
        self.children
            .iter()
            .find(|child| path.starts_with(&child.path))
            .and_then(|child| child.find_member(path))
    }

    /// Pre-order visit; returning `false` from `visitor` skips that node's children.
    pub fn accept(&self, visitor: &mut dyn FnMut(&ResourceDelta) -> bool) {
        if visitor(self) {
            for child in &self.children {
                child.accept(visitor);
            }
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ResourceDelta::node_count).sum::<usize>()
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let marker = match self.kind {
            ResourceDeltaKind::Added => '+',
            ResourceDeltaKind::Removed => '-',
            ResourceDeltaKind::Changed => '*',
        };
        write!(f, "{:indent$}{}[{}]", "", self.path, marker, indent = depth * 2)?;
        if !self.flags.is_empty() {
            write!(f, " {:?}", self.flags)?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ResourceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
