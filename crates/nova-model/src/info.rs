use std::sync::Arc;

use bitflags::bitflags;
use smol_str::SmolStr;
use text_size::TextRange;

use crate::archive::ArchiveHandle;
use crate::handle::ElementHandle;

bitflags! {
    /// Java modifiers reported by the structure builder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const ABSTRACT = 0x0400;
        const INTERFACE = 0x0200;
        const ENUM = 0x4000;
    }
}

/// Cached structural snapshot of an open element.
#[derive(Clone, Debug, Default)]
pub struct ElementInfo {
    pub(crate) children: Vec<ElementHandle>,
    pub(crate) structure_known: bool,
    pub(crate) source_range: Option<TextRange>,
    pub(crate) modifiers: Modifiers,
    pub(crate) signature: Option<SmolStr>,
    pub(crate) archive: Option<Arc<ArchiveHandle>>,
}

impl PartialEq for ElementInfo {
    fn eq(&self, other: &Self) -> bool {
        self.children == other.children
            && self.structure_known == other.structure_known
            && self.source_range == other.source_range
            && self.modifiers == other.modifiers
            && self.signature == other.signature
            && self.archive.is_some() == other.archive.is_some()
    }
}

impl ElementInfo {
    pub(crate) fn with_children(children: Vec<ElementHandle>) -> Self {
        Self {
            children,
            structure_known: true,
            ..Self::default()
        }
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[ElementHandle] {
        &self.children
    }

    /// `false` when the structure builder reported errors; the children are then best-effort.
    pub fn structure_known(&self) -> bool {
        self.structure_known
    }

    pub fn source_range(&self) -> Option<TextRange> {
        self.source_range
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn archive(&self) -> Option<&Arc<ArchiveHandle>> {
        self.archive.as_ref()
    }

    pub(crate) fn add_child(&mut self, child: ElementHandle) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: &ElementHandle) {
        self.children.retain(|existing| existing != child);
    }
}
