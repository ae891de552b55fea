//! Collaborators supplied by the embedder: the structure builder and the indexer.

use std::collections::HashMap;

use nova_vfs::ResourcePath;
use smol_str::SmolStr;
use text_size::TextRange;
use tokio_util::sync::CancellationToken;

use crate::error::{ModelError, Result};
use crate::handle::{ElementHandle, ElementKind};
use crate::info::{ElementInfo, Modifiers};

/// One member reported by a [`StructureBuilder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltElement {
    pub kind: ElementKind,
    pub name: SmolStr,
    pub modifiers: Modifiers,
    pub source_range: Option<TextRange>,
    pub signature: Option<SmolStr>,
    pub children: Vec<BuiltElement>,
}

impl BuiltElement {
    pub fn new(kind: ElementKind, name: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            name: name.into(),
            modifiers: Modifiers::empty(),
            source_range: None,
            signature: None,
            children: Vec::new(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_range(mut self, range: TextRange) -> Self {
        self.source_range = Some(range);
        self
    }

    pub fn with_signature(mut self, signature: impl Into<SmolStr>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_child(mut self, child: BuiltElement) -> Self {
        self.children.push(child);
        self
    }
}

/// Result of parsing one compilation unit or class file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuiltStructure {
    /// Top-level members, in source order.
    pub elements: Vec<BuiltElement>,
    /// `false` if the builder hit errors; the elements are then best-effort.
    pub structure_known: bool,
}

/// Parses source or class-file bytes into members.
///
/// Implementations must be deterministic: identical bytes yield identical structures.
pub trait StructureBuilder: Send + Sync {
    fn build(&self, handle: &ElementHandle, bytes: &[u8]) -> BuiltStructure;
}

/// Builder that reports no members; every structure is known.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyStructureBuilder;

impl StructureBuilder for EmptyStructureBuilder {
    fn build(&self, _handle: &ElementHandle, _bytes: &[u8]) -> BuiltStructure {
        BuiltStructure {
            elements: Vec::new(),
            structure_known: true,
        }
    }
}

/// Fire-and-forget search indexing hooks. Failures are logged by the caller and never abort delta
/// computation.
pub trait Indexer: Send + Sync {
    /// (Re)index a compilation unit or archive.
    fn add(&self, path: &ResourcePath, project: &str) -> anyhow::Result<()>;

    fn remove(&self, path: &ResourcePath, project: &str) -> anyhow::Result<()>;

    fn index_all(&self, project: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopIndexer;

impl Indexer for NoopIndexer {
    fn add(&self, _path: &ResourcePath, _project: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn remove(&self, _path: &ResourcePath, _project: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn index_all(&self, _project: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Infos of an openable and of every member below it.
#[derive(Debug)]
pub(crate) struct Opened {
    pub(crate) info: ElementInfo,
    pub(crate) members: Vec<(ElementHandle, ElementInfo)>,
}

impl Opened {
    pub(crate) fn leaf(info: ElementInfo) -> Self {
        Self {
            info,
            members: Vec::new(),
        }
    }
}

/// Turns a built structure into handles and infos below `openable`.
///
/// Same-named siblings of the same kind get increasing occurrence counts. Cancellation is checked
/// once per element.
pub(crate) fn materialize(
    openable: &ElementHandle,
    structure: BuiltStructure,
    cancel: &CancellationToken,
) -> Result<Opened> {
    let mut members = Vec::new();
    let children = materialize_children(openable, structure.elements, &mut members, cancel)?;
    Ok(Opened {
        info: ElementInfo {
            children,
            structure_known: structure.structure_known,
            ..ElementInfo::default()
        },
        members,
    })
}

fn materialize_children(
    parent: &ElementHandle,
    elements: Vec<BuiltElement>,
    out: &mut Vec<(ElementHandle, ElementInfo)>,
    cancel: &CancellationToken,
) -> Result<Vec<ElementHandle>> {
    let mut occurrences: HashMap<(ElementKind, SmolStr), u32> = HashMap::new();
    let mut handles = Vec::with_capacity(elements.len());
    for element in elements {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let occurrence = *occurrences
            .entry((element.kind, element.name.clone()))
            .and_modify(|count| *count += 1)
            .or_insert(1);
        let handle = parent.child_with_occurrence(element.kind, &element.name, occurrence);
        let children = materialize_children(&handle, element.children, out, cancel)?;
        out.push((
            handle.clone(),
            ElementInfo {
                children,
                structure_known: true,
                source_range: element.source_range,
                modifiers: element.modifiers,
                signature: element.signature,
                archive: None,
            },
        ));
        handles.push(handle);
    }
    Ok(handles)
}
