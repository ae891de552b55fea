use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use nova_classpath::is_archive_path;
use nova_vfs::ResourcePath;
use smol_str::SmolStr;

/// Kind of a model element, ordered from the model root down to members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementKind {
    Model,
    Project,
    Root,
    Package,
    CompilationUnit,
    ClassFile,
    Type,
    Field,
    Method,
    Initializer,
}

impl ElementKind {
    /// Elements whose info is built by opening a resource (as opposed to members, which are
    /// built together with their compilation unit or class file).
    pub fn is_openable(self) -> bool {
        self <= ElementKind::ClassFile
    }

    pub fn is_member(self) -> bool {
        !self.is_openable()
    }
}

struct HandleData {
    kind: ElementKind,
    name: SmolStr,
    parent: Option<ElementHandle>,
    occurrence: u32,
}

/// Immutable identity of a model element.
///
/// Handles are cheap to create and own no state; two handles are equal iff kind, name,
/// occurrence count and parent are equal. Whether an element is *open* is decided by the cache.
#[derive(Clone)]
pub struct ElementHandle(Arc<HandleData>);

impl ElementHandle {
    /// The model root.
    pub fn model() -> Self {
        Self(Arc::new(HandleData {
            kind: ElementKind::Model,
            name: SmolStr::new_inline(""),
            parent: None,
            occurrence: 1,
        }))
    }

    pub fn child(&self, kind: ElementKind, name: &str) -> Self {
        self.child_with_occurrence(kind, name, 1)
    }

    pub fn child_with_occurrence(&self, kind: ElementKind, name: &str, occurrence: u32) -> Self {
        Self(Arc::new(HandleData {
            kind,
            name: SmolStr::new(name),
            parent: Some(self.clone()),
            occurrence: occurrence.max(1),
        }))
    }

    pub fn project(&self, name: &str) -> Self {
        self.child(ElementKind::Project, name)
    }

    /// A root of this project, named by its resource path.
    pub fn root(&self, path: &ResourcePath) -> Self {
        self.child(ElementKind::Root, path.as_str())
    }

    /// A package of this root; `""` is the default package.
    pub fn package(&self, dotted: &str) -> Self {
        self.child(ElementKind::Package, dotted)
    }

    pub fn compilation_unit(&self, file_name: &str) -> Self {
        self.child(ElementKind::CompilationUnit, file_name)
    }

    pub fn class_file(&self, file_name: &str) -> Self {
        self.child(ElementKind::ClassFile, file_name)
    }

    pub fn kind(&self) -> ElementKind {
        self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&ElementHandle> {
        self.0.parent.as_ref()
    }

    pub fn occurrence(&self) -> u32 {
        self.0.occurrence
    }

    /// Ancestors from the parent up to the model root.
    pub fn ancestors(&self) -> impl Iterator<Item = &ElementHandle> {
        std::iter::successors(self.parent(), |handle| handle.parent())
    }

    /// `self` or its nearest ancestor of `kind`.
    pub fn ancestor(&self, kind: ElementKind) -> Option<&ElementHandle> {
        std::iter::once(self)
            .chain(self.ancestors())
            .find(|handle| handle.kind() == kind)
    }

    pub fn project_name(&self) -> Option<&str> {
        self.ancestor(ElementKind::Project).map(ElementHandle::name)
    }

    pub fn root_path(&self) -> Option<ResourcePath> {
        self.ancestor(ElementKind::Root)
            .map(|root| ResourcePath::new(root.name()))
    }

    /// `self` or the nearest openable ancestor (the compilation unit or class file of a member).
    pub fn openable(&self) -> &ElementHandle {
        std::iter::once(self)
            .chain(self.ancestors())
            .find(|handle| handle.kind().is_openable())
            .unwrap_or(self)
    }

    pub fn is_ancestor_of(&self, other: &ElementHandle) -> bool {
        other.ancestors().any(|ancestor| ancestor == self)
    }

    /// Whether this element lives inside a `.jar`/`.zip` root.
    pub fn is_in_archive(&self) -> bool {
        match self.kind() {
            ElementKind::Model | ElementKind::Project | ElementKind::Root => false,
            _ => self
                .root_path()
                .is_some_and(|path| is_archive_path(&path)),
        }
    }

    /// The host resource backing this element, if any. Members and elements inside archives have
    /// no resource of their own.
    pub fn resource_path(&self) -> Option<ResourcePath> {
        match self.kind() {
            ElementKind::Model => Some(ResourcePath::root()),
            ElementKind::Project => Some(ResourcePath::new(self.name())),
            ElementKind::Root => Some(ResourcePath::new(self.name())),
            ElementKind::Package => {
                if self.is_in_archive() {
                    return None;
                }
                let root = self.root_path()?;
                Some(package_path(&root, self.name()))
            }
            ElementKind::CompilationUnit | ElementKind::ClassFile => {
                if self.is_in_archive() {
                    return None;
                }
                Some(self.parent()?.resource_path()?.join(self.name()))
            }
            _ => None,
        }
    }

    /// Path of this class file or compilation unit inside its archive (`a/b/C.class`).
    pub fn archive_entry_name(&self) -> Option<String> {
        if !self.is_in_archive() {
            return None;
        }
        match self.kind() {
            ElementKind::CompilationUnit | ElementKind::ClassFile => {
                let package = self.parent()?.name();
                if package.is_empty() {
                    Some(self.name().to_string())
                } else {
                    Some(format!("{}/{}", package.replace('.', "/"), self.name()))
                }
            }
            _ => None,
        }
    }
}

pub(crate) fn package_path(root: &ResourcePath, dotted: &str) -> ResourcePath {
    if dotted.is_empty() {
        root.clone()
    } else {
        root.join(dotted.replace('.', "/"))
    }
}

impl PartialEq for ElementHandle {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.kind == other.0.kind
            && self.0.occurrence == other.0.occurrence
            && self.0.name == other.0.name
            && self.0.parent == other.0.parent
    }
}

impl Eq for ElementHandle {}

impl Hash for ElementHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.kind.hash(state);
        self.0.name.hash(state);
        self.0.occurrence.hash(state);
        if let Some(parent) = &self.0.parent {
            parent.hash(state);
        }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ElementKind::Model => f.write_str("Java Model"),
            ElementKind::Package if self.name().is_empty() => f.write_str("<default>"),
            ElementKind::Root => {
                let path = ResourcePath::new(self.name());
                match path.strip_prefix(&ResourcePath::new(self.project_name().unwrap_or(""))) {
                    Some(rest) if !rest.is_empty() && path.project_name() == self.project_name() => {
                        f.write_str(&rest.join("/"))
                    }
                    _ => f.write_str(self.name()),
                }
            }
            _ => {
                f.write_str(self.name())?;
                if self.occurrence() > 1 {
                    write!(f, "#{}", self.occurrence())?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chain: Vec<&ElementHandle> = std::iter::once(self).chain(self.ancestors()).collect();
        chain.reverse();
        let mut first = true;
        for handle in chain {
            if handle.kind() == ElementKind::Model {
                continue;
            }
            if !first {
                f.write_str("/")?;
            }
            first = false;
            write!(f, "{:?}({})", handle.kind(), handle)?;
        }
        if first {
            f.write_str("Model")?;
        }
        Ok(())
    }
}
