use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::change::{ResourceDelta, ResourceDeltaFlags, ResourceDeltaKind, ResourceKind};
use crate::error::VfsError;
use crate::path::ResourcePath;
use crate::watch::{ResourceChangeEvent, ResourceEventKind, ResourceObserver};

#[derive(Debug, Clone)]
struct Entry {
    kind: ResourceKind,
    contents: Option<Arc<[u8]>>,
    open: bool,
}

#[derive(Debug, Clone)]
struct ExternalFile {
    contents: Arc<[u8]>,
    timestamp: i64,
}

#[derive(Debug, Clone)]
struct PendingChange {
    resource_kind: ResourceKind,
    kind: ResourceDeltaKind,
    flags: ResourceDeltaFlags,
    moved_from: Option<ResourcePath>,
    moved_to: Option<ResourcePath>,
}

impl PendingChange {
    fn into_delta(self, path: ResourcePath) -> ResourceDelta {
        let mut delta = ResourceDelta::new(path, self.resource_kind, self.kind);
        delta.flags = self.flags;
        delta.moved_from = self.moved_from;
        delta.moved_to = self.moved_to;
        delta
    }
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<ResourcePath, Entry>,
    externals: BTreeMap<ResourcePath, ExternalFile>,
    depth: u32,
    pending: BTreeMap<ResourcePath, PendingChange>,
    next_batch: u64,
}

/// In-memory host resource tree.
///
/// The tree holds projects (first-level containers), folders and files. Libraries that live
/// outside any project are kept in a separate *external file* table: they can be read and carry a
/// timestamp, but changing them produces no change events.
///
/// Mutations are grouped into transactions with [`Workspace::run`]; a mutation made outside `run`
/// is a transaction of its own. See [`crate::watch`] for delivery semantics.
pub struct Workspace {
    state: Mutex<State>,
    observers: RwLock<Vec<Arc<dyn ResourceObserver>>>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Workspace")
            .field("resources", &state.resources.len())
            .field("externals", &state.externals.len())
            .field("depth", &state.depth)
            .finish()
    }
}

impl Workspace {
    pub fn new() -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(
            ResourcePath::root(),
            Entry {
                kind: ResourceKind::Root,
                contents: None,
                open: true,
            },
        );
        Self {
            state: Mutex::new(State {
                resources,
                ..State::default()
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ResourceObserver>) {
        self.observers.write().push(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ResourceObserver>) {
        self.observers
            .write()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Runs `f` as one transaction: change events are delivered once the outermost `run` returns.
    pub fn run<R>(&self, f: impl FnOnce(&Workspace) -> R) -> R {
        self.state.lock().depth += 1;
        let guard = BatchGuard { workspace: self };
        let result = f(self);
        drop(guard);
        result
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().depth > 0
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut State) -> Result<R, VfsError>) -> Result<R, VfsError> {
        self.run(|ws| {
            let mut state = ws.state.lock();
            f(&mut state)
        })
    }

    fn end_batch(&self) {
        let (batch, delta) = {
            let mut state = self.state.lock();
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 || state.pending.is_empty() || std::thread::panicking() {
                return;
            }
            let pending = std::mem::take(&mut state.pending);
            state.next_batch += 1;
            (state.next_batch, state.build_delta(pending))
        };

        tracing::debug!(
            target = "nova.vfs",
            batch,
            nodes = delta.node_count(),
            "delivering resource change batch"
        );

        let observers: Vec<Arc<dyn ResourceObserver>> = self.observers.read().clone();
        let delta = Arc::new(delta);
        for kind in [ResourceEventKind::PreBuild, ResourceEventKind::PostChange] {
            let event = ResourceChangeEvent {
                kind,
                batch,
                delta: Arc::clone(&delta),
            };
            for observer in &observers {
                observer.resource_changed(&event);
            }
        }
    }

    pub fn create_project(&self, name: &str) -> Result<(), VfsError> {
        let path = ResourcePath::new(name);
        if path.segment_count() != 1 {
            return Err(VfsError::InvalidPath(path));
        }
        self.mutate(|state| {
            if state.resources.contains_key(&path) {
                return Err(VfsError::AlreadyExists(path));
            }
            state.resources.insert(
                path.clone(),
                Entry {
                    kind: ResourceKind::Project,
                    contents: None,
                    open: true,
                },
            );
            state.record_simple(path, ResourceKind::Project, ResourceDeltaKind::Added);
            Ok(())
        })
    }

    pub fn create_folder(&self, path: &ResourcePath) -> Result<(), VfsError> {
        self.create(path, ResourceKind::Folder, None)
    }

    pub fn create_file(&self, path: &ResourcePath, contents: impl Into<Arc<[u8]>>) -> Result<(), VfsError> {
        self.create(path, ResourceKind::File, Some(contents.into()))
    }

    fn create(
        &self,
        path: &ResourcePath,
        kind: ResourceKind,
        contents: Option<Arc<[u8]>>,
    ) -> Result<(), VfsError> {
        if path.segment_count() < 2 {
            return Err(VfsError::InvalidPath(path.clone()));
        }
        self.mutate(|state| {
            state.check_parent(path)?;
            if state.resources.contains_key(path) {
                return Err(VfsError::AlreadyExists(path.clone()));
            }
            state.resources.insert(
                path.clone(),
                Entry {
                    kind,
                    contents,
                    open: true,
                },
            );
            state.record_simple(path.clone(), kind, ResourceDeltaKind::Added);
            Ok(())
        })
    }

    /// Creates `path` and any missing parent folders below its project.
    pub fn create_folders(&self, path: &ResourcePath) -> Result<(), VfsError> {
        self.run(|ws| {
            let Some(project) = path.project_name() else {
                return Err(VfsError::InvalidPath(path.clone()));
            };
            let mut current = ResourcePath::new(project);
            for segment in path.segments().skip(1) {
                current = current.join(segment);
                if !ws.exists(&current) {
                    ws.create_folder(&current)?;
                }
            }
            Ok(())
        })
    }

    pub fn set_contents(&self, path: &ResourcePath, contents: impl Into<Arc<[u8]>>) -> Result<(), VfsError> {
        let contents = contents.into();
        self.mutate(|state| {
            state.check_visible(path)?;
            let entry = state
                .resources
                .get_mut(path)
                .ok_or_else(|| VfsError::NotFound(path.clone()))?;
            if entry.kind != ResourceKind::File {
                return Err(VfsError::NotAFile(path.clone()));
            }
            entry.contents = Some(contents);
            state.record(
                path.clone(),
                PendingChange {
                    resource_kind: ResourceKind::File,
                    kind: ResourceDeltaKind::Changed,
                    flags: ResourceDeltaFlags::CONTENT,
                    moved_from: None,
                    moved_to: None,
                },
            );
            Ok(())
        })
    }

    /// Deletes `path` and everything below it.
    pub fn delete(&self, path: &ResourcePath) -> Result<(), VfsError> {
        if path.is_root() {
            return Err(VfsError::InvalidPath(path.clone()));
        }
        self.mutate(|state| {
            let is_closed_project = path.segment_count() == 1
                && state
                    .resources
                    .get(path)
                    .is_some_and(|entry| !entry.open);
            if !is_closed_project {
                state.check_visible(path)?;
            }
            for member in state.subtree(path) {
                let Some(entry) = state.resources.remove(&member) else {
                    continue;
                };
                if is_closed_project && &member != path {
                    continue;
                }
                state.record_simple(member, entry.kind, ResourceDeltaKind::Removed);
            }
            Ok(())
        })
    }

    /// Moves (renames) `from` to `to`, including everything below it.
    pub fn move_resource(&self, from: &ResourcePath, to: &ResourcePath) -> Result<(), VfsError> {
        if from.is_root() || to.is_root() || to.starts_with(from) {
            return Err(VfsError::InvalidPath(to.clone()));
        }
        self.mutate(|state| {
            state.check_visible(from)?;
            let from_is_project = from.segment_count() == 1;
            if from_is_project != (to.segment_count() == 1) {
                return Err(VfsError::InvalidPath(to.clone()));
            }
            if !from_is_project {
                state.check_parent(to)?;
            }
            if state.resources.contains_key(to) {
                return Err(VfsError::AlreadyExists(to.clone()));
            }

            for old in state.subtree(from) {
                let Some(new) = old.rebase(from, to) else {
                    continue;
                };
                let Some(entry) = state.resources.remove(&old) else {
                    continue;
                };
                let kind = entry.kind;
                state.resources.insert(new.clone(), entry);
                state.record(
                    old.clone(),
                    PendingChange {
                        resource_kind: kind,
                        kind: ResourceDeltaKind::Removed,
                        flags: ResourceDeltaFlags::MOVED_TO,
                        moved_from: None,
                        moved_to: Some(new.clone()),
                    },
                );
                state.record(
                    new,
                    PendingChange {
                        resource_kind: kind,
                        kind: ResourceDeltaKind::Added,
                        flags: ResourceDeltaFlags::MOVED_FROM,
                        moved_from: Some(old),
                        moved_to: None,
                    },
                );
            }
            Ok(())
        })
    }

    pub fn close_project(&self, name: &str) -> Result<(), VfsError> {
        self.set_project_open(name, false)
    }

    pub fn open_project(&self, name: &str) -> Result<(), VfsError> {
        self.set_project_open(name, true)
    }

    fn set_project_open(&self, name: &str, open: bool) -> Result<(), VfsError> {
        let path = ResourcePath::new(name);
        self.mutate(|state| {
            let entry = state
                .resources
                .get_mut(&path)
                .filter(|entry| entry.kind == ResourceKind::Project)
                .ok_or_else(|| VfsError::NotFound(path.clone()))?;
            if entry.open == open {
                return Ok(());
            }
            entry.open = open;
            state.record(
                path.clone(),
                PendingChange {
                    resource_kind: ResourceKind::Project,
                    kind: ResourceDeltaKind::Changed,
                    flags: ResourceDeltaFlags::OPEN,
                    moved_from: None,
                    moved_to: None,
                },
            );
            Ok(())
        })
    }

    /// Whether `path` exists. Members of closed projects are reported as absent; the closed
    /// project itself exists.
    pub fn exists(&self, path: &ResourcePath) -> bool {
        let state = self.state.lock();
        state.visible(path).is_some()
            || (path.segment_count() == 1 && state.resources.contains_key(path))
    }

    pub fn kind(&self, path: &ResourcePath) -> Option<ResourceKind> {
        let state = self.state.lock();
        if path.segment_count() == 1 {
            return state.resources.get(path).map(|entry| entry.kind);
        }
        state.visible(path).map(|entry| entry.kind)
    }

    pub fn is_project_open(&self, name: &str) -> bool {
        let state = self.state.lock();
        state
            .resources
            .get(&ResourcePath::new(name))
            .is_some_and(|entry| entry.kind == ResourceKind::Project && entry.open)
    }

    /// Names of every project (open or closed), sorted.
    pub fn projects(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .resources
            .iter()
            .filter(|(_, entry)| entry.kind == ResourceKind::Project)
            .filter_map(|(path, _)| path.project_name().map(str::to_string))
            .collect()
    }

    /// Direct members of a visible container, sorted by path.
    pub fn children(&self, path: &ResourcePath) -> Vec<(ResourcePath, ResourceKind)> {
        let state = self.state.lock();
        match state.visible(path) {
            Some(entry) if entry.kind.is_container() && entry.open => {}
            _ => return Vec::new(),
        }
        state
            .resources
            .iter()
            .filter(|(member, _)| member.parent().as_ref() == Some(path))
            .map(|(member, entry)| (member.clone(), entry.kind))
            .collect()
    }

    /// Reads a workspace file or an external file.
    pub fn read_file(&self, path: &ResourcePath) -> Result<Arc<[u8]>, VfsError> {
        let state = self.state.lock();
        if state.resources.contains_key(path) {
            state.check_visible(path)?;
            return match state.resources.get(path) {
                Some(Entry {
                    contents: Some(contents),
                    ..
                }) => Ok(Arc::clone(contents)),
                _ => Err(VfsError::NotAFile(path.clone())),
            };
        }
        state
            .externals
            .get(path)
            .map(|file| Arc::clone(&file.contents))
            .ok_or_else(|| VfsError::NotFound(path.clone()))
    }

    /// Registers (or replaces) a file that lives outside every project.
    pub fn set_external_file(&self, path: &ResourcePath, contents: impl Into<Arc<[u8]>>, timestamp: i64) {
        let mut state = self.state.lock();
        state.externals.insert(
            path.clone(),
            ExternalFile {
                contents: contents.into(),
                timestamp,
            },
        );
    }

    pub fn remove_external_file(&self, path: &ResourcePath) -> bool {
        self.state.lock().externals.remove(path).is_some()
    }

    pub fn external_timestamp(&self, path: &ResourcePath) -> Option<i64> {
        self.state.lock().externals.get(path).map(|file| file.timestamp)
    }

    pub fn is_external(&self, path: &ResourcePath) -> bool {
        let state = self.state.lock();
        !state.resources.contains_key(path) && state.externals.contains_key(path)
    }
}

struct BatchGuard<'a> {
    workspace: &'a Workspace,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.workspace.end_batch();
    }
}

impl State {
    fn project_open(&self, path: &ResourcePath) -> bool {
        match path.project_name() {
            Some(project) => self
                .resources
                .get(&ResourcePath::new(project))
                .is_some_and(|entry| entry.open),
            None => true,
        }
    }

    fn visible(&self, path: &ResourcePath) -> Option<&Entry> {
        let entry = self.resources.get(path)?;
        if path.segment_count() >= 1 && !self.project_open(path) {
            return None;
        }
        Some(entry)
    }

    fn check_visible(&self, path: &ResourcePath) -> Result<(), VfsError> {
        if !self.resources.contains_key(path) {
            return Err(VfsError::NotFound(path.clone()));
        }
        if !self.project_open(path) {
            let project = path.project_name().unwrap_or_default().to_string();
            return Err(VfsError::ProjectClosed(project));
        }
        Ok(())
    }

    fn check_parent(&self, path: &ResourcePath) -> Result<(), VfsError> {
        let parent = path
            .parent()
            .ok_or_else(|| VfsError::InvalidPath(path.clone()))?;
        if !self.project_open(&parent) {
            let project = parent.project_name().unwrap_or_default().to_string();
            return Err(VfsError::ProjectClosed(project));
        }
        match self.resources.get(&parent) {
            Some(entry) if entry.kind.is_container() => Ok(()),
            _ => Err(VfsError::ParentMissing(path.clone())),
        }
    }

    /// `path` and all of its descendants, sorted.
    fn subtree(&self, path: &ResourcePath) -> Vec<ResourcePath> {
        self.resources
            .keys()
            .filter(|member| member.starts_with(path))
            .cloned()
            .collect()
    }

    fn record_simple(&mut self, path: ResourcePath, resource_kind: ResourceKind, kind: ResourceDeltaKind) {
        self.record(
            path,
            PendingChange {
                resource_kind,
                kind,
                flags: ResourceDeltaFlags::empty(),
                moved_from: None,
                moved_to: None,
            },
        );
    }

    /// Coalesces `change` with whatever is already pending for `path`.
    fn record(&mut self, path: ResourcePath, change: PendingChange) {
        use ResourceDeltaKind::*;

        let Some(existing) = self.pending.get_mut(&path) else {
            self.pending.insert(path, change);
            return;
        };
        match (existing.kind, change.kind) {
            (Added, Removed) => {
                self.pending.remove(&path);
            }
            (Added, _) | (Removed, Removed) | (Removed, Changed) => {}
            (Removed, Added) => {
                existing.kind = Changed;
                existing.resource_kind = change.resource_kind;
                existing.flags |=
                    change.flags | ResourceDeltaFlags::CONTENT | ResourceDeltaFlags::REPLACED;
                if change.moved_from.is_some() {
                    existing.moved_from = change.moved_from;
                }
            }
            (Changed, Changed) => {
                existing.flags |= change.flags;
            }
            (Changed, Removed) | (Changed, Added) => {
                *existing = change;
            }
        }
    }

    fn kind_of(&self, path: &ResourcePath) -> ResourceKind {
        if let Some(entry) = self.resources.get(path) {
            return entry.kind;
        }
        match path.segment_count() {
            0 => ResourceKind::Root,
            1 => ResourceKind::Project,
            _ => ResourceKind::Folder,
        }
    }

    fn build_delta(&self, pending: BTreeMap<ResourcePath, PendingChange>) -> ResourceDelta {
        let mut nodes: BTreeMap<ResourcePath, ResourceDelta> = pending
            .into_iter()
            .map(|(path, change)| (path.clone(), change.into_delta(path)))
            .collect();

        let changed: Vec<ResourcePath> = nodes.keys().cloned().collect();
        for path in changed {
            let mut current = path.parent();
            while let Some(ancestor) = current {
                if nodes.contains_key(&ancestor) {
                    break;
                }
                let kind = self.kind_of(&ancestor);
                nodes.insert(
                    ancestor.clone(),
                    ResourceDelta::new(ancestor.clone(), kind, ResourceDeltaKind::Changed),
                );
                current = ancestor.parent();
            }
        }

        // A proper prefix sorts before its extensions, so walking backwards attaches every node
        // before its parent is itself attached.
        let keys: Vec<ResourcePath> = nodes.keys().cloned().collect();
        for key in keys.iter().rev() {
            let Some(parent) = key.parent() else {
                continue;
            };
            let Some(node) = nodes.remove(key) else {
                continue;
            };
            if let Some(parent_node) = nodes.get_mut(&parent) {
                parent_node.children.push(node);
            }
        }

        let mut root = nodes.remove(&ResourcePath::root()).unwrap_or_else(|| {
            ResourceDelta::new(
                ResourcePath::root(),
                ResourceKind::Root,
                ResourceDeltaKind::Changed,
            )
        });
        sort_children(&mut root);
        root
    }
}

fn sort_children(delta: &mut ResourceDelta) {
    delta.children.sort_by(|a, b| a.path.cmp(&b.path));
    for child in &mut delta.children {
        sort_children(child);
    }
}
