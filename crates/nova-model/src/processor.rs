//! Translation of host resource deltas into element deltas.
//!
//! One [`DeltaProcessor`] handles one resource change tree. It walks the tree depth first, maps
//! every resource to the element(s) it backs, updates the cache (closing changed elements,
//! patching parents' children) and records classpath bookkeeping that is applied once the walk is
//! over: roots whose folder or archive vanished are dropped from their project's classpath, and
//! touched projects have their classpath persisted and their name lookups reset.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use nova_classpath::{RootInfo, RootKind, RootMap};
use nova_vfs::{ResourceDelta, ResourceDeltaFlags, ResourceDeltaKind, ResourceKind, ResourcePath};

use crate::delta::{DeltaFlags, ElementDelta};
use crate::handle::{ElementHandle, ElementKind};
use crate::manager::ModelManager;
use crate::open::{is_openable_name, is_valid_identifier, openable_extension};

/// Per-pass scratch state.
struct PassContext {
    root: ElementDelta,
    /// Roots whose resource was deleted; their entries are dropped at the end of the pass.
    removed_roots: Vec<RootInfo>,
    /// Projects whose classpath must be persisted and whose root list must be refreshed.
    projects_to_update: BTreeSet<String>,
    /// Projects whose name lookup must be reset.
    caches_to_reset: BTreeSet<String>,
    /// (root path, project) pairs already dispatched by [`DeltaProcessor::update_roots`].
    handled_roots: HashSet<(ResourcePath, String)>,
    /// Java projects renamed during this pass, old name -> new name.
    renamed_projects: HashMap<String, String>,
    /// Root map from before the change; used to resolve removed resources.
    old_map: Arc<RootMap>,
    current_map: Arc<RootMap>,
}

pub(crate) struct DeltaProcessor<'a> {
    manager: &'a ModelManager,
    cx: PassContext,
}

impl<'a> DeltaProcessor<'a> {
    pub(crate) fn new(manager: &'a ModelManager) -> Self {
        manager.initialize_roots();
        let cx = PassContext {
            root: ElementDelta::new(manager.model().clone()),
            removed_roots: Vec::new(),
            projects_to_update: BTreeSet::new(),
            caches_to_reset: BTreeSet::new(),
            handled_roots: HashSet::new(),
            renamed_projects: HashMap::new(),
            old_map: manager.roots.old(),
            current_map: manager.roots.current(),
        };
        Self { manager, cx }
    }

    /// Runs the pass and returns the resulting delta, or `None` if no element was affected.
    pub(crate) fn process(mut self, delta: &ResourceDelta) -> Option<ElementDelta> {
        if delta.path().is_root() {
            for child in delta.children() {
                self.project_delta(child);
            }
        } else if delta.path().segment_count() == 1 {
            self.project_delta(delta);
        } else {
            self.traverse(delta);
        }

        self.process_removed_roots();
        self.update_classpaths();
        self.manager.roots.settle();

        let root = self.cx.root;
        tracing::debug!(
            target = "nova.model.delta",
            empty = root.is_empty(),
            "processed resource delta"
        );
        (!root.is_empty()).then_some(root)
    }

    fn model(&self) -> &ElementHandle {
        self.manager.model()
    }

    fn project_delta(&mut self, delta: &ResourceDelta) {
        let Some(name) = delta.path().project_name().map(str::to_string) else {
            return;
        };
        let model = self.model().clone();
        let project = model.project(&name);

        match delta.kind() {
            ResourceDeltaKind::Added => {
                let moved_from = delta
                    .flags()
                    .contains(ResourceDeltaFlags::MOVED_FROM)
                    .then(|| delta.moved_from())
                    .flatten()
                    .and_then(|from| from.project_name().map(str::to_string));
                if let Some(from) = &moved_from {
                    self.transfer_declaration(from, &name);
                }
                if !self.manager.is_java_project(&name) {
                    self.non_java_project(delta);
                    return;
                }

                match &moved_from {
                    Some(from) if self.cx.renamed_projects.get(from) == Some(&name) => {
                        self.cx.root.moved_to(&project, &model.project(from), DeltaFlags::empty());
                    }
                    _ => self.cx.root.added(&project),
                }
                self.manager.close(&project);
                self.manager.add_to_parent_info(&model, &project);
                self.manager.roots.mark_stale();
                self.cx.caches_to_reset.insert(name.clone());
                self.index_all(&name);
                self.update_roots(delta.path(), ResourceDeltaKind::Added, Some(name.as_str()));
            }
            ResourceDeltaKind::Removed => {
                let moved_to = delta
                    .flags()
                    .contains(ResourceDeltaFlags::MOVED_TO)
                    .then(|| delta.moved_to())
                    .flatten()
                    .and_then(|to| to.project_name().map(str::to_string));
                let was_java = self.manager.is_java_project(&name)
                    || self.cx.renamed_projects.contains_key(&name);
                if !was_java {
                    self.non_java_project(delta);
                    return;
                }
                if let Some(to) = &moved_to {
                    self.transfer_declaration(&name, to);
                }

                match &moved_to {
                    Some(to) if self.cx.renamed_projects.get(&name) == Some(to) => {
                        self.cx.root.moved_from(&project, &model.project(to), DeltaFlags::empty());
                    }
                    _ => {
                        self.cx.root.removed(&project);
                        self.manager.forget_project(&name);
                    }
                }
                self.manager.close(&project);
                self.manager.remove_from_parent_info(&model, &project);
                self.manager.roots.mark_stale();
                self.cx.caches_to_reset.insert(name.clone());
                self.index_result("remove", delta.path(), || {
                    self.manager.indexer.remove(delta.path(), &name)
                });
                self.update_roots(delta.path(), ResourceDeltaKind::Removed, Some(name.as_str()));
            }
            ResourceDeltaKind::Changed => {
                let is_java = self.manager.is_java_project(&name);
                if delta.flags().contains(ResourceDeltaFlags::OPEN) {
                    if !is_java {
                        self.non_java_project(delta);
                    } else if self.manager.workspace.is_project_open(&name) {
                        self.cx.root.opened(&project);
                        self.manager.close(&project);
                        self.manager.add_to_parent_info(&model, &project);
                        self.manager.roots.mark_stale();
                        self.cx.caches_to_reset.insert(name.clone());
                        self.index_all(&name);
                    } else {
                        self.cx.root.closed(&project);
                        self.manager.close(&project);
                        self.manager.remove_from_parent_info(&model, &project);
                        self.manager.roots.mark_stale();
                        self.cx.caches_to_reset.insert(name.clone());
                        self.index_result("remove", delta.path(), || {
                            self.manager.indexer.remove(delta.path(), &name)
                        });
                    }
                    return;
                }
                if !is_java {
                    self.non_java_project(delta);
                    return;
                }
                for child in delta.children() {
                    self.traverse(child);
                }
            }
        }
    }

    /// A project that is not a Java project only matters through roots of other projects nested
    /// inside it; everything else is folded onto the model.
    fn non_java_project(&mut self, delta: &ResourceDelta) {
        let map = self.map_for(delta.kind());
        if map.nested_under(delta.path()).is_empty() {
            let model = self.model().clone();
            self.cx.root.non_java_resource_changed(&model, delta.clone());
            return;
        }
        match delta.kind() {
            ResourceDeltaKind::Added | ResourceDeltaKind::Removed => {
                self.update_roots(delta.path(), delta.kind(), None);
            }
            ResourceDeltaKind::Changed => {
                for child in delta.children() {
                    self.traverse(child);
                }
            }
        }
    }

    fn transfer_declaration(&mut self, from: &str, to: &str) {
        if self.cx.renamed_projects.contains_key(from) {
            return;
        }
        if self.manager.transfer_project_declaration(from, to) {
            tracing::debug!(target = "nova.model", from, to, "java project renamed");
            self.cx.renamed_projects.insert(from.to_string(), to.to_string());
        }
    }

    fn map_for(&self, kind: ResourceDeltaKind) -> Arc<RootMap> {
        match kind {
            ResourceDeltaKind::Removed => Arc::clone(&self.cx.old_map),
            _ => Arc::clone(&self.cx.current_map),
        }
    }

    /// Processes a folder or file delta below a project.
    fn traverse(&mut self, delta: &ResourceDelta) {
        let is_folder = delta.resource_kind().is_container();

        self.source_attachment_changed(delta);

        if delta.kind() == ResourceDeltaKind::Added
            && delta.flags().contains(ResourceDeltaFlags::MOVED_FROM)
            && self.synthesize_moved_root(delta)
        {
            return;
        }

        let elements = self.elements_for_delta(delta, is_folder);
        if elements.is_empty() {
            let map = self.map_for(delta.kind());
            let has_nested_roots = is_folder && !map.nested_under(delta.path()).is_empty();
            let plain_change = is_folder
                && delta.kind() == ResourceDeltaKind::Changed
                && delta.flags().is_empty();
            if has_nested_roots || plain_change {
                for child in delta.children() {
                    self.traverse(child);
                }
            } else {
                self.fold_non_java(delta);
            }
            return;
        }

        let mut recurse = false;
        for (element, info) in &elements {
            match delta.kind() {
                ResourceDeltaKind::Added => {
                    self.element_added(element, info, delta, is_folder);
                    recurse |= element.kind() == ElementKind::Package;
                }
                ResourceDeltaKind::Removed => {
                    self.element_removed(element, info, delta, is_folder);
                    recurse |= element.kind() == ElementKind::Package;
                }
                ResourceDeltaKind::Changed => {
                    recurse |= self.element_changed(element, info, delta);
                }
            }
        }
        if recurse {
            for child in delta.children() {
                self.traverse(child);
            }
        }
    }

    fn elements_for_delta(
        &self,
        delta: &ResourceDelta,
        is_folder: bool,
    ) -> Vec<(ElementHandle, RootInfo)> {
        if delta.kind() == ResourceDeltaKind::Removed {
            let old = self.elements_for(delta.path(), is_folder, &self.cx.old_map);
            if !old.is_empty() {
                return old;
            }
        }
        self.elements_for(delta.path(), is_folder, &self.cx.current_map)
    }

    /// Every element backed by `path`: one per owning project for shared roots.
    fn elements_for(
        &self,
        path: &ResourcePath,
        is_folder: bool,
        map: &RootMap,
    ) -> Vec<(ElementHandle, RootInfo)> {
        let owners = map.owners(path);
        if !owners.is_empty() {
            return owners
                .into_iter()
                .map(|info| (self.root_handle(info), info.clone()))
                .collect();
        }

        let Some(enclosing) = map.enclosing(path) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for info in map.owners(&enclosing.path) {
            if info.archive {
                continue;
            }
            if info.kind == RootKind::Source && info.is_excluded(path, is_folder) {
                continue;
            }
            let Some(segments) = path.strip_prefix(&info.path) else {
                continue;
            };
            let root = self.root_handle(info);
            if is_folder {
                if !segments.iter().all(|segment| is_valid_identifier(segment)) {
                    continue;
                }
                out.push((root.package(&segments.join(".")), info.clone()));
            } else {
                let Some((file, dirs)) = segments.split_last() else {
                    continue;
                };
                if !dirs.iter().all(|segment| is_valid_identifier(segment))
                    || !is_openable_name(file, openable_extension(info.kind))
                {
                    continue;
                }
                let package = root.package(&dirs.join("."));
                let element = match info.kind {
                    RootKind::Source => package.compilation_unit(file),
                    RootKind::Binary => package.class_file(file),
                };
                out.push((element, info.clone()));
            }
        }
        out
    }

    fn root_handle(&self, info: &RootInfo) -> ElementHandle {
        self.model().project(&info.project).root(&info.path)
    }

    /// The element a moved resource came from or went to, matching `kind` and project.
    fn counterpart(
        &self,
        path: &ResourcePath,
        is_folder: bool,
        like: &ElementHandle,
    ) -> Option<ElementHandle> {
        [&self.cx.current_map, &self.cx.old_map]
            .into_iter()
            .flat_map(|map| self.elements_for(path, is_folder, map))
            .map(|(element, _)| element)
            .find(|element| element.kind() == like.kind() && element.project_name() == like.project_name())
    }

    fn element_added(
        &mut self,
        element: &ElementHandle,
        info: &RootInfo,
        delta: &ResourceDelta,
        is_folder: bool,
    ) {
        let moved_from = delta
            .flags()
            .contains(ResourceDeltaFlags::MOVED_FROM)
            .then(|| delta.moved_from())
            .flatten()
            .and_then(|from| self.counterpart(from, is_folder, element));
        match &moved_from {
            Some(from) => self.cx.root.moved_to(element, from, DeltaFlags::empty()),
            None => self.cx.root.added(element),
        }

        self.manager.close(element);
        if let Some(parent) = element.parent() {
            self.manager.add_to_parent_info(parent, element);
        }

        match element.kind() {
            ElementKind::Root => {
                self.cx.projects_to_update.insert(info.project.clone());
                self.cx.caches_to_reset.insert(info.project.clone());
                if info.archive {
                    self.index_add(delta.path(), &info.project);
                }
            }
            ElementKind::Package => {
                self.cx.caches_to_reset.insert(info.project.clone());
            }
            ElementKind::CompilationUnit => self.index_add(delta.path(), &info.project),
            _ => {}
        }
    }

    fn element_removed(
        &mut self,
        element: &ElementHandle,
        info: &RootInfo,
        delta: &ResourceDelta,
        is_folder: bool,
    ) {
        let moved_to = delta
            .flags()
            .contains(ResourceDeltaFlags::MOVED_TO)
            .then(|| delta.moved_to())
            .flatten()
            .and_then(|to| match element.kind() {
                ElementKind::Root => Some(self.model().project(&info.project).root(to)),
                _ => self.counterpart(to, is_folder, element),
            });

        let is_root = element.kind() == ElementKind::Root;
        match &moved_to {
            Some(to) => self.cx.root.moved_from(element, to, DeltaFlags::empty()),
            None if is_root => self
                .cx
                .root
                .removed_with_flags(element, DeltaFlags::REMOVED_FROM_CLASSPATH),
            None => self.cx.root.removed(element),
        }

        self.manager.close(element);
        if let Some(parent) = element.parent() {
            self.manager.remove_from_parent_info(parent, element);
        }

        match element.kind() {
            ElementKind::Root => {
                if moved_to.is_none() {
                    self.cx.removed_roots.push(info.clone());
                }
                self.cx.projects_to_update.insert(info.project.clone());
                self.cx.caches_to_reset.insert(info.project.clone());
                if info.archive {
                    self.index_remove(delta.path(), &info.project);
                }
            }
            ElementKind::Package => {
                self.cx.caches_to_reset.insert(info.project.clone());
            }
            ElementKind::CompilationUnit => self.index_remove(delta.path(), &info.project),
            _ => {}
        }
    }

    /// Returns whether the children of `delta` still need to be visited.
    fn element_changed(
        &mut self,
        element: &ElementHandle,
        info: &RootInfo,
        delta: &ResourceDelta,
    ) -> bool {
        // Content detection compares with `> 1` rather than `!= 0`; with CONTENT = 0x100 both
        // agree.
        if (delta.flags() & ResourceDeltaFlags::CONTENT).bits() > 1 {
            self.manager.close(element);
            let mut flags = DeltaFlags::CONTENT;
            if element.kind() == ElementKind::Root && info.archive {
                flags |= DeltaFlags::ARCHIVE_CONTENT_CHANGED;
                self.cx.caches_to_reset.insert(info.project.clone());
            }
            self.cx.root.changed(element, flags);
            if element.kind() == ElementKind::CompilationUnit || info.archive {
                self.index_add(delta.path(), &info.project);
            }
            return false;
        }
        matches!(element.kind(), ElementKind::Root | ElementKind::Package)
    }

    /// Folds a resource without an element of its own onto its nearest mapped ancestor.
    fn fold_non_java(&mut self, delta: &ResourceDelta) {
        let map = self.map_for(delta.kind());
        let mut current = delta.path().parent();
        let target = loop {
            let Some(path) = current else {
                break self.model().clone();
            };
            if path.is_root() {
                break self.model().clone();
            }
            if path.segment_count() == 1 {
                let name = path.project_name().unwrap_or_default();
                break if self.manager.is_java_project(name) {
                    self.model().project(name)
                } else {
                    self.model().clone()
                };
            }
            if let Some((element, _)) = self.elements_for(&path, true, &map).into_iter().next() {
                break element;
            }
            current = path.parent();
        };
        self.cx.root.non_java_resource_changed(&target, delta.clone());
    }

    /// Emits SOURCE_ATTACHED / SOURCE_DETACHED on every root using `delta`'s resource as its
    /// source attachment.
    fn source_attachment_changed(&mut self, delta: &ResourceDelta) {
        let flags = match delta.kind() {
            ResourceDeltaKind::Added => DeltaFlags::SOURCE_ATTACHED,
            ResourceDeltaKind::Removed => DeltaFlags::SOURCE_DETACHED,
            ResourceDeltaKind::Changed if delta.flags().contains(ResourceDeltaFlags::CONTENT) => {
                DeltaFlags::SOURCE_ATTACHED | DeltaFlags::SOURCE_DETACHED
            }
            ResourceDeltaKind::Changed => return,
        };
        let map = self.map_for(delta.kind());
        if !map.is_source_attachment(delta.path()) {
            return;
        }
        for root_path in map.roots_attached_to(delta.path()) {
            for info in map.owners(&root_path) {
                if info.source_attachment.as_ref() != Some(delta.path()) {
                    continue;
                }
                let root = self.root_handle(info);
                self.manager.close(&root);
                self.cx.root.changed(&root, flags);
            }
        }
    }

    /// A folder or archive moved in from a path that was a root gets a classpath entry of the
    /// same kind at its new path before any element is created for it.
    fn synthesize_moved_root(&mut self, delta: &ResourceDelta) -> bool {
        let Some(from) = delta.moved_from() else {
            return false;
        };
        if !self.cx.current_map.owners(delta.path()).is_empty() {
            return false;
        }

        let mut previous: Vec<RootInfo> = Vec::new();
        for map in [&self.cx.old_map, &self.cx.current_map] {
            for info in map.owners(from) {
                if !previous.iter().any(|seen| seen.project == info.project) {
                    previous.push(info.clone());
                }
            }
        }
        if previous.is_empty() {
            return false;
        }

        let mut map = (*self.cx.current_map).clone();
        for old in previous {
            let mut entry = old.entry.clone();
            entry.path = delta.path().clone();
            let replacement = match RootInfo::from_entry(&old.project, &entry) {
                Ok(Some(info)) => info,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        target = "nova.model",
                        project = %old.project,
                        path = %entry.path,
                        error = %err,
                        "cannot resolve moved classpath entry"
                    );
                    continue;
                }
            };
            self.manager
                .replace_classpath_entry(&old.project, &old.path, entry);
            map.replace(&old.path, &old.project, replacement.clone());

            let project = self.model().project(&old.project);
            let old_root = project.root(&old.path);
            let new_root = project.root(&replacement.path);
            self.cx
                .root
                .moved_to(&new_root, &old_root, DeltaFlags::ADDED_TO_CLASSPATH);
            self.manager.close(&new_root);
            self.manager.add_to_parent_info(&project, &new_root);
            self.cx.projects_to_update.insert(old.project.clone());
            self.cx.caches_to_reset.insert(old.project.clone());
            tracing::debug!(
                target = "nova.model",
                project = %old.project,
                from = %old.path,
                to = %replacement.path,
                "classpath root moved"
            );
        }
        self.manager.roots.publish(map.clone());
        self.cx.current_map = Arc::new(map);
        true
    }

    /// Dispatches root-level deltas for roots of other projects nested under a container that was
    /// added or removed as a whole.
    fn update_roots(
        &mut self,
        container: &ResourcePath,
        kind: ResourceDeltaKind,
        own_project: Option<&str>,
    ) {
        let map = self.map_for(kind);
        let nested: Vec<RootInfo> = map
            .nested_under(container)
            .into_iter()
            .filter(|info| Some(info.project.as_str()) != own_project)
            .cloned()
            .collect();
        for info in nested {
            if !self
                .cx
                .handled_roots
                .insert((info.path.clone(), info.project.clone()))
            {
                continue;
            }
            let root = self.root_handle(&info);
            let synthetic = ResourceDelta::new(
                info.path.clone(),
                if info.archive {
                    ResourceKind::File
                } else {
                    ResourceKind::Folder
                },
                kind,
            );
            match kind {
                ResourceDeltaKind::Added => self.element_added(&root, &info, &synthetic, !info.archive),
                ResourceDeltaKind::Removed => {
                    self.element_removed(&root, &info, &synthetic, !info.archive)
                }
                ResourceDeltaKind::Changed => {}
            }
        }
    }

    /// Drops the classpath entries of roots deleted during the pass, in one batch.
    fn process_removed_roots(&mut self) {
        for info in std::mem::take(&mut self.cx.removed_roots) {
            if self.manager.remove_classpath_entry(&info.project, &info.path) {
                tracing::debug!(
                    target = "nova.model",
                    project = %info.project,
                    path = %info.path,
                    "removed classpath entry of deleted root"
                );
                self.cx.projects_to_update.insert(info.project);
            }
        }
    }

    fn update_classpaths(&mut self) {
        let projects = std::mem::take(&mut self.cx.projects_to_update);
        if !projects.is_empty() {
            self.manager.roots.mark_stale();
        }
        for project in projects {
            if let Some(entries) = self.manager.classpath(&project) {
                if let Err(err) = self.manager.store.save(&project, &entries) {
                    tracing::warn!(
                        target = "nova.model",
                        project = %project,
                        error = %err,
                        "failed to persist classpath"
                    );
                }
            }
            self.manager.refresh_project_children(&project);
            self.cx.caches_to_reset.insert(project);
        }
        for project in std::mem::take(&mut self.cx.caches_to_reset) {
            self.manager.reset_lookup(&project);
        }
    }

    fn index_all(&self, project: &str) {
        if let Err(err) = self.manager.indexer.index_all(project) {
            tracing::warn!(target = "nova.model", project, error = %err, "indexing project failed");
        }
    }

    fn index_add(&self, path: &ResourcePath, project: &str) {
        self.index_result("add", path, || self.manager.indexer.add(path, project));
    }

    fn index_remove(&self, path: &ResourcePath, project: &str) {
        self.index_result("remove", path, || self.manager.indexer.remove(path, project));
    }

    fn index_result(&self, action: &str, path: &ResourcePath, f: impl FnOnce() -> anyhow::Result<()>) {
        if let Err(err) = f() {
            tracing::warn!(target = "nova.model", action, path = %path, error = %err, "indexing failed");
        }
    }
}
