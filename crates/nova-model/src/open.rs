//! Building infos for closed elements.
//!
//! Opening never holds the cache lock while reading resources or running the structure builder:
//! presence is checked under the lock, the info is built unlocked, then published under the lock
//! again provided the parent is still open.

use std::sync::Arc;

use nova_classpath::{RootInfo, RootKind};
use nova_vfs::{ResourceKind, ResourcePath, VfsError};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveHandle;
use crate::builder::{materialize, Opened};
use crate::cache::ModelCache;
use crate::error::{ModelError, Result};
use crate::handle::{package_path, ElementHandle, ElementKind};
use crate::info::ElementInfo;
use crate::manager::ModelManager;

/// Returns the info of `handle`, opening it and any closed ancestors first.
///
/// A concurrent close or eviction only causes another attempt; `NotPresent` is reported only
/// when an open parent does not list the element.
pub(crate) fn element_info(
    manager: &ModelManager,
    handle: &ElementHandle,
    cancel: &CancellationToken,
) -> Result<Arc<ElementInfo>> {
    let openable = handle.openable();
    let mut chain: Vec<&ElementHandle> =
        std::iter::once(openable).chain(openable.ancestors()).collect();
    chain.reverse();

    let mut attempt = 0usize;
    loop {
        if let Some(info) = manager.cache.lock().get(handle) {
            return Ok(info);
        }
        if let Some(info) = open_chain(manager, &chain, handle, cancel)? {
            return Ok(info);
        }
        attempt += 1;
        tracing::debug!(
            target = "nova.model",
            element = ?handle,
            attempt,
            "ancestor closed while opening; retrying"
        );
        std::thread::yield_now();
    }
}

/// Opens every closed element of `chain` (model first, `target`'s openable last) and returns
/// `target`'s info. Returns `None` if a parent vanished before a child could be published.
fn open_chain(
    manager: &ModelManager,
    chain: &[&ElementHandle],
    target: &ElementHandle,
    cancel: &CancellationToken,
) -> Result<Option<Arc<ElementInfo>>> {
    let Some((last, ancestors)) = chain.split_last() else {
        return Ok(None);
    };
    for element in ancestors {
        if !open_one(manager, element, cancel)? {
            return Ok(None);
        }
    }

    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }
    {
        let mut cache = manager.cache.lock();
        if cache.contains(last) {
            return cached_target(&mut cache, target);
        }
        if !check_listed(&cache, last)? {
            return Ok(None);
        }
    }

    let opened = open_element(manager, last, cancel)?;
    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }
    let info = Arc::new(opened.info);
    let members: Vec<(ElementHandle, Arc<ElementInfo>)> = opened
        .members
        .into_iter()
        .map(|(member, member_info)| (member, Arc::new(member_info)))
        .collect();
    let found = if target == *last {
        Some(info.clone())
    } else {
        members
            .iter()
            .find(|(member, _)| member == target)
            .map(|(_, member_info)| member_info.clone())
    };

    let mut cache = manager.cache.lock();
    if cache.contains(last) {
        return cached_target(&mut cache, target);
    }
    if !cache.parent_is_open(last) {
        return Ok(None);
    }
    let evicted = cache.publish_shared((*last).clone(), info, members);
    if evicted > 0 {
        tracing::trace!(target = "nova.model.cache", element = ?last, evicted, "opened with eviction");
    }
    found
        .map(Some)
        .ok_or_else(|| ModelError::NotPresent(target.clone()))
}

/// Opens `element` unless it is cached. Returns `false` if its parent is not open.
fn open_one(
    manager: &ModelManager,
    element: &ElementHandle,
    cancel: &CancellationToken,
) -> Result<bool> {
    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }
    {
        let cache = manager.cache.lock();
        if cache.contains(element) {
            return Ok(true);
        }
        if !check_listed(&cache, element)? {
            return Ok(false);
        }
    }

    let opened = open_element(manager, element, cancel)?;
    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }

    let mut cache = manager.cache.lock();
    if cache.contains(element) {
        return Ok(true);
    }
    if !cache.parent_is_open(element) {
        return Ok(false);
    }
    let evicted = cache.publish(element.clone(), opened.info, opened.members);
    if evicted > 0 {
        tracing::trace!(target = "nova.model.cache", element = ?element, evicted, "opened with eviction");
    }
    Ok(true)
}

/// `Ok(false)` if the parent is closed, `NotPresent` if the open parent does not list `element`.
fn check_listed(cache: &ModelCache, element: &ElementHandle) -> Result<bool> {
    let Some(parent) = element.parent() else {
        return Ok(true);
    };
    match cache.peek(parent) {
        Some(info) if !info.children().contains(element) => {
            Err(ModelError::NotPresent(element.clone()))
        }
        Some(_) => Ok(true),
        None => Ok(false),
    }
}

/// Looks `target` up below its already cached openable. The nearest cached ancestor decides: if
/// it lists the way down to `target` the caller retries, otherwise `target` does not exist.
fn cached_target(
    cache: &mut ModelCache,
    target: &ElementHandle,
) -> Result<Option<Arc<ElementInfo>>> {
    if let Some(info) = cache.get(target) {
        return Ok(Some(info));
    }
    let mut child = target;
    while let Some(parent) = child.parent() {
        if let Some(info) = cache.peek(parent) {
            if info.children().contains(child) {
                return Ok(None);
            }
            return Err(ModelError::NotPresent(target.clone()));
        }
        child = parent;
    }
    Ok(None)
}

/// Builds the info of a single openable element. Ancestors are expected to be open.
fn open_element(
    manager: &ModelManager,
    handle: &ElementHandle,
    cancel: &CancellationToken,
) -> Result<Opened> {
    match handle.kind() {
        ElementKind::Model => Ok(Opened::leaf(open_model(manager, handle))),
        ElementKind::Project => open_project(manager, handle).map(Opened::leaf),
        ElementKind::Root => open_root(manager, handle, cancel).map(Opened::leaf),
        ElementKind::Package => open_package(manager, handle).map(Opened::leaf),
        ElementKind::CompilationUnit | ElementKind::ClassFile => {
            open_openable(manager, handle, cancel)
        }
        _ => Err(ModelError::NotPresent(handle.clone())),
    }
}

fn open_model(manager: &ModelManager, model: &ElementHandle) -> ElementInfo {
    let projects = manager.projects.read();
    let children = projects
        .keys()
        .filter(|name| manager.workspace.is_project_open(name))
        .map(|name| model.project(name))
        .collect();
    ElementInfo::with_children(children)
}

fn open_project(manager: &ModelManager, project: &ElementHandle) -> Result<ElementInfo> {
    let name = project.name();
    if !manager.workspace.is_project_open(name) {
        return Err(ModelError::NotPresent(project.clone()));
    }
    let projects = manager.projects.read();
    let entries = projects
        .get(name)
        .ok_or_else(|| ModelError::NotPresent(project.clone()))?;
    let mut children: Vec<ElementHandle> = Vec::new();
    for entry in entries.iter().filter(|entry| entry.required_project().is_none()) {
        let root = project.root(&entry.path);
        if !children.contains(&root) {
            children.push(root);
        }
    }
    Ok(ElementInfo::with_children(children))
}

pub(crate) fn root_info_for(manager: &ModelManager, root: &ElementHandle) -> Result<RootInfo> {
    manager.initialize_roots();
    let path = ResourcePath::new(root.name());
    let project = root.project_name().unwrap_or_default();
    manager
        .roots
        .current()
        .get_for_project(&path, project)
        .cloned()
        .ok_or_else(|| ModelError::NotPresent(root.clone()))
}

fn open_root(
    manager: &ModelManager,
    root: &ElementHandle,
    cancel: &CancellationToken,
) -> Result<ElementInfo> {
    let info = root_info_for(manager, root)?;

    if info.archive {
        let bytes = manager
            .workspace
            .read_file(&info.path)
            .map_err(|err| not_present(root, err))?;
        let archive = ArchiveHandle::open(info.path.clone(), bytes)?;
        let children = archive
            .packages()
            .filter(|package| is_valid_package_name(package))
            .map(|package| root.package(package))
            .collect();
        return Ok(ElementInfo {
            archive: Some(Arc::new(archive)),
            ..ElementInfo::with_children(children)
        });
    }

    if !manager
        .workspace
        .kind(&info.path)
        .is_some_and(ResourceKind::is_container)
    {
        return Err(ModelError::NotPresent(root.clone()));
    }

    let map = manager.roots.current();
    let nested: Vec<ResourcePath> = map
        .nested_under(&info.path)
        .into_iter()
        .map(|nested| nested.path.clone())
        .collect();

    let mut packages = vec![String::new()];
    let mut pending = vec![(info.path.clone(), String::new())];
    while let Some((dir, dotted)) = pending.pop() {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        for (child, kind) in manager.workspace.children(&dir) {
            if kind != ResourceKind::Folder {
                continue;
            }
            let Some(name) = child.file_name() else {
                continue;
            };
            if !is_valid_identifier(name) || info.is_excluded(&child, true) || nested.contains(&child) {
                continue;
            }
            let package = if dotted.is_empty() {
                name.to_string()
            } else {
                format!("{dotted}.{name}")
            };
            packages.push(package.clone());
            pending.push((child, package));
        }
    }
    packages.sort();

    let children = packages.iter().map(|package| root.package(package)).collect();
    Ok(ElementInfo::with_children(children))
}

fn open_package(manager: &ModelManager, package: &ElementHandle) -> Result<ElementInfo> {
    let root = package
        .parent()
        .ok_or_else(|| ModelError::NotPresent(package.clone()))?;
    let info = root_info_for(manager, root)?;
    let extension = openable_extension(info.kind);

    let mut names: Vec<String> = if info.archive {
        let archive = archive_of(manager, root)?;
        archive
            .files_in(package.name())
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        let dir = package_path(&info.path, package.name());
        if !manager
            .workspace
            .kind(&dir)
            .is_some_and(ResourceKind::is_container)
        {
            return Err(ModelError::NotPresent(package.clone()));
        }
        manager
            .workspace
            .children(&dir)
            .into_iter()
            .filter(|(_, kind)| *kind == ResourceKind::File)
            .filter(|(path, _)| info.kind == RootKind::Binary || !info.is_excluded(path, false))
            .filter_map(|(path, _)| path.file_name().map(str::to_string))
            .collect()
    };
    names.retain(|name| is_openable_name(name, extension));
    names.sort();

    let children = names
        .iter()
        .map(|name| match info.kind {
            RootKind::Source => package.compilation_unit(name),
            RootKind::Binary => package.class_file(name),
        })
        .collect();
    Ok(ElementInfo::with_children(children))
}

fn open_openable(
    manager: &ModelManager,
    openable: &ElementHandle,
    cancel: &CancellationToken,
) -> Result<Opened> {
    let structure = if let Some(entry) = openable.archive_entry_name() {
        let root = openable
            .ancestor(ElementKind::Root)
            .ok_or_else(|| ModelError::NotPresent(openable.clone()))?;
        let bytes = archive_of(manager, root)?.read(&entry)?;
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        manager.builder.build(openable, &bytes)
    } else {
        let path = openable
            .resource_path()
            .ok_or_else(|| ModelError::NotPresent(openable.clone()))?;
        let bytes = manager
            .workspace
            .read_file(&path)
            .map_err(|err| not_present(openable, err))?;
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        manager.builder.build(openable, &bytes)
    };

    if !structure.structure_known {
        tracing::debug!(
            target = "nova.model",
            element = ?openable,
            "structure builder reported errors; publishing partial structure"
        );
    }
    materialize(openable, structure, cancel)
}

fn archive_of(manager: &ModelManager, root: &ElementHandle) -> Result<Arc<ArchiveHandle>> {
    manager
        .cache
        .lock()
        .peek(root)
        .and_then(|info| info.archive().cloned())
        .ok_or_else(|| ModelError::NotPresent(root.clone()))
}

fn not_present(handle: &ElementHandle, err: VfsError) -> ModelError {
    match err {
        VfsError::NotFound(_) | VfsError::ProjectClosed(_) | VfsError::NotAFile(_) => {
            ModelError::NotPresent(handle.clone())
        }
        other => ModelError::Resource(other),
    }
}

pub(crate) fn openable_extension(kind: RootKind) -> &'static str {
    match kind {
        RootKind::Source => "java",
        RootKind::Binary => "class",
    }
}

/// Whether `file_name` is a `<identifier>.<extension>` file.
pub(crate) fn is_openable_name(file_name: &str, extension: &str) -> bool {
    file_name
        .strip_suffix(extension)
        .and_then(|stem| stem.strip_suffix('.'))
        .is_some_and(is_valid_identifier)
}

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

pub(crate) fn is_valid_package_name(dotted: &str) -> bool {
    dotted.is_empty() || dotted.split('.').all(is_valid_identifier)
}
