use std::collections::{BTreeSet, HashMap, VecDeque};

use nova_vfs::ResourcePath;

use crate::entry::{ClasspathEntry, ClasspathEntryKind};
use crate::filter::PathFilter;
use crate::ClasspathError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootKind {
    Source,
    Binary,
}

/// A resolved classpath root: one path contributing packages to one project.
#[derive(Clone, Debug, PartialEq)]
pub struct RootInfo {
    pub project: String,
    pub path: ResourcePath,
    pub kind: RootKind,
    pub archive: bool,
    pub filter: PathFilter,
    pub source_attachment: Option<ResourcePath>,
    pub entry: ClasspathEntry,
}

impl RootInfo {
    /// Resolves a raw entry; project references are not roots and yield `None`.
    pub fn from_entry(project: &str, entry: &ClasspathEntry) -> Result<Option<Self>, ClasspathError> {
        let kind = match entry.kind {
            ClasspathEntryKind::Source => RootKind::Source,
            ClasspathEntryKind::Library => RootKind::Binary,
            ClasspathEntryKind::Project => return Ok(None),
        };
        Ok(Some(Self {
            project: project.to_string(),
            path: entry.path.clone(),
            kind,
            archive: entry.is_archive(),
            filter: entry.filter()?,
            source_attachment: entry.source_attachment.clone(),
            entry: entry.clone(),
        }))
    }

    /// Whether `path` (at or below this root) is filtered out by the entry's patterns.
    pub fn is_excluded(&self, path: &ResourcePath, is_folder: bool) -> bool {
        match path.strip_prefix(&self.path) {
            Some(segments) => self.filter.is_excluded(&segments.join("/"), is_folder),
            None => true,
        }
    }
}

/// Snapshot of every resolved root of the workspace.
///
/// `roots` holds the primary owner of each path; when more than one project lists the same path
/// the additional owners live in `other_roots`. Every mutation keeps the two tables consistent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RootMap {
    roots: HashMap<ResourcePath, RootInfo>,
    other_roots: HashMap<ResourcePath, Vec<RootInfo>>,
    /// Source attachment path -> root paths using it.
    source_attachments: HashMap<ResourcePath, BTreeSet<ResourcePath>>,
    /// Project -> projects that directly require it.
    project_dependencies: HashMap<String, BTreeSet<String>>,
}

impl RootMap {
    /// Builds a complete map from every project's resolved classpath.
    ///
    /// Entries whose patterns fail to compile are kept with an empty filter.
    pub fn from_projects<'a, I>(projects: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [ClasspathEntry])>,
    {
        let mut map = RootMap::default();
        for (project, entries) in projects {
            for entry in entries {
                if let Some(required) = entry.required_project() {
                    map.project_dependencies
                        .entry(required.to_string())
                        .or_default()
                        .insert(project.to_string());
                    continue;
                }
                let info = match RootInfo::from_entry(project, entry) {
                    Ok(Some(info)) => info,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(
                            target = "nova.classpath",
                            project,
                            path = %entry.path,
                            error = %err,
                            "invalid classpath filter; using an unfiltered root"
                        );
                        root_without_filter(project, entry)
                    }
                };
                map.insert(info);
            }
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roots.len() + self.other_roots.values().map(Vec::len).sum::<usize>()
    }

    /// Adds `info`; a path already owned by another project records `info` as a secondary owner.
    pub fn insert(&mut self, info: RootInfo) {
        let previous = self
            .owners(&info.path)
            .into_iter()
            .find(|owner| owner.project == info.project)
            .and_then(|owner| owner.source_attachment.clone());
        let path = info.path.clone();
        if let Some(attachment) = &info.source_attachment {
            self.source_attachments
                .entry(attachment.clone())
                .or_default()
                .insert(info.path.clone());
        }
        match self.roots.get(&info.path) {
            Some(existing) if existing.project != info.project => {
                let others = self.other_roots.entry(info.path.clone()).or_default();
                others.retain(|other| other.project != info.project);
                others.push(info);
            }
            _ => {
                self.roots.insert(info.path.clone(), info);
            }
        }
        if let Some(attachment) = previous {
            self.forget_attachment(&path, &attachment);
        }
    }

    /// Removes the root at `path` owned by `project`, promoting a secondary owner if needed.
    pub fn remove(&mut self, path: &ResourcePath, project: &str) -> Option<RootInfo> {
        let removed = if self
            .roots
            .get(path)
            .is_some_and(|info| info.project == project)
        {
            let removed = self.roots.remove(path);
            if let Some(others) = self.other_roots.get_mut(path) {
                if !others.is_empty() {
                    let promoted = others.remove(0);
                    self.roots.insert(path.clone(), promoted);
                }
                if others.is_empty() {
                    self.other_roots.remove(path);
                }
            }
            removed
        } else {
            let others = self.other_roots.get_mut(path)?;
            let idx = others.iter().position(|other| other.project == project)?;
            let removed = others.remove(idx);
            if others.is_empty() {
                self.other_roots.remove(path);
            }
            Some(removed)
        };

        if let Some(attachment) = removed.as_ref().and_then(|info| info.source_attachment.as_ref()) {
            self.forget_attachment(path, attachment);
        }
        removed
    }

    /// Drops the `attachment` → `path` link unless an owner of `path` still uses it.
    fn forget_attachment(&mut self, path: &ResourcePath, attachment: &ResourcePath) {
        let still_used = self
            .owners(path)
            .iter()
            .any(|info| info.source_attachment.as_ref() == Some(attachment));
        if still_used {
            return;
        }
        if let Some(paths) = self.source_attachments.get_mut(attachment) {
            paths.remove(path);
            if paths.is_empty() {
                self.source_attachments.remove(attachment);
            }
        }
    }

    /// Replaces `project`'s root at `old_path` with `info` in one step.
    pub fn replace(&mut self, old_path: &ResourcePath, project: &str, info: RootInfo) -> Option<RootInfo> {
        let removed = self.remove(old_path, project);
        self.insert(info);
        removed
    }

    pub fn get(&self, path: &ResourcePath) -> Option<&RootInfo> {
        self.roots.get(path)
    }

    /// Every owner of `path`, primary first.
    pub fn owners(&self, path: &ResourcePath) -> Vec<&RootInfo> {
        let mut out: Vec<&RootInfo> = self.roots.get(path).into_iter().collect();
        if let Some(others) = self.other_roots.get(path) {
            out.extend(others.iter());
        }
        out
    }

    pub fn get_for_project(&self, path: &ResourcePath, project: &str) -> Option<&RootInfo> {
        self.owners(path)
            .into_iter()
            .find(|info| info.project == project)
    }

    /// The deepest root containing `path` (or `path` itself).
    pub fn enclosing(&self, path: &ResourcePath) -> Option<&RootInfo> {
        let mut current = Some(path.clone());
        while let Some(candidate) = current {
            if let Some(info) = self.roots.get(&candidate) {
                return Some(info);
            }
            current = candidate.parent();
        }
        None
    }

    /// Roots (all owners) strictly below `container`, sorted by path.
    pub fn nested_under(&self, container: &ResourcePath) -> Vec<&RootInfo> {
        let mut out: Vec<&RootInfo> = self
            .iter()
            .filter(|info| &info.path != container && info.path.starts_with(container))
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.project.cmp(&b.project)));
        out
    }

    /// Every root, primary and secondary owners alike.
    pub fn iter(&self) -> impl Iterator<Item = &RootInfo> {
        self.roots
            .values()
            .chain(self.other_roots.values().flatten())
    }

    pub fn roots_of_project<'a>(&'a self, project: &'a str) -> impl Iterator<Item = &'a RootInfo> + 'a {
        self.iter().filter(move |info| info.project == project)
    }

    /// Root paths whose source attachment is `attachment`.
    pub fn roots_attached_to(&self, attachment: &ResourcePath) -> Vec<ResourcePath> {
        self.source_attachments
            .get(attachment)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_source_attachment(&self, path: &ResourcePath) -> bool {
        self.source_attachments.contains_key(path)
    }

    /// Projects requiring `project`, directly or transitively, sorted.
    pub fn dependents(&self, project: &str) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([project]);
        while let Some(next) = queue.pop_front() {
            let Some(direct) = self.project_dependencies.get(next) else {
                continue;
            };
            for dependent in direct {
                if dependent != project && seen.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        seen.into_iter().collect()
    }
}

fn root_without_filter(project: &str, entry: &ClasspathEntry) -> RootInfo {
    RootInfo {
        project: project.to_string(),
        path: entry.path.clone(),
        kind: match entry.kind {
            ClasspathEntryKind::Source => RootKind::Source,
            _ => RootKind::Binary,
        },
        archive: entry.is_archive(),
        filter: PathFilter::default(),
        source_attachment: entry.source_attachment.clone(),
        entry: entry.clone(),
    }
}
