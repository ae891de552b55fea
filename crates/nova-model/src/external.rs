//! Refreshing archives that live outside the workspace.
//!
//! External archives produce no resource events. Their last seen timestamps are kept in the
//! manager's [`nova_classpath::TimestampCache`] (persisted when configured), and a refresh
//! compares them with what the workspace reports now.

use std::collections::BTreeMap;

use nova_classpath::RootInfo;
use nova_vfs::ResourcePath;

use crate::delta::DeltaFlags;
use crate::error::Result;
use crate::handle::ElementHandle;
use crate::operation::{ModelOperation, OperationContext};

/// Detects added, removed and modified external archives of one project (or of every project)
/// and reports them as root deltas.
#[derive(Debug, Default)]
pub struct RefreshExternalArchivesOperation {
    project: Option<String>,
    changed: Vec<ElementHandle>,
}

impl RefreshExternalArchivesOperation {
    pub fn new(project: Option<&str>) -> Self {
        Self {
            project: project.map(str::to_string),
            changed: Vec::new(),
        }
    }

    /// Roots reported by the last run.
    pub fn changed_roots(&self) -> &[ElementHandle] {
        &self.changed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArchiveChange {
    Added,
    Removed,
    Modified,
}

fn classify(cached: Option<i64>, current: Option<i64>) -> Option<ArchiveChange> {
    match (cached, current) {
        (None, Some(_)) => Some(ArchiveChange::Added),
        (Some(_), None) => Some(ArchiveChange::Removed),
        (Some(old), Some(new)) if old != new => Some(ArchiveChange::Modified),
        _ => None,
    }
}

impl ModelOperation for RefreshExternalArchivesOperation {
    fn name(&self) -> &str {
        "refresh-external-archives"
    }

    fn execute(&mut self, cx: &mut OperationContext<'_>) -> Result<()> {
        let manager = cx.manager();
        manager.initialize_roots();
        let map = manager.roots.current();

        let mut archives: BTreeMap<ResourcePath, Vec<RootInfo>> = BTreeMap::new();
        {
            let timestamps = manager.timestamps.lock();
            for info in map.iter() {
                if !info.archive {
                    continue;
                }
                if let Some(project) = &self.project {
                    if &info.project != project {
                        continue;
                    }
                }
                let external = manager.workspace.is_external(&info.path)
                    || (timestamps.get(&info.path).is_some() && !manager.workspace.exists(&info.path));
                if external {
                    archives.entry(info.path.clone()).or_default().push(info.clone());
                }
            }
        }

        self.changed.clear();
        let mut touched_projects = Vec::new();
        for (path, owners) in archives {
            cx.check_cancelled()?;
            let cached = manager.timestamps.lock().get(&path);
            let current = manager.workspace.external_timestamp(&path);
            let Some(change) = classify(cached, current) else {
                continue;
            };
            tracing::debug!(target = "nova.model", path = %path, ?change, "external archive changed");

            {
                let mut timestamps = manager.timestamps.lock();
                match current {
                    Some(timestamp) => timestamps.insert(path.clone(), timestamp),
                    None => timestamps.remove(&path),
                };
            }

            for info in owners {
                let root = manager.model().project(&info.project).root(&info.path);
                match change {
                    ArchiveChange::Added => cx.delta_mut().added(&root),
                    ArchiveChange::Removed => {
                        manager.close(&root);
                        cx.delta_mut().removed(&root);
                    }
                    ArchiveChange::Modified => {
                        manager.close(&root);
                        cx.delta_mut().changed(
                            &root,
                            DeltaFlags::CONTENT | DeltaFlags::ARCHIVE_CONTENT_CHANGED,
                        );
                        if let Err(err) = manager.indexer.add(&path, &info.project) {
                            tracing::warn!(
                                target = "nova.model",
                                path = %path,
                                error = %err,
                                "indexing external archive failed"
                            );
                        }
                    }
                }
                touched_projects.push(info.project.clone());
                self.changed.push(root);
            }
        }

        if !self.changed.is_empty() {
            manager.save_timestamps();
        }
        touched_projects.sort();
        touched_projects.dedup();
        for project in touched_projects {
            manager.reset_lookup(&project);
        }
        Ok(())
    }
}
