use nova_classpath::{ClasspathEntry, RootInfo};

use crate::delta::DeltaFlags;
use crate::error::{ModelError, Result};
use crate::operation::{ModelOperation, OperationContext};
use crate::post_action::{InsertionMode, PostAction};

/// Replaces the raw classpath of a Java project and reports the per-root differences.
#[derive(Debug)]
pub struct SetClasspathOperation {
    project: String,
    entries: Vec<ClasspathEntry>,
}

impl SetClasspathOperation {
    pub fn new(project: &str, entries: Vec<ClasspathEntry>) -> Self {
        Self {
            project: project.to_string(),
            entries,
        }
    }
}

fn resolve(project: &str, entries: &[ClasspathEntry]) -> Vec<RootInfo> {
    let mut roots: Vec<RootInfo> = Vec::new();
    for entry in entries {
        match RootInfo::from_entry(project, entry) {
            Ok(Some(info)) => {
                if !roots.iter().any(|existing| existing.path == info.path) {
                    roots.push(info);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    target = "nova.model",
                    project,
                    path = %entry.path,
                    error = %err,
                    "ignoring classpath entry with invalid patterns"
                );
            }
        }
    }
    roots
}

fn attachment_flags(old: &RootInfo, new: &RootInfo) -> DeltaFlags {
    match (&old.source_attachment, &new.source_attachment) {
        (None, Some(_)) => DeltaFlags::SOURCE_ATTACHED,
        (Some(_), None) => DeltaFlags::SOURCE_DETACHED,
        (Some(a), Some(b)) if a != b => DeltaFlags::SOURCE_ATTACHED | DeltaFlags::SOURCE_DETACHED,
        _ => DeltaFlags::empty(),
    }
}

impl ModelOperation for SetClasspathOperation {
    fn name(&self) -> &str {
        "set-classpath"
    }

    fn execute(&mut self, cx: &mut OperationContext<'_>) -> Result<()> {
        let manager = cx.manager();
        let project = manager.model().project(&self.project);
        let old_entries = manager
            .classpath(&self.project)
            .ok_or_else(|| ModelError::NotPresent(project.clone()))?;
        cx.check_cancelled()?;

        let old_roots = resolve(&self.project, &old_entries);
        let new_roots = resolve(&self.project, &self.entries);

        for (old_index, old) in old_roots.iter().enumerate() {
            let root = project.root(&old.path);
            let Some(new_index) = new_roots.iter().position(|new| new.path == old.path) else {
                manager.close(&root);
                cx.delta_mut()
                    .removed_with_flags(&root, DeltaFlags::REMOVED_FROM_CLASSPATH);
                continue;
            };
            let new = &new_roots[new_index];
            let mut flags = attachment_flags(old, new);
            if old_index != new_index {
                flags |= DeltaFlags::CLASSPATH_REORDER;
            }
            if old.kind != new.kind || old.filter != new.filter {
                flags |= DeltaFlags::CONTENT;
            }
            if flags.is_empty() {
                continue;
            }
            if flags.intersects(
                DeltaFlags::CONTENT | DeltaFlags::SOURCE_ATTACHED | DeltaFlags::SOURCE_DETACHED,
            ) {
                manager.close(&root);
            }
            cx.delta_mut().changed(&root, flags);
        }

        for new in &new_roots {
            if old_roots.iter().any(|old| old.path == new.path) {
                continue;
            }
            cx.delta_mut()
                .added_with_flags(&project.root(&new.path), DeltaFlags::ADDED_TO_CLASSPATH);
        }

        cx.delta_mut().changed(&project, DeltaFlags::CLASSPATH_CHANGED);
        manager.set_classpath(&self.project, self.entries.clone());

        let id = format!("update-project-references:{}", self.project);
        cx.post_action(
            PostAction::new(id, |manager| manager.check_project_cycles().map(|_| ())),
            InsertionMode::RemoveAllAppend,
        )
    }
}
