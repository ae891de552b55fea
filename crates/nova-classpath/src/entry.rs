use nova_vfs::ResourcePath;
use serde::{Deserialize, Serialize};

use crate::filter::PathFilter;
use crate::ClasspathError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClasspathEntryKind {
    /// A source folder inside the owning project.
    Source,
    /// A binary folder or archive, inside the workspace or external.
    Library,
    /// Another project of the workspace.
    Project,
}

/// One raw classpath entry of a Java project.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClasspathEntry {
    pub kind: ClasspathEntryKind,
    pub path: ResourcePath,
    pub inclusion_patterns: Vec<String>,
    pub exclusion_patterns: Vec<String>,
    pub source_attachment: Option<ResourcePath>,
    pub exported: bool,
}

impl ClasspathEntry {
    fn new(kind: ClasspathEntryKind, path: ResourcePath) -> Self {
        Self {
            kind,
            path,
            inclusion_patterns: Vec::new(),
            exclusion_patterns: Vec::new(),
            source_attachment: None,
            exported: false,
        }
    }

    pub fn source(path: impl Into<ResourcePath>) -> Self {
        Self::new(ClasspathEntryKind::Source, path.into())
    }

    pub fn library(path: impl Into<ResourcePath>) -> Self {
        Self::new(ClasspathEntryKind::Library, path.into())
    }

    pub fn project(name: &str) -> Self {
        Self::new(ClasspathEntryKind::Project, ResourcePath::new(name))
    }

    pub fn with_inclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inclusion_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusion_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_attachment(mut self, path: impl Into<ResourcePath>) -> Self {
        self.source_attachment = Some(path.into());
        self
    }

    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }

    /// Whether this entry points at a `.jar`/`.zip` archive.
    pub fn is_archive(&self) -> bool {
        self.kind == ClasspathEntryKind::Library && is_archive_path(&self.path)
    }

    /// Name of the required project for [`ClasspathEntryKind::Project`] entries.
    pub fn required_project(&self) -> Option<&str> {
        match self.kind {
            ClasspathEntryKind::Project => self.path.project_name(),
            _ => None,
        }
    }

    pub fn filter(&self) -> Result<PathFilter, ClasspathError> {
        PathFilter::new(&self.inclusion_patterns, &self.exclusion_patterns)
    }
}

pub fn is_archive_path(path: &ResourcePath) -> bool {
    matches!(
        path.extension().map(str::to_ascii_lowercase).as_deref(),
        Some("jar" | "zip")
    )
}
