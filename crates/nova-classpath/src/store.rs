use std::collections::HashMap;

use parking_lot::RwLock;

use crate::entry::ClasspathEntry;
use crate::ClasspathError;

/// Persistence collaborator for raw project classpaths.
pub trait ClasspathStore: Send + Sync {
    /// The stored classpath of `project`, or `None` if nothing has been saved.
    fn load(&self, project: &str) -> Result<Option<Vec<ClasspathEntry>>, ClasspathError>;

    fn save(&self, project: &str, entries: &[ClasspathEntry]) -> Result<(), ClasspathError>;
}

/// A [`ClasspathStore`] kept in memory, counting saves per project.
#[derive(Debug, Default)]
pub struct InMemoryClasspathStore {
    projects: RwLock<HashMap<String, (Vec<ClasspathEntry>, usize)>>,
}

impl InMemoryClasspathStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self, project: &str) -> usize {
        self.projects
            .read()
            .get(project)
            .map(|(_, saves)| *saves)
            .unwrap_or(0)
    }
}

impl ClasspathStore for InMemoryClasspathStore {
    fn load(&self, project: &str) -> Result<Option<Vec<ClasspathEntry>>, ClasspathError> {
        Ok(self
            .projects
            .read()
            .get(project)
            .map(|(entries, _)| entries.clone()))
    }

    fn save(&self, project: &str, entries: &[ClasspathEntry]) -> Result<(), ClasspathError> {
        let mut projects = self.projects.write();
        let slot = projects.entry(project.to_string()).or_default();
        slot.0 = entries.to_vec();
        slot.1 += 1;
        Ok(())
    }
}
