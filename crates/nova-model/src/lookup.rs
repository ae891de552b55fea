use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::handle::ElementHandle;
use crate::manager::ModelManager;

/// Package name -> package handles visible from one project: its own roots followed by the roots
/// of the projects it requires, in classpath order.
#[derive(Debug, Default)]
pub struct NameLookup {
    packages: HashMap<String, Vec<ElementHandle>>,
}

impl NameLookup {
    pub(crate) fn build(manager: &ModelManager, project: &str, cancel: &CancellationToken) -> Self {
        let mut lookup = NameLookup::default();
        let mut projects = vec![project.to_string()];
        if let Some(entries) = manager.classpath(project) {
            for required in entries.iter().filter_map(|entry| entry.required_project()) {
                if !projects.iter().any(|seen| seen == required) {
                    projects.push(required.to_string());
                }
            }
        }

        for name in projects {
            let handle = manager.model().project(&name);
            let roots = match manager.get_element_info_with_cancel(&handle, cancel) {
                Ok(info) => info.children().to_vec(),
                Err(err) => {
                    tracing::debug!(target = "nova.model", project = %name, error = %err, "skipping project in name lookup");
                    continue;
                }
            };
            for root in roots {
                match manager.get_element_info_with_cancel(&root, cancel) {
                    Ok(info) => {
                        for package in info.children() {
                            lookup
                                .packages
                                .entry(package.name().to_string())
                                .or_default()
                                .push(package.clone());
                        }
                    }
                    Err(err) => {
                        tracing::debug!(target = "nova.model", root = ?root, error = %err, "skipping root in name lookup");
                    }
                }
            }
        }
        lookup
    }

    pub fn find_packages(&self, name: &str) -> &[ElementHandle] {
        self.packages.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}
