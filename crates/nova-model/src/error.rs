use nova_classpath::ClasspathError;
use nova_vfs::VfsError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::handle::ElementHandle;

pub type Result<T, E = ModelError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ModelError {
    /// The resource backing the element no longer exists (or never did).
    #[error("{0} does not exist")]
    NotPresent(ElementHandle),

    #[error("operation cancelled")]
    Cancelled,

    #[error("project dependency cycle: {}", projects.join(" -> "))]
    CycleDetected { projects: Vec<String> },

    #[error("invalid archive {path}: {message}")]
    InvalidArchive { path: String, message: String },

    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },

    #[error(transparent)]
    Classpath(ClasspathError),

    #[error(transparent)]
    Resource(#[from] VfsError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ClasspathError> for ModelError {
    fn from(err: ClasspathError) -> Self {
        match err {
            ClasspathError::CycleDetected { projects } => ModelError::CycleDetected { projects },
            other => ModelError::Classpath(other),
        }
    }
}

impl ModelError {
    pub fn operation(operation: &str, message: impl Into<String>) -> Self {
        ModelError::Operation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_present(&self) -> bool {
        matches!(self, ModelError::NotPresent(_))
    }
}
