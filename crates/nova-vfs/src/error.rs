use crate::path::ResourcePath;

/// Errors produced by host resource tree mutations and reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VfsError {
    #[error("resource {0} does not exist")]
    NotFound(ResourcePath),

    #[error("resource {0} already exists")]
    AlreadyExists(ResourcePath),

    #[error("parent of {0} does not exist or is not a container")]
    ParentMissing(ResourcePath),

    #[error("resource {0} is not a file")]
    NotAFile(ResourcePath),

    #[error("project {0} is closed")]
    ProjectClosed(String),

    #[error("invalid resource path {0}")]
    InvalidPath(ResourcePath),
}
