//! Classpath model for Nova's model cache.
//!
//! - [`ClasspathEntry`]: raw entries as declared by a project.
//! - [`RootMap`] / [`RootIndex`]: resolved roots keyed by path, with snapshot versioning.
//! - [`ProjectGraph`]: project dependency graph and cycle detection.
//! - [`TimestampCache`]: persisted timestamps of external archives.

mod entry;
mod filter;
mod graph;
mod index;
mod persist;
mod roots;
mod store;

use thiserror::Error;

pub use entry::{is_archive_path, ClasspathEntry, ClasspathEntryKind};
pub use filter::PathFilter;
pub use graph::{CycleMode, ProjectGraph};
pub use index::{RecomputeTicket, RootIndex};
pub use persist::TimestampCache;
pub use roots::{RootInfo, RootKind, RootMap};
pub use store::{ClasspathStore, InMemoryClasspathStore};

#[derive(Debug, Error)]
pub enum ClasspathError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid classpath pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("project dependency cycle: {}", projects.join(" -> "))]
    CycleDetected { projects: Vec<String> },
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error("classpath store error: {0}")]
    Store(String),
}
