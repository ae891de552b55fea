//! Host resource layer for Nova's model cache.
//!
//! The workspace is responsible for:
//! - Holding the host resource tree (projects, folders, files) and files outside any project.
//! - Grouping mutations into transactions and coalescing the changes of one transaction.
//! - Delivering one [`ResourceDelta`] tree per transaction to registered observers.

mod change;
mod error;
mod path;
mod watch;
mod workspace;

pub use change::{ResourceDelta, ResourceDeltaFlags, ResourceDeltaKind, ResourceKind};
pub use error::VfsError;
pub use path::ResourcePath;
pub use watch::{ResourceChangeEvent, ResourceEventKind, ResourceObserver};
pub use workspace::Workspace;
