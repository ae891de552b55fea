//! Incremental Java model for Nova.
//!
//! The model is a tree of cheap [`ElementHandle`]s (model, projects, roots, packages,
//! compilation units and class files, then their members). Structural [`ElementInfo`]s are built
//! lazily and cached by the [`ModelManager`]; an element is *open* while its info is cached.
//!
//! The manager observes a [`nova_vfs::Workspace`]. Every resource change batch is translated
//! into an [`ElementDelta`] tree, cached infos touched by the change are closed, and the delta is
//! fired to [`ElementChangedListener`]s. Mutations of the model go through
//! [`ModelOperation`]s, which fire once per top-level operation.

mod archive;
mod builder;
mod cache;
mod config;
mod create_unit;
mod delta;
mod error;
mod external;
mod handle;
mod info;
mod lookup;
mod manager;
mod notify;
mod open;
mod operation;
mod post_action;
mod processor;
mod set_classpath;

pub use archive::ArchiveHandle;
pub use builder::{
    BuiltElement, BuiltStructure, EmptyStructureBuilder, Indexer, NoopIndexer, StructureBuilder,
};
pub use config::{CacheConfig, ClasspathConfig, ConfigError, ExternalConfig, ModelConfig};
pub use create_unit::CreateCompilationUnitOperation;
pub use delta::{merge_deltas, DeltaFlags, DeltaKind, ElementDelta};
pub use error::{ModelError, Result};
pub use external::RefreshExternalArchivesOperation;
pub use handle::{ElementHandle, ElementKind};
pub use info::{ElementInfo, Modifiers};
pub use lookup::NameLookup;
pub use manager::{ModelManager, ModelManagerBuilder};
pub use notify::{ElementChangedEvent, ElementChangedListener, EventMask, FireKind, SearchScope};
pub use operation::{ModelOperation, OperationContext, OperationState};
pub use post_action::{InsertionMode, PostAction};
pub use set_classpath::SetClasspathOperation;
