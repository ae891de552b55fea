use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use nova_classpath::{
    ClasspathEntry, ClasspathStore, InMemoryClasspathStore, ProjectGraph, RootIndex, RootMap,
    TimestampCache,
};
use nova_vfs::{ResourceDelta, ResourceObserver, ResourcePath, Workspace};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::builder::{EmptyStructureBuilder, Indexer, NoopIndexer, StructureBuilder};
use crate::cache::ModelCache;
use crate::config::ModelConfig;
use crate::delta::{merge_deltas, ElementDelta};
use crate::error::Result;
use crate::external::RefreshExternalArchivesOperation;
use crate::handle::ElementHandle;
use crate::info::ElementInfo;
use crate::lookup::NameLookup;
use crate::notify::{
    ElementChangedListener, EventMask, FireKind, Notifier, ResourceEventAdapter, SearchScope,
};
use crate::open;
use crate::operation::{self, ModelOperation, OperationStack, OperationState};
use crate::post_action::{InsertionMode, PostAction};
use crate::processor::DeltaProcessor;

/// Owner of the model cache, the root index, the listener table and the pending delta queue.
///
/// A manager observes its [`Workspace`] for the whole of its lifetime: every resource change
/// batch is translated into an element delta and fired to listeners.
pub struct ModelManager {
    pub(crate) workspace: Arc<Workspace>,
    pub(crate) builder: Arc<dyn StructureBuilder>,
    pub(crate) indexer: Arc<dyn Indexer>,
    pub(crate) store: Arc<dyn ClasspathStore>,
    config: ModelConfig,
    model: ElementHandle,
    pub(crate) cache: Mutex<ModelCache>,
    /// Declared Java projects and their raw classpaths.
    pub(crate) projects: RwLock<BTreeMap<String, Vec<ClasspathEntry>>>,
    pub(crate) roots: RootIndex,
    notifier: Notifier,
    queue: Mutex<Vec<ElementDelta>>,
    /// Resource batches translated whose PostChange event has not been delivered yet.
    pending_batches: Mutex<HashSet<u64>>,
    pub(crate) operations: Mutex<HashMap<ThreadId, OperationStack>>,
    lookups: Mutex<HashMap<String, Arc<NameLookup>>>,
    pub(crate) timestamps: Mutex<TimestampCache>,
    observer: Mutex<Option<Arc<dyn ResourceObserver>>>,
}

pub struct ModelManagerBuilder {
    workspace: Arc<Workspace>,
    builder: Arc<dyn StructureBuilder>,
    indexer: Arc<dyn Indexer>,
    store: Arc<dyn ClasspathStore>,
    config: ModelConfig,
}

impl ModelManagerBuilder {
    pub fn structure_builder(mut self, builder: Arc<dyn StructureBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn classpath_store(mut self, store: Arc<dyn ClasspathStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<ModelManager> {
        let timestamps = match &self.config.external.timestamp_cache {
            Some(path) => TimestampCache::load(path),
            None => TimestampCache::new(),
        };
        let manager = Arc::new(ModelManager {
            workspace: self.workspace,
            builder: self.builder,
            indexer: self.indexer,
            store: self.store,
            cache: Mutex::new(ModelCache::new(self.config.cache.openable_capacity)),
            config: self.config,
            model: ElementHandle::model(),
            projects: RwLock::new(BTreeMap::new()),
            roots: RootIndex::new(),
            notifier: Notifier::default(),
            queue: Mutex::new(Vec::new()),
            pending_batches: Mutex::new(HashSet::new()),
            operations: Mutex::new(HashMap::new()),
            lookups: Mutex::new(HashMap::new()),
            timestamps: Mutex::new(timestamps),
            observer: Mutex::new(None),
        });

        let observer: Arc<dyn ResourceObserver> = Arc::new(ResourceEventAdapter {
            manager: Arc::downgrade(&manager),
        });
        manager.workspace.add_observer(Arc::clone(&observer));
        *manager.observer.lock() = Some(observer);
        manager
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.get_mut().take() {
            self.workspace.remove_observer(&observer);
        }
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("projects", &self.projects.read().len())
            .field("cached", &self.cache.lock().len())
            .field("listeners", &self.notifier.len())
            .finish()
    }
}

impl ModelManager {
    pub fn builder(workspace: Arc<Workspace>) -> ModelManagerBuilder {
        ModelManagerBuilder {
            workspace,
            builder: Arc::new(EmptyStructureBuilder),
            indexer: Arc::new(NoopIndexer),
            store: Arc::new(InMemoryClasspathStore::new()),
            config: ModelConfig::default(),
        }
    }

    pub fn model(&self) -> &ElementHandle {
        &self.model
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // Java projects and classpaths.

    /// Declares `name` as a Java project with the given raw classpath.
    pub fn declare_java_project(&self, name: &str, entries: Vec<ClasspathEntry>) {
        self.projects.write().insert(name.to_string(), entries);
        self.roots.mark_stale();
        let project = self.model.project(name);
        self.close(&project);
        if self.workspace.is_project_open(name) {
            self.add_to_parent_info(&self.model, &project);
        }
        self.reset_lookup(name);
    }

    pub fn is_java_project(&self, name: &str) -> bool {
        self.projects.read().contains_key(name)
    }

    pub fn java_projects(&self) -> Vec<String> {
        self.projects.read().keys().cloned().collect()
    }

    pub fn classpath(&self, project: &str) -> Option<Vec<ClasspathEntry>> {
        self.projects.read().get(project).cloned()
    }

    /// Stores a new raw classpath for `project`, refreshes its root list and persists it.
    pub(crate) fn set_classpath(&self, project: &str, entries: Vec<ClasspathEntry>) {
        self.projects.write().insert(project.to_string(), entries.clone());
        self.roots.mark_stale();
        self.refresh_project_children(project);
        self.reset_lookup(project);
        if let Err(err) = self.store.save(project, &entries) {
            tracing::warn!(target = "nova.model", project, error = %err, "failed to persist classpath");
        }
    }

    /// Moves the declaration of `from` to `to`, rebasing entries inside the project and updating
    /// project references. Returns `false` if there was nothing to move.
    pub(crate) fn transfer_project_declaration(&self, from: &str, to: &str) -> bool {
        let mut projects = self.projects.write();
        if projects.contains_key(to) {
            return false;
        }
        let Some(entries) = projects.remove(from) else {
            return false;
        };
        let from_path = ResourcePath::new(from);
        let to_path = ResourcePath::new(to);
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                if entry.required_project().is_none() {
                    if let Some(path) = entry.path.rebase(&from_path, &to_path) {
                        entry.path = path;
                    }
                }
                entry
            })
            .collect();
        projects.insert(to.to_string(), entries);
        for entries in projects.values_mut() {
            for entry in entries.iter_mut() {
                if entry.required_project() == Some(from) {
                    entry.path = to_path.clone();
                }
            }
        }
        drop(projects);
        self.lookups.lock().remove(from);
        true
    }

    pub(crate) fn forget_project(&self, name: &str) {
        self.projects.write().remove(name);
        self.lookups.lock().remove(name);
    }

    pub(crate) fn replace_classpath_entry(
        &self,
        project: &str,
        old_path: &ResourcePath,
        replacement: ClasspathEntry,
    ) {
        let mut projects = self.projects.write();
        let Some(entries) = projects.get_mut(project) else {
            return;
        };
        if let Some(entry) = entries
            .iter_mut()
            .find(|entry| entry.required_project().is_none() && &entry.path == old_path)
        {
            *entry = replacement;
        }
    }

    pub(crate) fn remove_classpath_entry(&self, project: &str, path: &ResourcePath) -> bool {
        let mut projects = self.projects.write();
        let Some(entries) = projects.get_mut(project) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.required_project().is_some() || &entry.path != path);
        entries.len() != before
    }

    /// Rewrites the cached root list of an open project from its classpath; roots that are no
    /// longer listed are closed.
    pub(crate) fn refresh_project_children(&self, name: &str) {
        let project = self.model.project(name);
        let mut roots: Vec<ElementHandle> = Vec::new();
        for entry in self.classpath(name).unwrap_or_default() {
            if entry.required_project().is_some() {
                continue;
            }
            let root = project.root(&entry.path);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        let mut dropped = Vec::new();
        self.cache.lock().update(&project, |info| {
            dropped = info
                .children
                .iter()
                .filter(|child| !roots.contains(child))
                .cloned()
                .collect();
            info.children = roots;
        });
        for root in dropped {
            self.close(&root);
        }
    }

    // Cache.

    /// The cached info of `handle`, without opening anything.
    pub fn peek_info(&self, handle: &ElementHandle) -> Option<Arc<ElementInfo>> {
        self.cache.lock().peek(handle).cloned()
    }

    /// The info of `handle`, opening it (and its ancestors) if needed.
    pub fn get_element_info(&self, handle: &ElementHandle) -> Result<Arc<ElementInfo>> {
        self.get_element_info_with_cancel(handle, &CancellationToken::new())
    }

    pub fn get_element_info_with_cancel(
        &self,
        handle: &ElementHandle,
        cancel: &CancellationToken,
    ) -> Result<Arc<ElementInfo>> {
        open::element_info(self, handle, cancel)
    }

    pub fn children(&self, handle: &ElementHandle) -> Result<Vec<ElementHandle>> {
        Ok(self.get_element_info(handle)?.children().to_vec())
    }

    /// Whether `handle` can be opened.
    pub fn exists(&self, handle: &ElementHandle) -> bool {
        self.get_element_info(handle).is_ok()
    }

    pub fn is_open(&self, handle: &ElementHandle) -> bool {
        self.cache.lock().contains(handle)
    }

    /// Closes `handle` and everything below it, children first, running release hooks. Closing a
    /// closed element does nothing.
    pub fn close(&self, handle: &ElementHandle) {
        let removed = self.cache.lock().remove_subtree(handle);
        if removed.is_empty() {
            return;
        }
        tracing::trace!(target = "nova.model.cache", element = ?handle, count = removed.len(), "closed");
        for (_, info) in removed {
            if let Some(archive) = info.archive() {
                archive.release();
            }
        }
    }

    /// Like [`ModelManager::close`] without release hooks.
    pub fn remove_info(&self, handle: &ElementHandle) {
        self.cache.lock().remove_subtree(handle);
    }

    /// Number of cached infos.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Number of cached packages, compilation units and class files.
    pub fn cached_openables(&self) -> usize {
        self.cache.lock().openable_len()
    }

    pub(crate) fn add_to_parent_info(&self, parent: &ElementHandle, child: &ElementHandle) {
        self.cache
            .lock()
            .update(parent, |info| info.add_child(child.clone()));
    }

    pub(crate) fn remove_from_parent_info(&self, parent: &ElementHandle, child: &ElementHandle) {
        self.cache.lock().update(parent, |info| info.remove_child(child));
    }

    // Roots.

    /// Recomputes the root index if it is stale.
    pub fn initialize_roots(&self) {
        let Some(ticket) = self.roots.begin_recompute() else {
            return;
        };
        let map = {
            let projects = self.projects.read();
            RootMap::from_projects(
                projects
                    .iter()
                    .filter(|(name, _)| self.workspace.is_project_open(name))
                    .map(|(name, entries)| (name.as_str(), entries.as_slice())),
            )
        };
        let generation = ticket.generation();
        if self.roots.commit(ticket, map) {
            tracing::debug!(target = "nova.model", generation, "root index recomputed");
        }
    }

    pub fn roots_snapshot(&self) -> Arc<RootMap> {
        self.initialize_roots();
        self.roots.current()
    }

    // Name lookup.

    pub fn name_lookup(&self, project: &str) -> Arc<NameLookup> {
        if let Some(lookup) = self.lookups.lock().get(project) {
            return Arc::clone(lookup);
        }
        let cancel = CancellationToken::new();
        let lookup = Arc::new(NameLookup::build(self, project, &cancel));
        self.lookups
            .lock()
            .entry(project.to_string())
            .or_insert(lookup)
            .clone()
    }

    /// Packages named `name` visible from `project`.
    pub fn find_packages(&self, project: &str, name: &str) -> Vec<ElementHandle> {
        self.name_lookup(project).find_packages(name).to_vec()
    }

    /// Drops the name lookup of `project` and of every project requiring it.
    pub(crate) fn reset_lookup(&self, project: &str) {
        let dependents = self.roots.current().dependents(project);
        let mut lookups = self.lookups.lock();
        lookups.remove(project);
        for dependent in dependents {
            lookups.remove(&dependent);
        }
    }

    // Project graph.

    /// Checks declared projects for dependency cycles according to the configured cycle mode.
    pub fn check_project_cycles(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.project_graph().check(self.config.classpath.cycle_mode)?)
    }

    pub fn project_build_order(&self) -> Result<Vec<String>> {
        Ok(self.project_graph().build_order()?)
    }

    fn project_graph(&self) -> ProjectGraph {
        let projects = self.projects.read();
        ProjectGraph::from_projects(
            projects
                .iter()
                .map(|(name, entries)| (name.as_str(), entries.as_slice())),
        )
    }

    // External archives.

    /// Compares external archives with their cached timestamps and fires the differences.
    pub fn refresh_external_archives(&self, project: Option<&str>) -> Result<Vec<ElementHandle>> {
        let mut op = RefreshExternalArchivesOperation::new(project);
        self.run_operation(&mut op)?;
        Ok(op.changed_roots().to_vec())
    }

    pub fn external_timestamp(&self, path: &ResourcePath) -> Option<i64> {
        self.timestamps.lock().get(path)
    }

    /// Persists the external archive timestamps if a cache path is configured. Failures are
    /// logged.
    pub fn save_timestamps(&self) {
        let Some(path) = &self.config.external.timestamp_cache else {
            return;
        };
        let result = self.timestamps.lock().save(path);
        if let Err(err) = result {
            tracing::warn!(
                target = "nova.model",
                path = %path.display(),
                error = %err,
                "failed to save external archive timestamps"
            );
        }
    }

    // Listeners and firing.

    pub fn add_listener(&self, listener: Arc<dyn ElementChangedListener>, mask: EventMask) {
        self.notifier.add(listener, mask);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ElementChangedListener>) -> bool {
        self.notifier.remove(listener)
    }

    pub fn register_search_scope(&self, scope: Weak<dyn SearchScope>) {
        self.notifier.register_scope(scope);
    }

    /// Queues `delta` for the next firing.
    pub fn register_delta(&self, delta: ElementDelta) {
        self.queue.lock().push(delta);
    }

    /// Merges the queued deltas and notifies listeners. A `PreAutoBuild` firing keeps the queue
    /// for the following `PostChange` firing; the other kinds drain it.
    pub fn fire(&self, kind: FireKind) {
        self.fire_with(Vec::new(), kind);
    }

    /// [`ModelManager::fire`] with `extra` deltas merged into the queued ones.
    pub(crate) fn fire_with(&self, extra: Vec<ElementDelta>, kind: FireKind) {
        let mut deltas = {
            let mut queue = self.queue.lock();
            match kind {
                FireKind::PreAutoBuild => queue.clone(),
                FireKind::Default | FireKind::PostChange => std::mem::take(&mut *queue),
            }
        };
        deltas.extend(extra);
        let Some(merged) = merge_deltas(deltas) else {
            return;
        };
        tracing::debug!(target = "nova.model.delta", ?kind, "firing\n{merged}");
        self.notifier.fire(Arc::new(merged), kind);
    }

    /// Notifies listeners of `delta` directly, bypassing the queue.
    pub fn fire_delta(&self, delta: ElementDelta, kind: FireKind) {
        self.notifier.fire(Arc::new(delta), kind);
    }

    // Resource deltas.

    /// Translates one resource change tree into element deltas. Nothing is queued or fired.
    pub fn process_change_tree(&self, delta: &ResourceDelta) -> Vec<ElementDelta> {
        DeltaProcessor::new(self).process(delta).into_iter().collect()
    }

    /// Translates a resource batch once, however many events deliver it. Batches may nest (a
    /// PRE_AUTO_BUILD listener changing resources) or arrive from several threads, so every
    /// batch is tracked until [`ModelManager::finish_batch`].
    pub(crate) fn translate_batch(&self, batch: u64, delta: &ResourceDelta) {
        if !self.pending_batches.lock().insert(batch) {
            return;
        }
        for element_delta in self.process_change_tree(delta) {
            self.register_delta(element_delta);
        }
    }

    /// Forgets `batch` once its PostChange event has been handled.
    pub(crate) fn finish_batch(&self, batch: u64) {
        self.pending_batches.lock().remove(&batch);
    }

    // Operations.

    pub fn run_operation(&self, op: &mut dyn ModelOperation) -> Result<()> {
        self.run_operation_with_cancel(op, CancellationToken::new())
    }

    pub fn run_operation_with_cancel(
        &self,
        op: &mut dyn ModelOperation,
        cancel: CancellationToken,
    ) -> Result<()> {
        operation::run_operation(self, op, cancel)
    }

    /// Queues `action` on the current thread's operation, or runs it now when no operation is
    /// running.
    pub fn post_action(&self, action: PostAction, mode: InsertionMode) -> Result<()> {
        let thread = thread::current().id();
        if operation::is_running(self, thread) {
            if let Some(stack) = self.operations.lock().get_mut(&thread) {
                stack.actions.push(action, mode);
                return Ok(());
            }
        }
        action.run(self)
    }

    /// State of the innermost operation running on this thread.
    pub fn operation_state(&self) -> Option<OperationState> {
        operation::current_state(self, thread::current().id())
    }
}
