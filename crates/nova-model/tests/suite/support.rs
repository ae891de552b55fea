use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nova_classpath::{ClasspathEntry, InMemoryClasspathStore};
use nova_model::{
    BuiltElement, BuiltStructure, ElementChangedEvent, ElementDelta, ElementHandle, ElementKind,
    EventMask, Indexer, ModelConfig, ModelManager, StructureBuilder,
};
use nova_vfs::{ResourcePath, VfsError, Workspace};
use parking_lot::Mutex;

/// Reads one declaration per line: `class A` opens a type, `method m` and `field f` add members to
/// the last type. A line reading `!` marks the structure as unknown.
#[derive(Debug, Default)]
pub struct LineBuilder {
    builds: AtomicUsize,
}

impl LineBuilder {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl StructureBuilder for LineBuilder {
    fn build(&self, _handle: &ElementHandle, bytes: &[u8]) -> BuiltStructure {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(bytes);
        let mut structure = BuiltStructure {
            elements: Vec::new(),
            structure_known: true,
        };
        for line in text.lines().map(str::trim) {
            if line == "!" {
                structure.structure_known = false;
            } else if let Some(name) = line.strip_prefix("class ") {
                structure
                    .elements
                    .push(BuiltElement::new(ElementKind::Type, name));
            } else if let Some(name) = line.strip_prefix("method ") {
                if let Some(ty) = structure.elements.last_mut() {
                    ty.children.push(BuiltElement::new(ElementKind::Method, name));
                }
            } else if let Some(name) = line.strip_prefix("field ") {
                if let Some(ty) = structure.elements.last_mut() {
                    ty.children.push(BuiltElement::new(ElementKind::Field, name));
                }
            }
        }
        structure
    }
}

/// Records indexer calls as `add /P/src/A.java` or `index-all P`. `index_all` always fails.
#[derive(Debug, Default)]
pub struct RecordingIndexer {
    calls: Mutex<Vec<String>>,
}

impl RecordingIndexer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Indexer for RecordingIndexer {
    fn add(&self, path: &ResourcePath, _project: &str) -> anyhow::Result<()> {
        self.calls.lock().push(format!("add {path}"));
        Ok(())
    }

    fn remove(&self, path: &ResourcePath, _project: &str) -> anyhow::Result<()> {
        self.calls.lock().push(format!("remove {path}"));
        Ok(())
    }

    fn index_all(&self, project: &str) -> anyhow::Result<()> {
        self.calls.lock().push(format!("index-all {project}"));
        anyhow::bail!("index unavailable")
    }
}

/// Listener that keeps every event it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<ElementChangedEvent>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<ElementChangedEvent> {
        self.events.lock().clone()
    }

    /// Deltas delivered with `kind`.
    pub fn deltas(&self, kind: EventMask) -> Vec<Arc<ElementDelta>> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .map(|event| Arc::clone(&event.delta))
            .collect()
    }

    /// The single `POST_CHANGE` delta recorded so far.
    pub fn single_post_change(&self) -> Arc<ElementDelta> {
        let deltas = self.deltas(EventMask::POST_CHANGE);
        assert_eq!(deltas.len(), 1, "expected one POST_CHANGE event, got {deltas:#?}");
        Arc::clone(&deltas[0])
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub struct Fixture {
    pub workspace: Arc<Workspace>,
    pub manager: Arc<ModelManager>,
    pub builder: Arc<LineBuilder>,
    pub indexer: Arc<RecordingIndexer>,
    pub store: Arc<InMemoryClasspathStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    pub fn with_config(config: ModelConfig) -> Self {
        let workspace = Arc::new(Workspace::new());
        let builder = Arc::new(LineBuilder::default());
        let indexer = Arc::new(RecordingIndexer::default());
        let store = Arc::new(InMemoryClasspathStore::new());
        let manager = ModelManager::builder(Arc::clone(&workspace))
            .structure_builder(builder.clone())
            .indexer(indexer.clone())
            .classpath_store(store.clone())
            .config(config)
            .build();
        Self {
            workspace,
            manager,
            builder,
            indexer,
            store,
        }
    }

    pub fn model(&self) -> ElementHandle {
        self.manager.model().clone()
    }

    /// Declares `name` as a Java project and creates it together with `files` (paths relative to
    /// the project). Every folder named by a source entry is created too.
    pub fn java_project(&self, name: &str, entries: Vec<ClasspathEntry>, files: &[(&str, &str)]) {
        let folders: Vec<ResourcePath> = entries
            .iter()
            .filter(|entry| entry.required_project().is_none() && !entry.is_archive())
            .map(|entry| entry.path.clone())
            .filter(|path| path.project_name() == Some(name))
            .collect();
        self.manager.declare_java_project(name, entries);
        let project = ResourcePath::new(name);
        self.workspace
            .run(|ws| -> Result<(), VfsError> {
                ws.create_project(name)?;
                for folder in &folders {
                    ws.create_folders(folder)?;
                }
                for (relative, contents) in files {
                    let path = project.join(relative);
                    if let Some(parent) = path.parent() {
                        ws.create_folders(&parent)?;
                    }
                    ws.create_file(&path, contents.as_bytes().to_vec())?;
                }
                Ok(())
            })
            .unwrap();
    }

    pub fn listen(&self, mask: EventMask) -> Recorder {
        let recorder = Recorder::default();
        let events = Arc::clone(&recorder.events);
        self.manager.add_listener(
            Arc::new(move |event: &ElementChangedEvent| events.lock().push(event.clone())),
            mask,
        );
        recorder
    }
}

pub fn path(text: &str) -> ResourcePath {
    ResourcePath::new(text)
}

/// A stored (uncompressed) archive with the given entries.
pub fn jar(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Walks from `delta` down to `element`, asserting each level has exactly one affected child.
pub fn assert_single_chain(delta: &ElementDelta, element: &ElementHandle) {
    let mut current = delta;
    loop {
        if current.element() == element {
            return;
        }
        assert_eq!(
            current.affected_children().len(),
            1,
            "expected a single affected child below {:?}:\n{current}",
            current.element()
        );
        current = &current.affected_children()[0];
    }
}
