use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use nova_classpath::ClasspathEntry;
use nova_model::{
    DeltaFlags, ElementChangedEvent, ElementChangedListener, ElementDelta, EventMask, FireKind,
    ModelManager, SearchScope,
};
use parking_lot::Mutex;

use super::support::{path, Fixture};

fn project_change(manager: &ModelManager) -> ElementDelta {
    let model = manager.model().clone();
    let mut delta = ElementDelta::new(model.clone());
    delta.changed(&model.project("P"), DeltaFlags::CONTENT);
    delta
}

fn counter() -> (Arc<AtomicUsize>, Arc<dyn ElementChangedListener>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let listener: Arc<dyn ElementChangedListener> =
        Arc::new(move |_: &ElementChangedEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    (count, listener)
}

#[test]
fn default_firing_runs_both_passes_with_one_delta() {
    let fx = Fixture::new();
    let recorder = fx.listen(EventMask::PRE_AUTO_BUILD | EventMask::POST_CHANGE);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::Default);

    let events = recorder.events();
    let kinds: Vec<EventMask> = events.iter().map(|event| event.kind).collect();
    assert_eq!(kinds, vec![EventMask::PRE_AUTO_BUILD, EventMask::POST_CHANGE]);
    assert!(Arc::ptr_eq(&events[0].delta, &events[1].delta));

    // The queue was drained.
    fx.manager.fire(FireKind::Default);
    assert_eq!(recorder.events().len(), 2);
}

#[test]
fn pre_auto_build_keeps_the_queue_for_post_change() {
    let fx = Fixture::new();
    let pre = fx.listen(EventMask::PRE_AUTO_BUILD);
    let post = fx.listen(EventMask::POST_CHANGE);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::PreAutoBuild);
    assert_eq!(pre.events().len(), 1);
    assert!(post.events().is_empty());

    fx.manager.fire(FireKind::PostChange);
    assert_eq!(pre.events().len(), 1);
    assert_eq!(post.events().len(), 1);
}

#[test]
fn queued_deltas_are_merged_before_firing() {
    let fx = Fixture::new();
    let recorder = fx.listen(EventMask::POST_CHANGE);
    let model = fx.model();
    let root = model.project("P").root(&path("/P/src"));

    let mut first = ElementDelta::new(model.clone());
    first.added(&root.package("a"));
    let mut second = ElementDelta::new(model.clone());
    second.changed(&root.package("b"), DeltaFlags::CONTENT);
    fx.manager.register_delta(first);
    fx.manager.register_delta(second);
    fx.manager.fire(FireKind::PostChange);

    let delta = recorder.single_post_change();
    assert_eq!(delta.find(&root).unwrap().affected_children().len(), 2);
}

struct SelfRemoving {
    manager: Weak<ModelManager>,
    me: Mutex<Option<Arc<dyn ElementChangedListener>>>,
    calls: AtomicUsize,
}

impl ElementChangedListener for SelfRemoving {
    fn element_changed(&self, _event: &ElementChangedEvent) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if let Some(me) = self.me.lock().take() {
            assert!(manager.remove_listener(&me));
        }
    }
}

#[test]
fn listener_removed_during_pre_auto_build_misses_post_change() {
    let fx = Fixture::new();
    let listener = Arc::new(SelfRemoving {
        manager: Arc::downgrade(&fx.manager),
        me: Mutex::new(None),
        calls: AtomicUsize::new(0),
    });
    let registered: Arc<dyn ElementChangedListener> = listener.clone();
    *listener.me.lock() = Some(Arc::clone(&registered));
    fx.manager.add_listener(
        registered,
        EventMask::PRE_AUTO_BUILD | EventMask::POST_CHANGE,
    );
    let other = fx.listen(EventMask::POST_CHANGE);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::Default);

    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    assert_eq!(other.events().len(), 1);
}

#[test]
fn listener_added_during_firing_waits_for_the_next_one() {
    let fx = Fixture::new();
    let (late_count, late) = counter();
    let manager = Arc::downgrade(&fx.manager);
    let pending = Mutex::new(Some(late));
    fx.manager.add_listener(
        Arc::new(move |_: &ElementChangedEvent| {
            if let (Some(manager), Some(late)) = (manager.upgrade(), pending.lock().take()) {
                manager.add_listener(late, EventMask::POST_CHANGE);
            }
        }),
        EventMask::POST_CHANGE,
    );

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::PostChange);
    assert_eq!(late_count.load(Ordering::SeqCst), 0);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::PostChange);
    assert_eq!(late_count.load(Ordering::SeqCst), 1);
}

#[test]
fn a_panicking_listener_does_not_stop_the_others() {
    let fx = Fixture::new();
    fx.manager.add_listener(
        Arc::new(|_: &ElementChangedEvent| panic!("listener failure")),
        EventMask::POST_CHANGE,
    );
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::PostChange);

    assert_eq!(recorder.events().len(), 1);
}

#[test]
fn re_adding_a_listener_updates_its_mask() {
    let fx = Fixture::new();
    let (count, listener) = counter();
    fx.manager
        .add_listener(Arc::clone(&listener), EventMask::PRE_AUTO_BUILD);
    fx.manager.add_listener(Arc::clone(&listener), EventMask::POST_CHANGE);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::Default);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert!(fx.manager.remove_listener(&listener));
    assert!(!fx.manager.remove_listener(&listener));
}

#[derive(Default)]
struct ProjectScope {
    seen: Mutex<Vec<String>>,
}

impl SearchScope for ProjectScope {
    fn process_delta(&self, delta: &ElementDelta) {
        let mut seen = self.seen.lock();
        for child in delta.affected_children() {
            seen.push(child.element().name().to_string());
        }
    }
}

#[test]
fn search_scopes_see_deltas_until_dropped() {
    let fx = Fixture::new();
    let scope = Arc::new(ProjectScope::default());
    let weak: Weak<dyn SearchScope> = Arc::downgrade(&scope) as Weak<dyn SearchScope>;
    fx.manager.register_search_scope(weak);

    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::Default);
    assert_eq!(*scope.seen.lock(), vec!["P".to_string()]);

    drop(scope);
    fx.manager.register_delta(project_change(&fx.manager));
    fx.manager.fire(FireKind::Default);
}

#[test]
fn one_resource_batch_is_delivered_once_per_pass() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let recorder = fx.listen(EventMask::PRE_AUTO_BUILD | EventMask::POST_CHANGE);

    fx.workspace
        .create_file(&path("/P/src/A.java"), b"class A".to_vec())
        .unwrap();

    let kinds: Vec<EventMask> = recorder.events().iter().map(|event| event.kind).collect();
    assert_eq!(kinds, vec![EventMask::PRE_AUTO_BUILD, EventMask::POST_CHANGE]);
    let events = recorder.events();
    assert_eq!(events[0].delta, events[1].delta);
}

#[test]
fn a_batch_nested_in_pre_auto_build_does_not_repeat_the_outer_one() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src")],
        &[("src/A.java", "class A")],
    );
    let package = fx.model().project("P").root(&path("/P/src")).package("");
    let a = package.compilation_unit("A.java");
    let b = package.compilation_unit("B.java");
    fx.manager.get_element_info(&a).unwrap();

    let workspace = Arc::downgrade(&fx.workspace);
    let armed = AtomicBool::new(true);
    fx.manager.add_listener(
        Arc::new(move |_: &ElementChangedEvent| {
            if !armed.swap(false, Ordering::SeqCst) {
                return;
            }
            if let Some(workspace) = workspace.upgrade() {
                workspace
                    .create_file(&path("/P/src/B.java"), b"class B".to_vec())
                    .unwrap();
            }
        }),
        EventMask::PRE_AUTO_BUILD,
    );
    let recorder = fx.listen(EventMask::POST_CHANGE);
    let calls_before = fx.indexer.calls().len();

    fx.workspace
        .set_contents(&path("/P/src/A.java"), b"class A\nmethod m".to_vec())
        .unwrap();

    let deltas = recorder.deltas(EventMask::POST_CHANGE);
    let reporting_a = deltas.iter().filter(|delta| delta.find(&a).is_some()).count();
    assert_eq!(reporting_a, 1);
    assert!(deltas.iter().any(|delta| delta.find(&b).is_some()));

    let indexed_a = fx.indexer.calls()[calls_before..]
        .iter()
        .filter(|call| call.as_str() == "add /P/src/A.java")
        .count();
    assert_eq!(indexed_a, 1);
}
