use std::sync::Arc;

use nova_classpath::{ClasspathEntry, CycleMode};
use nova_model::{
    CreateCompilationUnitOperation, DeltaFlags, DeltaKind, ElementChangedEvent, EventMask,
    FireKind, InsertionMode, ModelConfig,
    ModelError, ModelOperation, OperationContext, OperationState, PostAction, Result,
    SetClasspathOperation,
};
use parking_lot::Mutex;

use super::support::{jar, path, Fixture};

/// Operation whose body is a closure.
struct FnOperation<F> {
    name: &'static str,
    body: F,
}

impl<F> FnOperation<F>
where
    F: FnMut(&mut OperationContext<'_>) -> Result<()>,
{
    fn new(name: &'static str, body: F) -> Self {
        Self { name, body }
    }
}

impl<F> ModelOperation for FnOperation<F>
where
    F: FnMut(&mut OperationContext<'_>) -> Result<()>,
{
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&mut self, cx: &mut OperationContext<'_>) -> Result<()> {
        (self.body)(cx)
    }
}

type Log = Arc<Mutex<Vec<String>>>;

fn logging_action(log: &Log, id: &str, entry: &str) -> PostAction {
    let log = Arc::clone(log);
    let entry = entry.to_string();
    PostAction::new(id, move |_| {
        log.lock().push(entry);
        Ok(())
    })
}

#[test]
fn nested_operations_fire_once_at_the_top() {
    let fx = Fixture::new();
    let recorder = fx.listen(EventMask::PRE_AUTO_BUILD | EventMask::POST_CHANGE);
    let model = fx.model();

    let mut op = FnOperation::new("outer", |cx| {
        let p = cx.manager().model().project("P");
        cx.delta_mut().changed(&p, DeltaFlags::CONTENT);
        cx.run_nested(&mut FnOperation::new("inner", |cx| {
            let q = cx.manager().model().project("Q");
            cx.delta_mut().changed(&q, DeltaFlags::CONTENT);
            Ok(())
        }))?;
        assert!(recorder.events().is_empty());
        Ok(())
    });
    fx.manager.run_operation(&mut op).unwrap();

    let delta = recorder.single_post_change();
    assert_eq!(recorder.deltas(EventMask::PRE_AUTO_BUILD).len(), 1);
    assert_eq!(
        delta.find(&model.project("P")).unwrap().flags(),
        DeltaFlags::CONTENT
    );
    assert_eq!(
        delta.find(&model.project("Q")).unwrap().flags(),
        DeltaFlags::CONTENT
    );
}

#[test]
fn operation_state_is_visible_while_executing() {
    let fx = Fixture::new();
    let mut states = Vec::new();
    let mut op = FnOperation::new("observe", |cx| {
        states.push(cx.manager().operation_state());
        Ok(())
    });
    fx.manager.run_operation(&mut op).unwrap();
    assert_eq!(states, vec![Some(OperationState::Executing)]);
    assert_eq!(fx.manager.operation_state(), None);
}

#[test]
fn post_actions_run_after_the_body_honoring_insertion_modes() {
    let fx = Fixture::new();
    let log: Log = Log::default();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    let mut op = FnOperation::new("queue", |cx| {
        let p = cx.manager().model().project("P");
        cx.delta_mut().changed(&p, DeltaFlags::CONTENT);
        cx.post_action(logging_action(&log, "x", "x1"), InsertionMode::Append)?;
        cx.post_action(logging_action(&log, "y", "y1"), InsertionMode::Append)?;
        cx.post_action(logging_action(&log, "x", "x2"), InsertionMode::RemoveAllAppend)?;
        cx.post_action(logging_action(&log, "y", "y2"), InsertionMode::KeepExisting)?;
        let events = recorder.clone();
        let seen = Arc::clone(&log);
        cx.post_action(
            PostAction::new("fired?", move |_| {
                seen.lock().push(format!("events={}", events.events().len()));
                Ok(())
            }),
            InsertionMode::Append,
        )?;
        log.lock().push("body".to_string());
        Ok(())
    });
    fx.manager.run_operation(&mut op).unwrap();

    assert_eq!(*log.lock(), vec!["body", "y1", "x2", "events=0"]);
    assert_eq!(recorder.events().len(), 1);
}

#[test]
fn operations_run_by_post_actions_are_nested() {
    let fx = Fixture::new();
    let recorder = fx.listen(EventMask::POST_CHANGE);
    let model = fx.model();

    let mut op = FnOperation::new("outer", |cx| {
        let p = cx.manager().model().project("P");
        cx.delta_mut().changed(&p, DeltaFlags::CONTENT);
        cx.post_action(
            PostAction::new("follow-up", |manager| {
                manager.run_operation(&mut FnOperation::new("follow-up", |cx| {
                    let q = cx.manager().model().project("Q");
                    cx.delta_mut().changed(&q, DeltaFlags::CLASSPATH_CHANGED);
                    Ok(())
                }))
            }),
            InsertionMode::Append,
        )
    });
    fx.manager.run_operation(&mut op).unwrap();

    let delta = recorder.single_post_change();
    assert!(delta.find(&model.project("P")).is_some());
    assert!(delta.find(&model.project("Q")).is_some());
}

#[test]
fn post_actions_queued_by_listeners_run_before_the_operation_returns() {
    let fx = Fixture::new();
    let recorder = fx.listen(EventMask::POST_CHANGE);
    let model = fx.model();
    let log: Log = Log::default();

    let sink = Arc::clone(&log);
    let late = PostAction::new("late", move |manager| {
        sink.lock().push("late".to_string());
        manager.run_operation(&mut FnOperation::new("late", |cx| {
            let q = cx.manager().model().project("Q");
            cx.delta_mut().changed(&q, DeltaFlags::CONTENT);
            Ok(())
        }))
    });
    let manager = Arc::downgrade(&fx.manager);
    let pending = Mutex::new(Some(late));
    fx.manager.add_listener(
        Arc::new(move |_: &ElementChangedEvent| {
            if let (Some(manager), Some(action)) = (manager.upgrade(), pending.lock().take()) {
                manager.post_action(action, InsertionMode::Append).unwrap();
            }
        }),
        EventMask::POST_CHANGE,
    );

    let mut op = FnOperation::new("outer", |cx| {
        let p = cx.manager().model().project("P");
        cx.delta_mut().changed(&p, DeltaFlags::CONTENT);
        Ok(())
    });
    fx.manager.run_operation(&mut op).unwrap();

    assert_eq!(*log.lock(), vec!["late"]);
    let first = recorder.single_post_change();
    assert!(first.find(&model.project("Q")).is_none());

    // The late delta waits for the next firing.
    fx.manager.fire(FireKind::PostChange);
    let deltas = recorder.deltas(EventMask::POST_CHANGE);
    assert_eq!(deltas.len(), 2);
    assert!(deltas[1].find(&model.project("Q")).is_some());
}

#[test]
fn post_action_outside_an_operation_runs_immediately() {
    let fx = Fixture::new();
    let log: Log = Log::default();
    fx.manager
        .post_action(logging_action(&log, "now", "ran"), InsertionMode::Append)
        .unwrap();
    assert_eq!(*log.lock(), vec!["ran"]);
}

#[test]
fn a_failed_operation_still_fires_and_runs_post_actions() {
    let fx = Fixture::new();
    let log: Log = Log::default();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    let mut op = FnOperation::new("failing", |cx| {
        let p = cx.manager().model().project("P");
        cx.delta_mut().removed(&p);
        cx.post_action(logging_action(&log, "cleanup", "cleanup"), InsertionMode::Append)?;
        Err(ModelError::operation("failing", "boom"))
    });
    let err = fx.manager.run_operation(&mut op).unwrap_err();

    assert!(matches!(err, ModelError::Operation { .. }));
    assert_eq!(*log.lock(), vec!["cleanup"]);
    let delta = recorder.single_post_change();
    assert_eq!(
        delta.find(&fx.model().project("P")).unwrap().kind(),
        DeltaKind::Removed
    );
}

#[test]
fn the_first_post_action_failure_is_reported() {
    let fx = Fixture::new();
    let log: Log = Log::default();

    let mut op = FnOperation::new("ok", |cx| {
        cx.post_action(
            PostAction::new("first", |_| Err(ModelError::operation("first", "failed"))),
            InsertionMode::Append,
        )?;
        cx.post_action(
            PostAction::new("second", |_| Err(ModelError::operation("second", "failed"))),
            InsertionMode::Append,
        )?;
        cx.post_action(logging_action(&log, "third", "third"), InsertionMode::Append)
    });
    let err = fx.manager.run_operation(&mut op).unwrap_err();

    assert!(matches!(err, ModelError::Operation { operation, .. } if operation == "first"));
    assert_eq!(*log.lock(), vec!["third"]);
}

#[test]
fn cancelled_operations_stop_at_the_next_check() {
    let fx = Fixture::new();
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let mut op = FnOperation::new("cancellable", |cx| {
        cx.check_cancelled()?;
        panic!("body ran past cancellation");
    });
    let result = fx.manager.run_operation_with_cancel(&mut op, cancel);
    assert!(matches!(result, Err(ModelError::Cancelled)));
}

#[test]
fn creating_a_compilation_unit_is_reported_once() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let package = fx.model().project("P").root(&path("/P/src")).package("");
    fx.manager.get_element_info(&package).unwrap();
    let recorder = fx.listen(EventMask::PRE_AUTO_BUILD | EventMask::POST_CHANGE);

    let mut op = CreateCompilationUnitOperation::new(package.clone(), "A.java", "class A");
    fx.manager.run_operation(&mut op).unwrap();

    let unit = package.compilation_unit("A.java");
    assert_eq!(op.created(), Some(&unit));
    assert_eq!(recorder.deltas(EventMask::PRE_AUTO_BUILD).len(), 1);
    let delta = recorder.single_post_change();
    assert_eq!(delta.find(&unit).unwrap().kind(), DeltaKind::Added);
    assert!(fx.workspace.exists(&path("/P/src/A.java")));
    assert_eq!(fx.manager.children(&package).unwrap(), vec![unit.clone()]);
    assert!(fx.manager.exists(&unit));
}

#[test]
fn creating_a_unit_creates_missing_package_folders() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let root = fx.model().project("P").root(&path("/P/src"));
    let recorder = fx.listen(EventMask::POST_CHANGE);

    let package = root.package("a.b");
    let mut op = CreateCompilationUnitOperation::new(package.clone(), "B.java", "class B");
    fx.manager.run_operation(&mut op).unwrap();

    assert!(fx.workspace.exists(&path("/P/src/a/b/B.java")));
    let delta = recorder.single_post_change();
    assert_eq!(delta.find(&package).unwrap().kind(), DeltaKind::Added);
    assert!(fx.manager.exists(&package.compilation_unit("B.java")));
}

#[test]
fn creating_a_unit_rejects_bad_targets() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let package = fx.model().project("P").root(&path("/P/src")).package("");

    let mut bad_name = CreateCompilationUnitOperation::new(package.clone(), "A.txt", "");
    assert!(matches!(
        fx.manager.run_operation(&mut bad_name),
        Err(ModelError::Operation { .. })
    ));
    let mut not_a_package =
        CreateCompilationUnitOperation::new(fx.model().project("P"), "A.java", "");
    assert!(fx.manager.run_operation(&mut not_a_package).is_err());
    assert!(!fx.workspace.exists(&path("/P/A.java")));
}

#[test]
fn reordering_and_attaching_sources() {
    let fx = Fixture::new();
    fx.workspace
        .set_external_file(&path("/ext/lib.jar"), jar(&[("a/A.class", "class A")]), 1);
    fx.java_project(
        "P",
        vec![
            ClasspathEntry::source("/P/src"),
            ClasspathEntry::library("/ext/lib.jar"),
        ],
        &[],
    );
    let project = fx.model().project("P");
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.manager
        .run_operation(&mut SetClasspathOperation::new(
            "P",
            vec![
                ClasspathEntry::library("/ext/lib.jar").with_source_attachment("/ext/lib-src.zip"),
                ClasspathEntry::source("/P/src"),
                ClasspathEntry::source("/P/gen"),
            ],
        ))
        .unwrap();

    let delta = recorder.single_post_change();
    let src = delta.find(&project.root(&path("/P/src"))).unwrap();
    assert_eq!(src.flags(), DeltaFlags::CLASSPATH_REORDER);
    let lib = delta.find(&project.root(&path("/ext/lib.jar"))).unwrap();
    assert_eq!(
        lib.flags(),
        DeltaFlags::CLASSPATH_REORDER | DeltaFlags::SOURCE_ATTACHED
    );
    let gen = delta.find(&project.root(&path("/P/gen"))).unwrap();
    assert_eq!(gen.kind(), DeltaKind::Added);
    assert!(gen.flags().contains(DeltaFlags::ADDED_TO_CLASSPATH));
}

#[test]
fn changing_filters_reports_content() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src")],
        &[("src/gen/G.java", "class G")],
    );
    let root = fx.model().project("P").root(&path("/P/src"));
    assert!(fx.manager.children(&root).unwrap().contains(&root.package("gen")));
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.manager
        .run_operation(&mut SetClasspathOperation::new(
            "P",
            vec![ClasspathEntry::source("/P/src").with_exclusions(["gen/"])],
        ))
        .unwrap();

    let delta = recorder.single_post_change();
    assert_eq!(delta.find(&root).unwrap().flags(), DeltaFlags::CONTENT);
    assert!(!fx.manager.children(&root).unwrap().contains(&root.package("gen")));
}

#[test]
fn strict_cycle_mode_fails_the_classpath_change() {
    let mut config = ModelConfig::default();
    config.classpath.cycle_mode = CycleMode::Strict;
    let fx = Fixture::with_config(config);
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src"), ClasspathEntry::project("Q")],
        &[],
    );
    fx.java_project("Q", vec![ClasspathEntry::source("/Q/src")], &[]);
    assert_eq!(fx.manager.project_build_order().unwrap(), vec!["Q", "P"]);

    let err = fx
        .manager
        .run_operation(&mut SetClasspathOperation::new(
            "Q",
            vec![ClasspathEntry::source("/Q/src"), ClasspathEntry::project("P")],
        ))
        .unwrap_err();
    match err {
        ModelError::CycleDetected { projects } => assert_eq!(projects, vec!["P", "Q"]),
        other => panic!("expected a cycle, got {other}"),
    }
    // The classpath itself was stored before the check ran.
    assert_eq!(fx.manager.classpath("Q").unwrap().len(), 2);
    assert!(fx.manager.project_build_order().is_err());
}

#[test]
fn report_cycle_mode_returns_the_cycles() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::project("Q")], &[]);
    fx.java_project("Q", vec![ClasspathEntry::project("P")], &[]);

    assert_eq!(
        fx.manager.check_project_cycles().unwrap(),
        vec![vec!["P".to_string(), "Q".to_string()]]
    );
}

#[test]
fn name_lookup_follows_required_projects() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src"), ClasspathEntry::project("Q")],
        &[("src/a/A.java", "class A")],
    );
    fx.java_project(
        "Q",
        vec![ClasspathEntry::source("/Q/src")],
        &[("src/a/B.java", "class B")],
    );
    let p_root = fx.model().project("P").root(&path("/P/src"));
    let q_root = fx.model().project("Q").root(&path("/Q/src"));

    assert_eq!(
        fx.manager.find_packages("P", "a"),
        vec![p_root.package("a"), q_root.package("a")]
    );
    assert_eq!(fx.manager.find_packages("Q", "a"), vec![q_root.package("a")]);
    assert!(fx.manager.find_packages("P", "b").is_empty());

    fx.workspace
        .create_folders(&path("/Q/src/b"))
        .unwrap();
    assert_eq!(fx.manager.find_packages("P", "b"), vec![q_root.package("b")]);
}
