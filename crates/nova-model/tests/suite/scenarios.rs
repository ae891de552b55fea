use nova_classpath::ClasspathEntry;
use nova_model::{DeltaFlags, DeltaKind, ElementKind, EventMask, SetClasspathOperation};
use nova_vfs::VfsError;

use super::support::{assert_single_chain, jar, path, Fixture};

#[test]
fn creating_a_java_project_reports_only_the_project() {
    let fx = Fixture::new();
    let model = fx.model();
    fx.manager.get_element_info(&model).unwrap();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.manager
        .declare_java_project("P", vec![ClasspathEntry::source("/P/src")]);
    fx.workspace
        .run(|ws| -> Result<(), VfsError> {
            ws.create_project("P")?;
            ws.create_folder(&path("/P/src"))?;
            ws.create_file(&path("/P/src/A.java"), b"class A".to_vec())
        })
        .unwrap();

    let delta = recorder.single_post_change();
    let project = model.project("P");
    assert_eq!(delta.element(), &model);
    assert_eq!(delta.affected_children().len(), 1);
    let child = &delta.affected_children()[0];
    assert_eq!(child.element(), &project);
    assert_eq!(child.kind(), DeltaKind::Added);
    assert!(child.affected_children().is_empty());

    assert!(fx
        .manager
        .peek_info(&model)
        .unwrap()
        .children()
        .contains(&project));
    assert!(fx.indexer.calls().contains(&"index-all P".to_string()));
}

#[test]
fn editing_a_compilation_unit_closes_it_and_reports_content() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src")],
        &[("src/A.java", "class A\nmethod run")],
    );
    let package = fx.model().project("P").root(&path("/P/src")).package("");
    let unit = package.compilation_unit("A.java");
    let info = fx.manager.get_element_info(&unit).unwrap();
    let ty = info.children()[0].clone();
    assert!(fx.manager.is_open(&ty));
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace
        .set_contents(&path("/P/src/A.java"), b"class A\nclass B".to_vec())
        .unwrap();

    let delta = recorder.single_post_change();
    assert_single_chain(&delta, &unit);
    let unit_delta = delta.find(&unit).unwrap();
    assert_eq!(unit_delta.kind(), DeltaKind::Changed);
    assert_eq!(unit_delta.flags(), DeltaFlags::CONTENT);
    let package_delta = delta.find(&package).unwrap();
    assert!(package_delta.flags().contains(DeltaFlags::CHILDREN));

    assert!(!fx.manager.is_open(&unit));
    assert!(!fx.manager.is_open(&ty));
    assert!(fx.manager.is_open(&package));
    assert_eq!(fx.indexer.calls().last().map(String::as_str), Some("add /P/src/A.java"));

    let reopened = fx.manager.get_element_info(&unit).unwrap();
    let names: Vec<&str> = reopened.children().iter().map(|h| h.name()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[test]
fn dropping_an_external_archive_from_the_classpath() {
    let fx = Fixture::new();
    fx.workspace.set_external_file(
        &path("/ext/lib.jar"),
        jar(&[("a/b/C.class", "class C")]),
        1,
    );
    fx.java_project(
        "P",
        vec![
            ClasspathEntry::source("/P/src"),
            ClasspathEntry::library("/ext/lib.jar"),
        ],
        &[],
    );
    let project = fx.model().project("P");
    let jar_root = project.root(&path("/ext/lib.jar"));
    let info = fx.manager.get_element_info(&jar_root).unwrap();
    let archive = info.archive().cloned().unwrap();
    assert!(!archive.is_released());
    let saves = fx.store.save_count("P");
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.manager
        .run_operation(&mut SetClasspathOperation::new(
            "P",
            vec![ClasspathEntry::source("/P/src")],
        ))
        .unwrap();

    let delta = recorder.single_post_change();
    let root_delta = delta.find(&jar_root).unwrap();
    assert_eq!(root_delta.kind(), DeltaKind::Removed);
    assert!(root_delta.flags().contains(DeltaFlags::REMOVED_FROM_CLASSPATH));
    let project_delta = delta.find(&project).unwrap();
    assert!(project_delta.flags().contains(DeltaFlags::CLASSPATH_CHANGED));
    assert!(delta.find(&project.root(&path("/P/src"))).is_none());

    assert!(archive.is_released());
    assert!(!fx.manager.is_open(&jar_root));
    assert_eq!(
        fx.manager.classpath("P").unwrap(),
        vec![ClasspathEntry::source("/P/src")]
    );
    assert_eq!(fx.store.save_count("P"), saves + 1);
    assert_eq!(
        fx.manager.children(&project).unwrap(),
        vec![project.root(&path("/P/src"))]
    );
}

#[test]
fn renaming_a_source_folder_moves_the_root() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/p1")],
        &[("p1/A.java", "class A")],
    );
    let project = fx.model().project("P");
    let old_root = project.root(&path("/P/p1"));
    let new_root = project.root(&path("/P/p2"));
    fx.manager.get_element_info(&old_root).unwrap();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace
        .move_resource(&path("/P/p1"), &path("/P/p2"))
        .unwrap();

    let delta = recorder.single_post_change();
    let removed = delta.find(&old_root).unwrap();
    assert_eq!(removed.kind(), DeltaKind::Removed);
    assert!(removed.flags().contains(DeltaFlags::MOVED_TO));
    assert_eq!(removed.moved_to_element(), Some(&new_root));

    let added = delta.find(&new_root).unwrap();
    assert_eq!(added.kind(), DeltaKind::Added);
    assert!(added
        .flags()
        .contains(DeltaFlags::MOVED_FROM | DeltaFlags::ADDED_TO_CLASSPATH));
    assert_eq!(added.moved_from_element(), Some(&old_root));

    assert!(!fx.manager.is_open(&old_root));
    assert_eq!(
        fx.manager.classpath("P").unwrap(),
        vec![ClasspathEntry::source("/P/p2")]
    );
    assert_eq!(
        fx.manager.children(&new_root.package("")).unwrap(),
        vec![new_root.package("").compilation_unit("A.java")]
    );
    assert!(fx
        .manager
        .get_element_info(&old_root)
        .unwrap_err()
        .is_not_present());
}

#[test]
fn deleting_a_source_folder_drops_its_classpath_entry() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![
            ClasspathEntry::source("/P/src"),
            ClasspathEntry::source("/P/test"),
        ],
        &[("test/T.java", "class T")],
    );
    let project = fx.model().project("P");
    let test_root = project.root(&path("/P/test"));
    let saves = fx.store.save_count("P");
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace.delete(&path("/P/test")).unwrap();

    let delta = recorder.single_post_change();
    let root_delta = delta.find(&test_root).unwrap();
    assert_eq!(root_delta.kind(), DeltaKind::Removed);
    assert!(root_delta.flags().contains(DeltaFlags::REMOVED_FROM_CLASSPATH));
    assert!(root_delta.affected_children().is_empty());
    assert_eq!(
        fx.manager.classpath("P").unwrap(),
        vec![ClasspathEntry::source("/P/src")]
    );
    assert_eq!(fx.store.save_count("P"), saves + 1);
}

#[test]
fn adding_a_package_folder_and_unit_in_one_batch() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let root = fx.model().project("P").root(&path("/P/src"));
    fx.manager.get_element_info(&root).unwrap();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace
        .run(|ws| -> Result<(), VfsError> {
            ws.create_folders(&path("/P/src/a/b"))?;
            ws.create_file(&path("/P/src/a/b/C.java"), b"class C".to_vec())
        })
        .unwrap();

    let delta = recorder.single_post_change();
    let added: Vec<(ElementKind, String)> = delta
        .iter()
        .filter(|d| d.kind() == DeltaKind::Added)
        .map(|d| (d.element().kind(), d.element().name().to_string()))
        .collect();
    // Units inside an added package are implied by the package delta.
    assert_eq!(
        added,
        vec![
            (ElementKind::Package, "a".to_string()),
            (ElementKind::Package, "a.b".to_string()),
        ]
    );
    let root_info = fx.manager.peek_info(&root).unwrap();
    assert!(root_info.children().contains(&root.package("a.b")));
}

#[test]
fn non_java_resources_fold_onto_the_nearest_element() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let project = fx.model().project("P");
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace
        .run(|ws| -> Result<(), VfsError> {
            ws.create_file(&path("/P/README.md"), b"readme".to_vec())?;
            ws.create_file(&path("/P/src/notes.txt"), b"notes".to_vec())
        })
        .unwrap();

    let delta = recorder.single_post_change();
    let project_delta = delta.find(&project).unwrap();
    assert!(project_delta.flags().contains(DeltaFlags::NON_JAVA_RESOURCES));
    assert_eq!(project_delta.resource_deltas().len(), 1);
    assert_eq!(project_delta.resource_deltas()[0].path(), &path("/P/README.md"));

    let root_delta = delta.find(&project.root(&path("/P/src"))).unwrap();
    assert!(root_delta.flags().contains(DeltaFlags::NON_JAVA_RESOURCES));
    assert_eq!(root_delta.resource_deltas()[0].path(), &path("/P/src/notes.txt"));
}

#[test]
fn excluded_folders_are_not_packages() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src").with_exclusions(["gen/"])],
        &[("src/a/A.java", "class A"), ("src/gen/G.java", "class G")],
    );
    let root = fx.model().project("P").root(&path("/P/src"));
    let packages: Vec<String> = fx
        .manager
        .children(&root)
        .unwrap()
        .iter()
        .map(|h| h.name().to_string())
        .collect();
    assert_eq!(packages, vec!["".to_string(), "a".to_string()]);

    let recorder = fx.listen(EventMask::POST_CHANGE);
    fx.workspace
        .set_contents(&path("/P/src/gen/G.java"), b"class H".to_vec())
        .unwrap();
    let delta = recorder.single_post_change();
    assert!(delta
        .iter()
        .all(|d| d.element().kind() != ElementKind::CompilationUnit));
}

#[test]
fn closing_and_reopening_a_project() {
    let fx = Fixture::new();
    fx.java_project("P", vec![ClasspathEntry::source("/P/src")], &[]);
    let project = fx.model().project("P");
    fx.manager.get_element_info(&project).unwrap();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace.close_project("P").unwrap();
    let closed = recorder.single_post_change();
    assert!(closed.find(&project).unwrap().flags().contains(DeltaFlags::CLOSED));
    assert!(!fx.manager.is_open(&project));
    assert!(!fx.manager.exists(&project));

    recorder.clear();
    fx.workspace.open_project("P").unwrap();
    let opened = recorder.single_post_change();
    assert!(opened.find(&project).unwrap().flags().contains(DeltaFlags::OPENED));
    assert!(fx.manager.exists(&project));
}

#[test]
fn renaming_a_java_project_carries_its_classpath() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::source("/P/src")],
        &[("src/A.java", "class A")],
    );
    let model = fx.model();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace.move_resource(&path("/P"), &path("/R")).unwrap();

    let delta = recorder.single_post_change();
    let from = delta.find(&model.project("P")).unwrap();
    assert_eq!(from.kind(), DeltaKind::Removed);
    assert_eq!(from.moved_to_element(), Some(&model.project("R")));
    let to = delta.find(&model.project("R")).unwrap();
    assert_eq!(to.kind(), DeltaKind::Added);
    assert_eq!(to.moved_from_element(), Some(&model.project("P")));

    assert_eq!(fx.manager.java_projects(), vec!["R".to_string()]);
    assert_eq!(
        fx.manager.classpath("R").unwrap(),
        vec![ClasspathEntry::source("/R/src")]
    );
    let unit = model
        .project("R")
        .root(&path("/R/src"))
        .package("")
        .compilation_unit("A.java");
    assert!(fx.manager.exists(&unit));
}

#[test]
fn shared_workspace_archive_changes_every_owner() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::library("/P/lib.jar")],
        &[],
    );
    fx.workspace
        .create_file(&path("/P/lib.jar"), jar(&[("a/A.class", "class A")]))
        .unwrap();
    fx.java_project(
        "Q",
        vec![ClasspathEntry::library("/P/lib.jar")],
        &[],
    );
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace
        .set_contents(&path("/P/lib.jar"), jar(&[("a/B.class", "class B")]))
        .unwrap();

    let delta = recorder.single_post_change();
    for project in ["P", "Q"] {
        let root = fx.model().project(project).root(&path("/P/lib.jar"));
        let root_delta = delta.find(&root).unwrap();
        assert_eq!(
            root_delta.flags(),
            DeltaFlags::CONTENT | DeltaFlags::ARCHIVE_CONTENT_CHANGED
        );
    }
    let root = fx.model().project("Q").root(&path("/P/lib.jar"));
    assert_eq!(
        fx.manager.children(&root.package("a")).unwrap(),
        vec![root.package("a").class_file("B.class")]
    );
}

#[test]
fn attaching_sources_is_reported_on_the_archive_root() {
    let fx = Fixture::new();
    fx.java_project(
        "P",
        vec![ClasspathEntry::library("/P/lib.jar").with_source_attachment("/P/lib-src.zip")],
        &[],
    );
    fx.workspace
        .create_file(&path("/P/lib.jar"), jar(&[("a/A.class", "class A")]))
        .unwrap();
    let root = fx.model().project("P").root(&path("/P/lib.jar"));
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace
        .create_file(&path("/P/lib-src.zip"), jar(&[("a/A.java", "class A")]))
        .unwrap();

    let delta = recorder.single_post_change();
    assert!(delta
        .find(&root)
        .unwrap()
        .flags()
        .contains(DeltaFlags::SOURCE_ATTACHED));
}

#[test]
fn deleting_a_host_project_removes_nested_roots_of_others() {
    let fx = Fixture::new();
    fx.workspace.create_project("Lib").unwrap();
    fx.workspace
        .create_file(&path("/Lib/lib.jar"), jar(&[("a/A.class", "class A")]))
        .unwrap();
    fx.java_project("Q", vec![ClasspathEntry::library("/Lib/lib.jar")], &[]);
    let root = fx.model().project("Q").root(&path("/Lib/lib.jar"));
    fx.manager.get_element_info(&root).unwrap();
    let recorder = fx.listen(EventMask::POST_CHANGE);

    fx.workspace.delete(&path("/Lib")).unwrap();

    let delta = recorder.single_post_change();
    let root_delta = delta.find(&root).unwrap();
    assert_eq!(root_delta.kind(), DeltaKind::Removed);
    assert!(!fx.manager.is_open(&root));
    assert!(fx.manager.classpath("Q").unwrap().is_empty());
}
