//! Integration tests for suite loading
//!
//! Suites are read from sibling checkouts; pinned imports prefer
//! `<name>@<rev>` directories.

mod common;

use common::TestWorkspace;
use suiteforge::error::{ForgeError, RegistryError};
use suiteforge::registry::ConflictPolicy;

/// P imports A and C; A pins B at 1.0, C pins B at 2.0
fn diamond(ws: &TestWorkspace) {
    ws.suite(
        "P",
        "name = \"P\"\n[[import]]\nname = \"A\"\n[[import]]\nname = \"C\"\n",
    );
    ws.suite(
        "A",
        "name = \"A\"\n[[import]]\nname = \"B\"\nversion = \"1.0\"\n",
    );
    ws.suite(
        "C",
        "name = \"C\"\n[[import]]\nname = \"B\"\nversion = \"2.0\"\n",
    );
    ws.suite(
        "B@1.0",
        "name = \"B\"\n[[project]]\nname = \"b.old\"\n",
    );
    ws.suite(
        "B@2.0",
        "name = \"B\"\n[[project]]\nname = \"b.new\"\n",
    );
}

#[test]
fn test_strict_policy_reports_both_pins() {
    let ws = TestWorkspace::new();
    diamond(&ws);

    match ws.registry("P", ConflictPolicy::Strict) {
        Err(ForgeError::Registry(RegistryError::VersionConflict {
            suite,
            first_revision,
            second_revision,
            ..
        })) => {
            assert_eq!(suite, "B");
            let mut revisions = [first_revision, second_revision];
            revisions.sort();
            assert_eq!(revisions, ["1.0".to_string(), "2.0".to_string()]);
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }
}

#[test]
fn test_latest_policy_loads_newest_pin() {
    let ws = TestWorkspace::new();
    diamond(&ws);

    let registry = ws.registry("P", ConflictPolicy::Latest).unwrap();
    let b = registry.get("B").unwrap();
    assert_eq!(b.revision.as_deref(), Some("2.0"));
    assert_eq!(b.descriptor.projects[0].name, "b.new");
    assert!(b.dir.ends_with("B@2.0"));

    let mut importers = b.importers.clone();
    importers.sort();
    assert_eq!(importers, vec!["A", "C"]);
}

#[test]
fn test_import_cycle_names_the_cycle() {
    let ws = TestWorkspace::new();
    ws.suite("A", "name = \"A\"\n[[import]]\nname = \"B\"\n");
    ws.suite("B", "name = \"B\"\n[[import]]\nname = \"A\"\n");

    match ws.registry("A", ConflictPolicy::Strict) {
        Err(ForgeError::Registry(RegistryError::CyclicImport { cycle })) => {
            assert_eq!(cycle, vec!["A", "B", "A"]);
        }
        other => panic!("expected an import cycle, got {other:?}"),
    }
}

#[test]
fn test_missing_import_lists_searched_directories() {
    let ws = TestWorkspace::new();
    ws.suite(
        "A",
        "name = \"A\"\n[[import]]\nname = \"ghost\"\nversion = \"3.1\"\n",
    );

    match ws.registry("A", ConflictPolicy::Strict) {
        Err(ForgeError::Registry(RegistryError::SuiteNotFound { name, searched })) => {
            assert_eq!(name, "ghost");
            assert!(searched.iter().any(|dir| dir.ends_with("ghost@3.1")));
            assert!(searched.iter().any(|dir| dir.ends_with("ghost")));
        }
        other => panic!("expected a missing suite, got {other:?}"),
    }
}

#[test]
fn test_directory_name_must_match_suite_name() {
    let ws = TestWorkspace::new();
    ws.suite("A", "name = \"A\"\n[[import]]\nname = \"B\"\n");
    ws.suite("B", "name = \"NotB\"\n");

    assert!(matches!(
        ws.registry("A", ConflictPolicy::Strict),
        Err(ForgeError::Registry(RegistryError::NameMismatch { .. }))
    ));
}
