use std::collections::BTreeSet;
use std::sync::Arc;

use strata::{Bytecode, Code, CompiledSourceInfo, EngineError};

fn bytecode(class: &str, tag: &str) -> Bytecode {
    Bytecode::new(class, tag.as_bytes().to_vec()).expect("valid bytecode")
}

fn names(classes: &[&str]) -> BTreeSet<String> {
    classes.iter().map(|c| c.to_string()).collect()
}

#[test]
fn bytecode_requires_class_name() {
    let err = Bytecode::new("", b"x".to_vec()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }));
}

#[test]
fn bytecode_exposes_fields() {
    let bc = bytecode("Greeter", "v1");
    assert_eq!(bc.class_name(), "Greeter");
    assert_eq!(bc.bytes(), b"v1");
    assert_eq!(bc.clone(), bc);
}

#[test]
fn compiled_source_info_validates_fields() {
    assert!(matches!(
        CompiledSourceInfo::new("", "Main", names(&["Main"]), 0).unwrap_err(),
        EngineError::InvalidArgument { .. }
    ));
    assert!(matches!(
        CompiledSourceInfo::new("script", "", names(&["Main"]), 0).unwrap_err(),
        EngineError::InvalidArgument { .. }
    ));
    // Main class must be among the declared class names.
    assert!(matches!(
        CompiledSourceInfo::new("script", "Main", names(&["Other"]), 0).unwrap_err(),
        EngineError::InvalidArgument { .. }
    ));
}

#[test]
fn code_indexes_sources_and_classes() -> anyhow::Result<()> {
    let info_a = CompiledSourceInfo::new("a", "AMain", names(&["AMain", "AHelper"]), 7)?;
    let info_b = CompiledSourceInfo::new("b", "BMain", names(&["BMain"]), 9)?;
    let code = Code::new(
        "layer-0",
        vec![info_a, info_b],
        vec![
            bytecode("AMain", "am"),
            bytecode("AHelper", "ah"),
            bytecode("BMain", "bm"),
        ],
    )?;

    assert_eq!(code.name(), "layer-0");
    let mut ids: Vec<&str> = code.source_ids().collect();
    ids.sort_unstable();
    assert_eq!(ids, ["a", "b"]);
    assert!(code.is_for_source("a"));
    assert!(!code.is_for_source("c"));

    assert_eq!(code.main_class_name_for("a"), Some("AMain"));
    assert_eq!(code.class_names_for("a"), Some(&names(&["AMain", "AHelper"])));
    assert_eq!(code.last_modified_at_compile_time_for("b"), Some(9));
    assert_eq!(code.last_modified_at_compile_time_for("c"), None);

    assert!(code.defines_class("AHelper"));
    assert!(!code.defines_class("Missing"));
    let bc = code.bytecode_for("BMain").expect("BMain has bytecode");
    assert_eq!(bc.bytes(), b"bm");
    assert!(code.bytecode_for("Missing").is_none());
    Ok(())
}

#[test]
fn code_rejects_duplicate_class_names() {
    let err = Code::new(
        "dup",
        vec![],
        vec![bytecode("Same", "1"), bytecode("Same", "2")],
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }));
}

#[test]
fn code_rejects_declared_class_without_bytecode() {
    let info = CompiledSourceInfo::new("a", "AMain", names(&["AMain", "Ghost"]), 0)
        .expect("valid info");
    let err = Code::new("missing", vec![info], vec![bytecode("AMain", "am")]).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }));
}

#[test]
fn code_rejects_duplicate_sources() {
    let first = CompiledSourceInfo::new("a", "AMain", names(&["AMain"]), 0).expect("valid info");
    let second = CompiledSourceInfo::new("a", "AMain", names(&["AMain"]), 1).expect("valid info");
    let err = Code::new("dup-source", vec![first, second], vec![bytecode("AMain", "am")])
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }));
}

#[test]
fn code_requires_name() {
    let err = Code::new("", vec![], vec![]).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }));
}

#[test]
fn code_is_shareable_across_threads() -> anyhow::Result<()> {
    let info = CompiledSourceInfo::new("a", "AMain", names(&["AMain"]), 0)?;
    let code = Arc::new(Code::new("shared", vec![info], vec![bytecode("AMain", "am")])?);
    let cloned = Arc::clone(&code);
    let handle = std::thread::spawn(move || cloned.bytecode_for("AMain").is_some());
    assert!(handle.join().expect("thread finished"));
    Ok(())
}
