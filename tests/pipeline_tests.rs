//! End-to-end tests for the emit pipeline
//!
//! Loads declaration fixtures, runs every stage and checks the closure,
//! relocation and `meta.json` output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use apimeta::closure::close;
use apimeta::decl::{load_from_file, load_from_str, TypeRef};
use apimeta::{DeclarationGraph, DiagnosticCode, ModelId, Pipeline, PipelineOutput, TypeMetadataEntry};
use serde_json::json;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn run_fixture(name: &str) -> PipelineOutput {
    let graph = load_from_file(&fixture(name)).unwrap();
    Pipeline::default().run(graph).unwrap()
}

/// Models a model refers to through its properties or array element
fn references(graph: &DeclarationGraph, model: ModelId) -> Vec<ModelId> {
    let m = graph.model(model);
    m.element
        .iter()
        .filter_map(TypeRef::as_model)
        .chain(graph.properties_of(model).filter_map(|(_, p)| p.ty.as_model()))
        .collect()
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_root_model_gets_key() {
    let out = run_fixture("foo_v1.json");
    assert_eq!(
        out.metadata.get("foo.v1.Bar"),
        Some(&TypeMetadataEntry { key: Some("id".into()), ..Default::default() })
    );
}

#[test]
fn test_derived_model_gets_base_only() {
    let out = run_fixture("foo_v1.json");
    // BarDelta declares its own key property; it is still omitted
    assert_eq!(
        out.metadata.get("foo.v1.BarDelta"),
        Some(&TypeMetadataEntry { base: Some("foo.v1.Bar".into()), ..Default::default() })
    );
}

#[test]
fn test_friendly_name_entry() {
    let out = run_fixture("foo_v1.json");
    assert!(out.metadata.get("foo.v1.Widget").is_none());

    let gadget = out.metadata.get("foo.v1.Gadget").unwrap();
    assert_eq!(gadget.key.as_deref(), Some("id"));
    assert_eq!(gadget.normal_keys, Some(vec!["slug".to_string()]));
    assert_eq!(gadget.auto_changes, Some(vec![json!({ "field": "updatedAt" })]));
    assert_eq!(gadget.base, None);
}

#[test]
fn test_meta_json_document() {
    let out = run_fixture("foo_v1.json");
    let dir = tempfile::tempdir().unwrap();
    let path = out.write_metadata(dir.path(), "meta.json").unwrap();

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(
        written,
        json!({
            "foo.v1.Bar": { "key": "id" },
            "foo.v1.BarDelta": { "base": "foo.v1.Bar" },
            "foo.v1.Gadget": {
                "key": "id",
                "normalKeys": ["slug"],
                "autoChanges": [{ "field": "updatedAt" }]
            },
            "foo.v1.Money": {},
            "foo.v1.Node": {}
        })
    );
}

#[test]
fn test_emit_is_deterministic() {
    let first = run_fixture("foo_v1.json").metadata.to_json_pretty().unwrap();
    let second = run_fixture("foo_v1.json").metadata.to_json_pretty().unwrap();
    assert_eq!(first, second);
}

// =============================================================================
// Closure
// =============================================================================

#[test]
fn test_no_missing_nested_message() {
    let out = run_fixture("foo_v1.json");
    for model in out.messages.iter() {
        for referenced in references(&out.graph, model) {
            assert!(
                out.messages.contains(referenced),
                "{} references {} which is not a message",
                out.graph.model(model).name,
                out.graph.model(referenced).name
            );
        }
    }
}

#[test]
fn test_closure_is_idempotent() {
    let out = run_fixture("foo_v1.json");
    let mut again = out.messages.clone();
    close(&out.graph, &mut again);
    assert_eq!(again, out.messages);
}

#[test]
fn test_closure_reaches_outside_package() {
    let out = run_fixture("foo_v1.json");
    let currency = out.graph.find_model("Lib.Currency").unwrap();
    let unused = out.graph.find_model("Lib.Unused").unwrap();

    assert!(out.messages.contains(currency));
    assert!(!out.messages.contains(unused));
}

#[test]
fn test_service_return_and_params_are_messages() {
    let doc = r#"{
        "models": [{ "name": "Ext.Thing", "properties": [{ "name": "id", "type": "string" }] }],
        "interfaces": [{
            "name": "Api.Things",
            "annotations": [{ "name": "service" }],
            "operations": [{ "name": "get", "parameters": [{ "name": "id", "type": "string" }], "returns": "Ext.Thing" }]
        }]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();
    let thing = out.graph.find_model("Ext.Thing").unwrap();

    assert!(out.messages.contains(thing));
    // Anonymous parameter model plus the return type
    assert_eq!(out.messages.len(), 2);
    assert!(out.metadata.is_empty());
}

#[test]
fn test_recursive_messages_are_reported() {
    let out = run_fixture("foo_v1.json");
    let recursive: Vec<_> = out.diagnostics.with_code(DiagnosticCode::RecursiveMessageGroup).collect();
    assert_eq!(recursive.len(), 1);
    assert!(recursive[0].decl.starts_with("Foo.V1.Node") || recursive[0].context.iter().any(|c| c == "Foo.V1.Node"));
    assert_eq!(out.diagnostics.warning_count(), 0);
}

// =============================================================================
// Relocation
// =============================================================================

#[test]
fn test_moved_message_lands_in_target() {
    let out = run_fixture("foo_v1.json");
    let money = out.graph.find_model("Lib.Money").unwrap();
    let target = out.graph.find_namespace("Foo.V1").unwrap();
    let source = out.graph.find_namespace("Lib").unwrap();

    assert_eq!(out.graph.model(money).namespace, Some(target));
    assert_eq!(out.graph.namespace(target).models.get("Money"), Some(&money));
    assert!(!out.graph.namespace(source).models.values().any(|&m| m == money));

    assert_eq!(out.relocations.len(), 1);
    assert_eq!(out.relocations[0].model, money);
    assert_eq!(out.relocations[0].from, Some(source));
}

#[test]
fn test_move_of_non_message_is_ignored() {
    let doc = r#"{
        "namespaces": [{ "name": "Pkg", "annotations": [{ "name": "package" }] }, { "name": "Other" }],
        "models": [
            { "name": "Other.Loose", "annotations": [{ "name": "move", "args": ["Pkg"] }] }
        ]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();
    let loose = out.graph.find_model("Other.Loose").unwrap();

    assert!(out.relocations.is_empty());
    assert_eq!(out.graph.model(loose).namespace, out.graph.find_namespace("Other"));
    assert!(out.metadata.get("Pkg.Loose").is_none());
}

#[test]
fn test_dangling_move_target_is_a_warning() {
    let doc = r#"{
        "namespaces": [{ "name": "Pkg", "annotations": [{ "name": "package" }] }],
        "models": [
            { "name": "Pkg.Thing", "annotations": [{ "name": "move", "args": ["Nowhere"] }] }
        ]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();

    assert_eq!(out.diagnostics.with_code(DiagnosticCode::DanglingMoveTarget).count(), 1);
    assert!(out.relocations.is_empty());
    assert!(out.metadata.get("Pkg.Thing").is_some());
}

#[test]
fn test_move_onto_occupied_name_is_refused() {
    let doc = r#"{
        "namespaces": [{ "name": "Pkg", "annotations": [{ "name": "package" }] }, { "name": "Lib" }],
        "models": [
            { "name": "Pkg.Money", "properties": [{ "name": "id", "type": "string", "key": true }] },
            {
                "name": "Lib.Money",
                "annotations": [{ "name": "message" }, { "name": "move", "args": ["Pkg"] }],
                "properties": [{ "name": "cents", "type": "string" }]
            }
        ]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();
    let resident = out.graph.find_model("Pkg.Money").unwrap();
    let mover = out.graph.find_model("Lib.Money").unwrap();
    let pkg = out.graph.find_namespace("Pkg").unwrap();

    assert!(out.relocations.is_empty());
    assert_eq!(out.graph.namespace(pkg).models.get("Money"), Some(&resident));
    assert_eq!(out.graph.model(mover).namespace, out.graph.find_namespace("Lib"));

    let conflicts: Vec<_> = out.diagnostics.with_code(DiagnosticCode::RelocationNameConflict).collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].decl, "Lib.Money");
    assert_eq!(conflicts[0].context, vec!["Pkg.Money".to_string()]);

    // The resident keeps its metadata
    assert_eq!(out.metadata.get("Pkg.Money").unwrap().key.as_deref(), Some("id"));
}

#[test]
fn test_duplicate_type_name_keeps_first_entry() {
    let doc = r#"{
        "namespaces": [{ "name": "Pkg", "annotations": [{ "name": "package" }] }],
        "models": [
            { "name": "Pkg.Account", "properties": [{ "name": "id", "type": "string", "key": true }] },
            { "name": "Pkg.Ledger", "friendlyName": "Account" }
        ]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();

    let clashes: Vec<_> = out.diagnostics.with_code(DiagnosticCode::DuplicateTypeName).collect();
    assert_eq!(clashes.len(), 1);
    assert_eq!(clashes[0].decl, "Pkg.Ledger");
    assert_eq!(out.metadata.get("Pkg.Account").unwrap().key.as_deref(), Some("id"));
    assert_eq!(out.metadata.len(), 1);
}

// =============================================================================
// Authoring mistakes
// =============================================================================

#[test]
fn test_unknown_annotation_warns_with_hint() {
    let doc = r#"{
        "models": [{ "name": "App.A", "annotations": [{ "name": "mesage" }] }]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();
    let items: Vec<_> = out.diagnostics.with_code(DiagnosticCode::UnknownAnnotation).collect();

    assert_eq!(items.len(), 1);
    assert!(items[0].context.iter().any(|c| c.contains("@message")));
}

#[test]
fn test_unresolved_reference_is_an_error() {
    let doc = r#"{ "models": [{ "name": "App.A", "properties": [{ "name": "b", "type": "App.Missing" }] }] }"#;
    assert!(load_from_str(doc).is_err());
}

#[test]
fn test_key_remap_via_copy_keys() {
    let doc = r#"{
        "namespaces": [{ "name": "App", "annotations": [{ "name": "package" }] }],
        "models": [
            {
                "name": "App.User",
                "properties": [{ "name": "userId", "type": "string", "annotations": [{ "name": "primaryKey" }] }]
            },
            {
                "name": "App.Membership",
                "annotations": [{ "name": "copyKeys", "args": ["App.User", { "primary": "Omit" }] }]
            }
        ]
    }"#;
    let out = Pipeline::default().run(load_from_str(doc).unwrap()).unwrap();
    let membership = out.graph.find_model("App.Membership").unwrap();

    assert_eq!(out.graph.properties_of(membership).count(), 0);
    let names: HashSet<_> = out.metadata.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, HashSet::from(["App.User", "App.Membership"]));
}
