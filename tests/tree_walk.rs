//! Tree-walk API over compiled sources: navigation plus scoped find.

use structmatch::{Engine, Lang};

const SOURCE: &str = "function foo(){eval(a);} function bar(){eval(b);}";

fn engine_with_source() -> (Engine, u32) {
    let mut engine = Engine::new();
    let handle = engine.compile_source(SOURCE, Lang::Javascript);
    assert_ne!(handle, 0);
    (engine, handle)
}

fn json(engine: &Engine) -> serde_json::Value {
    serde_json::from_slice(engine.result()).expect("valid json")
}

#[test]
fn find_all_from_root_sees_both_call_sites() {
    let (mut engine, src) = engine_with_source();
    assert_ne!(engine.find_all_in_subtree(src, 0, 0, true, "eval($X)"), 0);
    let nodes = json(&engine);
    let nodes = nodes.as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    let texts: Vec<&str> = nodes
        .iter()
        .map(|n| {
            let sb = n["sb"].as_u64().unwrap() as usize;
            let eb = n["eb"].as_u64().unwrap() as usize;
            &SOURCE[sb..eb]
        })
        .collect();
    assert!(texts[0].contains("eval(a)"));
    assert!(texts[1].contains("eval(b)"));
}

#[test]
fn find_scoped_to_first_function_sees_only_its_call() {
    let (mut engine, src) = engine_with_source();
    // First named child of the root: function foo.
    assert_ne!(engine.node_named_children(src, 0, 0, true), 0);
    let children = json(&engine);
    let foo = &children.as_array().unwrap()[0];
    let (sb, eb) = (
        foo["sb"].as_u64().unwrap() as u32,
        foo["eb"].as_u64().unwrap() as u32,
    );
    assert_eq!(foo["kind"], "function_declaration");

    assert_ne!(engine.find_in_subtree(src, sb, eb, false, "eval($X)"), 0);
    let node = json(&engine);
    let (msb, meb) = (
        node["sb"].as_u64().unwrap() as usize,
        node["eb"].as_u64().unwrap() as usize,
    );
    assert_eq!(&SOURCE[msb..meb], "eval(a)");
}

#[test]
fn find_with_no_match_returns_null_node() {
    let (mut engine, src) = engine_with_source();
    assert_ne!(engine.find_in_subtree(src, 0, 0, true, "exec($X)"), 0);
    assert!(json(&engine).is_null());
}

#[test]
fn sibling_navigation_walks_statements() {
    let mut engine = Engine::new();
    let source = "a; b; c;";
    let src = engine.compile_source(source, Lang::Javascript);

    // "b;" is bytes 3..5; its next named sibling is "c;".
    assert_ne!(engine.node_next(src, 3, 5, false), 0);
    let next = json(&engine);
    assert_eq!(next["sb"], 6);

    assert_ne!(engine.node_prev(src, 3, 5, false), 0);
    let prev = json(&engine);
    assert_eq!(prev["sb"], 0);

    // First statement has no previous sibling.
    assert_ne!(engine.node_prev(src, 0, 2, false), 0);
    assert!(json(&engine).is_null());
}

#[test]
fn child_listings_include_unnamed_tokens_only_in_full_walk() {
    let mut engine = Engine::new();
    let source = "f(x);";
    let src = engine.compile_source(source, Lang::Javascript);
    // The call expression is bytes 0..4.
    assert_ne!(engine.node_children(src, 0, 4, false), 0);
    let all = json(&engine);
    assert_ne!(engine.node_named_children(src, 0, 4, false), 0);
    let named = json(&engine);
    // call children: callee + arguments; arguments' parens are unnamed and
    // appear only under the full listing of the arguments node itself.
    assert_eq!(all.as_array().unwrap().len(), 2);
    assert_eq!(named.as_array().unwrap().len(), 2);

    let args = &all.as_array().unwrap()[1];
    let (sb, eb) = (
        args["sb"].as_u64().unwrap() as u32,
        args["eb"].as_u64().unwrap() as u32,
    );
    assert_ne!(engine.node_children(src, sb, eb, false), 0);
    let arg_children = json(&engine);
    assert_eq!(arg_children.as_array().unwrap().len(), 3); // ( x )
    assert_ne!(engine.node_named_children(src, sb, eb, false), 0);
    assert_eq!(json(&engine).as_array().unwrap().len(), 1); // x
}

#[test]
fn parent_and_field_lookups_resolve() {
    let mut engine = Engine::new();
    let source = "function foo() { return 1; }";
    let src = engine.compile_source(source, Lang::Javascript);

    let len = source.len() as u32;
    assert_ne!(engine.node_field_child(src, 0, len, false, "name"), 0);
    let name = json(&engine);
    assert_eq!(name["kind"], "identifier");

    let (sb, eb) = (
        name["sb"].as_u64().unwrap() as u32,
        name["eb"].as_u64().unwrap() as u32,
    );
    assert_ne!(engine.node_parent(src, sb, eb, false), 0);
    assert_eq!(json(&engine)["kind"], "function_declaration");
}

#[test]
fn lookup_failures_return_zero() {
    let mut engine = Engine::new();
    assert_eq!(engine.node_root(9), 0);
    let src = engine.compile_source("f();", Lang::Javascript);
    // Range covering no named node exactly.
    assert_eq!(engine.node_info(src, 1, 2, false), 0);
    engine.free_source(src);
    assert_eq!(engine.node_root(src), 0);
}
