//! Ruleset pipeline: encode bytecode, load it, apply it, read findings.

use structmatch::{Engine, Lang};

// Opcodes mirrored from the wire format.
const OP_PATTERN: u8 = 0x01;
const OP_KIND: u8 = 0x02;
const OP_REGEX: u8 = 0x03;
const OP_ALL: u8 = 0x10;
const OP_ANY: u8 = 0x11;
const OP_NOT: u8 = 0x12;
const OP_INSIDE: u8 = 0x13;
const OP_FOLLOWS: u8 = 0x15;
const OP_MATCHES: u8 = 0x17;
const OP_FIX: u8 = 0x20;
const OP_CONSTRAINT: u8 = 0x30;
const OP_STOPBY_END: u8 = 0x40;
const OP_RULE: u8 = 0x50;
const OP_RULESET: u8 = 0xFF;

struct Bytecode {
    bytes: Vec<u8>,
}

impl Bytecode {
    fn ruleset(rule_count: u16) -> Bytecode {
        let mut b = Bytecode { bytes: vec![OP_RULESET] };
        b.u16(1); // version
        b.u16(rule_count);
        b
    }

    fn u8v(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn str(&mut self, s: &str) -> &mut Self {
        self.u16(s.len() as u16);
        self.bytes.extend_from_slice(s.as_bytes());
        self
    }

    /// Rule header with no constraints or transforms; body follows.
    fn rule(&mut self, id: &str, severity: u8) -> &mut Self {
        self.u8v(OP_RULE);
        self.str(id);
        self.u8v(severity);
        self.str("rule message");
        self.u8v(Lang::Javascript.tag());
        self.u16(0);
        self.u16(0);
        self
    }

    fn pattern(&mut self, source: &str) -> &mut Self {
        self.u8v(OP_PATTERN).str(source)
    }

    fn kind(&mut self, kind: &str) -> &mut Self {
        self.u8v(OP_KIND).str(kind)
    }
}

fn findings(engine: &Engine) -> serde_json::Value {
    serde_json::from_slice(engine.ruleset_result()).expect("valid findings json")
}

const TRY_SOURCE: &str = "try { var r = eval(x); } catch(e) {} var s = eval(y);";

fn eval_inside_try(negated: bool) -> Vec<u8> {
    let mut b = Bytecode::ruleset(1);
    b.rule("eval-in-try", 0);
    b.u8v(OP_ALL).u16(2);
    b.pattern("eval($X)");
    if negated {
        b.u8v(OP_NOT);
    }
    b.u8v(OP_INSIDE).u8v(OP_STOPBY_END);
    b.kind("try_statement");
    b.bytes
}

#[test]
fn relational_rule_keeps_matches_inside_try() {
    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&eval_inside_try(false));
    assert_ne!(rs, 0);
    assert_eq!(engine.apply_ruleset(rs, TRY_SOURCE), 1);

    let value = findings(&engine);
    let finding = &value.as_array().unwrap()[0];
    assert_eq!(finding["ruleId"], "eval-in-try");
    assert_eq!(finding["severity"], "error");
    let matches = finding["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    let sb = matches[0]["start_byte"].as_u64().unwrap() as usize;
    let eb = matches[0]["end_byte"].as_u64().unwrap() as usize;
    assert_eq!(&TRY_SOURCE[sb..eb], "eval(x)");
    assert_eq!(matches[0]["bindings"]["X"], "x");
}

#[test]
fn negated_relational_rule_keeps_the_complement() {
    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&eval_inside_try(true));
    assert_ne!(rs, 0);
    assert_eq!(engine.apply_ruleset(rs, TRY_SOURCE), 1);

    let value = findings(&engine);
    let matches = value[0]["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    let sb = matches[0]["start_byte"].as_u64().unwrap() as usize;
    let eb = matches[0]["end_byte"].as_u64().unwrap() as usize;
    assert_eq!(&TRY_SOURCE[sb..eb], "eval(y)");
}

#[test]
fn constraint_regex_filters_bindings() {
    let mut b = Bytecode::ruleset(1);
    b.u8v(OP_RULE);
    b.str("user-eval");
    b.u8v(1); // warning
    b.str("eval of user input");
    b.u8v(Lang::Javascript.tag());
    b.u16(1);
    b.u8v(OP_CONSTRAINT);
    b.str("X");
    b.u8v(0); // regex
    b.str("^user");
    b.u16(0);
    b.pattern("eval($X)");

    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&b.bytes);
    assert_ne!(rs, 0);
    let source = "eval(userInput); eval(safeInput);";
    assert_eq!(engine.apply_ruleset(rs, source), 1);

    let value = findings(&engine);
    let matches = value[0]["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["bindings"]["X"], "userInput");
    assert_eq!(value[0]["severity"], "warning");
}

#[test]
fn any_unions_and_fix_is_carried() {
    let mut b = Bytecode::ruleset(1);
    b.u8v(OP_RULE);
    b.str("no-dynamic-code");
    b.u8v(0);
    b.str("dynamic code execution");
    b.u8v(Lang::Javascript.tag());
    b.u16(0);
    b.u16(0);
    b.u8v(OP_FIX);
    b.str("safeCall($X)");
    b.u8v(OP_ANY).u16(2);
    b.pattern("eval($X)");
    b.pattern("execScript($X)");

    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&b.bytes);
    assert_ne!(rs, 0);
    assert_eq!(engine.apply_ruleset(rs, "eval(a); execScript(b);"), 1);
    let value = findings(&engine);
    assert_eq!(value[0]["matches"].as_array().unwrap().len(), 2);
    assert_eq!(value[0]["fix"], "safeCall($X)");
}

#[test]
fn matches_node_references_another_rule() {
    let mut b = Bytecode::ruleset(2);
    b.rule("base", 3);
    b.pattern("eval($X)");
    b.rule("via-matches", 2);
    b.u8v(OP_MATCHES).u16(0);

    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&b.bytes);
    assert_ne!(rs, 0);
    // Both rules fire on the same source; the second through the reference.
    assert_eq!(engine.apply_ruleset(rs, "eval(a);"), 2);

    // Out-of-range reference yields an empty rule, so only `base` fires.
    let mut b = Bytecode::ruleset(2);
    b.rule("base", 3);
    b.pattern("eval($X)");
    b.rule("dangling", 2);
    b.u8v(OP_MATCHES).u16(9);
    let rs = engine.load_ruleset(&b.bytes);
    assert_ne!(rs, 0);
    assert_eq!(engine.apply_ruleset(rs, "eval(a);"), 1);
}

#[test]
fn follows_filter_requires_reference_before() {
    let mut b = Bytecode::ruleset(1);
    b.rule("eval-after-assignment", 2);
    b.u8v(OP_ALL).u16(2);
    b.pattern("eval($X)");
    b.u8v(OP_FOLLOWS).u8v(OP_STOPBY_END);
    b.pattern("$V = input()");

    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&b.bytes);
    assert_ne!(rs, 0);
    assert_eq!(engine.apply_ruleset(rs, "eval(a); x = input(); eval(b);"), 1);
    let value = findings(&engine);
    let matches = value[0]["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["bindings"]["X"], "b");
}

#[test]
fn regex_rule_node_collects_matching_leaves() {
    let mut b = Bytecode::ruleset(1);
    b.rule("todo-comment", 3);
    b.u8v(OP_REGEX).str("TODO");

    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&b.bytes);
    assert_ne!(rs, 0);
    assert_eq!(engine.apply_ruleset(rs, "// TODO: tighten\nf();"), 1);
}

#[test]
fn ruleset_application_is_idempotent() {
    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&eval_inside_try(false));
    assert_eq!(engine.apply_ruleset(rs, TRY_SOURCE), 1);
    let first = engine.ruleset_result().to_vec();
    assert_eq!(engine.apply_ruleset(rs, TRY_SOURCE), 1);
    assert_eq!(engine.ruleset_result(), &first[..]);
}

#[test]
fn no_findings_serializes_empty_array() {
    let mut engine = Engine::new();
    let rs = engine.load_ruleset(&eval_inside_try(false));
    assert_eq!(engine.apply_ruleset(rs, "harmless();"), 0);
    assert_eq!(engine.ruleset_result(), b"[]");
}

#[test]
fn malformed_bytecode_is_rejected() {
    let mut engine = Engine::new();
    assert_eq!(engine.load_ruleset(&[]), 0);
    assert_eq!(engine.load_ruleset(&[0x00, 0x01]), 0);
    let mut good = eval_inside_try(false);
    good.truncate(good.len() - 3);
    assert_eq!(engine.load_ruleset(&good), 0);
}

#[test]
fn freeing_a_ruleset_releases_its_pattern_slots() {
    let mut engine = Engine::new();
    // Fill most of the compiled-pattern table, free, and reload: if slots
    // leaked, the second load would run out of room.
    for _ in 0..4 {
        let rs = engine.load_ruleset(&eval_inside_try(false));
        assert_ne!(rs, 0);
        for _ in 0..20 {
            let h = engine.compile_pattern("f($A)", Lang::Javascript);
            assert_ne!(h, 0);
            engine.free_pattern(h);
        }
        engine.free_ruleset(rs);
    }
    // Double free is a no-op.
    engine.free_ruleset(7);
}

#[test]
fn invalid_handle_application_is_empty() {
    let mut engine = Engine::new();
    assert_eq!(engine.apply_ruleset(42, "eval(a);"), 0);
    assert_eq!(engine.ruleset_result(), b"[]");
}
