//! Tree-walk API: node-handle navigation over compiled sources.
//!
//! Every operation addresses its node as `(source_handle, start_byte,
//! end_byte, is_root)`: the node is located by exact byte range, with
//! `is_root` short-circuiting to the cached root (needed when the root and
//! its sole named child share one range). JSON producers return the result
//! length, 0 on any failure; the host reads the result buffer.

use tree_sitter::Node;

use crate::codec::{self, NodeInfo};
use crate::engine::Engine;
use crate::matcher;
use crate::models::ByteRange;
use crate::tree::ParsedTree;

fn locate<'a>(source: &'a ParsedTree, start: u32, end: u32, is_root: bool) -> Option<Node<'a>> {
    if is_root {
        Some(source.root())
    } else {
        source.node_covering_exact(start, end)
    }
}

impl Engine {
    /// Root node info of a compiled source.
    pub fn node_root(&mut self, source: u32) -> u32 {
        self.result.clear();
        let Some(src) = self.sources.get(source) else {
            return 0;
        };
        let info = NodeInfo::of(&src.root());
        if codec::write_json(&info, &mut self.result) {
            self.result.len() as u32
        } else {
            0
        }
    }

    pub fn node_info(&mut self, source: u32, start: u32, end: u32, is_root: bool) -> u32 {
        self.with_node(source, start, end, is_root, |node| NodeInfo::of(node))
    }

    pub fn node_children(&mut self, source: u32, start: u32, end: u32, is_root: bool) -> u32 {
        self.with_node(source, start, end, is_root, |node| {
            let mut infos = Vec::with_capacity(node.child_count());
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    infos.push(NodeInfo::of(&child));
                }
            }
            infos
        })
    }

    pub fn node_named_children(&mut self, source: u32, start: u32, end: u32, is_root: bool) -> u32 {
        self.with_node(source, start, end, is_root, |node| {
            let mut infos = Vec::with_capacity(node.named_child_count());
            for i in 0..node.named_child_count() {
                if let Some(child) = node.named_child(i) {
                    infos.push(NodeInfo::of(&child));
                }
            }
            infos
        })
    }

    pub fn node_parent(&mut self, source: u32, start: u32, end: u32, is_root: bool) -> u32 {
        self.with_node(source, start, end, is_root, |node| {
            node.parent().map(|p| NodeInfo::of(&p))
        })
    }

    pub fn node_next(&mut self, source: u32, start: u32, end: u32, is_root: bool) -> u32 {
        self.with_node(source, start, end, is_root, |node| {
            node.next_named_sibling().map(|s| NodeInfo::of(&s))
        })
    }

    pub fn node_prev(&mut self, source: u32, start: u32, end: u32, is_root: bool) -> u32 {
        self.with_node(source, start, end, is_root, |node| {
            node.prev_named_sibling().map(|s| NodeInfo::of(&s))
        })
    }

    pub fn node_field_child(
        &mut self,
        source: u32,
        start: u32,
        end: u32,
        is_root: bool,
        field: &str,
    ) -> u32 {
        self.with_node(source, start, end, is_root, |node| {
            node.child_by_field_name(field).map(|c| NodeInfo::of(&c))
        })
    }

    /// First match of `pattern` inside the subtree, as node info (or null).
    pub fn find_in_subtree(
        &mut self,
        source: u32,
        start: u32,
        end: u32,
        is_root: bool,
        pattern: &str,
    ) -> u32 {
        if self.search_subtree(source, start, end, is_root, pattern).is_none() {
            self.result.clear();
            return 0;
        }
        let Some(src) = self.sources.get(source) else {
            return 0;
        };
        let info = self
            .staging
            .matches()
            .first()
            .and_then(|m| src.node_covering_exact(m.range.bytes.start, m.range.bytes.end))
            .map(|node| NodeInfo::of(&node));
        if codec::write_json(&info, &mut self.result) {
            self.result.len() as u32
        } else {
            0
        }
    }

    /// All matches of `pattern` inside the subtree, as node infos.
    pub fn find_all_in_subtree(
        &mut self,
        source: u32,
        start: u32,
        end: u32,
        is_root: bool,
        pattern: &str,
    ) -> u32 {
        if self.search_subtree(source, start, end, is_root, pattern).is_none() {
            self.result.clear();
            return 0;
        }
        let Some(src) = self.sources.get(source) else {
            return 0;
        };
        let infos: Vec<NodeInfo> = self
            .staging
            .matches()
            .iter()
            .filter_map(|m| src.node_covering_exact(m.range.bytes.start, m.range.bytes.end))
            .map(|node| NodeInfo::of(&node))
            .collect();
        if codec::write_json(&infos, &mut self.result) {
            self.result.len() as u32
        } else {
            0
        }
    }

    /// 1 iff the subtree's own range appears in the pattern's matches.
    pub fn matches_in_subtree(
        &mut self,
        source: u32,
        start: u32,
        end: u32,
        is_root: bool,
        pattern: &str,
    ) -> u32 {
        let Some(clip) = self.search_subtree(source, start, end, is_root, pattern) else {
            return 0;
        };
        u32::from(self.staging.contains_range(clip))
    }

    /// Run the scoped search for the find family: locate the subtree,
    /// compile (or reuse) the pattern, search into staging. Returns the
    /// subtree's byte range, or `None` on any lookup/compile failure.
    fn search_subtree(
        &mut self,
        source: u32,
        start: u32,
        end: u32,
        is_root: bool,
        pattern: &str,
    ) -> Option<ByteRange> {
        self.staging.clear();
        let lang = self.sources.get(source)?.lang();
        self.ensure_cached_pattern(pattern, lang);
        let src = self.sources.get(source)?;
        let node = locate(src, start, end, is_root)?;
        let clip = ByteRange::new(node.start_byte() as u32, node.end_byte() as u32);
        let pat = self.pattern_cache.get(pattern, lang)?;
        matcher::search_in_range(pat, src, clip, &mut self.staging);
        Some(clip)
    }

    fn with_node<T: serde::Serialize>(
        &mut self,
        source: u32,
        start: u32,
        end: u32,
        is_root: bool,
        describe: impl FnOnce(&Node) -> T,
    ) -> u32 {
        self.result.clear();
        let Some(src) = self.sources.get(source) else {
            return 0;
        };
        let Some(node) = locate(src, start, end, is_root) else {
            return 0;
        };
        let value = describe(&node);
        if codec::write_json(&value, &mut self.result) {
            self.result.len() as u32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Lang;

    fn engine_with(source: &str) -> (Engine, u32) {
        let mut engine = Engine::new();
        let handle = engine.compile_source(source, Lang::Javascript);
        assert_ne!(handle, 0);
        (engine, handle)
    }

    fn json(engine: &Engine) -> serde_json::Value {
        serde_json::from_slice(engine.result()).expect("valid json")
    }

    #[test]
    fn root_info_describes_program() {
        let (mut engine, src) = engine_with("f(); g();");
        assert_ne!(engine.node_root(src), 0);
        let value = json(&engine);
        assert_eq!(value["kind"], "program");
        assert_eq!(value["ncc"], 2);
    }

    #[test]
    fn named_children_are_listed_in_source_order() {
        let (mut engine, src) = engine_with("a; b;");
        assert_ne!(engine.node_named_children(src, 0, 0, true), 0);
        let value = json(&engine);
        let kids = value.as_array().unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0]["sb"], 0);
        assert_eq!(kids[1]["sb"], 3);
    }

    #[test]
    fn parent_of_root_is_null() {
        let (mut engine, src) = engine_with("a;");
        assert_ne!(engine.node_parent(src, 0, 0, true), 0);
        assert!(json(&engine).is_null());
    }

    #[test]
    fn field_child_resolves_grammar_fields() {
        let source = "function foo() { return 1; }";
        let (mut engine, src) = engine_with(source);
        let len = engine.node_field_child(src, 0, source.len() as u32, false, "name");
        assert_ne!(len, 0);
        let value = json(&engine);
        assert_eq!(value["kind"], "identifier");
        assert_eq!(value["sb"], 9);
    }

    #[test]
    fn inexact_range_is_an_error() {
        let (mut engine, src) = engine_with("abc;");
        assert_eq!(engine.node_info(src, 1, 2, false), 0);
    }

    #[test]
    fn find_all_scopes_to_subtree() {
        let source = "function foo(){eval(a);} function bar(){eval(b);}";
        let (mut engine, src) = engine_with(source);

        // Whole tree: two call sites.
        assert_ne!(engine.find_all_in_subtree(src, 0, 0, true, "eval($X)"), 0);
        let all = json(&engine);
        assert_eq!(all.as_array().unwrap().len(), 2);

        // First function only.
        let foo_end = source.find('}').unwrap() as u32 + 1;
        assert_ne!(engine.find_in_subtree(src, 0, foo_end, false, "eval($X)"), 0);
        let first = json(&engine);
        let sb = first["sb"].as_u64().unwrap() as usize;
        let eb = first["eb"].as_u64().unwrap() as usize;
        assert_eq!(&source[sb..eb], "eval(a)");
    }

    #[test]
    fn matches_reports_subtree_self_match() {
        let source = "eval(a);";
        let (mut engine, src) = engine_with(source);
        // The call node is bytes 0..7.
        assert_eq!(engine.matches_in_subtree(src, 0, 7, false, "eval($X)"), 1);
        assert_eq!(engine.matches_in_subtree(src, 0, 7, false, "exec($X)"), 0);
    }
}
