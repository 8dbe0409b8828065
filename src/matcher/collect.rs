//! Node collectors: kind, nth-child, sibling, and regex driven walks that
//! feed the rule evaluator and the kind/sibling match entry points.

use regex::Regex;

use tree_sitter::Node;

use crate::models::{Bindings, ByteRange, Match, MatchList, Range};
use crate::tree::ParsedTree;

use super::MAX_WALK_DEPTH;

fn push_node(out: &mut MatchList, node: &Node) {
    out.push_deduped(Match {
        range: Range::of_node(node),
        bindings: Bindings::new(),
    });
}

/// Collect every named node of the given kind. The named walk does not
/// descend into extras, so comment kinds are only reachable through
/// [`collect_by_kind_all`].
pub fn collect_by_kind(source: &ParsedTree, kind: &str, out: &mut MatchList) {
    out.clear();
    visit_named(source.root(), kind, out, 0);
}

fn visit_named(node: Node, kind: &str, out: &mut MatchList, depth: usize) {
    if depth > MAX_WALK_DEPTH || node.is_extra() {
        return;
    }
    if node.is_named() && node.kind() == kind {
        push_node(out, &node);
    }
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            visit_named(child, kind, out, depth + 1);
        }
    }
}

/// Collect every node of the given kind, walking all children so extras
/// (comments) are visited too.
pub fn collect_by_kind_all(source: &ParsedTree, kind: &str, out: &mut MatchList) {
    out.clear();
    visit_all(source.root(), kind, out, 0);
}

fn visit_all(node: Node, kind: &str, out: &mut MatchList, depth: usize) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    if node.kind() == kind {
        push_node(out, &node);
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            visit_all(child, kind, out, depth + 1);
        }
    }
}

/// Collect every node that is the `index`-th named child of its parent,
/// in pre-order.
pub fn collect_by_nth_child(source: &ParsedTree, index: u32, out: &mut MatchList) {
    out.clear();
    visit_nth(source.root(), None, index, out, 0);
}

fn visit_nth(node: Node, position: Option<u32>, index: u32, out: &mut MatchList, depth: usize) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    if position == Some(index) {
        push_node(out, &node);
    }
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            visit_nth(child, Some(i as u32), index, out, depth + 1);
        }
    }
}

/// Named siblings before the node exactly covering `range`, nearest first.
pub fn collect_preceding_siblings(source: &ParsedTree, range: ByteRange, out: &mut MatchList) {
    out.clear();
    let Some(node) = source.node_covering_exact(range.start, range.end) else {
        return;
    };
    let mut cursor = node.prev_named_sibling();
    while let Some(sibling) = cursor {
        push_node(out, &sibling);
        cursor = sibling.prev_named_sibling();
    }
}

/// Named siblings after the node exactly covering `range`, in source order.
pub fn collect_following_siblings(source: &ParsedTree, range: ByteRange, out: &mut MatchList) {
    out.clear();
    let Some(node) = source.node_covering_exact(range.start, range.end) else {
        return;
    };
    let mut cursor = node.next_named_sibling();
    while let Some(sibling) = cursor {
        push_node(out, &sibling);
        cursor = sibling.next_named_sibling();
    }
}

/// Leaf nodes (total-child traversal, extras included) whose text contains
/// a match of `regex`.
pub fn collect_by_regex(source: &ParsedTree, regex: &Regex, out: &mut MatchList) {
    out.clear();
    visit_regex(source, source.root(), regex, out, 0);
}

fn visit_regex(source: &ParsedTree, node: Node, regex: &Regex, out: &mut MatchList, depth: usize) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    if node.child_count() == 0 {
        if regex.is_match(source.node_text(&node)) {
            push_node(out, &node);
        }
        return;
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            visit_regex(source, child, regex, out, depth + 1);
        }
    }
}
