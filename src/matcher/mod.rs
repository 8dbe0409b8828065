//! Structural pattern matching over concrete syntax trees.
//!
//! `search` walks every node of the source tree in pre-order and tests the
//! pattern body against it with [`match_node`]: metavariables bind the
//! covered source text (unifying on repeat occurrences), ellipsis tokens
//! absorb runs of named children with backtracking, and a one-child
//! `expression_statement` is transparent on either side so statement-shaped
//! patterns meet expression-shaped code.
//!
//! The hot path performs no heap allocation: candidate state is a
//! `Bindings` value snapshotted by copy before each speculative attempt.

mod collect;

pub use collect::{
    collect_by_kind, collect_by_kind_all, collect_by_nth_child, collect_by_regex,
    collect_following_siblings, collect_preceding_siblings,
};

use tree_sitter::Node;

use crate::models::{Bindings, ByteRange, Match, MatchList, Range};
use crate::tree::ParsedTree;

/// Recursion bound for node/child-sequence matching.
pub const MAX_MATCH_DEPTH: usize = 100;
/// Recursion bound for tree walks (candidate enumeration, collectors).
pub const MAX_WALK_DEPTH: usize = 200;

/// Find every subtree of `source` matching `pattern`.
///
/// Results are in pre-order discovery order, deduplicated by exact byte
/// range, and silently truncated at the list capacity.
pub fn search(pattern: &ParsedTree, source: &ParsedTree, out: &mut MatchList) {
    out.clear();
    let body = pattern.pattern_body();
    walk_candidates(pattern, body, source, source.root(), None, out, 0);
}

/// `search` restricted to candidates fully inside `clip`; subtrees fully
/// outside the clip are pruned without descending.
pub fn search_in_range(
    pattern: &ParsedTree,
    source: &ParsedTree,
    clip: ByteRange,
    out: &mut MatchList,
) {
    out.clear();
    let body = pattern.pattern_body();
    walk_candidates(pattern, body, source, source.root(), Some(clip), out, 0);
}

fn walk_candidates(
    pattern: &ParsedTree,
    body: Node,
    source: &ParsedTree,
    node: Node,
    clip: Option<ByteRange>,
    out: &mut MatchList,
    depth: usize,
) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    let node_range = ByteRange::new(node.start_byte() as u32, node.end_byte() as u32);
    if let Some(clip) = clip {
        if node_range.end <= clip.start || node_range.start >= clip.end {
            return;
        }
    }
    // A one-child expression_statement duplicates its inner expression as a
    // candidate through the unwrap rule; the inner node is the canonical
    // match site.
    let wrapper = node.kind() == "expression_statement" && node.named_child_count() == 1;
    if !wrapper && clip.map_or(true, |c| c.contains(node_range)) {
        let mut bindings = Bindings::new();
        if match_node(pattern, body, source, node, &mut bindings, 0) {
            out.push_deduped(Match {
                range: Range::of_node(&node),
                bindings,
            });
        }
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            walk_candidates(pattern, body, source, child, clip, out, depth + 1);
        }
    }
}

/// Test one pattern node against one source node.
pub fn match_node(
    pattern: &ParsedTree,
    pat: Node,
    source: &ParsedTree,
    src: Node,
    bindings: &mut Bindings,
    depth: usize,
) -> bool {
    if depth > MAX_MATCH_DEPTH {
        return false;
    }
    let pat_text = pattern.node_text(&pat);
    if is_ellipsis(pat_text) {
        // Sequence semantics live in the child matcher; a stray ellipsis
        // matched head-on accepts anything.
        return true;
    }
    if let Some(name) = metavar_name(pat_text) {
        let text = source.node_text(&src);
        let range = ByteRange::new(src.start_byte() as u32, src.end_byte() as u32);
        return bindings.bind(name, text, range);
    }
    if pat.kind() == src.kind() {
        return match_children(pattern, pat, source, src, bindings, depth);
    }
    if pat.named_child_count() == 0 && src.named_child_count() == 0 {
        return pat_text == source.node_text(&src);
    }
    if pat.kind() == "expression_statement" && pat.named_child_count() == 1 {
        if let Some(inner) = pat.named_child(0) {
            return match_node(pattern, inner, source, src, bindings, depth + 1);
        }
    }
    if src.kind() == "expression_statement" && src.named_child_count() == 1 {
        if let Some(inner) = src.named_child(0) {
            return match_node(pattern, pat, source, inner, bindings, depth + 1);
        }
    }
    false
}

fn match_children(
    pattern: &ParsedTree,
    pat: Node,
    source: &ParsedTree,
    src: Node,
    bindings: &mut Bindings,
    depth: usize,
) -> bool {
    if pat.named_child_count() == 0 && src.named_child_count() == 0 {
        // Kind-equal leaves still have to agree on text; without this,
        // any identifier would match any other.
        return pattern.node_text(&pat) == source.node_text(&src);
    }
    match_child_seq(pattern, pat, source, src, 0, 0, bindings, depth)
}

/// Align pattern named children `[pi..]` against source named children
/// `[si..]`. Each ellipsis consumes zero or more source children, shortest
/// run first, growing on backtrack; every other pattern child must match
/// exactly one source child in order.
#[allow(clippy::too_many_arguments)]
fn match_child_seq(
    pattern: &ParsedTree,
    pat: Node,
    source: &ParsedTree,
    src: Node,
    pi: usize,
    si: usize,
    bindings: &mut Bindings,
    depth: usize,
) -> bool {
    if depth > MAX_MATCH_DEPTH {
        return false;
    }
    let pat_len = pat.named_child_count();
    let src_len = src.named_child_count();
    if pi == pat_len {
        return si == src_len;
    }
    let pat_child = match pat.named_child(pi) {
        Some(node) => node,
        None => return false,
    };
    if is_ellipsis(pattern.node_text(&pat_child)) {
        for consumed in 0..=(src_len - si) {
            let saved = *bindings;
            if match_child_seq(pattern, pat, source, src, pi + 1, si + consumed, bindings, depth + 1)
            {
                return true;
            }
            *bindings = saved;
        }
        return false;
    }
    if si == src_len {
        return false;
    }
    let src_child = match src.named_child(si) {
        Some(node) => node,
        None => return false,
    };
    let saved = *bindings;
    if match_node(pattern, pat_child, source, src_child, bindings, depth + 1)
        && match_child_seq(pattern, pat, source, src, pi + 1, si + 1, bindings, depth + 1)
    {
        return true;
    }
    *bindings = saved;
    false
}

fn is_meta_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_'
}

/// `$NAME` with at least one `[A-Z0-9_]` character and no second `$`.
pub(crate) fn metavar_name(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('$')?;
    if rest.is_empty() || rest.starts_with('$') {
        return None;
    }
    if rest.bytes().all(is_meta_byte) {
        Some(rest)
    } else {
        None
    }
}

/// `...`, `$...NAME`, or the `$$$`/`$$$NAME` spelling that lexes as a
/// single identifier under the JS/TS grammars. Ellipsis metavariables do
/// not bind.
pub(crate) fn is_ellipsis(text: &str) -> bool {
    if text == "..." {
        return true;
    }
    let rest = if let Some(rest) = text.strip_prefix("$$$") {
        rest
    } else if let Some(rest) = text.strip_prefix("$...") {
        rest
    } else {
        return false;
    };
    rest.bytes().all(is_meta_byte)
}
