//! Owned parse results: source text plus its tree, with the node lookups
//! the matcher and tree-walk API share.

use tree_sitter::Node;

use crate::language::{Lang, ParserPool};

/// A parsed pattern or source: an owned copy of the text and the tree
/// produced from it. Nodes borrow from the tree and slice text from the
/// owned bytes, so a `ParsedTree` stays alive as long as any consumer of
/// its nodes (slot tables hold them until an explicit free).
pub struct ParsedTree {
    lang: Lang,
    text: String,
    tree: tree_sitter::Tree,
}

impl ParsedTree {
    pub fn parse(pool: &mut ParserPool, lang: Lang, text: &str) -> Option<ParsedTree> {
        let tree = pool.parse(lang, text)?;
        Some(ParsedTree {
            lang,
            text: text.to_string(),
            tree,
        })
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source bytes spanned by `node`. Tree-sitter byte offsets always land
    /// on UTF-8 boundaries of the text the tree was parsed from; a range
    /// from any other tree yields `""` rather than panicking.
    pub fn node_text(&self, node: &Node) -> &str {
        self.text.get(node.start_byte()..node.end_byte()).unwrap_or("")
    }

    /// The pattern body: a `program` wrapper whose sole named child is the
    /// pattern itself is transparent (one level only).
    pub fn pattern_body(&self) -> Node<'_> {
        let root = self.root();
        if root.kind() == "program" && root.named_child_count() == 1 {
            if let Some(body) = root.named_child(0) {
                return body;
            }
        }
        root
    }

    /// Locate the node exactly covering `[start, end)`.
    ///
    /// `named_descendant_for_byte_range` returns the smallest spanning node;
    /// if its range is not exact there is no covering node. When wrapper
    /// chains share one byte range (a statement without `;` over its sole
    /// expression) the walk climbs to the highest non-root node with that
    /// range, so sibling queries land on the level that has siblings.
    pub fn node_covering_exact(&self, start: u32, end: u32) -> Option<Node<'_>> {
        let root = self.root();
        let mut node = root.named_descendant_for_byte_range(start as usize, end as usize)?;
        if node.start_byte() != start as usize || node.end_byte() != end as usize {
            return None;
        }
        while let Some(parent) = node.parent() {
            if parent.id() == root.id()
                || parent.start_byte() != node.start_byte()
                || parent.end_byte() != node.end_byte()
            {
                break;
            }
            node = parent;
        }
        Some(node)
    }
}

impl std::fmt::Debug for ParsedTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedTree")
            .field("lang", &self.lang)
            .field("bytes", &self.text.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedTree {
        let mut pool = ParserPool::new();
        ParsedTree::parse(&mut pool, Lang::Javascript, text).expect("parse")
    }

    #[test]
    fn pattern_body_unwraps_single_statement() {
        let tree = parse("eval($X)");
        let body = tree.pattern_body();
        assert_eq!(body.kind(), "expression_statement");
    }

    #[test]
    fn pattern_body_keeps_multi_statement_program() {
        let tree = parse("a; b;");
        assert_eq!(tree.pattern_body().kind(), "program");
    }

    #[test]
    fn node_text_slices_owned_bytes() {
        let tree = parse("const x = eval(input);");
        let root = tree.root();
        assert_eq!(tree.node_text(&root), "const x = eval(input);");
    }

    #[test]
    fn exact_range_lookup_climbs_wrapper_chain() {
        // No trailing semicolon: expression_statement and call_expression
        // share the full range; the locator should surface the statement.
        let tree = parse("eval(a)");
        let node = tree.node_covering_exact(0, 7).expect("node");
        assert_eq!(node.kind(), "expression_statement");
    }

    #[test]
    fn inexact_range_yields_none() {
        let tree = parse("const x = eval(input);");
        assert!(tree.node_covering_exact(0, 4).is_none());
    }
}
