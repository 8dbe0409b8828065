//! Language tags and the per-language parser pool.
//!
//! One parser per language is created on first use and then reused for
//! every parse, with `Parser::reset` called after each run so the parser's
//! internal caches are reclaimed without churning the allocator. In a
//! wasm-freestanding deployment freed pages never return to the host, so
//! parser reuse is what keeps the heap flat.

use tracing::warn;
use tree_sitter::{Parser, Tree};

/// Supported source languages. The wire tag is the discriminant used by the
/// host ABI and the ruleset bytecode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lang {
    Javascript,
    Typescript,
    Tsx,
}

impl Lang {
    pub fn from_tag(tag: u8) -> Option<Lang> {
        match tag {
            1 => Some(Lang::Javascript),
            2 => Some(Lang::Typescript),
            3 => Some(Lang::Tsx),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Lang::Javascript => 1,
            Lang::Typescript => 2,
            Lang::Tsx => 3,
        }
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Lang::Javascript => tree_sitter_javascript::LANGUAGE.into(),
            Lang::Typescript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            // The TSX grammar is the TypeScript grammar with JSX enabled.
            Lang::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn index(self) -> usize {
        match self {
            Lang::Javascript => 0,
            Lang::Typescript => 1,
            Lang::Tsx => 2,
        }
    }
}

/// Lazily-initialized parsers, one per language.
pub struct ParserPool {
    parsers: [Option<Parser>; 3],
}

impl ParserPool {
    pub fn new() -> Self {
        ParserPool {
            parsers: [None, None, None],
        }
    }

    /// Parse `text`, reusing the cached parser for `lang`.
    ///
    /// Returns `None` on empty input or when the parser produces no tree;
    /// callers surface that as an empty result per the error model.
    pub fn parse(&mut self, lang: Lang, text: &str) -> Option<Tree> {
        if text.is_empty() {
            return None;
        }
        let slot = &mut self.parsers[lang.index()];
        if slot.is_none() {
            let mut parser = Parser::new();
            parser
                .set_language(&lang.grammar())
                .expect("Failed to set Tree-Sitter language");
            *slot = Some(parser);
        }
        let parser = slot.as_mut().expect("parser slot initialized above");
        let tree = parser.parse(text, None);
        parser.reset();
        if tree.is_none() {
            warn!("parser returned no tree for {} bytes of {:?}", text.len(), lang);
        }
        tree
    }
}

impl Default for ParserPool {
    fn default() -> Self {
        Self::new()
    }
}
