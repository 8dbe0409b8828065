//! The engine: every resource the matcher shares across calls, owned by one
//! value instead of process-global statics so hosts wanting parallelism can
//! run one engine per worker. The ABI layer owns a thread-local instance.
//!
//! Slot tables hand out 1-based handles; 0 is the error handle everywhere.
//! Freeing an invalid or already-freed handle is a no-op. The staging list
//! and the result buffers always reflect the most recent operation.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tracing::{debug, warn};

use crate::algebra;
use crate::codec::{self, ResultBuffer};
use crate::language::{Lang, ParserPool};
use crate::matcher;
use crate::models::{ByteRange, MatchList};
use crate::rules::eval::{self, EvalCtx, PatternStore, ScratchPool};
use crate::rules::{bytecode, RuleOp, RuleSet};
use crate::tree::ParsedTree;

/// Compiled-pattern slots.
pub const MAX_COMPILED: usize = 64;
/// Compiled-source slots.
pub const MAX_SOURCES: usize = 16;
/// Saved match-list slots.
pub const MAX_MATCH_SLOTS: usize = 4;
/// Ruleset slots.
pub const MAX_RULESETS: usize = 2;

/// Fixed table of owned resources addressed by 1-based handles.
pub struct SlotTable<T, const N: usize> {
    slots: [Option<T>; N],
}

impl<T, const N: usize> SlotTable<T, N> {
    pub fn new() -> Self {
        SlotTable {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Store `value`, returning its handle or 0 when the table is full.
    pub fn insert(&mut self, value: T) -> u32 {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                return (i + 1) as u32;
            }
        }
        0
    }

    pub fn get(&self, handle: u32) -> Option<&T> {
        let index = handle.checked_sub(1)? as usize;
        self.slots.get(index)?.as_ref()
    }

    /// Release a slot. Handle 0, out-of-range, and double-free are no-ops.
    pub fn free(&mut self, handle: u32) -> Option<T> {
        let index = handle.checked_sub(1)? as usize;
        self.slots.get_mut(index)?.take()
    }
}

impl<T, const N: usize> Default for SlotTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternStore for SlotTable<ParsedTree, MAX_COMPILED> {
    fn pattern(&self, handle: u32) -> Option<&ParsedTree> {
        self.get(handle)
    }
}

/// Content-hash cache of compiled patterns for the tree-walk find family,
/// so repeated `find(pattern)` calls skip re-parsing. Collisions are
/// detected by comparing the stored text; eviction clears a tenth of the
/// entries once full.
pub(crate) struct PatternCache {
    entries: HashMap<u64, ParsedTree>,
    max_size: usize,
}

impl PatternCache {
    fn new(max_size: usize) -> Self {
        PatternCache {
            entries: HashMap::with_capacity(max_size),
            max_size,
        }
    }

    fn key(text: &str, lang: Lang) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        lang.tag().hash(&mut hasher);
        hasher.finish()
    }

    pub(crate) fn get(&self, text: &str, lang: Lang) -> Option<&ParsedTree> {
        let entry = self.entries.get(&Self::key(text, lang))?;
        if entry.text() == text && entry.lang() == lang {
            Some(entry)
        } else {
            None
        }
    }

    fn insert(&mut self, tree: ParsedTree) {
        if self.entries.len() >= self.max_size {
            let to_remove = (self.max_size / 10).max(1);
            let mut removed = 0;
            self.entries.retain(|_, _| {
                if removed < to_remove {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        let key = Self::key(tree.text(), tree.lang());
        self.entries.insert(key, tree);
    }
}

pub struct Engine {
    pub(crate) parsers: ParserPool,
    pub(crate) patterns: SlotTable<ParsedTree, MAX_COMPILED>,
    pub(crate) sources: SlotTable<ParsedTree, MAX_SOURCES>,
    pub(crate) match_slots: SlotTable<Box<MatchList>, MAX_MATCH_SLOTS>,
    pub(crate) rulesets: SlotTable<RuleSet, MAX_RULESETS>,
    pub(crate) staging: Box<MatchList>,
    pub(crate) scratch: ScratchPool,
    pub(crate) pattern_cache: PatternCache,
    pub(crate) result: ResultBuffer,
    pub(crate) ruleset_result: ResultBuffer,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            parsers: ParserPool::new(),
            patterns: SlotTable::new(),
            sources: SlotTable::new(),
            match_slots: SlotTable::new(),
            rulesets: SlotTable::new(),
            staging: MatchList::boxed(),
            scratch: ScratchPool::new(),
            pattern_cache: PatternCache::new(16),
            result: ResultBuffer::new(),
            ruleset_result: ResultBuffer::new(),
        }
    }

    /// The most recent match/filter result.
    pub fn last_matches(&self) -> &MatchList {
        &self.staging
    }

    pub fn result(&self) -> &[u8] {
        self.result.as_slice()
    }

    pub fn ruleset_result(&self) -> &[u8] {
        self.ruleset_result.as_slice()
    }

    /// Serialize the staging list and report its length — the tail of every
    /// match and filter operation.
    fn finish(&mut self) -> u32 {
        codec::write_match_list(&self.staging, &mut self.result);
        self.staging.len() as u32
    }

    fn finish_empty(&mut self) -> u32 {
        self.staging.clear();
        self.finish()
    }

    // ---- pattern / source lifecycle -------------------------------------

    pub fn compile_pattern(&mut self, text: &str, lang: Lang) -> u32 {
        match ParsedTree::parse(&mut self.parsers, lang, text) {
            Some(tree) => self.patterns.insert(tree),
            None => 0,
        }
    }

    pub fn free_pattern(&mut self, handle: u32) {
        self.patterns.free(handle);
    }

    pub fn compile_source(&mut self, text: &str, lang: Lang) -> u32 {
        match ParsedTree::parse(&mut self.parsers, lang, text) {
            Some(tree) => self.sources.insert(tree),
            None => 0,
        }
    }

    pub fn free_source(&mut self, handle: u32) {
        self.sources.free(handle);
    }

    // ---- matching -------------------------------------------------------

    /// One-shot: parse pattern and source, search, serialize.
    pub fn struct_match(&mut self, pattern: &str, source: &str, lang: Lang) -> u32 {
        self.staging.clear();
        let pat = ParsedTree::parse(&mut self.parsers, lang, pattern);
        let src = ParsedTree::parse(&mut self.parsers, lang, source);
        if let (Some(pat), Some(src)) = (pat.as_ref(), src.as_ref()) {
            matcher::search(pat, src, &mut self.staging);
        }
        self.finish()
    }

    /// Match a compiled pattern against freshly-parsed source text.
    pub fn match_pattern(&mut self, pattern: u32, source: &str) -> u32 {
        self.staging.clear();
        let lang = match self.patterns.get(pattern) {
            Some(p) => p.lang(),
            None => return self.finish(),
        };
        let parsed = ParsedTree::parse(&mut self.parsers, lang, source);
        if let (Some(pat), Some(src)) = (self.patterns.get(pattern), parsed.as_ref()) {
            matcher::search(pat, src, &mut self.staging);
        }
        self.finish()
    }

    pub fn match_compiled(&mut self, pattern: u32, source: u32) -> u32 {
        self.staging.clear();
        if let (Some(pat), Some(src)) = (self.patterns.get(pattern), self.sources.get(source)) {
            matcher::search(pat, src, &mut self.staging);
        }
        self.finish()
    }

    pub fn match_in_range(&mut self, pattern: u32, source: u32, start: u32, end: u32) -> u32 {
        self.staging.clear();
        if let (Some(pat), Some(src)) = (self.patterns.get(pattern), self.sources.get(source)) {
            matcher::search_in_range(pat, src, ByteRange::new(start, end), &mut self.staging);
        }
        self.finish()
    }

    pub fn kind_match(&mut self, kind: &str, source: u32) -> u32 {
        self.staging.clear();
        if let Some(src) = self.sources.get(source) {
            eval::collect_kind(src, kind, &mut self.staging);
        }
        self.finish()
    }

    pub fn match_preceding(&mut self, source: u32, start: u32, end: u32) -> u32 {
        self.staging.clear();
        if let Some(src) = self.sources.get(source) {
            matcher::collect_preceding_siblings(src, ByteRange::new(start, end), &mut self.staging);
        }
        self.finish()
    }

    pub fn match_following(&mut self, source: u32, start: u32, end: u32) -> u32 {
        self.staging.clear();
        if let Some(src) = self.sources.get(source) {
            matcher::collect_following_siblings(src, ByteRange::new(start, end), &mut self.staging);
        }
        self.finish()
    }

    // ---- match-set slots and filters ------------------------------------

    /// Snapshot the staging list into a slot so the next operation cannot
    /// clobber it.
    pub fn store_matches(&mut self) -> u32 {
        let mut copy = MatchList::boxed();
        copy.copy_from(&self.staging);
        self.match_slots.insert(copy)
    }

    pub fn free_matches(&mut self, handle: u32) {
        self.match_slots.free(handle);
    }

    pub fn filter_inside(&mut self, refs: u32) -> u32 {
        match self.match_slots.get(refs) {
            Some(refs) => algebra::inside(&mut self.staging, refs),
            None => self.staging.clear(),
        }
        self.finish()
    }

    pub fn filter_not_inside(&mut self, refs: u32) -> u32 {
        match self.match_slots.get(refs) {
            Some(refs) => algebra::not_inside(&mut self.staging, refs),
            None => self.staging.clear(),
        }
        self.finish()
    }

    /// Exact-range exclusion of the referenced set.
    pub fn filter_not(&mut self, refs: u32) -> u32 {
        match self.match_slots.get(refs) {
            Some(refs) => algebra::exclude(&mut self.staging, refs),
            None => self.staging.clear(),
        }
        self.finish()
    }

    pub fn intersect_matches(&mut self, refs: u32) -> u32 {
        match self.match_slots.get(refs) {
            Some(refs) => algebra::intersect(&mut self.staging, refs),
            None => self.staging.clear(),
        }
        self.finish()
    }

    // ---- rulesets -------------------------------------------------------

    /// Decode a ruleset and compile every pattern node into a fresh
    /// compiled-pattern slot, stashing the handle in the node.
    pub fn load_ruleset(&mut self, bytes: &[u8]) -> u32 {
        let mut rs = match bytecode::decode(bytes) {
            Ok(rs) => rs,
            Err(err) => {
                warn!("ruleset decode failed: {}", err);
                return 0;
            }
        };
        let mut compiled = Vec::new();
        for ri in 0..rs.rules.len() {
            let lang = rs.rules[ri].lang;
            for index in rs.reachable_nodes(rs.rules[ri].root) {
                let source = match &rs.nodes[index as usize] {
                    RuleOp::Pattern { source, .. } => source.clone(),
                    _ => continue,
                };
                let handle = self.compile_pattern(&source, lang);
                if handle == 0 {
                    warn!("pattern {:?} failed to compile for rule {}", source, rs.rules[ri].id);
                } else {
                    compiled.push(handle);
                }
                if let RuleOp::Pattern { slot, .. } = &mut rs.nodes[index as usize] {
                    *slot = handle;
                }
            }
        }
        let handle = self.rulesets.insert(rs);
        if handle == 0 {
            for h in compiled {
                self.free_pattern(h);
            }
        }
        handle
    }

    /// Release a ruleset and every compiled-pattern slot it owns.
    pub fn free_ruleset(&mut self, handle: u32) {
        if let Some(rs) = self.rulesets.free(handle) {
            for node in &rs.nodes {
                if let RuleOp::Pattern { slot, .. } = node {
                    if *slot != 0 {
                        self.patterns.free(*slot);
                    }
                }
            }
        }
    }

    /// Evaluate every rule against `source`, writing findings JSON into the
    /// ruleset result buffer. Returns the number of findings.
    pub fn apply_ruleset(&mut self, handle: u32, source: &str) -> u32 {
        self.ruleset_result.clear();
        let mut findings: Vec<codec::FindingJson> = Vec::new();
        let Some(rs) = self.rulesets.get(handle) else {
            codec::write_json(&findings, &mut self.ruleset_result);
            return 0;
        };
        // Parse once per distinct language among the rules.
        let mut parsed: Vec<(Lang, ParsedTree)> = Vec::new();
        for rule in &rs.rules {
            if !parsed.iter().any(|(l, _)| *l == rule.lang) {
                if let Some(tree) = ParsedTree::parse(&mut self.parsers, rule.lang, source) {
                    parsed.push((rule.lang, tree));
                }
            }
        }
        let mut out = self.scratch.take();
        for (ri, rule) in rs.rules.iter().enumerate() {
            let Some((_, src)) = parsed.iter().find(|(l, _)| *l == rule.lang) else {
                continue;
            };
            let mut ctx = EvalCtx {
                rules: rs,
                source: src,
                patterns: &self.patterns,
                scratch: &mut self.scratch,
            };
            eval::eval_rule(&mut ctx, ri, &mut out);
            if !out.is_empty() {
                findings.push(codec::finding_json(rule, &out));
            }
        }
        self.scratch.put(out);
        debug!(findings = findings.len(), "ruleset applied");
        codec::write_json(&findings, &mut self.ruleset_result);
        findings.len() as u32
    }

    // ---- pattern cache (tree-walk find family) --------------------------

    pub(crate) fn ensure_cached_pattern(&mut self, text: &str, lang: Lang) {
        if self.pattern_cache.get(text, lang).is_none() {
            if let Some(tree) = ParsedTree::parse(&mut self.parsers, lang, text) {
                self.pattern_cache.insert(tree);
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_table_handles_are_one_based() {
        let mut table: SlotTable<u32, 4> = SlotTable::new();
        assert_eq!(table.insert(10), 1);
        assert_eq!(table.insert(20), 2);
        assert_eq!(table.get(1), Some(&10));
        assert_eq!(table.get(0), None);
        assert_eq!(table.get(5), None);
    }

    #[test]
    fn slot_table_reuses_freed_slots() {
        let mut table: SlotTable<u32, 2> = SlotTable::new();
        assert_eq!(table.insert(1), 1);
        assert_eq!(table.insert(2), 2);
        assert_eq!(table.insert(3), 0); // full
        assert_eq!(table.free(1), Some(1));
        assert_eq!(table.free(1), None); // double-free no-op
        assert_eq!(table.insert(3), 1);
    }

    #[test]
    fn one_shot_match_serializes_result() {
        let mut engine = Engine::new();
        let count = engine.struct_match("eval($X)", "const x = eval(input);", Lang::Javascript);
        assert_eq!(count, 1);
        assert_eq!(engine.last_matches().len(), 1);
        // Binary result: count, then the first match's start byte.
        let result = engine.result();
        assert_eq!(u32::from_le_bytes(result[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(result[4..8].try_into().unwrap()), 10);
    }

    #[test]
    fn compiled_pattern_and_source_roundtrip() {
        let mut engine = Engine::new();
        let pat = engine.compile_pattern("eval($X)", Lang::Javascript);
        assert_ne!(pat, 0);
        let src = engine.compile_source("eval(a); eval(b);", Lang::Javascript);
        assert_ne!(src, 0);
        assert_eq!(engine.match_compiled(pat, src), 2);
        engine.free_pattern(pat);
        assert_eq!(engine.match_compiled(pat, src), 0);
        engine.free_source(src);
    }

    #[test]
    fn invalid_handles_yield_empty_results() {
        let mut engine = Engine::new();
        assert_eq!(engine.match_compiled(0, 0), 0);
        assert_eq!(engine.match_pattern(7, "f()"), 0);
        assert_eq!(engine.kind_match("call_expression", 99), 0);
        engine.free_pattern(0);
        engine.free_source(42);
    }

    #[test]
    fn empty_pattern_fails_to_compile() {
        let mut engine = Engine::new();
        assert_eq!(engine.compile_pattern("", Lang::Javascript), 0);
    }

    #[test]
    fn store_filter_intersect_flow() {
        let mut engine = Engine::new();
        let src = engine.compile_source("try { eval(a); } catch (e) {} eval(b);", Lang::Javascript);
        let pat = engine.compile_pattern("eval($X)", Lang::Javascript);

        assert_eq!(engine.kind_match("try_statement", src), 1);
        let trys = engine.store_matches();
        assert_ne!(trys, 0);

        assert_eq!(engine.match_compiled(pat, src), 2);
        assert_eq!(engine.filter_inside(trys), 1);

        assert_eq!(engine.match_compiled(pat, src), 2);
        assert_eq!(engine.filter_not_inside(trys), 1);

        engine.free_matches(trys);
        // Freed refs: filters degrade to empty.
        assert_eq!(engine.match_compiled(pat, src), 2);
        assert_eq!(engine.filter_inside(trys), 0);
    }

    #[test]
    fn intersect_with_self_preserves_list() {
        let mut engine = Engine::new();
        let src = engine.compile_source("f(); g();", Lang::Javascript);
        let pat = engine.compile_pattern("$F()", Lang::Javascript);
        assert_eq!(engine.match_compiled(pat, src), 2);
        let saved = engine.store_matches();
        assert_eq!(engine.intersect_matches(saved), 2);
    }

    #[test]
    fn match_in_range_scopes_to_clip() {
        let mut engine = Engine::new();
        let text = "function foo(){eval(a);} function bar(){eval(b);}";
        let src = engine.compile_source(text, Lang::Javascript);
        let pat = engine.compile_pattern("eval($X)", Lang::Javascript);
        let split = text.find("} function").unwrap() as u32 + 1;
        assert_eq!(engine.match_in_range(pat, src, 0, split), 1);
        assert_eq!(engine.match_in_range(pat, src, 0, text.len() as u32), 2);
    }
}
