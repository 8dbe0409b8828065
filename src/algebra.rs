//! Range-typed set operations over match lists.
//!
//! Every operation mutates a destination list in place against a reference
//! list, so no fixed-capacity list is ever created on the stack. Only byte
//! ranges participate in the predicates; survivors keep their bindings.
//! Exact-range comparisons go through [`ByteRange::packed`] so the inner
//! O(n·m) loops compare single words.

use crate::models::{ByteRange, MatchList};

/// Keep `m` iff some reference fully contains it.
pub fn inside(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| refs.matches().iter().any(|r| r.range.bytes.contains(m.range.bytes)));
}

pub fn not_inside(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| !refs.matches().iter().any(|r| r.range.bytes.contains(m.range.bytes)));
}

/// Keep `m` iff it fully contains some reference.
pub fn has(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| refs.matches().iter().any(|r| m.range.bytes.contains(r.range.bytes)));
}

pub fn not_has(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| !refs.matches().iter().any(|r| m.range.bytes.contains(r.range.bytes)));
}

/// Keep `m` iff some reference ends at or before `m` starts.
pub fn follows(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| refs.matches().iter().any(|r| r.range.bytes.end <= m.range.bytes.start));
}

pub fn not_follows(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| !refs.matches().iter().any(|r| r.range.bytes.end <= m.range.bytes.start));
}

/// Keep `m` iff some reference starts at or after `m` ends.
pub fn precedes(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| refs.matches().iter().any(|r| r.range.bytes.start >= m.range.bytes.end));
}

pub fn not_precedes(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| !refs.matches().iter().any(|r| r.range.bytes.start >= m.range.bytes.end));
}

/// Drop every match whose exact byte range appears in the references.
pub fn exclude(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| {
        let key = m.range.bytes.packed();
        !refs.matches().iter().any(|r| r.range.bytes.packed() == key)
    });
}

/// Keep every match overlapping at least one reference.
pub fn intersect(out: &mut MatchList, refs: &MatchList) {
    out.retain(|m| refs.matches().iter().any(|r| r.range.bytes.overlaps(m.range.bytes)));
}

/// Append references not already present by exact range, silently stopping
/// at capacity.
pub fn union(out: &mut MatchList, refs: &MatchList) {
    for r in refs.matches() {
        out.push_deduped(*r);
    }
}
