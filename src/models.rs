//! Shared data model: points, ranges, metavariable bindings, match lists.
//!
//! Everything here is fixed-capacity and value-typed. The matcher's hot path
//! clones `Bindings` by value to snapshot/restore across backtracking
//! attempts and never touches the heap; `MatchList` is large and is
//! heap-boxed exactly once per owner (engine staging, slots, scratch pool),
//! then always passed by `&mut`.

use tree_sitter::Node;

/// Maximum matches held by one list. A full list silently truncates.
pub const MAX_MATCHES: usize = 64;
/// Maximum metavariable bindings per match.
pub const MAX_BINDINGS: usize = 16;
/// Maximum captured text per binding; longer captures fail the bind.
pub const MAX_BINDING_TEXT: usize = 256;
/// Maximum metavariable name length; longer names fail the bind.
pub const MAX_METAVAR_NAME: usize = 32;

/// Zero-based row/column position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

/// Half-open byte span `[start, end)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u32,
    pub end: u32,
}

impl ByteRange {
    pub fn new(start: u32, end: u32) -> Self {
        ByteRange { start, end }
    }

    /// Both halves packed into one word; exact-range comparison reduces to
    /// a single integer compare, which keeps the O(n·m) set-algebra loops
    /// friendly to the autovectorizer.
    #[inline]
    pub fn packed(self) -> u64 {
        (u64::from(self.start) << 32) | u64::from(self.end)
    }

    /// `self` fully contains `other`.
    #[inline]
    pub fn contains(self, other: ByteRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// Any byte overlap between the two spans.
    #[inline]
    pub fn overlaps(self, other: ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Byte span plus its row/column endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Range {
    pub bytes: ByteRange,
    pub start_point: Point,
    pub end_point: Point,
}

impl Range {
    pub fn of_node(node: &Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Range {
            bytes: ByteRange::new(node.start_byte() as u32, node.end_byte() as u32),
            start_point: Point {
                row: start.row as u32,
                column: start.column as u32,
            },
            end_point: Point {
                row: end.row as u32,
                column: end.column as u32,
            },
        }
    }
}

/// One recorded metavariable capture. Name and text live in inline buffers
/// so the enclosing `Bindings` stays a flat value type.
#[derive(Clone, Copy)]
pub struct Binding {
    name_len: u8,
    name: [u8; MAX_METAVAR_NAME],
    text_len: u16,
    text: [u8; MAX_BINDING_TEXT],
    range: ByteRange,
}

const EMPTY_BINDING: Binding = Binding {
    name_len: 0,
    name: [0; MAX_METAVAR_NAME],
    text_len: 0,
    text: [0; MAX_BINDING_TEXT],
    range: ByteRange { start: 0, end: 0 },
};

impl Binding {
    pub fn name(&self) -> &str {
        // The buffers are only ever filled from `&str` slices.
        std::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.text[..self.text_len as usize]).unwrap_or("")
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name())
            .field("text", &self.text())
            .field("range", &self.range)
            .finish()
    }
}

/// Bounded set of bindings with unify-on-rebind semantics.
///
/// Cloning is a flat memcpy; the child-sequence matcher snapshots the whole
/// set before each speculative attempt and restores it on failure.
#[derive(Clone, Copy)]
pub struct Bindings {
    len: u8,
    slots: [Binding; MAX_BINDINGS],
}

impl Bindings {
    pub fn new() -> Self {
        Bindings {
            len: 0,
            slots: [EMPTY_BINDING; MAX_BINDINGS],
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.slots[..self.len as usize].iter()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.iter().find(|b| b.name() == name)
    }

    /// Record `name = text` or unify with an existing binding.
    ///
    /// Returns `false` — failing the candidate match, not the whole search —
    /// when the name or text exceeds its buffer, the set is full, or the
    /// name is already bound to different text.
    pub fn bind(&mut self, name: &str, text: &str, range: ByteRange) -> bool {
        if name.len() > MAX_METAVAR_NAME || text.len() > MAX_BINDING_TEXT {
            return false;
        }
        if let Some(existing) = self.get(name) {
            return existing.text() == text;
        }
        if self.len() == MAX_BINDINGS {
            return false;
        }
        let slot = &mut self.slots[self.len as usize];
        slot.name_len = name.len() as u8;
        slot.name[..name.len()].copy_from_slice(name.as_bytes());
        slot.text_len = text.len() as u16;
        slot.text[..text.len()].copy_from_slice(text.as_bytes());
        slot.range = range;
        self.len += 1;
        true
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|b| (b.name(), b.text())))
            .finish()
    }
}

/// A matched subtree: its range plus the bindings captured while matching.
#[derive(Clone, Copy, Debug)]
pub struct Match {
    pub range: Range,
    pub bindings: Bindings,
}

/// Fixed-capacity list of matches. Too large for the stack — construct with
/// [`MatchList::boxed`] and pass by `&mut` everywhere.
pub struct MatchList {
    len: u32,
    items: [Match; MAX_MATCHES],
}

impl MatchList {
    /// Heap-allocate an empty list without materializing it on the stack.
    /// All-zero bytes are a valid empty list: every field is a plain
    /// integer or an array of them.
    pub fn boxed() -> Box<MatchList> {
        unsafe { Box::<MatchList>::new_zeroed().assume_init() }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == MAX_MATCHES
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn matches(&self) -> &[Match] {
        &self.items[..self.len as usize]
    }

    /// Append, silently truncating at capacity.
    pub fn push(&mut self, m: Match) -> bool {
        if self.is_full() {
            return false;
        }
        self.items[self.len as usize] = m;
        self.len += 1;
        true
    }

    /// Append unless a match with the exact same byte range is present.
    pub fn push_deduped(&mut self, m: Match) -> bool {
        if self.contains_range(m.range.bytes) {
            return false;
        }
        self.push(m)
    }

    pub fn contains_range(&self, range: ByteRange) -> bool {
        let key = range.packed();
        self.matches().iter().any(|m| m.range.bytes.packed() == key)
    }

    pub fn copy_from(&mut self, other: &MatchList) {
        self.len = other.len;
        self.items[..other.len()].copy_from_slice(&other.items[..other.len()]);
    }

    /// In-place filter; survivors keep their bindings untouched.
    pub fn retain(&mut self, mut keep: impl FnMut(&Match) -> bool) {
        let mut write = 0usize;
        for read in 0..self.len() {
            if keep(&self.items[read]) {
                if write != read {
                    self.items[write] = self.items[read];
                }
                write += 1;
            }
        }
        self.len = write as u32;
    }
}

impl std::fmt::Debug for MatchList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.matches()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> ByteRange {
        ByteRange::new(start, end)
    }

    fn match_at(start: u32, end: u32) -> Match {
        Match {
            range: Range {
                bytes: range(start, end),
                ..Range::default()
            },
            bindings: Bindings::new(),
        }
    }

    #[test]
    fn bind_and_lookup() {
        let mut b = Bindings::new();
        assert!(b.bind("X", "input", range(10, 15)));
        assert_eq!(b.get("X").unwrap().text(), "input");
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn rebind_unifies_on_equal_text() {
        let mut b = Bindings::new();
        assert!(b.bind("X", "a", range(0, 1)));
        assert!(b.bind("X", "a", range(4, 5)));
        assert!(!b.bind("X", "b", range(8, 9)));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn bind_rejects_overlong_text() {
        let mut b = Bindings::new();
        let long = "x".repeat(MAX_BINDING_TEXT + 1);
        assert!(!b.bind("X", &long, range(0, long.len() as u32)));
        assert!(b.is_empty());
    }

    #[test]
    fn bind_rejects_overflow() {
        let mut b = Bindings::new();
        for i in 0..MAX_BINDINGS {
            assert!(b.bind(&format!("V{}", i), "t", range(i as u32, i as u32 + 1)));
        }
        assert!(!b.bind("OVER", "t", range(99, 100)));
        assert_eq!(b.len(), MAX_BINDINGS);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut b = Bindings::new();
        b.bind("X", "a", range(0, 1));
        let saved = b;
        b.bind("Y", "b", range(2, 3));
        b = saved;
        assert_eq!(b.len(), 1);
        assert!(b.get("Y").is_none());
    }

    #[test]
    fn match_list_dedups_exact_ranges() {
        let mut list = MatchList::boxed();
        assert!(list.push_deduped(match_at(3, 9)));
        assert!(!list.push_deduped(match_at(3, 9)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn match_list_truncates_at_capacity() {
        let mut list = MatchList::boxed();
        for i in 0..(MAX_MATCHES as u32 + 8) {
            list.push_deduped(match_at(i, i + 1));
        }
        assert_eq!(list.len(), MAX_MATCHES);
    }

    #[test]
    fn retain_compacts_in_place() {
        let mut list = MatchList::boxed();
        for i in 0..10u32 {
            list.push(match_at(i, i + 1));
        }
        list.retain(|m| m.range.bytes.start % 2 == 0);
        assert_eq!(list.len(), 5);
        assert!(list.matches().iter().all(|m| m.range.bytes.start % 2 == 0));
    }
}
