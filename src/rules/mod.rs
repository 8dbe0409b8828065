//! Rule model: compiled rulesets, rule nodes, constraints, transforms.
//!
//! A ruleset is decoded from the flat bytecode stream (see [`bytecode`])
//! into dense arrays: all rule nodes live in one `nodes` vector indexed by
//! `u16`, and `all`/`any` child lists are contiguous runs in a shared index
//! pool. Pattern nodes additionally carry the compiled-pattern slot handle
//! stashed by the engine after decode.

pub mod bytecode;
pub mod eval;

use regex::Regex;
use thiserror::Error;

use crate::language::Lang;

/// Maximum rules per ruleset.
pub const MAX_RULES: usize = 32;
/// Maximum rule nodes per ruleset (shared across all rules).
pub const MAX_RULE_NODES: usize = 128;
/// Maximum metavariable constraints per ruleset.
pub const MAX_CONSTRAINTS: usize = 16;
/// Maximum transforms per ruleset.
pub const MAX_TRANSFORMS: usize = 16;
/// Maximum entries in the shared `all`/`any` child-index pool.
pub const MAX_CHILDREN: usize = 64;

/// Finding severity, in wire-tag order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    pub fn from_tag(tag: u8) -> Option<Severity> {
        match tag {
            0 => Some(Severity::Error),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Info),
            3 => Some(Severity::Hint),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        }
    }
}

/// Traversal boundary attached to a relational node. Decoded and preserved
/// through round-trips; the evaluator applies reference semantics and does
/// not consult it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBy {
    Neighbor,
    End,
    /// Boundary described by another rule node (index into `nodes`).
    Rule(u16),
}

/// Contiguous run in the shared child-index pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildRange {
    pub start: u16,
    pub len: u16,
}

/// One node of a rule's boolean tree.
#[derive(Debug, PartialEq)]
pub enum RuleOp {
    Pattern {
        source: String,
        /// Compiled-pattern slot handle, stashed after decode; 0 until the
        /// engine compiles it (or when compilation failed).
        slot: u32,
    },
    Kind(String),
    Regex(String),
    NthChild(u32),
    All { children: ChildRange },
    Any { children: ChildRange },
    Not { child: u16 },
    Inside { child: u16, stop_by: StopBy },
    Has { child: u16, stop_by: StopBy },
    Follows { child: u16, stop_by: StopBy },
    Precedes { child: u16, stop_by: StopBy },
    Matches { rule: u16 },
}

impl RuleOp {
    /// Relational operators filter an existing candidate set; everything
    /// else produces candidates.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            RuleOp::Inside { .. }
                | RuleOp::Has { .. }
                | RuleOp::Follows { .. }
                | RuleOp::Precedes { .. }
                | RuleOp::Not { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Regex,
    NotRegex,
}

/// Metavariable constraint. `regex` is `None` when the pattern failed to
/// compile; an inert constraint behaves as a test that never matches.
#[derive(Debug)]
pub struct Constraint {
    pub metavar: String,
    pub kind: ConstraintKind,
    pub pattern: String,
    pub regex: Option<Regex>,
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.metavar == other.metavar
            && self.kind == other.kind
            && self.pattern == other.pattern
            && self.regex.as_ref().map(Regex::as_str) == other.regex.as_ref().map(Regex::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformOp {
    Substring,
    Replace,
    Convert,
}

/// Decoded transform; carried through to consumers, never evaluated here.
#[derive(Debug, PartialEq)]
pub struct Transform {
    pub source: String,
    pub op: TransformOp,
    pub arg: String,
}

#[derive(Debug, PartialEq)]
pub struct Rule {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub lang: Lang,
    /// Index of the body node in `RuleSet::nodes`.
    pub root: u16,
    pub fix: Option<String>,
    /// `(start, len)` into `RuleSet::constraints`.
    pub constraints: (u16, u16),
    /// `(start, len)` into `RuleSet::transforms`.
    pub transforms: (u16, u16),
}

#[derive(Debug, PartialEq)]
pub struct RuleSet {
    pub version: u16,
    pub rules: Vec<Rule>,
    pub nodes: Vec<RuleOp>,
    pub children: Vec<u16>,
    pub constraints: Vec<Constraint>,
    pub transforms: Vec<Transform>,
}

impl RuleSet {
    pub fn rule_constraints(&self, rule: &Rule) -> &[Constraint] {
        let (start, len) = rule.constraints;
        &self.constraints[start as usize..(start + len) as usize]
    }

    pub fn rule_transforms(&self, rule: &Rule) -> &[Transform] {
        let (start, len) = rule.transforms;
        &self.transforms[start as usize..(start + len) as usize]
    }

    pub fn children_of(&self, range: ChildRange) -> &[u16] {
        &self.children[range.start as usize..(range.start + range.len) as usize]
    }

    /// Node indices reachable from `root` within this ruleset, including
    /// stop-by rule nodes, excluding `matches` indirection (those belong to
    /// the referenced rule).
    pub fn reachable_nodes(&self, root: u16) -> Vec<u16> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        let mut order = Vec::new();
        while let Some(index) = stack.pop() {
            let i = index as usize;
            if i >= self.nodes.len() || seen[i] {
                continue;
            }
            seen[i] = true;
            order.push(index);
            match &self.nodes[i] {
                RuleOp::All { children } | RuleOp::Any { children } => {
                    stack.extend_from_slice(self.children_of(*children));
                }
                RuleOp::Not { child } => stack.push(*child),
                RuleOp::Inside { child, stop_by }
                | RuleOp::Has { child, stop_by }
                | RuleOp::Follows { child, stop_by }
                | RuleOp::Precedes { child, stop_by } => {
                    stack.push(*child);
                    if let StopBy::Rule(node) = stop_by {
                        stack.push(*node);
                    }
                }
                RuleOp::Pattern { .. }
                | RuleOp::Kind(_)
                | RuleOp::Regex(_)
                | RuleOp::NthChild(_)
                | RuleOp::Matches { .. } => {}
            }
        }
        order
    }
}

/// Ruleset bytecode decode failure. Every malformation is typed; the
/// engine surfaces all of them as handle `0`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bytecode ended unexpectedly at offset {0}")]
    Truncated(usize),
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("expected opcode {expected:#04x}, found {found:#04x} at offset {offset}")]
    UnexpectedOpcode { expected: u8, found: u8, offset: usize },
    #[error("invalid {what} tag {value} at offset {offset}")]
    InvalidTag {
        what: &'static str,
        value: u8,
        offset: usize,
    },
    #[error("{0} capacity exceeded")]
    CapacityExceeded(&'static str),
    #[error("string is not valid UTF-8 at offset {0}")]
    InvalidUtf8(usize),
}
