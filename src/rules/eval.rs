//! Rule evaluation: compose the matcher and the set algebra per rule node.
//!
//! Every evaluator function writes into a caller-supplied `&mut MatchList`;
//! nothing returns a list by value (a list is far too large for constrained
//! stacks). Temporaries come from a pool of boxed lists owned by the
//! engine: a frame takes a list, recurses freely, and puts it back, so a
//! given nesting depth allocates once and then reuses.

use tracing::{debug, warn};

use crate::algebra;
use crate::matcher;
use crate::models::MatchList;
use crate::tree::ParsedTree;

use super::{ConstraintKind, Rule, RuleOp, RuleSet};

/// Recursion bound for rule evaluation; mutually recursive `matches`
/// references yield empty past it.
pub const MAX_EVAL_DEPTH: usize = 64;

/// Reusable boxed match lists for evaluator temporaries.
pub struct ScratchPool {
    free: Vec<Box<MatchList>>,
}

impl ScratchPool {
    /// Pre-warmed with three lists, the reference evaluator's scratch count.
    pub fn new() -> Self {
        ScratchPool {
            free: (0..3).map(|_| MatchList::boxed()).collect(),
        }
    }

    pub fn take(&mut self) -> Box<MatchList> {
        match self.free.pop() {
            Some(mut list) => {
                list.clear();
                list
            }
            None => MatchList::boxed(),
        }
    }

    pub fn put(&mut self, list: Box<MatchList>) {
        self.free.push(list);
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the compiled-pattern slot handles stashed in pattern nodes at
/// load time. Implemented by the engine's pattern slot table.
pub trait PatternStore {
    fn pattern(&self, handle: u32) -> Option<&ParsedTree>;
}

/// Everything one rule evaluation needs.
pub struct EvalCtx<'a> {
    pub rules: &'a RuleSet,
    pub source: &'a ParsedTree,
    pub patterns: &'a dyn PatternStore,
    pub scratch: &'a mut ScratchPool,
}

/// Evaluate a rule's body into `out` and apply its constraints.
pub fn eval_rule(ctx: &mut EvalCtx, rule_index: usize, out: &mut MatchList) {
    out.clear();
    let rules = ctx.rules;
    let Some(rule) = rules.rules.get(rule_index) else {
        return;
    };
    eval_node(ctx, rule.root, out, 0);
    apply_constraints(rules, rule, out);
    debug!(
        rule = %rule.id,
        matches = out.len(),
        "rule evaluated"
    );
}

/// Evaluate a single rule node into `out`.
pub fn eval_node(ctx: &mut EvalCtx, node: u16, out: &mut MatchList, depth: usize) {
    out.clear();
    if depth >= MAX_EVAL_DEPTH {
        return;
    }
    let rules = ctx.rules;
    let Some(op) = rules.nodes.get(node as usize) else {
        return;
    };
    match op {
        RuleOp::Pattern { slot, .. } => {
            if let Some(pattern) = ctx.patterns.pattern(*slot) {
                matcher::search(pattern, ctx.source, out);
            }
        }
        RuleOp::Kind(kind) => collect_kind(ctx.source, kind, out),
        RuleOp::Regex(source) => match regex::Regex::new(source) {
            Ok(re) => matcher::collect_by_regex(ctx.source, &re, out),
            Err(err) => {
                warn!("rule regex {:?} failed to compile: {}", source, err);
            }
        },
        RuleOp::NthChild(index) => matcher::collect_by_nth_child(ctx.source, *index, out),
        RuleOp::All { children } => {
            let kids = rules.children_of(*children);
            eval_all(ctx, kids, out, depth);
        }
        RuleOp::Any { children } => {
            let kids = rules.children_of(*children);
            let mut tmp = ctx.scratch.take();
            for &child in kids {
                eval_node(ctx, child, &mut tmp, depth + 1);
                algebra::union(out, &tmp);
            }
            ctx.scratch.put(tmp);
        }
        // Standalone `not` is meaningful only under `all`.
        RuleOp::Not { .. } => {}
        // Standalone relational operators pass their inner result through.
        RuleOp::Inside { child, .. }
        | RuleOp::Has { child, .. }
        | RuleOp::Follows { child, .. }
        | RuleOp::Precedes { child, .. } => {
            eval_node(ctx, *child, out, depth + 1);
        }
        RuleOp::Matches { rule } => {
            if let Some(target) = rules.rules.get(*rule as usize) {
                eval_node(ctx, target.root, out, depth + 1);
            }
        }
    }
}

/// Two-phase `all`: primary children intersect to seed the candidate set,
/// then relational children filter it in place.
fn eval_all(ctx: &mut EvalCtx, kids: &[u16], out: &mut MatchList, depth: usize) {
    let rules = ctx.rules;
    let mut seeded = false;
    let mut tmp = ctx.scratch.take();
    for &child in kids {
        if rules.nodes[child as usize].is_relational() {
            continue;
        }
        if !seeded {
            eval_node(ctx, child, out, depth + 1);
            seeded = true;
        } else {
            eval_node(ctx, child, &mut tmp, depth + 1);
            algebra::intersect(out, &tmp);
        }
    }
    if !seeded {
        // No producers: nothing to filter.
        out.clear();
        ctx.scratch.put(tmp);
        return;
    }
    for &child in kids {
        if !rules.nodes[child as usize].is_relational() {
            continue;
        }
        match &rules.nodes[child as usize] {
            RuleOp::Inside { child: inner, .. } => {
                eval_node(ctx, *inner, &mut tmp, depth + 1);
                algebra::inside(out, &tmp);
            }
            RuleOp::Has { child: inner, .. } => {
                eval_node(ctx, *inner, &mut tmp, depth + 1);
                algebra::has(out, &tmp);
            }
            RuleOp::Follows { child: inner, .. } => {
                eval_node(ctx, *inner, &mut tmp, depth + 1);
                algebra::follows(out, &tmp);
            }
            RuleOp::Precedes { child: inner, .. } => {
                eval_node(ctx, *inner, &mut tmp, depth + 1);
                algebra::precedes(out, &tmp);
            }
            RuleOp::Not { child: inner } => match &rules.nodes[*inner as usize] {
                RuleOp::Inside { child: innermost, .. } => {
                    eval_node(ctx, *innermost, &mut tmp, depth + 1);
                    algebra::not_inside(out, &tmp);
                }
                RuleOp::Has { child: innermost, .. } => {
                    eval_node(ctx, *innermost, &mut tmp, depth + 1);
                    algebra::not_has(out, &tmp);
                }
                RuleOp::Follows { child: innermost, .. } => {
                    eval_node(ctx, *innermost, &mut tmp, depth + 1);
                    algebra::not_follows(out, &tmp);
                }
                RuleOp::Precedes { child: innermost, .. } => {
                    eval_node(ctx, *innermost, &mut tmp, depth + 1);
                    algebra::not_precedes(out, &tmp);
                }
                _ => {
                    eval_node(ctx, *inner, &mut tmp, depth + 1);
                    algebra::exclude(out, &tmp);
                }
            },
            _ => {}
        }
    }
    ctx.scratch.put(tmp);
}

/// The named-child walk never reaches extras, so comment kinds dispatch to
/// the total-children collector.
pub fn collect_kind(source: &ParsedTree, kind: &str, out: &mut MatchList) {
    if kind == "comment" || kind == "html_comment" {
        matcher::collect_by_kind_all(source, kind, out);
    } else {
        matcher::collect_by_kind(source, kind, out);
    }
}

/// Drop matches whose bindings violate the rule's constraints. A
/// constraint on a name the match never bound does not reject it.
pub fn apply_constraints(rules: &RuleSet, rule: &Rule, out: &mut MatchList) {
    let constraints = rules.rule_constraints(rule);
    if constraints.is_empty() {
        return;
    }
    out.retain(|m| {
        m.bindings.iter().all(|binding| {
            constraints
                .iter()
                .filter(|c| c.metavar == binding.name())
                .all(|c| {
                    let matched = c
                        .regex
                        .as_ref()
                        .map(|re| re.is_match(binding.text()))
                        .unwrap_or(false);
                    match c.kind {
                        ConstraintKind::Regex => matched,
                        ConstraintKind::NotRegex => !matched,
                    }
                })
        })
    });
}
