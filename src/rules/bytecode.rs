//! Single-pass decoder for the ruleset bytecode stream.
//!
//! Layout (all integers little-endian, byte-aligned):
//!
//! ```text
//! 0xFF RULESET <version:u16> <rule_count:u16> <rules>
//! 0x50 RULE <id> <severity:u8> <message> <lang:u8>
//!      <constraint_count:u16> <constraints> <transform_count:u16>
//!      <transforms> [0x20 FIX <fix>] <body-node>
//! ```
//!
//! Strings are `u16 length` + raw bytes. The stop-by byte after a
//! relational opcode is optional: anything other than 0x40/0x41/0x42 means
//! `neighbor` and the cursor rewinds one byte.

use tracing::warn;

use crate::language::Lang;

use super::{
    ChildRange, Constraint, ConstraintKind, DecodeError, Rule, RuleOp, RuleSet, Severity, StopBy,
    Transform, TransformOp, MAX_CHILDREN, MAX_CONSTRAINTS, MAX_RULES, MAX_RULE_NODES,
    MAX_TRANSFORMS,
};

pub const OP_PATTERN: u8 = 0x01;
pub const OP_KIND: u8 = 0x02;
pub const OP_REGEX: u8 = 0x03;
pub const OP_NTH_CHILD: u8 = 0x04;
pub const OP_ALL: u8 = 0x10;
pub const OP_ANY: u8 = 0x11;
pub const OP_NOT: u8 = 0x12;
pub const OP_INSIDE: u8 = 0x13;
pub const OP_HAS: u8 = 0x14;
pub const OP_FOLLOWS: u8 = 0x15;
pub const OP_PRECEDES: u8 = 0x16;
pub const OP_MATCHES: u8 = 0x17;
pub const OP_FIX: u8 = 0x20;
pub const OP_CONSTRAINT: u8 = 0x30;
pub const OP_TRANSFORM: u8 = 0x31;
pub const OP_STOPBY_END: u8 = 0x40;
pub const OP_STOPBY_NEIGHBOR: u8 = 0x41;
pub const OP_STOPBY_RULE: u8 = 0x42;
pub const OP_RULE: u8 = 0x50;
pub const OP_RULESET: u8 = 0xFF;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 2;
        Ok(u16::from_le_bytes([slice[0], slice[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 4;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let start = self.pos;
        let slice = self
            .bytes
            .get(start..start + len)
            .ok_or(DecodeError::Truncated(start))?;
        self.pos += len;
        std::str::from_utf8(slice)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8(start))
    }

    fn expect(&mut self, opcode: u8) -> Result<(), DecodeError> {
        let offset = self.pos;
        let found = self.u8()?;
        if found != opcode {
            return Err(DecodeError::UnexpectedOpcode {
                expected: opcode,
                found,
                offset,
            });
        }
        Ok(())
    }
}

/// Decode a complete ruleset stream. Fails on truncation, unknown opcodes,
/// capacity overflow, and invalid tags; never panics.
pub fn decode(bytes: &[u8]) -> Result<RuleSet, DecodeError> {
    let mut cur = Cursor::new(bytes);
    cur.expect(OP_RULESET)?;
    let version = cur.u16()?;
    let rule_count = cur.u16()? as usize;
    if rule_count > MAX_RULES {
        return Err(DecodeError::CapacityExceeded("rules"));
    }
    let mut rs = RuleSet {
        version,
        rules: Vec::with_capacity(rule_count),
        nodes: Vec::new(),
        children: Vec::new(),
        constraints: Vec::new(),
        transforms: Vec::new(),
    };
    for _ in 0..rule_count {
        let rule = decode_rule(&mut cur, &mut rs)?;
        rs.rules.push(rule);
    }
    Ok(rs)
}

fn decode_rule(cur: &mut Cursor, rs: &mut RuleSet) -> Result<Rule, DecodeError> {
    cur.expect(OP_RULE)?;
    let id = cur.string()?;
    let sev_offset = cur.pos;
    let sev_tag = cur.u8()?;
    let severity = Severity::from_tag(sev_tag).ok_or(DecodeError::InvalidTag {
        what: "severity",
        value: sev_tag,
        offset: sev_offset,
    })?;
    let message = cur.string()?;
    let lang_offset = cur.pos;
    let lang_tag = cur.u8()?;
    let lang = Lang::from_tag(lang_tag).ok_or(DecodeError::InvalidTag {
        what: "language",
        value: lang_tag,
        offset: lang_offset,
    })?;

    let constraint_count = cur.u16()? as usize;
    if rs.constraints.len() + constraint_count > MAX_CONSTRAINTS {
        return Err(DecodeError::CapacityExceeded("constraints"));
    }
    let constraints_start = rs.constraints.len() as u16;
    for _ in 0..constraint_count {
        let constraint = decode_constraint(cur)?;
        rs.constraints.push(constraint);
    }

    let transform_count = cur.u16()? as usize;
    if rs.transforms.len() + transform_count > MAX_TRANSFORMS {
        return Err(DecodeError::CapacityExceeded("transforms"));
    }
    let transforms_start = rs.transforms.len() as u16;
    for _ in 0..transform_count {
        let transform = decode_transform(cur)?;
        rs.transforms.push(transform);
    }

    let fix = if cur.peek() == Some(OP_FIX) {
        cur.u8()?;
        Some(cur.string()?)
    } else {
        None
    };

    let root = decode_node(cur, rs)?;
    Ok(Rule {
        id,
        severity,
        message,
        lang,
        root,
        fix,
        constraints: (constraints_start, constraint_count as u16),
        transforms: (transforms_start, transform_count as u16),
    })
}

fn decode_constraint(cur: &mut Cursor) -> Result<Constraint, DecodeError> {
    cur.expect(OP_CONSTRAINT)?;
    let metavar = cur.string()?;
    let kind_offset = cur.pos;
    let kind = match cur.u8()? {
        0 => ConstraintKind::Regex,
        1 => ConstraintKind::NotRegex,
        value => {
            return Err(DecodeError::InvalidTag {
                what: "constraint kind",
                value,
                offset: kind_offset,
            })
        }
    };
    let pattern = cur.string()?;
    let regex = match regex::Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            // Inert constraint: its test never matches.
            warn!("constraint regex {:?} failed to compile: {}", pattern, err);
            None
        }
    };
    Ok(Constraint {
        metavar,
        kind,
        pattern,
        regex,
    })
}

fn decode_transform(cur: &mut Cursor) -> Result<Transform, DecodeError> {
    cur.expect(OP_TRANSFORM)?;
    let source = cur.string()?;
    let op_offset = cur.pos;
    let op = match cur.u8()? {
        0 => TransformOp::Substring,
        1 => TransformOp::Replace,
        2 => TransformOp::Convert,
        value => {
            return Err(DecodeError::InvalidTag {
                what: "transform op",
                value,
                offset: op_offset,
            })
        }
    };
    let arg = cur.string()?;
    Ok(Transform { source, op, arg })
}

fn decode_stop_by(cur: &mut Cursor, rs: &mut RuleSet) -> Result<StopBy, DecodeError> {
    match cur.peek() {
        Some(OP_STOPBY_END) => {
            cur.u8()?;
            Ok(StopBy::End)
        }
        Some(OP_STOPBY_NEIGHBOR) => {
            cur.u8()?;
            Ok(StopBy::Neighbor)
        }
        Some(OP_STOPBY_RULE) => {
            cur.u8()?;
            let node = decode_node(cur, rs)?;
            Ok(StopBy::Rule(node))
        }
        // Any other byte belongs to the following node; default applies.
        _ => Ok(StopBy::Neighbor),
    }
}

fn push_node(rs: &mut RuleSet, op: RuleOp) -> Result<u16, DecodeError> {
    if rs.nodes.len() >= MAX_RULE_NODES {
        return Err(DecodeError::CapacityExceeded("rule nodes"));
    }
    rs.nodes.push(op);
    Ok((rs.nodes.len() - 1) as u16)
}

fn decode_node(cur: &mut Cursor, rs: &mut RuleSet) -> Result<u16, DecodeError> {
    let offset = cur.pos;
    let opcode = cur.u8()?;
    let op = match opcode {
        OP_PATTERN => RuleOp::Pattern {
            source: cur.string()?,
            slot: 0,
        },
        OP_KIND => RuleOp::Kind(cur.string()?),
        OP_REGEX => RuleOp::Regex(cur.string()?),
        OP_NTH_CHILD => RuleOp::NthChild(cur.u32()?),
        OP_ALL | OP_ANY => {
            let count = cur.u16()? as usize;
            // Children decode first so their indices exist; the runs land
            // contiguously in the shared pool afterwards.
            let mut indices = Vec::with_capacity(count);
            for _ in 0..count {
                indices.push(decode_node(cur, rs)?);
            }
            if rs.children.len() + count > MAX_CHILDREN {
                return Err(DecodeError::CapacityExceeded("child pool"));
            }
            let start = rs.children.len() as u16;
            rs.children.extend_from_slice(&indices);
            let children = ChildRange {
                start,
                len: count as u16,
            };
            if opcode == OP_ALL {
                RuleOp::All { children }
            } else {
                RuleOp::Any { children }
            }
        }
        OP_NOT => RuleOp::Not {
            child: decode_node(cur, rs)?,
        },
        OP_INSIDE | OP_HAS | OP_FOLLOWS | OP_PRECEDES => {
            let stop_by = decode_stop_by(cur, rs)?;
            let child = decode_node(cur, rs)?;
            match opcode {
                OP_INSIDE => RuleOp::Inside { child, stop_by },
                OP_HAS => RuleOp::Has { child, stop_by },
                OP_FOLLOWS => RuleOp::Follows { child, stop_by },
                _ => RuleOp::Precedes { child, stop_by },
            }
        }
        OP_MATCHES => RuleOp::Matches { rule: cur.u16()? },
        opcode => return Err(DecodeError::UnknownOpcode { opcode, offset }),
    };
    push_node(rs, op)
}
