//! Boundary serialization: the binary match-result wire format, findings
//! JSON, and node-info JSON, all written into fixed output buffers.

use serde::Serialize;
use tree_sitter::Node;

use crate::models::MatchList;
use crate::rules::Rule;

/// Fixed size of each host-visible output buffer.
pub const MAX_OUTPUT: usize = 64 * 1024;

/// Fixed-capacity output buffer. Overflow empties the buffer: the host
/// observes a zero-length result rather than a clipped one.
pub struct ResultBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl ResultBuffer {
    pub fn new() -> Self {
        ResultBuffer {
            bytes: vec![0u8; MAX_OUTPUT].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    fn write(&mut self, data: &[u8]) -> bool {
        if self.len + data.len() > MAX_OUTPUT {
            self.len = 0;
            return false;
        }
        self.bytes[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        true
    }

    fn write_u32(&mut self, value: u32) -> bool {
        self.write(&value.to_le_bytes())
    }
}

impl Default for ResultBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a match list as little-endian `u32`s:
///
/// ```text
/// count
/// per match: start_byte end_byte start_row start_col end_row end_col binding_count
/// per binding: name_len name_bytes text_len text_bytes
/// ```
///
/// Returns `false` (and an emptied buffer) on overflow.
pub fn write_match_list(list: &MatchList, buf: &mut ResultBuffer) -> bool {
    buf.clear();
    if !buf.write_u32(list.len() as u32) {
        return false;
    }
    for m in list.matches() {
        let ok = buf.write_u32(m.range.bytes.start)
            && buf.write_u32(m.range.bytes.end)
            && buf.write_u32(m.range.start_point.row)
            && buf.write_u32(m.range.start_point.column)
            && buf.write_u32(m.range.end_point.row)
            && buf.write_u32(m.range.end_point.column)
            && buf.write_u32(m.bindings.len() as u32);
        if !ok {
            return false;
        }
        for binding in m.bindings.iter() {
            let name = binding.name().as_bytes();
            let text = binding.text().as_bytes();
            let ok = buf.write_u32(name.len() as u32)
                && buf.write(name)
                && buf.write_u32(text.len() as u32)
                && buf.write(text);
            if !ok {
                return false;
            }
        }
    }
    true
}

/// Serialize any JSON value into the buffer; overflow empties it.
pub fn write_json<T: Serialize>(value: &T, buf: &mut ResultBuffer) -> bool {
    buf.clear();
    match serde_json::to_vec(value) {
        Ok(bytes) => buf.write(&bytes),
        Err(_) => false,
    }
}

/// Compact node description for the tree-walk API.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    pub kind: String,
    pub sb: u32,
    pub eb: u32,
    pub sr: u32,
    pub sc: u32,
    pub er: u32,
    pub ec: u32,
    pub named: bool,
    pub cc: u32,
    pub ncc: u32,
}

impl NodeInfo {
    pub fn of(node: &Node) -> NodeInfo {
        NodeInfo {
            kind: node.kind().to_string(),
            sb: node.start_byte() as u32,
            eb: node.end_byte() as u32,
            sr: node.start_position().row as u32,
            sc: node.start_position().column as u32,
            er: node.end_position().row as u32,
            ec: node.end_position().column as u32,
            named: node.is_named(),
            cc: node.child_count() as u32,
            ncc: node.named_child_count() as u32,
        }
    }
}

#[derive(Debug, Serialize)]
struct MatchJson {
    start_row: u32,
    start_col: u32,
    end_row: u32,
    end_col: u32,
    start_byte: u32,
    end_byte: u32,
    bindings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct FindingJson {
    #[serde(rename = "ruleId")]
    rule_id: String,
    severity: &'static str,
    message: String,
    matches: Vec<MatchJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fix: Option<String>,
}

/// Build the finding object for one rule's surviving matches.
pub fn finding_json(rule: &Rule, matches: &MatchList) -> FindingJson {
    let matches = matches
        .matches()
        .iter()
        .map(|m| {
            let mut bindings = serde_json::Map::new();
            for b in m.bindings.iter() {
                bindings.insert(
                    b.name().to_string(),
                    serde_json::Value::String(b.text().to_string()),
                );
            }
            MatchJson {
                start_row: m.range.start_point.row,
                start_col: m.range.start_point.column,
                end_row: m.range.end_point.row,
                end_col: m.range.end_point.column,
                start_byte: m.range.bytes.start,
                end_byte: m.range.bytes.end,
                bindings,
            }
        })
        .collect();
    FindingJson {
        rule_id: rule.id.clone(),
        severity: rule.severity.as_str(),
        message: rule.message.clone(),
        matches,
        fix: rule.fix.clone(),
    }
}
