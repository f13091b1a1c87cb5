//! Star document parsing and encoding.
//!
//! Wire shape (one JSON array, five blocks, fixed order):
//!
//! ```json
//! [
//!   {"version": 1, "schema": "analytic"},
//!   {"graph":       [{"attrs": [...]}, {"data": [...]}]},
//!   {"vertex":      [{"attrs": [...]}, {"data": [...]}]},
//!   {"transaction": [{"attrs": [...]}, {"data": [...]}]},
//!   {"meta": {}}
//! ]
//! ```
//!
//! Each `attrs` entry is `{"label", "type", "descr"?, "default"?}` and each
//! data record is a flat field→value object. Structural fields (`vx_id_`,
//! `tx_id_`, `vx_src_`, `vx_dst_`, `tx_dir_`) live alongside user attributes
//! in the records.

use asterism_core::{Result, StoreError};
use serde_json::{json, Map, Value};

/// One attribute-definition entry from an `attrs` list.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSpec {
    pub label: String,
    pub type_label: String,
    pub descr: Option<String>,
    /// Raw default as it appears in the document; coerced against the type
    /// registry when the definition is materialized.
    pub default: Option<Value>,
}

/// One of the three entity blocks: definitions followed by flat records.
#[derive(Debug, Clone, Default)]
pub struct EntityBlock {
    pub attrs: Vec<AttrSpec>,
    pub data: Vec<Map<String, Value>>,
}

/// A parsed star document.
#[derive(Debug, Clone)]
pub struct StarDocument {
    pub schema: Option<String>,
    pub graph: EntityBlock,
    pub vertex: EntityBlock,
    pub transaction: EntityBlock,
}

impl StarDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let blocks = value
            .as_array()
            .ok_or_else(|| StoreError::malformed("document is not an array"))?;
        if blocks.len() != 5 {
            return Err(StoreError::malformed(format!(
                "expected five blocks [version, graph, vertex, transaction, meta], found {}",
                blocks.len()
            )));
        }

        let version = blocks[0]
            .as_object()
            .ok_or_else(|| StoreError::malformed("version block is not an object"))?;
        let schema = version
            .get("schema")
            .and_then(Value::as_str)
            .map(str::to_string);

        // The meta block is carried by the format but has no stored
        // counterpart; its presence is all that is checked.
        if !blocks[4].is_object() {
            return Err(StoreError::malformed("meta block is not an object"));
        }

        Ok(StarDocument {
            schema,
            graph: parse_entity_block(&blocks[1], "graph")?,
            vertex: parse_entity_block(&blocks[2], "vertex")?,
            transaction: parse_entity_block(&blocks[3], "transaction")?,
        })
    }

    /// All type labels referenced by the three `attrs` lists, deduplicated
    /// in first-seen order.
    pub fn referenced_type_labels(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for block in [&self.graph, &self.vertex, &self.transaction] {
            for spec in &block.attrs {
                if !seen.contains(&spec.type_label) {
                    seen.push(spec.type_label.clone());
                }
            }
        }
        seen
    }
}

fn parse_entity_block(block: &Value, name: &str) -> Result<EntityBlock> {
    let parts = block
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::malformed(format!("{name} block missing '{name}' array")))?;
    if parts.len() < 2 {
        return Err(StoreError::malformed(format!(
            "{name} block needs an attrs part and a data part"
        )));
    }

    let raw_attrs = parts[0]
        .get("attrs")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::malformed(format!("{name} block has no 'attrs' list")))?;
    let mut attrs = Vec::with_capacity(raw_attrs.len());
    for entry in raw_attrs {
        let label = entry
            .get("label")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::malformed(format!("{name} attrs entry missing 'label'"))
            })?;
        let type_label = entry
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::malformed(format!("{name} attrs entry '{label}' missing 'type'"))
            })?;
        attrs.push(AttrSpec {
            label: label.to_string(),
            type_label: type_label.to_string(),
            descr: entry.get("descr").and_then(Value::as_str).map(str::to_string),
            default: entry.get("default").filter(|v| !v.is_null()).cloned(),
        });
    }

    let raw_data = parts[1]
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::malformed(format!("{name} block has no 'data' list")))?;
    let mut data = Vec::with_capacity(raw_data.len());
    for record in raw_data {
        let record = record.as_object().ok_or_else(|| {
            StoreError::malformed(format!("{name} data record is not an object"))
        })?;
        data.push(record.clone());
    }

    Ok(EntityBlock { attrs, data })
}

/// Rebuild a five-block star document from a graph projection, so that
/// export followed by import reproduces the same label→value pairs per
/// entity. The graph block is emitted empty: projections carry no
/// graph-level data records.
pub fn to_star_document(projection: &Value) -> Value {
    let mut version = Map::new();
    version.insert("version".to_string(), json!(1));
    if let Some(schema) = projection.get("schema").filter(|s| !s.is_null()) {
        version.insert("schema".to_string(), schema.clone());
    }
    json!([
        Value::Object(version),
        {"graph": [{"attrs": []}, {"data": []}]},
        {"vertex": projection.get("vertex").cloned().unwrap_or_else(|| json!([]))},
        {"transaction": projection.get("transaction").cloned().unwrap_or_else(|| json!([]))},
        {"meta": {}},
    ])
}
