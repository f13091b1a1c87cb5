//! Legacy star-shaped read model of a whole graph.
//!
//! The projection mirrors the exchange-document layout consumed by the
//! importer: per-family definition specs followed by the denormalized
//! entity caches, in insertion order.

use crate::records::{DefFamily, DefOwner};
use crate::{GraphStore, StoreInner};
use asterism_core::{coerce, Result, StoreError};
use serde_json::{json, Map, Value};

impl GraphStore {
    /// Project one graph into the star-shaped JSON read model:
    ///
    /// ```json
    /// {
    ///   "schema": "<label or null>",
    ///   "vertex": [{"attrs": [...], "key": ["Identifier", "Type"]},
    ///              {"data": [<cache>, ...]}],
    ///   "transaction": [ ... same shape ... ]
    /// }
    /// ```
    ///
    /// Each `attrs` entry carries `{label, type, descr, default}`; `default`
    /// is coerced through the type registry and omitted entirely when the
    /// definition has none.
    pub fn graph_projection(&self, graph_id: u64) -> Result<Value> {
        let inner = self.inner.read();
        let graph = inner
            .graphs
            .get(&graph_id)
            .ok_or_else(|| StoreError::not_found("graph", graph_id))?;

        let schema_label = graph
            .schema_id
            .and_then(|id| inner.schemas.get(&id))
            .map(|s| Value::String(s.label.clone()))
            .unwrap_or(Value::Null);

        let vertex_data: Vec<Value> = inner
            .vertices
            .values()
            .filter(|v| v.graph_id == graph_id)
            .map(|v| Value::Object(v.attributes.clone()))
            .collect();
        let transaction_data: Vec<Value> = inner
            .transactions
            .values()
            .filter(|t| t.graph_id == graph_id)
            .map(|t| Value::Object(t.attributes.clone()))
            .collect();

        Ok(json!({
            "schema": schema_label,
            "vertex": [
                {
                    "attrs": attr_specs(&inner, graph_id, DefFamily::Vertex),
                    "key": ["Identifier", "Type"],
                },
                {"data": vertex_data},
            ],
            "transaction": [
                {
                    "attrs": attr_specs(&inner, graph_id, DefFamily::Transaction),
                    "key": ["Identifier", "Type"],
                },
                {"data": transaction_data},
            ],
        }))
    }
}

fn attr_specs(inner: &StoreInner, graph_id: u64, family: DefFamily) -> Vec<Value> {
    inner
        .defs_for(DefOwner::Graph(graph_id), family)
        .map(|def| {
            let type_label = inner
                .types
                .get(&def.type_id)
                .map(|t| t.label.clone())
                .unwrap_or_default();
            let kind = inner.types.get(&def.type_id).map(|t| t.kind);
            let mut spec = Map::new();
            spec.insert("label".to_string(), Value::String(def.label.clone()));
            spec.insert("type".to_string(), Value::String(type_label));
            spec.insert(
                "descr".to_string(),
                def.descr
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
            if let (Some(kind), Some(default_str)) = (kind, &def.default_str) {
                spec.insert("default".to_string(), coerce(kind, default_str));
            }
            Value::Object(spec)
        })
        .collect()
}
