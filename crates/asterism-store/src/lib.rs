//! Asterism graph store.
//!
//! A schema-driven property-graph store: attribute names, types,
//! descriptions and defaults are defined at runtime (per schema as
//! templates, per graph as live definitions) rather than at compile time.
//! Normalized attribute rows are kept in lockstep with a per-entity
//! denormalized JSON cache used for fast whole-graph reads.
//!
//! ```text
//! AttribType registry ──► AttributeDef (schema templates ──copy──► graph live)
//!                                         │
//!                    Graph ── Vertex ── Transaction
//!                      │        │           │
//!                 attribute rows (value_str) + denormalized caches
//! ```
//!
//! All tables live behind one `parking_lot::RwLock`; every mutating
//! operation commits under the write lock and emits its change events after
//! the lock is released, so notification delivery can never stall or roll
//! back a write.

pub mod notify;
pub mod persistence;
pub mod projection;
pub mod records;

#[cfg(test)]
mod tests;

use asterism_core::{coerce, stringify, AttribKind, Result, StoreError};
use notify::{ChangeEvent, ChangeNotifier, ChangeOp, EntityKind, Notify, NullNotifier};
use parking_lot::{Mutex, RwLock};
use records::{
    AttrCache, AttribType, AttributeDef, AttributeRow, DefFamily, DefOwner, GraphRecord,
    SchemaRecord, TransactionRecord, VertexRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// Reserved structural field names seeded into entity caches at creation and
// recognized by the bulk importer.
pub const FIELD_VX_ID: &str = "vx_id_";
pub const FIELD_TX_ID: &str = "tx_id_";
pub const FIELD_VX_SRC: &str = "vx_src_";
pub const FIELD_VX_DST: &str = "vx_dst_";
pub const FIELD_TX_DIR: &str = "tx_dir_";

/// Structural fields of a transaction record; everything else is a user
/// attribute.
pub const TRANSACTION_STRUCTURAL_FIELDS: [&str; 4] =
    [FIELD_TX_ID, FIELD_VX_SRC, FIELD_VX_DST, FIELD_TX_DIR];

// ============================================================================
// Tables
// ============================================================================

/// All stored tables. Row ids are issued from `next_row_id` and never
/// reused, so `BTreeMap` iteration doubles as insertion order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreInner {
    next_row_id: u64,
    types: BTreeMap<u64, AttribType>,
    schemas: BTreeMap<u64, SchemaRecord>,
    graphs: BTreeMap<u64, GraphRecord>,
    vertices: BTreeMap<u64, VertexRecord>,
    transactions: BTreeMap<u64, TransactionRecord>,
    defs: BTreeMap<u64, AttributeDef>,
    graph_attrs: BTreeMap<u64, AttributeRow>,
    vertex_attrs: BTreeMap<u64, AttributeRow>,
    transaction_attrs: BTreeMap<u64, AttributeRow>,
}

impl StoreInner {
    fn alloc_row_id(&mut self) -> u64 {
        self.next_row_id += 1;
        self.next_row_id
    }

    fn attr_table(&self, family: DefFamily) -> &BTreeMap<u64, AttributeRow> {
        match family {
            DefFamily::Graph => &self.graph_attrs,
            DefFamily::Vertex => &self.vertex_attrs,
            DefFamily::Transaction => &self.transaction_attrs,
        }
    }

    fn attr_table_mut(&mut self, family: DefFamily) -> &mut BTreeMap<u64, AttributeRow> {
        match family {
            DefFamily::Graph => &mut self.graph_attrs,
            DefFamily::Vertex => &mut self.vertex_attrs,
            DefFamily::Transaction => &mut self.transaction_attrs,
        }
    }

    fn cache_mut(&mut self, family: DefFamily, owner_id: u64) -> Option<&mut AttrCache> {
        match family {
            DefFamily::Graph => self.graphs.get_mut(&owner_id).map(|g| &mut g.attributes),
            DefFamily::Vertex => self.vertices.get_mut(&owner_id).map(|v| &mut v.attributes),
            DefFamily::Transaction => self
                .transactions
                .get_mut(&owner_id)
                .map(|t| &mut t.attributes),
        }
    }

    /// Graph a given entity row belongs to, per family.
    fn owner_graph(&self, family: DefFamily, owner_id: u64) -> Option<u64> {
        match family {
            DefFamily::Graph => self.graphs.contains_key(&owner_id).then_some(owner_id),
            DefFamily::Vertex => self.vertices.get(&owner_id).map(|v| v.graph_id),
            DefFamily::Transaction => self.transactions.get(&owner_id).map(|t| t.graph_id),
        }
    }

    fn type_by_label(&self, label: &str) -> Option<&AttribType> {
        self.types.values().find(|t| t.label == label)
    }

    fn graph_by_title(&self, title: &str) -> Option<&GraphRecord> {
        self.graphs.values().find(|g| g.title == title)
    }

    fn defs_for(&self, owner: DefOwner, family: DefFamily) -> impl Iterator<Item = &AttributeDef> {
        self.defs
            .values()
            .filter(move |d| d.owner == owner && d.family == family)
    }

    fn def_by_label(&self, owner: DefOwner, family: DefFamily, label: &str) -> Option<&AttributeDef> {
        self.defs_for(owner, family).find(|d| d.label == label)
    }

    fn vertex_by_local(&self, graph_id: u64, vx_id: i64) -> Option<&VertexRecord> {
        self.vertices
            .values()
            .find(|v| v.graph_id == graph_id && v.vx_id == vx_id)
    }

    fn transaction_by_local(&self, graph_id: u64, tx_id: i64) -> Option<&TransactionRecord> {
        self.transactions
            .values()
            .find(|t| t.graph_id == graph_id && t.tx_id == tx_id)
    }

    fn row_for(&self, family: DefFamily, owner_id: u64, def_id: u64) -> Option<&AttributeRow> {
        self.attr_table(family)
            .values()
            .find(|r| r.owner_id == owner_id && r.def_id == def_id)
    }

    // ------------------------------------------------------------------
    // Synchronizer core: keep the attribute row and the owner's cache in
    // lockstep. All writes of attribute values funnel through here.
    // ------------------------------------------------------------------

    /// Upsert one attribute row and mirror it into the owner's cache.
    /// Returns the row id and whether it was newly created.
    fn upsert_attr(
        &mut self,
        family: DefFamily,
        owner_id: u64,
        def_id: u64,
        value: &Value,
    ) -> Result<(u64, bool)> {
        let def = self
            .defs
            .get(&def_id)
            .ok_or_else(|| StoreError::not_found(family_def_kind(family), def_id))?;
        debug_assert_eq!(def.family, family);
        let label = def.label.clone();
        let kind = self
            .types
            .get(&def.type_id)
            .map(|t| t.kind)
            .ok_or_else(|| StoreError::not_found("attrib type", def.type_id))?;

        let value_str = stringify(kind, value);
        let typed = coerce(kind, &value_str);

        let existing = self.row_for(family, owner_id, def_id).map(|r| r.id);

        let (row_id, created) = match existing {
            Some(id) => {
                let row = self
                    .attr_table_mut(family)
                    .get_mut(&id)
                    .expect("row id just looked up");
                row.value_str = value_str;
                (id, false)
            }
            None => {
                let id = self.alloc_row_id();
                self.attr_table_mut(family).insert(
                    id,
                    AttributeRow {
                        id,
                        owner_id,
                        def_id,
                        value_str,
                    },
                );
                (id, true)
            }
        };

        let cache = self
            .cache_mut(family, owner_id)
            .ok_or_else(|| StoreError::not_found(family.name(), owner_id))?;
        cache.insert(label, typed);
        Ok((row_id, created))
    }

    /// Remove one attribute row and drop the matching cache key. A cache key
    /// that is already absent (pre-existing desync) is left alone.
    fn remove_attr(&mut self, family: DefFamily, row_id: u64) -> Result<()> {
        let row = self
            .attr_table_mut(family)
            .remove(&row_id)
            .ok_or_else(|| StoreError::not_found(family_row_kind(family), row_id))?;
        let label = self
            .defs
            .get(&row.def_id)
            .map(|d| d.label.clone());
        if let (Some(label), Some(cache)) = (label, self.cache_mut(family, row.owner_id)) {
            cache.remove(&label);
        }
        Ok(())
    }

    /// Materialize one attribute row per definition with a non-null default.
    fn apply_defaults(&mut self, family: DefFamily, graph_id: u64, owner_id: u64) -> Result<()> {
        let defaults: Vec<(u64, String)> = self
            .defs_for(DefOwner::Graph(graph_id), family)
            .filter_map(|d| d.default_str.clone().map(|s| (d.id, s)))
            .collect();
        for (def_id, default_str) in defaults {
            self.upsert_attr(family, owner_id, def_id, &Value::String(default_str))?;
        }
        Ok(())
    }

    /// Cascade-delete everything a graph owns. The graph record itself is
    /// removed last.
    fn drop_graph(&mut self, graph_id: u64) {
        let vertex_ids: HashSet<u64> = self
            .vertices
            .values()
            .filter(|v| v.graph_id == graph_id)
            .map(|v| v.id)
            .collect();
        let transaction_ids: HashSet<u64> = self
            .transactions
            .values()
            .filter(|t| t.graph_id == graph_id)
            .map(|t| t.id)
            .collect();
        self.vertex_attrs
            .retain(|_, r| !vertex_ids.contains(&r.owner_id));
        self.transaction_attrs
            .retain(|_, r| !transaction_ids.contains(&r.owner_id));
        self.graph_attrs.retain(|_, r| r.owner_id != graph_id);
        self.vertices.retain(|_, v| v.graph_id != graph_id);
        self.transactions.retain(|_, t| t.graph_id != graph_id);
        self.defs.retain(|_, d| d.owner != DefOwner::Graph(graph_id));
        self.graphs.remove(&graph_id);
    }
}

fn family_def_kind(family: DefFamily) -> &'static str {
    match family {
        DefFamily::Graph => "graph attribute definition",
        DefFamily::Vertex => "vertex attribute definition",
        DefFamily::Transaction => "transaction attribute definition",
    }
}

fn family_row_kind(family: DefFamily) -> &'static str {
    match family {
        DefFamily::Graph => "graph attribute",
        DefFamily::Vertex => "vertex attribute",
        DefFamily::Transaction => "transaction attribute",
    }
}

fn family_attr_entity(family: DefFamily) -> EntityKind {
    match family {
        DefFamily::Graph => EntityKind::GraphAttribute,
        DefFamily::Vertex => EntityKind::VertexAttribute,
        DefFamily::Transaction => EntityKind::TransactionAttribute,
    }
}

// ============================================================================
// Store
// ============================================================================

/// The graph store. Cheap to share (`Arc<GraphStore>`); all methods take
/// `&self`.
pub struct GraphStore {
    inner: RwLock<StoreInner>,
    notifier: Arc<dyn ChangeNotifier>,
    /// Graphs currently held by a bulk-import guard; direct writes to these
    /// fail with `GraphBusy` until the guard drops.
    bulk_locked: Mutex<HashSet<u64>>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(NullNotifier))
    }

    pub fn with_notifier(notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                next_row_id: 0,
                ..Default::default()
            }),
            notifier,
            bulk_locked: Mutex::new(HashSet::new()),
        }
    }

    fn emit(&self, mode: Notify, events: Vec<ChangeEvent>) {
        if mode == Notify::Suppress {
            return;
        }
        for event in &events {
            self.notifier.notify(event);
        }
    }

    fn ensure_writable(&self, graph_id: u64) -> Result<()> {
        if self.bulk_locked.lock().contains(&graph_id) {
            return Err(StoreError::GraphBusy { graph_id });
        }
        Ok(())
    }

    // ========================================================================
    // Type registry
    // ========================================================================

    pub fn create_attrib_type(&self, label: &str, kind: AttribKind) -> Result<AttribType> {
        let record = {
            let mut inner = self.inner.write();
            if inner.type_by_label(label).is_some() {
                return Err(StoreError::DuplicateDefinition {
                    what: "attrib type",
                    label: label.to_string(),
                    owner: "registry".to_string(),
                });
            }
            let id = inner.alloc_row_id();
            let record = AttribType {
                id,
                label: label.to_string(),
                kind,
            };
            inner.types.insert(id, record.clone());
            record
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::AttribType,
                op: ChangeOp::Created,
                graph_id: None,
                id: record.id,
                attribute_id: None,
            }],
        );
        Ok(record)
    }

    pub fn attrib_types(&self) -> Vec<AttribType> {
        self.inner.read().types.values().cloned().collect()
    }

    pub fn attrib_type(&self, label: &str) -> Result<AttribType> {
        self.inner
            .read()
            .type_by_label(label)
            .cloned()
            .ok_or_else(|| StoreError::not_found("attrib type", label))
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    pub fn create_schema(&self, label: &str) -> Result<SchemaRecord> {
        let record = {
            let mut inner = self.inner.write();
            if inner.schemas.values().any(|s| s.label == label) {
                return Err(StoreError::DuplicateDefinition {
                    what: "schema",
                    label: label.to_string(),
                    owner: "store".to_string(),
                });
            }
            let id = inner.alloc_row_id();
            let record = SchemaRecord {
                id,
                label: label.to_string(),
            };
            inner.schemas.insert(id, record.clone());
            record
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Schema,
                op: ChangeOp::Created,
                graph_id: None,
                id: record.id,
                attribute_id: None,
            }],
        );
        Ok(record)
    }

    pub fn find_or_create_schema(&self, label: &str) -> Result<SchemaRecord> {
        if let Some(existing) = self
            .inner
            .read()
            .schemas
            .values()
            .find(|s| s.label == label)
        {
            return Ok(existing.clone());
        }
        self.create_schema(label)
    }

    pub fn schemas(&self) -> Vec<SchemaRecord> {
        self.inner.read().schemas.values().cloned().collect()
    }

    pub fn schema_by_label(&self, label: &str) -> Result<SchemaRecord> {
        self.inner
            .read()
            .schemas
            .values()
            .find(|s| s.label == label)
            .cloned()
            .ok_or_else(|| StoreError::not_found("schema", label))
    }

    /// Delete a schema and its definition templates. Graphs created from the
    /// schema keep their own (copied) definitions and are not touched.
    pub fn delete_schema(&self, schema_id: u64) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.schemas.remove(&schema_id).is_none() {
                return Err(StoreError::not_found("schema", schema_id));
            }
            inner.defs.retain(|_, d| d.owner != DefOwner::Schema(schema_id));
            for graph in inner.graphs.values_mut() {
                if graph.schema_id == Some(schema_id) {
                    graph.schema_id = None;
                }
            }
        }
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Schema,
                op: ChangeOp::Deleted,
                graph_id: None,
                id: schema_id,
                attribute_id: None,
            }],
        );
        Ok(())
    }

    // ========================================================================
    // Attribute definitions
    // ========================================================================

    /// Create an attribute definition owned by a schema (template) or a
    /// graph (live). The referenced type label must already be registered.
    pub fn define_attribute(
        &self,
        owner: DefOwner,
        family: DefFamily,
        label: &str,
        type_label: &str,
        descr: Option<&str>,
        default_str: Option<&str>,
    ) -> Result<AttributeDef> {
        let mut inner = self.inner.write();
        let type_id = inner
            .type_by_label(type_label)
            .map(|t| t.id)
            .ok_or_else(|| StoreError::UnknownTypes {
                labels: vec![type_label.to_string()],
            })?;
        let owner_desc = match owner {
            DefOwner::Schema(id) => {
                if !inner.schemas.contains_key(&id) {
                    return Err(StoreError::not_found("schema", id));
                }
                format!("schema {id}")
            }
            DefOwner::Graph(id) => {
                if !inner.graphs.contains_key(&id) {
                    return Err(StoreError::not_found("graph", id));
                }
                format!("graph {id}")
            }
        };
        if inner.def_by_label(owner, family, label).is_some() {
            return Err(StoreError::DuplicateDefinition {
                what: family_def_kind(family),
                label: label.to_string(),
                owner: owner_desc,
            });
        }
        let id = inner.alloc_row_id();
        let def = AttributeDef {
            id,
            owner,
            family,
            label: label.to_string(),
            type_id,
            descr: descr.map(str::to_string),
            default_str: default_str.map(str::to_string),
        };
        inner.defs.insert(id, def.clone());
        Ok(def)
    }

    pub fn definitions(&self, owner: DefOwner, family: DefFamily) -> Vec<AttributeDef> {
        self.inner.read().defs_for(owner, family).cloned().collect()
    }

    pub fn definition(&self, def_id: u64) -> Result<AttributeDef> {
        self.inner
            .read()
            .defs
            .get(&def_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("attribute definition", def_id))
    }

    /// Replace a definition's description and default outright. Existing
    /// attribute rows keep their `value_str`; only entities created after
    /// this call pick up a changed default.
    pub fn update_definition(
        &self,
        def_id: u64,
        descr: Option<&str>,
        default_str: Option<&str>,
    ) -> Result<AttributeDef> {
        let mut inner = self.inner.write();
        let def = inner
            .defs
            .get_mut(&def_id)
            .ok_or_else(|| StoreError::not_found("attribute definition", def_id))?;
        def.descr = descr.map(str::to_string);
        def.default_str = default_str.map(str::to_string);
        Ok(def.clone())
    }

    /// Delete a definition. Graph-scoped deletion cascades: every attribute
    /// row referencing it is removed and each affected cache drops the label.
    pub fn delete_definition(&self, def_id: u64) -> Result<()> {
        let events = {
            let mut inner = self.inner.write();
            let def = inner
                .defs
                .remove(&def_id)
                .ok_or_else(|| StoreError::not_found("attribute definition", def_id))?;
            let mut events = Vec::new();
            if let DefOwner::Graph(graph_id) = def.owner {
                let rows: Vec<u64> = inner
                    .attr_table(def.family)
                    .values()
                    .filter(|r| r.def_id == def_id)
                    .map(|r| r.id)
                    .collect();
                for row_id in rows {
                    let row = inner
                        .attr_table_mut(def.family)
                        .remove(&row_id)
                        .expect("row id just collected");
                    if let Some(cache) = inner.cache_mut(def.family, row.owner_id) {
                        cache.remove(&def.label);
                    }
                    events.push(ChangeEvent {
                        entity: family_attr_entity(def.family),
                        op: ChangeOp::Deleted,
                        graph_id: Some(graph_id),
                        id: row.owner_id,
                        attribute_id: Some(row_id),
                    });
                }
            }
            events
        };
        self.emit(Notify::Deliver, events);
        Ok(())
    }

    /// Copy every template definition of `schema_id` into a live definition
    /// owned by `graph_id`. Idempotent: labels already defined on the graph
    /// (per family) are skipped, never duplicated.
    pub fn instantiate_graph_from_schema(&self, schema_id: u64, graph_id: u64) -> Result<usize> {
        let mut inner = self.inner.write();
        if !inner.schemas.contains_key(&schema_id) {
            return Err(StoreError::not_found("schema", schema_id));
        }
        if !inner.graphs.contains_key(&graph_id) {
            return Err(StoreError::not_found("graph", graph_id));
        }
        let mut copied = 0;
        for family in DefFamily::ALL {
            let templates: Vec<AttributeDef> = inner
                .defs_for(DefOwner::Schema(schema_id), family)
                .cloned()
                .collect();
            for template in templates {
                if inner
                    .def_by_label(DefOwner::Graph(graph_id), family, &template.label)
                    .is_some()
                {
                    continue;
                }
                let id = inner.alloc_row_id();
                inner.defs.insert(
                    id,
                    AttributeDef {
                        id,
                        owner: DefOwner::Graph(graph_id),
                        ..template
                    },
                );
                copied += 1;
            }
        }
        Ok(copied)
    }

    // ========================================================================
    // Graphs
    // ========================================================================

    /// Create a graph, optionally bound to a schema. Template definitions
    /// are copied in and graph-level defaults materialized; the whole
    /// operation emits one CREATED event.
    pub fn create_graph(&self, title: &str, schema_id: Option<u64>) -> Result<GraphRecord> {
        let record = self.create_graph_inner(title, schema_id)?;
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Graph,
                op: ChangeOp::Created,
                graph_id: Some(record.id),
                id: record.id,
                attribute_id: None,
            }],
        );
        Ok(record)
    }

    fn create_graph_inner(&self, title: &str, schema_id: Option<u64>) -> Result<GraphRecord> {
        let graph_id = {
            let mut inner = self.inner.write();
            if inner.graph_by_title(title).is_some() {
                return Err(StoreError::DuplicateDefinition {
                    what: "graph",
                    label: title.to_string(),
                    owner: "store".to_string(),
                });
            }
            if let Some(schema_id) = schema_id {
                if !inner.schemas.contains_key(&schema_id) {
                    return Err(StoreError::not_found("schema", schema_id));
                }
            }
            let id = inner.alloc_row_id();
            inner.graphs.insert(
                id,
                GraphRecord {
                    id,
                    title: title.to_string(),
                    schema_id,
                    attributes: AttrCache::new(),
                    next_vertex_id: 1,
                    next_transaction_id: 1,
                },
            );
            id
        };
        if let Some(schema_id) = schema_id {
            self.instantiate_graph_from_schema(schema_id, graph_id)?;
        }
        {
            let mut inner = self.inner.write();
            inner.apply_defaults(DefFamily::Graph, graph_id, graph_id)?;
        }
        tracing::debug!(graph_id, title, "graph created");
        self.graph(graph_id)
    }

    pub fn graph(&self, graph_id: u64) -> Result<GraphRecord> {
        self.inner
            .read()
            .graphs
            .get(&graph_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("graph", graph_id))
    }

    pub fn graph_by_title(&self, title: &str) -> Result<GraphRecord> {
        self.inner
            .read()
            .graph_by_title(title)
            .cloned()
            .ok_or_else(|| StoreError::not_found("graph", title))
    }

    pub fn graphs(&self) -> Vec<GraphRecord> {
        self.inner.read().graphs.values().cloned().collect()
    }

    /// Delete a graph and everything it owns (vertices, transactions,
    /// attribute rows, live definitions).
    pub fn delete_graph(&self, graph_id: u64) -> Result<()> {
        self.ensure_writable(graph_id)?;
        {
            let mut inner = self.inner.write();
            if !inner.graphs.contains_key(&graph_id) {
                return Err(StoreError::not_found("graph", graph_id));
            }
            inner.drop_graph(graph_id);
        }
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Graph,
                op: ChangeOp::Deleted,
                graph_id: Some(graph_id),
                id: graph_id,
                attribute_id: None,
            }],
        );
        Ok(())
    }

    // ========================================================================
    // Vertices and transactions
    // ========================================================================

    /// Create a vertex: allocates the next graph-local `vx_id` (atomic
    /// read-return-increment under the write lock), seeds the cache with the
    /// structural field and materializes default vertex attributes. One
    /// CREATED event for the whole operation.
    pub fn create_vertex(&self, graph_id: u64) -> Result<VertexRecord> {
        self.ensure_writable(graph_id)?;
        let record = {
            let mut inner = self.inner.write();
            let graph = inner
                .graphs
                .get_mut(&graph_id)
                .ok_or_else(|| StoreError::not_found("graph", graph_id))?;
            let vx_id = graph.next_vertex_id;
            graph.next_vertex_id += 1;
            let id = inner.alloc_row_id();
            let mut attributes = AttrCache::new();
            attributes.insert(FIELD_VX_ID.to_string(), Value::from(vx_id));
            inner.vertices.insert(
                id,
                VertexRecord {
                    id,
                    graph_id,
                    vx_id,
                    attributes,
                },
            );
            inner.apply_defaults(DefFamily::Vertex, graph_id, id)?;
            inner.vertices.get(&id).cloned().expect("vertex just inserted")
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Vertex,
                op: ChangeOp::Created,
                graph_id: Some(graph_id),
                id: record.id,
                attribute_id: None,
            }],
        );
        Ok(record)
    }

    pub fn vertex(&self, graph_id: u64, vx_id: i64) -> Result<VertexRecord> {
        self.inner
            .read()
            .vertex_by_local(graph_id, vx_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("vertex", format!("{graph_id}/{vx_id}")))
    }

    pub fn vertices(&self, graph_id: u64) -> Vec<VertexRecord> {
        self.inner
            .read()
            .vertices
            .values()
            .filter(|v| v.graph_id == graph_id)
            .cloned()
            .collect()
    }

    /// Delete a vertex, its attribute rows, and every transaction that uses
    /// it as an endpoint (with their rows). Emits one DELETED event for the
    /// vertex plus one per cascaded transaction.
    pub fn delete_vertex(&self, graph_id: u64, vx_id: i64) -> Result<()> {
        self.ensure_writable(graph_id)?;
        let events = {
            let mut inner = self.inner.write();
            let vertex_id = inner
                .vertex_by_local(graph_id, vx_id)
                .map(|v| v.id)
                .ok_or_else(|| StoreError::not_found("vertex", format!("{graph_id}/{vx_id}")))?;
            let cascaded: Vec<u64> = inner
                .transactions
                .values()
                .filter(|t| t.source_id == vertex_id || t.dest_id == vertex_id)
                .map(|t| t.id)
                .collect();
            inner
                .transaction_attrs
                .retain(|_, r| !cascaded.contains(&r.owner_id));
            inner.transactions.retain(|_, t| !cascaded.contains(&t.id));
            inner.vertex_attrs.retain(|_, r| r.owner_id != vertex_id);
            inner.vertices.remove(&vertex_id);

            let mut events = vec![ChangeEvent {
                entity: EntityKind::Vertex,
                op: ChangeOp::Deleted,
                graph_id: Some(graph_id),
                id: vertex_id,
                attribute_id: None,
            }];
            events.extend(cascaded.into_iter().map(|id| ChangeEvent {
                entity: EntityKind::Transaction,
                op: ChangeOp::Deleted,
                graph_id: Some(graph_id),
                id,
                attribute_id: None,
            }));
            events
        };
        self.emit(Notify::Deliver, events);
        Ok(())
    }

    /// Create a transaction between two vertices identified by their
    /// graph-local ids. Allocates `tx_id`, seeds the structural cache fields
    /// and materializes default transaction attributes.
    pub fn create_transaction(
        &self,
        graph_id: u64,
        src_vx_id: i64,
        dst_vx_id: i64,
        directed: bool,
    ) -> Result<TransactionRecord> {
        self.ensure_writable(graph_id)?;
        let record = {
            let mut inner = self.inner.write();
            let source_id = inner
                .vertex_by_local(graph_id, src_vx_id)
                .map(|v| v.id)
                .ok_or_else(|| {
                    StoreError::not_found("vertex", format!("{graph_id}/{src_vx_id}"))
                })?;
            let dest_id = inner
                .vertex_by_local(graph_id, dst_vx_id)
                .map(|v| v.id)
                .ok_or_else(|| {
                    StoreError::not_found("vertex", format!("{graph_id}/{dst_vx_id}"))
                })?;
            let graph = inner
                .graphs
                .get_mut(&graph_id)
                .ok_or_else(|| StoreError::not_found("graph", graph_id))?;
            let tx_id = graph.next_transaction_id;
            graph.next_transaction_id += 1;
            let id = inner.alloc_row_id();
            let mut attributes = AttrCache::new();
            attributes.insert(FIELD_TX_ID.to_string(), Value::from(tx_id));
            attributes.insert(FIELD_VX_SRC.to_string(), Value::from(src_vx_id));
            attributes.insert(FIELD_VX_DST.to_string(), Value::from(dst_vx_id));
            attributes.insert(FIELD_TX_DIR.to_string(), Value::Bool(directed));
            inner.transactions.insert(
                id,
                TransactionRecord {
                    id,
                    graph_id,
                    tx_id,
                    source_id,
                    dest_id,
                    directed,
                    attributes,
                },
            );
            inner.apply_defaults(DefFamily::Transaction, graph_id, id)?;
            inner
                .transactions
                .get(&id)
                .cloned()
                .expect("transaction just inserted")
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Transaction,
                op: ChangeOp::Created,
                graph_id: Some(graph_id),
                id: record.id,
                attribute_id: None,
            }],
        );
        Ok(record)
    }

    pub fn transaction(&self, graph_id: u64, tx_id: i64) -> Result<TransactionRecord> {
        self.inner
            .read()
            .transaction_by_local(graph_id, tx_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transaction", format!("{graph_id}/{tx_id}")))
    }

    pub fn transactions(&self, graph_id: u64) -> Vec<TransactionRecord> {
        self.inner
            .read()
            .transactions
            .values()
            .filter(|t| t.graph_id == graph_id)
            .cloned()
            .collect()
    }

    pub fn delete_transaction(&self, graph_id: u64, tx_id: i64) -> Result<()> {
        self.ensure_writable(graph_id)?;
        let transaction_id = {
            let mut inner = self.inner.write();
            let transaction_id = inner
                .transaction_by_local(graph_id, tx_id)
                .map(|t| t.id)
                .ok_or_else(|| {
                    StoreError::not_found("transaction", format!("{graph_id}/{tx_id}"))
                })?;
            inner
                .transaction_attrs
                .retain(|_, r| r.owner_id != transaction_id);
            inner.transactions.remove(&transaction_id);
            transaction_id
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Transaction,
                op: ChangeOp::Deleted,
                graph_id: Some(graph_id),
                id: transaction_id,
                attribute_id: None,
            }],
        );
        Ok(())
    }

    // ========================================================================
    // Attribute synchronizer (public edit surface)
    // ========================================================================

    /// Set an attribute by definition id, validating that the definition
    /// belongs to the owning entity's graph (`DefinitionMismatch` otherwise).
    pub fn set_attribute_by_def(
        &self,
        family: DefFamily,
        owner_id: u64,
        def_id: u64,
        value: &Value,
    ) -> Result<AttributeRow> {
        let (graph_id, row_id, created) = {
            let mut inner = self.inner.write();
            let graph_id = inner
                .owner_graph(family, owner_id)
                .ok_or_else(|| StoreError::not_found(family.name(), owner_id))?;
            if self.bulk_locked.lock().contains(&graph_id) {
                return Err(StoreError::GraphBusy { graph_id });
            }
            let def = inner
                .defs
                .get(&def_id)
                .ok_or_else(|| StoreError::not_found(family_def_kind(family), def_id))?;
            if def.owner != DefOwner::Graph(graph_id) || def.family != family {
                return Err(StoreError::DefinitionMismatch {
                    definition_id: def_id,
                    graph_id,
                });
            }
            let (row_id, created) = inner.upsert_attr(family, owner_id, def_id, value)?;
            (graph_id, row_id, created)
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: family_attr_entity(family),
                op: if created {
                    ChangeOp::Created
                } else {
                    ChangeOp::Updated
                },
                graph_id: Some(graph_id),
                id: owner_id,
                attribute_id: Some(row_id),
            }],
        );
        self.attribute_row(family, row_id)
    }

    /// Set a graph attribute by label.
    pub fn set_graph_attribute(&self, graph_id: u64, label: &str, value: &Value) -> Result<AttributeRow> {
        let def_id = self.resolve_def(graph_id, DefFamily::Graph, label)?;
        self.set_attribute_by_def(DefFamily::Graph, graph_id, def_id, value)
    }

    /// Set a vertex attribute by graph-local vertex id and label.
    /// Distinguishes "vertex not found" from "no such definition label".
    pub fn set_vertex_attribute(
        &self,
        graph_id: u64,
        vx_id: i64,
        label: &str,
        value: &Value,
    ) -> Result<AttributeRow> {
        let owner_id = self.vertex(graph_id, vx_id)?.id;
        let def_id = self.resolve_def(graph_id, DefFamily::Vertex, label)?;
        self.set_attribute_by_def(DefFamily::Vertex, owner_id, def_id, value)
    }

    /// Set a transaction attribute by graph-local transaction id and label.
    pub fn set_transaction_attribute(
        &self,
        graph_id: u64,
        tx_id: i64,
        label: &str,
        value: &Value,
    ) -> Result<AttributeRow> {
        let owner_id = self.transaction(graph_id, tx_id)?.id;
        let def_id = self.resolve_def(graph_id, DefFamily::Transaction, label)?;
        self.set_attribute_by_def(DefFamily::Transaction, owner_id, def_id, value)
    }

    fn resolve_def(&self, graph_id: u64, family: DefFamily, label: &str) -> Result<u64> {
        self.inner
            .read()
            .def_by_label(DefOwner::Graph(graph_id), family, label)
            .map(|d| d.id)
            .ok_or_else(|| StoreError::not_found(family_def_kind(family), label))
    }

    pub fn attribute_row(&self, family: DefFamily, row_id: u64) -> Result<AttributeRow> {
        self.inner
            .read()
            .attr_table(family)
            .get(&row_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(family_row_kind(family), row_id))
    }

    pub fn attribute_rows(&self, family: DefFamily, owner_id: u64) -> Vec<AttributeRow> {
        self.inner
            .read()
            .attr_table(family)
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Delete one attribute row and drop the matching cache key. A label
    /// already absent from the cache is tolerated (the cache was desynced;
    /// removal of a missing key is a no-op, not an error).
    pub fn delete_attribute_row(&self, family: DefFamily, row_id: u64) -> Result<()> {
        let event = {
            let mut inner = self.inner.write();
            let row = inner
                .attr_table(family)
                .get(&row_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found(family_row_kind(family), row_id))?;
            let graph_id = inner.owner_graph(family, row.owner_id);
            if let Some(graph_id) = graph_id {
                if self.bulk_locked.lock().contains(&graph_id) {
                    return Err(StoreError::GraphBusy { graph_id });
                }
            }
            inner.remove_attr(family, row_id)?;
            ChangeEvent {
                entity: family_attr_entity(family),
                op: ChangeOp::Deleted,
                graph_id,
                id: row.owner_id,
                attribute_id: Some(row_id),
            }
        };
        self.emit(Notify::Deliver, vec![event]);
        Ok(())
    }

    // ========================================================================
    // Bulk-import surface
    //
    // These entry points exist for the star importer: they batch many rows
    // per lock acquisition and take an explicit `Notify` mode instead of
    // relying on any global hook state.
    // ========================================================================

    /// Register a bulk guard for a graph. While the guard lives, direct API
    /// writes to the graph fail with `GraphBusy`.
    pub fn bulk_guard(&self, graph_id: u64) -> BulkGuard<'_> {
        self.bulk_locked.lock().insert(graph_id);
        BulkGuard {
            store: self,
            graph_id,
        }
    }

    /// Drop any graph with this title (cascade) and create a fresh one bound
    /// to `schema_id`, counters reset to 1. Suppressed mode emits nothing;
    /// the import's finalization event announces the graph instead.
    ///
    /// The returned [`BulkGuard`] is registered before the creating write
    /// lock is released, so no direct API write can ever observe the fresh
    /// graph unguarded.
    pub fn bulk_recreate_graph(
        &self,
        title: &str,
        schema_id: Option<u64>,
        mode: Notify,
    ) -> Result<(GraphRecord, BulkGuard<'_>)> {
        let (replaced, graph_id) = {
            let mut inner = self.inner.write();
            if let Some(schema_id) = schema_id {
                if !inner.schemas.contains_key(&schema_id) {
                    return Err(StoreError::not_found("schema", schema_id));
                }
            }
            let existing = inner.graph_by_title(title).map(|g| g.id);
            if let Some(graph_id) = existing {
                inner.drop_graph(graph_id);
            }
            let id = inner.alloc_row_id();
            inner.graphs.insert(
                id,
                GraphRecord {
                    id,
                    title: title.to_string(),
                    schema_id,
                    attributes: AttrCache::new(),
                    next_vertex_id: 1,
                    next_transaction_id: 1,
                },
            );
            self.bulk_locked.lock().insert(id);
            (existing, id)
        };
        let guard = BulkGuard {
            store: self,
            graph_id,
        };
        if let Some(old_id) = replaced {
            tracing::info!(graph_id = old_id, title, "replacing existing graph for bulk import");
            self.emit(
                mode,
                vec![ChangeEvent {
                    entity: EntityKind::Graph,
                    op: ChangeOp::Deleted,
                    graph_id: Some(old_id),
                    id: old_id,
                    attribute_id: None,
                }],
            );
        }
        let prepared = (|| {
            if let Some(schema_id) = schema_id {
                self.instantiate_graph_from_schema(schema_id, graph_id)?;
            }
            let mut inner = self.inner.write();
            inner.apply_defaults(DefFamily::Graph, graph_id, graph_id)
        })();
        if let Err(err) = prepared {
            self.bulk_discard_graph(graph_id);
            return Err(err);
        }
        tracing::debug!(graph_id, title, "graph created");
        self.emit(
            mode,
            vec![ChangeEvent {
                entity: EntityKind::Graph,
                op: ChangeOp::Created,
                graph_id: Some(graph_id),
                id: graph_id,
                attribute_id: None,
            }],
        );
        Ok((self.graph(graph_id)?, guard))
    }

    /// Insert a chunk of vertices in one lock acquisition. Caches are taken
    /// as supplied (built from the flat import records). Returns
    /// `(vx_id, row id)` pairs for endpoint resolution.
    pub fn bulk_insert_vertices(
        &self,
        graph_id: u64,
        rows: Vec<(i64, AttrCache)>,
        mode: Notify,
    ) -> Result<Vec<(i64, u64)>> {
        let (ids, events) = {
            let mut inner = self.inner.write();
            if !inner.graphs.contains_key(&graph_id) {
                return Err(StoreError::not_found("graph", graph_id));
            }
            let mut ids = Vec::with_capacity(rows.len());
            let mut events = Vec::with_capacity(rows.len());
            for (vx_id, attributes) in rows {
                let id = inner.alloc_row_id();
                inner.vertices.insert(
                    id,
                    VertexRecord {
                        id,
                        graph_id,
                        vx_id,
                        attributes,
                    },
                );
                ids.push((vx_id, id));
                events.push(ChangeEvent {
                    entity: EntityKind::Vertex,
                    op: ChangeOp::Created,
                    graph_id: Some(graph_id),
                    id,
                    attribute_id: None,
                });
            }
            (ids, events)
        };
        self.emit(mode, events);
        Ok(ids)
    }

    /// Insert a chunk of transactions in one lock acquisition. Endpoints are
    /// vertex row ids already resolved by the caller.
    pub fn bulk_insert_transactions(
        &self,
        graph_id: u64,
        rows: Vec<BulkTransaction>,
        mode: Notify,
    ) -> Result<Vec<(i64, u64)>> {
        let (ids, events) = {
            let mut inner = self.inner.write();
            if !inner.graphs.contains_key(&graph_id) {
                return Err(StoreError::not_found("graph", graph_id));
            }
            let mut ids = Vec::with_capacity(rows.len());
            let mut events = Vec::with_capacity(rows.len());
            for row in rows {
                let id = inner.alloc_row_id();
                inner.transactions.insert(
                    id,
                    TransactionRecord {
                        id,
                        graph_id,
                        tx_id: row.tx_id,
                        source_id: row.source_id,
                        dest_id: row.dest_id,
                        directed: row.directed,
                        attributes: row.attributes,
                    },
                );
                ids.push((row.tx_id, id));
                events.push(ChangeEvent {
                    entity: EntityKind::Transaction,
                    op: ChangeOp::Created,
                    graph_id: Some(graph_id),
                    id,
                    attribute_id: None,
                });
            }
            (ids, events)
        };
        self.emit(mode, events);
        Ok(ids)
    }

    /// Upsert a chunk of attribute rows in one lock acquisition, through the
    /// same synchronizer core as single-row writes (so the row↔cache
    /// invariant holds for every pair on return).
    pub fn bulk_upsert_attributes(
        &self,
        family: DefFamily,
        rows: Vec<(u64, u64, Value)>,
        mode: Notify,
    ) -> Result<()> {
        let events = {
            let mut inner = self.inner.write();
            let mut events = Vec::with_capacity(rows.len());
            for (owner_id, def_id, value) in rows {
                let graph_id = inner.owner_graph(family, owner_id);
                let (row_id, created) = inner.upsert_attr(family, owner_id, def_id, &value)?;
                events.push(ChangeEvent {
                    entity: family_attr_entity(family),
                    op: if created {
                        ChangeOp::Created
                    } else {
                        ChangeOp::Updated
                    },
                    graph_id,
                    id: owner_id,
                    attribute_id: Some(row_id),
                });
            }
            events
        };
        self.emit(mode, events);
        Ok(())
    }

    /// Finalize a bulk import: set both counters from the maxima seen and
    /// persist the graph. This save is the one delivered notification for
    /// the whole import.
    pub fn bulk_finalize_graph(
        &self,
        graph_id: u64,
        next_vertex_id: i64,
        next_transaction_id: i64,
    ) -> Result<GraphRecord> {
        let record = {
            let mut inner = self.inner.write();
            let graph = inner
                .graphs
                .get_mut(&graph_id)
                .ok_or_else(|| StoreError::not_found("graph", graph_id))?;
            graph.next_vertex_id = next_vertex_id;
            graph.next_transaction_id = next_transaction_id;
            graph.clone()
        };
        self.emit(
            Notify::Deliver,
            vec![ChangeEvent {
                entity: EntityKind::Graph,
                op: ChangeOp::Updated,
                graph_id: Some(graph_id),
                id: graph_id,
                attribute_id: None,
            }],
        );
        Ok(record)
    }

    /// Drop a partially-imported graph without emitting anything. Used on
    /// import failure or cancellation; suppressed events mean subscribers
    /// never observed the partial graph.
    pub fn bulk_discard_graph(&self, graph_id: u64) {
        let mut inner = self.inner.write();
        inner.drop_graph(graph_id);
    }
}

/// Advisory per-graph lock held for the duration of a bulk import.
pub struct BulkGuard<'a> {
    store: &'a GraphStore,
    graph_id: u64,
}

impl BulkGuard<'_> {
    pub fn graph_id(&self) -> u64 {
        self.graph_id
    }
}

impl Drop for BulkGuard<'_> {
    fn drop(&mut self) {
        self.store.bulk_locked.lock().remove(&self.graph_id);
    }
}

/// One transaction record for [`GraphStore::bulk_insert_transactions`].
#[derive(Debug, Clone)]
pub struct BulkTransaction {
    pub tx_id: i64,
    pub source_id: u64,
    pub dest_id: u64,
    pub directed: bool,
    pub attributes: AttrCache,
}
