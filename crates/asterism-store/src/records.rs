//! Stored record types.
//!
//! Row ids are storage-wide `u64`s issued from a single monotonic counter;
//! the graph-local `vx_id`/`tx_id` pseudo-identifiers are distinct from them
//! and issued per graph (see the allocator in the store).

use asterism_core::AttribKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object used for every denormalized attribute cache.
pub type AttrCache = Map<String, Value>;

/// Application-level attribute type: a bespoke name mapped to a primitive
/// kind. Retyping a referenced entry is not supported (no cascade-safe way
/// to reinterpret stored value strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttribType {
    pub id: u64,
    pub label: String,
    pub kind: AttribKind,
}

/// Named schema; owns attribute-definition templates that are copied into
/// every graph created against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: u64,
    pub label: String,
}

/// Which of the three parallel definition collections a definition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefFamily {
    Graph,
    Vertex,
    Transaction,
}

impl DefFamily {
    pub const ALL: [DefFamily; 3] = [DefFamily::Graph, DefFamily::Vertex, DefFamily::Transaction];

    pub fn name(self) -> &'static str {
        match self {
            DefFamily::Graph => "graph",
            DefFamily::Vertex => "vertex",
            DefFamily::Transaction => "transaction",
        }
    }
}

/// Who owns an attribute definition: a schema (template scope) or a graph
/// (live scope). Together with [`DefFamily`] this spans the six definition
/// variants of the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefOwner {
    Schema(u64),
    Graph(u64),
}

/// A named, typed attribute slot with optional description and default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    pub id: u64,
    pub owner: DefOwner,
    pub family: DefFamily,
    pub label: String,
    pub type_id: u64,
    pub descr: Option<String>,
    pub default_str: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: u64,
    pub title: String,
    pub schema_id: Option<u64>,
    pub attributes: AttrCache,
    /// Next graph-local vertex identifier; strictly increasing, never reused.
    pub next_vertex_id: i64,
    /// Next graph-local transaction identifier; strictly increasing, never reused.
    pub next_transaction_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexRecord {
    pub id: u64,
    pub graph_id: u64,
    pub vx_id: i64,
    pub attributes: AttrCache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub graph_id: u64,
    pub tx_id: i64,
    /// Row id of the source vertex.
    pub source_id: u64,
    /// Row id of the destination vertex.
    pub dest_id: u64,
    pub directed: bool,
    pub attributes: AttrCache,
}

/// Normalized attribute row: one (owner entity, definition) pair with the
/// raw value string. The owning entity's cache mirrors this row through the
/// registry coercion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRow {
    pub id: u64,
    /// Row id of the owning graph/vertex/transaction, per family table.
    pub owner_id: u64,
    pub def_id: u64,
    pub value_str: String,
}
