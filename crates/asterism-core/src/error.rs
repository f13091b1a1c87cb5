//! Shared error taxonomy.
//!
//! Every externally reported failure carries its originating kind; there is
//! deliberately no catch-all variant. Coercion failures are *not* errors —
//! [`crate::coerce`] degrades to `Null` and callers treat that as "value
//! intentionally absent".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// One or more referenced attribute type labels have no registry entry.
    /// Carries the complete set of offenders, not just the first.
    #[error("unknown attribute types: {}", labels.join(", "))]
    UnknownTypes { labels: Vec<String> },

    /// An attribute definition was supplied that does not belong to the
    /// target entity's graph.
    #[error("definition {definition_id} does not belong to graph {graph_id}")]
    DefinitionMismatch { definition_id: u64, graph_id: u64 },

    /// Label collision within one owner scope: an attribute definition label
    /// within (owner, family), or a unique record label (schema, graph
    /// title, attribute type).
    #[error("duplicate {what} '{label}' in {owner}")]
    DuplicateDefinition {
        what: &'static str,
        label: String,
        owner: String,
    },

    /// A referenced schema/graph/vertex/transaction/definition is absent.
    /// `kind` distinguishes "entity not found" from "definition not found".
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// The import document's structure does not match the five-block legacy
    /// exchange format.
    #[error("malformed import document: {reason}")]
    MalformedDocument { reason: String },

    /// The graph is being bulk-loaded; direct writes are excluded until the
    /// import finishes.
    #[error("graph {graph_id} is locked by an in-progress bulk import")]
    GraphBusy { graph_id: u64 },

    /// A bulk import was cancelled between chunks.
    #[error("import cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        StoreError::MalformedDocument {
            reason: reason.into(),
        }
    }
}
