//! Chunked bulk-import pipeline.
//!
//! Order of operations:
//!
//! 1. Pre-flight: every referenced type label must exist in the registry;
//!    all offenders are reported together and nothing is written.
//! 2. Find-or-create the schema named by the version block, if any.
//! 3. Delete any graph with the same title (full cascade) and create a
//!    fresh one, then take the per-graph bulk guard.
//! 4. Materialize graph-scoped definitions from all three attrs lists.
//! 5. Stream vertex records in chunks, then transactions, resolving
//!    endpoints through a vx_id map built as vertices land. Notifications
//!    are suppressed throughout.
//! 6. Finalize both counters from the maxima seen; this last graph save is
//!    the one delivered event for the whole import.
//!
//! Cancellation is honored between chunks. On cancellation or any error
//! after graph creation the partial graph is discarded, so other readers
//! never observe a half-imported graph.

use crate::doc::StarDocument;
use asterism_core::{stringify, Result, StoreError};
use asterism_store::notify::Notify;
use asterism_store::records::{AttrCache, DefFamily, DefOwner};
use asterism_store::{
    BulkTransaction, GraphStore, FIELD_TX_DIR, FIELD_TX_ID, FIELD_VX_DST, FIELD_VX_ID,
    FIELD_VX_SRC, TRANSACTION_STRUCTURAL_FIELDS,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reference chunk size; large imports are dominated by per-chunk write
/// batches, not per-record work.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub chunk_size: usize,
    /// Remove the source file after a successful [`import_path`] run.
    pub remove_source: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            remove_source: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Preflight,
    Definitions,
    Vertices,
    Transactions,
    Finalizing,
    Complete,
}

/// Point-in-time progress of a running import. `done`/`total` count records
/// of the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportProgress {
    pub phase: ImportPhase,
    pub done: usize,
    pub total: usize,
}

/// Shared cancellation flag and progress cell, shared between an import
/// worker and its observers.
pub struct ImportControl {
    cancelled: AtomicBool,
    progress: Mutex<ImportProgress>,
}

impl Default for ImportControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportControl {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            progress: Mutex::new(ImportProgress {
                phase: ImportPhase::Preflight,
                done: 0,
                total: 0,
            }),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> ImportProgress {
        *self.progress.lock()
    }

    fn set_progress(&self, phase: ImportPhase, done: usize, total: usize) {
        *self.progress.lock() = ImportProgress { phase, done, total };
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }
}

/// Outcome of a completed import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub graph_id: u64,
    pub title: String,
    pub schema: Option<String>,
    pub vertices: usize,
    pub transactions: usize,
}

/// Import a parsed document synchronously. See [`crate::job::ImportJob`]
/// for the background variant.
pub fn import_document(
    store: &GraphStore,
    title: &str,
    doc: &StarDocument,
    options: &ImportOptions,
) -> Result<ImportReport> {
    run_import(store, title, doc, options, &ImportControl::new())
}

/// Import a star payload file. The graph title is the file name; the file
/// is removed afterwards when `options.remove_source` is set (extracted
/// payloads are temporary).
pub fn import_path(store: &GraphStore, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StoreError::malformed("import path has no file name"))?;
    let text = fs::read_to_string(path)?;
    let doc = StarDocument::parse(&text)?;
    let report = run_import(store, &title, &doc, options, &ImportControl::new())?;
    if options.remove_source {
        if let Err(err) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), %err, "failed to remove imported payload");
        }
    }
    Ok(report)
}

/// Run the full pipeline under an external [`ImportControl`].
pub fn run_import(
    store: &GraphStore,
    title: &str,
    doc: &StarDocument,
    options: &ImportOptions,
    control: &ImportControl,
) -> Result<ImportReport> {
    control.set_progress(ImportPhase::Preflight, 0, 0);

    // Pre-flight: report every unknown type label at once, write nothing.
    let known: HashMap<String, _> = store
        .attrib_types()
        .into_iter()
        .map(|t| (t.label.clone(), t))
        .collect();
    let mut unknown: Vec<String> = doc
        .referenced_type_labels()
        .into_iter()
        .filter(|label| !known.contains_key(label))
        .collect();
    unknown.sort();
    if !unknown.is_empty() {
        return Err(StoreError::UnknownTypes { labels: unknown });
    }

    let schema = match &doc.schema {
        Some(label) => Some(store.find_or_create_schema(label)?),
        None => None,
    };

    let (graph, guard) =
        store.bulk_recreate_graph(title, schema.as_ref().map(|s| s.id), Notify::Suppress)?;
    tracing::info!(graph_id = graph.id, title, "bulk import started");

    let result = load_blocks(store, graph.id, doc, options, control, &known);
    match result {
        Ok((vertices, transactions)) => {
            drop(guard);
            tracing::info!(graph_id = graph.id, vertices, transactions, "bulk import complete");
            control.set_progress(ImportPhase::Complete, transactions, transactions);
            Ok(ImportReport {
                graph_id: graph.id,
                title: title.to_string(),
                schema: schema.map(|s| s.label),
                vertices,
                transactions,
            })
        }
        Err(err) => {
            store.bulk_discard_graph(graph.id);
            drop(guard);
            tracing::warn!(graph_id = graph.id, %err, "bulk import aborted, partial graph discarded");
            Err(err)
        }
    }
}

fn load_blocks(
    store: &GraphStore,
    graph_id: u64,
    doc: &StarDocument,
    options: &ImportOptions,
    control: &ImportControl,
    known: &HashMap<String, asterism_store::records::AttribType>,
) -> Result<(usize, usize)> {
    let chunk_size = options.chunk_size.max(1);

    // Definitions for all three families, keeping label→definition maps for
    // record-field resolution.
    control.set_progress(ImportPhase::Definitions, 0, 0);
    let mut def_maps: [HashMap<String, u64>; 3] = Default::default();
    for (slot, (family, block)) in [
        (DefFamily::Graph, &doc.graph),
        (DefFamily::Vertex, &doc.vertex),
        (DefFamily::Transaction, &doc.transaction),
    ]
    .into_iter()
    .enumerate()
    {
        for spec in &block.attrs {
            let kind = known
                .get(&spec.type_label)
                .map(|t| t.kind)
                .ok_or_else(|| StoreError::UnknownTypes {
                    labels: vec![spec.type_label.clone()],
                })?;
            let default_str = spec.default.as_ref().map(|v| stringify(kind, v));
            let def = store.define_attribute(
                DefOwner::Graph(graph_id),
                family,
                &spec.label,
                &spec.type_label,
                spec.descr.as_deref(),
                default_str.as_deref(),
            )?;
            def_maps[slot].insert(spec.label.clone(), def.id);
        }
    }
    let [_, vertex_defs, transaction_defs] = def_maps;

    // Vertices, chunked: each chunk lands as one batched insert plus one
    // batched attribute upsert.
    let total = doc.vertex.data.len();
    let mut vx_map: HashMap<i64, u64> = HashMap::with_capacity(total);
    let mut seen_vx: HashSet<i64> = HashSet::with_capacity(total);
    let mut max_vx_id: i64 = 0;
    let mut done = 0usize;
    control.set_progress(ImportPhase::Vertices, 0, total);
    for chunk in doc.vertex.data.chunks(chunk_size) {
        control.checkpoint()?;
        let mut rows: Vec<(i64, AttrCache)> = Vec::with_capacity(chunk.len());
        for record in chunk {
            let vx_id = record
                .get(FIELD_VX_ID)
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    StoreError::malformed(format!("vertex record missing integer '{FIELD_VX_ID}'"))
                })?;
            if !seen_vx.insert(vx_id) {
                return Err(StoreError::malformed(format!(
                    "duplicate vertex id {vx_id} in vertex block"
                )));
            }
            max_vx_id = max_vx_id.max(vx_id);
            rows.push((vx_id, record.clone()));
        }
        let inserted = store.bulk_insert_vertices(graph_id, rows, Notify::Suppress)?;

        let mut attr_rows: Vec<(u64, u64, Value)> = Vec::new();
        for ((vx_id, row_id), record) in inserted.iter().zip(chunk) {
            vx_map.insert(*vx_id, *row_id);
            for (field, value) in record {
                if field == FIELD_VX_ID {
                    continue;
                }
                let def_id = *vertex_defs.get(field).ok_or_else(|| {
                    StoreError::malformed(format!("vertex record field '{field}' has no definition"))
                })?;
                attr_rows.push((*row_id, def_id, value.clone()));
            }
        }
        store.bulk_upsert_attributes(DefFamily::Vertex, attr_rows, Notify::Suppress)?;
        done += chunk.len();
        control.set_progress(ImportPhase::Vertices, done, total);
        tracing::info!(done, total, "vertex chunk loaded");
    }

    // Transactions, chunked, endpoints resolved through the vertex map.
    let total = doc.transaction.data.len();
    let mut seen_tx: HashSet<i64> = HashSet::with_capacity(total);
    let mut max_tx_id: i64 = 0;
    let mut done = 0usize;
    control.set_progress(ImportPhase::Transactions, 0, total);
    for chunk in doc.transaction.data.chunks(chunk_size) {
        control.checkpoint()?;
        let mut rows: Vec<BulkTransaction> = Vec::with_capacity(chunk.len());
        for record in chunk {
            let tx_id = structural_i64(record, FIELD_TX_ID)?;
            if !seen_tx.insert(tx_id) {
                return Err(StoreError::malformed(format!(
                    "duplicate transaction id {tx_id} in transaction block"
                )));
            }
            let src = structural_i64(record, FIELD_VX_SRC)?;
            let dst = structural_i64(record, FIELD_VX_DST)?;
            let directed = record
                .get(FIELD_TX_DIR)
                .and_then(Value::as_bool)
                .ok_or_else(|| {
                    StoreError::malformed(format!(
                        "transaction record missing boolean '{FIELD_TX_DIR}'"
                    ))
                })?;
            max_tx_id = max_tx_id.max(tx_id);
            let source_id = *vx_map.get(&src).ok_or_else(|| {
                StoreError::malformed(format!("transaction {tx_id} references unknown vertex {src}"))
            })?;
            let dest_id = *vx_map.get(&dst).ok_or_else(|| {
                StoreError::malformed(format!("transaction {tx_id} references unknown vertex {dst}"))
            })?;
            rows.push(BulkTransaction {
                tx_id,
                source_id,
                dest_id,
                directed,
                attributes: record.clone(),
            });
        }
        let inserted = store.bulk_insert_transactions(graph_id, rows, Notify::Suppress)?;

        let mut attr_rows: Vec<(u64, u64, Value)> = Vec::new();
        for ((_, row_id), record) in inserted.iter().zip(chunk) {
            for (field, value) in record {
                if TRANSACTION_STRUCTURAL_FIELDS.contains(&field.as_str()) {
                    continue;
                }
                let def_id = *transaction_defs.get(field).ok_or_else(|| {
                    StoreError::malformed(format!(
                        "transaction record field '{field}' has no definition"
                    ))
                })?;
                attr_rows.push((*row_id, def_id, value.clone()));
            }
        }
        store.bulk_upsert_attributes(DefFamily::Transaction, attr_rows, Notify::Suppress)?;
        done += chunk.len();
        control.set_progress(ImportPhase::Transactions, done, total);
        tracing::info!(done, total, "transaction chunk loaded");
    }

    control.checkpoint()?;
    control.set_progress(ImportPhase::Finalizing, 0, 0);
    store.bulk_finalize_graph(graph_id, max_vx_id + 1, max_tx_id + 1)?;
    Ok((doc.vertex.data.len(), doc.transaction.data.len()))
}

fn structural_i64(record: &AttrCache, field: &str) -> Result<i64> {
    record.get(field).and_then(Value::as_i64).ok_or_else(|| {
        StoreError::malformed(format!("transaction record missing integer '{field}'"))
    })
}
