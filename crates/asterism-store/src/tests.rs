//! Store-level integration tests: definition hierarchy, the attribute
//! synchronizer invariant, id allocation, cascades and snapshots.

use crate::notify::{BufferingNotifier, ChangeOp, EntityKind, Notify};
use crate::records::{AttrCache, DefFamily, DefOwner};
use crate::{BulkTransaction, GraphStore, FIELD_TX_ID, FIELD_VX_ID};
use asterism_core::{coerce, AttribKind, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;

/// Store with the standard primitive types registered.
fn store_with_types() -> GraphStore {
    let store = GraphStore::new();
    for (label, kind) in [
        ("boolean", AttribKind::Bool),
        ("float", AttribKind::Float),
        ("integer", AttribKind::Integer),
        ("string", AttribKind::String),
        ("dict", AttribKind::Dict),
    ] {
        store.create_attrib_type(label, kind).unwrap();
    }
    store
}

/// Store with a schema carrying one vertex template per primitive kind,
/// and one graph built from it.
fn seeded_graph(store: &GraphStore) -> u64 {
    let schema = store.create_schema("analytic").unwrap();
    for (label, type_label) in [
        ("Identifier", "string"),
        ("Type", "string"),
        ("weight", "float"),
        ("flag", "boolean"),
        ("count", "integer"),
        ("extra", "dict"),
    ] {
        store
            .define_attribute(
                DefOwner::Schema(schema.id),
                DefFamily::Vertex,
                label,
                type_label,
                None,
                None,
            )
            .unwrap();
    }
    store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Transaction,
            "weight",
            "float",
            None,
            None,
        )
        .unwrap();
    store.create_graph("g1", Some(schema.id)).unwrap().id
}

#[test]
fn unknown_type_label_is_rejected() {
    let store = store_with_types();
    let schema = store.create_schema("s").unwrap();
    let err = store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Vertex,
            "Colour",
            "colour",
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownTypes { labels } if labels == vec!["colour"]));
}

#[test]
fn duplicate_definition_per_owner_and_family() {
    let store = store_with_types();
    let schema = store.create_schema("s").unwrap();
    store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Vertex,
            "name",
            "string",
            None,
            None,
        )
        .unwrap();
    // Same label in a different family is fine.
    store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Transaction,
            "name",
            "string",
            None,
            None,
        )
        .unwrap();
    let err = store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Vertex,
            "name",
            "string",
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateDefinition { .. }));
}

#[test]
fn instantiate_is_idempotent() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    let schema_id = store.graph(graph_id).unwrap().schema_id.unwrap();
    let before = store
        .definitions(DefOwner::Graph(graph_id), DefFamily::Vertex)
        .len();
    let copied = store
        .instantiate_graph_from_schema(schema_id, graph_id)
        .unwrap();
    assert_eq!(copied, 0);
    let after = store
        .definitions(DefOwner::Graph(graph_id), DefFamily::Vertex)
        .len();
    assert_eq!(before, after);
}

#[test]
fn vertex_ids_are_sequential_and_counter_advances() {
    // Scenario: three vertices get vx_ids 1, 2, 3 and the counter rests at 4.
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    let ids: Vec<i64> = (0..3)
        .map(|_| store.create_vertex(graph_id).unwrap().vx_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(store.graph(graph_id).unwrap().next_vertex_id, 4);
}

#[test]
fn vertex_cache_seeds_structural_field() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    let vertex = store.create_vertex(graph_id).unwrap();
    assert_eq!(vertex.attributes.get(FIELD_VX_ID), Some(&json!(1)));
}

#[test]
fn transaction_cache_seeds_structural_fields() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store.create_vertex(graph_id).unwrap();
    let tx = store.create_transaction(graph_id, 1, 2, true).unwrap();
    assert_eq!(tx.attributes.get(FIELD_TX_ID), Some(&json!(1)));
    assert_eq!(tx.attributes.get("vx_src_"), Some(&json!(1)));
    assert_eq!(tx.attributes.get("vx_dst_"), Some(&json!(2)));
    assert_eq!(tx.attributes.get("tx_dir_"), Some(&json!(true)));
    assert_eq!(store.graph(graph_id).unwrap().next_transaction_id, 2);
}

#[test]
fn set_attribute_keeps_row_and_cache_in_lockstep() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();

    let row = store
        .set_vertex_attribute(graph_id, 1, "weight", &json!(2.5))
        .unwrap();
    assert_eq!(row.value_str, "2.5");
    let vertex = store.vertex(graph_id, 1).unwrap();
    assert_eq!(
        vertex.attributes.get("weight"),
        Some(&coerce(AttribKind::Float, &row.value_str))
    );

    // Upsert: same definition, new value, same row.
    let row2 = store
        .set_vertex_attribute(graph_id, 1, "weight", &json!(7))
        .unwrap();
    assert_eq!(row2.id, row.id);
    assert_eq!(row2.value_str, "7");
    assert_eq!(
        store.vertex(graph_id, 1).unwrap().attributes.get("weight"),
        Some(&json!(7.0))
    );
}

#[test]
fn dict_attribute_round_trips_canonical_text() {
    // A dict value is stored as canonical JSON text and the cache holds the
    // parsed structure.
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    let value = json!({"a": 1, "b": [true, null]});
    let row = store
        .set_vertex_attribute(graph_id, 1, "extra", &value)
        .unwrap();
    assert_eq!(row.value_str, value.to_string());
    assert_eq!(
        store.vertex(graph_id, 1).unwrap().attributes.get("extra"),
        Some(&value)
    );
}

#[test]
fn boolean_attribute_only_true_matches() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store
        .set_vertex_attribute(graph_id, 1, "flag", &json!("TrUe"))
        .unwrap();
    assert_eq!(
        store.vertex(graph_id, 1).unwrap().attributes.get("flag"),
        Some(&json!(true))
    );
    store
        .set_vertex_attribute(graph_id, 1, "flag", &json!("banana"))
        .unwrap();
    assert_eq!(
        store.vertex(graph_id, 1).unwrap().attributes.get("flag"),
        Some(&json!(false))
    );
}

#[test]
fn unknown_label_and_foreign_definition_are_distinct_errors() {
    let store = store_with_types();
    let g1 = seeded_graph(&store);
    store.create_vertex(g1).unwrap();

    let err = store
        .set_vertex_attribute(g1, 1, "nonesuch", &json!(1))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind, .. }
        if kind == "vertex attribute definition"));

    // A definition belonging to another graph is a mismatch, not a lookup
    // failure.
    let g2 = store.create_graph("g2", None).unwrap().id;
    let foreign = store
        .define_attribute(DefOwner::Graph(g2), DefFamily::Vertex, "w", "float", None, None)
        .unwrap();
    let owner_row = store.vertex(g1, 1).unwrap().id;
    let err = store
        .set_attribute_by_def(DefFamily::Vertex, owner_row, foreign.id, &json!(1))
        .unwrap_err();
    assert!(matches!(err, StoreError::DefinitionMismatch { .. }));
}

#[test]
fn defaults_materialize_on_creation_only() {
    let store = store_with_types();
    let schema = store.create_schema("s").unwrap();
    store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Vertex,
            "kind",
            "string",
            Some("entity kind"),
            Some("unknown"),
        )
        .unwrap();
    let graph_id = store.create_graph("g", Some(schema.id)).unwrap().id;
    let v1 = store.create_vertex(graph_id).unwrap();
    assert_eq!(v1.attributes.get("kind"), Some(&json!("unknown")));

    // Changing the default does not touch existing rows.
    let def = store
        .definitions(DefOwner::Graph(graph_id), DefFamily::Vertex)
        .into_iter()
        .find(|d| d.label == "kind")
        .unwrap();
    store
        .update_definition(def.id, def.descr.as_deref(), Some("other"))
        .unwrap();
    assert_eq!(
        store.vertex(graph_id, 1).unwrap().attributes.get("kind"),
        Some(&json!("unknown"))
    );
    let v2 = store.create_vertex(graph_id).unwrap();
    assert_eq!(v2.attributes.get("kind"), Some(&json!("other")));
}

#[test]
fn delete_definition_cascades_rows_and_cache_keys() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store
        .set_vertex_attribute(graph_id, 1, "weight", &json!(1.0))
        .unwrap();
    let def = store
        .definitions(DefOwner::Graph(graph_id), DefFamily::Vertex)
        .into_iter()
        .find(|d| d.label == "weight")
        .unwrap();
    store.delete_definition(def.id).unwrap();
    let vertex = store.vertex(graph_id, 1).unwrap();
    assert!(!vertex.attributes.contains_key("weight"));
    assert!(store.attribute_rows(DefFamily::Vertex, vertex.id).is_empty());
}

#[test]
fn delete_attribute_tolerates_desynced_cache() {
    // Removing a row whose cache key is already gone succeeds quietly.
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    let row = store
        .set_vertex_attribute(graph_id, 1, "weight", &json!(1.0))
        .unwrap();
    {
        let mut inner = store.inner.write();
        let vertex_id = inner.vertex_by_local(graph_id, 1).unwrap().id;
        inner
            .cache_mut(DefFamily::Vertex, vertex_id)
            .unwrap()
            .remove("weight");
    }
    store
        .delete_attribute_row(DefFamily::Vertex, row.id)
        .unwrap();
    assert!(store
        .attribute_row(DefFamily::Vertex, row.id)
        .is_err());
}

#[test]
fn delete_vertex_cascades_incident_transactions() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store.create_vertex(graph_id).unwrap();
    store.create_vertex(graph_id).unwrap();
    store.create_transaction(graph_id, 1, 2, true).unwrap();
    store.create_transaction(graph_id, 2, 3, false).unwrap();
    store.delete_vertex(graph_id, 2).unwrap();
    assert!(store.transactions(graph_id).is_empty());
    assert_eq!(store.vertices(graph_id).len(), 2);
    // Counter never rewinds.
    assert_eq!(store.graph(graph_id).unwrap().next_vertex_id, 4);
}

#[test]
fn delete_graph_cascades_everything() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store.create_vertex(graph_id).unwrap();
    store.create_transaction(graph_id, 1, 2, true).unwrap();
    store
        .set_vertex_attribute(graph_id, 1, "weight", &json!(1.0))
        .unwrap();
    store.delete_graph(graph_id).unwrap();
    assert!(store.graph(graph_id).is_err());
    let inner = store.inner.read();
    assert!(inner.vertices.is_empty());
    assert!(inner.transactions.is_empty());
    assert!(inner.vertex_attrs.is_empty());
    assert!(inner
        .defs
        .values()
        .all(|d| d.owner != DefOwner::Graph(graph_id)));
}

#[test]
fn graph_projection_shape() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store
        .set_vertex_attribute(graph_id, 1, "Identifier", &json!("n1"))
        .unwrap();

    let projection = store.graph_projection(graph_id).unwrap();
    assert_eq!(projection["schema"], json!("analytic"));
    assert_eq!(projection["vertex"][0]["key"], json!(["Identifier", "Type"]));
    let attrs = projection["vertex"][0]["attrs"].as_array().unwrap();
    assert!(attrs
        .iter()
        .any(|a| a["label"] == json!("weight") && a["type"] == json!("float")));
    // No default on these definitions, so no "default" key at all.
    assert!(attrs.iter().all(|a| a.get("default").is_none()));
    let data = projection["vertex"][1]["data"].as_array().unwrap();
    assert_eq!(data[0]["Identifier"], json!("n1"));
    assert_eq!(data[0][FIELD_VX_ID], json!(1));
}

#[test]
fn projection_includes_coerced_default() {
    let store = store_with_types();
    let schema = store.create_schema("s").unwrap();
    store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Vertex,
            "count",
            "integer",
            None,
            Some("5"),
        )
        .unwrap();
    let graph_id = store.create_graph("g", Some(schema.id)).unwrap().id;
    let projection = store.graph_projection(graph_id).unwrap();
    let attrs = projection["vertex"][0]["attrs"].as_array().unwrap();
    assert_eq!(attrs[0]["default"], json!(5));
}

#[test]
fn notifier_sees_summary_events_not_derivative_rows() {
    let buffer = Arc::new(BufferingNotifier::default());
    let store = GraphStore::with_notifier(buffer.clone());
    store
        .create_attrib_type("string", AttribKind::String)
        .unwrap();
    let schema = store.create_schema("s").unwrap();
    store
        .define_attribute(
            DefOwner::Schema(schema.id),
            DefFamily::Vertex,
            "kind",
            "string",
            None,
            Some("unknown"),
        )
        .unwrap();
    buffer.take();

    let graph_id = store.create_graph("g", Some(schema.id)).unwrap().id;
    let events = buffer.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, EntityKind::Graph);
    assert_eq!(events[0].op, ChangeOp::Created);

    // Vertex creation with a default attribute: still one event.
    store.create_vertex(graph_id).unwrap();
    let events = buffer.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, EntityKind::Vertex);
}

#[test]
fn bulk_guard_blocks_direct_writes() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    {
        let _guard = store.bulk_guard(graph_id);
        let err = store.create_vertex(graph_id).unwrap_err();
        assert!(matches!(err, StoreError::GraphBusy { .. }));
        let err = store.delete_graph(graph_id).unwrap_err();
        assert!(matches!(err, StoreError::GraphBusy { .. }));
    }
    // Guard dropped, writes flow again.
    store.create_vertex(graph_id).unwrap();
}

#[test]
fn bulk_recreate_returns_with_guard_already_held() {
    // There is no window between graph creation and guard registration in
    // which a direct write could slip in.
    let store = store_with_types();
    let (graph, guard) = store
        .bulk_recreate_graph("imported", None, Notify::Suppress)
        .unwrap();
    let err = store.create_vertex(graph.id).unwrap_err();
    assert!(matches!(err, StoreError::GraphBusy { .. }));
    drop(guard);
    store.create_vertex(graph.id).unwrap();
}

#[test]
fn bulk_inserts_and_finalize() {
    let buffer = Arc::new(BufferingNotifier::default());
    let store = GraphStore::with_notifier(buffer.clone());
    store
        .create_attrib_type("string", AttribKind::String)
        .unwrap();
    let (graph, _guard) = store
        .bulk_recreate_graph("imported", None, Notify::Suppress)
        .unwrap();
    buffer.take();

    let mut cache = AttrCache::new();
    cache.insert(FIELD_VX_ID.to_string(), json!(7));
    let ids = store
        .bulk_insert_vertices(graph.id, vec![(7, cache)], Notify::Suppress)
        .unwrap();
    assert_eq!(ids.len(), 1);
    let (vx_id, row_id) = ids[0];
    assert_eq!(vx_id, 7);

    let mut tx_cache = AttrCache::new();
    tx_cache.insert(FIELD_TX_ID.to_string(), json!(3));
    store
        .bulk_insert_transactions(
            graph.id,
            vec![BulkTransaction {
                tx_id: 3,
                source_id: row_id,
                dest_id: row_id,
                directed: false,
                attributes: tx_cache,
            }],
            Notify::Suppress,
        )
        .unwrap();

    assert!(buffer.is_empty());
    store.bulk_finalize_graph(graph.id, 8, 4).unwrap();
    let events = buffer.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, EntityKind::Graph);
    assert_eq!(events[0].op, ChangeOp::Updated);

    let graph = store.graph(graph.id).unwrap();
    assert_eq!(graph.next_vertex_id, 8);
    assert_eq!(graph.next_transaction_id, 4);
}

#[test]
fn bulk_discard_leaves_no_trace() {
    let store = store_with_types();
    let (graph, _guard) = store
        .bulk_recreate_graph("half-done", None, Notify::Suppress)
        .unwrap();
    let mut cache = AttrCache::new();
    cache.insert(FIELD_VX_ID.to_string(), json!(1));
    store
        .bulk_insert_vertices(graph.id, vec![(1, cache)], Notify::Suppress)
        .unwrap();
    store.bulk_discard_graph(graph.id);
    assert!(store.graph(graph.id).is_err());
    assert!(store.inner.read().vertices.is_empty());
}

#[test]
fn snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store
        .set_vertex_attribute(graph_id, 1, "weight", &json!(2.5))
        .unwrap();
    store.save_snapshot(&path).unwrap();

    let reloaded = GraphStore::load_snapshot(&path).unwrap();
    let vertex = reloaded.vertex(graph_id, 1).unwrap();
    assert_eq!(vertex.attributes.get("weight"), Some(&json!(2.5)));
    // Row ids keep advancing from where the snapshot left off.
    let v2 = reloaded.create_vertex(graph_id).unwrap();
    assert!(v2.id > vertex.id);
}

#[test]
fn parallel_vertex_creation_allocates_distinct_ids() {
    let store = Arc::new(store_with_types());
    let graph_id = seeded_graph(&store);
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                (0..25)
                    .map(|_| store.create_vertex(graph_id).unwrap().vx_id)
                    .collect::<Vec<i64>>()
            })
        })
        .collect();
    let mut all: Vec<i64> = threads
        .into_iter()
        .flat_map(|t| t.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 200);
    assert_eq!(store.graph(graph_id).unwrap().next_vertex_id, 201);
}

#[test]
fn schema_deletion_detaches_graphs_but_keeps_live_defs() {
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    let schema_id = store.graph(graph_id).unwrap().schema_id.unwrap();
    let live_before = store
        .definitions(DefOwner::Graph(graph_id), DefFamily::Vertex)
        .len();
    store.delete_schema(schema_id).unwrap();
    assert_eq!(store.graph(graph_id).unwrap().schema_id, None);
    assert_eq!(
        store
            .definitions(DefOwner::Graph(graph_id), DefFamily::Vertex)
            .len(),
        live_before
    );
    assert!(store
        .definitions(DefOwner::Schema(schema_id), DefFamily::Vertex)
        .is_empty());
}

#[test]
fn value_never_coerced_to_error() {
    // Unparseable input lands as Null in the cache, never an Err.
    let store = store_with_types();
    let graph_id = seeded_graph(&store);
    store.create_vertex(graph_id).unwrap();
    store
        .set_vertex_attribute(graph_id, 1, "count", &json!("not a number"))
        .unwrap();
    assert_eq!(
        store.vertex(graph_id, 1).unwrap().attributes.get("count"),
        Some(&Value::Null)
    );
}
