//! Legacy "star" exchange-document ingestion.
//!
//! A star document is a JSON array of five labeled blocks
//! `[version, graph, vertex, transaction, meta]`. The `graph`, `vertex` and
//! `transaction` blocks each carry an attribute-definition list followed by
//! flat data records. This crate parses the format, validates it against the
//! type registry before any write happens, and bulk-loads it into a
//! [`GraphStore`](asterism_store::GraphStore) in chunks, with notifications
//! suppressed until the final graph save.

pub mod doc;
pub mod job;
pub mod pipeline;

pub use doc::{to_star_document, AttrSpec, EntityBlock, StarDocument};
pub use job::ImportJob;
pub use pipeline::{
    import_document, import_path, ImportControl, ImportOptions, ImportPhase, ImportProgress,
    ImportReport,
};
