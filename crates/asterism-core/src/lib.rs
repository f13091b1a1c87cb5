//! Asterism core: the typed attribute-value model.
//!
//! Every attribute value in an Asterism store is persisted as a raw string
//! and re-typed on read through a small, closed set of primitive kinds. This
//! crate owns that conversion chokepoint ([`coerce`] / [`stringify`]) plus
//! the error taxonomy shared by the store and the ingest pipeline.

pub mod error;
pub mod value;

pub use error::StoreError;
pub use value::{coerce, stringify, AttribKind};

/// Convenience alias used throughout the workspace.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
