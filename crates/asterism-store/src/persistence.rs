//! Whole-store JSON snapshots.
//!
//! The store serializes to a single pretty-printed JSON file. Snapshots are
//! a cold-storage format for the CLI, not a write-ahead log: save after a
//! batch of mutations, load at startup.

use crate::notify::ChangeNotifier;
use crate::{GraphStore, StoreInner};
use asterism_core::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

impl GraphStore {
    /// Write the entire store to `path`, creating parent directories as
    /// needed.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let json = {
            let inner = self.inner.read();
            serde_json::to_string_pretty(&*inner)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "store snapshot saved");
        Ok(())
    }

    /// Load a store from a snapshot written by [`save_snapshot`]. The loaded
    /// store uses a null notifier; see [`load_snapshot_with_notifier`].
    ///
    /// [`save_snapshot`]: GraphStore::save_snapshot
    /// [`load_snapshot_with_notifier`]: GraphStore::load_snapshot_with_notifier
    pub fn load_snapshot(path: &Path) -> Result<GraphStore> {
        Self::load_snapshot_with_notifier(path, Arc::new(crate::notify::NullNotifier))
    }

    pub fn load_snapshot_with_notifier(
        path: &Path,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Result<GraphStore> {
        let json = fs::read_to_string(path)?;
        let inner: StoreInner = serde_json::from_str(&json)?;
        tracing::debug!(path = %path.display(), "store snapshot loaded");
        Ok(GraphStore {
            inner: RwLock::new(inner),
            notifier,
            bulk_locked: Mutex::new(HashSet::new()),
        })
    }
}
