//! Background import jobs.
//!
//! Large imports run off the caller's thread: spawn a job, poll its
//! progress, cancel it between chunks, and join it for the final report.

use crate::doc::StarDocument;
use crate::pipeline::{run_import, ImportControl, ImportOptions, ImportProgress, ImportReport};
use asterism_core::Result;
use asterism_store::GraphStore;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle to a running import. Dropping the handle detaches the worker;
/// the import keeps running to completion.
pub struct ImportJob {
    control: Arc<ImportControl>,
    handle: JoinHandle<Result<ImportReport>>,
}

impl ImportJob {
    /// Spawn an import of `doc` into `store` on a dedicated worker thread.
    pub fn spawn(
        store: Arc<GraphStore>,
        title: impl Into<String>,
        doc: StarDocument,
        options: ImportOptions,
    ) -> Self {
        let title = title.into();
        let control = Arc::new(ImportControl::new());
        let worker_control = Arc::clone(&control);
        let handle = std::thread::spawn(move || {
            run_import(&store, &title, &doc, &options, &worker_control)
        });
        Self { control, handle }
    }

    /// Snapshot of the worker's progress.
    pub fn progress(&self) -> ImportProgress {
        self.control.progress()
    }

    /// Request cancellation. The worker stops at the next chunk boundary,
    /// discards the partial graph, and `join` returns `Cancelled`.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and return its report. A worker panic is
    /// propagated to the joining thread.
    pub fn join(self) -> Result<ImportReport> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
