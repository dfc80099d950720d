//! One async function per command. Each reads its upstream artifacts, runs
//! the per-item work through the pool and the store, and returns a summary
//! for the binary to print.

pub mod classify;
pub mod extract;
pub mod ingest;
pub mod merge;
pub mod status;
pub mod subset;
pub mod transcribe;

use tracing::error;

use crate::{
    config::{Layout, require_artifact},
    error::Result,
    fsutil,
    pool::was_aborted,
    stage::{StagePayload, StageResult},
    store::ResumeStore,
    types::Item,
};

/// Load the working item table, failing with a setup error if ingest has not
/// run.
pub async fn load_items(layout: &Layout) -> Result<Vec<Item>> {
    let path = layout.working_items_path();
    let phase = if layout.use_subset { "subset" } else { "ingest" };
    require_artifact(&path, phase)?;
    Ok(fsutil::read_json(&path).await?)
}

/// Record the failures the pool synthesised for panicked units. Every other
/// result was already stored by the unit itself.
pub(crate) async fn persist_aborted<T: StagePayload>(store: &ResumeStore, results: &[StageResult<T>]) {
    for result in results.iter().filter(|r| was_aborted(*r)) {
        if let Err(e) = store.put(result).await {
            error!(item = %result.item_id, error = %e, "could not record aborted unit");
        }
    }
}
