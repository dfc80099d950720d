use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::error;

use crate::{
    identity::ItemId,
    stage::{StagePayload, StageResult},
};

/// Error prefix of results synthesised for a task that panicked.
pub const ABORTED: &str = "worker task aborted";

/// Whether `result` was synthesised by the pool rather than returned by the
/// unit's own work. Such results never reached the unit's own persistence.
pub fn was_aborted<T>(result: &StageResult<T>) -> bool {
    !result.succeeded
        && result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with(ABORTED))
}

/// Bounded-concurrency executor for per-item stage work.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `work` once per unit with at most `width` invocations in flight and
    /// return one result per unit, in completion order.
    ///
    /// A unit whose task panics is reported as a failed result for that item;
    /// siblings are unaffected. `on_done` sees every result as it arrives.
    pub async fn run<I, T, F, Fut>(
        &self,
        units: Vec<(ItemId, I)>,
        work: F,
        mut on_done: impl FnMut(&StageResult<T>),
    ) -> Vec<StageResult<T>>
    where
        I: Send + 'static,
        T: StagePayload,
        F: Fn(ItemId, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StageResult<T>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.width));
        let work = Arc::new(work);
        let mut tasks = JoinSet::new();
        let mut owners = HashMap::with_capacity(units.len());

        for (item_id, input) in units {
            let permits = Arc::clone(&permits);
            let work = Arc::clone(&work);
            let task_item = item_id.clone();
            let handle = tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                work(task_item, input).await
            });
            owners.insert(handle.id(), item_id);
        }

        let mut results = Vec::with_capacity(owners.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let Some(item_id) = owners.get(&e.id()).cloned() else {
                        error!(error = %e, "worker task lost without an owner");
                        continue;
                    };
                    error!(item = %item_id, error = %e, "worker task aborted");
                    StageResult::failure(item_id, format!("{ABORTED}: {e}"))
                }
            };
            on_done(&result);
            results.push(result);
        }

        results
    }
}
