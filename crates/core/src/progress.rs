use crate::stage::Stage;

/// Receives per-item progress from a running phase. The binary draws a
/// progress bar; tests and library callers use [`NoProgress`].
pub trait ProgressSink: Send + Sync {
    fn started(&self, stage: Stage, total: usize);

    fn advanced(&self, succeeded: bool);

    fn finished(&self) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn started(&self, _stage: Stage, _total: usize) {}

    fn advanced(&self, _succeeded: bool) {}
}
