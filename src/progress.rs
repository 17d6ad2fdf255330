//! Progress reporting and cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stops a bake between samples. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag. The bake notices it at its next check, not immediately.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }
}

/// Bake stage a progress update belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressStage {
    Collecting,
    DataCache,
    Integrating,
    PostProcess,
    Dilation,
    Writing,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProgressStage::Collecting => "Collecting meshes",
            ProgressStage::DataCache => "Rendering data caches",
            ProgressStage::Integrating => "Rendering samples",
            ProgressStage::PostProcess => "Post-processing",
            ProgressStage::Dilation => "Dilating",
            ProgressStage::Writing => "Writing textures",
        })
    }
}

/// One progress report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Bake title, e.g. "Baking Bent Normal Map".
    pub title: &'static str,
    pub stage: ProgressStage,
    pub done: u32,
    pub total: u32,
}

impl ProgressUpdate {
    /// Completed fraction of the current stage in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 { 1.0 } else { (self.done as f32 / self.total as f32).min(1.0) }
    }
}

/// Receives progress from a running bake.
pub trait Progress {
    fn report(&mut self, update: &ProgressUpdate);
}

impl<F: FnMut(&ProgressUpdate)> Progress for F {
    fn report(&mut self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Discards every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _update: &ProgressUpdate) {}
}
