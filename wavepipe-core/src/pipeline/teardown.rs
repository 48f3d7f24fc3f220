//! Teardown coordination for pipeline stages.
//!
//! Every stage constructed by the pipeline registers a release handle here.
//! Whatever ends the chain first (a source error, a transcoder failure, the
//! consumer dropping the returned stream) calls [`Teardown::release_all`],
//! which releases stages upstream-first so no stage keeps writing into an
//! already-destroyed sink. Release is idempotent; a stage registered after
//! the chain was released is released on the spot.

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

/// A live stage's release handle.
///
/// Releasing must be synchronous and infallible: it is called from drop
/// paths and from inside pipeline tasks.
pub(crate) trait Stage: Send {
    fn label(&self) -> &'static str;
    fn release(&mut self);
}

/// Releases a stage by aborting the task driving it.
pub(crate) struct TaskStage {
    label: &'static str,
    handle: AbortHandle,
}

impl TaskStage {
    pub(crate) fn new(label: &'static str, handle: AbortHandle) -> Self {
        Self { label, handle }
    }
}

impl Stage for TaskStage {
    fn label(&self) -> &'static str {
        self.label
    }

    fn release(&mut self) {
        self.handle.abort();
    }
}

struct Inner {
    stages: Vec<Box<dyn Stage>>,
    released: bool,
}

/// Coordinator owning the release order of a single pipeline chain.
pub(crate) struct Teardown {
    inner: Mutex<Inner>,
}

impl Teardown {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                stages: Vec::new(),
                released: false,
            }),
        }
    }

    /// Registers a stage. Stages must be registered in upstream-to-downstream
    /// order; release walks the registry in the same order.
    pub(crate) fn register(&self, mut stage: Box<dyn Stage>) {
        let mut inner = self.inner.lock();
        if inner.released {
            debug!("registering {} on a released chain", stage.label());
            stage.release();
            return;
        }
        inner.stages.push(stage);
    }

    /// Releases every registered stage, upstream-first. Safe to call from any
    /// exit path, any number of times.
    pub(crate) fn release_all(&self) {
        let stages = {
            let mut inner = self.inner.lock();
            inner.released = true;
            std::mem::take(&mut inner.stages)
        };
        for mut stage in stages {
            debug!("releasing stage {}", stage.label());
            stage.release();
        }
    }
}
