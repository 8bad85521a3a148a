use crate::error::Result;
use crate::pool::Poolable;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Stand-in for a worker process that records its lifecycle.
#[derive(Debug)]
pub(crate) struct FakeResource {
    pub id: usize,
    exited: Arc<AtomicBool>,
    destroyed: Arc<AtomicUsize>,
}

impl FakeResource {
    /// Handle that marks this resource as exited, like a crashed process.
    pub fn exit_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exited)
    }
}

impl Poolable for FakeResource {
    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn destroy(self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates [`FakeResource`]s and counts constructions and destructions.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tracker {
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Result<FakeResource> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeResource {
            id,
            exited: Arc::new(AtomicBool::new(false)),
            destroyed: Arc::clone(&self.destroyed),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}
