//! Leaf and aggregate completion counters

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use super::CompletionCell;
use crate::{PipelineError, Result};

#[derive(Debug)]
enum Kind {
    Leaf { processed: AtomicUsize, finalized: Arc<CompletionCell<usize>> },
    Aggregate { children: RwLock<Vec<Arc<CompletionCounter>>> },
}

/// Progress counter whose final value can be awaited
///
/// A leaf is incremented by its single owner and finalized once. An aggregate
/// has no count of its own: it sums its children, and its blocking reads wait
/// until every leaf beneath it has been finalized.
#[derive(Debug)]
pub struct CompletionCounter {
    kind: Kind,
}

impl CompletionCounter {
    pub fn leaf() -> Self {
        Self { kind: Kind::Leaf { processed: AtomicUsize::new(0), finalized: Arc::new(CompletionCell::new()) } }
    }

    pub fn aggregate<I>(children: I) -> Self
    where
        I: IntoIterator<Item = Arc<CompletionCounter>>,
    {
        Self { kind: Kind::Aggregate { children: RwLock::new(children.into_iter().collect()) } }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, Kind::Aggregate { .. })
    }

    /// Attach another counter to an aggregate
    ///
    /// Fails if `self` is `child` or lies somewhere beneath it.
    pub fn add_child(&self, child: Arc<CompletionCounter>) -> Result<()> {
        match &self.kind {
            Kind::Aggregate { children } => {
                if child.reaches(self) {
                    return Err(PipelineError::invalid_configuration("counter cannot be its own descendant"));
                }
                children.write().push(child);
                Ok(())
            }
            Kind::Leaf { .. } => Err(unsupported("add_child", "leaf counter")),
        }
    }

    /// Count one processed item
    ///
    /// Increments after `finalize` still show in `read_now` but never change
    /// the finalized value.
    pub fn increment(&self) -> Result<()> {
        match &self.kind {
            Kind::Leaf { processed, .. } => {
                processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Kind::Aggregate { .. } => Err(unsupported("increment", "aggregate counter")),
        }
    }

    /// Publish the current count as final and return it
    pub fn finalize(&self) -> Result<usize> {
        match &self.kind {
            Kind::Leaf { processed, finalized } => {
                let value = processed.load(Ordering::Acquire);
                finalized.set(value)?;
                debug!(value, "Counter finalized");
                Ok(value)
            }
            Kind::Aggregate { .. } => Err(unsupported("finalize", "aggregate counter")),
        }
    }

    /// Current count without waiting
    pub fn read_now(&self) -> usize {
        match &self.kind {
            Kind::Leaf { processed, .. } => processed.load(Ordering::Acquire),
            Kind::Aggregate { children } => children.read().iter().map(|child| child.read_now()).sum(),
        }
    }

    /// Final count, waiting for every leaf to be finalized
    pub fn read_blocking(&self) -> usize {
        self.final_cells().iter().map(|leaf| leaf.wait()).sum()
    }

    /// Like [`read_blocking`](Self::read_blocking) with one deadline for the
    /// whole tree
    pub fn read_blocking_timeout(&self, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        self.final_cells().iter().map(|leaf| leaf.wait_deadline(deadline, timeout)).sum()
    }

    /// Final count, awaited from async code
    pub async fn read_async(&self) -> usize {
        let mut total = 0;
        for leaf in self.final_cells() {
            total += leaf.wait_async().await;
        }
        total
    }

    /// Whether `target` is this counter or one beneath it
    fn reaches(&self, target: &CompletionCounter) -> bool {
        if std::ptr::eq(self, target) {
            return true;
        }
        let mut pending = match &self.kind {
            Kind::Aggregate { children } => children.read().clone(),
            Kind::Leaf { .. } => return false,
        };
        while let Some(counter) = pending.pop() {
            if std::ptr::eq(Arc::as_ptr(&counter), target) {
                return true;
            }
            if let Kind::Aggregate { children } = &counter.kind {
                pending.extend(children.read().iter().cloned());
            }
        }
        false
    }

    /// Finalized cells of every leaf under this counter, children snapshotted now
    fn final_cells(&self) -> Vec<Arc<CompletionCell<usize>>> {
        let mut cells = Vec::new();
        match &self.kind {
            Kind::Leaf { finalized, .. } => cells.push(Arc::clone(finalized)),
            Kind::Aggregate { children } => {
                let mut pending: Vec<Arc<CompletionCounter>> = children.read().clone();
                while let Some(counter) = pending.pop() {
                    match &counter.kind {
                        Kind::Leaf { finalized, .. } => cells.push(Arc::clone(finalized)),
                        Kind::Aggregate { children } => pending.extend(children.read().iter().cloned()),
                    }
                }
            }
        }
        cells
    }
}

fn unsupported(operation: &'static str, target: &'static str) -> PipelineError {
    PipelineError::UnsupportedOperation { operation, target }
}
