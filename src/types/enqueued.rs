//! Write queue submission outcomes

use serde::{Deserialize, Serialize};

/// Outcome of [`WriteQueue::enqueue`](crate::WriteQueue::enqueue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Enqueued {
    /// The queue was inactive; the sink ran synchronously and returned this value
    Written(usize),

    /// Accepted; `position` is the packet's rank among pending packets by index
    Queued { position: usize },

    /// Queue full with dropping enabled; the sink will never see this packet
    Dropped,
}

impl Enqueued {
    /// Position or sink result, `None` when dropped
    pub fn position(self) -> Option<usize> {
        match self {
            Enqueued::Written(value) => Some(value),
            Enqueued::Queued { position } => Some(position),
            Enqueued::Dropped => None,
        }
    }

    /// Whether the packet was dropped
    pub fn is_dropped(self) -> bool {
        matches!(self, Enqueued::Dropped)
    }
}
