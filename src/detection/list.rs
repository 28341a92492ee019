//! Bounded defect collection.

use crate::detection::Defect;
use crate::error::InspectError;

/// Result of [`DefectList::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The defect was stored.
    Stored,
    /// The list is full; the defect was dropped.
    Saturated,
}

/// Defect list that never grows past its capacity. Once full, further pushes
/// are counted and discarded; detection keeps running.
#[derive(Debug, Clone, PartialEq)]
pub struct DefectList {
    items: Vec<Defect>,
    capacity: usize,
    dropped: usize,
}

impl DefectList {
    /// Empty list holding at most `capacity` defects.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append if there is room.
    pub fn push(&mut self, defect: Defect) -> PushOutcome {
        if self.items.len() < self.capacity {
            self.items.push(defect);
            PushOutcome::Stored
        } else {
            self.dropped += 1;
            PushOutcome::Saturated
        }
    }

    /// Stored defects, in insertion order.
    pub fn as_slice(&self) -> &[Defect] {
        &self.items
    }

    /// Number stored.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Nothing stored.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number stored.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity reached.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Defects discarded after saturation.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// `CapacityExceeded` describing the overflow, if any occurred.
    pub fn overflow(&self) -> Option<InspectError> {
        (self.dropped > 0).then_some(InspectError::CapacityExceeded {
            capacity: self.capacity,
            dropped: self.dropped,
        })
    }

    /// Take the stored defects.
    pub fn into_vec(self) -> Vec<Defect> {
        self.items
    }
}
