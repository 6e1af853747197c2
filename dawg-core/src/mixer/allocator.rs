use std::collections::{BTreeMap, BTreeSet};

use dawg_types::InsertId;

/// Fixed pool of hardware mixing channels.
///
/// Always hands out the lowest free index, so a released channel is the
/// next one reused.
#[derive(Debug, Clone)]
pub struct ChannelAllocator {
    capacity: usize,
    assigned: BTreeMap<InsertId, u8>,
    used: BTreeSet<u8>,
}

impl ChannelAllocator {
    /// `capacity` is clamped to 256 (channel indices are u8).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(256),
            assigned: BTreeMap::new(),
            used: BTreeSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    pub fn index_of(&self, insert: InsertId) -> Option<u8> {
        self.assigned.get(&insert).copied()
    }

    /// Assign a channel to `insert`. Returns the existing index if it already
    /// has one, or None when the pool is exhausted.
    pub fn allocate(&mut self, insert: InsertId) -> Option<u8> {
        if let Some(index) = self.index_of(insert) {
            return Some(index);
        }
        let index = (0..self.capacity)
            .map(|i| i as u8)
            .find(|i| !self.used.contains(i))?;
        self.used.insert(index);
        self.assigned.insert(insert, index);
        Some(index)
    }

    pub fn release(&mut self, insert: InsertId) -> Option<u8> {
        let index = self.assigned.remove(&insert)?;
        self.used.remove(&index);
        Some(index)
    }
}
