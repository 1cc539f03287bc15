use std::collections::BTreeMap;

/// Holds items that completed ahead of their turn and releases them strictly
/// in ascending, contiguous index order starting at 0.
pub struct OrderedBuffer<T> {
    // index -> item
    buffer: BTreeMap<usize, T>,
    next_index: usize,
}

impl<T> OrderedBuffer<T> {
    pub fn new() -> Self {
        Self {
            buffer: BTreeMap::new(),
            next_index: 0,
        }
    }

    /// Index the consumer is waiting for.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Number of items waiting for an earlier index.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Store a completed item. Items behind `next_index` are dropped.
    pub fn insert(&mut self, index: usize, item: T) {
        if index < self.next_index {
            tracing::warn!("Dropped stale item {index}, already emitted.");
            return;
        }
        self.buffer.insert(index, item);
    }

    /// Take the item for `next_index`, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        let index = self.next_index;
        let item = self.buffer.remove(&index)?;
        self.next_index += 1;
        Some((index, item))
    }
}

impl<T> Default for OrderedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
