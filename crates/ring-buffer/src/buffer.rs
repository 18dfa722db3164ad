//! Ring Buffer Implementation

use std::collections::VecDeque;

/// Capped FIFO buffer holding the most recent `capacity` items
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
    /// Items, oldest at the front
    items: VecDeque<T>,
    /// Maximum number of retained items (at least 1)
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new buffer; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild a buffer from stored items, keeping only the newest `capacity`
    pub fn from_items(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        let mut buffer = Self::new(capacity);
        for item in items {
            buffer.push(item);
        }
        buffer
    }

    /// Push an item, evicting the oldest one if the buffer is full
    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recent item
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Items oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Adjacent (older, newer) pairs, oldest pair first
    pub fn pairs(&self) -> impl Iterator<Item = (&T, &T)> {
        self.items.iter().zip(self.items.iter().skip(1))
    }
}

impl<T: Clone> RingBuffer<T> {
    /// All items, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
