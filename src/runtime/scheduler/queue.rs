//! Delay queue for the event loop
//!
//! Items become ready at a deadline. Items with the same deadline come out in
//! insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug)]
struct Entry<T> {
    ready_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // 反转比较：BinaryHeap 是大顶堆，最早到期的条目需要排在堆顶
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of items keyed by readiness time.
#[derive(Debug)]
pub struct DelayQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Queue an item that becomes ready at `ready_at`.
    pub fn push(
        &mut self,
        ready_at: Instant,
        item: T,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            ready_at,
            seq,
            item,
        });
    }

    /// Deadline of the earliest item.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.ready_at)
    }

    /// Pop the earliest item if it is ready at `now`.
    pub fn pop_ready(
        &mut self,
        now: Instant,
    ) -> Option<T> {
        if self.next_deadline()? <= now {
            self.heap.pop().map(|e| e.item)
        } else {
            None
        }
    }

    /// Keep only the items matching `keep`. Returns how many were removed.
    pub fn retain<F>(
        &mut self,
        mut keep: F,
    ) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.heap.len();
        self.heap.retain(|e| keep(&e.item));
        before - self.heap.len()
    }

    /// Remove every item, earliest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            items.push(entry.item);
        }
        items
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
