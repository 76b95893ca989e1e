//! Bounded SPSC chunk queue with drop-oldest overflow.
//!
//! `enqueue_chunk` takes only this queue's own lock — never the
//! scheduler's `state_lock` — so the network/decode context never blocks
//! on the audio tick and vice versa.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::protocol::constants::DEFAULT_CHUNK_QUEUE_CAPACITY;

/// One decoded chunk of audio waiting to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkQueueEntry {
    pub target_server_us: i64,
    pub pcm: Vec<i16>,
    pub frame_count: u32,
    pub stream_generation: u64,
}

/// Bounded FIFO; pushing past capacity drops the oldest entry rather than
/// blocking the producer or growing unbounded.
pub struct ChunkQueue {
    inner: Mutex<VecDeque<ChunkQueueEntry>>,
    capacity: usize,
    dropped: std::sync::atomic::AtomicU64,
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHUNK_QUEUE_CAPACITY)
    }

    /// Pushes a chunk, dropping the oldest queued chunk if at capacity.
    /// Returns `true` if an existing entry was dropped to make room.
    pub fn push(&self, entry: ChunkQueueEntry) -> bool {
        let mut queue = self.inner.lock();
        let mut dropped = false;
        if queue.len() >= self.capacity {
            queue.pop_front();
            dropped = true;
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        queue.push_back(entry);
        dropped
    }

    /// Removes and returns the front entry, if any.
    pub fn pop_front(&self) -> Option<ChunkQueueEntry> {
        self.inner.lock().pop_front()
    }

    /// Peeks the front entry without removing it.
    pub fn peek_front(&self) -> Option<ChunkQueueEntry> {
        self.inner.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued entry (used on flush/stop).
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target_server_us: i64) -> ChunkQueueEntry {
        ChunkQueueEntry {
            target_server_us,
            pcm: vec![0; 10],
            frame_count: 10,
            stream_generation: 1,
        }
    }

    #[test]
    fn fifo_ordering_preserved() {
        let q = ChunkQueue::new(4);
        q.push(entry(1));
        q.push(entry(2));
        q.push(entry(3));
        assert_eq!(q.pop_front().unwrap().target_server_us, 1);
        assert_eq!(q.pop_front().unwrap().target_server_us, 2);
        assert_eq!(q.pop_front().unwrap().target_server_us, 3);
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn overflow_drops_oldest() {
        let q = ChunkQueue::new(2);
        q.push(entry(1));
        q.push(entry(2));
        let dropped = q.push(entry(3));
        assert!(dropped);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().unwrap().target_server_us, 2);
        assert_eq!(q.pop_front().unwrap().target_server_us, 3);
        assert_eq!(q.dropped_count(), 1);
    }

    #[test]
    fn clear_empties_queue() {
        let q = ChunkQueue::new(4);
        q.push(entry(1));
        q.push(entry(2));
        q.clear();
        assert!(q.is_empty());
    }
}
