//! Bounded work queue between the traversal producer and the scan workers.
//!
//! One producer, N consumers, FIFO by enqueue completion. Each queued item
//! holds an open file handle, so the capacity is bounded to stay well
//! under the descriptor limit; `enqueue` blocks when the queue is full and
//! `dequeue` blocks while it is empty and still open. The queue is the
//! sole synchronization point for work handoff.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::sync::{Condvar, Mutex, PoisonError};

/// Half of a typical `nofile` soft limit (1024), leaving headroom for the
/// producer's open-ahead plus the standard streams.
pub const DEFAULT_CAPACITY: usize = 512;

/// An open input waiting to be scanned.
#[derive(Debug)]
pub struct WorkItem {
    pub source: FileSource,
    /// Display name for output and diagnostics.
    pub name: String,
    pub metadata: Option<Metadata>,
}

#[derive(Debug)]
pub enum FileSource {
    File(std::fs::File),
    Stdin,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl WorkQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        WorkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends an item, blocking while the queue is at capacity.
    pub fn enqueue(&self, item: WorkItem) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.items.len() >= self.capacity {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Pops the next item, blocking while the queue is empty and not yet
    /// closed. Returns `None` exactly when the queue is empty and closed.
    pub fn dequeue(&self) -> Option<WorkItem> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Marks the end of input and wakes every waiting consumer.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    fn item(name: &str) -> WorkItem {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"data\n").unwrap();
        WorkItem {
            source: FileSource::File(file),
            name: name.to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let q = WorkQueue::with_capacity(8);
        q.enqueue(item("a"));
        q.enqueue(item("b"));
        q.enqueue(item("c"));
        q.close();
        assert_eq!(q.dequeue().unwrap().name, "a");
        assert_eq!(q.dequeue().unwrap().name, "b");
        assert_eq!(q.dequeue().unwrap().name, "c");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_close_wakes_all_consumers() {
        let q = Arc::new(WorkQueue::with_capacity(4));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let q = Arc::clone(&q);
            handles.push(std::thread::spawn(move || q.dequeue().is_none()));
        }
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn test_enqueue_blocks_at_capacity() {
        let q = Arc::new(WorkQueue::with_capacity(1));
        q.enqueue(item("first"));

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                q.enqueue(item("second"));
            })
        };
        // Give the producer a chance to block on the full queue.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(q.dequeue().unwrap().name, "first");
        producer.join().unwrap();
        q.close();
        assert_eq!(q.dequeue().unwrap().name, "second");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_dequeue_after_close_drains_remaining() {
        let q = WorkQueue::with_capacity(8);
        q.enqueue(item("x"));
        q.close();
        assert!(q.dequeue().is_some());
        assert!(q.dequeue().is_none());
        assert!(q.dequeue().is_none());
    }
}
