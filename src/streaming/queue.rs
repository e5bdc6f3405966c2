// src/streaming/queue.rs
//
// Blocking max-heap of chunk requests shared by the dispatcher and the generation workers.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet as HashSet;

use super::types::{ChunkRequest, RequestId};

struct QueueEntry {
    priority: f32,
    // Insertion sequence; lower wins among equal priorities.
    seq: u64,
    request: ChunkRequest,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    queued: HashSet<RequestId>,
    next_seq: u64,
    waiting: usize,
    shutdown: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                queued: HashSet::default(),
                next_seq: 0,
                waiting: 0,
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Returns false if an entry with the same id is already queued or the queue is shut down.
    pub fn add(&self, request: ChunkRequest, priority: f32) -> bool {
        let mut st = self.state.lock();
        if st.shutdown || !st.queued.insert(request.id()) {
            return false;
        }
        let seq = st.next_seq;
        st.next_seq += 1;
        st.heap.push(QueueEntry { priority, seq, request });
        drop(st);
        self.ready.notify_one();
        true
    }

    /// Cancels a pending request. No-op if a worker already took it.
    pub fn remove(&self, id: &RequestId) -> bool {
        let mut st = self.state.lock();
        if !st.queued.remove(id) {
            return false;
        }
        st.heap.retain(|e| e.request.id() != *id);
        true
    }

    /// Blocks until a request is available. `None` once the queue is shut down.
    pub fn extract_max(&self) -> Option<ChunkRequest> {
        let mut st = self.state.lock();
        loop {
            if st.shutdown {
                return None;
            }
            if let Some(entry) = st.heap.pop() {
                st.queued.remove(&entry.request.id());
                return Some(entry.request);
            }
            st.waiting += 1;
            self.ready.wait(&mut st);
            st.waiting -= 1;
        }
    }

    /// Non-blocking variant of [`extract_max`](Self::extract_max).
    pub fn try_extract_max(&self) -> Option<ChunkRequest> {
        let mut st = self.state.lock();
        let entry = st.heap.pop()?;
        st.queued.remove(&entry.request.id());
        Some(entry.request)
    }

    /// Re-scores every pending entry and rebuilds the heap: O(n) per call.
    ///
    /// Workers call this after each job so that queued priorities track the observer
    /// while it moves.
    pub fn update_priority(&self, mut score: impl FnMut(&ChunkRequest) -> f32) {
        let mut st = self.state.lock();
        if st.heap.is_empty() {
            return;
        }
        let mut entries = std::mem::take(&mut st.heap).into_vec();
        for e in entries.iter_mut() {
            e.priority = score(&e.request);
        }
        st.heap = BinaryHeap::from(entries);
    }

    /// Pending requests in no particular order.
    pub fn to_array(&self) -> Vec<ChunkRequest> {
        self.state.lock().heap.iter().map(|e| e.request.clone()).collect()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.state.lock().queued.contains(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of workers currently parked in `extract_max`.
    pub fn waiting_workers(&self) -> usize {
        self.state.lock().waiting
    }

    /// Pending and idle in one lock acquisition.
    pub fn idle_snapshot(&self) -> (usize, usize) {
        let st = self.state.lock();
        (st.heap.len(), st.waiting)
    }

    /// Drops every pending request and returns them.
    pub fn clear(&self) -> Vec<ChunkRequest> {
        let mut st = self.state.lock();
        st.queued.clear();
        std::mem::take(&mut st.heap).into_iter().map(|e| e.request).collect()
    }

    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.ready.notify_all();
    }
}
