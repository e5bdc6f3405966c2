// src/persistence/save_queue.rs
//
// Fire-and-forget saves on a dedicated thread. Callers never wait for I/O unless they
// explicitly `flush`. Edits sent but not yet written stay readable through the handle.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{error, info, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;

use super::ChunkPersistence;
use crate::error::Result;
use crate::streaming::chunk::ReducedChunk;
use crate::streaming::types::ChunkKey;
use crate::world::changes::ChangeList;
use crate::world::map::MapFragment;

pub enum SaveJob {
    Chunk { key: ChunkKey, changes: ChangeList, seq: u64 },
    MapFragment(Arc<MapFragment>),
    /// `seq` is set when the chunk carries edits and sits in the pending overlay.
    ReducedChunk { chunk: Arc<ReducedChunk>, seq: Option<u64> },
    Entities { key: ChunkKey, entities: Vec<u64> },
    Flush(Sender<()>),
    /// Stops the thread after everything queued before it.
    Shutdown,
}

#[derive(Default)]
struct SaveCounters {
    done: AtomicU64,
    failed: AtomicU64,
}

/// Latest edited data per key that has been queued but not written yet. An entry leaves
/// only when the write carrying its own `seq` is done, so a miss means the backend is current.
#[derive(Default)]
struct PendingWrites {
    next_seq: AtomicU64,
    chunks: Mutex<HashMap<ChunkKey, (u64, ChangeList)>>,
    reduced: Mutex<HashMap<ChunkKey, (u64, Arc<ReducedChunk>)>>,
}

impl PendingWrites {
    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn settle<V>(map: &Mutex<HashMap<ChunkKey, (u64, V)>>, key: ChunkKey, seq: u64) {
        let mut map = map.lock();
        if map.get(&key).is_some_and(|(s, _)| *s == seq) {
            map.remove(&key);
        }
    }
}

/// Cheap cloneable sender side.
#[derive(Clone)]
pub struct SaveHandle {
    tx: Sender<SaveJob>,
    counters: Arc<SaveCounters>,
    pending: Arc<PendingWrites>,
}

impl SaveHandle {
    fn send(&self, job: SaveJob) -> bool {
        if self.tx.send(job).is_err() {
            warn!("save queue is closed; dropping save");
            return false;
        }
        true
    }

    pub fn save_chunk(&self, key: ChunkKey, changes: ChangeList) {
        // Held across the send so channel order matches seq order.
        let mut chunks = self.pending.chunks.lock();
        let seq = self.pending.seq();
        chunks.insert(key, (seq, changes.clone()));
        if !self.send(SaveJob::Chunk { key, changes, seq }) {
            chunks.remove(&key);
        }
    }

    pub fn save_map_fragment(&self, fragment: Arc<MapFragment>) {
        self.send(SaveJob::MapFragment(fragment));
    }

    pub fn save_reduced_chunk(&self, chunk: Arc<ReducedChunk>) {
        if !chunk.is_changed() {
            self.send(SaveJob::ReducedChunk { chunk, seq: None });
            return;
        }
        let key = chunk.key();
        let mut reduced = self.pending.reduced.lock();
        let seq = self.pending.seq();
        reduced.insert(key, (seq, chunk.clone()));
        if !self.send(SaveJob::ReducedChunk { chunk, seq: Some(seq) }) {
            reduced.remove(&key);
        }
    }

    /// Change list of `key` still on its way to the backend.
    pub fn pending_changes(&self, key: ChunkKey) -> Option<ChangeList> {
        self.pending.chunks.lock().get(&key).map(|(_, c)| c.clone())
    }

    /// Edited reduced chunk of `key` still on its way to the backend.
    pub fn pending_reduced(&self, key: ChunkKey) -> Option<Arc<ReducedChunk>> {
        self.pending.reduced.lock().get(&key).map(|(_, c)| c.clone())
    }

    pub fn save_entities(&self, key: ChunkKey, entities: Vec<u64>) {
        self.send(SaveJob::Entities { key, entities });
    }

    /// Blocks until every save sent before this call has been handled.
    /// Returns false if the save thread is gone.
    pub fn flush(&self) -> bool {
        let (tx, rx) = bounded(1);
        if self.tx.send(SaveJob::Flush(tx)).is_err() {
            return false;
        }
        rx.recv().is_ok()
    }

    /// Saves queued behind the one being written.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }

    pub fn completed(&self) -> u64 {
        self.counters.done.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

pub struct SaveQueue {
    handle: Option<SaveHandle>,
    thread: Option<JoinHandle<()>>,
}

impl SaveQueue {
    pub fn spawn(persistence: Arc<dyn ChunkPersistence>) -> Result<Self> {
        let (tx, rx) = unbounded::<SaveJob>();
        let counters = Arc::new(SaveCounters::default());
        let pending = Arc::new(PendingWrites::default());
        let worker_counters = counters.clone();
        let worker_pending = pending.clone();
        let thread = thread::Builder::new()
            .name("chunk-save".into())
            .spawn(move || worker_loop(persistence, rx, worker_counters, worker_pending))?;
        Ok(Self { handle: Some(SaveHandle { tx, counters, pending }), thread: Some(thread) })
    }

    /// Handle for enqueuing saves. `None` after shutdown.
    pub fn handle(&self) -> Option<SaveHandle> {
        self.handle.clone()
    }

    /// Drains outstanding saves and joins the thread. Saves sent through surviving handles
    /// afterwards are dropped with a warning.
    pub fn shutdown(&mut self) {
        if let Some(h) = self.handle.take() {
            h.send(SaveJob::Shutdown);
        }
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!("save thread panicked");
            }
        }
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    persistence: Arc<dyn ChunkPersistence>,
    rx: Receiver<SaveJob>,
    counters: Arc<SaveCounters>,
    pending: Arc<PendingWrites>,
) {
    info!("save thread started");
    while let Ok(job) = rx.recv() {
        // A failed write also settles its entry; the error is logged and counted below.
        let (what, res) = match job {
            SaveJob::Chunk { key, changes, seq } => {
                let res = persistence.save_chunk(key, &changes);
                PendingWrites::settle(&pending.chunks, key, seq);
                (key.to_string(), res)
            }
            SaveJob::MapFragment(f) => (format!("map fragment {:?}", f.key), persistence.save_map_fragment(&f)),
            SaveJob::ReducedChunk { chunk, seq } => {
                let res = persistence.save_reduced_chunk(&chunk);
                if let Some(seq) = seq {
                    PendingWrites::settle(&pending.reduced, chunk.key(), seq);
                }
                (format!("reduced {}", chunk.key()), res)
            }
            SaveJob::Entities { key, entities } => {
                (format!("entities of {key}"), persistence.save_entities(key, &entities))
            }
            SaveJob::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
            SaveJob::Shutdown => break,
        };
        match res {
            Ok(()) => {
                counters.done.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("could not save {what}: {e}");
            }
        }
    }
    info!("save thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use crate::streaming::chunk::VoxelBuffer;
    use crate::world::materials::{AIR, DIRT, STONE};

    /// Writes one chunk change list per token received on `go`, reporting each on `done`.
    struct GatedStore {
        inner: MemoryPersistence,
        go: Receiver<()>,
        done: Sender<()>,
    }

    impl ChunkPersistence for GatedStore {
        fn save_chunk(&self, key: ChunkKey, changes: &ChangeList) -> Result<()> {
            let _ = self.go.recv();
            let res = self.inner.save_chunk(key, changes);
            let _ = self.done.send(());
            res
        }
        fn load_chunk_changes(&self, key: ChunkKey) -> Result<ChangeList> {
            self.inner.load_chunk_changes(key)
        }
        fn save_map_fragment(&self, fragment: &MapFragment) -> Result<()> {
            self.inner.save_map_fragment(fragment)
        }
        fn save_reduced_chunk(&self, chunk: &ReducedChunk) -> Result<()> {
            self.inner.save_reduced_chunk(chunk)
        }
        fn load_reduced_chunk(&self, key: ChunkKey) -> Result<Option<VoxelBuffer>> {
            self.inner.load_reduced_chunk(key)
        }
    }

    fn edit(index: u32, block: u32) -> ChangeList {
        let mut changes = ChangeList::new();
        changes.record(index, AIR, block);
        changes
    }

    #[test]
    fn flush_waits_for_earlier_saves() {
        let store = Arc::new(MemoryPersistence::new());
        let mut queue = SaveQueue::spawn(store.clone()).unwrap();
        let h = queue.handle().unwrap();

        let key = ChunkKey::new(0, 0, 0, 1);
        let mut changes = ChangeList::new();
        changes.record(1, AIR, STONE);
        h.save_chunk(key, changes.clone());
        assert!(h.flush());
        assert_eq!(store.stored_changes(key), Some(changes));
        assert_eq!(h.completed(), 1);

        drop(h);
        queue.shutdown();
        assert!(queue.handle().is_none());
    }

    #[test]
    fn queued_edits_stay_readable_until_written() {
        let (go_tx, go_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();
        let store = Arc::new(GatedStore { inner: MemoryPersistence::new(), go: go_rx, done: done_tx });
        let mut queue = SaveQueue::spawn(store.clone()).unwrap();
        let h = queue.handle().unwrap();
        let key = ChunkKey::new(0, 0, 0, 1);

        h.save_chunk(key, edit(1, STONE));
        h.save_chunk(key, edit(2, DIRT));
        assert!(store.inner.stored_changes(key).is_none());
        assert_eq!(h.pending_changes(key), Some(edit(2, DIRT)));

        // The older write lands; the newer list is still the one to read.
        go_tx.send(()).unwrap();
        done_rx.recv().unwrap();
        assert_eq!(store.inner.stored_changes(key), Some(edit(1, STONE)));
        assert_eq!(h.pending_changes(key), Some(edit(2, DIRT)));

        go_tx.send(()).unwrap();
        assert!(h.flush());
        assert_eq!(h.pending_changes(key), None);
        assert_eq!(store.inner.stored_changes(key), Some(edit(2, DIRT)));
        assert_eq!(h.backlog(), 0);

        drop(h);
        queue.shutdown();
    }

    #[test]
    fn only_edited_reduced_chunks_are_held_back() {
        let store = Arc::new(MemoryPersistence::new());
        let mut queue = SaveQueue::spawn(store.clone()).unwrap();
        let h = queue.handle().unwrap();
        let edited = ChunkKey::new(0, 0, 0, 2);
        let clean = ChunkKey::new(64, 0, 0, 2);

        h.save_reduced_chunk(Arc::new(ReducedChunk::new(clean, VoxelBuffer::filled(STONE), false)));
        assert!(h.pending_reduced(clean).is_none());

        h.save_reduced_chunk(Arc::new(ReducedChunk::new(edited, VoxelBuffer::filled(DIRT), true)));
        assert!(h.flush());
        assert!(h.pending_reduced(edited).is_none());
        assert_eq!(store.stored_reduced(edited).map(|v| v.get(0, 0, 0)), Some(DIRT));
        assert!(store.stored_reduced(clean).is_none());

        drop(h);
        queue.shutdown();
    }
}
