// src/persistence/memory.rs
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;

use super::ChunkPersistence;
use crate::error::Result;
use crate::streaming::chunk::{ReducedChunk, VoxelBuffer};
use crate::streaming::types::ChunkKey;
use crate::world::changes::ChangeList;
use crate::world::map::{MapFragment, MapKey};

/// In-process store. Keeps edits and changed reduced chunks; counts every save call.
#[derive(Default)]
pub struct MemoryPersistence {
    chunks: Mutex<HashMap<ChunkKey, ChangeList>>,
    reduced: Mutex<HashMap<ChunkKey, VoxelBuffer>>,
    map_saves: Mutex<Vec<MapKey>>,
    entities: Mutex<HashMap<ChunkKey, Vec<u64>>>,

    chunk_saves: AtomicUsize,
    reduced_saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_saves(&self) -> usize {
        self.chunk_saves.load(Ordering::SeqCst)
    }

    pub fn reduced_saves(&self) -> usize {
        self.reduced_saves.load(Ordering::SeqCst)
    }

    pub fn map_fragment_saves(&self) -> Vec<MapKey> {
        self.map_saves.lock().clone()
    }

    pub fn stored_changes(&self, key: ChunkKey) -> Option<ChangeList> {
        self.chunks.lock().get(&key).cloned()
    }

    pub fn stored_reduced(&self, key: ChunkKey) -> Option<VoxelBuffer> {
        self.reduced.lock().get(&key).cloned()
    }

    pub fn stored_entities(&self, key: ChunkKey) -> Option<Vec<u64>> {
        self.entities.lock().get(&key).cloned()
    }
}

impl ChunkPersistence for MemoryPersistence {
    fn save_chunk(&self, key: ChunkKey, changes: &ChangeList) -> Result<()> {
        self.chunk_saves.fetch_add(1, Ordering::SeqCst);
        let mut chunks = self.chunks.lock();
        if changes.is_empty() {
            chunks.remove(&key);
        } else {
            chunks.insert(key, changes.clone());
        }
        Ok(())
    }

    fn load_chunk_changes(&self, key: ChunkKey) -> Result<ChangeList> {
        Ok(self.chunks.lock().get(&key).cloned().unwrap_or_default())
    }

    fn save_map_fragment(&self, fragment: &MapFragment) -> Result<()> {
        self.map_saves.lock().push(fragment.key);
        Ok(())
    }

    fn save_reduced_chunk(&self, chunk: &ReducedChunk) -> Result<()> {
        self.reduced_saves.fetch_add(1, Ordering::SeqCst);
        if chunk.is_changed() {
            self.reduced.lock().insert(chunk.key(), chunk.cells().clone());
        }
        Ok(())
    }

    fn load_reduced_chunk(&self, key: ChunkKey) -> Result<Option<VoxelBuffer>> {
        Ok(self.reduced.lock().get(&key).cloned())
    }

    fn save_entities(&self, key: ChunkKey, entities: &[u64]) -> Result<()> {
        self.entities.lock().insert(key, entities.to_vec());
        Ok(())
    }
}
