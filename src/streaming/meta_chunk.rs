// src/streaming/meta_chunk.rs
//
// Resident normal chunks, grouped 16x16x16 per MetaChunk. MetaChunks are created on first
// insert and dropped when their last slot empties.
use std::sync::Arc;

use glam::IVec3;
use rustc_hash::FxHashMap as HashMap;

use crate::config::{CHUNK_SHIFT, META_CHUNK_SHIFT, META_CHUNK_VOLUME};
use crate::streaming::chunk::NormalChunk;
use crate::streaming::types::{ChunkKey, RequestTicket};

pub struct ChunkSlot {
    pub chunk: Arc<NormalChunk>,
    pub ticket: Arc<RequestTicket>,
}

/// Entity ids living in one normal chunk.
#[derive(Debug, Default)]
pub struct ChunkEntityManager {
    entities: Vec<u64>,
    dirty: bool,
}

impl ChunkEntityManager {
    pub fn add(&mut self, id: u64) {
        if !self.entities.contains(&id) {
            self.entities.push(id);
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entities.len();
        self.entities.retain(|&e| e != id);
        let removed = self.entities.len() != before;
        self.dirty |= removed;
        removed
    }

    pub fn entities(&self) -> &[u64] {
        &self.entities
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn into_entities(self) -> Vec<u64> {
        self.entities
    }
}

pub struct MetaChunk {
    slots: Box<[Option<ChunkSlot>]>,
    entity_slots: Box<[Option<ChunkEntityManager>]>,
    occupied: usize,
}

impl MetaChunk {
    fn new() -> Self {
        Self {
            slots: (0..META_CHUNK_VOLUME).map(|_| None).collect(),
            entity_slots: (0..META_CHUNK_VOLUME).map(|_| None).collect(),
            occupied: 0,
        }
    }

    /// Slot of a voxel-size-1 key inside its MetaChunk.
    #[inline]
    pub fn slot_index(key: &ChunkKey) -> usize {
        let m = (1 << META_CHUNK_SHIFT) - 1;
        let x = ((key.wx >> CHUNK_SHIFT) & m) as usize;
        let y = ((key.wy >> CHUNK_SHIFT) & m) as usize;
        let z = ((key.wz >> CHUNK_SHIFT) & m) as usize;
        (x << 4) | (y << 8) | z
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }
}

#[inline]
fn meta_coord(key: &ChunkKey) -> IVec3 {
    let s = (CHUNK_SHIFT + META_CHUNK_SHIFT) as i32;
    IVec3::new(key.wx >> s, key.wy >> s, key.wz >> s)
}

#[derive(Default)]
pub struct MetaChunkStore {
    metas: HashMap<IVec3, MetaChunk>,
    chunks: usize,
}

impl MetaChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&ChunkSlot> {
        self.metas.get(&meta_coord(key))?.slots[MetaChunk::slot_index(key)].as_ref()
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.get(key).is_some()
    }

    /// Fills an empty slot. Returns false (and drops nothing) if the slot is taken.
    pub fn insert(&mut self, key: ChunkKey, slot: ChunkSlot, with_entities: bool) -> bool {
        let meta = self.metas.entry(meta_coord(&key)).or_insert_with(MetaChunk::new);
        let i = MetaChunk::slot_index(&key);
        if meta.slots[i].is_some() {
            return false;
        }
        meta.slots[i] = Some(slot);
        if with_entities {
            meta.entity_slots[i] = Some(ChunkEntityManager::default());
        }
        meta.occupied += 1;
        self.chunks += 1;
        true
    }

    /// Empties the slot of `key`, dropping the MetaChunk if it was the last one.
    pub fn remove(&mut self, key: &ChunkKey) -> Option<(ChunkSlot, Option<ChunkEntityManager>)> {
        let coord = meta_coord(key);
        let meta = self.metas.get_mut(&coord)?;
        let i = MetaChunk::slot_index(key);
        let slot = meta.slots[i].take()?;
        let entities = meta.entity_slots[i].take();
        meta.occupied -= 1;
        self.chunks -= 1;
        if meta.is_empty() {
            self.metas.remove(&coord);
        }
        Some((slot, entities))
    }

    pub fn entity_manager(&self, key: &ChunkKey) -> Option<&ChunkEntityManager> {
        self.metas.get(&meta_coord(key))?.entity_slots[MetaChunk::slot_index(key)].as_ref()
    }

    pub fn entity_manager_mut(&mut self, key: &ChunkKey) -> Option<&mut ChunkEntityManager> {
        self.metas.get_mut(&meta_coord(key))?.entity_slots[MetaChunk::slot_index(key)].as_mut()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Arc<NormalChunk>> {
        self.metas.values().flat_map(|m| m.slots.iter().flatten().map(|s| &s.chunk))
    }

    pub fn meta_count(&self) -> usize {
        self.metas.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(key: ChunkKey) -> ChunkSlot {
        ChunkSlot { chunk: Arc::new(NormalChunk::new(key)), ticket: RequestTicket::new() }
    }

    #[test]
    fn metachunk_lifecycle() {
        let mut store = MetaChunkStore::new();
        let a = ChunkKey::new(0, 0, 0, 1);
        let b = ChunkKey::new(32, 0, 0, 1);
        let far = ChunkKey::new(-32, 0, 0, 1);

        assert!(store.insert(a, slot(a), true));
        assert!(store.insert(b, slot(b), false));
        assert!(!store.insert(a, slot(a), false));
        assert!(store.insert(far, slot(far), false));
        assert_eq!(store.meta_count(), 2);
        assert_eq!(store.chunk_count(), 3);

        store.entity_manager_mut(&a).unwrap().add(99);
        let (_, ents) = store.remove(&a).unwrap();
        assert_eq!(ents.unwrap().entities(), &[99]);
        assert!(store.entity_manager_mut(&b).is_none());

        store.remove(&b).unwrap();
        assert_eq!(store.meta_count(), 1);
        store.remove(&far).unwrap();
        assert_eq!(store.meta_count(), 0);
        assert!(store.remove(&far).is_none());
    }

    #[test]
    fn slot_index_is_unique_within_metachunk() {
        let mut seen = std::collections::HashSet::new();
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let k = ChunkKey::new(x * 32, y * 32, z * 32, 1);
                    assert!(seen.insert(MetaChunk::slot_index(&k)));
                }
            }
        }
        let neg = ChunkKey::new(-32, -32, -32, 1);
        assert_eq!(MetaChunk::slot_index(&neg), (15 << 4) | (15 << 8) | 15);
    }
}
