// src/streaming/chunk.rs
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::config::{CHUNK_SIZE, CHUNK_VOLUME};
use crate::streaming::types::ChunkKey;
use crate::streaming::visibility::ReducedChunkVisibility;
use crate::world::changes::ChangeList;
use crate::world::materials::{block_class, BlockClass, AIR};

#[inline(always)]
pub fn idx_xyz(x: u32, y: u32, z: u32) -> usize {
    (x + y * CHUNK_SIZE + z * CHUNK_SIZE * CHUNK_SIZE) as usize
}

/// Dense CHUNK_SIZE^3 block ids.
#[derive(Clone, PartialEq, Eq)]
pub struct VoxelBuffer {
    cells: Box<[u32]>,
}

impl VoxelBuffer {
    pub fn filled(block: u32) -> Self {
        Self { cells: vec![block; CHUNK_VOLUME].into_boxed_slice() }
    }

    /// Returns `None` unless `cells` has exactly CHUNK_VOLUME entries.
    pub fn from_cells(cells: Vec<u32>) -> Option<Self> {
        (cells.len() == CHUNK_VOLUME).then(|| Self { cells: cells.into_boxed_slice() })
    }

    #[inline(always)]
    pub fn get(&self, x: u32, y: u32, z: u32) -> u32 {
        self.cells[idx_xyz(x, y, z)]
    }

    #[inline(always)]
    pub fn set(&mut self, x: u32, y: u32, z: u32, block: u32) {
        self.cells[idx_xyz(x, y, z)] = block;
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [u32] {
        &mut self.cells
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }
}

impl fmt::Debug for VoxelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let solid = self.cells.iter().filter(|&&b| b != AIR).count();
        write!(f, "VoxelBuffer({solid}/{CHUNK_VOLUME} non-air)")
    }
}

// ---------------------------------------------------------------------
// NormalChunk
// ---------------------------------------------------------------------

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    Requested = 0,
    Generated = 1,
    Loaded = 2,
}

impl ChunkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Requested,
            1 => Self::Generated,
            _ => Self::Loaded,
        }
    }
}

pub struct ChunkData {
    pub voxels: VoxelBuffer,
    pub changes: ChangeList,
    pub liquids: Vec<u32>,
    pub block_entities: Vec<u32>,
}

/// Full-resolution chunk. Owned by its MetaChunk slot.
///
/// Locking: until the state reaches `Generated` only the worker that popped its request
/// writes `data`. After that, edits come from the dispatcher under the write lock and
/// consumers read under the read lock.
pub struct NormalChunk {
    key: ChunkKey,
    state: AtomicU8,
    // Set by the first effective edit since load.
    edited: AtomicBool,
    data: RwLock<Option<ChunkData>>,
}

impl NormalChunk {
    pub fn new(key: ChunkKey) -> Self {
        debug_assert_eq!(key.voxel_size, 1);
        Self {
            key,
            state: AtomicU8::new(ChunkState::Requested as u8),
            edited: AtomicBool::new(false),
            data: RwLock::new(None),
        }
    }

    #[inline]
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_generated(&self) -> bool {
        self.state() != ChunkState::Requested
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.state() == ChunkState::Loaded
    }

    /// Installs freshly generated voxels with persisted `changes` already applied.
    pub fn install_generated(&self, voxels: VoxelBuffer, changes: ChangeList) {
        *self.data.write() = Some(ChunkData { voxels, changes, liquids: Vec::new(), block_entities: Vec::new() });
        self.state.store(ChunkState::Generated as u8, Ordering::Release);
    }

    /// Load-time bookkeeping: index liquids and block entities.
    pub fn finish_load(&self) {
        let mut guard = self.data.write();
        let Some(data) = guard.as_mut() else { return; };
        data.liquids.clear();
        data.block_entities.clear();
        for (i, &b) in data.voxels.cells().iter().enumerate() {
            match block_class(b) {
                BlockClass::Liquid => data.liquids.push(i as u32),
                BlockClass::Entity => data.block_entities.push(i as u32),
                _ => {}
            }
        }
        drop(guard);
        self.state.store(ChunkState::Loaded as u8, Ordering::Release);
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Option<ChunkData>> {
        self.data.read()
    }

    pub fn get_block(&self, x: u32, y: u32, z: u32) -> Option<u32> {
        self.data.read().as_ref().map(|d| d.voxels.get(x, y, z))
    }

    /// Returns false if the chunk has no voxels yet.
    pub fn update_block(&self, x: u32, y: u32, z: u32, block: u32) -> bool {
        let mut guard = self.data.write();
        let Some(data) = guard.as_mut() else { return false; };
        let i = idx_xyz(x, y, z);
        let old = data.voxels.cells()[i];
        if old == block {
            return true;
        }
        data.changes.record(i as u32, old, block);
        data.voxels.cells_mut()[i] = block;
        self.edited.store(true, Ordering::Release);

        let i = i as u32;
        data.liquids.retain(|&j| j != i);
        data.block_entities.retain(|&j| j != i);
        match block_class(block) {
            BlockClass::Liquid => data.liquids.push(i),
            BlockClass::Entity => data.block_entities.push(i),
            _ => {}
        }
        true
    }

    /// True once any block was changed in this residency; the coarser LODs then need
    /// re-deriving when the chunk is released.
    pub fn was_edited(&self) -> bool {
        self.edited.load(Ordering::Acquire)
    }

    pub fn has_changes(&self) -> bool {
        self.data.read().as_ref().is_some_and(|d| !d.changes.is_empty())
    }

    pub fn changes(&self) -> ChangeList {
        self.data.read().as_ref().map(|d| d.changes.clone()).unwrap_or_default()
    }

    pub fn voxels(&self) -> Option<VoxelBuffer> {
        self.data.read().as_ref().map(|d| d.voxels.clone())
    }
}

impl fmt::Debug for NormalChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalChunk").field("key", &self.key).field("state", &self.state()).finish()
    }
}

// ---------------------------------------------------------------------
// ReducedChunk
// ---------------------------------------------------------------------

/// Downsampled chunk: CHUNK_SIZE^3 cells of `key.voxel_size` world units each.
/// Immutable; re-derivation builds a replacement instance.
pub struct ReducedChunk {
    key: ChunkKey,
    cells: VoxelBuffer,
    // Differs from the pure generator output; persisted on eviction.
    changed: AtomicBool,
}

impl ReducedChunk {
    pub fn new(key: ChunkKey, cells: VoxelBuffer, changed: bool) -> Self {
        Self { key, cells, changed: AtomicBool::new(changed) }
    }

    #[inline]
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> u32 {
        self.cells.get(x, y, z)
    }

    pub fn cells(&self) -> &VoxelBuffer {
        &self.cells
    }

    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    pub fn mark_saved(&self) {
        self.changed.store(false, Ordering::Release);
    }

    /// New instance equal to `self` except for the octant covered by `finer`, which is
    /// replaced by `finer` downsampled 2:1.
    pub fn derive_from_finer(&self, finer_key: ChunkKey, finer: &VoxelBuffer) -> Self {
        debug_assert_eq!(finer_key.parent(), self.key);
        let [ox, oy, oz] = finer_key.octant_in_parent();
        let half = CHUNK_SIZE / 2;
        let mut cells = self.cells.clone();
        for z in 0..half {
            for y in 0..half {
                for x in 0..half {
                    let block = downsample_block(finer, x * 2, y * 2, z * 2);
                    cells.set(ox as u32 * half + x, oy as u32 * half + y, oz as u32 * half + z, block);
                }
            }
        }
        Self::new(self.key, cells, true)
    }
}

/// 2x2x2 -> 1: the most common non-air block if at least half are non-air, else air.
fn downsample_block(src: &VoxelBuffer, x: u32, y: u32, z: u32) -> u32 {
    let mut blocks = [AIR; 8];
    let mut n = 0;
    for dz in 0..2 {
        for dy in 0..2 {
            for dx in 0..2 {
                let b = src.get(x + dx, y + dy, z + dz);
                if b != AIR {
                    blocks[n] = b;
                    n += 1;
                }
            }
        }
    }
    if n < 4 {
        return AIR;
    }
    let filled = &blocks[..n];
    let mut best = filled[0];
    let mut best_count = 0;
    for &b in filled {
        let c = filled.iter().filter(|&&o| o == b).count();
        if c > best_count {
            best = b;
            best_count = c;
        }
    }
    best
}

impl fmt::Debug for ReducedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducedChunk").field("key", &self.key).field("changed", &self.is_changed()).finish()
    }
}

/// Payload of consumer mesh updates.
#[derive(Clone, Debug)]
pub enum ChunkKind {
    Full(Arc<NormalChunk>),
    Reduced(Arc<ReducedChunkVisibility>),
}

impl ChunkKind {
    pub fn key(&self) -> ChunkKey {
        match self {
            Self::Full(c) => c.key(),
            Self::Reduced(v) => v.key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::materials::{CHEST, STONE, WATER};

    #[test]
    fn state_machine_and_edits() {
        let c = NormalChunk::new(ChunkKey::new(0, 0, 0, 1));
        assert_eq!(c.state(), ChunkState::Requested);
        assert!(!c.update_block(0, 0, 0, STONE));

        c.install_generated(VoxelBuffer::filled(AIR), ChangeList::new());
        assert_eq!(c.state(), ChunkState::Generated);
        c.finish_load();
        assert!(c.is_loaded());
        assert!(!c.was_edited());

        assert!(c.update_block(1, 2, 3, WATER));
        assert!(c.was_edited());
        assert!(c.update_block(4, 4, 4, CHEST));
        assert_eq!(c.get_block(1, 2, 3), Some(WATER));
        {
            let guard = c.read();
            let d = guard.as_ref().unwrap();
            assert_eq!(d.liquids, vec![idx_xyz(1, 2, 3) as u32]);
            assert_eq!(d.block_entities, vec![idx_xyz(4, 4, 4) as u32]);
        }
        assert_eq!(c.changes().len(), 2);

        // Back to the generated value: no longer a change.
        assert!(c.update_block(1, 2, 3, AIR));
        assert_eq!(c.changes().len(), 1);
    }

    #[test]
    fn derive_replaces_one_octant_only() {
        let coarse_key = ChunkKey::new(0, 0, 0, 2);
        let coarse = ReducedChunk::new(coarse_key, VoxelBuffer::filled(AIR), false);

        let finer_key = ChunkKey::new(32, 0, 0, 1);
        let derived = coarse.derive_from_finer(finer_key, &VoxelBuffer::filled(STONE));

        assert!(derived.is_changed());
        assert!(!coarse.is_changed());
        assert_eq!(derived.get(16, 0, 0), STONE);
        assert_eq!(derived.get(31, 15, 15), STONE);
        assert_eq!(derived.get(15, 0, 0), AIR);
        assert_eq!(derived.get(16, 16, 0), AIR);
        // Original instance untouched.
        assert_eq!(coarse.get(16, 0, 0), AIR);
    }

    #[test]
    fn downsample_needs_half_filled() {
        let mut v = VoxelBuffer::filled(AIR);
        v.set(0, 0, 0, STONE);
        v.set(1, 0, 0, STONE);
        v.set(0, 1, 0, WATER);
        assert_eq!(downsample_block(&v, 0, 0, 0), AIR);
        v.set(1, 1, 0, STONE);
        assert_eq!(downsample_block(&v, 0, 0, 0), STONE);
    }
}
