// src/persistence/mod.rs
//
// Load/save contract for chunk data plus two backends and the background save queue.
mod disk;
mod memory;
mod save_queue;

pub use disk::DiskPersistence;
pub use memory::MemoryPersistence;
pub use save_queue::{SaveHandle, SaveJob, SaveQueue};

use crate::error::Result;
use crate::streaming::chunk::{ReducedChunk, VoxelBuffer};
use crate::streaming::types::ChunkKey;
use crate::world::changes::ChangeList;
use crate::world::map::MapFragment;

pub trait ChunkPersistence: Send + Sync {
    /// Persists the player edits of a normal chunk. An empty list clears earlier saves.
    fn save_chunk(&self, key: ChunkKey, changes: &ChangeList) -> Result<()>;

    /// Edits to re-apply after generating `key`. Empty if none were saved.
    fn load_chunk_changes(&self, key: ChunkKey) -> Result<ChangeList>;

    fn save_map_fragment(&self, fragment: &MapFragment) -> Result<()>;

    /// Backends may skip chunks that are not `is_changed()`.
    fn save_reduced_chunk(&self, chunk: &ReducedChunk) -> Result<()>;

    fn load_reduced_chunk(&self, key: ChunkKey) -> Result<Option<VoxelBuffer>>;

    fn save_entities(&self, _key: ChunkKey, _entities: &[u64]) -> Result<()> {
        Ok(())
    }
}
