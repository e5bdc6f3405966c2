// src/streaming/mod.rs
// LOD octree, work queue, generation workers and the caches behind them.

pub mod cache;
pub mod chunk;
pub mod consumer;
pub mod manager;
pub mod meta_chunk;
pub mod octree;
pub mod priority;
pub mod queue;
pub mod types;
pub mod visibility;

mod context;
mod workers;

pub use chunk::{ChunkKind, ChunkState, NormalChunk, ReducedChunk, VoxelBuffer};
pub use consumer::{ChunkConsumer, CountingConsumer};
pub use manager::{ChunkManager, ChunkManagerBuilder};
pub use octree::LeafInfo;
pub use types::{CacheStats, ChunkKey, StreamStats};
pub use visibility::ReducedChunkVisibility;
