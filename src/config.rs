// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StreamError};

// Chunk geometry. Everything below assumes power-of-two sizes.
pub const CHUNK_SHIFT: u32 = 5;
pub const CHUNK_SIZE: u32 = 1 << CHUNK_SHIFT; // 32 cells per axis
pub const CHUNK_MASK: i32 = CHUNK_SIZE as i32 - 1;
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

// MetaChunk = 16^3 normal chunks.
pub const META_CHUNK_SHIFT: u32 = 4;
pub const META_CHUNK_SIZE: u32 = 1 << META_CHUNK_SHIFT;
pub const META_CHUNK_VOLUME: usize = (META_CHUNK_SIZE * META_CHUNK_SIZE * META_CHUNK_SIZE) as usize;

// Map fragments hold MAP_SIZE^2 height cells at one voxel size.
pub const MAP_SHIFT: u32 = 8;
pub const MAP_SIZE: u32 = 1 << MAP_SHIFT;

// Coarsest reduced voxel size is 1 << MAX_LOD.
pub const MAX_LOD: u32 = 5;

// Resolution of the height range used for underground culling.
pub const CULL_VOXEL_SIZE: u32 = 16;

pub const SEA_LEVEL: i32 = 0;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct CacheGeometry {
    pub buckets: usize,
    pub ways: usize,
}

impl CacheGeometry {
    pub const fn new(buckets: usize, ways: usize) -> Self {
        Self { buckets, ways }
    }

    pub const fn capacity(&self) -> usize {
        self.buckets * self.ways
    }
}

/// Runtime knobs. Missing keys in a TOML file fall back to [`StreamConfig::default`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub seed: u64,
    /// `None` => `max(1, available_parallelism - 1)`.
    pub worker_threads: Option<usize>,
    pub highest_lod: u32,
    pub render_distance: u32,
    pub lod_factor: f32,
    /// In chunks; normal chunks closer than this get an entity-manager slot.
    pub entity_distance: u32,
    pub queue_capacity: usize,
    pub reduced_cache: CacheGeometry,
    /// One bucket count per LOD tier (index = log2(voxel_size)).
    pub map_cache_buckets: Vec<usize>,
    pub map_cache_ways: usize,
    pub save_dir: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_CAFE,
            worker_threads: None,
            highest_lod: 4,
            render_distance: 4,
            lod_factor: 2.0,
            entity_distance: 2,
            queue_capacity: 1024,
            reduced_cache: CacheGeometry::new(2048, 4),
            map_cache_buckets: vec![8, 32, 64, 256, 512, 2048],
            map_cache_ways: 4,
            save_dir: None,
        }
    }
}

impl StreamConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.highest_lod > MAX_LOD {
            return Err(StreamError::InvalidConfig(format!(
                "highest_lod {} exceeds {MAX_LOD}",
                self.highest_lod
            )));
        }
        if self.reduced_cache.capacity() == 0 {
            return Err(StreamError::InvalidConfig("reduced_cache must hold at least one entry".into()));
        }
        if self.map_cache_buckets.len() != (MAX_LOD + 1) as usize {
            return Err(StreamError::InvalidConfig(format!(
                "map_cache_buckets needs {} tiers, got {}",
                MAX_LOD + 1,
                self.map_cache_buckets.len()
            )));
        }
        if self.map_cache_ways == 0 || self.map_cache_buckets.iter().any(|&b| b == 0) {
            return Err(StreamError::InvalidConfig("map cache dimensions must be non-zero".into()));
        }
        if !(self.lod_factor > 0.0) {
            return Err(StreamError::InvalidConfig("lod_factor must be positive".into()));
        }
        if self.worker_threads == Some(0) {
            return Err(StreamError::InvalidConfig("worker_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_threads.unwrap_or_else(default_worker_count)
    }

    pub fn map_cache_geometry(&self, lod: usize) -> CacheGeometry {
        CacheGeometry::new(self.map_cache_buckets[lod], self.map_cache_ways)
    }
}

pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    cores.saturating_sub(1).max(1)
}
