// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use voxel_stream::config::{CacheGeometry, StreamConfig};
use voxel_stream::persistence::ChunkPersistence;
use voxel_stream::streaming::{ChunkConsumer, ChunkKey, ChunkKind, ChunkManager, ReducedChunkVisibility};
use voxel_stream::world::map::{Biome, MapFragmentGenerator, MapSample};

pub const SETTLE: Duration = Duration::from_secs(60);

/// Terrain flat at `height` everywhere.
pub struct FlatMap {
    pub height: f32,
}

impl MapFragmentGenerator for FlatMap {
    fn sample(&self, _x: i32, _z: i32) -> MapSample {
        MapSample { height: self.height, biome: Biome::Grassland }
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    Full(ChunkKey),
    Reduced(Arc<ReducedChunkVisibility>),
    Delete(ChunkKey),
}

impl Event {
    pub fn key(&self) -> ChunkKey {
        match self {
            Event::Full(k) | Event::Delete(k) => *k,
            Event::Reduced(v) => v.key,
        }
    }
}

/// Keeps every notification in arrival order.
#[derive(Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<Event>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn full_updates(&self) -> Vec<ChunkKey> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Full(k) => Some(*k),
                _ => None,
            })
            .collect()
    }

    pub fn reduced_view(&self, key: ChunkKey) -> Option<Arc<ReducedChunkVisibility>> {
        self.events.lock().iter().rev().find_map(|e| match e {
            Event::Reduced(v) if v.key == key => Some(v.clone()),
            _ => None,
        })
    }
}

impl ChunkConsumer for RecordingConsumer {
    fn update_chunk_mesh(&self, chunk: ChunkKind) {
        let event = match chunk {
            ChunkKind::Full(c) => Event::Full(c.key()),
            ChunkKind::Reduced(v) => Event::Reduced(v),
        };
        self.events.lock().push(event);
    }

    fn delete_chunk_mesh(&self, key: ChunkKey) {
        self.events.lock().push(Event::Delete(key));
    }
}

/// Small world: two workers, roots of 128 blocks, render distance 2.
pub fn small_config() -> StreamConfig {
    StreamConfig {
        seed: 1234,
        worker_threads: Some(2),
        highest_lod: 2,
        render_distance: 2,
        lod_factor: 1.0,
        entity_distance: 1,
        queue_capacity: 256,
        reduced_cache: CacheGeometry::new(256, 4),
        map_cache_buckets: vec![4; 6],
        map_cache_ways: 2,
        save_dir: None,
    }
}

pub fn manager(
    cfg: StreamConfig,
    consumer: Arc<RecordingConsumer>,
    persistence: Arc<dyn ChunkPersistence>,
) -> ChunkManager {
    ChunkManager::builder(cfg)
        .map_generator(Arc::new(FlatMap { height: 16.0 }))
        .persistence(persistence)
        .consumer(consumer)
        .build()
        .expect("manager")
}
