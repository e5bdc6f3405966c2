// src/streaming/manager/mod.rs
mod residency;
mod stats;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::DVec3;
use log::{debug, info, warn};

use crate::config::{StreamConfig, CHUNK_MASK, CHUNK_SIZE};
use crate::error::{Result, StreamError};
use crate::persistence::{ChunkPersistence, DiskPersistence, MemoryPersistence, SaveQueue};
use crate::streaming::{
    chunk::{ChunkKind, NormalChunk},
    consumer::{ChunkConsumer, CountingConsumer},
    context::GenContext,
    meta_chunk::MetaChunkStore,
    octree::{LeafInfo, LodOctree},
    priority::Observer,
    queue::WorkQueue,
    types::{ChunkJob, ChunkKey, StreamStats},
    workers::GenerationWorkerPool,
};
use crate::world::generator::GeneratorProfile;
use crate::world::map::{MapFragmentGenerator, MapProvider, NoiseMapGenerator};

use residency::Residency;

/// Collaborators of a [`ChunkManager`]. Anything left unset gets a default: the default
/// generator profile, noise heightmaps, disk saves under `save_dir` (in-memory otherwise) and
/// a consumer that only counts.
pub struct ChunkManagerBuilder {
    cfg: StreamConfig,
    profile: Option<GeneratorProfile>,
    map_generator: Option<Arc<dyn MapFragmentGenerator>>,
    persistence: Option<Arc<dyn ChunkPersistence>>,
    consumer: Option<Arc<dyn ChunkConsumer>>,
}

impl ChunkManagerBuilder {
    pub fn new(cfg: StreamConfig) -> Self {
        Self { cfg, profile: None, map_generator: None, persistence: None, consumer: None }
    }

    pub fn profile(mut self, profile: GeneratorProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn map_generator(mut self, generator: Arc<dyn MapFragmentGenerator>) -> Self {
        self.map_generator = Some(generator);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn ChunkPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn ChunkConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn build(self) -> Result<ChunkManager> {
        let cfg = self.cfg;
        cfg.validate()?;

        let persistence: Arc<dyn ChunkPersistence> = match (self.persistence, &cfg.save_dir) {
            (Some(p), _) => p,
            (None, Some(dir)) => Arc::new(DiskPersistence::open(dir.clone())?),
            (None, None) => Arc::new(MemoryPersistence::new()),
        };
        let map_generator = self.map_generator.unwrap_or_else(|| Arc::new(NoiseMapGenerator::new(cfg.seed)));
        let profile = self.profile.unwrap_or_else(GeneratorProfile::default_profile);
        debug!("generators in order: {}", profile.names().join(", "));
        let consumer = self.consumer.unwrap_or_else(|| Arc::new(CountingConsumer::new()));

        let saves = SaveQueue::spawn(persistence.clone())?;
        let handle = saves.handle().ok_or(StreamError::ShuttingDown)?;

        let maps = MapProvider::new(&cfg, map_generator, handle.clone());
        let ctx = Arc::new(GenContext::new(&cfg, profile, maps, persistence, handle, consumer));
        let queue = Arc::new(WorkQueue::with_capacity(cfg.queue_capacity));
        let observer = Arc::new(Observer::new(DVec3::ZERO));
        let pool = GenerationWorkerPool::spawn(cfg.worker_count(), queue.clone(), ctx.clone(), observer.clone())?;

        info!(
            "chunk manager ready: seed {:#x}, {} workers, highest lod {}",
            cfg.seed,
            pool.size(),
            cfg.highest_lod
        );
        Ok(ChunkManager {
            cfg,
            ctx,
            queue,
            observer,
            pool,
            saves,
            metas: MetaChunkStore::new(),
            octree: LodOctree::new(),
            closed: false,
        })
    }
}

/// Streams chunks around one observer. Owns the octree and the resident normal chunks; the
/// thread that calls [`seek`](Self::seek) is the only one that mutates them.
pub struct ChunkManager {
    pub(crate) cfg: StreamConfig,
    pub(crate) ctx: Arc<GenContext>,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) observer: Arc<Observer>,
    pub(crate) pool: GenerationWorkerPool,
    saves: SaveQueue,

    pub(crate) metas: MetaChunkStore,
    pub(crate) octree: LodOctree,
    closed: bool,
}

impl ChunkManager {
    pub fn new(cfg: StreamConfig) -> Result<Self> {
        ChunkManagerBuilder::new(cfg).build()
    }

    pub fn builder(cfg: StreamConfig) -> ChunkManagerBuilder {
        ChunkManagerBuilder::new(cfg)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.cfg
    }

    /// Moves the observer and re-evaluates the octree. Returns false when nothing changed
    /// since the previous call (same integer position and parameters).
    pub fn seek(&mut self, x: f64, y: f64, z: f64, render_distance: u32, lod_factor: f32) -> bool {
        if self.closed {
            return false;
        }
        let pos = DVec3::new(x, y, z);
        // Workers rescore against the same block position the octree scores against.
        let block = pos.floor();
        self.observer.publish(block);

        let mut res = Residency {
            ctx: &self.ctx,
            queue: &self.queue,
            metas: &mut self.metas,
            observer: block,
            entity_distance: (self.cfg.entity_distance * CHUNK_SIZE) as f64,
        };
        self.octree.seek(&mut res, pos, render_distance, lod_factor, self.cfg.highest_lod)
    }

    /// [`seek`](Self::seek) with the configured render distance and LOD factor.
    pub fn seek_default(&mut self, x: f64, y: f64, z: f64) -> bool {
        let (rd, factor) = (self.cfg.render_distance, self.cfg.lod_factor);
        self.seek(x, y, z, rd, factor)
    }

    /// Resident normal chunk containing world voxel `(x, y, z)`.
    pub fn normal_chunk(&self, x: i32, y: i32, z: i32) -> Option<Arc<NormalChunk>> {
        let key = ChunkKey::containing(x, y, z, 1);
        self.metas.get(&key).map(|s| s.chunk.clone())
    }

    /// Block at world voxel `(x, y, z)`; `None` unless the containing normal chunk is resident
    /// and generated.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Option<u32> {
        let key = ChunkKey::containing(x, y, z, 1);
        let slot = self.metas.get(&key)?;
        let (lx, ly, lz) = local(x, y, z);
        slot.chunk.get_block(lx, ly, lz)
    }

    /// Player edit. Applies only to a resident, generated normal chunk; the consumer gets the
    /// chunk again afterwards. Coarser LODs pick the edit up when the chunk is released.
    pub fn update_block(&mut self, x: i32, y: i32, z: i32, block: u32) -> bool {
        let key = ChunkKey::containing(x, y, z, 1);
        let Some(slot) = self.metas.get(&key) else {
            debug!("edit at ({x}, {y}, {z}) ignored: {key} is not resident");
            return false;
        };
        let (lx, ly, lz) = local(x, y, z);
        if !slot.chunk.update_block(lx, ly, lz, block) {
            return false;
        }
        if slot.chunk.is_loaded() {
            let chunk = slot.chunk.clone();
            slot.ticket.notify_unless_cancelled(|| self.ctx.consumer.update_chunk_mesh(ChunkKind::Full(chunk)));
        }
        true
    }

    /// Registers entity `id` with the normal chunk containing `(x, y, z)`. False if that
    /// chunk has no entity slot (not resident, or beyond the entity distance).
    pub fn add_entity(&mut self, x: i32, y: i32, z: i32, id: u64) -> bool {
        let key = ChunkKey::containing(x, y, z, 1);
        match self.metas.entity_manager_mut(&key) {
            Some(em) => {
                em.add(id);
                true
            }
            None => false,
        }
    }

    pub fn remove_entity(&mut self, x: i32, y: i32, z: i32, id: u64) -> bool {
        let key = ChunkKey::containing(x, y, z, 1);
        self.metas.entity_manager_mut(&key).is_some_and(|em| em.remove(id))
    }

    pub fn entities(&self, x: i32, y: i32, z: i32) -> Vec<u64> {
        let key = ChunkKey::containing(x, y, z, 1);
        self.metas.entity_manager(&key).map(|em| em.entities().to_vec()).unwrap_or_default()
    }

    pub fn leaves(&self) -> Vec<LeafInfo> {
        self.octree.leaves()
    }

    /// Keys currently waiting in the work queue.
    pub fn queued(&self) -> Vec<ChunkKey> {
        self.queue.to_array().into_iter().map(|r| r.key).collect()
    }

    /// Blocks until the queue is empty and every worker waits in `extract_max`, or the
    /// timeout passes. Returns whether the stream went idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let workers = self.pool.size();
        let deadline = Instant::now() + timeout;
        loop {
            let (pending, waiting) = self.queue.idle_snapshot();
            if pending == 0 && waiting >= workers {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("stream not idle after {timeout:?}: {pending} queued, {waiting}/{workers} waiting");
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Writes every changed reduced chunk and waits for the save queue to drain. Resident
    /// normal chunks are saved when they are released.
    pub fn force_save(&self) -> bool {
        self.ctx.save_reduced_chunks();
        self.ctx.saves.flush()
    }

    pub fn stats(&self) -> StreamStats {
        stats::stats(self)
    }

    /// Releases every chunk, stops the workers, finishes queued LOD updates, drains the caches
    /// through the save queue and joins the save thread. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut res = Residency {
            ctx: &self.ctx,
            queue: &self.queue,
            metas: &mut self.metas,
            observer: self.observer.position(),
            entity_distance: 0.0,
        };
        self.octree.clear(&mut res);
        self.pool.shutdown();

        // Edited chunks still owe their LOD update.
        let mut derived = 0;
        for req in self.queue.clear() {
            if let ChunkJob::Downsample(_) = req.job {
                if let Err(e) = self.ctx.process(&req) {
                    warn!("LOD update of {} lost on shutdown: {e}", req.key);
                }
                derived += 1;
            }
        }
        self.ctx.flush_caches();
        self.saves.shutdown();
        info!("chunk manager stopped ({derived} LOD updates finished on shutdown)");
    }
}

impl Drop for ChunkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[inline]
fn local(x: i32, y: i32, z: i32) -> (u32, u32, u32) {
    ((x & CHUNK_MASK) as u32, (y & CHUNK_MASK) as u32, (z & CHUNK_MASK) as u32)
}
