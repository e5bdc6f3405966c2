// src/streaming/context.rs
//
// Everything a generation worker needs, shared behind one Arc.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::config::{StreamConfig, MAX_LOD};
use crate::error::Result;
use crate::persistence::{ChunkPersistence, SaveHandle};
use crate::streaming::cache::BucketCache;
use crate::streaming::chunk::{ChunkKind, NormalChunk, ReducedChunk, VoxelBuffer};
use crate::streaming::consumer::ChunkConsumer;
use crate::streaming::types::{CacheStats, ChunkJob, ChunkKey, ChunkRequest};
use crate::streaming::visibility::ReducedChunkVisibility;
use crate::world::changes::ChangeList;
use crate::world::generator::GeneratorProfile;
use crate::world::map::MapProvider;
use crate::world::materials::AIR;

#[derive(Default)]
pub struct JobCounters {
    pub done: AtomicU64,
    pub failed: AtomicU64,
    pub suppressed: AtomicU64,
}

pub struct GenContext {
    pub seed: u64,
    profile: GeneratorProfile,
    pub maps: MapProvider,
    reduced: BucketCache<ChunkKey, ReducedChunk>,
    persistence: Arc<dyn ChunkPersistence>,
    pub saves: SaveHandle,
    pub consumer: Arc<dyn ChunkConsumer>,
    pub counters: JobCounters,
    // Serializes read-derive-replace of reduced chunks.
    derive: Mutex<()>,
}

impl GenContext {
    pub fn new(
        cfg: &StreamConfig,
        profile: GeneratorProfile,
        maps: MapProvider,
        persistence: Arc<dyn ChunkPersistence>,
        saves: SaveHandle,
        consumer: Arc<dyn ChunkConsumer>,
    ) -> Self {
        Self {
            seed: cfg.seed,
            profile,
            maps,
            reduced: BucketCache::new(cfg.reduced_cache),
            persistence,
            saves,
            consumer,
            counters: JobCounters::default(),
            derive: Mutex::new(()),
        }
    }

    /// Runs the generator profile for `key` at its own voxel size. Pure in (key, seed, profile).
    pub fn generate_voxels(&self, key: ChunkKey) -> Result<VoxelBuffer> {
        let map = self.maps.get_or_generate_map_fragment(key.wx, key.wz, key.voxel_size);
        let mut voxels = VoxelBuffer::filled(AIR);
        self.profile.generate(self.seed, key, &map, &mut voxels)?;
        Ok(voxels)
    }

    /// Saved edits of `key`. Edits still in the save queue win over the backend.
    fn load_chunk_changes(&self, key: ChunkKey) -> Result<ChangeList> {
        match self.saves.pending_changes(key) {
            Some(changes) => Ok(changes),
            None => self.persistence.load_chunk_changes(key),
        }
    }

    pub fn get_or_generate_reduced(&self, key: ChunkKey) -> Result<Arc<ReducedChunk>> {
        let (chunk, evicted) = self.reduced.get_or_insert_with(key, || -> Result<ReducedChunk> {
            if let Some(pending) = self.saves.pending_reduced(key) {
                return Ok(ReducedChunk::new(key, pending.cells().clone(), true));
            }
            if let Some(cells) = self.persistence.load_reduced_chunk(key)? {
                return Ok(ReducedChunk::new(key, cells, false));
            }
            Ok(ReducedChunk::new(key, self.generate_voxels(key)?, false))
        })?;
        if let Some((_, old)) = evicted {
            self.saves.save_reduced_chunk(old);
        }
        Ok(chunk)
    }

    fn replace_reduced(&self, chunk: ReducedChunk) {
        let key = chunk.key();
        // A returned entry for the same key is the superseded version; anything else is an
        // LRU victim.
        if let Some((old_key, old)) = self.reduced.add_to_cache(key, Arc::new(chunk)) {
            if old_key != key {
                self.saves.save_reduced_chunk(old);
            }
        }
    }

    /// Folds an edited normal chunk into the reduced chunk at its own resolution and every
    /// coarser level.
    pub fn propagate_changes(&self, chunk: &NormalChunk) -> Result<()> {
        let Some(voxels) = chunk.voxels() else { return Ok(()); };
        let _guard = self.derive.lock();

        let mut finer_key = chunk.key();
        let mut finer = voxels.clone();
        self.replace_reduced(ReducedChunk::new(finer_key, voxels, true));

        for _ in 0..MAX_LOD {
            let parent = finer_key.parent();
            let current = self.get_or_generate_reduced(parent)?;
            let derived = current.derive_from_finer(finer_key, &finer);
            finer = derived.cells().clone();
            self.replace_reduced(derived);
            finer_key = parent;
        }
        trace!("propagated edits of {}", chunk.key());
        Ok(())
    }

    pub fn process(&self, req: &ChunkRequest) -> Result<()> {
        match &req.job {
            ChunkJob::Full(chunk) => {
                if req.ticket.is_cancelled() {
                    return Ok(());
                }
                let changes = self.load_chunk_changes(req.key)?;
                let mut voxels = self.generate_voxels(req.key)?;
                changes.apply(voxels.cells_mut());
                chunk.install_generated(voxels, changes);
                chunk.finish_load();
                self.notify(req, ChunkKind::Full(chunk.clone()));
            }
            ChunkJob::Reduced => {
                if req.ticket.is_cancelled() {
                    return Ok(());
                }
                let view = ReducedChunkVisibility::build(req.key, |k| self.get_or_generate_reduced(k))?;
                self.notify(req, ChunkKind::Reduced(Arc::new(view)));
            }
            ChunkJob::Downsample(chunk) => self.propagate_changes(chunk)?,
        }
        Ok(())
    }

    fn notify(&self, req: &ChunkRequest, kind: ChunkKind) {
        let sent = req.ticket.notify_unless_cancelled(|| self.consumer.update_chunk_mesh(kind));
        if !sent {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            trace!("dropped notification for disposed {}", req.key);
        }
    }

    pub fn reduced_stats(&self) -> CacheStats {
        self.reduced.stats()
    }

    /// Sends every cached reduced chunk to the save queue. Entries stay cached.
    pub fn save_reduced_chunks(&self) {
        for (_, chunk) in self.reduced.snapshot() {
            if chunk.is_changed() {
                self.saves.save_reduced_chunk(chunk);
            }
        }
    }

    /// Empties the caches through the save queue.
    pub fn flush_caches(&self) {
        for (_, chunk) in self.reduced.drain() {
            self.saves.save_reduced_chunk(chunk);
        }
        self.maps.flush_all();
    }
}
