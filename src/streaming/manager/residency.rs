// src/streaming/manager/residency.rs
//
// Octree-facing side of the manager: turning acquire/release into queue entries, MetaChunk
// slots, consumer deletions and saves.
use std::sync::Arc;

use glam::DVec3;
use log::trace;

use crate::config::CHUNK_SIZE;
use crate::streaming::chunk::NormalChunk;
use crate::streaming::context::GenContext;
use crate::streaming::meta_chunk::{ChunkSlot, MetaChunkStore};
use crate::streaming::octree::LodResidency;
use crate::streaming::priority::priority_score;
use crate::streaming::queue::WorkQueue;
use crate::streaming::types::{ChunkKey, ChunkRequest, JobKind, RequestId, RequestTicket};

/// Borrowed view of the manager for one octree pass.
pub(crate) struct Residency<'a> {
    pub ctx: &'a GenContext,
    pub queue: &'a WorkQueue,
    pub metas: &'a mut MetaChunkStore,
    pub observer: DVec3,
    pub entity_distance: f64,
}

impl LodResidency for Residency<'_> {
    fn height_range(&mut self, x: i32, z: i32) -> (f32, f32) {
        self.ctx.maps.height_range(x, z)
    }

    fn acquire_full(&mut self, key: ChunkKey) {
        if self.metas.contains(&key) {
            return;
        }
        let chunk = Arc::new(NormalChunk::new(key));
        let ticket = RequestTicket::new();
        self.queue.add(ChunkRequest::full(chunk.clone(), ticket.clone()), priority_score(&key, self.observer));

        let with_entities = key.center().distance(self.observer) < self.entity_distance;
        self.metas.insert(key, ChunkSlot { chunk, ticket }, with_entities);
    }

    fn release_full(&mut self, key: ChunkKey) {
        let Some((slot, entities)) = self.metas.remove(&key) else { return; };
        release_normal_chunk(self.ctx, self.queue, slot);

        if let Some(em) = entities.filter(|em| em.is_dirty()) {
            self.ctx.saves.save_entities(key, em.into_entities());
        }
    }

    fn acquire_reduced(&mut self, key: ChunkKey) -> Arc<RequestTicket> {
        let ticket = RequestTicket::new();
        self.queue.add(ChunkRequest::reduced(key, ticket.clone()), priority_score(&key, self.observer));
        ticket
    }

    fn release_reduced(&mut self, key: ChunkKey, ticket: &RequestTicket) {
        self.queue.remove(&RequestId { key, kind: JobKind::Reduced });
        ticket.cancel();
        self.ctx.consumer.delete_chunk_mesh(key);
    }
}

/// Tears down a resident normal chunk: a generated chunk is saved (and, if edited, folded
/// into the coarser LODs), a pending one is unqueued.
pub(crate) fn release_normal_chunk(ctx: &GenContext, queue: &WorkQueue, slot: ChunkSlot) {
    let ChunkSlot { chunk, ticket } = slot;
    let key = chunk.key();

    queue.remove(&RequestId { key, kind: JobKind::Full });
    ticket.cancel();
    ctx.consumer.delete_chunk_mesh(key);

    if chunk.is_generated() {
        ctx.saves.save_chunk(key, chunk.changes());
        if chunk.was_edited() {
            // A still-queued update for an earlier residency of this key carries stale voxels.
            queue.remove(&RequestId { key, kind: JobKind::Downsample });
            queue.add(ChunkRequest::downsample(chunk), -(CHUNK_SIZE as f32));
            trace!("queued LOD update for {key}");
        }
    }
}
