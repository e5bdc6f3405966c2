// src/streaming/manager/stats.rs
use std::sync::atomic::Ordering;

use super::ChunkManager;
use crate::streaming::chunk::ChunkState;
use crate::streaming::types::StreamStats;

pub fn stats(mgr: &ChunkManager) -> StreamStats {
    let mut s = StreamStats::default();

    let p = mgr.observer.position().floor().as_ivec3();
    s.observer = (p.x, p.y, p.z);

    let (pending, waiting) = mgr.queue.idle_snapshot();
    s.queue_len = pending as u32;
    s.waiting_workers = waiting as u32;
    s.workers = mgr.pool.size() as u32;

    s.meta_chunks = mgr.metas.meta_count() as u32;
    s.normal_chunks = mgr.metas.chunk_count() as u32;
    for chunk in mgr.metas.chunks() {
        match chunk.state() {
            ChunkState::Requested => s.st_requested += 1,
            ChunkState::Generated => s.st_generated += 1,
            ChunkState::Loaded => s.st_loaded += 1,
        }
    }

    s.octree_roots = mgr.octree.root_count() as u32;
    for leaf in mgr.octree.leaves() {
        if leaf.full {
            s.leaves_full += 1;
        } else {
            s.leaves_reduced += 1;
        }
    }

    s.reduced_cache = mgr.ctx.reduced_stats();
    s.map_cache = mgr.ctx.maps.stats();

    let c = &mgr.ctx.counters;
    s.jobs_done = c.done.load(Ordering::Relaxed);
    s.jobs_failed = c.failed.load(Ordering::Relaxed);
    s.notifications_suppressed = c.suppressed.load(Ordering::Relaxed);

    let saves = &mgr.ctx.saves;
    s.save_backlog = saves.backlog() as u32;
    s.saves_done = saves.completed();
    s.saves_failed = saves.failed();
    s
}
