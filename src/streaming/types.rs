// src/streaming/types.rs
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use glam::DVec3;
use parking_lot::Mutex;

use crate::config::CHUNK_SIZE;
use crate::streaming::chunk::NormalChunk;

/// Identity of one chunk-sized cube of the world at one resolution.
///
/// `wx/wy/wz` are world coordinates of the low corner and are always multiples of
/// `voxel_size * CHUNK_SIZE`.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct ChunkKey {
    pub wx: i32,
    pub wy: i32,
    pub wz: i32,
    pub voxel_size: u32,
}

impl ChunkKey {
    #[inline]
    pub fn new(wx: i32, wy: i32, wz: i32, voxel_size: u32) -> Self {
        debug_assert!(voxel_size.is_power_of_two());
        let key = Self { wx, wy, wz, voxel_size };
        debug_assert_eq!(key, Self::containing(wx, wy, wz, voxel_size), "unaligned chunk key");
        key
    }

    /// Key of the cube at `voxel_size` that contains world position `(x, y, z)`.
    #[inline]
    pub fn containing(x: i32, y: i32, z: i32, voxel_size: u32) -> Self {
        let mask = !(Self::width_for(voxel_size) - 1);
        Self { wx: x & mask, wy: y & mask, wz: z & mask, voxel_size }
    }

    #[inline(always)]
    pub fn width_for(voxel_size: u32) -> i32 {
        (voxel_size * CHUNK_SIZE) as i32
    }

    #[inline(always)]
    pub fn width(&self) -> i32 {
        Self::width_for(self.voxel_size)
    }

    /// log2(voxel_size).
    #[inline(always)]
    pub fn lod(&self) -> u32 {
        self.voxel_size.trailing_zeros()
    }

    #[inline]
    pub fn center(&self) -> DVec3 {
        let half = self.width() as f64 * 0.5;
        DVec3::new(self.wx as f64 + half, self.wy as f64 + half, self.wz as f64 + half)
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        let w = self.width();
        x >= self.wx && x < self.wx + w && y >= self.wy && y < self.wy + w && z >= self.wz && z < self.wz + w
    }

    /// Same-resolution neighbour, offset in whole chunks.
    #[inline]
    pub fn neighbor(&self, dx: i32, dy: i32, dz: i32) -> Self {
        let w = self.width();
        Self { wx: self.wx + dx * w, wy: self.wy + dy * w, wz: self.wz + dz * w, voxel_size: self.voxel_size }
    }

    /// The cube one LOD coarser that contains this one.
    #[inline]
    pub fn parent(&self) -> Self {
        Self::containing(self.wx, self.wy, self.wz, self.voxel_size * 2)
    }

    /// Which half of the parent this cube occupies on each axis (0 or 1).
    #[inline]
    pub fn octant_in_parent(&self) -> [usize; 3] {
        let p = self.parent();
        let w = self.width();
        [
            ((self.wx - p.wx) / w) as usize,
            ((self.wy - p.wy) / w) as usize,
            ((self.wz - p.wz) / w) as usize,
        ]
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-chunk ({}, {}, {})", self.voxel_size, self.wx, self.wy, self.wz)
    }
}

/// Cancellation handle shared by the dispatcher and whichever worker runs the request.
///
/// `cancel` and `notify_unless_cancelled` are serialized, so once `cancel` returns no
/// consumer notification for this request can still be in progress or start later.
#[derive(Debug, Default)]
pub struct RequestTicket {
    cancelled: AtomicBool,
    notify: Mutex<()>,
}

impl RequestTicket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        let _guard = self.notify.lock();
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn notify_unless_cancelled(&self, notify: impl FnOnce()) -> bool {
        let _guard = self.notify.lock();
        if self.is_cancelled() {
            return false;
        }
        notify();
        true
    }
}

#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub enum JobKind {
    Full,
    Reduced,
    Downsample,
}

/// Queue identity of a request: at most one entry per id is queued at a time.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct RequestId {
    pub key: ChunkKey,
    pub kind: JobKind,
}

#[derive(Clone, Debug)]
pub enum ChunkJob {
    /// Generate and load a resident normal chunk.
    Full(Arc<NormalChunk>),
    /// Build the visibility view of a reduced chunk for the consumer.
    Reduced,
    /// Fold an edited normal chunk into the coarser reduced chunks.
    Downsample(Arc<NormalChunk>),
}

#[derive(Clone, Debug)]
pub struct ChunkRequest {
    pub key: ChunkKey,
    pub job: ChunkJob,
    pub ticket: Arc<RequestTicket>,
}

impl ChunkRequest {
    pub fn full(chunk: Arc<NormalChunk>, ticket: Arc<RequestTicket>) -> Self {
        Self { key: chunk.key(), job: ChunkJob::Full(chunk), ticket }
    }

    pub fn reduced(key: ChunkKey, ticket: Arc<RequestTicket>) -> Self {
        Self { key, job: ChunkJob::Reduced, ticket }
    }

    pub fn downsample(chunk: Arc<NormalChunk>) -> Self {
        Self { key: chunk.key(), job: ChunkJob::Downsample(chunk), ticket: RequestTicket::new() }
    }

    #[inline]
    pub fn kind(&self) -> JobKind {
        match self.job {
            ChunkJob::Full(_) => JobKind::Full,
            ChunkJob::Reduced => JobKind::Reduced,
            ChunkJob::Downsample(_) => JobKind::Downsample,
        }
    }

    #[inline]
    pub fn id(&self) -> RequestId {
        RequestId { key: self.key, kind: self.kind() }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub entries: u32,
    pub capacity: u32,
    pub requests: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StreamStats {
    pub observer: (i32, i32, i32),

    pub queue_len: u32,
    pub waiting_workers: u32,
    pub workers: u32,

    pub meta_chunks: u32,
    pub normal_chunks: u32,
    pub st_requested: u32,
    pub st_generated: u32,
    pub st_loaded: u32,

    pub octree_roots: u32,
    pub leaves_full: u32,
    pub leaves_reduced: u32,

    pub reduced_cache: CacheStats,
    pub map_cache: CacheStats,

    pub jobs_done: u64,
    pub jobs_failed: u64,
    pub notifications_suppressed: u64,

    pub save_backlog: u32,
    pub saves_done: u64,
    pub saves_failed: u64,
}
