// src/streaming/priority.rs
use glam::DVec3;
use parking_lot::RwLock;

use super::types::ChunkKey;

/// Nearer cubes score higher. Distance is measured to the cube centre.
#[inline]
pub fn priority_score(key: &ChunkKey, observer: DVec3) -> f32 {
    -(key.center().distance(observer) as f32)
}

/// Last observer position published by `seek`, read by workers when re-scoring.
#[derive(Default)]
pub struct Observer {
    pos: RwLock<DVec3>,
}

impl Observer {
    pub fn new(pos: DVec3) -> Self {
        Self { pos: RwLock::new(pos) }
    }

    #[inline]
    pub fn position(&self) -> DVec3 {
        *self.pos.read()
    }

    pub fn publish(&self, pos: DVec3) {
        *self.pos.write() = pos;
    }

    #[inline]
    pub fn priority(&self, key: &ChunkKey) -> f32 {
        priority_score(key, self.position())
    }
}
