// src/streaming/consumer.rs
use std::sync::atomic::{AtomicU64, Ordering};

use super::chunk::ChunkKind;
use super::types::ChunkKey;

/// Mesh side of the stream. Called from worker threads (updates) and from the thread that
/// drives `seek` (deletions).
pub trait ChunkConsumer: Send + Sync {
    fn update_chunk_mesh(&self, chunk: ChunkKind);
    fn delete_chunk_mesh(&self, key: ChunkKey);
}

/// Counts notifications and drops them.
#[derive(Default)]
pub struct CountingConsumer {
    full: AtomicU64,
    reduced: AtomicU64,
    deleted: AtomicU64,
}

impl CountingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (full updates, reduced updates, deletions)
    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.full.load(Ordering::Relaxed),
            self.reduced.load(Ordering::Relaxed),
            self.deleted.load(Ordering::Relaxed),
        )
    }
}

impl ChunkConsumer for CountingConsumer {
    fn update_chunk_mesh(&self, chunk: ChunkKind) {
        match chunk {
            ChunkKind::Full(_) => self.full.fetch_add(1, Ordering::Relaxed),
            ChunkKind::Reduced(_) => self.reduced.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn delete_chunk_mesh(&self, _key: ChunkKey) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::streaming::chunk::NormalChunk;

    #[test]
    fn counts_each_kind_of_notification() {
        let consumer = CountingConsumer::new();
        let key = ChunkKey::new(0, 0, 0, 1);
        consumer.update_chunk_mesh(ChunkKind::Full(Arc::new(NormalChunk::new(key))));
        consumer.update_chunk_mesh(ChunkKind::Full(Arc::new(NormalChunk::new(key))));
        consumer.delete_chunk_mesh(key);
        assert_eq!(consumer.counts(), (2, 0, 1));
    }
}
