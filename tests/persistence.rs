// tests/persistence.rs
mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voxel_stream::persistence::{ChunkPersistence, MemoryPersistence};
use voxel_stream::streaming::{ChunkKey, ChunkManager, ReducedChunk, VoxelBuffer};
use voxel_stream::world::materials::{AIR, GRASS};
use voxel_stream::world::{ChangeList, MapFragment};
use voxel_stream::Result;

use common::{manager, small_config, FlatMap, RecordingConsumer, SETTLE};

const FAR: f64 = 20_000.0;

/// Memory store whose chunk saves take a while, so the save queue backs up.
#[derive(Default)]
struct SlowStore {
    inner: MemoryPersistence,
}

impl ChunkPersistence for SlowStore {
    fn save_chunk(&self, key: ChunkKey, changes: &ChangeList) -> Result<()> {
        thread::sleep(Duration::from_millis(40));
        self.inner.save_chunk(key, changes)
    }
    fn load_chunk_changes(&self, key: ChunkKey) -> Result<ChangeList> {
        self.inner.load_chunk_changes(key)
    }
    fn save_map_fragment(&self, fragment: &MapFragment) -> Result<()> {
        self.inner.save_map_fragment(fragment)
    }
    fn save_reduced_chunk(&self, chunk: &ReducedChunk) -> Result<()> {
        self.inner.save_reduced_chunk(chunk)
    }
    fn load_reduced_chunk(&self, key: ChunkKey) -> Result<Option<VoxelBuffer>> {
        self.inner.load_reduced_chunk(key)
    }
}

#[test]
fn edits_are_saved_on_release_and_reapplied() {
    let store = Arc::new(MemoryPersistence::new());
    let mut mgr = manager(small_config(), RecordingConsumer::new(), store.clone());
    let key = ChunkKey::new(0, 0, 0, 1);

    mgr.seek(0.0, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert_eq!(mgr.get_block(5, 16, 5), Some(GRASS));
    assert!(mgr.update_block(5, 16, 5, AIR));

    mgr.seek(FAR, 0.0, 0.0, 2, 1.0);
    assert!(mgr.normal_chunk(5, 16, 5).is_none());
    assert!(mgr.wait_until_idle(SETTLE));
    assert!(mgr.force_save());
    let s = mgr.stats();
    assert!(s.saves_done > 0);
    assert_eq!(s.save_backlog, 0);
    assert_eq!(s.saves_failed, 0);

    let changes = store.stored_changes(key).expect("edits saved");
    assert_eq!(changes.len(), 1);

    // The release folded the edit into the reduced chunks.
    let fine = store.stored_reduced(key).expect("voxel size 1 saved");
    assert_eq!(fine.get(5, 16, 5), AIR);
    let coarse = store.stored_reduced(ChunkKey::new(0, 0, 0, 2)).expect("voxel size 2 saved");
    // Three of the eight cells under (2, 8, 2) are still grass: below the fill threshold.
    assert_eq!(coarse.get(2, 8, 2), AIR);
    assert_eq!(coarse.get(3, 8, 3), GRASS);

    mgr.seek(0.0, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert_eq!(mgr.get_block(5, 16, 5), Some(AIR));
    assert_eq!(mgr.get_block(6, 16, 5), Some(GRASS));
}

#[test]
fn edits_survive_a_quick_return_while_saves_are_slow() {
    let store = Arc::new(SlowStore::default());
    let mut mgr = manager(small_config(), RecordingConsumer::new(), store.clone());
    let key = ChunkKey::new(0, 0, 0, 1);

    mgr.seek(0.0, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert!(mgr.update_block(5, 16, 5, AIR));

    // Come straight back while the released chunks are still waiting to be written.
    mgr.seek(FAR, 0.0, 0.0, 2, 1.0);
    mgr.seek(0.0, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert_eq!(mgr.get_block(5, 16, 5), Some(AIR));
    assert!(mgr.normal_chunk(5, 16, 5).expect("resident").has_changes());

    // Releasing the regenerated chunk must not overwrite the edit with an empty list.
    mgr.seek(FAR, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert!(mgr.force_save());
    assert_eq!(store.inner.stored_changes(key).map(|c| c.len()), Some(1));
}

#[test]
fn reverting_an_edit_clears_the_save() {
    let store = Arc::new(MemoryPersistence::new());
    let mut mgr = manager(small_config(), RecordingConsumer::new(), store.clone());
    let key = ChunkKey::new(0, 0, 0, 1);

    mgr.seek(0.0, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert!(mgr.update_block(5, 16, 5, AIR));
    assert!(mgr.update_block(5, 16, 5, GRASS));
    assert!(!mgr.normal_chunk(0, 0, 0).expect("resident").has_changes());

    mgr.seek(FAR, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert!(mgr.force_save());
    assert!(store.stored_changes(key).is_none());
    assert!(store.chunk_saves() > 0);
}

#[test]
fn entities_are_saved_with_their_chunk() {
    let store = Arc::new(MemoryPersistence::new());
    let mut mgr = manager(small_config(), RecordingConsumer::new(), store.clone());

    mgr.seek(0.0, 0.0, 0.0, 2, 1.0);
    assert!(mgr.add_entity(1, 1, 1, 42));

    mgr.seek(FAR, 0.0, 0.0, 2, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert!(mgr.force_save());
    assert_eq!(store.stored_entities(ChunkKey::new(0, 0, 0, 1)), Some(vec![42]));
    // Untouched entity slots are not written.
    assert_eq!(store.stored_entities(ChunkKey::new(-32, -32, -32, 1)), None);
}

#[test]
fn disk_saves_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = small_config();
    cfg.save_dir = Some(dir.path().to_path_buf());

    let open = |cfg| {
        ChunkManager::builder(cfg)
            .map_generator(Arc::new(FlatMap { height: 16.0 }))
            .consumer(RecordingConsumer::new())
            .build()
            .unwrap()
    };

    {
        let mut mgr = open(cfg.clone());
        mgr.seek(0.0, 0.0, 0.0, 1, 1.0);
        assert!(mgr.wait_until_idle(SETTLE));
        assert!(mgr.update_block(5, 16, 5, AIR));
        mgr.shutdown();
    }
    assert!(dir.path().join("chunks").join("0_0_0.chg").exists());
    assert!(dir.path().join("reduced").join("2").join("0_0_0.red").exists());
    assert!(dir.path().join("maps").exists());

    let mut mgr = open(cfg);
    mgr.seek(0.0, 0.0, 0.0, 1, 1.0);
    assert!(mgr.wait_until_idle(SETTLE));
    assert_eq!(mgr.get_block(5, 16, 5), Some(AIR));
    assert_eq!(mgr.get_block(6, 16, 5), Some(GRASS));
}
