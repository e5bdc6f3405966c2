// src/persistence/disk.rs
//
// One lz4-compressed file per saved object under a save directory:
//   chunks/<x>_<y>_<z>.chg          edits of a normal chunk
//   reduced/<vs>/<x>_<y>_<z>.red    changed reduced chunks
//   maps/<vs>/<x>_<z>.map           map fragments
//   entities/<x>_<y>_<z>.ent        entity ids of a chunk
use std::fs;
use std::io::ErrorKind;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bytemuck::pod_read_unaligned;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use super::ChunkPersistence;
use crate::config::CHUNK_VOLUME;
use crate::error::{Result, StreamError};
use crate::streaming::chunk::{ReducedChunk, VoxelBuffer};
use crate::streaming::types::ChunkKey;
use crate::world::changes::{BlockChange, ChangeList};
use crate::world::map::MapFragment;

pub struct DiskPersistence {
    root: PathBuf,
}

impl DiskPersistence {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["chunks", "reduced", "maps", "entities"] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root })
    }

    fn chunk_path(&self, key: ChunkKey) -> PathBuf {
        self.root.join("chunks").join(format!("{}_{}_{}.chg", key.wx, key.wy, key.wz))
    }

    fn reduced_path(&self, key: ChunkKey) -> PathBuf {
        self.root
            .join("reduced")
            .join(key.voxel_size.to_string())
            .join(format!("{}_{}_{}.red", key.wx, key.wy, key.wz))
    }

    fn entities_path(&self, key: ChunkKey) -> PathBuf {
        self.root.join("entities").join(format!("{}_{}_{}.ent", key.wx, key.wy, key.wz))
    }

    fn write(path: &Path, raw: &[u8]) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, compress_prepend_size(raw))?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// `Ok(None)` when the file does not exist.
    fn read(path: &Path) -> Result<Option<Vec<u8>>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decompress_size_prepended(&bytes)
            .map(Some)
            .map_err(|e| StreamError::corrupt(path, e.to_string()))
    }

    fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl ChunkPersistence for DiskPersistence {
    fn save_chunk(&self, key: ChunkKey, changes: &ChangeList) -> Result<()> {
        let path = self.chunk_path(key);
        if changes.is_empty() {
            return Self::remove(&path);
        }
        Self::write(&path, changes.as_bytes())
    }

    fn load_chunk_changes(&self, key: ChunkKey) -> Result<ChangeList> {
        let path = self.chunk_path(key);
        let Some(raw) = Self::read(&path)? else { return Ok(ChangeList::new()); };
        let stride = size_of::<BlockChange>();
        if raw.len() % stride != 0 {
            return Err(StreamError::corrupt(path, format!("{} bytes is not a whole change list", raw.len())));
        }
        Ok(ChangeList::from_entries(raw.chunks_exact(stride).map(pod_read_unaligned::<BlockChange>)))
    }

    fn save_map_fragment(&self, fragment: &MapFragment) -> Result<()> {
        let k = fragment.key;
        let path = self
            .root
            .join("maps")
            .join(k.voxel_size.to_string())
            .join(format!("{}_{}.map", k.wx, k.wz));
        let mut raw: Vec<u8> = bytemuck::cast_slice(fragment.heights()).to_vec();
        raw.extend(fragment.biomes().iter().map(|&b| b as u8));
        Self::write(&path, &raw)
    }

    fn save_reduced_chunk(&self, chunk: &ReducedChunk) -> Result<()> {
        if !chunk.is_changed() {
            return Ok(());
        }
        Self::write(&self.reduced_path(chunk.key()), chunk.cells().as_bytes())?;
        chunk.mark_saved();
        Ok(())
    }

    fn load_reduced_chunk(&self, key: ChunkKey) -> Result<Option<VoxelBuffer>> {
        let path = self.reduced_path(key);
        let Some(raw) = Self::read(&path)? else { return Ok(None); };
        if raw.len() != CHUNK_VOLUME * size_of::<u32>() {
            return Err(StreamError::corrupt(path, format!("expected {} cells", CHUNK_VOLUME)));
        }
        let cells = raw.chunks_exact(4).map(pod_read_unaligned::<u32>).collect();
        Ok(VoxelBuffer::from_cells(cells))
    }

    fn save_entities(&self, key: ChunkKey, entities: &[u64]) -> Result<()> {
        let path = self.entities_path(key);
        if entities.is_empty() {
            return Self::remove(&path);
        }
        Self::write(&path, bytemuck::cast_slice(entities))
    }
}
