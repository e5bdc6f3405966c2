// src/streaming/visibility.rs
//
// Consumer view of a reduced chunk: only the cells with at least one exposed face.
use std::sync::Arc;

use crate::config::CHUNK_SIZE;
use crate::error::Result;
use crate::streaming::chunk::ReducedChunk;
use crate::streaming::types::ChunkKey;
use crate::world::materials::{is_transparent, AIR};

pub const FACE_NEG_X: u8 = 1 << 0;
pub const FACE_POS_X: u8 = 1 << 1;
pub const FACE_NEG_Y: u8 = 1 << 2;
pub const FACE_POS_Y: u8 = 1 << 3;
pub const FACE_NEG_Z: u8 = 1 << 4;
pub const FACE_POS_Z: u8 = 1 << 5;

const FACES: [(i32, i32, i32, u8); 6] = [
    (-1, 0, 0, FACE_NEG_X),
    (1, 0, 0, FACE_POS_X),
    (0, -1, 0, FACE_NEG_Y),
    (0, 1, 0, FACE_POS_Y),
    (0, 0, -1, FACE_NEG_Z),
    (0, 0, 1, FACE_POS_Z),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibleBlock {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    /// Bitmask of FACE_* that border a transparent cell.
    pub faces: u8,
    pub block: u32,
}

#[derive(Debug)]
pub struct ReducedChunkVisibility {
    pub key: ChunkKey,
    pub blocks: Vec<VisibleBlock>,
}

impl ReducedChunkVisibility {
    /// Builds the view of `key` from the cached reduced chunk and its six face neighbours.
    pub fn build(key: ChunkKey, mut fetch: impl FnMut(ChunkKey) -> Result<Arc<ReducedChunk>>) -> Result<Self> {
        let center = fetch(key)?;
        let neighbors = FACES
            .iter()
            .map(|&(dx, dy, dz, _)| fetch(key.neighbor(dx, dy, dz)))
            .collect::<Result<Vec<_>>>()?;

        let cs = CHUNK_SIZE as i32;
        // Face neighbours only ever overflow one axis.
        let lookup = |x: i32, y: i32, z: i32| -> u32 {
            let face = if x < 0 {
                0
            } else if x >= cs {
                1
            } else if y < 0 {
                2
            } else if y >= cs {
                3
            } else if z < 0 {
                4
            } else if z >= cs {
                5
            } else {
                return center.get(x as u32, y as u32, z as u32);
            };
            neighbors[face].get(x.rem_euclid(cs) as u32, y.rem_euclid(cs) as u32, z.rem_euclid(cs) as u32)
        };

        let mut blocks = Vec::new();
        for z in 0..cs {
            for y in 0..cs {
                for x in 0..cs {
                    let block = center.get(x as u32, y as u32, z as u32);
                    if block == AIR {
                        continue;
                    }
                    let mut faces = 0u8;
                    for &(dx, dy, dz, bit) in FACES.iter() {
                        let n = lookup(x + dx, y + dy, z + dz);
                        if is_transparent(n) && n != block {
                            faces |= bit;
                        }
                    }
                    if faces != 0 {
                        blocks.push(VisibleBlock { x: x as u8, y: y as u8, z: z as u8, faces, block });
                    }
                }
            }
        }
        Ok(Self { key, blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::chunk::VoxelBuffer;
    use crate::world::materials::STONE;

    fn chunk(key: ChunkKey, fill: u32) -> Arc<ReducedChunk> {
        Arc::new(ReducedChunk::new(key, VoxelBuffer::filled(fill), false))
    }

    #[test]
    fn solid_block_surrounded_by_solid_is_hidden() {
        let key = ChunkKey::new(0, 0, 0, 2);
        let view = ReducedChunkVisibility::build(key, |k| Ok(chunk(k, STONE))).unwrap();
        assert!(view.blocks.is_empty());
    }

    #[test]
    fn top_face_visible_under_air_neighbour() {
        let key = ChunkKey::new(0, 0, 0, 2);
        let above = key.neighbor(0, 1, 0);
        let view = ReducedChunkVisibility::build(key, |k| Ok(chunk(k, if k == above { AIR } else { STONE }))).unwrap();
        let cs = CHUNK_SIZE as usize;
        assert_eq!(view.blocks.len(), cs * cs);
        assert!(view.blocks.iter().all(|b| b.y as u32 == CHUNK_SIZE - 1 && b.faces == FACE_POS_Y));
    }

    #[test]
    fn single_block_exposes_all_faces() {
        let key = ChunkKey::new(0, 0, 0, 1);
        let view = ReducedChunkVisibility::build(key, |k| {
            let mut v = VoxelBuffer::filled(AIR);
            if k == key {
                v.set(5, 5, 5, STONE);
            }
            Ok(Arc::new(ReducedChunk::new(k, v, false)))
        })
        .unwrap();
        assert_eq!(view.blocks, vec![VisibleBlock { x: 5, y: 5, z: 5, faces: 0b11_1111, block: STONE }]);
    }
}
