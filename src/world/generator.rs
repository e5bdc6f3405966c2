// src/world/generator.rs
//
// Chunk generators. A profile runs every registered generator, highest priority first,
// against one voxel buffer; each sees `world_seed ^ generator_seed`.
use crate::config::{CHUNK_SIZE, SEA_LEVEL};
use crate::error::Result;
use crate::streaming::chunk::VoxelBuffer;
use crate::streaming::types::ChunkKey;
use crate::world::hash::{hash3, unit, value_noise3};
use crate::world::map::{Biome, MapFragment};
use crate::world::materials::{AIR, DIRT, GRASS, ORE, SAND, SNOW, STONE, WATER};

pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs earlier.
    fn priority(&self) -> i32;

    fn generator_seed(&self) -> u64;

    /// Fills or amends `voxels` for `key`. `map` is the fragment at `key.voxel_size`
    /// containing the chunk's columns.
    fn generate(&self, seed: u64, key: ChunkKey, map: &MapFragment, voxels: &mut VoxelBuffer) -> Result<()>;
}

pub struct GeneratorProfile {
    generators: Vec<Box<dyn Generator>>,
}

impl GeneratorProfile {
    pub fn new(mut generators: Vec<Box<dyn Generator>>) -> Self {
        // Stable sort: equal priorities keep registration order.
        generators.sort_by_key(|g| std::cmp::Reverse(g.priority()));
        Self { generators }
    }

    pub fn default_profile() -> Self {
        Self::new(vec![Box::new(TerrainGenerator::with_caves()), Box::new(OreGenerator::default())])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.generators.iter().map(|g| g.name()).collect()
    }

    pub fn generate(&self, seed: u64, key: ChunkKey, map: &MapFragment, voxels: &mut VoxelBuffer) -> Result<()> {
        for g in &self.generators {
            g.generate(seed ^ g.generator_seed(), key, map, voxels)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Terrain
// ---------------------------------------------------------------------

/// Column fill from the map fragment: stone, a biome-dependent surface layer, water up to
/// sea level. Optionally carves tunnels where two noise fields are both near zero.
pub struct TerrainGenerator {
    caves: bool,
}

impl TerrainGenerator {
    pub fn new() -> Self {
        Self { caves: false }
    }

    pub fn with_caves() -> Self {
        Self { caves: true }
    }

    #[inline]
    fn surface_block(biome: Biome, depth: i32) -> u32 {
        match biome {
            Biome::Desert | Biome::Ocean => SAND,
            Biome::Tundra if depth == 0 => SNOW,
            Biome::Mountains if depth == 0 => STONE,
            _ if depth == 0 => GRASS,
            _ => DIRT,
        }
    }

    #[inline]
    fn is_tunnel(seed: u64, x: i32, y: i32, z: i32) -> bool {
        let a = value_noise3(seed, x, y, z, 24);
        let b = value_noise3(seed ^ 0xB4B4_B4B4, x, y, z, 20);
        a.abs() < 0.07 && b.abs() < 0.07
    }
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for TerrainGenerator {
    fn name(&self) -> &'static str {
        "terrain"
    }

    fn priority(&self) -> i32 {
        1024
    }

    fn generator_seed(&self) -> u64 {
        0x765_3217_8193_4561
    }

    fn generate(&self, seed: u64, key: ChunkKey, map: &MapFragment, voxels: &mut VoxelBuffer) -> Result<()> {
        let vs = key.voxel_size as i32;
        let cs = CHUNK_SIZE as i32;
        // Surface layers are 3 world units thick whatever the resolution.
        let soil = (3 / vs).max(1);

        for lz in 0..cs {
            for lx in 0..cs {
                let x = key.wx + lx * vs;
                let z = key.wz + lz * vs;
                let height = map.height(x, z) as i32;
                let biome = map.biome(x, z);

                for ly in 0..cs {
                    let y = key.wy + ly * vs;
                    let block = if y <= height {
                        let depth = (height - y) / vs;
                        if self.caves && depth > 2 && Self::is_tunnel(seed, x, y, z) {
                            AIR
                        } else if depth < soil {
                            Self::surface_block(biome, depth)
                        } else {
                            STONE
                        }
                    } else if y <= SEA_LEVEL {
                        WATER
                    } else {
                        AIR
                    };
                    voxels.set(lx as u32, ly as u32, lz as u32, block);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Ores
// ---------------------------------------------------------------------

/// Scatters ore into stone. Only adds; never depends on other cells being empty.
pub struct OreGenerator {
    /// Chance per stone cell at voxel size 1.
    pub density: f32,
}

impl Default for OreGenerator {
    fn default() -> Self {
        Self { density: 0.004 }
    }
}

impl Generator for OreGenerator {
    fn name(&self) -> &'static str {
        "ore"
    }

    fn priority(&self) -> i32 {
        32
    }

    fn generator_seed(&self) -> u64 {
        0x0E0E_5EED_0000_0001
    }

    fn generate(&self, seed: u64, key: ChunkKey, _map: &MapFragment, voxels: &mut VoxelBuffer) -> Result<()> {
        let vs = key.voxel_size as i32;
        let cs = CHUNK_SIZE;
        for lz in 0..cs {
            for ly in 0..cs {
                for lx in 0..cs {
                    if voxels.get(lx, ly, lz) != STONE {
                        continue;
                    }
                    let x = key.wx + lx as i32 * vs;
                    let y = key.wy + ly as i32 * vs;
                    let z = key.wz + lz as i32 * vs;
                    if unit(hash3(seed, x, y, z)) < self.density {
                        voxels.set(lx, ly, lz, ORE);
                    }
                }
            }
        }
        Ok(())
    }
}
