// src/world/map.rs
//
// 2-D height/biome fragments. A fragment covers MAP_SIZE x MAP_SIZE cells of one voxel size,
// i.e. a world-aligned square of side MAP_SIZE * voxel_size.
use std::sync::Arc;

use log::trace;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

use crate::config::{StreamConfig, CULL_VOXEL_SIZE, MAP_SIZE, MAX_LOD, SEA_LEVEL};
use crate::persistence::SaveHandle;
use crate::streaming::cache::BucketCache;
use crate::streaming::types::CacheStats;
use crate::world::hash::noise_seed;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Biome {
    Ocean = 0,
    Grassland = 1,
    Desert = 2,
    Mountains = 3,
    Tundra = 4,
}

impl Biome {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Ocean,
            1 => Self::Grassland,
            2 => Self::Desert,
            3 => Self::Mountains,
            4 => Self::Tundra,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct MapKey {
    pub wx: i32,
    pub wz: i32,
    pub voxel_size: u32,
}

impl MapKey {
    #[inline]
    pub fn containing(x: i32, z: i32, voxel_size: u32) -> Self {
        let mask = !(Self::width_for(voxel_size) - 1);
        Self { wx: x & mask, wz: z & mask, voxel_size }
    }

    #[inline(always)]
    pub fn width_for(voxel_size: u32) -> i32 {
        (MAP_SIZE * voxel_size) as i32
    }

    #[inline(always)]
    pub fn width(&self) -> i32 {
        Self::width_for(self.voxel_size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapSample {
    pub height: f32,
    pub biome: Biome,
}

pub struct MapFragment {
    pub key: MapKey,
    heights: Box<[f32]>,
    biomes: Box<[Biome]>,
    min_height: f32,
    max_height: f32,
}

impl MapFragment {
    pub fn from_samples(key: MapKey, samples: Vec<MapSample>) -> Self {
        debug_assert_eq!(samples.len(), (MAP_SIZE * MAP_SIZE) as usize);
        let heights: Box<[f32]> = samples.iter().map(|s| s.height).collect();
        let biomes: Box<[Biome]> = samples.iter().map(|s| s.biome).collect();
        let (min_height, max_height) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        Self { key, heights, biomes, min_height, max_height }
    }

    #[inline]
    fn cell_index(&self, x: i32, z: i32) -> usize {
        let shift = self.key.voxel_size.trailing_zeros();
        let cx = ((x - self.key.wx) >> shift) as usize & (MAP_SIZE as usize - 1);
        let cz = ((z - self.key.wz) >> shift) as usize & (MAP_SIZE as usize - 1);
        cx + cz * MAP_SIZE as usize
    }

    /// Height at world column `(x, z)`, which must lie inside this fragment.
    #[inline]
    pub fn height(&self, x: i32, z: i32) -> f32 {
        self.heights[self.cell_index(x, z)]
    }

    #[inline]
    pub fn biome(&self, x: i32, z: i32) -> Biome {
        self.biomes[self.cell_index(x, z)]
    }

    pub fn min_height(&self) -> f32 {
        self.min_height
    }

    pub fn max_height(&self) -> f32 {
        self.max_height
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn biomes(&self) -> &[Biome] {
        &self.biomes
    }
}

/// Pure per-column terrain source. Must return identical output for identical input.
pub trait MapFragmentGenerator: Send + Sync {
    fn sample(&self, x: i32, z: i32) -> MapSample;
}

pub struct NoiseMapGenerator {
    height: Fbm<Perlin>,
    detail: Fbm<Perlin>,
    climate: Fbm<Perlin>,
}

impl NoiseMapGenerator {
    pub fn new(seed: u64) -> Self {
        let s = noise_seed(seed);
        Self {
            height: Fbm::<Perlin>::new(s).set_octaves(6).set_frequency(0.0025),
            detail: Fbm::<Perlin>::new(s ^ 0xA5A5_A5A5).set_octaves(3).set_frequency(0.02),
            climate: Fbm::<Perlin>::new(s ^ 0x3C3C_3C3C).set_octaves(2).set_frequency(0.0008),
        }
    }
}

impl MapFragmentGenerator for NoiseMapGenerator {
    fn sample(&self, x: i32, z: i32) -> MapSample {
        let p = [x as f64, z as f64];
        let h0 = self.height.get(p) as f32;
        let h1 = self.detail.get(p) as f32;
        let height = (16.0 + h0 * 72.0 + h1 * 4.0).round();

        let t = self.climate.get(p) as f32;
        let biome = if height < SEA_LEVEL as f32 {
            Biome::Ocean
        } else if height > 56.0 {
            Biome::Mountains
        } else if t > 0.3 {
            Biome::Desert
        } else if t < -0.3 {
            Biome::Tundra
        } else {
            Biome::Grassland
        };
        MapSample { height, biome }
    }
}

/// One fragment cache per LOD tier, evicted fragments go to the save queue.
pub struct MapProvider {
    generator: Arc<dyn MapFragmentGenerator>,
    tiers: Vec<BucketCache<MapKey, MapFragment>>,
    saves: SaveHandle,
}

impl MapProvider {
    pub fn new(cfg: &StreamConfig, generator: Arc<dyn MapFragmentGenerator>, saves: SaveHandle) -> Self {
        let tiers = (0..=MAX_LOD as usize)
            .map(|lod| BucketCache::new(cfg.map_cache_geometry(lod)))
            .collect();
        Self { generator, tiers, saves }
    }

    fn generate(&self, key: MapKey) -> MapFragment {
        let vs = key.voxel_size as i32;
        let n = MAP_SIZE as usize;
        let samples: Vec<MapSample> = (0..n * n)
            .into_par_iter()
            .map(|i| {
                let cx = (i % n) as i32;
                let cz = (i / n) as i32;
                self.generator.sample(key.wx + cx * vs, key.wz + cz * vs)
            })
            .collect();
        trace!("generated map fragment {:?}", key);
        MapFragment::from_samples(key, samples)
    }

    pub fn get_or_generate_map_fragment(&self, wx: i32, wz: i32, voxel_size: u32) -> Arc<MapFragment> {
        let key = MapKey::containing(wx, wz, voxel_size);
        let tier = (voxel_size.trailing_zeros() as usize).min(self.tiers.len() - 1);
        let res = self.tiers[tier].get_or_insert_with(key, || Ok::<_, std::convert::Infallible>(self.generate(key)));
        let (fragment, evicted) = match res {
            Ok(v) => v,
            Err(never) => match never {},
        };
        if let Some((_, old)) = evicted {
            self.saves.save_map_fragment(old);
        }
        fragment
    }

    /// Lowest and highest terrain height around `(x, z)` at culling resolution.
    pub fn height_range(&self, x: i32, z: i32) -> (f32, f32) {
        let f = self.get_or_generate_map_fragment(x, z, CULL_VOXEL_SIZE);
        (f.min_height(), f.max_height())
    }

    pub fn stats(&self) -> CacheStats {
        self.tiers.iter().map(|t| t.stats()).fold(CacheStats::default(), |mut acc, s| {
            acc.entries += s.entries;
            acc.capacity += s.capacity;
            acc.requests += s.requests;
            acc.misses += s.misses;
            acc.evictions += s.evictions;
            acc
        })
    }

    /// Pushes every cached fragment through the save queue and empties the caches.
    pub fn flush_all(&self) {
        for tier in &self.tiers {
            for (_, fragment) in tier.drain() {
                self.saves.save_map_fragment(fragment);
            }
        }
    }
}
