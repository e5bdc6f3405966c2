// src/world/mod.rs
// Terrain: heightmap fragments, generator profiles, block ids and player edits.

pub mod changes;
pub mod generator;
pub mod hash;
pub mod map;
pub mod materials;

pub use changes::{BlockChange, ChangeList};
pub use generator::{Generator, GeneratorProfile, OreGenerator, TerrainGenerator};
pub use map::{MapFragment, MapFragmentGenerator, MapKey, MapProvider, MapSample, NoiseMapGenerator};
