// src/world/materials.rs
pub const AIR: u32 = 0;
pub const STONE: u32 = 1;
pub const DIRT: u32 = 2;
pub const GRASS: u32 = 3;
pub const SAND: u32 = 4;
pub const SNOW: u32 = 5;
pub const WATER: u32 = 6;
pub const ORE: u32 = 7;
pub const CHEST: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockClass {
    Air,
    Solid,
    Liquid,
    /// Carries per-block state tracked by the chunk.
    Entity,
}

#[inline]
pub fn block_class(block: u32) -> BlockClass {
    match block {
        AIR => BlockClass::Air,
        WATER => BlockClass::Liquid,
        CHEST => BlockClass::Entity,
        _ => BlockClass::Solid,
    }
}

/// Faces next to these blocks are visible.
#[inline]
pub fn is_transparent(block: u32) -> bool {
    matches!(block_class(block), BlockClass::Air | BlockClass::Liquid)
}
