// src/world/hash.rs
//
// Stateless integer hashing and lattice value noise. Everything here is a pure function of
// its inputs so regenerated content is bit-identical.

#[inline]
pub fn splitmix64(mut v: u64) -> u64 {
    v = v.wrapping_add(0x9e37_79b9_7f4a_7c15);
    v = (v ^ (v >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    v = (v ^ (v >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    v ^ (v >> 31)
}

/// 32-bit seed for `noise` sources, folded from a 64-bit world seed.
#[inline]
pub fn noise_seed(seed: u64) -> u32 {
    let h = splitmix64(seed);
    (h ^ (h >> 32)) as u32
}

#[inline]
pub fn hash3(seed: u64, x: i32, y: i32, z: i32) -> u64 {
    let a = (x as u32 as u64).wrapping_mul(0x9e37_79b1);
    let b = (y as u32 as u64).wrapping_mul(0x85eb_ca6b) << 21;
    let c = (z as u32 as u64).wrapping_mul(0xc2b2_ae35) << 42;
    splitmix64(seed ^ a ^ b ^ c)
}

/// Maps a hash to [0, 1).
#[inline]
pub fn unit(h: u64) -> f32 {
    (h >> 40) as f32 * (1.0 / (1u64 << 24) as f32)
}

/// Maps a hash to [-1, 1).
#[inline(always)]
pub fn signed_unit(h: u64) -> f32 {
    unit(h) * 2.0 - 1.0
}

#[inline(always)]
fn smooth(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

#[inline(always)]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Trilinear value noise in [-1, 1] with lattice spacing `cell` world units.
pub fn value_noise3(seed: u64, x: i32, y: i32, z: i32, cell: i32) -> f32 {
    let (x0, fx) = (x.div_euclid(cell), x.rem_euclid(cell) as f32 / cell as f32);
    let (y0, fy) = (y.div_euclid(cell), y.rem_euclid(cell) as f32 / cell as f32);
    let (z0, fz) = (z.div_euclid(cell), z.rem_euclid(cell) as f32 / cell as f32);
    let (tx, ty, tz) = (smooth(fx), smooth(fy), smooth(fz));

    let v = |dx: i32, dy: i32, dz: i32| signed_unit(hash3(seed, x0 + dx, y0 + dy, z0 + dz));

    let x00 = lerp(v(0, 0, 0), v(1, 0, 0), tx);
    let x10 = lerp(v(0, 1, 0), v(1, 1, 0), tx);
    let x01 = lerp(v(0, 0, 1), v(1, 0, 1), tx);
    let x11 = lerp(v(0, 1, 1), v(1, 1, 1), tx);
    lerp(lerp(x00, x10, ty), lerp(x01, x11, ty), tz)
}
