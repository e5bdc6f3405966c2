// src/streaming/octree.rs
//
// Level-of-detail octrees around the observer. Roots of size CHUNK_SIZE << highest_lod
// tile a sphere; each root splits towards the observer until it reaches normal chunks.
use std::array;
use std::sync::Arc;

use glam::{DVec3, IVec3};
use log::debug;
use rustc_hash::FxHashMap as HashMap;

use crate::config::{CHUNK_SHIFT, CHUNK_SIZE};
use crate::streaming::types::{ChunkKey, RequestTicket};

/// What the octree needs from the world: terrain bounds for culling and the ability to
/// acquire/release chunk references.
pub trait LodResidency {
    /// (min, max) terrain height of the culling-resolution area containing column `(x, z)`.
    fn height_range(&mut self, x: i32, z: i32) -> (f32, f32);

    fn acquire_full(&mut self, key: ChunkKey);
    fn release_full(&mut self, key: ChunkKey);

    fn acquire_reduced(&mut self, key: ChunkKey) -> Arc<RequestTicket>;
    fn release_reduced(&mut self, key: ChunkKey, ticket: &RequestTicket);
}

enum Leaf {
    Full(ChunkKey),
    Reduced { key: ChunkKey, ticket: Arc<RequestTicket> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeafInfo {
    pub key: ChunkKey,
    pub full: bool,
}

struct OctreeNode {
    origin: IVec3,
    size: i32,
    leaf: Option<Leaf>,
    children: Option<Box<[OctreeNode; 8]>>,
}

impl OctreeNode {
    fn new(origin: IVec3, size: i32) -> Self {
        Self { origin, size, leaf: None, children: None }
    }

    fn make_children(&self) -> Box<[OctreeNode; 8]> {
        let h = self.size / 2;
        Box::new(array::from_fn(|i| {
            let o = IVec3::new(
                if i & 1 == 0 { 0 } else { h },
                if i & 2 == 0 { 0 } else { h },
                if i & 4 == 0 { 0 } else { h },
            );
            OctreeNode::new(self.origin + o, h)
        }))
    }

    fn dispose_leaf<R: LodResidency + ?Sized>(&mut self, res: &mut R) {
        match self.leaf.take() {
            Some(Leaf::Full(key)) => res.release_full(key),
            Some(Leaf::Reduced { key, ticket }) => res.release_reduced(key, &ticket),
            None => {}
        }
    }

    fn cleanup<R: LodResidency + ?Sized>(&mut self, res: &mut R) {
        self.dispose_leaf(res);
        if let Some(mut children) = self.children.take() {
            for c in children.iter_mut() {
                c.cleanup(res);
            }
        }
    }

    /// `near` is the full-resolution radius, `max_rd` this level's split radius.
    fn update<R: LodResidency + ?Sized>(&mut self, res: &mut R, obs: DVec3, near: f64, max_rd: f64) {
        let cs = CHUNK_SIZE as i32;
        let half = self.size as f64 * 0.5;
        let d = (self.origin.as_dvec3() + DVec3::splat(half) - obs).abs();

        // Entirely underground or entirely in the air, and not close: nothing to show.
        let (min_h, max_h) = res.height_range(self.origin.x, self.origin.z);
        if ((self.origin.y + self.size) as f32) <= min_h || (self.origin.y as f32) > max_h {
            let outside = (d - DVec3::splat(half)).max(DVec3::ZERO);
            if outside.length_squared() > near * near {
                self.cleanup(res);
                return;
            }
        }

        if self.size == cs {
            let want_full = d.length_squared() < near * near;
            let have_full = match self.leaf {
                Some(Leaf::Full(_)) => Some(true),
                Some(Leaf::Reduced { .. }) => Some(false),
                None => None,
            };
            if have_full != Some(want_full) {
                self.dispose_leaf(res);
                let key = ChunkKey::new(self.origin.x, self.origin.y, self.origin.z, 1);
                self.leaf = Some(if want_full {
                    res.acquire_full(key);
                    Leaf::Full(key)
                } else {
                    Leaf::Reduced { key, ticket: res.acquire_reduced(key) }
                });
            }
            return;
        }

        // Distance from the observer to the nearest child centre region.
        let quarter = self.size as f64 * 0.25;
        let min_dist = (d - DVec3::splat(quarter)).max(DVec3::ZERO).length_squared();
        let split = if self.size == cs * 2 {
            min_dist < near * near
        } else {
            min_dist < max_rd * max_rd / 4.0
        };

        if split {
            if self.children.is_none() {
                self.children = Some(self.make_children());
            }
            if let Some(children) = self.children.as_mut() {
                for c in children.iter_mut() {
                    c.update(res, obs, near, max_rd / 2.0);
                }
            }
            self.dispose_leaf(res);
        } else {
            if let Some(mut children) = self.children.take() {
                for c in children.iter_mut() {
                    c.cleanup(res);
                }
            }
            if self.leaf.is_none() {
                let voxel_size = (self.size / cs) as u32;
                let key = ChunkKey::new(self.origin.x, self.origin.y, self.origin.z, voxel_size);
                self.leaf = Some(Leaf::Reduced { key, ticket: res.acquire_reduced(key) });
            }
        }
    }

    fn collect_leaves(&self, out: &mut Vec<LeafInfo>) {
        match &self.leaf {
            Some(Leaf::Full(key)) => out.push(LeafInfo { key: *key, full: true }),
            Some(Leaf::Reduced { key, .. }) => out.push(LeafInfo { key: *key, full: false }),
            None => {}
        }
        if let Some(children) = &self.children {
            for c in children.iter() {
                c.collect_leaves(out);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SeekParams {
    pos: IVec3,
    render_distance: u32,
    lod_factor_bits: u32,
    highest_lod: u32,
}

#[derive(Default)]
pub struct LodOctree {
    roots: HashMap<IVec3, OctreeNode>,
    last: Option<SeekParams>,
}

impl LodOctree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-evaluates every root around `pos`. Returns false without doing anything when the
    /// integer position and all parameters match the previous call.
    pub fn seek<R: LodResidency + ?Sized>(
        &mut self,
        res: &mut R,
        pos: DVec3,
        render_distance: u32,
        lod_factor: f32,
        highest_lod: u32,
    ) -> bool {
        let params = SeekParams {
            pos: pos.floor().as_ivec3(),
            render_distance,
            lod_factor_bits: lod_factor.to_bits(),
            highest_lod,
        };
        if self.last == Some(params) {
            return false;
        }
        if self.last.is_some_and(|p| p.highest_lod != highest_lod) {
            // Root size changed; old roots cannot be reused.
            self.clear(res);
        }
        self.last = Some(params);

        let cs = CHUNK_SIZE as i32;
        let p = params.pos;
        let obs = p.as_dvec3();
        let max_rd = ((render_distance << highest_lod) as f64 * lod_factor as f64 * cs as f64).ceil() as i64;
        let near = (render_distance as i64 * cs as i64) as f64;
        let lod_shift = (highest_lod + CHUNK_SHIFT) as i32;
        let lod_size = cs << highest_lod;
        let mask = lod_size - 1;

        let spread = |r: i64, off: i64| -> i64 { ((r * r - off * off).max(0) as f64).sqrt().ceil() as i64 };

        let mut roots = HashMap::default();
        let min_x = (p.x - max_rd as i32) & !mask;
        let max_x = (p.x + max_rd as i32 + mask) & !mask;
        for x in (min_x..=max_x).step_by(lod_size as usize) {
            let ry = spread(max_rd, (x - p.x) as i64);
            let min_y = (p.y - ry as i32) & !mask;
            let max_y = (p.y + ry as i32 + mask) & !mask;
            for y in (min_y..=max_y).step_by(lod_size as usize) {
                let rz = spread(ry, (y - p.y) as i64);
                let min_z = (p.z - rz as i32) & !mask;
                let max_z = (p.z + rz as i32 + mask) & !mask;
                for z in (min_z..=max_z).step_by(lod_size as usize) {
                    let (min_h, max_h) = res.height_range(x, z);
                    if ((y + lod_size) as f32) <= min_h || (y as f32) > max_h {
                        let origin = IVec3::new(x, y, z);
                        let c = origin.as_dvec3() + DVec3::splat(lod_size as f64 * 0.5);
                        let outside = ((c - obs).abs() - DVec3::splat(lod_size as f64 * 0.5)).max(DVec3::ZERO);
                        if outside.length_squared() > near * near {
                            continue;
                        }
                    }

                    let root_key = IVec3::new(x >> lod_shift, y >> lod_shift, z >> lod_shift);
                    let mut node = self
                        .roots
                        .remove(&root_key)
                        .unwrap_or_else(|| OctreeNode::new(IVec3::new(x, y, z), lod_size));
                    node.update(res, obs, near, max_rd as f64);
                    roots.insert(root_key, node);
                }
            }
        }

        // Whatever was not revisited is out of range now.
        let stale = self.roots.len();
        for (_, mut node) in self.roots.drain() {
            node.cleanup(res);
        }
        self.roots = roots;
        debug!(
            "seek ({}, {}, {}) rd={} lod={} factor={}: {} roots, {} torn down",
            p.x, p.y, p.z, render_distance, highest_lod, lod_factor, self.roots.len(), stale
        );
        true
    }

    /// Releases every chunk reference and forgets the last position.
    pub fn clear<R: LodResidency + ?Sized>(&mut self, res: &mut R) {
        for (_, mut node) in self.roots.drain() {
            node.cleanup(res);
        }
        self.last = None;
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Root cubes as (origin, size).
    pub fn roots(&self) -> Vec<(IVec3, i32)> {
        self.roots.values().map(|n| (n.origin, n.size)).collect()
    }

    pub fn leaves(&self) -> Vec<LeafInfo> {
        let mut out = Vec::new();
        for r in self.roots.values() {
            r.collect_leaves(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet as HashSet;

    use super::*;

    /// Records every acquire/release and checks that releases match live references.
    #[derive(Default)]
    struct Recorder {
        heights: Option<(f32, f32)>,
        live_full: HashSet<ChunkKey>,
        live_reduced: HashSet<ChunkKey>,
        acquired_full: Vec<ChunkKey>,
        released_full: Vec<ChunkKey>,
        acquired_reduced: Vec<ChunkKey>,
        released_reduced: Vec<ChunkKey>,
    }

    impl Recorder {
        fn uncapped() -> Self {
            Self { heights: Some((-1.0e9, 1.0e9)), ..Default::default() }
        }

        fn reset_log(&mut self) {
            self.acquired_full.clear();
            self.released_full.clear();
            self.acquired_reduced.clear();
            self.released_reduced.clear();
        }
    }

    impl LodResidency for Recorder {
        fn height_range(&mut self, _x: i32, _z: i32) -> (f32, f32) {
            self.heights.unwrap_or((0.0, 0.0))
        }

        fn acquire_full(&mut self, key: ChunkKey) {
            assert!(self.live_full.insert(key), "full {key} acquired twice");
            self.acquired_full.push(key);
        }

        fn release_full(&mut self, key: ChunkKey) {
            assert!(self.live_full.remove(&key), "full {key} released while not held");
            self.released_full.push(key);
        }

        fn acquire_reduced(&mut self, key: ChunkKey) -> Arc<RequestTicket> {
            assert!(self.live_reduced.insert(key), "reduced {key} acquired twice");
            self.acquired_reduced.push(key);
            RequestTicket::new()
        }

        fn release_reduced(&mut self, key: ChunkKey, _ticket: &RequestTicket) {
            assert!(self.live_reduced.remove(&key), "reduced {key} released while not held");
            self.released_reduced.push(key);
        }
    }

    fn overlaps(a: &ChunkKey, b: &ChunkKey) -> bool {
        let (wa, wb) = (a.width(), b.width());
        a.wx < b.wx + wb
            && b.wx < a.wx + wa
            && a.wy < b.wy + wb
            && b.wy < a.wy + wa
            && a.wz < b.wz + wb
            && b.wz < a.wz + wa
    }

    fn full_set(tree: &LodOctree) -> HashSet<ChunkKey> {
        tree.leaves().into_iter().filter(|l| l.full).map(|l| l.key).collect()
    }

    #[test]
    fn leaves_tile_roots_without_overlap() {
        let mut res = Recorder::uncapped();
        let mut tree = LodOctree::new();
        assert!(tree.seek(&mut res, DVec3::new(5.0, 3.0, -7.0), 2, 1.0, 2));

        let leaves = tree.leaves();
        let leaf_volume: i64 = leaves.iter().map(|l| (l.key.width() as i64).pow(3)).sum();
        let root_volume: i64 = tree.roots().iter().map(|(_, s)| (*s as i64).pow(3)).sum();
        assert_eq!(leaf_volume, root_volume);

        for (i, a) in leaves.iter().enumerate() {
            for b in &leaves[i + 1..] {
                assert!(!overlaps(&a.key, &b.key), "{} overlaps {}", a.key, b.key);
            }
        }
        // The live sets are exactly the leaves.
        assert_eq!(res.live_full.len() + res.live_reduced.len(), leaves.len());
    }

    #[test]
    fn render_distance_two_bounds_full_leaves() {
        let mut res = Recorder::uncapped();
        let mut tree = LodOctree::new();
        let obs = DVec3::ZERO;
        tree.seek(&mut res, obs, 2, 1.0, 3);

        let full = full_set(&tree);
        assert!(!full.is_empty());
        assert!(full.len() <= 64);
        for k in &full {
            assert_eq!(k.voxel_size, 1);
            assert!(k.center().distance(obs) < 64.0);
        }

        // Every chunk centre inside the near radius is full.
        let mut expected = HashSet::default();
        for x in -3..3 {
            for y in -3..3 {
                for z in -3..3 {
                    let k = ChunkKey::new(x * 32, y * 32, z * 32, 1);
                    if k.center().distance(obs) < 64.0 {
                        expected.insert(k);
                    }
                }
            }
        }
        assert_eq!(full, expected);
    }

    #[test]
    fn unchanged_seek_is_a_no_op() {
        let mut res = Recorder::uncapped();
        let mut tree = LodOctree::new();
        assert!(tree.seek(&mut res, DVec3::new(1.2, 0.0, 0.0), 2, 1.5, 2));
        res.reset_log();
        assert!(!tree.seek(&mut res, DVec3::new(1.9, 0.5, 0.3), 2, 1.5, 2));
        assert!(res.acquired_full.is_empty() && res.acquired_reduced.is_empty());
        assert!(res.released_full.is_empty() && res.released_reduced.is_empty());
    }

    #[test]
    fn moving_one_chunk_east_only_touches_the_difference() {
        let mut res = Recorder::uncapped();
        let mut tree = LodOctree::new();
        tree.seek(&mut res, DVec3::new(0.0, 0.0, 0.0), 2, 1.0, 2);
        let before = full_set(&tree);
        res.reset_log();

        tree.seek(&mut res, DVec3::new(32.0, 0.0, 0.0), 2, 1.0, 2);
        let after = full_set(&tree);

        let acquired: HashSet<_> = res.acquired_full.iter().copied().collect();
        let released: HashSet<_> = res.released_full.iter().copied().collect();
        assert_eq!(acquired, after.difference(&before).copied().collect());
        assert_eq!(released, before.difference(&after).copied().collect());
        assert_eq!(res.acquired_full.len(), acquired.len());
        assert!(!acquired.is_empty());
    }

    #[test]
    fn underground_and_sky_roots_are_culled_when_far() {
        // Terrain is flat at height 0.
        let mut res = Recorder::default();
        let mut tree = LodOctree::new();
        tree.seek(&mut res, DVec3::new(0.0, 0.0, 0.0), 1, 2.0, 2);

        let near = 32.0;
        for l in tree.leaves() {
            let k = l.key;
            let w = k.width();
            let culled_band = k.wy + w <= 0 || k.wy > 0;
            if culled_band {
                let c = k.center();
                let d = (c - DVec3::ZERO).abs() - DVec3::splat(w as f64 / 2.0);
                assert!(d.max(DVec3::ZERO).length() <= near, "{k} should have been culled");
            }
        }
        for (origin, size) in tree.roots() {
            assert!(origin.y <= 0 && origin.y + size > 0 || origin.as_dvec3().length() < 256.0);
        }
    }

    #[test]
    fn moving_away_releases_everything_once() {
        let mut res = Recorder::uncapped();
        let mut tree = LodOctree::new();
        tree.seek(&mut res, DVec3::ZERO, 2, 1.0, 2);
        let held = res.live_full.len() + res.live_reduced.len();
        assert!(held > 0);

        tree.seek(&mut res, DVec3::new(1.0e5, 0.0, 0.0), 2, 1.0, 2);
        assert_eq!(res.live_full.len() + res.live_reduced.len(), tree.leaves().len());

        tree.clear(&mut res);
        assert!(res.live_full.is_empty());
        assert!(res.live_reduced.is_empty());
        assert_eq!(tree.root_count(), 0);
    }

    #[test]
    fn changing_highest_lod_rebuilds_roots() {
        let mut res = Recorder::uncapped();
        let mut tree = LodOctree::new();
        tree.seek(&mut res, DVec3::ZERO, 1, 1.0, 1);
        assert!(tree.roots().iter().all(|(_, s)| *s == 64));
        tree.seek(&mut res, DVec3::ZERO, 1, 1.0, 2);
        assert!(tree.roots().iter().all(|(_, s)| *s == 128));
        assert_eq!(res.live_full.len() + res.live_reduced.len(), tree.leaves().len());
    }
}
