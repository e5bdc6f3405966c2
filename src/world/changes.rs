// src/world/changes.rs
//
// Player edits of one normal chunk, kept sorted by voxel index.
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BlockChange {
    pub index: u32,
    pub old: u32,
    pub new: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeList {
    list: Vec<BlockChange>,
}

impl ChangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from persisted entries; later duplicates of an index win.
    pub fn from_entries(entries: impl IntoIterator<Item = BlockChange>) -> Self {
        let mut out = Self::new();
        for e in entries {
            match out.list.binary_search_by_key(&e.index, |c| c.index) {
                Ok(pos) => out.list[pos] = e,
                Err(pos) => out.list.insert(pos, e),
            }
        }
        out
    }

    /// Records `index: old -> new`. Setting a voxel back to its generated value drops the entry.
    pub fn record(&mut self, index: u32, old: u32, new: u32) {
        match self.list.binary_search_by_key(&index, |c| c.index) {
            Ok(pos) => {
                if self.list[pos].old == new {
                    self.list.remove(pos);
                } else {
                    self.list[pos].new = new;
                }
            }
            Err(pos) => {
                if old != new {
                    self.list.insert(pos, BlockChange { index, old, new });
                }
            }
        }
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&BlockChange> {
        self.list
            .binary_search_by_key(&index, |c| c.index)
            .ok()
            .map(|pos| &self.list[pos])
    }

    /// Writes every `new` value into `voxels`. Out-of-range indices are skipped.
    pub fn apply(&self, voxels: &mut [u32]) {
        for c in &self.list {
            if let Some(v) = voxels.get_mut(c.index as usize) {
                *v = c.new;
            }
        }
    }

    pub fn entries(&self) -> &[BlockChange] {
        &self.list
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.list)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
