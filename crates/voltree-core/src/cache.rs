//! Baked cache contents and the slot store they are handed to
//!
//! A cache is a dense row-major grid (`x + y·resX + z·resX·resY`) of field
//! samples taken at voxel centres over a node's bounds. The GPU reads it
//! through `sample_cache`; the CPU reads it through [`CachedVolume::nearest`]
//! for consistency checks only.

use std::collections::BTreeMap;

use glam::{UVec3, Vec3};

use crate::formulas::EMPTY_FIELD;
use crate::node::Aabb;

/// A baked grid of field samples plus its field-to-texture mapping
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVolume {
    pub resolution: UVec3,
    pub offset: Vec3,
    pub scale: Vec3,
    pub data: Vec<f32>,
}

impl CachedVolume {
    /// Sample `f` once per voxel centre of `bounds` at `resolution`
    pub fn bake<E>(
        resolution: UVec3,
        bounds: &Aabb,
        mut f: impl FnMut(Vec3) -> Result<f32, E>,
    ) -> Result<Self, E> {
        let res = resolution.max(UVec3::ONE);
        let step = bounds.size() / res.as_vec3();
        let mut data = Vec::with_capacity(res.x as usize * res.y as usize * res.z as usize);

        for z in 0..res.z {
            for y in 0..res.y {
                for x in 0..res.x {
                    let cell = Vec3::new(x as f32, y as f32, z as f32) + Vec3::splat(0.5);
                    data.push(f(bounds.min + cell * step)?);
                }
            }
        }

        Ok(Self::with_data(res, bounds, data))
    }

    /// Every voxel empty; stands in for a source that failed to load
    pub fn empty(resolution: UVec3, bounds: &Aabb) -> Self {
        let res = resolution.max(UVec3::ONE);
        let len = res.x as usize * res.y as usize * res.z as usize;
        Self::with_data(res, bounds, vec![EMPTY_FIELD; len])
    }

    fn with_data(resolution: UVec3, bounds: &Aabb, data: Vec<f32>) -> Self {
        let size = bounds.size();
        Self {
            resolution,
            offset: bounds.min,
            scale: Vec3::select(size.cmpgt(Vec3::ZERO), size.recip(), Vec3::ZERO),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major index of a voxel
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let r = self.resolution;
        x as usize + y as usize * r.x as usize + z as usize * r.x as usize * r.y as usize
    }

    /// Nearest voxel at unit-cube coordinate `uvw`; empty outside the cube
    pub fn nearest(&self, uvw: Vec3) -> f32 {
        if uvw.cmplt(Vec3::ZERO).any() || uvw.cmpgt(Vec3::ONE).any() {
            return EMPTY_FIELD;
        }
        let r = self.resolution;
        let cell = (uvw * r.as_vec3()).floor().as_uvec3().min(r - UVec3::ONE);
        self.data[self.index(cell.x, cell.y, cell.z)]
    }

    /// Nearest voxel at field-space point `p`
    pub fn sample(&self, p: Vec3) -> f32 {
        self.nearest((p - self.offset) * self.scale)
    }

    /// Z-slice `z` as a row-major `resX × resY` view
    pub fn slice(&self, z: u32) -> Option<&[f32]> {
        if z >= self.resolution.z {
            return None;
        }
        let len = self.resolution.x as usize * self.resolution.y as usize;
        let start = z as usize * len;
        self.data.get(start..start + len)
    }
}

/// Resource context receiving baked slots. Slot ids map 1:1 to texture units.
pub trait CacheStore {
    /// Hand over the contents of `slot`, replacing anything resident
    fn upload(&mut self, slot: u32, volume: &CachedVolume);

    /// Drop the contents of `slot`
    fn release(&mut self, slot: u32);

    /// Slots currently holding data
    fn resident_slots(&self) -> Vec<u32>;
}

/// Store keeping every slot in memory
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    slots: BTreeMap<u32, CachedVolume>,
    uploads: usize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: u32) -> Option<&CachedVolume> {
        self.slots.get(&slot)
    }

    /// Total uploads since creation
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Total voxels resident across all slots
    pub fn voxel_count(&self) -> usize {
        self.slots.values().map(CachedVolume::len).sum()
    }
}

impl CacheStore for MemoryCacheStore {
    fn upload(&mut self, slot: u32, volume: &CachedVolume) {
        self.uploads += 1;
        self.slots.insert(slot, volume.clone());
    }

    fn release(&mut self, slot: u32) {
        self.slots.remove(&slot);
    }

    fn resident_slots(&self) -> Vec<u32> {
        self.slots.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn ramp(res: u32) -> CachedVolume {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(1.0));
        CachedVolume::bake(UVec3::splat(res), &bounds, |p| Ok::<_, Infallible>(p.x))
            .unwrap_or_else(|e| match e {})
    }

    #[test]
    fn bake_is_row_major_at_voxel_centres() {
        let v = ramp(4);
        assert_eq!(v.len(), 64);
        assert!((v.data[v.index(0, 0, 0)] - 0.125).abs() < 1e-6);
        assert!((v.data[v.index(3, 0, 0)] - 0.875).abs() < 1e-6);
        assert!((v.data[v.index(1, 2, 3)] - 0.375).abs() < 1e-6);
    }

    #[test]
    fn nearest_lookup_and_outside_is_empty() {
        let v = ramp(4);
        assert!((v.sample(Vec3::new(0.1, 0.5, 0.5)) - 0.125).abs() < 1e-6);
        assert!((v.sample(Vec3::new(1.0, 0.5, 0.5)) - 0.875).abs() < 1e-6);
        assert_eq!(v.sample(Vec3::new(1.5, 0.5, 0.5)), EMPTY_FIELD);
    }

    #[test]
    fn store_tracks_resident_slots() {
        let mut store = MemoryCacheStore::new();
        store.upload(2, &ramp(2));
        store.upload(0, &ramp(2));
        assert_eq!(store.resident_slots(), vec![0, 2]);
        store.release(2);
        assert_eq!(store.resident_slots(), vec![0]);
        assert_eq!(store.upload_count(), 2);
        assert_eq!(store.voxel_count(), 8);
    }

    #[test]
    fn slices_cover_one_z_layer() {
        let v = ramp(4);
        assert_eq!(v.slice(3).map(<[f32]>::len), Some(16));
        assert!(v.slice(4).is_none());
    }
}
