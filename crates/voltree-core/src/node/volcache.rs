//! Leaf wrapping an externally supplied dense volume
//!
//! A volume node has no closed-form expression. It always requires a cache,
//! and its source is sampled once per voxel at the resolution the caching
//! pass assigns.

use std::fmt;

use glam::{UVec3, Vec3};
use thiserror::Error;

use super::Aabb;
use crate::cache::CachedVolume;
use crate::formulas::EMPTY_FIELD;

/// Failures reported by a [`VolumeSource`]
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("failed to open volume: {0}")]
    Open(String),

    #[error("volume expects {expected} samples, got {actual}")]
    SampleCount { expected: usize, actual: usize },

    #[error("failed to sample volume at {0}")]
    Sample(Vec3),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A dense scalar volume owned by the application
pub trait VolumeSource: fmt::Debug {
    /// Region the data covers
    fn bounds(&self) -> Aabb;

    /// Field value at `p`
    fn sample(&self, p: Vec3) -> Result<f32, VolumeError>;
}

/// In-memory volume with trilinear sampling between voxel centres
#[derive(Debug, Clone)]
pub struct DenseVolume {
    resolution: UVec3,
    bounds: Aabb,
    data: Vec<f32>,
}

impl DenseVolume {
    pub fn new(resolution: UVec3, bounds: Aabb, data: Vec<f32>) -> Result<Self, VolumeError> {
        let expected = resolution.x as usize * resolution.y as usize * resolution.z as usize;
        if expected == 0 || data.len() != expected {
            return Err(VolumeError::SampleCount {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            resolution,
            bounds,
            data,
        })
    }

    /// Sample `f` at voxel centres to build a volume. Every axis gets at
    /// least one voxel.
    pub fn from_fn(resolution: UVec3, bounds: Aabb, f: impl Fn(Vec3) -> f32) -> Self {
        let resolution = resolution.max(UVec3::ONE);
        let step = bounds.size() / resolution.as_vec3();
        let mut data = Vec::new();
        for z in 0..resolution.z {
            for y in 0..resolution.y {
                for x in 0..resolution.x {
                    let cell = Vec3::new(x as f32, y as f32, z as f32) + Vec3::splat(0.5);
                    data.push(f(bounds.min + cell * step));
                }
            }
        }
        Self {
            resolution,
            bounds,
            data,
        }
    }

    pub fn resolution(&self) -> UVec3 {
        self.resolution
    }

    fn at(&self, c: UVec3) -> f32 {
        let r = self.resolution;
        self.data[c.x as usize + c.y as usize * r.x as usize + c.z as usize * (r.x * r.y) as usize]
    }
}

impl VolumeSource for DenseVolume {
    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn sample(&self, p: Vec3) -> Result<f32, VolumeError> {
        if !self.bounds.contains(p) {
            return Ok(EMPTY_FIELD);
        }
        let res = self.resolution.as_vec3();
        let g = ((p - self.bounds.min) / self.bounds.size() * res - Vec3::splat(0.5))
            .clamp(Vec3::ZERO, res - Vec3::ONE);
        let lo = g.floor().as_uvec3();
        let hi = (lo + UVec3::ONE).min(self.resolution - UVec3::ONE);
        let t = g - lo.as_vec3();

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let corner = |x: bool, y: bool, z: bool| {
            self.at(UVec3::new(
                if x { hi.x } else { lo.x },
                if y { hi.y } else { lo.y },
                if z { hi.z } else { lo.z },
            ))
        };
        let x00 = lerp(corner(false, false, false), corner(true, false, false), t.x);
        let x10 = lerp(corner(false, true, false), corner(true, true, false), t.x);
        let x01 = lerp(corner(false, false, true), corner(true, false, true), t.x);
        let x11 = lerp(corner(false, true, true), corner(true, true, true), t.x);
        Ok(lerp(lerp(x00, x10, t.y), lerp(x01, x11, t.y), t.z))
    }
}

/// Where the node's data stands after the last bake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loaded,
    Failed,
}

#[derive(Debug)]
pub struct VolCacheNode {
    source: Box<dyn VolumeSource>,
    bounds: Aabb,
    loaded: Option<CachedVolume>,
    state: LoadState,
}

impl VolCacheNode {
    /// Fraction of the source extent added on each side as margin
    const MARGIN: f32 = 0.05;

    pub fn new(source: Box<dyn VolumeSource>) -> Self {
        let src = source.bounds();
        Self {
            bounds: src.pad(src.size() * Self::MARGIN),
            source,
            loaded: None,
            state: LoadState::Unloaded,
        }
    }

    pub fn source(&self) -> &dyn VolumeSource {
        self.source.as_ref()
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    pub fn loaded(&self) -> Option<&CachedVolume> {
        self.loaded.as_ref()
    }

    /// Direct CPU value. A failed source reads as empty space.
    pub fn evaluate(&self, p: Vec3) -> f32 {
        if self.state == LoadState::Failed {
            return EMPTY_FIELD;
        }
        self.source.sample(p).unwrap_or(EMPTY_FIELD)
    }

    /// Sample the source once per voxel over this node's bounds
    pub fn sample_grid(&self, resolution: UVec3) -> Result<CachedVolume, VolumeError> {
        CachedVolume::bake(resolution, &self.bounds, |p| self.source.sample(p))
    }

    /// Keep the grid produced by [`Self::sample_grid`], or the error fallback
    pub(crate) fn store(
        &mut self,
        result: Result<CachedVolume, VolumeError>,
        resolution: UVec3,
    ) -> Result<&CachedVolume, VolumeError> {
        match result {
            Ok(volume) => {
                self.state = LoadState::Loaded;
                Ok(self.loaded.insert(volume))
            }
            Err(e) => {
                self.state = LoadState::Failed;
                self.loaded = Some(CachedVolume::empty(resolution, &self.bounds));
                Err(e)
            }
        }
    }

    /// Nearest-voxel read of the loaded grid, for checks against the baked texture
    pub fn lookup(&self, p: Vec3) -> Option<f32> {
        self.loaded.as_ref().map(|v| v.sample(p))
    }
}
