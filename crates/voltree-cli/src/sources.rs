//! Volume sources the command line can feed into a tree

use std::fs;
use std::path::Path;

use noise::{NoiseFn, Perlin};
use voltree_core::prelude::{Aabb, DenseVolume, UVec3, Vec3, VolumeError, VolumeSource};

/// A lumpy ball: a sphere of `radius` whose surface is displaced by Perlin noise
#[derive(Debug, Clone)]
pub struct NoiseVolume {
    noise: Perlin,
    radius: f32,
    frequency: f32,
    amplitude: f32,
}

impl NoiseVolume {
    pub fn new(radius: f32) -> Self {
        Self::with_seed(0, radius)
    }

    pub fn with_seed(seed: u32, radius: f32) -> Self {
        Self {
            noise: Perlin::new(seed),
            radius,
            frequency: 3.0,
            amplitude: 0.15,
        }
    }

    pub fn with_detail(mut self, frequency: f32, amplitude: f32) -> Self {
        self.frequency = frequency;
        self.amplitude = amplitude.abs();
        self
    }
}

impl VolumeSource for NoiseVolume {
    fn bounds(&self) -> Aabb {
        Aabb::symmetric(Vec3::splat(self.radius + self.amplitude))
    }

    fn sample(&self, p: Vec3) -> Result<f32, VolumeError> {
        let q = p * self.frequency;
        let n = self.noise.get([q.x as f64, q.y as f64, q.z as f64]) as f32;
        Ok(self.radius - p.length() + self.amplitude * n)
    }
}

/// Read a headerless grid of little-endian `f32` samples, row-major in x, y, z
pub fn load_raw(path: &Path, resolution: UVec3, bounds: Aabb) -> Result<DenseVolume, VolumeError> {
    let bytes = fs::read(path)
        .map_err(|e| VolumeError::Open(format!("{}: {}", path.display(), e)))?;
    let words: &[[u8; 4]] =
        bytemuck::try_cast_slice(&bytes).map_err(|_| VolumeError::SampleCount {
            expected: resolution.x as usize * resolution.y as usize * resolution.z as usize,
            actual: bytes.len() / 4,
        })?;
    let data = words.iter().map(|w| f32::from_le_bytes(*w)).collect();
    tracing::debug!("read {} samples from {}", words.len(), path.display());
    DenseVolume::new(resolution, bounds, data)
}

/// Write samples in the layout [`load_raw`] reads
pub fn save_raw(path: &Path, data: &[f32]) -> Result<(), VolumeError> {
    let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes)?;
    Ok(())
}
