//! Built-in scenes

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use voltree_core::prelude::{Aabb, BlendParams, CsgOp, NodeId, Tree, UVec3, Vec3};

use crate::sources::{NoiseVolume, load_raw};

/// Label of the transform the `drag` command moves
pub const HANDLE_LABEL: &str = "handle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scene {
    /// Hollow cylinder with two blended bands
    Barrel,
    /// Blended body with a sliding knob on a parameterized transform
    Slider,
    /// Noise-displaced ball next to a sphere; the ball is a cached volume
    Lumpy,
}

impl Scene {
    pub fn build(self) -> Result<Tree> {
        let mut tree = Tree::new();
        let root = match self {
            Self::Barrel => barrel(&mut tree)?,
            Self::Slider => slider(&mut tree)?,
            Self::Lumpy => lumpy(&mut tree)?,
        };
        tree.set_root(root)?;
        Ok(tree)
    }
}

fn barrel(tree: &mut Tree) -> Result<NodeId> {
    let body = tree.cylinder(0.5, 1.2);
    let hoop = BlendParams {
        a0: 0.2,
        a1: 0.3,
        a2: 0.3,
    };

    let top_band = tree.torus(0.5, 0.08);
    let top = tree.translate(top_band, Vec3::new(0.0, 0.0, 0.5))?;
    tree.set_label(top, HANDLE_LABEL)?;
    let bottom_band = tree.torus(0.5, 0.08);
    let bottom = tree.translate(bottom_band, Vec3::new(0.0, 0.0, -0.5))?;

    let banded = tree.blend(CsgOp::Union, body, top, hoop)?;
    let banded = tree.blend(CsgOp::Union, banded, bottom, hoop)?;
    let bore = tree.cylinder(0.42, 1.4);
    let barrel = tree.subtraction(banded, bore)?;
    tree.set_label(barrel, "barrel")?;
    Ok(barrel)
}

fn slider(tree: &mut Tree) -> Result<NodeId> {
    let body = tree.cube(1.0);
    let ring = tree.torus(0.8, 0.1);
    let base = tree.blend(CsgOp::Union, body, ring, BlendParams::default())?;
    tree.set_label(base, "base")?;

    let knob = tree.sphere(0.4);
    let handle = tree.translate(knob, Vec3::new(1.5, 0.0, 0.0))?;
    tree.set_label(handle, HANDLE_LABEL)?;
    tree.set_parameterized(handle, true)?;

    Ok(tree.union(base, handle)?)
}

fn lumpy(tree: &mut Tree) -> Result<NodeId> {
    let ball = tree.volume(Box::new(NoiseVolume::with_seed(7, 0.8)));
    tree.set_label(ball, "ball")?;
    let moon = tree.sphere(0.3);
    let handle = tree.translate(moon, Vec3::new(1.3, 0.0, 0.0))?;
    tree.set_label(handle, HANDLE_LABEL)?;
    Ok(tree.union(ball, handle)?)
}

/// Union a raw `f32` grid spanning `[-1, 1]³` into the scene
pub fn attach_raw_volume(tree: &mut Tree, path: &Path, resolution: u32) -> Result<NodeId> {
    let volume = load_raw(path, UVec3::splat(resolution), Aabb::symmetric(Vec3::ONE))
        .with_context(|| format!("Failed to load volume {}", path.display()))?;
    let node = tree.volume(Box::new(volume));
    let root = tree.root().context("Scene has no root")?;
    let combined = tree.union(root, node)?;
    tree.set_root(combined)?;
    Ok(node)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use voltree_engine::{Engine, Settings};

    fn small_engine() -> Engine {
        Engine::with_settings(Settings {
            max_voxels: 32 * 32 * 32,
            per_node_ceiling: 32 * 32 * 32,
            ..Settings::default()
        })
    }

    #[test]
    fn every_scene_builds_and_compiles() {
        for scene in Scene::value_variants() {
            let mut tree = scene.build().unwrap();
            let frame = small_engine().update(&mut tree).unwrap();
            assert!(frame.recompiled(), "{scene:?} produced no program");
            assert!(frame.bake.is_clean(), "{scene:?} failed to bake");
            assert!(tree.find(HANDLE_LABEL).is_some());
        }
    }

    #[test]
    fn barrel_is_hollow() {
        let tree = Scene::Barrel.build().unwrap();
        assert!(tree.evaluate(Vec3::ZERO).unwrap() < 0.0);
        assert!(tree.evaluate(Vec3::new(0.46, 0.0, 0.0)).unwrap() > 0.0);
    }

    #[test]
    fn lumpy_ball_reads_from_its_cache() {
        let mut tree = Scene::Lumpy.build().unwrap();
        let mut engine = small_engine();
        let frame = engine.update(&mut tree).unwrap();
        assert_eq!(frame.bake.baked, vec![0]);
        assert!(engine.shader().unwrap().contains("sample_cache("));
    }
}
