//! # Voltree Core
//!
//! Implicit-surface expression trees for GPU ray marching.
//!
//! A [`Tree`] combines closed-form primitives with R-function CSG, blends and
//! affine transforms. The same tree is evaluated on the CPU and emitted as a
//! WGSL field expression. Expensive subtrees and external volumes are baked
//! into 3D cache textures whose resolutions are balanced against a global
//! voxel budget by [`CachingPolicy`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltree_core::prelude::*;
//!
//! let mut tree = Tree::new();
//! let body = tree.cube(2.0);
//! let hole = tree.cylinder(0.4, 3.0);
//! let root = tree.subtraction(body, hole)?;
//! tree.set_root(root)?;
//!
//! tree.calc_bounds()?;
//! CachingPolicy::default().process(&mut tree)?;
//! let expr = tree.emit_field()?;
//! ```
//!
//! ## Conventions
//!
//! - **Inside**: a field value `>= 0` is inside the solid
//! - **Empty space**: caches and failed volumes read as `-1.0`
//! - **Angles**: radians, XYZ Euler order
//! - **Axes**: Cylinder, Cone and Torus are aligned with Z

pub mod cache;
pub mod caching;
pub mod emit;
pub mod formulas;
pub mod node;
pub mod params;
pub mod tree;

mod error;

pub use cache::{CacheStore, CachedVolume, MemoryCacheStore};
pub use caching::{CacheBudget, CachingPolicy, CachingReport};
pub use error::{Error, Result};
pub use node::{Aabb, NodeId, NodeKind};
pub use params::{ParamId, ParamKind, ParameterRegistry};
pub use tree::{BakeReport, Tree};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheStore, CachedVolume, MemoryCacheStore};
    pub use crate::caching::{CacheBudget, CachingPolicy};
    pub use crate::node::{
        Aabb, BlendParams, CsgOp, DenseVolume, NodeId, NodeKind, TransformParams, VolumeError,
        VolumeSource,
    };
    pub use crate::params::{ParamId, ParamKind, ParameterRegistry};
    pub use crate::tree::{BakeReport, Tree};

    // Math (re-export glam)
    pub use glam::{Mat4, UVec3, Vec3};

    // Error handling
    pub use crate::{Error, Result};
}
