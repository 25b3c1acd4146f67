//! Voltree Engine - per-update orchestration
//!
//! The Engine is a thin layer that runs the voltree passes in order and
//! decides when the shader program has to be rebuilt.
//!
//! Each [`Engine::update`] runs:
//! 1. bounds
//! 2. the caching pass
//! 3. cache baking for dirty slots
//! 4. on structural change only: parameter registration, registry refresh,
//!    emission and shader assembly
//! 5. the parameter payload push
//!
//! A numeric edit on a parameterized transform skips step 4 entirely.
//!
//! ## Example
//!
//! ```ignore
//! use voltree_engine::Engine;
//!
//! let mut engine = Engine::new();
//! let frame = engine.update(&mut tree)?;
//! if let Some(source) = frame.shader {
//!     // rebuild the pipeline
//! }
//! for kind in frame.dirty_kinds {
//!     // upload engine.packed_parameters(kind)
//! }
//! ```

pub mod settings;

use anyhow::{Context, Result};
use voltree_core::cache::MemoryCacheStore;
use voltree_core::caching::{CachingPolicy, CachingReport};
use voltree_core::params::{ParamKind, ParameterRegistry};
use voltree_core::tree::{BakeReport, Tree};
use voltree_shader::{ShaderAssembler, ShaderLayout};

pub use settings::{Settings, load_settings, save_settings};

/// What one update produced
#[derive(Debug, Default)]
pub struct FrameUpdate {
    /// New program text, present only when it differs from the last one
    pub shader: Option<String>,
    pub caching: CachingReport,
    pub bake: BakeReport,
    /// Parameter arrays whose contents must be re-uploaded
    pub dirty_kinds: Vec<ParamKind>,
}

impl FrameUpdate {
    pub fn recompiled(&self) -> bool {
        self.shader.is_some()
    }
}

/// Drives one tree through the voltree passes
#[derive(Debug)]
pub struct Engine {
    settings: Settings,
    policy: CachingPolicy,
    registry: ParameterRegistry,
    store: MemoryCacheStore,
    assembler: ShaderAssembler,
    last_generation: Option<u64>,
    last_shader: Option<String>,
    recompile_count: usize,
}

impl Engine {
    /// Create an engine with default settings
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            policy: settings.policy(),
            registry: ParameterRegistry::with_capacity(settings.parameter_capacity),
            store: MemoryCacheStore::new(),
            assembler: ShaderAssembler::new(),
            last_generation: None,
            last_shader: None,
            recompile_count: 0,
            settings,
        }
    }

    /// Use a custom template instead of the built-in ray marcher
    pub fn with_assembler(mut self, assembler: ShaderAssembler) -> Self {
        self.assembler = assembler;
        self.last_generation = None;
        self
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Bring GPU-facing state in line with `tree`
    pub fn update(&mut self, tree: &mut Tree) -> Result<FrameUpdate> {
        tree.calc_bounds().context("Failed to compute bounds")?;
        let caching = self.policy.process(tree)?;
        let bake = tree.bake_caches(&mut self.store)?;

        let mut shader = None;
        if self.last_generation != Some(tree.shader_generation()) {
            shader = self.rebuild(tree)?;
            self.last_generation = Some(tree.shader_generation());
        }

        tree.push_parameters(&mut self.registry)?;
        let dirty_kinds = self.registry.take_dirty_kinds();

        Ok(FrameUpdate {
            shader,
            caching,
            bake,
            dirty_kinds,
        })
    }

    /// Structural half of an update. Returns the program text if it changed.
    fn rebuild(&mut self, tree: &mut Tree) -> Result<Option<String>> {
        tree.register_parameters(&mut self.registry);
        self.registry.refresh();
        tree.refresh_parameter_strings(&self.registry);

        let expr = tree.emit_field().context("Failed to emit field expression")?;
        let layout = ShaderLayout::from_registry(&self.registry, tree.active_slots());
        let source = self.assembler.assemble(&expr, &layout);

        if self.last_shader.as_deref() == Some(source.as_str()) {
            tracing::debug!("structural edit left the program text unchanged");
            return Ok(None);
        }

        self.recompile_count += 1;
        tracing::info!(
            "shader rebuilt ({} bytes, {} cache slot(s), {} parameter(s))",
            source.len(),
            layout.cache_slots.len(),
            self.registry.len()
        );
        self.last_shader = Some(source.clone());
        Ok(Some(source))
    }

    /// Free every parameter slot `tree` holds and forget its program
    pub fn release(&mut self, tree: &mut Tree) {
        tree.release_parameters(&mut self.registry);
        self.registry.refresh();
        self.last_generation = None;
        self.last_shader = None;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MemoryCacheStore {
        &self.store
    }

    /// The current program text, if one has been built
    pub fn shader(&self) -> Option<&str> {
        self.last_shader.as_deref()
    }

    /// Number of times the program text changed
    pub fn recompile_count(&self) -> usize {
        self.recompile_count
    }

    /// Upload-ready bytes for one parameter array
    pub fn packed_parameters(&self, kind: ParamKind) -> Vec<u8> {
        self.registry.packed_bytes(kind)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use voltree_core::prelude::Vec3;

    #[test]
    fn test_engine_creation() {
        let engine = Engine::new();
        assert!(engine.shader().is_none());
        assert_eq!(engine.recompile_count(), 0);
    }

    #[test]
    fn first_update_builds_a_program() {
        let mut tree = Tree::new();
        let s = tree.sphere(1.0);
        tree.set_root(s).unwrap();

        let mut engine = Engine::new();
        let frame = engine.update(&mut tree).unwrap();
        assert!(frame.recompiled());
        assert!(engine.shader().unwrap().contains("return field_sphere(p, 1.000000);"));

        let again = engine.update(&mut tree).unwrap();
        assert!(!again.recompiled());
        assert_eq!(engine.recompile_count(), 1);
    }

    #[test]
    fn empty_tree_is_an_error() {
        let mut tree = Tree::new();
        let mut engine = Engine::new();
        assert!(engine.update(&mut tree).is_err());
    }

    #[test]
    fn release_frees_slots() {
        let mut tree = Tree::new();
        let s = tree.sphere(1.0);
        let t = tree.translate(s, Vec3::X).unwrap();
        tree.set_root(t).unwrap();
        tree.set_parameterized(t, true).unwrap();

        let mut engine = Engine::new();
        engine.update(&mut tree).unwrap();
        assert_eq!(engine.registry().len(), 1);
        engine.release(&mut tree);
        assert!(engine.registry().is_empty());
        assert!(engine.shader().is_none());
    }
}
