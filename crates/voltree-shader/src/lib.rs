//! Voltree Shader - WGSL assembly for generated field expressions
//!
//! `voltree-core` emits a single field expression. This crate supplies
//! everything around it: the field-function library the expression calls,
//! declarations for the parameter arrays and cache textures it reads, and a
//! ray-march template to splice it all into.
//!
//! ## Example
//!
//! ```rust,ignore
//! use voltree_shader::{ShaderAssembler, ShaderLayout};
//!
//! let expr = tree.emit_field()?;
//! let layout = ShaderLayout::from_registry(&registry, tree.active_slots());
//! let source = ShaderAssembler::new().assemble(&expr, &layout);
//! ```

mod assemble;

pub use assemble::{
    DECLARATIONS_MARKER, FIELD_MARKER, LIBRARY_MARKER, ShaderAssembler, ShaderLayout,
    base_template, field_function, field_library, inject_at_marker, inject_field,
};
