//! Splicing generated field text into a shader template
//!
//! The template is opaque apart from three marker comments. Each piece is
//! dropped in at its marker; a template missing a marker still gets the
//! piece, prepended or appended.

use voltree_core::emit;
use voltree_core::params::{ParamKind, ParameterRegistry};
use voltree_core::tree::SAMPLE_VAR;

/// Where binding declarations go
pub const DECLARATIONS_MARKER: &str = "// VOLTREE_DECLARATIONS";
/// Where the field-function library goes
pub const LIBRARY_MARKER: &str = "// VOLTREE_FIELD_LIBRARY";
/// Precedes the placeholder `fn field` that gets replaced
pub const FIELD_MARKER: &str = "// VOLTREE_FIELD_PLACEHOLDER";

/// WGSL twin of `voltree_core::formulas`
pub fn field_library() -> &'static str {
    include_str!("shaders/field_library.wgsl")
}

/// The built-in ray-march template
pub fn base_template() -> &'static str {
    include_str!("shaders/raymarch.wgsl")
}

/// Wrap a field expression in the one-argument function the template calls
pub fn field_function(expr: &str) -> String {
    format!(
        "fn field({}: vec3<f32>) -> f32 {{\n    return {};\n}}",
        SAMPLE_VAR, expr
    )
}

/// Bind group contract between emitted text and the renderer.
///
/// Parameter arrays bind at the index of their kind in [`ParamKind::ALL`],
/// the cache sampler at [`Self::SAMPLER_BINDING`], and cache slot `n` at
/// [`Self::FIRST_CACHE_BINDING`] `+ n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderLayout {
    pub param_kinds: Vec<ParamKind>,
    pub cache_slots: Vec<u32>,
}

impl ShaderLayout {
    pub const GROUP: u32 = 1;
    pub const SAMPLER_BINDING: u32 = 6;
    pub const FIRST_CACHE_BINDING: u32 = 8;

    pub fn new(param_kinds: Vec<ParamKind>, cache_slots: Vec<u32>) -> Self {
        Self {
            param_kinds,
            cache_slots,
        }
    }

    /// Declare every kind the registry currently holds
    pub fn from_registry(registry: &ParameterRegistry, cache_slots: Vec<u32>) -> Self {
        let kinds = ParamKind::ALL
            .into_iter()
            .filter(|k| registry.count(*k) > 0)
            .collect();
        Self::new(kinds, cache_slots)
    }

    pub fn param_binding(kind: ParamKind) -> u32 {
        ParamKind::ALL.iter().position(|k| *k == kind).unwrap_or(0) as u32
    }

    pub fn cache_binding(slot: u32) -> u32 {
        Self::FIRST_CACHE_BINDING + slot
    }

    /// WGSL declarations for parameter arrays, cache textures and the sampler
    pub fn declarations(&self) -> String {
        let mut out = String::new();
        for kind in &self.param_kinds {
            out.push_str(&format!(
                "@group({}) @binding({}) var<storage, read> {}: array<{}>;\n",
                Self::GROUP,
                Self::param_binding(*kind),
                kind.array_name(),
                kind.wgsl_type()
            ));
        }
        out.push_str(&format!(
            "@group({}) @binding({}) var cache_sampler: sampler;\n",
            Self::GROUP,
            Self::SAMPLER_BINDING
        ));
        for slot in &self.cache_slots {
            out.push_str(&format!(
                "@group({}) @binding({}) var {}: texture_3d<f32>;\n",
                Self::GROUP,
                Self::cache_binding(*slot),
                emit::cache_texture(*slot)
            ));
        }
        out
    }
}

/// Replace `marker` with `text`, or prepend `text` when the marker is absent
pub fn inject_at_marker(shader: &str, marker: &str, text: &str) -> String {
    if let Some(pos) = shader.find(marker) {
        let mut result = String::with_capacity(shader.len() + text.len());
        result.push_str(&shader[..pos]);
        result.push_str(text);
        result.push_str(&shader[pos + marker.len()..]);
        result
    } else {
        tracing::warn!("shader template has no '{}' marker, prepending", marker);
        format!("{}\n{}", text, shader)
    }
}

/// Replace the placeholder `fn field` that follows [`FIELD_MARKER`]
pub fn inject_field(base: &str, field_code: &str) -> String {
    if let Some(start) = base.find(FIELD_MARKER) {
        if let Some(offset) = base[start..].find("fn field(") {
            let func_start = start + offset;
            let mut depth = 0;
            let mut seen_open = false;
            let mut func_end = None;

            for (i, c) in base[func_start..].char_indices() {
                match c {
                    '{' => {
                        depth += 1;
                        seen_open = true;
                    }
                    '}' => {
                        depth -= 1;
                        if seen_open && depth == 0 {
                            func_end = Some(func_start + i + 1);
                            break;
                        }
                    }
                    _ => {}
                }
            }

            if let Some(end) = func_end {
                let mut result = String::with_capacity(base.len() + field_code.len());
                result.push_str(&base[..start]);
                result.push_str(field_code);
                result.push_str(&base[end..]);
                return result;
            }
        }
    }

    tracing::warn!("shader template has no field placeholder, appending");
    format!("{}\n{}\n", base, field_code)
}

/// Builds complete shader programs from a template
#[derive(Debug, Clone)]
pub struct ShaderAssembler {
    template: String,
}

impl ShaderAssembler {
    pub fn new() -> Self {
        Self::with_template(base_template())
    }

    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Declarations, library and field function spliced into the template
    pub fn assemble(&self, field_expr: &str, layout: &ShaderLayout) -> String {
        let with_decls =
            inject_at_marker(&self.template, DECLARATIONS_MARKER, &layout.declarations());
        let with_library = inject_at_marker(&with_decls, LIBRARY_MARKER, field_library());
        inject_field(&with_library, &field_function(field_expr))
    }
}

impl Default for ShaderAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_function_wraps_expression() {
        assert_eq!(
            field_function("field_sphere(p, 1.000000)"),
            "fn field(p: vec3<f32>) -> f32 {\n    return field_sphere(p, 1.000000);\n}"
        );
    }

    #[test]
    fn placeholder_is_replaced_once() {
        let shader =
            ShaderAssembler::new().assemble("field_sphere(p, 2.000000)", &ShaderLayout::default());
        assert_eq!(shader.matches("fn field(").count(), 1);
        assert!(shader.contains("return field_sphere(p, 2.000000);"));
        assert!(!shader.contains(FIELD_MARKER));
        assert!(!shader.contains(DECLARATIONS_MARKER));
        assert!(!shader.contains(LIBRARY_MARKER));
        // The rest of the template survives
        assert!(shader.contains("fn fs_main"));
    }

    #[test]
    fn missing_markers_fall_back() {
        let assembler = ShaderAssembler::with_template("fn main() {}");
        let shader = assembler.assemble("1.0", &ShaderLayout::default());
        assert!(shader.contains("fn r_union("));
        assert!(shader.contains("var cache_sampler: sampler;"));
        assert!(shader.trim_end().ends_with("return 1.0;\n}"));
    }

    #[test]
    fn declarations_follow_binding_contract() {
        let layout = ShaderLayout::new(vec![ParamKind::Vec3, ParamKind::Mat4], vec![0, 2]);
        let decls = layout.declarations();
        assert!(decls.contains("@group(1) @binding(2) var<storage, read> param_vec3: array<vec3<f32>>;"));
        assert!(decls.contains("@group(1) @binding(5) var<storage, read> param_mat4: array<mat4x4<f32>>;"));
        assert!(decls.contains("@group(1) @binding(6) var cache_sampler: sampler;"));
        assert!(decls.contains("@group(1) @binding(8) var cache_tex_0: texture_3d<f32>;"));
        assert!(decls.contains("@group(1) @binding(10) var cache_tex_2: texture_3d<f32>;"));
        assert!(!decls.contains("param_scalar"));
    }

    #[test]
    fn layout_from_registry_lists_live_kinds() {
        let mut registry = ParameterRegistry::new();
        registry.register(ParamKind::Mat4);
        registry.register(ParamKind::Scalar);
        let layout = ShaderLayout::from_registry(&registry, vec![]);
        assert_eq!(layout.param_kinds, vec![ParamKind::Scalar, ParamKind::Mat4]);
    }
}
