//! WGSL literal formatting for field-expression emission

use glam::{Mat4, Vec3};

use crate::node::CacheState;

/// Scalar literal with six fractional digits
pub fn float(v: f32) -> String {
    format!("{:.6}", v)
}

pub fn vec3(v: Vec3) -> String {
    format!("vec3<f32>({:.6}, {:.6}, {:.6})", v.x, v.y, v.z)
}

/// Column-major `mat4x4<f32>` literal
pub fn mat4(m: &Mat4) -> String {
    let cols = m.to_cols_array();
    let body = cols
        .iter()
        .map(|c| float(*c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("mat4x4<f32>({})", body)
}

/// Texture identifier bound to a cache slot
pub fn cache_texture(slot: u32) -> String {
    format!("cache_tex_{}", slot)
}

/// Fixed-form cache read: sample the slot's texture at `sample`, mapped into
/// the unit cube by the node's offset and scale. The mapping is read from its
/// parameter slots when it has them, otherwise written as literals.
pub fn cache_read(sample: &str, slot: u32, cache: &CacheState) -> String {
    let (offset, scale) = match cache.mapping.active_references() {
        Some((offset, scale)) => (offset.to_string(), scale.to_string()),
        None => (vec3(cache.offset), vec3(cache.scale)),
    };
    format!(
        "sample_cache({}, {}, {}, {})",
        sample,
        cache_texture(slot),
        offset,
        scale
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_keep_six_digits() {
        assert_eq!(float(1.0), "1.000000");
        assert_eq!(float(-0.25), "-0.250000");
        assert_eq!(
            vec3(Vec3::new(1.0, 2.0, 3.0)),
            "vec3<f32>(1.000000, 2.000000, 3.000000)"
        );
    }

    #[test]
    fn cache_read_prefers_mapping_slots() {
        let mut cache = CacheState::new(true);
        cache.offset = Vec3::splat(-1.0);
        assert_eq!(
            cache_read("p", 2, &cache),
            "sample_cache(p, cache_tex_2, vec3<f32>(-1.000000, -1.000000, -1.000000), \
             vec3<f32>(1.000000, 1.000000, 1.000000))"
        );

        cache.mapping.offset = crate::params::ParamId(4);
        cache.mapping.scale = crate::params::ParamId(5);
        cache.mapping.references = Some(("param_vec3[0]".into(), "param_vec3[1]".into()));
        assert_eq!(
            cache_read("p", 2, &cache),
            "sample_cache(p, cache_tex_2, param_vec3[0], param_vec3[1])"
        );
    }

    #[test]
    fn identity_matrix_literal() {
        let text = mat4(&Mat4::IDENTITY);
        assert!(text.starts_with("mat4x4<f32>(1.000000, 0.000000"));
        assert_eq!(text.matches(", ").count(), 15);
    }
}
