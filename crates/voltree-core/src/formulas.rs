//! Field formulas shared by CPU evaluation and the WGSL library
//!
//! Every function here has a WGSL twin of the same name in
//! `voltree-shader/src/shaders/field_library.wgsl`. Baked caches are CPU
//! samples of these formulas, so the two sides must agree term for term.
//!
//! Convention: a field value `>= 0` is inside the solid.

use glam::{Vec2, Vec3};

/// Field value reported for empty space: outside a cache's unit cube and
/// for volume sources that failed to load.
pub const EMPTY_FIELD: f32 = -1.0;

// ============================================================================
// R-functions
// ============================================================================

/// R-disjunction: `f + g + sqrt(f² + g²)`, non-negative iff either is.
pub fn r_union(f: f32, g: f32) -> f32 {
    f + g + (f * f + g * g).sqrt()
}

/// `-r_union(-f, -g)`, non-negative iff both are.
pub fn r_intersect(f: f32, g: f32) -> f32 {
    f + g - (f * f + g * g).sqrt()
}

/// `r_intersect(f, -g)`: inside `f` and outside `g`.
pub fn r_subtract(f: f32, g: f32) -> f32 {
    r_intersect(f, -g)
}

/// Seam-smoothing displacement added on top of a combinator.
///
/// `a0` is the bump magnitude, `a1`/`a2` scale how fast it falls off with
/// each operand's field value.
pub fn blend_bump(f: f32, g: f32, a0: f32, a1: f32, a2: f32) -> f32 {
    let fa = f / a1;
    let gb = g / a2;
    a0 / (1.0 + fa * fa + gb * gb)
}

// ============================================================================
// Leaf fields
// ============================================================================

/// `1 - |p|² / r²`
pub fn field_sphere(p: Vec3, radius: f32) -> f32 {
    1.0 - p.length_squared() / (radius * radius)
}

/// Six half-spaces `h ∓ p` folded with [`r_intersect`], axis by axis.
pub fn field_box(p: Vec3, half: Vec3) -> f32 {
    let x = r_intersect(half.x - p.x, half.x + p.x);
    let y = r_intersect(half.y - p.y, half.y + p.y);
    let z = r_intersect(half.z - p.z, half.z + p.z);
    r_intersect(r_intersect(x, y), z)
}

/// Z-aligned cylinder: radial quadratic cut by two end caps.
pub fn field_cylinder(p: Vec3, radius: f32, half_length: f32) -> f32 {
    let radial = 1.0 - Vec2::new(p.x, p.y).length_squared() / (radius * radius);
    let caps = r_intersect(half_length - p.z, half_length + p.z);
    r_intersect(radial, caps)
}

/// Z-aligned cone: base of `radius` at `z = -h`, apex at `z = +h`.
pub fn field_cone(p: Vec3, radius: f32, half_length: f32) -> f32 {
    let t = (half_length - p.z) / (2.0 * half_length);
    let radial = t * t - Vec2::new(p.x, p.y).length_squared() / (radius * radius);
    let caps = r_intersect(half_length - p.z, half_length + p.z);
    r_intersect(radial, caps)
}

/// Torus around the Z axis, ring in the XY plane.
///
/// `r_c² - x² - y² - z² - r_s² + 2·r_s·sqrt(x² + y²)`
pub fn field_torus(p: Vec3, sweep: f32, circle: f32) -> f32 {
    let ring = Vec2::new(p.x, p.y).length();
    circle * circle - p.length_squared() - sweep * sweep + 2.0 * sweep * ring
}
