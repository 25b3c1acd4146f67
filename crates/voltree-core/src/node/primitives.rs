//! Leaf primitives
//!
//! All primitives are centred at the origin; Cylinder, Cone and Torus are
//! aligned with the Z axis. Use a transform node to place them.

use glam::Vec3;

use super::Aabb;
use crate::emit;
use crate::formulas;

/// Sphere of given radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub radius: f32,
}

impl Sphere {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    pub fn evaluate(&self, p: Vec3) -> f32 {
        formulas::field_sphere(p, self.radius)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::symmetric(Vec3::splat(self.radius))
    }

    pub fn emit(&self, sample: &str) -> String {
        format!("field_sphere({}, {})", sample, emit::float(self.radius))
    }
}

/// Axis-aligned box given by its full side lengths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShape {
    pub size: Vec3,
}

impl BoxShape {
    /// Six half-space intersections make the box the priciest leaf
    pub const COST: u32 = 15;

    pub fn new(size: Vec3) -> Self {
        Self { size }
    }

    pub fn cube(side: f32) -> Self {
        Self::new(Vec3::splat(side))
    }

    pub fn half_extents(&self) -> Vec3 {
        self.size * 0.5
    }

    pub fn evaluate(&self, p: Vec3) -> f32 {
        formulas::field_box(p, self.half_extents())
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::symmetric(self.half_extents())
    }

    pub fn emit(&self, sample: &str) -> String {
        format!("field_box({}, {})", sample, emit::vec3(self.half_extents()))
    }
}

/// Cylinder along Z
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cylinder {
    pub radius: f32,
    pub length: f32,
}

impl Cylinder {
    pub fn new(radius: f32, length: f32) -> Self {
        Self { radius, length }
    }

    pub fn evaluate(&self, p: Vec3) -> f32 {
        formulas::field_cylinder(p, self.radius, self.length * 0.5)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::symmetric(Vec3::new(self.radius, self.radius, self.length * 0.5))
    }

    pub fn emit(&self, sample: &str) -> String {
        format!(
            "field_cylinder({}, {}, {})",
            sample,
            emit::float(self.radius),
            emit::float(self.length * 0.5)
        )
    }
}

/// Cone along Z: base of `radius` at `-length/2`, apex at `+length/2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    pub radius: f32,
    pub length: f32,
}

impl Cone {
    pub fn new(radius: f32, length: f32) -> Self {
        Self { radius, length }
    }

    pub fn evaluate(&self, p: Vec3) -> f32 {
        formulas::field_cone(p, self.radius, self.length * 0.5)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::symmetric(Vec3::new(self.radius, self.radius, self.length * 0.5))
    }

    pub fn emit(&self, sample: &str) -> String {
        format!(
            "field_cone({}, {}, {})",
            sample,
            emit::float(self.radius),
            emit::float(self.length * 0.5)
        )
    }
}

/// Torus around Z: a circle of radius `circle` swept along a ring of radius `sweep`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Torus {
    pub sweep: f32,
    pub circle: f32,
}

impl Torus {
    pub fn new(sweep: f32, circle: f32) -> Self {
        Self { sweep, circle }
    }

    pub fn evaluate(&self, p: Vec3) -> f32 {
        formulas::field_torus(p, self.sweep, self.circle)
    }

    pub fn bounds(&self) -> Aabb {
        let ring = self.sweep + self.circle;
        Aabb::symmetric(Vec3::new(ring, ring, self.circle))
    }

    pub fn emit(&self, sample: &str) -> String {
        format!(
            "field_torus({}, {}, {})",
            sample,
            emit::float(self.sweep),
            emit::float(self.circle)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn far() -> Vec3 {
        Vec3::new(9.0, -7.0, 8.0)
    }

    #[test]
    fn sphere_inside_boundary_outside() {
        let s = Sphere::new(1.5);
        assert!(s.evaluate(Vec3::ZERO) > 0.0);
        assert_relative_eq!(s.evaluate(Vec3::new(0.0, 1.5, 0.0)), 0.0, epsilon = 1e-6);
        assert!(s.evaluate(far()) < 0.0);
    }

    #[test]
    fn box_inside_boundary_outside() {
        let b = BoxShape::new(Vec3::new(2.0, 4.0, 1.0));
        assert!(b.evaluate(Vec3::ZERO) > 0.0);
        assert_relative_eq!(b.evaluate(Vec3::new(1.0, 0.0, 0.0)), 0.0, epsilon = 1e-6);
        assert_relative_eq!(b.evaluate(Vec3::new(0.0, -2.0, 0.0)), 0.0, epsilon = 1e-6);
        assert_relative_eq!(b.evaluate(Vec3::new(0.0, 0.0, 0.5)), 0.0, epsilon = 1e-6);
        assert!(b.evaluate(Vec3::new(1.1, 0.0, 0.0)) < 0.0);
        assert!(b.evaluate(far()) < 0.0);
    }

    #[test]
    fn cylinder_inside_boundary_outside() {
        let c = Cylinder::new(0.5, 3.0);
        assert!(c.evaluate(Vec3::ZERO) > 0.0);
        assert_relative_eq!(c.evaluate(Vec3::new(0.5, 0.0, 0.0)), 0.0, epsilon = 1e-6);
        assert_relative_eq!(c.evaluate(Vec3::new(0.0, 0.0, 1.5)), 0.0, epsilon = 1e-6);
        assert!(c.evaluate(Vec3::new(0.0, 0.0, 1.6)) < 0.0);
        assert!(c.evaluate(far()) < 0.0);
    }

    #[test]
    fn cone_tapers_towards_apex() {
        let c = Cone::new(1.0, 2.0);
        assert!(c.evaluate(Vec3::ZERO) > 0.0);
        // Base rim and the radius halfway up
        assert_relative_eq!(c.evaluate(Vec3::new(1.0, 0.0, -1.0)), 0.0, epsilon = 1e-6);
        assert_relative_eq!(c.evaluate(Vec3::new(0.5, 0.0, 0.0)), 0.0, epsilon = 1e-6);
        assert!(c.evaluate(Vec3::new(0.6, 0.0, 0.0)) < 0.0);
        assert!(c.evaluate(Vec3::new(0.0, 0.0, 1.2)) < 0.0);
        assert!(c.evaluate(far()) < 0.0);
    }

    #[test]
    fn torus_inside_boundary_outside() {
        let t = Torus::new(2.0, 0.5);
        assert!(t.evaluate(Vec3::new(0.0, 2.0, 0.0)) > 0.0);
        assert_relative_eq!(t.evaluate(Vec3::new(0.0, 2.0, 0.5)), 0.0, epsilon = 1e-5);
        assert!(t.evaluate(far()) < 0.0);
    }

    #[test]
    fn bounds_match_extents() {
        assert_eq!(Sphere::new(1.0).bounds(), Aabb::symmetric(Vec3::ONE));
        assert_eq!(
            Cylinder::new(0.5, 3.0).bounds(),
            Aabb::symmetric(Vec3::new(0.5, 0.5, 1.5))
        );
        assert_eq!(
            Torus::new(2.0, 0.5).bounds(),
            Aabb::symmetric(Vec3::new(2.5, 2.5, 0.5))
        );
    }

    #[test]
    fn emission_names_shape_and_literals() {
        assert_eq!(Sphere::new(1.0).emit("p"), "field_sphere(p, 1.000000)");
        assert_eq!(
            BoxShape::cube(2.0).emit("q"),
            "field_box(q, vec3<f32>(1.000000, 1.000000, 1.000000))"
        );
        assert_eq!(
            Torus::new(2.0, 0.5).emit("p"),
            "field_torus(p, 2.000000, 0.500000)"
        );
    }
}
