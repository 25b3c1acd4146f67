//! Binary combinators built on R-functions
//!
//! One algebra is used everywhere: union is `f + g + sqrt(f² + g²)`,
//! intersection negates both operands and the result, subtraction negates
//! the second operand before intersecting. CPU evaluation and emitted text
//! call the same named formulas.

use glam::Vec3;

use super::{Aabb, NodeId};
use crate::emit;
use crate::error::{Error, Result};
use crate::formulas;

/// Boolean operation of a combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsgOp {
    Union,
    Intersection,
    Subtraction,
}

impl CsgOp {
    pub fn combine(self, f: f32, g: f32) -> f32 {
        match self {
            Self::Union => formulas::r_union(f, g),
            Self::Intersection => formulas::r_intersect(f, g),
            Self::Subtraction => formulas::r_subtract(f, g),
        }
    }

    /// WGSL name of the matching library function
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Union => "r_union",
            Self::Intersection => "r_intersect",
            Self::Subtraction => "r_subtract",
        }
    }

    fn blend_function_name(self) -> &'static str {
        match self {
            Self::Union => "r_blend_union",
            Self::Intersection => "r_blend_intersect",
            Self::Subtraction => "r_blend_subtract",
        }
    }

    /// Union and Intersection take the envelope of both boxes (a superset
    /// for intersections); Subtraction keeps the first operand's box.
    pub fn bounds(self, a: &Aabb, b: &Aabb) -> Aabb {
        match self {
            Self::Union | Self::Intersection => a.union(b),
            Self::Subtraction => *a,
        }
    }
}

/// Plain two-operand combinator
#[derive(Debug, Clone, PartialEq)]
pub struct CsgNode {
    pub op: CsgOp,
    pub(crate) children: [Option<NodeId>; 2],
}

impl CsgNode {
    pub fn new(op: CsgOp, a: Option<NodeId>, b: Option<NodeId>) -> Self {
        Self {
            op,
            children: [a, b],
        }
    }

    pub fn operands(&self) -> (Option<NodeId>, Option<NodeId>) {
        (self.children[0], self.children[1])
    }

    pub fn evaluate(&self, fa: f32, fb: f32) -> f32 {
        self.op.combine(fa, fb)
    }

    pub fn bounds(&self, a: &Aabb, b: &Aabb) -> Aabb {
        self.op.bounds(a, b)
    }

    pub fn emit(&self, a: &str, b: &str) -> String {
        format!("{}({}, {})", self.op.function_name(), a, b)
    }
}

/// Blend parameters: `a0` bump magnitude, `a1`/`a2` per-operand falloff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendParams {
    pub a0: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BlendParams {
    /// Falloffs divide the operand fields, so both must be finite and nonzero
    pub fn validate(&self) -> Result<()> {
        if !(self.a0.is_finite() && self.a1.is_normal() && self.a2.is_normal()) {
            return Err(Error::InvalidBlend {
                a0: self.a0,
                a1: self.a1,
                a2: self.a2,
            });
        }
        Ok(())
    }
}

impl Default for BlendParams {
    fn default() -> Self {
        Self {
            a0: 0.5,
            a1: 1.0,
            a2: 1.0,
        }
    }
}

/// Combinator with a seam-smoothing bump added on top
#[derive(Debug, Clone, PartialEq)]
pub struct BlendCsgNode {
    pub(crate) csg: CsgNode,
    pub params: BlendParams,
}

impl BlendCsgNode {
    /// Fraction of the envelope extent added per growth step, per unit of `a0`
    const PAD_PER_A0: f32 = 0.2;
    /// Smallest growth step on any axis, per unit of `a0`
    const MIN_STEP: f32 = 0.05;
    const MAX_STEPS: u32 = 64;
    /// Grid points along each edge of a sampled face
    const FACE_SAMPLES: u32 = 9;

    pub fn new(op: CsgOp, a: Option<NodeId>, b: Option<NodeId>, params: BlendParams) -> Self {
        Self {
            csg: CsgNode::new(op, a, b),
            params,
        }
    }

    pub fn op(&self) -> CsgOp {
        self.csg.op
    }

    pub fn operands(&self) -> (Option<NodeId>, Option<NodeId>) {
        self.csg.operands()
    }

    pub fn evaluate(&self, fa: f32, fb: f32) -> f32 {
        let BlendParams { a0, a1, a2 } = self.params;
        self.csg.evaluate(fa, fb) + formulas::blend_bump(fa, fb, a0, a1, a2)
    }

    /// Envelope of the operands grown until the blended field is negative
    /// over the whole surface of the box, plus one step of slack.
    ///
    /// `field` evaluates this node at a point. The bump decays away from both
    /// operands, so the first all-negative shell encloses every point where
    /// the blend is inside.
    pub fn bounds(&self, a: &Aabb, b: &Aabb, field: impl Fn(Vec3) -> f32) -> Aabb {
        let envelope = self.csg.bounds(a, b);
        let a0 = self.params.a0;
        if a0 <= 0.0 || !a0.is_finite() {
            return envelope;
        }
        let step = (envelope.size() * (Self::PAD_PER_A0 * a0)).max(Vec3::splat(Self::MIN_STEP * a0));

        for n in 1..=Self::MAX_STEPS {
            let candidate = envelope.pad(step * n as f32);
            if Self::shell_is_outside(&candidate, &field) {
                return candidate.pad(step);
            }
        }
        tracing::warn!(
            "blend bump still inside after {} growth steps, bounds may be clipped",
            Self::MAX_STEPS
        );
        envelope.pad(step * (Self::MAX_STEPS + 1) as f32)
    }

    /// Whether `field` is negative on a grid over all six faces of `bounds`
    fn shell_is_outside(bounds: &Aabb, field: &impl Fn(Vec3) -> f32) -> bool {
        let n = Self::FACE_SAMPLES;
        let t = |i: u32| i as f32 / (n - 1) as f32;
        let size = bounds.size();
        for axis in 0..3 {
            let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
            for side in [bounds.min[axis], bounds.max[axis]] {
                for i in 0..n {
                    for j in 0..n {
                        let mut p = Vec3::ZERO;
                        p[axis] = side;
                        p[u] = bounds.min[u] + size[u] * t(i);
                        p[v] = bounds.min[v] + size[v] * t(j);
                        if field(p) >= 0.0 {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    pub fn emit(&self, a: &str, b: &str) -> String {
        let BlendParams { a0, a1, a2 } = self.params;
        format!(
            "{}({}, {}, {})",
            self.csg.op.blend_function_name(),
            a,
            b,
            emit::vec3(Vec3::new(a0, a1, a2))
        )
    }
}
