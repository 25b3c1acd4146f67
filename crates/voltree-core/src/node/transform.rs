//! Affine transform node with optional parameter indirection
//!
//! The transform maps the child's local space into the parent's space.
//! Evaluation pulls the sample point back through the inverse; bounds push
//! the child's corners forward through the matrix.

use glam::{EulerRot, Mat4, Vec3};

use super::{Aabb, NodeId};
use crate::emit;
use crate::params::{ParamId, ParamKind};

/// The fifteen numbers describing a transform.
///
/// Rotation is XYZ Euler angles in radians about `rotation_center`; scale is
/// per-axis about `scale_center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub translate: Vec3,
    pub rotation: Vec3,
    pub rotation_center: Vec3,
    pub scale: Vec3,
    pub scale_center: Vec3,
}

impl TransformParams {
    pub const IDENTITY: Self = Self {
        translate: Vec3::ZERO,
        rotation: Vec3::ZERO,
        rotation_center: Vec3::ZERO,
        scale: Vec3::ONE,
        scale_center: Vec3::ZERO,
    };

    pub fn from_translation(translate: Vec3) -> Self {
        Self {
            translate,
            ..Self::IDENTITY
        }
    }

    /// `[tx ty tz, rx ry rz, rcx rcy rcz, sx sy sz, scx scy scz]`
    pub fn to_array(&self) -> [f32; 15] {
        let mut out = [0.0; 15];
        for (chunk, v) in out.chunks_exact_mut(3).zip([
            self.translate,
            self.rotation,
            self.rotation_center,
            self.scale,
            self.scale_center,
        ]) {
            chunk.copy_from_slice(&v.to_array());
        }
        out
    }

    pub fn from_array(values: [f32; 15]) -> Self {
        let v = |i: usize| Vec3::new(values[i], values[i + 1], values[i + 2]);
        Self {
            translate: v(0),
            rotation: v(3),
            rotation_center: v(6),
            scale: v(9),
            scale_center: v(12),
        }
    }

    /// Only the translation differs from identity
    pub fn is_translate_only(&self) -> bool {
        self.rotation == Vec3::ZERO && self.scale == Vec3::ONE
    }

    /// `postScale · scale · preScale · postRot · rotate · preRot · translate`
    pub fn matrix(&self) -> Mat4 {
        let rotate = Mat4::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_translation(self.scale_center)
            * Mat4::from_scale(self.scale)
            * Mat4::from_translation(-self.scale_center)
            * Mat4::from_translation(self.rotation_center)
            * rotate
            * Mat4::from_translation(-self.rotation_center)
            * Mat4::from_translation(self.translate)
    }
}

impl Default for TransformParams {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Link between a transform and its registry slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBinding {
    pub parameterized: bool,
    pub id: ParamId,
    /// Kind the slot was registered with, `None` while unregistered
    pub kind: Option<ParamKind>,
    /// Text reference from the last registry refresh
    pub reference: Option<String>,
}

impl ParamBinding {
    /// The text reference, if this node currently emits through a slot
    pub fn active_reference(&self) -> Option<&str> {
        if self.parameterized && self.id.is_registered() {
            self.reference.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct TransformNode {
    pub(crate) child: Option<NodeId>,
    params: TransformParams,
    matrix: Mat4,
    inverse: Mat4,
    pub(crate) binding: ParamBinding,
}

impl TransformNode {
    pub fn new(child: Option<NodeId>, params: TransformParams) -> Self {
        let mut node = Self {
            child,
            params,
            matrix: Mat4::IDENTITY,
            inverse: Mat4::IDENTITY,
            binding: ParamBinding::default(),
        };
        node.set_params(params);
        node
    }

    pub fn child(&self) -> Option<NodeId> {
        self.child
    }

    pub fn params(&self) -> TransformParams {
        self.params
    }

    /// Replace all fifteen numbers; the inverse is recomputed here only
    pub fn set_params(&mut self, params: TransformParams) {
        self.params = params;
        self.matrix = params.matrix();
        self.inverse = self.matrix.inverse();
    }

    pub fn params_array(&self) -> [f32; 15] {
        self.params.to_array()
    }

    pub fn set_params_array(&mut self, values: [f32; 15]) {
        self.set_params(TransformParams::from_array(values));
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn inverse(&self) -> Mat4 {
        self.inverse
    }

    pub fn binding(&self) -> &ParamBinding {
        &self.binding
    }

    pub fn is_parameterized(&self) -> bool {
        self.binding.parameterized
    }

    /// Slot kind this transform needs in its current state
    pub fn wanted_kind(&self) -> ParamKind {
        if self.params.is_translate_only() {
            ParamKind::Vec3
        } else {
            ParamKind::Mat4
        }
    }

    /// A Vec3 slot cannot carry rotation or scale
    pub fn needs_promotion(&self) -> bool {
        self.binding.kind == Some(ParamKind::Vec3) && self.wanted_kind() == ParamKind::Mat4
    }

    /// Pull a parent-space point into the child's local space
    pub fn local_point(&self, p: Vec3) -> Vec3 {
        self.inverse.transform_point3(p)
    }

    pub fn bounds(&self, child: &Aabb) -> Aabb {
        Aabb::enclosing(child.corners().map(|c| self.matrix.transform_point3(c)))
    }

    /// Payload for the registered slot kind
    pub fn payload(&self, kind: ParamKind) -> Vec<f32> {
        match kind {
            ParamKind::Vec3 => self.params.translate.to_array().to_vec(),
            _ => self.inverse.to_cols_array().to_vec(),
        }
    }

    /// Rewrite the sample expression into the child's local space
    pub fn emit_sample(&self, sample: &str) -> String {
        if let Some(reference) = self.binding.active_reference() {
            return match self.binding.kind {
                Some(ParamKind::Vec3) => format!("field_translate({}, {})", sample, reference),
                _ => format!("field_transform({}, {})", sample, reference),
            };
        }
        if self.params.is_translate_only() {
            format!(
                "field_translate({}, {})",
                sample,
                emit::vec3(self.params.translate)
            )
        } else {
            format!("field_transform({}, {})", sample, emit::mat4(&self.inverse))
        }
    }
}
