//! Node model for implicit-field expression trees
//!
//! A tree is built from a closed set of node kinds. Every pass over the tree
//! (bounds, caching, parameter registration, emission) matches on
//! [`NodeKind`] exhaustively, so adding a kind means touching each pass.
//!
//! Field convention: a value `>= 0` is inside the solid.

pub mod csg;
pub mod primitives;
pub mod transform;
pub mod volcache;

use std::fmt;

use glam::{UVec3, Vec3};

use crate::params::{ParamId, ParamKind, ParameterRegistry};

pub use csg::{BlendCsgNode, BlendParams, CsgNode, CsgOp};
pub use primitives::{BoxShape, Cone, Cylinder, Sphere, Torus};
pub use transform::{ParamBinding, TransformNode, TransformParams};
pub use volcache::{DenseVolume, LoadState, VolCacheNode, VolumeError, VolumeSource};

/// Stable handle of a node inside a [`crate::Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Arena index of this node
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Axis-Aligned Bounding Box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box spanning `-half..half` on each axis
    pub fn symmetric(half: Vec3) -> Self {
        Self::new(-half, half)
    }

    /// Axis-wise envelope of two boxes
    pub fn union(&self, other: &Aabb) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Grow each side by `margin` (per axis)
    pub fn pad(&self, margin: Vec3) -> Self {
        Self::new(self.min - margin, self.max + margin)
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Enclosed volume; zero for flat or inverted boxes
    pub fn volume(&self) -> f64 {
        let s = self.size().max(Vec3::ZERO);
        f64::from(s.x) * f64::from(s.y) * f64::from(s.z)
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// The eight corners, x varying fastest
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Smallest box holding all `points`
    pub fn enclosing(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for p in points {
            min = min.min(p);
            max = max.max(p);
        }
        Self::new(min, max)
    }
}

/// Per-node cache bookkeeping, written by the caching pass.
///
/// `offset`/`scale` map field space into the unit texture cube:
/// `uvw = (p - offset) * scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheState {
    pub uses_cache: bool,
    pub slot: Option<u32>,
    pub resolution: UVec3,
    pub offset: Vec3,
    pub scale: Vec3,
    pub requires_cache: bool,
    pub dirty: bool,
    /// Registry slots carrying `offset`/`scale` when numeric edits can move them
    pub mapping: MappingBinding,
    /// Set by the caching pass when the subtree cost crossed the auto-cache threshold
    pub(crate) auto_cache: bool,
}

impl CacheState {
    pub(crate) fn new(requires_cache: bool) -> Self {
        Self {
            uses_cache: false,
            slot: None,
            resolution: UVec3::ZERO,
            offset: Vec3::ZERO,
            scale: Vec3::ONE,
            requires_cache,
            dirty: false,
            mapping: MappingBinding::default(),
            auto_cache: false,
        }
    }

    /// Whether the caching pass must give this node a slot
    pub fn needs_cache(&self) -> bool {
        self.requires_cache || self.auto_cache
    }

    /// Record the caching decision. Marks the contents dirty when either the
    /// slot or the resolution differs from the previous call.
    pub fn set_use_cache(&mut self, flag: bool, slot: Option<u32>, resolution: UVec3) {
        if self.slot != slot || self.resolution != resolution {
            self.dirty = true;
        }
        self.uses_cache = flag;
        self.slot = slot;
        self.resolution = resolution;
    }

    /// Whether the node already holds exactly this assignment
    pub fn is_assigned(&self, slot: u32, resolution: UVec3) -> bool {
        self.uses_cache && self.slot == Some(slot) && self.resolution == resolution
    }

    /// Point the texture mapping at `bounds`. Returns whether it moved.
    pub(crate) fn set_mapping(&mut self, bounds: &Aabb) -> bool {
        let size = bounds.size();
        let scale = Vec3::select(size.cmpgt(Vec3::ZERO), size.recip(), Vec3::ZERO);
        if self.offset == bounds.min && self.scale == scale {
            return false;
        }
        self.offset = bounds.min;
        self.scale = scale;
        self.dirty = true;
        true
    }
}

/// Link between a cache mapping and its two Vec3 registry slots.
///
/// A cached node whose subtree holds a parameterized transform reads its
/// mapping through these slots, so a drag moves the mapping by upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingBinding {
    pub offset: ParamId,
    pub scale: ParamId,
    /// `(offset, scale)` text from the last registry refresh
    pub references: Option<(String, String)>,
}

impl MappingBinding {
    pub fn is_registered(&self) -> bool {
        self.offset.is_registered() && self.scale.is_registered()
    }

    /// Text references, if the mapping currently emits through slots
    pub fn active_references(&self) -> Option<(&str, &str)> {
        if !self.is_registered() {
            return None;
        }
        self.references
            .as_ref()
            .map(|(o, s)| (o.as_str(), s.as_str()))
    }

    /// Register or free the slot pair so it matches `live`. Returns whether
    /// the registry changed. A full registry leaves the mapping literal.
    pub(crate) fn sync(&mut self, live: bool, registry: &mut ParameterRegistry) -> bool {
        let registered = self.is_registered();
        if registered && !live {
            self.release(registry);
            return true;
        }
        if !live || registered {
            return false;
        }

        let offset = registry.register(ParamKind::Vec3);
        if !offset.is_registered() {
            return false;
        }
        let scale = registry.register(ParamKind::Vec3);
        if !scale.is_registered() {
            registry.unregister(offset);
            return false;
        }
        self.offset = offset;
        self.scale = scale;
        self.references = None;
        true
    }

    pub(crate) fn refresh(&mut self, registry: &ParameterRegistry) {
        self.references = if self.is_registered() {
            registry
                .parameter_string(self.offset)
                .zip(registry.parameter_string(self.scale))
        } else {
            None
        };
    }

    pub(crate) fn release(&mut self, registry: &mut ParameterRegistry) {
        for id in [self.offset, self.scale] {
            if id.is_registered() {
                registry.unregister(id);
            }
        }
        *self = Self::default();
    }
}

/// The closed set of node kinds
#[derive(Debug)]
pub enum NodeKind {
    Sphere(Sphere),
    Box(BoxShape),
    Cylinder(Cylinder),
    Cone(Cone),
    Torus(Torus),
    Csg(CsgNode),
    Blend(BlendCsgNode),
    Transform(TransformNode),
    VolCache(VolCacheNode),
}

impl NodeKind {
    /// Human-readable kind name, used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sphere(_) => "sphere",
            Self::Box(_) => "box",
            Self::Cylinder(_) => "cylinder",
            Self::Cone(_) => "cone",
            Self::Torus(_) => "torus",
            Self::Csg(_) => "csg",
            Self::Blend(_) => "blend",
            Self::Transform(_) => "transform",
            Self::VolCache(_) => "volume",
        }
    }

    /// Intrinsic evaluation expense, excluding children
    pub fn cost(&self) -> u32 {
        match self {
            Self::Sphere(_) | Self::Cylinder(_) | Self::Cone(_) | Self::Torus(_) => 5,
            Self::Box(_) => BoxShape::COST,
            Self::Csg(_) => 2,
            Self::Blend(_) => 4,
            Self::Transform(_) => 3,
            Self::VolCache(_) => 5,
        }
    }

    /// Child slots in evaluation order; unwired slots are `None`
    pub fn child_slots(&self) -> &[Option<NodeId>] {
        match self {
            Self::Csg(c) => &c.children,
            Self::Blend(b) => &b.csg.children,
            Self::Transform(t) => std::slice::from_ref(&t.child),
            Self::Sphere(_)
            | Self::Box(_)
            | Self::Cylinder(_)
            | Self::Cone(_)
            | Self::Torus(_)
            | Self::VolCache(_) => &[],
        }
    }

    pub(crate) fn child_slots_mut(&mut self) -> &mut [Option<NodeId>] {
        match self {
            Self::Csg(c) => &mut c.children,
            Self::Blend(b) => &mut b.csg.children,
            Self::Transform(t) => std::slice::from_mut(&mut t.child),
            Self::Sphere(_)
            | Self::Box(_)
            | Self::Cylinder(_)
            | Self::Cone(_)
            | Self::Torus(_)
            | Self::VolCache(_) => &mut [],
        }
    }

    /// Wired children, in slot order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.child_slots().iter().flatten().copied()
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.children().next()
    }

    /// The wired child after `prev`, if any
    pub fn next_child(&self, prev: NodeId) -> Option<NodeId> {
        self.children().skip_while(|c| *c != prev).nth(1)
    }

    /// Leaves have a closed form and are never worth caching on their own
    pub fn is_leaf(&self) -> bool {
        self.child_slots().is_empty()
    }
}

/// A node stored in the tree arena
#[derive(Debug)]
pub struct Node {
    pub(crate) label: Option<String>,
    pub(crate) kind: NodeKind,
    pub(crate) cache: CacheState,
    pub(crate) bounds: Option<Aabb>,
    pub(crate) parent: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        let requires_cache = matches!(kind, NodeKind::VolCache(_));
        Self {
            label: None,
            kind,
            cache: CacheState::new(requires_cache),
            bounds: None,
            parent: None,
        }
    }

    /// Optional application-supplied id; uniqueness is not enforced
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn cache(&self) -> &CacheState {
        &self.cache
    }

    /// Bounds from the last bounds pass, if still valid
    pub fn cached_bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.kind.first_child()
    }

    pub fn next_child(&self, prev: NodeId) -> Option<NodeId> {
        self.kind.next_child(prev)
    }
}
