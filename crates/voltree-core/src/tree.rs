//! Node arena and the whole-tree passes
//!
//! The tree owns every node and hands out [`NodeId`] handles. Composites
//! reference children by handle; each node has at most one parent.
//!
//! Edits are classified as they happen:
//! - anything that changes emitted text bumps the shader generation;
//! - numeric edits on a parameterized transform bump only the numeric
//!   generation, and reach the GPU as a payload upload.
//!
//! Every edit marks cached ancestors dirty so their contents get rebaked.

use glam::{UVec3, Vec3};

use crate::cache::{CacheStore, CachedVolume, MemoryCacheStore};
use crate::emit;
use crate::error::{Error, Result};
use crate::formulas::EMPTY_FIELD;
use crate::node::{
    Aabb, BlendCsgNode, BlendParams, BoxShape, CacheState, Cone, CsgNode, CsgOp, Cylinder, Node,
    NodeId, NodeKind, Sphere, Torus, TransformNode, TransformParams, VolCacheNode, VolumeError,
    VolumeSource,
};
use crate::params::{ParamId, ParameterRegistry};

/// Sample-position variable of the generated field function
pub const SAMPLE_VAR: &str = "p";

/// Outcome of [`Tree::bake_caches`]
#[derive(Debug, Default)]
pub struct BakeReport {
    /// Slots whose contents were uploaded
    pub baked: Vec<u32>,
    /// Slots released because no node uses them any more
    pub released: Vec<u32>,
    /// Volume nodes whose source failed; they now read as empty space
    pub failures: Vec<(NodeId, VolumeError)>,
}

impl BakeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An implicit-field expression tree
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    shader_generation: u64,
    numeric_generation: u64,
    /// Shader generation the caching pass last settled at
    cache_generation: Option<u64>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Building
    // ========================================================================

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind));
        self.shader_generation += 1;
        id
    }

    /// Insert a node and adopt its already-wired children
    fn push_with_children(&mut self, kind: NodeKind) -> Result<NodeId> {
        let children: Vec<NodeId> = kind.children().collect();
        for child in &children {
            self.check_orphan(*child)?;
        }
        if let [a, b] = children[..] {
            if a == b {
                return Err(Error::malformed(a, "node used as both operands"));
            }
        }
        let id = self.push(kind);
        for child in children {
            self.nodes[child.index()].parent = Some(id);
        }
        Ok(id)
    }

    fn check_orphan(&self, child: NodeId) -> Result<()> {
        let node = self.node(child)?;
        if node.parent.is_some() || self.root == Some(child) {
            return Err(Error::malformed(child, "node already has an owner"));
        }
        Ok(())
    }

    pub fn sphere(&mut self, radius: f32) -> NodeId {
        self.push(NodeKind::Sphere(Sphere::new(radius)))
    }

    /// Box with full side lengths `size`
    pub fn box3(&mut self, size: Vec3) -> NodeId {
        self.push(NodeKind::Box(BoxShape::new(size)))
    }

    pub fn cube(&mut self, side: f32) -> NodeId {
        self.push(NodeKind::Box(BoxShape::cube(side)))
    }

    pub fn cylinder(&mut self, radius: f32, length: f32) -> NodeId {
        self.push(NodeKind::Cylinder(Cylinder::new(radius, length)))
    }

    pub fn cone(&mut self, radius: f32, length: f32) -> NodeId {
        self.push(NodeKind::Cone(Cone::new(radius, length)))
    }

    pub fn torus(&mut self, sweep: f32, circle: f32) -> NodeId {
        self.push(NodeKind::Torus(Torus::new(sweep, circle)))
    }

    pub fn csg(&mut self, op: CsgOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.push_with_children(NodeKind::Csg(CsgNode::new(op, Some(a), Some(b))))
    }

    pub fn union(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.csg(CsgOp::Union, a, b)
    }

    pub fn intersection(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.csg(CsgOp::Intersection, a, b)
    }

    /// `a` minus `b`
    pub fn subtraction(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.csg(CsgOp::Subtraction, a, b)
    }

    pub fn blend(&mut self, op: CsgOp, a: NodeId, b: NodeId, params: BlendParams) -> Result<NodeId> {
        params.validate()?;
        self.push_with_children(NodeKind::Blend(BlendCsgNode::new(
            op,
            Some(a),
            Some(b),
            params,
        )))
    }

    pub fn transform(&mut self, child: NodeId, params: TransformParams) -> Result<NodeId> {
        self.push_with_children(NodeKind::Transform(TransformNode::new(Some(child), params)))
    }

    pub fn translate(&mut self, child: NodeId, offset: Vec3) -> Result<NodeId> {
        self.transform(child, TransformParams::from_translation(offset))
    }

    /// Volume leaf; always requires a cache
    pub fn volume(&mut self, source: Box<dyn VolumeSource>) -> NodeId {
        self.push(NodeKind::VolCache(VolCacheNode::new(source)))
    }

    /// Composite with no children wired yet
    pub fn empty(&mut self, kind: NodeKind) -> NodeId {
        self.push(kind)
    }

    /// Wire `child` into slot `index` of `parent`, detaching any previous child
    pub fn set_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.check_orphan(child)?;
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(Error::malformed(child, "wiring would create a cycle"));
            }
            cursor = self.node(current)?.parent;
        }
        let slots = self.node_mut(parent)?.kind.child_slots_mut();
        let Some(slot) = slots.get_mut(index) else {
            return Err(Error::malformed(parent, format!("no child slot {index}")));
        };
        let previous = slot.replace(child);
        if let Some(previous) = previous {
            self.nodes[previous.index()].parent = None;
        }
        self.nodes[child.index()].parent = Some(parent);
        self.touched(parent, true);
        Ok(())
    }

    pub fn set_root(&mut self, id: NodeId) -> Result<()> {
        if self.node(id)?.parent.is_some() {
            return Err(Error::malformed(id, "root cannot have a parent"));
        }
        self.root = Some(id);
        self.shader_generation += 1;
        Ok(())
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> Result<()> {
        self.node_mut(id)?.label = Some(label.into());
        Ok(())
    }

    /// First node in arena order carrying `label`
    pub fn find(&self, label: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.label() == Some(label))
            .map(|i| NodeId(i as u32))
    }

    // ========================================================================
    // Access
    // ========================================================================

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(Error::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(Error::UnknownNode(id))
    }

    pub(crate) fn cache_state_mut(&mut self, id: NodeId) -> Result<&mut CacheState> {
        Ok(&mut self.node_mut(id)?.cache)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Bumped by every edit that changes emitted text
    pub fn shader_generation(&self) -> u64 {
        self.shader_generation
    }

    /// Bumped by numeric edits that only change parameter payloads
    pub fn numeric_generation(&self) -> u64 {
        self.numeric_generation
    }

    pub(crate) fn bump_shader_generation(&mut self) {
        self.shader_generation += 1;
    }

    /// True while no structural edit happened since the last caching pass
    pub(crate) fn cache_settled(&self) -> bool {
        self.cache_generation == Some(self.shader_generation)
    }

    pub(crate) fn settle_cache(&mut self) {
        self.cache_generation = Some(self.shader_generation);
    }

    fn root_id(&self) -> Result<NodeId> {
        self.root.ok_or(Error::NoRoot)
    }

    /// Depth-first pre-order from the root, children in slot order
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(id.index()) {
                stack.extend(node.kind.children().collect::<Vec<_>>().into_iter().rev());
            }
        }
        out
    }

    /// Total evaluation expense of the subtree at `id`
    pub fn cost(&self, id: NodeId) -> Result<u32> {
        let node = self.node(id)?;
        let mut total = node.kind.cost();
        for child in node.kind.children() {
            total += self.cost(child)?;
        }
        Ok(total)
    }

    pub fn total_cost(&self) -> Result<u32> {
        self.cost(self.root_id()?)
    }

    fn required_child(&self, id: NodeId, slot: Option<NodeId>, what: &str) -> Result<NodeId> {
        slot.ok_or_else(|| Error::malformed(id, format!("missing {what}")))
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Invalidate bounds up the parent chain and dirty every cached node on it
    fn touched(&mut self, id: NodeId, structural: bool) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = &mut self.nodes[current.index()];
            node.bounds = None;
            if node.cache.uses_cache {
                node.cache.dirty = true;
            }
            cursor = node.parent;
        }
        if structural {
            self.shader_generation += 1;
        } else {
            self.numeric_generation += 1;
        }
    }

    fn wrong_kind(node: NodeId, expected: &'static str) -> Error {
        Error::WrongKind { node, expected }
    }

    pub fn set_sphere(&mut self, id: NodeId, radius: f32) -> Result<()> {
        let NodeKind::Sphere(s) = &mut self.node_mut(id)?.kind else {
            return Err(Self::wrong_kind(id, "sphere"));
        };
        s.radius = radius;
        self.touched(id, true);
        Ok(())
    }

    pub fn set_box(&mut self, id: NodeId, size: Vec3) -> Result<()> {
        let NodeKind::Box(b) = &mut self.node_mut(id)?.kind else {
            return Err(Self::wrong_kind(id, "box"));
        };
        b.size = size;
        self.touched(id, true);
        Ok(())
    }

    pub fn set_cylinder(&mut self, id: NodeId, radius: f32, length: f32) -> Result<()> {
        let NodeKind::Cylinder(c) = &mut self.node_mut(id)?.kind else {
            return Err(Self::wrong_kind(id, "cylinder"));
        };
        *c = Cylinder::new(radius, length);
        self.touched(id, true);
        Ok(())
    }

    pub fn set_cone(&mut self, id: NodeId, radius: f32, length: f32) -> Result<()> {
        let NodeKind::Cone(c) = &mut self.node_mut(id)?.kind else {
            return Err(Self::wrong_kind(id, "cone"));
        };
        *c = Cone::new(radius, length);
        self.touched(id, true);
        Ok(())
    }

    pub fn set_torus(&mut self, id: NodeId, sweep: f32, circle: f32) -> Result<()> {
        let NodeKind::Torus(t) = &mut self.node_mut(id)?.kind else {
            return Err(Self::wrong_kind(id, "torus"));
        };
        *t = Torus::new(sweep, circle);
        self.touched(id, true);
        Ok(())
    }

    /// Change the operation of a plain or blended combinator
    pub fn set_csg_op(&mut self, id: NodeId, op: CsgOp) -> Result<()> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Csg(c) => c.op = op,
            NodeKind::Blend(b) => b.csg.op = op,
            _ => return Err(Self::wrong_kind(id, "csg")),
        }
        self.touched(id, true);
        Ok(())
    }

    pub fn set_blend(&mut self, id: NodeId, params: BlendParams) -> Result<()> {
        params.validate()?;
        let NodeKind::Blend(b) = &mut self.node_mut(id)?.kind else {
            return Err(Self::wrong_kind(id, "blend"));
        };
        b.params = params;
        self.touched(id, true);
        Ok(())
    }

    fn transform_node(&self, id: NodeId) -> Result<&TransformNode> {
        match &self.node(id)?.kind {
            NodeKind::Transform(t) => Ok(t),
            _ => Err(Self::wrong_kind(id, "transform")),
        }
    }

    fn transform_node_mut(&mut self, id: NodeId) -> Result<&mut TransformNode> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Transform(t) => Ok(t),
            _ => Err(Self::wrong_kind(id, "transform")),
        }
    }

    pub fn transform_params(&self, id: NodeId) -> Result<TransformParams> {
        Ok(self.transform_node(id)?.params())
    }

    /// Replace a transform's numbers. On a parameterized node this is a
    /// numeric edit unless its Vec3 slot can no longer carry the transform.
    pub fn set_transform_params(&mut self, id: NodeId, params: TransformParams) -> Result<()> {
        let node = self.transform_node_mut(id)?;
        node.set_params(params);
        let structural = node.binding().active_reference().is_none() || node.needs_promotion();
        self.touched(id, structural);
        Ok(())
    }

    /// The fifteen-number accessor pair
    pub fn transform_array(&self, id: NodeId) -> Result<[f32; 15]> {
        Ok(self.transform_node(id)?.params_array())
    }

    pub fn set_transform_array(&mut self, id: NodeId, values: [f32; 15]) -> Result<()> {
        self.set_transform_params(id, TransformParams::from_array(values))
    }

    /// Switch parameter indirection on or off; always a structural change
    pub fn set_parameterized(&mut self, id: NodeId, parameterized: bool) -> Result<()> {
        let node = self.transform_node_mut(id)?;
        if node.binding.parameterized == parameterized {
            return Ok(());
        }
        node.binding.parameterized = parameterized;
        self.shader_generation += 1;
        Ok(())
    }

    /// Ask the caching pass to bake this subtree
    pub fn set_requires_cache(&mut self, id: NodeId, requires: bool) -> Result<()> {
        let node = self.node_mut(id)?;
        if matches!(node.kind, NodeKind::VolCache(_)) && !requires {
            return Err(Error::malformed(id, "volume nodes always require a cache"));
        }
        if node.cache.requires_cache != requires {
            node.cache.requires_cache = requires;
            self.shader_generation += 1;
        }
        Ok(())
    }

    // ========================================================================
    // Bounds
    // ========================================================================

    /// Closed-form bounds of `id`, reusing results of the last bounds pass
    pub fn bounds(&self, id: NodeId) -> Result<Aabb> {
        let node = self.node(id)?;
        if let Some(b) = node.bounds {
            return Ok(b);
        }
        self.compute_bounds(id, node, &|child| self.bounds(child))
    }

    fn compute_bounds(
        &self,
        id: NodeId,
        node: &Node,
        child_bounds: &dyn Fn(NodeId) -> Result<Aabb>,
    ) -> Result<Aabb> {
        let pair = |a: Option<NodeId>, b: Option<NodeId>| -> Result<(Aabb, Aabb)> {
            let a = child_bounds(self.required_child(id, a, "first operand")?)?;
            let b = child_bounds(self.required_child(id, b, "second operand")?)?;
            Ok((a, b))
        };
        Ok(match &node.kind {
            NodeKind::Sphere(s) => s.bounds(),
            NodeKind::Box(b) => b.bounds(),
            NodeKind::Cylinder(c) => c.bounds(),
            NodeKind::Cone(c) => c.bounds(),
            NodeKind::Torus(t) => t.bounds(),
            NodeKind::Csg(c) => {
                let (a, b) = pair(c.children[0], c.children[1])?;
                c.bounds(&a, &b)
            }
            NodeKind::Blend(bl) => {
                let (a, b) = pair(bl.csg.children[0], bl.csg.children[1])?;
                bl.bounds(&a, &b, |p| self.evaluate_node(id, p).unwrap_or(EMPTY_FIELD))
            }
            NodeKind::Transform(t) => {
                let child = self.required_child(id, t.child, "child")?;
                t.bounds(&child_bounds(child)?)
            }
            NodeKind::VolCache(v) => v.bounds(),
        })
    }

    /// Compute and store bounds for every reachable node whose bounds an edit
    /// invalidated
    pub fn calc_bounds(&mut self) -> Result<Aabb> {
        let order = self.preorder();
        for id in order.iter().rev() {
            let node = &self.nodes[id.index()];
            if node.bounds.is_some() {
                continue;
            }
            let bounds = self.compute_bounds(*id, node, &|child| {
                self.nodes[child.index()]
                    .bounds
                    .ok_or_else(|| Error::malformed(child, "child bounds missing"))
            })?;
            self.nodes[id.index()].bounds = Some(bounds);
        }
        self.bounds(self.root_id()?)
    }

    // ========================================================================
    // CPU evaluation
    // ========================================================================

    /// Field value of the whole tree at `p`
    pub fn evaluate(&self, p: Vec3) -> Result<f32> {
        self.evaluate_node(self.root_id()?, p)
    }

    /// Field value of the subtree at `id`, always from the closed forms
    pub fn evaluate_node(&self, id: NodeId, p: Vec3) -> Result<f32> {
        let node = self.node(id)?;
        let pair = |a: Option<NodeId>, b: Option<NodeId>| -> Result<(f32, f32)> {
            let fa = self.evaluate_node(self.required_child(id, a, "first operand")?, p)?;
            let fb = self.evaluate_node(self.required_child(id, b, "second operand")?, p)?;
            Ok((fa, fb))
        };
        Ok(match &node.kind {
            NodeKind::Sphere(s) => s.evaluate(p),
            NodeKind::Box(b) => b.evaluate(p),
            NodeKind::Cylinder(c) => c.evaluate(p),
            NodeKind::Cone(c) => c.evaluate(p),
            NodeKind::Torus(t) => t.evaluate(p),
            NodeKind::Csg(c) => {
                let (fa, fb) = pair(c.children[0], c.children[1])?;
                c.evaluate(fa, fb)
            }
            NodeKind::Blend(b) => {
                let (fa, fb) = pair(b.csg.children[0], b.csg.children[1])?;
                b.evaluate(fa, fb)
            }
            NodeKind::Transform(t) => {
                let child = self.required_child(id, t.child, "child")?;
                self.evaluate_node(child, t.local_point(p))?
            }
            NodeKind::VolCache(v) => v.evaluate(p),
        })
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Field expression of the whole tree in terms of [`SAMPLE_VAR`]
    pub fn emit_field(&self) -> Result<String> {
        self.emit_node(self.root_id()?, true, SAMPLE_VAR)
    }

    /// Expression text of the subtree at `id`, parameterized by `sample`.
    ///
    /// A node using a cache always reads its slot and never recurses. With
    /// `cache_aware` set, a node that needs a cache but has none is
    /// malformed; without it, composites fall back to their closed form.
    /// Volume nodes have no closed form either way.
    pub fn emit_node(&self, id: NodeId, cache_aware: bool, sample: &str) -> Result<String> {
        let node = self.node(id)?;
        if node.cache.uses_cache {
            let slot = node
                .cache
                .slot
                .ok_or_else(|| Error::malformed(id, "cached node without a slot"))?;
            return Ok(emit::cache_read(sample, slot, &node.cache));
        }
        if cache_aware && node.cache.needs_cache() {
            return Err(Error::malformed(
                id,
                "node requires a cache but the caching pass has not assigned one",
            ));
        }

        let pair = |a: Option<NodeId>, b: Option<NodeId>| -> Result<(String, String)> {
            let a = self.required_child(id, a, "first operand")?;
            let b = self.required_child(id, b, "second operand")?;
            Ok((
                self.emit_node(a, cache_aware, sample)?,
                self.emit_node(b, cache_aware, sample)?,
            ))
        };
        Ok(match &node.kind {
            NodeKind::Sphere(s) => s.emit(sample),
            NodeKind::Box(b) => b.emit(sample),
            NodeKind::Cylinder(c) => c.emit(sample),
            NodeKind::Cone(c) => c.emit(sample),
            NodeKind::Torus(t) => t.emit(sample),
            NodeKind::Csg(c) => {
                let (a, b) = pair(c.children[0], c.children[1])?;
                c.emit(&a, &b)
            }
            NodeKind::Blend(bl) => {
                let (a, b) = pair(bl.csg.children[0], bl.csg.children[1])?;
                bl.emit(&a, &b)
            }
            NodeKind::Transform(t) => {
                let child = self.required_child(id, t.child, "child")?;
                self.emit_node(child, cache_aware, &t.emit_sample(sample))?
            }
            NodeKind::VolCache(_) => {
                return Err(Error::malformed(
                    id,
                    "volume node reached emission without a cache",
                ));
            }
        })
    }

    /// Cache slots the emitted text reads, in pre-order
    pub fn active_slots(&self) -> Vec<u32> {
        self.preorder()
            .into_iter()
            .filter_map(|id| {
                let cache = &self.nodes[id.index()].cache;
                cache.uses_cache.then_some(cache.slot).flatten()
            })
            .collect()
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    fn transforms(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| matches!(self.nodes[id.index()].kind, NodeKind::Transform(_)))
            .collect()
    }

    /// Whether a numeric edit anywhere under `id` can move its bounds
    fn has_parameterized_transform(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id.index()) else {
            return false;
        };
        if matches!(&node.kind, NodeKind::Transform(t) if t.is_parameterized()) {
            return true;
        }
        node.kind
            .children()
            .any(|child| self.has_parameterized_transform(child))
    }

    /// Bring every transform's slot in line with its mode: register newly
    /// parameterized nodes, promote Vec3 slots that gained rotation or scale,
    /// free slots of nodes that left parameterized mode. Cache mappings get
    /// a slot pair while their subtree holds a parameterized transform.
    /// Returns whether the registry's slot set changed.
    pub fn register_parameters(&mut self, registry: &mut ParameterRegistry) -> bool {
        let mut changed = false;
        for id in self.transforms() {
            if let NodeKind::Transform(t) = &mut self.nodes[id.index()].kind {
                changed |= Self::sync_binding(t, registry);
            }
        }

        // Unreachable nodes keep no slots
        let mut live = vec![false; self.nodes.len()];
        for id in self.preorder() {
            live[id.index()] =
                self.nodes[id.index()].cache.uses_cache && self.has_parameterized_transform(id);
        }
        for (node, live) in self.nodes.iter_mut().zip(live) {
            changed |= node.cache.mapping.sync(live, registry);
        }
        changed
    }

    fn sync_binding(t: &mut TransformNode, registry: &mut ParameterRegistry) -> bool {
        let wanted = t.wanted_kind();
        let promote = t.needs_promotion();
        let binding = &mut t.binding;

        if binding.id.is_registered() && (!binding.parameterized || promote) {
            registry.unregister(binding.id);
            binding.id = ParamId::UNREGISTERED;
            binding.kind = None;
            binding.reference = None;
            if !binding.parameterized {
                return true;
            }
        }
        if binding.parameterized && !binding.id.is_registered() {
            let id = registry.register(wanted);
            if id.is_registered() {
                binding.id = id;
                binding.kind = Some(wanted);
                return true;
            }
            // Exhausted: the node keeps emitting literals
            return promote;
        }
        false
    }

    /// Copy each transform's and cache mapping's text reference out of the
    /// refreshed registry
    pub fn refresh_parameter_strings(&mut self, registry: &ParameterRegistry) {
        for node in &mut self.nodes {
            node.cache.mapping.refresh(registry);
        }
        for id in self.transforms() {
            if let NodeKind::Transform(t) = &mut self.nodes[id.index()].kind {
                t.binding.reference = if t.binding.id.is_registered() {
                    registry.parameter_string(t.binding.id)
                } else {
                    None
                };
            }
        }
    }

    /// Text reference a transform currently emits through, if any
    pub fn parameter_string(&self, id: NodeId) -> Result<Option<&str>> {
        Ok(self.transform_node(id)?.binding().active_reference())
    }

    /// Upload every parameterized transform's current numbers, and the
    /// texture mapping of every cache that reads its mapping from slots
    pub fn push_parameters(&self, registry: &mut ParameterRegistry) -> Result<()> {
        for id in self.transforms() {
            if let NodeKind::Transform(t) = &self.nodes[id.index()].kind {
                if let (true, Some(kind)) = (t.binding.id.is_registered(), t.binding.kind) {
                    registry.set_payload(t.binding.id, &t.payload(kind))?;
                }
            }
        }
        for node in &self.nodes {
            let cache = &node.cache;
            if cache.mapping.is_registered() {
                registry.set_payload(cache.mapping.offset, &cache.offset.to_array())?;
                registry.set_payload(cache.mapping.scale, &cache.scale.to_array())?;
            }
        }
        Ok(())
    }

    /// Free every slot this tree holds, before discarding it
    pub fn release_parameters(&mut self, registry: &mut ParameterRegistry) {
        for node in &mut self.nodes {
            node.cache.mapping.release(registry);
            if let NodeKind::Transform(t) = &mut node.kind {
                if t.binding.id.is_registered() {
                    registry.unregister(t.binding.id);
                }
                t.binding.id = ParamId::UNREGISTERED;
                t.binding.kind = None;
                t.binding.reference = None;
            }
        }
    }

    // ========================================================================
    // Cache population
    // ========================================================================

    /// Rebake every cached node whose contents are dirty, and release slots
    /// no node uses. Volume failures are reported, not fatal.
    pub fn bake_caches(&mut self, store: &mut dyn CacheStore) -> Result<BakeReport> {
        let mut report = BakeReport::default();
        let order = self.preorder();

        for id in &order {
            let cache = &self.nodes[id.index()].cache;
            if !cache.uses_cache || !cache.dirty {
                continue;
            }
            let slot = cache
                .slot
                .ok_or_else(|| Error::malformed(*id, "cached node without a slot"))?;
            let resolution = cache.resolution;
            let bounds = self.bounds(*id)?;

            let volume = if let NodeKind::VolCache(v) = &mut self.nodes[id.index()].kind {
                let grid = v.sample_grid(resolution);
                if let Err(e) = v.store(grid, resolution) {
                    tracing::warn!("volume source of node {} failed: {}", id, e);
                    report.failures.push((*id, e));
                }
                v.loaded()
                    .cloned()
                    .unwrap_or_else(|| CachedVolume::empty(resolution, &bounds))
            } else {
                CachedVolume::bake(resolution, &bounds, |p| self.evaluate_node(*id, p))?
            };

            store.upload(slot, &volume);
            self.nodes[id.index()].cache.dirty = false;
            report.baked.push(slot);
        }

        let active = self.active_slots();
        for slot in store.resident_slots() {
            if !active.contains(&slot) {
                store.release(slot);
                report.released.push(slot);
            }
        }

        if !report.baked.is_empty() {
            tracing::info!(
                "baked {} cache slot(s), released {}",
                report.baked.len(),
                report.released.len()
            );
        }
        Ok(report)
    }

    /// Baked value of `id`'s cache at `p`, for checks against direct evaluation
    pub fn cached_value(&self, id: NodeId, p: Vec3, store: &MemoryCacheStore) -> Option<f32> {
        let cache = &self.node(id).ok()?.cache;
        let slot = cache.slot.filter(|_| cache.uses_cache)?;
        store.get(slot).map(|v| v.sample(p))
    }

    /// Resolution assigned to `id`, zero when uncached
    pub fn cache_resolution(&self, id: NodeId) -> Result<UVec3> {
        Ok(self.node(id)?.cache.resolution)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::caching::{CacheBudget, CachingPolicy};
    use crate::node::DenseVolume;
    use crate::params::ParamKind;
    use approx::assert_relative_eq;

    #[derive(Debug)]
    struct Unreadable;

    impl VolumeSource for Unreadable {
        fn bounds(&self) -> Aabb {
            Aabb::symmetric(Vec3::ONE)
        }

        fn sample(&self, _p: Vec3) -> std::result::Result<f32, VolumeError> {
            Err(VolumeError::Open("unreadable.raw".to_string()))
        }
    }

    fn small_policy() -> CachingPolicy {
        CachingPolicy::new(CacheBudget {
            max_voxels: 32 * 32 * 32,
            per_node_ceiling: 32 * 32 * 32,
        })
    }

    /// Sphere(1) translated by +X, parameterized; returns (sphere, transform)
    fn dragged_sphere(tree: &mut Tree) -> (NodeId, NodeId) {
        let s = tree.sphere(1.0);
        let t = tree.translate(s, Vec3::X).unwrap();
        tree.set_root(t).unwrap();
        tree.set_parameterized(t, true).unwrap();
        (s, t)
    }

    #[test]
    fn preorder_visits_children_in_slot_order() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.cube(1.0);
        let c = tree.torus(1.0, 0.2);
        let ab = tree.union(a, b).unwrap();
        let root = tree.subtraction(ab, c).unwrap();
        tree.set_root(root).unwrap();
        assert_eq!(tree.preorder(), vec![root, ab, a, b, c]);
        assert_eq!(tree.total_cost().unwrap(), 5 + 15 + 5 + 2 + 2);
    }

    #[test]
    fn nodes_have_a_single_owner() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.sphere(2.0);
        let u = tree.union(a, b).unwrap();
        assert!(matches!(tree.union(a, b), Err(Error::MalformedTree { .. })));
        let c = tree.sphere(3.0);
        assert!(tree.union(c, c).is_err());
        assert_eq!(tree.node(a).unwrap().parent(), Some(u));
    }

    #[test]
    fn set_child_rejects_cycles_and_bad_slots() {
        let mut tree = Tree::new();
        let inner = tree.empty(NodeKind::Csg(CsgNode::new(CsgOp::Union, None, None)));
        let outer = tree.empty(NodeKind::Transform(TransformNode::new(
            None,
            TransformParams::IDENTITY,
        )));
        tree.set_child(outer, 0, inner).unwrap();
        assert!(tree.set_child(inner, 0, outer).is_err());

        let leaf = tree.sphere(1.0);
        assert!(tree.set_child(inner, 2, leaf).is_err());
        tree.set_child(inner, 1, leaf).unwrap();
        assert_eq!(tree.node(inner).unwrap().first_child(), Some(leaf));
    }

    #[test]
    fn missing_child_is_malformed() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let csg = tree.empty(NodeKind::Csg(CsgNode::new(CsgOp::Union, None, None)));
        tree.set_child(csg, 0, a).unwrap();
        tree.set_root(csg).unwrap();

        assert!(matches!(tree.emit_field(), Err(Error::MalformedTree { node, .. }) if node == csg));
        assert!(tree.evaluate(Vec3::ZERO).is_err());
        assert!(tree.calc_bounds().is_err());
    }

    #[test]
    fn uncached_volume_never_emits() {
        let mut tree = Tree::new();
        let v = tree.volume(Box::new(DenseVolume::from_fn(
            UVec3::splat(4),
            Aabb::symmetric(Vec3::ONE),
            |p| 1.0 - p.length(),
        )));
        tree.set_root(v).unwrap();
        assert!(tree.emit_node(v, true, "p").is_err());
        assert!(tree.emit_node(v, false, "p").is_err());
        assert!(tree.set_requires_cache(v, false).is_err());
    }

    #[test]
    fn cache_awareness_only_relaxes_composites() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.cube(1.0);
        let root = tree.union(a, b).unwrap();
        tree.set_root(root).unwrap();
        tree.set_requires_cache(root, true).unwrap();

        assert!(tree.emit_field().is_err());
        let direct = tree.emit_node(root, false, "p").unwrap();
        assert!(direct.starts_with("r_union(field_sphere(p, 1.000000)"));

        tree.calc_bounds().unwrap();
        CachingPolicy::default().process(&mut tree).unwrap();
        let cached = tree.emit_field().unwrap();
        assert!(cached.starts_with("sample_cache(p, cache_tex_0, "));
        assert_eq!(tree.emit_node(root, false, "p").unwrap(), cached);
    }

    #[test]
    fn transforms_rewrite_the_sample_expression() {
        let mut tree = Tree::new();
        let s = tree.sphere(0.5);
        let t = tree.translate(s, Vec3::new(0.0, 0.0, 2.0)).unwrap();
        tree.set_root(t).unwrap();
        assert_eq!(
            tree.emit_field().unwrap(),
            "field_sphere(field_translate(p, vec3<f32>(0.000000, 0.000000, 2.000000)), 0.500000)"
        );
        assert_relative_eq!(
            tree.evaluate(Vec3::new(0.0, 0.0, 2.0)).unwrap(),
            1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn numeric_edits_on_parameterized_transforms_skip_the_shader() {
        let mut tree = Tree::new();
        let (_, t) = dragged_sphere(&mut tree);
        let mut registry = ParameterRegistry::new();
        assert!(tree.register_parameters(&mut registry));
        registry.refresh();
        tree.refresh_parameter_strings(&registry);
        let text = tree.emit_field().unwrap();
        assert_eq!(text, "field_sphere(field_translate(p, param_vec3[0]), 1.000000)");

        let shader = tree.shader_generation();
        let numeric = tree.numeric_generation();
        tree.set_transform_params(t, TransformParams::from_translation(Vec3::Y))
            .unwrap();
        assert_eq!(tree.shader_generation(), shader);
        assert_eq!(tree.numeric_generation(), numeric + 1);
        assert!(!tree.register_parameters(&mut registry));
        assert_eq!(tree.emit_field().unwrap(), text);

        tree.push_parameters(&mut registry).unwrap();
        let id = tree.transform_node(t).unwrap().binding().id;
        assert_eq!(registry.payload(id), Some(&[0.0, 1.0, 0.0][..]));
    }

    #[test]
    fn literal_transforms_recompile_on_numeric_edits() {
        let mut tree = Tree::new();
        let s = tree.sphere(1.0);
        let t = tree.translate(s, Vec3::X).unwrap();
        tree.set_root(t).unwrap();
        let shader = tree.shader_generation();
        tree.set_transform_params(t, TransformParams::from_translation(Vec3::Y))
            .unwrap();
        assert!(tree.shader_generation() > shader);
    }

    #[test]
    fn gaining_rotation_promotes_to_mat4() {
        let mut tree = Tree::new();
        let (_, t) = dragged_sphere(&mut tree);
        let mut registry = ParameterRegistry::new();
        tree.register_parameters(&mut registry);
        assert_eq!(registry.count(ParamKind::Vec3), 1);

        let shader = tree.shader_generation();
        let rotated = TransformParams {
            rotation: Vec3::new(0.0, 0.0, 0.5),
            ..TransformParams::from_translation(Vec3::X)
        };
        tree.set_transform_params(t, rotated).unwrap();
        assert!(tree.shader_generation() > shader);

        assert!(tree.register_parameters(&mut registry));
        assert_eq!(registry.count(ParamKind::Vec3), 0);
        assert_eq!(registry.count(ParamKind::Mat4), 1);
        registry.refresh();
        tree.refresh_parameter_strings(&registry);
        assert_eq!(
            tree.emit_field().unwrap(),
            "field_sphere(field_transform(p, param_mat4[0]), 1.000000)"
        );
    }

    #[test]
    fn leaving_parameterized_mode_frees_the_slot() {
        let mut tree = Tree::new();
        let (_, t) = dragged_sphere(&mut tree);
        let mut registry = ParameterRegistry::new();
        tree.register_parameters(&mut registry);
        assert_eq!(registry.len(), 1);

        tree.set_parameterized(t, false).unwrap();
        assert!(tree.register_parameters(&mut registry));
        assert!(registry.is_empty());
        assert!(tree.emit_field().unwrap().contains("vec3<f32>(1.000000"));
    }

    #[test]
    fn exhausted_registry_falls_back_to_literals() {
        let mut tree = Tree::new();
        let (_, t) = dragged_sphere(&mut tree);
        let mut registry = ParameterRegistry::with_capacity(0);
        assert!(!tree.register_parameters(&mut registry));
        registry.refresh();
        tree.refresh_parameter_strings(&registry);
        assert!(tree.emit_field().unwrap().contains("vec3<f32>("));

        // Without a slot every numeric edit must recompile
        let shader = tree.shader_generation();
        tree.set_transform_params(t, TransformParams::from_translation(Vec3::Z))
            .unwrap();
        assert!(tree.shader_generation() > shader);
    }

    #[test]
    fn transform_array_round_trips() {
        let mut tree = Tree::new();
        let (_, t) = dragged_sphere(&mut tree);
        let values = [
            1.0, 2.0, 3.0, 0.1, 0.2, 0.3, -1.0, 0.5, 0.0, 2.0, 1.0, 0.5, 0.0, 0.0, 4.0,
        ];
        tree.set_transform_array(t, values).unwrap();
        assert_eq!(tree.transform_array(t).unwrap(), values);
    }

    #[test]
    fn edits_dirty_cached_ancestors() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.cube(1.0);
        let u = tree.union(a, b).unwrap();
        tree.set_root(u).unwrap();
        tree.set_requires_cache(u, true).unwrap();
        tree.calc_bounds().unwrap();
        small_policy().process(&mut tree).unwrap();

        let mut store = MemoryCacheStore::new();
        let report = tree.bake_caches(&mut store).unwrap();
        assert_eq!(report.baked, vec![0]);
        assert!(!tree.node(u).unwrap().cache().dirty);

        tree.set_sphere(a, 0.8).unwrap();
        assert!(tree.node(u).unwrap().cache().dirty);
        assert!(tree.node(u).unwrap().cached_bounds().is_none());
        assert!(matches!(
            tree.set_box(a, Vec3::ONE),
            Err(Error::WrongKind { .. })
        ));
    }

    #[test]
    fn bake_matches_direct_evaluation() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.sphere(1.0);
        let moved = tree.translate(b, Vec3::X).unwrap();
        let u = tree.union(a, moved).unwrap();
        tree.set_root(u).unwrap();
        tree.set_requires_cache(u, true).unwrap();
        tree.calc_bounds().unwrap();
        small_policy().process(&mut tree).unwrap();

        let mut store = MemoryCacheStore::new();
        tree.bake_caches(&mut store).unwrap();
        let p = Vec3::new(0.5, 0.1, -0.2);
        let cached = tree.cached_value(u, p, &store).unwrap();
        let direct = tree.evaluate_node(u, p).unwrap();
        assert_relative_eq!(cached, direct, epsilon = 0.2);

        // Clean caches are not rebaked
        let again = tree.bake_caches(&mut store).unwrap();
        assert!(again.baked.is_empty());
        assert_eq!(store.upload_count(), 1);
    }

    #[test]
    fn failing_volume_is_reported_and_reads_empty() {
        let mut tree = Tree::new();
        let v = tree.volume(Box::new(Unreadable));
        let s = tree.sphere(0.5);
        let moved = tree.translate(s, Vec3::splat(3.0)).unwrap();
        let root = tree.union(v, moved).unwrap();
        tree.set_root(root).unwrap();
        tree.calc_bounds().unwrap();
        small_policy().process(&mut tree).unwrap();

        let mut store = MemoryCacheStore::new();
        let report = tree.bake_caches(&mut store).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, v);
        assert!(!report.is_clean());
        assert_eq!(tree.cached_value(v, Vec3::ZERO, &store), Some(EMPTY_FIELD));
        assert_eq!(tree.evaluate_node(v, Vec3::ZERO).unwrap(), EMPTY_FIELD);

        // The rest of the tree still evaluates
        assert!(tree.evaluate(Vec3::splat(3.0)).unwrap() > 0.0);
    }

    #[test]
    fn unused_slots_are_released() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.cube(1.0);
        let u = tree.union(a, b).unwrap();
        tree.set_root(u).unwrap();
        tree.set_requires_cache(u, true).unwrap();
        let policy = small_policy();
        tree.calc_bounds().unwrap();
        policy.process(&mut tree).unwrap();
        let mut store = MemoryCacheStore::new();
        tree.bake_caches(&mut store).unwrap();

        tree.set_requires_cache(u, false).unwrap();
        policy.process(&mut tree).unwrap();
        let report = tree.bake_caches(&mut store).unwrap();
        assert_eq!(report.released, vec![0]);
        assert!(store.resident_slots().is_empty());
    }

    #[test]
    fn cached_composite_over_volume_loads_the_volume_at_its_share() {
        let mut tree = Tree::new();
        let data = DenseVolume::from_fn(UVec3::splat(8), Aabb::symmetric(Vec3::ONE), |p| {
            1.0 - p.length()
        });
        let v = tree.volume(Box::new(data));
        let s = tree.sphere(0.5);
        let moved = tree.translate(s, Vec3::X).unwrap();
        let u = tree.union(v, moved).unwrap();
        tree.set_root(u).unwrap();
        tree.set_requires_cache(u, true).unwrap();
        tree.calc_bounds().unwrap();

        let report = small_policy().process(&mut tree).unwrap();
        let slots: Vec<(NodeId, u32)> = report
            .assignments
            .iter()
            .map(|(id, slot, _)| (*id, *slot))
            .collect();
        assert_eq!(slots, vec![(u, 0), (v, 1)]);
        for (_, _, resolution) in &report.assignments {
            assert!(resolution.min_element() > 1);
        }
        let volume_res = tree.cache_resolution(v).unwrap();
        assert_eq!(volume_res, report.assignments[1].2);

        let mut store = MemoryCacheStore::new();
        let bake = tree.bake_caches(&mut store).unwrap();
        assert!(bake.is_clean());
        assert_eq!(bake.baked, vec![0, 1]);
        let NodeKind::VolCache(node) = tree.node(v).unwrap().kind() else {
            panic!("volume node expected");
        };
        assert_eq!(node.load_state(), crate::node::LoadState::Loaded);
        assert_eq!(node.loaded().unwrap().resolution, volume_res);
        assert_eq!(store.get(1).unwrap().resolution, volume_res);
        assert_eq!(store.get(0).unwrap().resolution, report.assignments[0].2);
    }

    #[test]
    fn zero_blend_falloff_is_rejected() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        let b = tree.sphere(1.0);
        let flat = BlendParams {
            a1: 0.0,
            ..BlendParams::default()
        };
        assert!(matches!(
            tree.blend(CsgOp::Union, a, b, flat),
            Err(Error::InvalidBlend { .. })
        ));
        // Nothing was adopted, so the operands are still free
        let blend = tree.blend(CsgOp::Union, a, b, BlendParams::default()).unwrap();
        tree.set_root(blend).unwrap();

        let generation = tree.shader_generation();
        let flat = BlendParams {
            a2: 0.0,
            ..BlendParams::default()
        };
        assert!(tree.set_blend(blend, flat).is_err());
        assert_eq!(tree.shader_generation(), generation);
        assert!(tree.evaluate(Vec3::ZERO).unwrap().is_finite());
    }

    #[test]
    fn labels_find_nodes() {
        let mut tree = Tree::new();
        let a = tree.sphere(1.0);
        tree.set_label(a, "ball").unwrap();
        assert_eq!(tree.find("ball"), Some(a));
        assert_eq!(tree.find("missing"), None);
    }
}
