//! Voxel-budget caching pass
//!
//! Every node that needs a cache gets a slot and a per-axis resolution. The
//! global voxel budget is split in proportion to each node's bounding volume,
//! so all cached nodes end up with roughly the same voxel density.

use glam::UVec3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::{Aabb, NodeId};
use crate::tree::Tree;

/// Voxel limits applied by [`CachingPolicy::process`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBudget {
    /// Voxels shared by all cached nodes
    pub max_voxels: u64,
    /// Most voxels any single node may receive
    pub per_node_ceiling: u64,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_voxels: 4 * 128 * 128 * 128,
            per_node_ceiling: 128 * 128 * 128,
        }
    }
}

/// What a caching pass decided
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CachingReport {
    /// `(node, slot, resolution)` in pre-order
    pub assignments: Vec<(NodeId, u32, UVec3)>,
    /// Whether any node's cache state changed, forcing a recompile
    pub changed: bool,
}

impl CachingReport {
    /// Voxels handed out across all assignments
    pub fn voxel_count(&self) -> u64 {
        self.assignments
            .iter()
            .map(|(_, _, r)| u64::from(r.x) * u64::from(r.y) * u64::from(r.z))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingPolicy {
    pub budget: CacheBudget,
    /// Cache the smallest composite subtrees whose cost exceeds this
    pub auto_cache_cost: Option<u32>,
}

impl CachingPolicy {
    pub fn new(budget: CacheBudget) -> Self {
        Self {
            budget,
            auto_cache_cost: None,
        }
    }

    pub fn with_auto_cache(mut self, cost: u32) -> Self {
        self.auto_cache_cost = Some(cost);
        self
    }

    /// Assign slots and resolutions to every node that needs a cache and
    /// clear nodes that no longer do. Running it twice on an unchanged tree
    /// changes nothing the second time.
    ///
    /// Between structural edits, slots and resolutions stay frozen so that
    /// numeric edits never force a recompile. A moving cache mapping only
    /// counts as a change when it is written into the shader as literals.
    pub fn process(&self, tree: &mut Tree) -> Result<CachingReport> {
        let Some(root) = tree.root() else {
            return Ok(CachingReport::default());
        };
        let settled = tree.cache_settled();
        let mut changed = self.mark_auto_cache(tree, root)?;
        let frozen = settled && !changed;

        let mut wanted: Vec<(NodeId, Aabb)> = Vec::new();
        let mut clear: Vec<NodeId> = Vec::new();
        for id in tree.preorder() {
            let cache = tree.node(id)?.cache();
            if cache.needs_cache() {
                wanted.push((id, tree.bounds(id)?));
            } else if cache.uses_cache || cache.slot.is_some() {
                clear.push(id);
            }
        }

        let total: f64 = wanted.iter().map(|(_, b)| b.volume()).sum();
        let density = if total > 0.0 {
            self.budget.max_voxels as f64 / total
        } else {
            0.0
        };

        let mut report = CachingReport::default();
        let mut next_slot = 0u32;
        for (id, bounds) in wanted {
            let slot = next_slot;
            next_slot += 1;

            let cache = tree.cache_state_mut(id)?;
            let resolution = if frozen && cache.uses_cache && cache.slot == Some(slot) {
                cache.resolution
            } else {
                self.resolution(&bounds, density)
            };
            if !cache.is_assigned(slot, resolution) {
                cache.set_use_cache(true, Some(slot), resolution);
                changed = true;
            }
            let moved = cache.set_mapping(&bounds);
            changed |= moved && !cache.mapping.is_registered();

            tracing::debug!(
                "cache slot {} -> node {} at {}x{}x{}",
                slot,
                id,
                resolution.x,
                resolution.y,
                resolution.z
            );
            report.assignments.push((id, slot, resolution));
        }

        for id in clear {
            tree.cache_state_mut(id)?
                .set_use_cache(false, None, UVec3::ZERO);
            changed = true;
        }

        if changed {
            tree.bump_shader_generation();
            tracing::debug!(
                "caching pass changed assignments: {} slot(s), {} voxels",
                report.assignments.len(),
                report.voxel_count()
            );
        }
        tree.settle_cache();
        report.changed = changed;
        Ok(report)
    }

    /// Per-axis resolution giving `bounds` its share of the budget
    fn resolution(&self, bounds: &Aabb, density: f64) -> UVec3 {
        let volume = bounds.volume();
        if volume <= 0.0 {
            return UVec3::ONE;
        }
        let ceiling = self.budget.per_node_ceiling as f64;
        let target = (volume * density).clamp(0.0, ceiling);
        let per_unit = (target / volume).cbrt();
        let size = bounds.size().as_dvec3();
        UVec3::new(
            axis_resolution(per_unit * size.x),
            axis_resolution(per_unit * size.y),
            axis_resolution(per_unit * size.z),
        )
    }

    /// Set the auto-cache flag on the smallest composites whose subtree cost
    /// crosses the threshold. Returns whether any flag flipped.
    fn mark_auto_cache(&self, tree: &mut Tree, root: NodeId) -> Result<bool> {
        let mut marked = Vec::new();
        if let Some(threshold) = self.auto_cache_cost {
            Self::collect_auto(tree, root, threshold, &mut marked)?;
        }

        let mut changed = false;
        for id in tree.preorder() {
            let flag = marked.contains(&id);
            let cache = tree.cache_state_mut(id)?;
            if cache.auto_cache != flag {
                cache.auto_cache = flag;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Post-order walk; returns whether anything under `id` was marked
    fn collect_auto(
        tree: &Tree,
        id: NodeId,
        threshold: u32,
        marked: &mut Vec<NodeId>,
    ) -> Result<bool> {
        let node = tree.node(id)?;
        let mut below = false;
        for child in node.kind().children() {
            below |= Self::collect_auto(tree, child, threshold, marked)?;
        }
        if below {
            return Ok(true);
        }
        if !node.kind().is_leaf() && tree.cost(id)? > threshold {
            marked.push(id);
            return Ok(true);
        }
        Ok(false)
    }
}

fn axis_resolution(voxels: f64) -> u32 {
    (voxels.round() as u32).max(1)
}
