//! Regions: structured control-flow scopes forming a tree per module.
//!
//! A region owns an ordered node list whose first element is always its
//! unique ENTRY node. Parent-to-child containment is the structural
//! dominance relation; unstructured JUMP/BRANCH/INVOKE transfers can
//! weaken effective dominance and are detected explicitly.

use std::collections::{HashSet, VecDeque};

use crate::interner::StrId;
use crate::module::Module;
use crate::node::{NodeId, Opcode};

/// Handle to a region in the module's region arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RegionId(pub(crate) u32);

impl RegionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn new(raw: usize) -> Self {
        RegionId(raw as u32)
    }
}

/// A structured control-flow scope.
#[derive(Debug)]
pub struct Region {
    pub(crate) name: StrId,
    pub(crate) parent: Option<RegionId>,
    pub(crate) children: Vec<RegionId>,
    pub(crate) nodes: Vec<NodeId>,
}

impl Region {
    pub fn name(&self) -> StrId {
        self.name
    }

    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    pub fn children(&self) -> &[RegionId] {
        &self.children
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

impl Module {
    /// The region's ENTRY node, if it has one.
    pub fn entry_of(&self, region: RegionId) -> Option<NodeId> {
        let first = *self.region(region).nodes.first()?;
        (self.node(first).op == Opcode::Entry).then_some(first)
    }

    /// A region is terminated iff its last node is RET/JUMP/BRANCH/INVOKE.
    pub fn is_terminated(&self, region: RegionId) -> bool {
        self.region(region)
            .nodes
            .last()
            .is_some_and(|&last| self.node(last).op.is_terminator())
    }

    /// Structural dominance, weakened by unstructured transfers: a region
    /// does not dominate a target that it (or any of its ancestors) can
    /// reach through a jump that bypasses the tree.
    pub fn dominates(&self, region: RegionId, possibly_dominated: RegionId) -> bool {
        if region == possibly_dominated {
            return true;
        }

        if self.unstructured_jump_to(region, possibly_dominated).is_some() {
            return false;
        }
        let mut ancestor = self.region(region).parent;
        while let Some(a) = ancestor {
            if self.unstructured_jump_to(a, possibly_dominated).is_some() {
                return false;
            }
            ancestor = self.region(a).parent;
        }

        self.dominates_via_tree(region, possibly_dominated)
    }

    /// Pure tree-based dominance: a parent dominates its descendants.
    pub fn dominates_via_tree(&self, region: RegionId, possibly_dominated: RegionId) -> bool {
        if region == possibly_dominated {
            return true;
        }
        let mut ancestor = self.region(possibly_dominated).parent;
        while let Some(a) = ancestor {
            if a == region {
                return true;
            }
            ancestor = self.region(a).parent;
        }
        false
    }

    /// Find a JUMP/BRANCH/INVOKE in `region` that transfers into `target`
    /// without tree dominance.
    pub fn unstructured_jump_to(&self, region: RegionId, target: RegionId) -> Option<NodeId> {
        for &node_id in &self.region(region).nodes {
            let node = self.node(node_id);
            let targets: &[NodeId] = match node.op {
                Opcode::Jump => &node.inputs[..node.inputs.len().min(1)],
                Opcode::Branch if node.inputs.len() >= 3 => &node.inputs[1..3],
                Opcode::Invoke if node.inputs.len() >= 3 => &node.inputs[1..3],
                _ => continue,
            };
            for &entry in targets {
                if self.node(entry).parent == Some(target)
                    && !self.dominates_via_tree(region, target)
                {
                    return Some(node_id);
                }
            }
        }
        None
    }

    /// Lowest common ancestor of two regions in the region tree.
    pub fn find_lca(&self, a: RegionId, b: RegionId) -> Option<RegionId> {
        let depth = |mut r: RegionId| {
            let mut d = 0usize;
            while let Some(p) = self.region(r).parent {
                d += 1;
                r = p;
            }
            d
        };

        let (mut a, mut b) = (a, b);
        let (mut da, mut db) = (depth(a), depth(b));
        while da > db {
            a = self.region(a).parent?;
            da -= 1;
        }
        while db > da {
            b = self.region(b).parent?;
            db -= 1;
        }
        while a != b {
            a = self.region(a).parent?;
            b = self.region(b).parent?;
        }
        Some(a)
    }

    /// Pre-order walk over the region subtree rooted at `root`.
    pub fn walk_dominated_regions(&self, root: RegionId, visitor: &mut impl FnMut(RegionId)) {
        visitor(root);
        let children = self.region(root).children.clone();
        for child in children {
            self.walk_dominated_regions(child, visitor);
        }
    }

    /// All regions in the subtree rooted at `root`, pre-order.
    pub fn dominated_regions(&self, root: RegionId) -> Vec<RegionId> {
        let mut out = Vec::new();
        self.walk_dominated_regions(root, &mut |r| out.push(r));
        out
    }

    /// Whether control flow can transfer from `from` to `target`,
    /// following JUMP/BRANCH/INVOKE edges only. RET ends a path. The
    /// traversal carries a visited set; the flow graph has cycles.
    pub fn can_reach(&self, from: RegionId, target: RegionId) -> bool {
        if from == target {
            return true;
        }

        let mut visited: HashSet<RegionId> = HashSet::new();
        let mut worklist: VecDeque<RegionId> = VecDeque::new();
        worklist.push_back(from);

        while let Some(current) = worklist.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if current == target {
                return true;
            }

            for &node_id in &self.region(current).nodes {
                let node = self.node(node_id);
                let targets: &[NodeId] = match node.op {
                    Opcode::Jump => &node.inputs[..node.inputs.len().min(1)],
                    Opcode::Branch if node.inputs.len() >= 3 => &node.inputs[1..3],
                    Opcode::Invoke if node.inputs.len() >= 3 => &node.inputs[1..3],
                    _ => continue,
                };
                for &entry in targets {
                    if let Some(entry_region) = self.node(entry).parent {
                        worklist.push_back(entry_region);
                    }
                }
            }
        }

        false
    }
}
