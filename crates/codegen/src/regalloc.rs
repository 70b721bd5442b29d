//! Hierarchical region-tree register allocation.
//!
//! Instead of a global interference graph, the allocator walks the
//! region tree: bottom-up constraint analysis estimates per-class
//! pressure from DAG live ranges, temporal-overlap analysis refines the
//! maximum simultaneous requirement across child execution states, and
//! the available budget is split between a region and its children in
//! proportion to computational complexity. FROM nodes try to reuse a
//! source operand's register so control-flow merges need no move.

use std::collections::{HashMap, HashSet};

use arc_ir::{DataType, Module, Opcode, RegionId};
use tracing::{debug, trace};

use crate::dag::{DagId, DagKind, SelectionDag};
use crate::target::{RegisterClass, TargetArch};

/// Register constraints for a region hierarchy.
#[derive(Clone, Debug, Default)]
pub struct Constraints {
    pub min_required: HashMap<RegisterClass, u32>,
    pub max_simultaneous: HashMap<RegisterClass, u32>,
    pub complexity: HashMap<RegisterClass, f32>,
    pub loop_depth: u32,
}

impl Constraints {
    /// Whether the requirement exceeds the available register counts.
    pub fn needs_spill(&self, available: &HashMap<RegisterClass, u32>) -> bool {
        self.min_required.iter().any(|(class, &required)| {
            available.get(class).copied().unwrap_or(0) < required
        })
    }
}

/// Register budget for hierarchical allocation.
#[derive(Clone, Debug)]
pub struct Budget<R> {
    pub available: HashMap<RegisterClass, HashSet<R>>,
    pub allocated: HashMap<RegisterClass, u32>,
    pub complexity_ratio: f32,
}

impl<R: Copy + Eq + std::hash::Hash> Default for Budget<R> {
    fn default() -> Self {
        Budget {
            available: HashMap::new(),
            allocated: HashMap::new(),
            complexity_ratio: 1.0,
        }
    }
}

impl<R: Copy + Eq + std::hash::Hash> Budget<R> {
    fn counts(&self) -> HashMap<RegisterClass, u32> {
        self.available
            .iter()
            .map(|(&class, regs)| (class, regs.len() as u32))
            .collect()
    }
}

/// Allocation request from the instruction selector.
#[derive(Clone, Debug)]
pub struct AllocRequest<R> {
    pub class: RegisterClass,
    pub hint: Option<R>,
    pub forbidden: Vec<R>,
    pub allow_spill: bool,
    pub priority: u32,
}

impl<R> AllocRequest<R> {
    pub fn for_class(class: RegisterClass) -> Self {
        AllocRequest {
            class,
            hint: None,
            forbidden: Vec::new(),
            allow_spill: true,
            priority: 0,
        }
    }
}

/// Allocation result handed back to the instruction selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocResult<R> {
    pub reg: Option<R>,
    pub spilled: bool,
}

impl<R> Default for AllocResult<R> {
    fn default() -> Self {
        AllocResult {
            reg: None,
            spilled: false,
        }
    }
}

impl<R> AllocResult<R> {
    pub fn allocated(&self) -> bool {
        self.reg.is_some()
    }

    pub fn on_stack(&self) -> bool {
        self.spilled
    }
}

/// Per-region budget and allocation tracking.
#[derive(Clone, Debug)]
struct RegionBudget<R> {
    available: HashMap<RegisterClass, HashSet<R>>,
    allocated: HashMap<RegisterClass, u32>,
}

impl<R: Copy + Eq + std::hash::Hash> Default for RegionBudget<R> {
    fn default() -> Self {
        RegionBudget {
            available: HashMap::new(),
            allocated: HashMap::new(),
        }
    }
}

/// Hierarchical register allocator over one region's selection DAG.
pub struct RegisterAllocator<'a, A: TargetArch> {
    arch: &'a A,
    module: &'a Module,
    dag: &'a SelectionDag<A::Instr>,
    region_budgets: HashMap<RegionId, RegionBudget<A::Register>>,
    allocations: HashMap<DagId, AllocResult<A::Register>>,
    region_constraints: HashMap<RegionId, Constraints>,
}

impl<'a, A: TargetArch> RegisterAllocator<'a, A> {
    pub fn new(arch: &'a A, module: &'a Module, dag: &'a SelectionDag<A::Instr>) -> Self {
        RegisterAllocator {
            arch,
            module,
            dag,
            region_budgets: HashMap::new(),
            allocations: HashMap::new(),
            region_constraints: HashMap::new(),
        }
    }

    /// The root region's opening budget: caller- plus callee-saved
    /// registers of every class.
    pub fn root_budget(&self) -> Budget<A::Register> {
        let mut budget = Budget::default();
        for class in RegisterClass::ALL {
            let mut regs: HashSet<A::Register> =
                self.arch.caller_saved(class).into_iter().collect();
            regs.extend(self.arch.callee_saved(class));
            budget.available.insert(class, regs);
            budget.allocated.insert(class, 0);
        }
        budget
    }

    /// Allocate registers for a region hierarchy.
    pub fn allocate(&mut self, region: RegionId, available: Budget<A::Register>) -> Budget<A::Register> {
        self.region_budgets.insert(
            region,
            RegionBudget {
                available: available.available.clone(),
                allocated: available.allocated.clone(),
            },
        );
        self.allocate_region(region, available)
    }

    fn allocate_region(
        &mut self,
        region: RegionId,
        available: Budget<A::Register>,
    ) -> Budget<A::Register> {
        let constraints = self.analyze(region);

        if constraints.needs_spill(&available.counts()) {
            self.apply_live_range_reuse(region);

            let updated = self.analyze(region);
            if updated.needs_spill(&available.counts()) {
                let candidates = self.identify_spill_candidates(region);
                debug!(
                    region = region.index(),
                    spills = candidates.len(),
                    "register pressure exceeds budget"
                );
                for node in candidates {
                    self.mark_for_spill(node);
                }
            }
        }

        self.allocate_proportional(region, available, &constraints)
    }

    /// Per-node allocation, called by the instruction selector.
    pub fn allocate_node(
        &mut self,
        node: DagId,
        req: &AllocRequest<A::Register>,
    ) -> AllocResult<A::Register> {
        let Some(source) = self.dag.node(node).source else {
            return AllocResult::default();
        };
        if let Some(&existing) = self.allocations.get(&node) {
            return existing;
        }
        let Some(region) = self.module.node(source).parent else {
            return AllocResult::default();
        };

        let result = self.perform_allocation(region, req);
        self.allocations.insert(node, result);
        result
    }

    /// Return a register to its region's budget when the value dies.
    pub fn release(&mut self, node: DagId) {
        let Some(&result) = self.allocations.get(&node) else {
            return;
        };
        let Some(reg) = result.reg else {
            return;
        };
        let Some(region) = self
            .dag
            .node(node)
            .source
            .and_then(|s| self.module.node(s).parent)
        else {
            return;
        };
        let class = self.infer_class(self.dag.node(node).value_type);
        let budget = self.region_budgets.entry(region).or_default();
        budget.available.entry(class).or_default().insert(reg);
        let count = budget.allocated.entry(class).or_insert(0);
        *count = count.saturating_sub(1);
        self.allocations.insert(node, AllocResult::default());
    }

    /// Spill marker requested by the selector.
    pub fn force_spill(&mut self, node: DagId) -> AllocResult<A::Register> {
        let result = AllocResult {
            reg: None,
            spilled: true,
        };
        self.allocations.insert(node, result);
        result
    }

    pub fn get(&self, node: DagId) -> AllocResult<A::Register> {
        self.allocations.get(&node).copied().unwrap_or_default()
    }

    /// Registers currently allocated in a region for a class.
    pub fn pressure(&self, region: RegionId, class: RegisterClass) -> u32 {
        self.region_budgets
            .get(&region)
            .and_then(|b| b.allocated.get(&class).copied())
            .unwrap_or(0)
    }

    /// Whether a specific register is free in a region.
    pub fn available(&self, region: RegionId, class: RegisterClass, reg: A::Register) -> bool {
        self.region_budgets
            .get(&region)
            .and_then(|b| b.available.get(&class))
            .is_some_and(|regs| regs.contains(&reg))
    }

    /// Fraction of allocation requests that ended in a spill.
    pub fn spill_ratio(&self) -> f32 {
        if self.allocations.is_empty() {
            return 0.0;
        }
        let spilled = self.allocations.values().filter(|r| r.spilled).count();
        spilled as f32 / self.allocations.len() as f32
    }

    // Constraint analysis

    /// Bottom-up constraint analysis with temporal overlap.
    fn analyze(&mut self, region: RegionId) -> Constraints {
        let mut local = self.compute_local(region);

        let children: Vec<RegionId> = self.module.region(region).children().to_vec();
        for child in children {
            let child_constraints = self.analyze(child);
            merge(&mut local, &child_constraints);
        }

        self.compute_overlap(&mut local, region);
        self.region_constraints.insert(region, local.clone());
        local
    }

    fn compute_local(&self, region: RegionId) -> Constraints {
        let mut constraints = Constraints {
            loop_depth: self.loop_depth(region),
            ..Constraints::default()
        };

        let local_nodes = self.region_nodes(region);
        // Inner loops overlap live ranges across iterations; the
        // quadratic depth term models that growth in pressure.
        let depth = constraints.loop_depth as f32;
        let loop_multiplier = 1.0 + depth * depth * 0.3;

        for class in RegisterClass::ALL {
            let info = self.compute_pressure(&local_nodes, class);
            constraints.min_required.insert(class, info.min_required);
            constraints
                .max_simultaneous
                .insert(class, info.max_simultaneous);
            constraints
                .complexity
                .insert(class, info.complexity * loop_multiplier);
        }
        constraints
    }

    /// Sweep-line maximum of simultaneously live values per class.
    fn compute_pressure(&self, nodes: &[DagId], class: RegisterClass) -> PressureInfo {
        let mut info = PressureInfo::default();
        let mut events: Vec<(u32, i32)> = Vec::new();

        for &node in nodes {
            if self.infer_class(self.dag.node(node).value_type) != class
                || !self.needs_allocation(node)
            {
                continue;
            }
            let (def, last_use) = self.live_range(node);
            events.push((def, 1));
            events.push((last_use, -1));
            info.complexity += self.node_complexity(node);
        }

        events.sort();
        let mut live = 0i32;
        for (_, delta) in events {
            live += delta;
            info.max_simultaneous = info.max_simultaneous.max(live.max(0) as u32);
        }
        info.min_required = info.max_simultaneous;
        info
    }

    /// Maximum concurrent requirement across child execution states:
    /// each child alone, plus the conservative all-children state.
    fn compute_overlap(&self, constraints: &mut Constraints, region: RegionId) {
        for value in constraints.max_simultaneous.values_mut() {
            *value = 0;
        }

        for state in self.execution_states(region) {
            let mut concurrent: HashMap<RegisterClass, u32> = HashMap::new();
            for child in state {
                if let Some(child_constraints) = self.region_constraints.get(&child) {
                    for (&class, &req) in &child_constraints.min_required {
                        *concurrent.entry(class).or_insert(0) += req;
                    }
                }
            }
            for (class, active) in concurrent {
                let entry = constraints.max_simultaneous.entry(class).or_insert(0);
                *entry = (*entry).max(active);
            }
        }
    }

    fn execution_states(&self, region: RegionId) -> Vec<Vec<RegionId>> {
        let children = self.module.region(region).children().to_vec();
        let mut states: Vec<Vec<RegionId>> = children.iter().map(|&c| vec![c]).collect();
        if !children.is_empty() {
            states.push(children);
        }
        states
    }

    // Budget distribution

    fn allocate_proportional(
        &mut self,
        region: RegionId,
        available: Budget<A::Register>,
        constraints: &Constraints,
    ) -> Budget<A::Register> {
        let total: f32 = constraints.complexity.values().sum();
        let has_children = !self.module.region(region).children().is_empty();
        // The parent keeps roughly a 30% floor when children compete for
        // the rest.
        let parent_complexity = if has_children { total * 0.3 } else { total };
        let child_complexity = total - parent_complexity;
        let parent_ratio = if child_complexity > 0.0 {
            parent_complexity / (parent_complexity + child_complexity)
        } else {
            1.0
        };

        let mut parent_budget = self.split_budget(&available, parent_ratio);
        self.allocate_local_values(region, &mut parent_budget);

        let remaining = subtract_budget(&available, &parent_budget);
        self.allocate_children(region, remaining);

        parent_budget
    }

    fn split_budget(&self, available: &Budget<A::Register>, ratio: f32) -> Budget<A::Register> {
        let mut parent = Budget {
            complexity_ratio: ratio,
            ..Budget::default()
        };
        for (&class, regs) in &available.available {
            let take = (regs.len() as f32 * ratio) as usize;
            let chosen: HashSet<A::Register> = regs.iter().copied().take(take).collect();
            parent.available.insert(class, chosen);
            parent.allocated.insert(class, 0);
        }
        parent
    }

    /// Allocate the region's own values. FROM nodes go first for their
    /// reuse opportunity; the rest proceed in topological order with
    /// dead-value release in between.
    fn allocate_local_values(&mut self, region: RegionId, budget: &mut Budget<A::Register>) {
        let local_nodes = self.region_nodes(region);
        let mut from_nodes = Vec::new();
        let mut other_nodes = Vec::new();

        for node in local_nodes {
            let is_from = self
                .dag
                .node(node)
                .source
                .is_some_and(|s| self.module.node(s).op == Opcode::From);
            if is_from {
                from_nodes.push(node);
            } else if self.needs_allocation(node) {
                other_nodes.push(node);
            }
        }

        for node in from_nodes {
            self.allocate_from_node(node, region, budget);
        }

        other_nodes.sort_by_key(|&n| self.dag.node(n).value_id);
        for node in other_nodes {
            let position = self.dag.node(node).value_id;
            self.release_dead_values(region, budget, position);
            self.allocate_regular(node, region, budget);
        }
    }

    /// Sequential chains free registers as earlier values die.
    fn release_dead_values(
        &mut self,
        region: RegionId,
        budget: &mut Budget<A::Register>,
        current_pos: u32,
    ) {
        let mut dead: Vec<(DagId, A::Register, RegisterClass)> = Vec::new();
        for (&allocated_node, result) in &self.allocations {
            let Some(reg) = result.reg else {
                continue;
            };
            let in_region = self
                .dag
                .node(allocated_node)
                .source
                .and_then(|s| self.module.node(s).parent)
                == Some(region);
            if !in_region {
                continue;
            }
            // Strict comparison so a value dying at this position is not
            // released prematurely.
            let (_, last_use) = self.live_range(allocated_node);
            if last_use < current_pos {
                let class = self.infer_class(self.dag.node(allocated_node).value_type);
                dead.push((allocated_node, reg, class));
            }
        }

        for (node, reg, class) in dead {
            budget.available.entry(class).or_default().insert(reg);
            let master = self.region_budgets.entry(region).or_default();
            master.available.entry(class).or_default().insert(reg);
            if let Some(count) = master.allocated.get_mut(&class) {
                *count = count.saturating_sub(1);
            }
            self.allocations.insert(node, AllocResult::default());
        }
    }

    /// Reusing a source operand's register eliminates the cross-path
    /// move a FROM would otherwise need.
    fn allocate_from_node(
        &mut self,
        node: DagId,
        region: RegionId,
        budget: &mut Budget<A::Register>,
    ) {
        let class = self.infer_class(self.dag.node(node).value_type);

        let operands: Vec<DagId> = self.dag.node(node).operands.to_vec();
        for source in operands {
            let alloc = self.get(source);
            if let Some(reg) = alloc.reg {
                if budget
                    .available
                    .get(&class)
                    .is_some_and(|regs| regs.contains(&reg))
                {
                    self.allocate_specific(node, reg, class, region, budget);
                    return;
                }
            } else {
                // Unallocated cross-region sources are likeliest to be
                // in caller-saved registers at the merge point.
                let cross_region = self.dag.node(source).source.is_some_and(|s| {
                    self.module.node(s).parent != self.dag.node(node).source.and_then(|ns| self.module.node(ns).parent)
                });
                if cross_region {
                    let caller_saved = self.arch.caller_saved(class);
                    if let Some(&reg) = caller_saved.first() {
                        if budget
                            .available
                            .get(&class)
                            .is_some_and(|regs| regs.contains(&reg))
                        {
                            self.allocate_specific(node, reg, class, region, budget);
                            return;
                        }
                    }
                }
            }
        }

        self.allocate_regular(node, region, budget);
    }

    fn allocate_regular(&mut self, node: DagId, region: RegionId, budget: &mut Budget<A::Register>) {
        let class = self.infer_class(self.dag.node(node).value_type);
        let reg = budget
            .available
            .get(&class)
            .and_then(|regs| regs.iter().next().copied());
        match reg {
            Some(reg) => self.allocate_specific(node, reg, class, region, budget),
            None => self.mark_for_spill(node),
        }
    }

    fn allocate_specific(
        &mut self,
        node: DagId,
        reg: A::Register,
        class: RegisterClass,
        region: RegionId,
        budget: &mut Budget<A::Register>,
    ) {
        trace!(value = self.dag.node(node).value_id, "assigned register");
        self.allocations.insert(
            node,
            AllocResult {
                reg: Some(reg),
                spilled: false,
            },
        );
        if let Some(regs) = budget.available.get_mut(&class) {
            regs.remove(&reg);
        }
        *budget.allocated.entry(class).or_insert(0) += 1;

        let master = self.region_budgets.entry(region).or_default();
        if let Some(regs) = master.available.get_mut(&class) {
            regs.remove(&reg);
        }
        *master.allocated.entry(class).or_insert(0) += 1;
    }

    fn allocate_children(&mut self, region: RegionId, mut remaining: Budget<A::Register>) {
        let children: Vec<RegionId> = self.module.region(region).children().to_vec();
        for child in children {
            if self.region_constraints.contains_key(&child) {
                remaining = self.allocate(child, remaining);
            }
        }
    }

    // Spill handling

    /// Find values whose register can be reused because another value of
    /// the same class dies before their definition, and pre-assign it.
    fn apply_live_range_reuse(&mut self, region: RegionId) {
        let local_nodes = self.region_nodes(region);
        let mut reused = 0usize;

        for &node in &local_nodes {
            if !self.needs_allocation(node) || self.allocations.contains_key(&node) {
                continue;
            }
            let class = self.infer_class(self.dag.node(node).value_type);
            let (def, _) = self.live_range(node);

            let reusable = self.allocations.iter().find_map(|(&other, result)| {
                let reg = result.reg?;
                let other_class = self.infer_class(self.dag.node(other).value_type);
                let other_in_region = self
                    .dag
                    .node(other)
                    .source
                    .and_then(|s| self.module.node(s).parent)
                    == Some(region);
                if other_class != class || !other_in_region {
                    return None;
                }
                let (_, other_last_use) = self.live_range(other);
                (other_last_use <= def).then_some(reg)
            });

            if let Some(reg) = reusable {
                self.allocations.insert(
                    node,
                    AllocResult {
                        reg: Some(reg),
                        spilled: false,
                    },
                );
                reused += 1;
            }
        }
        if reused > 0 {
            trace!(region = region.index(), reused, "live-range register reuse");
        }
    }

    /// Single-use values spill cheapest: the reload folds into the use.
    fn identify_spill_candidates(&self, region: RegionId) -> Vec<DagId> {
        self.region_nodes(region)
            .into_iter()
            .filter(|&node| {
                self.needs_allocation(node) && self.dag.node(node).users.len() <= 1
            })
            .collect()
    }

    fn mark_for_spill(&mut self, node: DagId) {
        self.allocations.insert(
            node,
            AllocResult {
                reg: None,
                spilled: true,
            },
        );
    }

    fn perform_allocation(
        &mut self,
        region: RegionId,
        req: &AllocRequest<A::Register>,
    ) -> AllocResult<A::Register> {
        let budget = self.region_budgets.entry(region).or_default();

        // Hints come from FROM sources and target conventions; honour
        // them first.
        if let Some(hint) = req.hint {
            let usable = budget
                .available
                .get(&req.class)
                .is_some_and(|regs| regs.contains(&hint))
                && !req.forbidden.contains(&hint);
            if usable {
                if let Some(regs) = budget.available.get_mut(&req.class) {
                    regs.remove(&hint);
                }
                *budget.allocated.entry(req.class).or_insert(0) += 1;
                return AllocResult {
                    reg: Some(hint),
                    spilled: false,
                };
            }
        }

        let chosen = budget
            .available
            .get(&req.class)
            .and_then(|regs| regs.iter().copied().find(|reg| !req.forbidden.contains(reg)));
        match chosen {
            Some(reg) => {
                if let Some(regs) = budget.available.get_mut(&req.class) {
                    regs.remove(&reg);
                }
                *budget.allocated.entry(req.class).or_insert(0) += 1;
                AllocResult {
                    reg: Some(reg),
                    spilled: false,
                }
            }
            None if req.allow_spill => AllocResult {
                reg: None,
                spilled: true,
            },
            None => AllocResult::default(),
        }
    }

    // Shared helpers

    fn region_nodes(&self, region: RegionId) -> Vec<DagId> {
        self.dag
            .ids()
            .filter(|&id| {
                self.dag
                    .node(id)
                    .source
                    .and_then(|s| self.module.node(s).parent)
                    == Some(region)
            })
            .collect()
    }

    fn needs_allocation(&self, node: DagId) -> bool {
        self.dag.node(node).kind == DagKind::Value
            && self.dag.node(node).value_type != DataType::Void
    }

    /// Live range over linearised value ids: definition to last use.
    fn live_range(&self, node: DagId) -> (u32, u32) {
        let def = self.dag.node(node).value_id;
        let last_use = self
            .dag
            .node(node)
            .users
            .iter()
            .map(|&u| self.dag.node(u).value_id)
            .max()
            .unwrap_or(def)
            .max(def);
        (def, last_use)
    }

    fn infer_class(&self, ty: DataType) -> RegisterClass {
        match ty {
            DataType::Vector => RegisterClass::Vector,
            DataType::Float32 | DataType::Float64 => {
                if self.arch.uses_vector_for_float() {
                    RegisterClass::Vector
                } else {
                    RegisterClass::GeneralPurpose
                }
            }
            _ => RegisterClass::GeneralPurpose,
        }
    }

    fn node_complexity(&self, node: DagId) -> f32 {
        let Some(source) = self.dag.node(node).source else {
            return 1.0;
        };
        match self.module.node(source).op {
            Opcode::Mul => 3.0,
            Opcode::Div | Opcode::Mod => 10.0,
            Opcode::Call | Opcode::Invoke => 20.0,
            Opcode::Load | Opcode::PtrLoad => 2.0,
            _ => 1.0,
        }
    }

    fn loop_depth(&self, region: RegionId) -> u32 {
        let mut depth = 0;
        let mut current = Some(region);
        while let Some(r) = current {
            if self.is_loop_region(r) {
                depth += 1;
            }
            current = self.module.region(r).parent();
        }
        depth
    }

    fn is_loop_region(&self, region: RegionId) -> bool {
        let Some(entry) = self.module.entry_of(region) else {
            return false;
        };
        self.module.node(entry).users.iter().any(|&user| {
            let user_node = self.module.node(user);
            matches!(user_node.op, Opcode::Jump | Opcode::Branch)
                && user_node
                    .parent
                    .is_some_and(|p| self.module.dominates(region, p))
        })
    }
}

#[derive(Default)]
struct PressureInfo {
    min_required: u32,
    max_simultaneous: u32,
    complexity: f32,
}

fn merge(parent: &mut Constraints, child: &Constraints) {
    // Children might not execute concurrently; take the max and let the
    // temporal overlap pass refine it.
    for (&class, &child_req) in &child.min_required {
        let entry = parent.min_required.entry(class).or_insert(0);
        *entry = (*entry).max(child_req);
        let max_entry = parent.max_simultaneous.entry(class).or_insert(0);
        *max_entry = (*max_entry).max(child.max_simultaneous.get(&class).copied().unwrap_or(0));
        *parent.complexity.entry(class).or_insert(0.0) +=
            child.complexity.get(&class).copied().unwrap_or(0.0);
    }
}

fn subtract_budget<R: Copy + Eq + std::hash::Hash>(
    total: &Budget<R>,
    used: &Budget<R>,
) -> Budget<R> {
    let mut remaining = Budget::default();
    for (&class, total_regs) in &total.available {
        let used_regs = used.available.get(&class);
        let rest: HashSet<R> = total_regs
            .iter()
            .copied()
            .filter(|reg| used_regs.is_none_or(|u| !u.contains(reg)))
            .collect();
        remaining.available.insert(class, rest);
        remaining.allocated.insert(class, 0);
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{TargetInstruction, RegisterClass};
    use arc_ir::Builder;

    #[derive(Debug)]
    struct MobileInstr;
    impl TargetInstruction for MobileInstr {
        type Opcode = u16;
        fn max_operands() -> usize {
            4
        }
        fn encoding_size() -> usize {
            4
        }
    }

    /// A small mobile-class target: 13 general-purpose and 16 vector
    /// registers, floats in the vector class.
    struct MobileTarget;

    impl TargetArch for MobileTarget {
        type Instr = MobileInstr;
        type Register = u16;

        fn register_count(&self, class: RegisterClass) -> u32 {
            match class {
                RegisterClass::GeneralPurpose => 13,
                RegisterClass::Vector => 16,
                RegisterClass::Predicate => 0,
            }
        }

        fn caller_saved(&self, class: RegisterClass) -> Vec<u16> {
            match class {
                RegisterClass::GeneralPurpose => (0..8).collect(),
                RegisterClass::Vector => (100..108).collect(),
                RegisterClass::Predicate => Vec::new(),
            }
        }

        fn callee_saved(&self, class: RegisterClass) -> Vec<u16> {
            match class {
                RegisterClass::GeneralPurpose => (8..13).collect(),
                RegisterClass::Vector => (108..116).collect(),
                RegisterClass::Predicate => Vec::new(),
            }
        }

        fn spill_cost(&self, _reg: u16) -> u32 {
            4
        }

        fn uses_vector_for_float(&self) -> bool {
            true
        }
    }

    /// Long dependency chain mixing integer and float work: the regalloc
    /// benchmark shape.
    fn build_chain_module() -> (arc_ir::Module, RegionId, SelectionDag<MobileInstr>) {
        let mut m = arc_ir::Module::new("bench");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("chain", DataType::Int32)
            .param("seed", DataType::Int32)
            .param("scale", DataType::Float32)
            .build()
            .unwrap();

        let mut acc = f.params[0];
        for i in 0..20 {
            let c = b.lit(i as i32 + 1);
            acc = if i % 3 == 0 {
                b.mul(acc, c).unwrap()
            } else {
                b.add(acc, c).unwrap()
            };
        }
        let facc = b.cast(acc, DataType::Float32).unwrap();
        let scaled = b.mul(facc, f.params[1]).unwrap();
        let back = b.cast(scaled, DataType::Int32).unwrap();
        b.ret(Some(back));

        let mut dag = SelectionDag::new(f.region);
        dag.build(&m).unwrap();
        dag.linearize();
        (m, f.region, dag)
    }

    #[test]
    fn chain_allocates_in_both_classes_with_low_spill() {
        let (m, region, dag) = build_chain_module();
        let target = MobileTarget;
        let mut ra = RegisterAllocator::new(&target, &m, &dag);
        let root = ra.root_budget();
        ra.allocate(region, root);

        assert!(ra.pressure(region, RegisterClass::GeneralPurpose) > 0);
        assert!(ra.pressure(region, RegisterClass::Vector) > 0);
        assert!(
            ra.spill_ratio() < 0.5,
            "spill ratio {} exceeds budget",
            ra.spill_ratio()
        );
    }

    #[test]
    fn release_returns_register_to_budget() {
        let (m, region, dag) = build_chain_module();
        let target = MobileTarget;
        let mut ra = RegisterAllocator::new(&target, &m, &dag);
        let root = ra.root_budget();
        ra.allocate(region, root);

        let allocated = dag
            .ids()
            .find(|&id| dag.node(id).value_type == DataType::Int32 && ra.get(id).allocated())
            .expect("at least one integer value holds a register");
        let reg = ra.get(allocated).reg.unwrap();
        let class = RegisterClass::GeneralPurpose;

        let before = ra.pressure(region, class);
        ra.release(allocated);
        assert!(ra.pressure(region, class) < before);
        assert!(ra.available(region, class, reg));
    }

    #[test]
    fn allocate_node_honours_hint_and_forbidden() {
        let (m, region, dag) = build_chain_module();
        let target = MobileTarget;
        let mut ra = RegisterAllocator::new(&target, &m, &dag);
        let root = ra.root_budget();
        ra.region_budgets.insert(
            region,
            RegionBudget {
                available: root.available.clone(),
                allocated: root.allocated.clone(),
            },
        );

        let node = dag
            .ids()
            .find(|&id| {
                dag.node(id).kind == DagKind::Value && dag.node(id).value_type == DataType::Int32
            })
            .unwrap();

        let mut req = AllocRequest::for_class(RegisterClass::GeneralPurpose);
        req.hint = Some(5);
        let result = ra.allocate_node(node, &req);
        assert_eq!(result.reg, Some(5));

        // The cache answers repeated queries for the same node.
        let again = ra.allocate_node(node, &req);
        assert_eq!(again.reg, Some(5));
    }

    #[test]
    fn exhausted_class_spills_when_allowed() {
        let (m, region, dag) = build_chain_module();
        let target = MobileTarget;
        let mut ra = RegisterAllocator::new(&target, &m, &dag);
        // Empty budget: every allocation request must spill.
        ra.region_budgets.insert(region, RegionBudget::default());

        let node = dag
            .ids()
            .find(|&id| dag.node(id).kind == DagKind::Value)
            .unwrap();
        let req = AllocRequest::for_class(RegisterClass::GeneralPurpose);
        let result = ra.allocate_node(node, &req);
        assert!(result.on_stack());
        assert!(!result.allocated());
    }
}
