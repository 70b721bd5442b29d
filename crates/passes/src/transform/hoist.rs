//! Region-based loop-invariant code motion.
//!
//! A region is a loop when its ENTRY has a back-edge user inside the
//! region's dominated subtree. Invariant expressions move to the loop's
//! parent region, in front of its terminator; loads move only when no
//! store along the dominating path may alias them. Candidates are
//! ranked by cost × 2^depth so the most expensive work leaves the
//! deepest loops first.

use std::collections::HashSet;

use arc_ir::{Module, NodeId, Opcode, RegionId};
use tracing::debug;

use crate::analysis::tbaa::{AliasKind, TbaaResult};
use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{NamedResult, Pass, TransformPass};

#[derive(Clone, Copy, Debug)]
struct HoistCandidate {
    node: NodeId,
    loop_region: RegionId,
    target: RegionId,
    benefit: u32,
}

/// Loop-invariant code motion pass.
#[derive(Default)]
pub struct HoistExprPass;

impl Pass for HoistExprPass {
    fn name(&self) -> &'static str {
        "hoist-expressions"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![TbaaResult::NAME]
    }
}

impl TransformPass for HoistExprPass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let tbaa = pm.get::<TbaaResult>()?;

        let mut candidates = find_candidates(module, &tbaa);
        // Highest benefit moves first.
        candidates.sort_by(|a, b| b.benefit.cmp(&a.benefit));

        let mut modified: HashSet<RegionId> = HashSet::new();
        let mut hoisted: HashSet<NodeId> = HashSet::new();

        // Dependent invariants may need their operands moved first, so
        // sweep until a pass makes no progress.
        loop {
            let mut progressed = false;
            for candidate in &candidates {
                if hoisted.contains(&candidate.node) {
                    continue;
                }
                if !operands_available(module, candidate.node, candidate.loop_region) {
                    continue;
                }
                if hoist_expression(module, candidate) {
                    hoisted.insert(candidate.node);
                    modified.insert(candidate.loop_region);
                    modified.insert(candidate.target);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        if !hoisted.is_empty() {
            debug!(count = hoisted.len(), "hoisted loop-invariant expressions");
        }
        let mut out: Vec<RegionId> = modified.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

/// A region is a loop when a JUMP/BRANCH/INVOKE user of its ENTRY sits
/// in a region it dominates (a back edge).
fn is_loop_region(module: &Module, region: RegionId) -> bool {
    let Some(entry) = module.entry_of(region) else {
        return false;
    };
    module.node(entry).users.iter().any(|&user| {
        let user_node = module.node(user);
        matches!(
            user_node.op,
            Opcode::Jump | Opcode::Branch | Opcode::Invoke
        ) && user_node
            .parent
            .is_some_and(|p| module.dominates(region, p))
    })
}

/// Number of loop regions enclosing (and including) this one.
fn loop_depth(module: &Module, region: RegionId) -> u32 {
    let mut depth = 0;
    let mut current = Some(region);
    while let Some(r) = current {
        if is_loop_region(module, r) {
            depth += 1;
        }
        current = module.region(r).parent();
    }
    depth
}

fn is_hoistable_expression(module: &Module, node: NodeId) -> bool {
    let n = module.node(node);
    if n.is_volatile() {
        return false;
    }
    match n.op {
        op if op.is_binary_arith() => true,
        op if op.is_comparison() => true,
        op if op.is_bitwise_binary() => true,
        Opcode::Bnot | Opcode::Cast | Opcode::PtrAdd | Opcode::AddrOf => true,
        Opcode::Load | Opcode::PtrLoad => true,
        Opcode::VectorBuild | Opcode::VectorExtract | Opcode::VectorSplat => true,
        _ => false,
    }
}

/// Every operand must be a literal, a parameter, or defined outside the
/// loop's dominated subtree.
fn operands_available(module: &Module, node: NodeId, loop_region: RegionId) -> bool {
    module.node(node).inputs.iter().all(|&input| {
        let op = module.node(input).op;
        if matches!(op, Opcode::Lit | Opcode::Param) {
            return true;
        }
        match module.node(input).parent {
            Some(region) => !module.dominates(loop_region, region),
            None => false,
        }
    })
}

/// Regions on the parent chain from the loop up to the hoist target.
fn dominating_path(module: &Module, from: RegionId, to: RegionId) -> Vec<RegionId> {
    let mut path = vec![from];
    let mut current = from;
    while current != to {
        match module.region(current).parent() {
            Some(parent) => {
                path.push(parent);
                current = parent;
            }
            None => break,
        }
    }
    path
}

/// Hoisting a load is safe only when no store on the dominating path may
/// alias it.
fn safe_to_hoist_load(
    module: &Module,
    load: NodeId,
    from: RegionId,
    to: RegionId,
    tbaa: &TbaaResult,
) -> bool {
    for region in dominating_path(module, from, to) {
        for &node in module.region(region).nodes() {
            if module.node(node).op.is_store()
                && tbaa.alias(module, load, node) != AliasKind::NoAlias
            {
                return false;
            }
        }
    }
    true
}

fn node_cost(op: Opcode) -> u32 {
    match op {
        Opcode::Mul => 3,
        Opcode::Div | Opcode::Mod => 10,
        Opcode::Call | Opcode::Invoke => 20,
        _ => 1,
    }
}

fn find_candidates(module: &Module, tbaa: &TbaaResult) -> Vec<HoistCandidate> {
    let mut candidates = Vec::new();

    for &func in module.functions() {
        if module.node(func).op != Opcode::Function {
            continue;
        }
        let Some(func_region) = module.function_region(func) else {
            continue;
        };
        for region in module.dominated_regions(func_region) {
            if !is_loop_region(module, region) {
                continue;
            }
            let Some(target) = module.region(region).parent() else {
                continue;
            };
            let depth = loop_depth(module, region);
            let multiplier = 1u32 << depth.min(16);

            // First round: already-invariant expressions.
            let mut round_one: HashSet<NodeId> = HashSet::new();
            for &node in module.region(region).nodes() {
                if !is_hoistable_expression(module, node)
                    || !operands_available(module, node, region)
                {
                    continue;
                }
                if module.node(node).op.is_load()
                    && !safe_to_hoist_load(module, node, region, target, tbaa)
                {
                    continue;
                }
                round_one.insert(node);
                candidates.push(HoistCandidate {
                    node,
                    loop_region: region,
                    target,
                    benefit: node_cost(module.node(node).op) * multiplier,
                });
            }

            // Second local round: expressions that become invariant once
            // the first round has moved their operands out.
            for &node in module.region(region).nodes() {
                if round_one.contains(&node) || !is_hoistable_expression(module, node) {
                    continue;
                }
                let dependent_ok = module.node(node).inputs.iter().all(|&input| {
                    let op = module.node(input).op;
                    if matches!(op, Opcode::Lit | Opcode::Param) || round_one.contains(&input) {
                        return true;
                    }
                    match module.node(input).parent {
                        Some(r) => !module.dominates(region, r),
                        None => false,
                    }
                });
                if !dependent_ok {
                    continue;
                }
                if module.node(node).op.is_load()
                    && !safe_to_hoist_load(module, node, region, target, tbaa)
                {
                    continue;
                }
                candidates.push(HoistCandidate {
                    node,
                    loop_region: region,
                    target,
                    benefit: node_cost(module.node(node).op) * multiplier,
                });
            }
        }
    }

    candidates
}

/// Move the node into the target region, in front of its terminator.
fn hoist_expression(module: &mut Module, candidate: &HoistCandidate) -> bool {
    if module.node(candidate.node).parent != Some(candidate.loop_region) {
        return false;
    }

    let terminator = module
        .region(candidate.target)
        .nodes()
        .last()
        .copied()
        .filter(|&last| module.node(last).op.is_terminator());

    match terminator {
        Some(term) => module.insert_before(candidate.target, term, candidate.node),
        None => module.append(candidate.target, candidate.node),
    }
    module.node(candidate.node).parent == Some(candidate.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tbaa::TbaaPass;
    use crate::manager::{ExecutionPolicy, PassManager};
    use arc_ir::{verify_module, Builder, DataType};

    fn pipeline() -> PassManager {
        let mut pm = PassManager::new(ExecutionPolicy::Sequential);
        pm.add_analysis(TbaaPass);
        pm.add_transform(HoistExprPass);
        pm
    }

    /// Build a function with a loop region jumping back to itself and an
    /// invariant multiply inside the loop body.
    fn build_loop_module() -> (Module, RegionId, RegionId, NodeId) {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("f", DataType::Int32)
            .param("a", DataType::Int32)
            .param("b", DataType::Int32)
            .build()
            .unwrap();

        let loop_blk = b.block("loop");
        b.set_insertion_point(loop_blk.region);
        let invariant = b.mul(f.params[0], f.params[1]).unwrap();
        let _use = b.add(invariant, f.params[0]).unwrap();
        // Back edge: the loop jumps to its own entry.
        b.jump(loop_blk.entry).unwrap();

        (m, f.region, loop_blk.region, invariant)
    }

    #[test]
    fn loop_detection_sees_back_edge() {
        let (m, _func_region, loop_region, _) = build_loop_module();
        assert!(is_loop_region(&m, loop_region));
    }

    #[test]
    fn invariant_multiply_moves_to_parent() {
        let (mut m, func_region, loop_region, invariant) = build_loop_module();
        pipeline().run(&mut m).unwrap();

        assert_eq!(m.node(invariant).parent, Some(func_region));
        assert!(!m.region(loop_region).nodes().contains(&invariant));
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn dependent_invariant_chain_moves_in_one_run() {
        let (mut m, func_region, loop_region, invariant) = build_loop_module();
        // Add a second computation depending only on the first invariant.
        let dependent = {
            let mut b = Builder::new(&mut m);
            b.set_insertion_point(loop_region);
            let entry = b.module().entry_of(loop_region).unwrap();
            let dep = b.module().new_node(Opcode::Mul, DataType::Int32);
            b.module().insert_after(loop_region, entry, dep);
            let module = b.module();
            module.connect_inputs(dep, &[invariant, invariant]);
            dep
        };

        pipeline().run(&mut m).unwrap();

        assert_eq!(m.node(invariant).parent, Some(func_region));
        assert_eq!(m.node(dependent).parent, Some(func_region));
    }

    #[test]
    fn store_in_loop_blocks_load_hoist() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let count = b.lit(1u32);
        let slot = b.alloc(DataType::Int32, count).unwrap();

        let loop_blk = b.block("loop");
        b.set_insertion_point(loop_blk.region);
        let loaded = b.load(slot).unwrap();
        let one = b.lit(1i32);
        let bumped = b.add(loaded, one).unwrap();
        b.store(bumped, slot).unwrap();
        b.jump(loop_blk.entry).unwrap();

        pipeline().run(&mut m).unwrap();

        // The load reads storage the loop itself writes; it must stay.
        assert_eq!(m.node(loaded).parent, Some(loop_blk.region));
    }

    #[test]
    fn deeper_loops_rank_higher() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("f", DataType::Int32)
            .param("a", DataType::Int32)
            .build()
            .unwrap();

        let outer = b.block("outer");
        b.set_insertion_point(outer.region);
        let inner = b.block("inner");
        b.set_insertion_point(inner.region);
        let invariant = b.mul(f.params[0], f.params[0]).unwrap();
        b.jump(inner.entry).unwrap();
        b.set_insertion_point(outer.region);
        b.jump(outer.entry).unwrap();

        let depth = loop_depth(&m, inner.region);
        assert_eq!(depth, 2);

        pipeline().run(&mut m).unwrap();
        // The inner invariant lands in the outer loop region.
        assert_eq!(m.node(invariant).parent, Some(outer.region));
    }
}
