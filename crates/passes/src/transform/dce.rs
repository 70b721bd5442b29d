//! Dead code elimination.
//!
//! Worklist cleanup removing nodes with no users and no side effects;
//! picks up the residue other transforms leave behind (unused literals
//! after folding, orphaned address arithmetic after promotion).

use std::collections::HashSet;

use arc_ir::{Module, NodeId, Opcode, RegionId};
use tracing::debug;

use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{Pass, TransformPass};

/// Dead code elimination pass.
#[derive(Default)]
pub struct DcePass;

impl Pass for DcePass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }
}

fn is_removable(module: &Module, node: NodeId) -> bool {
    let n = module.node(node);
    if n.is_volatile() || !n.users.is_empty() {
        return false;
    }
    !matches!(
        n.op,
        Opcode::Entry
            | Opcode::Exit
            | Opcode::Param
            | Opcode::Function
            | Opcode::Ret
            | Opcode::Call
            | Opcode::Invoke
            | Opcode::Store
            | Opcode::PtrStore
            | Opcode::AtomicStore
            | Opcode::AtomicCas
            | Opcode::Branch
            | Opcode::Jump
    )
}

impl TransformPass for DcePass {
    fn run(&self, module: &mut Module, _pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let mut modified: HashSet<RegionId> = HashSet::new();
        let mut removed_total = 0usize;

        // Removing a node can orphan its operands, so iterate until a
        // sweep removes nothing.
        loop {
            let mut removed = 0usize;
            for region in module.region_ids().collect::<Vec<_>>() {
                let nodes: Vec<NodeId> = module.region(region).nodes().to_vec();
                for node in nodes {
                    if is_removable(module, node) {
                        module.erase_node(node);
                        modified.insert(region);
                        removed += 1;
                    }
                }
            }
            removed_total += removed;
            if removed == 0 {
                break;
            }
        }

        if removed_total > 0 {
            debug!(removed = removed_total, "dce removed dead nodes");
        }
        let mut out: Vec<RegionId> = modified.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ExecutionPolicy, PassManager};
    use arc_ir::{Builder, DataType};

    #[test]
    fn unused_chain_is_swept_transitively() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("f", DataType::Int32).build().unwrap();
        let a = b.lit(1i32);
        let c = b.lit(2i32);
        let dead = b.add(a, c).unwrap();
        let _dead2 = b.mul(dead, c).unwrap();
        let live = b.lit(3i32);
        b.ret(Some(live));

        let mut pm = PassManager::new(ExecutionPolicy::Sequential);
        pm.add_transform(DcePass);
        pm.run(&mut m).unwrap();

        let ops: Vec<Opcode> = m
            .region(f.region)
            .nodes()
            .iter()
            .map(|&n| m.node(n).op)
            .collect();
        // Both arithmetic nodes and their literals are gone; the
        // returned literal stays.
        assert!(!ops.contains(&Opcode::Add));
        assert!(!ops.contains(&Opcode::Mul));
        assert_eq!(ops.iter().filter(|&&op| op == Opcode::Lit).count(), 1);
    }

    #[test]
    fn volatile_and_effectful_nodes_stay() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("f", DataType::Void).build().unwrap();
        let count = b.lit(1u32);
        let slot = b.alloc(DataType::Int32, count).unwrap();
        let v = b.lit(1i32);
        b.store(v, slot).unwrap();
        let kept = b.lit(9i32);
        b.module().node_mut(kept).traits |= arc_ir::NodeTraits::VOLATILE;
        b.ret(None);

        let mut pm = PassManager::new(ExecutionPolicy::Sequential);
        pm.add_transform(DcePass);
        pm.run(&mut m).unwrap();

        let nodes = m.region(f.region).nodes();
        assert!(nodes.contains(&slot));
        assert!(nodes.contains(&kept));
    }
}
