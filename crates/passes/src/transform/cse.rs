//! Common-subexpression elimination by hash-based value numbering.
//!
//! Each eligible node gets a 64-bit value number from its opcode, result
//! type and operand value numbers. A later node hashing to the number of
//! an earlier one is replaced by it; loads additionally consult TBAA so
//! a load is never folded into one it may not alias.

use std::collections::HashMap;

use arc_ir::{Module, NodeId, Opcode, RegionId, TypedData};
use tracing::debug;

use crate::analysis::tbaa::{AliasKind, TbaaResult};
use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{NamedResult, Pass, TransformPass};

type ValueNumber = u64;

fn hash_combine(seed: ValueNumber, value: ValueNumber) -> ValueNumber {
    // FNV-style mixing; any nonzero collision-resistant combiner works.
    seed.wrapping_mul(0x100000001b3).wrapping_add(value) ^ value.rotate_left(17)
}

/// Common-subexpression elimination pass.
#[derive(Default)]
pub struct CsePass;

impl Pass for CsePass {
    fn name(&self) -> &'static str {
        "common-subexpression-elimination"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![TbaaResult::NAME]
    }
}

impl TransformPass for CsePass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let tbaa = pm.get::<TbaaResult>()?;
        let mut state = CseState::default();

        let mut eliminated_in: Vec<RegionId> = Vec::new();
        // Module-scope constants first, then each function body.
        let mut roots = vec![module.root()];
        let functions: Vec<NodeId> = module.functions().to_vec();
        for func in functions {
            if module.node(func).op != Opcode::Function {
                continue;
            }
            if let Some(region) = module.function_region(func) {
                roots.push(region);
            }
        }

        for root in roots {
            for region in module.dominated_regions(root) {
                if state.process_region(module, region, &tbaa) > 0 {
                    eliminated_in.push(region);
                }
            }
        }

        if !eliminated_in.is_empty() {
            debug!(regions = eliminated_in.len(), "cse eliminated expressions");
        }
        eliminated_in.sort();
        eliminated_in.dedup();
        Ok(eliminated_in)
    }
}

#[derive(Default)]
struct CseState {
    value_numbers: HashMap<NodeId, ValueNumber>,
    expression_to_node: HashMap<ValueNumber, NodeId>,
    next_opaque: ValueNumber,
}

impl CseState {
    fn process_region(&mut self, module: &mut Module, region: RegionId, tbaa: &TbaaResult) -> usize {
        let mut eliminated = 0usize;
        let nodes: Vec<NodeId> = module.region(region).nodes().to_vec();
        for node in nodes {
            if !is_eligible(module, node) {
                continue;
            }
            let Some(vn) = self.compute_value_number(module, node, tbaa) else {
                continue;
            };

            if let Some(&existing) = self.expression_to_node.get(&vn) {
                if existing != node {
                    // A load may only collapse into one it provably aliases.
                    let both_loads =
                        module.node(node).op.is_load() && module.node(existing).op.is_load();
                    if both_loads && tbaa.alias(module, existing, node) == AliasKind::NoAlias {
                        continue;
                    }
                    if replace_all_uses_checked(module, node, existing) {
                        module.erase_node(node);
                        eliminated += 1;
                        continue;
                    }
                }
            }
            self.expression_to_node.insert(vn, node);
            self.value_numbers.insert(node, vn);
        }
        eliminated
    }

    fn compute_value_number(
        &mut self,
        module: &Module,
        node: NodeId,
        tbaa: &TbaaResult,
    ) -> Option<ValueNumber> {
        if let Some(&vn) = self.value_numbers.get(&node) {
            return Some(vn);
        }

        let vn = match module.node(node).op {
            Opcode::Lit => self.literal_value_number(module, node)?,
            op if op.is_load() => self.load_value_number(module, node, tbaa)?,
            _ if !module.node(node).inputs.is_empty() => {
                self.expression_value_number(module, node)?
            }
            // Input-free nodes (parameters) are opaque but stable.
            _ => self.opaque_number(),
        };

        let vn = if vn == 0 { 1 } else { vn };
        self.value_numbers.insert(node, vn);
        Some(vn)
    }

    fn opaque_number(&mut self) -> ValueNumber {
        self.next_opaque += 1;
        hash_combine(0x9e3779b97f4a7c15, self.next_opaque)
    }

    /// Number an operand on demand. Literals hash structurally;
    /// identity-bearing producers (allocations, calls, parameters) get a
    /// stable opaque number; everything else must already be numbered.
    fn operand_number(&mut self, module: &Module, node: NodeId) -> Option<ValueNumber> {
        if let Some(&vn) = self.value_numbers.get(&node) {
            return Some(vn);
        }
        let op = module.node(node).op;
        if op == Opcode::Lit {
            let vn = self.literal_value_number(module, node)?;
            let vn = if vn == 0 { 1 } else { vn };
            self.value_numbers.insert(node, vn);
            return Some(vn);
        }
        if op.has_side_effects() || op == Opcode::Param || op == Opcode::From {
            let vn = self.opaque_number();
            self.value_numbers.insert(node, vn);
            return Some(vn);
        }
        None
    }

    /// Literals hash by (type, bit pattern); vector builds include the
    /// lane hashes so distinct element lists stay distinct.
    fn literal_value_number(&mut self, module: &Module, node: NodeId) -> Option<ValueNumber> {
        let n = module.node(node);
        let mut hash = n.ty as u8 as ValueNumber;
        match &n.value {
            TypedData::Vector(vec_data) => {
                hash = hash_combine(hash, vec_data.elem_type as u8 as ValueNumber);
                hash = hash_combine(hash, vec_data.lane_count as ValueNumber);
                if n.op == Opcode::VectorBuild {
                    for &element in n.inputs.iter() {
                        if module.node(element).op != Opcode::Lit {
                            return None;
                        }
                        let elem_vn = self.literal_value_number(module, element)?;
                        hash = hash_combine(hash, elem_vn);
                    }
                }
            }
            other => {
                hash = hash_combine(hash, other.bit_pattern()?);
            }
        }
        Some(hash)
    }

    fn expression_value_number(&mut self, module: &Module, node: NodeId) -> Option<ValueNumber> {
        let op = module.node(node).op;
        let ty = module.node(node).ty;
        let inputs: Vec<NodeId> = module.node(node).inputs.to_vec();

        let mut hash = opcode_hash(op);
        hash = hash_combine(hash, ty as u8 as ValueNumber);

        let mut input_vns = Vec::with_capacity(inputs.len());
        for input in inputs {
            let vn = self.operand_number(module, input)?;
            input_vns.push(vn);
        }

        if op.is_commutative() && input_vns.len() == 2 && input_vns[0] > input_vns[1] {
            input_vns.swap(0, 1);
        }

        for vn in input_vns {
            hash = hash_combine(hash, vn);
        }
        Some(hash)
    }

    /// A load's number folds in its address number and, when known, its
    /// memory location.
    fn load_value_number(
        &mut self,
        module: &Module,
        node: NodeId,
        tbaa: &TbaaResult,
    ) -> Option<ValueNumber> {
        let op = module.node(node).op;
        let ty = module.node(node).ty;
        let &address = module.node(node).inputs.first()?;
        let addr_vn = self.operand_number(module, address)?;

        let mut hash = opcode_hash(op);
        hash = hash_combine(hash, ty as u8 as ValueNumber);
        hash = hash_combine(hash, addr_vn);

        if let Some(loc) = tbaa.memory_location(node) {
            hash = hash_combine(hash, loc.site.index() as ValueNumber);
            if let Some(offset) = loc.offset {
                hash = hash_combine(hash, offset as ValueNumber);
            }
            hash = hash_combine(hash, loc.size);
            hash = hash_combine(hash, loc.access_type as u8 as ValueNumber);
        }

        // Atomic loads fold their ordering literal into the number.
        if op == Opcode::AtomicLoad {
            let &ordering = module.node(node).inputs.get(1)?;
            if module.node(ordering).op != Opcode::Lit {
                return None;
            }
            let ord_vn = self.literal_value_number(module, ordering)?;
            hash = hash_combine(hash, ord_vn);
        }
        Some(hash)
    }
}

fn opcode_hash(op: Opcode) -> ValueNumber {
    // Discriminant-stable enough within one run; value numbers never
    // cross module instances.
    op as u8 as ValueNumber
}

fn is_eligible(module: &Module, node: NodeId) -> bool {
    let n = module.node(node);
    if n.is_volatile() {
        return false;
    }
    match n.op {
        // Side effects or special semantics.
        Opcode::Entry
        | Opcode::Exit
        | Opcode::Function
        | Opcode::Ret
        | Opcode::Call
        | Opcode::Invoke
        | Opcode::Store
        | Opcode::PtrStore
        | Opcode::AtomicStore
        | Opcode::AtomicCas
        | Opcode::Alloc
        | Opcode::Branch
        | Opcode::Jump
        | Opcode::From
        | Opcode::Select => false,
        _ => true,
    }
}

fn replace_all_uses_checked(module: &mut Module, node: NodeId, replacement: NodeId) -> bool {
    if node == replacement || module.node(node).op == Opcode::Entry {
        return false;
    }
    module.replace_all_uses(node, replacement);
    true
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
        pm.add_transform(CsePass);
        pm
    }

    #[test]
    fn duplicate_adds_collapse() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("f", DataType::Int32)
            .param("a", DataType::Int32)
            .param("b", DataType::Int32)
            .build()
            .unwrap();
        let add1 = b.add(f.params[0], f.params[1]).unwrap();
        let add2 = b.add(f.params[0], f.params[1]).unwrap();
        let product = b.mul(add1, add2).unwrap();
        b.ret(Some(product));

        pipeline().run(&mut m).unwrap();

        // Both multiplication inputs are now the same node.
        let inputs = m.node(product).inputs.clone();
        assert_eq!(inputs[0], inputs[1]);
        assert_eq!(inputs[0], add1);
        assert!(m.node(add2).parent.is_none());
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn commutative_operands_share_a_number() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("f", DataType::Int32)
            .param("a", DataType::Int32)
            .param("b", DataType::Int32)
            .build()
            .unwrap();
        let ab = b.add(f.params[0], f.params[1]).unwrap();
        let ba = b.add(f.params[1], f.params[0]).unwrap();
        let sum = b.add(ab, ba).unwrap();
        b.ret(Some(sum));

        pipeline().run(&mut m).unwrap();

        let inputs = m.node(sum).inputs.clone();
        assert_eq!(inputs[0], inputs[1]);
    }

    #[test]
    fn distinct_float_zero_literals_stay() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Float32).build().unwrap();
        let pos = b.lit(0.0f32);
        let neg = b.lit(-0.0f32);
        let sum = b.add(pos, neg).unwrap();
        b.ret(Some(sum));

        pipeline().run(&mut m).unwrap();

        // +0.0 and -0.0 hash by bit pattern and must not merge.
        let inputs = m.node(sum).inputs.clone();
        assert_ne!(inputs[0], inputs[1]);
    }

    #[test]
    fn volatile_nodes_are_skipped() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let one_a = b.lit(1i32);
        let one_b = b.lit(1i32);
        b.module().node_mut(one_b).traits |= arc_ir::NodeTraits::VOLATILE;
        let sum = b.add(one_a, one_b).unwrap();
        b.ret(Some(sum));

        pipeline().run(&mut m).unwrap();

        let inputs = m.node(sum).inputs.clone();
        assert_ne!(inputs[0], inputs[1]);
    }

    #[test]
    fn second_run_is_a_fixed_point() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("f", DataType::Int32)
            .param("a", DataType::Int32)
            .param("b", DataType::Int32)
            .build()
            .unwrap();
        let add1 = b.add(f.params[0], f.params[1]).unwrap();
        let add2 = b.add(f.params[0], f.params[1]).unwrap();
        let product = b.mul(add1, add2).unwrap();
        b.ret(Some(product));

        pipeline().run(&mut m).unwrap();
        let snapshot: Vec<NodeId> = m.region(f.region).nodes().to_vec();

        // A fresh manager reruns TBAA and CSE over the already-clean IR.
        pipeline().run(&mut m).unwrap();
        assert_eq!(m.region(f.region).nodes(), snapshot.as_slice());
    }

    #[test]
    fn loads_from_same_location_merge() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let count = b.lit(1u32);
        let slot = b.alloc(DataType::Int32, count).unwrap();
        let v = b.lit(9i32);
        b.store(v, slot).unwrap();
        let load1 = b.load(slot).unwrap();
        let load2 = b.load(slot).unwrap();
        let sum = b.add(load1, load2).unwrap();
        b.ret(Some(sum));

        pipeline().run(&mut m).unwrap();

        let inputs = m.node(sum).inputs.clone();
        assert_eq!(inputs[0], inputs[1]);
    }
}
