//! Worklist-driven constant folding.
//!
//! Seeds every foldable node, folds those whose operands are literals
//! and re-queues their users, so chains of constants collapse in one
//! run. Arithmetic applies numeric promotion; bitwise ops require
//! identical integer types; DIV/MOD by a literal zero is left unfolded.

use std::collections::VecDeque;

use arc_ir::{DataType, Module, NodeId, Opcode, RegionId, TypedData};
use tracing::debug;

use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{Pass, TransformPass};

/// Constant folding pass.
#[derive(Default)]
pub struct ConstFoldPass;

impl Pass for ConstFoldPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }
}

impl TransformPass for ConstFoldPass {
    fn run(&self, module: &mut Module, _pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let mut worklist: VecDeque<NodeId> = VecDeque::new();
        for region in module.region_ids() {
            for &node in module.region(region).nodes() {
                if is_foldable_op(module.node(node).op) {
                    worklist.push_back(node);
                }
            }
        }

        let mut modified: Vec<RegionId> = Vec::new();
        let mut folded_count = 0usize;
        while let Some(node) = worklist.pop_front() {
            // The node may have been folded away since it was queued.
            let Some(region) = module.node(node).parent else {
                continue;
            };
            if module.node(node).is_volatile() {
                continue;
            }

            let users: Vec<NodeId> = module.node(node).users.to_vec();
            if try_fold(module, node) {
                folded_count += 1;
                modified.push(region);
                for user in users {
                    if is_foldable_op(module.node(user).op) {
                        worklist.push_back(user);
                    }
                }
            }
        }

        if folded_count > 0 {
            debug!(folded = folded_count, "constant folding collapsed nodes");
        }
        modified.sort();
        modified.dedup();
        Ok(modified)
    }
}

fn is_foldable_op(op: Opcode) -> bool {
    op.is_binary_arith()
        || op.is_comparison()
        || op.is_bitwise_binary()
        || matches!(
            op,
            Opcode::Bnot | Opcode::Cast | Opcode::From | Opcode::Branch | Opcode::Select
        )
}

/// A literal operand's value, widened for evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
}

fn literal_of(module: &Module, node: NodeId) -> Option<(DataType, Lit)> {
    let n = module.node(node);
    if n.op != Opcode::Lit {
        return None;
    }
    match n.value {
        TypedData::Bool(v) => Some((DataType::Bool, Lit::Bool(v))),
        TypedData::Float32(v) => Some((DataType::Float32, Lit::Float(v as f64))),
        TypedData::Float64(v) => Some((DataType::Float64, Lit::Float(v))),
        _ => n.value.int_value().map(|v| (n.ty, Lit::Int(v))),
    }
}

/// Create a literal node of `ty` holding `value`, placed before `at`.
fn emit_literal(module: &mut Module, region: RegionId, at: NodeId, ty: DataType, value: Lit) -> NodeId {
    let lit = match (ty, value) {
        (DataType::Bool, Lit::Bool(v)) => {
            let id = module.new_node(Opcode::Lit, DataType::Bool);
            module.node_mut(id).value = TypedData::Bool(v);
            id
        }
        (DataType::Float32, v) => {
            let id = module.new_node(Opcode::Lit, DataType::Float32);
            module.node_mut(id).value = TypedData::Float32(as_float(v) as f32);
            id
        }
        (DataType::Float64, v) => {
            let id = module.new_node(Opcode::Lit, DataType::Float64);
            module.node_mut(id).value = TypedData::Float64(as_float(v));
            id
        }
        (ty, v) => module.new_int_literal(as_int(v), ty),
    };
    module.insert_before(region, at, lit);
    lit
}

fn as_int(v: Lit) -> i64 {
    match v {
        Lit::Int(i) => i,
        Lit::Float(f) => f as i64,
        Lit::Bool(b) => b as i64,
    }
}

fn as_float(v: Lit) -> f64 {
    match v {
        Lit::Int(i) => i as f64,
        Lit::Float(f) => f,
        Lit::Bool(b) => b as i64 as f64,
    }
}

/// Truncate an integer result to the width and signedness of `ty`.
fn truncate_to(ty: DataType, value: i64) -> i64 {
    match ty {
        DataType::Int8 => value as i8 as i64,
        DataType::Int16 => value as i16 as i64,
        DataType::Int32 => value as i32 as i64,
        DataType::Int64 => value,
        DataType::Uint8 => value as u8 as i64,
        DataType::Uint16 => value as u16 as i64,
        DataType::Uint32 => value as u32 as i64,
        DataType::Uint64 => value,
        _ => value,
    }
}

fn try_fold(module: &mut Module, node: NodeId) -> bool {
    let op = module.node(node).op;
    match op {
        _ if op.is_binary_arith() => fold_arith(module, node),
        _ if op.is_comparison() => fold_comparison(module, node),
        _ if op.is_bitwise_binary() => fold_bitwise(module, node),
        Opcode::Bnot => fold_bnot(module, node),
        Opcode::Cast => fold_cast(module, node),
        Opcode::From => fold_from(module, node),
        Opcode::Branch => fold_branch(module, node),
        Opcode::Select => fold_select(module, node),
        _ => false,
    }
}

fn binary_literals(module: &Module, node: NodeId) -> Option<((DataType, Lit), (DataType, Lit))> {
    let n = module.node(node);
    let &lhs = n.inputs.first()?;
    let &rhs = n.inputs.get(1)?;
    Some((literal_of(module, lhs)?, literal_of(module, rhs)?))
}

fn replace_with_literal(module: &mut Module, node: NodeId, ty: DataType, value: Lit) -> bool {
    let Some(region) = module.node(node).parent else {
        return false;
    };
    let lit = emit_literal(module, region, node, ty, value);
    module.replace_all_uses(node, lit);
    module.erase_node(node);
    true
}

fn fold_arith(module: &mut Module, node: NodeId) -> bool {
    let Some(((lt, lv), (rt, rv))) = binary_literals(module, node) else {
        return false;
    };
    let Some(result_ty) = DataType::promote(lt, rt) else {
        return false;
    };
    if result_ty == DataType::Bool {
        return false;
    }
    let op = module.node(node).op;

    if result_ty.is_float() {
        let (a, b) = (as_float(lv), as_float(rv));
        let value = match op {
            Opcode::Add => a + b,
            Opcode::Sub => a - b,
            Opcode::Mul => a * b,
            Opcode::Div if b != 0.0 => a / b,
            Opcode::Mod if b != 0.0 => a % b,
            _ => return false,
        };
        return replace_with_literal(module, node, result_ty, Lit::Float(value));
    }

    let (a, b) = (as_int(lv), as_int(rv));
    let value = match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        // Division by a literal zero stays in the IR.
        Opcode::Div if b != 0 => a.wrapping_div(b),
        Opcode::Mod if b != 0 => a.wrapping_rem(b),
        _ => return false,
    };
    replace_with_literal(module, node, result_ty, Lit::Int(truncate_to(result_ty, value)))
}

fn fold_comparison(module: &mut Module, node: NodeId) -> bool {
    let Some(((lt, lv), (rt, rv))) = binary_literals(module, node) else {
        return false;
    };
    let op = module.node(node).op;

    let result = if lt.is_float() || rt.is_float() {
        let (a, b) = (as_float(lv), as_float(rv));
        match op {
            Opcode::Eq => a == b,
            Opcode::Neq => a != b,
            Opcode::Lt => a < b,
            Opcode::Lte => a <= b,
            Opcode::Gt => a > b,
            Opcode::Gte => a >= b,
            _ => return false,
        }
    } else if matches!((lv, rv), (Lit::Bool(_), Lit::Bool(_))) {
        let (a, b) = (as_int(lv), as_int(rv));
        match op {
            Opcode::Eq => a == b,
            Opcode::Neq => a != b,
            _ => return false,
        }
    } else {
        let promoted = DataType::promote(lt, rt);
        let unsigned = promoted.is_some_and(|t| t.is_integer() && !t.is_signed());
        if unsigned {
            let (a, b) = (as_int(lv) as u64, as_int(rv) as u64);
            match op {
                Opcode::Eq => a == b,
                Opcode::Neq => a != b,
                Opcode::Lt => a < b,
                Opcode::Lte => a <= b,
                Opcode::Gt => a > b,
                Opcode::Gte => a >= b,
                _ => return false,
            }
        } else {
            let (a, b) = (as_int(lv), as_int(rv));
            match op {
                Opcode::Eq => a == b,
                Opcode::Neq => a != b,
                Opcode::Lt => a < b,
                Opcode::Lte => a <= b,
                Opcode::Gt => a > b,
                Opcode::Gte => a >= b,
                _ => return false,
            }
        }
    };

    replace_with_literal(module, node, DataType::Bool, Lit::Bool(result))
}

fn fold_bitwise(module: &mut Module, node: NodeId) -> bool {
    let Some(((lt, lv), (rt, rv))) = binary_literals(module, node) else {
        return false;
    };
    // No promotion for bitwise: the types must match exactly.
    if lt != rt || !lt.is_integer() {
        return false;
    }
    let op = module.node(node).op;
    let (a, b) = (as_int(lv), as_int(rv));
    let value = match op {
        Opcode::Band => a & b,
        Opcode::Bor => a | b,
        Opcode::Bxor => a ^ b,
        Opcode::Bshl => a.wrapping_shl(b as u32),
        Opcode::Bshr => {
            if lt.is_signed() {
                a.wrapping_shr(b as u32)
            } else {
                ((a as u64).wrapping_shr(b as u32)) as i64
            }
        }
        _ => return false,
    };
    replace_with_literal(module, node, lt, Lit::Int(truncate_to(lt, value)))
}

fn fold_bnot(module: &mut Module, node: NodeId) -> bool {
    let Some(&input) = module.node(node).inputs.first() else {
        return false;
    };
    let Some((ty, value)) = literal_of(module, input) else {
        return false;
    };
    if !ty.is_integer() {
        return false;
    }
    replace_with_literal(module, node, ty, Lit::Int(truncate_to(ty, !as_int(value))))
}

/// C-style conversion of a numeric literal to the cast's target type.
fn fold_cast(module: &mut Module, node: NodeId) -> bool {
    let target = module.node(node).ty;
    let Some(&input) = module.node(node).inputs.first() else {
        return false;
    };
    let Some((source, value)) = literal_of(module, input) else {
        return false;
    };
    if !source.is_numeric() || !target.is_numeric() {
        return false;
    }

    if target.is_float() {
        return replace_with_literal(module, node, target, Lit::Float(as_float(value)));
    }
    let as_integer = match value {
        Lit::Float(f) => f as i64,
        other => as_int(other),
    };
    replace_with_literal(module, node, target, Lit::Int(truncate_to(target, as_integer)))
}

/// A FROM whose inputs are all bit-identical literals is that literal.
fn fold_from(module: &mut Module, node: NodeId) -> bool {
    let inputs: Vec<NodeId> = module.node(node).inputs.to_vec();
    if inputs.is_empty() {
        return false;
    }
    let first = module.node(inputs[0]);
    if first.op != Opcode::Lit {
        return false;
    }
    let pattern = first.value.bit_pattern();
    let ty = first.ty;
    for &input in &inputs[1..] {
        let n = module.node(input);
        if n.op != Opcode::Lit || n.ty != ty || n.value.bit_pattern() != pattern {
            return false;
        }
    }

    let canonical = inputs[0];
    module.replace_all_uses(node, canonical);
    module.erase_node(node);
    true
}

/// A BRANCH on a literal condition becomes a JUMP to the taken target.
fn fold_branch(module: &mut Module, node: NodeId) -> bool {
    let inputs: Vec<NodeId> = module.node(node).inputs.to_vec();
    if inputs.len() != 3 {
        return false;
    }
    let Some((DataType::Bool, Lit::Bool(cond))) = literal_of(module, inputs[0]) else {
        return false;
    };
    let Some(region) = module.node(node).parent else {
        return false;
    };

    let target = if cond { inputs[1] } else { inputs[2] };
    let jump = module.new_node(Opcode::Jump, DataType::Void);
    module.insert_before(region, node, jump);
    module.connect_inputs(jump, &[target]);
    module.erase_node(node);
    true
}

/// SELECT folds on a literal condition, or when both arms are the same
/// literal.
fn fold_select(module: &mut Module, node: NodeId) -> bool {
    let inputs: Vec<NodeId> = module.node(node).inputs.to_vec();
    if inputs.len() != 3 {
        return false;
    }

    if let Some((DataType::Bool, Lit::Bool(cond))) = literal_of(module, inputs[0]) {
        let chosen = if cond { inputs[1] } else { inputs[2] };
        module.replace_all_uses(node, chosen);
        module.erase_node(node);
        return true;
    }

    let (Some((t_ty, _)), Some((f_ty, _))) = (
        literal_of(module, inputs[1]),
        literal_of(module, inputs[2]),
    ) else {
        return false;
    };
    let same = t_ty == f_ty
        && module.node(inputs[1]).value.bit_pattern() == module.node(inputs[2]).value.bit_pattern();
    if !same {
        return false;
    }
    module.replace_all_uses(node, inputs[1]);
    module.erase_node(node);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ExecutionPolicy, PassManager};
    use arc_ir::{verify_module, Builder};

    fn run_fold(module: &mut Module) {
        let mut pm = PassManager::new(ExecutionPolicy::Sequential);
        pm.add_transform(ConstFoldPass);
        pm.run(module).unwrap();
    }

    #[test]
    fn arithmetic_chain_folds_to_single_literal() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let ten = b.lit(10i32);
        let twenty = b.lit(20i32);
        let fifty = b.lit(50i32);
        let fifteen = b.lit(15i32);
        let sum = b.add(ten, twenty).unwrap();
        let diff = b.sub(fifty, fifteen).unwrap();
        let product = b.mul(sum, diff).unwrap();
        let ret = b.ret(Some(product));

        run_fold(&mut m);

        let &result = m.node(ret).inputs.first().unwrap();
        assert_eq!(m.node(result).op, Opcode::Lit);
        assert_eq!(m.node(result).value.int_value(), Some(1050));
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn division_by_literal_zero_is_left_unfolded() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let ten = b.lit(10i32);
        let zero = b.lit(0i32);
        let div = b.div(ten, zero).unwrap();
        b.ret(Some(div));

        run_fold(&mut m);

        assert_eq!(m.node(div).op, Opcode::Div);
        assert!(m.node(div).parent.is_some());
    }

    #[test]
    fn comparison_folds_to_bool() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Bool).build().unwrap();
        let three = b.lit(3i32);
        let four = b.lit(4i32);
        let cmp = b.lt(three, four).unwrap();
        let ret = b.ret(Some(cmp));

        run_fold(&mut m);

        let &result = m.node(ret).inputs.first().unwrap();
        assert_eq!(m.node(result).ty, DataType::Bool);
        assert_eq!(m.node(result).value, TypedData::Bool(true));
    }

    #[test]
    fn bitwise_requires_identical_types() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let a = b.lit(0b1100i32);
        let c = b.lit(0b1010i32);
        let and = b.band(a, c).unwrap();
        let ret = b.ret(Some(and));

        run_fold(&mut m);

        let &result = m.node(ret).inputs.first().unwrap();
        assert_eq!(m.node(result).value.int_value(), Some(0b1000));
    }

    #[test]
    fn cast_applies_c_style_truncation() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int8).build().unwrap();
        let big = b.lit(300i32);
        let cast = b.cast(big, DataType::Int8).unwrap();
        let ret = b.ret(Some(cast));

        run_fold(&mut m);

        let &result = m.node(ret).inputs.first().unwrap();
        assert_eq!(m.node(result).value.int_value(), Some(300i64 as i8 as i64));
    }

    #[test]
    fn branch_on_literal_becomes_jump() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("f", DataType::Void).build().unwrap();
        let then_blk = b.block("then");
        let else_blk = b.block("else");
        b.set_insertion_point(then_blk.region);
        b.ret(None);
        b.set_insertion_point(else_blk.region);
        b.ret(None);
        b.set_insertion_point(f.region);
        let cond = b.lit(true);
        b.branch(cond, then_blk.entry, else_blk.entry).unwrap();

        run_fold(&mut m);

        let last = *m.region(f.region).nodes().last().unwrap();
        assert_eq!(m.node(last).op, Opcode::Jump);
        assert_eq!(m.node(last).inputs.as_slice(), &[then_blk.entry]);
        assert!(m.is_terminated(f.region));
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn volatile_node_is_never_folded() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let a = b.lit(1i32);
        let c = b.lit(2i32);
        let sum = b.add(a, c).unwrap();
        b.module().node_mut(sum).traits |= arc_ir::NodeTraits::VOLATILE;
        b.ret(Some(sum));

        run_fold(&mut m);

        assert_eq!(m.node(sum).op, Opcode::Add);
        assert!(m.node(sum).parent.is_some());
    }

    #[test]
    fn folding_to_fixed_point_is_idempotent() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("f", DataType::Int32).build().unwrap();
        let x = b.lit(6i32);
        let y = b.lit(7i32);
        let product = b.mul(x, y).unwrap();
        b.ret(Some(product));

        run_fold(&mut m);
        let snapshot: Vec<NodeId> = m.region(f.region).nodes().to_vec();
        run_fold(&mut m);
        assert_eq!(m.region(f.region).nodes(), snapshot.as_slice());
    }
}
