//! Lowering of aggregate ACCESS nodes to pointer arithmetic.
//!
//! Runs before instruction selection: every `ACCESS container, index`
//! becomes an explicit address computation. Pointer containers skip the
//! ADDR_OF; struct offsets come from the field layout (padding included
//! in the offset, excluded from the index); dynamic array indices get a
//! MUL by the element size. The resulting PTR_ADD takes the ACCESS
//! node's place and inherits its users. No ACCESS survives this pass.

use arc_ir::{DataType, Module, NodeId, Opcode, PointerData, PtrQualifier, RegionId, TypedData};
use arc_passes::{PassError, PassManager, TransformPass};
use tracing::debug;

use arc_passes::Pass;

/// ACCESS-to-pointer-arithmetic lowering pass.
#[derive(Default)]
pub struct LowerAccessPass;

impl Pass for LowerAccessPass {
    fn name(&self) -> &'static str {
        "ir-lowering"
    }

    fn invalidates(&self) -> Vec<&'static str> {
        // Address expressions change shape under every access.
        vec!["type-based-alias-analysis"]
    }
}

impl TransformPass for LowerAccessPass {
    fn run(&self, module: &mut Module, _pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let mut modified: Vec<RegionId> = Vec::new();
        let mut lowered_count = 0usize;

        for region in module.region_ids().collect::<Vec<_>>() {
            let nodes: Vec<NodeId> = module.region(region).nodes().to_vec();
            let mut region_touched = false;
            for node in nodes {
                if module.node(node).op != Opcode::Access {
                    continue;
                }
                if lower_access(module, region, node)? {
                    region_touched = true;
                    lowered_count += 1;
                }
            }
            if region_touched {
                modified.push(region);
            }
        }

        if lowered_count > 0 {
            debug!(lowered = lowered_count, "lowered aggregate accesses");
        }
        Ok(modified)
    }
}

fn lower_access(module: &mut Module, region: RegionId, access: NodeId) -> Result<bool, PassError> {
    let inputs: Vec<NodeId> = module.node(access).inputs.to_vec();
    let (Some(&container), Some(&index_node)) = (inputs.first(), inputs.get(1)) else {
        return Ok(false);
    };

    let container_node = module.node(container);
    let container_is_pointer = container_node.op == Opcode::AddrOf
        || container_node.op == Opcode::PtrAdd
        || container_node.ty == DataType::Pointer;

    let (base, offset) = if container_is_pointer {
        // The container already is an address; index scales by the
        // accessed element's size.
        let Some(index) = literal_index(module, index_node) else {
            return Ok(false);
        };
        let elem = module.node(access).ty;
        let byte_offset = index * elem.size_bytes() as i64;
        let index_ty = module.node(index_node).ty;
        let offset = module.new_int_literal(byte_offset, index_ty);
        module.insert_before(region, access, offset);
        (container, offset)
    } else {
        let offset = match module.node(container).ty {
            DataType::Struct => {
                let Some(index) = literal_index(module, index_node) else {
                    return Ok(false);
                };
                let byte_offset = module.struct_field_offset(container, index.max(0) as usize)?;
                let index_ty = module.node(index_node).ty;
                let offset = module.new_int_literal(byte_offset as i64, index_ty);
                module.insert_before(region, access, offset);
                offset
            }
            DataType::Array => {
                let elem_size = module.node(container).value.as_array()?.elem_type.size_bytes();
                let index_ty = module.node(index_node).ty;
                if let Some(index) = literal_index(module, index_node) {
                    let offset = module.new_int_literal(index * elem_size as i64, index_ty);
                    module.insert_before(region, access, offset);
                    offset
                } else {
                    // Dynamic index: offset = index * element-size.
                    let size_lit = module.new_int_literal(elem_size as i64, index_ty);
                    module.insert_before(region, access, size_lit);
                    let mul = module.new_node(Opcode::Mul, index_ty);
                    module.insert_before(region, access, mul);
                    module.connect_inputs(mul, &[index_node, size_lit]);
                    mul
                }
            }
            _ => return Ok(false),
        };
        let base = make_addr_of(module, region, container, access);
        (base, offset)
    };

    // The PTR_ADD replaces the ACCESS in place and inherits its users.
    let ptr_add = module.new_node(Opcode::PtrAdd, DataType::Pointer);
    let base_value = module.node(base).value.clone();
    module.node_mut(ptr_add).value = match base_value {
        TypedData::Pointer(p) => TypedData::Pointer(p),
        _ => TypedData::Pointer(PointerData {
            pointee: Some(container),
            addr_space: 0,
            qualifier: PtrQualifier::empty(),
        }),
    };

    module.replace_in_region(region, access, ptr_add, true);
    // replace_in_region moved the old inputs over; rebuild them as
    // (base, offset) instead.
    module.drop_edges(ptr_add);
    module.connect_inputs(ptr_add, &[base, offset]);
    module.drop_edges(access);
    Ok(true)
}

fn literal_index(module: &Module, index_node: NodeId) -> Option<i64> {
    (module.node(index_node).op == Opcode::Lit)
        .then(|| module.node(index_node).value.int_value())
        .flatten()
}

fn make_addr_of(
    module: &mut Module,
    region: RegionId,
    container: NodeId,
    before: NodeId,
) -> NodeId {
    let addr = module.new_node(Opcode::AddrOf, DataType::Pointer);
    module.node_mut(addr).value = TypedData::Pointer(PointerData {
        pointee: Some(container),
        addr_space: 0,
        qualifier: PtrQualifier::empty(),
    });
    module.insert_before(region, before, addr);
    module.connect_inputs(addr, &[container]);
    addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_passes::{ExecutionPolicy, PassManager};
    use arc_ir::{verify_module, Builder};

    fn run_lowering(module: &mut Module) {
        let mut pm = PassManager::new(ExecutionPolicy::Sequential);
        pm.add_transform(LowerAccessPass);
        pm.run(module).unwrap();
    }

    fn access_count(module: &Module) -> usize {
        module
            .region_ids()
            .flat_map(|r| module.region(r).nodes().to_vec())
            .filter(|&n| module.node(n).op == Opcode::Access)
            .count()
    }

    #[test]
    fn struct_access_becomes_addr_of_plus_ptr_add() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("f", DataType::Float32).build().unwrap();
        let ty = b
            .struct_type("pair")
            .field("x", DataType::Int32)
            .field("y", DataType::Float32)
            .build(8);
        let alloc = b.alloc_struct(&ty).unwrap();
        let y_access = b.struct_field(alloc, "y").unwrap();
        let loaded = b.load(y_access).unwrap();
        b.ret(Some(loaded));

        run_lowering(&mut m);

        assert_eq!(access_count(&m), 0);
        // The load now reads through a PTR_ADD with the field offset.
        let &addr = m.node(loaded).inputs.first().unwrap();
        assert_eq!(m.node(addr).op, Opcode::PtrAdd);
        let offset_node = m.node(addr).inputs[1];
        assert_eq!(m.node(offset_node).value.int_value(), Some(4));
        // The base is the address of the allocation.
        let base = m.node(addr).inputs[0];
        assert_eq!(m.node(base).op, Opcode::AddrOf);
        assert_eq!(m.node(base).inputs.as_slice(), &[alloc]);
        assert!(verify_module(&m).is_ok());
        let _ = f;
    }

    #[test]
    fn dynamic_array_index_synthesises_a_multiply() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("f", DataType::Int64)
            .param("i", DataType::Int64)
            .build()
            .unwrap();
        let arr = b.alloc_array(DataType::Int64, 16);
        let elem = b.array_index(arr, f.params[0]).unwrap();
        let loaded = b.load(elem).unwrap();
        b.ret(Some(loaded));

        run_lowering(&mut m);

        assert_eq!(access_count(&m), 0);
        let &addr = m.node(loaded).inputs.first().unwrap();
        assert_eq!(m.node(addr).op, Opcode::PtrAdd);
        let offset = m.node(addr).inputs[1];
        assert_eq!(m.node(offset).op, Opcode::Mul);
        // index * 8 bytes per element
        let mul_inputs = m.node(offset).inputs.clone();
        assert_eq!(mul_inputs[0], f.params[0]);
        assert_eq!(m.node(mul_inputs[1]).value.int_value(), Some(8));
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn pointer_container_skips_addr_of() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let count = b.lit(1u32);
        let pointee = b.alloc(DataType::Int32, count).unwrap();
        let f = b
            .function("f", DataType::Int32)
            .param_ptr("p", pointee, PtrQualifier::empty())
            .build()
            .unwrap();
        // Treat the pointer as an aggregate handle and index it.
        let idx = b.lit(2u64);
        let access = b.module().new_node(Opcode::Access, DataType::Int32);
        {
            let module = b.module();
            let entry = module.entry_of(f.region).unwrap();
            module.insert_after(f.region, entry, access);
            module.connect_inputs(access, &[f.params[0], idx]);
        }
        let loaded = b.ptr_load(f.params[0]).unwrap();
        b.ret(Some(loaded));

        run_lowering(&mut m);

        assert_eq!(access_count(&m), 0);
        // No ADDR_OF was synthesised for the pointer container.
        let ptr_adds: Vec<NodeId> = m
            .region(f.region)
            .nodes()
            .iter()
            .copied()
            .filter(|&n| m.node(n).op == Opcode::PtrAdd)
            .collect();
        assert_eq!(ptr_adds.len(), 1);
        assert_eq!(m.node(ptr_adds[0]).inputs[0], f.params[0]);
        // offset = 2 * sizeof(i32)
        let offset = m.node(ptr_adds[0]).inputs[1];
        assert_eq!(m.node(offset).value.int_value(), Some(8));
    }

    #[test]
    fn tbaa_is_declared_invalidated() {
        let pass = LowerAccessPass;
        assert!(pass
            .invalidates()
            .contains(&"type-based-alias-analysis"));
    }
}
