//! Scalar replacement of aggregates.
//!
//! Splits non-escaping struct allocations into one scalar allocation per
//! field. Fields whose address leaves the function stay behind in a
//! reduced struct type registered under a fresh `__sroa_reduced_N` name.

use std::collections::HashSet;

use arc_ir::{DataType, Module, NodeId, Opcode, RegionId, StructData, TypedData};
use tracing::debug;

use crate::analysis::tbaa::TbaaResult;
use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{NamedResult, Pass, TransformPass};

/// One load or store reached through an ACCESS of the allocation.
struct FieldAccess {
    /// The downstream load/store node.
    access_node: NodeId,
    /// Logical field index it touches.
    field_index: usize,
    /// The ACCESS node between allocation and use.
    intermediate: NodeId,
    is_store: bool,
}

/// Everything known about one candidate allocation.
struct AllocationInfo {
    alloc: NodeId,
    field_accesses: Vec<FieldAccess>,
    escaped_fields: HashSet<usize>,
    scalar_allocs: Vec<Option<NodeId>>,
    fully_promotable: bool,
}

/// Scalar-replacement-of-aggregates pass.
#[derive(Default)]
pub struct SroaPass;

impl Pass for SroaPass {
    fn name(&self) -> &'static str {
        "scalar-replacement-of-aggregates"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![TbaaResult::NAME]
    }

    // Removing an allocation does not change the aliasing of the
    // accesses that survive.
}

impl TransformPass for SroaPass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let tbaa = pm.get::<TbaaResult>()?;
        let mut modified: HashSet<RegionId> = HashSet::new();
        let mut reduced_counter = 0usize;

        let functions: Vec<NodeId> = module.functions().to_vec();
        for func in functions {
            if module.node(func).op != Opcode::Function {
                continue;
            }
            let Some(region) = module.function_region(func) else {
                continue;
            };
            process_function(module, region, &tbaa, &mut modified, &mut reduced_counter);
        }

        let mut out: Vec<RegionId> = modified.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

fn process_function(
    module: &mut Module,
    func_region: RegionId,
    tbaa: &TbaaResult,
    modified: &mut HashSet<RegionId>,
    reduced_counter: &mut usize,
) {
    let candidates = analyze_candidates(module, func_region, tbaa);
    for mut info in candidates {
        if transform_allocation(module, &mut info, reduced_counter) {
            if let Some(region) = module.node(info.alloc).parent {
                modified.insert(region);
            }
            for scalar in info.scalar_allocs.iter().flatten() {
                if let Some(region) = module.node(*scalar).parent {
                    modified.insert(region);
                }
            }
            for access in &info.field_accesses {
                if let Some(region) = module.node(access.access_node).parent {
                    modified.insert(region);
                }
            }
        }
    }
}

fn is_candidate(module: &Module, alloc: NodeId, tbaa: &TbaaResult) -> bool {
    let node = module.node(alloc);
    node.op == Opcode::Alloc
        && node.ty == DataType::Struct
        && tbaa.is_allocation_site(alloc)
        && !tbaa.has_escaped(alloc)
        && !node.is_volatile()
}

fn extract_field_index(module: &Module, access: NodeId) -> Option<usize> {
    let node = module.node(access);
    if node.op != Opcode::Access {
        return None;
    }
    let &index_node = node.inputs.get(1)?;
    if module.node(index_node).op != Opcode::Lit {
        return None;
    }
    let value = module.node(index_node).value.int_value()?;
    usize::try_from(value).ok()
}

fn analyze_candidates(
    module: &Module,
    func_region: RegionId,
    tbaa: &TbaaResult,
) -> Vec<AllocationInfo> {
    let mut candidates = Vec::new();
    for region in module.dominated_regions(func_region) {
        for &node in module.region(region).nodes() {
            if !is_candidate(module, node, tbaa) {
                continue;
            }
            let mut info = AllocationInfo {
                alloc: node,
                field_accesses: Vec::new(),
                escaped_fields: HashSet::new(),
                scalar_allocs: Vec::new(),
                fully_promotable: true,
            };
            collect_field_accesses(module, &mut info);
            if analyze_struct_uses(module, &mut info) {
                candidates.push(info);
            }
        }
    }
    candidates
}

fn collect_field_accesses(module: &Module, info: &mut AllocationInfo) {
    // Address-taken allocations keep every field in memory.
    for &user in module.node(info.alloc).users.iter() {
        if module.node(user).op == Opcode::AddrOf {
            info.fully_promotable = false;
            if let Ok(count) = module.logical_field_count(info.alloc) {
                info.escaped_fields.extend(0..count);
            }
            return;
        }
    }

    let users: Vec<NodeId> = module.node(info.alloc).users.to_vec();
    for user in users {
        if module.node(user).op != Opcode::Access {
            continue;
        }
        let Some(field_index) = extract_field_index(module, user) else {
            info.fully_promotable = false;
            return;
        };

        for &access_user in module.node(user).users.iter() {
            let op = module.node(access_user).op;
            if matches!(op, Opcode::Load | Opcode::PtrLoad) {
                info.field_accesses.push(FieldAccess {
                    access_node: access_user,
                    field_index,
                    intermediate: user,
                    is_store: false,
                });
            } else if matches!(op, Opcode::Store | Opcode::PtrStore) {
                info.field_accesses.push(FieldAccess {
                    access_node: access_user,
                    field_index,
                    intermediate: user,
                    is_store: true,
                });
            } else {
                info.escaped_fields.insert(field_index);
                info.fully_promotable = false;
            }
        }
    }
}

/// Mark fields that escape through calls, returns or address-taking;
/// decide whether any promotion is worthwhile.
fn analyze_struct_uses(module: &Module, info: &mut AllocationInfo) -> bool {
    let Ok(logical_count) = module.logical_field_count(info.alloc) else {
        return false;
    };

    let users: Vec<NodeId> = module.node(info.alloc).users.to_vec();
    for user in users {
        if module.node(user).op != Opcode::Access {
            continue;
        }
        let Some(field_index) = extract_field_index(module, user) else {
            continue;
        };
        if field_index >= logical_count {
            continue;
        }
        for &access_user in module.node(user).users.iter() {
            if matches!(
                module.node(access_user).op,
                Opcode::Call | Opcode::Invoke | Opcode::Ret | Opcode::AddrOf
            ) {
                info.escaped_fields.insert(field_index);
                info.fully_promotable = false;
            }
        }
    }

    if !info.fully_promotable {
        return logical_count > info.escaped_fields.len();
    }
    true
}

fn transform_allocation(
    module: &mut Module,
    info: &mut AllocationInfo,
    reduced_counter: &mut usize,
) -> bool {
    if info.fully_promotable {
        make_scalar_allocations(module, info);
        replace_field_accesses(module, info);
        module.erase_node(info.alloc);
        debug!(fields = info.scalar_allocs.len(), "sroa full promotion");
        return true;
    }

    if info.escaped_fields.is_empty() {
        return false;
    }
    let Ok(logical_count) = module.logical_field_count(info.alloc) else {
        return false;
    };
    if info.escaped_fields.len() >= logical_count {
        return false;
    }

    // Partial promotion: shrink the allocation to the escaped fields and
    // promote the rest.
    let reduced = make_reduced_struct(module, info, reduced_counter);
    let reduced_name = match &reduced {
        TypedData::Struct(s) => module.strings().get(s.name).to_owned(),
        _ => return false,
    };
    module.register_type(&reduced_name, reduced.clone());
    module.node_mut(info.alloc).value = reduced;
    module.node_mut(info.alloc).ty = DataType::Struct;

    make_scalar_allocations(module, info);
    replace_field_accesses(module, info);
    debug!(
        escaped = info.escaped_fields.len(),
        "sroa partial promotion"
    );
    true
}

/// Create one scalar allocation per promotable field, inserted after the
/// original allocation in its region.
fn make_scalar_allocations(module: &mut Module, info: &mut AllocationInfo) {
    let Some(region) = module.node(info.alloc).parent else {
        return;
    };
    let fields: Vec<(arc_ir::StrId, DataType)> = match module.node(info.alloc).value.as_struct() {
        Ok(data) => data.fields.iter().map(|f| (f.name, f.ty)).collect(),
        Err(_) => return,
    };

    let mut insert_point = info.alloc;
    let mut logical = 0usize;
    for (name, ty) in fields {
        if module.is_pad_field(name) {
            continue;
        }
        if logical >= info.scalar_allocs.len() {
            info.scalar_allocs.resize(logical + 1, None);
        }
        if info.escaped_fields.contains(&logical) {
            logical += 1;
            continue;
        }

        let scalar = module.new_node(Opcode::Alloc, ty);
        module.node_mut(scalar).value = TypedData::default_for(ty);
        module.insert_after(region, insert_point, scalar);
        info.scalar_allocs[logical] = Some(scalar);
        insert_point = scalar;
        logical += 1;
    }
}

/// Redirect each load/store's memory operand from the ACCESS node to the
/// field's scalar allocation, then drop dead ACCESS nodes.
fn replace_field_accesses(module: &mut Module, info: &AllocationInfo) {
    let mut dead_accesses: HashSet<NodeId> = HashSet::new();

    for access in &info.field_accesses {
        if info.escaped_fields.contains(&access.field_index) {
            continue;
        }
        let Some(&Some(scalar)) = info.scalar_allocs.get(access.field_index) else {
            continue;
        };

        let operand_index = if access.is_store { 1 } else { 0 };
        let current = module
            .node(access.access_node)
            .inputs
            .get(operand_index)
            .copied();
        if let Some(old) = current {
            module.replace_input(access.access_node, old, scalar);
        }
        dead_accesses.insert(access.intermediate);
    }

    for access in dead_accesses {
        if module.node(access).users.is_empty() {
            module.erase_node(access);
        }
    }
}

/// Build the reduced struct type: escaped fields plus original padding,
/// registered under a fresh interned name.
fn make_reduced_struct(
    module: &mut Module,
    info: &AllocationInfo,
    reduced_counter: &mut usize,
) -> TypedData {
    let original = match module.node(info.alloc).value.as_struct() {
        Ok(s) => s.clone(),
        Err(_) => {
            return TypedData::Void;
        }
    };

    let mut reduced_fields = Vec::new();
    let mut logical = 0usize;
    for field in &original.fields {
        if module.is_pad_field(field.name) {
            reduced_fields.push(field.clone());
            continue;
        }
        if info.escaped_fields.contains(&logical) {
            reduced_fields.push(field.clone());
        }
        logical += 1;
    }

    let reduced_name = format!("__sroa_reduced_{}", *reduced_counter);
    *reduced_counter += 1;
    let name = module.intern(&reduced_name);

    TypedData::Struct(StructData {
        fields: reduced_fields,
        alignment: original.alignment,
        name,
    })
}
