//! Promotion of addressable scalars to SSA values.
//!
//! A non-escaping, non-volatile allocation whose every user is a
//! type-consistent load or store becomes a plain SSA value: loads are
//! replaced by the reaching definition, stores define it, and FROM nodes
//! merge definitions where several store regions reach a load.

use std::collections::{HashMap, HashSet};

use arc_ir::{Module, NodeId, Opcode, RegionId};
use tracing::debug;

use crate::analysis::tbaa::TbaaResult;
use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{NamedResult, Pass, TransformPass};

/// Everything known about one promotable allocation.
#[derive(Default)]
struct AllocInfo {
    alloc: Option<NodeId>,
    stores: Vec<NodeId>,
    loads: Vec<NodeId>,
    phi_nodes: HashMap<RegionId, NodeId>,
    definitions: HashMap<RegionId, NodeId>,
    promotable: bool,
}

/// Memory-to-register promotion pass.
#[derive(Default)]
pub struct Mem2RegPass;

impl Pass for Mem2RegPass {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![TbaaResult::NAME]
    }

    // TBAA stays valid: promoted allocations disappear entirely, so no
    // later pass can query their stale locations.
}

impl TransformPass for Mem2RegPass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let tbaa = pm.get::<TbaaResult>()?;
        let mut all_modified = Vec::new();

        let functions: Vec<NodeId> = module.functions().to_vec();
        for func in functions {
            if module.node(func).op != Opcode::Function {
                continue;
            }
            let Some(region) = module.function_region(func) else {
                continue;
            };
            let modified = process_function(module, region, &tbaa);
            all_modified.extend(modified);
        }

        Ok(all_modified)
    }
}

fn process_function(module: &mut Module, func_region: RegionId, tbaa: &TbaaResult) -> Vec<RegionId> {
    let mut infos = analyze_promotable_allocs(module, func_region, tbaa);
    for info in &mut infos {
        if !info.promotable {
            continue;
        }
        insert_phi_nodes(module, info);
        rename_variables(module, func_region, info);
    }
    let modified = cleanup_allocations(module, &infos);
    if !modified.is_empty() {
        debug!(
            promoted = infos.iter().filter(|i| i.promotable).count(),
            regions = modified.len(),
            "mem2reg promoted allocations"
        );
    }
    modified
}

fn is_promotable(module: &Module, alloc: NodeId, tbaa: &TbaaResult) -> bool {
    let node = module.node(alloc);
    if node.op != Opcode::Alloc {
        return false;
    }
    if tbaa.has_escaped(alloc) || !tbaa.is_allocation_site(alloc) {
        return false;
    }
    !node.is_volatile()
}

fn collect_accesses(module: &Module, alloc: NodeId, tbaa: &TbaaResult, info: &mut AllocInfo) {
    // Taking the address pins the allocation in memory.
    for &user in module.node(alloc).users.iter() {
        if module.node(user).op == Opcode::AddrOf {
            info.promotable = false;
            return;
        }
    }

    for &access in tbaa.memory_accesses() {
        let Some(loc) = tbaa.memory_location(access) else {
            continue;
        };
        if loc.site != alloc {
            continue;
        }
        let op = module.node(access).op;
        if op.is_load() {
            info.loads.push(access);
        } else if op.is_store() {
            info.stores.push(access);
        } else {
            info.promotable = false;
            return;
        }
    }
}

fn verify_type_consistency(module: &Module, info: &AllocInfo, tbaa: &TbaaResult) -> bool {
    let Some(alloc) = info.alloc else {
        return false;
    };
    let expected = module.node(alloc).ty;
    info.loads
        .iter()
        .chain(info.stores.iter())
        .all(|&access| {
            tbaa.memory_location(access)
                .is_some_and(|loc| loc.access_type == expected)
        })
}

fn analyze_promotable_allocs(
    module: &Module,
    func_region: RegionId,
    tbaa: &TbaaResult,
) -> Vec<AllocInfo> {
    let mut result = Vec::new();
    for region in module.dominated_regions(func_region) {
        for &node in module.region(region).nodes() {
            if module.node(node).op != Opcode::Alloc || !is_promotable(module, node, tbaa) {
                continue;
            }
            let mut info = AllocInfo {
                alloc: Some(node),
                promotable: true,
                ..AllocInfo::default()
            };
            collect_accesses(module, node, tbaa, &mut info);
            if info.promotable && verify_type_consistency(module, &info, tbaa) {
                result.push(info);
            }
        }
    }
    result
}

/// Load-centric phi placement: a load needs a FROM when two or more
/// store regions other than its own can reach it.
fn insert_phi_nodes(module: &mut Module, info: &mut AllocInfo) {
    let mut phi_regions: HashSet<RegionId> = HashSet::new();
    for &load in &info.loads {
        let Some(load_region) = module.node(load).parent else {
            continue;
        };
        let foreign_stores = info
            .stores
            .iter()
            .filter_map(|&s| module.node(s).parent)
            .filter(|&r| r != load_region)
            .count();
        if foreign_stores > 1 {
            phi_regions.insert(load_region);
        }
    }

    let ty = info
        .alloc
        .map(|a| module.node(a).ty)
        .unwrap_or(arc_ir::DataType::Void);
    for region in phi_regions {
        let phi = module.new_node(Opcode::From, ty);
        module.insert_at_top(region, phi);
        info.phi_nodes.insert(region, phi);
    }
}

/// Walk regions in dominance order carrying the current definition, then
/// wire phi inputs from every reaching region's final definition.
fn rename_variables(module: &mut Module, func_region: RegionId, info: &mut AllocInfo) {
    let regions = module.dominated_regions(func_region);
    for region in regions {
        let mut current_def = match info.phi_nodes.get(&region) {
            Some(&phi) => Some(phi),
            None => module
                .region(region)
                .parent()
                .and_then(|p| info.definitions.get(&p).copied()),
        };

        let nodes: Vec<NodeId> = module.region(region).nodes().to_vec();
        for node in nodes {
            let op = module.node(node).op;
            if op.is_load() && info.loads.contains(&node) {
                if let Some(def) = current_def {
                    module.replace_all_uses(node, def);
                }
            } else if op.is_store() && info.stores.contains(&node) {
                if let Some(&value) = module.node(node).inputs.first() {
                    current_def = Some(value);
                    info.definitions.insert(region, value);
                }
            }
        }

        if let Some(def) = current_def {
            info.definitions.insert(region, def);
        }
    }

    // Phi wiring happens after every region has its final definition.
    for (&phi_region, &phi) in &info.phi_nodes {
        let mut inputs: Vec<NodeId> = Vec::new();
        for (&def_region, &definition) in &info.definitions {
            if def_region == phi_region || definition == phi {
                continue;
            }
            if module.can_reach(def_region, phi_region) && !inputs.contains(&definition) {
                inputs.push(definition);
            }
        }
        inputs.sort();
        module.drop_edges(phi);
        module.connect_inputs(phi, &inputs);
    }
}

fn cleanup_allocations(module: &mut Module, infos: &[AllocInfo]) -> Vec<RegionId> {
    let mut modified: HashSet<RegionId> = HashSet::new();
    for info in infos {
        if !info.promotable {
            continue;
        }
        for &load in &info.loads {
            if let Some(region) = module.node(load).parent {
                modified.insert(region);
            }
            module.erase_node(load);
        }
        for &store in &info.stores {
            if let Some(region) = module.node(store).parent {
                modified.insert(region);
            }
            module.erase_node(store);
        }
        if let Some(alloc) = info.alloc {
            if let Some(region) = module.node(alloc).parent {
                modified.insert(region);
            }
            module.erase_node(alloc);
        }
    }
    modified.into_iter().collect()
}
