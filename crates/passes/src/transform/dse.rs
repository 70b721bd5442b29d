//! Dead-store elimination.
//!
//! Per-region forward scan in execution order: a store overwritten by a
//! MUST_ALIAS store before any intervening read becomes dead. Loads lift
//! every possibly-aliasing tracked store to live; calls lift stores to
//! escaped addresses; volatile stores are always live.

use std::collections::{HashMap, HashSet};

use arc_ir::{Module, NodeId, Opcode, RegionId};
use tracing::debug;

use crate::analysis::tbaa::{AliasKind, TbaaResult};
use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{NamedResult, Pass, TransformPass};

/// Dead-store elimination pass.
#[derive(Default)]
pub struct DsePass;

impl Pass for DsePass {
    fn name(&self) -> &'static str {
        "dead-store-elimination"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![TbaaResult::NAME]
    }
}

impl TransformPass for DsePass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let tbaa = pm.get::<TbaaResult>()?;
        let mut modified: HashSet<RegionId> = HashSet::new();

        let functions: Vec<NodeId> = module.functions().to_vec();
        for func in functions {
            if module.node(func).op != Opcode::Function {
                continue;
            }
            let Some(region) = module.function_region(func) else {
                continue;
            };
            for r in module.dominated_regions(region) {
                if process_region(module, r, &tbaa) > 0 {
                    modified.insert(r);
                }
            }
        }

        let mut out: Vec<RegionId> = modified.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

fn is_store(module: &Module, node: NodeId) -> bool {
    matches!(module.node(node).op, Opcode::Store | Opcode::PtrStore)
}

fn is_load(module: &Module, node: NodeId) -> bool {
    matches!(module.node(node).op, Opcode::Load | Opcode::PtrLoad)
}

fn store_address(module: &Module, store: NodeId) -> Option<NodeId> {
    let node = module.node(store);
    match node.op {
        Opcode::Store | Opcode::PtrStore => node.inputs.get(1).copied(),
        _ => None,
    }
}

fn process_region(module: &mut Module, region: RegionId, tbaa: &TbaaResult) -> usize {
    let mut last_store_to: HashMap<NodeId, NodeId> = HashMap::new();
    let mut potentially_dead: HashSet<NodeId> = HashSet::new();
    let mut definitely_live: HashSet<NodeId> = HashSet::new();

    let nodes: Vec<NodeId> = module.region(region).nodes().to_vec();
    for node in nodes {
        if is_store(module, node) {
            // Volatile stores have observable side effects.
            if module.node(node).is_volatile() {
                definitely_live.insert(node);
                continue;
            }
            let Some(address) = store_address(module, node) else {
                continue;
            };

            // This store overwrites any tracked MUST_ALIAS predecessor.
            let mut evicted: Vec<NodeId> = Vec::new();
            for (&other_addr, &other_store) in &last_store_to {
                if tbaa.alias(module, node, other_store) == AliasKind::MustAlias {
                    potentially_dead.insert(other_store);
                    evicted.push(other_addr);
                }
            }
            if let Some(&previous) = last_store_to.get(&address) {
                potentially_dead.insert(previous);
            }
            for addr in evicted {
                last_store_to.remove(&addr);
            }
            last_store_to.insert(address, node);
        } else if is_load(module, node) {
            // A read keeps every store it might observe.
            for (_, &store) in &last_store_to {
                if tbaa.alias(module, node, store) != AliasKind::NoAlias {
                    definitely_live.insert(store);
                    potentially_dead.remove(&store);
                }
            }
        } else if module.node(node).op.is_call() {
            // Calls may read anything that escaped.
            for (&addr, &store) in &last_store_to {
                let escaped = tbaa
                    .memory_location(store)
                    .map(|loc| tbaa.has_escaped(loc.site))
                    .unwrap_or_else(|| {
                        // Fall back to the raw address when untracked.
                        tbaa.has_escaped(addr)
                    });
                if escaped {
                    definitely_live.insert(store);
                    potentially_dead.remove(&store);
                }
            }
        }
    }

    // Remove stores that stayed dead and whose base never escaped.
    let mut removed = 0usize;
    for store in potentially_dead {
        if definitely_live.contains(&store) {
            continue;
        }
        let base_escaped = tbaa
            .memory_location(store)
            .map(|loc| tbaa.has_escaped(loc.site))
            .unwrap_or(true);
        if base_escaped {
            continue;
        }
        module.erase_node(store);
        removed += 1;
    }
    if removed > 0 {
        debug!(region = region.index(), removed, "dse removed dead stores");
    }
    removed
}
