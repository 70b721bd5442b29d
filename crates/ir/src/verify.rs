//! Structural invariant checking.
//!
//! Run after transforms in tests: confirms use-def symmetry, ENTRY
//! placement and terminator position for every node attached to a region.

use std::collections::HashSet;

use crate::module::Module;
use crate::node::{NodeId, Opcode};
use crate::region::RegionId;

/// A single invariant violation.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// `user` lists `node` as input, but `node` does not list `user` back.
    MissingUserEdge { node: NodeId, user: NodeId },
    /// `node` lists `user`, but `user` has no such input.
    DanglingUserEdge { node: NodeId, user: NodeId },
    /// Region has an ENTRY somewhere other than index 0, or more than one.
    EntryMisplaced { region: RegionId },
    /// A terminator appears before the final position of a region.
    TerminatorNotLast { region: RegionId, node: NodeId },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::MissingUserEdge { node, user } => {
                write!(f, "node {:?} used by {:?} without a user edge", node, user)
            }
            Violation::DanglingUserEdge { node, user } => {
                write!(f, "node {:?} lists user {:?} with no matching input", node, user)
            }
            Violation::EntryMisplaced { region } => {
                write!(f, "region {:?} has a misplaced or duplicate ENTRY", region)
            }
            Violation::TerminatorNotLast { region, node } => {
                write!(f, "terminator {:?} is not the last node of region {:?}", node, region)
            }
        }
    }
}

/// Check every structural invariant over nodes attached to regions.
pub fn verify_module(module: &Module) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    let mut attached: HashSet<NodeId> = HashSet::new();
    for region in module.region_ids() {
        let nodes = module.region(region).nodes();

        for (pos, &node_id) in nodes.iter().enumerate() {
            attached.insert(node_id);
            let node = module.node(node_id);
            if node.op == Opcode::Entry && pos != 0 {
                violations.push(Violation::EntryMisplaced { region });
            }
            if node.op.is_terminator() && pos + 1 != nodes.len() {
                violations.push(Violation::TerminatorNotLast {
                    region,
                    node: node_id,
                });
            }
        }

        let entries = nodes
            .iter()
            .filter(|&&n| module.node(n).op == Opcode::Entry)
            .count();
        if entries > 1 {
            violations.push(Violation::EntryMisplaced { region });
        }
    }

    // Use-def symmetry over attached nodes.
    for &node_id in &attached {
        let node = module.node(node_id);
        for &input in &node.inputs {
            if !module.node(input).users.contains(&node_id) {
                violations.push(Violation::MissingUserEdge {
                    node: input,
                    user: node_id,
                });
            }
        }
        for &user in &node.users {
            if !module.node(user).inputs.contains(&node_id) {
                violations.push(Violation::DanglingUserEdge {
                    node: node_id,
                    user,
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        tracing::debug!(count = violations.len(), "module verification failed");
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::types::DataType;

    #[test]
    fn fresh_module_verifies() {
        let m = Module::new("unit");
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn built_function_verifies() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let _f = b.function("f", DataType::Int32).build().unwrap();
        let x = b.lit(1i32);
        let y = b.lit(2i32);
        let sum = b.add(x, y).unwrap();
        b.ret(Some(sum));
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn broken_user_edge_is_reported() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let _f = b.function("f", DataType::Int32).build().unwrap();
        let x = b.lit(1i32);
        let y = b.lit(2i32);
        let sum = b.add(x, y).unwrap();
        b.ret(Some(sum));
        // Sever one side of the edge behind the mutation helpers' back.
        m.node_mut(x).users.clear();
        let violations = verify_module(&m).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::MissingUserEdge { .. })));
    }
}
