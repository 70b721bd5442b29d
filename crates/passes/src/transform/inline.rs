//! Function inlining.
//!
//! Inlines simple callees (single region, single return) at call sites
//! where a size/benefit heuristic says it pays off. The callee body is
//! cloned, parameters are substituted with the call arguments, the
//! clones are spliced in front of the call site, and the return value
//! replaces every use of the call.

use std::collections::{HashMap, HashSet};

use arc_ir::{Module, NodeId, Opcode, RegionId};
use tracing::debug;

use crate::analysis::call_graph::CallGraphResult;
use crate::error::PassError;
use crate::manager::PassManager;
use crate::pass::{NamedResult, Pass, TransformPass};

/// Inlining heuristics.
#[derive(Clone, Copy, Debug)]
pub struct InlineConfig {
    /// Maximum callee size (non-structural nodes) to inline.
    pub max_size: usize,
    /// Minimum benefit score required.
    pub min_benefit: f32,
    /// Whether recursive calls may be inlined.
    pub inline_recursive: bool,
}

impl Default for InlineConfig {
    fn default() -> Self {
        InlineConfig {
            max_size: 30,
            min_benefit: 2.0,
            inline_recursive: false,
        }
    }
}

/// An inlining decision with its reasoning.
#[derive(Clone, Debug)]
pub struct InlineDecision {
    pub should_inline: bool,
    pub benefit: f32,
    pub cost: usize,
    pub reason: String,
}

/// Result of one inlining operation.
#[derive(Debug, Default)]
pub struct InlineOutcome {
    pub return_value: Option<NodeId>,
    pub modified: Vec<RegionId>,
    pub success: bool,
}

/// Function-inlining component: decision surface plus the transformation.
#[derive(Default)]
pub struct Inliner {
    config: InlineConfig,
}

impl Inliner {
    pub fn new(config: InlineConfig) -> Self {
        Inliner { config }
    }

    pub fn set_config(&mut self, config: InlineConfig) {
        self.config = config;
    }

    /// Evaluate a call site without side effects.
    pub fn evaluate(
        &self,
        module: &Module,
        call_site: NodeId,
        callee: NodeId,
        cg: Option<&CallGraphResult>,
    ) -> InlineDecision {
        if !is_inlinable(module, callee, cg) {
            return InlineDecision {
                should_inline: false,
                benefit: 0.0,
                cost: 0,
                reason: "callee is not inlinable".to_owned(),
            };
        }
        if would_create_recursion(module, call_site, callee, cg, self.config.inline_recursive) {
            return InlineDecision {
                should_inline: false,
                benefit: 0.0,
                cost: 0,
                reason: "inlining would create recursion".to_owned(),
            };
        }

        let cost = estimate_cost(module, callee);
        let benefit = calc_benefit(module, call_site, callee, cost, cg);
        let should = cost <= self.config.max_size && benefit >= self.config.min_benefit;
        InlineDecision {
            should_inline: should,
            benefit,
            cost,
            reason: if should {
                format!("cost {} benefit {:.1}", cost, benefit)
            } else {
                format!("rejected: cost {} benefit {:.1}", cost, benefit)
            },
        }
    }

    /// Inline `callee` at `call_site`.
    pub fn inline_call(
        &self,
        module: &mut Module,
        call_site: NodeId,
        callee: NodeId,
        cg: Option<&CallGraphResult>,
    ) -> InlineOutcome {
        let mut outcome = InlineOutcome::default();
        if !is_inlinable(module, callee, cg) {
            return outcome;
        }
        let Some(caller_region) = module.node(call_site).parent else {
            return outcome;
        };
        let Some(body_region) = module.function_region(callee) else {
            return outcome;
        };

        // Clone the body, skipping structural nodes.
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        let body_nodes: Vec<NodeId> = module.region(body_region).nodes().to_vec();
        for &original in &body_nodes {
            let (op, ty) = {
                let node = module.node(original);
                (node.op, node.ty)
            };
            if matches!(op, Opcode::Entry | Opcode::Exit | Opcode::Ret | Opcode::Param) {
                continue;
            }
            let clone = module.new_node(op, ty);
            let value = module.node(original).value.clone();
            let traits = module.node(original).traits;
            module.node_mut(clone).value = value;
            module.node_mut(clone).traits = traits;
            mapping.insert(original, clone);
        }

        // Reconnect clones among themselves; anything outside the map
        // (parameters, external values) is resolved below.
        for (&original, &clone) in &mapping {
            let inputs: Vec<NodeId> = module.node(original).inputs.to_vec();
            let mapped: Vec<NodeId> = inputs
                .iter()
                .map(|input| mapping.get(input).copied().unwrap_or(*input))
                .collect();
            module.connect_inputs(clone, &mapped);
        }

        // Substitute parameter references with the call arguments.
        // Arguments start after the callee (CALL) or after the callee
        // plus the two control targets (INVOKE).
        let arg_base = match module.node(call_site).op {
            Opcode::Invoke => 3,
            _ => 1,
        };
        let params: Vec<NodeId> = module
            .node(callee)
            .inputs
            .iter()
            .copied()
            .filter(|&p| module.node(p).op == Opcode::Param)
            .collect();
        let args: Vec<NodeId> = module.node(call_site).inputs[arg_base.min(module.node(call_site).inputs.len())..].to_vec();
        for (index, &param) in params.iter().enumerate() {
            let Some(&arg) = args.get(index) else {
                continue;
            };
            for &clone in mapping.values() {
                module.replace_input(clone, param, arg);
            }
        }

        // The single RET's input replaces every use of the call site.
        let ret_value = body_nodes
            .iter()
            .copied()
            .find(|&n| module.node(n).op == Opcode::Ret)
            .and_then(|ret| module.node(ret).inputs.first().copied())
            .map(|v| mapping.get(&v).copied().unwrap_or(v));

        // Splice the clones in front of the call, in body order.
        for &original in &body_nodes {
            if let Some(&clone) = mapping.get(&original) {
                module.insert_before(caller_region, call_site, clone);
            }
        }

        if let Some(value) = ret_value {
            module.replace_all_uses(call_site, value);
        }
        module.erase_node(call_site);

        debug!(cloned = mapping.len(), "inlined call site");
        outcome.return_value = ret_value;
        outcome.modified = vec![caller_region];
        outcome.success = true;
        outcome
    }
}

/// Inlinable: a FUNCTION whose body is one region with exactly one RET.
fn is_inlinable(module: &Module, callee: NodeId, cg: Option<&CallGraphResult>) -> bool {
    if module.node(callee).op != Opcode::Function {
        return false;
    }
    let Some(region) = module.function_region(callee) else {
        return false;
    };
    if !module.region(region).children().is_empty() {
        return false;
    }
    let ret_count = module
        .region(region)
        .nodes()
        .iter()
        .filter(|&&n| module.node(n).op == Opcode::Ret)
        .count();
    if ret_count != 1 {
        return false;
    }

    // With call-graph facts, refuse callees whose parameters escape.
    if let Some(cg) = cg {
        let param_count = module
            .node(callee)
            .inputs
            .iter()
            .filter(|&&p| module.node(p).op == Opcode::Param)
            .count();
        for i in 0..param_count {
            if cg.escapes(callee, i) {
                return false;
            }
        }
    }
    true
}

fn would_create_recursion(
    module: &Module,
    call_site: NodeId,
    callee: NodeId,
    cg: Option<&CallGraphResult>,
    allow_recursive: bool,
) -> bool {
    if allow_recursive {
        return false;
    }
    if let Some(cg) = cg {
        if cg.recursive(callee) {
            return true;
        }
        if let Some(caller) = cg.containing_fn(call_site) {
            return caller == callee || cg.calls(callee, caller);
        }
    }
    // Without a call graph, walk the region ancestry by name.
    let Some(callee_name) = module.node(callee).name else {
        return false;
    };
    let mut region = module.node(call_site).parent;
    while let Some(r) = region {
        if module.region(r).name() == callee_name {
            return true;
        }
        region = module.region(r).parent();
    }
    false
}

/// Cost: the number of non-structural nodes in the body.
fn estimate_cost(module: &Module, callee: NodeId) -> usize {
    let Some(region) = module.function_region(callee) else {
        return usize::MAX;
    };
    module
        .region(region)
        .nodes()
        .iter()
        .filter(|&&n| {
            !matches!(
                module.node(n).op,
                Opcode::Entry | Opcode::Exit | Opcode::Param | Opcode::Ret
            )
        })
        .count()
}

fn calc_benefit(
    module: &Module,
    call_site: NodeId,
    callee: NodeId,
    cost: usize,
    cg: Option<&CallGraphResult>,
) -> f32 {
    let mut benefit = 2.0f32;

    // Constant arguments unlock later folding. For INVOKE the arguments
    // start strictly after the three leading operands.
    let arg_base = match module.node(call_site).op {
        Opcode::Invoke => 3,
        _ => 1,
    };
    let has_constant_arg = module
        .node(call_site)
        .inputs
        .iter()
        .skip(arg_base)
        .any(|&a| module.node(a).op == Opcode::Lit);
    if has_constant_arg {
        benefit += 5.0;
    }

    if cost <= 5 {
        benefit += 3.0;
    } else if cost > 15 {
        benefit -= 2.0;
    }

    if let Some(cg) = cg {
        let callers = cg.callers(callee).len();
        if callers == 1 {
            benefit += 3.0;
        } else if callers > 10 {
            benefit -= 2.0;
        }
        if cg.pure(callee) {
            benefit += 2.0;
        }
    }

    benefit
}

/// Pass driving the inliner over every resolved call site.
#[derive(Default)]
pub struct InlinePass {
    config: InlineConfig,
}

impl InlinePass {
    pub fn new(config: InlineConfig) -> Self {
        InlinePass { config }
    }
}

impl Pass for InlinePass {
    fn name(&self) -> &'static str {
        "function-inlining"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![CallGraphResult::NAME]
    }

    fn invalidates(&self) -> Vec<&'static str> {
        // Inlining rewrites call structure and clones allocations.
        vec![CallGraphResult::NAME, "type-based-alias-analysis"]
    }
}

impl TransformPass for InlinePass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError> {
        let cg = pm.get::<CallGraphResult>()?;
        let inliner = Inliner::new(self.config);

        // Collect candidate sites up front; inlining mutates users.
        let mut sites: Vec<(NodeId, NodeId)> = Vec::new();
        for &func in module.functions() {
            if module.node(func).op != Opcode::Function {
                continue;
            }
            for &site in cg.call_sites(func) {
                if let Some(callee) = cg.callee(site) {
                    sites.push((site, callee));
                }
            }
        }

        let mut modified: HashSet<RegionId> = HashSet::new();
        for (site, callee) in sites {
            if module.node(site).parent.is_none() {
                continue; // a previous inline removed this site
            }
            let decision = inliner.evaluate(module, site, callee, Some(&cg));
            if !decision.should_inline {
                continue;
            }
            let outcome = inliner.inline_call(module, site, callee, Some(&cg));
            if outcome.success {
                modified.extend(outcome.modified);
            }
        }

        let mut out: Vec<RegionId> = modified.into_iter().collect();
        out.sort();
        Ok(out)
    }
}
