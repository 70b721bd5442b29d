//! Call graph analysis with indirect-call resolution.
//!
//! Builds the module's call graph in a single pass: direct edges from
//! FUNCTION callees, indirect edges by chasing function-pointer
//! definitions (with a cycle guard), SCC membership via Tarjan's
//! algorithm, per-parameter escape records and a purity set.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};

use arc_ir::{DataType, Module, NodeId, NodeTraits, Opcode, PtrQualifier};
use tracing::trace;

use crate::error::PassError;
use crate::pass::{AnalysisPass, AnalysisResult, NamedResult, Pass};

/// A call relationship edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CallEdge {
    /// Function node making the call.
    pub caller: NodeId,
    /// CALL or INVOKE node.
    pub call_site: NodeId,
    /// Resolved callee; `None` for unresolved indirect calls.
    pub callee: Option<NodeId>,
    /// Whether resolution went through function-pointer chasing.
    pub indirect: bool,
    /// Resolution confidence, 1.0 for direct edges.
    pub confidence: f32,
}

/// Parameter flow and escapement information.
#[derive(Clone, Debug, Default)]
pub struct ParamInfo {
    pub escapes: bool,
    pub read_only: bool,
    pub escape_sites: Vec<NodeId>,
}

/// Cached call-graph facts for a module.
#[derive(Default)]
pub struct CallGraphResult {
    edges: Vec<CallEdge>,
    caller_map: HashMap<NodeId, Vec<NodeId>>,
    callee_map: HashMap<NodeId, Vec<NodeId>>,
    scc_map: HashMap<NodeId, Vec<NodeId>>,
    param_info: HashMap<(NodeId, usize), ParamInfo>,
    pure_functions: HashSet<NodeId>,
    extern_functions: HashSet<NodeId>,
    export_functions: HashSet<NodeId>,
    site_to_function: HashMap<NodeId, NodeId>,
    function_sites: HashMap<NodeId, Vec<NodeId>>,
}

impl CallGraphResult {
    /// Direct callee for a call site; `None` for indirect sites.
    pub fn callee(&self, call_site: NodeId) -> Option<NodeId> {
        self.edges
            .iter()
            .find(|e| e.call_site == call_site && !e.indirect)
            .and_then(|e| e.callee)
    }

    /// Every function the site might call.
    pub fn targets(&self, call_site: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.call_site == call_site)
            .filter_map(|e| e.callee)
            .collect()
    }

    /// Whether `caller` can transitively reach `callee`.
    pub fn calls(&self, caller: NodeId, callee: NodeId) -> bool {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut worklist = VecDeque::new();
        worklist.push_back(caller);
        while let Some(current) = worklist.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.callee_map.get(&current) {
                for &f in next {
                    if f == callee {
                        return true;
                    }
                    worklist.push_back(f);
                }
            }
        }
        false
    }

    pub fn callees(&self, func: NodeId) -> &[NodeId] {
        self.callee_map.get(&func).map_or(&[], |v| v.as_slice())
    }

    pub fn callers(&self, func: NodeId) -> &[NodeId] {
        self.caller_map.get(&func).map_or(&[], |v| v.as_slice())
    }

    /// A function is recursive iff its SCC has more than one member or it
    /// calls itself directly.
    pub fn recursive(&self, func: NodeId) -> bool {
        if let Some(scc) = self.scc_map.get(&func) {
            if scc.len() > 1 {
                return true;
            }
        }
        self.callee_map
            .get(&func)
            .is_some_and(|callees| callees.contains(&func))
    }

    /// Whether the parameter escapes; conservatively true for externs and
    /// unknown parameters.
    pub fn escapes(&self, func: NodeId, param_idx: usize) -> bool {
        if self.extern_functions.contains(&func) {
            return true;
        }
        self.param_info
            .get(&(func, param_idx))
            .map_or(true, |info| info.escapes)
    }

    pub fn pure(&self, func: NodeId) -> bool {
        self.pure_functions.contains(&func)
    }

    pub fn is_extern(&self, func: NodeId) -> bool {
        self.extern_functions.contains(&func)
    }

    pub fn is_export(&self, func: NodeId) -> bool {
        self.export_functions.contains(&func)
    }

    pub fn call_sites(&self, func: NodeId) -> &[NodeId] {
        self.function_sites.get(&func).map_or(&[], |v| v.as_slice())
    }

    pub fn containing_fn(&self, call_site: NodeId) -> Option<NodeId> {
        self.site_to_function.get(&call_site).copied()
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    fn add_edge(&mut self, edge: CallEdge) {
        if let Some(callee) = edge.callee {
            let callees = self.callee_map.entry(edge.caller).or_default();
            if !callees.contains(&callee) {
                callees.push(callee);
            }
            let callers = self.caller_map.entry(callee).or_default();
            if !callers.contains(&edge.caller) {
                callers.push(edge.caller);
            }
        }
        self.edges.push(edge);
    }
}

impl AnalysisResult for CallGraphResult {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl NamedResult for CallGraphResult {
    const NAME: &'static str = "call-graph-analysis";
}

/// Call graph analysis pass.
#[derive(Default)]
pub struct CallGraphPass;

impl Pass for CallGraphPass {
    fn name(&self) -> &'static str {
        CallGraphResult::NAME
    }
}

impl AnalysisPass for CallGraphPass {
    fn run(&self, module: &Module) -> Result<Box<dyn AnalysisResult>, PassError> {
        Ok(Box::new(build_call_graph(module)))
    }
}

/// Single-pass construction over the module.
pub fn build_call_graph(module: &Module) -> CallGraphResult {
    let mut result = CallGraphResult::default();

    classify_functions(&mut result, module);
    for &func in module.functions() {
        if module.node(func).op == Opcode::Function {
            analyze_function(&mut result, module, func);
        }
    }
    compute_scc(&mut result, module);
    analyze_parameter_flow(&mut result, module);
    // Purity runs last so callee facts exist and the recursion over the
    // graph terminates.
    compute_purity(&mut result, module);

    trace!(
        edges = result.edges.len(),
        pure = result.pure_functions.len(),
        "call graph analysis complete"
    );
    result
}

fn classify_functions(result: &mut CallGraphResult, module: &Module) {
    for &func in module.functions() {
        let traits = module.node(func).traits;
        if traits.contains(NodeTraits::EXTERN) {
            result.extern_functions.insert(func);
        }
        if traits.contains(NodeTraits::EXPORT) {
            result.export_functions.insert(func);
        }
    }
}

fn analyze_function(result: &mut CallGraphResult, module: &Module, func: NodeId) {
    let Some(region) = module.function_region(func) else {
        return;
    };
    for r in module.dominated_regions(region) {
        for &node in module.region(r).nodes() {
            if module.node(node).op.is_call() {
                analyze_call_site(result, module, node, func);
            }
        }
    }
}

fn analyze_call_site(
    result: &mut CallGraphResult,
    module: &Module,
    call_site: NodeId,
    caller: NodeId,
) {
    result.site_to_function.insert(call_site, caller);
    result
        .function_sites
        .entry(caller)
        .or_default()
        .push(call_site);

    let Some(&target) = module.node(call_site).inputs.first() else {
        return;
    };

    if module.node(target).op == Opcode::Function {
        result.add_edge(CallEdge {
            caller,
            call_site,
            callee: Some(target),
            indirect: false,
            confidence: 1.0,
        });
        return;
    }

    // Indirect call: chase the pointer definition.
    let mut visited = HashSet::new();
    let targets = chase_function_pointer(module, target, &mut visited);
    if targets.is_empty() {
        // Unresolved: one edge with no callee.
        result.add_edge(CallEdge {
            caller,
            call_site,
            callee: None,
            indirect: true,
            confidence: 0.0,
        });
        return;
    }
    for callee in targets {
        result.add_edge(CallEdge {
            caller,
            call_site,
            callee: Some(callee),
            indirect: true,
            confidence: 0.8,
        });
    }
}

/// Resolve the functions a pointer can refer to.
fn chase_function_pointer(
    module: &Module,
    pointer: NodeId,
    visited: &mut HashSet<NodeId>,
) -> Vec<NodeId> {
    // Fast path: a restrict+const function pointer has exactly one
    // binding, its declared pointee.
    if let Ok(ptr) = module.node(pointer).value.as_pointer() {
        if ptr
            .qualifier
            .contains(PtrQualifier::RESTRICT | PtrQualifier::CONST)
        {
            if let Some(pointee) = ptr.pointee {
                if module.node(pointee).op == Opcode::Function {
                    return vec![pointee];
                }
            }
        }
    }

    let mut functions = HashSet::new();

    // Fast path: restrict pointers cannot be aliased, so only direct
    // stores into this pointer's location can define it.
    if module.is_restrict_pointer(pointer) {
        find_stores_to_location(module, pointer, &mut functions, visited);
    } else {
        chase_pointer_def(module, pointer, &mut functions, visited);
    }

    let mut out: Vec<NodeId> = functions.into_iter().collect();
    out.sort();
    out
}

fn chase_pointer_def(
    module: &Module,
    node_id: NodeId,
    functions: &mut HashSet<NodeId>,
    visited: &mut HashSet<NodeId>,
) {
    if !visited.insert(node_id) {
        return;
    }
    let node = module.node(node_id);
    match node.op {
        Opcode::Function => {
            functions.insert(node_id);
        }
        Opcode::AddrOf => {
            if let Some(&src) = node.inputs.first() {
                chase_pointer_def(module, src, functions, visited);
            }
        }
        Opcode::Load | Opcode::PtrLoad => {
            if let Some(&address) = node.inputs.first() {
                find_stores_to_location(module, address, functions, visited);
            }
        }
        Opcode::Param => {
            chase_param_arguments(module, node_id, functions, visited);
        }
        Opcode::From => {
            for &input in node.inputs.clone().iter() {
                chase_pointer_def(module, input, functions, visited);
            }
        }
        Opcode::Cast => {
            if let Some(&src) = node.inputs.first() {
                chase_pointer_def(module, src, functions, visited);
            }
        }
        _ => {}
    }
}

/// Descend into every store that writes `location`.
fn find_stores_to_location(
    module: &Module,
    location: NodeId,
    functions: &mut HashSet<NodeId>,
    visited: &mut HashSet<NodeId>,
) {
    for &user in module.node(location).users.iter() {
        let user_node = module.node(user);
        if user_node.op.is_store()
            && user_node.inputs.get(1) == Some(&location)
            && !user_node.inputs.is_empty()
        {
            chase_pointer_def(module, user_node.inputs[0], functions, visited);
        }
    }
}

/// Descend into the matching argument of every caller of the function
/// that owns `param`.
fn chase_param_arguments(
    module: &Module,
    param: NodeId,
    functions: &mut HashSet<NodeId>,
    visited: &mut HashSet<NodeId>,
) {
    // Find the owning function and the parameter's index in it.
    let Some(owner) = module
        .node(param)
        .users
        .iter()
        .copied()
        .find(|&u| module.node(u).op == Opcode::Function)
    else {
        return;
    };
    let Some(index) = module
        .node(owner)
        .inputs
        .iter()
        .position(|&p| p == param)
    else {
        return;
    };

    // Every call site whose callee is the owner contributes its argument.
    for &site in module.node(owner).users.iter() {
        let site_node = module.node(site);
        if !site_node.op.is_call() || site_node.inputs.first() != Some(&owner) {
            continue;
        }
        let arg_base = match site_node.op {
            Opcode::Invoke => 3,
            _ => 1,
        };
        if let Some(&arg) = site_node.inputs.get(arg_base + index) {
            chase_pointer_def(module, arg, functions, visited);
        }
    }
}

/// Tarjan's strongly connected components over the callee map.
fn compute_scc(result: &mut CallGraphResult, module: &Module) {
    struct TarjanState<'a> {
        callee_map: &'a HashMap<NodeId, Vec<NodeId>>,
        index_counter: usize,
        indices: HashMap<NodeId, usize>,
        lowlinks: HashMap<NodeId, usize>,
        stack: Vec<NodeId>,
        on_stack: HashSet<NodeId>,
        sccs: Vec<Vec<NodeId>>,
    }

    impl TarjanState<'_> {
        fn visit(&mut self, v: NodeId) {
            self.indices.insert(v, self.index_counter);
            self.lowlinks.insert(v, self.index_counter);
            self.index_counter += 1;
            self.stack.push(v);
            self.on_stack.insert(v);

            let callees: Vec<NodeId> = self.callee_map.get(&v).cloned().unwrap_or_default();
            for w in callees {
                if !self.indices.contains_key(&w) {
                    self.visit(w);
                    let low = self.lowlinks[&v].min(self.lowlinks[&w]);
                    self.lowlinks.insert(v, low);
                } else if self.on_stack.contains(&w) {
                    let low = self.lowlinks[&v].min(self.indices[&w]);
                    self.lowlinks.insert(v, low);
                }
            }

            if self.lowlinks[&v] == self.indices[&v] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack.remove(&w);
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
    }

    let mut state = TarjanState {
        callee_map: &result.callee_map,
        index_counter: 0,
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        stack: Vec::new(),
        on_stack: HashSet::new(),
        sccs: Vec::new(),
    };

    for &func in module.functions() {
        if !state.indices.contains_key(&func) {
            state.visit(func);
        }
    }

    let sccs = state.sccs;
    for scc in sccs {
        for &member in &scc {
            result.scc_map.insert(member, scc.clone());
        }
    }
}

fn analyze_parameter_flow(result: &mut CallGraphResult, module: &Module) {
    for &func in module.functions() {
        if module.node(func).op != Opcode::Function {
            continue;
        }
        let params: Vec<NodeId> = module
            .node(func)
            .inputs
            .iter()
            .copied()
            .filter(|&p| module.node(p).op == Opcode::Param)
            .collect();

        for (idx, &param) in params.iter().enumerate() {
            let info = analyze_parameter(module, param);
            result.param_info.insert((func, idx), info);
        }
    }
}

fn analyze_parameter(module: &Module, param: NodeId) -> ParamInfo {
    let node = module.node(param);
    let is_pointer = node.ty == DataType::Pointer;
    let is_const = module.is_const_pointer(param);

    let mut info = ParamInfo {
        escapes: false,
        read_only: true,
        escape_sites: Vec::new(),
    };

    // Fast paths: scalars and const pointers can only escape by being
    // returned.
    let return_only = !is_pointer || is_const;

    for &user in node.users.iter() {
        let user_node = module.node(user);
        match user_node.op {
            Opcode::Function => continue,
            Opcode::Ret => {
                info.escapes = true;
                info.escape_sites.push(user);
            }
            Opcode::Store | Opcode::PtrStore if !return_only => {
                // Escapes when the parameter is the stored value.
                if user_node.inputs.first() == Some(&param) {
                    info.escapes = true;
                    info.escape_sites.push(user);
                } else {
                    info.read_only = false;
                }
            }
            Opcode::Call | Opcode::Invoke if !return_only => {
                let arg_base = if user_node.op == Opcode::Invoke { 3 } else { 1 };
                if user_node.inputs.iter().skip(arg_base).any(|&a| a == param) {
                    info.escapes = true;
                    info.escape_sites.push(user);
                }
            }
            Opcode::AddrOf if !return_only => {
                info.escapes = true;
                info.escape_sites.push(user);
            }
            Opcode::Store | Opcode::PtrStore => {
                if user_node.inputs.get(1) == Some(&param) {
                    info.read_only = false;
                }
            }
            _ => {}
        }
    }

    info
}

/// Purity: no stores to non-local storage, no atomics, every callee
/// pure. Externs are conservatively impure; the set is shrunk to a fixed
/// point so cycles terminate.
fn compute_purity(result: &mut CallGraphResult, module: &Module) {
    let mut pure: HashSet<NodeId> = module
        .functions()
        .iter()
        .copied()
        .filter(|&f| {
            module.node(f).op == Opcode::Function && !result.extern_functions.contains(&f)
        })
        .filter(|&f| function_body_is_pure(module, f))
        .collect();

    loop {
        let mut changed = false;
        let snapshot: Vec<NodeId> = pure.iter().copied().collect();
        for func in snapshot {
            let callees_ok = result
                .callee_map
                .get(&func)
                .map_or(true, |cs| cs.iter().all(|c| pure.contains(c)));
            let unresolved = result
                .edges
                .iter()
                .any(|e| e.caller == func && e.callee.is_none());
            if !callees_ok || unresolved {
                pure.remove(&func);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    result.pure_functions = pure;
}

fn function_body_is_pure(module: &Module, func: NodeId) -> bool {
    let Some(region) = module.function_region(func) else {
        return false;
    };
    for r in module.dominated_regions(region) {
        for &node_id in module.region(r).nodes() {
            let node = module.node(node_id);
            match node.op {
                Opcode::AtomicLoad | Opcode::AtomicStore | Opcode::AtomicCas => return false,
                Opcode::Store | Opcode::PtrStore => {
                    // A store is a side effect unless it targets a
                    // WRITEONLY-qualified pointer.
                    let qualified = node
                        .inputs
                        .get(1)
                        .is_some_and(|&target| module.is_writeonly_pointer(target));
                    if !qualified {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_ir::Builder;

    fn build_result(module: &Module) -> CallGraphResult {
        build_call_graph(module)
    }

    #[test]
    fn direct_call_produces_full_confidence_edge() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let callee = b.function("leaf", DataType::Int32).build().unwrap();
        let v = b.lit(1i32);
        b.ret(Some(v));
        let root = b.module().root();
        b.set_insertion_point(root);

        let caller = b.function("main", DataType::Int32).build().unwrap();
        let site = b.call(callee.node, &[]).unwrap();
        b.ret(Some(site));

        let cg = build_result(&m);
        assert_eq!(cg.callee(site), Some(callee.node));
        assert_eq!(cg.containing_fn(site), Some(caller.node));
        assert_eq!(cg.callees(caller.node), &[callee.node]);
        assert_eq!(cg.callers(callee.node), &[caller.node]);
        assert!(cg.calls(caller.node, callee.node));
        assert!(!cg.calls(callee.node, caller.node));
        let edge = cg.edges().iter().find(|e| e.call_site == site).unwrap();
        assert!(!edge.indirect);
        assert_eq!(edge.confidence, 1.0);
    }

    #[test]
    fn self_call_is_recursive() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("spin", DataType::Void).build().unwrap();
        b.call(f.node, &[]).unwrap();
        b.ret(None);

        let cg = build_result(&m);
        assert!(cg.recursive(f.node));
    }

    #[test]
    fn mutual_recursion_shares_an_scc() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);

        let even = b.function("even", DataType::Void).build().unwrap();
        b.ret(None);
        let root = b.module().root();
        b.set_insertion_point(root);

        let odd = b.function("odd", DataType::Void).build().unwrap();
        b.call(even.node, &[]).unwrap();
        b.ret(None);

        // Patch the call from even into odd after both exist.
        b.set_insertion_point(even.region);
        let m2 = b.module();
        let entry = m2.entry_of(even.region).unwrap();
        let call = m2.new_node(Opcode::Call, DataType::Void);
        m2.insert_after(even.region, entry, call);
        m2.connect_inputs(call, &[odd.node]);

        let cg = build_result(&m);
        assert!(cg.recursive(even.node));
        assert!(cg.recursive(odd.node));
    }

    #[test]
    fn pure_leaf_function_is_detected() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("addone", DataType::Int32)
            .param("x", DataType::Int32)
            .build()
            .unwrap();
        let one = b.lit(1i32);
        let sum = b.add(f.params[0], one).unwrap();
        b.ret(Some(sum));

        let cg = build_result(&m);
        assert!(cg.pure(f.node));
    }

    #[test]
    fn store_through_writeonly_pointer_stays_pure() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let c = b.lit(1u32);
        let pointee = b.alloc(DataType::Int32, c).unwrap();
        let f = b
            .function("emit", DataType::Void)
            .param("v", DataType::Int32)
            .param_ptr("out", pointee, arc_ir::PtrQualifier::WRITEONLY)
            .build()
            .unwrap();
        b.ptr_store(f.params[0], f.params[1]).unwrap();
        b.ret(None);

        let cg = build_result(&m);
        assert!(cg.pure(f.node));
    }

    #[test]
    fn unqualified_store_makes_a_function_impure() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let c = b.lit(1u32);
        let pointee = b.alloc(DataType::Int32, c).unwrap();
        let f = b
            .function("emit", DataType::Void)
            .param("v", DataType::Int32)
            .param_ptr("out", pointee, arc_ir::PtrQualifier::empty())
            .build()
            .unwrap();
        b.ptr_store(f.params[0], f.params[1]).unwrap();
        b.ret(None);

        // A local scratch store counts as a side effect too.
        let g = b.function("scratch", DataType::Int32).build().unwrap();
        let count = b.lit(1u32);
        let slot = b.alloc(DataType::Int32, count).unwrap();
        let v = b.lit(3i32);
        b.store(v, slot).unwrap();
        let loaded = b.load(slot).unwrap();
        b.ret(Some(loaded));

        let cg = build_result(&m);
        assert!(!cg.pure(f.node));
        assert!(!cg.pure(g.node));
    }

    #[test]
    fn extern_functions_are_impure_and_escape_params() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("syscall", DataType::Void)
            .param("fd", DataType::Int32)
            .imported()
            .build()
            .unwrap();

        let cg = build_result(&m);
        assert!(!cg.pure(f.node));
        assert!(cg.escapes(f.node, 0));
    }

    #[test]
    fn scalar_param_escapes_only_via_return() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("ident", DataType::Int32)
            .param("x", DataType::Int32)
            .build()
            .unwrap();
        b.ret(Some(f.params[0]));

        let cg = build_result(&m);
        assert!(cg.escapes(f.node, 0));

        let mut m2 = Module::new("unit2");
        let mut b2 = Builder::new(&mut m2);
        let g = b2
            .function("drop", DataType::Void)
            .param("x", DataType::Int32)
            .build()
            .unwrap();
        b2.ret(None);
        let cg2 = build_result(&m2);
        assert!(!cg2.escapes(g.node, 0));
    }
}
