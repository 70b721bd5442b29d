//! Type-based alias analysis.
//!
//! Answers alias queries between memory accesses using allocation-site
//! identity, pointer-arithmetic offset tracking, type compatibility,
//! escape status and pointer qualifiers. The result is optimistic where
//! it must be: anything it cannot prove reports MAY_ALIAS rather than
//! failing.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use arc_ir::{DataType, Module, NodeId, Opcode, RegionId};
use tracing::trace;

use crate::error::PassError;
use crate::pass::{AnalysisPass, AnalysisResult, NamedResult, Pass};

/// Result of an alias query between two memory accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasKind {
    /// Memory accesses never alias.
    NoAlias,
    /// Memory accesses definitely alias the same location.
    MustAlias,
    /// Cannot determine precisely.
    MayAlias,
    /// Memory accesses partially overlap.
    PartialAlias,
}

/// A memory location: allocation site, byte offset from its base
/// (`None` when unknown), access size and accessed type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryLocation {
    pub site: NodeId,
    pub offset: Option<i64>,
    pub size: u64,
    pub access_type: DataType,
}

fn types_compatible(a: DataType, b: DataType) -> bool {
    a == b || DataType::promote(a, b).is_some()
}

/// The address operand of a pointer-indirect access, if any.
fn access_ptr(module: &Module, access: NodeId) -> Option<NodeId> {
    let node = module.node(access);
    match node.op {
        Opcode::PtrLoad | Opcode::AtomicLoad => node.inputs.first().copied(),
        Opcode::PtrStore | Opcode::AtomicStore => node.inputs.get(1).copied(),
        _ => None,
    }
}

/// Overlap rule for two locations sharing an allocation site.
pub fn check_memory_overlap(a: &MemoryLocation, b: &MemoryLocation) -> AliasKind {
    let (Some(off_a), Some(off_b)) = (a.offset, b.offset) else {
        return AliasKind::MayAlias;
    };

    if off_a == off_b && a.size == b.size && a.access_type == b.access_type {
        return AliasKind::MustAlias;
    }

    let end_a = off_a + a.size as i64;
    let end_b = off_b + b.size as i64;
    if end_a <= off_b || end_b <= off_a {
        return AliasKind::NoAlias;
    }

    if off_a != off_b || a.size != b.size {
        return AliasKind::PartialAlias;
    }

    // Complete overlap, same extent, different types.
    if !types_compatible(a.access_type, b.access_type) {
        return AliasKind::NoAlias;
    }
    AliasKind::MayAlias
}

/// Cached TBAA facts for a module.
#[derive(Default)]
pub struct TbaaResult {
    access_locations: HashMap<NodeId, MemoryLocation>,
    allocation_sites: HashSet<NodeId>,
    allocation_sizes: HashMap<NodeId, u64>,
    escaped: HashSet<NodeId>,
    accesses: Vec<NodeId>,
}

impl TbaaResult {
    /// Aliasing relationship between two memory accesses.
    pub fn alias(&self, module: &Module, a: NodeId, b: NodeId) -> AliasKind {
        if a == b {
            return AliasKind::MustAlias;
        }

        let (Some(loc_a), Some(loc_b)) = (self.memory_location(a), self.memory_location(b)) else {
            return AliasKind::MayAlias;
        };

        let ptr_a = access_ptr(module, a);
        let ptr_b = access_ptr(module, b);
        let restrict_involved = ptr_a.is_some_and(|p| module.is_restrict_pointer(p))
            || ptr_b.is_some_and(|p| module.is_restrict_pointer(p));
        if restrict_involved && ptr_a != ptr_b {
            return AliasKind::NoAlias;
        }

        if loc_a.site != loc_b.site {
            // Distinct locals that never escape occupy disjoint storage.
            if !self.has_escaped(loc_a.site) && !self.has_escaped(loc_b.site) {
                return AliasKind::NoAlias;
            }
            if restrict_involved {
                return AliasKind::NoAlias;
            }
            if !types_compatible(loc_a.access_type, loc_b.access_type) {
                return AliasKind::NoAlias;
            }
            return AliasKind::MayAlias;
        }

        check_memory_overlap(loc_a, loc_b)
    }

    pub fn may_alias(&self, module: &Module, a: NodeId, b: NodeId) -> bool {
        self.alias(module, a, b) != AliasKind::NoAlias
    }

    pub fn no_alias(&self, module: &Module, a: NodeId, b: NodeId) -> bool {
        self.alias(module, a, b) == AliasKind::NoAlias
    }

    pub fn memory_location(&self, access: NodeId) -> Option<&MemoryLocation> {
        self.access_locations.get(&access)
    }

    pub fn add_memory_access(&mut self, access: NodeId, location: MemoryLocation) {
        self.access_locations.insert(access, location);
        self.accesses.push(access);
    }

    pub fn add_allocation_site(&mut self, site: NodeId, size: u64) {
        self.allocation_sites.insert(site);
        self.allocation_sizes.insert(site, size);
    }

    pub fn is_allocation_site(&self, node: NodeId) -> bool {
        self.allocation_sites.contains(&node)
    }

    pub fn allocation_size(&self, site: NodeId) -> Option<u64> {
        self.allocation_sizes.get(&site).copied()
    }

    pub fn memory_accesses(&self) -> &[NodeId] {
        &self.accesses
    }

    pub fn mark_escaped(&mut self, site: NodeId) {
        self.escaped.insert(site);
    }

    pub fn has_escaped(&self, site: NodeId) -> bool {
        self.escaped.contains(&site)
    }
}

impl AnalysisResult for TbaaResult {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Allocation-site identity and access types are stable across the
    /// standard transforms; the cached result stays valid. Transforms
    /// that restructure allocations declare explicit invalidation.
    fn update(&mut self, _modified: &[RegionId]) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl NamedResult for TbaaResult {
    const NAME: &'static str = "type-based-alias-analysis";
}

/// Type-based alias analysis pass.
#[derive(Default)]
pub struct TbaaPass;

impl Pass for TbaaPass {
    fn name(&self) -> &'static str {
        TbaaResult::NAME
    }
}

impl AnalysisPass for TbaaPass {
    fn run(&self, module: &Module) -> Result<Box<dyn AnalysisResult>, PassError> {
        let mut result = TbaaResult::default();
        for &func in module.functions() {
            if module.node(func).op != Opcode::Function {
                continue;
            }
            if let Some(region) = module.function_region(func) {
                for r in module.dominated_regions(region) {
                    for &node in module.region(r).nodes() {
                        analyze_node(&mut result, module, node);
                    }
                }
            }
        }
        trace!(
            sites = result.allocation_sites.len(),
            accesses = result.accesses.len(),
            escaped = result.escaped.len(),
            "tbaa analysis complete"
        );
        Ok(Box::new(result))
    }
}

fn analyze_node(result: &mut TbaaResult, module: &Module, node_id: NodeId) {
    let node = module.node(node_id);
    match node.op {
        Opcode::Alloc => {
            let count = node
                .inputs
                .first()
                .and_then(|&c| {
                    (module.node(c).op == Opcode::Lit)
                        .then(|| module.node(c).value.int_value())
                        .flatten()
                })
                .unwrap_or(1);
            let size = count.max(0) as u64 * node.ty.size_bytes();
            result.add_allocation_site(node_id, size);
        }
        op if op.is_memory_access() => {
            if let Some(location) = compute_memory_location(module, node_id) {
                result.add_memory_access(node_id, location);
            }
            // Storing a pointer value publishes its allocation.
            if matches!(node.op, Opcode::Store | Opcode::PtrStore) {
                if let Some(&value) = node.inputs.first() {
                    if module.node(value).ty == DataType::Pointer {
                        if let (Some(site), _) = trace_pointer_base(module, value) {
                            result.mark_escaped(site);
                        }
                    }
                }
            }
        }
        Opcode::Call | Opcode::Invoke => {
            // A call returning a pointer is an opaque allocation site.
            if node.op == Opcode::Call && node.ty == DataType::Pointer {
                result.add_allocation_site(node_id, 0);
            }
            // Pointer arguments escape unless const-qualified. INVOKE's
            // arguments start after its two control targets.
            let arg_base = if node.op == Opcode::Invoke { 3 } else { 1 };
            for &arg in node.inputs.iter().skip(arg_base) {
                if module.node(arg).ty == DataType::Pointer && !module.is_const_pointer(arg) {
                    if let (Some(site), _) = trace_pointer_base(module, arg) {
                        result.mark_escaped(site);
                    }
                }
            }
        }
        Opcode::Ret => {
            if let Some(&value) = node.inputs.first() {
                if module.node(value).ty == DataType::Pointer {
                    if let (Some(site), _) = trace_pointer_base(module, value) {
                        result.mark_escaped(site);
                    }
                }
            }
        }
        _ => {}
    }
}

fn compute_memory_location(module: &Module, node_id: NodeId) -> Option<MemoryLocation> {
    let node = module.node(node_id);
    // Module-scope accesses are untracked; queries fall back to MAY_ALIAS.
    let is_global = node
        .parent
        .is_some_and(|r| module.region(r).parent().is_none());
    if is_global {
        return None;
    }

    match node.op {
        Opcode::Load | Opcode::Store => {
            let target = if node.op == Opcode::Store {
                *node.inputs.get(1)?
            } else {
                *node.inputs.first()?
            };
            let (site, offset) = trace_pointer_base(module, target);
            let access_type = if node.op == Opcode::Store {
                module.node(*node.inputs.first()?).ty
            } else {
                node.ty
            };
            Some(MemoryLocation {
                site: site?,
                offset,
                size: access_type.size_bytes(),
                access_type,
            })
        }
        Opcode::PtrLoad | Opcode::PtrStore | Opcode::AtomicLoad | Opcode::AtomicStore => {
            let pointer = access_ptr(module, node_id)?;
            let (site, offset) = trace_pointer_base(module, pointer);
            let access_type = module
                .node(pointer)
                .value
                .as_pointer()
                .ok()
                .and_then(|p| p.pointee)
                .map(|p| module.node(p).ty)
                .unwrap_or(DataType::Void);
            Some(MemoryLocation {
                site: site?,
                offset,
                size: access_type.size_bytes(),
                access_type,
            })
        }
        _ => None,
    }
}

/// Trace an address through pointer arithmetic to its allocation base.
///
/// Returns the base site (ALLOC, PARAM or pointer-returning CALL) and
/// the accumulated byte offset; `offset: None` when any step hides it.
pub fn trace_pointer_base(module: &Module, pointer: NodeId) -> (Option<NodeId>, Option<i64>) {
    let mut offset: i64 = 0;
    let mut current = pointer;
    let mut visited: HashSet<NodeId> = HashSet::new();

    loop {
        if !visited.insert(current) {
            return (None, None);
        }
        let node = module.node(current);
        match node.op {
            Opcode::Alloc => return (Some(current), Some(offset)),
            // Parameters are opaque roots until interprocedural facts exist.
            Opcode::Param => return (Some(current), Some(offset)),
            Opcode::Call => {
                if node.ty == DataType::Pointer {
                    return (Some(current), Some(offset));
                }
                return (None, None);
            }
            Opcode::AddrOf => {
                let Some(&src) = node.inputs.first() else {
                    return (None, None);
                };
                current = src;
            }
            Opcode::Cast => {
                let Some(&src) = node.inputs.first() else {
                    return (None, None);
                };
                current = src;
            }
            Opcode::PtrAdd => {
                let (Some(&base), Some(&off_node)) = (node.inputs.first(), node.inputs.get(1))
                else {
                    return (None, None);
                };
                if module.node(off_node).op != Opcode::Lit {
                    return (None, None);
                }
                offset += module.node(off_node).value.int_value().unwrap_or(0);
                current = base;
            }
            Opcode::Access => {
                let (Some(&container), Some(&index_node)) =
                    (node.inputs.first(), node.inputs.get(1))
                else {
                    return (None, None);
                };
                if module.node(index_node).op != Opcode::Lit {
                    return (None, None);
                }
                let index = module.node(index_node).value.int_value().unwrap_or(0);
                match module.node(container).ty {
                    DataType::Struct => {
                        match module.struct_field_offset(container, index.max(0) as usize) {
                            Ok(field_offset) => offset += field_offset as i64,
                            Err(_) => return (None, None),
                        }
                    }
                    DataType::Array => {
                        let elem = module
                            .node(container)
                            .value
                            .as_array()
                            .map(|a| a.elem_type.size_bytes())
                            .unwrap_or(0);
                        offset += index * elem as i64;
                    }
                    _ => {}
                }
                current = container;
            }
            _ => return (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_ir::{Builder, PtrQualifier};

    fn run_tbaa(module: &Module) -> TbaaResult {
        let mut result = TbaaResult::default();
        for &func in module.functions() {
            if let Some(region) = module.function_region(func) {
                for r in module.dominated_regions(region) {
                    for &node in module.region(r).nodes() {
                        analyze_node(&mut result, module, node);
                    }
                }
            }
        }
        result
    }

    #[test]
    fn distinct_locals_never_alias() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Void).build().unwrap();
        let c1 = b.lit(1u32);
        let a1 = b.alloc(DataType::Int32, c1).unwrap();
        let c2 = b.lit(1u32);
        let a2 = b.alloc(DataType::Int32, c2).unwrap();
        let v = b.lit(5i32);
        let s1 = b.store(v, a1).unwrap();
        let s2 = b.store(v, a2).unwrap();
        b.ret(None);

        let tbaa = run_tbaa(&m);
        assert_eq!(tbaa.alias(&m, s1, s2), AliasKind::NoAlias);
    }

    #[test]
    fn same_location_must_alias() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        b.function("f", DataType::Int32).build().unwrap();
        let c = b.lit(1u32);
        let a = b.alloc(DataType::Int32, c).unwrap();
        let v = b.lit(5i32);
        let st = b.store(v, a).unwrap();
        let ld = b.load(a).unwrap();
        b.ret(Some(ld));

        let tbaa = run_tbaa(&m);
        assert_eq!(tbaa.alias(&m, st, ld), AliasKind::MustAlias);
    }

    #[test]
    fn escaped_allocation_is_tracked() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let callee = b
            .function("sink", DataType::Void)
            .param("p", DataType::Pointer)
            .build()
            .unwrap();
        b.ret(None);
        let root = b.module().root();
        b.set_insertion_point(root);

        b.function("f", DataType::Void).build().unwrap();
        let c = b.lit(1u32);
        let a = b.alloc(DataType::Pointer, c).unwrap();
        let ptr = b.addr_of(a);
        b.call(callee.node, &[ptr]).unwrap();
        b.ret(None);

        let tbaa = run_tbaa(&m);
        assert!(tbaa.has_escaped(a));
    }

    #[test]
    fn invoke_argument_escapes_like_a_call() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let callee = b
            .function("sink", DataType::Void)
            .param("p", DataType::Pointer)
            .build()
            .unwrap();
        b.ret(None);
        let root = b.module().root();
        b.set_insertion_point(root);

        let f = b.function("f", DataType::Void).build().unwrap();
        let normal = b.block("normal");
        let except = b.block("except");
        let c = b.lit(1u32);
        let a = b.alloc(DataType::Int32, c).unwrap();
        let ptr = b.addr_of(a);
        b.set_insertion_point(f.region);
        b.invoke(callee.node, &[ptr], normal.entry, except.entry)
            .unwrap();

        let tbaa = run_tbaa(&m);
        assert!(tbaa.has_escaped(a));
    }

    #[test]
    fn restrict_pointers_do_not_alias() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let c = b.lit(1u32);
        let pointee = b.alloc(DataType::Int32, c).unwrap();
        let f = b
            .function("f", DataType::Void)
            .param_ptr("p", pointee, PtrQualifier::RESTRICT)
            .param_ptr("q", pointee, PtrQualifier::RESTRICT)
            .build()
            .unwrap();
        let v = b.lit(1i32);
        let s1 = b.ptr_store(v, f.params[0]).unwrap();
        let s2 = b.ptr_store(v, f.params[1]).unwrap();
        b.ret(None);

        let tbaa = run_tbaa(&m);
        assert_eq!(tbaa.alias(&m, s1, s2), AliasKind::NoAlias);
    }

    #[test]
    fn overlap_rule_detects_partial_overlap() {
        let a = MemoryLocation {
            site: NodeId::from_u32(1),
            offset: Some(0),
            size: 8,
            access_type: DataType::Int64,
        };
        let b = MemoryLocation {
            site: NodeId::from_u32(1),
            offset: Some(4),
            size: 4,
            access_type: DataType::Int32,
        };
        assert_eq!(check_memory_overlap(&a, &b), AliasKind::PartialAlias);

        let c = MemoryLocation {
            site: NodeId::from_u32(1),
            offset: Some(8),
            size: 4,
            access_type: DataType::Int32,
        };
        assert_eq!(check_memory_overlap(&b, &c), AliasKind::NoAlias);
        assert_eq!(check_memory_overlap(&b, &b), AliasKind::MustAlias);
    }
}
