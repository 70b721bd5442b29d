//! Machine-independent analyses.

pub mod call_graph;
pub mod tbaa;

pub use call_graph::{build_call_graph, CallEdge, CallGraphPass, CallGraphResult, ParamInfo};
pub use tbaa::{
    check_memory_overlap, trace_pointer_base, AliasKind, MemoryLocation, TbaaPass, TbaaResult,
};
