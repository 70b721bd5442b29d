//! Code-generation error types.

use arc_ir::NodeId;

/// Error type for DAG construction and instruction selection.
#[derive(Debug, Clone, PartialEq)]
pub enum CodegenError {
    /// A FUNCTION node appeared inside a region being converted to a DAG.
    FunctionInRegion(NodeId),
    /// A vector operation was missing its vector-typed operand.
    MalformedVectorOp(NodeId),
    /// No pattern in the registry matched a node that needs selection.
    NoMatchingPattern { value_id: u32 },
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::FunctionInRegion(node) => {
                write!(f, "FUNCTION node {:?} inside a region DAG", node)
            }
            CodegenError::MalformedVectorOp(node) => {
                write!(f, "vector operation {:?} lacks a vector operand", node)
            }
            CodegenError::NoMatchingPattern { value_id } => {
                write!(f, "no pattern matched DAG value {}", value_id)
            }
        }
    }
}

impl std::error::Error for CodegenError {}
