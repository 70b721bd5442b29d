//! IR construction and access error types.

use crate::types::DataType;

/// Error type for IR construction and typed-value access.
///
/// This allows proper error propagation using `?` for builder misuse
/// (invalid operands, bad field names) and typed-payload access with the
/// wrong kind.
#[derive(Debug, Clone, PartialEq)]
pub enum IrError {
    /// A construction primitive received an operand it cannot accept
    /// (e.g. `ptr_load` on a non-pointer, empty vector build).
    InvalidOperand(String),
    /// A typed payload was accessed with a kind other than the one stored.
    TypeMismatch {
        expected: DataType,
        found: DataType,
    },
    /// A struct field name was not found during `access` construction.
    UnknownField(String),
    /// A struct field index was outside the logical field count.
    FieldIndexOutOfBounds { index: usize, count: usize },
    /// A structural invariant was violated (ENTRY placement, FUNCTION
    /// node encountered where a region body is required).
    Structural(String),
}

impl std::fmt::Display for IrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrError::InvalidOperand(msg) => write!(f, "invalid operand: {}", msg),
            IrError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {:?}, found {:?}", expected, found)
            }
            IrError::UnknownField(name) => write!(f, "unknown struct field '{}'", name),
            IrError::FieldIndexOutOfBounds { index, count } => {
                write!(f, "struct field index {} out of bounds ({} fields)", index, count)
            }
            IrError::Structural(msg) => write!(f, "structural invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for IrError {}
