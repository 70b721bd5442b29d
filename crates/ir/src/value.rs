//! Typed value and type-descriptor payloads.
//!
//! [`TypedData`] is the payload slot on every node. Depending on the
//! node's opcode it carries either a literal value (LIT nodes) or a type
//! descriptor (pointer/array/struct/vector/function shapes). The active
//! variant always corresponds to the node's `ty` field; accessors return
//! [`IrError::TypeMismatch`] when queried with the wrong kind.

use bitflags::bitflags;

use crate::error::IrError;
use crate::interner::StrId;
use crate::node::NodeId;
use crate::types::DataType;

bitflags! {
    /// Pointer-type qualifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PtrQualifier: u8 {
        /// Data pointed to is immutable and will not escape.
        const CONST = 1 << 0;
        /// No aliasing with other pointers.
        const RESTRICT = 1 << 1;
        /// Function only writes through this pointer, never reads.
        const WRITEONLY = 1 << 2;
        /// The pointer itself cannot be modified.
        const NOMUTABLE = 1 << 3;
    }
}

/// Pointer type descriptor.
///
/// A self-referential pointer (e.g. a linked-list `next` field) is
/// recorded as `pointee: None`; the surrounding struct's interned name
/// resolves it by lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct PointerData {
    pub pointee: Option<NodeId>,
    pub addr_space: u32,
    pub qualifier: PtrQualifier,
}

/// Array type descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayData {
    pub elements: Vec<NodeId>,
    pub elem_type: DataType,
    pub count: u32,
}

/// One struct field: interned name, semantic type, nested payload for
/// aggregate field types.
#[derive(Clone, Debug, PartialEq)]
pub struct StructField {
    pub name: StrId,
    pub ty: DataType,
    pub data: TypedData,
}

/// Struct type descriptor. Field order is layout order; padding fields
/// carry a `__pad` name prefix and are skipped when counting logical
/// fields.
#[derive(Clone, Debug, PartialEq)]
pub struct StructData {
    pub fields: Vec<StructField>,
    pub alignment: u32,
    pub name: StrId,
}

/// Vector type descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorData {
    pub elem_type: DataType,
    pub lane_count: u32,
}

/// Function type descriptor. Parameter types are recoverable from the
/// function node's PARAM inputs; the return type is stored directly so
/// recursive functions need no inference.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionData {
    pub return_type: Box<TypedData>,
}

/// Type-erased value carrier, one variant per [`DataType`].
#[derive(Clone, Debug, PartialEq, Default)]
pub enum TypedData {
    #[default]
    Void,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    Pointer(PointerData),
    Array(ArrayData),
    Struct(StructData),
    Function(FunctionData),
    Vector(VectorData),
}

impl TypedData {
    /// Zero-value payload for a scalar kind; aggregate kinds default to
    /// VOID because their descriptors need explicit construction.
    pub fn default_for(ty: DataType) -> TypedData {
        match ty {
            DataType::Bool => TypedData::Bool(false),
            DataType::Int8 => TypedData::Int8(0),
            DataType::Int16 => TypedData::Int16(0),
            DataType::Int32 => TypedData::Int32(0),
            DataType::Int64 => TypedData::Int64(0),
            DataType::Uint8 => TypedData::Uint8(0),
            DataType::Uint16 => TypedData::Uint16(0),
            DataType::Uint32 => TypedData::Uint32(0),
            DataType::Uint64 => TypedData::Uint64(0),
            DataType::Float32 => TypedData::Float32(0.0),
            DataType::Float64 => TypedData::Float64(0.0),
            _ => TypedData::Void,
        }
    }

    /// The [`DataType`] of the active variant.
    pub fn kind(&self) -> DataType {
        match self {
            TypedData::Void => DataType::Void,
            TypedData::Bool(_) => DataType::Bool,
            TypedData::Int8(_) => DataType::Int8,
            TypedData::Int16(_) => DataType::Int16,
            TypedData::Int32(_) => DataType::Int32,
            TypedData::Int64(_) => DataType::Int64,
            TypedData::Uint8(_) => DataType::Uint8,
            TypedData::Uint16(_) => DataType::Uint16,
            TypedData::Uint32(_) => DataType::Uint32,
            TypedData::Uint64(_) => DataType::Uint64,
            TypedData::Float32(_) => DataType::Float32,
            TypedData::Float64(_) => DataType::Float64,
            TypedData::Pointer(_) => DataType::Pointer,
            TypedData::Array(_) => DataType::Array,
            TypedData::Struct(_) => DataType::Struct,
            TypedData::Function(_) => DataType::Function,
            TypedData::Vector(_) => DataType::Vector,
        }
    }

    /// Integer value of a literal payload, sign-extended to `i64`.
    /// `None` for non-integer variants.
    pub fn int_value(&self) -> Option<i64> {
        match *self {
            TypedData::Bool(v) => Some(v as i64),
            TypedData::Int8(v) => Some(v as i64),
            TypedData::Int16(v) => Some(v as i64),
            TypedData::Int32(v) => Some(v as i64),
            TypedData::Int64(v) => Some(v),
            TypedData::Uint8(v) => Some(v as i64),
            TypedData::Uint16(v) => Some(v as i64),
            TypedData::Uint32(v) => Some(v as i64),
            TypedData::Uint64(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Float value of a literal payload, widened to `f64`.
    pub fn float_value(&self) -> Option<f64> {
        match *self {
            TypedData::Float32(v) => Some(v as f64),
            TypedData::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// Bit pattern of a literal payload, used for hashing. Floats hash by
    /// exact bits so `+0.0` and `-0.0` stay distinct.
    pub fn bit_pattern(&self) -> Option<u64> {
        match *self {
            TypedData::Bool(v) => Some(v as u64),
            TypedData::Int8(v) => Some(v as u8 as u64),
            TypedData::Int16(v) => Some(v as u16 as u64),
            TypedData::Int32(v) => Some(v as u32 as u64),
            TypedData::Int64(v) => Some(v as u64),
            TypedData::Uint8(v) => Some(v as u64),
            TypedData::Uint16(v) => Some(v as u64),
            TypedData::Uint32(v) => Some(v as u64),
            TypedData::Uint64(v) => Some(v),
            TypedData::Float32(v) => Some(v.to_bits() as u64),
            TypedData::Float64(v) => Some(v.to_bits()),
            _ => None,
        }
    }

    fn mismatch(&self, expected: DataType) -> IrError {
        IrError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_pointer(&self) -> Result<&PointerData, IrError> {
        match self {
            TypedData::Pointer(p) => Ok(p),
            other => Err(other.mismatch(DataType::Pointer)),
        }
    }

    pub fn as_pointer_mut(&mut self) -> Result<&mut PointerData, IrError> {
        match self {
            TypedData::Pointer(p) => Ok(p),
            other => {
                let found = other.kind();
                Err(IrError::TypeMismatch {
                    expected: DataType::Pointer,
                    found,
                })
            }
        }
    }

    pub fn as_array(&self) -> Result<&ArrayData, IrError> {
        match self {
            TypedData::Array(a) => Ok(a),
            other => Err(other.mismatch(DataType::Array)),
        }
    }

    pub fn as_struct(&self) -> Result<&StructData, IrError> {
        match self {
            TypedData::Struct(s) => Ok(s),
            other => Err(other.mismatch(DataType::Struct)),
        }
    }

    pub fn as_vector(&self) -> Result<&VectorData, IrError> {
        match self {
            TypedData::Vector(v) => Ok(v),
            other => Err(other.mismatch(DataType::Vector)),
        }
    }

    pub fn as_function(&self) -> Result<&FunctionData, IrError> {
        match self {
            TypedData::Function(func) => Ok(func),
            other => Err(other.mismatch(DataType::Function)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_active_variant() {
        assert_eq!(TypedData::Void.kind(), DataType::Void);
        assert_eq!(TypedData::Int32(7).kind(), DataType::Int32);
        assert_eq!(TypedData::Float64(1.5).kind(), DataType::Float64);
    }

    #[test]
    fn wrong_kind_access_reports_mismatch() {
        let v = TypedData::Int32(1);
        let err = v.as_pointer().unwrap_err();
        assert_eq!(
            err,
            IrError::TypeMismatch {
                expected: DataType::Pointer,
                found: DataType::Int32,
            }
        );
    }

    #[test]
    fn signed_zero_bit_patterns_differ() {
        let pos = TypedData::Float32(0.0).bit_pattern();
        let neg = TypedData::Float32(-0.0).bit_pattern();
        assert_ne!(pos, neg);
    }

    #[test]
    fn int_value_extracts_all_integer_widths() {
        assert_eq!(TypedData::Int8(-3).int_value(), Some(-3));
        assert_eq!(TypedData::Uint64(9).int_value(), Some(9));
        assert_eq!(TypedData::Float32(1.0).int_value(), None);
    }
}
