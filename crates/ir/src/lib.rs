//! Arc IR — typed SSA intermediate representation.
//!
//! The IR is a graph of typed [`Node`]s owned by a [`Module`] and grouped
//! into a tree of [`Region`]s (structured control-flow scopes). Use-def
//! edges are bidirectional and kept coherent by the mutation helpers on
//! `Module`; regions hold ordered node lists whose first node is always
//! the region's unique ENTRY.
//!
//! # Building IR
//!
//! ```
//! use arc_ir::{Builder, DataType, Module};
//!
//! let mut module = Module::new("demo");
//! let mut b = Builder::new(&mut module);
//! let f = b.function("answer", DataType::Int32).build().unwrap();
//! let value = b.lit(42i32);
//! b.ret(Some(value));
//! assert_eq!(module.function_region(f.node), Some(f.region));
//! ```

pub mod builder;
pub mod dump;
pub mod error;
pub mod interner;
pub mod module;
pub mod node;
pub mod region;
pub mod types;
pub mod value;
pub mod verify;

pub use builder::{Block, Builder, Function, FunctionBuilder, LiteralValue, StructBuilder};
pub use error::IrError;
pub use interner::{StrId, StringTable};
pub use module::Module;
pub use node::{AtomicOrdering, Node, NodeId, NodeTraits, Opcode};
pub use region::{Region, RegionId};
pub use types::DataType;
pub use value::{
    ArrayData, FunctionData, PointerData, PtrQualifier, StructData, StructField, TypedData,
    VectorData,
};
pub use verify::{verify_module, Violation};
