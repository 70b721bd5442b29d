//! Arc code generation: selection DAG, pattern-driven instruction
//! selection and hierarchical register allocation.
//!
//! The layer is parameterised over a target contract
//! ([`TargetInstruction`] + [`TargetArch`]); no opcode set or register
//! file is embedded here. Per region, the flow is: lower aggregate
//! accesses ([`LowerAccessPass`]), build a [`SelectionDag`], match
//! patterns with an [`InstructionSelector`], then hand the linearised
//! DAG to the [`RegisterAllocator`].

pub mod dag;
pub mod error;
pub mod lowering;
pub mod regalloc;
pub mod selector;
pub mod target;

pub use dag::{DagId, DagKind, DagNode, SelectionDag, SelectionState};
pub use error::CodegenError;
pub use lowering::LowerAccessPass;
pub use regalloc::{AllocRequest, AllocResult, Budget, Constraints, RegisterAllocator};
pub use selector::{InstructionSelector, Pattern};
pub use target::{
    Instruction, InstructionList, Operand, OperandKind, RegisterClass, TargetArch,
    TargetInstruction,
};
