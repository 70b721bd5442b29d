//! SSA value-graph nodes.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::interner::StrId;
use crate::region::RegionId;
use crate::types::DataType;
use crate::value::TypedData;

/// Handle to a node in the module's node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstruct an id from its raw index. The caller is responsible
    /// for the index being valid in the owning module.
    #[inline]
    pub fn from_u32(raw: u32) -> Self {
        NodeId(raw)
    }

    #[inline]
    pub(crate) fn new(raw: usize) -> Self {
        NodeId(raw as u32)
    }
}

/// Node opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Entry,
    Exit,
    Param,
    Lit,
    Function,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Bitwise
    Band,
    Bor,
    Bxor,
    Bnot,
    Bshl,
    Bshr,
    // Memory
    Load,
    Store,
    PtrLoad,
    PtrStore,
    AddrOf,
    PtrAdd,
    Alloc,
    AtomicLoad,
    AtomicStore,
    AtomicCas,
    // Control
    Call,
    Invoke,
    Ret,
    Branch,
    Jump,
    /// SSA merge of values arriving from different control paths.
    From,
    /// Semantic field/element access; lowered to PTR_ADD before codegen.
    Access,
    Cast,
    Select,
    // Vector
    VectorBuild,
    VectorExtract,
    VectorSplat,
}

impl Opcode {
    /// Terminators end a region: RET, JUMP, BRANCH, INVOKE. EXIT is not a
    /// terminator; it marks the register-restore point.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Ret | Opcode::Jump | Opcode::Branch | Opcode::Invoke
        )
    }

    pub fn is_memory_access(self) -> bool {
        matches!(
            self,
            Opcode::Load
                | Opcode::Store
                | Opcode::PtrLoad
                | Opcode::PtrStore
                | Opcode::AtomicLoad
                | Opcode::AtomicStore
        )
    }

    pub fn is_load(self) -> bool {
        matches!(self, Opcode::Load | Opcode::PtrLoad | Opcode::AtomicLoad)
    }

    pub fn is_store(self) -> bool {
        matches!(self, Opcode::Store | Opcode::PtrStore | Opcode::AtomicStore)
    }

    pub fn is_call(self) -> bool {
        matches!(self, Opcode::Call | Opcode::Invoke)
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::Band | Opcode::Bor | Opcode::Bxor
                | Opcode::Eq | Opcode::Neq
        )
    }

    pub fn is_binary_arith(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::Eq | Opcode::Neq | Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte
        )
    }

    pub fn is_bitwise_binary(self) -> bool {
        matches!(
            self,
            Opcode::Band | Opcode::Bor | Opcode::Bxor | Opcode::Bshl | Opcode::Bshr
        )
    }

    /// Nodes whose removal or reordering is observable.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            Opcode::Entry
                | Opcode::Exit
                | Opcode::Function
                | Opcode::Ret
                | Opcode::Call
                | Opcode::Invoke
                | Opcode::Store
                | Opcode::PtrStore
                | Opcode::AtomicStore
                | Opcode::AtomicCas
                | Opcode::Alloc
                | Opcode::Branch
                | Opcode::Jump
        )
    }
}

bitflags! {
    /// Node traits controlling linkage and optimisation behaviour.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct NodeTraits: u8 {
        /// External linkage.
        const EXPORT = 1 << 0;
        /// Program entry point.
        const DRIVER = 1 << 1;
        /// Imported; body lives outside the module.
        const EXTERN = 1 << 2;
        /// Inhibits all optimisation-time removal and reordering.
        const VOLATILE = 1 << 3;
    }
}

/// Memory ordering for atomic operations, carried as a literal operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AtomicOrdering {
    Relaxed = 0,
    Acquire = 1,
    Release = 2,
    AcqRel = 3,
    SeqCst = 4,
}

/// A node in the SSA value graph.
///
/// `inputs` are semantic operands in contract order (see the builder for
/// per-opcode conventions); `users` is the mirrored edge set. Both sides
/// are maintained together by the mutation helpers on
/// [`Module`](crate::Module) — never edit one without the other.
#[derive(Clone, Debug)]
pub struct Node {
    pub op: Opcode,
    pub ty: DataType,
    pub value: TypedData,
    pub inputs: SmallVec<[NodeId; 4]>,
    pub users: SmallVec<[NodeId; 4]>,
    pub parent: Option<RegionId>,
    pub traits: NodeTraits,
    pub name: Option<StrId>,
}

impl Node {
    pub(crate) fn new(op: Opcode, ty: DataType) -> Self {
        Node {
            op,
            ty,
            value: TypedData::Void,
            inputs: SmallVec::new(),
            users: SmallVec::new(),
            parent: None,
            traits: NodeTraits::empty(),
            name: None,
        }
    }

    pub fn is_volatile(&self) -> bool {
        self.traits.contains(NodeTraits::VOLATILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_set_matches_control_opcodes() {
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Branch.is_terminator());
        assert!(Opcode::Invoke.is_terminator());
        assert!(!Opcode::Exit.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }

    #[test]
    fn commutative_opcodes() {
        assert!(Opcode::Add.is_commutative());
        assert!(Opcode::Eq.is_commutative());
        assert!(!Opcode::Sub.is_commutative());
        assert!(!Opcode::Bshl.is_commutative());
    }
}
