//! Per-region selection DAG.
//!
//! A typed, chain-edged view of one region's nodes: every memory, call
//! or control-flow operation takes the region's chain root as an extra
//! operand so ordering survives into scheduling. Operand edges are
//! rebuilt from IR use-def edges after translation, and `linearize`
//! assigns the contiguous value ids the register allocator's live-range
//! numbering depends on.

use std::collections::{HashMap, VecDeque};

use bitflags::bitflags;
use smallvec::SmallVec;

use arc_ir::{DataType, Module, NodeId, Opcode, RegionId};

use crate::error::CodegenError;
use crate::target::{Operand, TargetInstruction};

/// Handle to a DAG node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DagId(u32);

impl DagId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn new(raw: usize) -> Self {
        DagId(raw as u32)
    }
}

/// Kind of DAG node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DagKind {
    /// Target instruction node.
    Instruction,
    /// Intermediate value producer.
    Value,
    /// Register operand.
    Register,
    /// Immediate operand.
    Immediate,
    /// Memory operand.
    Memory,
    /// Control/memory dependency chain.
    Chain,
    /// Entry point marker.
    Entry,
    /// Region boundary marker.
    RegionBoundary,
}

bitflags! {
    /// Selection progress of a node.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct SelectionState: u8 {
        const SELECTED = 1 << 0;
        const SCHEDULED = 1 << 1;
    }
}

/// One DAG node.
#[derive(Debug)]
pub struct DagNode<O> {
    pub kind: DagKind,
    /// Source IR node; `None` for synthetic operands.
    pub source: Option<NodeId>,
    /// Target opcode once selected.
    pub opcode: Option<O>,
    pub operands: SmallVec<[DagId; 4]>,
    pub users: SmallVec<[DagId; 4]>,
    /// Topological value identity assigned by `linearize`.
    pub value_id: u32,
    pub value_type: DataType,
    /// Leaf operand payload.
    pub operand: Operand,
    pub state: SelectionState,
}

impl<O> DagNode<O> {
    fn new(kind: DagKind) -> Self {
        DagNode {
            kind,
            source: None,
            opcode: None,
            operands: SmallVec::new(),
            users: SmallVec::new(),
            value_id: 0,
            value_type: DataType::Void,
            operand: Operand::default(),
            state: SelectionState::empty(),
        }
    }
}

/// Selection DAG over one region.
pub struct SelectionDag<T: TargetInstruction> {
    nodes: Vec<DagNode<T::Opcode>>,
    node_map: HashMap<NodeId, DagId>,
    entries: Vec<DagId>,
    chain_roots: Vec<DagId>,
    region: RegionId,
    next_value: u32,
}

impl<T: TargetInstruction> SelectionDag<T> {
    pub fn new(region: RegionId) -> Self {
        SelectionDag {
            nodes: Vec::new(),
            node_map: HashMap::new(),
            entries: Vec::new(),
            chain_roots: Vec::new(),
            region,
            next_value: 1,
        }
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn node(&self, id: DagId) -> &DagNode<T::Opcode> {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: DagId) -> &mut DagNode<T::Opcode> {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DagId> + '_ {
        (0..self.nodes.len()).map(DagId::new)
    }

    pub fn entries(&self) -> &[DagId] {
        &self.entries
    }

    pub fn chain_roots(&self) -> &[DagId] {
        &self.chain_roots
    }

    /// DAG image of an IR node.
    pub fn find(&self, ir: NodeId) -> Option<DagId> {
        self.node_map.get(&ir).copied()
    }

    pub fn make_node(&mut self, kind: DagKind) -> DagId {
        let id = DagId::new(self.nodes.len());
        self.nodes.push(DagNode::new(kind));
        id
    }

    pub fn make_imm(&mut self, ty: DataType, value: i64) -> DagId {
        let id = self.make_node(DagKind::Immediate);
        self.node_mut(id).value_type = ty;
        self.node_mut(id).operand = Operand::imm(value);
        id
    }

    pub fn make_reg(&mut self, ty: DataType, reg_id: u32) -> DagId {
        let id = self.make_node(DagKind::Register);
        self.node_mut(id).value_type = ty;
        self.node_mut(id).operand = Operand::reg(reg_id);
        id
    }

    pub fn make_mem(&mut self, ty: DataType, address: u32) -> DagId {
        let id = self.make_node(DagKind::Memory);
        self.node_mut(id).value_type = ty;
        self.node_mut(id).operand = Operand::mem(address);
        id
    }

    /// Append an operand edge, mirroring the users side.
    pub fn add_operand(&mut self, user: DagId, operand: DagId) {
        self.nodes[user.index()].operands.push(operand);
        if !self.nodes[operand.index()].users.contains(&user) {
            self.nodes[operand.index()].users.push(user);
        }
    }

    /// Build the DAG from the region's node list.
    pub fn build(&mut self, module: &Module) -> Result<(), CodegenError> {
        let entry_chain = self.make_node(DagKind::Entry);
        self.entries.push(entry_chain);
        self.chain_roots.push(entry_chain);

        let ir_nodes: Vec<NodeId> = module.region(self.region).nodes().to_vec();
        for ir in &ir_nodes {
            self.translate(module, *ir, entry_chain)?;
        }

        // Rebuild operand edges from IR use-def edges. FROM nodes wired
        // their cross-region operands during translation.
        for &ir in &ir_nodes {
            let Some(dag) = self.find(ir) else {
                continue;
            };
            if module.node(ir).op == Opcode::From {
                continue;
            }
            let inputs: Vec<NodeId> = module.node(ir).inputs.to_vec();
            for input in inputs {
                if let Some(input_dag) = self.find(input) {
                    self.add_operand(dag, input_dag);
                }
            }
        }
        Ok(())
    }

    fn translate(
        &mut self,
        module: &Module,
        ir: NodeId,
        chain: DagId,
    ) -> Result<(), CodegenError> {
        let node = module.node(ir);
        let dag = match node.op {
            // The region ENTRY is represented by the chain root itself.
            Opcode::Entry => return Ok(()),
            Opcode::Function => return Err(CodegenError::FunctionInRegion(ir)),
            Opcode::Exit => {
                let dag = self.make_node(DagKind::Chain);
                self.add_operand(dag, chain);
                dag
            }
            Opcode::Lit => {
                let value = node
                    .value
                    .int_value()
                    .or_else(|| node.value.bit_pattern().map(|b| b as i64))
                    .unwrap_or(0);
                let dag = self.make_imm(node.ty, value);
                dag
            }
            op if op.is_binary_arith()
                || op.is_comparison()
                || op.is_bitwise_binary()
                || op == Opcode::Bnot =>
            {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                dag
            }
            Opcode::Load | Opcode::PtrLoad | Opcode::AtomicLoad => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                // Memory ordering rides the chain.
                self.add_operand(dag, chain);
                dag
            }
            Opcode::Store | Opcode::PtrStore | Opcode::AtomicStore => {
                let dag = self.make_node(DagKind::Chain);
                self.add_operand(dag, chain);
                dag
            }
            Opcode::Alloc | Opcode::AddrOf | Opcode::PtrAdd => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = DataType::Pointer;
                dag
            }
            Opcode::Cast => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                dag
            }
            Opcode::Call | Opcode::Invoke | Opcode::AtomicCas => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                self.add_operand(dag, chain);
                dag
            }
            Opcode::Ret | Opcode::Branch | Opcode::Jump => {
                let dag = self.make_node(DagKind::Chain);
                self.add_operand(dag, chain);
                dag
            }
            Opcode::From => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                // FROM inputs may live in regions this DAG never sees;
                // wire them now through placeholder values.
                let inputs: Vec<NodeId> = node.inputs.to_vec();
                for input in inputs {
                    let input_dag = match self.find(input) {
                        Some(existing) => existing,
                        None => {
                            let placeholder = self.make_node(DagKind::Value);
                            self.node_mut(placeholder).source = Some(input);
                            self.node_mut(placeholder).value_type = module.node(input).ty;
                            self.node_mut(placeholder).value_id = self.next_value;
                            self.next_value += 1;
                            self.node_map.insert(input, placeholder);
                            placeholder
                        }
                    };
                    self.add_operand(dag, input_dag);
                }
                dag
            }
            Opcode::Param => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                dag
            }
            Opcode::VectorBuild | Opcode::VectorSplat => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = DataType::Vector;
                dag
            }
            Opcode::VectorExtract => {
                let elem = node
                    .inputs
                    .first()
                    .and_then(|&v| module.node(v).value.as_vector().ok())
                    .map(|v| v.elem_type)
                    .ok_or(CodegenError::MalformedVectorOp(ir))?;
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = elem;
                dag
            }
            _ => {
                let dag = self.make_node(DagKind::Value);
                self.node_mut(dag).value_type = node.ty;
                dag
            }
        };

        self.node_mut(dag).source = Some(ir);
        self.node_mut(dag).value_id = self.next_value;
        self.next_value += 1;
        self.node_map.insert(ir, dag);
        Ok(())
    }

    /// Kahn's topological sort over the operand graph.
    pub fn sort(&self) -> Vec<DagId> {
        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| n.operands.len())
            .collect();
        let mut ready: VecDeque<DagId> = VecDeque::new();
        for (i, &deg) in in_degree.iter().enumerate() {
            if deg == 0 {
                ready.push_back(DagId::new(i));
            }
        }

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(current) = ready.pop_front() {
            result.push(current);
            for &user in self.node(current).users.iter() {
                in_degree[user.index()] -= 1;
                if in_degree[user.index()] == 0 {
                    ready.push_back(user);
                }
            }
        }
        result
    }

    /// Label nodes with contiguous value ids in topological order; the
    /// register allocator's live ranges are defined over these ids.
    pub fn linearize(&mut self) {
        let sorted = self.sort();
        for (i, id) in sorted.into_iter().enumerate() {
            self.node_mut(id).value_id = (i + 1) as u32;
        }
    }
}
