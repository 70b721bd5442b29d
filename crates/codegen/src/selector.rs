//! Pattern-driven instruction selection.
//!
//! A registry of `(predicate, generator, priority, name)` patterns kept
//! in decreasing priority order. Selecting a node runs the first pattern
//! whose predicate accepts it; the generator rewrites the node into
//! instruction form using the DAG's `make_*` constructors.

use tracing::trace;

use crate::dag::{DagId, DagKind, SelectionDag, SelectionState};
use crate::error::CodegenError;
use crate::target::TargetInstruction;

type Predicate<T> = Box<dyn Fn(&SelectionDag<T>, DagId) -> bool>;
type Generator<T> = Box<dyn Fn(&mut SelectionDag<T>, DagId)>;

/// One selection pattern.
pub struct Pattern<T: TargetInstruction> {
    pub name: &'static str,
    pub priority: u32,
    predicate: Predicate<T>,
    generator: Generator<T>,
}

impl<T: TargetInstruction> Pattern<T> {
    pub fn new(
        name: &'static str,
        priority: u32,
        predicate: impl Fn(&SelectionDag<T>, DagId) -> bool + 'static,
        generator: impl Fn(&mut SelectionDag<T>, DagId) + 'static,
    ) -> Self {
        Pattern {
            name,
            priority,
            predicate: Box::new(predicate),
            generator: Box::new(generator),
        }
    }
}

/// Priority-ordered pattern registry.
pub struct InstructionSelector<T: TargetInstruction> {
    patterns: Vec<Pattern<T>>,
}

impl<T: TargetInstruction> Default for InstructionSelector<T> {
    fn default() -> Self {
        InstructionSelector {
            patterns: Vec::new(),
        }
    }
}

impl<T: TargetInstruction> InstructionSelector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern, keeping the registry sorted by decreasing
    /// priority. Insertion order breaks ties.
    pub fn add_pattern(&mut self, pattern: Pattern<T>) {
        let pos = self
            .patterns
            .iter()
            .position(|p| p.priority < pattern.priority)
            .unwrap_or(self.patterns.len());
        self.patterns.insert(pos, pattern);
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Try patterns in priority order; the first match rewrites the node
    /// and marks it SELECTED.
    pub fn select(&self, dag: &mut SelectionDag<T>, node: DagId) -> bool {
        if dag.node(node).state.contains(SelectionState::SELECTED) {
            return true;
        }
        for pattern in &self.patterns {
            if (pattern.predicate)(dag, node) {
                trace!(pattern = pattern.name, "pattern matched");
                (pattern.generator)(dag, node);
                dag.node_mut(node).state |= SelectionState::SELECTED;
                return true;
            }
        }
        false
    }

    /// Select every unselected selectable node. Operand leaves and chain
    /// plumbing need no selection.
    pub fn select_all(&self, dag: &mut SelectionDag<T>) -> Result<usize, CodegenError> {
        let mut selected = 0usize;
        for node in dag.ids().collect::<Vec<_>>() {
            let kind = dag.node(node).kind;
            if !matches!(kind, DagKind::Value | DagKind::Instruction) {
                continue;
            }
            if dag.node(node).state.contains(SelectionState::SELECTED) {
                continue;
            }
            if !self.select(dag, node) {
                return Err(CodegenError::NoMatchingPattern {
                    value_id: dag.node(node).value_id,
                });
            }
            selected += 1;
        }
        Ok(selected)
    }
}

/// Instruction-form constructors used by pattern generators.
impl<T: TargetInstruction> SelectionDag<T> {
    /// Synthesise an instruction node over existing operands. Operand
    /// and user edges stay symmetric.
    pub fn make_instruction(&mut self, opcode: T::Opcode, operands: &[DagId]) -> DagId {
        let insn = self.make_node(DagKind::Instruction);
        self.node_mut(insn).opcode = Some(opcode);
        for &operand in operands {
            self.add_operand(insn, operand);
        }
        insn
    }

    /// Rewrite a matched value node into instruction form in place.
    pub fn rewrite_as_instruction(&mut self, node: DagId, opcode: T::Opcode) {
        let n = self.node_mut(node);
        n.kind = DagKind::Instruction;
        n.opcode = Some(opcode);
    }
}
