//! Top-level owning container for a compilation unit.
//!
//! The module owns every IR entity: the string table, the node arena,
//! the region tree (rooted at [`Module::root`], with a `rodata` region
//! for module-scope constants), the ordered function list and the named
//! type registry. Nodes and regions are addressed by copyable ids;
//! `inputs`/`users` edges are ids, never owners, and every mutation goes
//! through the helpers here so the two sides stay coherent.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::IrError;
use crate::interner::{StrId, StringTable};
use crate::node::{Node, NodeId, Opcode};
use crate::region::{Region, RegionId};
use crate::types::DataType;
use crate::value::{PtrQualifier, TypedData};

/// Top-level owning container.
#[derive(Debug)]
pub struct Module {
    name: StrId,
    strings: StringTable,
    nodes: Vec<Node>,
    regions: Vec<Region>,
    root: RegionId,
    rodata: RegionId,
    functions: Vec<NodeId>,
    named_types: HashMap<StrId, TypedData>,
}

impl Module {
    /// Create a module with its root and `rodata` regions.
    pub fn new(name: &str) -> Self {
        let mut strings = StringTable::new();
        let module_name = strings.intern(name);
        let root_name = strings.intern("__root");
        let rodata_name = strings.intern("__rodata");

        let mut module = Module {
            name: module_name,
            strings,
            nodes: Vec::new(),
            regions: Vec::new(),
            root: RegionId(0),
            rodata: RegionId(0),
            functions: Vec::new(),
            named_types: HashMap::new(),
        };

        module.root = module.create_region_raw(root_name, None);
        module.rodata = module.create_region_raw(rodata_name, Some(module.root));
        module
    }

    pub fn name(&self) -> &str {
        self.strings.get(self.name)
    }

    pub fn root(&self) -> RegionId {
        self.root
    }

    pub fn rodata(&self) -> RegionId {
        self.rodata
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn intern(&mut self, s: &str) -> StrId {
        self.strings.intern(s)
    }

    // Entity access

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id.index()]
    }

    /// Total number of nodes ever created (the arena does not reclaim
    /// slots; removal only detaches nodes from regions and edges).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Iterate every region id in the arena.
    pub fn region_ids(&self) -> impl Iterator<Item = RegionId> + '_ {
        (0..self.regions.len()).map(RegionId::new)
    }

    /// Iterate every node id in the arena, including detached ones.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId::new)
    }

    // Region tree

    fn create_region_raw(&mut self, name: StrId, parent: Option<RegionId>) -> RegionId {
        let id = RegionId::new(self.regions.len());
        self.regions.push(Region {
            name,
            parent,
            children: Vec::new(),
            nodes: Vec::new(),
        });
        if let Some(p) = parent {
            self.regions[p.index()].children.push(id);
        }
        // Every region starts with its ENTRY node.
        let entry = self.new_node(Opcode::Entry, DataType::Void);
        self.nodes[entry.index()].parent = Some(id);
        self.regions[id.index()].nodes.push(entry);
        id
    }

    /// Create a region under `parent` (the root region when `None`).
    pub fn create_region(&mut self, name: &str, parent: Option<RegionId>) -> RegionId {
        let name = self.strings.intern(name);
        let parent = parent.or(Some(self.root));
        self.create_region_raw(name, parent)
    }

    pub fn region_name(&self, region: RegionId) -> &str {
        self.strings.get(self.regions[region.index()].name)
    }

    // Functions and named types

    pub fn add_function(&mut self, func: NodeId) {
        if !self.functions.contains(&func) {
            self.functions.push(func);
        }
    }

    pub fn functions(&self) -> &[NodeId] {
        &self.functions
    }

    /// The body region of a function node: the root child sharing the
    /// function's interned name.
    pub fn function_region(&self, func: NodeId) -> Option<RegionId> {
        let name = self.node(func).name?;
        self.region(self.root)
            .children
            .iter()
            .copied()
            .find(|&r| self.region(r).name == name)
    }

    /// The function whose body subtree contains `region`, found by
    /// walking to the root child and matching its name.
    pub fn containing_function(&self, region: RegionId) -> Option<NodeId> {
        let mut current = region;
        loop {
            let parent = self.region(current).parent?;
            if parent == self.root {
                break;
            }
            current = parent;
        }
        let name = self.region(current).name;
        self.functions
            .iter()
            .copied()
            .find(|&f| self.node(f).name == Some(name))
    }

    pub fn register_type(&mut self, name: &str, ty: TypedData) {
        let id = self.strings.intern(name);
        self.named_types.insert(id, ty);
    }

    pub fn named_type(&self, name: &str) -> Option<&TypedData> {
        let id = self.strings.find(name)?;
        self.named_types.get(&id)
    }

    // Node creation

    /// Create a detached node. Attach it with [`Module::append`] or one of
    /// the positional inserts.
    pub fn new_node(&mut self, op: Opcode, ty: DataType) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Node::new(op, ty));
        id
    }

    /// Create a detached integer literal of the given type. Types outside
    /// the integer family fall back to UINT64, as the lowering rewrite
    /// expects for synthesised offsets.
    pub fn new_int_literal(&mut self, value: i64, ty: DataType) -> NodeId {
        let (ty, payload) = match ty {
            DataType::Int8 => (ty, TypedData::Int8(value as i8)),
            DataType::Int16 => (ty, TypedData::Int16(value as i16)),
            DataType::Int32 => (ty, TypedData::Int32(value as i32)),
            DataType::Int64 => (ty, TypedData::Int64(value)),
            DataType::Uint8 => (ty, TypedData::Uint8(value as u8)),
            DataType::Uint16 => (ty, TypedData::Uint16(value as u16)),
            DataType::Uint32 => (ty, TypedData::Uint32(value as u32)),
            DataType::Uint64 => (ty, TypedData::Uint64(value as u64)),
            _ => (DataType::Uint64, TypedData::Uint64(value as u64)),
        };
        let id = self.new_node(Opcode::Lit, ty);
        self.nodes[id.index()].value = payload;
        id
    }

    // Region node-list mutation

    /// Append a node to a region. ENTRY nodes go to index 0; appending a
    /// second ENTRY is a no-op. A node already in another region is moved.
    pub fn append(&mut self, region: RegionId, node: NodeId) {
        if let Some(prev) = self.node(node).parent {
            if prev != region {
                self.remove_from_region(node);
            }
        }
        if self.region(region).nodes.contains(&node) {
            return;
        }

        let is_entry = self.node(node).op == Opcode::Entry;
        if is_entry {
            if self.entry_of(region).is_some() {
                return;
            }
            self.regions[region.index()].nodes.insert(0, node);
        } else {
            self.regions[region.index()].nodes.push(node);
        }
        self.nodes[node.index()].parent = Some(region);
    }

    /// Insert `node` before `before` in its region; inserting before the
    /// ENTRY lands immediately after it instead.
    pub fn insert_before(&mut self, region: RegionId, before: NodeId, node: NodeId) {
        if !self.region(region).nodes.contains(&before) {
            return;
        }
        if self.node(node).parent.is_some() {
            self.remove_from_region(node);
        }
        let Some(pos) = self.region(region).nodes.iter().position(|&n| n == before) else {
            return;
        };
        let pos = if pos == 0 && self.node(before).op == Opcode::Entry {
            1
        } else {
            pos
        };
        self.regions[region.index()].nodes.insert(pos, node);
        self.nodes[node.index()].parent = Some(region);
    }

    /// Insert `node` immediately after `after` in its region.
    pub fn insert_after(&mut self, region: RegionId, after: NodeId, node: NodeId) {
        if !self.region(region).nodes.contains(&after) {
            return;
        }
        if self.node(node).parent.is_some() {
            self.remove_from_region(node);
        }
        let Some(pos) = self.region(region).nodes.iter().position(|&n| n == after) else {
            return;
        };
        self.regions[region.index()].nodes.insert(pos + 1, node);
        self.nodes[node.index()].parent = Some(region);
    }

    /// Insert at the top of the region, after the ENTRY if present.
    /// FROM nodes are placed here.
    pub fn insert_at_top(&mut self, region: RegionId, node: NodeId) {
        if self.node(node).parent.is_some() {
            self.remove_from_region(node);
        }
        let pos = if self.entry_of(region).is_some() { 1 } else { 0 };
        self.regions[region.index()].nodes.insert(pos, node);
        self.nodes[node.index()].parent = Some(region);
    }

    /// Detach a node from its region's node list. Edges are untouched;
    /// use [`Module::drop_edges`] to sever use-def links as well.
    pub fn remove_from_region(&mut self, node: NodeId) {
        let Some(region) = self.node(node).parent else {
            return;
        };
        let nodes = &mut self.regions[region.index()].nodes;
        if let Some(pos) = nodes.iter().position(|&n| n == node) {
            nodes.remove(pos);
        }
        self.nodes[node.index()].parent = None;
    }

    /// Replace `old` with `new` in a region's node list. With `rewire`,
    /// also redirect users of `old` to `new`, transfer inputs when `new`
    /// has none, and clear `old`'s edges.
    pub fn replace_in_region(
        &mut self,
        region: RegionId,
        old: NodeId,
        new: NodeId,
        rewire: bool,
    ) -> bool {
        let Some(pos) = self.region(region).nodes.iter().position(|&n| n == old) else {
            return false;
        };
        self.regions[region.index()].nodes[pos] = new;
        self.nodes[new.index()].parent = Some(region);
        self.nodes[old.index()].parent = None;

        if rewire {
            self.replace_all_uses(old, new);
            if self.node(new).inputs.is_empty() && !self.node(old).inputs.is_empty() {
                let inputs: SmallVec<[NodeId; 4]> = self.node(old).inputs.clone();
                for &input in &inputs {
                    self.nodes[new.index()].inputs.push(input);
                    let users = &mut self.nodes[input.index()].users;
                    if let Some(p) = users.iter().position(|&u| u == old) {
                        users[p] = new;
                    } else {
                        users.push(new);
                    }
                }
            }
            self.nodes[old.index()].users.clear();
            self.nodes[old.index()].inputs.clear();
        }
        true
    }

    // Use-def edges

    /// Append operands to a node, mirroring the users side.
    pub fn connect_inputs(&mut self, node: NodeId, inputs: &[NodeId]) {
        for &input in inputs {
            self.nodes[node.index()].inputs.push(input);
            if !self.nodes[input.index()].users.contains(&node) {
                self.nodes[input.index()].users.push(node);
            }
        }
    }

    /// Replace every occurrence of `old` in `user`'s input list with
    /// `new`, keeping both users lists coherent.
    pub fn replace_input(&mut self, user: NodeId, old: NodeId, new: NodeId) {
        let mut replaced = false;
        for i in 0..self.nodes[user.index()].inputs.len() {
            if self.nodes[user.index()].inputs[i] == old {
                self.nodes[user.index()].inputs[i] = new;
                replaced = true;
            }
        }
        if !replaced {
            return;
        }
        let users = &mut self.nodes[old.index()].users;
        if let Some(pos) = users.iter().position(|&u| u == user) {
            users.remove(pos);
        }
        if !self.nodes[new.index()].users.contains(&user) {
            self.nodes[new.index()].users.push(user);
        }
    }

    /// Redirect every user of `old` to `new`. `old` keeps its inputs.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let users: SmallVec<[NodeId; 4]> = self.node(old).users.clone();
        for &user in &users {
            for i in 0..self.nodes[user.index()].inputs.len() {
                if self.nodes[user.index()].inputs[i] == old {
                    self.nodes[user.index()].inputs[i] = new;
                }
            }
            if !self.nodes[new.index()].users.contains(&user) {
                self.nodes[new.index()].users.push(user);
            }
        }
        self.nodes[old.index()].users.clear();
    }

    /// Sever all edges of a node: remove it from its inputs' users lists
    /// and clear its own input list. Users keep pointing at it only if
    /// the caller has not redirected them first.
    pub fn drop_edges(&mut self, node: NodeId) {
        let inputs: SmallVec<[NodeId; 4]> = self.node(node).inputs.clone();
        for &input in &inputs {
            let users = &mut self.nodes[input.index()].users;
            if let Some(pos) = users.iter().position(|&u| u == node) {
                users.remove(pos);
            }
        }
        self.nodes[node.index()].inputs.clear();
    }

    /// Fully delete a node: drop edges and detach from its region.
    pub fn erase_node(&mut self, node: NodeId) {
        self.drop_edges(node);
        self.remove_from_region(node);
    }

    // Pointer and struct helpers shared by analyses and lowering

    /// Whether a node carries a pointer payload with the given qualifier.
    pub fn has_ptr_qualifier(&self, node: NodeId, qual: PtrQualifier) -> bool {
        match &self.node(node).value {
            TypedData::Pointer(p) => p.qualifier.contains(qual),
            _ => false,
        }
    }

    pub fn is_restrict_pointer(&self, node: NodeId) -> bool {
        self.has_ptr_qualifier(node, PtrQualifier::RESTRICT)
    }

    pub fn is_const_pointer(&self, node: NodeId) -> bool {
        self.has_ptr_qualifier(node, PtrQualifier::CONST)
    }

    pub fn is_writeonly_pointer(&self, node: NodeId) -> bool {
        self.has_ptr_qualifier(node, PtrQualifier::WRITEONLY)
    }

    /// Whether an interned name carries the padding prefix.
    pub fn is_pad_field(&self, name: StrId) -> bool {
        self.strings.get(name).starts_with("__pad")
    }

    /// Byte offset of logical struct field `index` in `struct_node`'s
    /// struct payload: the sum of all field sizes (padding included)
    /// preceding the index, counting only non-padding fields toward it.
    pub fn struct_field_offset(&self, struct_node: NodeId, index: usize) -> Result<u64, IrError> {
        let data = self.node(struct_node).value.as_struct()?;
        let mut offset = 0u64;
        let mut logical = 0usize;
        for field in &data.fields {
            if self.is_pad_field(field.name) {
                offset += field.ty.size_bytes();
                continue;
            }
            if logical == index {
                return Ok(offset);
            }
            offset += field.ty.size_bytes();
            logical += 1;
        }
        Err(IrError::FieldIndexOutOfBounds {
            index,
            count: logical,
        })
    }

    /// Number of non-padding fields in a struct payload.
    pub fn logical_field_count(&self, struct_node: NodeId) -> Result<usize, IrError> {
        let data = self.node(struct_node).value.as_struct()?;
        Ok(data
            .fields
            .iter()
            .filter(|f| !self.is_pad_field(f.name))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_module_has_root_and_rodata() {
        let m = Module::new("unit");
        assert_eq!(m.name(), "unit");
        assert_eq!(m.region(m.rodata()).parent(), Some(m.root()));
        // Both come with their ENTRY node pre-installed.
        assert!(m.entry_of(m.root()).is_some());
        assert!(m.entry_of(m.rodata()).is_some());
    }

    #[test]
    fn append_keeps_entry_first_and_unique() {
        let mut m = Module::new("unit");
        let r = m.create_region("blk", None);
        let v = m.new_node(Opcode::Lit, DataType::Int32);
        m.append(r, v);
        let extra_entry = m.new_node(Opcode::Entry, DataType::Void);
        m.append(r, extra_entry);
        let nodes = m.region(r).nodes();
        assert_eq!(m.node(nodes[0]).op, Opcode::Entry);
        assert_eq!(
            nodes.iter().filter(|&&n| m.node(n).op == Opcode::Entry).count(),
            1
        );
    }

    #[test]
    fn connect_inputs_mirrors_users() {
        let mut m = Module::new("unit");
        let a = m.new_node(Opcode::Lit, DataType::Int32);
        let b = m.new_node(Opcode::Lit, DataType::Int32);
        let add = m.new_node(Opcode::Add, DataType::Int32);
        m.connect_inputs(add, &[a, b]);
        assert!(m.node(a).users.contains(&add));
        assert!(m.node(b).users.contains(&add));
        assert_eq!(m.node(add).inputs.as_slice(), &[a, b]);
    }

    #[test]
    fn replace_all_uses_redirects_and_clears() {
        let mut m = Module::new("unit");
        let a = m.new_node(Opcode::Lit, DataType::Int32);
        let b = m.new_node(Opcode::Lit, DataType::Int32);
        let add = m.new_node(Opcode::Add, DataType::Int32);
        m.connect_inputs(add, &[a, a]);
        m.replace_all_uses(a, b);
        assert_eq!(m.node(add).inputs.as_slice(), &[b, b]);
        assert!(m.node(a).users.is_empty());
        assert!(m.node(b).users.contains(&add));
    }

    #[test]
    fn function_region_lookup_by_name() {
        let mut m = Module::new("unit");
        let f = m.new_node(Opcode::Function, DataType::Function);
        let name = m.intern("compute");
        m.node_mut(f).name = Some(name);
        m.add_function(f);
        let body = m.create_region("compute", None);
        assert_eq!(m.function_region(f), Some(body));
        let inner = m.create_region("compute.loop", Some(body));
        assert_eq!(m.containing_function(inner), Some(f));
    }
}
