//! IR construction API.
//!
//! A [`Builder`] is opened against a module with an insertion region
//! selected; every primitive appends to that region and returns the new
//! node's id. Construction fails with [`IrError::InvalidOperand`] for
//! operand-type mismatches (e.g. `ptr_load` on a non-pointer) and empty
//! vector builds.
//!
//! Pointer-operand conventions (part of the IR contract):
//! `store v, location` / `ptr_store v, ptr` put the value at `inputs[0]`
//! and the target at `inputs[1]`; loads take the address at `inputs[0]`;
//! `call`/`invoke` put the callee at `inputs[0]`, and for `invoke` the
//! normal and exception ENTRY targets at `inputs[1]`/`inputs[2]` with
//! arguments after them; `branch cond, then, else` has exactly three
//! inputs with ENTRY targets.

use crate::error::IrError;
use crate::module::Module;
use crate::node::{AtomicOrdering, NodeId, NodeTraits, Opcode};
use crate::region::RegionId;
use crate::types::DataType;
use crate::value::{
    ArrayData, FunctionData, PointerData, PtrQualifier, StructData, StructField, TypedData,
    VectorData,
};

/// Conversion from Rust primitives into literal payloads.
pub trait LiteralValue {
    fn into_typed(self) -> (DataType, TypedData);
}

macro_rules! impl_literal {
    ($($rust:ty => $dt:ident, $variant:ident;)*) => {
        $(impl LiteralValue for $rust {
            fn into_typed(self) -> (DataType, TypedData) {
                (DataType::$dt, TypedData::$variant(self))
            }
        })*
    };
}

impl_literal! {
    bool => Bool, Bool;
    i8 => Int8, Int8;
    i16 => Int16, Int16;
    i32 => Int32, Int32;
    i64 => Int64, Int64;
    u8 => Uint8, Uint8;
    u16 => Uint16, Uint16;
    u32 => Uint32, Uint32;
    u64 => Uint64, Uint64;
    f32 => Float32, Float32;
    f64 => Float64, Float64;
}

/// Main IR builder.
pub struct Builder<'m> {
    module: &'m mut Module,
    current: RegionId,
}

/// A declared function: its FUNCTION node, body region and parameters.
#[derive(Debug, Clone)]
pub struct Function {
    pub node: NodeId,
    pub region: RegionId,
    pub params: Vec<NodeId>,
}

/// A basic block: its region and the ENTRY node control flow targets.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub region: RegionId,
    pub entry: NodeId,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        let current = module.root();
        Builder { module, current }
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    pub fn set_insertion_point(&mut self, region: RegionId) {
        self.current = region;
    }

    pub fn insertion_point(&self) -> RegionId {
        self.current
    }

    fn create(&mut self, op: Opcode, ty: DataType) -> NodeId {
        let node = self.module.new_node(op, ty);
        self.module.append(self.current, node);
        node
    }

    // Literals and allocation

    pub fn lit(&mut self, value: impl LiteralValue) -> NodeId {
        let (ty, payload) = value.into_typed();
        let node = self.create(Opcode::Lit, ty);
        self.module.node_mut(node).value = payload;
        node
    }

    /// Allocate `count` elements of a scalar type.
    pub fn alloc(&mut self, elem: DataType, count: NodeId) -> Result<NodeId, IrError> {
        if !elem.is_numeric() && elem != DataType::Bool && elem != DataType::Pointer {
            return Err(IrError::InvalidOperand(format!(
                "cannot allocate scalar storage of type {:?}",
                elem
            )));
        }
        let node = self.create(Opcode::Alloc, elem);
        self.module.connect_inputs(node, &[count]);
        Ok(node)
    }

    /// Allocate storage for a struct type built by [`Builder::struct_type`].
    pub fn alloc_struct(&mut self, type_def: &TypedData) -> Result<NodeId, IrError> {
        type_def.as_struct()?;
        let count = self.lit(1u32);
        let node = self.create(Opcode::Alloc, DataType::Struct);
        self.module.node_mut(node).value = type_def.clone();
        self.module.connect_inputs(node, &[count]);
        Ok(node)
    }

    /// Allocate an array of `count` elements.
    pub fn alloc_array(&mut self, elem: DataType, count: u32) -> NodeId {
        let count_lit = self.lit(1u32);
        let node = self.create(Opcode::Alloc, DataType::Array);
        self.module.node_mut(node).value = TypedData::Array(ArrayData {
            elements: Vec::new(),
            elem_type: elem,
            count,
        });
        self.module.connect_inputs(node, &[count_lit]);
        node
    }

    // Memory

    pub fn load(&mut self, location: NodeId) -> Result<NodeId, IrError> {
        let ty = self.module.node(location).ty;
        let node = self.create(Opcode::Load, ty);
        self.module.connect_inputs(node, &[location]);
        Ok(node)
    }

    pub fn store(&mut self, value: NodeId, location: NodeId) -> Result<NodeId, IrError> {
        let node = self.create(Opcode::Store, DataType::Void);
        self.module.connect_inputs(node, &[value, location]);
        Ok(node)
    }

    pub fn ptr_load(&mut self, pointer: NodeId) -> Result<NodeId, IrError> {
        if self.module.node(pointer).ty != DataType::Pointer {
            return Err(IrError::InvalidOperand(
                "ptr_load requires a pointer operand".into(),
            ));
        }
        let pointee_ty = self
            .module
            .node(pointer)
            .value
            .as_pointer()
            .ok()
            .and_then(|p| p.pointee)
            .map(|p| self.module.node(p).ty)
            .unwrap_or(DataType::Void);
        let node = self.create(Opcode::PtrLoad, pointee_ty);
        self.module.connect_inputs(node, &[pointer]);
        Ok(node)
    }

    pub fn ptr_store(&mut self, value: NodeId, pointer: NodeId) -> Result<NodeId, IrError> {
        if self.module.node(pointer).ty != DataType::Pointer {
            return Err(IrError::InvalidOperand(
                "ptr_store requires a pointer operand".into(),
            ));
        }
        let node = self.create(Opcode::PtrStore, DataType::Void);
        self.module.connect_inputs(node, &[value, pointer]);
        Ok(node)
    }

    pub fn atomic_load(
        &mut self,
        location: NodeId,
        ordering: AtomicOrdering,
    ) -> Result<NodeId, IrError> {
        let ty = self.module.node(location).ty;
        let ord = self.lit(ordering as u8);
        let node = self.create(Opcode::AtomicLoad, ty);
        self.module.connect_inputs(node, &[location, ord]);
        Ok(node)
    }

    pub fn atomic_store(
        &mut self,
        value: NodeId,
        location: NodeId,
        ordering: AtomicOrdering,
    ) -> Result<NodeId, IrError> {
        let ord = self.lit(ordering as u8);
        let node = self.create(Opcode::AtomicStore, DataType::Void);
        self.module.connect_inputs(node, &[value, location, ord]);
        Ok(node)
    }

    /// Atomic compare-and-swap: `location, expected, desired, ordering`.
    /// Produces the previously stored value.
    pub fn atomic_cas(
        &mut self,
        location: NodeId,
        expected: NodeId,
        desired: NodeId,
        ordering: AtomicOrdering,
    ) -> Result<NodeId, IrError> {
        let ty = self.module.node(location).ty;
        let ord = self.lit(ordering as u8);
        let node = self.create(Opcode::AtomicCas, ty);
        self.module
            .connect_inputs(node, &[location, expected, desired, ord]);
        Ok(node)
    }

    pub fn addr_of(&mut self, variable: NodeId) -> NodeId {
        let node = self.create(Opcode::AddrOf, DataType::Pointer);
        self.module.node_mut(node).value = TypedData::Pointer(PointerData {
            pointee: Some(variable),
            addr_space: 0,
            qualifier: PtrQualifier::empty(),
        });
        self.module.connect_inputs(node, &[variable]);
        node
    }

    pub fn ptr_add(&mut self, base: NodeId, offset: NodeId) -> Result<NodeId, IrError> {
        if self.module.node(base).ty != DataType::Pointer {
            return Err(IrError::InvalidOperand(
                "ptr_add requires a pointer base".into(),
            ));
        }
        let node = self.create(Opcode::PtrAdd, DataType::Pointer);
        self.module.node_mut(node).value = self.module.node(base).value.clone();
        self.module.connect_inputs(node, &[base, offset]);
        Ok(node)
    }

    // Arithmetic, comparison, bitwise

    /// Create any binary operation with type inference appropriate to the
    /// opcode family.
    pub fn binary(&mut self, op: Opcode, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        let lt = self.module.node(lhs).ty;
        let rt = self.module.node(rhs).ty;
        let result = if op.is_comparison() {
            if DataType::promote(lt, rt).is_none() && lt != rt {
                return Err(IrError::InvalidOperand(format!(
                    "incomparable operand types {:?} and {:?}",
                    lt, rt
                )));
            }
            DataType::Bool
        } else if op.is_bitwise_binary() {
            if lt != rt || !lt.is_integer() {
                return Err(IrError::InvalidOperand(format!(
                    "bitwise op requires identical integer types, got {:?} and {:?}",
                    lt, rt
                )));
            }
            lt
        } else if op.is_binary_arith() {
            DataType::promote(lt, rt).ok_or_else(|| {
                IrError::InvalidOperand(format!(
                    "no common arithmetic type for {:?} and {:?}",
                    lt, rt
                ))
            })?
        } else {
            return Err(IrError::InvalidOperand(format!(
                "{:?} is not a binary operation",
                op
            )));
        };

        let node = self.create(op, result);
        self.module.connect_inputs(node, &[lhs, rhs]);
        Ok(node)
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Div, lhs, rhs)
    }

    pub fn rem(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Mod, lhs, rhs)
    }

    pub fn band(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Band, lhs, rhs)
    }

    pub fn bor(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Bor, lhs, rhs)
    }

    pub fn bxor(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Bxor, lhs, rhs)
    }

    pub fn bshl(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Bshl, lhs, rhs)
    }

    pub fn bshr(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Bshr, lhs, rhs)
    }

    pub fn bnot(&mut self, value: NodeId) -> Result<NodeId, IrError> {
        let ty = self.module.node(value).ty;
        if !ty.is_integer() {
            return Err(IrError::InvalidOperand(format!(
                "bnot requires an integer operand, got {:?}",
                ty
            )));
        }
        let node = self.create(Opcode::Bnot, ty);
        self.module.connect_inputs(node, &[value]);
        Ok(node)
    }

    pub fn eq(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Eq, lhs, rhs)
    }

    pub fn neq(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Neq, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Lt, lhs, rhs)
    }

    pub fn lte(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Lte, lhs, rhs)
    }

    pub fn gt(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Gt, lhs, rhs)
    }

    pub fn gte(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.binary(Opcode::Gte, lhs, rhs)
    }

    // Control flow

    pub fn call(&mut self, function: NodeId, args: &[NodeId]) -> Result<NodeId, IrError> {
        let ret_ty = self.function_return_type(function);
        let node = self.create(Opcode::Call, ret_ty);
        self.module.connect_inputs(node, &[function]);
        self.module.connect_inputs(node, args);
        Ok(node)
    }

    pub fn invoke(
        &mut self,
        function: NodeId,
        args: &[NodeId],
        normal: NodeId,
        exception: NodeId,
    ) -> Result<NodeId, IrError> {
        for &target in &[normal, exception] {
            if self.module.node(target).op != Opcode::Entry {
                return Err(IrError::InvalidOperand(
                    "invoke targets must be ENTRY nodes".into(),
                ));
            }
        }
        let ret_ty = self.function_return_type(function);
        let node = self.create(Opcode::Invoke, ret_ty);
        self.module.connect_inputs(node, &[function, normal, exception]);
        self.module.connect_inputs(node, args);
        Ok(node)
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        let node = self.create(Opcode::Ret, DataType::Void);
        if let Some(v) = value {
            self.module.connect_inputs(node, &[v]);
        }
        node
    }

    pub fn branch(
        &mut self,
        condition: NodeId,
        then_target: NodeId,
        else_target: NodeId,
    ) -> Result<NodeId, IrError> {
        if self.module.node(condition).ty != DataType::Bool {
            return Err(IrError::InvalidOperand(
                "branch condition must be BOOL".into(),
            ));
        }
        for &target in &[then_target, else_target] {
            if self.module.node(target).op != Opcode::Entry {
                return Err(IrError::InvalidOperand(
                    "branch targets must be ENTRY nodes".into(),
                ));
            }
        }
        let node = self.create(Opcode::Branch, DataType::Void);
        self.module
            .connect_inputs(node, &[condition, then_target, else_target]);
        Ok(node)
    }

    pub fn jump(&mut self, target: NodeId) -> Result<NodeId, IrError> {
        if self.module.node(target).op != Opcode::Entry {
            return Err(IrError::InvalidOperand(
                "jump target must be an ENTRY node".into(),
            ));
        }
        let node = self.create(Opcode::Jump, DataType::Void);
        self.module.connect_inputs(node, &[target]);
        Ok(node)
    }

    /// SSA merge of values arriving from different control paths; placed
    /// at the top of the insertion region, right after its ENTRY.
    pub fn from(&mut self, sources: &[NodeId]) -> Result<NodeId, IrError> {
        if sources.is_empty() {
            return Err(IrError::InvalidOperand(
                "from requires at least one source".into(),
            ));
        }
        let ty = self.module.node(sources[0]).ty;
        let node = self.module.new_node(Opcode::From, ty);
        self.module.insert_at_top(self.current, node);
        self.module.connect_inputs(node, sources);
        Ok(node)
    }

    pub fn cast(&mut self, value: NodeId, target: DataType) -> Result<NodeId, IrError> {
        let node = self.create(Opcode::Cast, target);
        self.module.connect_inputs(node, &[value]);
        Ok(node)
    }

    pub fn select(
        &mut self,
        condition: NodeId,
        then_value: NodeId,
        else_value: NodeId,
    ) -> Result<NodeId, IrError> {
        if self.module.node(condition).ty != DataType::Bool {
            return Err(IrError::InvalidOperand(
                "select condition must be BOOL".into(),
            ));
        }
        let ty = self.module.node(then_value).ty;
        let node = self.create(Opcode::Select, ty);
        self.module
            .connect_inputs(node, &[condition, then_value, else_value]);
        Ok(node)
    }

    // Vectors

    pub fn vector_build(&mut self, elements: &[NodeId]) -> Result<NodeId, IrError> {
        if elements.is_empty() {
            return Err(IrError::InvalidOperand(
                "vector build requires at least one element".into(),
            ));
        }
        let elem_type = self.module.node(elements[0]).ty;
        for &e in elements {
            if self.module.node(e).ty != elem_type {
                return Err(IrError::InvalidOperand(
                    "vector elements must share one type".into(),
                ));
            }
        }
        let node = self.create(Opcode::VectorBuild, DataType::Vector);
        self.module.node_mut(node).value = TypedData::Vector(VectorData {
            elem_type,
            lane_count: elements.len() as u32,
        });
        self.module.connect_inputs(node, elements);
        Ok(node)
    }

    pub fn vector_splat(&mut self, scalar: NodeId, lane_count: u32) -> Result<NodeId, IrError> {
        if lane_count == 0 {
            return Err(IrError::InvalidOperand(
                "vector splat requires a nonzero lane count".into(),
            ));
        }
        let elem_type = self.module.node(scalar).ty;
        let node = self.create(Opcode::VectorSplat, DataType::Vector);
        self.module.node_mut(node).value = TypedData::Vector(VectorData {
            elem_type,
            lane_count,
        });
        self.module.connect_inputs(node, &[scalar]);
        Ok(node)
    }

    pub fn vector_extract(&mut self, vector: NodeId, index: u32) -> Result<NodeId, IrError> {
        let vec_data = self.module.node(vector).value.as_vector()?;
        if index >= vec_data.lane_count {
            return Err(IrError::InvalidOperand(format!(
                "lane {} out of range for {}-lane vector",
                index, vec_data.lane_count
            )));
        }
        let elem_type = vec_data.elem_type;
        let index_lit = self.lit(index);
        let node = self.create(Opcode::VectorExtract, elem_type);
        self.module.connect_inputs(node, &[vector, index_lit]);
        Ok(node)
    }

    // Aggregate access

    /// Semantic struct field access by name. The field's logical index
    /// (padding excluded) becomes the literal second operand.
    pub fn struct_field(&mut self, struct_obj: NodeId, field_name: &str) -> Result<NodeId, IrError> {
        let data = self.module.node(struct_obj).value.as_struct()?;
        let mut logical = 0usize;
        let mut found: Option<(usize, DataType)> = None;
        for field in &data.fields {
            let name = self.module.strings().get(field.name);
            if name.starts_with("__pad") {
                continue;
            }
            if name == field_name {
                found = Some((logical, field.ty));
                break;
            }
            logical += 1;
        }
        let (index, field_ty) =
            found.ok_or_else(|| IrError::UnknownField(field_name.to_owned()))?;

        let index_lit = self.lit(index as u64);
        let node = self.create(Opcode::Access, field_ty);
        self.module.connect_inputs(node, &[struct_obj, index_lit]);
        Ok(node)
    }

    /// Semantic array element access.
    pub fn array_index(&mut self, array: NodeId, index: NodeId) -> Result<NodeId, IrError> {
        let elem_type = self.module.node(array).value.as_array()?.elem_type;
        let node = self.create(Opcode::Access, elem_type);
        self.module.connect_inputs(node, &[array, index]);
        Ok(node)
    }

    // Declarations

    pub fn function(&mut self, name: &str, return_type: DataType) -> FunctionBuilder<'_, 'm> {
        FunctionBuilder {
            builder: self,
            name: name.to_owned(),
            return_type,
            params: Vec::new(),
            traits: NodeTraits::empty(),
        }
    }

    /// Create a basic block as a child region of the insertion region.
    pub fn block(&mut self, name: &str) -> Block {
        let region = self.module.create_region(name, Some(self.current));
        let entry = self
            .module
            .entry_of(region)
            .expect("freshly created region always has an ENTRY");
        Block { region, entry }
    }

    pub fn struct_type(&mut self, name: &str) -> StructBuilder<'_, 'm> {
        StructBuilder {
            builder: self,
            name: name.to_owned(),
            fields: Vec::new(),
            packed: false,
        }
    }

    fn function_return_type(&self, function: NodeId) -> DataType {
        self.module
            .node(function)
            .value
            .as_function()
            .map(|f| f.return_type.kind())
            .unwrap_or(DataType::Void)
    }
}

/// Parameter specification collected by [`FunctionBuilder`].
struct ParamSpec {
    name: String,
    ty: DataType,
    pointee: Option<NodeId>,
    qualifier: PtrQualifier,
}

/// Fluent function declaration.
pub struct FunctionBuilder<'b, 'm> {
    builder: &'b mut Builder<'m>,
    name: String,
    return_type: DataType,
    params: Vec<ParamSpec>,
    traits: NodeTraits,
}

impl<'b, 'm> FunctionBuilder<'b, 'm> {
    pub fn param(mut self, name: &str, ty: DataType) -> Self {
        self.params.push(ParamSpec {
            name: name.to_owned(),
            ty,
            pointee: None,
            qualifier: PtrQualifier::empty(),
        });
        self
    }

    /// Add a pointer parameter with the given pointee and qualifiers.
    pub fn param_ptr(mut self, name: &str, pointee: NodeId, qualifier: PtrQualifier) -> Self {
        self.params.push(ParamSpec {
            name: name.to_owned(),
            ty: DataType::Pointer,
            pointee: Some(pointee),
            qualifier,
        });
        self
    }

    /// Mark as exported (external linkage).
    pub fn exported(mut self) -> Self {
        self.traits |= NodeTraits::EXPORT;
        self
    }

    /// Mark as the program entry point.
    pub fn driver(mut self) -> Self {
        self.traits |= NodeTraits::DRIVER;
        self
    }

    /// Mark as extern (imported).
    pub fn imported(mut self) -> Self {
        self.traits |= NodeTraits::EXTERN;
        self
    }

    /// Mark volatile: no optimisation may remove or reorder it.
    pub fn keep(mut self) -> Self {
        self.traits |= NodeTraits::VOLATILE;
        self
    }

    /// Create the FUNCTION node, its body region and its parameters.
    /// The builder's insertion point moves into the body region.
    pub fn build(self) -> Result<Function, IrError> {
        let FunctionBuilder {
            builder,
            name,
            return_type,
            params,
            traits,
        } = self;

        let func = builder.module.new_node(Opcode::Function, DataType::Function);
        let name_id = builder.module.intern(&name);
        builder.module.node_mut(func).name = Some(name_id);
        builder.module.node_mut(func).traits = traits;
        builder.module.node_mut(func).value = TypedData::Function(FunctionData {
            return_type: Box::new(TypedData::default_for(return_type)),
        });
        let root = builder.module.root();
        builder.module.append(root, func);
        builder.module.add_function(func);

        let region = builder.module.create_region(&name, Some(builder.module.root()));

        let mut param_ids = Vec::with_capacity(params.len());
        for spec in params {
            let param = builder.module.new_node(Opcode::Param, spec.ty);
            let pname = builder.module.intern(&spec.name);
            builder.module.node_mut(param).name = Some(pname);
            if spec.ty == DataType::Pointer {
                builder.module.node_mut(param).value = TypedData::Pointer(PointerData {
                    pointee: spec.pointee,
                    addr_space: 0,
                    qualifier: spec.qualifier,
                });
            }
            builder.module.append(region, param);
            builder.module.connect_inputs(func, &[param]);
            param_ids.push(param);
        }

        builder.set_insertion_point(region);
        Ok(Function {
            node: func,
            region,
            params: param_ids,
        })
    }
}

/// Fluent struct type construction. Unless [`StructBuilder::packed`] is
/// requested, `__pad` filler fields are inserted so each field lands on
/// its natural alignment.
pub struct StructBuilder<'b, 'm> {
    builder: &'b mut Builder<'m>,
    name: String,
    fields: Vec<(String, DataType, TypedData)>,
    packed: bool,
}

impl<'b, 'm> StructBuilder<'b, 'm> {
    pub fn field(mut self, name: &str, ty: DataType) -> Self {
        self.fields
            .push((name.to_owned(), ty, TypedData::default_for(ty)));
        self
    }

    /// Add a field with an explicit nested payload (aggregate fields).
    pub fn field_data(mut self, name: &str, ty: DataType, data: TypedData) -> Self {
        self.fields.push((name.to_owned(), ty, data));
        self
    }

    /// Add a pointer field; `pointee: None` leaves a forward reference.
    pub fn field_ptr(mut self, name: &str, pointee: Option<NodeId>) -> Self {
        self.fields.push((
            name.to_owned(),
            DataType::Pointer,
            TypedData::Pointer(PointerData {
                pointee,
                addr_space: 0,
                qualifier: PtrQualifier::empty(),
            }),
        ));
        self
    }

    /// Add a self-referential pointer field: a null pointee resolved
    /// later through the struct's own interned name.
    pub fn self_ptr(self, name: &str) -> Self {
        self.field_ptr(name, None)
    }

    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    /// Build the struct type descriptor. Does not register it with the
    /// module; use [`Module::register_type`] for named lookup.
    pub fn build(self, alignment: u32) -> TypedData {
        let StructBuilder {
            builder,
            name,
            fields,
            packed,
        } = self;

        let mut out: Vec<StructField> = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut pad_counter = 0usize;

        for (fname, ty, data) in fields {
            if !packed {
                let align = ty.size_bytes().clamp(1, 8);
                let misalign = offset % align;
                if misalign != 0 {
                    let pad_bytes = align - misalign;
                    for _ in 0..pad_bytes {
                        let pad_name = builder.module.intern(&format!("__pad{}", pad_counter));
                        pad_counter += 1;
                        out.push(StructField {
                            name: pad_name,
                            ty: DataType::Uint8,
                            data: TypedData::Uint8(0),
                        });
                    }
                    offset += pad_bytes;
                }
            }
            let name_id = builder.module.intern(&fname);
            offset += ty.size_bytes();
            out.push(StructField {
                name: name_id,
                ty,
                data,
            });
        }

        let name_id = builder.module.intern(&name);
        TypedData::Struct(StructData {
            fields: out,
            alignment,
            name: name_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_types_follow_rust_types() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let i = b.lit(42i32);
        let f = b.lit(2.5f64);
        assert_eq!(b.module().node(i).ty, DataType::Int32);
        assert_eq!(b.module().node(f).ty, DataType::Float64);
        assert_eq!(b.module().node(i).value.int_value(), Some(42));
    }

    #[test]
    fn ptr_load_rejects_non_pointer() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let i = b.lit(1i32);
        assert!(b.ptr_load(i).is_err());
    }

    #[test]
    fn empty_vector_build_is_an_error() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        assert!(b.vector_build(&[]).is_err());
    }

    #[test]
    fn store_operand_order_is_value_then_location() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let count = b.lit(1u32);
        let slot = b.alloc(DataType::Int32, count).unwrap();
        let v = b.lit(7i32);
        let st = b.store(v, slot).unwrap();
        let inputs = b.module().node(st).inputs.clone();
        assert_eq!(inputs.as_slice(), &[v, slot]);
    }

    #[test]
    fn function_builder_wires_params() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b
            .function("sum", DataType::Int32)
            .param("a", DataType::Int32)
            .param("b", DataType::Int32)
            .exported()
            .build()
            .unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(b.insertion_point(), f.region);
        let m = b.module();
        assert!(m.node(f.node).traits.contains(NodeTraits::EXPORT));
        assert_eq!(m.node(f.node).inputs.len(), 2);
        assert_eq!(m.function_region(f.node), Some(f.region));
    }

    #[test]
    fn struct_builder_inserts_padding() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let ty = b
            .struct_type("pair")
            .field("flag", DataType::Bool)
            .field("count", DataType::Int32)
            .build(8);
        let data = ty.as_struct().unwrap();
        // bool at 0, then 3 pad bytes, then the int32.
        let pads = data
            .fields
            .iter()
            .filter(|f| m.strings().get(f.name).starts_with("__pad"))
            .count();
        assert_eq!(pads, 3);
        assert_eq!(data.fields.len(), 5);
    }

    #[test]
    fn struct_field_resolves_logical_index() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let ty = b
            .struct_type("point")
            .field("x", DataType::Int32)
            .field("y", DataType::Float32)
            .build(8);
        let alloc = b.alloc_struct(&ty).unwrap();
        let access = b.struct_field(alloc, "y").unwrap();
        let m = b.module();
        let idx = m.node(access).inputs[1];
        assert_eq!(m.node(idx).value.int_value(), Some(1));
        assert_eq!(m.node(access).ty, DataType::Float32);
    }

    #[test]
    fn branch_requires_entry_targets() {
        let mut m = Module::new("unit");
        let mut b = Builder::new(&mut m);
        let f = b.function("f", DataType::Void).build().unwrap();
        let then_blk = b.block("then");
        let else_blk = b.block("else");
        let cond = b.lit(true);
        b.set_insertion_point(f.region);
        assert!(b.branch(cond, then_blk.entry, else_blk.entry).is_ok());
        let not_entry = b.lit(1i32);
        let cond2 = b.lit(false);
        assert!(b.branch(cond2, not_entry, else_blk.entry).is_err());
    }
}
