//! Textual IR dump.
//!
//! Advisory format for debugging and test assertions; no round-trip is
//! promised. Padding fields are elided, pointer types show their pointee
//! name when one is known.

use std::fmt::{self, Write};

use crate::module::Module;
use crate::node::{NodeId, Opcode};
use crate::region::RegionId;
use crate::types::DataType;
use crate::value::TypedData;

/// Write the whole module: named types, then the region tree.
pub fn dump_module(module: &Module, out: &mut impl Write) -> fmt::Result {
    writeln!(out, "module {}", module.name())?;
    dump_region(module, module.root(), 1, out)
}

/// Write one region and its subtree at the given indent depth.
pub fn dump_region(
    module: &Module,
    region: RegionId,
    depth: usize,
    out: &mut impl Write,
) -> fmt::Result {
    let pad = "  ".repeat(depth);
    writeln!(out, "{}region @{} {{", pad, module.region_name(region))?;
    for &node in module.region(region).nodes() {
        write!(out, "{}  ", pad)?;
        dump_node(module, node, out)?;
        writeln!(out)?;
    }
    for &child in module.region(region).children() {
        dump_region(module, child, depth + 1, out)?;
    }
    writeln!(out, "{}}}", pad)
}

/// Write one node: `%id = opcode type [payload] operands`.
pub fn dump_node(module: &Module, node_id: NodeId, out: &mut impl Write) -> fmt::Result {
    let node = module.node(node_id);
    write!(out, "%{} = {}", node_id.index(), opcode_name(node.op))?;
    if node.ty != DataType::Void {
        write!(out, " {}", type_name(module, node_id))?;
    }
    if let Some(name) = node.name {
        write!(out, " @{}", module.strings().get(name))?;
    }
    if node.op == Opcode::Lit {
        write!(out, " {}", literal_text(&node.value))?;
    }
    if !node.inputs.is_empty() {
        write!(out, " (")?;
        for (i, input) in node.inputs.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "%{}", input.index())?;
        }
        write!(out, ")")?;
    }
    if !node.traits.is_empty() {
        write!(out, " !{:?}", node.traits)?;
    }
    Ok(())
}

fn opcode_name(op: Opcode) -> &'static str {
    match op {
        Opcode::Entry => "entry",
        Opcode::Exit => "exit",
        Opcode::Param => "param",
        Opcode::Lit => "lit",
        Opcode::Function => "function",
        Opcode::Add => "add",
        Opcode::Sub => "sub",
        Opcode::Mul => "mul",
        Opcode::Div => "div",
        Opcode::Mod => "mod",
        Opcode::Eq => "eq",
        Opcode::Neq => "neq",
        Opcode::Lt => "lt",
        Opcode::Lte => "lte",
        Opcode::Gt => "gt",
        Opcode::Gte => "gte",
        Opcode::Band => "band",
        Opcode::Bor => "bor",
        Opcode::Bxor => "bxor",
        Opcode::Bnot => "bnot",
        Opcode::Bshl => "bshl",
        Opcode::Bshr => "bshr",
        Opcode::Load => "load",
        Opcode::Store => "store",
        Opcode::PtrLoad => "ptr_load",
        Opcode::PtrStore => "ptr_store",
        Opcode::AddrOf => "addr_of",
        Opcode::PtrAdd => "ptr_add",
        Opcode::Alloc => "alloc",
        Opcode::AtomicLoad => "atomic_load",
        Opcode::AtomicStore => "atomic_store",
        Opcode::AtomicCas => "atomic_cas",
        Opcode::Call => "call",
        Opcode::Invoke => "invoke",
        Opcode::Ret => "ret",
        Opcode::Branch => "branch",
        Opcode::Jump => "jump",
        Opcode::From => "from",
        Opcode::Access => "access",
        Opcode::Cast => "cast",
        Opcode::Select => "select",
        Opcode::VectorBuild => "vector_build",
        Opcode::VectorExtract => "vector_extract",
        Opcode::VectorSplat => "vector_splat",
    }
}

fn type_name(module: &Module, node_id: NodeId) -> String {
    let node = module.node(node_id);
    match (&node.value, node.ty) {
        (TypedData::Pointer(p), _) => {
            let pointee = p
                .pointee
                .and_then(|n| module.node(n).name)
                .map(|s| module.strings().get(s).to_owned())
                .unwrap_or_else(|| "opaque".to_owned());
            format!("ptr<{}>", pointee)
        }
        (TypedData::Struct(s), _) => {
            // Padding fields are elided from the dump.
            let fields: Vec<String> = s
                .fields
                .iter()
                .filter(|f| !module.is_pad_field(f.name))
                .map(|f| {
                    format!(
                        "{}: {:?}",
                        module.strings().get(f.name),
                        f.ty
                    )
                })
                .collect();
            format!(
                "struct {} {{{}}}",
                module.strings().get(s.name),
                fields.join(", ")
            )
        }
        (TypedData::Vector(v), _) => format!("{:?}x{}", v.elem_type, v.lane_count),
        (TypedData::Array(a), _) => format!("[{:?}; {}]", a.elem_type, a.count),
        (TypedData::Function(func), _) => {
            format!("fn() -> {:?}", func.return_type.kind()).to_lowercase()
        }
        (_, ty) => format!("{:?}", ty).to_lowercase(),
    }
}

fn literal_text(value: &TypedData) -> String {
    match value {
        TypedData::Bool(v) => v.to_string(),
        TypedData::Float32(v) => v.to_string(),
        TypedData::Float64(v) => v.to_string(),
        other => other
            .int_value()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn dump_contains_function_region_and_literal() {
        let mut m = Module::new("demo");
        let mut b = Builder::new(&mut m);
        let _f = b.function("answer", DataType::Int32).build().unwrap();
        let v = b.lit(42i32);
        b.ret(Some(v));

        let mut text = String::new();
        dump_module(&m, &mut text).unwrap();
        assert!(text.contains("module demo"));
        assert!(text.contains("region @answer"));
        assert!(text.contains("lit int32 42"));
    }

    #[test]
    fn dump_elides_padding_fields() {
        let mut m = Module::new("demo");
        let mut b = Builder::new(&mut m);
        let ty = b
            .struct_type("mix")
            .field("flag", DataType::Bool)
            .field("count", DataType::Int32)
            .build(8);
        let _alloc = b.alloc_struct(&ty).unwrap();

        let mut text = String::new();
        dump_module(&m, &mut text).unwrap();
        assert!(text.contains("struct mix"));
        assert!(!text.contains("__pad"));
    }
}
