//! End-to-end IR construction checks.

use arc_ir::{
    dump::dump_module, verify_module, Builder, DataType, IrError, Module, NodeTraits, Opcode,
    PtrQualifier,
};

#[test]
fn function_with_control_flow_verifies() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    let f = b
        .function("max", DataType::Int32)
        .param("a", DataType::Int32)
        .param("b", DataType::Int32)
        .exported()
        .build()
        .unwrap();

    let then_blk = b.block("then");
    let else_blk = b.block("else");

    let cond = b.gt(f.params[0], f.params[1]).unwrap();
    b.branch(cond, then_blk.entry, else_blk.entry).unwrap();

    b.set_insertion_point(then_blk.region);
    b.ret(Some(f.params[0]));
    b.set_insertion_point(else_blk.region);
    b.ret(Some(f.params[1]));

    assert!(m.is_terminated(f.region));
    assert!(m.is_terminated(then_blk.region));
    assert!(m.is_terminated(else_blk.region));
    assert!(verify_module(&m).is_ok());

    // Structural dominance: the function region dominates its blocks.
    assert!(m.dominates(f.region, then_blk.region));
    assert!(m.dominates(f.region, else_blk.region));
    assert!(!m.dominates(then_blk.region, else_blk.region));
}

#[test]
fn can_reach_follows_control_transfers() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    let f = b.function("f", DataType::Void).build().unwrap();
    let a = b.block("a");
    let c = b.block("c");

    b.set_insertion_point(f.region);
    b.jump(a.entry).unwrap();
    b.set_insertion_point(a.region);
    b.jump(c.entry).unwrap();
    b.set_insertion_point(c.region);
    b.ret(None);

    assert!(m.can_reach(f.region, c.region));
    assert!(!m.can_reach(c.region, f.region));
}

#[test]
fn construction_errors_are_reported() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    b.function("f", DataType::Void).build().unwrap();

    let not_a_pointer = b.lit(1i32);
    assert!(matches!(
        b.ptr_load(not_a_pointer),
        Err(IrError::InvalidOperand(_))
    ));
    assert!(matches!(b.vector_build(&[]), Err(IrError::InvalidOperand(_))));

    let ty = b.struct_type("s").field("x", DataType::Int32).build(8);
    let alloc = b.alloc_struct(&ty).unwrap();
    assert!(matches!(
        b.struct_field(alloc, "missing"),
        Err(IrError::UnknownField(_))
    ));
}

#[test]
fn restrict_qualified_params_are_visible() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    let count = b.lit(1u32);
    let pointee = b.alloc(DataType::Int32, count).unwrap();
    let f = b
        .function("f", DataType::Void)
        .param_ptr("p", pointee, PtrQualifier::RESTRICT | PtrQualifier::CONST)
        .build()
        .unwrap();
    b.ret(None);

    assert!(m.is_restrict_pointer(f.params[0]));
    assert!(m.is_const_pointer(f.params[0]));
}

#[test]
fn volatile_trait_sticks_to_functions() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    let f = b.function("pinned", DataType::Void).keep().build().unwrap();
    b.ret(None);
    assert!(m.node(f.node).traits.contains(NodeTraits::VOLATILE));
}

#[test]
fn self_referential_struct_uses_null_pointee() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    let ty = b
        .struct_type("list_node")
        .field("value", DataType::Int64)
        .self_ptr("next")
        .build(8);
    let data = ty.as_struct().unwrap();
    let next = data
        .fields
        .iter()
        .find(|field| m.strings().get(field.name) == "next")
        .unwrap();
    let ptr = next.data.as_pointer().unwrap();
    assert!(ptr.pointee.is_none());
    // Resolution goes through the module's named-type registry.
    m.register_type("list_node", ty.clone());
    assert!(m.named_type("list_node").is_some());
}

#[test]
fn dump_produces_readable_output() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    b.function("compute", DataType::Int32).build().unwrap();
    let x = b.lit(6i32);
    let y = b.lit(7i32);
    let product = b.mul(x, y).unwrap();
    b.ret(Some(product));

    let mut text = String::new();
    dump_module(&m, &mut text).unwrap();
    assert!(text.contains("region @compute"));
    assert!(text.contains("mul"));
    assert!(text.contains("ret"));
}

#[test]
fn erase_node_keeps_use_def_coherent() {
    let mut m = Module::new("demo");
    let mut b = Builder::new(&mut m);
    b.function("f", DataType::Int32).build().unwrap();
    let x = b.lit(1i32);
    let y = b.lit(2i32);
    let sum = b.add(x, y).unwrap();
    b.ret(Some(sum));

    // Replacing the sum with a literal and erasing it must leave a
    // coherent graph behind.
    let z = b.lit(3i32);
    let module = b.module();
    module.replace_all_uses(sum, z);
    module.erase_node(sum);

    assert!(module.node(x).users.is_empty());
    assert!(module.node(y).users.is_empty());
    assert_eq!(module.node(sum).op, Opcode::Add);
    assert!(verify_module(module).is_ok());
}
