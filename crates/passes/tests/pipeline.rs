//! End-to-end pipeline scenarios over the pass manager.

use arc_ir::{verify_module, Builder, DataType, Module, NodeId, Opcode};
use arc_passes::analysis::{AliasKind, CallGraphPass, TbaaPass, TbaaResult};
use arc_passes::transform::{
    ConstFoldPass, CsePass, DcePass, DsePass, InlinePass, Mem2RegPass, SroaPass,
};
use arc_passes::{ExecutionPolicy, PassKind, PassManager, TaskGraph};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Build `(10 + 20) * (50 - 15)` and fold it down to one literal.
#[test]
fn constfold_scenario_folds_to_1050() {
    init_tracing();
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    b.function("main", DataType::Int32).build().unwrap();
    let ten = b.lit(10i32);
    let twenty = b.lit(20i32);
    let fifty = b.lit(50i32);
    let fifteen = b.lit(15i32);
    let sum = b.add(ten, twenty).unwrap();
    let diff = b.sub(fifty, fifteen).unwrap();
    let product = b.mul(sum, diff).unwrap();
    let ret = b.ret(Some(product));

    let mut pm = PassManager::new(ExecutionPolicy::Sequential);
    pm.add_transform(ConstFoldPass);
    pm.run(&mut m).unwrap();

    let &result = m.node(ret).inputs.first().unwrap();
    assert_eq!(m.node(result).op, Opcode::Lit);
    assert_eq!(m.node(result).value.int_value(), Some(1050));
    assert!(verify_module(&m).is_ok());
}

/// Store 42 into a local, load it back, return it: after mem2reg the
/// function body holds no ALLOC, STORE or LOAD.
#[test]
fn mem2reg_scenario_returns_the_literal() {
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    let f = b.function("main", DataType::Int32).build().unwrap();
    let count = b.lit(1u32);
    let slot = b.alloc(DataType::Int32, count).unwrap();
    let forty_two = b.lit(42i32);
    b.store(forty_two, slot).unwrap();
    let loaded = b.load(slot).unwrap();
    let ret = b.ret(Some(loaded));

    let mut pm = PassManager::new(ExecutionPolicy::Sequential);
    pm.add_analysis(TbaaPass);
    pm.add_transform(Mem2RegPass);
    pm.run(&mut m).unwrap();

    let ops: Vec<Opcode> = m
        .region(f.region)
        .nodes()
        .iter()
        .map(|&n| m.node(n).op)
        .collect();
    assert!(!ops.contains(&Opcode::Alloc));
    assert!(!ops.contains(&Opcode::Store));
    assert!(!ops.contains(&Opcode::Load));
    assert_eq!(m.node(ret).inputs.as_slice(), &[forty_two]);
    assert!(verify_module(&m).is_ok());
}

/// `{x: INT32, y: FLOAT32}` with direct field traffic expands to two
/// scalar allocations and zero ACCESS nodes.
#[test]
fn sroa_scenario_fully_promotes() {
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    let f = b.function("main", DataType::Float32).build().unwrap();
    let ty = b
        .struct_type("point")
        .field("x", DataType::Int32)
        .field("y", DataType::Float32)
        .build(8);
    let alloc = b.alloc_struct(&ty).unwrap();
    let x_access = b.struct_field(alloc, "x").unwrap();
    let y_access = b.struct_field(alloc, "y").unwrap();
    let xv = b.lit(1i32);
    b.store(xv, x_access).unwrap();
    let yv = b.lit(2.0f32);
    b.store(yv, y_access).unwrap();
    let loaded = b.load(y_access).unwrap();
    b.ret(Some(loaded));

    let mut pm = PassManager::new(ExecutionPolicy::Sequential);
    pm.add_analysis(TbaaPass);
    pm.add_transform(SroaPass);
    pm.run(&mut m).unwrap();

    let ops: Vec<Opcode> = m
        .region(f.region)
        .nodes()
        .iter()
        .map(|&n| m.node(n).op)
        .collect();
    assert_eq!(ops.iter().filter(|&&op| op == Opcode::Alloc).count(), 2);
    assert!(!ops.contains(&Opcode::Access));
    assert!(verify_module(&m).is_ok());
}

/// Two identical adds multiplied together: after CSE the multiply's
/// inputs are one and the same node.
#[test]
fn cse_scenario_merges_idempotent_adds() {
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    let f = b
        .function("main", DataType::Int32)
        .param("p1", DataType::Int32)
        .param("p2", DataType::Int32)
        .build()
        .unwrap();
    let add1 = b.add(f.params[0], f.params[1]).unwrap();
    let add2 = b.add(f.params[0], f.params[1]).unwrap();
    let product = b.mul(add1, add2).unwrap();
    b.ret(Some(product));

    let mut pm = PassManager::new(ExecutionPolicy::Sequential);
    pm.add_analysis(TbaaPass);
    pm.add_transform(CsePass);
    pm.run(&mut m).unwrap();

    let inputs = m.node(product).inputs.clone();
    assert_eq!(inputs[0], inputs[1]);
}

/// Two distinct locals that never escape: TBAA answers NO_ALIAS for
/// their stores.
#[test]
fn tbaa_scenario_distinct_locals_no_alias() {
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    b.function("main", DataType::Void).build().unwrap();
    let c1 = b.lit(1u32);
    let a1 = b.alloc(DataType::Int32, c1).unwrap();
    let c2 = b.lit(1u32);
    let a2 = b.alloc(DataType::Int32, c2).unwrap();
    let v = b.lit(1i32);
    let s1 = b.store(v, a1).unwrap();
    let s2 = b.store(v, a2).unwrap();
    b.ret(None);

    let mut pm = PassManager::new(ExecutionPolicy::Sequential);
    pm.add_analysis(TbaaPass);
    pm.run(&mut m).unwrap();

    let tbaa = pm.get::<TbaaResult>().unwrap();
    assert_eq!(tbaa.alias(&m, s1, s2), AliasKind::NoAlias);
}

/// The full machine-independent pipeline on one module, scheduled as a
/// task graph and run with parallel batches.
#[test]
fn task_graph_pipeline_runs_in_parallel_mode() {
    init_tracing();
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);

    // A helper worth inlining.
    let callee = b
        .function("square", DataType::Int32)
        .param("x", DataType::Int32)
        .build()
        .unwrap();
    let sq = b.mul(callee.params[0], callee.params[0]).unwrap();
    b.ret(Some(sq));
    let root = b.module().root();
    b.set_insertion_point(root);

    // A caller with promotable memory traffic and foldable arithmetic.
    let f = b.function("main", DataType::Int32).build().unwrap();
    let count = b.lit(1u32);
    let slot = b.alloc(DataType::Int32, count).unwrap();
    let six = b.lit(6i32);
    let seven = b.lit(7i32);
    let product = b.mul(six, seven).unwrap();
    b.store(product, slot).unwrap();
    let loaded = b.load(slot).unwrap();
    let site = b.call(callee.node, &[loaded]).unwrap();
    let ret = b.ret(Some(site));

    let mut graph = TaskGraph::new();
    graph.add(PassKind::Analysis(Box::new(TbaaPass)));
    graph.add(PassKind::Analysis(Box::new(CallGraphPass)));
    graph.add(PassKind::Transform(Box::new(ConstFoldPass)));
    graph.add(PassKind::Transform(Box::new(Mem2RegPass)));
    graph.add(PassKind::Transform(Box::new(CsePass)));
    graph.add(PassKind::Transform(Box::new(DsePass)));
    graph.add(PassKind::Transform(Box::new(InlinePass::default())));
    graph.add(PassKind::Transform(Box::new(DcePass)));

    let pm = PassManager::from_graph(graph, ExecutionPolicy::Parallel).unwrap();
    pm.run(&mut m).unwrap();

    // 6 * 7 folded, promoted through the slot, inlined into a square:
    // main ultimately computes with literals only.
    assert!(verify_module(&m).is_ok());
    let body_ops: Vec<Opcode> = m
        .region(f.region)
        .nodes()
        .iter()
        .map(|&n| m.node(n).op)
        .collect();
    assert!(!body_ops.contains(&Opcode::Alloc));
    assert!(!body_ops.contains(&Opcode::Call));
    let &result = m.node(ret).inputs.first().unwrap();
    // square(42) inlined as 42 * 42.
    assert_eq!(m.node(result).op, Opcode::Mul);
    assert!(m.node(slot).parent.is_none());
}

/// Dead stores disappear while observed stores survive, end to end.
#[test]
fn dse_pipeline_keeps_observed_stores() {
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    b.function("main", DataType::Int32).build().unwrap();
    let count = b.lit(1u32);
    let slot = b.alloc(DataType::Int32, count).unwrap();
    let one = b.lit(1i32);
    let dead = b.store(one, slot).unwrap();
    let two = b.lit(2i32);
    let live = b.store(two, slot).unwrap();
    let loaded = b.load(slot).unwrap();
    b.ret(Some(loaded));

    let mut pm = PassManager::new(ExecutionPolicy::Sequential);
    pm.add_analysis(TbaaPass);
    pm.add_transform(DsePass);
    pm.run(&mut m).unwrap();

    assert!(m.node(dead).parent.is_none());
    assert!(m.node(live).parent.is_some());
    assert!(verify_module(&m).is_ok());
}

/// Running CSE twice produces no further change (idempotence law).
#[test]
fn cse_is_idempotent_on_a_clean_module() {
    let mut m = Module::new("scenario");
    let mut b = Builder::new(&mut m);
    let f = b
        .function("main", DataType::Int32)
        .param("a", DataType::Int32)
        .build()
        .unwrap();
    let twice = b.add(f.params[0], f.params[0]).unwrap();
    let again = b.add(f.params[0], f.params[0]).unwrap();
    let sum = b.add(twice, again).unwrap();
    b.ret(Some(sum));

    let run = |m: &mut Module| {
        let mut pm = PassManager::new(ExecutionPolicy::Sequential);
        pm.add_analysis(TbaaPass);
        pm.add_transform(CsePass);
        pm.run(m).unwrap();
    };

    run(&mut m);
    let snapshot: Vec<NodeId> = m.region(f.region).nodes().to_vec();
    run(&mut m);
    assert_eq!(m.region(f.region).nodes(), snapshot.as_slice());
}
