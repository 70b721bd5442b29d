//! Arc pass pipeline: analyses, transforms and their scheduler.
//!
//! Passes come in two kinds. Analyses read the module and produce a
//! cached result object; transforms mutate the IR and report the regions
//! they touched so dependent analyses can be invalidated or updated
//! incrementally. The [`PassManager`] runs passes either in insertion
//! order or as validated [`TaskGraph`] batches, optionally fanning
//! analysis batches out over worker threads.
//!
//! ```
//! use arc_ir::{Builder, DataType, Module};
//! use arc_passes::analysis::TbaaPass;
//! use arc_passes::transform::Mem2RegPass;
//! use arc_passes::{ExecutionPolicy, PassManager};
//!
//! let mut module = Module::new("demo");
//! let mut b = Builder::new(&mut module);
//! b.function("f", DataType::Int32).build().unwrap();
//! let count = b.lit(1u32);
//! let slot = b.alloc(DataType::Int32, count).unwrap();
//! let v = b.lit(42i32);
//! b.store(v, slot).unwrap();
//! let loaded = b.load(slot).unwrap();
//! b.ret(Some(loaded));
//!
//! let mut pm = PassManager::new(ExecutionPolicy::Sequential);
//! pm.add_analysis(TbaaPass);
//! pm.add_transform(Mem2RegPass);
//! pm.run(&mut module).unwrap();
//! ```

pub mod analysis;
pub mod error;
pub mod manager;
pub mod pass;
pub mod task_graph;
pub mod transform;

pub use error::PassError;
pub use manager::{ExecutionPolicy, PassManager, ResultHandle};
pub use pass::{AnalysisPass, AnalysisResult, NamedResult, Pass, PassKind, TransformPass};
pub use task_graph::TaskGraph;
