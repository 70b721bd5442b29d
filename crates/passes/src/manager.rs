//! Pass manager: dependency-ordered scheduling, analysis caching and
//! incremental invalidation.
//!
//! Two construction modes coexist: imperative registration (`add`, runs
//! in insertion order) and a validated [`TaskGraph`] layered into
//! execution batches. Analyses within a parallel batch run on scoped
//! worker threads (they only read the module); transforms take `&mut
//! Module` and therefore execute on the manager's thread, one at a time,
//! preserving the batch-boundary ordering guarantees.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, RwLock};

use arc_ir::{Module, RegionId};
use tracing::debug;

use crate::error::PassError;
use crate::pass::{AnalysisPass, AnalysisResult, NamedResult, PassKind, TransformPass};
use crate::task_graph::TaskGraph;

/// Execution policy for batched pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecutionPolicy {
    #[default]
    Sequential,
    Parallel,
}

type ResultMap = HashMap<String, Arc<dyn AnalysisResult>>;

/// Shared reference to a cached analysis result.
///
/// Holds the cache entry alive; dereferences to the concrete result
/// type, which was checked when the handle was created.
pub struct ResultHandle<R> {
    inner: Arc<dyn AnalysisResult>,
    _marker: PhantomData<R>,
}

impl<R: AnalysisResult> Deref for ResultHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.inner
            .as_any()
            .downcast_ref::<R>()
            .expect("handle type verified at lookup")
    }
}

/// Pass manager holding the pass registry and the analysis result cache.
pub struct PassManager {
    policy: ExecutionPolicy,
    passes: Vec<PassKind>,
    registry: HashMap<&'static str, usize>,
    /// Batch layering from a TaskGraph; empty means insertion order.
    batches: Vec<Vec<usize>>,
    results: RwLock<ResultMap>,
    pass_to_result: RwLock<HashMap<String, String>>,
}

impl PassManager {
    pub fn new(policy: ExecutionPolicy) -> Self {
        PassManager {
            policy,
            passes: Vec::new(),
            registry: HashMap::new(),
            batches: Vec::new(),
            results: RwLock::new(HashMap::new()),
            pass_to_result: RwLock::new(HashMap::new()),
        }
    }

    /// Build a manager from a validated task graph.
    pub fn from_graph(graph: TaskGraph, policy: ExecutionPolicy) -> Result<Self, PassError> {
        let (passes, batches) = graph.into_batches()?;
        let registry = passes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name(), i))
            .collect();
        Ok(PassManager {
            policy,
            passes,
            registry,
            batches,
            results: RwLock::new(HashMap::new()),
            pass_to_result: RwLock::new(HashMap::new()),
        })
    }

    /// Register a pass for insertion-order execution.
    pub fn add(&mut self, pass: PassKind) {
        self.registry.insert(pass.name(), self.passes.len());
        self.passes.push(pass);
    }

    pub fn add_analysis(&mut self, pass: impl AnalysisPass + 'static) {
        self.add(PassKind::Analysis(Box::new(pass)));
    }

    pub fn add_transform(&mut self, pass: impl TransformPass + 'static) {
        self.add(PassKind::Transform(Box::new(pass)));
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Run every registered pass over the module.
    pub fn run(&self, module: &mut Module) -> Result<(), PassError> {
        if self.batches.is_empty() {
            for idx in 0..self.passes.len() {
                self.execute_single(idx, module)?;
            }
            return Ok(());
        }

        let batches = self.batches.clone();
        for batch in &batches {
            match self.policy {
                ExecutionPolicy::Parallel if batch.len() > 1 => {
                    self.execute_batch(batch, module)?;
                }
                _ => {
                    for &idx in batch {
                        self.execute_single(idx, module)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether a result is cached under `name`.
    pub fn has_analysis(&self, name: &str) -> bool {
        self.results
            .read()
            .map(|map| map.contains_key(name))
            .unwrap_or(false)
    }

    /// Drop every cached result and the pass-to-result mapping.
    pub fn clear_analyses(&self) {
        if let Ok(mut map) = self.results.write() {
            map.clear();
        }
        if let Ok(mut map) = self.pass_to_result.write() {
            map.clear();
        }
    }

    /// Fetch a cached analysis result by its typed cache key.
    pub fn get<R>(&self) -> Result<ResultHandle<R>, PassError>
    where
        R: AnalysisResult + NamedResult,
    {
        let map = self
            .results
            .read()
            .map_err(|_| PassError::MissingAnalysis(R::NAME.to_owned()))?;
        let inner = map
            .get(R::NAME)
            .cloned()
            .ok_or_else(|| PassError::MissingAnalysis(R::NAME.to_owned()))?;
        if inner.as_any().downcast_ref::<R>().is_none() {
            return Err(PassError::MissingAnalysis(R::NAME.to_owned()));
        }
        Ok(ResultHandle {
            inner,
            _marker: PhantomData,
        })
    }

    fn execute_single(&self, idx: usize, module: &mut Module) -> Result<(), PassError> {
        self.validate_dependencies(idx)?;
        match &self.passes[idx] {
            PassKind::Analysis(pass) => self.run_analysis(pass.as_ref(), module),
            PassKind::Transform(pass) => self.run_transform(pass.as_ref(), module),
        }
    }

    /// Run one batch: analyses fan out over scoped worker threads, then
    /// transforms run serialised. The first captured error propagates
    /// after all workers join.
    fn execute_batch(&self, batch: &[usize], module: &mut Module) -> Result<(), PassError> {
        let mut analyses = Vec::new();
        let mut transforms = Vec::new();
        for &idx in batch {
            self.validate_dependencies(idx)?;
            match &self.passes[idx] {
                PassKind::Analysis(pass) => analyses.push(pass),
                PassKind::Transform(pass) => transforms.push(pass),
            }
        }

        if !analyses.is_empty() {
            let shared: &Module = module;
            let outcomes: Vec<Result<(), PassError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = analyses
                    .iter()
                    .map(|pass| scope.spawn(move || self.run_analysis(pass.as_ref(), shared)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| match h.join() {
                        Ok(result) => result,
                        Err(_) => Err(PassError::TransformFailed {
                            pass: "<worker>".to_owned(),
                            reason: "analysis worker panicked".to_owned(),
                        }),
                    })
                    .collect()
            });
            for outcome in outcomes {
                outcome?;
            }
        }

        for pass in transforms {
            self.run_transform(pass.as_ref(), module)?;
        }
        Ok(())
    }

    fn validate_dependencies(&self, idx: usize) -> Result<(), PassError> {
        let pass = &self.passes[idx];
        for dep in pass.requires() {
            let Some(&dep_idx) = self.registry.get(dep) else {
                return Err(PassError::UnknownDependency {
                    pass: pass.name().to_owned(),
                    dependency: dep.to_owned(),
                });
            };

            // An analysis dependency must have a cached result, or be
            // schedulable earlier in the graph.
            if self.passes[dep_idx].is_analysis()
                && !self.has_analysis(dep)
                && !self.batches.iter().flatten().any(|&i| i == dep_idx)
            {
                let mapped = self
                    .pass_to_result
                    .read()
                    .ok()
                    .and_then(|m| m.get(dep).cloned());
                let satisfied = mapped.map(|r| self.has_analysis(&r)).unwrap_or(false);
                if !satisfied {
                    return Err(PassError::AnalysisNotRun {
                        pass: pass.name().to_owned(),
                        analysis: dep.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn run_analysis(&self, pass: &dyn AnalysisPass, module: &Module) -> Result<(), PassError> {
        let pass_name = pass.name();

        // Skip when the advertised result is already cached.
        let cached = self
            .pass_to_result
            .read()
            .ok()
            .and_then(|m| m.get(pass_name).cloned())
            .map(|r| self.has_analysis(&r))
            .unwrap_or(false);
        if cached {
            return Ok(());
        }

        debug!(pass = pass_name, "running analysis");
        let result = pass.run(module)?;
        let result_name = result.name().to_owned();

        // Writer lock held only for the insert.
        {
            let mut map = self
                .results
                .write()
                .map_err(|_| PassError::MissingAnalysis(result_name.clone()))?;
            map.insert(result_name.clone(), Arc::from(result));
        }
        if let Ok(mut map) = self.pass_to_result.write() {
            map.insert(pass_name.to_owned(), result_name);
        }
        Ok(())
    }

    fn run_transform(&self, pass: &dyn TransformPass, module: &mut Module) -> Result<(), PassError> {
        debug!(pass = pass.name(), "running transform");
        let modified = pass.run(module, self)?;
        if !modified.is_empty() {
            debug!(
                pass = pass.name(),
                regions = modified.len(),
                "transform modified regions"
            );
            self.invalidate_analyses(&modified, &pass.invalidates());
        }
        Ok(())
    }

    /// Give each invalidated analysis the chance to update itself; drop
    /// the cache entry and its mapping when the update reports failure.
    fn invalidate_analyses(&self, modified: &[RegionId], invalidated: &[&str]) {
        let (Ok(mut results), Ok(mut mapping)) =
            (self.results.write(), self.pass_to_result.write())
        else {
            return;
        };

        for &pass_name in invalidated {
            let Some(result_name) = mapping.get(pass_name).cloned() else {
                continue; // pass was never run
            };
            let Some(entry) = results.get_mut(&result_name) else {
                continue; // already invalidated
            };

            // Outstanding handles block in-place updates; a conservative
            // full invalidation is always valid.
            let keep = match Arc::get_mut(entry) {
                Some(result) => result.update(modified),
                None => false,
            };
            if !keep {
                results.remove(&result_name);
                mapping.remove(pass_name);
            }
        }
    }
}
