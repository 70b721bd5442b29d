//! Dependency graph of passes, layered into execution batches.
//!
//! Passes in one batch have no declared dependency on each other; the
//! manager may run them concurrently. Batch order respects every
//! `requires` edge.

use std::collections::HashMap;

use crate::error::PassError;
use crate::pass::PassKind;

/// A dependency graph of passes.
#[derive(Default)]
pub struct TaskGraph {
    passes: Vec<PassKind>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass; dependencies come from its `requires` declaration.
    pub fn add(&mut self, pass: PassKind) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Validate the graph and layer it into batches.
    ///
    /// Every required name must be a registered pass and the dependency
    /// relation must be acyclic. Layer `n + 1` holds passes whose deepest
    /// dependency sits in layer `n` (Kahn-style longest-path layering).
    pub(crate) fn into_batches(self) -> Result<(Vec<PassKind>, Vec<Vec<usize>>), PassError> {
        let index_by_name: HashMap<&str, usize> = self
            .passes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name(), i))
            .collect();

        // Resolve dependency edges up front so unknown names fail fast.
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let mut edges = Vec::new();
            for req in pass.requires() {
                let &dep = index_by_name.get(req).ok_or_else(|| {
                    PassError::UnknownDependency {
                        pass: pass.name().to_owned(),
                        dependency: req.to_owned(),
                    }
                })?;
                edges.push(dep);
            }
            deps.push(edges);
        }

        // Longest-path layering; a pass is placeable once every
        // dependency has a layer.
        let mut layer: Vec<Option<usize>> = vec![None; self.passes.len()];
        let mut placed = 0usize;
        while placed < self.passes.len() {
            let mut progressed = false;
            for i in 0..self.passes.len() {
                if layer[i].is_some() {
                    continue;
                }
                let mut max_dep = None;
                let mut ready = true;
                for &d in &deps[i] {
                    match layer[d] {
                        Some(l) => max_dep = Some(max_dep.map_or(l, |m: usize| m.max(l))),
                        None => {
                            ready = false;
                            break;
                        }
                    }
                }
                if ready {
                    layer[i] = Some(max_dep.map_or(0, |m| m + 1));
                    placed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                let cycle: Vec<String> = self
                    .passes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| layer[*i].is_none())
                    .map(|(_, p)| p.name().to_owned())
                    .collect();
                return Err(PassError::DependencyCycle(cycle));
            }
        }

        let depth = layer.iter().filter_map(|l| *l).max().map_or(0, |d| d + 1);
        let mut batches: Vec<Vec<usize>> = vec![Vec::new(); depth];
        for (i, l) in layer.iter().enumerate() {
            if let Some(l) = l {
                batches[*l].push(i);
            }
        }

        Ok((self.passes, batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{AnalysisPass, AnalysisResult, Pass, TransformPass};
    use crate::PassManager;
    use arc_ir::{Module, RegionId};
    use std::any::Any;

    struct StubResult(&'static str);
    impl AnalysisResult for StubResult {
        fn name(&self) -> &str {
            self.0
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct StubAnalysis {
        name: &'static str,
        requires: Vec<&'static str>,
    }
    impl Pass for StubAnalysis {
        fn name(&self) -> &'static str {
            self.name
        }
        fn requires(&self) -> Vec<&'static str> {
            self.requires.clone()
        }
    }
    impl AnalysisPass for StubAnalysis {
        fn run(&self, _m: &Module) -> Result<Box<dyn AnalysisResult>, crate::PassError> {
            Ok(Box::new(StubResult(self.name)))
        }
    }

    struct StubTransform {
        name: &'static str,
        requires: Vec<&'static str>,
    }
    impl Pass for StubTransform {
        fn name(&self) -> &'static str {
            self.name
        }
        fn requires(&self) -> Vec<&'static str> {
            self.requires.clone()
        }
    }
    impl TransformPass for StubTransform {
        fn run(
            &self,
            _m: &mut Module,
            _pm: &PassManager,
        ) -> Result<Vec<RegionId>, crate::PassError> {
            Ok(Vec::new())
        }
    }

    fn analysis(name: &'static str, requires: Vec<&'static str>) -> PassKind {
        PassKind::Analysis(Box::new(StubAnalysis { name, requires }))
    }

    fn transform(name: &'static str, requires: Vec<&'static str>) -> PassKind {
        PassKind::Transform(Box::new(StubTransform { name, requires }))
    }

    #[test]
    fn independent_passes_share_a_batch() {
        let mut graph = TaskGraph::new();
        graph.add(analysis("a", vec![]));
        graph.add(analysis("b", vec![]));
        graph.add(transform("t", vec!["a", "b"]));
        let (_, batches) = graph.into_batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn chains_layer_in_dependency_order() {
        let mut graph = TaskGraph::new();
        graph.add(transform("c", vec!["b"]));
        graph.add(analysis("a", vec![]));
        graph.add(analysis("b", vec!["a"]));
        let (passes, batches) = graph.into_batches().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(passes[batches[0][0]].name(), "a");
        assert_eq!(passes[batches[1][0]].name(), "b");
        assert_eq!(passes[batches[2][0]].name(), "c");
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut graph = TaskGraph::new();
        graph.add(analysis("a", vec!["ghost"]));
        assert!(matches!(
            graph.into_batches(),
            Err(PassError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = TaskGraph::new();
        graph.add(analysis("a", vec!["b"]));
        graph.add(analysis("b", vec!["a"]));
        assert!(matches!(
            graph.into_batches(),
            Err(PassError::DependencyCycle(_))
        ));
    }
}
