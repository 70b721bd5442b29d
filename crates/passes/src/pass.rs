//! Pass and analysis-result traits.
//!
//! Passes are either analyses (produce a cached result object) or
//! transforms (mutate the IR and report the regions they touched). The
//! two kinds are carried as the [`PassKind`] sum type; the pass manager
//! matches on it instead of downcasting.

use std::any::Any;

use arc_ir::{Module, RegionId};

use crate::error::PassError;
use crate::manager::PassManager;

/// A cached analysis result.
///
/// `update` is the incremental-invalidation hook: given the regions a
/// transform modified, return `true` if the result is still valid
/// (possibly after self-repair), or `false` to be dropped from the cache
/// and recomputed on next demand. The default is pessimistic.
pub trait AnalysisResult: Any + Send + Sync {
    /// Cache key advertised by this result.
    fn name(&self) -> &str;

    /// Incrementally update for the modified regions.
    fn update(&mut self, modified: &[RegionId]) -> bool {
        let _ = modified;
        false
    }

    fn as_any(&self) -> &dyn Any;
}

/// Compile-time cache key for typed result lookup via
/// [`PassManager::get`].
pub trait NamedResult {
    const NAME: &'static str;
}

/// Common pass declaration surface.
pub trait Pass: Send + Sync {
    /// Unique pass name, used for dependency resolution.
    fn name(&self) -> &'static str;

    /// Names of passes that must run before this one.
    fn requires(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Names of analyses that become stale after this pass.
    fn invalidates(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// A pass that computes a cached result without mutating the IR.
pub trait AnalysisPass: Pass {
    fn run(&self, module: &Module) -> Result<Box<dyn AnalysisResult>, PassError>;
}

/// A pass that mutates the IR and reports the regions it modified.
pub trait TransformPass: Pass {
    fn run(&self, module: &mut Module, pm: &PassManager) -> Result<Vec<RegionId>, PassError>;
}

/// The two pass kinds.
pub enum PassKind {
    Analysis(Box<dyn AnalysisPass>),
    Transform(Box<dyn TransformPass>),
}

impl PassKind {
    pub fn name(&self) -> &'static str {
        match self {
            PassKind::Analysis(p) => p.name(),
            PassKind::Transform(p) => p.name(),
        }
    }

    pub fn requires(&self) -> Vec<&'static str> {
        match self {
            PassKind::Analysis(p) => p.requires(),
            PassKind::Transform(p) => p.requires(),
        }
    }

    pub fn invalidates(&self) -> Vec<&'static str> {
        match self {
            PassKind::Analysis(p) => p.invalidates(),
            PassKind::Transform(p) => p.invalidates(),
        }
    }

    pub fn is_analysis(&self) -> bool {
        matches!(self, PassKind::Analysis(_))
    }
}
