//! Pass pipeline error types.

use arc_ir::IrError;

/// Error type for pass registration, scheduling and execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PassError {
    /// A pass requires a dependency that was never registered.
    UnknownDependency { pass: String, dependency: String },
    /// A pass requires an analysis whose result is not cached and cannot
    /// be scheduled before it.
    AnalysisNotRun { pass: String, analysis: String },
    /// `PassManager::get` was called for a result that is not cached.
    MissingAnalysis(String),
    /// The task graph contains a dependency cycle.
    DependencyCycle(Vec<String>),
    /// A transform hit an IR-level failure and rolled back.
    Ir(IrError),
    /// A transform could not complete and reported why.
    TransformFailed { pass: String, reason: String },
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassError::UnknownDependency { pass, dependency } => {
                write!(f, "pass '{}' depends on unknown pass '{}'", pass, dependency)
            }
            PassError::AnalysisNotRun { pass, analysis } => {
                write!(
                    f,
                    "pass '{}' requires analysis '{}' which hasn't been run",
                    pass, analysis
                )
            }
            PassError::MissingAnalysis(name) => {
                write!(f, "missing analysis result '{}'", name)
            }
            PassError::DependencyCycle(names) => {
                write!(f, "dependency cycle between passes: {}", names.join(" -> "))
            }
            PassError::Ir(err) => write!(f, "IR error: {}", err),
            PassError::TransformFailed { pass, reason } => {
                write!(f, "transform '{}' failed: {}", pass, reason)
            }
        }
    }
}

impl std::error::Error for PassError {}

impl From<IrError> for PassError {
    fn from(err: IrError) -> Self {
        PassError::Ir(err)
    }
}
