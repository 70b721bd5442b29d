//! Machine-independent transforms.

pub mod constfold;
pub mod cse;
pub mod dce;
pub mod dse;
pub mod hoist;
pub mod inline;
pub mod mem2reg;
pub mod sroa;

pub use constfold::ConstFoldPass;
pub use cse::CsePass;
pub use dce::DcePass;
pub use dse::DsePass;
pub use hoist::HoistExprPass;
pub use inline::{InlineConfig, InlineDecision, InlineOutcome, InlinePass, Inliner};
pub use mem2reg::Mem2RegPass;
pub use sroa::SroaPass;
