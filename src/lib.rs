//! Adaptive clean masks and convergence heuristics for iterative deconvolution.

pub mod convergence;
pub mod driver;
pub mod error;
pub mod masking;
pub mod session;
pub mod source;
pub mod types;

mod stats;

// Re-export the main entry points for library users
pub use convergence::{
    ConvergenceConfig, ConvergenceDecision, ConvergenceEvaluator, ConvergenceHistory,
    IterationRecord, RuleOutcome, StopRule,
};
pub use driver::{CleanLoop, CleanOutcome, Deconvolver, LoopSummary};
pub use error::MaskError;
pub use masking::{write_mask, CleanMasker, MaskConfig, MaskResult};
pub use session::MaskingSession;
pub use source::{as_cube, GridStatistics, MemoryGrid, PixelSource};
pub use types::{Connectivity, Coord, Island, MaskMode, Verdict, MAX_ISLANDS_PER_PLANE};
