//! dpcheck verification engine.
//!
//! Decides whether a program annotated with an adjacency relation and a
//! check expression is epsilon-differentially private: both runs of an
//! adjacent input pair are explored symbolically, structurally compatible
//! paths are coupled, each coupling's privacy loss is bounded by the check
//! expression, and the per-pair verdicts are aggregated.

pub mod aggregator;
pub mod context;
pub mod counterexample;
pub mod coupling;
pub mod divergence;
pub mod explorer;
pub mod oracle;
pub mod pipeline;
pub mod result;

pub use coupling::{couple, Coupling, CouplingEntry, CouplingSearch, InvalidCoupling, Template};
pub use pipeline::{
    explore_program, verify, verify_with_options, PipelineError, VariantPaths, VerifyOptions,
};
pub use result::{
    Counterexample, FailureKind, InconclusiveKind, PathSummary, Stats, Verdict, VerificationReport,
};
