//! Oracle boundaries: symbolic execution and probabilistic inference.
//!
//! The engine owns the translation and decision logic around these two
//! traits. The built-in implementations are a bounded symbolic executor over
//! the program AST ([`symex::BoundedExecutor`]) and an SMT-backed inference
//! oracle ([`session::SolverSession`]).

pub mod inference;
pub mod session;
pub mod symex;

use dpcheck_dsl::AnnotatedProgram;
use dpcheck_ir::{InputBinding, LowerError, Run, SiteId, SymbolicPath};
use thiserror::Error;

pub use inference::{Assignment, BoundOutcome, LossTerm, NoiseDraw, ProbabilisticProgram};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{context} exceeded its budget")]
    Timeout { context: String },
    #[error("loop at offset {site} is still running after {iterations} iterations and its condition is symbolic")]
    UnboundedLoop { site: SiteId, iterations: usize },
    #[error("solver gave up: {0}")]
    Unknown(String),
    #[error("lowering failed: {0}")]
    Lowering(#[from] LowerError),
    #[error("unsupported program: {0}")]
    Unsupported(String),
    #[error("solver error: {0}")]
    Solver(String),
}

impl OracleError {
    pub fn timeout(context: impl Into<String>) -> Self {
        OracleError::Timeout {
            context: context.into(),
        }
    }

    /// Failures that make a run inconclusive rather than erroneous.
    pub fn is_inconclusive(&self) -> bool {
        matches!(
            self,
            OracleError::Timeout { .. } | OracleError::UnboundedLoop { .. } | OracleError::Unknown(_)
        )
    }
}

/// Limits on one exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorationBounds {
    /// Symbolic iterations of one loop on one path.
    pub max_unroll: usize,
    /// Paths per run and binding variant.
    pub max_paths: usize,
    /// `|x| <= value_bound` for every input symbol.
    pub value_bound: i64,
    /// `|eta| <= noise_bound` for every sample.
    pub noise_bound: i64,
}

impl Default for ExplorationBounds {
    fn default() -> Self {
        ExplorationBounds {
            max_unroll: 32,
            max_paths: 1024,
            value_bound: 10,
            noise_bound: 10,
        }
    }
}

/// Enumerates the finite paths of one run of a program.
///
/// Paths are handed to `sink` as soon as they are complete; the sink returns
/// `false` when the consumer has gone away, which stops the exploration
/// early. Exploration order is deterministic.
pub trait SymbolicOracle: Sync {
    fn explore(
        &self,
        program: &AnnotatedProgram,
        binding: &InputBinding,
        run: Run,
        bounds: &ExplorationBounds,
        sink: &mut dyn FnMut(SymbolicPath) -> bool,
    ) -> Result<usize, OracleError>;
}

/// Decides whether the privacy loss of a probabilistic program is bounded.
pub trait InferenceOracle {
    fn discharge(&mut self, program: &ProbabilisticProgram) -> Result<BoundOutcome, OracleError>;
}
