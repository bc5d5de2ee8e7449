//! End-to-end verification: parse, explore each binding variant, couple,
//! check divergence, aggregate and make failures concrete.

pub(crate) mod timeout;

use std::path::PathBuf;
use std::time::Instant;

use dpcheck_dsl::{AnnotatedProgram, ContractError};
use dpcheck_ir::{variants, BindingError, InputBinding, LowerError};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregator::{self, AggregateSettings, Finding};
use crate::context::VerificationContext;
use crate::counterexample;
use crate::coupling::{CouplingSearch, InvalidCoupling};
use crate::explorer::{explore_pair, Exploration};
use crate::oracle::session::{SessionConfig, SolverSession};
use crate::oracle::symex::BoundedExecutor;
use crate::oracle::{ExplorationBounds, OracleError};
use crate::result::{InconclusiveKind, Stats, Verdict, VerificationReport};

use self::timeout::{deadline_exceeded, deadline_from_timeout_secs, solver_timeout_ms, timeout_reason};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),
    #[error("Lowering error: {0}")]
    Lowering(#[from] LowerError),
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
    /// A coupling that is not measure preserving reached the checker.
    #[error("Internal error: {0}")]
    InvalidCoupling(#[from] InvalidCoupling),
    #[error("Cannot create SMT dump directory {path}: {source}")]
    DumpDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Function to verify when the file holds several.
    pub function: Option<String>,
    pub size: usize,
    pub epsilon: i64,
    pub value_bound: i64,
    pub noise_bound: i64,
    pub max_unroll: usize,
    pub max_paths: usize,
    pub max_couplings_per_pair: usize,
    pub solver_timeout_secs: u64,
    /// Wall-clock limit of the whole run; zero disables it.
    pub timeout_secs: u64,
    /// Worker threads for pair checking; `None` picks a default.
    pub workers: Option<usize>,
    pub dump_smt: Option<PathBuf>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            function: None,
            size: 5,
            epsilon: 1,
            value_bound: 10,
            noise_bound: 10,
            max_unroll: 32,
            max_paths: 1024,
            max_couplings_per_pair: 8,
            solver_timeout_secs: 30,
            timeout_secs: 300,
            workers: None,
            dump_smt: None,
        }
    }
}

impl VerifyOptions {
    fn bounds(&self) -> ExplorationBounds {
        ExplorationBounds {
            max_unroll: self.max_unroll,
            max_paths: self.max_paths,
            value_bound: self.value_bound,
            noise_bound: self.noise_bound,
        }
    }

    fn session(&self, deadline: Option<Instant>) -> Result<SessionConfig, PipelineError> {
        if let Some(dir) = &self.dump_smt {
            std::fs::create_dir_all(dir).map_err(|source| PipelineError::DumpDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(SessionConfig {
            timeout_ms: solver_timeout_ms(self.solver_timeout_secs, deadline),
            deadline,
            dump_dir: self.dump_smt.clone(),
        })
    }
}

/// Lowercase hex SHA-256 of the program text.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    format!("{:x}", hasher.finalize())
}

fn parse(source: &str, filename: &str, options: &VerifyOptions) -> Result<AnnotatedProgram, PipelineError> {
    let program = dpcheck_dsl::parse_target(source, filename, options.function.as_deref())?;
    info!(
        function = %program.contract.function,
        relation = program.contract.relation.as_str(),
        params = program.contract.params.len(),
        "contract parsed"
    );
    Ok(program)
}

fn exploration_kind(e: &OracleError) -> InconclusiveKind {
    match e {
        OracleError::UnboundedLoop { .. } => InconclusiveKind::UnboundedLoop,
        OracleError::Unknown(_) => InconclusiveKind::InconclusiveBound,
        _ => InconclusiveKind::ExplorationTimeout,
    }
}

/// Verify program text with default options.
pub fn verify(source: &str) -> Result<Verdict, PipelineError> {
    verify_with_options(source, "<input>", &VerifyOptions::default()).map(|r| r.verdict)
}

pub fn verify_with_options(
    source: &str,
    filename: &str,
    options: &VerifyOptions,
) -> Result<VerificationReport, PipelineError> {
    let started = Instant::now();
    let deadline = deadline_from_timeout_secs(options.timeout_secs);
    let program = parse(source, filename, options)?;
    let bindings = variants(&program.contract, options.size, options.epsilon)?;
    let session = options.session(deadline)?;
    let executor = BoundedExecutor::new(session.clone());
    let bounds = options.bounds();
    let settings = AggregateSettings {
        workers: options.workers.unwrap_or_else(aggregator::default_workers),
        search: CouplingSearch {
            max_couplings: options.max_couplings_per_pair.max(1),
            ..CouplingSearch::default()
        },
        session: session.clone(),
        ..AggregateSettings::default()
    };

    let mut stats = Stats {
        variants: bindings.len(),
        ..Stats::default()
    };
    let mut disproven = None;
    let mut inconclusive = None;

    for binding in &bindings {
        if deadline_exceeded(deadline) {
            inconclusive.get_or_insert(Verdict::Inconclusive {
                kind: InconclusiveKind::ExplorationTimeout,
                detail: timeout_reason("Verification"),
            });
            break;
        }
        let ctx = VerificationContext::new(&program, binding, options.value_bound, options.noise_bound)?;
        let exploration = match explore_pair(&executor, &program, binding, &bounds) {
            Ok(exploration) => exploration,
            Err(e) if e.is_inconclusive() => {
                warn!(variant = binding.variant, error = %e, "exploration inconclusive");
                inconclusive.get_or_insert(Verdict::Inconclusive {
                    kind: exploration_kind(&e),
                    detail: format!("variant {}: {e}", binding.variant),
                });
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        stats.paths_a += exploration.a.len();
        stats.paths_b += exploration.b.len();

        let aggregate = aggregator::aggregate(&ctx, &exploration, &settings)?;
        stats.compatible_pairs += aggregate.compatible_pairs;
        stats.couplings_checked += aggregate.couplings_checked;
        stats.solver_queries += aggregate.solver_queries;
        match aggregate.finding {
            Finding::Proven => {
                info!(variant = binding.variant, "variant proven");
            }
            Finding::Inconclusive { kind, detail } => {
                info!(variant = binding.variant, kind = %kind, "variant inconclusive");
                inconclusive.get_or_insert(Verdict::Inconclusive {
                    kind,
                    detail: format!("variant {}: {detail}", binding.variant),
                });
            }
            Finding::Failed(failure) => {
                let mut session = SolverSession::new("counterexample", session.clone());
                let cx = counterexample::build(&ctx, &exploration, &failure, &mut session)?;
                stats.solver_queries += session.queries();
                info!(
                    variant = binding.variant,
                    kind = %cx.kind,
                    reason = %cx.reason,
                    "counterexample built"
                );
                disproven = Some(Verdict::Disproven {
                    counterexample: Box::new(cx),
                });
                break;
            }
        }
    }

    let verdict = disproven.or(inconclusive).unwrap_or(Verdict::Proven {
        epsilon: options.epsilon,
    });
    stats.elapsed_ms = started.elapsed().as_millis();
    info!(
        verdict = verdict.verdict_class(),
        elapsed_ms = stats.elapsed_ms as u64,
        "verification finished"
    );
    Ok(VerificationReport {
        function: program.contract.function.clone(),
        relation: program.contract.relation.as_str().to_string(),
        size: options.size,
        epsilon: options.epsilon,
        check: program.contract.check.to_string(),
        source_hash: sha256_hex(source),
        verdict,
        stats,
    })
}

/// The paths of both runs of one binding variant.
#[derive(Debug, Clone)]
pub struct VariantPaths {
    pub binding: InputBinding,
    pub exploration: Exploration,
}

/// Explore without coupling or checking.
pub fn explore_program(
    source: &str,
    filename: &str,
    options: &VerifyOptions,
) -> Result<Vec<VariantPaths>, PipelineError> {
    let deadline = deadline_from_timeout_secs(options.timeout_secs);
    let program = parse(source, filename, options)?;
    let executor = BoundedExecutor::new(options.session(deadline)?);
    let bounds = options.bounds();
    variants(&program.contract, options.size, options.epsilon)?
        .into_iter()
        .map(|binding| -> Result<VariantPaths, PipelineError> {
            let exploration = explore_pair(&executor, &program, &binding, &bounds)?;
            Ok(VariantPaths {
                binding,
                exploration,
            })
        })
        .collect()
}
