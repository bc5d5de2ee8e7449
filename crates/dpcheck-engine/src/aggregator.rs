//! Combines per-pair verdicts of one binding variant into a program verdict.
//!
//! Phase one runs the coupling search and divergence check for every pair
//! of paths on a scoped worker pool. Phase two picks one proven pair per run
//! A path so that couplings agree wherever the paths share the branch
//! decisions a sample's coupling may depend on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use dpcheck_ir::{SiteId, SymbolicPath};
use tracing::{debug, info};

use crate::context::VerificationContext;
use crate::coupling::{Coupling, CouplingEntry, CouplingSearch, SearchOutcome};
use crate::divergence::{self, PairVerdict};
use crate::explorer::Exploration;
use crate::oracle::session::{SessionConfig, SolverSession};
use crate::oracle::{Assignment, OracleError};
use crate::pipeline::PipelineError;
use crate::result::{FailureKind, InconclusiveKind};

/// Upper bound on the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 8;

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

#[derive(Debug, Clone)]
pub struct AggregateSettings {
    pub workers: usize,
    pub search: CouplingSearch,
    /// Assignments tried by the consistency search before giving up.
    pub max_consistency_steps: usize,
    pub session: SessionConfig,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        AggregateSettings {
            workers: default_workers(),
            search: CouplingSearch::default(),
            max_consistency_steps: 100_000,
            session: SessionConfig::default(),
        }
    }
}

/// A failed path or pair, before it is made concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub coupling: Option<Coupling>,
    /// A point violating the bound, for `DivergenceBoundFailed`.
    pub witness: Option<Assignment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    Proven,
    Failed(Failure),
    Inconclusive {
        kind: InconclusiveKind,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub finding: Finding,
    pub compatible_pairs: usize,
    pub couplings_checked: usize,
    pub solver_queries: usize,
}

/// Outcome of one `(a, b)` pair.
#[derive(Debug, Clone, Default)]
struct PairRecord {
    a: usize,
    b: usize,
    compatible: bool,
    /// Couplings whose divergence check holds, in search order.
    proven: Vec<Coupling>,
    failure: Option<Failure>,
    inconclusive: Option<(InconclusiveKind, String)>,
    checked: usize,
}

impl PairRecord {
    /// Still able to contribute a proof, or not yet decided.
    fn keeps_path_alive(&self) -> bool {
        !self.proven.is_empty() || self.inconclusive.is_some()
    }

    fn note_inconclusive(&mut self, kind: InconclusiveKind, detail: String) {
        self.inconclusive.get_or_insert((kind, detail));
    }

    fn note_failure(&mut self, failure: Failure) {
        let replace = match &self.failure {
            None => true,
            Some(f) => f.kind == FailureKind::NoCouplingFound && failure.kind != f.kind,
        };
        if replace {
            self.failure = Some(failure);
        }
    }
}

fn inconclusive_kind(e: &OracleError) -> InconclusiveKind {
    match e {
        OracleError::UnboundedLoop { .. } => InconclusiveKind::UnboundedLoop,
        _ => InconclusiveKind::InconclusiveBound,
    }
}

fn evaluate_pair(
    ctx: &VerificationContext<'_>,
    search: &CouplingSearch,
    (a_index, a): (usize, &SymbolicPath),
    (b_index, b): (usize, &SymbolicPath),
    session: &mut SolverSession,
) -> Result<PairRecord, PipelineError> {
    let mut record = PairRecord {
        a: a_index,
        b: b_index,
        ..PairRecord::default()
    };
    let outcome = match search.run(ctx, (a_index, a), (b_index, b), session) {
        Ok(outcome) => outcome,
        Err(e) if e.is_inconclusive() => {
            record.compatible = true;
            record.note_inconclusive(inconclusive_kind(&e), e.to_string());
            return Ok(record);
        }
        Err(e) => return Err(e.into()),
    };
    let SearchOutcome::Searched {
        couplings,
        witness,
        reason,
        truncated,
    } = outcome
    else {
        return Ok(record);
    };
    record.compatible = true;

    for coupling in couplings {
        coupling.validate(a.noise.len())?;
        record.checked += 1;
        match divergence::check(ctx, (a_index, a), b_index, &coupling, session) {
            Ok(PairVerdict::Holds) => record.proven.push(coupling),
            Ok(PairVerdict::Violated { event, witness }) => record.note_failure(Failure {
                kind: FailureKind::DivergenceBoundFailed,
                reason: format!(
                    "privacy loss up to output {event} exceeds {}",
                    ctx.check
                ),
                a: Some(a_index),
                b: Some(b_index),
                coupling: Some(coupling),
                witness: Some(witness),
            }),
            Ok(PairVerdict::Unknown(reason)) => {
                record.note_inconclusive(InconclusiveKind::InconclusiveBound, reason)
            }
            Err(e) if e.is_inconclusive() => {
                record.note_inconclusive(inconclusive_kind(&e), e.to_string())
            }
            Err(e) => return Err(e.into()),
        }
    }

    if record.proven.is_empty() && record.failure.is_none() {
        if let Some(w) = witness {
            let samples = w.coupling.entries.len();
            record.note_failure(Failure {
                kind: FailureKind::DivergenceBoundFailed,
                reason: format!(
                    "privacy loss of the first {samples} sample(s) already exceeds {}",
                    ctx.check
                ),
                a: Some(a_index),
                b: Some(b_index),
                coupling: Some(w.coupling),
                witness: Some(w.assignment),
            });
        } else if truncated {
            record.note_inconclusive(
                InconclusiveKind::SearchLimit,
                format!("coupling search for pair {a_index}/{b_index} hit its step limit"),
            );
        } else if record.inconclusive.is_none() {
            record.note_failure(Failure {
                kind: FailureKind::NoCouplingFound,
                reason: reason.unwrap_or_else(|| "no proof template matched".into()),
                a: Some(a_index),
                b: Some(b_index),
                coupling: None,
                witness: None,
            });
        }
    }
    debug!(
        pair = %format!("{a_index}/{b_index}"),
        compatible = record.compatible,
        proven = record.proven.len(),
        failed = record.failure.is_some(),
        "pair evaluated"
    );
    Ok(record)
}

struct Pool<'e> {
    exploration: &'e Exploration,
    next: AtomicUsize,
    /// Lowest run A path known to fail; tasks above it are skipped.
    watermark: AtomicUsize,
    remaining: Vec<AtomicUsize>,
    alive: Vec<AtomicBool>,
}

impl Pool<'_> {
    fn task(&self, n: usize) -> Option<(usize, usize)> {
        let width = self.exploration.b.len();
        (width > 0 && n < self.exploration.a.len() * width).then(|| (n / width, n % width))
    }

    fn finish(&self, record: &PairRecord) {
        if record.keeps_path_alive() {
            self.alive[record.a].store(true, Ordering::SeqCst);
        }
        if self.remaining[record.a].fetch_sub(1, Ordering::SeqCst) == 1
            && !self.alive[record.a].load(Ordering::SeqCst)
        {
            self.watermark.fetch_min(record.a, Ordering::SeqCst);
        }
    }

    fn work(
        &self,
        ctx: &VerificationContext<'_>,
        settings: &AggregateSettings,
        worker: usize,
    ) -> Result<(Vec<PairRecord>, usize), PipelineError> {
        let mut session = SolverSession::new(format!("worker-{worker}"), settings.session.clone());
        let mut records = Vec::new();
        loop {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            let Some((i, j)) = self.task(n) else {
                break;
            };
            if i > self.watermark.load(Ordering::SeqCst) {
                continue;
            }
            let pair = evaluate_pair(
                ctx,
                &settings.search,
                (i, &self.exploration.a[i]),
                (j, &self.exploration.b[j]),
                &mut session,
            );
            match pair {
                Ok(record) => {
                    self.finish(&record);
                    records.push(record);
                }
                Err(e) => {
                    self.watermark.store(0, Ordering::SeqCst);
                    self.next.store(usize::MAX / 2, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        Ok((records, session.queries()))
    }
}

/// Phase one: evaluate every pair, skipping those above a failed path.
fn evaluate_all(
    ctx: &VerificationContext<'_>,
    exploration: &Exploration,
    settings: &AggregateSettings,
) -> Result<(Vec<PairRecord>, usize, usize), PipelineError> {
    let pool = Pool {
        exploration,
        next: AtomicUsize::new(0),
        watermark: AtomicUsize::new(usize::MAX),
        remaining: exploration
            .a
            .iter()
            .map(|_| AtomicUsize::new(exploration.b.len()))
            .collect(),
        alive: exploration.a.iter().map(|_| AtomicBool::new(false)).collect(),
    };
    let workers = settings.workers.max(1);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let pool = &pool;
                s.spawn(move || pool.work(ctx, settings, w))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let mut records = Vec::new();
    let mut queries = 0;
    for result in results {
        let (mut part, q) = result?;
        records.append(&mut part);
        queries += q;
    }
    records.sort_by_key(|r| (r.a, r.b));
    Ok((records, queries, pool.watermark.load(Ordering::SeqCst)))
}

/// The reported failure of a run A path none of whose pairs succeeded.
fn path_failure(records: &[PairRecord], a: usize) -> Failure {
    let of_path = || records.iter().filter(move |r| r.a == a);
    let preferred = of_path()
        .filter_map(|r| r.failure.as_ref())
        .find(|f| f.kind == FailureKind::DivergenceBoundFailed)
        .or_else(|| of_path().find_map(|r| r.failure.as_ref()));
    match preferred {
        Some(f) => f.clone(),
        None => Failure {
            kind: FailureKind::UnmatchedPath,
            reason: "no run B path produces the same outputs from the same sampling points".into(),
            a: Some(a),
            b: None,
            coupling: None,
            witness: None,
        },
    }
}

type DecisionKey = (usize, Vec<(SiteId, bool)>);

/// Phase two: a backtracking search for one proven pair per run A path.
struct Consistency<'r> {
    options: Vec<Vec<(usize, &'r Coupling)>>,
    /// Decision prefix of every sample, per run A path.
    prefixes: Vec<Vec<Vec<(SiteId, bool)>>>,
    chosen: HashMap<DecisionKey, (&'r CouplingEntry, usize)>,
    steps: usize,
    max_steps: usize,
    deepest: usize,
}

enum Resolution {
    Consistent,
    Conflict { path: usize },
    Exhausted,
}

impl<'r> Consistency<'r> {
    fn fits(&self, path: usize, coupling: &Coupling) -> bool {
        coupling.entries.iter().all(|entry| {
            let key = (entry.ordinal, self.prefixes[path][entry.ordinal].clone());
            self.chosen
                .get(&key)
                .map_or(true, |(existing, _)| existing.same_substitution(entry))
        })
    }

    fn commit(&mut self, path: usize, coupling: &'r Coupling) {
        for entry in &coupling.entries {
            let key = (entry.ordinal, self.prefixes[path][entry.ordinal].clone());
            self.chosen.entry(key).or_insert((entry, 0)).1 += 1;
        }
    }

    fn retract(&mut self, path: usize, coupling: &Coupling) {
        for entry in &coupling.entries {
            let key = (entry.ordinal, self.prefixes[path][entry.ordinal].clone());
            if let Some(slot) = self.chosen.get_mut(&key) {
                slot.1 -= 1;
                if slot.1 == 0 {
                    self.chosen.remove(&key);
                }
            }
        }
    }

    fn solve(&mut self, path: usize) -> Option<bool> {
        if path == self.options.len() {
            return Some(true);
        }
        self.deepest = self.deepest.max(path);
        for n in 0..self.options[path].len() {
            self.steps += 1;
            if self.steps > self.max_steps {
                return None;
            }
            let coupling = self.options[path][n].1;
            if !self.fits(path, coupling) {
                continue;
            }
            self.commit(path, coupling);
            match self.solve(path + 1) {
                Some(true) => return Some(true),
                None => return None,
                Some(false) => {}
            }
            self.retract(path, coupling);
        }
        Some(false)
    }

    fn run(&mut self) -> Resolution {
        match self.solve(0) {
            Some(true) => Resolution::Consistent,
            Some(false) => Resolution::Conflict {
                path: self.deepest,
            },
            None => Resolution::Exhausted,
        }
    }
}

fn resolve(
    exploration: &Exploration,
    records: &[PairRecord],
    max_steps: usize,
) -> Finding {
    let mut options: Vec<Vec<(usize, &Coupling)>> = vec![Vec::new(); exploration.a.len()];
    for r in records {
        options[r.a].extend(r.proven.iter().map(|c| (r.b, c)));
    }
    let prefixes = exploration
        .a
        .iter()
        .map(|p| (0..p.noise.len()).map(|k| p.decision_prefix(k)).collect())
        .collect();
    let mut csp = Consistency {
        options,
        prefixes,
        chosen: HashMap::new(),
        steps: 0,
        max_steps,
        deepest: 0,
    };
    match csp.run() {
        Resolution::Consistent => Finding::Proven,
        Resolution::Exhausted => Finding::Inconclusive {
            kind: InconclusiveKind::SearchLimit,
            detail: format!("no consistent choice of couplings found within {max_steps} steps"),
        },
        Resolution::Conflict { path } => {
            let first = csp.options[path].first().map(|(b, c)| (*b, (*c).clone()));
            Finding::Failed(Failure {
                kind: FailureKind::NoCouplingFound,
                reason: format!(
                    "every proven coupling of path {path} conflicts with paths sharing its branch decisions"
                ),
                a: Some(path),
                b: first.as_ref().map(|(b, _)| *b),
                coupling: first.map(|(_, c)| c),
                witness: None,
            })
        }
    }
}

/// Decide one binding variant from its exploration.
pub fn aggregate(
    ctx: &VerificationContext<'_>,
    exploration: &Exploration,
    settings: &AggregateSettings,
) -> Result<Aggregate, PipelineError> {
    let (records, solver_queries, watermark) = evaluate_all(ctx, exploration, settings)?;
    let compatible_pairs = records.iter().filter(|r| r.compatible).count();
    let couplings_checked = records.iter().map(|r| r.checked).sum();
    info!(
        variant = ctx.binding.variant,
        pairs = records.len(),
        compatible = compatible_pairs,
        couplings = couplings_checked,
        "pair evaluation finished"
    );

    let mut proven_a = vec![false; exploration.a.len()];
    let mut open_a = vec![false; exploration.a.len()];
    let mut covered_b = vec![false; exploration.b.len()];
    let mut open_b = vec![false; exploration.b.len()];
    for r in records.iter() {
        if !r.proven.is_empty() {
            proven_a[r.a] = true;
            covered_b[r.b] = true;
        }
        if r.inconclusive.is_some() {
            open_a[r.a] = true;
            open_b[r.b] = true;
        }
    }

    let finding = if watermark < exploration.a.len() {
        Finding::Failed(path_failure(&records, watermark))
    } else if exploration.b.is_empty() && !exploration.a.is_empty() {
        Finding::Failed(path_failure(&records, 0))
    } else if let Some(j) = (0..exploration.b.len()).find(|&j| !covered_b[j] && !open_b[j]) {
        Finding::Failed(Failure {
            kind: FailureKind::UnmatchedPath,
            reason: "no run A path is coupled with it".into(),
            a: None,
            b: Some(j),
            coupling: None,
            witness: None,
        })
    } else if let Some(i) = (0..exploration.a.len()).find(|&i| !proven_a[i]) {
        let (kind, detail) = records
            .iter()
            .filter(|r| r.a == i)
            .find_map(|r| r.inconclusive.clone())
            .unwrap_or((InconclusiveKind::SearchLimit, String::new()));
        Finding::Inconclusive {
            kind,
            detail: format!("path {i} of run A: {detail}"),
        }
    } else if let Some(j) = (0..exploration.b.len()).find(|&j| !covered_b[j]) {
        let (kind, detail) = records
            .iter()
            .filter(|r| r.b == j)
            .find_map(|r| r.inconclusive.clone())
            .unwrap_or((InconclusiveKind::SearchLimit, String::new()));
        Finding::Inconclusive {
            kind,
            detail: format!("path {j} of run B: {detail}"),
        }
    } else {
        resolve(exploration, &records, settings.max_consistency_steps)
    };

    Ok(Aggregate {
        finding,
        compatible_pairs,
        couplings_checked,
        solver_queries,
    })
}
