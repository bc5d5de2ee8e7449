//! Coupling construction for a structurally compatible pair of paths.
//!
//! A coupling maps every noise sample of run B to `sign · eta_A + shift`
//! over the matching sample of run A. Candidates per sample are tried in a
//! fixed order (identity, shifts derived from events, shifts by the
//! relation's sensitivity, reflection, reflect-and-shift) by a depth-first
//! search that backtracks whenever an event closed by the sample does not
//! align: a run-B guard must be implied by run A's path condition, and an
//! output must become syntactically identical to run A's.

use std::fmt;

use dpcheck_ir::{
    BoolExpr, Guard, LinearForm, OutputEvent, Run, SiteId, SymExpr, Symbol, SymbolicPath,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::context::VerificationContext;
use crate::divergence::loss_program;
use crate::oracle::session::SolverSession;
use crate::oracle::{Assignment, BoundOutcome, InferenceOracle, OracleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Identity,
    AlignedShift,
    SensitivityShift,
    Reflect,
    ReflectShift,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Template::Identity => "identity",
            Template::AlignedShift => "shift",
            Template::SensitivityShift => "shift by sensitivity",
            Template::Reflect => "reflect",
            Template::ReflectShift => "reflect and shift",
        })
    }
}

/// `eta_B[ordinal] = sign · eta_A[ordinal] + shift`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouplingEntry {
    pub ordinal: usize,
    pub template: Template,
    pub sign: i64,
    pub shift: SymExpr,
}

impl CouplingEntry {
    pub fn new(ordinal: usize, template: Template, sign: i64, shift: SymExpr) -> Self {
        CouplingEntry {
            ordinal,
            template,
            sign,
            shift,
        }
    }

    pub fn identity(ordinal: usize) -> Self {
        Self::new(ordinal, Template::Identity, 1, SymExpr::Const(0))
    }

    /// Identity and pure reflection cost nothing.
    pub fn is_free(&self) -> bool {
        self.shift.as_const() == Some(0)
    }

    pub fn image(&self) -> SymExpr {
        let eta = SymExpr::Sym(Symbol::noise(Run::A, self.ordinal));
        let scaled = if self.sign < 0 { -eta } else { eta };
        scaled + self.shift.clone()
    }

    /// Same substitution, whichever template produced it.
    pub fn same_substitution(&self, other: &CouplingEntry) -> bool {
        self.ordinal == other.ordinal && self.sign == other.sign && self.shift == other.shift
    }
}

impl fmt::Display for CouplingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} ({})",
            Symbol::noise(Run::B, self.ordinal),
            self.image(),
            self.template
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid coupling for sample {ordinal}: {reason}")]
pub struct InvalidCoupling {
    pub ordinal: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coupling {
    /// One entry per sample, in draw order.
    pub entries: Vec<CouplingEntry>,
}

impl Coupling {
    pub fn new(entries: Vec<CouplingEntry>) -> Self {
        Coupling { entries }
    }

    pub fn entry(&self, ordinal: usize) -> Option<&CouplingEntry> {
        self.entries
            .get(ordinal)
            .filter(|e| e.ordinal == ordinal)
            .or_else(|| self.entries.iter().find(|e| e.ordinal == ordinal))
    }

    fn image_of(&self, s: &Symbol) -> Option<SymExpr> {
        match s {
            Symbol::Noise {
                run: Run::B,
                ordinal,
            } => self.entry(*ordinal).map(CouplingEntry::image),
            _ => None,
        }
    }

    /// Rewrite run-B noise in terms of run-A noise.
    pub fn apply(&self, e: &SymExpr) -> SymExpr {
        e.substitute(&|s| self.image_of(s))
    }

    pub fn apply_bool(&self, b: &BoolExpr) -> BoolExpr {
        b.substitute(&|s| self.image_of(s))
    }

    /// Only shifts and reflections preserve the Laplace measure.
    pub fn validate(&self, samples: usize) -> Result<(), InvalidCoupling> {
        if self.entries.len() != samples {
            return Err(InvalidCoupling {
                ordinal: self.entries.len().min(samples),
                reason: format!("{} entries for {samples} samples", self.entries.len()),
            });
        }
        for (ordinal, entry) in self.entries.iter().enumerate() {
            let fail = |reason: String| Err(InvalidCoupling { ordinal, reason });
            if entry.ordinal != ordinal {
                return fail(format!("entry for sample {} out of order", entry.ordinal));
            }
            if entry.sign != 1 && entry.sign != -1 {
                return fail(format!(
                    "scale factor {} is not measure preserving",
                    entry.sign
                ));
            }
            if entry.shift.mentions_noise() {
                return fail(format!("shift {} depends on noise", entry.shift));
            }
        }
        Ok(())
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Coupling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Highest ordinal of `run`'s noise mentioned in `e`.
fn last_noise(symbols: impl IntoIterator<Item = Symbol>, run: Run) -> Option<usize> {
    symbols
        .into_iter()
        .filter_map(|s| match s {
            Symbol::Noise { run: r, ordinal } if r == run => Some(ordinal),
            _ => None,
        })
        .max()
}

/// Two expressions whose linear forms an aligned coupling makes equal.
#[derive(Debug, Clone)]
struct Source {
    a: SymExpr,
    b: SymExpr,
    last_a: Option<usize>,
    last_b: Option<usize>,
}

impl Source {
    fn new(a: SymExpr, b: SymExpr) -> Self {
        Source {
            last_a: last_noise(a.symbols(), Run::A),
            last_b: last_noise(b.symbols(), Run::B),
            a,
            b,
        }
    }
}

/// `(site, occurrence)` per guard, so loop iterations pair up in order.
fn guard_keys(path: &SymbolicPath) -> Vec<(SiteId, usize)> {
    let mut keys: Vec<(SiteId, usize)> = Vec::with_capacity(path.guards.len());
    for g in &path.guards {
        let seen = keys.iter().filter(|(site, _)| *site == g.site).count();
        keys.push((g.site, seen));
    }
    keys
}

/// The events of a path pair, indexed by the sample that closes them.
struct PairEvents<'p> {
    sources: Vec<Source>,
    b_guards: Vec<(Option<usize>, &'p Guard)>,
    outputs: Vec<(Option<usize>, &'p OutputEvent, &'p OutputEvent)>,
}

impl<'p> PairEvents<'p> {
    fn new(a: &'p SymbolicPath, b: &'p SymbolicPath) -> Self {
        let mut sources = Vec::new();
        let mut b_guards = Vec::new();
        let a_keys = guard_keys(a);
        for (gb, key) in b.guards.iter().zip(guard_keys(b)) {
            b_guards.push((last_noise(gb.condition.symbols(), Run::B), gb));
            let partner = a_keys
                .iter()
                .position(|k| *k == key)
                .and_then(|i| a.guards.get(i))
                .filter(|ga| ga.taken == gb.taken);
            if let Some(ga) = partner {
                let (atoms_a, atoms_b) = (ga.condition.atoms(), gb.condition.atoms());
                if atoms_a.len() == atoms_b.len() {
                    for ((op_a, la, ra), (op_b, lb, rb)) in atoms_a.into_iter().zip(atoms_b) {
                        if op_a == op_b {
                            sources.push(Source::new(
                                la.clone() - ra.clone(),
                                lb.clone() - rb.clone(),
                            ));
                        }
                    }
                }
            }
        }

        let mut outputs = Vec::new();
        for (oa, ob) in a.outputs.iter().zip(&b.outputs) {
            let source = Source::new(oa.value.clone(), ob.value.clone());
            outputs.push((source.last_a.max(source.last_b), oa, ob));
            sources.push(source);
        }
        PairEvents {
            sources,
            b_guards,
            outputs,
        }
    }
}

/// Settings of a coupling search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouplingSearch {
    /// Stop after this many aligned couplings.
    pub max_couplings: usize,
    /// Drop partial couplings whose loss already exceeds the check bound.
    pub prune_by_loss: bool,
    /// Nodes visited before the search gives up.
    pub max_steps: usize,
}

impl Default for CouplingSearch {
    fn default() -> Self {
        CouplingSearch {
            max_couplings: 8,
            prune_by_loss: true,
            max_steps: 20_000,
        }
    }
}

/// A partial coupling whose loss was shown to exceed the bound.
#[derive(Debug, Clone, PartialEq)]
pub struct LossWitness {
    pub coupling: Coupling,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The paths cannot be two executions on adjacent inputs.
    Incompatible(String),
    Searched {
        couplings: Vec<Coupling>,
        /// First loss violation met while pruning.
        witness: Option<LossWitness>,
        /// Why the first rejected candidate failed, when nothing aligned.
        reason: Option<String>,
        /// The step limit cut the search short.
        truncated: bool,
    },
}

/// What a strategy sees when proposing substitutions for sample `k`.
struct Sample<'a> {
    k: usize,
    sources: &'a [Source],
    partial: &'a Coupling,
    sensitivity: i64,
}

type Strategy = fn(&Sample<'_>) -> Vec<CouplingEntry>;

/// Candidate order per sample. Duplicated substitutions keep their first
/// template.
const STRATEGIES: [(Template, Strategy); 5] = [
    (Template::Identity, identity),
    (Template::AlignedShift, aligned_shifts),
    (Template::SensitivityShift, sensitivity_shifts),
    (Template::Reflect, reflect),
    (Template::ReflectShift, reflected_shifts),
];

fn identity(sample: &Sample<'_>) -> Vec<CouplingEntry> {
    vec![CouplingEntry::identity(sample.k)]
}

fn aligned_shifts(sample: &Sample<'_>) -> Vec<CouplingEntry> {
    derived_shifts(sample, 1)
        .map(|d| CouplingEntry::new(sample.k, Template::AlignedShift, 1, d))
        .collect()
}

fn sensitivity_shifts(sample: &Sample<'_>) -> Vec<CouplingEntry> {
    let s = sample.sensitivity;
    [s, -s]
        .into_iter()
        .map(|d| CouplingEntry::new(sample.k, Template::SensitivityShift, 1, SymExpr::Const(d)))
        .collect()
}

fn reflect(sample: &Sample<'_>) -> Vec<CouplingEntry> {
    vec![CouplingEntry::new(sample.k, Template::Reflect, -1, SymExpr::Const(0))]
}

fn reflected_shifts(sample: &Sample<'_>) -> Vec<CouplingEntry> {
    derived_shifts(sample, -1)
        .map(|d| CouplingEntry::new(sample.k, Template::ReflectShift, -1, d))
        .collect()
}

/// Noise-free shifts that make a source closed by sample `k` agree across
/// runs, for sources whose run-A coefficient on the sample is `sign` times
/// run B's.
fn derived_shifts<'a>(sample: &'a Sample<'a>, sign: i64) -> impl Iterator<Item = SymExpr> + 'a {
    let k = sample.k;
    let eta_a = Symbol::noise(Run::A, k);
    let eta_b = Symbol::noise(Run::B, k);
    sample
        .sources
        .iter()
        .filter(move |src| src.last_b == Some(k) && !src.last_a.is_some_and(|j| j > k))
        .filter_map(move |src| {
            let fa = LinearForm::from_expr(&src.a);
            let fb = LinearForm::from_expr(&sample.partial.apply(&src.b));
            let (ca, cb) = (fa.coefficient(&eta_a), fb.coefficient(&eta_b));
            if cb == 0 || ca != sign * cb {
                return None;
            }
            let d = fa.without(&eta_a).sub(&fb.without(&eta_b)).div_exact(cb)?;
            (!d.mentions(&Symbol::is_noise)).then(|| d.to_expr())
        })
}

struct Dfs<'s, 'c, 'p> {
    ctx: &'s VerificationContext<'c>,
    a: &'p SymbolicPath,
    events: PairEvents<'p>,
    premise: Vec<&'s BoolExpr>,
    settings: CouplingSearch,
    label: String,
    found: Vec<Coupling>,
    witness: Option<LossWitness>,
    reason: Option<String>,
    steps: usize,
}

impl Dfs<'_, '_, '_> {
    fn done(&self) -> bool {
        self.found.len() >= self.settings.max_couplings || self.steps >= self.settings.max_steps
    }

    fn reject(&mut self, reason: impl FnOnce() -> String) -> bool {
        if self.reason.is_none() {
            self.reason = Some(reason());
        }
        false
    }

    fn candidates(&self, k: usize, partial: &Coupling) -> Vec<CouplingEntry> {
        let sample = Sample {
            k,
            sources: &self.events.sources,
            partial,
            sensitivity: self.ctx.contract().relation.sensitivity(),
        };
        let mut unique: Vec<CouplingEntry> = Vec::new();
        for (_, strategy) in STRATEGIES {
            for c in strategy(&sample) {
                if !unique.iter().any(|u| u.same_substitution(&c)) {
                    unique.push(c);
                }
            }
        }
        unique
    }

    /// Every event closed by sample `closing` (or noise-free when `None`)
    /// aligns under `coupling`.
    fn aligns(
        &mut self,
        session: &mut SolverSession,
        closing: Option<usize>,
        coupling: &Coupling,
    ) -> Result<bool, OracleError> {
        let guards: Vec<&Guard> = self
            .events
            .b_guards
            .iter()
            .filter(|(at, _)| *at == closing)
            .map(|(_, g)| *g)
            .collect();
        for guard in guards {
            let goal = coupling.apply_bool(&guard.condition);
            let label = format!("{} guard @{}", self.label, guard.site);
            if !session.is_valid(&label, &self.premise, &goal)? {
                return Ok(self.reject(|| {
                    format!("run B guard at offset {} is not implied by run A: {goal}", guard.site)
                }));
            }
        }
        let outputs: Vec<(&OutputEvent, &OutputEvent)> = self
            .events
            .outputs
            .iter()
            .filter(|(at, _, _)| *at == closing)
            .map(|(_, oa, ob)| (*oa, *ob))
            .collect();
        for (oa, ob) in outputs {
            let fa = LinearForm::from_expr(&oa.value);
            let fb = LinearForm::from_expr(&coupling.apply(&ob.value));
            if fa != fb {
                return Ok(self.reject(|| {
                    format!("output at offset {} differs: {fa} vs {fb}", oa.site)
                }));
            }
        }
        Ok(true)
    }

    /// The loss of the samples coupled so far already exceeds the bound.
    fn over_budget(
        &mut self,
        session: &mut SolverSession,
        coupling: &Coupling,
    ) -> Result<bool, OracleError> {
        let k = coupling.entries.len();
        let label = format!("{} partial loss eta0..{}", self.label, k.saturating_sub(1));
        let program = loss_program(self.ctx, self.a, coupling, self.a.noise.iter().take(k), label);
        Ok(match session.discharge(&program)? {
            BoundOutcome::Counterexample(assignment) => {
                if self.witness.is_none() {
                    self.witness = Some(LossWitness {
                        coupling: coupling.clone(),
                        assignment,
                    });
                }
                true
            }
            BoundOutcome::Certified | BoundOutcome::Unknown(_) => false,
        })
    }

    fn descend(
        &mut self,
        session: &mut SolverSession,
        coupling: &mut Coupling,
    ) -> Result<(), OracleError> {
        let k = coupling.entries.len();
        if k == self.a.noise.len() {
            self.found.push(coupling.clone());
            return Ok(());
        }
        for candidate in self.candidates(k, coupling) {
            if self.done() {
                break;
            }
            self.steps += 1;
            trace!(pair = %self.label, entry = %candidate, "trying");
            let free = candidate.is_free();
            coupling.entries.push(candidate);
            let keep = self.aligns(session, Some(k), coupling)?
                && (free || !self.settings.prune_by_loss || !self.over_budget(session, coupling)?);
            if keep {
                self.descend(session, coupling)?;
            }
            coupling.entries.pop();
        }
        Ok(())
    }
}

impl CouplingSearch {
    /// First aligned coupling only, without loss pruning.
    pub fn first() -> Self {
        CouplingSearch {
            max_couplings: 1,
            prune_by_loss: false,
            ..CouplingSearch::default()
        }
    }

    pub fn run(
        &self,
        ctx: &VerificationContext<'_>,
        (a_index, a): (usize, &SymbolicPath),
        (b_index, b): (usize, &SymbolicPath),
        session: &mut SolverSession,
    ) -> Result<SearchOutcome, OracleError> {
        if !a.is_structurally_compatible(b) {
            return Ok(SearchOutcome::Incompatible(
                "outputs or samples are produced at different program points".into(),
            ));
        }
        let label = format!("variant {} pair {a_index}/{b_index}", ctx.binding.variant);

        let pc_a = a.path_condition();
        let pc_b = b.path_condition();
        let noise_a = a.noise_domain(ctx.noise_bound);
        let noise_b = b.noise_domain(ctx.noise_bound);
        let mut joint = ctx.premise_refs();
        joint.extend([&pc_a, &pc_b]);
        joint.extend(noise_a.iter().chain(&noise_b));
        if !session.is_sat(&format!("{label} joint feasibility"), &joint)? {
            return Ok(SearchOutcome::Incompatible(
                "path conditions are jointly unsatisfiable".into(),
            ));
        }

        let searched = |reason: String| SearchOutcome::Searched {
            couplings: Vec::new(),
            witness: None,
            reason: Some(reason),
            truncated: false,
        };
        for (na, nb) in a.noise.iter().zip(&b.noise) {
            if na.scale != nb.scale {
                return Ok(searched(format!(
                    "sample {} has scale {} in run A but {} in run B",
                    na.ordinal, na.scale, nb.scale
                )));
            }
        }

        let mut premise = ctx.premise_refs();
        premise.push(&pc_a);
        let mut dfs = Dfs {
            ctx,
            a,
            events: PairEvents::new(a, b),
            premise,
            settings: *self,
            label,
            found: Vec::new(),
            witness: None,
            reason: None,
            steps: 0,
        };
        let mut coupling = Coupling::default();
        if dfs.aligns(session, None, &coupling)? {
            dfs.descend(session, &mut coupling)?;
        }
        debug!(
            pair = %dfs.label,
            couplings = dfs.found.len(),
            steps = dfs.steps,
            "coupling search finished"
        );
        let truncated = dfs.steps >= self.max_steps && dfs.found.len() < self.max_couplings;
        Ok(SearchOutcome::Searched {
            reason: if dfs.found.is_empty() { dfs.reason } else { None },
            couplings: dfs.found,
            witness: dfs.witness,
            truncated,
        })
    }
}

/// The first aligned coupling of a compatible pair, if any.
pub fn couple(
    ctx: &VerificationContext<'_>,
    a: &SymbolicPath,
    b: &SymbolicPath,
    session: &mut SolverSession,
) -> Result<Option<Coupling>, OracleError> {
    Ok(match CouplingSearch::first().run(ctx, (0, a), (0, b), session)? {
        SearchOutcome::Searched { mut couplings, .. } if !couplings.is_empty() => {
            Some(couplings.remove(0))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::session::SessionConfig;
    use crate::oracle::symex::BoundedExecutor;
    use crate::oracle::{ExplorationBounds, SymbolicOracle};
    use dpcheck_dsl::AnnotatedProgram;
    use dpcheck_ir::{variants, InputBinding};

    fn paths(program: &AnnotatedProgram, binding: &InputBinding, run: Run) -> Vec<SymbolicPath> {
        let mut out = Vec::new();
        BoundedExecutor::default()
            .explore(program, binding, run, &ExplorationBounds::default(), &mut |p| {
                out.push(p);
                true
            })
            .unwrap();
        out
    }

    fn with_pair<R>(
        src: &str,
        size: usize,
        f: impl FnOnce(&VerificationContext<'_>, &[SymbolicPath], &[SymbolicPath], &mut SolverSession) -> R,
    ) -> R {
        let program = dpcheck_dsl::parse(src, "t.c").unwrap();
        let binding = &variants(&program.contract, size, 1).unwrap()[0];
        let ctx = VerificationContext::new(&program, binding, 10, 10).unwrap();
        let a = paths(&program, binding, Run::A);
        let b = paths(&program, binding, Run::B);
        let mut session = SolverSession::new("test", SessionConfig::default());
        f(&ctx, &a, &b, &mut session)
    }

    const NOISY_OUTPUT: &str = r#"
int f(float q[], int size, float epsilon) {
  "TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>;";
  "PRECONDITION: ALL_DIFFER;";
  "CHECK: epsilon";
  float eta = Lap(2 / epsilon);
  CHECKDP_OUTPUT(q[0] + eta);
}
"#;

    const THRESHOLD: &str = r#"
int f(float q[], int size, float epsilon, int T) {
  "TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>; T: <0, 0>;";
  "PRECONDITION: ALL_DIFFER;";
  "CHECK: epsilon";
  float eta = Lap(2 / epsilon);
  if (q[0] + eta >= T) { CHECKDP_OUTPUT(1); } else { CHECKDP_OUTPUT(0); }
}
"#;

    #[test]
    fn output_derives_aligning_shift() {
        with_pair(NOISY_OUTPUT, 1, |ctx, a, b, session| {
            let coupling = couple(ctx, &a[0], &b[0], session).unwrap().unwrap();
            let entry = &coupling.entries[0];
            assert_eq!(entry.template, Template::AlignedShift);
            let d = SymExpr::Sym(Symbol::element(Run::A, 0)) - SymExpr::Sym(Symbol::element(Run::B, 0));
            assert_eq!(LinearForm::from_expr(&entry.shift), LinearForm::from_expr(&d));
            assert!(coupling.validate(1).is_ok());
            let out_b = LinearForm::from_expr(&coupling.apply(&b[0].outputs[0].value));
            assert_eq!(out_b, LinearForm::from_expr(&a[0].outputs[0].value));
        });
    }

    #[test]
    fn guard_pairs_align_on_the_same_branch() {
        with_pair(THRESHOLD, 1, |ctx, a, b, session| {
            assert_eq!((a.len(), b.len()), (2, 2));
            // true/true: the shift from the guard makes B's guard identical.
            let c = couple(ctx, &a[0], &b[0], session).unwrap().unwrap();
            assert_eq!(c.entries[0].template, Template::AlignedShift);
            // true/false is structurally incompatible.
            let outcome = CouplingSearch::first()
                .run(ctx, (0, &a[0]), (1, &b[1]), session)
                .unwrap();
            assert!(matches!(outcome, SearchOutcome::Incompatible(_)));
        });
    }

    #[test]
    fn search_enumerates_alternatives_in_order() {
        with_pair(THRESHOLD, 1, |ctx, a, b, session| {
            let search = CouplingSearch {
                prune_by_loss: false,
                ..CouplingSearch::default()
            };
            match search.run(ctx, (0, &a[0]), (0, &b[0]), session).unwrap() {
                SearchOutcome::Searched { couplings, .. } => {
                    // The guard shift, then +1 which also keeps B's guard implied.
                    assert!(couplings.len() >= 2);
                    assert_eq!(couplings[0].entries[0].template, Template::AlignedShift);
                    assert_eq!(couplings[1].entries[0].template, Template::SensitivityShift);
                    assert_eq!(couplings[1].entries[0].shift, SymExpr::Const(1));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        });
    }

    #[test]
    fn too_small_budget_prunes_with_witness() {
        let src = NOISY_OUTPUT.replace("CHECK: epsilon", "CHECK: epsilon / 4");
        with_pair(&src, 1, |ctx, a, b, session| {
            match CouplingSearch::default().run(ctx, (0, &a[0]), (0, &b[0]), session).unwrap() {
                SearchOutcome::Searched {
                    couplings, witness, ..
                } => {
                    assert!(couplings.is_empty());
                    let witness = witness.expect("loss witness");
                    assert_eq!(witness.coupling.entries[0].template, Template::AlignedShift);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        });
    }

    #[test]
    fn noise_free_output_difference_has_no_coupling() {
        let src = NOISY_OUTPUT.replace("CHECKDP_OUTPUT(q[0] + eta)", "CHECKDP_OUTPUT(q[0])");
        with_pair(&src, 1, |ctx, a, b, session| {
            match CouplingSearch::default().run(ctx, (0, &a[0]), (0, &b[0]), session).unwrap() {
                SearchOutcome::Searched {
                    couplings, reason, ..
                } => {
                    assert!(couplings.is_empty());
                    assert!(reason.unwrap().contains("differs"));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        });
    }

    #[test]
    fn validate_rejects_non_measure_preserving_scale() {
        let bad = Coupling::new(vec![CouplingEntry::new(0, Template::Reflect, 2, SymExpr::Const(0))]);
        let err = bad.validate(1).unwrap_err();
        assert!(err.reason.contains("measure preserving"));
        let noisy = Coupling::new(vec![CouplingEntry::new(
            0,
            Template::AlignedShift,
            1,
            SymExpr::Sym(Symbol::noise(Run::A, 0)),
        )]);
        assert!(noisy.validate(1).is_err());
        assert!(Coupling::default().validate(1).is_err());
    }

    #[test]
    fn entries_render_as_substitutions() {
        let c = Coupling::new(vec![
            CouplingEntry::identity(0),
            CouplingEntry::new(1, Template::ReflectShift, -1, SymExpr::Const(2)),
        ]);
        assert_eq!(c.lines()[0], "eta0@B = eta0@A (identity)");
        assert_eq!(c.lines()[1], "eta1@B = -eta1@A + 2 (reflect and shift)");
    }

    #[test]
    fn strategies_propose_in_template_order() {
        let q = |run| SymExpr::sym(Symbol::element(run, 0));
        let eta = |run| SymExpr::sym(Symbol::noise(run, 0));
        let sources = [
            Source::new(q(Run::A) + eta(Run::A), q(Run::B) + eta(Run::B)),
            Source::new(q(Run::A) - eta(Run::A), q(Run::B) + eta(Run::B)),
        ];
        let partial = Coupling::new(Vec::new());
        let sample = Sample {
            k: 0,
            sources: &sources,
            partial: &partial,
            sensitivity: 1,
        };
        let mut proposed = Vec::new();
        for (template, strategy) in STRATEGIES {
            let out = strategy(&sample);
            assert!(out.iter().all(|c| c.template == template), "{template}");
            proposed.extend(out);
        }
        let templates: Vec<Template> = proposed.iter().map(|c| c.template).collect();
        assert_eq!(
            templates,
            [
                Template::Identity,
                Template::AlignedShift,
                Template::SensitivityShift,
                Template::SensitivityShift,
                Template::Reflect,
                Template::ReflectShift,
            ]
        );
        let shift = q(Run::A) - q(Run::B);
        assert_eq!(LinearForm::from_expr(&proposed[1].shift), LinearForm::from_expr(&shift));
        assert_eq!(proposed[5].sign, -1);
        assert_eq!(LinearForm::from_expr(&proposed[5].shift), LinearForm::from_expr(&shift));
    }

    #[test]
    fn samples_without_closing_sources_get_fixed_templates_only() {
        let partial = Coupling::new(Vec::new());
        let sample = Sample {
            k: 3,
            sources: &[],
            partial: &partial,
            sensitivity: 2,
        };
        assert!(aligned_shifts(&sample).is_empty());
        assert!(reflected_shifts(&sample).is_empty());
        let shifts: Vec<SymExpr> = sensitivity_shifts(&sample).into_iter().map(|c| c.shift).collect();
        assert_eq!(shifts, [SymExpr::Const(2), SymExpr::Const(-2)]);
        assert_eq!(identity(&sample)[0].ordinal, 3);
    }
}
