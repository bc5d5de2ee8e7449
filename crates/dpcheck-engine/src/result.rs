use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Why a run could not be decided either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconclusiveKind {
    /// Path exploration or a solver call exhausted its budget twice.
    ExplorationTimeout,
    /// A loop with a symbolic condition ran past the unrolling bound.
    UnboundedLoop,
    /// The inference oracle could neither certify nor refute a bound.
    InconclusiveBound,
    /// The coupling search or consistency search hit its step limit.
    SearchLimit,
}

impl fmt::Display for InconclusiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InconclusiveKind::ExplorationTimeout => "exploration timeout",
            InconclusiveKind::UnboundedLoop => "unbounded loop",
            InconclusiveKind::InconclusiveBound => "inconclusive bound",
            InconclusiveKind::SearchLimit => "search limit",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No proof template aligned the pair; the program may still be private.
    NoCouplingFound,
    /// The privacy loss exceeds the check bound at the witness point.
    DivergenceBoundFailed,
    /// A path of one run has no partner in the other.
    UnmatchedPath,
}

impl FailureKind {
    /// Whether the failure is a genuine violation rather than a missing proof.
    pub fn is_violation(self) -> bool {
        !matches!(self, FailureKind::NoCouplingFound)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::NoCouplingFound => "no proof template matched",
            FailureKind::DivergenceBoundFailed => "divergence bound failed",
            FailureKind::UnmatchedPath => "unmatched path",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathSummary {
    pub index: usize,
    /// Branch trace such as `TFT`.
    pub trace: String,
    pub guards: Vec<String>,
    pub outputs: Vec<String>,
}

/// Concrete evidence that the claimed budget does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counterexample {
    pub kind: FailureKind,
    pub reason: String,
    pub variant: usize,
    /// The single differing index for `ONE_DIFFER`.
    pub differing: Option<usize>,
    pub path_a: Option<PathSummary>,
    pub path_b: Option<PathSummary>,
    /// Substitution lines of the failing coupling, when one was built.
    pub coupling: Vec<String>,
    pub inputs_a: Vec<i64>,
    pub inputs_b: Vec<i64>,
    pub params: IndexMap<String, i64>,
    pub noise_a: Vec<i64>,
    pub noise_b: Vec<i64>,
    /// Outputs both runs produce at the witness point.
    pub outputs_a: Vec<i64>,
    pub outputs_b: Vec<i64>,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Failure: {} ({})", self.kind, self.reason)?;
        match self.differing {
            Some(i) => writeln!(f, "Variant {} (index {i} differs)", self.variant)?,
            None => writeln!(f, "Variant {}", self.variant)?,
        }
        writeln!(f, "  input A: {:?}", self.inputs_a)?;
        writeln!(f, "  input B: {:?}", self.inputs_b)?;
        for (name, value) in &self.params {
            writeln!(f, "  {name} = {value}")?;
        }
        for (label, path) in [("A", &self.path_a), ("B", &self.path_b)] {
            if let Some(p) = path {
                writeln!(f, "  path {label} #{} [{}]", p.index, p.trace)?;
                for g in &p.guards {
                    writeln!(f, "    guard: {g}")?;
                }
                for o in &p.outputs {
                    writeln!(f, "    output: {o}")?;
                }
            }
        }
        if !self.coupling.is_empty() {
            writeln!(f, "  coupling:")?;
            for line in &self.coupling {
                writeln!(f, "    {line}")?;
            }
        }
        writeln!(f, "  noise A: {:?}", self.noise_a)?;
        writeln!(f, "  noise B: {:?}", self.noise_b)?;
        writeln!(f, "  outputs A: {:?}", self.outputs_a)?;
        write!(f, "  outputs B: {:?}", self.outputs_b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The program satisfies its check bound at this epsilon.
    Proven { epsilon: i64 },
    Disproven { counterexample: Box<Counterexample> },
    Inconclusive {
        kind: InconclusiveKind,
        detail: String,
    },
}

impl Verdict {
    /// Stable name of the verdict kind, independent of its payload.
    pub fn verdict_class(&self) -> &'static str {
        match self {
            Verdict::Proven { .. } => "proven",
            Verdict::Disproven { .. } => "disproven",
            Verdict::Inconclusive { .. } => "inconclusive",
        }
    }

    /// Process exit code: 0 proven, 1 disproven, 2 inconclusive.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Proven { .. } => 0,
            Verdict::Disproven { .. } => 1,
            Verdict::Inconclusive { .. } => 2,
        }
    }

    pub fn counterexample(&self) -> Option<&Counterexample> {
        match self {
            Verdict::Disproven { counterexample } => Some(counterexample),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Proven { epsilon } => {
                writeln!(f, "RESULT: PROVEN")?;
                write!(f, "Every adjacent pair satisfies the check bound at epsilon = {epsilon}.")
            }
            Verdict::Disproven { counterexample } => {
                writeln!(f, "RESULT: DISPROVEN")?;
                write!(f, "{counterexample}")
            }
            Verdict::Inconclusive { kind, detail } => {
                writeln!(f, "RESULT: INCONCLUSIVE")?;
                write!(f, "Reason: {kind}: {detail}")
            }
        }
    }
}

/// Work counters of one verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub variants: usize,
    pub paths_a: usize,
    pub paths_b: usize,
    /// Pairs with matching structure.
    pub compatible_pairs: usize,
    /// Couplings handed to the divergence checker.
    pub couplings_checked: usize,
    pub solver_queries: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub function: String,
    pub relation: String,
    pub size: usize,
    pub epsilon: i64,
    pub check: String,
    /// SHA-256 of the program text.
    pub source_hash: String,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub stats: Stats,
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Function: {} ({}, size {}, epsilon {}, CHECK {})",
            self.function, self.relation, self.size, self.epsilon, self.check
        )?;
        writeln!(f, "Source: sha256 {}", self.source_hash)?;
        writeln!(f, "{}", self.verdict)?;
        write!(
            f,
            "Stats: {} variant(s), {}/{} paths, {} compatible pairs, {} couplings checked, {} solver queries, {} ms",
            self.stats.variants,
            self.stats.paths_a,
            self.stats.paths_b,
            self.stats.compatible_pairs,
            self.stats.couplings_checked,
            self.stats.solver_queries,
            self.stats.elapsed_ms
        )
    }
}
