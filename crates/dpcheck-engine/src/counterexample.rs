//! Concrete counterexamples: input arrays, parameters, noise and the
//! outputs both runs produce at a witness point.

use dpcheck_ir::{BoolExpr, Run, ScalarBinding, Symbol, SymbolicPath};
use indexmap::IndexMap;

use crate::aggregator::Failure;
use crate::context::VerificationContext;
use crate::explorer::Exploration;
use crate::oracle::session::{value_of, SolverSession};
use crate::oracle::{Assignment, OracleError};
use crate::result::{Counterexample, PathSummary};

fn summarize(index: usize, path: &SymbolicPath) -> PathSummary {
    PathSummary {
        index,
        trace: path.trace(),
        guards: path.guards.iter().map(|g| g.condition.to_string()).collect(),
        outputs: path.outputs.iter().map(|o| o.value.to_string()).collect(),
    }
}

/// A point satisfying the premise and the path conditions of the failing
/// paths, for failures that carry no witness of their own.
fn solve_witness(
    ctx: &VerificationContext<'_>,
    a: Option<&SymbolicPath>,
    b: Option<&SymbolicPath>,
    session: &mut SolverSession,
) -> Result<Assignment, OracleError> {
    let mut constraints: Vec<BoolExpr> = Vec::new();
    let mut declare: Vec<Symbol> = ctx.binding.input_symbols().into_iter().collect();
    for path in a.into_iter().chain(b) {
        constraints.push(path.path_condition());
        constraints.extend(path.noise_domain(ctx.noise_bound));
        declare.extend(path.noise.iter().map(|n| n.symbol.clone()));
    }
    let mut refs = ctx.premise_refs();
    refs.extend(constraints.iter());
    let model = session.satisfy("counterexample witness", &refs, &declare)?;
    Ok(match model {
        Some(model) => declare
            .iter()
            .map(|s| (s.clone(), value_of(&model, s)))
            .collect(),
        None => Assignment::new(),
    })
}

/// Make `failure` concrete under `ctx`'s binding.
pub fn build(
    ctx: &VerificationContext<'_>,
    exploration: &Exploration,
    failure: &Failure,
    session: &mut SolverSession,
) -> Result<Counterexample, OracleError> {
    let a = failure.a.and_then(|i| exploration.a.get(i));
    let b = failure.b.and_then(|j| exploration.b.get(j));

    let mut values = match &failure.witness {
        Some(w) => w.clone(),
        None => solve_witness(ctx, a, b, session)?,
    };

    // Run B's noise follows the coupling when there is one.
    if let (Some(coupling), Some(b)) = (&failure.coupling, b) {
        let mut coupled = Vec::new();
        for n in &b.noise {
            let image = coupling
                .entry(n.ordinal)
                .and_then(|e| e.image().evaluate(&|s| values.get(s).copied()));
            if let Some(v) = image {
                coupled.push((n.symbol.clone(), v));
            }
        }
        values.extend(coupled);
    }
    let lookup = |s: &Symbol| Some(values.get(s).copied().unwrap_or(0));

    let binding = ctx.binding;
    let inputs = |run: Run| -> Vec<i64> {
        (0..binding.size)
            .filter_map(|i| binding.element(run, i))
            .map(|s| values.get(&s).copied().unwrap_or(0))
            .collect()
    };
    let mut params = IndexMap::new();
    for (name, scalar) in &binding.scalars {
        match scalar {
            ScalarBinding::Concrete(v) => {
                params.insert(name.clone(), *v);
            }
            ScalarBinding::Shared(s) => {
                params.insert(name.clone(), values.get(s).copied().unwrap_or(0));
            }
            ScalarBinding::PerRun => {
                for run in [Run::A, Run::B] {
                    let s = Symbol::Scalar {
                        run,
                        name: name.clone(),
                    };
                    params.insert(format!("{name}@{run}"), values.get(&s).copied().unwrap_or(0));
                }
            }
        }
    }
    let noise = |p: Option<&SymbolicPath>| -> Vec<i64> {
        p.map(|p| p.noise.iter().map(|n| values.get(&n.symbol).copied().unwrap_or(0)).collect())
            .unwrap_or_default()
    };
    let outputs = |p: Option<&SymbolicPath>| -> Vec<i64> {
        p.map(|p| {
            p.outputs
                .iter()
                .map(|o| o.value.evaluate(&lookup).unwrap_or(0))
                .collect()
        })
        .unwrap_or_default()
    };

    Ok(Counterexample {
        kind: failure.kind,
        reason: failure.reason.clone(),
        variant: binding.variant,
        differing: binding.differing,
        path_a: failure.a.zip(a).map(|(i, p)| summarize(i, p)),
        path_b: failure.b.zip(b).map(|(j, p)| summarize(j, p)),
        coupling: failure
            .coupling
            .as_ref()
            .map(|c| c.lines())
            .unwrap_or_default(),
        inputs_a: inputs(Run::A),
        inputs_b: inputs(Run::B),
        params,
        noise_a: noise(a),
        noise_b: noise(b),
        outputs_a: outputs(a),
        outputs_b: outputs(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::{Coupling, CouplingEntry, Template};
    use crate::oracle::session::SessionConfig;
    use crate::result::FailureKind;
    use dpcheck_ir::{variants, NoiseFamily, NoiseVar, OutputEvent, SymExpr};

    const SRC: &str = r#"
int f(float q[], int size, float epsilon, int T) {
  "TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>; T: <0, 0>;";
  "PRECONDITION: ONE_DIFFER;";
  "CHECK: epsilon";
  float eta = Lap(2 / epsilon);
  CHECKDP_OUTPUT(q[0] + eta);
}
"#;

    fn path(run: Run) -> SymbolicPath {
        let mut p = SymbolicPath::new(run, 0);
        p.noise.push(NoiseVar {
            symbol: Symbol::noise(run, 0),
            ordinal: 0,
            site: 3,
            family: NoiseFamily::Laplace,
            scale: SymExpr::Const(2),
            outputs_before: 0,
        });
        p.outputs.push(OutputEvent {
            site: 7,
            value: SymExpr::Sym(Symbol::element(run, 0)) + SymExpr::Sym(Symbol::noise(run, 0)),
        });
        p
    }

    #[test]
    fn witness_drives_coupled_noise_and_outputs() {
        let program = dpcheck_dsl::parse(SRC, "f.c").unwrap();
        let binding = &variants(&program.contract, 2, 1).unwrap()[0];
        let ctx = VerificationContext::new(&program, binding, 10, 10).unwrap();
        let exploration = Exploration {
            a: vec![path(Run::A)],
            b: vec![path(Run::B)],
        };
        let q = |run| SymExpr::Sym(Symbol::element(run, 0));
        let coupling = Coupling::new(vec![CouplingEntry::new(
            0,
            Template::AlignedShift,
            1,
            q(Run::A) - q(Run::B),
        )]);
        let witness: Assignment = [
            (Symbol::element(Run::A, 0), 4),
            (Symbol::element(Run::B, 0), 3),
            (Symbol::element(Run::A, 1), 9),
            (Symbol::Param("T".into()), 2),
            (Symbol::noise(Run::A, 0), -1),
        ]
        .into_iter()
        .collect();
        let failure = Failure {
            kind: FailureKind::DivergenceBoundFailed,
            reason: "loss".into(),
            a: Some(0),
            b: Some(0),
            coupling: Some(coupling),
            witness: Some(witness),
        };
        let mut session = SolverSession::new("test", SessionConfig::default());
        let cx = build(&ctx, &exploration, &failure, &mut session).unwrap();
        assert_eq!(cx.inputs_a, vec![4, 9]);
        // q[1] is shared under ONE_DIFFER at index 0.
        assert_eq!(cx.inputs_b, vec![3, 9]);
        assert_eq!(cx.noise_b, vec![0]);
        assert_eq!(cx.outputs_a, cx.outputs_b);
        assert_eq!(cx.params["T"], 2);
        assert_eq!(cx.params["epsilon"], 1);
        assert_eq!(cx.differing, Some(0));
        assert_eq!(cx.coupling.len(), 1);
    }

    #[test]
    fn unmatched_path_is_solved_for_a_point() {
        let program = dpcheck_dsl::parse(SRC, "f.c").unwrap();
        let binding = &variants(&program.contract, 1, 1).unwrap()[0];
        let ctx = VerificationContext::new(&program, binding, 10, 10).unwrap();
        let exploration = Exploration {
            a: vec![path(Run::A)],
            b: Vec::new(),
        };
        let failure = Failure {
            kind: FailureKind::UnmatchedPath,
            reason: "unmatched".into(),
            a: Some(0),
            b: None,
            coupling: None,
            witness: None,
        };
        let mut session = SolverSession::new("test", SessionConfig::default());
        let cx = build(&ctx, &exploration, &failure, &mut session).unwrap();
        assert!(cx.path_b.is_none());
        assert_eq!(cx.noise_a.len(), 1);
        assert!(cx.noise_b.is_empty());
        assert_eq!(cx.outputs_a.len(), 1);
        assert!(cx.inputs_a[0].abs() <= 10);
    }
}
