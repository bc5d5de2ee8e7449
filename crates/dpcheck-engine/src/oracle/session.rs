//! One worker's solver: Z3 with a per-call timeout, one retry on timeout,
//! an optional overall deadline and optional SMT-LIB dumps.

use std::path::PathBuf;
use std::time::Instant;

use dpcheck_ir::{BoolExpr, Symbol};
use dpcheck_smt::backends::z3_backend::Z3Solver;
use dpcheck_smt::encoder::{model_value, Query};
use dpcheck_smt::solver::{Model, SatResult, SmtSolver};
use tracing::{debug, warn};

use super::OracleError;
use crate::pipeline::timeout::deadline_exceeded;

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Per-call timeout; zero disables it.
    pub timeout_ms: u64,
    pub deadline: Option<Instant>,
    pub dump_dir: Option<PathBuf>,
}

/// Outcome of a satisfiability query.
#[derive(Debug, Clone)]
pub enum Answer {
    Sat(Model),
    Unsat,
}

pub struct SolverSession {
    solver: Z3Solver,
    config: SessionConfig,
    label: String,
    queries: usize,
}

impl SolverSession {
    /// `label` names the owner in dumped file names, e.g. `worker-3`.
    pub fn new(label: impl Into<String>, config: SessionConfig) -> Self {
        SolverSession {
            solver: Z3Solver::with_timeout_ms(config.timeout_ms),
            config,
            label: label.into(),
            queries: 0,
        }
    }

    pub fn queries(&self) -> usize {
        self.queries
    }

    pub fn check(&mut self, query: &Query) -> Result<Answer, OracleError> {
        if deadline_exceeded(self.config.deadline) {
            return Err(OracleError::timeout("verification deadline"));
        }
        self.queries += 1;
        self.dump(query);

        let (mut result, mut model) = self.run(query)?;
        if result.is_timeout() && self.config.timeout_ms > 0 {
            let doubled = self.config.timeout_ms.saturating_mul(2);
            warn!(
                session = %self.label,
                query = self.queries,
                timeout_ms = doubled,
                "solver timed out, retrying with doubled budget"
            );
            self.solver.set_timeout_ms(doubled);
            let retried = self.run(query);
            self.solver.set_timeout_ms(self.config.timeout_ms);
            (result, model) = retried?;
        }
        match result {
            SatResult::Sat => Ok(Answer::Sat(model.unwrap_or_default())),
            SatResult::Unsat => Ok(Answer::Unsat),
            unknown if unknown.is_timeout() => Err(OracleError::timeout(format!(
                "solver query '{}'",
                query.comment
            ))),
            SatResult::Unknown(reason) => Err(OracleError::Unknown(reason)),
        }
    }

    fn run(&mut self, query: &Query) -> Result<(SatResult, Option<Model>), OracleError> {
        query
            .run(&mut self.solver)
            .map_err(|e| OracleError::Solver(e.to_string()))
    }

    /// A model of `constraints`, or `None` when they are unsatisfiable.
    pub fn satisfy(
        &mut self,
        comment: &str,
        constraints: &[&BoolExpr],
        declare: &[Symbol],
    ) -> Result<Option<Model>, OracleError> {
        let mut query = Query::new(comment);
        query.assert_all(constraints.iter().copied());
        for s in declare {
            query.declare(s);
        }
        Ok(match self.check(&query)? {
            Answer::Sat(model) => Some(model),
            Answer::Unsat => None,
        })
    }

    pub fn is_sat(&mut self, comment: &str, constraints: &[&BoolExpr]) -> Result<bool, OracleError> {
        Ok(self.satisfy(comment, constraints, &[])?.is_some())
    }

    /// `premises => goal` holds for every assignment.
    pub fn is_valid(
        &mut self,
        comment: &str,
        premises: &[&BoolExpr],
        goal: &BoolExpr,
    ) -> Result<bool, OracleError> {
        if goal.as_const() == Some(true) {
            return Ok(true);
        }
        let negated = goal.clone().negate();
        let mut constraints = premises.to_vec();
        constraints.push(&negated);
        Ok(!self.is_sat(comment, &constraints)?)
    }

    fn dump(&self, query: &Query) {
        let Some(dir) = &self.config.dump_dir else {
            return;
        };
        let path = dir.join(format!("{}-{:05}.smt2", self.label, self.queries));
        if let Err(e) = std::fs::write(&path, query.to_script()) {
            warn!(path = %path.display(), error = %e, "could not write SMT dump");
        } else {
            debug!(path = %path.display(), "wrote SMT dump");
        }
    }
}

/// Concrete value of `s`, defaulting to zero for symbols the solver left
/// unconstrained.
pub fn value_of(model: &Model, s: &Symbol) -> i64 {
    model_value(model, s).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpcheck_ir::{CmpOp, Run, SymExpr};

    fn q() -> SymExpr {
        SymExpr::Sym(Symbol::element(Run::A, 0))
    }

    #[test]
    fn validity_is_unsat_of_negation() {
        let mut session = SolverSession::new("test", SessionConfig::default());
        let premise = BoolExpr::cmp(CmpOp::Gt, q(), SymExpr::Const(2));
        let weaker = BoolExpr::cmp(CmpOp::Gt, q(), SymExpr::Const(0));
        assert!(session.is_valid("weaken", &[&premise], &weaker).unwrap());
        assert!(!session.is_valid("strengthen", &[&weaker], &premise).unwrap());
        assert_eq!(session.queries(), 2);
    }

    #[test]
    fn satisfy_returns_declared_symbols() {
        let mut session = SolverSession::new("test", SessionConfig::default());
        let eq = BoolExpr::eq(q(), SymExpr::Const(7));
        let eta = Symbol::noise(Run::B, 0);
        let model = session
            .satisfy("model", &[&eq], std::slice::from_ref(&eta))
            .unwrap()
            .unwrap();
        assert_eq!(value_of(&model, &Symbol::element(Run::A, 0)), 7);
        assert!(model_value(&model, &eta).is_some());
    }

    #[test]
    fn expired_deadline_is_a_timeout() {
        let config = SessionConfig {
            deadline: Some(Instant::now()),
            ..SessionConfig::default()
        };
        let mut session = SolverSession::new("test", config);
        let err = session.is_sat("late", &[&BoolExpr::Const(true)]).unwrap_err();
        assert!(matches!(err, OracleError::Timeout { .. }));
        assert!(err.is_inconclusive());
    }

    #[test]
    fn dumps_one_script_per_query() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            dump_dir: Some(dir.path().to_path_buf()),
            ..SessionConfig::default()
        };
        let mut session = SolverSession::new("worker-0", config);
        let g = BoolExpr::cmp(CmpOp::Ge, q(), SymExpr::Const(0));
        session.is_sat("first", &[&g]).unwrap();
        session.is_sat("second", &[&g]).unwrap();
        let script = std::fs::read_to_string(dir.path().join("worker-0-00002.smt2")).unwrap();
        assert!(script.starts_with("; second"));
        assert!(script.contains("(assert (>= q_a_0 0))"));
    }
}
