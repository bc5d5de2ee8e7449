use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use z3::SatResult as Z3SatResult;

use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::terms::{SmtSort, SmtTerm};

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

/// Z3 behind [`SmtSolver`]. Z3 contexts are thread local, so each worker
/// thread builds its own instance.
pub struct Z3Solver {
    solver: z3::Solver,
    int_vars: HashMap<String, z3::ast::Int>,
    bool_vars: HashMap<String, z3::ast::Bool>,
    timeout_ms: u64,
}

impl Z3Solver {
    pub fn new() -> Self {
        Self::with_timeout_ms(0)
    }

    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        let mut solver = Self {
            solver: z3::Solver::new(),
            int_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            timeout_ms,
        };
        solver.apply_params();
        solver
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn apply_params(&mut self) {
        if self.timeout_ms == 0 {
            return;
        }
        let mut params = z3::Params::new();
        let timeout = u32::try_from(self.timeout_ms).unwrap_or(u32::MAX);
        params.set_u32("timeout", timeout);
        self.solver.set_params(&params);
    }

    fn unknown(&self) -> SatResult {
        SatResult::Unknown(
            self.solver
                .get_reason_unknown()
                .unwrap_or_else(|| "Z3 returned unknown".into()),
        )
    }

    fn int_binop(
        &self,
        lhs: &SmtTerm,
        rhs: &SmtTerm,
    ) -> Result<(z3::ast::Int, z3::ast::Int), Z3Error> {
        Ok((
            self.translate_term(lhs)?.into_int()?,
            self.translate_term(rhs)?.into_int()?,
        ))
    }

    fn translate_bools(&self, terms: &[SmtTerm]) -> Result<Vec<z3::ast::Bool>, Z3Error> {
        terms
            .iter()
            .map(|t| self.translate_term(t).and_then(Z3Term::into_bool))
            .collect()
    }

    fn translate_term(&self, term: &SmtTerm) -> Result<Z3Term, Z3Error> {
        match term {
            SmtTerm::Var(name) => {
                if let Some(v) = self.int_vars.get(name) {
                    Ok(Z3Term::Int(v.clone()))
                } else if let Some(v) = self.bool_vars.get(name) {
                    Ok(Z3Term::Bool(v.clone()))
                } else {
                    Err(Z3Error::UnknownVariable(name.clone()))
                }
            }
            SmtTerm::IntLit(n) => Ok(Z3Term::Int(z3::ast::Int::from_i64(*n))),
            SmtTerm::BoolLit(b) => Ok(Z3Term::Bool(z3::ast::Bool::from_bool(*b))),
            SmtTerm::Add(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Int(&l + &r))
            }
            SmtTerm::Sub(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Int(&l - &r))
            }
            SmtTerm::Mul(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Int(&l * &r))
            }
            SmtTerm::Div(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Int(l.div(&r)))
            }
            SmtTerm::Mod(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Int(l.modulo(&r)))
            }
            SmtTerm::Neg(inner) => {
                let i = self.translate_term(inner)?.into_int()?;
                Ok(Z3Term::Int(i.unary_minus()))
            }
            SmtTerm::Eq(lhs, rhs) => {
                let l = self.translate_term(lhs)?;
                let r = self.translate_term(rhs)?;
                match (l, r) {
                    (Z3Term::Int(li), Z3Term::Int(ri)) => Ok(Z3Term::Bool(li.eq(&ri))),
                    (Z3Term::Bool(lb), Z3Term::Bool(rb)) => Ok(Z3Term::Bool(lb.eq(&rb))),
                    _ => Err(Z3Error::Internal("Sort mismatch in Eq".into())),
                }
            }
            SmtTerm::Lt(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Bool(l.lt(&r)))
            }
            SmtTerm::Le(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Bool(l.le(&r)))
            }
            SmtTerm::Gt(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Bool(l.gt(&r)))
            }
            SmtTerm::Ge(lhs, rhs) => {
                let (l, r) = self.int_binop(lhs, rhs)?;
                Ok(Z3Term::Bool(l.ge(&r)))
            }
            SmtTerm::And(terms) => {
                let bools = self.translate_bools(terms)?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::and(&refs)))
            }
            SmtTerm::Or(terms) => {
                let bools = self.translate_bools(terms)?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::or(&refs)))
            }
            SmtTerm::Not(inner) => {
                let b = self.translate_term(inner)?.into_bool()?;
                Ok(Z3Term::Bool(b.not()))
            }
            SmtTerm::Implies(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_bool()?;
                let r = self.translate_term(rhs)?.into_bool()?;
                Ok(Z3Term::Bool(l.implies(&r)))
            }
            SmtTerm::Ite(cond, then, els) => {
                let c = self.translate_term(cond)?.into_bool()?;
                let t = self.translate_term(then)?;
                let e = self.translate_term(els)?;
                match (t, e) {
                    (Z3Term::Int(ti), Z3Term::Int(ei)) => Ok(Z3Term::Int(c.ite(&ti, &ei))),
                    (Z3Term::Bool(tb), Z3Term::Bool(eb)) => Ok(Z3Term::Bool(c.ite(&tb, &eb))),
                    _ => Err(Z3Error::Internal("Sort mismatch in ITE".into())),
                }
            }
        }
    }
}

enum Z3Term {
    Int(z3::ast::Int),
    Bool(z3::ast::Bool),
}

impl Z3Term {
    fn into_int(self) -> Result<z3::ast::Int, Z3Error> {
        match self {
            Z3Term::Int(i) => Ok(i),
            Z3Term::Bool(_) => Err(Z3Error::Internal("Expected Int, got Bool".into())),
        }
    }

    fn into_bool(self) -> Result<z3::ast::Bool, Z3Error> {
        match self {
            Z3Term::Bool(b) => Ok(b),
            Z3Term::Int(_) => Err(Z3Error::Internal("Expected Bool, got Int".into())),
        }
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        match sort {
            SmtSort::Int => {
                let v = z3::ast::Int::new_const(name);
                self.int_vars.insert(name.to_string(), v);
            }
            SmtSort::Bool => {
                let v = z3::ast::Bool::new_const(name);
                self.bool_vars.insert(name.to_string(), v);
            }
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let z3_term = self.translate_term(term)?.into_bool()?;
        self.solver.assert(&z3_term);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => Ok(SatResult::Sat),
            Z3SatResult::Unsat => Ok(SatResult::Unsat),
            Z3SatResult::Unknown => Ok(self.unknown()),
        }
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => {
                let z3_model = self
                    .solver
                    .get_model()
                    .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
                let mut values = BTreeMap::new();
                for &(name, sort) in var_names {
                    let value = match sort {
                        SmtSort::Int => self
                            .int_vars
                            .get(name)
                            .and_then(|v| z3_model.eval::<z3::ast::Int>(v, true))
                            .and_then(|val| val.as_i64())
                            .map(ModelValue::Int),
                        SmtSort::Bool => self
                            .bool_vars
                            .get(name)
                            .and_then(|v| z3_model.eval::<z3::ast::Bool>(v, true))
                            .and_then(|val| val.as_bool())
                            .map(ModelValue::Bool),
                    };
                    if let Some(value) = value {
                        values.insert(name.to_string(), value);
                    }
                }
                Ok((SatResult::Sat, Some(Model { values })))
            }
            Z3SatResult::Unsat => Ok((SatResult::Unsat, None)),
            Z3SatResult::Unknown => Ok((self.unknown(), None)),
        }
    }

    fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
        self.apply_params();
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 drops per-solver parameters on reset.
        self.apply_params();
        self.int_vars.clear();
        self.bool_vars.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn z3_basic_sat_and_unsat() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Int)?;
        solver.push()?;
        solver.assert(&SmtTerm::and(vec![
            SmtTerm::var("x").gt(SmtTerm::int(0)),
            SmtTerm::var("x").lt(SmtTerm::int(0)),
        ]))?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        solver.pop()?;
        solver.assert(&SmtTerm::var("x").gt(SmtTerm::int(0)))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn z3_model_extraction() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::int(-42)))?;
        let (result, model) = solver.check_sat_with_model(&[("x", &SmtSort::Int)])?;
        assert_eq!(result, SatResult::Sat);
        let model = model.ok_or_else(|| std::io::Error::other("expected model"))?;
        assert_eq!(model.get_int("x"), Some(-42));
        Ok(())
    }

    #[test]
    fn z3_integer_division_is_euclidean() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("d", &SmtSort::Int)?;
        solver.declare_var("m", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("d").eq(SmtTerm::int(-7).div(SmtTerm::int(2))))?;
        solver.assert(&SmtTerm::var("m").eq(SmtTerm::int(-7).modulo(SmtTerm::int(2))))?;
        let (_, model) =
            solver.check_sat_with_model(&[("d", &SmtSort::Int), ("m", &SmtSort::Int)])?;
        let model = model.ok_or_else(|| std::io::Error::other("expected model"))?;
        assert_eq!(model.get_int("d"), Some((-7i64).div_euclid(2)));
        assert_eq!(model.get_int("m"), Some((-7i64).rem_euclid(2)));
        Ok(())
    }

    #[test]
    fn z3_abs_and_negation() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").lt(SmtTerm::int(0)))?;
        solver.assert(&SmtTerm::var("x").abs().eq(SmtTerm::var("x").neg()).not())?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn z3_timeout_survives_reset() -> TestResult {
        let mut solver = Z3Solver::with_timeout_ms(2000);
        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::int(1)))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        solver.reset()?;
        assert_eq!(solver.timeout_ms(), 2000);
        solver.set_timeout_ms(4000);
        assert_eq!(solver.timeout_ms(), 4000);
        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::int(2)))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn z3_rejects_undeclared_variables() {
        let mut solver = Z3Solver::new();
        let err = solver.assert(&SmtTerm::var("y").gt(SmtTerm::int(0)));
        assert!(matches!(err, Err(Z3Error::UnknownVariable(name)) if name == "y"));
    }
}
