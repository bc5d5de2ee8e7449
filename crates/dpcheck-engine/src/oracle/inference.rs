//! Probabilistic programs handed to the inference oracle, and the SMT
//! discharge of their privacy-loss bound.

use std::collections::BTreeMap;

use dpcheck_ir::{BoolExpr, CmpOp, NoiseFamily, SymExpr, Symbol};
use dpcheck_smt::encoder::{encode_bool, encode_expr, Query};
use dpcheck_smt::terms::SmtTerm;
use serde::Serialize;

use super::session::{value_of, Answer, SolverSession};
use super::{InferenceOracle, OracleError};

/// Concrete values of the symbols of a witness point.
pub type Assignment = BTreeMap<Symbol, i64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoiseDraw {
    pub symbol: Symbol,
    pub family: NoiseFamily,
    pub scale: SymExpr,
}

/// `|shift| / scale`: the privacy cost of shifting one Laplace sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossTerm {
    pub shift: SymExpr,
    pub scale: SymExpr,
}

/// A loss goal: under `domain`, `Σ loss <= bound` must hold for every point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilisticProgram {
    pub label: String,
    pub draws: Vec<NoiseDraw>,
    pub loss: Vec<LossTerm>,
    pub domain: Vec<BoolExpr>,
    pub bound: SymExpr,
    /// Symbols to report in a counterexample.
    pub observe: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundOutcome {
    Certified,
    Counterexample(Assignment),
    Unknown(String),
}

/// Terms sharing one scale `num / den`, so that `Σ |d| / b` becomes
/// `(den / num) · Σ |d|` per group.
struct ScaleGroup {
    num: SymExpr,
    den: SymExpr,
    shifts: Vec<SymExpr>,
}

fn group_by_scale(loss: &[LossTerm]) -> Vec<ScaleGroup> {
    let mut groups: Vec<ScaleGroup> = Vec::new();
    for term in loss {
        let (num, den) = term.scale.as_fraction();
        match groups.iter_mut().find(|g| g.num == num && g.den == den) {
            Some(g) => g.shifts.push(term.shift.clone()),
            None => groups.push(ScaleGroup {
                num,
                den,
                shifts: vec![term.shift.clone()],
            }),
        }
    }
    groups
}

fn product(terms: impl IntoIterator<Item = SmtTerm>) -> SmtTerm {
    terms
        .into_iter()
        .reduce(SmtTerm::mul)
        .unwrap_or(SmtTerm::IntLit(1))
}

/// `Σ_g den_g · S_g / num_g > cn / cd`, multiplied through by
/// `cd · Π num_g` (all positive) so the comparison stays over integers.
fn violation(groups: &[ScaleGroup], bound_num: &SymExpr, bound_den: &SymExpr) -> SmtTerm {
    let nums: Vec<SmtTerm> = groups.iter().map(|g| encode_expr(&g.num)).collect();
    let lhs = SmtTerm::sum(groups.iter().enumerate().map(|(i, g)| {
        let abs_sum = SmtTerm::sum(g.shifts.iter().map(|d| encode_expr(d).abs()));
        let others = nums
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, n)| n.clone());
        product(
            [encode_expr(bound_den), encode_expr(&g.den), abs_sum]
                .into_iter()
                .chain(others),
        )
    }));
    let rhs = product(std::iter::once(encode_expr(bound_num)).chain(nums.iter().cloned()));
    lhs.gt(rhs)
}

impl SolverSession {
    /// Every scale numerator and denominator, and the bound's denominator,
    /// is positive throughout the domain.
    fn scales_positive(
        &mut self,
        program: &ProbabilisticProgram,
        groups: &[ScaleGroup],
        bound_den: &SymExpr,
    ) -> Result<Option<String>, OracleError> {
        let premises: Vec<&BoolExpr> = program.domain.iter().collect();
        let mut checks: Vec<(String, &SymExpr)> = vec![("bound".into(), bound_den)];
        for g in groups {
            checks.push((format!("scale numerator {}", g.num), &g.num));
            checks.push((format!("scale denominator {}", g.den), &g.den));
        }
        for (what, e) in checks {
            if e.as_const().is_some_and(|c| c > 0) {
                continue;
            }
            let goal = BoolExpr::cmp(CmpOp::Gt, e.clone(), SymExpr::Const(0));
            let label = format!("{}: {what} positive", program.label);
            if !self.is_valid(&label, &premises, &goal)? {
                return Ok(Some(format!("{what} is not provably positive")));
            }
        }
        Ok(None)
    }
}

impl InferenceOracle for SolverSession {
    fn discharge(&mut self, program: &ProbabilisticProgram) -> Result<BoundOutcome, OracleError> {
        let groups = group_by_scale(&program.loss);
        let (bound_num, bound_den) = program.bound.as_fraction();
        if let Some(reason) = self.scales_positive(program, &groups, &bound_den)? {
            return Ok(BoundOutcome::Unknown(reason));
        }

        let mut query = Query::new(program.label.clone());
        for d in &program.domain {
            query.assert_term(encode_bool(d));
        }
        query.assert_term(violation(&groups, &bound_num, &bound_den));
        for s in &program.observe {
            query.declare(s);
        }
        Ok(match self.check(&query)? {
            Answer::Unsat => BoundOutcome::Certified,
            Answer::Sat(model) => BoundOutcome::Counterexample(
                program
                    .observe
                    .iter()
                    .map(|s| (s.clone(), value_of(&model, s)))
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::session::SessionConfig;
    use dpcheck_ir::Run;

    fn q(run: Run) -> SymExpr {
        SymExpr::Sym(Symbol::element(run, 0))
    }

    fn program(scale: SymExpr, bound: SymExpr) -> ProbabilisticProgram {
        let domain = vec![
            BoolExpr::within(q(Run::A), -10, 10),
            BoolExpr::within(q(Run::B) - q(Run::A), -1, 1),
        ];
        ProbabilisticProgram {
            label: "test".into(),
            draws: vec![NoiseDraw {
                symbol: Symbol::noise(Run::A, 0),
                family: NoiseFamily::Laplace,
                scale: scale.clone(),
            }],
            loss: vec![LossTerm {
                shift: q(Run::A) - q(Run::B),
                scale,
            }],
            domain,
            bound,
            observe: vec![Symbol::element(Run::A, 0), Symbol::element(Run::B, 0)],
        }
    }

    fn discharge(p: &ProbabilisticProgram) -> BoundOutcome {
        SolverSession::new("test", SessionConfig::default())
            .discharge(p)
            .unwrap()
    }

    #[test]
    fn scale_matching_sensitivity_is_certified() {
        // |d| / 2 <= 1/2
        let p = program(SymExpr::Const(2), SymExpr::Const(1).div(SymExpr::Const(2)));
        assert_eq!(discharge(&p), BoundOutcome::Certified);
    }

    #[test]
    fn too_small_a_budget_has_a_witness() {
        // |d| / 2 <= 1/4 fails whenever the elements differ.
        let p = program(SymExpr::Const(2), SymExpr::Const(1).div(SymExpr::Const(4)));
        match discharge(&p) {
            BoundOutcome::Counterexample(point) => {
                let a = point[&Symbol::element(Run::A, 0)];
                let b = point[&Symbol::element(Run::B, 0)];
                assert_eq!((a - b).abs(), 1);
            }
            other => panic!("expected a counterexample, got {other:?}"),
        }
    }

    #[test]
    fn rational_scales_are_cross_multiplied() {
        // scale 4/3: |d| * 3/4 <= 3/4
        let third = SymExpr::Const(4).div(SymExpr::Const(3));
        let p = program(third, SymExpr::Const(3).div(SymExpr::Const(4)));
        assert_eq!(discharge(&p), BoundOutcome::Certified);
    }

    #[test]
    fn equal_scales_are_grouped() {
        let loss = vec![
            LossTerm {
                shift: SymExpr::Const(1),
                scale: SymExpr::Const(4),
            },
            LossTerm {
                shift: SymExpr::Const(1),
                scale: SymExpr::Const(4),
            },
            LossTerm {
                shift: SymExpr::Const(1),
                scale: SymExpr::Const(2),
            },
        ];
        let groups = group_by_scale(&loss);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].shifts.len(), 2);
    }

    #[test]
    fn symbolic_scale_must_be_positive() {
        let t = SymExpr::Sym(Symbol::Param("T".into()));
        let p = program(t, SymExpr::Const(1));
        assert!(matches!(discharge(&p), BoundOutcome::Unknown(reason) if reason.contains("not provably positive")));
    }

    #[test]
    fn empty_loss_is_certified() {
        let mut p = program(SymExpr::Const(2), SymExpr::Const(1));
        p.loss.clear();
        assert_eq!(discharge(&p), BoundOutcome::Certified);
    }
}
