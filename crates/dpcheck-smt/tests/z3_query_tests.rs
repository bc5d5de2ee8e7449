//! Queries built from the IR and discharged through the Z3 backend.

use dpcheck_ir::{BoolExpr, CmpOp, Run, SymExpr, Symbol};
use dpcheck_smt::backends::z3_backend::Z3Solver;
use dpcheck_smt::encoder::{model_value, Query};
use dpcheck_smt::solver::SatResult;

fn q(run: Run) -> SymExpr {
    SymExpr::Sym(Symbol::element(run, 0))
}

fn eta(run: Run) -> SymExpr {
    SymExpr::Sym(Symbol::noise(run, 0))
}

#[test]
fn shifted_noise_aligns_guards() {
    // qA + etaA >= 0, etaB = etaA + qA - qB, and not(qB + etaB >= 0) is UNSAT.
    let mut solver = Z3Solver::new();
    let mut query = Query::new("alignment");
    let eta_b = eta(Run::A) + q(Run::A) - q(Run::B);
    query
        .assert_bool(&BoolExpr::cmp(CmpOp::Ge, q(Run::A) + eta(Run::A), SymExpr::Const(0)))
        .assert_bool(&BoolExpr::cmp(CmpOp::Ge, q(Run::B) + eta_b, SymExpr::Const(0)).negate());
    let (result, model) = query.run(&mut solver).unwrap();
    assert_eq!(result, SatResult::Unsat);
    assert!(model.is_none());
}

#[test]
fn witness_values_are_reported_per_symbol() {
    let mut solver = Z3Solver::with_timeout_ms(5_000);
    let mut query = Query::new("witness");
    query
        .assert_bool(&BoolExpr::within(q(Run::A), -10, 10))
        .assert_bool(&BoolExpr::within(q(Run::B) - q(Run::A), 1, 1))
        .assert_bool(&BoolExpr::eq(q(Run::B), SymExpr::Const(10)))
        .declare(&Symbol::noise(Run::A, 3));
    let (result, model) = query.run(&mut solver).unwrap();
    assert_eq!(result, SatResult::Sat);
    let model = model.unwrap();
    assert_eq!(model_value(&model, &Symbol::element(Run::A, 0)), Some(9));
    assert!(model_value(&model, &Symbol::noise(Run::A, 3)).is_some());
}

#[test]
fn solver_is_reusable_across_queries() {
    let mut solver = Z3Solver::new();
    let mut unsat = Query::new("unsat");
    unsat.assert_bool(&BoolExpr::Const(false));
    assert_eq!(unsat.run(&mut solver).unwrap().0, SatResult::Unsat);
    let mut sat = Query::new("sat");
    sat.assert_bool(&BoolExpr::cmp(CmpOp::Gt, q(Run::A), SymExpr::Const(0)));
    assert_eq!(sat.run(&mut solver).unwrap().0, SatResult::Sat);
}
