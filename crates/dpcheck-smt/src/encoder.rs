//! Encoding of the symbolic IR into SMT queries.

use std::collections::BTreeSet;

use dpcheck_ir::{BoolExpr, CmpOp, SymExpr, Symbol};

use crate::backends::smtlib_printer::render_script;
use crate::solver::{Model, SatResult, SmtSolver};
use crate::terms::{SmtSort, SmtTerm};

pub fn encode_expr(e: &SymExpr) -> SmtTerm {
    match e {
        SymExpr::Const(c) => SmtTerm::int(*c),
        SymExpr::Sym(s) => SmtTerm::var(s.smt_name()),
        SymExpr::Add(a, b) => encode_expr(a).add(encode_expr(b)),
        SymExpr::Sub(a, b) => encode_expr(a).sub(encode_expr(b)),
        SymExpr::Mul(a, b) => encode_expr(a).mul(encode_expr(b)),
        SymExpr::Div(a, b) => encode_expr(a).div(encode_expr(b)),
        SymExpr::Mod(a, b) => encode_expr(a).modulo(encode_expr(b)),
        SymExpr::Neg(a) => encode_expr(a).neg(),
    }
}

pub fn encode_cmp(op: CmpOp, l: SmtTerm, r: SmtTerm) -> SmtTerm {
    match op {
        CmpOp::Eq => l.eq(r),
        CmpOp::Ne => l.eq(r).not(),
        CmpOp::Lt => l.lt(r),
        CmpOp::Le => l.le(r),
        CmpOp::Gt => l.gt(r),
        CmpOp::Ge => l.ge(r),
    }
}

pub fn encode_bool(b: &BoolExpr) -> SmtTerm {
    match b {
        BoolExpr::Const(v) => SmtTerm::bool(*v),
        BoolExpr::Cmp(op, l, r) => encode_cmp(*op, encode_expr(l), encode_expr(r)),
        BoolExpr::And(items) => SmtTerm::and(items.iter().map(encode_bool).collect()),
        BoolExpr::Or(items) => SmtTerm::or(items.iter().map(encode_bool).collect()),
        BoolExpr::Not(inner) => encode_bool(inner).not(),
    }
}

/// Value of `s` in a model, if the solver assigned one.
pub fn model_value(model: &Model, s: &Symbol) -> Option<i64> {
    model.get_int(&s.smt_name())
}

/// One self-contained satisfiability query over integer variables.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Free-form description, emitted as a comment in dumped scripts.
    pub comment: String,
    assertions: Vec<SmtTerm>,
    vars: BTreeSet<String>,
}

impl Query {
    pub fn new(comment: impl Into<String>) -> Self {
        Query {
            comment: comment.into(),
            ..Query::default()
        }
    }

    pub fn assert_term(&mut self, term: SmtTerm) -> &mut Self {
        self.vars.extend(term.free_vars());
        self.assertions.push(term);
        self
    }

    pub fn assert_bool(&mut self, b: &BoolExpr) -> &mut Self {
        self.assert_term(encode_bool(b))
    }

    pub fn assert_all<'a>(&mut self, items: impl IntoIterator<Item = &'a BoolExpr>) -> &mut Self {
        for b in items {
            self.assert_bool(b);
        }
        self
    }

    /// Make sure `s` is declared even if no assertion mentions it, so that a
    /// model can report it.
    pub fn declare(&mut self, s: &Symbol) -> &mut Self {
        self.vars.insert(s.smt_name());
        self
    }

    pub fn assertions(&self) -> &[SmtTerm] {
        &self.assertions
    }

    pub fn declarations(&self) -> Vec<(String, SmtSort)> {
        self.vars.iter().map(|v| (v.clone(), SmtSort::Int)).collect()
    }

    pub fn to_script(&self) -> String {
        render_script(&self.comment, &self.declarations(), &self.assertions)
    }

    /// Reset `solver`, load the query and check it, extracting a model over
    /// every declared variable when SAT.
    pub fn run<S: SmtSolver>(&self, solver: &mut S) -> Result<(SatResult, Option<Model>), S::Error> {
        solver.reset()?;
        for name in &self.vars {
            solver.declare_var(name, &SmtSort::Int)?;
        }
        for a in &self.assertions {
            solver.assert(a)?;
        }
        let names: Vec<(&str, &SmtSort)> = self
            .vars
            .iter()
            .map(|v| (v.as_str(), &SmtSort::Int))
            .collect();
        solver.check_sat_with_model(&names)
    }
}
