//! Lowering program-text expressions into the symbolic IR.

use dpcheck_dsl::ast::{BinOp, Expr, UnaryOp};
use indexmap::IndexMap;
use thiserror::Error;

use crate::binding::InputBinding;
use crate::expr::{BoolExpr, CmpOp, Run, SymExpr};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("index into '{array}' is not a concrete value: {index}")]
    SymbolicIndex { array: String, index: String },
    #[error("index {index} is out of bounds for '{array}' of size {size}")]
    IndexOutOfBounds {
        array: String,
        index: i64,
        size: usize,
    },
    #[error("boolean expression used as a number: {0}")]
    BooleanInArithmetic(String),
    #[error("division by zero in {0}")]
    DivisionByZero(String),
    #[error("unexpected call to '{0}' in an expression")]
    UnexpectedCall(String),
}

/// Variables visible to one run at one program point.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub binding: &'a InputBinding,
    pub run: Run,
    locals: IndexMap<String, SymExpr>,
}

impl<'a> Scope<'a> {
    pub fn new(binding: &'a InputBinding, run: Run) -> Self {
        Scope {
            binding,
            run,
            locals: IndexMap::new(),
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: SymExpr) {
        self.locals.insert(name.into(), value);
    }

    pub fn local(&self, name: &str) -> Option<&SymExpr> {
        self.locals.get(name)
    }

    pub fn locals(&self) -> &IndexMap<String, SymExpr> {
        &self.locals
    }

    /// Lower an expression in arithmetic position.
    pub fn lower(&self, expr: &Expr) -> Result<SymExpr, LowerError> {
        match expr {
            Expr::IntLit(v) => Ok(SymExpr::Const(*v)),
            Expr::Var(name) => self
                .locals
                .get(name)
                .cloned()
                .or_else(|| self.binding.scalar(self.run, name))
                .ok_or_else(|| LowerError::UnknownVariable(name.clone())),
            Expr::Index(array, index) => {
                if *array != self.binding.query {
                    return Err(LowerError::UnknownVariable(array.clone()));
                }
                let lowered = self.lower(index)?;
                let Some(i) = lowered.as_const() else {
                    return Err(LowerError::SymbolicIndex {
                        array: array.clone(),
                        index: lowered.to_string(),
                    });
                };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| self.binding.element(self.run, i))
                    .map(SymExpr::Sym)
                    .ok_or(LowerError::IndexOutOfBounds {
                        array: array.clone(),
                        index: i,
                        size: self.binding.size,
                    })
            }
            Expr::Call(name, _) => Err(LowerError::UnexpectedCall(name.clone())),
            Expr::Unary(UnaryOp::Neg, inner) => Ok(-self.lower(inner)?),
            Expr::Binary(
                op @ (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod),
                lhs,
                rhs,
            ) => {
                let (l, r) = (self.lower(lhs)?, self.lower(rhs)?);
                Ok(match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    _ if r.as_const() == Some(0) => {
                        return Err(LowerError::DivisionByZero(expr.to_string()))
                    }
                    BinOp::Div => l.div(r),
                    _ => l.rem(r),
                })
            }
            // A boolean in arithmetic position is accepted only when it folds.
            Expr::Unary(UnaryOp::Not, _) | Expr::Binary(..) => match self.lower_cond(expr)? {
                BoolExpr::Const(b) => Ok(SymExpr::Const(i64::from(b))),
                _ => Err(LowerError::BooleanInArithmetic(expr.to_string())),
            },
        }
    }

    /// Lower an expression in condition position; arithmetic values are
    /// compared against zero, as in C.
    pub fn lower_cond(&self, expr: &Expr) -> Result<BoolExpr, LowerError> {
        match expr {
            Expr::Unary(UnaryOp::Not, inner) => Ok(self.lower_cond(inner)?.negate()),
            Expr::Binary(BinOp::And, lhs, rhs) => {
                Ok(BoolExpr::and([self.lower_cond(lhs)?, self.lower_cond(rhs)?]))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                Ok(BoolExpr::or([self.lower_cond(lhs)?, self.lower_cond(rhs)?]))
            }
            Expr::Binary(op, lhs, rhs) if op.is_comparison() => {
                let cmp = match op {
                    BinOp::Eq => CmpOp::Eq,
                    BinOp::Ne => CmpOp::Ne,
                    BinOp::Lt => CmpOp::Lt,
                    BinOp::Le => CmpOp::Le,
                    BinOp::Gt => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                Ok(BoolExpr::cmp(cmp, self.lower(lhs)?, self.lower(rhs)?))
            }
            other => Ok(BoolExpr::cmp(CmpOp::Ne, self.lower(other)?, SymExpr::Const(0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::variants;
    use crate::expr::Symbol;
    use dpcheck_dsl::parse_expression;

    fn binding(relation: &str) -> InputBinding {
        let src = format!(
            "int f(float q[], int size, float epsilon, int T) {{\n\
             \"TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>; T: <0, 0>;\";\n\
             \"PRECONDITION: {relation};\";\n\
             \"CHECK: epsilon\";\n\
             CHECKDP_OUTPUT(q[0]);\n}}"
        );
        let program = dpcheck_dsl::parse(&src, "f.c").unwrap();
        variants(&program.contract, 3, 1).unwrap().remove(0)
    }

    fn lower(scope: &Scope<'_>, text: &str) -> Result<SymExpr, LowerError> {
        scope.lower(&parse_expression(text).unwrap())
    }

    #[test]
    fn concretises_size_and_epsilon() {
        let b = binding("ALL_DIFFER");
        let scope = Scope::new(&b, Run::A);
        assert_eq!(lower(&scope, "2 / epsilon").unwrap(), SymExpr::Const(2));
        assert_eq!(lower(&scope, "size - 1").unwrap(), SymExpr::Const(2));
        assert_eq!(
            lower(&scope, "T").unwrap(),
            SymExpr::Sym(Symbol::Param("T".into()))
        );
    }

    #[test]
    fn locals_are_resolved_before_parameters() {
        let b = binding("ALL_DIFFER");
        let mut scope = Scope::new(&b, Run::B);
        scope.bind("i", SymExpr::Const(1));
        assert_eq!(
            lower(&scope, "q[i + 1]").unwrap(),
            SymExpr::Sym(Symbol::element(Run::B, 2))
        );
    }

    #[test]
    fn one_differ_run_b_shares_other_elements() {
        let b = binding("ONE_DIFFER");
        let scope = Scope::new(&b, Run::B);
        assert_eq!(
            lower(&scope, "q[1]").unwrap(),
            SymExpr::Sym(Symbol::element(Run::A, 1))
        );
        assert_eq!(
            lower(&scope, "q[0]").unwrap(),
            SymExpr::Sym(Symbol::element(Run::B, 0))
        );
    }

    #[test]
    fn index_errors() {
        let b = binding("ALL_DIFFER");
        let mut scope = Scope::new(&b, Run::A);
        assert!(matches!(
            lower(&scope, "q[3]"),
            Err(LowerError::IndexOutOfBounds { index: 3, size: 3, .. })
        ));
        scope.bind("x", SymExpr::Sym(Symbol::element(Run::A, 0)));
        assert!(matches!(
            lower(&scope, "q[x]"),
            Err(LowerError::SymbolicIndex { .. })
        ));
        assert!(matches!(
            lower(&scope, "1 / (size - 3)"),
            Err(LowerError::DivisionByZero(_))
        ));
        assert_eq!(
            lower(&scope, "y"),
            Err(LowerError::UnknownVariable("y".into()))
        );
    }

    #[test]
    fn conditions_compare_numbers_against_zero() {
        let b = binding("ALL_DIFFER");
        let scope = Scope::new(&b, Run::A);
        let c = scope.lower_cond(&parse_expression("q[0]").unwrap()).unwrap();
        assert_eq!(
            c,
            BoolExpr::Cmp(CmpOp::Ne, SymExpr::Sym(Symbol::element(Run::A, 0)), SymExpr::Const(0))
        );
        let folded = scope
            .lower_cond(&parse_expression("size > 0 && !(epsilon < 1)").unwrap())
            .unwrap();
        assert_eq!(folded, BoolExpr::Const(true));
    }

    #[test]
    fn booleans_fold_in_arithmetic_position() {
        let b = binding("ALL_DIFFER");
        let scope = Scope::new(&b, Run::A);
        assert_eq!(lower(&scope, "1 + (size > 2)").unwrap(), SymExpr::Const(2));
        assert!(matches!(
            lower(&scope, "1 + (q[0] > 2)"),
            Err(LowerError::BooleanInArithmetic(_))
        ));
    }
}
