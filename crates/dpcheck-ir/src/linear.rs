//! Linear normal form used to compare event expressions syntactically.

use std::collections::BTreeMap;
use std::fmt;

use crate::expr::{SymExpr, Symbol};

/// A term of a linear form: a symbol, or a nonlinear subterm kept whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Atom {
    Sym(Symbol),
    Opaque(SymExpr),
}

impl Atom {
    fn to_expr(&self) -> SymExpr {
        match self {
            Atom::Sym(s) => SymExpr::Sym(s.clone()),
            Atom::Opaque(e) => e.clone(),
        }
    }

    fn mentions(&self, pred: &dyn Fn(&Symbol) -> bool) -> bool {
        match self {
            Atom::Sym(s) => pred(s),
            Atom::Opaque(e) => e.mentions(pred),
        }
    }
}

/// `constant + Σ coeff · atom`, canonical: no zero coefficients and atoms
/// kept sorted, so two forms are equal iff they are syntactically identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LinearForm {
    pub constant: i64,
    pub terms: BTreeMap<Atom, i64>,
}

impl LinearForm {
    pub fn constant(c: i64) -> Self {
        LinearForm {
            constant: c,
            terms: BTreeMap::new(),
        }
    }

    pub fn atom(atom: Atom) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(atom, 1);
        LinearForm { constant: 0, terms }
    }

    pub fn symbol(s: Symbol) -> Self {
        Self::atom(Atom::Sym(s))
    }

    pub fn from_expr(e: &SymExpr) -> Self {
        match e {
            SymExpr::Const(c) => Self::constant(*c),
            SymExpr::Sym(s) => Self::symbol(s.clone()),
            SymExpr::Add(a, b) => Self::from_expr(a).add(&Self::from_expr(b)),
            SymExpr::Sub(a, b) => Self::from_expr(a).sub(&Self::from_expr(b)),
            SymExpr::Neg(a) => Self::from_expr(a).scale(-1),
            SymExpr::Mul(a, b) => {
                let (la, lb) = (Self::from_expr(a), Self::from_expr(b));
                match (la.as_constant(), lb.as_constant()) {
                    (Some(c), _) => lb.scale(c),
                    (_, Some(c)) => la.scale(c),
                    _ => Self::atom(Atom::Opaque(e.clone())),
                }
            }
            SymExpr::Div(a, b) => {
                let la = Self::from_expr(a);
                match Self::from_expr(b).as_constant() {
                    Some(c) => la
                        .div_exact(c)
                        .unwrap_or_else(|| Self::atom(Atom::Opaque(e.clone()))),
                    None => Self::atom(Atom::Opaque(e.clone())),
                }
            }
            SymExpr::Mod(..) => Self::atom(Atom::Opaque(e.clone())),
        }
    }

    fn normalize(mut self) -> Self {
        self.terms.retain(|_, c| *c != 0);
        self
    }

    pub fn add(&self, other: &LinearForm) -> Self {
        let mut result = self.clone();
        result.constant += other.constant;
        for (atom, coeff) in &other.terms {
            *result.terms.entry(atom.clone()).or_insert(0) += coeff;
        }
        result.normalize()
    }

    pub fn sub(&self, other: &LinearForm) -> Self {
        self.add(&other.scale(-1))
    }

    pub fn scale(&self, k: i64) -> Self {
        LinearForm {
            constant: self.constant * k,
            terms: self.terms.iter().map(|(a, c)| (a.clone(), c * k)).collect(),
        }
        .normalize()
    }

    /// Divide every coefficient by `k`, if all divide evenly.
    pub fn div_exact(&self, k: i64) -> Option<Self> {
        if k == 0 || self.constant % k != 0 || self.terms.values().any(|c| c % k != 0) {
            return None;
        }
        Some(LinearForm {
            constant: self.constant / k,
            terms: self.terms.iter().map(|(a, c)| (a.clone(), c / k)).collect(),
        })
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn coefficient(&self, s: &Symbol) -> i64 {
        self.terms.get(&Atom::Sym(s.clone())).copied().unwrap_or(0)
    }

    pub fn without(&self, s: &Symbol) -> Self {
        let mut result = self.clone();
        result.terms.remove(&Atom::Sym(s.clone()));
        result
    }

    /// True when some atom, including symbols buried in opaque subterms,
    /// satisfies `pred`.
    pub fn mentions(&self, pred: &dyn Fn(&Symbol) -> bool) -> bool {
        self.terms.keys().any(|a| a.mentions(pred))
    }

    /// Symbols occurring as plain linear atoms.
    pub fn linear_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.terms.keys().filter_map(|a| match a {
            Atom::Sym(s) => Some(s),
            Atom::Opaque(_) => None,
        })
    }

    pub fn to_expr(&self) -> SymExpr {
        let mut result = SymExpr::Const(self.constant);
        for (atom, coeff) in &self.terms {
            let term = atom.to_expr();
            result = match *coeff {
                1 => result + term,
                -1 => result - term,
                c if c < 0 => result - SymExpr::Const(-c) * term,
                c => result + SymExpr::Const(c) * term,
            };
        }
        result
    }
}

impl fmt::Display for LinearForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Run;

    fn q(i: usize) -> SymExpr {
        SymExpr::Sym(Symbol::element(Run::A, i))
    }

    fn eta(k: usize) -> SymExpr {
        SymExpr::Sym(Symbol::noise(Run::A, k))
    }

    #[test]
    fn collects_like_terms() {
        // (q0 + eta0) - (eta0 - 2) == q0 + 2
        let e = (q(0) + eta(0)) - (eta(0) - SymExpr::Const(2));
        let lf = LinearForm::from_expr(&e);
        assert_eq!(lf.constant, 2);
        assert_eq!(lf.coefficient(&Symbol::element(Run::A, 0)), 1);
        assert_eq!(lf.coefficient(&Symbol::noise(Run::A, 0)), 0);
        assert!(!lf.mentions(&Symbol::is_noise));
    }

    #[test]
    fn equal_forms_for_reordered_sums() {
        let a = LinearForm::from_expr(&(q(0) + eta(0) + SymExpr::Const(1)));
        let b = LinearForm::from_expr(&(SymExpr::Const(1) + (eta(0) + q(0))));
        assert_eq!(a, b);
    }

    #[test]
    fn constant_multiples_stay_linear() {
        let e = SymExpr::Const(3) * (q(0) - eta(1));
        let lf = LinearForm::from_expr(&e);
        assert_eq!(lf.coefficient(&Symbol::noise(Run::A, 1)), -3);
        assert!(lf.terms.keys().all(|a| matches!(a, Atom::Sym(_))));
    }

    #[test]
    fn products_of_symbols_become_opaque() {
        let e = q(0) * q(1) + eta(0);
        let lf = LinearForm::from_expr(&e);
        assert_eq!(lf.linear_symbols().count(), 1);
        assert!(lf.mentions(&|s| *s == Symbol::element(Run::A, 1)));
    }

    #[test]
    fn exact_division_distributes() {
        let e = (SymExpr::Const(2) * q(0) + SymExpr::Const(4)).div(SymExpr::Const(2));
        let lf = LinearForm::from_expr(&e);
        assert_eq!(lf, LinearForm::from_expr(&(q(0) + SymExpr::Const(2))));
        assert!(lf.div_exact(2).is_none());
    }

    #[test]
    fn round_trips_through_expr() {
        let lf = LinearForm::from_expr(&(SymExpr::Const(5) - SymExpr::Const(2) * eta(0) + q(3)));
        assert_eq!(LinearForm::from_expr(&lf.to_expr()), lf);
    }
}
