//! Symbolic integer expressions shared by every stage of the verifier.

use std::collections::BTreeSet;
use std::fmt;
use std::ops;

/// Which member of an adjacent input pair an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Run {
    A,
    B,
}

impl Run {
    pub fn other(self) -> Run {
        match self {
            Run::A => Run::B,
            Run::B => Run::A,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Run::A => "a",
            Run::B => "b",
        }
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Run::A => "A",
            Run::B => "B",
        })
    }
}

/// A free variable of the symbolic encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Symbol {
    /// Parameter declared `<0, 0>`: one symbol shared by both runs.
    Param(String),
    /// Scalar parameter that may differ between the runs.
    Scalar { run: Run, name: String },
    /// Element of the query array.
    Element { run: Run, index: usize },
    /// The `ordinal`-th noise sample drawn by a run.
    Noise { run: Run, ordinal: usize },
}

impl Symbol {
    pub fn noise(run: Run, ordinal: usize) -> Self {
        Symbol::Noise { run, ordinal }
    }

    pub fn element(run: Run, index: usize) -> Self {
        Symbol::Element { run, index }
    }

    pub fn run(&self) -> Option<Run> {
        match self {
            Symbol::Param(_) => None,
            Symbol::Scalar { run, .. } | Symbol::Element { run, .. } | Symbol::Noise { run, .. } => {
                Some(*run)
            }
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Symbol::Noise { .. })
    }

    /// Identifier used for this symbol in solver queries.
    pub fn smt_name(&self) -> String {
        match self {
            Symbol::Param(name) => format!("p_{name}"),
            Symbol::Scalar { run, name } => format!("s_{}_{name}", run.tag()),
            Symbol::Element { run, index } => format!("q_{}_{index}", run.tag()),
            Symbol::Noise { run, ordinal } => format!("eta_{}_{ordinal}", run.tag()),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Param(name) => f.write_str(name),
            Symbol::Scalar { run, name } => write!(f, "{name}@{run}"),
            Symbol::Element { run, index } => write!(f, "q[{index}]@{run}"),
            Symbol::Noise { run, ordinal } => write!(f, "eta{ordinal}@{run}"),
        }
    }
}

/// Integer-valued symbolic expression.
///
/// Build through the operator impls and [`SymExpr::div`] / [`SymExpr::rem`],
/// which fold constants; the raw variants never hold two constant operands
/// that could have been folded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum SymExpr {
    Const(i64),
    Sym(Symbol),
    Add(Box<SymExpr>, Box<SymExpr>),
    Sub(Box<SymExpr>, Box<SymExpr>),
    Mul(Box<SymExpr>, Box<SymExpr>),
    /// Integer division; exact rational when used as a noise scale.
    Div(Box<SymExpr>, Box<SymExpr>),
    /// Euclidean remainder, as in SMT-LIB `mod`.
    Mod(Box<SymExpr>, Box<SymExpr>),
    Neg(Box<SymExpr>),
}

impl From<i64> for SymExpr {
    fn from(c: i64) -> Self {
        SymExpr::Const(c)
    }
}

impl From<Symbol> for SymExpr {
    fn from(s: Symbol) -> Self {
        SymExpr::Sym(s)
    }
}

impl ops::Add for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: SymExpr) -> SymExpr {
        match (self, rhs) {
            (SymExpr::Const(a), SymExpr::Const(b)) if a.checked_add(b).is_some() => {
                SymExpr::Const(a + b)
            }
            (e, SymExpr::Const(0)) | (SymExpr::Const(0), e) => e,
            (a, b) => SymExpr::Add(Box::new(a), Box::new(b)),
        }
    }
}

impl ops::Sub for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: SymExpr) -> SymExpr {
        match (self, rhs) {
            (SymExpr::Const(a), SymExpr::Const(b)) if a.checked_sub(b).is_some() => {
                SymExpr::Const(a - b)
            }
            (e, SymExpr::Const(0)) => e,
            (SymExpr::Const(0), e) => -e,
            (a, b) if a == b => SymExpr::Const(0),
            (a, b) => SymExpr::Sub(Box::new(a), Box::new(b)),
        }
    }
}

impl ops::Mul for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: SymExpr) -> SymExpr {
        match (self, rhs) {
            (SymExpr::Const(a), SymExpr::Const(b)) if a.checked_mul(b).is_some() => {
                SymExpr::Const(a * b)
            }
            (SymExpr::Const(0), _) | (_, SymExpr::Const(0)) => SymExpr::Const(0),
            (e, SymExpr::Const(1)) | (SymExpr::Const(1), e) => e,
            (a, b) => SymExpr::Mul(Box::new(a), Box::new(b)),
        }
    }
}

impl ops::Neg for SymExpr {
    type Output = SymExpr;

    fn neg(self) -> SymExpr {
        match self {
            SymExpr::Const(c) if c != i64::MIN => SymExpr::Const(-c),
            SymExpr::Neg(inner) => *inner,
            e => SymExpr::Neg(Box::new(e)),
        }
    }
}

impl SymExpr {
    pub fn sym(s: Symbol) -> Self {
        SymExpr::Sym(s)
    }

    /// Division. Constants fold only when the quotient is exact, so
    /// `4 / 3` survives as a rational scale.
    pub fn div(self, rhs: SymExpr) -> SymExpr {
        match (self, rhs) {
            (e, SymExpr::Const(1)) => e,
            (SymExpr::Const(a), SymExpr::Const(b)) if a.checked_rem(b) == Some(0) => {
                SymExpr::Const(a / b)
            }
            (a, b) => SymExpr::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn rem(self, rhs: SymExpr) -> SymExpr {
        match (self, rhs) {
            (SymExpr::Const(a), SymExpr::Const(b)) if a.checked_rem_euclid(b).is_some() => {
                SymExpr::Const(a.rem_euclid(b))
            }
            (_, SymExpr::Const(1)) => SymExpr::Const(0),
            (a, b) => SymExpr::Mod(Box::new(a), Box::new(b)),
        }
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            SymExpr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    pub(crate) fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            SymExpr::Const(_) => {}
            SymExpr::Sym(s) => {
                out.insert(s.clone());
            }
            SymExpr::Neg(e) => e.collect_symbols(out),
            SymExpr::Add(a, b)
            | SymExpr::Sub(a, b)
            | SymExpr::Mul(a, b)
            | SymExpr::Div(a, b)
            | SymExpr::Mod(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    pub fn mentions(&self, pred: &dyn Fn(&Symbol) -> bool) -> bool {
        match self {
            SymExpr::Const(_) => false,
            SymExpr::Sym(s) => pred(s),
            SymExpr::Neg(e) => e.mentions(pred),
            SymExpr::Add(a, b)
            | SymExpr::Sub(a, b)
            | SymExpr::Mul(a, b)
            | SymExpr::Div(a, b)
            | SymExpr::Mod(a, b) => a.mentions(pred) || b.mentions(pred),
        }
    }

    pub fn mentions_noise(&self) -> bool {
        self.mentions(&Symbol::is_noise)
    }

    /// Replace symbols for which `f` answers `Some`, refolding constants.
    pub fn substitute(&self, f: &dyn Fn(&Symbol) -> Option<SymExpr>) -> SymExpr {
        match self {
            SymExpr::Const(c) => SymExpr::Const(*c),
            SymExpr::Sym(s) => f(s).unwrap_or_else(|| SymExpr::Sym(s.clone())),
            SymExpr::Neg(e) => -e.substitute(f),
            SymExpr::Add(a, b) => a.substitute(f) + b.substitute(f),
            SymExpr::Sub(a, b) => a.substitute(f) - b.substitute(f),
            SymExpr::Mul(a, b) => a.substitute(f) * b.substitute(f),
            SymExpr::Div(a, b) => a.substitute(f).div(b.substitute(f)),
            SymExpr::Mod(a, b) => a.substitute(f).rem(b.substitute(f)),
        }
    }

    /// Concrete value under an assignment; `None` when a symbol is unassigned,
    /// a divisor is zero or the arithmetic overflows.
    pub fn evaluate(&self, f: &dyn Fn(&Symbol) -> Option<i64>) -> Option<i64> {
        match self {
            SymExpr::Const(c) => Some(*c),
            SymExpr::Sym(s) => f(s),
            SymExpr::Neg(e) => e.evaluate(f)?.checked_neg(),
            SymExpr::Add(a, b) => a.evaluate(f)?.checked_add(b.evaluate(f)?),
            SymExpr::Sub(a, b) => a.evaluate(f)?.checked_sub(b.evaluate(f)?),
            SymExpr::Mul(a, b) => a.evaluate(f)?.checked_mul(b.evaluate(f)?),
            SymExpr::Div(a, b) => a.evaluate(f)?.checked_div_euclid(b.evaluate(f)?),
            SymExpr::Mod(a, b) => a.evaluate(f)?.checked_rem_euclid(b.evaluate(f)?),
        }
    }

    /// Split into `(numerator, denominator)` so that `self = num / den` over
    /// the rationals, pushing every division to the top.
    pub fn as_fraction(&self) -> (SymExpr, SymExpr) {
        let one = || SymExpr::Const(1);
        match self {
            SymExpr::Const(_) | SymExpr::Sym(_) | SymExpr::Mod(_, _) => (self.clone(), one()),
            SymExpr::Neg(e) => {
                let (n, d) = e.as_fraction();
                (-n, d)
            }
            SymExpr::Add(a, b) | SymExpr::Sub(a, b) => {
                let (an, ad) = a.as_fraction();
                let (bn, bd) = b.as_fraction();
                let lhs = an * bd.clone();
                let rhs = bn * ad.clone();
                let num = if matches!(self, SymExpr::Add(..)) {
                    lhs + rhs
                } else {
                    lhs - rhs
                };
                (num, ad * bd)
            }
            SymExpr::Mul(a, b) => {
                let (an, ad) = a.as_fraction();
                let (bn, bd) = b.as_fraction();
                (an * bn, ad * bd)
            }
            SymExpr::Div(a, b) => {
                let (an, ad) = a.as_fraction();
                let (bn, bd) = b.as_fraction();
                (an * bd, ad * bn)
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            SymExpr::Add(..) | SymExpr::Sub(..) => 1,
            SymExpr::Mul(..) | SymExpr::Div(..) | SymExpr::Mod(..) => 2,
            SymExpr::Neg(_) => 3,
            SymExpr::Const(c) if *c < 0 => 3,
            SymExpr::Const(_) | SymExpr::Sym(_) => 4,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.precedence() < min_prec {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, op, b) = match self {
            SymExpr::Const(c) => return write!(f, "{c}"),
            SymExpr::Sym(s) => return write!(f, "{s}"),
            SymExpr::Neg(e) => {
                f.write_str("-")?;
                return e.fmt_operand(f, 3);
            }
            SymExpr::Add(a, b) => (a, "+", b),
            SymExpr::Sub(a, b) => (a, "-", b),
            SymExpr::Mul(a, b) => (a, "*", b),
            SymExpr::Div(a, b) => (a, "/", b),
            SymExpr::Mod(a, b) => (a, "%", b),
        };
        let prec = self.precedence();
        a.fmt_operand(f, prec)?;
        write!(f, " {op} ")?;
        // Right operands of the same precedence need parentheses: a - (b - c).
        b.fmt_operand(f, prec + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Boolean combination of integer comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum BoolExpr {
    Const(bool),
    Cmp(CmpOp, SymExpr, SymExpr),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
    Not(Box<BoolExpr>),
}

impl BoolExpr {
    pub fn cmp(op: CmpOp, lhs: SymExpr, rhs: SymExpr) -> BoolExpr {
        match (lhs.as_const(), rhs.as_const()) {
            (Some(a), Some(b)) => BoolExpr::Const(op.holds(a, b)),
            _ => BoolExpr::Cmp(op, lhs, rhs),
        }
    }

    pub fn le(lhs: SymExpr, rhs: SymExpr) -> BoolExpr {
        BoolExpr::cmp(CmpOp::Le, lhs, rhs)
    }

    pub fn eq(lhs: SymExpr, rhs: SymExpr) -> BoolExpr {
        BoolExpr::cmp(CmpOp::Eq, lhs, rhs)
    }

    /// `lo <= e <= hi`
    pub fn within(e: SymExpr, lo: i64, hi: i64) -> BoolExpr {
        BoolExpr::and(vec![
            BoolExpr::le(SymExpr::Const(lo), e.clone()),
            BoolExpr::le(e, SymExpr::Const(hi)),
        ])
    }

    /// Flattening conjunction that drops `true` and collapses on `false`.
    pub fn and(items: impl IntoIterator<Item = BoolExpr>) -> BoolExpr {
        let mut out = Vec::new();
        for item in items {
            match item {
                BoolExpr::Const(true) => {}
                BoolExpr::Const(false) => return BoolExpr::Const(false),
                BoolExpr::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => BoolExpr::Const(true),
            1 => out.remove(0),
            _ => BoolExpr::And(out),
        }
    }

    pub fn or(items: impl IntoIterator<Item = BoolExpr>) -> BoolExpr {
        let mut out = Vec::new();
        for item in items {
            match item {
                BoolExpr::Const(false) => {}
                BoolExpr::Const(true) => return BoolExpr::Const(true),
                BoolExpr::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => BoolExpr::Const(false),
            1 => out.remove(0),
            _ => BoolExpr::Or(out),
        }
    }

    pub fn negate(self) -> BoolExpr {
        match self {
            BoolExpr::Const(b) => BoolExpr::Const(!b),
            BoolExpr::Cmp(op, l, r) => BoolExpr::Cmp(op.negate(), l, r),
            BoolExpr::Not(inner) => *inner,
            other => BoolExpr::Not(Box::new(other)),
        }
    }

    pub fn as_const(&self) -> Option<bool> {
        match self {
            BoolExpr::Const(b) => Some(*b),
            _ => None,
        }
    }

    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    pub(crate) fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            BoolExpr::Const(_) => {}
            BoolExpr::Cmp(_, l, r) => {
                l.collect_symbols(out);
                r.collect_symbols(out);
            }
            BoolExpr::And(items) | BoolExpr::Or(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            BoolExpr::Not(inner) => inner.collect_symbols(out),
        }
    }

    pub fn mentions(&self, pred: &dyn Fn(&Symbol) -> bool) -> bool {
        match self {
            BoolExpr::Const(_) => false,
            BoolExpr::Cmp(_, l, r) => l.mentions(pred) || r.mentions(pred),
            BoolExpr::And(items) | BoolExpr::Or(items) => items.iter().any(|i| i.mentions(pred)),
            BoolExpr::Not(inner) => inner.mentions(pred),
        }
    }

    pub fn substitute(&self, f: &dyn Fn(&Symbol) -> Option<SymExpr>) -> BoolExpr {
        match self {
            BoolExpr::Const(b) => BoolExpr::Const(*b),
            BoolExpr::Cmp(op, l, r) => BoolExpr::cmp(*op, l.substitute(f), r.substitute(f)),
            BoolExpr::And(items) => BoolExpr::and(items.iter().map(|i| i.substitute(f))),
            BoolExpr::Or(items) => BoolExpr::or(items.iter().map(|i| i.substitute(f))),
            BoolExpr::Not(inner) => inner.substitute(f).negate(),
        }
    }

    pub fn evaluate(&self, f: &dyn Fn(&Symbol) -> Option<i64>) -> Option<bool> {
        match self {
            BoolExpr::Const(b) => Some(*b),
            BoolExpr::Cmp(op, l, r) => Some(op.holds(l.evaluate(f)?, r.evaluate(f)?)),
            BoolExpr::And(items) => {
                for item in items {
                    if !item.evaluate(f)? {
                        return Some(false);
                    }
                }
                Some(true)
            }
            BoolExpr::Or(items) => {
                for item in items {
                    if item.evaluate(f)? {
                        return Some(true);
                    }
                }
                Some(false)
            }
            BoolExpr::Not(inner) => inner.evaluate(f).map(|b| !b),
        }
    }

    /// Comparison atoms in left-to-right order.
    pub fn atoms(&self) -> Vec<(CmpOp, &SymExpr, &SymExpr)> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<(CmpOp, &'a SymExpr, &'a SymExpr)>) {
        match self {
            BoolExpr::Const(_) => {}
            BoolExpr::Cmp(op, l, r) => out.push((*op, l, r)),
            BoolExpr::And(items) | BoolExpr::Or(items) => {
                for item in items {
                    item.collect_atoms(out);
                }
            }
            BoolExpr::Not(inner) => inner.collect_atoms(out),
        }
    }
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, items: &[BoolExpr], sep: &str| -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                match item {
                    BoolExpr::And(_) | BoolExpr::Or(_) => write!(f, "({item})")?,
                    _ => write!(f, "{item}")?,
                }
            }
            Ok(())
        };
        match self {
            BoolExpr::Const(b) => write!(f, "{b}"),
            BoolExpr::Cmp(op, l, r) => write!(f, "{l} {} {r}", op.symbol()),
            BoolExpr::And(items) => join(f, items, "&&"),
            BoolExpr::Or(items) => join(f, items, "||"),
            BoolExpr::Not(inner) => write!(f, "!({inner})"),
        }
    }
}
