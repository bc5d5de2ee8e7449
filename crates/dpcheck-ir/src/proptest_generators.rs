//! Proptest strategies for symbolic expressions.

use proptest::prelude::*;

use crate::expr::{BoolExpr, CmpOp, Run, SymExpr, Symbol};

pub fn arb_run() -> impl Strategy<Value = Run> {
    prop_oneof![Just(Run::A), Just(Run::B)]
}

/// Symbols from a small pool so generated expressions share variables.
pub fn arb_symbol() -> impl Strategy<Value = Symbol> {
    prop_oneof![
        (arb_run(), 0..3usize).prop_map(|(run, i)| Symbol::element(run, i)),
        (arb_run(), 0..3usize).prop_map(|(run, k)| Symbol::noise(run, k)),
        Just(Symbol::Param("T".into())),
    ]
}

/// Expressions over `+ - *`, negation and division by small nonzero
/// constants. Constants stay small so evaluation does not overflow at the
/// default depth.
pub fn arb_sym_expr() -> impl Strategy<Value = SymExpr> {
    let leaf = prop_oneof![
        (-5i64..=5).prop_map(SymExpr::Const),
        arb_symbol().prop_map(SymExpr::Sym),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a + b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a - b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a * b),
            inner.clone().prop_map(|a| -a),
            (inner, prop_oneof![Just(1i64), Just(2), Just(-2), Just(3)])
                .prop_map(|(a, d)| a.div(SymExpr::Const(d))),
        ]
    })
}

pub fn arb_cmp_op() -> impl Strategy<Value = CmpOp> {
    prop_oneof![
        Just(CmpOp::Eq),
        Just(CmpOp::Ne),
        Just(CmpOp::Lt),
        Just(CmpOp::Le),
        Just(CmpOp::Gt),
        Just(CmpOp::Ge),
    ]
}

pub fn arb_bool_expr() -> impl Strategy<Value = BoolExpr> {
    let atom = (arb_cmp_op(), arb_sym_expr(), arb_sym_expr())
        .prop_map(|(op, l, r)| BoolExpr::cmp(op, l, r));
    atom.prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 1..3).prop_map(BoolExpr::and),
            proptest::collection::vec(inner.clone(), 1..3).prop_map(BoolExpr::or),
            inner.prop_map(BoolExpr::negate),
        ]
    })
}

/// Assignment of a small value to every symbol in the pool.
pub fn arb_assignment() -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(-10i64..=10, 13)
}

/// Look a symbol up in an assignment produced by [`arb_assignment`].
pub fn lookup(values: &[i64], s: &Symbol) -> Option<i64> {
    let slot = match s {
        Symbol::Element { run, index } => *index + if *run == Run::A { 0 } else { 3 },
        Symbol::Noise { run, ordinal } => 6 + *ordinal + if *run == Run::A { 0 } else { 3 },
        Symbol::Param(_) => 12,
        Symbol::Scalar { .. } => return None,
    };
    values.get(slot).copied()
}
