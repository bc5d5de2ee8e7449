use std::fmt::Write as _;

use crate::terms::{SmtSort, SmtTerm};

/// Print an SmtTerm as SMT-LIB2 format.
pub fn to_smtlib(term: &SmtTerm) -> String {
    let bin = |op: &str, l: &SmtTerm, r: &SmtTerm| format!("({op} {} {})", to_smtlib(l), to_smtlib(r));
    match term {
        SmtTerm::Var(name) => name.clone(),
        SmtTerm::IntLit(n) if *n < 0 => format!("(- {})", n.unsigned_abs()),
        SmtTerm::IntLit(n) => n.to_string(),
        SmtTerm::BoolLit(b) => b.to_string(),
        SmtTerm::Add(l, r) => bin("+", l, r),
        SmtTerm::Sub(l, r) => bin("-", l, r),
        SmtTerm::Mul(l, r) => bin("*", l, r),
        SmtTerm::Div(l, r) => bin("div", l, r),
        SmtTerm::Mod(l, r) => bin("mod", l, r),
        SmtTerm::Neg(inner) => format!("(- {})", to_smtlib(inner)),
        SmtTerm::Eq(l, r) => bin("=", l, r),
        SmtTerm::Lt(l, r) => bin("<", l, r),
        SmtTerm::Le(l, r) => bin("<=", l, r),
        SmtTerm::Gt(l, r) => bin(">", l, r),
        SmtTerm::Ge(l, r) => bin(">=", l, r),
        SmtTerm::And(terms) => nary("and", "true", terms),
        SmtTerm::Or(terms) => nary("or", "false", terms),
        SmtTerm::Not(inner) => format!("(not {})", to_smtlib(inner)),
        SmtTerm::Implies(l, r) => bin("=>", l, r),
        SmtTerm::Ite(cond, then, els) => format!(
            "(ite {} {} {})",
            to_smtlib(cond),
            to_smtlib(then),
            to_smtlib(els)
        ),
    }
}

fn nary(op: &str, unit: &str, terms: &[SmtTerm]) -> String {
    match terms {
        [] => unit.to_string(),
        [single] => to_smtlib(single),
        _ => {
            let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
            format!("({op} {})", inner.join(" "))
        }
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Int => "Int",
    }
}

/// A self-contained script: declarations, assertions, `(check-sat)`.
pub fn render_script(comment: &str, decls: &[(String, SmtSort)], assertions: &[SmtTerm]) -> String {
    let mut out = String::new();
    for line in comment.lines() {
        let _ = writeln!(out, "; {line}");
    }
    let _ = writeln!(out, "(set-logic ALL)");
    for (name, sort) in decls {
        let _ = writeln!(out, "(declare-const {name} {})", sort_to_smtlib(sort));
    }
    for a in assertions {
        let _ = writeln!(out, "(assert {})", to_smtlib(a));
    }
    let _ = writeln!(out, "(check-sat)");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_simple_term() {
        let term = SmtTerm::var("x").add(SmtTerm::int(1)).ge(SmtTerm::int(0));
        assert_eq!(to_smtlib(&term), "(>= (+ x 1) 0)");
    }

    #[test]
    fn print_negative_literals_and_integer_ops() {
        let term = SmtTerm::int(-3).modulo(SmtTerm::int(2)).eq(SmtTerm::var("x").div(SmtTerm::int(4)));
        assert_eq!(to_smtlib(&term), "(= (mod (- 3) 2) (div x 4))");
        assert_eq!(to_smtlib(&SmtTerm::int(i64::MIN)), "(- 9223372036854775808)");
    }

    #[test]
    fn print_degenerate_connectives() {
        assert_eq!(to_smtlib(&SmtTerm::and(vec![])), "true");
        assert_eq!(to_smtlib(&SmtTerm::or(vec![SmtTerm::var("a")])), "a");
    }

    #[test]
    fn script_declares_before_asserting() {
        let script = render_script(
            "pair 0/1\nevent 2",
            &[("x".into(), SmtSort::Int)],
            &[SmtTerm::var("x").gt(SmtTerm::int(0))],
        );
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                "; pair 0/1",
                "; event 2",
                "(set-logic ALL)",
                "(declare-const x Int)",
                "(assert (> x 0))",
                "(check-sat)",
            ]
        );
    }
}
