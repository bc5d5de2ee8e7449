//! Structural checks on a function body before it is executed symbolically.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::{Expr, FunctionDef, Span, Spanned, Stmt};
use crate::contract::ParamSpec;
use crate::errors::ParseError;

/// Laplace noise primitive.
pub const NOISE_PRIMITIVE: &str = "Lap";
/// Output primitive.
pub const OUTPUT_PRIMITIVE: &str = "CHECKDP_OUTPUT";
/// Identifiers with this prefix belong to the tool.
pub const RESERVED_PREFIX: &str = "CHECKDP";

struct Validator<'a> {
    params: &'a IndexMap<String, ParamSpec>,
    scopes: Vec<HashSet<String>>,
    loop_depth: usize,
}

pub(crate) fn validate_body(
    function: &FunctionDef,
    params: &IndexMap<String, ParamSpec>,
) -> Result<(), ParseError> {
    let mut v = Validator {
        params,
        scopes: vec![HashSet::new()],
        loop_depth: 0,
    };
    v.block(&function.body)
}

fn unsupported(construct: impl Into<String>, help: impl Into<String>, span: Span) -> ParseError {
    ParseError::unsupported(construct, help, span, "", "")
}

impl Validator<'_> {
    fn block(&mut self, stmts: &[Spanned<Stmt>]) -> Result<(), ParseError> {
        self.scopes.push(HashSet::new());
        let result = stmts.iter().try_for_each(|s| self.stmt(s));
        self.scopes.pop();
        result
    }

    fn nested(&mut self, stmt: &Spanned<Stmt>) -> Result<(), ParseError> {
        self.block(std::slice::from_ref(stmt))
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), ParseError> {
        let span = stmt.span;
        match &stmt.node {
            Stmt::Annotation(_) => Err(unsupported(
                "annotation inside the function body",
                "TYPES, PRECONDITION and CHECK must be the first statements",
                span,
            )),
            Stmt::Decl { name, init, .. } => {
                if name.starts_with(RESERVED_PREFIX) {
                    return Err(unsupported(
                        format!("identifier '{name}' uses the reserved {RESERVED_PREFIX} prefix"),
                        "rename the variable",
                        span,
                    ));
                }
                if self.params.contains_key(name) {
                    return Err(unsupported(
                        format!("declaration of '{name}' shadows a parameter"),
                        "rename the variable",
                        span,
                    ));
                }
                if let Some(init) = init {
                    self.rhs(init, span)?;
                }
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone());
                }
                Ok(())
            }
            Stmt::Assign {
                target,
                index,
                value,
            } => {
                if self.params.contains_key(target) {
                    return Err(unsupported(
                        format!("assignment to parameter '{target}'"),
                        "copy the parameter into a local variable first",
                        span,
                    ));
                }
                if index.is_some() {
                    return Err(unsupported(
                        format!("assignment to an element of '{target}'"),
                        "only scalar locals can be assigned",
                        span,
                    ));
                }
                if !self.is_local(target) {
                    return Err(unsupported(
                        format!("assignment to undeclared variable '{target}'"),
                        "declare it first",
                        span,
                    ));
                }
                self.rhs(value, span)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond, span)?;
                self.nested(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.nested(else_branch)?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.expr(cond, span)?;
                self.loop_depth += 1;
                let result = self.nested(body);
                self.loop_depth -= 1;
                result
            }
            Stmt::Block(stmts) => self.block(stmts),
            Stmt::Break if self.loop_depth == 0 => Err(unsupported(
                "break outside of a loop",
                "remove the break",
                span,
            )),
            Stmt::Break | Stmt::Empty => Ok(()),
            Stmt::Return(_) => Err(unsupported(
                "return statement",
                format!("emit results with {OUTPUT_PRIMITIVE}(...) instead"),
                span,
            )),
            Stmt::Call { name, args } if name == OUTPUT_PRIMITIVE => {
                if args.len() != 1 {
                    return Err(unsupported(
                        format!("{OUTPUT_PRIMITIVE} with {} arguments", args.len()),
                        format!("{OUTPUT_PRIMITIVE} takes exactly one value"),
                        span,
                    ));
                }
                self.expr(&args[0], span)
            }
            Stmt::Call { name, .. } if name == NOISE_PRIMITIVE => Err(unsupported(
                "discarded noise sample",
                format!("assign the sample: float eta = {NOISE_PRIMITIVE}(...);"),
                span,
            )),
            Stmt::Call { name, .. } => Err(unsupported(
                format!("call to '{name}'"),
                format!("only {NOISE_PRIMITIVE} and {OUTPUT_PRIMITIVE} may be called"),
                span,
            )),
        }
    }

    /// Right-hand side of a declaration or assignment: the only place a
    /// noise sample may appear.
    fn rhs(&self, value: &Expr, span: Span) -> Result<(), ParseError> {
        match value {
            Expr::Call(name, args) if name == NOISE_PRIMITIVE => {
                if args.len() != 1 {
                    return Err(unsupported(
                        format!("{NOISE_PRIMITIVE} with {} arguments", args.len()),
                        format!("{NOISE_PRIMITIVE} takes exactly one scale argument"),
                        span,
                    ));
                }
                self.expr(&args[0], span)
            }
            other => self.expr(other, span),
        }
    }

    fn expr(&self, expr: &Expr, span: Span) -> Result<(), ParseError> {
        if let Some((name, _)) = expr.calls().first() {
            let (construct, help) = match *name {
                NOISE_PRIMITIVE => (
                    format!("{NOISE_PRIMITIVE}(...) inside an expression"),
                    "sample into a variable first, then use the variable".to_string(),
                ),
                OUTPUT_PRIMITIVE => (
                    format!("{OUTPUT_PRIMITIVE}(...) inside an expression"),
                    "use it as a statement".to_string(),
                ),
                other => (
                    format!("call to '{other}'"),
                    format!("only {NOISE_PRIMITIVE} and {OUTPUT_PRIMITIVE} may be called"),
                ),
            };
            return Err(unsupported(construct, help, span));
        }
        self.names(expr, span)
    }

    fn names(&self, expr: &Expr, span: Span) -> Result<(), ParseError> {
        match expr {
            Expr::IntLit(_) => Ok(()),
            Expr::Var(name) => match self.params.get(name) {
                Some(p) if p.is_array => Err(unsupported(
                    format!("array '{name}' used as a value"),
                    format!("index it: {name}[i]"),
                    span,
                )),
                Some(_) => Ok(()),
                None if self.is_local(name) => Ok(()),
                None => Err(unsupported(
                    format!("use of undeclared variable '{name}'"),
                    "declare it before use",
                    span,
                )),
            },
            Expr::Index(name, index) => {
                match self.params.get(name) {
                    Some(p) if p.is_array => {}
                    _ => {
                        return Err(unsupported(
                            format!("indexing '{name}', which is not an array parameter"),
                            "only the query array can be indexed",
                            span,
                        ))
                    }
                }
                self.names(index, span)
            }
            Expr::Call(_, args) => args.iter().try_for_each(|a| self.names(a, span)),
            Expr::Unary(_, inner) => self.names(inner, span),
            Expr::Binary(_, lhs, rhs) => {
                self.names(lhs, span)?;
                self.names(rhs, span)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::contract::parse;
    use crate::errors::{ContractError, ParseError};

    fn program(body: &str) -> String {
        format!(
            "int f(float q[], int size, float epsilon) {{\n\
             \"TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>;\";\n\
             \"PRECONDITION: ALL_DIFFER;\";\n\
             \"CHECK: epsilon\";\n{body}\n}}"
        )
    }

    fn rejected(body: &str) -> String {
        match parse(&program(body), "f.c") {
            Err(ContractError::Parse(ParseError::Unsupported { construct, .. })) => construct,
            other => panic!("expected unsupported construct, got {other:?}"),
        }
    }

    #[test]
    fn accepts_sparse_vector_shape() {
        let body = "float eta_1 = Lap(2 / epsilon); int i = 0;\n\
                    while (i < size) { float eta_2 = Lap(4 / epsilon);\n\
                    if (q[i] + eta_2 >= eta_1) { CHECKDP_OUTPUT(1); break; } else { CHECKDP_OUTPUT(0); }\n\
                    i = i + 1; }";
        assert!(parse(&program(body), "f.c").is_ok());
    }

    #[test]
    fn rejects_return() {
        assert_eq!(rejected("return 1;"), "return statement");
    }

    #[test]
    fn rejects_foreign_calls() {
        assert_eq!(rejected("int x = sqrt(4);"), "call to 'sqrt'");
        assert_eq!(rejected("printf(1);"), "call to 'printf'");
    }

    #[test]
    fn rejects_noise_inside_expressions() {
        assert_eq!(
            rejected("float x = 1 + Lap(2);"),
            "Lap(...) inside an expression"
        );
        assert_eq!(rejected("Lap(2);"), "discarded noise sample");
    }

    #[test]
    fn rejects_reserved_prefix() {
        assert!(rejected("int CHECKDP_tmp = 0;").contains("reserved CHECKDP prefix"));
    }

    #[test]
    fn rejects_undeclared_and_misused_names() {
        assert_eq!(rejected("CHECKDP_OUTPUT(z);"), "use of undeclared variable 'z'");
        assert_eq!(rejected("int x = 0; x = y;"), "use of undeclared variable 'y'");
        assert_eq!(rejected("CHECKDP_OUTPUT(q);"), "array 'q' used as a value");
        assert_eq!(
            rejected("int x = 0; CHECKDP_OUTPUT(x[0]);"),
            "indexing 'x', which is not an array parameter"
        );
    }

    #[test]
    fn rejects_assignment_to_parameters() {
        assert_eq!(rejected("size = 1;"), "assignment to parameter 'size'");
    }

    #[test]
    fn block_scoping_hides_inner_declarations() {
        assert_eq!(
            rejected("if (q[0] > 0) { int t = 1; } CHECKDP_OUTPUT(t);"),
            "use of undeclared variable 't'"
        );
    }

    #[test]
    fn rejects_break_outside_loop() {
        assert_eq!(rejected("break;"), "break outside of a loop");
    }

    #[test]
    fn unsupported_errors_point_into_source() {
        let src = program("return 0;");
        match parse(&src, "f.c") {
            Err(ContractError::Parse(ParseError::Unsupported { span, src: named, .. })) => {
                assert_eq!(&src[span.offset()..span.offset() + span.len()], "return 0;");
                assert_eq!(named.name(), "f.c");
            }
            other => panic!("expected unsupported construct, got {other:?}"),
        }
    }
}
