#![allow(clippy::result_large_err)]

use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::errors::ParseError;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct DpParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;
type Pairs<'a> = pest::iterators::Pairs<'a, Rule>;

fn span_from(pair: &Pair<'_>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

fn syntax_error_at(pair: &Pair<'_>, message: impl Into<String>) -> ParseError {
    ParseError::syntax(message, span_from(pair), "", "")
}

/// Pull the next child of a rule the grammar guarantees to be present.
fn next_child<'a>(inner: &mut Pairs<'a>, parent: Span, what: &str) -> Result<Pair<'a>, ParseError> {
    inner
        .next()
        .ok_or_else(|| ParseError::syntax(format!("expected {what}"), parent, "", ""))
}

fn pest_error(e: pest::error::Error<Rule>, source: &str, filename: &str) -> ParseError {
    let (start, end) = match e.location {
        pest::error::InputLocation::Pos(p) => (p, p + 1),
        pest::error::InputLocation::Span((s, e)) => (s, e),
    };
    let message = e.variant.message().into_owned();
    ParseError::syntax(message, Span::new(start, end), source, filename)
}

/// Parse a program file into its function definitions.
pub fn parse_unit(source: &str, filename: &str) -> Result<TranslationUnit, ParseError> {
    let mut pairs = DpParser::parse(Rule::program, source).map_err(|e| pest_error(e, source, filename))?;
    let whole = Span::new(0, source.len());
    let program = next_child(&mut pairs, whole, "program")?;

    let mut functions = Vec::new();
    for pair in program.into_inner() {
        if pair.as_rule() == Rule::function_def {
            let function = parse_function(pair).map_err(|e| e.with_source_context(source, filename))?;
            functions.push(function);
        }
    }
    Ok(TranslationUnit { functions })
}

/// Parse a single expression, as found inside `CHECK:` and `ASSUME(...)`.
pub fn parse_expression(text: &str) -> Result<Expr, ParseError> {
    let mut pairs = DpParser::parse(Rule::standalone_expr, text).map_err(|e| pest_error(e, text, "<annotation>"))?;
    let whole = Span::new(0, text.len());
    let outer = next_child(&mut pairs, whole, "expression")?;
    let mut inner = outer.into_inner();
    let expr = next_child(&mut inner, whole, "expression")?;
    parse_expr(expr).map_err(|e| e.with_source_context(text, "<annotation>"))
}

fn parse_function(pair: Pair<'_>) -> Result<FunctionDef, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let ty_pair = next_child(&mut inner, span, "return type")?;
    let return_type = parse_type(&ty_pair)?;
    let name = next_child(&mut inner, span, "function name")?.as_str().to_string();

    let mut params = Vec::new();
    let mut body = Vec::new();
    for item in inner {
        match item.as_rule() {
            Rule::param_list => {
                for p in item.into_inner() {
                    params.push(parse_param(p)?);
                }
            }
            Rule::block => body = parse_block(item)?,
            _ => {}
        }
    }

    Ok(FunctionDef {
        name,
        return_type,
        params,
        body,
        span,
    })
}

fn parse_type(pair: &Pair<'_>) -> Result<ScalarType, ParseError> {
    ScalarType::from_keyword(pair.as_str())
        .ok_or_else(|| syntax_error_at(pair, format!("unknown type '{}'", pair.as_str())))
}

fn parse_param(pair: Pair<'_>) -> Result<Param, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let ty = parse_type(&next_child(&mut inner, span, "parameter type")?)?;
    let name = next_child(&mut inner, span, "parameter name")?.as_str().to_string();
    let is_array = inner.next().is_some_and(|p| p.as_rule() == Rule::array_suffix);
    Ok(Param {
        name,
        ty,
        is_array,
        span,
    })
}

fn parse_block(pair: Pair<'_>) -> Result<Vec<Spanned<Stmt>>, ParseError> {
    let mut stmts = Vec::new();
    for item in pair.into_inner() {
        stmts.extend(parse_statement(item)?);
    }
    Ok(stmts)
}

/// A declaration with several declarators expands into several statements.
fn parse_statement(pair: Pair<'_>) -> Result<Vec<Spanned<Stmt>>, ParseError> {
    let span = span_from(&pair);
    let single = |stmt: Stmt| Ok(vec![Spanned::new(stmt, span)]);
    match pair.as_rule() {
        Rule::annotation_stmt => {
            let mut inner = pair.into_inner();
            let lit = next_child(&mut inner, span, "string literal")?;
            let text = lit
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            single(Stmt::Annotation(text))
        }
        Rule::block => single(Stmt::Block(parse_block(pair)?)),
        Rule::if_stmt => {
            let mut inner = pair.into_inner();
            let cond = parse_expr(next_child(&mut inner, span, "condition")?)?;
            let then_branch = parse_nested(next_child(&mut inner, span, "then branch")?)?;
            let else_branch = match inner.next() {
                Some(p) => Some(Box::new(parse_nested(p)?)),
                None => None,
            };
            single(Stmt::If {
                cond,
                then_branch: Box::new(then_branch),
                else_branch,
            })
        }
        Rule::while_stmt => {
            let mut inner = pair.into_inner();
            let cond = parse_expr(next_child(&mut inner, span, "loop condition")?)?;
            let body = parse_nested(next_child(&mut inner, span, "loop body")?)?;
            single(Stmt::While {
                cond,
                body: Box::new(body),
            })
        }
        Rule::break_stmt => single(Stmt::Break),
        Rule::return_stmt => {
            let value = match pair.into_inner().next() {
                Some(p) => Some(parse_expr(p)?),
                None => None,
            };
            single(Stmt::Return(value))
        }
        Rule::decl_stmt => {
            let mut inner = pair.into_inner();
            let ty = parse_type(&next_child(&mut inner, span, "type")?)?;
            let mut out = Vec::new();
            for declarator in inner {
                let dspan = span_from(&declarator);
                let mut parts = declarator.into_inner();
                let name = next_child(&mut parts, dspan, "variable name")?.as_str().to_string();
                let init = match parts.next() {
                    Some(p) => Some(parse_expr(p)?),
                    None => None,
                };
                out.push(Spanned::new(Stmt::Decl { ty, name, init }, dspan));
            }
            Ok(out)
        }
        Rule::assign_stmt => {
            let mut inner = pair.into_inner();
            let lvalue = next_child(&mut inner, span, "assignment target")?;
            let lspan = span_from(&lvalue);
            let mut lparts = lvalue.into_inner();
            let target = next_child(&mut lparts, lspan, "variable name")?.as_str().to_string();
            let index = match lparts.next() {
                Some(p) => Some(parse_expr(p)?),
                None => None,
            };
            let value = parse_expr(next_child(&mut inner, span, "assigned value")?)?;
            single(Stmt::Assign {
                target,
                index,
                value,
            })
        }
        Rule::call_stmt => {
            let mut inner = pair.into_inner();
            match parse_expr(next_child(&mut inner, span, "call")?)? {
                Expr::Call(name, args) => single(Stmt::Call { name, args }),
                _ => Err(ParseError::syntax("expected a call", span, "", "")),
            }
        }
        Rule::empty_stmt => single(Stmt::Empty),
        other => Err(ParseError::syntax(
            format!("unexpected statement {other:?}"),
            span,
            "",
            "",
        )),
    }
}

/// The body of an `if`/`while` is a single statement; wrap multi-statement
/// expansions into a block.
fn parse_nested(pair: Pair<'_>) -> Result<Spanned<Stmt>, ParseError> {
    let span = span_from(&pair);
    let mut stmts = parse_statement(pair)?;
    if stmts.len() == 1 {
        if let Some(stmt) = stmts.pop() {
            return Ok(stmt);
        }
    }
    Ok(Spanned::new(Stmt::Block(stmts), span))
}

fn fold_left(pair: Pair<'_>) -> Result<Expr, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let mut result = parse_expr(next_child(&mut inner, span, "operand")?)?;
    while let Some(op_pair) = inner.next() {
        let op = parse_bin_op(&op_pair)?;
        let rhs = parse_expr(next_child(&mut inner, span, "right operand")?)?;
        result = Expr::binary(op, result, rhs);
    }
    Ok(result)
}

fn parse_bin_op(pair: &Pair<'_>) -> Result<BinOp, ParseError> {
    let op = match pair.as_str() {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        other => return Err(syntax_error_at(pair, format!("unknown operator '{other}'"))),
    };
    Ok(op)
}

fn parse_expr(pair: Pair<'_>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::or_expr | Rule::and_expr | Rule::cmp_expr | Rule::add_expr | Rule::mul_expr => {
            fold_left(pair)
        }
        Rule::unary => {
            let span = span_from(&pair);
            let mut ops = Vec::new();
            let mut operand = None;
            for child in pair.into_inner() {
                if child.as_rule() == Rule::prefix_op {
                    ops.push(if child.as_str() == "-" {
                        UnaryOp::Neg
                    } else {
                        UnaryOp::Not
                    });
                } else {
                    operand = Some(parse_expr(child)?);
                }
            }
            let mut result =
                operand.ok_or_else(|| ParseError::syntax("expected operand", span, "", ""))?;
            for op in ops.into_iter().rev() {
                result = match (op, result) {
                    (UnaryOp::Neg, Expr::IntLit(n)) => Expr::IntLit(-n),
                    (op, e) => Expr::Unary(op, Box::new(e)),
                };
            }
            Ok(result)
        }
        Rule::call => {
            let span = span_from(&pair);
            let mut inner = pair.into_inner();
            let name = next_child(&mut inner, span, "function name")?.as_str().to_string();
            let args = inner.map(parse_expr).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Call(name, args))
        }
        Rule::index_expr => {
            let span = span_from(&pair);
            let mut inner = pair.into_inner();
            let name = next_child(&mut inner, span, "array name")?.as_str().to_string();
            let index = parse_expr(next_child(&mut inner, span, "index")?)?;
            Ok(Expr::Index(name, Box::new(index)))
        }
        Rule::int_literal => {
            let digits = pair.as_str().split('.').next().unwrap_or_default();
            let n: i64 = digits
                .parse()
                .map_err(|e| syntax_error_at(&pair, format!("Invalid integer literal: {e}")))?;
            Ok(Expr::IntLit(n))
        }
        Rule::ident => Ok(Expr::Var(pair.as_str().to_string())),
        _ => {
            // Fallthrough: descend into children
            let span = span_from(&pair);
            let mut inner: Vec<_> = pair.into_inner().collect();
            if inner.len() == 1 {
                parse_expr(inner.remove(0))
            } else {
                Err(ParseError::syntax(
                    format!("Unexpected expression shape ({} children)", inner.len()),
                    span,
                    "",
                    "",
                ))
            }
        }
    }
}

/// One `name: <a, b>` entry of a `TYPES:` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawTypeEntry {
    pub name: String,
    pub aligned: String,
    pub shadow: String,
}

pub(crate) fn parse_types_annotation(text: &str) -> Result<Vec<RawTypeEntry>, ParseError> {
    let mut pairs = DpParser::parse(Rule::types_annotation, text).map_err(|e| pest_error(e, text, "<TYPES>"))?;
    let whole = Span::new(0, text.len());
    let outer = next_child(&mut pairs, whole, "TYPES annotation")?;
    let mut entries = Vec::new();
    for entry in outer.into_inner() {
        if entry.as_rule() != Rule::type_entry {
            continue;
        }
        let espan = span_from(&entry);
        let mut inner = entry.into_inner();
        let name = next_child(&mut inner, espan, "parameter name")?.as_str().to_string();
        let aligned = next_child(&mut inner, espan, "aligned distance")?.as_str().to_string();
        let shadow = next_child(&mut inner, espan, "shadow distance")?.as_str().to_string();
        entries.push(RawTypeEntry {
            name,
            aligned,
            shadow,
        });
    }
    Ok(entries)
}

pub(crate) fn parse_precondition_annotation(text: &str) -> Result<(String, Vec<Expr>), ParseError> {
    let mut pairs = DpParser::parse(Rule::precondition_annotation, text)
        .map_err(|e| pest_error(e, text, "<PRECONDITION>"))?;
    let whole = Span::new(0, text.len());
    let outer = next_child(&mut pairs, whole, "PRECONDITION annotation")?;
    let mut relation = String::new();
    let mut assumptions = Vec::new();
    for item in outer.into_inner() {
        match item.as_rule() {
            Rule::relation_name => relation = item.as_str().to_string(),
            Rule::assume_clause => {
                let aspan = span_from(&item);
                let mut inner = item.into_inner();
                assumptions.push(parse_expr(next_child(&mut inner, aspan, "assumption")?)?);
            }
            _ => {}
        }
    }
    Ok((relation, assumptions))
}

pub(crate) fn parse_check_annotation(text: &str) -> Result<Expr, ParseError> {
    let mut pairs =
        DpParser::parse(Rule::check_annotation, text).map_err(|e| pest_error(e, text, "<CHECK>"))?;
    let whole = Span::new(0, text.len());
    let outer = next_child(&mut pairs, whole, "CHECK annotation")?;
    let expr = outer
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| ParseError::syntax("expected check expression", whole, "", ""))?;
    parse_expr(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVT: &str = r#"
int sparsevector(float q[], int size, float epsilon, float T, int NN)
{
  "TYPES: epsilon: <0, 0>; size: <0, 0>; q: <*, *>; T: <0, 0>; NN: <0, 0>";
  "PRECONDITION: ALL_DIFFER; ASSUME(NN > 0); ASSUME(NN <= size);";
  "CHECK: epsilon";

  float eta_1 = Lap(2 / epsilon);
  int T_bar = T + eta_1;
  int count = 0; int i = 0;
  while (count < NN && i < size)
  {
    float eta_2 = Lap(4 * NN / epsilon);
    if (q[i] + eta_2 >= T_bar)
    {
      CHECKDP_OUTPUT(1);
      count = count + 1;
    }
    else
    {
      CHECKDP_OUTPUT(0);
    }
    i = i + 1;
  }
}
"#;

    #[test]
    fn parse_sparse_vector_function() {
        let unit = parse_unit(SVT, "svt.c").unwrap();
        assert_eq!(unit.functions.len(), 1);
        let f = &unit.functions[0];
        assert_eq!(f.name, "sparsevector");
        assert_eq!(f.params.len(), 5);
        assert!(f.params[0].is_array);
        assert_eq!(f.params[1].ty, ScalarType::Int);
        assert!(matches!(f.body[0].node, Stmt::Annotation(ref s) if s.starts_with("TYPES")));
        // three annotations, eta_1, T_bar, count, i, while
        assert_eq!(f.body.len(), 8);
        assert!(matches!(f.body[7].node, Stmt::While { .. }));
    }

    #[test]
    fn multi_declarator_expands_into_statements() {
        let src = "int f(float q[], int size, float epsilon) { int a = 1, b; }";
        let unit = parse_unit(src, "f.c").unwrap();
        let body = &unit.functions[0].body;
        assert_eq!(body.len(), 2);
        assert_eq!(
            body[1].node,
            Stmt::Decl {
                ty: ScalarType::Int,
                name: "b".into(),
                init: None
            }
        );
    }

    #[test]
    fn operator_precedence() {
        let e = parse_expression("a + b * c >= d || !e && f").unwrap();
        let expected = Expr::binary(
            BinOp::Or,
            Expr::binary(
                BinOp::Ge,
                Expr::binary(
                    BinOp::Add,
                    Expr::Var("a".into()),
                    Expr::binary(BinOp::Mul, Expr::Var("b".into()), Expr::Var("c".into())),
                ),
                Expr::Var("d".into()),
            ),
            Expr::binary(
                BinOp::And,
                Expr::Unary(UnaryOp::Not, Box::new(Expr::Var("e".into()))),
                Expr::Var("f".into()),
            ),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn subtraction_is_left_associative() {
        let e = parse_expression("a - b - c").unwrap();
        assert_eq!(e.to_string(), "((a - b) - c)");
    }

    #[test]
    fn negative_literal_folds() {
        assert_eq!(parse_expression("-10").unwrap(), Expr::IntLit(-10));
        assert_eq!(parse_expression("2.0").unwrap(), Expr::IntLit(2));
    }

    #[test]
    fn comments_are_ignored() {
        let src = "int f(float q[], int size, float epsilon) {\n // line\n /* block */ int a = 0; }";
        let unit = parse_unit(src, "f.c").unwrap();
        assert_eq!(unit.functions[0].body.len(), 1);
    }

    #[test]
    fn else_if_chains_nest() {
        let src = "int f(float q[], int size, float epsilon) { if (q[0] > 0) { CHECKDP_OUTPUT(1); } else if (q[0] < 0) CHECKDP_OUTPUT(2); else CHECKDP_OUTPUT(3); }";
        let unit = parse_unit(src, "f.c").unwrap();
        match &unit.functions[0].body[0].node {
            Stmt::If {
                else_branch: Some(else_branch),
                ..
            } => assert!(matches!(else_branch.node, Stmt::If { .. })),
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn syntax_error_carries_location() {
        let err = parse_unit("int f( { }", "bad.c").unwrap_err();
        match err {
            ParseError::Syntax { span, src, .. } => {
                assert!(span.offset() > 0);
                assert_eq!(src.name(), "bad.c");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert!(parse_expression("while + 1").is_err());
        assert!(parse_expression("integer + 1").is_ok());
    }

    #[test]
    fn types_annotation_accepts_either_separator() {
        let entries = parse_types_annotation("TYPES: q:<*, *>, size: <0, 0>; epsilon: <0, 0>;").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "q");
        assert_eq!(entries[0].aligned, "*");
        assert_eq!(entries[2].shadow, "0");
    }

    #[test]
    fn precondition_annotation_collects_assumptions() {
        let (relation, assumptions) =
            parse_precondition_annotation("PRECONDITION: ONE_DIFFER; ASSUME(T >= 0); ASSUME(M > 1);").unwrap();
        assert_eq!(relation, "ONE_DIFFER");
        assert_eq!(assumptions.len(), 2);
        assert_eq!(assumptions[1].to_string(), "(M > 1)");
    }

    #[test]
    fn check_annotation_with_and_without_semicolon() {
        assert_eq!(parse_check_annotation("CHECK: epsilon").unwrap(), Expr::Var("epsilon".into()));
        assert_eq!(
            parse_check_annotation("CHECK: 2 * epsilon;").unwrap().to_string(),
            "(2 * epsilon)"
        );
    }
}
