//! Annotation model: the privacy contract a program declares in its header.
//!
//! A program opens with three string-literal statements:
//!
//! ```text
//! "TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>;";
//! "PRECONDITION: ALL_DIFFER; ASSUME(NN > 0);";
//! "CHECK: epsilon";
//! ```
//!
//! [`parse`] turns the program text into an [`AnnotatedProgram`]: the contract
//! plus the function body with the header removed.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::ast::{Expr, FunctionDef, Param, ScalarType, Span, Spanned, Stmt};
use crate::errors::{ContractError, ParseError};
use crate::parser;
use crate::validate;

/// One component of a declared distance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Distance {
    /// `0`: identical in both runs.
    Zero,
    /// `*`: may differ between runs.
    Star,
}

impl Distance {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "0" => Some(Distance::Zero),
            "*" => Some(Distance::Star),
            _ => None,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Distance::Zero => "0",
            Distance::Star => "*",
        })
    }
}

/// Declared distance type `<aligned, shadow>` of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct DistanceType {
    pub aligned: Distance,
    pub shadow: Distance,
}

impl DistanceType {
    pub const FIXED: DistanceType = DistanceType {
        aligned: Distance::Zero,
        shadow: Distance::Zero,
    };

    /// A `<0, 0>` parameter takes the same value in both runs.
    pub fn is_fixed(&self) -> bool {
        *self == Self::FIXED
    }
}

impl fmt::Display for DistanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.aligned, self.shadow)
    }
}

/// How the query answers of two adjacent runs may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Relation {
    /// Exactly one (unknown) element differs, by at most one.
    OneDiffer,
    /// Every element may differ, each by at most one.
    AllDiffer,
    /// Every element may grow by at most one.
    Increasing,
    /// Every element may shrink by at most one.
    Decreasing,
}

impl Relation {
    pub const ALL: [Relation; 4] = [
        Relation::OneDiffer,
        Relation::AllDiffer,
        Relation::Increasing,
        Relation::Decreasing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Relation::OneDiffer => "ONE_DIFFER",
            Relation::AllDiffer => "ALL_DIFFER",
            Relation::Increasing => "INCREASING",
            Relation::Decreasing => "DECREASING",
        }
    }

    /// Inclusive range of `q_B[i] - q_A[i]` for a differing element.
    pub fn element_distance(self) -> (i64, i64) {
        match self {
            Relation::OneDiffer | Relation::AllDiffer => (-1, 1),
            Relation::Increasing => (0, 1),
            Relation::Decreasing => (-1, 0),
        }
    }

    /// Largest per-element distance the relation admits.
    pub fn sensitivity(self) -> i64 {
        let (lo, hi) = self.element_distance();
        lo.abs().max(hi.abs())
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relation::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unrecognised relation '{s}'"))
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a parameter plays in the fixed signature `(q[], size, epsilon, ...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ParamRole {
    Query,
    Size,
    Epsilon,
    Extra,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ParamSpec {
    pub name: String,
    pub ty: ScalarType,
    pub is_array: bool,
    pub distance: DistanceType,
    pub role: ParamRole,
}

impl ParamSpec {
    /// Same value in both runs of an adjacent pair.
    pub fn is_fixed(&self) -> bool {
        self.distance.is_fixed()
    }
}

/// The contract a program declares: immutable once built.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ProgramContract {
    pub function: String,
    pub params: IndexMap<String, ParamSpec>,
    pub relation: Relation,
    pub assumptions: Vec<Expr>,
    pub check: Expr,
}

impl ProgramContract {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    /// The query array. Parameters are stored in signature order, which
    /// [`annotate`] has checked starts with `(q[], size, epsilon)`.
    pub fn query(&self) -> &ParamSpec {
        &self.params[0]
    }

    pub fn size(&self) -> &ParamSpec {
        &self.params[1]
    }

    pub fn epsilon(&self) -> &ParamSpec {
        &self.params[2]
    }

    /// Scalar parameters other than size and epsilon.
    pub fn extra_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.values().filter(|p| p.role == ParamRole::Extra)
    }
}

impl fmt::Display for ProgramContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function:  {}", self.function)?;
        writeln!(f, "relation:  {}", self.relation)?;
        writeln!(f, "params:")?;
        for p in self.params.values() {
            let suffix = if p.is_array { "[]" } else { "" };
            let fixed = if p.is_fixed() { " (fixed)" } else { "" };
            writeln!(f, "  {} {}{}: {}{}", p.ty, p.name, suffix, p.distance, fixed)?;
        }
        if !self.assumptions.is_empty() {
            writeln!(f, "assume:")?;
            for a in &self.assumptions {
                writeln!(f, "  {a}")?;
            }
        }
        write!(f, "check:     {}", self.check)
    }
}

/// A program whose header has been turned into a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedProgram {
    pub contract: ProgramContract,
    /// The function with its annotation statements removed.
    pub function: FunctionDef,
}

/// Parse program text and build its contract. The file must hold exactly one
/// function; use [`parse_target`] to pick one from several.
pub fn parse(source: &str, filename: &str) -> Result<AnnotatedProgram, ContractError> {
    parse_target(source, filename, None)
}

pub fn parse_target(
    source: &str,
    filename: &str,
    target: Option<&str>,
) -> Result<AnnotatedProgram, ContractError> {
    let unit = parser::parse_unit(source, filename)?;
    let function = match target {
        Some(name) => unit
            .function(name)
            .cloned()
            .ok_or_else(|| ParseError::UnknownFunction { name: name.into() })?,
        None => {
            if unit.functions.len() != 1 {
                return Err(ParseError::AmbiguousFunction {
                    count: unit.functions.len(),
                }
                .into());
            }
            unit.functions[0].clone()
        }
    };
    annotate(function).map_err(|e| e.with_source_context(source, filename))
}

/// Build the contract of an already parsed function.
pub fn annotate(function: FunctionDef) -> Result<AnnotatedProgram, ContractError> {
    let (header, body) = split_header(&function.body)?;
    let roles = signature_roles(&function)?;

    let [types, precondition, check] = header_annotations(&header)?;

    let params = build_params(&function.params, &roles, types)?;

    let (relation_token, assumptions) = parser::parse_precondition_annotation(precondition.0)
        .map_err(|e| ContractError::malformed(annotation_message("PRECONDITION", &e), Some(precondition.1)))?;
    let relation = Relation::from_str(&relation_token)
        .map_err(|reason| ContractError::malformed(reason, Some(precondition.1)))?;
    for assumption in &assumptions {
        check_contract_expr(assumption, &params, "assumption", precondition.1)?;
    }

    let check_expr = parser::parse_check_annotation(check.0)
        .map_err(|e| ContractError::malformed(annotation_message("CHECK", &e), Some(check.1)))?;
    check_contract_expr(&check_expr, &params, "check expression", check.1)?;

    let function = FunctionDef { body, ..function };
    validate::validate_body(&function, &params)?;

    Ok(AnnotatedProgram {
        contract: ProgramContract {
            function: function.name.clone(),
            params,
            relation,
            assumptions,
            check: check_expr,
        },
        function,
    })
}

fn annotation_message(kind: &str, err: &ParseError) -> String {
    match err {
        ParseError::Syntax { message, .. } => format!("cannot parse {kind} annotation: {message}"),
        other => format!("cannot parse {kind} annotation: {other}"),
    }
}

type Header<'a> = Vec<(&'a str, Span)>;

/// Leading string-literal statements form the header; none may follow.
fn split_header(body: &[Spanned<Stmt>]) -> Result<(Header<'_>, Vec<Spanned<Stmt>>), ContractError> {
    let mut header = Vec::new();
    let mut rest = Vec::new();
    for stmt in body {
        match &stmt.node {
            Stmt::Annotation(text) if rest.is_empty() => header.push((text.trim(), stmt.span)),
            Stmt::Annotation(_) => {
                return Err(ContractError::malformed(
                    "annotations must precede every other statement",
                    Some(stmt.span),
                ))
            }
            _ => rest.push(stmt.clone()),
        }
    }
    Ok((header, rest))
}

const HEADER_KEYWORDS: [&str; 3] = ["TYPES", "PRECONDITION", "CHECK"];

/// One TYPES, PRECONDITION and CHECK string each, in that order, and nothing else.
fn header_annotations<'a>(header: &Header<'a>) -> Result<[(&'a str, Span); 3], ContractError> {
    let mut found: [Option<(&'a str, Span)>; 3] = [None; 3];
    let mut latest = 0;
    for &(text, span) in header {
        let keyword = text.split_once(':').map(|(k, _)| k.trim());
        let slot = HEADER_KEYWORDS
            .iter()
            .position(|k| keyword == Some(*k))
            .ok_or_else(|| {
                ContractError::malformed(
                    format!(
                        "unrecognised header string \"{text}\"; expected TYPES:, PRECONDITION: or CHECK:"
                    ),
                    Some(span),
                )
            })?;
        if found[slot].is_some() {
            return Err(ContractError::malformed(
                format!("duplicate \"{}:\" annotation", HEADER_KEYWORDS[slot]),
                Some(span),
            ));
        }
        if slot < latest {
            return Err(ContractError::malformed(
                format!(
                    "\"{}:\" annotation must come before \"{}:\"",
                    HEADER_KEYWORDS[slot], HEADER_KEYWORDS[latest]
                ),
                Some(span),
            ));
        }
        found[slot] = Some((text, span));
        latest = slot;
    }
    let mut annotations = [("", Span::default()); 3];
    for (slot, keyword) in HEADER_KEYWORDS.iter().enumerate() {
        annotations[slot] = found[slot]
            .ok_or_else(|| ContractError::malformed(format!("missing \"{keyword}:\" annotation"), None))?;
    }
    Ok(annotations)
}

fn signature_roles(function: &FunctionDef) -> Result<Vec<ParamRole>, ContractError> {
    let params = &function.params;
    if params.len() < 3 {
        return Err(ContractError::malformed(
            format!(
                "'{}' must take at least (q[], size, epsilon), found {} parameter(s)",
                function.name,
                params.len()
            ),
            Some(function.span),
        ));
    }
    let expect = |ok: bool, param: &Param, what: &str| {
        if ok {
            Ok(())
        } else {
            Err(ContractError::malformed(
                format!("parameter '{}' must be {what}", param.name),
                Some(param.span),
            ))
        }
    };
    expect(params[0].is_array, &params[0], "the query array")?;
    expect(
        !params[1].is_array && params[1].ty == ScalarType::Int,
        &params[1],
        "the int size of the query array",
    )?;
    expect(!params[2].is_array, &params[2], "the scalar privacy budget")?;
    for extra in &params[3..] {
        expect(!extra.is_array, extra, "a scalar")?;
    }

    let mut roles = vec![ParamRole::Query, ParamRole::Size, ParamRole::Epsilon];
    roles.resize(params.len(), ParamRole::Extra);
    Ok(roles)
}

fn build_params(
    declared: &[Param],
    roles: &[ParamRole],
    types: (&str, Span),
) -> Result<IndexMap<String, ParamSpec>, ContractError> {
    let entries = parser::parse_types_annotation(types.0)
        .map_err(|e| ContractError::malformed(annotation_message("TYPES", &e), Some(types.1)))?;

    let mut distances: IndexMap<String, DistanceType> = IndexMap::new();
    for entry in entries {
        if !declared.iter().any(|p| p.name == entry.name) {
            return Err(ContractError::malformed(
                format!("TYPES names '{}', which is not a parameter", entry.name),
                Some(types.1),
            ));
        }
        let component = |token: &str| {
            Distance::from_token(token).ok_or_else(|| {
                ContractError::malformed(format!("invalid distance '{token}'"), Some(types.1))
            })
        };
        let distance = DistanceType {
            aligned: component(&entry.aligned)?,
            shadow: component(&entry.shadow)?,
        };
        if distances.insert(entry.name.clone(), distance).is_some() {
            return Err(ContractError::malformed(
                format!("parameter '{}' is typed twice", entry.name),
                Some(types.1),
            ));
        }
    }

    let mut params = IndexMap::new();
    for (param, role) in declared.iter().zip(roles) {
        let distance = *distances.get(&param.name).ok_or_else(|| {
            ContractError::malformed(
                format!("parameter '{}' has no type in TYPES", param.name),
                Some(param.span),
            )
        })?;
        match role {
            ParamRole::Query if distance.is_fixed() => {
                return Err(ContractError::malformed(
                    format!("query array '{}' must not be declared <0, 0>", param.name),
                    Some(types.1),
                ))
            }
            ParamRole::Size | ParamRole::Epsilon if !distance.is_fixed() => {
                return Err(ContractError::malformed(
                    format!("parameter '{}' must be declared <0, 0>", param.name),
                    Some(types.1),
                ))
            }
            _ => {}
        }
        params.insert(
            param.name.clone(),
            ParamSpec {
                name: param.name.clone(),
                ty: param.ty,
                is_array: param.is_array,
                distance,
                role: *role,
            },
        );
    }
    Ok(params)
}

fn check_contract_expr(
    expr: &Expr,
    params: &IndexMap<String, ParamSpec>,
    what: &str,
    span: Span,
) -> Result<(), ContractError> {
    if let Some((name, _)) = expr.calls().first() {
        return Err(ContractError::malformed(
            format!("{what} may not call '{name}'"),
            Some(span),
        ));
    }
    for name in expr.free_names() {
        match params.get(&name) {
            None => {
                return Err(ContractError::malformed(
                    format!("{what} references undeclared symbol '{name}'"),
                    Some(span),
                ))
            }
            Some(p) if p.is_array => {
                return Err(ContractError::malformed(
                    format!("{what} may only reference scalar parameters, found '{name}'"),
                    Some(span),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
