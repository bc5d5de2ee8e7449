use std::fmt;

/// Source location as byte offsets into the program text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A spanned AST node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// A parsed source file: one or more function definitions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TranslationUnit {
    pub functions: Vec<FunctionDef>,
}

impl TranslationUnit {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ScalarType {
    Int,
    Float,
    Double,
    Void,
}

impl ScalarType {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "int" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            "double" => Some(ScalarType::Double),
            "void" => Some(ScalarType::Void),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Void => "void",
        };
        f.write_str(word)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Param {
    pub name: String,
    pub ty: ScalarType,
    pub is_array: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct FunctionDef {
    pub name: String,
    pub return_type: ScalarType,
    pub params: Vec<Param>,
    pub body: Vec<Spanned<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Stmt {
    /// A bare string literal statement (`"TYPES: ...";`).
    Annotation(String),
    Decl {
        ty: ScalarType,
        name: String,
        init: Option<Expr>,
    },
    Assign {
        target: String,
        index: Option<Expr>,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Box<Spanned<Stmt>>,
        else_branch: Option<Box<Spanned<Stmt>>>,
    },
    While {
        cond: Expr,
        body: Box<Spanned<Stmt>>,
    },
    Block(Vec<Spanned<Stmt>>),
    Break,
    Return(Option<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

/// Program-text expression.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Expr {
    IntLit(i64),
    Var(String),
    Index(String, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Names of the variables and arrays this expression reads, in first-use order.
    pub fn free_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        match self {
            Expr::IntLit(_) => {}
            Expr::Var(name) => push_unique(out, name),
            Expr::Index(name, index) => {
                push_unique(out, name);
                index.collect_names(out);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.collect_names(out);
                }
            }
            Expr::Unary(_, inner) => inner.collect_names(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_names(out);
                rhs.collect_names(out);
            }
        }
    }

    /// Calls made anywhere inside this expression, as `(name, arity)`.
    pub fn calls(&self) -> Vec<(&str, usize)> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        match self {
            Expr::IntLit(_) | Expr::Var(_) => {}
            Expr::Index(_, index) => index.collect_calls(out),
            Expr::Call(name, args) => {
                out.push((name.as_str(), args.len()));
                for arg in args {
                    arg.collect_calls(out);
                }
            }
            Expr::Unary(_, inner) => inner.collect_calls(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
        }
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::Var(name) => f.write_str(name),
            Expr::Index(name, index) => write!(f, "{name}[{index}]"),
            Expr::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Unary(UnaryOp::Neg, inner) => write!(f, "-({inner})"),
            Expr::Unary(UnaryOp::Not, inner) => write!(f, "!({inner})"),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}
