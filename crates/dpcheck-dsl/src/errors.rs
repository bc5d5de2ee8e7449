#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Syntax error: {message}")]
    #[diagnostic(code(dpcheck::parse::syntax))]
    Syntax {
        message: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Unsupported construct: {construct}")]
    #[diagnostic(code(dpcheck::parse::unsupported))]
    Unsupported {
        construct: String,
        #[help]
        help: Option<String>,
        #[label("not supported")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Function '{name}' not found")]
    #[diagnostic(code(dpcheck::parse::unknown_function))]
    UnknownFunction { name: String },

    #[error("File defines {count} functions; name the one to verify")]
    #[diagnostic(
        code(dpcheck::parse::ambiguous_function),
        help("pass the function name explicitly (e.g. `--function sparsevector`)")
    )]
    AmbiguousFunction { count: usize },
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span: (span.start, span.end.saturating_sub(span.start)).into(),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn unsupported(
        construct: impl Into<String>,
        help: impl Into<String>,
        span: Span,
        source: &str,
        filename: &str,
    ) -> Self {
        ParseError::Unsupported {
            construct: construct.into(),
            help: Some(help.into()),
            span: (span.start, span.end.saturating_sub(span.start)).into(),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    /// Attach source text to span-only variants so miette can render snippets.
    pub fn with_source_context(self, source: &str, filename: &str) -> Self {
        match self {
            ParseError::Syntax { message, span, .. } => ParseError::Syntax {
                message,
                span,
                src: miette::NamedSource::new(filename, source.to_owned()),
            },
            ParseError::Unsupported {
                construct,
                help,
                span,
                ..
            } => ParseError::Unsupported {
                construct,
                help,
                span,
                src: miette::NamedSource::new(filename, source.to_owned()),
            },
            other => other,
        }
    }
}

/// Errors raised while building the annotation model of a program.
///
/// Everything here is a caller error: the program text or its annotations
/// are wrong, so nothing is ever retried.
#[derive(Debug, Error, Diagnostic)]
pub enum ContractError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error("Malformed contract: {reason}")]
    #[diagnostic(code(dpcheck::contract::malformed))]
    Malformed {
        reason: String,
        #[label("in this annotation")]
        span: Option<miette::SourceSpan>,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

impl ContractError {
    pub fn malformed(reason: impl Into<String>, span: Option<Span>) -> Self {
        ContractError::Malformed {
            reason: reason.into(),
            span: span.map(|s| (s.start, s.end.saturating_sub(s.start)).into()),
            src: miette::NamedSource::new("", String::new()),
        }
    }

    pub fn with_source_context(self, source: &str, filename: &str) -> Self {
        match self {
            ContractError::Parse(e) => ContractError::Parse(e.with_source_context(source, filename)),
            ContractError::Malformed { reason, span, .. } => ContractError::Malformed {
                reason,
                span,
                src: miette::NamedSource::new(filename, source.to_owned()),
            },
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, ContractError::Malformed { .. })
    }
}
