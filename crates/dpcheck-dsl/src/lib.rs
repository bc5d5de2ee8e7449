//! Program text front end: pest grammar, AST and the annotation model.

pub mod ast;
pub mod contract;
pub mod errors;
pub mod parser;
pub mod validate;

pub use contract::{parse, parse_target, AnnotatedProgram, ProgramContract, Relation};
pub use errors::{ContractError, ParseError};
pub use parser::{parse_expression, parse_unit};
