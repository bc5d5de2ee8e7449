//! Intermediate representation shared by the dpcheck verifier.
//!
//! Symbolic integer and boolean expressions over the inputs and noise of two
//! adjacent runs, a linear normal form for syntactic comparison, symbolic
//! paths, input bindings derived from the adjacency relation, and the lowering
//! of program-text expressions into this representation.

pub mod binding;
pub mod expr;
pub mod linear;
pub mod lower;
pub mod path;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;

pub use binding::{variants, BindingError, InputBinding, ScalarBinding};
pub use expr::{BoolExpr, CmpOp, Run, SymExpr, Symbol};
pub use linear::{Atom, LinearForm};
pub use lower::{LowerError, Scope};
pub use path::{Guard, NoiseFamily, NoiseVar, OutputEvent, SiteId, SymbolicPath};
