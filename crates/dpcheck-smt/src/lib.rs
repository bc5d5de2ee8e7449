//! SMT encoding and solver integration for dpcheck.
//!
//! Queries are built as solver-agnostic [`terms::SmtTerm`]s, discharged
//! through the [`solver::SmtSolver`] trait and rendered as SMT-LIB2 scripts
//! when a dump directory is configured. Z3 is the only backend.

pub mod backends;
pub mod encoder;
pub mod solver;
pub mod terms;
