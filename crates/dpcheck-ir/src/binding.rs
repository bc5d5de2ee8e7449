//! Input bindings: how the parameters of the two runs of an adjacent pair
//! are bound to symbols, one binding per relation variant.

use std::collections::BTreeSet;

use dpcheck_dsl::contract::{ParamRole, ProgramContract};
use dpcheck_dsl::Relation;
use indexmap::IndexMap;
use thiserror::Error;

use crate::expr::{BoolExpr, Run, SymExpr, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("the size bound must be at least 1")]
    ZeroSize,
    #[error("epsilon must be positive, got {0}")]
    NonPositiveEpsilon(i64),
}

/// How a scalar parameter is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ScalarBinding {
    /// Concretised to a constant (size and epsilon).
    Concrete(i64),
    /// Fixed across the runs: one symbol for both.
    Shared(Symbol),
    /// May differ: `Symbol::Scalar` per run.
    PerRun,
}

/// Parameter binding for one variant of the adjacency relation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct InputBinding {
    pub relation: Relation,
    pub variant: usize,
    pub size: usize,
    pub query: String,
    /// The one index allowed to differ, for `ONE_DIFFER`.
    pub differing: Option<usize>,
    pub scalars: IndexMap<String, ScalarBinding>,
}

/// All bindings the relation induces at the given size. `ONE_DIFFER` yields
/// one variant per index; the other relations yield a single binding.
pub fn variants(
    contract: &ProgramContract,
    size: usize,
    epsilon: i64,
) -> Result<Vec<InputBinding>, BindingError> {
    if size == 0 {
        return Err(BindingError::ZeroSize);
    }
    if epsilon <= 0 {
        return Err(BindingError::NonPositiveEpsilon(epsilon));
    }
    let size_value = i64::try_from(size).map_err(|_| BindingError::ZeroSize)?;

    let mut scalars = IndexMap::new();
    for p in contract.params.values().filter(|p| !p.is_array) {
        let binding = match p.role {
            ParamRole::Size => ScalarBinding::Concrete(size_value),
            ParamRole::Epsilon => ScalarBinding::Concrete(epsilon),
            _ if p.is_fixed() => ScalarBinding::Shared(Symbol::Param(p.name.clone())),
            _ => ScalarBinding::PerRun,
        };
        scalars.insert(p.name.clone(), binding);
    }

    let base = InputBinding {
        relation: contract.relation,
        variant: 0,
        size,
        query: contract.query().name.clone(),
        differing: None,
        scalars,
    };
    Ok(match contract.relation {
        Relation::OneDiffer => (0..size)
            .map(|k| InputBinding {
                variant: k,
                differing: Some(k),
                ..base.clone()
            })
            .collect(),
        _ => vec![base],
    })
}

impl InputBinding {
    /// Symbol of `q[index]` in `run`, or `None` past the end of the array.
    pub fn element(&self, run: Run, index: usize) -> Option<Symbol> {
        if index >= self.size {
            return None;
        }
        match (self.differing, run) {
            (Some(k), Run::B) if k != index => Some(Symbol::element(Run::A, index)),
            _ => Some(Symbol::element(run, index)),
        }
    }

    pub fn scalar(&self, run: Run, name: &str) -> Option<SymExpr> {
        Some(match self.scalars.get(name)? {
            ScalarBinding::Concrete(v) => SymExpr::Const(*v),
            ScalarBinding::Shared(s) => SymExpr::Sym(s.clone()),
            ScalarBinding::PerRun => SymExpr::Sym(Symbol::Scalar {
                run,
                name: name.to_string(),
            }),
        })
    }

    /// Indices whose elements may differ between the runs.
    pub fn differing_indices(&self) -> Vec<usize> {
        match self.differing {
            Some(k) => vec![k],
            None => (0..self.size).collect(),
        }
    }

    /// Every input symbol of both runs, noise excluded.
    pub fn input_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        for run in [Run::A, Run::B] {
            for i in 0..self.size {
                out.extend(self.element(run, i));
            }
            for (name, binding) in &self.scalars {
                match binding {
                    ScalarBinding::Concrete(_) => {}
                    ScalarBinding::Shared(s) => {
                        out.insert(s.clone());
                    }
                    ScalarBinding::PerRun => {
                        out.insert(Symbol::Scalar {
                            run,
                            name: name.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// `|x| <= value_bound` for every input symbol.
    pub fn domain(&self, value_bound: i64) -> Vec<BoolExpr> {
        self.input_symbols()
            .into_iter()
            .map(|s| BoolExpr::within(SymExpr::Sym(s), -value_bound, value_bound))
            .collect()
    }

    /// Distance constraints of the relation on the differing elements.
    pub fn adjacency(&self) -> Vec<BoolExpr> {
        let (lo, hi) = self.relation.element_distance();
        self.differing_indices()
            .into_iter()
            .filter_map(|i| {
                let a = self.element(Run::A, i)?;
                let b = self.element(Run::B, i)?;
                Some(BoolExpr::within(SymExpr::Sym(b) - SymExpr::Sym(a), lo, hi))
            })
            .collect()
    }
}
