//! What every stage needs to know about one binding variant: the input
//! premise shared by both runs and the check expression.

use dpcheck_dsl::{AnnotatedProgram, ProgramContract};
use dpcheck_ir::{BoolExpr, InputBinding, LowerError, Run, Scope, SymExpr};

/// Domain bounds, adjacency and the contract's assumptions for both runs.
pub fn input_premise(
    contract: &ProgramContract,
    binding: &InputBinding,
    value_bound: i64,
) -> Result<Vec<BoolExpr>, LowerError> {
    let mut premise = binding.domain(value_bound);
    premise.extend(binding.adjacency());
    for run in [Run::A, Run::B] {
        let scope = Scope::new(binding, run);
        for assumption in &contract.assumptions {
            premise.push(scope.lower_cond(assumption)?);
        }
    }
    Ok(premise)
}

#[derive(Debug, Clone)]
pub struct VerificationContext<'a> {
    pub program: &'a AnnotatedProgram,
    pub binding: &'a InputBinding,
    pub premise: Vec<BoolExpr>,
    /// The check expression under the binding: the privacy budget to prove.
    pub check: SymExpr,
    pub noise_bound: i64,
}

impl<'a> VerificationContext<'a> {
    pub fn new(
        program: &'a AnnotatedProgram,
        binding: &'a InputBinding,
        value_bound: i64,
        noise_bound: i64,
    ) -> Result<Self, LowerError> {
        let premise = input_premise(&program.contract, binding, value_bound)?;
        let check = Scope::new(binding, Run::A).lower(&program.contract.check)?;
        Ok(VerificationContext {
            program,
            binding,
            premise,
            check,
            noise_bound,
        })
    }

    pub fn contract(&self) -> &'a ProgramContract {
        &self.program.contract
    }

    pub fn premise_refs(&self) -> Vec<&BoolExpr> {
        self.premise.iter().collect()
    }
}
