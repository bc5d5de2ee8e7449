//! Divergence obligations: under a coupling, the privacy loss of the noise
//! drawn before each output event must stay within the check expression.

use dpcheck_ir::{NoiseVar, SymbolicPath};

use crate::context::VerificationContext;
use crate::coupling::Coupling;
use crate::oracle::{
    Assignment, BoundOutcome, InferenceOracle, LossTerm, NoiseDraw, OracleError,
    ProbabilisticProgram,
};

#[derive(Debug, Clone, PartialEq)]
pub enum PairVerdict {
    Holds,
    /// The obligation of output event `event` has a witness point.
    Violated { event: usize, witness: Assignment },
    Unknown(String),
}

/// The loss goal over `noise` of path `a` under `coupling`: shifted samples
/// cost `|d| / b`, identity and pure reflection are free.
pub fn loss_program<'p>(
    ctx: &VerificationContext<'_>,
    a: &SymbolicPath,
    coupling: &Coupling,
    noise: impl IntoIterator<Item = &'p NoiseVar>,
    label: String,
) -> ProbabilisticProgram {
    let mut draws = Vec::new();
    let mut loss = Vec::new();
    for n in noise {
        draws.push(NoiseDraw {
            symbol: n.symbol.clone(),
            family: n.family,
            scale: n.scale.clone(),
        });
        if let Some(entry) = coupling.entry(n.ordinal).filter(|e| !e.is_free()) {
            loss.push(LossTerm {
                shift: entry.shift.clone(),
                scale: n.scale.clone(),
            });
        }
    }

    let mut domain = ctx.premise.clone();
    domain.extend(a.noise_domain(ctx.noise_bound));
    domain.push(a.path_condition());

    let mut observe: Vec<_> = ctx.binding.input_symbols().into_iter().collect();
    observe.extend(a.noise.iter().map(|n| n.symbol.clone()));

    ProbabilisticProgram {
        label,
        draws,
        loss,
        domain,
        bound: ctx.check.clone(),
        observe,
    }
}

/// Discharge one obligation per output event of `a`; a path without outputs
/// gets a single obligation over all of its noise.
pub fn check<O: InferenceOracle + ?Sized>(
    ctx: &VerificationContext<'_>,
    (a_index, a): (usize, &SymbolicPath),
    b_index: usize,
    coupling: &Coupling,
    oracle: &mut O,
) -> Result<PairVerdict, OracleError> {
    for event in 0..a.outputs.len().max(1) {
        let label = format!(
            "variant {} pair {a_index}/{b_index} event {event}",
            ctx.binding.variant
        );
        let program = loss_program(ctx, a, coupling, a.noise_before_event(event), label);
        match oracle.discharge(&program)? {
            BoundOutcome::Certified => {}
            BoundOutcome::Counterexample(witness) => {
                return Ok(PairVerdict::Violated { event, witness })
            }
            BoundOutcome::Unknown(reason) => return Ok(PairVerdict::Unknown(reason)),
        }
    }
    Ok(PairVerdict::Holds)
}
