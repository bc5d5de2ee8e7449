//! Symbolic paths produced by exploring one run of a program.

use std::fmt;

use crate::expr::{BoolExpr, Run, SymExpr, Symbol};

/// Program point: byte offset of the statement in the program text.
pub type SiteId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum NoiseFamily {
    Laplace,
}

impl fmt::Display for NoiseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Lap")
    }
}

/// A noise sample drawn on a path. Identity is positional: `(run, ordinal)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct NoiseVar {
    pub symbol: Symbol,
    pub ordinal: usize,
    pub site: SiteId,
    pub family: NoiseFamily,
    /// Scale `b` of the distribution, over parameters only.
    pub scale: SymExpr,
    /// Output events emitted before this sample was drawn.
    pub outputs_before: usize,
}

/// One branch decision on a path, oriented so that `condition` holds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Guard {
    pub site: SiteId,
    pub condition: BoolExpr,
    pub taken: bool,
    /// Noise samples drawn before the branch was decided.
    pub noise_before: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct OutputEvent {
    pub site: SiteId,
    pub value: SymExpr,
}

/// A finite execution path of one run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SymbolicPath {
    pub run: Run,
    /// Input binding variant the path was explored under.
    pub variant: usize,
    pub guards: Vec<Guard>,
    pub outputs: Vec<OutputEvent>,
    pub noise: Vec<NoiseVar>,
}

impl SymbolicPath {
    pub fn new(run: Run, variant: usize) -> Self {
        SymbolicPath {
            run,
            variant,
            guards: Vec::new(),
            outputs: Vec::new(),
            noise: Vec::new(),
        }
    }

    /// Conjunction of all guards.
    pub fn path_condition(&self) -> BoolExpr {
        BoolExpr::and(self.guards.iter().map(|g| g.condition.clone()))
    }

    pub fn output_sites(&self) -> Vec<SiteId> {
        self.outputs.iter().map(|o| o.site).collect()
    }

    pub fn noise_sites(&self) -> Vec<SiteId> {
        self.noise.iter().map(|n| n.site).collect()
    }

    /// Same output program points and the same noise-drawing program points,
    /// in the same order.
    pub fn is_structurally_compatible(&self, other: &SymbolicPath) -> bool {
        self.outputs.len() == other.outputs.len()
            && self.output_sites() == other.output_sites()
            && self.noise_sites() == other.noise_sites()
    }

    /// `|eta| <= bound` for every sample on the path.
    pub fn noise_domain(&self, bound: i64) -> Vec<BoolExpr> {
        self.noise
            .iter()
            .map(|n| BoolExpr::within(SymExpr::Sym(n.symbol.clone()), -bound, bound))
            .collect()
    }

    /// Branch decisions a coupling of sample `ordinal` may depend on: every
    /// decision taken before the draw, plus the first later decision whose
    /// condition reads the sample.
    pub fn decision_prefix(&self, ordinal: usize) -> Vec<(SiteId, bool)> {
        let Some(noise) = self.noise.get(ordinal) else {
            return Vec::new();
        };
        let mut prefix = Vec::new();
        for guard in &self.guards {
            if guard.noise_before <= ordinal {
                prefix.push((guard.site, guard.taken));
            } else {
                if guard.condition.mentions(&|s| *s == noise.symbol) {
                    prefix.push((guard.site, guard.taken));
                    break;
                }
                if guard.noise_before > ordinal + 1 {
                    break;
                }
            }
        }
        prefix
    }

    /// Compact branch trace, e.g. `TFT`.
    pub fn trace(&self) -> String {
        self.guards
            .iter()
            .map(|g| if g.taken { 'T' } else { 'F' })
            .collect()
    }

    /// Symbols of the noise drawn before output event `event` is emitted. The
    /// last event also accounts for samples drawn after it.
    pub fn noise_before_event(&self, event: usize) -> impl Iterator<Item = &NoiseVar> {
        let last = event + 1 >= self.outputs.len();
        self.noise
            .iter()
            .filter(move |n| last || n.outputs_before <= event)
    }
}

impl fmt::Display for SymbolicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} variant {} [{}]", self.run, self.variant, self.trace())?;
        for n in &self.noise {
            writeln!(f, "  {} ~ {}({}) @{}", n.symbol, n.family, n.scale, n.site)?;
        }
        for g in &self.guards {
            writeln!(f, "  guard @{}: {}", g.site, g.condition)?;
        }
        for (i, o) in self.outputs.iter().enumerate() {
            writeln!(f, "  out[{i}] @{}: {}", o.site, o.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CmpOp;

    fn noise(run: Run, ordinal: usize, site: SiteId, outputs_before: usize) -> NoiseVar {
        NoiseVar {
            symbol: Symbol::noise(run, ordinal),
            ordinal,
            site,
            family: NoiseFamily::Laplace,
            scale: SymExpr::Const(2),
            outputs_before,
        }
    }

    fn guard_on(run: Run, ordinal: usize, site: SiteId, taken: bool, noise_before: usize) -> Guard {
        let cond = BoolExpr::cmp(
            CmpOp::Ge,
            SymExpr::Sym(Symbol::element(run, 0)) + SymExpr::Sym(Symbol::noise(run, ordinal)),
            SymExpr::Sym(Symbol::noise(run, 0)),
        );
        Guard {
            site,
            condition: if taken { cond } else { cond.negate() },
            taken,
            noise_before,
        }
    }

    /// eta0 drawn at 10, then per iteration: eta_k at 20, guard at 30, output.
    fn svt_like(run: Run, decisions: &[bool]) -> SymbolicPath {
        let mut p = SymbolicPath::new(run, 0);
        p.noise.push(noise(run, 0, 10, 0));
        for (i, taken) in decisions.iter().enumerate() {
            p.noise.push(noise(run, i + 1, 20, i));
            p.guards.push(guard_on(run, i + 1, 30, *taken, i + 2));
            let site = if *taken { 40 } else { 50 };
            p.outputs.push(OutputEvent {
                site,
                value: SymExpr::Const(i64::from(*taken)),
            });
        }
        p
    }

    #[test]
    fn compatibility_compares_sites_in_order() {
        let a = svt_like(Run::A, &[true, false]);
        assert!(a.is_structurally_compatible(&svt_like(Run::B, &[true, false])));
        assert!(!a.is_structurally_compatible(&svt_like(Run::B, &[false, true])));
        assert!(!a.is_structurally_compatible(&svt_like(Run::B, &[true])));
    }

    #[test]
    fn path_condition_conjoins_guards() {
        let p = svt_like(Run::A, &[true, true]);
        match p.path_condition() {
            BoolExpr::And(items) => assert_eq!(items.len(), 2),
            other => panic!("expected conjunction, got {other}"),
        }
        assert_eq!(p.trace(), "TT");
        assert_eq!(SymbolicPath::new(Run::A, 0).path_condition(), BoolExpr::Const(true));
    }

    #[test]
    fn decision_prefix_includes_own_guard() {
        let p = svt_like(Run::A, &[true, false, true]);
        // eta0 is read by the first guard.
        assert_eq!(p.decision_prefix(0), vec![(30, true)]);
        // eta2 is drawn after the first decision and read by the second.
        assert_eq!(p.decision_prefix(2), vec![(30, true), (30, false)]);
        assert!(p.decision_prefix(9).is_empty());
    }

    #[test]
    fn noise_before_event_counts_draw_order() {
        let p = svt_like(Run::A, &[true, false]);
        let first: Vec<_> = p.noise_before_event(0).map(|n| n.ordinal).collect();
        assert_eq!(first, vec![0, 1]);
        let last: Vec<_> = p.noise_before_event(1).map(|n| n.ordinal).collect();
        assert_eq!(last, vec![0, 1, 2]);
    }

    #[test]
    fn noise_domain_bounds_every_sample() {
        let p = svt_like(Run::A, &[true]);
        assert_eq!(p.noise_domain(10).len(), 2);
    }
}
