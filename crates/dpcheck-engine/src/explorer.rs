//! Runs the symbolic oracle once per member of an adjacent pair, on two
//! threads, and collects the streamed paths at a join point.

use std::sync::mpsc::{self, Sender};
use std::thread;

use dpcheck_dsl::AnnotatedProgram;
use dpcheck_ir::{InputBinding, Run, SymbolicPath};
use tracing::{info, warn};

use crate::oracle::{ExplorationBounds, OracleError, SymbolicOracle};

/// The paths of both runs of one binding variant, in exploration order.
#[derive(Debug, Clone, Default)]
pub struct Exploration {
    pub a: Vec<SymbolicPath>,
    pub b: Vec<SymbolicPath>,
}

enum Message {
    Path(Run, SymbolicPath),
    Done(Run, Result<usize, OracleError>),
}

/// Explore one run, retrying once with a doubled path budget when the first
/// attempt times out. Exploration is deterministic, so the retry skips the
/// paths that were already sent.
fn explore_run(
    oracle: &dyn SymbolicOracle,
    program: &AnnotatedProgram,
    binding: &InputBinding,
    run: Run,
    bounds: &ExplorationBounds,
    tx: &Sender<Message>,
) -> Result<usize, OracleError> {
    let mut sent = 0;
    let mut attempt = *bounds;
    let mut retried = false;
    loop {
        let mut seen = 0;
        let mut sink = |path: SymbolicPath| {
            seen += 1;
            if seen <= sent {
                return true;
            }
            sent += 1;
            tx.send(Message::Path(run, path)).is_ok()
        };
        match oracle.explore(program, binding, run, &attempt, &mut sink) {
            Err(OracleError::Timeout { context }) if !retried => {
                retried = true;
                attempt.max_paths = attempt.max_paths.saturating_mul(2);
                warn!(
                    run = %run,
                    variant = binding.variant,
                    max_paths = attempt.max_paths,
                    "{context} exceeded its budget, retrying"
                );
            }
            other => return other.map(|_| sent),
        }
    }
}

/// Explore both runs of `binding` concurrently.
pub fn explore_pair(
    oracle: &dyn SymbolicOracle,
    program: &AnnotatedProgram,
    binding: &InputBinding,
    bounds: &ExplorationBounds,
) -> Result<Exploration, OracleError> {
    let (tx, rx) = mpsc::channel();
    let mut exploration = Exploration::default();
    let mut failure: Option<(Run, OracleError)> = None;

    thread::scope(|s| {
        for run in [Run::A, Run::B] {
            let tx = tx.clone();
            s.spawn(move || {
                let result = explore_run(oracle, program, binding, run, bounds, &tx);
                let _ = tx.send(Message::Done(run, result));
            });
        }
        drop(tx);

        for message in rx {
            match message {
                Message::Path(Run::A, path) => exploration.a.push(path),
                Message::Path(Run::B, path) => exploration.b.push(path),
                Message::Done(run, Ok(count)) => {
                    info!(run = %run, variant = binding.variant, paths = count, "exploration finished");
                }
                Message::Done(run, Err(e)) => {
                    // Report run A's failure when both fail.
                    if failure.as_ref().map_or(true, |(r, _)| *r == Run::B && run == Run::A) {
                        failure = Some((run, e));
                    }
                }
            }
        }
    });

    match failure {
        Some((_, e)) => Err(e),
        None => Ok(exploration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpcheck_ir::variants;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits `total` empty paths, failing with a timeout once more than
    /// `max_paths` would be produced.
    struct Counting {
        total: usize,
        calls: AtomicUsize,
    }

    impl SymbolicOracle for Counting {
        fn explore(
            &self,
            _program: &AnnotatedProgram,
            binding: &InputBinding,
            run: Run,
            bounds: &ExplorationBounds,
            sink: &mut dyn FnMut(SymbolicPath) -> bool,
        ) -> Result<usize, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for i in 0..self.total {
                if i == bounds.max_paths {
                    return Err(OracleError::timeout("path budget"));
                }
                let mut path = SymbolicPath::new(run, binding.variant);
                path.outputs.push(dpcheck_ir::OutputEvent {
                    site: i,
                    value: dpcheck_ir::SymExpr::Const(0),
                });
                if !sink(path) {
                    return Ok(i + 1);
                }
            }
            Ok(self.total)
        }
    }

    fn program() -> AnnotatedProgram {
        dpcheck_dsl::parse(
            "int f(float q[], int size, float epsilon) {\n\
             \"TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>;\";\n\
             \"PRECONDITION: ALL_DIFFER;\";\n\
             \"CHECK: epsilon\";\n\
             CHECKDP_OUTPUT(q[0]);\n}",
            "f.c",
        )
        .unwrap()
    }

    #[test]
    fn collects_both_runs_in_order() {
        let p = program();
        let binding = &variants(&p.contract, 1, 1).unwrap()[0];
        let oracle = Counting {
            total: 3,
            calls: AtomicUsize::new(0),
        };
        let e = explore_pair(&oracle, &p, binding, &ExplorationBounds::default()).unwrap();
        assert_eq!(e.a.len(), 3);
        assert_eq!(e.b.len(), 3);
        assert!(e.a.iter().all(|p| p.run == Run::A));
        let sites: Vec<_> = e.b.iter().map(|p| p.outputs[0].site).collect();
        assert_eq!(sites, vec![0, 1, 2]);
    }

    #[test]
    fn retry_doubles_budget_without_duplicates() {
        let p = program();
        let binding = &variants(&p.contract, 1, 1).unwrap()[0];
        let oracle = Counting {
            total: 6,
            calls: AtomicUsize::new(0),
        };
        let bounds = ExplorationBounds {
            max_paths: 4,
            ..ExplorationBounds::default()
        };
        let e = explore_pair(&oracle, &p, binding, &bounds).unwrap();
        let sites: Vec<_> = e.a.iter().map(|p| p.outputs[0].site).collect();
        assert_eq!(sites, vec![0, 1, 2, 3, 4, 5]);
        // Two attempts per run.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn second_timeout_is_reported() {
        let p = program();
        let binding = &variants(&p.contract, 1, 1).unwrap()[0];
        let oracle = Counting {
            total: 20,
            calls: AtomicUsize::new(0),
        };
        let bounds = ExplorationBounds {
            max_paths: 4,
            ..ExplorationBounds::default()
        };
        let err = explore_pair(&oracle, &p, binding, &bounds).unwrap_err();
        assert!(matches!(err, OracleError::Timeout { .. }));
    }
}
