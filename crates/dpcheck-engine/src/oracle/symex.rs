//! Bounded symbolic executor over the program AST.
//!
//! The function body is first flattened into a small instruction list with
//! explicit jumps, then explored depth first. Every branch whose condition
//! is symbolic is decided with the solver; both sides are followed when both
//! are feasible under the input premise, and a guard is recorded only then.

use std::collections::HashMap;

use dpcheck_dsl::ast::{Expr, Spanned, Stmt};
use dpcheck_dsl::validate::{NOISE_PRIMITIVE, OUTPUT_PRIMITIVE};
use dpcheck_dsl::AnnotatedProgram;
use dpcheck_ir::{
    BoolExpr, Guard, InputBinding, NoiseFamily, NoiseVar, OutputEvent, Run, Scope, SiteId,
    Symbol, SymbolicPath,
};
use tracing::debug;

use super::session::{SessionConfig, SolverSession};
use super::{ExplorationBounds, OracleError, SymbolicOracle};
use crate::context::input_premise;
use crate::pipeline::timeout::deadline_exceeded;

/// Iterations after which a loop with a concrete condition is declared
/// unbounded.
const CONCRETE_LOOP_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
enum Instr {
    Assign {
        name: String,
        value: Expr,
    },
    Sample {
        name: String,
        scale: Expr,
        site: SiteId,
    },
    Output {
        value: Expr,
        site: SiteId,
    },
    Branch {
        cond: Expr,
        on_false: usize,
        site: SiteId,
        is_loop: bool,
    },
    Jump(usize),
    /// Leave the loop headed at `head`.
    Break {
        head: usize,
        target: usize,
    },
}

struct LoopFrame {
    head: usize,
    breaks: Vec<usize>,
}

#[derive(Default)]
struct Flattener {
    code: Vec<Instr>,
    loops: Vec<LoopFrame>,
}

impl Flattener {
    fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    /// Point the jump at `at` to the next instruction.
    fn patch(&mut self, at: usize) {
        let next = self.code.len();
        match self.code.get_mut(at) {
            Some(Instr::Branch { on_false, .. }) => *on_false = next,
            Some(Instr::Jump(target)) | Some(Instr::Break { target, .. }) => *target = next,
            _ => {}
        }
    }

    fn assign(&mut self, name: &str, value: &Expr, site: SiteId) -> Result<(), OracleError> {
        match value {
            Expr::Call(callee, args) if callee == NOISE_PRIMITIVE => {
                let [scale] = args.as_slice() else {
                    return Err(OracleError::Unsupported(format!(
                        "{NOISE_PRIMITIVE} takes exactly one scale argument"
                    )));
                };
                self.emit(Instr::Sample {
                    name: name.to_string(),
                    scale: scale.clone(),
                    site,
                });
            }
            _ => {
                self.emit(Instr::Assign {
                    name: name.to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    fn block(&mut self, stmts: &[Spanned<Stmt>]) -> Result<(), OracleError> {
        stmts.iter().try_for_each(|s| self.stmt(s))
    }

    fn stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), OracleError> {
        let site = stmt.span.start;
        match &stmt.node {
            Stmt::Annotation(_) | Stmt::Empty => {}
            Stmt::Decl { name, init, .. } => {
                let zero = Expr::IntLit(0);
                self.assign(name, init.as_ref().unwrap_or(&zero), site)?;
            }
            Stmt::Assign {
                target,
                index: None,
                value,
            } => self.assign(target, value, site)?,
            Stmt::Assign { target, .. } => {
                return Err(OracleError::Unsupported(format!(
                    "assignment to an element of '{target}'"
                )))
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let branch = self.emit(Instr::Branch {
                    cond: cond.clone(),
                    on_false: 0,
                    site,
                    is_loop: false,
                });
                self.stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip = self.emit(Instr::Jump(0));
                        self.patch(branch);
                        self.stmt(else_branch)?;
                        self.patch(skip);
                    }
                    None => self.patch(branch),
                }
            }
            Stmt::While { cond, body } => {
                let head = self.emit(Instr::Branch {
                    cond: cond.clone(),
                    on_false: 0,
                    site,
                    is_loop: true,
                });
                self.loops.push(LoopFrame {
                    head,
                    breaks: Vec::new(),
                });
                self.stmt(body)?;
                self.emit(Instr::Jump(head));
                self.patch(head);
                if let Some(frame) = self.loops.pop() {
                    for at in frame.breaks {
                        self.patch(at);
                    }
                }
            }
            Stmt::Block(stmts) => self.block(stmts)?,
            Stmt::Break => {
                let Some(head) = self.loops.last().map(|f| f.head) else {
                    return Err(OracleError::Unsupported("break outside of a loop".into()));
                };
                let at = self.emit(Instr::Break { head, target: 0 });
                if let Some(frame) = self.loops.last_mut() {
                    frame.breaks.push(at);
                }
            }
            Stmt::Call { name, args } if name == OUTPUT_PRIMITIVE && args.len() == 1 => {
                self.emit(Instr::Output {
                    value: args[0].clone(),
                    site,
                });
            }
            Stmt::Call { name, .. } => {
                return Err(OracleError::Unsupported(format!("call to '{name}'")))
            }
            Stmt::Return(_) => return Err(OracleError::Unsupported("return statement".into())),
        }
        Ok(())
    }
}

fn flatten(body: &[Spanned<Stmt>]) -> Result<Vec<Instr>, OracleError> {
    let mut f = Flattener::default();
    f.block(body)?;
    Ok(f.code)
}

#[derive(Debug, Clone)]
struct State<'a> {
    pc: usize,
    scope: Scope<'a>,
    path: SymbolicPath,
    /// Iterations of each active loop, keyed by the loop head.
    loops: HashMap<usize, usize>,
}

impl State<'_> {
    fn take(&mut self, cond: BoolExpr, on_false: usize, site: SiteId, taken: bool, is_loop: bool, record: bool) {
        let head = self.pc;
        if record {
            self.path.guards.push(Guard {
                site,
                condition: if taken { cond } else { cond.negate() },
                taken,
                noise_before: self.path.noise.len(),
            });
        }
        if taken {
            if is_loop {
                *self.loops.entry(head).or_insert(0) += 1;
            }
            self.pc += 1;
        } else {
            if is_loop {
                self.loops.remove(&head);
            }
            self.pc = on_false;
        }
    }
}

/// Depth-first symbolic executor, true branch first.
#[derive(Debug, Clone, Default)]
pub struct BoundedExecutor {
    pub session: SessionConfig,
}

impl BoundedExecutor {
    pub fn new(session: SessionConfig) -> Self {
        BoundedExecutor { session }
    }
}

impl SymbolicOracle for BoundedExecutor {
    fn explore(
        &self,
        program: &AnnotatedProgram,
        binding: &InputBinding,
        run: Run,
        bounds: &ExplorationBounds,
        sink: &mut dyn FnMut(SymbolicPath) -> bool,
    ) -> Result<usize, OracleError> {
        let code = flatten(&program.function.body)?;
        let premise = input_premise(&program.contract, binding, bounds.value_bound)?;
        let label = format!("explore-{}-{}", run.to_string().to_lowercase(), binding.variant);
        let mut session = SolverSession::new(label, self.session.clone());

        let mut stack = vec![State {
            pc: 0,
            scope: Scope::new(binding, run),
            path: SymbolicPath::new(run, binding.variant),
            loops: HashMap::new(),
        }];
        let mut emitted = 0;

        'paths: while let Some(mut state) = stack.pop() {
            loop {
                let Some(instr) = code.get(state.pc) else {
                    if emitted == bounds.max_paths {
                        return Err(OracleError::timeout(format!(
                            "exploration of run {run} (path budget {})",
                            bounds.max_paths
                        )));
                    }
                    emitted += 1;
                    debug!(run = %run, variant = binding.variant, trace = %state.path.trace(), "path complete");
                    if !sink(state.path) {
                        return Ok(emitted);
                    }
                    continue 'paths;
                };
                match instr {
                    Instr::Assign { name, value } => {
                        let v = state.scope.lower(value)?;
                        state.scope.bind(name.clone(), v);
                        state.pc += 1;
                    }
                    Instr::Sample { name, scale, site } => {
                        let scale = state.scope.lower(scale)?;
                        if scale.mentions_noise() {
                            return Err(OracleError::Unsupported(format!(
                                "noise scale {scale} depends on an earlier sample"
                            )));
                        }
                        let ordinal = state.path.noise.len();
                        let symbol = Symbol::noise(run, ordinal);
                        state.path.noise.push(NoiseVar {
                            symbol: symbol.clone(),
                            ordinal,
                            site: *site,
                            family: NoiseFamily::Laplace,
                            scale,
                            outputs_before: state.path.outputs.len(),
                        });
                        state.scope.bind(name.clone(), symbol.into());
                        state.pc += 1;
                    }
                    Instr::Output { value, site } => {
                        let value = state.scope.lower(value)?;
                        state.path.outputs.push(OutputEvent { site: *site, value });
                        state.pc += 1;
                    }
                    Instr::Jump(target) => state.pc = *target,
                    Instr::Break { head, target } => {
                        state.loops.remove(head);
                        state.pc = *target;
                    }
                    Instr::Branch {
                        cond,
                        on_false,
                        site,
                        is_loop,
                    } => {
                        if deadline_exceeded(self.session.deadline) {
                            return Err(OracleError::timeout("exploration"));
                        }
                        let cond = state.scope.lower_cond(cond)?;
                        let concrete = cond.as_const();
                        let (can_true, can_false) = match concrete {
                            Some(b) => (b, !b),
                            None => {
                                let pc = state.path.path_condition();
                                let noise = state.path.noise_domain(bounds.noise_bound);
                                let negated = cond.clone().negate();
                                let mut when_true: Vec<&BoolExpr> = premise.iter().collect();
                                when_true.push(&pc);
                                when_true.extend(noise.iter());
                                let mut when_false = when_true.clone();
                                when_true.push(&cond);
                                when_false.push(&negated);
                                (
                                    session.is_sat(&format!("{run} @{site} true"), &when_true)?,
                                    session.is_sat(&format!("{run} @{site} false"), &when_false)?,
                                )
                            }
                        };
                        if *is_loop && can_true {
                            let count = state.loops.get(&state.pc).copied().unwrap_or(0);
                            let limit = if concrete.is_some() {
                                CONCRETE_LOOP_LIMIT
                            } else {
                                bounds.max_unroll
                            };
                            if count >= limit {
                                return Err(OracleError::UnboundedLoop {
                                    site: *site,
                                    iterations: count,
                                });
                            }
                        }
                        match (can_true, can_false) {
                            (false, false) => continue 'paths,
                            (true, true) => {
                                let mut other = state.clone();
                                other.take(cond.clone(), *on_false, *site, false, *is_loop, true);
                                stack.push(other);
                                state.take(cond, *on_false, *site, true, *is_loop, true);
                            }
                            (taken, _) => state.take(cond, *on_false, *site, taken, *is_loop, false),
                        }
                    }
                }
            }
        }
        Ok(emitted)
    }
}
