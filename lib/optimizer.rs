//! CFG to CFG optimization.
//!
//! `optimize` works on a copy of its input and repeats two passes until
//! neither changes anything:
//!
//! * Constant folding. Variables known constant are replaced and constant
//!   subexpressions folded, branches on a constant become jumps, and blocks
//!   no longer reachable are removed.
//! * Dead assignment elimination. An assignment whose variable is not live
//!   afterwards is removed when evaluating it cannot fault. Every variable is
//!   live at the exit, since final bindings are observable.
//!
//! Straight-line chains of blocks are then merged. `check_equivalence`
//! replays regression inputs through the original and the optimized graph.

use crate::analysis::{
    constant_propagation, definite_assignment, fixed_point, liveness, AbstractState, Flag,
    FlatConstant,
};
use crate::executor::{self, Execution, FaultKind, InterpreterOptions};
use crate::il;
use crate::Error;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options for `optimize`.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerOptions {
    fold_constants: bool,
    eliminate_dead_assignments: bool,
    merge_blocks: bool,
    max_rounds: usize,
    fixed_point: fixed_point::FixedPointOptions,
}

impl Default for OptimizerOptions {
    fn default() -> OptimizerOptions {
        OptimizerOptions {
            fold_constants: true,
            eliminate_dead_assignments: true,
            merge_blocks: true,
            max_rounds: 4,
            fixed_point: fixed_point::FixedPointOptions::default(),
        }
    }
}

impl OptimizerOptions {
    pub fn new() -> OptimizerOptions {
        OptimizerOptions::default()
    }

    pub fn fold_constants(&self) -> bool {
        self.fold_constants
    }

    pub fn set_fold_constants(mut self, fold_constants: bool) -> Self {
        self.fold_constants = fold_constants;
        self
    }

    pub fn eliminate_dead_assignments(&self) -> bool {
        self.eliminate_dead_assignments
    }

    pub fn set_eliminate_dead_assignments(mut self, eliminate_dead_assignments: bool) -> Self {
        self.eliminate_dead_assignments = eliminate_dead_assignments;
        self
    }

    pub fn merge_blocks(&self) -> bool {
        self.merge_blocks
    }

    pub fn set_merge_blocks(mut self, merge_blocks: bool) -> Self {
        self.merge_blocks = merge_blocks;
        self
    }

    /// The number of times folding and elimination are repeated.
    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn set_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Options for the analyses the passes run.
    pub fn fixed_point(&self) -> &fixed_point::FixedPointOptions {
        &self.fixed_point
    }

    pub fn set_fixed_point(mut self, fixed_point: fixed_point::FixedPointOptions) -> Self {
        self.fixed_point = fixed_point;
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OptimizerStats {
    pub rounds: usize,
    pub expressions_folded: usize,
    pub branches_folded: usize,
    pub blocks_removed: usize,
    pub assignments_removed: usize,
    pub blocks_merged: usize,
}

/// An optimized graph.
#[derive(Clone, Debug)]
pub struct Optimization {
    pub cfg: il::ControlFlowGraph,
    pub stats: OptimizerStats,
}

/// Optimize a copy of `cfg`.
pub fn optimize(cfg: &il::ControlFlowGraph, options: &OptimizerOptions) -> Result<Optimization, Error> {
    let mut cfg = cfg.clone();
    let mut stats = OptimizerStats::default();
    cfg.compute_orders()?;

    for round in 0..options.max_rounds {
        let mut changed = false;
        if options.fold_constants {
            changed |= fold_constants(&mut cfg, options, &mut stats)?;
            let removed = cfg.remove_unreachable_blocks()?;
            stats.blocks_removed += removed.len();
            changed |= !removed.is_empty();
            cfg.compute_orders()?;
        }
        if options.eliminate_dead_assignments {
            changed |= eliminate_dead_assignments(&mut cfg, options, &mut stats)?;
        }
        stats.rounds = round + 1;
        if !changed {
            break;
        }
    }

    if options.merge_blocks {
        let before = cfg.num_blocks();
        cfg.merge()?;
        stats.blocks_merged = before - cfg.num_blocks();
    }

    cfg.compute_orders()?;
    cfg.validate()?;
    debug!("optimized in {} rounds: {:?}", stats.rounds, stats);
    Ok(Optimization { cfg, stats })
}

fn rewrite(state: &AbstractState<FlatConstant>, operation: &il::Operation) -> il::Operation {
    let simplify = |e: &il::Expression| constant_propagation::simplify(state, e);
    match operation {
        il::Operation::Assign { dst, src } => il::Operation::assign(dst.as_str(), simplify(src)),
        il::Operation::Call { command } => il::Operation::call(command.map_arguments(simplify)),
        il::Operation::Branch {
            condition,
            on_true,
            on_false,
        } => il::Operation::branch(simplify(condition), *on_true, *on_false),
        il::Operation::Jump { .. } | il::Operation::Return => operation.clone(),
    }
}

fn fold_constants(
    cfg: &mut il::ControlFlowGraph,
    options: &OptimizerOptions,
    stats: &mut OptimizerStats,
) -> Result<bool, Error> {
    let constants = constant_propagation(cfg, &options.fixed_point)?;
    if constants.incomplete {
        warn!("constant propagation did not finish, skipping constant folding");
        return Ok(false);
    }

    let mut changed = false;
    let indices: Vec<usize> = cfg.blocks().iter().map(|block| block.index()).collect();
    for index in indices {
        // Blocks never reached are left alone.
        let mut state = match constants.in_state(index) {
            Some(state) if !state.is_bottom() => state.clone(),
            _ => continue,
        };

        let instructions = cfg.block(index)?.instructions().to_vec();
        for instruction in instructions {
            let operation = instruction.operation();
            let rewritten = rewrite(&state, operation);
            state = constant_propagation::transfer(state, operation);
            if rewritten == *operation {
                continue;
            }
            changed = true;

            if let il::Operation::Branch {
                condition,
                on_true,
                on_false,
            } = &rewritten
            {
                cfg.remove_edge(index, *on_true)?;
                cfg.remove_edge(index, *on_false)?;
                match condition.constant_value() {
                    Some(il::Constant::Boolean(holds)) => {
                        let target = if holds { *on_true } else { *on_false };
                        cfg.unconditional_edge(index, target, il::EdgeKind::Jump)?;
                        cfg.block_mut(index)?
                            .replace_operation(instruction.index(), il::Operation::jump(target))?;
                        stats.branches_folded += 1;
                        continue;
                    }
                    _ => cfg.branch_edges(index, condition, *on_true, *on_false)?,
                }
            }
            cfg.block_mut(index)?
                .replace_operation(instruction.index(), rewritten)?;
            stats.expressions_folded += 1;
        }
    }
    Ok(changed)
}

fn eliminate_dead_assignments(
    cfg: &mut il::ControlFlowGraph,
    options: &OptimizerOptions,
    stats: &mut OptimizerStats,
) -> Result<bool, Error> {
    let live = liveness(cfg, &options.fixed_point)?;
    let assigned = definite_assignment(cfg, &options.fixed_point)?;
    if live.incomplete || assigned.incomplete {
        warn!("liveness did not finish, skipping dead assignment elimination");
        return Ok(false);
    }

    let mut dead = Vec::new();
    for block in cfg.blocks() {
        let (mut defined, mut live_after) =
            match (assigned.in_state(block.index()), live.out_state(block.index())) {
                (Some(defined), Some(live_after)) => (defined.clone(), live_after.clone()),
                _ => continue,
            };

        // Reading a variable which may be unassigned faults, so only
        // assignments reading definitely assigned variables may go.
        let mut reads_assigned = Vec::new();
        for instruction in block.instructions() {
            reads_assigned.push(
                instruction
                    .variables_read()
                    .into_iter()
                    .all(|variable| defined.get(variable).0),
            );
            if let Some(written) = instruction.variable_written() {
                defined.set(written, Flag(true));
            }
        }

        for (instruction, reads_assigned) in block.instructions().iter().zip(reads_assigned).rev() {
            if let il::Operation::Assign { dst, src } = instruction.operation() {
                if !live_after.get(dst).0 && reads_assigned && !src.may_fault() {
                    dead.push((block.index(), instruction.index()));
                    continue;
                }
            }
            live_after = liveness::transfer(live_after, instruction.operation());
        }
    }

    for (block, instruction) in &dead {
        cfg.block_mut(*block)?.remove_instruction(*instruction)?;
    }
    stats.assignments_removed += dead.len();
    Ok(!dead.is_empty())
}

/// Concrete values to run a program with.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegressionInput {
    pub bindings: BTreeMap<String, i64>,
    pub inputs: BTreeMap<String, i64>,
}

/// A regression input on which two graphs behave differently.
#[derive(Clone, Debug, PartialEq)]
pub struct Mismatch {
    pub input: RegressionInput,
    pub original: Execution,
    pub optimized: Execution,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Equivalence {
    /// Inputs on which both graphs agree.
    pub agreed: usize,
    /// Inputs on which either run hit the step limit.
    pub inconclusive: usize,
    pub mismatches: Vec<Mismatch>,
}

impl Equivalence {
    pub fn is_equivalent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn step_limited(execution: &Execution) -> bool {
    matches!(
        execution.fault.as_ref().map(|fault| &fault.kind),
        Some(FaultKind::StepLimit(_))
    )
}

/// Run `original` and `optimized` on every input and compare what can be
/// observed: the final bindings of runs that finish, and whether a run
/// faults.
///
/// The two graphs execute different numbers of instructions, so a run that
/// hits the step limit in either graph proves nothing.
pub fn check_equivalence(
    original: &il::ControlFlowGraph,
    optimized: &il::ControlFlowGraph,
    inputs: &[RegressionInput],
    options: &InterpreterOptions,
) -> Result<Equivalence, Error> {
    let mut equivalence = Equivalence::default();
    for input in inputs {
        let before = executor::execute(original, &input.bindings, &input.inputs, options)?;
        let after = executor::execute(optimized, &input.bindings, &input.inputs, options)?;

        if step_limited(&before) || step_limited(&after) {
            equivalence.inconclusive += 1;
            continue;
        }

        let agree = match (&before.fault, &after.fault) {
            (None, None) => before.bindings == after.bindings,
            (Some(_), Some(_)) => true,
            _ => false,
        };
        if agree {
            equivalence.agreed += 1;
        } else {
            warn!(
                "optimized graph disagrees on {:?}: {:?} then {:?}",
                input, before.fault, after.fault
            );
            equivalence.mismatches.push(Mismatch {
                input: input.clone(),
                original: before,
                optimized: after,
            });
        }
    }
    Ok(equivalence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, Program, Statement};
    use crate::cfg_builder;

    fn assign(var: &str, expr: Expr) -> Statement {
        Statement::Assign {
            var: var.to_string(),
            expr,
        }
    }

    fn regression_inputs(name: &str, values: &[i64]) -> Vec<RegressionInput> {
        values
            .iter()
            .map(|value| RegressionInput {
                bindings: vec![(name.to_string(), *value)].into_iter().collect(),
                inputs: BTreeMap::new(),
            })
            .collect()
    }

    fn count_branches(cfg: &il::ControlFlowGraph) -> usize {
        cfg.blocks()
            .iter()
            .filter(|block| matches!(block.terminator(), Some(il::Operation::Branch { .. })))
            .count()
    }

    #[test]
    fn constant_branches_become_jumps() {
        // a = 2; b = a * 3; if b > 5 [ c = 1 ] else [ c = 2 ]; d = n + c
        let program = Program::new(vec![
            assign("a", Expr::int(2)),
            assign("b", Expr::binary(BinaryOp::Mul, Expr::var("a"), Expr::int(3))),
            Statement::If {
                cond: Expr::binary(BinaryOp::Gt, Expr::var("b"), Expr::int(5)),
                then: vec![assign("c", Expr::int(1))],
                else_: Some(vec![assign("c", Expr::int(2))]),
            },
            assign("d", Expr::binary(BinaryOp::Add, Expr::var("n"), Expr::var("c"))),
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let blocks = cfg.num_blocks();

        let optimization = optimize(&cfg, &OptimizerOptions::new()).unwrap();
        let optimized = &optimization.cfg;

        assert_eq!(cfg.num_blocks(), blocks);
        assert_eq!(count_branches(optimized), 0);
        assert_eq!(optimization.stats.branches_folded, 1);
        assert!(optimization.stats.blocks_removed >= 1);
        // Everything is straight-line code once the branch is gone.
        assert_eq!(optimized.num_blocks(), 1);

        let equivalence = check_equivalence(
            &cfg,
            optimized,
            &regression_inputs("n", &[-5, 0, 7, i64::MAX]),
            &InterpreterOptions::default(),
        )
        .unwrap();
        assert!(equivalence.is_equivalent());
        assert_eq!(equivalence.agreed, 4);
    }

    #[test]
    fn dead_assignments_are_removed() {
        // t = 7; t = n; u = t * 2
        let program = Program::new(vec![
            assign("t", Expr::int(7)),
            assign("t", Expr::var("n")),
            assign("u", Expr::binary(BinaryOp::Mul, Expr::var("t"), Expr::int(2))),
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let optimization = optimize(&cfg, &OptimizerOptions::new()).unwrap();

        assert_eq!(optimization.stats.assignments_removed, 1);
        let equivalence = check_equivalence(
            &cfg,
            &optimization.cfg,
            &regression_inputs("n", &[3, -1]),
            &InterpreterOptions::default(),
        )
        .unwrap();
        assert!(equivalence.is_equivalent());

        // Without `n` both runs fault.
        let equivalence = check_equivalence(
            &cfg,
            &optimization.cfg,
            &[RegressionInput::default()],
            &InterpreterOptions::default(),
        )
        .unwrap();
        assert!(equivalence.is_equivalent());
    }

    #[test]
    fn faulting_assignments_stay() {
        // z = 1 / n; z = 0
        let program = Program::new(vec![
            assign("z", Expr::binary(BinaryOp::Div, Expr::int(1), Expr::var("n"))),
            assign("z", Expr::int(0)),
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let optimization = optimize(&cfg, &OptimizerOptions::new()).unwrap();

        assert_eq!(optimization.stats.assignments_removed, 0);
        let equivalence = check_equivalence(
            &cfg,
            &optimization.cfg,
            &regression_inputs("n", &[0, 1, 2]),
            &InterpreterOptions::default(),
        )
        .unwrap();
        assert!(equivalence.is_equivalent());
        assert_eq!(equivalence.agreed, 3);
    }

    #[test]
    fn loops_survive() {
        // s = 0; i = 0; while i < n [ s = s + i; i = i + 1 ]
        let program = Program::new(vec![
            assign("s", Expr::int(0)),
            assign("i", Expr::int(0)),
            Statement::While {
                cond: Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::var("n")),
                body: vec![
                    assign("s", Expr::binary(BinaryOp::Add, Expr::var("s"), Expr::var("i"))),
                    assign("i", Expr::binary(BinaryOp::Add, Expr::var("i"), Expr::int(1))),
                ],
            },
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let optimization = optimize(&cfg, &OptimizerOptions::new()).unwrap();

        assert_eq!(count_branches(&optimization.cfg), 1);
        let equivalence = check_equivalence(
            &cfg,
            &optimization.cfg,
            &regression_inputs("n", &[-1, 0, 1, 10]),
            &InterpreterOptions::default(),
        )
        .unwrap();
        assert!(equivalence.is_equivalent());

        // A runaway loop is inconclusive rather than a mismatch.
        let equivalence = check_equivalence(
            &cfg,
            &optimization.cfg,
            &regression_inputs("n", &[1_000_000]),
            &InterpreterOptions::new().set_step_limit(100),
        )
        .unwrap();
        assert_eq!(equivalence.inconclusive, 1);
    }
}
