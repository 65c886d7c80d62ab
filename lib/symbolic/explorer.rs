//! Path exploration.
//!
//! `explore` walks a `ControlFlowGraph` with a frontier of `ExecutionState`s,
//! forking at every branch whose guard is not constant and at every division
//! whose divisor may be zero. Each fork is checked with the solver before it
//! joins the frontier, so every path condition on the frontier is
//! satisfiable. Paths that reach `Return`, or that fault, become `TestCase`s.

use crate::executor::{self, eval, FaultKind};
use crate::il;
use crate::symbolic::{ExecutionState, Model, Solver, SolverResult, SolverSession, Symbol};
use crate::Error;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

/// The order in which the frontier is explored.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Order {
    BreadthFirst,
    DepthFirst,
}

/// Options for `explore`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExploreOptions {
    path_bound: usize,
    order: Order,
    deadline: Option<Instant>,
    bindings: BTreeMap<String, i64>,
}

impl Default for ExploreOptions {
    fn default() -> ExploreOptions {
        ExploreOptions {
            path_bound: 5,
            order: Order::BreadthFirst,
            deadline: None,
            bindings: BTreeMap::new(),
        }
    }
}

impl ExploreOptions {
    pub fn new() -> ExploreOptions {
        ExploreOptions::default()
    }

    /// The number of times one path may enter the same loop header.
    pub fn path_bound(&self) -> usize {
        self.path_bound
    }

    pub fn set_path_bound(mut self, path_bound: usize) -> Self {
        self.path_bound = path_bound;
        self
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn set_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Exploration stops, incomplete, once this instant has passed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn set_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Variables bound to constants before exploration starts.
    pub fn bindings(&self) -> &BTreeMap<String, i64> {
        &self.bindings
    }

    pub fn set_bindings(mut self, bindings: BTreeMap<String, i64>) -> Self {
        self.bindings = bindings;
        self
    }
}

/// Concrete parameters and inputs, and the path they drive execution down.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestCase {
    pub parameters: BTreeMap<String, i64>,
    pub inputs: BTreeMap<String, i64>,
    /// The blocks visited, starting with the entry.
    pub path: Vec<usize>,
    /// The fault the path ends in, if it does not reach `Return`.
    pub fault: Option<FaultKind>,
    /// The constraints the parameters and inputs were solved from.
    pub path_condition: Vec<il::Expression>,
}

// Where in its last block a path faulted: the instruction index, the operand
// of the instruction, and which of the operand's divisions faulted.
type FaultSite = (usize, usize, usize);

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExploreStats {
    /// States taken from the frontier.
    pub states: usize,
    /// Branches and divisions which split a path in two.
    pub forks: usize,
    pub queries: usize,
    /// Forks discarded as unsatisfiable.
    pub pruned: usize,
    /// Forks skipped because the solver could not answer.
    pub unknown: usize,
    /// Paths cut by the path bound.
    pub bounded: usize,
    /// Test cases dropped for repeating the path of an earlier one.
    pub duplicates: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExploreResult {
    pub test_cases: Vec<TestCase>,
    pub stats: ExploreStats,
    /// Set when the path bound cut a path, a deadline stopped exploration,
    /// or the solver left a fork undecided.
    pub incomplete: bool,
}

/// Explore `cfg` symbolically, producing one test case per feasible path.
pub fn explore(
    cfg: &il::ControlFlowGraph,
    solver: &dyn Solver,
    options: &ExploreOptions,
) -> Result<ExploreResult, Error> {
    let mut explorer = Explorer {
        cfg,
        session: solver.session()?,
        options,
        headers: cfg.loop_headers()?,
        frontier: VecDeque::new(),
        paths: BTreeSet::new(),
        result: ExploreResult {
            test_cases: Vec::new(),
            stats: ExploreStats::default(),
            incomplete: false,
        },
    };
    debug!("exploring with {}", solver.name());

    explorer
        .frontier
        .push_back(ExecutionState::new(cfg.entry_index()?, options.bindings()));

    while let Some(state) = explorer.pop() {
        if explorer.expired() {
            break;
        }
        explorer.result.stats.states += 1;
        explorer.step(state)?;
    }

    let result = explorer.result;
    info!(
        "explored {} states, {} test cases, {} pruned{}",
        result.stats.states,
        result.test_cases.len(),
        result.stats.pruned,
        if result.incomplete { ", incomplete" } else { "" }
    );
    Ok(result)
}

struct Explorer<'e> {
    cfg: &'e il::ControlFlowGraph,
    session: Box<dyn SolverSession>,
    options: &'e ExploreOptions,
    headers: BTreeSet<usize>,
    frontier: VecDeque<ExecutionState>,
    paths: BTreeSet<(Vec<usize>, Option<FaultSite>, Option<FaultKind>)>,
    result: ExploreResult,
}

impl<'e> Explorer<'e> {
    fn pop(&mut self) -> Option<ExecutionState> {
        match self.options.order {
            Order::BreadthFirst => self.frontier.pop_front(),
            Order::DepthFirst => self.frontier.pop_back(),
        }
    }

    fn expired(&mut self) -> bool {
        match self.options.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!("exploration deadline passed, {} states left", self.frontier.len() + 1);
                self.result.incomplete = true;
                self.frontier.clear();
                true
            }
            _ => false,
        }
    }

    fn query(&mut self, constraints: &[il::Expression], model: bool) -> Option<Model> {
        self.result.stats.queries += 1;
        match self.session.check(constraints, model) {
            Ok(SolverResult::Sat(model)) => Some(model),
            Ok(SolverResult::Unsat) => {
                trace!("pruned infeasible path");
                self.result.stats.pruned += 1;
                None
            }
            Ok(SolverResult::Unknown(reason)) => {
                warn!("skipping path, solver answered unknown: {}", reason);
                self.result.stats.unknown += 1;
                self.result.incomplete = true;
                None
            }
            Err(e) => {
                warn!("skipping path, solver query failed: {}", e);
                self.result.stats.unknown += 1;
                self.result.incomplete = true;
                None
            }
        }
    }

    fn step(&mut self, mut state: ExecutionState) -> Result<(), Error> {
        let cfg = self.cfg;
        let block = cfg.block(state.block())?;
        trace!("exploring block 0x{:X}", block.index());

        for instruction in block.instructions() {
            match instruction.operation() {
                il::Operation::Assign { dst, src } => match self.evaluate(&mut state, src, (instruction.index(), 0))? {
                    Some(value) => state.assign(dst.as_str(), value),
                    None => return Ok(()),
                },
                il::Operation::Call { command } => {
                    for (operand, argument) in command.arguments().into_iter().enumerate() {
                        if self.evaluate(&mut state, argument, (instruction.index(), operand))?.is_none() {
                            return Ok(());
                        }
                    }
                    match command {
                        il::Command::PenUp => state.set_pen_down(false),
                        il::Command::PenDown => state.set_pen_down(true),
                        _ => {}
                    }
                }
                il::Operation::Branch {
                    condition,
                    on_true,
                    on_false,
                } => {
                    let guard = match self.evaluate(&mut state, condition, (instruction.index(), 0))? {
                        Some(guard) => guard,
                        None => return Ok(()),
                    };
                    return self.branch(state, guard, *on_true, *on_false);
                }
                il::Operation::Jump { target } => return self.advance(state, *target),
                il::Operation::Return => {
                    if let Some(model) = self.query(state.path_condition(), true) {
                        self.emit(&state, model, None, None);
                    }
                    return Ok(());
                }
            }
        }

        Err(Error::InvalidIr(format!(
            "block 0x{:X} does not end in a terminator",
            block.index()
        )))
    }

    /// Evaluate `expression` symbolically in `state`.
    ///
    /// Every division which may fault splits the path: the faulting side
    /// becomes a test case, and `state` continues with the divisor known to
    /// be non-zero. Returns `None` once `state` can go no further.
    ///
    /// `operand` is the instruction index and operand position of
    /// `expression`, and tells apart faults raised in the same block.
    fn evaluate(
        &mut self,
        state: &mut ExecutionState,
        expression: &il::Expression,
        operand: (usize, usize),
    ) -> Result<Option<il::Expression>, Error> {
        let (instruction, position) = operand;
        let value = state.symbolize(expression);

        if value.variables().is_empty() && value.inputs().is_empty() {
            if let Err(kind) = eval::eval(&value, &eval::EmptyEnvironment) {
                self.fault(state, Vec::new(), kind, (instruction, position, 0));
                return Ok(None);
            }
            return Ok(Some(value));
        }

        let mut divisors = Vec::new();
        collect_divisors(&value, &il::Expression::boolean(true), &mut divisors);
        for (ordinal, (guard, divisor)) in divisors.into_iter().enumerate() {
            let site = (instruction, position, ordinal);
            let faults = eval::fold(&il::Expression::and(
                guard,
                il::Expression::cmpeq(divisor, il::expr_const(0)),
            ));
            if faults == il::Expression::boolean(false) {
                continue;
            }
            if faults == il::Expression::boolean(true) {
                self.fault(state, Vec::new(), FaultKind::DivisionByZero, site);
                return Ok(None);
            }

            self.result.stats.forks += 1;
            if self.expired() {
                return Ok(None);
            }
            self.fault(state, vec![faults.clone()], FaultKind::DivisionByZero, site);
            state.constrain(il::Expression::not(faults));
            if self.query(state.path_condition(), false).is_none() {
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// End a copy of `state`, extended with `constraints`, in a fault.
    fn fault(
        &mut self,
        state: &ExecutionState,
        constraints: Vec<il::Expression>,
        kind: FaultKind,
        site: FaultSite,
    ) {
        let mut faulting = state.clone();
        for constraint in constraints {
            faulting.constrain(constraint);
        }
        if let Some(model) = self.query(faulting.path_condition(), true) {
            debug!("path faults with {}", kind);
            self.emit(&faulting, model, Some(kind), Some(site));
        }
    }

    fn branch(
        &mut self,
        state: ExecutionState,
        guard: il::Expression,
        on_true: usize,
        on_false: usize,
    ) -> Result<(), Error> {
        match guard.constant_value() {
            Some(il::Constant::Boolean(true)) => return self.advance(state, on_true),
            Some(il::Constant::Boolean(false)) => return self.advance(state, on_false),
            Some(il::Constant::Integer(_)) => {
                return Err(Error::InvalidIr(format!(
                    "branch in block 0x{:X} has an integer condition",
                    state.block()
                )))
            }
            None => {}
        }

        self.result.stats.forks += 1;
        if self.expired() {
            return Ok(());
        }

        let mut taken = state.clone();
        taken.constrain(guard.clone());
        let mut not_taken = state;
        not_taken.constrain(il::Expression::not(guard));

        for (fork, target) in vec![(taken, on_true), (not_taken, on_false)] {
            if self.query(fork.path_condition(), false).is_some() {
                self.advance(fork, target)?;
            }
        }
        Ok(())
    }

    fn advance(&mut self, mut state: ExecutionState, target: usize) -> Result<(), Error> {
        let target = executor::successor_block(self.cfg, state.block(), target)?;
        let visits = state.enter(target);
        if self.headers.contains(&target) && visits > self.options.path_bound {
            trace!("path bound reached at header 0x{:X}", target);
            self.result.stats.bounded += 1;
            self.result.incomplete = true;
            return Ok(());
        }
        self.frontier.push_back(state);
        Ok(())
    }

    fn emit(
        &mut self,
        state: &ExecutionState,
        model: Model,
        fault: Option<FaultKind>,
        site: Option<FaultSite>,
    ) {
        let path = state.history().to_vec();
        if !self.paths.insert((path.clone(), site, fault.clone())) {
            self.result.stats.duplicates += 1;
            return;
        }

        let mut parameters = self.options.bindings.clone();
        let mut inputs = BTreeMap::new();
        for symbol in state.symbols() {
            let value = model.get(symbol).copied().unwrap_or(0);
            match symbol {
                Symbol::Parameter(name) => parameters.insert(name.clone(), value),
                Symbol::Input(name) => inputs.insert(name.clone(), value),
            };
        }

        self.result.test_cases.push(TestCase {
            parameters,
            inputs,
            path,
            fault,
            path_condition: state.path_condition().to_vec(),
        });
    }
}

// Every division and modulo in `expression`, in evaluation order, paired with
// the condition under which short-circuit evaluation reaches it.
fn collect_divisors(
    expression: &il::Expression,
    guard: &il::Expression,
    divisors: &mut Vec<(il::Expression, il::Expression)>,
) {
    match expression {
        il::Expression::And(lhs, rhs) => {
            collect_divisors(lhs, guard, divisors);
            let reached = il::Expression::and(guard.clone(), lhs.as_ref().clone());
            collect_divisors(rhs, &reached, divisors);
        }
        il::Expression::Or(lhs, rhs) => {
            collect_divisors(lhs, guard, divisors);
            let reached = il::Expression::and(
                guard.clone(),
                il::Expression::not(lhs.as_ref().clone()),
            );
            collect_divisors(rhs, &reached, divisors);
        }
        il::Expression::Div(lhs, rhs) | il::Expression::Mod(lhs, rhs) => {
            collect_divisors(lhs, guard, divisors);
            collect_divisors(rhs, guard, divisors);
            divisors.push((guard.clone(), rhs.as_ref().clone()));
        }
        _ => {
            for operand in expression.operands() {
                collect_divisors(operand, guard, divisors);
            }
        }
    }
}

/// The outcome of replaying a `TestCase` through the interpreter.
#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub execution: executor::Execution,
    pub trace_matches: bool,
    pub fault_matches: bool,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.trace_matches && self.fault_matches
    }
}

/// Run `test_case` concretely and compare the run with the path it was
/// generated for.
pub fn validate_test_case(
    cfg: &il::ControlFlowGraph,
    test_case: &TestCase,
    options: &executor::InterpreterOptions,
) -> Result<Validation, Error> {
    let execution = executor::execute(cfg, &test_case.parameters, &test_case.inputs, options)?;
    let trace_matches = execution.trace == test_case.path;
    let fault_matches = execution.fault.as_ref().map(|fault| &fault.kind) == test_case.fault.as_ref();
    if !trace_matches || !fault_matches {
        debug!(
            "test case {:?} replays as {:?} with fault {:?}",
            test_case.path, execution.trace, execution.fault
        );
    }
    Ok(Validation {
        execution,
        trace_matches,
        fault_matches,
    })
}
