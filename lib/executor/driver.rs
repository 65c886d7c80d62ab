//! A driver concretely executes a `ControlFlowGraph`.

use crate::executor::*;
use crate::il;
use crate::Error;
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options for concrete execution.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InterpreterOptions {
    step_limit: usize,
    canvas_half_extent: f64,
}

impl Default for InterpreterOptions {
    fn default() -> InterpreterOptions {
        InterpreterOptions {
            step_limit: 100_000,
            canvas_half_extent: 10_000.0,
        }
    }
}

impl InterpreterOptions {
    pub fn new() -> InterpreterOptions {
        InterpreterOptions::default()
    }

    /// The maximum number of instructions executed before the run faults.
    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    pub fn set_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// The turtle faults when it moves further than this from the origin on
    /// either axis.
    pub fn canvas_half_extent(&self) -> f64 {
        self.canvas_half_extent
    }

    pub fn set_canvas_half_extent(mut self, canvas_half_extent: f64) -> Self {
        self.canvas_half_extent = canvas_half_extent;
        self
    }
}

/// The result of one concrete run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Execution {
    /// Visited block indices, in order, starting with the entry.
    pub trace: Vec<usize>,
    pub bindings: BTreeMap<String, i64>,
    pub turtle: Turtle,
    /// The fault which ended the run, if any.
    pub fault: Option<RuntimeFault>,
    /// Number of instructions executed.
    pub steps: usize,
}

impl Execution {
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// The outcome of executing one block.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Continue(usize),
    Exit,
    Fault(RuntimeFault),
}

/// A driver for a concrete executor over a `ControlFlowGraph`.
#[derive(Clone, Debug)]
pub struct Driver<'c> {
    cfg: &'c il::ControlFlowGraph,
    block: usize,
    state: State,
    trace: Vec<usize>,
    steps: usize,
    options: InterpreterOptions,
}

impl<'c> Driver<'c> {
    /// Create a driver positioned at the entry of the graph.
    pub fn new(
        cfg: &'c il::ControlFlowGraph,
        state: State,
        options: InterpreterOptions,
    ) -> Result<Driver<'c>, Error> {
        let block = cfg.entry_index()?;
        Ok(Driver {
            cfg,
            block,
            state,
            trace: vec![block],
            steps: 0,
            options,
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn trace(&self) -> &[usize] {
        &self.trace
    }

    /// Execute the current block.
    ///
    /// Faults are returned as `Step::Fault`. An `Err` means the graph itself
    /// is broken.
    pub fn step(&mut self) -> Result<Step, Error> {
        let cfg = self.cfg;
        let block = cfg.block(self.block)?;
        trace!("executing block 0x{:X}", self.block);

        for instruction in block.instructions() {
            let fault = |kind| RuntimeFault::new(kind, block.index(), instruction.index());

            self.steps += 1;
            if self.steps > self.options.step_limit {
                return Ok(Step::Fault(fault(FaultKind::StepLimit(self.options.step_limit))));
            }

            match self.state.execute(instruction.operation()) {
                Ok(Successor::FallThrough) => {}
                Ok(Successor::Return) => return Ok(Step::Exit),
                Ok(Successor::Block(target)) => {
                    let target = successor_block(cfg, block.index(), target)?;
                    self.block = target;
                    self.trace.push(target);
                    return Ok(Step::Continue(target));
                }
                Err(kind) => return Ok(Step::Fault(fault(kind))),
            }
        }

        Err(Error::InvalidIr(format!(
            "block 0x{:X} does not end in a terminator",
            block.index()
        )))
    }

    /// Run until the program exits or faults.
    pub fn run(mut self) -> Result<Execution, Error> {
        let fault = loop {
            match self.step()? {
                Step::Continue(_) => continue,
                Step::Exit => break None,
                Step::Fault(fault) => break Some(fault),
            }
        };

        let (bindings, turtle) = self.state.into_parts();
        Ok(Execution {
            trace: self.trace,
            bindings,
            turtle,
            fault,
            steps: self.steps,
        })
    }
}

/// Execute `cfg` from its entry with the given initial variable bindings and
/// input values.
pub fn execute(
    cfg: &il::ControlFlowGraph,
    bindings: &BTreeMap<String, i64>,
    inputs: &BTreeMap<String, i64>,
    options: &InterpreterOptions,
) -> Result<Execution, Error> {
    let state = State::new(bindings.clone(), inputs.clone(), options.canvas_half_extent);
    Driver::new(cfg, state, options.clone())?.run()
}
