//! A worklist fixed point engine over a `ControlFlowGraph`.
//!
//! Every analysis in this crate, data-flow and abstract interpretation alike,
//! is a `TransferFunction` handed to `run`. The engine owns iteration order,
//! merging, widening and narrowing, and the checks which keep an analysis
//! honest.

use crate::analysis::{AbstractState, AbstractValue};
use crate::il;
use crate::{AnalysisError, Error};
use log::{debug, trace, warn};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

/// The semantics of an analysis.
pub trait TransferFunction<V: AbstractValue> {
    /// The state entering the analysis: at the entry for a forward analysis,
    /// at the exits for a backward one.
    fn boundary(&self, cfg: &il::ControlFlowGraph) -> AbstractState<V>;

    /// Transform the state across one instruction.
    ///
    /// Backward analyses receive the state after the instruction and return
    /// the state before it.
    fn instruction(
        &self,
        state: AbstractState<V>,
        block: &il::Block,
        instruction: &il::Instruction,
    ) -> Result<AbstractState<V>, Error>;

    /// Transform a state flowing along an edge.
    fn edge(&self, state: AbstractState<V>, _edge: &il::Edge) -> Result<AbstractState<V>, Error> {
        Ok(state)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Merge {
    Join,
    Meet,
}

/// Options for `run`.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedPointOptions {
    direction: Direction,
    merge: Merge,
    widening_delay: usize,
    narrowing_passes: usize,
    max_iterations_per_block: usize,
    check_monotonicity: bool,
    deadline: Option<Instant>,
}

impl Default for FixedPointOptions {
    fn default() -> FixedPointOptions {
        FixedPointOptions {
            direction: Direction::Forward,
            merge: Merge::Join,
            widening_delay: 3,
            narrowing_passes: 2,
            max_iterations_per_block: 1000,
            check_monotonicity: cfg!(debug_assertions),
            deadline: None,
        }
    }
}

impl FixedPointOptions {
    pub fn new() -> FixedPointOptions {
        FixedPointOptions::default()
    }

    pub fn forward() -> FixedPointOptions {
        FixedPointOptions::default()
    }

    pub fn backward() -> FixedPointOptions {
        FixedPointOptions::default().set_direction(Direction::Backward)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn merge(&self) -> Merge {
        self.merge
    }

    pub fn set_merge(mut self, merge: Merge) -> Self {
        self.merge = merge;
        self
    }

    /// Visits of a widening point before merges there are widened.
    pub fn widening_delay(&self) -> usize {
        self.widening_delay
    }

    pub fn set_widening_delay(mut self, widening_delay: usize) -> Self {
        self.widening_delay = widening_delay;
        self
    }

    /// Decreasing passes run after the fixed point is reached.
    pub fn narrowing_passes(&self) -> usize {
        self.narrowing_passes
    }

    pub fn set_narrowing_passes(mut self, narrowing_passes: usize) -> Self {
        self.narrowing_passes = narrowing_passes;
        self
    }

    pub fn max_iterations_per_block(&self) -> usize {
        self.max_iterations_per_block
    }

    pub fn set_max_iterations_per_block(mut self, max_iterations_per_block: usize) -> Self {
        self.max_iterations_per_block = max_iterations_per_block;
        self
    }

    /// Enabled by default in debug builds.
    pub fn check_monotonicity(&self) -> bool {
        self.check_monotonicity
    }

    pub fn set_check_monotonicity(mut self, check_monotonicity: bool) -> Self {
        self.check_monotonicity = check_monotonicity;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn set_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// The states at the start and end of one block, whatever the direction of
/// the analysis.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BlockState<V> {
    pub in_state: AbstractState<V>,
    pub out_state: AbstractState<V>,
}

/// The result of `run`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FixedPoint<V> {
    pub states: BTreeMap<usize, BlockState<V>>,
    /// Blocks processed, over all passes.
    pub iterations: usize,
    /// Set when the deadline expired before a fixed point was reached. The
    /// states are then the last computed ones and may be unsound.
    pub incomplete: bool,
}

impl<V: AbstractValue> FixedPoint<V> {
    pub fn in_state(&self, block: usize) -> Option<&AbstractState<V>> {
        self.states.get(&block).map(|state| &state.in_state)
    }

    pub fn out_state(&self, block: usize) -> Option<&AbstractState<V>> {
        self.states.get(&block).map(|state| &state.out_state)
    }
}

/// Run `transfer` to a fixed point over `cfg`.
pub fn run<V, T>(
    cfg: &il::ControlFlowGraph,
    transfer: &T,
    options: &FixedPointOptions,
) -> Result<FixedPoint<V>, Error>
where
    V: AbstractValue,
    T: TransferFunction<V>,
{
    Engine::new(cfg, transfer, options)?.run()
}

struct Engine<'e, V, T> {
    cfg: &'e il::ControlFlowGraph,
    transfer: &'e T,
    options: &'e FixedPointOptions,
    order: Vec<usize>,
    boundary_blocks: BTreeSet<usize>,
    widening_points: BTreeSet<usize>,
    boundary: AbstractState<V>,
    // Indexed by block. `merged` is the state flowing into the block in the
    // direction of the analysis, `transformed` the state it produces.
    merged: BTreeMap<usize, AbstractState<V>>,
    transformed: BTreeMap<usize, AbstractState<V>>,
    visits: BTreeMap<usize, usize>,
    iterations: usize,
}

impl<'e, V, T> Engine<'e, V, T>
where
    V: AbstractValue,
    T: TransferFunction<V>,
{
    fn new(
        cfg: &'e il::ControlFlowGraph,
        transfer: &'e T,
        options: &'e FixedPointOptions,
    ) -> Result<Engine<'e, V, T>, Error> {
        let retreating = cfg.retreating_edges()?;
        let (order, boundary_blocks, widening_points) = match options.direction {
            Direction::Forward => (
                cfg.reverse_post_order().to_vec(),
                vec![cfg.entry_index()?].into_iter().collect(),
                retreating.iter().map(|(_, tail)| *tail).collect(),
            ),
            Direction::Backward => (
                cfg.post_order().to_vec(),
                cfg.exits().into_iter().collect(),
                retreating.iter().map(|(head, _)| *head).collect(),
            ),
        };

        let initial = match options.merge {
            Merge::Join => AbstractState::bottom(),
            Merge::Meet => AbstractState::top(),
        };
        let merged = order.iter().map(|block| (*block, initial.clone())).collect();
        let transformed = order.iter().map(|block| (*block, initial.clone())).collect();

        Ok(Engine {
            cfg,
            transfer,
            options,
            order,
            boundary_blocks,
            widening_points,
            boundary: transfer.boundary(cfg),
            merged,
            transformed,
            visits: BTreeMap::new(),
            iterations: 0,
        })
    }

    fn merge(&self, lhs: &AbstractState<V>, rhs: &AbstractState<V>) -> AbstractState<V> {
        match self.options.merge {
            Merge::Join => lhs.join(rhs),
            Merge::Meet => lhs.meet(rhs),
        }
    }

    // True if `lhs` is no further from the initial state than `rhs`.
    fn ascends(&self, lhs: &AbstractState<V>, rhs: &AbstractState<V>) -> bool {
        match self.options.merge {
            Merge::Join => lhs.leq(rhs),
            Merge::Meet => rhs.leq(lhs),
        }
    }

    /// Blocks this block's state flows to.
    fn dependents(&self, block: usize) -> Result<Vec<usize>, Error> {
        match self.options.direction {
            Direction::Forward => self.cfg.successor_indices(block),
            Direction::Backward => self.cfg.predecessor_indices(block),
        }
    }

    /// The merge of the states flowing into `block`.
    fn incoming(&self, block: usize) -> Result<AbstractState<V>, Error> {
        let mut states = Vec::new();
        if self.boundary_blocks.contains(&block) {
            states.push(self.boundary.clone());
        }

        let edges = match self.options.direction {
            Direction::Forward => self.cfg.edges_in(block)?,
            Direction::Backward => self.cfg.edges_out(block)?,
        };
        for edge in edges {
            let source = match self.options.direction {
                Direction::Forward => edge.head(),
                Direction::Backward => edge.tail(),
            };
            // Sources outside the order were never reached.
            if let Some(state) = self.transformed.get(&source) {
                states.push(self.transfer.edge(state.clone(), edge)?);
            }
        }

        Ok(match states.split_first() {
            Some((first, rest)) => rest.iter().fold(first.clone(), |acc, state| self.merge(&acc, state)),
            None => self.merged[&block].clone(),
        })
    }

    /// Apply the transfer function across every instruction of `block`.
    fn transform(&self, block: usize, state: AbstractState<V>) -> Result<AbstractState<V>, Error> {
        let block = self.cfg.block(block)?;
        let mut state = state;
        match self.options.direction {
            Direction::Forward => {
                for instruction in block.instructions() {
                    state = self.transfer.instruction(state, block, instruction)?;
                }
            }
            Direction::Backward => {
                for instruction in block.instructions().iter().rev() {
                    state = self.transfer.instruction(state, block, instruction)?;
                }
            }
        }
        Ok(state)
    }

    fn check_monotonic(
        &self,
        block: usize,
        merged: &AbstractState<V>,
        transformed: &AbstractState<V>,
    ) -> Result<(), AnalysisError> {
        if !self.ascends(&self.merged[&block], merged)
            || !self.ascends(&self.transformed[&block], transformed)
        {
            warn!("non monotonic transfer at block 0x{:X}", block);
            return Err(AnalysisError::NonMonotonic { block });
        }
        Ok(())
    }

    fn ascending(&mut self) -> Result<bool, Error> {
        let mut queue: VecDeque<usize> = self.order.iter().cloned().collect();
        let mut queued: FxHashSet<usize> = self.order.iter().cloned().collect();

        while let Some(block) = queue.pop_front() {
            if self.options.expired() {
                warn!("fixed point deadline expired with {} blocks queued", queue.len() + 1);
                return Ok(false);
            }
            queued.remove(&block);
            self.iterations += 1;

            let visits = {
                let visits = self.visits.entry(block).or_insert(0);
                *visits += 1;
                *visits
            };
            if visits > self.options.max_iterations_per_block {
                warn!("no fixed point at block 0x{:X} after {} visits", block, visits - 1);
                return Err(AnalysisError::NonConvergence {
                    block,
                    iterations: visits - 1,
                }
                .into());
            }
            trace!("fixed point visit {} of block 0x{:X}", visits, block);

            let mut merged = self.incoming(block)?;
            if self.widening_points.contains(&block) && visits > self.options.widening_delay {
                trace!("widening at block 0x{:X}", block);
                merged = self.merged[&block].widen(&merged);
            }
            let transformed = self.transform(block, merged.clone())?;

            if self.options.check_monotonicity {
                self.check_monotonic(block, &merged, &transformed)?;
            }

            self.merged.insert(block, merged);
            if self.transformed[&block] != transformed {
                self.transformed.insert(block, transformed);
                for dependent in self.dependents(block)? {
                    if queued.insert(dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        Ok(true)
    }

    fn descending(&mut self) -> Result<bool, Error> {
        for pass in 0..self.options.narrowing_passes {
            let mut changed = false;
            for block in self.order.clone() {
                if self.options.expired() {
                    return Ok(false);
                }
                self.iterations += 1;

                let mut merged = self.incoming(block)?;
                if self.widening_points.contains(&block) {
                    merged = self.merged[&block].narrow(&merged);
                }
                let transformed = self.transform(block, merged.clone())?;

                changed |= self.transformed[&block] != transformed;
                self.merged.insert(block, merged);
                self.transformed.insert(block, transformed);
            }
            trace!("narrowing pass {} changed: {}", pass, changed);
            if !changed {
                break;
            }
        }
        Ok(true)
    }

    fn run(mut self) -> Result<FixedPoint<V>, Error> {
        let complete = self.ascending()? && self.descending()?;

        debug!(
            "fixed point over {} blocks after {} iterations{}",
            self.order.len(),
            self.iterations,
            if complete { "" } else { " (incomplete)" }
        );

        let direction = self.options.direction;
        let mut transformed = self.transformed;
        let states = self
            .merged
            .into_iter()
            .map(|(block, merged)| {
                let transformed = transformed
                    .remove(&block)
                    .unwrap_or_else(|| merged.clone());
                let state = match direction {
                    Direction::Forward => BlockState {
                        in_state: merged,
                        out_state: transformed,
                    },
                    Direction::Backward => BlockState {
                        in_state: transformed,
                        out_state: merged,
                    },
                };
                (block, state)
            })
            .collect();

        Ok(FixedPoint {
            states,
            iterations: self.iterations,
            incomplete: !complete,
        })
    }
}
