//! Live variables.
//!
//! A variable is live where its current value may still be read. Final
//! bindings are observable, so every variable is live at the exit.

use crate::analysis::{fixed_point, AbstractState, Flag};
use crate::il;
use crate::Error;

/// Compute the live variables at the start and end of every block.
pub fn liveness(
    cfg: &il::ControlFlowGraph,
    options: &fixed_point::FixedPointOptions,
) -> Result<fixed_point::FixedPoint<Flag>, Error> {
    let options = options
        .clone()
        .set_direction(fixed_point::Direction::Backward)
        .set_merge(fixed_point::Merge::Join);
    fixed_point::run(cfg, &LivenessAnalysis, &options)
}

/// Apply liveness backward across one operation.
pub fn transfer(mut state: AbstractState<Flag>, operation: &il::Operation) -> AbstractState<Flag> {
    if let Some(written) = operation.variable_written() {
        state.set(written, Flag(false));
    }
    for read in operation.variables_read() {
        state.set(read, Flag(true));
    }
    state
}

struct LivenessAnalysis;

impl fixed_point::TransferFunction<Flag> for LivenessAnalysis {
    fn boundary(&self, _: &il::ControlFlowGraph) -> AbstractState<Flag> {
        AbstractState::top()
    }

    fn instruction(
        &self,
        state: AbstractState<Flag>,
        _: &il::Block,
        instruction: &il::Instruction,
    ) -> Result<AbstractState<Flag>, Error> {
        Ok(transfer(state, instruction.operation()))
    }
}
