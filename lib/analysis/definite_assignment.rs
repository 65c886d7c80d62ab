use crate::analysis::{fixed_point, AbstractState, Flag};
use crate::il;
use crate::Error;

/// Compute the variables assigned on every path to each block.
///
/// Nothing is assigned at the entry, so a variable read where it is not
/// definitely assigned is either a parameter or may be undefined.
pub fn definite_assignment(
    cfg: &il::ControlFlowGraph,
    options: &fixed_point::FixedPointOptions,
) -> Result<fixed_point::FixedPoint<Flag>, Error> {
    let options = options
        .clone()
        .set_direction(fixed_point::Direction::Forward)
        .set_merge(fixed_point::Merge::Meet);
    fixed_point::run(cfg, &DefiniteAssignmentAnalysis, &options)
}

struct DefiniteAssignmentAnalysis;

impl fixed_point::TransferFunction<Flag> for DefiniteAssignmentAnalysis {
    fn boundary(&self, _: &il::ControlFlowGraph) -> AbstractState<Flag> {
        AbstractState::bottom()
    }

    fn instruction(
        &self,
        mut state: AbstractState<Flag>,
        _: &il::Block,
        instruction: &il::Instruction,
    ) -> Result<AbstractState<Flag>, Error> {
        if let Some(written) = instruction.variable_written() {
            state.set(written, Flag(true));
        }
        Ok(state)
    }
}
