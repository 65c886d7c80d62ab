//! Constant propagation over the flat constant lattice.

use crate::analysis::{fixed_point, AbstractState, AbstractValue, FlatConstant};
use crate::executor::eval;
use crate::il;
use crate::Error;

/// Compute the constant variables at the start and end of every block.
pub fn constant_propagation(
    cfg: &il::ControlFlowGraph,
    options: &fixed_point::FixedPointOptions,
) -> Result<fixed_point::FixedPoint<FlatConstant>, Error> {
    let options = options
        .clone()
        .set_direction(fixed_point::Direction::Forward)
        .set_merge(fixed_point::Merge::Join);
    fixed_point::run(cfg, &ConstantPropagation, &options)
}

/// Replace every constant variable in `expression` and fold the result.
pub fn simplify(state: &AbstractState<FlatConstant>, expression: &il::Expression) -> il::Expression {
    let substituted = expression.replace_variables(|name| {
        state.get(name).value().map(il::Expression::integer)
    });
    eval::fold(&substituted)
}

/// The abstract value of an integer `expression` in `state`.
pub fn evaluate(state: &AbstractState<FlatConstant>, expression: &il::Expression) -> FlatConstant {
    if expression
        .variables()
        .into_iter()
        .any(|variable| state.get(variable).is_bottom())
    {
        return FlatConstant::Bottom;
    }
    let simplified = simplify(state, expression);
    if let Some(value) = simplified.constant_value().and_then(|c| c.value_i64()) {
        return FlatConstant::Constant(value);
    }
    // A closed expression left unfolded always faults.
    if simplified.variables().is_empty() && simplified.inputs().is_empty() && !simplified.reads_pen() {
        return FlatConstant::Bottom;
    }
    FlatConstant::Top
}

/// Apply constant propagation across one operation.
///
/// An operation which always faults leaves nothing reachable behind it.
pub fn transfer(
    mut state: AbstractState<FlatConstant>,
    operation: &il::Operation,
) -> AbstractState<FlatConstant> {
    if state.is_bottom() {
        return state;
    }
    match operation {
        il::Operation::Assign { dst, src } => {
            let value = evaluate(&state, src);
            if value.is_bottom() {
                return AbstractState::bottom();
            }
            state.set(dst.as_str(), value);
        }
        il::Operation::Call { command } => {
            if command
                .arguments()
                .into_iter()
                .any(|argument| evaluate(&state, argument).is_bottom())
            {
                return AbstractState::bottom();
            }
        }
        il::Operation::Branch { .. } | il::Operation::Jump { .. } | il::Operation::Return => {}
    }
    state
}

/// True if `guard` is known to be false in `state`.
pub fn infeasible(state: &AbstractState<FlatConstant>, guard: &il::Expression) -> bool {
    simplify(state, guard) == il::Expression::boolean(false)
}

struct ConstantPropagation;

impl fixed_point::TransferFunction<FlatConstant> for ConstantPropagation {
    fn boundary(&self, _: &il::ControlFlowGraph) -> AbstractState<FlatConstant> {
        AbstractState::top()
    }

    fn instruction(
        &self,
        state: AbstractState<FlatConstant>,
        _: &il::Block,
        instruction: &il::Instruction,
    ) -> Result<AbstractState<FlatConstant>, Error> {
        Ok(transfer(state, instruction.operation()))
    }

    fn edge(
        &self,
        state: AbstractState<FlatConstant>,
        edge: &il::Edge,
    ) -> Result<AbstractState<FlatConstant>, Error> {
        match edge.condition() {
            Some(guard) if infeasible(&state, guard) => Ok(AbstractState::bottom()),
            _ => Ok(state),
        }
    }
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

    #[test]
    fn constants_flow_through_branches() {
        // a = 2; b = a * 3; if b > 5 [ c = 1 ] else [ c = 2 ]; d = input()
        let program = Program::new(vec![
            assign("a", Expr::int(2)),
            assign("b", Expr::binary(BinaryOp::Mul, Expr::var("a"), Expr::int(3))),
            Statement::If {
                cond: Expr::binary(BinaryOp::Gt, Expr::var("b"), Expr::int(5)),
                then: vec![assign("c", Expr::int(1))],
                else_: Some(vec![assign("c", Expr::int(2))]),
            },
            assign("d", Expr::Input),
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let result =
            constant_propagation(&cfg, &fixed_point::FixedPointOptions::new()).unwrap();

        let state = result.in_state(cfg.exit().unwrap()).unwrap();
        assert_eq!(state.get("a"), &FlatConstant::Constant(2));
        assert_eq!(state.get("b"), &FlatConstant::Constant(6));
        // The else branch is never taken.
        assert_eq!(state.get("c"), &FlatConstant::Constant(1));
        assert_eq!(state.get("d"), &FlatConstant::Top);
    }

    #[test]
    fn faulting_assignment_is_unreachable() {
        let mut state = AbstractState::top();
        state.set("x", FlatConstant::Constant(0));
        let operation = il::Operation::assign(
            "y",
            il::Expression::div(il::expr_const(1), il::expr_var("x")),
        );
        assert!(transfer(state, &operation).is_bottom());
    }
}
