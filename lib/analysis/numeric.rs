//! Numeric abstract interpretation.
//!
//! The analysis is generic over the numeric domain: `Interval` on its own, or
//! the reduced product `Numeric` of intervals and k-sets. Branch guards refine
//! the state along each edge, so the two sides of `if x > 0` see different
//! values of `x`.

use crate::analysis::{fixed_point, AbstractState, AbstractValue, Bound, Interval};
use crate::il;
use crate::Error;
use std::marker::PhantomData;

/// An abstract domain over integers.
pub trait NumericValue: AbstractValue {
    /// The abstraction of a single value.
    fn constant(value: i64) -> Self;

    /// The smallest interval containing every value.
    fn interval(&self) -> Interval;

    /// Keep only the values inside `interval`.
    fn restrict(&self, interval: &Interval) -> Self;

    /// Remove `value`, where the domain can express that.
    fn exclude(&self, value: i64) -> Self;

    fn add(&self, other: &Self) -> Self;
    fn sub(&self, other: &Self) -> Self;
    fn mul(&self, other: &Self) -> Self;
    /// Euclidean division. Division by zero contributes no value.
    fn div(&self, other: &Self) -> Self;
    /// Euclidean remainder. Division by zero contributes no value.
    fn rem(&self, other: &Self) -> Self;
    fn neg(&self) -> Self;
}

/// What a boolean expression may evaluate to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Truth {
    pub may_be_true: bool,
    pub may_be_false: bool,
}

impl Truth {
    const TRUE: Truth = Truth {
        may_be_true: true,
        may_be_false: false,
    };
    const FALSE: Truth = Truth {
        may_be_true: false,
        may_be_false: true,
    };
    const UNKNOWN: Truth = Truth {
        may_be_true: true,
        may_be_false: true,
    };
    const NONE: Truth = Truth {
        may_be_true: false,
        may_be_false: false,
    };

    fn from_bool(value: bool) -> Truth {
        if value {
            Truth::TRUE
        } else {
            Truth::FALSE
        }
    }

    fn not(self) -> Truth {
        Truth {
            may_be_true: self.may_be_false,
            may_be_false: self.may_be_true,
        }
    }
}

/// Run numeric abstract interpretation over `cfg` in domain `V`.
///
/// Variables unbound at the entry are parameters and may hold any value.
pub fn numeric<V: NumericValue>(
    cfg: &il::ControlFlowGraph,
    options: &fixed_point::FixedPointOptions,
) -> Result<fixed_point::FixedPoint<V>, Error> {
    let options = options
        .clone()
        .set_direction(fixed_point::Direction::Forward)
        .set_merge(fixed_point::Merge::Join);
    fixed_point::run(cfg, &NumericAnalysis::<V>::new(), &options)
}

/// The abstract value of an integer expression.
pub fn evaluate<V: NumericValue>(state: &AbstractState<V>, expression: &il::Expression) -> V {
    match expression {
        il::Expression::Constant(constant) => match constant.value_i64() {
            Some(value) => V::constant(value),
            None => V::bottom(),
        },
        il::Expression::Variable(name) => state.get(name).clone(),
        il::Expression::Input(_) => V::top(),
        il::Expression::Add(lhs, rhs) => evaluate(state, lhs).add(&evaluate(state, rhs)),
        il::Expression::Sub(lhs, rhs) => evaluate(state, lhs).sub(&evaluate(state, rhs)),
        il::Expression::Mul(lhs, rhs) => evaluate(state, lhs).mul(&evaluate(state, rhs)),
        il::Expression::Div(lhs, rhs) => evaluate(state, lhs).div(&evaluate(state, rhs)),
        il::Expression::Mod(lhs, rhs) => evaluate(state, lhs).rem(&evaluate(state, rhs)),
        il::Expression::Neg(e) => evaluate(state, e).neg(),
        // Boolean expressions are never stored.
        il::Expression::PenDown
        | il::Expression::Cmpeq(_, _)
        | il::Expression::Cmpneq(_, _)
        | il::Expression::Cmplt(_, _)
        | il::Expression::Cmple(_, _)
        | il::Expression::Cmpgt(_, _)
        | il::Expression::Cmpge(_, _)
        | il::Expression::And(_, _)
        | il::Expression::Or(_, _)
        | il::Expression::Not(_) => V::bottom(),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Comparison {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn of(expression: &il::Expression) -> Option<(Comparison, &il::Expression, &il::Expression)> {
        Some(match expression {
            il::Expression::Cmpeq(lhs, rhs) => (Comparison::Eq, lhs, rhs),
            il::Expression::Cmpneq(lhs, rhs) => (Comparison::Neq, lhs, rhs),
            il::Expression::Cmplt(lhs, rhs) => (Comparison::Lt, lhs, rhs),
            il::Expression::Cmple(lhs, rhs) => (Comparison::Le, lhs, rhs),
            il::Expression::Cmpgt(lhs, rhs) => (Comparison::Gt, lhs, rhs),
            il::Expression::Cmpge(lhs, rhs) => (Comparison::Ge, lhs, rhs),
            _ => return None,
        })
    }

    fn negate(self) -> Comparison {
        match self {
            Comparison::Eq => Comparison::Neq,
            Comparison::Neq => Comparison::Eq,
            Comparison::Lt => Comparison::Ge,
            Comparison::Le => Comparison::Gt,
            Comparison::Gt => Comparison::Le,
            Comparison::Ge => Comparison::Lt,
        }
    }

    /// The comparison with its operands swapped.
    fn mirror(self) -> Comparison {
        match self {
            Comparison::Eq | Comparison::Neq => self,
            Comparison::Lt => Comparison::Gt,
            Comparison::Le => Comparison::Ge,
            Comparison::Gt => Comparison::Lt,
            Comparison::Ge => Comparison::Le,
        }
    }

    fn truth(self, lhs: &Interval, rhs: &Interval) -> Truth {
        let (a, b, c, d) = match (lhs, rhs) {
            (Interval::Range(a, b), Interval::Range(c, d)) => (*a, *b, *c, *d),
            _ => return Truth::NONE,
        };
        let singleton = |x: Bound, y: Bound| x == y && x.finite().is_some();
        match self {
            Comparison::Eq => {
                if b < c || d < a {
                    Truth::FALSE
                } else if singleton(a, b) && a == c && c == d {
                    Truth::TRUE
                } else {
                    Truth::UNKNOWN
                }
            }
            Comparison::Neq => Comparison::Eq.truth(lhs, rhs).not(),
            Comparison::Lt => {
                if b < c {
                    Truth::TRUE
                } else if a >= d {
                    Truth::FALSE
                } else {
                    Truth::UNKNOWN
                }
            }
            Comparison::Le => {
                if b <= c {
                    Truth::TRUE
                } else if a > d {
                    Truth::FALSE
                } else {
                    Truth::UNKNOWN
                }
            }
            Comparison::Gt => Comparison::Lt.truth(rhs, lhs),
            Comparison::Ge => Comparison::Le.truth(rhs, lhs),
        }
    }
}

/// What a boolean expression may evaluate to in `state`.
pub fn truth<V: NumericValue>(state: &AbstractState<V>, expression: &il::Expression) -> Truth {
    if let Some((comparison, lhs, rhs)) = Comparison::of(expression) {
        let lhs = evaluate(state, lhs).interval();
        let rhs = evaluate(state, rhs).interval();
        return comparison.truth(&lhs, &rhs);
    }
    match expression {
        il::Expression::Constant(constant) => match constant.value_bool() {
            Some(value) => Truth::from_bool(value),
            None => Truth::NONE,
        },
        il::Expression::Not(e) => truth(state, e).not(),
        il::Expression::And(lhs, rhs) => {
            let lhs = truth(state, lhs);
            if !lhs.may_be_true {
                return lhs;
            }
            let rhs = truth(state, rhs);
            Truth {
                may_be_true: rhs.may_be_true,
                may_be_false: lhs.may_be_false || rhs.may_be_false,
            }
        }
        il::Expression::Or(lhs, rhs) => {
            let lhs = truth(state, lhs);
            if !lhs.may_be_false {
                return lhs;
            }
            let rhs = truth(state, rhs);
            Truth {
                may_be_true: lhs.may_be_true || rhs.may_be_true,
                may_be_false: rhs.may_be_false,
            }
        }
        _ => Truth::UNKNOWN,
    }
}

// Restrict `variable` so that `variable <comparison> other` may hold.
fn restrict_variable<V: NumericValue>(
    mut state: AbstractState<V>,
    variable: &str,
    comparison: Comparison,
    other: &Interval,
) -> AbstractState<V> {
    let value = state.get(variable).clone();
    let (lower, upper) = match other {
        Interval::Bottom => return AbstractState::bottom(),
        Interval::Range(lower, upper) => (*lower, *upper),
    };
    let refined = match comparison {
        Comparison::Eq => value.restrict(other),
        Comparison::Neq => match (lower.finite(), upper.finite()) {
            (Some(l), Some(u)) if l == u => value.exclude(l),
            _ => value,
        },
        Comparison::Lt => value.restrict(&Interval::new(Bound::NegInfinity, add_bound(upper, -1))),
        Comparison::Le => value.restrict(&Interval::new(Bound::NegInfinity, upper)),
        Comparison::Gt => value.restrict(&Interval::new(add_bound(lower, 1), Bound::PosInfinity)),
        Comparison::Ge => value.restrict(&Interval::new(lower, Bound::PosInfinity)),
    };
    if refined.is_bottom() {
        return AbstractState::bottom();
    }
    state.set(variable, refined);
    state
}

fn add_bound(bound: Bound, delta: i64) -> Bound {
    match bound {
        Bound::Finite(value) => match value.checked_add(delta) {
            Some(value) => Bound::Finite(value),
            None if delta > 0 => Bound::PosInfinity,
            None => Bound::NegInfinity,
        },
        infinite => infinite,
    }
}

/// Refine `state` with the knowledge that `guard` evaluated to `holds`.
///
/// The result is bottom when the guard cannot evaluate to `holds`.
pub fn refine<V: NumericValue>(
    state: AbstractState<V>,
    guard: &il::Expression,
    holds: bool,
) -> AbstractState<V> {
    if state.is_bottom() {
        return state;
    }
    let possible = truth(&state, guard);
    if (holds && !possible.may_be_true) || (!holds && !possible.may_be_false) {
        return AbstractState::bottom();
    }

    if let Some((comparison, lhs, rhs)) = Comparison::of(guard) {
        let comparison = if holds { comparison } else { comparison.negate() };
        let mut state = state;
        if let il::Expression::Variable(name) = lhs {
            let other = evaluate(&state, rhs).interval();
            state = restrict_variable(state, name, comparison, &other);
        }
        if let il::Expression::Variable(name) = rhs {
            let other = evaluate(&state, lhs).interval();
            state = restrict_variable(state, name, comparison.mirror(), &other);
        }
        return state;
    }

    match (guard, holds) {
        (il::Expression::Not(e), _) => refine(state, e, !holds),
        (il::Expression::And(lhs, rhs), true) | (il::Expression::Or(lhs, rhs), false) => {
            let state = refine(state, lhs, holds);
            refine(state, rhs, holds)
        }
        (il::Expression::And(lhs, rhs), false) | (il::Expression::Or(lhs, rhs), true) => {
            refine(state.clone(), lhs, holds).join(&refine(state, rhs, holds))
        }
        _ => state,
    }
}

struct NumericAnalysis<V> {
    value: PhantomData<V>,
}

impl<V> NumericAnalysis<V> {
    fn new() -> NumericAnalysis<V> {
        NumericAnalysis { value: PhantomData }
    }
}

impl<V: NumericValue> fixed_point::TransferFunction<V> for NumericAnalysis<V> {
    fn boundary(&self, _: &il::ControlFlowGraph) -> AbstractState<V> {
        AbstractState::top()
    }

    fn instruction(
        &self,
        mut state: AbstractState<V>,
        _: &il::Block,
        instruction: &il::Instruction,
    ) -> Result<AbstractState<V>, Error> {
        if state.is_bottom() {
            return Ok(state);
        }
        match instruction.operation() {
            il::Operation::Assign { dst, src } => {
                let value = evaluate(&state, src);
                // Every evaluation faults.
                if value.is_bottom() {
                    return Ok(AbstractState::bottom());
                }
                state.set(dst.as_str(), value);
            }
            il::Operation::Call { command } => {
                if command
                    .arguments()
                    .into_iter()
                    .any(|argument| evaluate(&state, argument).is_bottom())
                {
                    return Ok(AbstractState::bottom());
                }
            }
            il::Operation::Branch { .. } | il::Operation::Jump { .. } | il::Operation::Return => {}
        }
        Ok(state)
    }

    fn edge(&self, state: AbstractState<V>, edge: &il::Edge) -> Result<AbstractState<V>, Error> {
        Ok(match edge.condition() {
            Some(guard) => refine(state, guard, true),
            None => state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{KSet, Numeric};
    use crate::ast::{BinaryOp, Expr, Program, Statement};
    use crate::cfg_builder;

    fn assign(var: &str, expr: Expr) -> Statement {
        Statement::Assign {
            var: var.to_string(),
            expr,
        }
    }

    #[test]
    fn branch_refinement() {
        // x = input(); if x > 0 [ y = x ] else [ y = 0 - x ]
        let program = Program::new(vec![
            assign("x", Expr::Input),
            Statement::If {
                cond: Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::int(0)),
                then: vec![assign("y", Expr::var("x"))],
                else_: Some(vec![assign(
                    "y",
                    Expr::binary(BinaryOp::Sub, Expr::int(0), Expr::var("x")),
                )]),
            },
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let result = numeric::<Interval>(&cfg, &fixed_point::FixedPointOptions::new()).unwrap();
        let state = result.in_state(cfg.exit().unwrap()).unwrap();
        assert_eq!(state.get("y"), &Interval::at_least(0));
        assert_eq!(state.get("x"), &Interval::top());
    }

    #[test]
    fn bounded_loop_is_narrowed() {
        // i = 0; while i < 10 [ i = i + 1 ]
        let program = Program::new(vec![
            assign("i", Expr::int(0)),
            Statement::While {
                cond: Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::int(10)),
                body: vec![assign(
                    "i",
                    Expr::binary(BinaryOp::Add, Expr::var("i"), Expr::int(1)),
                )],
            },
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let result = numeric::<Interval>(&cfg, &fixed_point::FixedPointOptions::new()).unwrap();
        let header = *cfg.loop_headers().unwrap().iter().next().unwrap();
        assert_eq!(result.in_state(header).unwrap().get("i"), &Interval::finite(0, 10));
        let exit = cfg.exit().unwrap();
        assert_eq!(result.in_state(exit).unwrap().get("i"), &Interval::constant(10));

        // Widening alone reaches the unbounded interval.
        let options = fixed_point::FixedPointOptions::new().set_narrowing_passes(0);
        let result = numeric::<Interval>(&cfg, &options).unwrap();
        assert_eq!(result.in_state(header).unwrap().get("i"), &Interval::at_least(0));
    }

    #[test]
    fn product_tracks_small_sets() {
        // x = input(); if x == 3 [ y = 2 ] else [ y = 7 ]; z = y * 2
        let program = Program::new(vec![
            assign("x", Expr::Input),
            Statement::If {
                cond: Expr::binary(BinaryOp::Eq, Expr::var("x"), Expr::int(3)),
                then: vec![assign("y", Expr::int(2))],
                else_: Some(vec![assign("y", Expr::int(7))]),
            },
            assign("z", Expr::binary(BinaryOp::Mul, Expr::var("y"), Expr::int(2))),
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let result = numeric::<Numeric>(&cfg, &fixed_point::FixedPointOptions::new()).unwrap();
        let state = result.in_state(cfg.exit().unwrap()).unwrap();
        assert_eq!(state.get("z").kset(), &KSet::from_values(vec![4, 14]));
        assert_eq!(state.get("z").interval(), Interval::finite(4, 14));
    }

    #[test]
    fn infeasible_edge_is_bottom() {
        let mut state: AbstractState<Interval> = AbstractState::top();
        state.set("x", Interval::finite(0, 5));
        let guard = il::Expression::cmpgt(il::expr_var("x"), il::expr_const(5));
        assert!(refine(state.clone(), &guard, true).is_bottom());
        let refined = refine(state, &guard, false);
        assert_eq!(refined.get("x"), &Interval::finite(0, 5));
    }

    #[test]
    fn negated_conjunction_refines_each_side() {
        let state: AbstractState<Interval> = AbstractState::top();
        // not (x >= 0 and x <= 10)
        let guard = il::Expression::not(il::Expression::and(
            il::Expression::cmpge(il::expr_var("x"), il::expr_const(0)),
            il::Expression::cmple(il::expr_var("x"), il::expr_const(10)),
        ));
        let refined = refine(state.clone(), &guard, true);
        assert_eq!(refined.get("x"), &Interval::top());
        let refined = refine(state, &guard, false);
        assert_eq!(refined.get("x"), &Interval::finite(0, 10));
    }
}
