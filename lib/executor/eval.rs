//! Concrete evaluation of IL expressions.
//!
//! Integers are 64-bit and checked: overflow is a fault rather than a wrap.
//! Division and modulo are Euclidean, which agrees with SMT-LIB `div` and
//! `mod`. `and` and `or` short circuit.

use crate::executor::FaultKind;
use crate::il::{Constant, Expression};

/// The values an expression may read.
pub trait Environment {
    fn variable(&self, name: &str) -> Option<i64>;
    fn input(&self, name: &str) -> Option<i64>;
    fn pen_down(&self) -> Option<bool>;
}

/// An environment with nothing bound, for evaluating closed expressions.
pub struct EmptyEnvironment;

impl Environment for EmptyEnvironment {
    fn variable(&self, _: &str) -> Option<i64> {
        None
    }
    fn input(&self, _: &str) -> Option<i64> {
        None
    }
    fn pen_down(&self) -> Option<bool> {
        None
    }
}

fn integer(constant: Constant) -> Result<i64, FaultKind> {
    constant
        .value_i64()
        .ok_or_else(|| FaultKind::UnsupportedOperation(format!("{} used as an integer", constant)))
}

fn boolean(constant: Constant) -> Result<bool, FaultKind> {
    constant
        .value_bool()
        .ok_or_else(|| FaultKind::UnsupportedOperation(format!("{} used as a boolean", constant)))
}

fn eval_integer<E: Environment>(expr: &Expression, env: &E) -> Result<i64, FaultKind> {
    integer(eval(expr, env)?)
}

fn eval_boolean<E: Environment>(expr: &Expression, env: &E) -> Result<bool, FaultKind> {
    boolean(eval(expr, env)?)
}

fn checked(value: Option<i64>) -> Result<Constant, FaultKind> {
    value
        .map(Constant::Integer)
        .ok_or(FaultKind::ArithmeticOverflow)
}

/// Euclidean division, faulting on a zero divisor and on overflow.
pub fn div(lhs: i64, rhs: i64) -> Result<i64, FaultKind> {
    if rhs == 0 {
        return Err(FaultKind::DivisionByZero);
    }
    lhs.checked_div_euclid(rhs).ok_or(FaultKind::ArithmeticOverflow)
}

/// Euclidean remainder, never negative.
pub fn rem(lhs: i64, rhs: i64) -> Result<i64, FaultKind> {
    if rhs == 0 {
        return Err(FaultKind::DivisionByZero);
    }
    lhs.checked_rem_euclid(rhs).ok_or(FaultKind::ArithmeticOverflow)
}

/// Evaluate an expression in an environment.
pub fn eval<E: Environment>(expr: &Expression, env: &E) -> Result<Constant, FaultKind> {
    Ok(match expr {
        Expression::Constant(constant) => *constant,
        Expression::Variable(name) => Constant::Integer(
            env.variable(name)
                .ok_or_else(|| FaultKind::UndefinedVariable(name.clone()))?,
        ),
        Expression::Input(name) => Constant::Integer(
            env.input(name)
                .ok_or_else(|| FaultKind::UndefinedVariable(format!("input({})", name)))?,
        ),
        Expression::PenDown => Constant::Boolean(
            env.pen_down()
                .ok_or_else(|| FaultKind::UndefinedVariable("pendown?".to_string()))?,
        ),

        Expression::Add(lhs, rhs) => {
            checked(eval_integer(lhs, env)?.checked_add(eval_integer(rhs, env)?))?
        }
        Expression::Sub(lhs, rhs) => {
            checked(eval_integer(lhs, env)?.checked_sub(eval_integer(rhs, env)?))?
        }
        Expression::Mul(lhs, rhs) => {
            checked(eval_integer(lhs, env)?.checked_mul(eval_integer(rhs, env)?))?
        }
        Expression::Div(lhs, rhs) => {
            let lhs = eval_integer(lhs, env)?;
            Constant::Integer(div(lhs, eval_integer(rhs, env)?)?)
        }
        Expression::Mod(lhs, rhs) => {
            let lhs = eval_integer(lhs, env)?;
            Constant::Integer(rem(lhs, eval_integer(rhs, env)?)?)
        }
        Expression::Neg(e) => checked(eval_integer(e, env)?.checked_neg())?,

        Expression::Cmpeq(lhs, rhs) => Constant::Boolean(eval(lhs, env)? == eval(rhs, env)?),
        Expression::Cmpneq(lhs, rhs) => Constant::Boolean(eval(lhs, env)? != eval(rhs, env)?),
        Expression::Cmplt(lhs, rhs) => {
            Constant::Boolean(eval_integer(lhs, env)? < eval_integer(rhs, env)?)
        }
        Expression::Cmple(lhs, rhs) => {
            Constant::Boolean(eval_integer(lhs, env)? <= eval_integer(rhs, env)?)
        }
        Expression::Cmpgt(lhs, rhs) => {
            Constant::Boolean(eval_integer(lhs, env)? > eval_integer(rhs, env)?)
        }
        Expression::Cmpge(lhs, rhs) => {
            Constant::Boolean(eval_integer(lhs, env)? >= eval_integer(rhs, env)?)
        }

        Expression::And(lhs, rhs) => {
            Constant::Boolean(eval_boolean(lhs, env)? && eval_boolean(rhs, env)?)
        }
        Expression::Or(lhs, rhs) => {
            Constant::Boolean(eval_boolean(lhs, env)? || eval_boolean(rhs, env)?)
        }
        Expression::Not(e) => Constant::Boolean(!eval_boolean(e, env)?),
    })
}

/// Fold every constant subexpression of `expr`.
///
/// A subexpression whose evaluation would fault is left in place, so
/// folding never changes whether evaluation faults.
pub fn fold(expr: &Expression) -> Expression {
    let folded = match expr {
        Expression::Constant(_)
        | Expression::Variable(_)
        | Expression::Input(_)
        | Expression::PenDown => return expr.clone(),

        // Short circuits decide on a constant left operand alone.
        Expression::And(lhs, rhs) => match fold(lhs) {
            Expression::Constant(Constant::Boolean(false)) => return Expression::boolean(false),
            Expression::Constant(Constant::Boolean(true)) => return fold(rhs),
            lhs => Expression::and(lhs, fold(rhs)),
        },
        Expression::Or(lhs, rhs) => match fold(lhs) {
            Expression::Constant(Constant::Boolean(true)) => return Expression::boolean(true),
            Expression::Constant(Constant::Boolean(false)) => return fold(rhs),
            lhs => Expression::or(lhs, fold(rhs)),
        },

        Expression::Add(lhs, rhs) => Expression::add(fold(lhs), fold(rhs)),
        Expression::Sub(lhs, rhs) => Expression::sub(fold(lhs), fold(rhs)),
        Expression::Mul(lhs, rhs) => Expression::mul(fold(lhs), fold(rhs)),
        Expression::Div(lhs, rhs) => Expression::div(fold(lhs), fold(rhs)),
        Expression::Mod(lhs, rhs) => Expression::modulo(fold(lhs), fold(rhs)),
        Expression::Neg(e) => Expression::neg(fold(e)),
        Expression::Cmpeq(lhs, rhs) => Expression::cmpeq(fold(lhs), fold(rhs)),
        Expression::Cmpneq(lhs, rhs) => Expression::cmpneq(fold(lhs), fold(rhs)),
        Expression::Cmplt(lhs, rhs) => Expression::cmplt(fold(lhs), fold(rhs)),
        Expression::Cmple(lhs, rhs) => Expression::cmple(fold(lhs), fold(rhs)),
        Expression::Cmpgt(lhs, rhs) => Expression::cmpgt(fold(lhs), fold(rhs)),
        Expression::Cmpge(lhs, rhs) => Expression::cmpge(fold(lhs), fold(rhs)),
        Expression::Not(e) => Expression::not(fold(e)),
    };

    if folded.operands().iter().all(|operand| operand.is_constant()) {
        if let Ok(constant) = eval(&folded, &EmptyEnvironment) {
            return Expression::constant(constant);
        }
    }
    folded
}
