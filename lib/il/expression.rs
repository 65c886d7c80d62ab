use crate::il::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An IL Expression.
/// Expressions form the building blocks of instructions, and always evaluate
/// to an integer or a boolean.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Expression {
    Variable(String),
    Constant(Constant),
    /// A value supplied from outside the program, named by its input site.
    Input(String),
    /// The turtle's pen state, true when the pen is down.
    PenDown,

    Add(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
    Mul(Box<Expression>, Box<Expression>),
    Div(Box<Expression>, Box<Expression>),
    Mod(Box<Expression>, Box<Expression>),
    Neg(Box<Expression>),

    Cmpeq(Box<Expression>, Box<Expression>),
    Cmpneq(Box<Expression>, Box<Expression>),
    Cmplt(Box<Expression>, Box<Expression>),
    Cmple(Box<Expression>, Box<Expression>),
    Cmpgt(Box<Expression>, Box<Expression>),
    Cmpge(Box<Expression>, Box<Expression>),

    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    /// Return the sort of this expression.
    ///
    /// Variables and inputs always hold integers; booleans cannot be stored.
    pub fn sort(&self) -> Sort {
        match self {
            Expression::Constant(constant) => constant.sort(),
            Expression::Variable(_)
            | Expression::Input(_)
            | Expression::Add(_, _)
            | Expression::Sub(_, _)
            | Expression::Mul(_, _)
            | Expression::Div(_, _)
            | Expression::Mod(_, _)
            | Expression::Neg(_) => Sort::Integer,
            Expression::PenDown
            | Expression::Cmpeq(_, _)
            | Expression::Cmpneq(_, _)
            | Expression::Cmplt(_, _)
            | Expression::Cmple(_, _)
            | Expression::Cmpgt(_, _)
            | Expression::Cmpge(_, _)
            | Expression::And(_, _)
            | Expression::Or(_, _)
            | Expression::Not(_) => Sort::Boolean,
        }
    }

    /// Return the direct operands of this expression.
    pub fn operands(&self) -> Vec<&Expression> {
        match self {
            Expression::Variable(_)
            | Expression::Constant(_)
            | Expression::Input(_)
            | Expression::PenDown => Vec::new(),
            Expression::Neg(e) | Expression::Not(e) => vec![e.as_ref()],
            Expression::Add(lhs, rhs)
            | Expression::Sub(lhs, rhs)
            | Expression::Mul(lhs, rhs)
            | Expression::Div(lhs, rhs)
            | Expression::Mod(lhs, rhs)
            | Expression::Cmpeq(lhs, rhs)
            | Expression::Cmpneq(lhs, rhs)
            | Expression::Cmplt(lhs, rhs)
            | Expression::Cmple(lhs, rhs)
            | Expression::Cmpgt(lhs, rhs)
            | Expression::Cmpge(lhs, rhs)
            | Expression::And(lhs, rhs)
            | Expression::Or(lhs, rhs) => vec![lhs.as_ref(), rhs.as_ref()],
        }
    }

    /// Returns the names of all variables read by the expression.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut variables = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(expression) = stack.pop() {
            if let Expression::Variable(name) = expression {
                variables.insert(name.as_str());
            }
            stack.extend(expression.operands());
        }
        variables
    }

    /// Returns the names of all inputs read by the expression.
    pub fn inputs(&self) -> BTreeSet<&str> {
        let mut inputs = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(expression) = stack.pop() {
            if let Expression::Input(name) = expression {
                inputs.insert(name.as_str());
            }
            stack.extend(expression.operands());
        }
        inputs
    }

    /// Returns true if this expression reads the pen state.
    pub fn reads_pen(&self) -> bool {
        let mut stack = vec![self];
        while let Some(expression) = stack.pop() {
            if let Expression::PenDown = expression {
                return true;
            }
            stack.extend(expression.operands());
        }
        false
    }

    /// Returns true if evaluating this expression could raise a runtime fault,
    /// assuming every variable it reads holds a value.
    ///
    /// Division or modulo by anything but a non-zero constant may fault, as
    /// may arithmetic over non-constant operands, which can overflow. Reading
    /// an input faults when the input is not supplied.
    pub fn may_fault(&self) -> bool {
        let mut stack = vec![self];
        while let Some(expression) = stack.pop() {
            match expression {
                Expression::Input(_) => return true,
                Expression::Div(_, rhs) | Expression::Mod(_, rhs) => match rhs.as_ref() {
                    Expression::Constant(Constant::Integer(0)) => return true,
                    Expression::Constant(Constant::Integer(-1)) => return true,
                    Expression::Constant(_) => {}
                    _ => return true,
                },
                Expression::Add(lhs, rhs) | Expression::Sub(lhs, rhs) | Expression::Mul(lhs, rhs) => {
                    if !lhs.is_constant() || !rhs.is_constant() {
                        return true;
                    }
                }
                Expression::Neg(e) => {
                    if !e.is_constant() {
                        return true;
                    }
                }
                _ => {}
            }
            stack.extend(expression.operands());
        }
        false
    }

    /// Rebuild this expression, replacing every subexpression for which
    /// `f` returns `Some`.
    ///
    /// Replacement happens top down, and a replaced subexpression is not
    /// visited again.
    pub fn substitute<F>(&self, f: &F) -> Expression
    where
        F: Fn(&Expression) -> Option<Expression>,
    {
        if let Some(replacement) = f(self) {
            return replacement;
        }

        let b = |e: &Expression| Box::new(e.substitute(f));
        match self {
            Expression::Variable(_)
            | Expression::Constant(_)
            | Expression::Input(_)
            | Expression::PenDown => self.clone(),
            Expression::Add(lhs, rhs) => Expression::Add(b(lhs), b(rhs)),
            Expression::Sub(lhs, rhs) => Expression::Sub(b(lhs), b(rhs)),
            Expression::Mul(lhs, rhs) => Expression::Mul(b(lhs), b(rhs)),
            Expression::Div(lhs, rhs) => Expression::Div(b(lhs), b(rhs)),
            Expression::Mod(lhs, rhs) => Expression::Mod(b(lhs), b(rhs)),
            Expression::Neg(e) => Expression::Neg(b(e)),
            Expression::Cmpeq(lhs, rhs) => Expression::Cmpeq(b(lhs), b(rhs)),
            Expression::Cmpneq(lhs, rhs) => Expression::Cmpneq(b(lhs), b(rhs)),
            Expression::Cmplt(lhs, rhs) => Expression::Cmplt(b(lhs), b(rhs)),
            Expression::Cmple(lhs, rhs) => Expression::Cmple(b(lhs), b(rhs)),
            Expression::Cmpgt(lhs, rhs) => Expression::Cmpgt(b(lhs), b(rhs)),
            Expression::Cmpge(lhs, rhs) => Expression::Cmpge(b(lhs), b(rhs)),
            Expression::And(lhs, rhs) => Expression::And(b(lhs), b(rhs)),
            Expression::Or(lhs, rhs) => Expression::Or(b(lhs), b(rhs)),
            Expression::Not(e) => Expression::Not(b(e)),
        }
    }

    /// Replace every variable in this expression with the expression bound
    /// to it, leaving unbound variables in place.
    pub fn replace_variables<F>(&self, lookup: F) -> Expression
    where
        F: Fn(&str) -> Option<Expression>,
    {
        self.substitute(&|e| match e {
            Expression::Variable(name) => lookup(name),
            _ => None,
        })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expression::Constant(_))
    }

    pub fn constant_value(&self) -> Option<Constant> {
        match self {
            Expression::Constant(constant) => Some(*constant),
            _ => None,
        }
    }

    /// Create a new `Expression` from a variable name.
    pub fn variable<S: Into<String>>(name: S) -> Expression {
        Expression::Variable(name.into())
    }

    /// Create a new `Expression` from a `Constant`.
    pub fn constant(constant: Constant) -> Expression {
        Expression::Constant(constant)
    }

    pub fn integer(value: i64) -> Expression {
        Expression::Constant(Constant::Integer(value))
    }

    pub fn boolean(value: bool) -> Expression {
        Expression::Constant(Constant::Boolean(value))
    }

    pub fn input<S: Into<String>>(name: S) -> Expression {
        Expression::Input(name.into())
    }

    pub fn pen_down() -> Expression {
        Expression::PenDown
    }

    pub fn add(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Add(Box::new(lhs), Box::new(rhs))
    }

    pub fn sub(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Sub(Box::new(lhs), Box::new(rhs))
    }

    pub fn mul(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Mul(Box::new(lhs), Box::new(rhs))
    }

    pub fn div(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Div(Box::new(lhs), Box::new(rhs))
    }

    pub fn modulo(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Mod(Box::new(lhs), Box::new(rhs))
    }

    pub fn neg(e: Expression) -> Expression {
        Expression::Neg(Box::new(e))
    }

    pub fn cmpeq(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Cmpeq(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmpneq(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Cmpneq(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmplt(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Cmplt(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmple(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Cmple(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmpgt(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Cmpgt(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmpge(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Cmpge(Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Expression, rhs: Expression) -> Expression {
        Expression::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expression, rhs: Expression) -> Expression {
        Expression::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(e: Expression) -> Expression {
        Expression::Not(Box::new(e))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::Variable(name) => write!(f, "{}", name),
            Expression::Constant(constant) => write!(f, "{}", constant),
            Expression::Input(name) => write!(f, "input({})", name),
            Expression::PenDown => write!(f, "pendown?"),
            Expression::Add(lhs, rhs) => write!(f, "({} + {})", lhs, rhs),
            Expression::Sub(lhs, rhs) => write!(f, "({} - {})", lhs, rhs),
            Expression::Mul(lhs, rhs) => write!(f, "({} * {})", lhs, rhs),
            Expression::Div(lhs, rhs) => write!(f, "({} / {})", lhs, rhs),
            Expression::Mod(lhs, rhs) => write!(f, "({} % {})", lhs, rhs),
            Expression::Neg(e) => write!(f, "-{}", e),
            Expression::Cmpeq(lhs, rhs) => write!(f, "({} == {})", lhs, rhs),
            Expression::Cmpneq(lhs, rhs) => write!(f, "({} != {})", lhs, rhs),
            Expression::Cmplt(lhs, rhs) => write!(f, "({} < {})", lhs, rhs),
            Expression::Cmple(lhs, rhs) => write!(f, "({} <= {})", lhs, rhs),
            Expression::Cmpgt(lhs, rhs) => write!(f, "({} > {})", lhs, rhs),
            Expression::Cmpge(lhs, rhs) => write!(f, "({} >= {})", lhs, rhs),
            Expression::And(lhs, rhs) => write!(f, "({} and {})", lhs, rhs),
            Expression::Or(lhs, rhs) => write!(f, "({} or {})", lhs, rhs),
            Expression::Not(e) => write!(f, "not {}", e),
        }
    }
}
