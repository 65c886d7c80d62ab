//! A `Constant` holds a single Turtle value.
//!
//! Turtle has two value sorts: 64-bit signed integers and booleans.

use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The sort of a value or an expression.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Sort {
    Integer,
    Boolean,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sort::Integer => write!(f, "int"),
            Sort::Boolean => write!(f, "bool"),
        }
    }
}

/// A constant value for the IL.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Constant {
    Integer(i64),
    Boolean(bool),
}

impl Constant {
    pub fn integer(value: i64) -> Constant {
        Constant::Integer(value)
    }

    pub fn boolean(value: bool) -> Constant {
        Constant::Boolean(value)
    }

    /// Get the integer value of this `Constant`, if it is an integer.
    pub fn value_i64(&self) -> Option<i64> {
        match self {
            Constant::Integer(value) => Some(*value),
            Constant::Boolean(_) => None,
        }
    }

    /// Get the boolean value of this `Constant`, if it is a boolean.
    pub fn value_bool(&self) -> Option<bool> {
        match self {
            Constant::Boolean(value) => Some(*value),
            Constant::Integer(_) => None,
        }
    }

    pub fn sort(&self) -> Sort {
        match self {
            Constant::Integer(_) => Sort::Integer,
            Constant::Boolean(_) => Sort::Boolean,
        }
    }

    pub fn is_true(&self) -> bool {
        *self == Constant::Boolean(true)
    }

    pub fn is_false(&self) -> bool {
        *self == Constant::Boolean(false)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constant::Integer(value) => write!(f, "{}", value),
            Constant::Boolean(value) => write!(f, "{}", value),
        }
    }
}

impl From<Constant> for Expression {
    fn from(constant: Constant) -> Expression {
        Expression::constant(constant)
    }
}
