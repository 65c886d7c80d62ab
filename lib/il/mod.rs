//! Chiron Intermediate Language.
//!
//! # An Introduction
//!
//! Turtle programs are lowered into a small, block-structured IL over two
//! value sorts, integers and booleans.
//!
//! ## `Expression`
//!
//! Expressions are trees over the terminals `Variable`, `Constant`, `Input`
//! and `PenDown`.
//!
//! * Arithmetic: `Add`, `Sub`, `Mul`, `Div`, `Mod`, `Neg`.
//! * Comparison: `Cmpeq`, `Cmpneq`, `Cmplt`, `Cmple`, `Cmpgt`, `Cmpge`.
//! * Logic: `And`, `Or`, `Not`.
//!
//! Division and modulo are Euclidean: the remainder is never negative.
//!
//! ## `Operation`
//!
//! * `Assign`: Assigns an `Expression` to a variable.
//! * `Call`: Issues a turtle `Command`.
//! * `Branch`, `Jump`, `Return`: the terminators. Exactly one ends every
//! block.
//!
//! ## `Instruction` and `Block`
//!
//! An `Instruction` gives an `Operation` an index unique within its `Block`.
//! Instructions are created through the methods on `Block`.
//!
//! ## `Edge` and `ControlFlowGraph`
//!
//! A `ControlFlowGraph` is a directed graph with vertices of type `Block` and
//! edges of type `Edge`. Every edge records its `EdgeKind`, and edges leaving
//! a branch are guarded by the branch condition or its negation. Terminator
//! targets and edges always agree; `ControlFlowGraph::validate` checks this
//! along with the other structural invariants.

mod block;
mod constant;
mod control_flow_graph;
mod edge;
mod expression;
mod instruction;
mod operation;

pub use self::block::*;
pub use self::constant::*;
pub use self::control_flow_graph::*;
pub use self::edge::*;
pub use self::expression::*;
pub use self::instruction::*;
pub use self::operation::*;

/// A convenience function to create a new integer constant expression.
pub fn expr_const(value: i64) -> Expression {
    Expression::integer(value)
}

/// A convenience function to create a new variable expression.
pub fn expr_var<S>(name: S) -> Expression
where
    S: Into<String>,
{
    Expression::variable(name)
}
