//! Chiron: an analysis engine for the Turtle teaching language.
//!
//! A Turtle program arrives as an [`ast::Program`] from the parser, is lowered
//! by [`cfg_builder`] into an [`il::ControlFlowGraph`], and then handed to any
//! of:
//!
//! * [`executor`], the concrete interpreter, which is also the oracle for
//!   traces and tests.
//! * [`analysis`], a worklist fixed point engine with its lattices, data-flow
//!   analyses and abstract interpretation.
//! * [`symbolic`], a path-sensitive symbolic executor which produces test
//!   cases through a constraint solver.
//! * [`optimizer`], a CFG to CFG rewrite whose output may re-enter the others.
//!
//! [`coverage`] exposes the data consumed by the fuzzer and fault localizer,
//! and [`session`] runs several of these in one invocation.

pub mod analysis;
pub mod ast;
pub mod cfg_builder;
pub mod coverage;
mod error;
pub mod executor;
pub mod graph;
pub mod il;
pub mod optimizer;
pub mod session;
pub mod symbolic;

#[cfg(test)]
mod tests;

pub use crate::error::*;

#[cfg(not(feature = "thread_safe"))]
use std::rc::Rc;
#[cfg(not(feature = "thread_safe"))]
pub type RC<T> = Rc<T>;

#[cfg(feature = "thread_safe")]
use std::sync::Arc;
#[cfg(feature = "thread_safe")]
pub type RC<T> = Arc<T>;
