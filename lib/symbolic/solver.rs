//! A layer of abstraction over constraint solvers.

use crate::executor::eval::Environment;
use crate::il;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A free symbol of a path condition.
///
/// `il::Expression::Variable` denotes a program parameter, a variable read
/// before the program assigns it, and `il::Expression::Input` a program
/// input.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Symbol {
    Parameter(String),
    Input(String),
}

impl Symbol {
    /// Every symbol appearing in `expression`.
    pub fn collect(expression: &il::Expression) -> BTreeSet<Symbol> {
        let parameters = expression
            .variables()
            .into_iter()
            .map(|name| Symbol::Parameter(name.to_string()));
        let inputs = expression
            .inputs()
            .into_iter()
            .map(|name| Symbol::Input(name.to_string()));
        parameters.chain(inputs).collect()
    }

    pub fn name(&self) -> &str {
        match self {
            Symbol::Parameter(name) | Symbol::Input(name) => name,
        }
    }

    /// The expression standing for this symbol.
    pub fn expression(&self) -> il::Expression {
        match self {
            Symbol::Parameter(name) => il::Expression::variable(name.as_str()),
            Symbol::Input(name) => il::Expression::input(name.as_str()),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Symbol::Parameter(name) => write!(f, "{}", name),
            Symbol::Input(name) => write!(f, "input({})", name),
        }
    }
}

/// A satisfying assignment. Symbols a solver leaves out are unconstrained.
pub type Model = BTreeMap<Symbol, i64>;

/// Evaluates expressions over the symbols of a `Model`.
pub(crate) struct ModelEnvironment<'m>(pub &'m Model);

impl<'m> Environment for ModelEnvironment<'m> {
    fn variable(&self, name: &str) -> Option<i64> {
        self.0.get(&Symbol::Parameter(name.to_string())).copied()
    }

    fn input(&self, name: &str) -> Option<i64> {
        self.0.get(&Symbol::Input(name.to_string())).copied()
    }

    fn pen_down(&self) -> Option<bool> {
        None
    }
}

/// The answer to one satisfiability query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SolverResult {
    /// Satisfiable. The model is empty unless one was asked for.
    Sat(Model),
    Unsat,
    /// The solver gave up, timed out, or could not be asked.
    Unknown(String),
}

impl SolverResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, SolverResult::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, SolverResult::Unsat)
    }
}

/// A solver backend, which opens sessions.
pub trait Solver {
    fn name(&self) -> &str;

    /// Open a session. Every `explore` call opens its own and drops it on
    /// return.
    fn session(&self) -> Result<Box<dyn SolverSession>, Error>;
}

/// A live solver context.
pub trait SolverSession {
    /// Check the conjunction of boolean `constraints`, returning a model over
    /// their symbols when `model` is set and they are satisfiable.
    ///
    /// Queries are independent: nothing asserted by one is visible to the
    /// next.
    fn check(&mut self, constraints: &[il::Expression], model: bool) -> Result<SolverResult, Error>;
}
