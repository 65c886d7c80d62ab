//! Symbolic execution for Chiron.
//!
//! `explore` runs a `ControlFlowGraph` over symbols instead of values. Every
//! variable read before it is assigned is a parameter symbol, and every
//! `input()` site an input symbol. A path condition collects the branch
//! guards taken along a path and is checked by a `Solver` at every fork.
//!
//! Two solvers are provided:
//!
//! * `SmtLibSolver` drives an SMT-LIB 2 solver process, `z3 -in` by default.
//! * `EnumerativeSolver` searches a small box of values, and works without
//!   any external solver.
//!
//! `check_constraint_equivalence` asks a solver whether two path conditions,
//! such as those recorded on `TestCase`s, admit the same assignments.
//!
//! The symbolic semantics match the interpreter's for branches and division
//! by zero, which `validate_test_case` checks by replaying a `TestCase`.
//! Integers are unbounded in path conditions, and the turtle's position is
//! not tracked, so a test case whose values overflow or drive the turtle off
//! the canvas replays with a fault the explorer did not predict.

mod enumerative;
mod equivalence;
mod explorer;
mod smtlib;
mod solver;
mod state;

pub use self::enumerative::EnumerativeSolver;
pub use self::equivalence::{check_constraint_equivalence, ConstraintEquivalence};
pub use self::explorer::{
    explore, validate_test_case, ExploreOptions, ExploreResult, ExploreStats, Order, TestCase,
    Validation,
};
pub use self::smtlib::{to_smtlib, SmtLibSolver};
pub use self::solver::{Model, Solver, SolverResult, SolverSession, Symbol};
pub use self::state::ExecutionState;
