//! Concrete execution of a `ControlFlowGraph`.
//!
//! The interpreter is the oracle for every other component: test cases from
//! symbolic execution are replayed through it, the optimizer is checked
//! against it, and the coverage data handed to the fuzzer and fault localizer
//! comes from its traces.

use crate::il;
use crate::Error;

mod driver;
pub mod eval;
mod fault;
mod state;

pub use self::driver::*;
pub use self::fault::*;
pub use self::state::*;

/// Check that `head` may continue at `target`, returning `target`.
pub(crate) fn successor_block(
    cfg: &il::ControlFlowGraph,
    head: usize,
    target: usize,
) -> Result<usize, Error> {
    if cfg.graph().has_edge(head, target) {
        Ok(target)
    } else {
        Err(Error::ControlFlowGraphSuccessorNotFound(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, Program, Statement};
    use crate::cfg_builder;
    use std::collections::BTreeMap;

    fn bindings(values: &[(&str, i64)]) -> BTreeMap<String, i64> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn countdown() -> il::ControlFlowGraph {
        // while n > 0 [ n = n - 1; s = s + n ]
        let program = Program::new(vec![
            Statement::Assign {
                var: "s".to_string(),
                expr: Expr::int(0),
            },
            Statement::While {
                cond: Expr::binary(BinaryOp::Gt, Expr::var("n"), Expr::int(0)),
                body: vec![
                    Statement::Assign {
                        var: "n".to_string(),
                        expr: Expr::binary(BinaryOp::Sub, Expr::var("n"), Expr::int(1)),
                    },
                    Statement::Assign {
                        var: "s".to_string(),
                        expr: Expr::binary(BinaryOp::Add, Expr::var("s"), Expr::var("n")),
                    },
                ],
            },
        ]);
        cfg_builder::build(&program).unwrap()
    }

    #[test]
    fn execute_loop() {
        let cfg = countdown();
        let execution = execute(
            &cfg,
            &bindings(&[("n", 4)]),
            &BTreeMap::new(),
            &InterpreterOptions::default(),
        )
        .unwrap();

        assert!(execution.fault.is_none());
        assert_eq!(execution.bindings["n"], 0);
        assert_eq!(execution.bindings["s"], 3 + 2 + 1);
        assert_eq!(execution.trace.first(), cfg.entry().as_ref());
        assert_eq!(execution.trace.last(), cfg.exit().as_ref());
    }

    #[test]
    fn undefined_variable_is_a_fault_value() {
        let cfg = countdown();
        let execution = execute(
            &cfg,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &InterpreterOptions::default(),
        )
        .unwrap();

        let fault = execution.fault.unwrap();
        assert_eq!(fault.kind, FaultKind::UndefinedVariable("n".to_string()));
        assert_eq!(execution.bindings["s"], 0);
    }

    #[test]
    fn step_limit_stops_runaway_loops() {
        let cfg = countdown();
        let options = InterpreterOptions::new().set_step_limit(50);
        let execution = execute(&cfg, &bindings(&[("n", 1_000_000)]), &BTreeMap::new(), &options).unwrap();

        assert_eq!(execution.fault.unwrap().kind, FaultKind::StepLimit(50));
        assert_eq!(execution.steps, 51);
    }
}
