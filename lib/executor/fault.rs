use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of a runtime fault raised while executing a program.
#[derive(Clone, Debug, Deserialize, Eq, Error, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum FaultKind {
    #[error("read of undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("turtle left the canvas")]
    TurtleGuardViolation,
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
}

/// A fault raised by the instruction at (`block`, `instruction`).
///
/// Faults are values: an execution which faults still returns its partial
/// trace and bindings alongside the fault.
#[derive(Clone, Debug, Deserialize, Eq, Error, Hash, PartialEq, Serialize)]
#[error("{kind} at block 0x{block:X} instruction {instruction}")]
pub struct RuntimeFault {
    pub kind: FaultKind,
    pub block: usize,
    pub instruction: usize,
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, block: usize, instruction: usize) -> RuntimeFault {
        RuntimeFault {
            kind,
            block,
            instruction,
        }
    }
}
