use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An `Instruction` gives an `Operation` its position within a `Block`.
///
/// Instructions are created through the methods on `Block` and are never
/// changed afterwards; the index is unique within the owning block.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Instruction {
    operation: Operation,
    index: usize,
}

impl Instruction {
    pub(crate) fn new(index: usize, operation: Operation) -> Instruction {
        Instruction { operation, index }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn clone_new_index(&self, index: usize) -> Instruction {
        Instruction {
            operation: self.operation.clone(),
            index,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.operation.is_terminator()
    }

    pub fn variable_written(&self) -> Option<&str> {
        self.operation.variable_written()
    }

    pub fn variables_read(&self) -> Vec<&str> {
        self.operation.variables_read()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X} {}", self.index, self.operation)
    }
}
