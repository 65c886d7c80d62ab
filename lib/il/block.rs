//! A `Block` is a basic block: a sequence of `Instruction` ending in one
//! terminator.

use crate::il::*;
use crate::{graph, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A basic block.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, Default)]
pub struct Block {
    /// The index of the block.
    index: usize,
    /// An internal counter for the next block-unique instruction.
    next_instruction_index: usize,
    /// The instructions for this block.
    instructions: Vec<Instruction>,
}

impl Block {
    pub(crate) fn new(index: usize) -> Block {
        Block {
            index,
            next_instruction_index: 0,
            instructions: Vec::new(),
        }
    }

    fn new_instruction_index(&mut self) -> usize {
        let instruction_index = self.next_instruction_index;
        self.next_instruction_index = instruction_index + 1;
        instruction_index
    }

    fn push(&mut self, operation: Operation) {
        let index = self.new_instruction_index();
        self.instructions.push(Instruction::new(index, operation));
    }

    /// Appends the contents of another block to this block, replacing this
    /// block's terminator.
    pub(crate) fn append(&mut self, other: &Block) {
        if self.terminator().is_some() {
            self.instructions.pop();
        }
        for instruction in other.instructions() {
            let instruction = instruction.clone_new_index(self.new_instruction_index());
            self.instructions.push(instruction);
        }
    }

    /// Returns the index of this block
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns this block's instructions
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the number of instructions in this block
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns an instruction by index
    pub fn instruction(&self, index: usize) -> Result<&Instruction, Error> {
        self.instructions
            .iter()
            .find(|instruction| instruction.index() == index)
            .ok_or(Error::InstructionNotFound(self.index, index))
    }

    /// Returns the terminating operation of this block, if the block has one.
    pub fn terminator(&self) -> Option<&Operation> {
        self.instructions
            .last()
            .map(|instruction| instruction.operation())
            .filter(|operation| operation.is_terminator())
    }

    /// Deletes an instruction by its index
    pub(crate) fn remove_instruction(&mut self, index: usize) -> Result<(), Error> {
        let position = self
            .instructions
            .iter()
            .position(|instruction| instruction.index() == index)
            .ok_or(Error::InstructionNotFound(self.index, index))?;
        self.instructions.remove(position);
        Ok(())
    }

    /// Replaces the operation of an instruction, keeping its index.
    pub(crate) fn replace_operation(&mut self, index: usize, operation: Operation) -> Result<(), Error> {
        let block_index = self.index;
        let instruction = self
            .instructions
            .iter_mut()
            .find(|instruction| instruction.index() == index)
            .ok_or(Error::InstructionNotFound(block_index, index))?;
        *instruction = Instruction::new(index, operation);
        Ok(())
    }

    /// Adds an assign operation to the end of this block.
    pub fn assign<S: Into<String>>(&mut self, dst: S, src: Expression) {
        self.push(Operation::assign(dst, src));
    }

    /// Adds a turtle command to the end of this block.
    pub fn call(&mut self, command: Command) {
        self.push(Operation::call(command));
    }

    /// Terminates this block with a conditional branch.
    pub fn branch(&mut self, condition: Expression, on_true: usize, on_false: usize) {
        self.push(Operation::branch(condition, on_true, on_false));
    }

    /// Terminates this block with an unconditional jump.
    pub fn jump(&mut self, target: usize) {
        self.push(Operation::jump(target));
    }

    /// Terminates this block with a return.
    pub fn ret(&mut self) {
        self.push(Operation::Return);
    }
}

impl graph::Vertex for Block {
    fn index(&self) -> usize {
        self.index
    }

    fn dot_label(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "[ Block: 0x{:X} ]", self.index)?;
        for instruction in self.instructions() {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_replaces_terminator() {
        let mut a = Block::new(0);
        a.assign("x", Expression::integer(1));
        a.jump(1);

        let mut b = Block::new(1);
        b.assign("y", Expression::variable("x"));
        b.ret();

        a.append(&b);

        assert_eq!(a.len(), 3);
        assert_eq!(a.terminator(), Some(&Operation::Return));
        let indices: Vec<usize> = a.instructions().iter().map(|i| i.index()).collect();
        assert_eq!(indices, vec![0, 2, 3]);
    }

    #[test]
    fn remove_instruction() {
        let mut block = Block::new(3);
        block.assign("x", Expression::integer(1));
        block.assign("y", Expression::integer(2));
        block.ret();

        block.remove_instruction(0).unwrap();
        assert_eq!(block.len(), 2);
        assert!(block.instruction(0).is_err());
        assert!(block.instruction(1).is_ok());
    }
}
