use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A turtle command, the only side effect a Turtle program has besides its
/// variable bindings.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Command {
    Forward(Expression),
    Backward(Expression),
    Left(Expression),
    Right(Expression),
    PenUp,
    PenDown,
    Goto(Expression, Expression),
    Pause,
}

impl Command {
    /// The expressions this command evaluates, in evaluation order.
    pub fn arguments(&self) -> Vec<&Expression> {
        match self {
            Command::Forward(e) | Command::Backward(e) | Command::Left(e) | Command::Right(e) => {
                vec![e]
            }
            Command::Goto(x, y) => vec![x, y],
            Command::PenUp | Command::PenDown | Command::Pause => Vec::new(),
        }
    }

    /// Rebuild this command with each argument mapped through `f`.
    pub fn map_arguments<F>(&self, mut f: F) -> Command
    where
        F: FnMut(&Expression) -> Expression,
    {
        match self {
            Command::Forward(e) => Command::Forward(f(e)),
            Command::Backward(e) => Command::Backward(f(e)),
            Command::Left(e) => Command::Left(f(e)),
            Command::Right(e) => Command::Right(f(e)),
            Command::Goto(x, y) => {
                let x = f(x);
                Command::Goto(x, f(y))
            }
            Command::PenUp => Command::PenUp,
            Command::PenDown => Command::PenDown,
            Command::Pause => Command::Pause,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Forward(e) => write!(f, "forward({})", e),
            Command::Backward(e) => write!(f, "backward({})", e),
            Command::Left(e) => write!(f, "left({})", e),
            Command::Right(e) => write!(f, "right({})", e),
            Command::PenUp => write!(f, "penup"),
            Command::PenDown => write!(f, "pendown"),
            Command::Goto(x, y) => write!(f, "goto({}, {})", x, y),
            Command::Pause => write!(f, "pause"),
        }
    }
}

/// An IL Operation updates some state.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Operation {
    /// Assign the value given in expression to the variable indicated.
    Assign { dst: String, src: Expression },
    /// Issue a turtle command.
    Call { command: Command },
    /// Continue at `on_true` if condition holds, otherwise at `on_false`.
    Branch {
        condition: Expression,
        on_true: usize,
        on_false: usize,
    },
    /// Continue at the target block.
    Jump { target: usize },
    /// Leave the program.
    Return,
}

impl Operation {
    /// Create a new `Operation::Assign`.
    pub fn assign<S: Into<String>>(dst: S, src: Expression) -> Operation {
        Operation::Assign {
            dst: dst.into(),
            src,
        }
    }

    /// Create a new `Operation::Call`.
    pub fn call(command: Command) -> Operation {
        Operation::Call { command }
    }

    /// Create a new `Operation::Branch`.
    pub fn branch(condition: Expression, on_true: usize, on_false: usize) -> Operation {
        Operation::Branch {
            condition,
            on_true,
            on_false,
        }
    }

    /// Create a new `Operation::Jump`.
    pub fn jump(target: usize) -> Operation {
        Operation::Jump { target }
    }

    pub fn is_assign(&self) -> bool {
        matches!(self, Operation::Assign { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Operation::Call { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Operation::Branch { .. })
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Operation::Jump { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Operation::Return)
    }

    /// Branch, Jump and Return end a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Operation::Branch { .. } | Operation::Jump { .. } | Operation::Return
        )
    }

    /// Get the blocks control may continue at after this operation.
    pub fn targets(&self) -> Vec<usize> {
        match self {
            Operation::Branch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Operation::Jump { target } => vec![*target],
            Operation::Assign { .. } | Operation::Call { .. } | Operation::Return => Vec::new(),
        }
    }

    /// Get the expressions evaluated by this operation.
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Operation::Assign { src, .. } => vec![src],
            Operation::Call { command } => command.arguments(),
            Operation::Branch { condition, .. } => vec![condition],
            Operation::Jump { .. } | Operation::Return => Vec::new(),
        }
    }

    /// Get the names of the variables read by this operation.
    pub fn variables_read(&self) -> Vec<&str> {
        let mut read: Vec<&str> = self
            .expressions()
            .into_iter()
            .flat_map(|expression| expression.variables())
            .collect();
        read.sort_unstable();
        read.dedup();
        read
    }

    /// Get the name of the variable written by this operation.
    pub fn variable_written(&self) -> Option<&str> {
        match self {
            Operation::Assign { dst, .. } => Some(dst),
            Operation::Call { .. }
            | Operation::Branch { .. }
            | Operation::Jump { .. }
            | Operation::Return => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Assign { dst, src } => write!(f, "{} = {}", dst, src),
            Operation::Call { command } => write!(f, "call {}", command),
            Operation::Branch {
                condition,
                on_true,
                on_false,
            } => write!(
                f,
                "branch {} ? 0x{:X} : 0x{:X}",
                condition, on_true, on_false
            ),
            Operation::Jump { target } => write!(f, "jump 0x{:X}", target),
            Operation::Return => write!(f, "return"),
        }
    }
}
