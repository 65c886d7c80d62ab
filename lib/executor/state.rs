use crate::executor::eval::{self, Environment};
use crate::executor::FaultKind;
use crate::il;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The turtle: its position, heading in degrees, and pen.
///
/// The turtle starts at the origin facing east with the pen down.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Turtle {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub pen_down: bool,
}

impl Default for Turtle {
    fn default() -> Turtle {
        Turtle {
            x: 0.0,
            y: 0.0,
            heading: 0.0,
            pen_down: true,
        }
    }
}

impl Turtle {
    fn advance(&mut self, distance: i64) {
        let radians = self.heading.to_radians();
        self.x += distance as f64 * radians.cos();
        self.y += distance as f64 * radians.sin();
    }

    fn turn(&mut self, degrees: i64) {
        self.heading = (self.heading + degrees as f64).rem_euclid(360.0);
    }

    /// True if the turtle is within `half_extent` of the origin on both axes.
    pub fn on_canvas(&self, half_extent: f64) -> bool {
        self.x.abs() <= half_extent && self.y.abs() <= half_extent
    }
}

/// Where execution continues after an operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Successor {
    /// Continue with the next instruction in the block.
    FallThrough,
    /// Continue at the start of the given block.
    Block(usize),
    /// The program is done.
    Return,
}

/// The concrete state of an executing program.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct State {
    bindings: BTreeMap<String, i64>,
    inputs: BTreeMap<String, i64>,
    turtle: Turtle,
    canvas_half_extent: f64,
}

impl State {
    /// Create a new state from initial variable bindings and input values.
    pub fn new(
        bindings: BTreeMap<String, i64>,
        inputs: BTreeMap<String, i64>,
        canvas_half_extent: f64,
    ) -> State {
        State {
            bindings,
            inputs,
            turtle: Turtle::default(),
            canvas_half_extent,
        }
    }

    pub fn bindings(&self) -> &BTreeMap<String, i64> {
        &self.bindings
    }

    pub fn turtle(&self) -> &Turtle {
        &self.turtle
    }

    pub fn into_parts(self) -> (BTreeMap<String, i64>, Turtle) {
        (self.bindings, self.turtle)
    }

    pub fn eval(&self, expression: &il::Expression) -> Result<il::Constant, FaultKind> {
        eval::eval(expression, self)
    }

    fn eval_integer(&self, expression: &il::Expression) -> Result<i64, FaultKind> {
        self.eval(expression)?
            .value_i64()
            .ok_or_else(|| FaultKind::UnsupportedOperation(format!("{} is not an integer", expression)))
    }

    fn guard(&self) -> Result<(), FaultKind> {
        if self.turtle.on_canvas(self.canvas_half_extent) {
            Ok(())
        } else {
            Err(FaultKind::TurtleGuardViolation)
        }
    }

    fn command(&mut self, command: &il::Command) -> Result<(), FaultKind> {
        match command {
            il::Command::Forward(e) => {
                let distance = self.eval_integer(e)?;
                self.turtle.advance(distance);
                self.guard()
            }
            il::Command::Backward(e) => {
                let distance = self.eval_integer(e)?;
                self.turtle.advance(-distance);
                self.guard()
            }
            il::Command::Left(e) => {
                let degrees = self.eval_integer(e)?;
                self.turtle.turn(degrees);
                Ok(())
            }
            il::Command::Right(e) => {
                let degrees = self.eval_integer(e)?;
                self.turtle.turn(-degrees);
                Ok(())
            }
            il::Command::Goto(x, y) => {
                let x = self.eval_integer(x)?;
                let y = self.eval_integer(y)?;
                self.turtle.x = x as f64;
                self.turtle.y = y as f64;
                self.guard()
            }
            il::Command::PenUp => {
                self.turtle.pen_down = false;
                Ok(())
            }
            il::Command::PenDown => {
                self.turtle.pen_down = true;
                Ok(())
            }
            il::Command::Pause => Ok(()),
        }
    }

    /// Execute an `il::Operation`, returning where execution continues.
    pub fn execute(&mut self, operation: &il::Operation) -> Result<Successor, FaultKind> {
        match operation {
            il::Operation::Assign { dst, src } => {
                let value = self.eval_integer(src)?;
                self.bindings.insert(dst.clone(), value);
                Ok(Successor::FallThrough)
            }
            il::Operation::Call { command } => {
                self.command(command)?;
                Ok(Successor::FallThrough)
            }
            il::Operation::Branch {
                condition,
                on_true,
                on_false,
            } => match self.eval(condition)? {
                il::Constant::Boolean(true) => Ok(Successor::Block(*on_true)),
                il::Constant::Boolean(false) => Ok(Successor::Block(*on_false)),
                il::Constant::Integer(_) => Err(FaultKind::UnsupportedOperation(format!(
                    "branch condition {} is not boolean",
                    condition
                ))),
            },
            il::Operation::Jump { target } => Ok(Successor::Block(*target)),
            il::Operation::Return => Ok(Successor::Return),
        }
    }
}

impl Environment for State {
    fn variable(&self, name: &str) -> Option<i64> {
        self.bindings.get(name).copied()
    }

    fn input(&self, name: &str) -> Option<i64> {
        self.inputs.get(name).copied()
    }

    fn pen_down(&self) -> Option<bool> {
        Some(self.turtle.pen_down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(BTreeMap::new(), BTreeMap::new(), 100.0)
    }

    #[test]
    fn turtle_moves_and_turns() {
        let mut state = state();
        state
            .execute(&il::Operation::call(il::Command::Forward(il::expr_const(10))))
            .unwrap();
        state
            .execute(&il::Operation::call(il::Command::Left(il::expr_const(90))))
            .unwrap();
        state
            .execute(&il::Operation::call(il::Command::Forward(il::expr_const(5))))
            .unwrap();

        let turtle = state.turtle();
        assert!((turtle.x - 10.0).abs() < 1e-9);
        assert!((turtle.y - 5.0).abs() < 1e-9);
        assert_eq!(turtle.heading, 90.0);
    }

    #[test]
    fn leaving_the_canvas_faults() {
        let mut state = state();
        let result = state.execute(&il::Operation::call(il::Command::Goto(
            il::expr_const(101),
            il::expr_const(0),
        )));
        assert_eq!(result, Err(FaultKind::TurtleGuardViolation));
    }

    #[test]
    fn pen_state_is_readable() {
        let mut state = state();
        state.execute(&il::Operation::call(il::Command::PenUp)).unwrap();
        assert_eq!(
            state.eval(&il::Expression::pen_down()).unwrap(),
            il::Constant::Boolean(false)
        );
    }
}
