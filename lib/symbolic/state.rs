use crate::executor::eval;
use crate::il;
use crate::symbolic::Symbol;
use std::collections::{BTreeMap, BTreeSet};

/// The state of one explored path.
///
/// Variables hold symbolic values, expressions over the program's
/// parameters and inputs. The pen is always concrete. Forking a path clones
/// its state.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionState {
    block: usize,
    values: BTreeMap<String, il::Expression>,
    pen_down: bool,
    path_condition: Vec<il::Expression>,
    history: Vec<usize>,
    header_visits: BTreeMap<usize, usize>,
    symbols: BTreeSet<Symbol>,
}

impl ExecutionState {
    /// A state at `entry` with some variables bound to constants.
    pub fn new(entry: usize, bindings: &BTreeMap<String, i64>) -> ExecutionState {
        ExecutionState {
            block: entry,
            values: bindings
                .iter()
                .map(|(name, value)| (name.clone(), il::Expression::integer(*value)))
                .collect(),
            pen_down: true,
            path_condition: Vec::new(),
            history: vec![entry],
            header_visits: BTreeMap::new(),
            symbols: BTreeSet::new(),
        }
    }

    pub fn block(&self) -> usize {
        self.block
    }

    /// The symbolic value of a variable, if it has been bound.
    pub fn value(&self, name: &str) -> Option<&il::Expression> {
        self.values.get(name)
    }

    pub fn pen_down(&self) -> bool {
        self.pen_down
    }

    pub fn set_pen_down(&mut self, pen_down: bool) {
        self.pen_down = pen_down;
    }

    pub fn path_condition(&self) -> &[il::Expression] {
        &self.path_condition
    }

    /// The blocks this path has visited, in order.
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    /// The parameters and inputs this path has read.
    pub fn symbols(&self) -> &BTreeSet<Symbol> {
        &self.symbols
    }

    /// Rewrite `expression` over symbols, recording the symbols it reads.
    ///
    /// Variables without a value are parameters of the program and stay as
    /// they are.
    pub fn symbolize(&mut self, expression: &il::Expression) -> il::Expression {
        for variable in expression.variables() {
            if !self.values.contains_key(variable) {
                self.symbols.insert(Symbol::Parameter(variable.to_string()));
            }
        }
        for input in expression.inputs() {
            self.symbols.insert(Symbol::Input(input.to_string()));
        }

        let pen_down = self.pen_down;
        let values = &self.values;
        let symbolic = expression.substitute(&|e| match e {
            il::Expression::Variable(name) => values.get(name).cloned(),
            il::Expression::PenDown => Some(il::Expression::boolean(pen_down)),
            _ => None,
        });
        eval::fold(&symbolic)
    }

    pub fn assign<S: Into<String>>(&mut self, variable: S, value: il::Expression) {
        self.values.insert(variable.into(), value);
    }

    /// Conjoin `constraint` to the path condition.
    pub fn constrain(&mut self, constraint: il::Expression) {
        let constraint = eval::fold(&constraint);
        if constraint != il::Expression::boolean(true) {
            self.path_condition.push(constraint);
        }
    }

    /// Move to `block`, returning the number of times this path has now
    /// entered it.
    pub fn enter(&mut self, block: usize) -> usize {
        self.block = block;
        self.history.push(block);
        let visits = self.header_visits.entry(block).or_insert(0);
        *visits += 1;
        *visits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolize_reads_parameters_and_inputs() {
        let bindings = vec![("k".to_string(), 3)].into_iter().collect();
        let mut state = ExecutionState::new(0, &bindings);
        state.assign("y", il::Expression::input("x"));

        // y + k * n
        let e = il::Expression::add(
            il::expr_var("y"),
            il::Expression::mul(il::expr_var("k"), il::expr_var("n")),
        );
        let symbolic = state.symbolize(&e);
        assert_eq!(
            symbolic,
            il::Expression::add(
                il::Expression::input("x"),
                il::Expression::mul(il::expr_const(3), il::expr_var("n")),
            )
        );
        assert!(state.symbols().contains(&Symbol::Parameter("n".to_string())));
        assert!(!state.symbols().contains(&Symbol::Parameter("k".to_string())));
    }

    #[test]
    fn pen_is_concrete() {
        let mut state = ExecutionState::new(0, &BTreeMap::new());
        state.set_pen_down(false);
        let e = il::Expression::not(il::Expression::pen_down());
        assert_eq!(state.symbolize(&e), il::Expression::boolean(true));
    }

    #[test]
    fn forks_are_independent() {
        let mut state = ExecutionState::new(0, &BTreeMap::new());
        let mut fork = state.clone();
        fork.constrain(il::Expression::cmpgt(il::expr_var("n"), il::expr_const(0)));
        fork.enter(1);
        state.constrain(il::Expression::boolean(true));
        assert!(state.path_condition().is_empty());
        assert_eq!(state.history(), &[0]);
        assert_eq!(fork.path_condition().len(), 1);
        assert_eq!(fork.history(), &[0, 1]);
    }
}
