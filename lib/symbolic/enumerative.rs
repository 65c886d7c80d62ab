//! A bounded enumerative solver, for when no SMT solver is installed.
//!
//! Candidate models are tried with every symbol in `[-bound, bound]`, small
//! magnitudes first. Finding no model inside the box proves nothing about the
//! values outside it, so an exhausted search answers `Unknown` unless the
//! constraints have no symbols at all.

use crate::executor::eval;
use crate::il;
use crate::symbolic::solver::ModelEnvironment;
use crate::symbolic::{Model, Solver, SolverResult, SolverSession, Symbol};
use crate::Error;
use log::trace;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnumerativeSolver {
    bound: i64,
    max_candidates: usize,
}

impl Default for EnumerativeSolver {
    fn default() -> EnumerativeSolver {
        EnumerativeSolver {
            bound: 16,
            max_candidates: 200_000,
        }
    }
}

impl EnumerativeSolver {
    pub fn new() -> EnumerativeSolver {
        EnumerativeSolver::default()
    }

    /// Every symbol ranges over `[-bound, bound]`.
    pub fn bound(&self) -> i64 {
        self.bound
    }

    pub fn set_bound(mut self, bound: i64) -> Self {
        self.bound = bound.max(0);
        self
    }

    /// The number of candidate models tried before a query answers
    /// `Unknown`.
    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    pub fn set_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    // 0, 1, -1, 2, -2, ...
    fn values(&self) -> Vec<i64> {
        let mut values = vec![0];
        for magnitude in 1..=self.bound {
            values.push(magnitude);
            values.push(-magnitude);
        }
        values
    }
}

impl Solver for EnumerativeSolver {
    fn name(&self) -> &str {
        "enumerative"
    }

    fn session(&self) -> Result<Box<dyn SolverSession>, Error> {
        Ok(Box::new(self.clone()))
    }
}

fn satisfies(constraints: &[il::Expression], model: &Model) -> bool {
    let environment = ModelEnvironment(model);
    constraints
        .iter()
        .all(|constraint| matches!(eval::eval(constraint, &environment), Ok(c) if c.is_true()))
}

impl SolverSession for EnumerativeSolver {
    fn check(&mut self, constraints: &[il::Expression], _: bool) -> Result<SolverResult, Error> {
        let symbols: Vec<Symbol> = constraints
            .iter()
            .flat_map(Symbol::collect)
            .collect::<BTreeSet<Symbol>>()
            .into_iter()
            .collect();

        if symbols.is_empty() {
            return Ok(if satisfies(constraints, &Model::new()) {
                SolverResult::Sat(Model::new())
            } else {
                SolverResult::Unsat
            });
        }

        let values = self.values();
        let mut tried = 0;
        // Candidates are visited shell by shell: shell `k` holds the
        // assignments whose largest value index is exactly `k`.
        for shell in 0..values.len() {
            let mut indices = vec![0; symbols.len()];
            loop {
                if indices.iter().any(|index| *index == shell) {
                    tried += 1;
                    if tried > self.max_candidates {
                        return Ok(SolverResult::Unknown(format!(
                            "gave up after {} candidate models",
                            self.max_candidates
                        )));
                    }
                    let model: Model = symbols
                        .iter()
                        .cloned()
                        .zip(indices.iter().map(|index| values[*index]))
                        .collect();
                    if satisfies(constraints, &model) {
                        trace!("enumerative model after {} candidates", tried);
                        return Ok(SolverResult::Sat(model));
                    }
                }

                // Advance the odometer over 0..=shell.
                let mut position = 0;
                loop {
                    if position == indices.len() {
                        break;
                    }
                    if indices[position] < shell {
                        indices[position] += 1;
                        break;
                    }
                    indices[position] = 0;
                    position += 1;
                }
                if position == indices.len() {
                    break;
                }
            }
        }

        Ok(SolverResult::Unknown(format!(
            "no model with every symbol in [-{}, {}]",
            self.bound, self.bound
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> il::Expression {
        il::Expression::input("x")
    }

    #[test]
    fn finds_small_models_first() {
        let mut solver = EnumerativeSolver::new();
        let constraints = vec![il::Expression::cmpgt(x(), il::expr_const(0))];
        match solver.check(&constraints, true).unwrap() {
            SolverResult::Sat(model) => assert_eq!(model[&Symbol::Input("x".to_string())], 1),
            result => panic!("expected a model, got {:?}", result),
        }

        let constraints = vec![il::Expression::cmple(x(), il::expr_const(0))];
        match solver.check(&constraints, true).unwrap() {
            SolverResult::Sat(model) => assert_eq!(model[&Symbol::Input("x".to_string())], 0),
            result => panic!("expected a model, got {:?}", result),
        }
    }

    #[test]
    fn nonlinear_constraints() {
        // n * n == 49 and m % n == 3
        let n = il::expr_var("n");
        let m = il::expr_var("m");
        let constraints = vec![
            il::Expression::cmpeq(il::Expression::mul(n.clone(), n.clone()), il::expr_const(49)),
            il::Expression::cmpeq(il::Expression::modulo(m, n), il::expr_const(3)),
        ];
        let result = EnumerativeSolver::new().check(&constraints, true).unwrap();
        let model = match result {
            SolverResult::Sat(model) => model,
            result => panic!("expected a model, got {:?}", result),
        };
        let n = model[&Symbol::Parameter("n".to_string())];
        let m = model[&Symbol::Parameter("m".to_string())];
        assert_eq!(n * n, 49);
        assert_eq!(m.rem_euclid(n), 3);
    }

    #[test]
    fn closed_constraints_decide() {
        let mut solver = EnumerativeSolver::new();
        let constraints = vec![il::Expression::cmplt(il::expr_const(2), il::expr_const(1))];
        assert!(solver.check(&constraints, false).unwrap().is_unsat());
        assert!(solver.check(&[], false).unwrap().is_sat());
    }

    #[test]
    fn exhausted_box_is_unknown() {
        let mut solver = EnumerativeSolver::new().set_bound(4);
        let constraints = vec![il::Expression::cmpgt(x(), il::expr_const(100))];
        match solver.check(&constraints, false).unwrap() {
            SolverResult::Unknown(_) => {}
            result => panic!("expected unknown, got {:?}", result),
        }
    }
}
