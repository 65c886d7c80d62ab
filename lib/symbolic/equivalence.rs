//! Equivalence of two path conditions.
//!
//! Two conditions are equivalent when no assignment satisfies exactly one of
//! them. Parameters are first bound to constants, as `ExploreOptions`
//! bindings are, and the solver is asked for an assignment to the remaining
//! symbols that tells the two apart.

use crate::executor::eval;
use crate::il;
use crate::symbolic::{Model, Solver, SolverResult};
use crate::Error;
use log::debug;
use std::collections::BTreeMap;

/// The answer to `check_constraint_equivalence`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConstraintEquivalence {
    Equivalent,
    /// Satisfies one condition but not the other.
    Counterexample(Model),
    Unknown(String),
}

impl ConstraintEquivalence {
    pub fn is_equivalent(&self) -> bool {
        matches!(self, ConstraintEquivalence::Equivalent)
    }
}

fn conjunction(constraints: &[il::Expression], parameters: &BTreeMap<String, i64>) -> il::Expression {
    let bound = |name: &str| parameters.get(name).map(|value| il::expr_const(*value));
    constraints
        .iter()
        .map(|constraint| constraint.replace_variables(bound))
        .fold(il::Expression::boolean(true), il::Expression::and)
}

/// Check whether the conjunctions of `lhs` and `rhs` agree on every
/// assignment, once every parameter in `parameters` is bound.
pub fn check_constraint_equivalence(
    solver: &dyn Solver,
    lhs: &[il::Expression],
    rhs: &[il::Expression],
    parameters: &BTreeMap<String, i64>,
) -> Result<ConstraintEquivalence, Error> {
    let lhs = conjunction(lhs, parameters);
    let rhs = conjunction(rhs, parameters);
    let differ = eval::fold(&il::Expression::or(
        il::Expression::and(lhs.clone(), il::Expression::not(rhs.clone())),
        il::Expression::and(il::Expression::not(lhs), rhs),
    ));

    let mut session = solver.session()?;
    let equivalence = match session.check(&[differ], true)? {
        SolverResult::Unsat => ConstraintEquivalence::Equivalent,
        SolverResult::Sat(model) => ConstraintEquivalence::Counterexample(model),
        SolverResult::Unknown(reason) => ConstraintEquivalence::Unknown(reason),
    };
    debug!("{} says {:?}", solver.name(), equivalence);
    Ok(equivalence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::{EnumerativeSolver, Symbol};

    fn n_above(bound: i64) -> il::Expression {
        il::Expression::cmpgt(il::expr_var("n"), il::expr_const(bound))
    }

    fn parameters(n: i64) -> BTreeMap<String, i64> {
        vec![("n".to_string(), n)].into_iter().collect()
    }

    #[test]
    fn bound_parameters_decide() {
        let solver = EnumerativeSolver::new();
        let at_least_four = il::Expression::cmpge(il::expr_var("n"), il::expr_const(4));

        let equivalence =
            check_constraint_equivalence(&solver, &[n_above(3)], &[at_least_four], &parameters(5)).unwrap();
        assert!(equivalence.is_equivalent());

        // n = 5 satisfies n > 3 but not n > 6.
        let equivalence =
            check_constraint_equivalence(&solver, &[n_above(3)], &[n_above(6)], &parameters(5)).unwrap();
        assert_eq!(equivalence, ConstraintEquivalence::Counterexample(Model::new()));

        // Both fail with n = 1.
        let equivalence =
            check_constraint_equivalence(&solver, &[n_above(3)], &[n_above(6)], &parameters(1)).unwrap();
        assert!(equivalence.is_equivalent());
    }

    #[test]
    fn free_inputs_find_counterexamples() {
        let solver = EnumerativeSolver::new();
        let negative = il::Expression::cmplt(il::Expression::input("x"), il::expr_const(0));

        let equivalence = check_constraint_equivalence(
            &solver,
            &[n_above(3), negative],
            &[n_above(3)],
            &parameters(5),
        )
        .unwrap();
        match equivalence {
            ConstraintEquivalence::Counterexample(model) => {
                assert!(model[&Symbol::Input("x".to_string())] >= 0);
            }
            other => panic!("expected a counterexample, got {:?}", other),
        }
    }

    #[test]
    fn bounded_search_cannot_prove_equivalence() {
        // x > 0 and x >= 1 agree everywhere, but only outside the search box
        // could a difference hide.
        let solver = EnumerativeSolver::new().set_bound(4);
        let x = il::Expression::input("x");
        let equivalence = check_constraint_equivalence(
            &solver,
            &[il::Expression::cmpgt(x.clone(), il::expr_const(0))],
            &[il::Expression::cmpge(x, il::expr_const(1))],
            &BTreeMap::new(),
        )
        .unwrap();
        assert!(matches!(equivalence, ConstraintEquivalence::Unknown(_)));
    }
}
