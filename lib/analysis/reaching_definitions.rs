use crate::analysis::{fixed_point, AbstractState, AbstractValue};
use crate::il;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Where a variable may have received its value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Definition {
    /// The value the variable had on entry, a parameter binding if any.
    Entry,
    /// The assignment at this instruction.
    Instruction { block: usize, instruction: usize },
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Definition::Entry => write!(f, "entry"),
            Definition::Instruction { block, instruction } => {
                write!(f, "0x{:X}:{:02X}", block, instruction)
            }
        }
    }
}

/// A set of definitions.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum DefSet {
    Set(BTreeSet<Definition>),
    /// Every definition.
    All,
}

impl DefSet {
    pub fn single(definition: Definition) -> DefSet {
        DefSet::Set(Some(definition).into_iter().collect())
    }

    pub fn contains(&self, definition: &Definition) -> bool {
        match self {
            DefSet::Set(definitions) => definitions.contains(definition),
            DefSet::All => true,
        }
    }

    pub fn definitions(&self) -> Option<&BTreeSet<Definition>> {
        match self {
            DefSet::Set(definitions) => Some(definitions),
            DefSet::All => None,
        }
    }
}

impl AbstractValue for DefSet {
    fn bottom() -> DefSet {
        DefSet::Set(BTreeSet::new())
    }

    fn top() -> DefSet {
        DefSet::All
    }

    fn join(&self, other: &DefSet) -> DefSet {
        match (self, other) {
            (DefSet::Set(lhs), DefSet::Set(rhs)) => DefSet::Set(lhs.union(rhs).cloned().collect()),
            _ => DefSet::All,
        }
    }

    fn meet(&self, other: &DefSet) -> DefSet {
        match (self, other) {
            (DefSet::All, x) | (x, DefSet::All) => x.clone(),
            (DefSet::Set(lhs), DefSet::Set(rhs)) => {
                DefSet::Set(lhs.intersection(rhs).cloned().collect())
            }
        }
    }

    fn leq(&self, other: &DefSet) -> bool {
        match (self, other) {
            (_, DefSet::All) => true,
            (DefSet::All, DefSet::Set(_)) => false,
            (DefSet::Set(lhs), DefSet::Set(rhs)) => lhs.is_subset(rhs),
        }
    }
}

impl fmt::Display for DefSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DefSet::All => write!(f, "*"),
            DefSet::Set(definitions) => write!(
                f,
                "{{{}}}",
                definitions
                    .iter()
                    .map(|definition| definition.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
        }
    }
}

/// Compute the definitions reaching every block of `cfg`.
pub fn reaching_definitions(
    cfg: &il::ControlFlowGraph,
    options: &fixed_point::FixedPointOptions,
) -> Result<fixed_point::FixedPoint<DefSet>, Error> {
    let options = options
        .clone()
        .set_direction(fixed_point::Direction::Forward)
        .set_merge(fixed_point::Merge::Join);
    fixed_point::run(cfg, &ReachingDefinitionsAnalysis, &options)
}

struct ReachingDefinitionsAnalysis;

impl fixed_point::TransferFunction<DefSet> for ReachingDefinitionsAnalysis {
    fn boundary(&self, cfg: &il::ControlFlowGraph) -> AbstractState<DefSet> {
        let mut state = AbstractState::bottom();
        for variable in cfg.variables() {
            state.set(variable, DefSet::single(Definition::Entry));
        }
        state
    }

    fn instruction(
        &self,
        mut state: AbstractState<DefSet>,
        block: &il::Block,
        instruction: &il::Instruction,
    ) -> Result<AbstractState<DefSet>, Error> {
        if let Some(variable) = instruction.variable_written() {
            state.set(
                variable,
                DefSet::single(Definition::Instruction {
                    block: block.index(),
                    instruction: instruction.index(),
                }),
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, Program, Statement};
    use crate::cfg_builder;

    fn assign(var: &str, expr: Expr) -> Statement {
        Statement::Assign {
            var: var.to_string(),
            expr,
        }
    }

    #[test]
    fn reaching_definitions_test() {
        /*
        a = input()
        b = 4
        if a < 10 [ c = a ] else [ c = b ]
        b = c
        */
        let program = Program::new(vec![
            assign("a", Expr::Input),
            assign("b", Expr::int(4)),
            Statement::If {
                cond: Expr::binary(BinaryOp::Lt, Expr::var("a"), Expr::int(10)),
                then: vec![assign("c", Expr::var("a"))],
                else_: Some(vec![assign("c", Expr::var("b"))]),
            },
            assign("b", Expr::var("c")),
        ]);
        let cfg = cfg_builder::build(&program).unwrap();
        let result =
            reaching_definitions(&cfg, &fixed_point::FixedPointOptions::new()).unwrap();

        let exit = cfg.exit().unwrap();
        let state = result.in_state(exit).unwrap();

        let entry = cfg.entry().unwrap();
        assert_eq!(
            state.get("a"),
            &DefSet::single(Definition::Instruction {
                block: entry,
                instruction: 0
            })
        );

        // Both assignments to c reach the exit.
        let c = state.get("c").definitions().unwrap();
        assert_eq!(c.len(), 2);
        assert!(!c.contains(&Definition::Entry));

        // Only the last assignment to b survives.
        let b = state.get("b").definitions().unwrap();
        assert_eq!(b.len(), 1);
        assert!(!b.contains(&Definition::Instruction {
            block: entry,
            instruction: 1
        }));

        // At the entry every variable still holds its entry value.
        assert_eq!(
            result.in_state(entry).unwrap().get("c"),
            &DefSet::single(Definition::Entry)
        );
    }
}
