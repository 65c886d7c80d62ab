//! Lowers a Turtle [`Program`](crate::ast::Program) into a
//! [`ControlFlowGraph`].
//!
//! Sequential statements share one block. `if` produces a branch block, one
//! block per arm and a merge block. `while` produces a header holding the
//! branch on the loop condition, a body, and a back edge from the end of the
//! body to the header. `repeat n` stores `n` in a hidden counter `__rep_<k>`,
//! tests `counter > 0` in the header, and decrements the counter in a latch
//! block which jumps back to the header.
//!
//! The program ends in a single exit block holding `Return`. Code after a
//! `break` or `continue` is lowered into blocks without predecessors, which
//! are removed before the graph is returned.
//!
//! Statements and expressions are walked with explicit work stacks, so the
//! depth of a program is not limited by the call stack.

use crate::ast::{BinaryOp, Command as AstCommand, Expr, Program, Statement};
use crate::il::*;
use crate::Error;
use log::debug;
use std::collections::BTreeSet;

/// Prefix of the hidden counters introduced for `repeat`.
pub const REPEAT_COUNTER_PREFIX: &str = "__rep_";

/// Lower a program into a validated `ControlFlowGraph`.
pub fn build(program: &Program) -> Result<ControlFlowGraph, Error> {
    Builder::new()?.build(program)
}

#[derive(Clone, Copy, Debug)]
struct LoopTargets {
    break_target: usize,
    continue_target: usize,
    continue_kind: EdgeKind,
}

enum Task<'a> {
    Statements(&'a [Statement]),
    Statement(&'a Statement),
    /// Terminate the current block with a jump to the target.
    JumpTo { target: usize, kind: EdgeKind },
    /// Continue emitting into the given block.
    SetCurrent(usize),
    PushLoop(LoopTargets),
    PopLoop,
}

enum ExprTask<'a> {
    Visit(&'a Expr),
    Build(&'a Expr),
}

struct Builder {
    cfg: ControlFlowGraph,
    current: usize,
    loops: Vec<LoopTargets>,
    next_repeat: usize,
    next_input: usize,
    input_names: BTreeSet<String>,
}

impl Builder {
    fn new() -> Result<Builder, Error> {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.new_block()?.index();
        cfg.set_entry(entry)?;
        Ok(Builder {
            cfg,
            current: entry,
            loops: Vec::new(),
            next_repeat: 0,
            next_input: 0,
            input_names: BTreeSet::new(),
        })
    }

    fn build(mut self, program: &Program) -> Result<ControlFlowGraph, Error> {
        let exit = self.cfg.new_block()?.index();

        let mut tasks: Vec<Task> = vec![
            Task::JumpTo {
                target: exit,
                kind: EdgeKind::FallThrough,
            },
            Task::Statements(&program.statements),
        ];

        while let Some(task) = tasks.pop() {
            match task {
                Task::Statements(statements) => {
                    if let Some((first, rest)) = statements.split_first() {
                        tasks.push(Task::Statements(rest));
                        tasks.push(Task::Statement(first));
                    }
                }
                Task::Statement(statement) => self.statement(statement, &mut tasks)?,
                Task::JumpTo { target, kind } => self.jump(target, kind)?,
                Task::SetCurrent(block) => self.current = block,
                Task::PushLoop(targets) => self.loops.push(targets),
                Task::PopLoop => {
                    self.loops.pop();
                }
            }
        }

        self.cfg.block_mut(exit)?.ret();
        self.cfg.set_exit(exit)?;

        let removed = self.cfg.remove_unreachable_blocks()?;
        self.cfg.compute_orders()?;
        self.cfg.validate()?;

        debug!(
            "built control flow graph with {} blocks, pruned {} unreachable",
            self.cfg.num_blocks(),
            removed.len()
        );

        Ok(self.cfg)
    }

    fn new_block(&mut self) -> Result<usize, Error> {
        Ok(self.cfg.new_block()?.index())
    }

    /// Terminate the current block with a jump, and continue in a fresh
    /// block with no predecessors.
    fn jump(&mut self, target: usize, kind: EdgeKind) -> Result<(), Error> {
        self.cfg.block_mut(self.current)?.jump(target);
        self.cfg.unconditional_edge(self.current, target, kind)?;
        self.current = self.new_block()?;
        Ok(())
    }

    fn branch(&mut self, condition: Expression, on_true: usize, on_false: usize) -> Result<(), Error> {
        self.cfg.branch_edges(self.current, &condition, on_true, on_false)?;
        self.cfg
            .block_mut(self.current)?
            .branch(condition, on_true, on_false);
        Ok(())
    }

    fn statement<'a>(&mut self, statement: &'a Statement, tasks: &mut Vec<Task<'a>>) -> Result<(), Error> {
        match statement {
            Statement::Assign { var, expr } => {
                let src = self.expression(expr, Some(var.as_str()))?;
                if src.sort() != Sort::Integer {
                    return Err(Error::malformed(
                        statement.to_string(),
                        "a boolean cannot be assigned to a variable",
                    ));
                }
                self.cfg.block_mut(self.current)?.assign(var.clone(), src);
            }

            Statement::If { cond, then, else_ } => {
                let condition = self.condition(cond, statement)?;
                let then_block = self.new_block()?;
                let merge_block = self.new_block()?;

                tasks.push(Task::SetCurrent(merge_block));
                match else_ {
                    Some(else_statements) => {
                        let else_block = self.new_block()?;
                        self.branch(condition, then_block, else_block)?;
                        tasks.push(Task::JumpTo {
                            target: merge_block,
                            kind: EdgeKind::FallThrough,
                        });
                        tasks.push(Task::Statements(else_statements));
                        tasks.push(Task::SetCurrent(else_block));
                    }
                    None => self.branch(condition, then_block, merge_block)?,
                }
                tasks.push(Task::JumpTo {
                    target: merge_block,
                    kind: EdgeKind::FallThrough,
                });
                tasks.push(Task::Statements(then));
                tasks.push(Task::SetCurrent(then_block));
            }

            Statement::While { cond, body } => {
                let condition = self.condition(cond, statement)?;
                let header = self.new_block()?;
                self.jump(header, EdgeKind::FallThrough)?;

                let body_block = self.new_block()?;
                let exit_block = self.new_block()?;
                self.current = header;
                self.branch(condition, body_block, exit_block)?;

                tasks.push(Task::SetCurrent(exit_block));
                tasks.push(Task::JumpTo {
                    target: header,
                    kind: EdgeKind::BackEdge,
                });
                tasks.push(Task::PopLoop);
                tasks.push(Task::Statements(body));
                tasks.push(Task::PushLoop(LoopTargets {
                    break_target: exit_block,
                    continue_target: header,
                    continue_kind: EdgeKind::BackEdge,
                }));
                tasks.push(Task::SetCurrent(body_block));
            }

            Statement::Repeat { count, body } => {
                let count = self.expression(count, None)?;
                if count.sort() != Sort::Integer {
                    return Err(Error::malformed(
                        statement.to_string(),
                        "the repeat count must be an integer",
                    ));
                }

                let counter = format!("{}{}", REPEAT_COUNTER_PREFIX, self.next_repeat);
                self.next_repeat += 1;

                self.cfg.block_mut(self.current)?.assign(counter.clone(), count);
                let header = self.new_block()?;
                self.jump(header, EdgeKind::FallThrough)?;

                let body_block = self.new_block()?;
                let latch = self.new_block()?;
                let exit_block = self.new_block()?;

                self.current = header;
                let condition = Expression::cmpgt(Expression::variable(counter.clone()), expr_const(0));
                self.branch(condition, body_block, exit_block)?;

                {
                    let block = self.cfg.block_mut(latch)?;
                    block.assign(
                        counter.clone(),
                        Expression::sub(Expression::variable(counter), expr_const(1)),
                    );
                    block.jump(header);
                }
                self.cfg.unconditional_edge(latch, header, EdgeKind::BackEdge)?;

                tasks.push(Task::SetCurrent(exit_block));
                tasks.push(Task::JumpTo {
                    target: latch,
                    kind: EdgeKind::FallThrough,
                });
                tasks.push(Task::PopLoop);
                tasks.push(Task::Statements(body));
                tasks.push(Task::PushLoop(LoopTargets {
                    break_target: exit_block,
                    continue_target: latch,
                    continue_kind: EdgeKind::Jump,
                }));
                tasks.push(Task::SetCurrent(body_block));
            }

            Statement::Break => {
                let targets = self
                    .loops
                    .last()
                    .copied()
                    .ok_or_else(|| Error::malformed("break", "`break` outside of a loop"))?;
                self.jump(targets.break_target, EdgeKind::Jump)?;
            }

            Statement::Continue => {
                let targets = self
                    .loops
                    .last()
                    .copied()
                    .ok_or_else(|| Error::malformed("continue", "`continue` outside of a loop"))?;
                self.jump(targets.continue_target, targets.continue_kind)?;
            }

            Statement::Command(command) => {
                let command = self.command(command, statement)?;
                self.cfg.block_mut(self.current)?.call(command);
            }
        }
        Ok(())
    }

    fn condition(&mut self, cond: &Expr, statement: &Statement) -> Result<Expression, Error> {
        let condition = self.expression(cond, None)?;
        if condition.sort() != Sort::Boolean {
            return Err(Error::malformed(
                statement.to_string(),
                format!("the condition `{}` is not boolean", cond),
            ));
        }
        Ok(condition)
    }

    fn command(&mut self, command: &AstCommand, statement: &Statement) -> Result<Command, Error> {
        let mut argument = |e: &Expr| -> Result<Expression, Error> {
            let lowered = self.expression(e, None)?;
            if lowered.sort() != Sort::Integer {
                return Err(Error::malformed(
                    statement.to_string(),
                    format!("the argument `{}` is not an integer", e),
                ));
            }
            Ok(lowered)
        };

        Ok(match command {
            AstCommand::Forward(e) => Command::Forward(argument(e)?),
            AstCommand::Backward(e) => Command::Backward(argument(e)?),
            AstCommand::Left(e) => Command::Left(argument(e)?),
            AstCommand::Right(e) => Command::Right(argument(e)?),
            AstCommand::Goto(x, y) => {
                let x = argument(x)?;
                Command::Goto(x, argument(y)?)
            }
            AstCommand::PenUp => Command::PenUp,
            AstCommand::PenDown => Command::PenDown,
            AstCommand::Pause => Command::Pause,
        })
    }

    /// Name the input read at one `input()` site.
    ///
    /// `x = input()` names its input `x`. Other sites are numbered. Names
    /// are made unique by a numeric suffix.
    fn input_name(&mut self, assigned_to: Option<&str>) -> String {
        let base = match assigned_to {
            Some(var) => var.to_string(),
            None => {
                let name = format!("input{}", self.next_input);
                self.next_input += 1;
                name
            }
        };

        let mut name = base.clone();
        let mut suffix = 1;
        while self.input_names.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.input_names.insert(name.clone());
        name
    }

    /// Lower and sort check an expression.
    fn expression(&mut self, root: &Expr, assigned_to: Option<&str>) -> Result<Expression, Error> {
        let mut tasks = vec![ExprTask::Visit(root)];
        let mut values: Vec<Expression> = Vec::new();

        let malformed = |e: &Expr, reason: &str| Error::malformed(e.to_string(), reason);

        while let Some(task) = tasks.pop() {
            match task {
                ExprTask::Visit(e) => match e {
                    Expr::Int(i) => values.push(Expression::integer(*i)),
                    Expr::Bool(b) => values.push(Expression::boolean(*b)),
                    Expr::Var(name) => values.push(Expression::variable(name.clone())),
                    Expr::PenDownQuery => values.push(Expression::pen_down()),
                    Expr::Input => {
                        let hint = if std::ptr::eq(e, root) { assigned_to } else { None };
                        let name = self.input_name(hint);
                        values.push(Expression::input(name));
                    }
                    Expr::Neg(operand) | Expr::Not(operand) => {
                        tasks.push(ExprTask::Build(e));
                        tasks.push(ExprTask::Visit(operand));
                    }
                    Expr::Binary { lhs, rhs, .. } => {
                        tasks.push(ExprTask::Build(e));
                        tasks.push(ExprTask::Visit(rhs));
                        tasks.push(ExprTask::Visit(lhs));
                    }
                },

                ExprTask::Build(e) => {
                    let built = match e {
                        Expr::Neg(_) => {
                            let operand = pop(&mut values)?;
                            if operand.sort() != Sort::Integer {
                                return Err(malformed(e, "arithmetic over a boolean"));
                            }
                            Expression::neg(operand)
                        }
                        Expr::Not(_) => {
                            let operand = pop(&mut values)?;
                            if operand.sort() != Sort::Boolean {
                                return Err(malformed(e, "`not` over an integer"));
                            }
                            Expression::not(operand)
                        }
                        Expr::Binary { op, .. } => {
                            let rhs = pop(&mut values)?;
                            let lhs = pop(&mut values)?;
                            binary(*op, lhs, rhs).map_err(|reason| malformed(e, reason))?
                        }
                        Expr::Int(_)
                        | Expr::Bool(_)
                        | Expr::Var(_)
                        | Expr::Input
                        | Expr::PenDownQuery => {
                            return Err(Error::Custom(format!("leaf `{}` scheduled for build", e)))
                        }
                    };
                    values.push(built);
                }
            }
        }

        pop(&mut values)
    }
}

fn pop(values: &mut Vec<Expression>) -> Result<Expression, Error> {
    values
        .pop()
        .ok_or_else(|| Error::Custom("expression stack underflow".to_string()))
}

fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Result<Expression, &'static str> {
    let (l, r) = (lhs.sort(), rhs.sort());
    if op.is_arithmetic() && (l != Sort::Integer || r != Sort::Integer) {
        return Err("arithmetic over a boolean");
    }
    if op.is_logical() && (l != Sort::Boolean || r != Sort::Boolean) {
        return Err("logical operator over an integer");
    }
    if op.is_comparison() {
        match op {
            BinaryOp::Eq | BinaryOp::Neq => {
                if l != r {
                    return Err("comparison between an integer and a boolean");
                }
            }
            _ => {
                if l != Sort::Integer || r != Sort::Integer {
                    return Err("ordering comparison over a boolean");
                }
            }
        }
    }

    Ok(match op {
        BinaryOp::Add => Expression::add(lhs, rhs),
        BinaryOp::Sub => Expression::sub(lhs, rhs),
        BinaryOp::Mul => Expression::mul(lhs, rhs),
        BinaryOp::Div => Expression::div(lhs, rhs),
        BinaryOp::Mod => Expression::modulo(lhs, rhs),
        BinaryOp::Eq => Expression::cmpeq(lhs, rhs),
        BinaryOp::Neq => Expression::cmpneq(lhs, rhs),
        BinaryOp::Lt => Expression::cmplt(lhs, rhs),
        BinaryOp::Le => Expression::cmple(lhs, rhs),
        BinaryOp::Gt => Expression::cmpgt(lhs, rhs),
        BinaryOp::Ge => Expression::cmpge(lhs, rhs),
        BinaryOp::And => Expression::and(lhs, rhs),
        BinaryOp::Or => Expression::or(lhs, rhs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assign(var: &str, expr: Expr) -> Statement {
        Statement::Assign {
            var: var.to_string(),
            expr,
        }
    }

    fn gt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, lhs, rhs)
    }

    #[test]
    fn straight_line_program_is_entry_and_exit() {
        let program = Program::new(vec![
            assign("x", Expr::int(1)),
            assign("y", Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::int(2))),
        ]);
        let cfg = build(&program).unwrap();

        assert_eq!(cfg.num_blocks(), 2);
        let entry = cfg.block(cfg.entry().unwrap()).unwrap();
        assert_eq!(entry.len(), 3);
        assert_eq!(cfg.exits(), vec![cfg.exit().unwrap()]);
    }

    #[test]
    fn if_else_produces_diamond() {
        let program = Program::new(vec![
            assign("x", Expr::Input),
            Statement::If {
                cond: gt(Expr::var("x"), Expr::int(0)),
                then: vec![assign("y", Expr::int(1))],
                else_: Some(vec![assign("y", Expr::int(-1))]),
            },
        ]);
        let cfg = build(&program).unwrap();

        // entry, then, else, merge, exit
        assert_eq!(cfg.num_blocks(), 5);
        let entry = cfg.entry().unwrap();
        assert_eq!(cfg.successor_indices(entry).unwrap().len(), 2);
        match cfg.block(entry).unwrap().instructions()[0].operation() {
            Operation::Assign { dst, src } => {
                assert_eq!(dst, "x");
                assert_eq!(src, &Expression::input("x"));
            }
            other => panic!("unexpected {}", other),
        }
        assert!(cfg.loop_headers().unwrap().is_empty());
    }

    #[test]
    fn while_loop_has_back_edge() {
        let program = Program::new(vec![Statement::While {
            cond: gt(Expr::var("x"), Expr::int(0)),
            body: vec![assign(
                "x",
                Expr::binary(BinaryOp::Sub, Expr::var("x"), Expr::int(1)),
            )],
        }]);
        let cfg = build(&program).unwrap();

        let back_edges: Vec<&Edge> = cfg
            .edges()
            .into_iter()
            .filter(|edge| edge.kind() == EdgeKind::BackEdge)
            .collect();
        assert_eq!(back_edges.len(), 1);
        assert_eq!(
            cfg.loop_headers().unwrap(),
            vec![back_edges[0].tail()].into_iter().collect()
        );
    }

    #[test]
    fn repeat_uses_hidden_counter_and_latch() {
        let program = Program::new(vec![Statement::Repeat {
            count: Expr::int(4),
            body: vec![Statement::Command(AstCommand::Forward(Expr::int(10)))],
        }]);
        let cfg = build(&program).unwrap();

        assert!(cfg.variables().contains("__rep_0"));
        let loops = cfg.loops().unwrap();
        assert_eq!(loops.len(), 1);
        // header, body, latch
        assert_eq!(loops.values().next().unwrap().len(), 3);
    }

    #[test]
    fn code_after_break_is_pruned() {
        let program = Program::new(vec![Statement::While {
            cond: Expr::Bool(true),
            body: vec![Statement::Break, assign("dead", Expr::int(1))],
        }]);
        let cfg = build(&program).unwrap();

        assert!(!cfg.variables().contains("dead"));
        cfg.validate().unwrap();
    }

    #[test]
    fn deeply_nested_program_builds() {
        let mut body = vec![assign("x", Expr::int(0))];
        for _ in 0..1_000 {
            body = vec![Statement::If {
                cond: Expr::Bool(true),
                then: body,
                else_: None,
            }];
        }
        let cfg = build(&Program::new(body)).unwrap();
        assert!(cfg.num_blocks() > 1_000);
    }

    #[test]
    fn malformed_programs() {
        let cases = vec![
            vec![Statement::Break],
            vec![Statement::Continue],
            vec![Statement::If {
                cond: Expr::int(1),
                then: vec![],
                else_: None,
            }],
            vec![assign(
                "x",
                Expr::binary(BinaryOp::Add, Expr::Bool(true), Expr::int(1)),
            )],
            vec![assign("x", Expr::Bool(true))],
            vec![Statement::Repeat {
                count: Expr::Bool(true),
                body: vec![],
            }],
            vec![Statement::While {
                cond: Expr::binary(BinaryOp::Eq, Expr::int(1), Expr::Bool(true)),
                body: vec![],
            }],
        ];

        for statements in cases {
            match build(&Program::new(statements.clone())) {
                Err(Error::MalformedProgram { .. }) => {}
                other => panic!("{:?} should be malformed, got {:?}", statements, other),
            }
        }
    }

    #[test]
    fn input_sites_get_unique_names() {
        let program = Program::new(vec![
            assign("x", Expr::Input),
            assign("x", Expr::Input),
            assign(
                "y",
                Expr::binary(BinaryOp::Add, Expr::Input, Expr::Input),
            ),
        ]);
        let cfg = build(&program).unwrap();

        let inputs: Vec<String> = cfg.inputs().into_iter().collect();
        assert_eq!(inputs, vec!["input0", "input1", "x", "x_1"]);
    }
}
