//! The Turtle abstract syntax tree.
//!
//! The parser lives outside this crate and hands over a [`Program`], usually
//! as a JSON document loaded with [`Program::from_json`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// A complete Turtle program.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Program {
        Program { statements }
    }

    /// Load a program emitted by the parser.
    ///
    /// A document which does not describe a program is a parse error carrying
    /// the decoder's message unchanged.
    pub fn from_json(json: &str) -> Result<Program, Error> {
        serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Assign {
        var: String,
        expr: Expr,
    },
    If {
        cond: Expr,
        then: Vec<Statement>,
        #[serde(default, rename = "else")]
        else_: Option<Vec<Statement>>,
    },
    While {
        cond: Expr,
        body: Vec<Statement>,
    },
    Repeat {
        count: Expr,
        body: Vec<Statement>,
    },
    Break,
    Continue,
    Command(Command),
}

/// Turtle commands.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Forward(Expr),
    Backward(Expr),
    Left(Expr),
    Right(Expr),
    PenUp,
    PenDown,
    Goto(Expr, Expr),
    Pause,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Var(String),
    /// `input()`, a value supplied from outside the program.
    Input,
    /// `pendown?`
    PenDownQuery,
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Int(value)
    }

    pub fn var<S: Into<String>>(name: S) -> Expr {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn neg(expr: Expr) -> Expr {
        Expr::Neg(Box::new(expr))
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Input => write!(f, "input()"),
            Expr::PenDownQuery => write!(f, "pendown?"),
            Expr::Neg(expr) => write!(f, "-({})", expr),
            Expr::Not(expr) => write!(f, "not ({})", expr),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Statement::Assign { var, expr } => write!(f, "{} = {}", var, expr),
            Statement::If { cond, else_, .. } => match else_ {
                Some(_) => write!(f, "if {} [...] else [...]", cond),
                None => write!(f, "if {} [...]", cond),
            },
            Statement::While { cond, .. } => write!(f, "while {} [...]", cond),
            Statement::Repeat { count, .. } => write!(f, "repeat {} [...]", count),
            Statement::Break => write!(f, "break"),
            Statement::Continue => write!(f, "continue"),
            Statement::Command(command) => command.fmt(f),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Forward(e) => write!(f, "forward {}", e),
            Command::Backward(e) => write!(f, "backward {}", e),
            Command::Left(e) => write!(f, "left {}", e),
            Command::Right(e) => write!(f, "right {}", e),
            Command::PenUp => write!(f, "penup"),
            Command::PenDown => write!(f, "pendown"),
            Command::Goto(x, y) => write!(f, "goto({}, {})", x, y),
            Command::Pause => write!(f, "pause"),
        }
    }
}
