//! An `Edge` is a direct edge between `Block` in `ControlFlowGraph`
//!
//! Every edge records the kind of control transfer it models. Edges leaving
//! a branch are guarded: the true edge by the branch condition, the false edge
//! by its negation. All other edges are unconditional.

use crate::graph;
use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of control transfer an `Edge` models.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum EdgeKind {
    /// Flow into the syntactically following code.
    FallThrough,
    /// A jump out of sequence, such as `break` or `continue`.
    Jump,
    BranchTrue,
    BranchFalse,
    /// A jump from the end of a loop body back to its header.
    BackEdge,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            EdgeKind::FallThrough => "fallthrough",
            EdgeKind::Jump => "jump",
            EdgeKind::BranchTrue => "true",
            EdgeKind::BranchFalse => "false",
            EdgeKind::BackEdge => "back",
        };
        write!(f, "{}", s)
    }
}

/// Edge between IL blocks
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Edge {
    head: usize,
    tail: usize,
    kind: EdgeKind,
    condition: Option<Expression>,
}

impl Edge {
    pub(crate) fn new(head: usize, tail: usize, kind: EdgeKind, condition: Option<Expression>) -> Edge {
        Edge {
            head,
            tail,
            kind,
            condition,
        }
    }

    /// Retrieve the condition guarding this `Edge`.
    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref()
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Retrieve the index of the head `Vertex` for this `Edge`.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Retrieve the index of the tail `Vertex` for this `Edge`.
    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.condition {
            Some(ref condition) => write!(
                f,
                "(0x{:X}->0x{:X}) {} ? ({})",
                self.head, self.tail, self.kind, condition
            ),
            None => write!(f, "(0x{:X}->0x{:X}) {}", self.head, self.tail, self.kind),
        }
    }
}

impl graph::Edge for Edge {
    fn head(&self) -> usize {
        self.head
    }
    fn tail(&self) -> usize {
        self.tail
    }
    fn dot_label(&self) -> String {
        match self.condition {
            Some(ref condition) => format!("{}", condition),
            None => "".to_string(),
        }
    }
    fn dot_style(&self) -> String {
        match self.kind {
            EdgeKind::BackEdge => "dashed".to_string(),
            _ => "solid".to_string(),
        }
    }
}
