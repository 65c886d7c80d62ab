//! A `ControlFlowGraph` is a directed `Graph` of `Block` and `Edge`.

use crate::il::*;
use crate::{graph, Error};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryFrom;
use std::fmt;

/// A directed graph of types `Block` and `Edge`.
///
/// # Entry and Exit
/// A `ControlFlowGraph` built from a program has one entry block and at most
/// one exit block, the only block terminated by `Return`. The exit is absent
/// when no path leaves the program, which happens once the optimizer folds the
/// guard of `while true [...]` without a `break`.
///
/// # Traversal orders
/// Reverse post order and post order from the entry are computed once by
/// `compute_orders` and cached, since the fixed point engine visits blocks in
/// these orders.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(
    try_from = "SerializedControlFlowGraph",
    into = "SerializedControlFlowGraph"
)]
pub struct ControlFlowGraph {
    // The internal graph used to store our blocks.
    graph: graph::Graph<Block, Edge>,
    // The next index to use when creating a basic block.
    next_index: usize,
    entry: Option<usize>,
    exit: Option<usize>,
    reverse_post_order: Vec<usize>,
    post_order: Vec<usize>,
}

impl ControlFlowGraph {
    pub fn new() -> ControlFlowGraph {
        ControlFlowGraph {
            graph: graph::Graph::new(),
            next_index: 0,
            entry: None,
            exit: None,
            reverse_post_order: Vec::new(),
            post_order: Vec::new(),
        }
    }

    /// Returns the underlying graph
    pub fn graph(&self) -> &graph::Graph<Block, Edge> {
        &self.graph
    }

    /// Sets the entry point for this `ControlFlowGraph` to the given `Block` index.
    pub fn set_entry(&mut self, entry: usize) -> Result<(), Error> {
        if self.graph.has_vertex(entry) {
            self.entry = Some(entry);
            return Ok(());
        }
        Err("Index does not exist for set_entry".into())
    }

    /// Sets the exit point for this `ControlFlowGraph` to the given `Block` index.
    pub fn set_exit(&mut self, exit: usize) -> Result<(), Error> {
        if self.graph.has_vertex(exit) {
            self.exit = Some(exit);
            return Ok(());
        }
        Err("Index does not exist for set_exit".into())
    }

    /// Get the entry `Block` index for this `ControlFlowGraph`.
    pub fn entry(&self) -> Option<usize> {
        self.entry
    }

    /// Get the entry `Block` index, or an error when no entry is set.
    pub fn entry_index(&self) -> Result<usize, Error> {
        self.entry.ok_or(Error::ControlFlowGraphEntryNotFound)
    }

    /// Get the exit `Block` index for this `ControlFlowGraph`.
    pub fn exit(&self) -> Option<usize> {
        self.exit
    }

    /// Get the indices of every block terminated by `Return`.
    pub fn exits(&self) -> Vec<usize> {
        self.blocks()
            .into_iter()
            .filter(|block| matches!(block.terminator(), Some(Operation::Return)))
            .map(|block| block.index())
            .collect()
    }

    /// Get a `Block` by index.
    pub fn block(&self, index: usize) -> Result<&Block, Error> {
        self.graph.vertex(index)
    }

    pub(crate) fn block_mut(&mut self, index: usize) -> Result<&mut Block, Error> {
        self.graph.vertex_mut(index)
    }

    /// Get every `Block` in this `ControlFlowGraph`.
    pub fn blocks(&self) -> Vec<&Block> {
        self.graph.vertices()
    }

    pub fn num_blocks(&self) -> usize {
        self.graph.num_vertices()
    }

    /// Get an `Instruction` by its block and instruction indices.
    pub fn instruction(&self, block: usize, index: usize) -> Result<&Instruction, Error> {
        self.block(block)?.instruction(index)
    }

    /// Get an `Edge` by its head and tail `Block` indices.
    pub fn edge(&self, head: usize, tail: usize) -> Result<&Edge, Error> {
        self.graph.edge(head, tail)
    }

    /// Get every `Edge` in this `ControlFlowGraph`.
    pub fn edges(&self) -> Vec<&Edge> {
        self.graph.edges()
    }

    /// Get every incoming edge to a block
    pub fn edges_in(&self, index: usize) -> Result<Vec<&Edge>, Error> {
        self.graph.edges_in(index)
    }

    /// Get every outgoing edge from a block
    pub fn edges_out(&self, index: usize) -> Result<Vec<&Edge>, Error> {
        self.graph.edges_out(index)
    }

    /// Get the indices of every predecessor of a `Block` in this `ControlFlowGraph`.
    pub fn predecessor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.graph.predecessor_indices(index)
    }

    /// Get the indices of every successor of a `Block` in this `ControlFlowGraph`.
    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.graph.successor_indices(index)
    }

    /// Creates a new basic block, adds it to the graph, and returns it
    pub fn new_block(&mut self) -> Result<&mut Block, Error> {
        let next_index = self.next_index;
        self.next_index += 1;
        let block = Block::new(next_index);
        self.graph.insert_vertex(block)?;
        self.graph.vertex_mut(next_index)
    }

    /// Creates an unguarded edge from one block to another block
    pub fn unconditional_edge(&mut self, head: usize, tail: usize, kind: EdgeKind) -> Result<(), Error> {
        self.graph.insert_edge(Edge::new(head, tail, kind, None))
    }

    /// Creates the two guarded edges leaving a branch on `condition`.
    pub fn branch_edges(
        &mut self,
        head: usize,
        condition: &Expression,
        on_true: usize,
        on_false: usize,
    ) -> Result<(), Error> {
        self.graph.insert_edge(Edge::new(
            head,
            on_true,
            EdgeKind::BranchTrue,
            Some(condition.clone()),
        ))?;
        self.graph.insert_edge(Edge::new(
            head,
            on_false,
            EdgeKind::BranchFalse,
            Some(Expression::not(condition.clone())),
        ))
    }

    pub(crate) fn remove_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        self.graph.remove_edge(head, tail)
    }

    /// Removes every block unreachable from the entry, returning the indices
    /// of the removed blocks.
    pub fn remove_unreachable_blocks(&mut self) -> Result<Vec<usize>, Error> {
        let entry = self.entry_index()?;
        let removed = self.graph.remove_unreachable_vertices(entry)?;
        if let Some(exit) = self.exit {
            if removed.contains(&exit) {
                self.exit = None;
            }
        }
        if !removed.is_empty() {
            trace!("removed unreachable blocks {:?}", removed);
        }
        Ok(removed)
    }

    /// Computes and caches the traversal orders from the entry.
    pub fn compute_orders(&mut self) -> Result<(), Error> {
        let entry = self.entry_index()?;
        self.post_order = self.graph.compute_post_order(entry)?;
        self.reverse_post_order = self.post_order.iter().rev().cloned().collect();
        Ok(())
    }

    /// Reverse post order of the blocks reachable from the entry.
    pub fn reverse_post_order(&self) -> &[usize] {
        &self.reverse_post_order
    }

    /// Post order of the blocks reachable from the entry.
    pub fn post_order(&self) -> &[usize] {
        &self.post_order
    }

    /// The edges closing a cycle in a depth-first walk from the entry.
    pub fn retreating_edges(&self) -> Result<BTreeSet<(usize, usize)>, Error> {
        self.graph.compute_retreating_edges(self.entry_index()?)
    }

    /// Blocks targeted by a retreating edge. Every cycle passes through one.
    pub fn loop_headers(&self) -> Result<BTreeSet<usize>, Error> {
        Ok(self
            .retreating_edges()?
            .into_iter()
            .map(|(_, tail)| tail)
            .collect())
    }

    /// The natural loops of this graph, keyed by header.
    pub fn loops(&self) -> Result<BTreeMap<usize, BTreeSet<usize>>, Error> {
        self.graph.compute_natural_loops(self.entry_index()?)
    }

    /// Names of every variable read or written in this graph.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut variables = BTreeSet::new();
        for block in self.blocks() {
            for instruction in block.instructions() {
                if let Some(written) = instruction.variable_written() {
                    variables.insert(written.to_string());
                }
                for read in instruction.variables_read() {
                    variables.insert(read.to_string());
                }
            }
        }
        variables
    }

    /// Names of every input read in this graph.
    pub fn inputs(&self) -> BTreeSet<String> {
        let mut inputs = BTreeSet::new();
        for block in self.blocks() {
            for instruction in block.instructions() {
                for expression in instruction.operation().expressions() {
                    inputs.extend(expression.inputs().into_iter().map(|s| s.to_string()));
                }
            }
        }
        inputs
    }

    /// Merge `Block`s.
    ///
    /// When a `Block` has only one successor, reached by a jump, and that
    /// successor has only one predecessor, we merge both into one `Block`.
    pub fn merge(&mut self) -> Result<(), Error> {
        loop {
            let mut blocks_being_merged: BTreeSet<usize> = BTreeSet::new();
            let mut merges: Vec<(usize, usize)> = Vec::new();

            for block in self.blocks() {
                if blocks_being_merged.contains(&block.index()) {
                    continue;
                }

                let successors = self.graph.edges_out(block.index())?;
                if successors.len() != 1 {
                    continue;
                }

                let successor = match successors.first() {
                    Some(edge) if !edge.is_conditional() => edge.tail(),
                    _ => continue,
                };

                // Self loops and the entry are never merged away
                if successor == block.index() || self.entry == Some(successor) {
                    continue;
                }

                if blocks_being_merged.contains(&successor) {
                    continue;
                }

                if self.graph.edges_in(successor)?.len() != 1 {
                    continue;
                }

                blocks_being_merged.insert(block.index());
                blocks_being_merged.insert(successor);

                merges.push((block.index(), successor));
            }

            if merges.is_empty() {
                break;
            }

            for (merge_index, successor_index) in merges {
                trace!("merging block 0x{:X} into 0x{:X}", successor_index, merge_index);

                let successor_block = self.graph.vertex(successor_index)?.clone();
                self.graph.vertex_mut(merge_index)?.append(&successor_block);

                // all of successor's successors become merge_block's successors
                let new_edges: Vec<Edge> = self
                    .graph
                    .edges_out(successor_index)?
                    .into_iter()
                    .map(|edge| {
                        Edge::new(merge_index, edge.tail(), edge.kind(), edge.condition().cloned())
                    })
                    .collect();

                self.graph.remove_vertex(successor_index)?;

                for edge in new_edges {
                    self.graph.insert_edge(edge)?;
                }

                if self.exit == Some(successor_index) {
                    self.exit = Some(merge_index);
                }
            }
        }

        if self.entry.is_some() {
            self.compute_orders()?;
        }

        Ok(())
    }

    /// Checks the structural invariants of this graph.
    ///
    /// * The entry exists and every block is reachable from it.
    /// * Every block ends in exactly one terminator, and no terminator appears
    ///   earlier in a block.
    /// * Terminator targets and outgoing edges agree, and branch edges carry the
    ///   branch condition or its negation.
    /// * Edges marked as back edges close a loop.
    /// * Cached traversal orders, when present, are current.
    pub fn validate(&self) -> Result<(), Error> {
        let entry = self.entry_index()?;
        if !self.graph.has_vertex(entry) {
            return Err(Error::InvalidIr(format!("entry block 0x{:X} does not exist", entry)));
        }

        let unreachable = self.graph.unreachable_vertices(entry)?;
        if let Some(index) = unreachable.iter().min() {
            return Err(Error::InvalidIr(format!(
                "block 0x{:X} is unreachable from the entry",
                index
            )));
        }

        if let Some(exit) = self.exit {
            match self.block(exit)?.terminator() {
                Some(Operation::Return) => {}
                _ => {
                    return Err(Error::InvalidIr(format!(
                        "exit block 0x{:X} does not return",
                        exit
                    )))
                }
            }
        }

        for block in self.blocks() {
            self.validate_block(block)?;
        }

        let back_edges = self.graph.compute_back_edges(entry)?;
        for edge in self.edges() {
            if edge.kind() == EdgeKind::BackEdge && !back_edges.contains(&(edge.head(), edge.tail())) {
                return Err(Error::InvalidIr(format!(
                    "edge 0x{:X}->0x{:X} is marked as a back edge but does not close a loop",
                    edge.head(),
                    edge.tail()
                )));
            }
        }

        if !self.post_order.is_empty() && self.post_order != self.graph.compute_post_order(entry)? {
            return Err(Error::InvalidIr("cached traversal orders are stale".to_string()));
        }

        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), Error> {
        let index = block.index();
        let invalid = |reason: &str| Error::InvalidIr(format!("block 0x{:X}: {}", index, reason));

        let terminator = block
            .terminator()
            .ok_or_else(|| invalid("block does not end in a terminator"))?;

        let terminators = block
            .instructions()
            .iter()
            .filter(|instruction| instruction.is_terminator())
            .count();
        if terminators != 1 {
            return Err(invalid("terminator before the end of the block"));
        }

        let edges = self.edges_out(index)?;
        match terminator {
            Operation::Return => {
                if !edges.is_empty() {
                    return Err(invalid("return with outgoing edges"));
                }
            }
            Operation::Jump { target } => {
                if edges.len() != 1 || edges[0].tail() != *target {
                    return Err(invalid("jump target and edges disagree"));
                }
                if edges[0].is_conditional()
                    || matches!(edges[0].kind(), EdgeKind::BranchTrue | EdgeKind::BranchFalse)
                {
                    return Err(invalid("jump edge is guarded"));
                }
            }
            Operation::Branch {
                condition,
                on_true,
                on_false,
            } => {
                if on_true == on_false || edges.len() != 2 {
                    return Err(invalid("branch targets and edges disagree"));
                }
                let true_edge = self.edge(index, *on_true)?;
                let false_edge = self.edge(index, *on_false)?;
                if true_edge.kind() != EdgeKind::BranchTrue
                    || true_edge.condition() != Some(condition)
                {
                    return Err(invalid("true edge is not guarded by the branch condition"));
                }
                if false_edge.kind() != EdgeKind::BranchFalse
                    || false_edge.condition() != Some(&Expression::not(condition.clone()))
                {
                    return Err(invalid("false edge is not guarded by the negated condition"));
                }
            }
            Operation::Assign { .. } | Operation::Call { .. } => {
                return Err(invalid("block does not end in a terminator"))
            }
        }

        Ok(())
    }

    /// Serialize this graph to its binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(self)?)
    }

    /// Load a graph from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<ControlFlowGraph, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Serialize this graph to pretty printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a graph from JSON.
    pub fn from_json(json: &str) -> Result<ControlFlowGraph, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns a string in the graphviz format
    pub fn dot_graph(&self) -> String {
        self.graph.dot_graph()
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for block in self.blocks() {
            writeln!(f, "{}", block)?;
        }
        for edge in self.edges() {
            writeln!(f, "edge {}", edge)?;
        }
        Ok(())
    }
}

/// The serialized layout of a `ControlFlowGraph`.
///
/// Adjacency is rebuilt from the edge list on load, and traversal orders are
/// recomputed.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct SerializedControlFlowGraph {
    entry: Option<usize>,
    exit: Option<usize>,
    next_index: usize,
    blocks: Vec<Block>,
    edges: Vec<Edge>,
}

impl From<ControlFlowGraph> for SerializedControlFlowGraph {
    fn from(cfg: ControlFlowGraph) -> SerializedControlFlowGraph {
        SerializedControlFlowGraph {
            entry: cfg.entry,
            exit: cfg.exit,
            next_index: cfg.next_index,
            blocks: cfg.blocks().into_iter().cloned().collect(),
            edges: cfg.edges().into_iter().cloned().collect(),
        }
    }
}

impl TryFrom<SerializedControlFlowGraph> for ControlFlowGraph {
    type Error = Error;

    fn try_from(serialized: SerializedControlFlowGraph) -> Result<ControlFlowGraph, Error> {
        let mut cfg = ControlFlowGraph::new();
        for block in serialized.blocks {
            if block.index() >= serialized.next_index {
                return Err(Error::InvalidIr(format!(
                    "block index 0x{:X} is out of range",
                    block.index()
                )));
            }
            cfg.graph.insert_vertex(block)?;
        }
        for edge in serialized.edges {
            cfg.graph.insert_edge(edge)?;
        }
        cfg.next_index = serialized.next_index;
        if let Some(entry) = serialized.entry {
            cfg.set_entry(entry)?;
            cfg.compute_orders()?;
        }
        if let Some(exit) = serialized.exit {
            cfg.set_exit(exit)?;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// entry: x = 1; branch x > 0 ? then : else; both jump to exit.
    fn diamond() -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph::new();
        let condition = Expression::cmpgt(Expression::variable("x"), Expression::integer(0));

        let entry = cfg.new_block().unwrap().index();
        let then = cfg.new_block().unwrap().index();
        let else_ = cfg.new_block().unwrap().index();
        let exit = cfg.new_block().unwrap().index();

        {
            let block = cfg.block_mut(entry).unwrap();
            block.assign("x", Expression::integer(1));
            block.branch(condition.clone(), then, else_);
        }
        {
            let block = cfg.block_mut(then).unwrap();
            block.assign("y", Expression::integer(1));
            block.jump(exit);
        }
        {
            let block = cfg.block_mut(else_).unwrap();
            block.assign("y", Expression::integer(-1));
            block.jump(exit);
        }
        cfg.block_mut(exit).unwrap().ret();

        cfg.branch_edges(entry, &condition, then, else_).unwrap();
        cfg.unconditional_edge(then, exit, EdgeKind::FallThrough).unwrap();
        cfg.unconditional_edge(else_, exit, EdgeKind::FallThrough).unwrap();

        cfg.set_entry(entry).unwrap();
        cfg.set_exit(exit).unwrap();
        cfg.compute_orders().unwrap();
        cfg
    }

    #[test]
    fn diamond_is_valid() {
        let cfg = diamond();
        cfg.validate().unwrap();
        assert_eq!(cfg.exits(), vec![3]);
        assert_eq!(cfg.reverse_post_order()[0], 0);
        assert_eq!(cfg.post_order()[0], 3);
        assert!(cfg.loop_headers().unwrap().is_empty());
        assert_eq!(
            cfg.variables(),
            vec!["x".to_string(), "y".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn validate_rejects_disagreeing_jump() {
        let mut cfg = diamond();
        cfg.block_mut(1).unwrap().replace_operation(1, Operation::jump(2)).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::InvalidIr(_))));
    }

    #[test]
    fn validate_rejects_unreachable_block() {
        let mut cfg = diamond();
        cfg.new_block().unwrap().ret();
        assert!(matches!(cfg.validate(), Err(Error::InvalidIr(_))));

        let removed = cfg.remove_unreachable_blocks().unwrap();
        assert_eq!(removed, vec![4]);
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_stale_orders() {
        let mut cfg = diamond();
        cfg.post_order.reverse();
        assert!(matches!(cfg.validate(), Err(Error::InvalidIr(_))));
    }

    #[test]
    fn serialization_round_trip() {
        let cfg = diamond();

        let bytes = cfg.to_bytes().unwrap();
        assert_eq!(ControlFlowGraph::from_bytes(&bytes).unwrap(), cfg);

        let json = cfg.to_json().unwrap();
        assert_eq!(ControlFlowGraph::from_json(&json).unwrap(), cfg);
    }

    #[test]
    fn merge_straight_line_blocks() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block().unwrap().index();
        let b = cfg.new_block().unwrap().index();
        cfg.block_mut(a).unwrap().assign("x", Expression::integer(1));
        cfg.block_mut(a).unwrap().jump(b);
        cfg.block_mut(b).unwrap().assign("y", Expression::variable("x"));
        cfg.block_mut(b).unwrap().ret();
        cfg.unconditional_edge(a, b, EdgeKind::FallThrough).unwrap();
        cfg.set_entry(a).unwrap();
        cfg.set_exit(b).unwrap();

        cfg.merge().unwrap();

        assert_eq!(cfg.num_blocks(), 1);
        assert_eq!(cfg.exit(), Some(a));
        assert_eq!(cfg.block(a).unwrap().len(), 3);
        cfg.validate().unwrap();
    }
}
