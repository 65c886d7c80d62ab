//! Acyclic path numbering.
//!
//! Numbers every acyclic path of a `ControlFlowGraph` with a distinct id in
//! `0..num_paths`, after Ball and Larus. Retreating edges are cut: a path
//! ends at the source of a retreating edge and a new one starts at its
//! target. Each edge carries an increment, and the id of a path is the sum of
//! the increments along it, so a trace decodes into path ids in one pass.

use crate::il;
use crate::Error;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An edge of the acyclic graph paths are numbered over.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum PathEdge {
    /// An edge of the control flow graph which is not retreating.
    Edge(usize, usize),
    /// From the entry to the target of a retreating edge.
    Start(usize),
    /// From the exit, or the source of a retreating edge, to the end of the
    /// path.
    Stop(usize),
}

/// Path numbering for one `ControlFlowGraph`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PathProfile {
    entry: usize,
    // The number of acyclic paths from the entry.
    paths: u64,
    retreating: BTreeSet<(usize, usize)>,
    // Blocks without successors, where every path ends.
    terminals: BTreeSet<usize>,
    num_paths: BTreeMap<usize, u64>,
    // Outgoing path edges of every block, in numbering order.
    successors: BTreeMap<usize, Vec<(PathEdge, u64)>>,
}

impl PathProfile {
    /// Number the acyclic paths of `cfg`.
    pub fn new(cfg: &il::ControlFlowGraph) -> Result<PathProfile, Error> {
        let entry = cfg.entry_index()?;
        let retreating = cfg.retreating_edges()?;
        let order = cfg
            .graph()
            .compute_topological_ordering_without(entry, &retreating)?;

        let mut outgoing: BTreeMap<usize, Vec<PathEdge>> = BTreeMap::new();
        let mut terminals = BTreeSet::new();
        for &block in &order {
            let successors = cfg.successor_indices(block)?;
            if successors.is_empty() {
                terminals.insert(block);
            }
            let mut edges: Vec<PathEdge> = successors
                .into_iter()
                .filter(|successor| !retreating.contains(&(block, *successor)))
                .map(|successor| PathEdge::Edge(block, successor))
                .collect();
            let closes_loop = retreating.iter().any(|(head, _)| *head == block);
            if edges.is_empty() || closes_loop {
                edges.push(PathEdge::Stop(block));
            }
            if block == entry {
                let targets: BTreeSet<usize> = retreating.iter().map(|(_, tail)| *tail).collect();
                edges.extend(targets.into_iter().map(PathEdge::Start));
            }
            outgoing.insert(block, edges);
        }

        let mut num_paths: BTreeMap<usize, u64> = BTreeMap::new();
        let mut successors = BTreeMap::new();
        for &block in order.iter().rev() {
            let mut total: u64 = 0;
            let mut numbered = Vec::new();
            for edge in &outgoing[&block] {
                let paths = match edge {
                    PathEdge::Edge(_, tail) | PathEdge::Start(tail) => {
                        num_paths.get(tail).cloned().ok_or_else(|| {
                            Error::Custom(format!("block 0x{:X} numbered before its successor", block))
                        })?
                    }
                    PathEdge::Stop(_) => 1,
                };
                numbered.push((*edge, total));
                total = total
                    .checked_add(paths)
                    .ok_or_else(|| Error::Custom("too many acyclic paths to number".to_string()))?;
            }
            num_paths.insert(block, total);
            successors.insert(block, numbered);
        }

        let paths = num_paths
            .get(&entry)
            .cloned()
            .ok_or(Error::GraphVertexNotFound(entry))?;
        debug!("numbered {} acyclic paths", paths);

        Ok(PathProfile {
            entry,
            paths,
            retreating,
            terminals,
            num_paths,
            successors,
        })
    }

    /// The number of acyclic paths from the entry.
    pub fn num_paths(&self) -> u64 {
        self.paths
    }

    /// The number of acyclic paths from `block` to the end of a path.
    pub fn num_paths_from(&self, block: usize) -> Option<u64> {
        self.num_paths.get(&block).cloned()
    }

    /// The increment of a path edge.
    pub fn increment(&self, edge: PathEdge) -> Option<u64> {
        let block = match edge {
            PathEdge::Edge(head, _) => head,
            PathEdge::Start(_) => self.entry,
            PathEdge::Stop(block) => block,
        };
        self.successors
            .get(&block)?
            .iter()
            .find(|(e, _)| *e == edge)
            .map(|(_, increment)| *increment)
    }

    fn increment_of(&self, edge: PathEdge) -> Result<u64, Error> {
        self.increment(edge)
            .ok_or_else(|| Error::Custom(format!("{:?} is not part of the path numbering", edge)))
    }

    /// Split a trace of visited blocks into the path edges of the acyclic
    /// paths it runs through.
    ///
    /// A trace which stops before reaching the end of a path, as a faulting
    /// execution does, drops its last partial path.
    pub fn split(&self, trace: &[usize]) -> Result<Vec<Vec<PathEdge>>, Error> {
        let mut paths = Vec::new();
        match trace.first() {
            Some(first) if *first == self.entry => {}
            Some(first) => return Err(Error::Custom(format!("trace starts at 0x{:X}, not the entry", first))),
            None => return Ok(paths),
        }

        let mut path = Vec::new();
        for step in trace.windows(2) {
            let (head, tail) = (step[0], step[1]);
            if self.retreating.contains(&(head, tail)) {
                path.push(PathEdge::Stop(head));
                paths.push(path);
                path = vec![PathEdge::Start(tail)];
            } else {
                path.push(PathEdge::Edge(head, tail));
            }
        }

        if let Some(last) = trace.last() {
            if self.terminals.contains(last) {
                path.push(PathEdge::Stop(*last));
                paths.push(path);
            }
        }

        Ok(paths)
    }

    /// Split a trace of visited blocks into the ids of the acyclic paths it
    /// runs through, as `split` does.
    pub fn decode(&self, trace: &[usize]) -> Result<Vec<u64>, Error> {
        self.split(trace)?
            .iter()
            .map(|path| {
                path.iter().try_fold(0, |id: u64, edge| {
                    self.increment_of(*edge).map(|increment| id + increment)
                })
            })
            .collect()
    }

    /// Move every increment onto the chords of a maximum spanning tree.
    ///
    /// The path graph is closed with an edge from the end of every path back
    /// to the entry, which is always part of the tree. Edges are weighted
    /// with their increments.
    pub fn chord_increments(&self) -> Result<ChordIncrements, Error> {
        let mut edges: Vec<(PathEdge, Node, Node, u64)> = Vec::new();
        for (block, outgoing) in &self.successors {
            for (edge, increment) in outgoing {
                let tail = match edge {
                    PathEdge::Edge(_, tail) | PathEdge::Start(tail) => Node::Block(*tail),
                    PathEdge::Stop(_) => Node::End,
                };
                edges.push((*edge, Node::Block(*block), tail, *increment));
            }
        }
        // Heaviest first. The sort is stable, so ties keep numbering order.
        edges.sort_by(|a, b| b.3.cmp(&a.3));

        let mut parents: BTreeMap<Node, Node> = BTreeMap::new();
        parents.insert(Node::End, Node::Block(self.entry));
        let mut tree: BTreeMap<Node, Vec<(Node, i64)>> = BTreeMap::new();
        tree.entry(Node::End).or_default().push((Node::Block(self.entry), 0));
        tree.entry(Node::Block(self.entry)).or_default().push((Node::End, 0));

        let mut chords = Vec::new();
        for (edge, head, tail, increment) in edges {
            let increment = i64::try_from(increment)
                .map_err(|_| Error::Custom("too many acyclic paths to place on chords".to_string()))?;
            let (head_root, tail_root) = (find(&parents, head), find(&parents, tail));
            if head_root == tail_root {
                chords.push((edge, head, tail, increment));
                continue;
            }
            parents.insert(head_root, tail_root);
            tree.entry(head).or_default().push((tail, increment));
            tree.entry(tail).or_default().push((head, -increment));
        }

        // A chord closes a cycle with the tree path from its tail back to its
        // head, and carries the sum of increments around that cycle.
        let mut placed = BTreeMap::new();
        for (edge, head, tail, increment) in chords {
            let around = tree_distance(&tree, tail, head)
                .and_then(|distance| distance.checked_add(increment))
                .ok_or_else(|| Error::Custom(format!("no tree path closes {:?}", edge)))?;
            placed.insert(edge, around);
        }
        debug!("placed increments on {} chords", placed.len());

        Ok(ChordIncrements { chords: placed })
    }

    /// Decode a trace with increments counted on chords only. Gives the same
    /// ids as `decode`.
    pub fn decode_chords(&self, chords: &ChordIncrements, trace: &[usize]) -> Result<Vec<u64>, Error> {
        self.split(trace)?
            .iter()
            .map(|path| {
                let id: i64 = path.iter().map(|edge| chords.increment(*edge)).sum();
                u64::try_from(id).map_err(|_| Error::Custom(format!("chords sum to {} on {:?}", id, path)))
            })
            .collect()
    }

    /// The path edges taken by the path with id `id`.
    pub fn regenerate(&self, id: u64) -> Result<Vec<PathEdge>, Error> {
        if id >= self.num_paths() {
            return Err(Error::Custom(format!("no acyclic path with id {}", id)));
        }
        let mut path = Vec::new();
        let mut block = self.entry;
        let mut remaining = id;
        loop {
            let edges = self
                .successors
                .get(&block)
                .ok_or(Error::GraphVertexNotFound(block))?;
            // The taken edge has the largest increment not above `remaining`.
            let (edge, increment) = edges
                .iter()
                .rev()
                .find(|(_, increment)| *increment <= remaining)
                .cloned()
                .ok_or_else(|| Error::Custom(format!("no path edge from 0x{:X}", block)))?;
            remaining -= increment;
            path.push(edge);
            block = match edge {
                PathEdge::Edge(_, tail) | PathEdge::Start(tail) => tail,
                PathEdge::Stop(_) => return Ok(path),
            };
        }
    }
}

// A vertex of the path graph. `End` is where every path stops.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Node {
    Block(usize),
    End,
}

fn find(parents: &BTreeMap<Node, Node>, node: Node) -> Node {
    let mut root = node;
    while let Some(parent) = parents.get(&root) {
        root = *parent;
    }
    root
}

// The sum of signed increments along the tree path from `from` to `to`.
fn tree_distance(tree: &BTreeMap<Node, Vec<(Node, i64)>>, from: Node, to: Node) -> Option<i64> {
    let mut visited = BTreeSet::new();
    let mut stack = vec![(from, 0i64)];
    while let Some((node, distance)) = stack.pop() {
        if node == to {
            return Some(distance);
        }
        if !visited.insert(node) {
            continue;
        }
        for (next, increment) in tree.get(&node).into_iter().flatten() {
            if !visited.contains(next) {
                stack.push((*next, distance.checked_add(*increment)?));
            }
        }
    }
    None
}

/// Path increments placed on the chords of a spanning tree, so that only
/// chords need counting. Edges of the tree carry no increment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChordIncrements {
    chords: BTreeMap<PathEdge, i64>,
}

impl ChordIncrements {
    pub fn chords(&self) -> &BTreeMap<PathEdge, i64> {
        &self.chords
    }

    /// The increment counted on `edge`, zero for tree edges.
    pub fn increment(&self, edge: PathEdge) -> i64 {
        self.chords.get(&edge).cloned().unwrap_or(0)
    }
}
