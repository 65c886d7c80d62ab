//! A directed graph keyed by vertex index, with the orders and loop
//! structure the control flow graph and the fixed point engine need.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::Error;

pub trait Vertex: Clone {
    /// Unique within a graph.
    fn index(&self) -> usize;
    fn dot_label(&self) -> String;
    fn dot_fill_color(&self) -> String {
        "#e8f0ff".to_string()
    }
}

/// An edge from `head` to `tail`. A graph holds at most one edge per pair.
pub trait Edge: Clone {
    fn head(&self) -> usize;
    fn tail(&self) -> usize;
    fn dot_label(&self) -> String;
    fn dot_style(&self) -> String {
        "solid".to_string()
    }
}

/// A directed graph.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, Default)]
pub struct Graph<V: Vertex, E: Edge> {
    vertices: BTreeMap<usize, V>,
    edges: BTreeMap<(usize, usize), E>,
    successors: BTreeMap<usize, BTreeSet<usize>>,
    predecessors: BTreeMap<usize, BTreeSet<usize>>,
}

impl<V, E> Graph<V, E>
where
    V: Vertex,
    E: Edge,
{
    pub fn new() -> Graph<V, E> {
        Graph {
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true if the vertex with the given index exists in this graph
    pub fn has_vertex(&self, index: usize) -> bool {
        self.vertices.contains_key(&index)
    }

    /// Removes a vertex, and all edges associated with that vertex.
    pub fn remove_vertex(&mut self, index: usize) -> Result<(), Error> {
        if !self.has_vertex(index) {
            return Err(Error::GraphVertexNotFound(index));
        }

        self.vertices.remove(&index);

        // A self loop shows up on both sides.
        let incident: FxHashSet<(usize, usize)> = self.successors[&index]
            .iter()
            .map(|successor| (index, *successor))
            .chain(self.predecessors[&index].iter().map(|predecessor| (*predecessor, index)))
            .collect();
        for (head, tail) in incident {
            self.remove_edge(head, tail)?;
        }

        self.predecessors.remove(&index);
        self.successors.remove(&index);

        Ok(())
    }

    /// Removes all unreachable vertices from this graph, returning the
    /// indices of the removed vertices.
    /// Unreachable means that there is no path from head to the vertex.
    pub fn remove_unreachable_vertices(&mut self, head: usize) -> Result<Vec<usize>, Error> {
        let mut unreachable: Vec<usize> = self.unreachable_vertices(head)?.into_iter().collect();
        unreachable.sort_unstable();
        for vertex in &unreachable {
            self.remove_vertex(*vertex)?;
        }
        Ok(unreachable)
    }

    /// Returns true if the edge with the given head and tail index exists in this graph
    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.edges.contains_key(&(head, tail))
    }

    /// Removes an edge
    pub fn remove_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        if self.edges.remove(&(head, tail)).is_none() {
            return Err(Error::GraphEdgeNotFound(head, tail));
        }

        if let Some(predecessors) = self.predecessors.get_mut(&tail) {
            predecessors.remove(&head);
        }
        if let Some(successors) = self.successors.get_mut(&head) {
            successors.remove(&tail);
        }

        Ok(())
    }

    /// Inserts a vertex into the graph.
    /// # Errors
    /// Error if the vertex already exists by index.
    pub fn insert_vertex(&mut self, v: V) -> Result<(), Error> {
        if self.vertices.contains_key(&v.index()) {
            return Err("duplicate vertex index".into());
        }
        self.successors.insert(v.index(), BTreeSet::new());
        self.predecessors.insert(v.index(), BTreeSet::new());
        self.vertices.insert(v.index(), v);
        Ok(())
    }

    /// Inserts an edge into the graph.
    /// # Errors
    /// Error if the edge already exists by indices.
    pub fn insert_edge(&mut self, edge: E) -> Result<(), Error> {
        let (head, tail) = (edge.head(), edge.tail());
        if self.edges.contains_key(&(head, tail)) {
            return Err("duplicate edge".into());
        }
        if !self.vertices.contains_key(&head) {
            return Err(Error::GraphVertexNotFound(head));
        }
        if !self.vertices.contains_key(&tail) {
            return Err(Error::GraphVertexNotFound(tail));
        }

        self.edges.insert((head, tail), edge);
        self.successors.entry(head).or_default().insert(tail);
        self.predecessors.entry(tail).or_default().insert(head);

        Ok(())
    }

    /// Returns the indices of all immediate successors of a vertex from the graph.
    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.successors
            .get(&index)
            .map(|successors| successors.iter().cloned().collect())
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Returns the indices of all immediate predecessors of a vertex from the graph.
    pub fn predecessor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.predecessors
            .get(&index)
            .map(|predecessors| predecessors.iter().cloned().collect())
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Computes the set of vertices unreachable from the given index.
    pub fn unreachable_vertices(&self, index: usize) -> Result<FxHashSet<usize>, Error> {
        let reachable_vertices = self.reachable_vertices(index)?;
        Ok(self
            .vertices
            .keys()
            .filter(|index| !reachable_vertices.contains(index))
            .cloned()
            .collect())
    }

    /// Computes the set of vertices reachable from the given index.
    pub fn reachable_vertices(&self, index: usize) -> Result<FxHashSet<usize>, Error> {
        if !self.has_vertex(index) {
            return Err(Error::GraphVertexNotFound(index));
        }

        let mut reachable_vertices: FxHashSet<usize> = FxHashSet::default();
        let mut queue: Vec<usize> = vec![index];

        reachable_vertices.insert(index);

        while let Some(vertex) = queue.pop() {
            for &successor in &self.successors[&vertex] {
                if reachable_vertices.insert(successor) {
                    queue.push(successor)
                }
            }
        }

        Ok(reachable_vertices)
    }

    /// Compute the post order of all vertices reachable from root.
    ///
    /// The walk uses an explicit stack, so arbitrarily deep graphs do not
    /// exhaust the call stack.
    pub fn compute_post_order(&self, root: usize) -> Result<Vec<usize>, Error> {
        if !self.has_vertex(root) {
            return Err(Error::GraphVertexNotFound(root));
        }

        let mut visited: FxHashSet<usize> = FxHashSet::default();
        let mut order: Vec<usize> = Vec::new();
        // (vertex, successors of vertex not yet walked)
        let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();

        visited.insert(root);
        stack.push((root, self.successors[&root].iter().rev().cloned().collect()));

        while let Some((node, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(successor) => {
                    if visited.insert(successor) {
                        let successors = self.successors[&successor].iter().rev().cloned().collect();
                        stack.push((successor, successors));
                    }
                }
                None => {
                    order.push(*node);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }

    /// Compute the reverse post order of all vertices reachable from root.
    pub fn compute_reverse_post_order(&self, root: usize) -> Result<Vec<usize>, Error> {
        let mut order = self.compute_post_order(root)?;
        order.reverse();
        Ok(order)
    }

    /// Computes the set of retreating edges of a depth-first walk from root.
    ///
    /// Every cycle reachable from root contains at least one retreating edge,
    /// whether or not the graph is reducible.
    pub fn compute_retreating_edges(&self, root: usize) -> Result<BTreeSet<(usize, usize)>, Error> {
        let post_order = self.compute_post_order(root)?;
        let number: FxHashMap<usize, usize> = post_order
            .iter()
            .enumerate()
            .map(|(number, vertex)| (*vertex, number))
            .collect();

        let mut retreating = BTreeSet::new();
        for &(head, tail) in self.edges.keys() {
            if let (Some(h), Some(t)) = (number.get(&head), number.get(&tail)) {
                // In post order a retreating edge never goes to a lower number.
                if t >= h {
                    retreating.insert((head, tail));
                }
            }
        }
        Ok(retreating)
    }

    /// Computes immediate dominators for all vertices reachable from root.
    ///
    /// Uses the iterative algorithm of Cooper, Harvey and Kennedy over the
    /// reverse post order.
    pub fn compute_immediate_dominators(&self, root: usize) -> Result<FxHashMap<usize, usize>, Error> {
        let rpo = self.compute_reverse_post_order(root)?;
        let number: FxHashMap<usize, usize> = rpo
            .iter()
            .enumerate()
            .map(|(number, vertex)| (*vertex, number))
            .collect();

        let mut idoms: FxHashMap<usize, usize> = FxHashMap::default();
        idoms.insert(root, root);

        let intersect = |idoms: &FxHashMap<usize, usize>, mut a: usize, mut b: usize| {
            while a != b {
                while number[&a] > number[&b] {
                    a = idoms[&a];
                }
                while number[&b] > number[&a] {
                    b = idoms[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &vertex in rpo.iter().skip(1) {
                let mut new_idom: Option<usize> = None;
                for predecessor in &self.predecessors[&vertex] {
                    if !idoms.contains_key(predecessor) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *predecessor,
                        Some(current) => intersect(&idoms, *predecessor, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idoms.get(&vertex) != Some(&new_idom) {
                        idoms.insert(vertex, new_idom);
                        changed = true;
                    }
                }
            }
        }

        idoms.remove(&root);
        Ok(idoms)
    }

    /// Computes dominators for all vertices reachable from start_index
    pub fn compute_dominators(
        &self,
        start_index: usize,
    ) -> Result<FxHashMap<usize, FxHashSet<usize>>, Error> {
        let idoms = self.compute_immediate_dominators(start_index)?;

        let mut dominators: FxHashMap<usize, FxHashSet<usize>> = FxHashMap::default();
        for vertex in self.compute_reverse_post_order(start_index)? {
            let mut doms = FxHashSet::default();
            doms.insert(vertex);
            if let Some(idom) = idoms.get(&vertex) {
                doms.extend(&dominators[idom]);
            }
            dominators.insert(vertex, doms);
        }

        Ok(dominators)
    }

    /// Computes the set of back edges
    ///
    /// Back edges are edges whose heads are dominated by their tails.
    pub fn compute_back_edges(&self, head: usize) -> Result<BTreeSet<(usize, usize)>, Error> {
        let mut back_edges = BTreeSet::new();

        for (node, dominators) in self.compute_dominators(head)? {
            for successor in &self.successors[&node] {
                if dominators.contains(successor) {
                    back_edges.insert((node, *successor));
                }
            }
        }

        Ok(back_edges)
    }

    /// Computes the natural loops of the graph, keyed by loop header.
    ///
    /// The body of a loop holds the header and every vertex that reaches a
    /// back edge source without passing through the header. Loops sharing a
    /// header are merged.
    pub fn compute_natural_loops(
        &self,
        head: usize,
    ) -> Result<BTreeMap<usize, BTreeSet<usize>>, Error> {
        let mut loops: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();

        for (source, header) in self.compute_back_edges(head)? {
            let body = loops.entry(header).or_default();
            body.insert(header);

            let mut queue = vec![source];
            while let Some(vertex) = queue.pop() {
                if body.insert(vertex) {
                    queue.extend(self.predecessors[&vertex].iter().cloned());
                }
            }
        }

        Ok(loops)
    }

    /// Computes a topological ordering of the vertices reachable from root,
    /// ignoring the given edges.
    ///
    /// Returns an error if the graph without the ignored edges still has a
    /// cycle.
    pub fn compute_topological_ordering_without(
        &self,
        root: usize,
        ignored: &BTreeSet<(usize, usize)>,
    ) -> Result<Vec<usize>, Error> {
        let reachable = self.reachable_vertices(root)?;

        let mut in_degree: BTreeMap<usize, usize> = BTreeMap::new();
        for &vertex in &reachable {
            in_degree.entry(vertex).or_insert(0);
            for &successor in &self.successors[&vertex] {
                if !ignored.contains(&(vertex, successor)) {
                    *in_degree.entry(successor).or_insert(0) += 1;
                }
            }
        }

        let mut ready: Vec<usize> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(vertex, _)| *vertex)
            .collect();
        ready.reverse();

        let mut order = Vec::new();
        while let Some(vertex) = ready.pop() {
            order.push(vertex);
            for &successor in &self.successors[&vertex] {
                if ignored.contains(&(vertex, successor)) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(&successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(successor);
                    }
                }
            }
        }

        if order.len() != reachable.len() {
            return Err("Graph contains a loop".into());
        }

        Ok(order)
    }

    /// Returns all vertices in the graph.
    pub fn vertices(&self) -> Vec<&V> {
        self.vertices.values().collect()
    }

    /// Fetches a vertex from the graph by index.
    pub fn vertex(&self, index: usize) -> Result<&V, Error> {
        self.vertices
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    // Fetches a mutable instance of a vertex.
    pub fn vertex_mut(&mut self, index: usize) -> Result<&mut V, Error> {
        self.vertices
            .get_mut(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    pub fn edge(&self, head: usize, tail: usize) -> Result<&E, Error> {
        self.edges
            .get(&(head, tail))
            .ok_or(Error::GraphEdgeNotFound(head, tail))
    }

    /// Get a reference to every `Edge` in the `Graph`.
    pub fn edges(&self) -> Vec<&E> {
        self.edges.values().collect()
    }

    /// The edges leaving `index`, ordered by tail.
    pub fn edges_out(&self, index: usize) -> Result<Vec<&E>, Error> {
        let successors = self
            .successors
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))?;
        Ok(successors.iter().filter_map(|tail| self.edges.get(&(index, *tail))).collect())
    }

    /// The edges entering `index`, ordered by head.
    pub fn edges_in(&self, index: usize) -> Result<Vec<&E>, Error> {
        let predecessors = self
            .predecessors
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))?;
        Ok(predecessors.iter().filter_map(|head| self.edges.get(&(*head, index))).collect())
    }

    /// Render the graph in Graphviz dot.
    pub fn dot_graph(&self) -> String {
        let mut dot = String::from("digraph G {\n");
        dot.push_str("    graph [fontname=\"monospace\", splines=\"polyline\"]\n");
        dot.push_str("    node [fontname=\"monospace\", shape=\"box\", style=\"filled\"]\n");
        dot.push_str("    edge [fontname=\"monospace\"]\n");
        for vertex in self.vertices.values() {
            dot.push_str(&format!(
                "    {} [label=\"{}\", fillcolor=\"{}\"];\n",
                vertex.index(),
                vertex.dot_label().replace('\n', "\\l"),
                vertex.dot_fill_color()
            ));
        }
        for edge in self.edges.values() {
            dot.push_str(&format!(
                "    {} -> {} [label=\"{}\", style=\"{}\"];\n",
                edge.head(),
                edge.tail(),
                edge.dot_label().replace('\n', "\\l"),
                edge.dot_style()
            ));
        }
        dot.push('}');
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Vertex for usize {
        fn index(&self) -> usize {
            *self
        }

        fn dot_label(&self) -> String {
            self.to_string()
        }
    }

    impl Edge for (usize, usize) {
        fn head(&self) -> usize {
            self.0
        }

        fn tail(&self) -> usize {
            self.1
        }

        fn dot_label(&self) -> String {
            format!("{} -> {}", self.0, self.1)
        }
    }

    /**
     *           +--> 3 +-+
     *          /          \
     *         | +--> 4 +--+
     *         |/          |
     *         +           v
     * 1 +---> 2 <-------+ 5
     *         +
     *         |
     *         v
     *         6
     *
     * From: https://en.wikipedia.org/wiki/Dominator_(graph_theory)
     */
    fn create_test_graph() -> Graph<usize, (usize, usize)> {
        let mut graph = Graph::new();

        for vertex in 1..=6 {
            graph.insert_vertex(vertex).unwrap();
        }

        graph.insert_edge((1, 2)).unwrap();
        graph.insert_edge((2, 3)).unwrap();
        graph.insert_edge((2, 4)).unwrap();
        graph.insert_edge((2, 6)).unwrap();
        graph.insert_edge((3, 5)).unwrap();
        graph.insert_edge((4, 5)).unwrap();
        graph.insert_edge((5, 2)).unwrap();

        graph
    }

    #[test]
    fn test_successors() {
        let graph = create_test_graph();

        assert_eq!(graph.successor_indices(2).unwrap(), vec![3, 4, 6]);
        assert!(graph.successor_indices(6).unwrap().is_empty());

        // vertex 7 does not exist
        assert!(graph.successor_indices(7).is_err());
    }

    #[test]
    fn test_predecessors() {
        let graph = create_test_graph();

        assert!(graph.predecessor_indices(1).unwrap().is_empty());
        assert_eq!(graph.predecessor_indices(2).unwrap(), vec![1, 5]);
    }

    #[test]
    fn test_post_order() {
        let graph = create_test_graph();

        assert_eq!(graph.compute_post_order(1).unwrap(), vec![5, 3, 4, 6, 2, 1]);
        assert_eq!(graph.compute_post_order(5).unwrap(), vec![3, 4, 6, 2, 5]);
    }

    #[test]
    fn test_reverse_post_order() {
        let graph = create_test_graph();

        assert_eq!(
            graph.compute_reverse_post_order(1).unwrap(),
            vec![1, 2, 6, 4, 3, 5]
        );
    }

    #[test]
    fn test_post_order_deep_chain() {
        let mut graph: Graph<usize, (usize, usize)> = Graph::new();
        for vertex in 0..100_000 {
            graph.insert_vertex(vertex).unwrap();
            if vertex > 0 {
                graph.insert_edge((vertex - 1, vertex)).unwrap();
            }
        }

        let order = graph.compute_post_order(0).unwrap();
        assert_eq!(order.len(), 100_000);
        assert_eq!(order[0], 99_999);
    }

    #[test]
    fn test_immediate_dominators() {
        let graph = create_test_graph();
        let idoms = graph.compute_immediate_dominators(1).unwrap();

        assert!(idoms.get(&1).is_none());
        assert_eq!(idoms[&2], 1);
        assert_eq!(idoms[&3], 2);
        assert_eq!(idoms[&4], 2);
        assert_eq!(idoms[&5], 2);
        assert_eq!(idoms[&6], 2);
    }

    #[test]
    fn test_dominators() {
        let graph = create_test_graph();
        let dominators = graph.compute_dominators(1).unwrap();

        assert_eq!(dominators[&1], vec![1].into_iter().collect());
        assert_eq!(dominators[&2], vec![1, 2].into_iter().collect());
        assert_eq!(dominators[&5], vec![1, 2, 5].into_iter().collect());
    }

    #[test]
    fn test_back_edges_and_retreating_edges_agree_on_reducible_graph() {
        let graph = create_test_graph();

        let back_edges = graph.compute_back_edges(1).unwrap();
        assert_eq!(back_edges, vec![(5, 2)].into_iter().collect());
        assert_eq!(graph.compute_retreating_edges(1).unwrap(), back_edges);
    }

    #[test]
    fn test_retreating_edges_of_irreducible_graph() {
        // 1 -> 2, 1 -> 3, 2 <-> 3: the cycle has no dominating header
        let mut graph: Graph<usize, (usize, usize)> = Graph::new();
        for vertex in 1..=3 {
            graph.insert_vertex(vertex).unwrap();
        }
        graph.insert_edge((1, 2)).unwrap();
        graph.insert_edge((1, 3)).unwrap();
        graph.insert_edge((2, 3)).unwrap();
        graph.insert_edge((3, 2)).unwrap();

        assert!(graph.compute_back_edges(1).unwrap().is_empty());
        assert_eq!(graph.compute_retreating_edges(1).unwrap().len(), 1);
    }

    #[test]
    fn test_natural_loops() {
        let graph = create_test_graph();
        let loops = graph.compute_natural_loops(1).unwrap();

        assert_eq!(loops.len(), 1);
        assert_eq!(loops[&2], vec![2, 3, 4, 5].into_iter().collect());
    }

    #[test]
    fn test_topological_ordering_without_back_edges() {
        let graph = create_test_graph();

        assert!(graph
            .compute_topological_ordering_without(1, &BTreeSet::new())
            .is_err());

        let back_edges = graph.compute_back_edges(1).unwrap();
        let order = graph
            .compute_topological_ordering_without(1, &back_edges)
            .unwrap();
        assert_eq!(order.len(), 6);
        let position = |v: usize| order.iter().position(|x| *x == v).unwrap();
        assert!(position(1) < position(2));
        assert!(position(3) < position(5));
        assert!(position(4) < position(5));
    }

    #[test]
    fn test_remove_unreachable_vertices() {
        let mut graph = create_test_graph();
        graph.insert_vertex(7).unwrap();
        graph.insert_vertex(8).unwrap();
        graph.insert_edge((7, 8)).unwrap();
        graph.insert_edge((8, 2)).unwrap();

        assert_eq!(graph.remove_unreachable_vertices(1).unwrap(), vec![7, 8]);
        assert_eq!(graph.num_vertices(), 6);
        assert_eq!(graph.predecessor_indices(2).unwrap(), vec![1, 5]);
    }

    #[test]
    fn test_remove_vertex_with_self_loop() {
        let mut graph: Graph<usize, (usize, usize)> = Graph::new();
        graph.insert_vertex(1).unwrap();
        graph.insert_vertex(2).unwrap();
        graph.insert_edge((1, 2)).unwrap();
        graph.insert_edge((2, 2)).unwrap();

        graph.remove_vertex(2).unwrap();

        assert!(graph.successor_indices(1).unwrap().is_empty());
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_dot_graph() {
        let graph = create_test_graph();
        let dot = graph.dot_graph();

        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("    5 -> 2 [label=\"5 -> 2\""));
        assert_eq!(dot.matches("fillcolor").count(), 6);
    }
}
