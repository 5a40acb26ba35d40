use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Undirected graph structure:
/// each node maps to the HashSet of nodes connected to it.
#[derive(Clone, Debug, Default)]
pub struct Graph<T: Hash + Eq>(HashMap<T, HashSet<T>>);

impl<T: Hash + Eq + Clone + Copy> Graph<T> {
  pub fn new() -> Self {
    Graph(HashMap::new())
  }

  /// Return the neighbors of a node
  ///
  /// # Return
  /// If the node does not exist, return None
  /// If there is no neighbor for this node, return an empty HashSet
  pub fn neighbors(&self, node: &T) -> Option<&HashSet<T>> {
    self.0.get(node)
  }

  pub fn contains(&self, node: &T) -> bool {
    self.0.contains_key(node)
  }

  /// Return the vector of the references to all nodes
  pub fn nodes_ref(&self) -> Vec<&T> {
    self.0.keys().collect()
  }

  pub fn edge_count(&self) -> usize {
    self.0.values().map(HashSet::len).sum::<usize>() / 2
  }

  /// Idempotently add a node into the graph
  pub fn add_node(&mut self, node: T) {
    self.0.entry(node).or_insert_with(HashSet::new);
  }

  /// Add edges between a node and its neighbors
  pub fn add_graph_edges(&mut self, node: T, neighbors: &HashSet<T>) {
    for neigh in neighbors {
      self.add_graph_edge(node, *neigh);
    }
  }

  /// Add an edge between two nodes, i.e. node1 and node2.
  /// Self loops are ignored.
  pub fn add_graph_edge(&mut self, node1: T, node2: T) {
    if node1 == node2 {
      self.add_node(node1);
      return;
    }
    self.0.entry(node1).or_insert_with(HashSet::new).insert(node2);
    self.0.entry(node2).or_insert_with(HashSet::new).insert(node1);
  }

  pub fn has_edge(&self, node1: &T, node2: &T) -> bool {
    self
      .0
      .get(node1)
      .map_or(false, |neighbors| neighbors.contains(node2))
  }

  pub fn remove_node(&mut self, node: T) {
    if let Some(neighbors) = self.0.remove(&node) {
      for neigh in neighbors {
        if let Some(back) = self.0.get_mut(&neigh) {
          back.remove(&node);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_edges() {
    let mut graph = Graph::new();
    graph.add_graph_edge(1, 2);
    graph.add_graph_edge(2, 3);
    graph.add_graph_edge(3, 3);
    assert!(graph.has_edge(&1, &2));
    assert!(graph.has_edge(&2, &1));
    assert!(!graph.has_edge(&1, &3));
    assert!(!graph.has_edge(&3, &3));
    assert_eq!(graph.edge_count(), 2);

    graph.remove_node(2);
    assert!(!graph.contains(&2));
    assert!(graph.neighbors(&1).unwrap().is_empty());
    assert_eq!(graph.edge_count(), 0);
  }
}
