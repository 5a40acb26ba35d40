use std::collections::HashMap;

use crate::{
  ssa::{names, FunctionBody, SsaInstruction},
  unssa::{cfg::ControlFlowGraph, lifetime::LifetimeInformation, values::ValueIdentification},
  utils::Graph,
};

/// Interference between the variables of one function body, over dense
/// variable indices.
#[derive(Debug, Clone)]
pub struct InterferenceGraph {
  variables: Vec<String>,
  indices: HashMap<String, usize>,
  graph: Graph<usize>,
  /// Index each variable was merged into. Points to itself until merged.
  merged_into: Vec<usize>,
}

impl InterferenceGraph {
  pub fn new(variables: Vec<String>) -> Self {
    let mut graph = Graph::new();
    let mut indices = HashMap::new();
    for (index, variable) in variables.iter().enumerate() {
      graph.add_node(index);
      indices.insert(variable.clone(), index);
    }
    InterferenceGraph {
      merged_into: (0..variables.len()).collect(),
      variables,
      indices,
      graph,
    }
  }

  /// Build the interference graph from the liveness and value analyses.
  pub fn build(
    body: &FunctionBody,
    cfg: &ControlFlowGraph,
    lifetimes: &LifetimeInformation,
    values: &ValueIdentification,
  ) -> Self {
    let mut graph = InterferenceGraph::new(body.all_variables());

    for ((block_id, index), instr) in body.instructions() {
      if !cfg.is_reachable(block_id) {
        continue;
      }
      let outputs = instr.defined_variables();
      let live_at_exit = lifetimes.live_at_exit(block_id, index);
      for (position, output) in outputs.iter().enumerate() {
        for live in live_at_exit.into_iter().flatten() {
          if live.as_str() != *output && !values.same_value(output, live) {
            graph.add_interference(output, live);
          }
        }
        // Outputs of one instruction are written together.
        for other in outputs[position + 1..].iter() {
          if !values.same_value(output, other) {
            graph.add_interference(output, other);
          }
        }
      }
    }

    // Globals and return values each need their own storage.
    let pinned = graph
      .variables
      .iter()
      .filter(|name| names::is_global(name) || names::is_return(name))
      .cloned()
      .collect::<Vec<_>>();
    graph.add_clique(&pinned);

    // Arguments all arrive at once, whether or not they are read.
    let arguments = body
      .instructions()
      .filter_map(|(_, instr)| match instr {
        SsaInstruction::Argument { output, .. } => Some(output.clone()),
        _ => None,
      })
      .collect::<Vec<_>>();
    graph.add_clique(&arguments);

    log::debug!(
      "interference graph for {}: {} variables, {} edges",
      body.display_name(),
      graph.variables.len(),
      graph.graph.edge_count()
    );
    graph
  }

  pub fn variables(&self) -> &Vec<String> {
    &self.variables
  }

  pub fn contains(&self, variable: &str) -> bool {
    self.indices.contains_key(variable)
  }

  fn add_variable(&mut self, variable: &str) -> usize {
    if let Some(index) = self.indices.get(variable) {
      return *index;
    }
    let index = self.variables.len();
    self.variables.push(variable.to_string());
    self.indices.insert(variable.to_string(), index);
    self.merged_into.push(index);
    self.graph.add_node(index);
    index
  }

  /// Follows merges to the index that currently stands for `index`.
  fn resolve(&self, mut index: usize) -> usize {
    while self.merged_into[index] != index {
      index = self.merged_into[index];
    }
    index
  }

  pub fn add_interference(&mut self, first: &str, second: &str) {
    let first = self.add_variable(first);
    let second = self.add_variable(second);
    let (first, second) = (self.resolve(first), self.resolve(second));
    self.graph.add_graph_edge(first, second);
  }

  fn add_clique(&mut self, variables: &[String]) {
    for (position, first) in variables.iter().enumerate() {
      for second in variables[position + 1..].iter() {
        self.add_interference(first, second);
      }
    }
  }

  pub fn has_interference(&self, first: &str, second: &str) -> bool {
    match (self.indices.get(first), self.indices.get(second)) {
      (Some(first), Some(second)) => {
        let (first, second) = (self.resolve(*first), self.resolve(*second));
        first != second && self.graph.has_edge(&first, &second)
      }
      _ => false,
    }
  }

  /// Whether any member of `first` interferes with any member of `second`.
  pub fn groups_interfere(&self, first: &[String], second: &[String]) -> bool {
    first
      .iter()
      .any(|a| second.iter().any(|b| self.has_interference(a, b)))
  }

  /// Collapses `members` onto `representative`: the representative inherits
  /// every edge of every member and the members stop existing on their own.
  /// Irreversible.
  pub fn merge_group(&mut self, members: &[String], representative: &str) {
    let target = self.add_variable(representative);
    let target = self.resolve(target);
    for member in members {
      let Some(index) = self.indices.get(member.as_str()).copied() else {
        continue;
      };
      let index = self.resolve(index);
      if index == target {
        continue;
      }
      if let Some(neighbors) = self.graph.neighbors(&index).cloned() {
        self.graph.add_graph_edges(target, &neighbors);
      }
      self.graph.remove_node(index);
      self.merged_into[index] = target;
    }
  }
}
