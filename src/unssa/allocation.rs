//! Variable coalescing: partitions the variables of a body into groups that
//! can share one declaration.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
  error::{LoweringError, Result},
  ssa::{names, AssignmentInput, FunctionBody, SsaInstruction},
  unssa::interference::InterferenceGraph,
};

/// Decides whether a set of variables may share one declaration.
pub type SharePredicate<'a> = &'a dyn Fn(&[String]) -> bool;

/// A partition of the variables of a function body. Each group will be
/// stored in one variable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariableAllocation {
  /// Members per group id. Merged-away groups stay behind empty so ids are
  /// stable.
  groups: Vec<Vec<String>>,
  #[serde(skip)]
  group_of: HashMap<String, usize>,
}

impl VariableAllocation {
  pub fn singletons(variables: &[String]) -> Self {
    let mut allocation = VariableAllocation::default();
    for variable in variables {
      allocation.add_variable(variable);
    }
    allocation
  }

  fn add_variable(&mut self, variable: &str) -> usize {
    if let Some(group) = self.group_of.get(variable) {
      return *group;
    }
    let group = self.groups.len();
    self.groups.push(vec![variable.to_string()]);
    self.group_of.insert(variable.to_string(), group);
    group
  }

  pub fn group_of(&self, variable: &str) -> Option<usize> {
    self.group_of.get(variable).copied()
  }

  pub fn members(&self, group: usize) -> &[String] {
    self.groups.get(group).map_or(&[], Vec::as_slice)
  }

  /// Non-empty groups with their ids, in id order.
  pub fn groups(&self) -> impl Iterator<Item = (usize, &Vec<String>)> {
    self
      .groups
      .iter()
      .enumerate()
      .filter(|(_, members)| !members.is_empty())
  }

  pub fn group_count(&self) -> usize {
    self.groups().count()
  }

  /// Moves every member of `from` into `into`.
  fn merge(&mut self, into: usize, from: usize) {
    let members = std::mem::take(&mut self.groups[from]);
    for member in members.iter() {
      self.group_of.insert(member.clone(), into);
    }
    self.groups[into].extend(members);
  }
}

/// The allocator owns the interference graph and collapses it as groups are
/// merged. There is one allocator per function body.
pub struct Allocator<'a> {
  /// Interference between the current groups.
  pub graph: InterferenceGraph,
  pub allocation: VariableAllocation,
  /// Whether distinctly named source variables may share storage.
  pub fuse_names: bool,
  can_share: SharePredicate<'a>,
}

impl<'a> Allocator<'a> {
  pub fn new(graph: InterferenceGraph, can_share: SharePredicate<'a>, fuse_names: bool) -> Self {
    let allocation = VariableAllocation::singletons(graph.variables());
    Allocator {
      graph,
      allocation,
      fuse_names,
      can_share,
    }
  }

  /// Merge the groups of `first` and `second` unless that would put two
  /// interfering variables together or the predicate rejects the union.
  /// Return whether both variables end up in one group.
  pub fn try_merge(&mut self, first: &str, second: &str) -> bool {
    let (Some(first_group), Some(second_group)) =
      (self.allocation.group_of(first), self.allocation.group_of(second))
    else {
      return false;
    };
    if first_group == second_group {
      return true;
    }

    let first_members = self.allocation.members(first_group);
    let second_members = self.allocation.members(second_group);
    if self.graph.groups_interfere(first_members, second_members) {
      log::trace!("{} and {} interfere", first, second);
      return false;
    }
    let union = first_members
      .iter()
      .chain(second_members)
      .cloned()
      .collect::<Vec<_>>();
    if !(self.can_share)(&union) {
      log::trace!("{} and {} cannot share a declaration", first, second);
      return false;
    }

    // the lower group id survives
    let (into, from) = if first_group < second_group {
      (first_group, second_group)
    } else {
      (second_group, first_group)
    };
    let representative = self.allocation.members(into)[0].clone();
    let moved = self.allocation.members(from).to_vec();
    self.graph.merge_group(&moved, &representative);
    self.allocation.merge(into, from);
    log::trace!("merged {} and {}", first, second);
    true
  }

  /// Every phi web has to end up in one group.
  fn merge_phi_webs(&mut self, body: &FunctionBody) -> Result<()> {
    for (_, instr) in body.instructions() {
      if let SsaInstruction::Phi { output, inputs, .. } = instr {
        for input in inputs {
          if !self.try_merge(output, input) {
            return Err(LoweringError::internal(
              body,
              format!("cannot coalesce phi web of {}: {} does not fit", output, input),
            ));
          }
        }
      }
    }
    Ok(())
  }

  fn merge_copies(&mut self, body: &FunctionBody) {
    for (_, instr) in body.instructions() {
      match instr {
        SsaInstruction::Assignment {
          output,
          input: AssignmentInput::Variable(input),
        } => {
          let related = names::is_temporary(output)
            || names::is_temporary(input)
            || names::source_prefix(output) == names::source_prefix(input);
          if related || self.fuse_names {
            self.try_merge(output, input);
          }
        }
        SsaInstruction::ParallelCopy { outputs, inputs } => {
          for (output, input) in outputs.iter().zip(inputs) {
            self.try_merge(output, input);
          }
        }
        _ => {}
      }
    }
  }

  fn merge_references(&mut self, body: &FunctionBody) {
    for (_, instr) in body.instructions() {
      match instr {
        SsaInstruction::FunctionCall {
          outputs,
          inputs,
          signature: Some(signature),
          ..
        } => {
          for (output, input) in signature.by_ref.iter() {
            if let (Some(output), Some(input)) = (outputs.get(*output), inputs.get(*input)) {
              self.try_merge(output, input);
            }
          }
        }
        SsaInstruction::ReadGlobal { output, global } => {
          self.try_merge(output, global);
        }
        SsaInstruction::WriteGlobal { global, input } => {
          self.try_merge(input, global);
        }
        _ => {}
      }
    }
  }

  /// Tries every remaining pair of groups. Groups holding a global or a
  /// function output keep the variables they already have.
  fn merge_everything(&mut self) {
    let is_pinned = |members: &[String]| {
      members
        .iter()
        .any(|name| names::is_global(name) || names::is_return(name))
    };
    let group_count = self.allocation.groups.len();
    for first in 0..group_count {
      for second in first + 1..group_count {
        let first_members = self.allocation.members(first);
        let second_members = self.allocation.members(second);
        if first_members.is_empty()
          || second_members.is_empty()
          || is_pinned(first_members)
          || is_pinned(second_members)
        {
          continue;
        }
        let (first_name, second_name) = (first_members[0].clone(), second_members[0].clone());
        self.try_merge(&first_name, &second_name);
      }
    }
  }

  /// Run every merge pass in priority order.
  pub fn allocate(mut self, body: &FunctionBody) -> Result<VariableAllocation> {
    let variable_count = self.graph.variables().len();
    self.merge_phi_webs(body)?;
    self.merge_copies(body);
    self.merge_references(body);
    if self.fuse_names {
      self.merge_everything();
    }
    log::debug!(
      "allocated {} variables of {} into {} groups",
      variable_count,
      body.display_name(),
      self.allocation.group_count()
    );
    Ok(self.allocation)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ssa::parse::parse_function;
  use crate::unssa::{
    cfg::ControlFlowGraph, cssa::convert_to_cssa, lifetime::LifetimeInformation,
    values::ValueIdentification,
  };
  use proptest::prelude::*;

  fn any_names(_: &[String]) -> bool {
    true
  }

  fn graph_of(body: &FunctionBody) -> InterferenceGraph {
    let cfg = ControlFlowGraph::build(body).unwrap();
    let lifetimes = LifetimeInformation::analyze(body, &cfg).unwrap();
    let values = ValueIdentification::build(body, &cfg);
    InterferenceGraph::build(body, &cfg, &lifetimes, &values)
  }

  fn allocate(text: &str, fuse_names: bool) -> (FunctionBody, VariableAllocation) {
    let mut body = parse_function(text).unwrap();
    convert_to_cssa(&mut body).unwrap();
    let graph = graph_of(&body);
    let allocation = Allocator::new(graph, &any_names, fuse_names)
      .allocate(&body)
      .unwrap();
    (body, allocation)
  }

  fn same_group(allocation: &VariableAllocation, first: &str, second: &str) -> bool {
    allocation.group_of(first).is_some() && allocation.group_of(first) == allocation.group_of(second)
  }

  #[test]
  fn test_phi_web_is_one_group() {
    let (_, allocation) = allocate(
      "block #0:
  c$1 = arg 0
  branch c$1, #1, #2, #3
block #1:
  x$1 = 1
block #2:
  y$1 = 2
block #3:
  p$1 = phi #1:x$1, #2:y$1
  r$ret = p$1
",
      false,
    );
    for name in ["$x$1", "$y$1", "p$1", "x$1", "y$1"] {
      assert!(same_group(&allocation, "$p$1", name), "{}", name);
    }
    // different source names stay apart unless fused
    assert!(!same_group(&allocation, "$p$1", "c$1"));
    assert!(!same_group(&allocation, "$p$1", "r$ret"));
  }

  #[test]
  fn test_swap_keeps_both_variables() {
    let (_, allocation) = allocate(
      "block #0:
  s$1 = arg 0
  a$1 = 0
  b$1 = 1
  for s$1, s$1, s$1, #1, #2
block #1:
  a$2 = phi #0:a$1, #1:b$2
  b$2 = phi #0:b$1, #1:a$2
block #2:
",
      false,
    );
    assert!(!same_group(&allocation, "a$2", "b$2"));
    assert!(same_group(&allocation, "$a$2", "a$2"));
    assert!(same_group(&allocation, "$b$3", "b$2"));
  }

  #[test]
  fn test_same_base_name_merges() {
    let (_, allocation) = allocate(
      "block #0:
  x$1 = arg 0
  x$2 = x$1
  y$1 = x$2
  r$ret = y$1
",
      false,
    );
    assert!(same_group(&allocation, "x$1", "x$2"));
    assert!(!same_group(&allocation, "x$2", "y$1"));

    let (_, allocation) = allocate(
      "block #0:
  x$1 = arg 0
  x$2 = x$1
  y$1 = x$2
  r$ret = y$1
",
      true,
    );
    assert!(same_group(&allocation, "x$2", "y$1"));
    assert!(same_group(&allocation, "y$1", "r$ret"));
  }

  #[test]
  fn test_globals() {
    let (_, allocation) = allocate(
      "block #0:
  x$1 = read_global ^g
  y$1 = typed plus(x$1, x$1)
  write_global ^g y$1
  z$1 = read_global ^h
",
      false,
    );
    assert!(same_group(&allocation, "x$1", "^g"));
    assert!(same_group(&allocation, "y$1", "^g"));
    assert!(!same_group(&allocation, "^g", "^h"));
    assert!(same_group(&allocation, "z$1", "^h"));
  }

  #[test]
  fn test_predicate_is_respected() {
    let body = parse_function(
      "block #0:
  a$1 = arg 0
  t$1 = a$1
  r$ret = t$1
",
    )
    .unwrap();
    let graph = graph_of(&body);
    let never = |members: &[String]| members.len() < 2;
    let allocation = Allocator::new(graph, &never, true).allocate(&body).unwrap();
    assert_eq!(allocation.group_count(), allocation.groups.len());
    assert!(allocation.groups().all(|(_, members)| members.len() == 1));
  }

  #[test]
  fn test_by_ref_call() {
    let (_, allocation) = allocate(
      "block #0:
  v$1 = arg 0
  w$1 = typed resize(v$1) {byref 0:0}
  r$ret = w$1
",
      false,
    );
    assert!(same_group(&allocation, "v$1", "w$1"));
  }

  fn interference_and_merges() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<(usize, usize)>)> {
    (2usize..12).prop_flat_map(|n| {
      (
        Just(n),
        proptest::collection::vec((0..n, 0..n), 0..n * 2),
        proptest::collection::vec((0..n, 0..n), 0..n * 3),
      )
    })
  }

  proptest! {
    #[test]
    fn test_merges_never_join_interfering_variables((n, edges, merges) in interference_and_merges()) {
      let variables = (0..n).map(|index| format!("v{}", index)).collect::<Vec<_>>();
      let mut graph = InterferenceGraph::new(variables.clone());
      for (first, second) in edges.iter() {
        graph.add_interference(&variables[*first], &variables[*second]);
      }
      let original = graph.clone();

      let mut allocator = Allocator::new(graph, &any_names, false);
      for (first, second) in merges.iter() {
        allocator.try_merge(&variables[*first], &variables[*second]);
      }

      for (_, members) in allocator.allocation.groups() {
        for first in members.iter() {
          for second in members.iter() {
            prop_assert!(!original.has_interference(first, second));
          }
        }
      }
      let total = allocator.allocation.groups().map(|(_, members)| members.len()).sum::<usize>();
      prop_assert_eq!(total, n);
    }
  }
}
